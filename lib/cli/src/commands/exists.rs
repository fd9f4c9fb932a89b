use std::path::PathBuf;

use clap::Parser;
use hostfs_bridge::{BridgeConfig, StatusCode};

use super::Session;

#[derive(Debug, Parser)]
/// The options for the `hostfs exists` subcommand
pub struct Exists {
    /// Path to classify
    path: PathBuf,
}

impl Exists {
    /// Execute `hostfs exists`
    pub fn execute(&self, config: BridgeConfig) -> Result<StatusCode, anyhow::Error> {
        let [exists, file, directory] = Session::new(config).flags(&self.path)?;
        println!("exists: {exists}");
        println!("file: {file}");
        println!("directory: {directory}");
        Ok(StatusCode::Ok)
    }
}
