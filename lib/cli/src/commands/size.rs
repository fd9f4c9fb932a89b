use std::path::PathBuf;

use clap::Parser;
use hostfs_bridge::{BridgeConfig, StatusCode};

use super::Session;

#[derive(Debug, Parser)]
/// The options for the `hostfs size` subcommand
pub struct Size {
    /// Path to a regular file
    path: PathBuf,
}

impl Size {
    /// Execute `hostfs size`
    pub fn execute(&self, config: BridgeConfig) -> Result<StatusCode, anyhow::Error> {
        let mut session = Session::new(config);
        match session.file_size(&self.path)? {
            Ok(size) => {
                println!("{size}");
                Ok(StatusCode::Ok)
            }
            Err(status) => {
                eprintln!("{status}: {}", session.describe(&self.path, status));
                Ok(status)
            }
        }
    }
}
