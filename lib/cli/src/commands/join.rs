use clap::Parser;
use hostfs_bridge::{BridgeConfig, StatusCode};

use super::Session;

#[derive(Debug, Parser)]
/// The options for the `hostfs join` subcommand
pub struct Join {
    /// Segments to join, in order
    #[clap(required = true)]
    segments: Vec<String>,
}

impl Join {
    /// Execute `hostfs join`
    pub fn execute(&self, config: BridgeConfig) -> Result<StatusCode, anyhow::Error> {
        let joined = Session::new(config).combined_path(&self.segments)?;
        println!("{joined}");
        Ok(StatusCode::Ok)
    }
}
