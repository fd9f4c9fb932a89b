use std::io::Write;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use hostfs_bridge::{BridgeConfig, StatusCode};

use super::Session;

#[derive(Debug, Parser)]
/// The options for the `hostfs cat` subcommand
pub struct Cat {
    /// Path to a regular file
    path: PathBuf,
}

impl Cat {
    /// Execute `hostfs cat`
    pub fn execute(&self, config: BridgeConfig) -> Result<StatusCode, anyhow::Error> {
        let mut session = Session::new(config);
        let bytes = match session.load_file(&self.path)? {
            Ok(bytes) => bytes,
            Err(status) => {
                eprintln!("{status}: {}", session.describe(&self.path, status));
                return Ok(status);
            }
        };

        let mut stdout = std::io::stdout().lock();
        stdout
            .write_all(&bytes)
            .and_then(|()| stdout.flush())
            .context("unable to write to stdout")?;
        Ok(StatusCode::Ok)
    }
}
