use std::io::Write;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use hostfs_bridge::{BridgeConfig, ListingMode, StatusCode};

use super::Session;

#[derive(Debug, Parser)]
/// The options for the `hostfs ls` subcommand
pub struct Ls {
    /// Directory to list
    path: PathBuf,
    /// Also list directories, each before its own contents
    #[clap(short, long)]
    all: bool,
    /// Only print the number of entries
    #[clap(short, long)]
    count: bool,
}

impl Ls {
    /// Execute `hostfs ls`
    pub fn execute(&self, mut config: BridgeConfig) -> Result<StatusCode, anyhow::Error> {
        if self.all {
            config.listing = ListingMode::All;
        }
        let mut session = Session::new(config);

        let count = match session.entry_count(&self.path)? {
            Ok(count) => count,
            Err(status) => {
                eprintln!("{status}: {}", session.describe(&self.path, status));
                return Ok(status);
            }
        };
        if self.count {
            println!("{count}");
            return Ok(StatusCode::Ok);
        }

        // Names are written as raw bytes; they need not be UTF-8.
        let mut stdout = std::io::stdout().lock();
        for index in 0..count {
            match session.entry_name(&self.path, index)? {
                Ok(name) => stdout
                    .write_all(&name)
                    .and_then(|()| stdout.write_all(b"\n"))
                    .context("unable to write to stdout")?,
                // The tree changed between the count and this index.
                Err(status) => {
                    eprintln!("{status}: {}", session.describe(&self.path, status));
                    return Ok(status);
                }
            }
        }
        stdout.flush().context("unable to write to stdout")?;
        Ok(StatusCode::Ok)
    }
}
