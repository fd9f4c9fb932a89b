//! The `hostfs` binary lib.
//!
//! Every subcommand spins up an in-process guest, writes its arguments into
//! guest memory and goes through the same boundary calls a sandboxed guest
//! would make, so what the CLI prints is what a guest would see.

#![deny(
    missing_docs,
    dead_code,
    nonstandard_style,
    unused_mut,
    unused_variables,
    unused_unsafe,
    unreachable_patterns
)]

pub mod commands;
pub mod logging;

/// Version number of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
