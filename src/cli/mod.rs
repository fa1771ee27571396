//! Command-line interface for sluice.
//!
//! Provides commands for running the archiver, provisioning its queue and
//! bucket resources, and sending test messages.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
