//! CLI subcommands.

pub mod config;
pub mod simulate;
mod synthetic;
