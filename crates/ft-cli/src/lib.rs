//! Focus session tracker CLI library.
//!
//! This crate provides the CLI interface and the polling runtime behind
//! `ft watch`.

mod cli;
pub mod commands;
mod config;
pub mod runtime;

pub use cli::{
    Cli, Commands, EventsArgs, RecordEvent, SessionsArgs, StatusArgs, TargetsAction, WatchArgs,
};
pub use config::Config;
