//! Command-line argument definitions.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Focus session tracker.
///
/// Records which monitored app is in the foreground, tracks usage sessions,
/// and decides when a proactive suggestion may interrupt.
#[derive(Debug, Parser)]
#[command(name = "ft", version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Manage the monitored package set.
    #[command(subcommand)]
    Targets(TargetsAction),

    /// Append a single event to the timeline.
    #[command(subcommand)]
    Record(RecordEvent),

    /// Show the reconstructed session state of each target.
    Status(StatusArgs),

    /// List timeline events.
    Events(EventsArgs),

    /// List sessions with their active durations.
    Sessions(SessionsArgs),

    /// Run the live session monitor.
    Watch(WatchArgs),

    /// Delete every timeline event.
    Reset {
        /// Confirm the deletion.
        #[arg(long)]
        yes: bool,
    },
}

/// Target set operations.
#[derive(Debug, Subcommand)]
pub enum TargetsAction {
    /// Replace the monitored package set.
    Set {
        /// Package names to monitor. Pass none to monitor nothing.
        packages: Vec<String>,
    },
    /// Print the current monitored package set.
    Show,
}

/// Events that can be recorded by hand.
#[derive(Debug, Subcommand)]
pub enum RecordEvent {
    /// Record the foreground app; omit the package for "nothing monitored".
    Foreground {
        package: Option<String>,
    },
    /// Record that a suggestion was shown.
    Shown {
        #[arg(long)]
        package: String,

        #[arg(long)]
        id: String,
    },
    /// Record the user's decision on a suggestion.
    Decision {
        #[arg(long)]
        package: String,

        #[arg(long)]
        id: String,

        /// One of: opened, snoozed_later, disabled_this_session, dismissed_only.
        #[arg(long)]
        decision: String,
    },
}

#[derive(Debug, Args)]
pub struct StatusArgs {
    /// Only show this package.
    #[arg(long)]
    pub package: Option<String>,

    /// Evaluate at this epoch-millisecond timestamp instead of now.
    #[arg(long)]
    pub at: Option<i64>,

    /// Output as JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct EventsArgs {
    /// How many hours back to list.
    #[arg(long, default_value_t = 24)]
    pub hours: i64,

    /// Output as JSON lines.
    #[arg(long)]
    pub json: bool,

    /// Keep running and print new events as they are appended.
    #[arg(long)]
    pub follow: bool,
}

#[derive(Debug, Args)]
pub struct SessionsArgs {
    /// Only show sessions of this package.
    #[arg(long)]
    pub package: Option<String>,

    /// How many hours back to list.
    #[arg(long, default_value_t = 24)]
    pub hours: i64,

    /// Evaluate at this epoch-millisecond timestamp instead of now.
    #[arg(long)]
    pub at: Option<i64>,
}

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Shell command printing the foreground package name (empty for none).
    #[arg(long)]
    pub command: String,

    /// Override the configured poll interval.
    #[arg(long)]
    pub poll_interval_ms: Option<u64>,
}
