//! Watch command: runs the live session monitor.
//!
//! Only one `ft watch` may write to a database at a time; an exclusive lock
//! file next to the database enforces it.

use std::fs::File;
use std::time::Duration;

use anyhow::{Context as _, Result};
use fs2::FileExt;
use ft_core::SessionMonitor;
use tokio::io::BufReader;

use super::Context;
use crate::cli::WatchArgs;
use crate::runtime::{self, ShellSource, Shutdown, WatchOptions};

const CHANNEL_CAPACITY: usize = 64;

pub fn run(context: &Context, args: &WatchArgs) -> Result<()> {
    let lock_path = context.config.lock_path();
    let lock_file = File::create(&lock_path)
        .with_context(|| format!("failed to create lock file {}", lock_path.display()))?;
    lock_file.try_lock_exclusive().with_context(|| {
        format!(
            "another ft watch holds {}; only one monitor may run per database",
            lock_path.display()
        )
    })?;

    let monitor = SessionMonitor::new(
        context.store.clone(),
        context.clock.clone(),
        context.config.session.clone(),
        context.config.lookback_hours,
    );
    let options = WatchOptions {
        poll_interval: args
            .poll_interval_ms
            .map_or_else(|| context.config.poll_interval(), Duration::from_millis),
        channel_capacity: CHANNEL_CAPACITY,
    };
    tracing::info!(command = %args.command, ?options, "starting watch");

    let shutdown = Shutdown::new();
    let rt = tokio::runtime::Runtime::new().context("failed to initialize tokio runtime")?;
    let result = rt.block_on(async {
        let interrupt = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupt received");
                interrupt.trigger();
            }
        });
        let mut stdout = std::io::stdout();
        runtime::run(
            monitor,
            ShellSource::new(args.command.clone()),
            BufReader::new(tokio::io::stdin()),
            &mut stdout,
            shutdown.clone(),
            options,
        )
        .await
    });
    // A pending stdin read would otherwise block shutdown.
    rt.shutdown_background();

    let summary = result?;
    tracing::info!(
        commands = summary.commands,
        transitions = summary.transitions,
        append_failures = summary.append_failures,
        errors = summary.errors,
        "watch finished"
    );
    lock_file.unlock().context("failed to release lock file")?;
    Ok(())
}
