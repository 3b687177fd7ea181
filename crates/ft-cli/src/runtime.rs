//! Async polling runtime behind `ft watch`.
//!
//! Two producer tasks feed one consumer through a bounded channel:
//!
//! - the sampler polls a [`ForegroundSource`] on a fixed interval and sends
//!   numbered foreground samples
//! - the control task reads line commands (`pause`, `resume`, `decide <kind>`,
//!   `targets <pkg>...`, `quit`)
//!
//! The consumer owns the [`SessionMonitor`] and applies messages one at a
//! time, so the tracker never sees concurrent calls. A [`Shutdown`] signal
//! stops every task; commands already queued are applied before the consumer
//! exits.

use std::collections::BTreeSet;
use std::future::Future;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result, bail};
use ft_core::{
    ForegroundSample, MonitorCommand, MonitorError, PackageName, SessionMonitor,
    SuggestionDecision,
};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;

/// Reports which app is in the foreground.
pub trait ForegroundSource: Send + 'static {
    /// The foreground package name, `None` when nothing is in front.
    fn sample(&mut self) -> impl Future<Output = Result<Option<String>>> + Send;
}

/// Runs a shell command and reads the package name from its first output line.
#[derive(Debug, Clone)]
pub struct ShellSource {
    command: String,
}

impl ShellSource {
    pub const fn new(command: String) -> Self {
        Self { command }
    }
}

impl ForegroundSource for ShellSource {
    async fn sample(&mut self) -> Result<Option<String>> {
        let output = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("failed to run {:?}", self.command))?;
        if !output.status.success() {
            bail!("foreground command exited with {}", output.status);
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        let package = stdout.lines().next().map(str::trim).unwrap_or_default();
        Ok((!package.is_empty()).then(|| package.to_string()))
    }
}

/// A line read by the control task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlInput {
    Command(MonitorCommand),
    Quit,
}

/// Parses one control line. Blank lines yield `None`.
pub fn parse_control(line: &str) -> Result<Option<ControlInput>> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(None);
    };
    let input = match verb {
        "pause" => ControlInput::Command(MonitorCommand::Pause),
        "resume" => ControlInput::Command(MonitorCommand::Resume),
        "decide" => {
            let Some(kind) = words.next() else {
                bail!("usage: decide <opened|snoozed_later|disabled_this_session|dismissed_only>");
            };
            let decision: SuggestionDecision = kind
                .parse()
                .with_context(|| format!("invalid decision {kind:?}"))?;
            ControlInput::Command(MonitorCommand::Decide(decision))
        }
        "targets" => {
            let targets = words
                .map(|raw| {
                    PackageName::new(raw).with_context(|| format!("invalid package {raw:?}"))
                })
                .collect::<Result<BTreeSet<_>>>()?;
            ControlInput::Command(MonitorCommand::SetTargets(targets))
        }
        "quit" | "exit" => ControlInput::Quit,
        other => bail!("unknown command {other:?}"),
    };
    Ok(Some(input))
}

/// Stop signal shared by the runtime tasks. Clones observe the same signal.
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    /// Resolves once [`Shutdown::trigger`] has been called on any clone.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|stopped| *stopped).await;
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct WatchOptions {
    pub poll_interval: Duration,
    pub channel_capacity: usize,
}

/// Counters reported when the runtime stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchSummary {
    pub commands: usize,
    pub transitions: usize,
    pub append_failures: usize,
    pub errors: usize,
}

/// Runs the monitor until `shutdown` is triggered.
///
/// Transitions are written to `writer` as JSON lines.
pub async fn run<S, R, W>(
    mut monitor: SessionMonitor,
    source: S,
    control: R,
    writer: &mut W,
    shutdown: Shutdown,
    options: WatchOptions,
) -> Result<WatchSummary>
where
    S: ForegroundSource,
    R: AsyncBufRead + Unpin + Send + 'static,
    W: Write,
{
    monitor.start().context("failed to start session monitor")?;

    let (tx, mut rx) = mpsc::channel(options.channel_capacity.max(1));
    let sampler = tokio::spawn(sample_loop(
        source,
        tx.clone(),
        shutdown.clone(),
        options.poll_interval,
    ));
    let controller = tokio::spawn(control_loop(control, tx, shutdown.clone()));

    let mut ticker = tokio::time::interval(options.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut summary = WatchSummary::default();

    let result = loop {
        let command = tokio::select! {
            biased;
            command = rx.recv() => match command {
                Some(command) => command,
                None => break Ok(()),
            },
            () = shutdown.wait() => break Ok(()),
            _ = ticker.tick() => MonitorCommand::Tick,
        };
        if let Err(err) = apply(&mut monitor, command, writer, &mut summary) {
            break Err(err);
        }
    };

    shutdown.trigger();
    if let Err(err) = sampler.await {
        tracing::warn!(error = %err, "sampler task failed");
    }
    if let Err(err) = controller.await {
        tracing::warn!(error = %err, "control task failed");
    }
    monitor.stop();
    result.map(|()| summary)
}

/// Applies one command. Only writer failures are fatal.
fn apply<W: Write>(
    monitor: &mut SessionMonitor,
    command: MonitorCommand,
    writer: &mut W,
    summary: &mut WatchSummary,
) -> Result<()> {
    summary.commands += 1;
    match monitor.handle(command) {
        Ok(outcome) => {
            summary.transitions += outcome.transitions.len();
            summary.append_failures += outcome.append_failures;
            if outcome.append_failures > 0 {
                tracing::warn!(
                    failures = outcome.append_failures,
                    "timeline appends failed; live state kept"
                );
            }
            for transition in &outcome.transitions {
                writeln!(writer, "{}", serde_json::to_string(transition)?)?;
            }
            writer.flush()?;
        }
        Err(MonitorError::Bootstrap(err)) => {
            summary.errors += 1;
            tracing::error!(error = %err, "bootstrap failed; will retry on the next sample");
        }
        Err(err) => {
            summary.errors += 1;
            tracing::warn!(error = %err, "command rejected");
        }
    }
    Ok(())
}

async fn sample_loop<S: ForegroundSource>(
    mut source: S,
    tx: mpsc::Sender<MonitorCommand>,
    shutdown: Shutdown,
    poll_interval: Duration,
) {
    let mut interval = tokio::time::interval(poll_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut generation: u64 = 0;
    loop {
        tokio::select! {
            () = shutdown.wait() => break,
            _ = interval.tick() => {}
        }
        let sampled = tokio::select! {
            () = shutdown.wait() => break,
            sampled = source.sample() => sampled,
        };
        let package = match sampled {
            Ok(package) => package,
            Err(err) => {
                tracing::warn!(error = %err, "foreground sample failed");
                continue;
            }
        };
        generation += 1;
        let package_name = package.and_then(|raw| match PackageName::new(raw) {
            Ok(name) => Some(name),
            Err(err) => {
                tracing::debug!(error = %err, "ignoring unusable package name");
                None
            }
        });
        let sample = MonitorCommand::Sample(ForegroundSample {
            package_name,
            generation,
        });
        tokio::select! {
            () = shutdown.wait() => break,
            sent = tx.send(sample) => if sent.is_err() {
                break;
            },
        }
    }
    tracing::debug!(generation, "sampler stopped");
}

async fn control_loop<R>(control: R, tx: mpsc::Sender<MonitorCommand>, shutdown: Shutdown)
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    let mut lines = control.lines();
    loop {
        let line = tokio::select! {
            () = shutdown.wait() => break,
            line = lines.next_line() => line,
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(err) => {
                tracing::warn!(error = %err, "failed to read control input");
                break;
            }
        };
        match parse_control(&line) {
            Ok(None) => {}
            Ok(Some(ControlInput::Quit)) => {
                tracing::info!("quit requested");
                shutdown.trigger();
                break;
            }
            Ok(Some(ControlInput::Command(command))) => {
                if tx.send(command).await.is_err() {
                    break;
                }
            }
            Err(err) => tracing::warn!(error = %err, "ignoring control input"),
        }
    }
}
