//! Status command: the reconstructed session state of each target.

use std::io::Write;

use anyhow::Result;
use ft_core::suggestion::evaluate;
use ft_core::{
    NoLiveSession, PackageName, SessionBootstrapFromTimeline, SessionBootstrapper,
    SuggestionInput, SuggestionVerdict, TimelineFacts, TimelineProjection,
};
use serde::Serialize;

use super::Context;
use super::util::{format_duration, format_timestamp, join_packages, parse_package};

/// Status of one package.
#[derive(Debug, Serialize)]
pub struct PackageStatus {
    pub package_name: PackageName,
    /// `None` when the package was never a target in the lookback window.
    pub session: Option<SessionBootstrapFromTimeline>,
    /// Suggestion gate outcome for a running, unpaused session.
    pub suggestion: Option<SuggestionVerdict>,
}

pub fn run<W: Write>(
    writer: &mut W,
    context: &Context,
    package: Option<&str>,
    at: Option<i64>,
    json: bool,
) -> Result<()> {
    let at_ms = at.unwrap_or_else(|| context.now_ms());
    let projection = TimelineProjection::new(context.store.clone());
    let facts = projection.facts_at(at_ms, context.lookback_ms())?;

    let packages: Vec<PackageName> = match package {
        Some(raw) => vec![parse_package(raw)?],
        None => facts
            .target_packages
            .clone()
            .unwrap_or_default()
            .into_iter()
            .collect(),
    };

    let bootstrapper =
        SessionBootstrapper::new(context.store.clone(), context.config.lookback_hours);
    let mut statuses = Vec::with_capacity(packages.len());
    for package_name in packages {
        let session = bootstrapper.compute_bootstrap_from_timeline(
            &package_name,
            &context.config.session,
            at_ms,
            true,
            &NoLiveSession,
        )?;
        let suggestion = session
            .as_ref()
            .and_then(|snapshot| verdict(context, &facts, &package_name, snapshot));
        statuses.push(PackageStatus {
            package_name,
            session,
            suggestion,
        });
    }

    if json {
        writeln!(writer, "{}", serde_json::to_string_pretty(&statuses)?)?;
        return Ok(());
    }

    writeln!(writer, "Focus tracker status at {}", format_timestamp(at_ms))?;
    writeln!(writer, "Database: {}", context.config.database_path.display())?;
    let targets = facts.target_packages.clone().unwrap_or_default();
    writeln!(writer, "Targets: {}", join_packages(targets.iter()))?;
    match facts.foreground_package() {
        Some(package) => writeln!(writer, "Foreground: {package}")?,
        None => writeln!(writer, "Foreground: none")?,
    }
    for status in &statuses {
        writeln!(writer, "{}", describe(status))?;
    }
    Ok(())
}

fn verdict(
    context: &Context,
    facts: &TimelineFacts,
    package: &PackageName,
    snapshot: &SessionBootstrapFromTimeline,
) -> Option<SuggestionVerdict> {
    if !snapshot.is_ongoing_session || snapshot.is_paused {
        return None;
    }
    let is_overlay_shown = facts
        .suggestions
        .get(package)
        .is_some_and(ft_core::projection::SuggestionFacts::is_pending);
    Some(evaluate(&SuggestionInput {
        elapsed_millis: snapshot.initial_elapsed_millis,
        since_foreground_millis: snapshot.since_foreground_millis,
        settings: &context.config.session,
        last_decision_elapsed_millis: snapshot.gate.last_decision_elapsed_millis,
        is_overlay_shown,
    }))
}

fn describe(status: &PackageStatus) -> String {
    let package = &status.package_name;
    let Some(session) = &status.session else {
        return format!("{package}: never monitored");
    };
    if !session.is_ongoing_session {
        return format!("{package}: no session");
    }
    let mut line = format!(
        "{package}: session {}, elapsed {}",
        session
            .session_id
            .as_ref()
            .map_or("(unmarked)", |id| id.as_str()),
        format_duration(session.initial_elapsed_millis)
    );
    if session.is_paused {
        line.push_str(" (paused)");
    }
    line.push_str(&format!(
        ", in foreground {}",
        format_duration(session.since_foreground_millis)
    ));
    match session.gate.last_decision_elapsed_millis {
        Some(decided) => line.push_str(&format!(", last decision at {}", format_duration(decided))),
        None => line.push_str(", no decision"),
    }
    if let Some(verdict) = status.suggestion {
        line.push_str(&format!(", suggestion: {}", verdict.as_str()));
    }
    line
}
