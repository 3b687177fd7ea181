//! Target set commands.

use std::collections::BTreeSet;
use std::io::Write;

use anyhow::Result;
use ft_core::{EventRecorder, PackageName, TimelineEvent, TimelineProjection};

use super::Context;
use super::util::{join_packages, parse_package};

/// Replaces the monitored package set. Records nothing if it is unchanged.
pub fn set<W: Write>(writer: &mut W, context: &Context, packages: &[String]) -> Result<()> {
    let target_packages = packages
        .iter()
        .map(|raw| parse_package(raw))
        .collect::<Result<BTreeSet<PackageName>>>()?;

    let projection = TimelineProjection::new(context.store.clone());
    let current = projection.target_packages_at(context.now_ms())?;
    if current == target_packages {
        writeln!(writer, "Targets unchanged: {}", join_packages(current.iter()))?;
        return Ok(());
    }

    let mut recorder = EventRecorder::new(context.store.clone(), context.clock.clone());
    let stored = recorder.record(TimelineEvent::TargetAppsChanged {
        target_packages: target_packages.clone(),
    })?;
    tracing::info!(id = %stored.id, count = target_packages.len(), "target set changed");
    writeln!(writer, "Targets: {}", join_packages(target_packages.iter()))?;
    Ok(())
}

/// Prints the current monitored package set.
pub fn show<W: Write>(writer: &mut W, context: &Context) -> Result<()> {
    let projection = TimelineProjection::new(context.store.clone());
    let targets = projection.target_packages_at(context.now_ms())?;
    if targets.is_empty() {
        writeln!(writer, "No target packages.")?;
        return Ok(());
    }
    for package in &targets {
        writeln!(writer, "{package}")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use insta::assert_snapshot;

    use crate::commands::testing;

    fn run_set(context: &Context, packages: &[&str]) -> String {
        let packages: Vec<String> = packages.iter().map(ToString::to_string).collect();
        let mut output = Vec::new();
        set(&mut output, context, &packages).unwrap();
        String::from_utf8(output).unwrap()
    }

    fn run_show(context: &Context) -> String {
        let mut output = Vec::new();
        show(&mut output, context).unwrap();
        String::from_utf8(output).unwrap()
    }

    #[test]
    fn set_then_show() {
        let (context, clock) = testing::context(1_000);
        assert_snapshot!(run_show(&context), @"No target packages.");

        assert_snapshot!(run_set(&context, &["com.b", "com.a"]), @"Targets: com.a, com.b");
        clock.advance(10);
        assert_snapshot!(run_show(&context), @r"
        com.a
        com.b
        ");
    }

    #[test]
    fn unchanged_set_records_nothing() {
        let (context, clock) = testing::context(1_000);
        run_set(&context, &["com.a"]);
        let version = context.store.version().unwrap();
        clock.advance(10);
        assert_snapshot!(run_set(&context, &["com.a"]), @"Targets unchanged: com.a");
        assert_eq!(context.store.version().unwrap(), version);
    }

    #[test]
    fn empty_set_clears_targets() {
        let (context, clock) = testing::context(1_000);
        run_set(&context, &["com.a"]);
        clock.advance(10);
        assert_snapshot!(run_set(&context, &[]), @"Targets: (none)");
    }

    #[test]
    fn rejects_blank_package() {
        let (context, _clock) = testing::context(1_000);
        let mut output = Vec::new();
        assert!(set(&mut output, &context, &["  ".to_string()]).is_err());
    }
}
