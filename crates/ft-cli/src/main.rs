use std::io;
use std::path::Path;

use anyhow::{Context as _, Result};
use clap::{CommandFactory, Parser};
use tracing_subscriber::EnvFilter;

use ft_cli::commands::{Context, events, record, reset, sessions, status, targets, watch};
use ft_cli::{Cli, Commands, Config, RecordEvent, TargetsAction};

/// Load config and open the timeline database.
fn open_context(config_path: Option<&Path>) -> Result<Context> {
    let config = Config::load_from(config_path).context("failed to load configuration")?;
    tracing::debug!(?config, "loaded configuration");
    Context::open(config)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // --verbose overrides RUST_LOG
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
    };
    // Logs go to stderr; stdout carries command output.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    let Some(command) = &cli.command else {
        Cli::command().print_help()?;
        println!();
        return Ok(());
    };

    let context = open_context(cli.config.as_deref())?;
    let mut stdout = io::stdout();
    match command {
        Commands::Targets(TargetsAction::Set { packages }) => {
            targets::set(&mut stdout, &context, packages)?;
        }
        Commands::Targets(TargetsAction::Show) => targets::show(&mut stdout, &context)?,
        Commands::Record(RecordEvent::Foreground { package }) => {
            record::foreground(&mut stdout, &context, package.as_deref())?;
        }
        Commands::Record(RecordEvent::Shown { package, id }) => {
            record::shown(&mut stdout, &context, package, id)?;
        }
        Commands::Record(RecordEvent::Decision {
            package,
            id,
            decision,
        }) => record::decision(&mut stdout, &context, package, id, decision)?,
        Commands::Status(args) => status::run(
            &mut stdout,
            &context,
            args.package.as_deref(),
            args.at,
            args.json,
        )?,
        Commands::Events(args) => {
            if args.follow {
                events::follow(&mut stdout, &context, args.hours, args.json)?;
            } else {
                events::run(&mut stdout, &context, args.hours, args.json)?;
            }
        }
        Commands::Sessions(args) => sessions::run(
            &mut stdout,
            &context,
            args.package.as_deref(),
            args.hours,
            args.at,
        )?,
        Commands::Watch(args) => watch::run(&context, args)?,
        Commands::Reset { yes } => reset::run(&mut stdout, &context, *yes)?,
    }

    Ok(())
}
