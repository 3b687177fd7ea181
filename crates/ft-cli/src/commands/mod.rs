//! CLI subcommand implementations.

use std::sync::Arc;

use anyhow::{Context as _, Result};
use ft_core::{Clock, SystemClock, TimelineStore};
use ft_db::Database;

use crate::Config;

pub mod events;
pub mod record;
pub mod reset;
pub mod sessions;
pub mod status;
pub mod targets;
pub mod util;
pub mod watch;

/// Everything a command needs: configuration, the timeline and a clock.
#[derive(Clone)]
pub struct Context {
    pub config: Config,
    pub store: Arc<dyn TimelineStore>,
    pub clock: Arc<dyn Clock>,
}

impl Context {
    /// Opens the configured database, creating its directory if needed.
    pub fn open(config: Config) -> Result<Self> {
        if let Some(parent) = config.database_path.parent() {
            std::fs::create_dir_all(parent).context("failed to create database directory")?;
        }
        let db = Database::open(&config.database_path)
            .with_context(|| format!("failed to open {}", config.database_path.display()))?;
        Ok(Self {
            config,
            store: Arc::new(db),
            clock: Arc::new(SystemClock::new()),
        })
    }

    pub fn now_ms(&self) -> i64 {
        self.clock.wall_millis()
    }

    pub const fn lookback_ms(&self) -> i64 {
        util::hours_to_ms(self.config.lookback_hours)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use ft_core::{ManualClock, TimelineEvent, TimelineStore};
    use ft_db::Database;

    use super::Context;
    use crate::Config;

    /// A context over an in-memory database and a hand-driven clock.
    pub fn context(wall_ms: i64) -> (Context, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(wall_ms, 0));
        let context = Context {
            config: Config::default(),
            store: Arc::new(Database::open_in_memory().unwrap()),
            clock: clock.clone(),
        };
        (context, clock)
    }

    pub fn append(context: &Context, timestamp_ms: i64, event: &TimelineEvent) {
        context.store.append(timestamp_ms, event).unwrap();
    }
}
