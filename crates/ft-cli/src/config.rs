//! Layered `ft` configuration.
//!
//! Later layers win: built-in defaults, `<config_dir>/ft/config.toml`, the
//! file passed with `--config`, then `FT_*` environment variables with `__`
//! separating nested keys (`FT_SESSION__GRACE_PERIOD_MILLIS`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use ft_core::SessionSettings;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// SQLite timeline file.
    pub database_path: PathBuf,

    /// How often `ft watch` samples the foreground app.
    pub poll_interval_ms: u64,

    /// How far back bootstrap and listings read the timeline.
    pub lookback_hours: i64,

    pub session: SessionSettings,
}

impl Default for Config {
    fn default() -> Self {
        let database_path =
            data_dir().map_or_else(|| PathBuf::from("ft.db"), |dir| dir.join("ft.db"));
        Self {
            database_path,
            poll_interval_ms: 1_000,
            lookback_hours: 24,
            session: SessionSettings::default(),
        }
    }
}

impl Config {
    #[expect(
        clippy::result_large_err,
        reason = "figment::Error is large but only returned at startup"
    )]
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, figment::Error> {
        let files = config_dir()
            .map(|dir| dir.join("config.toml"))
            .into_iter()
            .chain(config_path.map(Path::to_path_buf));
        files
            .fold(
                Figment::from(Serialized::defaults(Self::default())),
                |figment, file| figment.merge(Toml::file(file)),
            )
            .merge(Env::prefixed("FT_").split("__"))
            .extract()
    }

    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Lock file guarding the database against a second `ft watch`.
    pub fn lock_path(&self) -> PathBuf {
        let mut name = self
            .database_path
            .file_name()
            .map(std::ffi::OsStr::to_os_string)
            .unwrap_or_default();
        name.push(".lock");
        self.database_path.with_file_name(name)
    }
}

fn config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("ft"))
}

/// `~/.local/share/ft` on Linux.
fn data_dir() -> Option<PathBuf> {
    dirs::data_dir().map(|p| p.join("ft"))
}
