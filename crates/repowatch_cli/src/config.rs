//! Configuration file support for repowatch.
//!
//! Configuration is loaded with the following precedence (highest to lowest):
//! 1. CLI flags
//! 2. Environment variables (prefixed with `REPOWATCH_`, e.g., `REPOWATCH_DATABASE__URL`)
//! 3. Config file (./repowatch.toml, then ~/.config/repowatch/config.toml)
//! 4. Built-in defaults
//!
//! `START_DATE` and `END_DATE` are also read when `sync.start_date` and
//! `sync.end_date` are unset.
//!
//! Example config file:
//! ```toml
//! [database]
//! url = "postgres://localhost/repowatch"
//!
//! [github]
//! owner = "octocat"
//! token = "ghp_..."  # or use REPOWATCH_GITHUB__TOKEN env var
//!
//! [sync]
//! page_size = 100
//! call_timeout_secs = 10
//! repos_cursor = "page_number"
//! commits_cursor = "watermark"
//! start_date = "2024-01-01T00:00:00Z"
//!
//! [schedule]
//! repos_interval_secs = 86400
//! commits_interval_secs = 3600
//! commits_initial_delay_secs = 60
//!
//! [publisher]
//! backend = "kafka"
//! brokers = "localhost:9092"
//! ```

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use directories::ProjectDirs;
use repowatch::source::CursorDiscipline;
use repowatch::sync::{
    DEFAULT_CALL_TIMEOUT, DEFAULT_COMMITS_INITIAL_DELAY, DEFAULT_COMMITS_INTERVAL,
    DEFAULT_PAGE_SIZE, DEFAULT_REPOS_INTERVAL, ScheduleConfig, WalkConfig,
};
use serde::Deserialize;

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub github: GitHubConfig,
    pub sync: SyncConfig,
    pub schedule: ScheduleSettings,
    pub publisher: PublisherConfig,
}

/// Database configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database connection URL.
    /// Supports sqlite:// and postgres:// schemes.
    /// Defaults to `sqlite://~/.local/state/repowatch/repowatch.db` if not specified.
    pub url: Option<String>,
}

/// GitHub configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct GitHubConfig {
    /// Account whose repositories are watched.
    pub owner: Option<String>,
    /// GitHub API token.
    /// Can also be set via REPOWATCH_GITHUB__TOKEN environment variable.
    pub token: Option<String>,
    /// API root, for GitHub Enterprise.
    pub api_url: Option<String>,
}

/// Walk options.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Records requested per page.
    pub page_size: u32,
    /// Timeout for each upstream, store or publish call.
    pub call_timeout_secs: u64,
    /// Cursor discipline for the repository listing.
    pub repos_cursor: CursorDiscipline,
    /// Cursor discipline for commit listings.
    pub commits_cursor: CursorDiscipline,
    /// Lower bound for commit listings (RFC 3339).
    pub start_date: Option<String>,
    /// Upper bound for commit listings (RFC 3339).
    pub end_date: Option<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            call_timeout_secs: DEFAULT_CALL_TIMEOUT.as_secs(),
            repos_cursor: CursorDiscipline::PageNumber,
            commits_cursor: CursorDiscipline::PageNumber,
            start_date: None,
            end_date: None,
        }
    }
}

/// Scheduler intervals.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ScheduleSettings {
    pub repos_interval_secs: u64,
    pub commits_interval_secs: u64,
    pub commits_initial_delay_secs: u64,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            repos_interval_secs: DEFAULT_REPOS_INTERVAL.as_secs(),
            commits_interval_secs: DEFAULT_COMMITS_INTERVAL.as_secs(),
            commits_initial_delay_secs: DEFAULT_COMMITS_INITIAL_DELAY.as_secs(),
        }
    }
}

/// Where published envelopes go.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PublisherBackend {
    /// In-process channel to an ingest task writing the same database.
    #[default]
    Local,
    /// Kafka topics, consumed by `repowatch consume`.
    Kafka,
}

/// Publisher configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PublisherConfig {
    pub backend: PublisherBackend,
    pub brokers: String,
    pub message_timeout_ms: u64,
    pub group_id: String,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            backend: PublisherBackend::Local,
            brokers: "localhost:9092".to_string(),
            message_timeout_ms: 10_000,
            group_id: "repowatch-ingest".to_string(),
        }
    }
}

/// Parse an optional RFC 3339 date setting.
fn parse_date(name: &str, value: Option<&str>) -> Result<Option<DateTime<Utc>>, String> {
    value
        .filter(|v| !v.trim().is_empty())
        .map(|v| {
            DateTime::parse_from_rfc3339(v.trim())
                .map(|d| d.with_timezone(&Utc))
                .map_err(|e| format!("Invalid {} '{}': {} (expected RFC 3339)", name, v, e))
        })
        .transpose()
}

impl Config {
    /// Load configuration using the config crate's layered approach.
    ///
    /// Sources are loaded in order (later sources override earlier):
    /// 1. Built-in defaults
    /// 2. XDG config file (~/.config/repowatch/config.toml)
    /// 3. Local config file (./repowatch.toml)
    /// 4. Environment variables with REPOWATCH_ prefix
    /// 5. Legacy START_DATE / END_DATE, only where still unset
    pub fn load() -> Self {
        let mut builder = ConfigBuilder::builder();

        if let Some(proj_dirs) = ProjectDirs::from("", "", "repowatch") {
            let xdg_config = proj_dirs.config_dir().join("config.toml");
            if xdg_config.exists() {
                tracing::debug!("Loading config from {:?}", xdg_config);
                builder = builder.add_source(
                    File::from(xdg_config)
                        .format(FileFormat::Toml)
                        .required(false),
                );
            }
        }

        let local_config = PathBuf::from("repowatch.toml");
        if local_config.exists() {
            tracing::debug!("Loading config from ./repowatch.toml");
            builder = builder.add_source(
                File::from(local_config)
                    .format(FileFormat::Toml)
                    .required(false),
            );
        }

        // e.g., REPOWATCH_DATABASE__URL -> database.url, REPOWATCH_SYNC__PAGE_SIZE -> sync.page_size
        builder = builder.add_source(
            Environment::with_prefix("REPOWATCH")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let mut config = match builder.build() {
            Ok(settings) => match settings.try_deserialize::<Config>() {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!("Failed to deserialize config: {}", e);
                    Config::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to build config: {}", e);
                Config::default()
            }
        };

        config.apply_legacy_dates(
            std::env::var("START_DATE").ok(),
            std::env::var("END_DATE").ok(),
        );
        config
    }

    fn apply_legacy_dates(&mut self, start: Option<String>, end: Option<String>) {
        if self.sync.start_date.is_none() {
            self.sync.start_date = start;
        }
        if self.sync.end_date.is_none() {
            self.sync.end_date = end;
        }
    }

    /// Get the database URL, falling back to the default state directory path.
    ///
    /// The `mode=rwc` parameter creates the SQLite file if it doesn't exist.
    pub fn database_url(&self) -> Option<String> {
        self.database.url.clone().or_else(|| {
            Self::default_state_dir().map(|state_dir| {
                let db_path = state_dir.join("repowatch.db");
                format!("sqlite://{}?mode=rwc", db_path.display())
            })
        })
    }

    /// Validated commit date bounds.
    pub fn date_bounds(&self) -> Result<(Option<DateTime<Utc>>, Option<DateTime<Utc>>), String> {
        let since = parse_date("start_date", self.sync.start_date.as_deref())?;
        let until = parse_date("end_date", self.sync.end_date.as_deref())?;
        if let (Some(since), Some(until)) = (since, until)
            && since > until
        {
            return Err(format!(
                "start_date {} is after end_date {}",
                since.to_rfc3339(),
                until.to_rfc3339()
            ));
        }
        Ok((since, until))
    }

    fn walk_config(&self, discipline: CursorDiscipline) -> WalkConfig {
        WalkConfig::default()
            .with_page_size(self.sync.page_size)
            .with_discipline(discipline)
            .with_call_timeout(Duration::from_secs(self.sync.call_timeout_secs.max(1)))
    }

    pub fn repos_walk_config(&self) -> WalkConfig {
        self.walk_config(self.sync.repos_cursor)
    }

    pub fn commits_walk_config(&self) -> WalkConfig {
        self.walk_config(self.sync.commits_cursor)
    }

    pub fn repos_schedule(&self) -> ScheduleConfig {
        ScheduleConfig {
            interval: Duration::from_secs(self.schedule.repos_interval_secs.max(1)),
            initial_delay: Duration::ZERO,
        }
    }

    pub fn commits_schedule(&self) -> ScheduleConfig {
        ScheduleConfig {
            interval: Duration::from_secs(self.schedule.commits_interval_secs.max(1)),
            initial_delay: Duration::from_secs(self.schedule.commits_initial_delay_secs),
        }
    }

    /// Get the default state directory path.
    ///
    /// On Linux, this is `$XDG_STATE_HOME/repowatch` or `~/.local/state/repowatch`.
    /// On macOS/Windows, falls back to the data directory.
    pub fn default_state_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "repowatch").map(|dirs| {
            dirs.state_dir()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| dirs.data_dir().to_path_buf())
        })
    }
}
