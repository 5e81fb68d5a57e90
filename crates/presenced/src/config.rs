use std::path::PathBuf;
use std::time::Duration;

use presence_core::{LivenessPolicy, PolicyError, SessionConfig};

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Euclidean distance below which a descriptor matches an identity.
    pub match_threshold: f32,
    /// Interval between scan ticks, in milliseconds.
    pub tick_interval_ms: u64,
    /// Seconds an identity is suppressed after an accepted event.
    pub cooldown_secs: i64,
    /// Seconds the confirmation is shown before scanning resumes.
    pub confirmation_secs: i64,
    /// Optional TOML file overriding the liveness thresholds.
    pub policy_file: Option<PathBuf>,
}

impl Config {
    /// Load configuration from `PRESENCE_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("presence");

        let db_path = std::env::var("PRESENCE_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("attendance.db"));

        Self {
            db_path,
            match_threshold: env_f32("PRESENCE_MATCH_THRESHOLD", 0.5),
            tick_interval_ms: env_u64("PRESENCE_TICK_INTERVAL_MS", 1000),
            cooldown_secs: env_i64("PRESENCE_COOLDOWN_SECS", 5),
            confirmation_secs: env_i64("PRESENCE_CONFIRMATION_SECS", 3),
            policy_file: std::env::var("PRESENCE_POLICY_FILE").ok().map(PathBuf::from),
        }
    }

    /// Liveness thresholds: the policy file if one is configured, defaults otherwise.
    pub fn liveness_policy(&self) -> Result<LivenessPolicy, PolicyError> {
        match &self.policy_file {
            Some(path) => LivenessPolicy::load(path),
            None => Ok(LivenessPolicy::default()),
        }
    }

    /// Build the session tuning from this configuration.
    pub fn session_config(&self) -> Result<SessionConfig, PolicyError> {
        Ok(SessionConfig {
            tick_interval: Duration::from_millis(self.tick_interval_ms.max(1)),
            match_threshold: self.match_threshold,
            cooldown: chrono::Duration::seconds(self.cooldown_secs.max(0)),
            confirmation: chrono::Duration::seconds(self.confirmation_secs.max(0)),
            policy: self.liveness_policy()?,
        })
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_i64(key: &str, default: i64) -> i64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
