//! Conference Controller configuration.
//!
//! Configuration is loaded from environment variables with `CC_` prefixes.
//! Unparseable numeric values fall back to their defaults; inconsistent
//! composing refresh bounds are rejected.

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Default delay before the first keepalive probe on a leg.
pub const DEFAULT_KEEPALIVE_TICK_SECONDS: u64 = 30;

/// Default window for a keepalive probe to be acknowledged.
pub const DEFAULT_KEEPALIVE_PROBE_WINDOW_SECONDS: u64 = 35;

/// Default grace period between a dialog hangup and its forced release.
pub const DEFAULT_DIALOG_GRACE_PERIOD_MS: u64 = 2000;

/// Maximum (and default) conference subscription lifetime.
pub const DEFAULT_SUBSCRIPTION_MAX_EXPIRY_SECONDS: u32 = 3600;

/// Composing refresh used when the peer sends none (or zero).
pub const DEFAULT_COMPOSING_REFRESH_SECONDS: u64 = 120;

/// Lower clamp for composing refresh periods.
pub const DEFAULT_COMPOSING_MIN_REFRESH_SECONDS: u64 = 60;

/// Upper clamp for composing refresh periods.
pub const DEFAULT_COMPOSING_MAX_REFRESH_SECONDS: u64 = 3600;

/// Subject given to every new room.
pub const DEFAULT_ROOM_SUBJECT: &str = "MSRP chat";

/// Default graceful shutdown timeout.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECONDS: u64 = 30;

/// Default instance ID prefix.
pub const DEFAULT_INSTANCE_ID_PREFIX: &str = "cc";

/// Prompts sent to every participant once their call is answered.
pub const DEFAULT_WELCOME_PROMPTS: [&str; 2] = [
    "Welcome to this simple chat server...",
    "don't forget to set your own nickname.",
];

/// Conference Controller configuration.
#[derive(Clone)]
pub struct Config {
    /// Unique identifier for this controller instance.
    pub instance_id: String,

    /// Delay before the first keepalive probe (default: 30).
    pub keepalive_tick_seconds: u64,

    /// Time allowed for a probe to be acknowledged (default: 35).
    pub keepalive_probe_window_seconds: u64,

    /// Grace period before a hung-up dialog is force-released (default: 2000).
    pub dialog_grace_period_ms: u64,

    /// Cap on subscription expiry; also used when none is requested (default: 3600).
    pub subscription_max_expiry_seconds: u32,

    /// Composing refresh when unspecified or zero (default: 120).
    pub composing_default_refresh_seconds: u64,

    /// Composing refresh lower clamp (default: 60).
    pub composing_min_refresh_seconds: u64,

    /// Composing refresh upper clamp (default: 3600).
    pub composing_max_refresh_seconds: u64,

    /// Subject assigned to new rooms (default: "MSRP chat").
    pub room_subject: String,

    /// Base directory for recording sinks. Names are used as-is when unset.
    pub recording_dir: Option<PathBuf>,

    /// Lines sent to a participant after the call is answered.
    pub welcome_prompts: Vec<String>,

    /// Time to wait for focus actors during shutdown (default: 30).
    pub shutdown_timeout_seconds: u64,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("instance_id", &self.instance_id)
            .field("keepalive_tick_seconds", &self.keepalive_tick_seconds)
            .field(
                "keepalive_probe_window_seconds",
                &self.keepalive_probe_window_seconds,
            )
            .field("dialog_grace_period_ms", &self.dialog_grace_period_ms)
            .field(
                "subscription_max_expiry_seconds",
                &self.subscription_max_expiry_seconds,
            )
            .field(
                "composing_refresh_seconds",
                &format_args!(
                    "{} [{}..{}]",
                    self.composing_default_refresh_seconds,
                    self.composing_min_refresh_seconds,
                    self.composing_max_refresh_seconds
                ),
            )
            .field("room_subject", &self.room_subject)
            .field("recording_dir", &self.recording_dir)
            .field("welcome_prompts", &self.welcome_prompts.len())
            .field("shutdown_timeout_seconds", &self.shutdown_timeout_seconds)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Default for Config {
    fn default() -> Self {
        Self {
            instance_id: format!("{DEFAULT_INSTANCE_ID_PREFIX}-local"),
            keepalive_tick_seconds: DEFAULT_KEEPALIVE_TICK_SECONDS,
            keepalive_probe_window_seconds: DEFAULT_KEEPALIVE_PROBE_WINDOW_SECONDS,
            dialog_grace_period_ms: DEFAULT_DIALOG_GRACE_PERIOD_MS,
            subscription_max_expiry_seconds: DEFAULT_SUBSCRIPTION_MAX_EXPIRY_SECONDS,
            composing_default_refresh_seconds: DEFAULT_COMPOSING_REFRESH_SECONDS,
            composing_min_refresh_seconds: DEFAULT_COMPOSING_MIN_REFRESH_SECONDS,
            composing_max_refresh_seconds: DEFAULT_COMPOSING_MAX_REFRESH_SECONDS,
            room_subject: DEFAULT_ROOM_SUBJECT.to_string(),
            recording_dir: None,
            welcome_prompts: DEFAULT_WELCOME_PROMPTS
                .iter()
                .map(ToString::to_string)
                .collect(),
            shutdown_timeout_seconds: DEFAULT_SHUTDOWN_TIMEOUT_SECONDS,
        }
    }
}

fn parse_or<T: std::str::FromStr>(vars: &HashMap<String, String>, key: &str, default: T) -> T {
    vars.get(key)
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let instance_id = vars.get("CC_INSTANCE_ID").cloned().unwrap_or_else(|| {
            let uuid_suffix = uuid::Uuid::new_v4().to_string();
            let short_suffix = uuid_suffix.get(..8).unwrap_or("00000000");
            format!("{DEFAULT_INSTANCE_ID_PREFIX}-{short_suffix}")
        });

        let keepalive_tick_seconds = parse_or(
            vars,
            "CC_KEEPALIVE_TICK_SECONDS",
            DEFAULT_KEEPALIVE_TICK_SECONDS,
        );
        let keepalive_probe_window_seconds = parse_or(
            vars,
            "CC_KEEPALIVE_PROBE_WINDOW_SECONDS",
            DEFAULT_KEEPALIVE_PROBE_WINDOW_SECONDS,
        );
        let dialog_grace_period_ms = parse_or(
            vars,
            "CC_DIALOG_GRACE_PERIOD_MS",
            DEFAULT_DIALOG_GRACE_PERIOD_MS,
        );
        let subscription_max_expiry_seconds = parse_or(
            vars,
            "CC_SUBSCRIPTION_MAX_EXPIRY_SECONDS",
            DEFAULT_SUBSCRIPTION_MAX_EXPIRY_SECONDS,
        );
        let composing_default_refresh_seconds = parse_or(
            vars,
            "CC_COMPOSING_DEFAULT_REFRESH_SECONDS",
            DEFAULT_COMPOSING_REFRESH_SECONDS,
        );
        let composing_min_refresh_seconds = parse_or(
            vars,
            "CC_COMPOSING_MIN_REFRESH_SECONDS",
            DEFAULT_COMPOSING_MIN_REFRESH_SECONDS,
        );
        let composing_max_refresh_seconds = parse_or(
            vars,
            "CC_COMPOSING_MAX_REFRESH_SECONDS",
            DEFAULT_COMPOSING_MAX_REFRESH_SECONDS,
        );

        if composing_min_refresh_seconds == 0
            || composing_min_refresh_seconds > composing_max_refresh_seconds
        {
            return Err(ConfigError::InvalidValue(format!(
                "composing refresh bounds must satisfy 0 < min <= max (got {composing_min_refresh_seconds}..{composing_max_refresh_seconds})"
            )));
        }
        if !(composing_min_refresh_seconds..=composing_max_refresh_seconds)
            .contains(&composing_default_refresh_seconds)
        {
            return Err(ConfigError::InvalidValue(format!(
                "composing default refresh {composing_default_refresh_seconds} outside {composing_min_refresh_seconds}..{composing_max_refresh_seconds}"
            )));
        }

        let room_subject = vars
            .get("CC_ROOM_SUBJECT")
            .cloned()
            .unwrap_or_else(|| DEFAULT_ROOM_SUBJECT.to_string());

        let recording_dir = vars
            .get("CC_RECORDING_DIR")
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from);

        let shutdown_timeout_seconds = parse_or(
            vars,
            "CC_SHUTDOWN_TIMEOUT_SECONDS",
            DEFAULT_SHUTDOWN_TIMEOUT_SECONDS,
        );

        Ok(Config {
            instance_id,
            keepalive_tick_seconds,
            keepalive_probe_window_seconds,
            dialog_grace_period_ms,
            subscription_max_expiry_seconds,
            composing_default_refresh_seconds,
            composing_min_refresh_seconds,
            composing_max_refresh_seconds,
            room_subject,
            recording_dir,
            welcome_prompts: DEFAULT_WELCOME_PROMPTS
                .iter()
                .map(ToString::to_string)
                .collect(),
            shutdown_timeout_seconds,
        })
    }

    #[must_use]
    pub fn keepalive_tick(&self) -> Duration {
        Duration::from_secs(self.keepalive_tick_seconds)
    }

    #[must_use]
    pub fn keepalive_probe_window(&self) -> Duration {
        Duration::from_secs(self.keepalive_probe_window_seconds)
    }

    #[must_use]
    pub fn dialog_grace_period(&self) -> Duration {
        Duration::from_millis(self.dialog_grace_period_ms)
    }

    #[must_use]
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_seconds)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_from_vars_defaults() {
        let config = Config::from_vars(&HashMap::new()).expect("defaults should load");

        assert!(config.instance_id.starts_with("cc-"));
        assert_eq!(config.keepalive_tick(), Duration::from_secs(30));
        assert_eq!(config.keepalive_probe_window(), Duration::from_secs(35));
        assert_eq!(config.dialog_grace_period(), Duration::from_secs(2));
        assert_eq!(config.subscription_max_expiry_seconds, 3600);
        assert_eq!(config.composing_default_refresh_seconds, 120);
        assert_eq!(config.composing_min_refresh_seconds, 60);
        assert_eq!(config.composing_max_refresh_seconds, 3600);
        assert_eq!(config.room_subject, "MSRP chat");
        assert!(config.recording_dir.is_none());
        assert_eq!(config.welcome_prompts.len(), 2);
    }

    #[test]
    fn test_from_vars_overrides() {
        let vars = HashMap::from([
            ("CC_INSTANCE_ID".to_string(), "cc-test-1".to_string()),
            ("CC_KEEPALIVE_TICK_SECONDS".to_string(), "5".to_string()),
            ("CC_DIALOG_GRACE_PERIOD_MS".to_string(), "250".to_string()),
            ("CC_ROOM_SUBJECT".to_string(), "Standup".to_string()),
            ("CC_RECORDING_DIR".to_string(), "/tmp/chat".to_string()),
        ]);

        let config = Config::from_vars(&vars).unwrap();

        assert_eq!(config.instance_id, "cc-test-1");
        assert_eq!(config.keepalive_tick(), Duration::from_secs(5));
        assert_eq!(config.dialog_grace_period(), Duration::from_millis(250));
        assert_eq!(config.room_subject, "Standup");
        assert_eq!(config.recording_dir, Some(PathBuf::from("/tmp/chat")));
    }

    #[test]
    fn test_from_vars_invalid_number_uses_default() {
        let vars = HashMap::from([(
            "CC_KEEPALIVE_PROBE_WINDOW_SECONDS".to_string(),
            "soon".to_string(),
        )]);

        let config = Config::from_vars(&vars).unwrap();
        assert_eq!(
            config.keepalive_probe_window_seconds,
            DEFAULT_KEEPALIVE_PROBE_WINDOW_SECONDS
        );
    }

    #[test]
    fn test_from_vars_rejects_inverted_composing_bounds() {
        let vars = HashMap::from([
            ("CC_COMPOSING_MIN_REFRESH_SECONDS".to_string(), "600".to_string()),
            ("CC_COMPOSING_MAX_REFRESH_SECONDS".to_string(), "60".to_string()),
        ]);

        let result = Config::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::InvalidValue(_))));
    }

    #[test]
    fn test_from_vars_rejects_default_outside_bounds() {
        let vars = HashMap::from([(
            "CC_COMPOSING_DEFAULT_REFRESH_SECONDS".to_string(),
            "10".to_string(),
        )]);

        let result = Config::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::InvalidValue(_))));
    }

    #[test]
    fn test_debug_summarizes_prompts() {
        let config = Config::default();
        let debug = format!("{config:?}");
        assert!(debug.contains("welcome_prompts: 2"));
        assert!(debug.contains("120 [60..3600]"));
    }
}
