use std::path::PathBuf;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::ConfigError;
use crate::notification::{Importance, NotificationChannel, Visibility};

#[derive(Clone, Debug)]
pub struct AlarmConfig {
    pub prefs_namespace: String,
    pub prefs_path: Option<PathBuf>,
    pub asset_root: Option<PathBuf>,
    pub action_prefix: String,
    pub wake_lock_tag: String,
    pub wake_timeout: Duration,
    pub release_delay: Duration,
    pub stale_fallback: Duration,
    pub cancel_all_bound: i32,
    pub channel_id: String,
    pub channel_name: String,
    pub channel_description: String,
    pub vibration_pattern: Vec<u64>,
}

impl AlarmConfig {
    /// Reads the `SHABBOS_*` variables, rejecting the first unusable value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::try_from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`AlarmConfig::from_env`], but unusable values are logged and
    /// their defaults kept.
    pub fn from_env_lenient() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn try_from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let (config, mut rejected) = Self::build(&lookup);
        let first = rejected.drain(..).next();
        match first {
            Some(err) => Err(err),
            None => Ok(config),
        }
    }

    /// Builds a config from an arbitrary variable source. Unparseable values
    /// are ignored and the default kept.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let (config, rejected) = Self::build(&lookup);
        for err in rejected {
            warn!(%err, "ignoring invalid configuration value");
        }
        config
    }

    fn build(lookup: &impl Fn(&str) -> Option<String>) -> (Self, Vec<ConfigError>) {
        let mut config = Self::default();
        let mut rejected = Vec::new();
        let mut positive = |key: &'static str| match parse_positive(lookup, key) {
            Ok(value) => value,
            Err(err) => {
                rejected.push(err);
                None
            }
        };

        let wake_timeout = positive("SHABBOS_WAKE_TIMEOUT_SECS");
        let release_delay = positive("SHABBOS_RELEASE_DELAY_SECS");
        let stale_fallback = positive("SHABBOS_STALE_FALLBACK_SECS");
        let cancel_all_bound = positive("SHABBOS_CANCEL_ALL_BOUND");

        if let Some(namespace) = lookup("SHABBOS_PREFS_NAMESPACE") {
            config.prefs_namespace = namespace;
        }
        if let Some(path) = lookup("SHABBOS_PREFS_PATH") {
            debug!(path = %path, "using preference file");
            config.prefs_path = Some(PathBuf::from(path));
        }
        if let Some(root) = lookup("SHABBOS_ASSET_ROOT") {
            config.asset_root = Some(PathBuf::from(root));
        }
        if let Some(secs) = wake_timeout {
            config.wake_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = release_delay {
            config.release_delay = Duration::from_secs(secs);
        }
        if let Some(secs) = stale_fallback {
            config.stale_fallback = Duration::from_secs(secs);
        }
        if let Some(bound) = cancel_all_bound {
            match i32::try_from(bound) {
                Ok(bound) => config.cancel_all_bound = bound,
                Err(_) => rejected.push(ConfigError::OutOfRange {
                    key: "SHABBOS_CANCEL_ALL_BOUND",
                    value: bound,
                }),
            }
        }
        if config.release_delay > config.wake_timeout {
            warn!(
                release_delay = ?config.release_delay,
                wake_timeout = ?config.wake_timeout,
                "release delay exceeds wake timeout; the timeout will release first"
            );
        }
        (config, rejected)
    }

    pub fn alert_channel(&self) -> NotificationChannel {
        NotificationChannel {
            id: self.channel_id.clone(),
            name: self.channel_name.clone(),
            description: self.channel_description.clone(),
            importance: Importance::High,
            vibration: true,
            lights: true,
            show_badge: true,
            sound: false,
            lockscreen_visibility: Visibility::Public,
            bypass_dnd: true,
        }
    }

    pub fn alarm_action(&self, id: i32) -> String {
        format!("{}{}", self.action_prefix, id)
    }
}

impl Default for AlarmConfig {
    fn default() -> Self {
        Self {
            prefs_namespace: "flutter.".to_string(),
            prefs_path: None,
            asset_root: None,
            action_prefix: "com.shabbos.shabbos_app.ALARM_".to_string(),
            wake_lock_tag: "ShabbosApp::AlarmWakeLock".to_string(),
            wake_timeout: Duration::from_secs(120),
            release_delay: Duration::from_secs(60),
            stale_fallback: Duration::from_secs(5),
            cancel_all_bound: 100,
            channel_id: "shabbos_alerts".to_string(),
            channel_name: "Shabbos Alerts".to_string(),
            channel_description: "Candle lighting time reminders".to_string(),
            vibration_pattern: vec![0, 500, 250, 500],
        }
    }
}

fn parse_positive(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<u64>, ConfigError> {
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    match raw.trim().parse::<u64>() {
        Ok(value) if value > 0 => Ok(Some(value)),
        _ => Err(ConfigError::Invalid { key, value: raw }),
    }
}
