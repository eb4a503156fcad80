//! Configuration with layered precedence: built-in defaults, then a
//! discovered or explicit TOML file, then `RAIN_*` environment variables.
//! CLI flags are applied on top by the binary.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::RainError;
use crate::sections::resolve_sections;

pub const SYSTEM_CONFIG_PATH: &str = "/etc/rain/config.toml";

const MAX_PROCESS_CAP: usize = 1000;
const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub collector: CollectorConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub ui: UiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorConfig {
    /// Sections collected when the command line names none.
    #[serde(default = "default_sections")]
    pub default_sections: Vec<String>,

    /// Upper bound on process rows in the `processes` section.
    #[serde(default = "default_max_processes")]
    pub max_processes: usize,

    /// Budget for one section's whole probe chain.
    #[serde(default = "default_section_timeout_secs")]
    pub section_timeout_secs: u64,

    /// Budget for network-bound sources such as the public IP lookup.
    #[serde(default = "default_network_timeout_secs")]
    pub network_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_enabled")]
    pub enabled: bool,

    #[serde(default = "default_cache_duration_secs")]
    pub duration_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UiConfig {
    #[serde(default = "default_show_banner")]
    pub show_banner: bool,

    /// Delay between live-mode refreshes.
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: f64,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_sections() -> Vec<String> {
    vec!["system".into(), "hardware".into(), "network".into()]
}

fn default_max_processes() -> usize {
    25
}

fn default_section_timeout_secs() -> u64 {
    10
}

fn default_network_timeout_secs() -> u64 {
    5
}

fn default_cache_enabled() -> bool {
    true
}

fn default_cache_duration_secs() -> u64 {
    60
}

fn default_show_banner() -> bool {
    true
}

fn default_refresh_interval_secs() -> f64 {
    2.0
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            collector: CollectorConfig::default(),
            cache: CacheConfig::default(),
            ui: UiConfig::default(),
        }
    }
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            default_sections: default_sections(),
            max_processes: default_max_processes(),
            section_timeout_secs: default_section_timeout_secs(),
            network_timeout_secs: default_network_timeout_secs(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_cache_enabled(),
            duration_secs: default_cache_duration_secs(),
        }
    }
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            show_banner: default_show_banner(),
            refresh_interval_secs: default_refresh_interval_secs(),
        }
    }
}

impl Config {
    /// Load, apply environment overrides and validate.
    ///
    /// An explicit path that cannot be read or parsed is a hard
    /// `Configuration` error; discovered files fall back to defaults
    /// with a warning.
    pub fn load(explicit: Option<&Path>) -> Result<Self, RainError> {
        let mut config = match explicit {
            Some(path) => Self::load_from_path(path)?,
            None => Self::discover(),
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    fn discover() -> Self {
        for path in Self::discovery_paths() {
            if !path.exists() {
                continue;
            }
            match Self::load_from_path(&path) {
                Ok(config) => {
                    debug!(path = %path.display(), "loaded configuration");
                    return config;
                }
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "ignoring unreadable config file");
                }
            }
        }
        debug!("no config file found, using defaults");
        Self::default()
    }

    fn discovery_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if let Some(home) = std::env::var_os("HOME") {
            paths.push(PathBuf::from(home).join(".rain").join("config.toml"));
        }
        paths.push(PathBuf::from(SYSTEM_CONFIG_PATH));
        paths
    }

    fn load_from_path(path: &Path) -> Result<Self, RainError> {
        let raw = std::fs::read_to_string(path).map_err(|err| {
            RainError::Configuration(format!("cannot read {}: {err}", path.display()))
        })?;
        toml::from_str(&raw).map_err(|err| {
            RainError::Configuration(format!("invalid config {}: {err}", path.display()))
        })
    }

    /// Fold `RAIN_*` variables in. Malformed numeric values are rejected
    /// rather than ignored.
    pub fn apply_env(&mut self) -> Result<(), RainError> {
        if let Ok(level) = std::env::var("RAIN_LOG_LEVEL") {
            if !level.trim().is_empty() {
                self.log_level = level.trim().to_string();
            }
        }
        if let Some(secs) = env_u64("RAIN_CACHE_DURATION")? {
            self.cache.duration_secs = secs;
        }
        if let Some(secs) = env_u64("RAIN_NETWORK_TIMEOUT")? {
            self.collector.network_timeout_secs = secs;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), RainError> {
        if self.collector.max_processes == 0 {
            return Err(RainError::Configuration(
                "max_processes must be at least 1".into(),
            ));
        }
        if self.collector.max_processes > MAX_PROCESS_CAP {
            return Err(RainError::Configuration(format!(
                "max_processes must not exceed {MAX_PROCESS_CAP}"
            )));
        }
        if self.collector.section_timeout_secs == 0 {
            return Err(RainError::Configuration(
                "section_timeout_secs must be positive".into(),
            ));
        }
        if self.collector.network_timeout_secs == 0 {
            return Err(RainError::Configuration(
                "network_timeout_secs must be positive".into(),
            ));
        }
        if self.cache.duration_secs == 0 {
            return Err(RainError::Configuration(
                "cache duration_secs must be positive".into(),
            ));
        }
        if !self.ui.refresh_interval_secs.is_finite() || self.ui.refresh_interval_secs <= 0.0 {
            return Err(RainError::Configuration(
                "refresh_interval_secs must be a positive number".into(),
            ));
        }
        if !LOG_LEVELS.contains(&self.log_level.to_ascii_lowercase().as_str()) {
            return Err(RainError::Configuration(format!(
                "unknown log_level {:?} (expected one of: trace, debug, info, warn, error)",
                self.log_level
            )));
        }
        // Also catches unknown names in default_sections.
        resolve_sections(&self.collector.default_sections)?;
        Ok(())
    }
}

fn env_u64(key: &str) -> Result<Option<u64>, RainError> {
    match std::env::var(key) {
        Ok(raw) => {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                return Ok(None);
            }
            trimmed.parse::<u64>().map(Some).map_err(|_| {
                RainError::Configuration(format!("{key} must be a whole number of seconds, got {raw:?}"))
            })
        }
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;

    // Process environment is shared across test threads; every test that
    // reads or writes RAIN_* variables must hold this lock.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.collector.default_sections, vec!["system", "hardware", "network"]);
        assert_eq!(config.collector.max_processes, 25);
        assert_eq!(config.cache.duration_secs, 60);
        assert!(config.ui.show_banner);
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let config: Config = toml::from_str(
            r#"
            log_level = "debug"

            [collector]
            max_processes = 10
            "#,
        )
        .unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.collector.max_processes, 10);
        assert_eq!(config.collector.section_timeout_secs, 10);
        assert_eq!(config.ui.refresh_interval_secs, 2.0);
    }

    #[test]
    fn full_toml_round_trips() {
        let config: Config = toml::from_str(
            r#"
            log_level = "warn"

            [collector]
            default_sections = ["system", "python"]
            max_processes = 50
            section_timeout_secs = 20
            network_timeout_secs = 3

            [cache]
            enabled = false
            duration_secs = 120

            [ui]
            show_banner = false
            refresh_interval_secs = 0.5
            "#,
        )
        .unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.collector.default_sections, vec!["system", "python"]);
        assert!(!config.cache.enabled);
        assert_eq!(config.ui.refresh_interval_secs, 0.5);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut config = Config::default();
        config.collector.max_processes = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.collector.max_processes = 5000;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.collector.network_timeout_secs = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.ui.refresh_interval_secs = -1.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.log_level = "loud".into();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.collector.default_sections = vec!["bogus_section".into()];
        let err = config.validate().unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn explicit_file_loads_and_bad_file_is_hard_error() {
        let _env = ENV_LOCK.lock().unwrap();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[collector]\ndefault_sections = [\"sensors\"]").unwrap();
        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.collector.default_sections, vec!["sensors"]);

        let mut broken = tempfile::NamedTempFile::new().unwrap();
        writeln!(broken, "collector = 7").unwrap();
        let err = Config::load(Some(broken.path())).unwrap_err();
        assert_eq!(err.exit_code(), 2);

        let err = Config::load(Some(Path::new("/nonexistent/rain.toml"))).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn env_overrides_apply_and_reject_garbage() {
        let _env = ENV_LOCK.lock().unwrap();
        std::env::set_var("RAIN_LOG_LEVEL", "error");
        std::env::set_var("RAIN_CACHE_DURATION", "300");
        std::env::set_var("RAIN_NETWORK_TIMEOUT", "9");

        let mut config = Config::default();
        config.apply_env().unwrap();
        assert_eq!(config.log_level, "error");
        assert_eq!(config.cache.duration_secs, 300);
        assert_eq!(config.collector.network_timeout_secs, 9);

        std::env::set_var("RAIN_CACHE_DURATION", "soon");
        let mut config = Config::default();
        let err = config.apply_env().unwrap_err();
        assert_eq!(err.exit_code(), 2);

        std::env::remove_var("RAIN_LOG_LEVEL");
        std::env::remove_var("RAIN_CACHE_DURATION");
        std::env::remove_var("RAIN_NETWORK_TIMEOUT");
    }
}
