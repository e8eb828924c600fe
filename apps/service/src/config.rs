use std::{env, fmt, fs, path};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read config {}: {source}", path.display())]
    ReadFailed {
        path: path::PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write config {}: {source}", path.display())]
    WriteFailed {
        path: path::PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    ParseFailed(#[from] toml::de::Error),
    #[error("failed to serialize config: {0}")]
    SerializeFailed(#[from] toml::ser::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
    #[error("no config path available (neither XDG_CONFIG_HOME nor HOME is set)")]
    ConfigPathUnavailable,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub workers: WorkersConfig,
    pub storage: StorageConfig,
    pub twilio: TwilioConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkersConfig {
    pub probe_interval_seconds: u64,
    pub rotation_interval_seconds: u64,
    pub max_concurrent_probes: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root of the record store
    pub data_dir: path::PathBuf,
    /// Directory holding live and rotated check logs
    pub log_dir: path::PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TwilioConfig {
    pub account_sid: String,
    pub auth_token: String,
    pub from_phone: String,
    pub api_base: String,
    /// Upper bound on one Messages API request
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self { probe_interval_seconds: 60, rotation_interval_seconds: 24 * 3600, max_concurrent_probes: None }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { data_dir: ".data".into(), log_dir: ".logs".into() }
    }
}

impl Default for TwilioConfig {
    fn default() -> Self {
        Self {
            account_sid: String::new(),
            auth_token: String::new(),
            from_phone: String::new(),
            api_base: "https://api.twilio.com".into(),
            timeout_seconds: 10,
        }
    }
}

impl TwilioConfig {
    /// Whether enough credentials are present to send messages
    pub fn is_configured(&self) -> bool {
        !self.account_sid.trim().is_empty()
            && !self.auth_token.trim().is_empty()
            && !self.from_phone.trim().is_empty()
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".into(), format: "compact".into() }
    }
}

/// Used to ensure we are actually reading a toml file
fn normalize_toml_path(path: &path::Path) -> path::PathBuf {
    let mut path = path.to_path_buf();
    if path.extension().map(|ext| ext != "toml").unwrap_or(true) {
        path.set_extension("toml");
    }
    path
}

/// Get default config path ($XDG_CONFIG_HOME/uptick/config.toml or
/// $HOME/.config/...)
fn default_config_path() -> Result<path::PathBuf, Error> {
    let path = if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
        path::PathBuf::from(config_home)
    } else if let Some(home_dir) = env::home_dir() {
        home_dir.join(".config")
    } else {
        return Err(Error::ConfigPathUnavailable);
    };

    Ok(path.join("uptick/config.toml"))
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let write_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str, value: &dyn fmt::Display| {
                writeln!(f, "  {:indent$}{}: {}", "", label, value, indent = level * 2)
            }
        };
        let write_title_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str| {
                writeln!(f, "{:indent$}{}", "", label, indent = level * 2)
            }
        };

        let write_title_1 = write_title_indented(1);
        let write_1 = write_indented(1);

        let max_probes = self
            .workers
            .max_concurrent_probes
            .map_or_else(|| "unbounded".to_string(), |limit| limit.to_string());
        let twilio = if self.twilio.is_configured() { "configured" } else { "not configured" };

        writeln!(f, "Current Internal Configuration State:")?;
        write_title_1(f, "Workers")?;
        write_1(f, "Probe Interval (s)", &self.workers.probe_interval_seconds)?;
        write_1(f, "Rotation Interval (s)", &self.workers.rotation_interval_seconds)?;
        write_1(f, "Max Concurrent Probes", &max_probes)?;
        write_title_1(f, "Storage")?;
        write_1(f, "Data Directory", &self.storage.data_dir.display())?;
        write_1(f, "Log Directory", &self.storage.log_dir.display())?;
        write_title_1(f, "Twilio")?;
        write_1(f, "Credentials", &twilio)?;
        write_1(f, "API Base", &self.twilio.api_base)?;
        write_1(f, "Timeout (s)", &self.twilio.timeout_seconds)?;
        write_title_1(f, "Logging")?;
        write_1(f, "Level", &self.logging.level)?;
        write_1(f, "Format", &self.logging.format)?;

        Ok(())
    }
}

impl Config {
    /// Generate Config structure from file
    ///
    /// Creates a default config in ~/.config/uptick/config.toml
    ///  or the specified path, with the name config.toml if one does not exist
    ///
    /// ```rust,no_run
    /// use uptick_service::config::Config;
    ///
    /// let cfg = Config::from_config(None::<&std::path::Path>).unwrap();
    /// println!("{}", cfg);
    /// ```
    pub fn from_config(optional_path: Option<impl AsRef<path::Path>>) -> Result<Self, Error> {
        let config_path: path::PathBuf = if let Some(path) = optional_path {
            normalize_toml_path(path.as_ref())
        } else {
            default_config_path()?
        };

        let config = if config_path.exists() {
            let raw_string = fs::read_to_string(&config_path)
                .map_err(|source| Error::ReadFailed { path: config_path.clone(), source })?;
            toml::from_str(raw_string.as_str())?
        } else {
            let config = Self::default();
            config.write_config(&config_path)?;
            config
        };

        config.validate()?;
        Ok(config)
    }

    /// Load from file, then apply `TWILIO_*` overrides from the environment
    pub fn load(optional_path: Option<impl AsRef<path::Path>>) -> Result<Self, Error> {
        let mut config = Self::from_config(optional_path)?;
        config.apply_overrides(|key| env::var(key).ok());
        Ok(config)
    }

    /// Overlay credentials found through `lookup`; empty values are ignored
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let mut set = |key: &str, field: &mut String| {
            if let Some(value) = lookup(key).filter(|value| !value.trim().is_empty()) {
                *field = value;
            }
        };
        set("TWILIO_ACCOUNT_SID", &mut self.twilio.account_sid);
        set("TWILIO_AUTH_TOKEN", &mut self.twilio.auth_token);
        set("TWILIO_FROM_PHONE", &mut self.twilio.from_phone);
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.workers.probe_interval_seconds == 0 {
            return Err(Error::Invalid("workers.probe_interval_seconds must be at least 1".into()));
        }
        if self.workers.rotation_interval_seconds == 0 {
            return Err(Error::Invalid("workers.rotation_interval_seconds must be at least 1".into()));
        }
        if self.twilio.timeout_seconds == 0 {
            return Err(Error::Invalid("twilio.timeout_seconds must be at least 1".into()));
        }
        if self.workers.max_concurrent_probes == Some(0) {
            return Err(Error::Invalid("workers.max_concurrent_probes must be at least 1".into()));
        }
        Ok(())
    }

    /// Serialize and write a config to a file
    pub fn write_config(&self, path: &std::path::Path) -> Result<(), Error> {
        let config_str: String = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|source| Error::WriteFailed { path: parent.to_path_buf(), source })?;
        }

        std::fs::write(path, config_str)
            .map_err(|source| Error::WriteFailed { path: path.to_path_buf(), source })
    }
}
