use std::{env, fmt, fs, path, str::FromStr};

use logger::LogFormat;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::level_filters::LevelFilter;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path:?}: {source}")]
    ReadFailed { path: path::PathBuf, source: std::io::Error },
    #[error("Failed to write config {path:?}: {source}")]
    WriteFailed { path: path::PathBuf, source: std::io::Error },
    #[error("Failed to parse config: {0}")]
    ParseFailed(#[from] toml::de::Error),
    #[error("Failed to serialize config: {0}")]
    SerializeFailed(#[from] toml::ser::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
    #[error("No config path available, set XDG_CONFIG_HOME or HOME")]
    ConfigPathUnavailable,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: Storage,
    pub schedule: Schedule,
    pub logging: Logging,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub twilio: Option<TwilioConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Storage {
    /// Root of the record store collections
    pub data_dir: path::PathBuf,
    /// Directory holding active log segments and archives
    pub log_dir: path::PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Schedule {
    pub check_interval_seconds: u64,
    pub rotation_interval_seconds: u64,
    /// Rotate once immediately at start, then on the interval
    pub rotate_on_start: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Logging {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TwilioConfig {
    pub account_sid: String,
    pub auth_token: String,
    pub from_phone: String,
    #[serde(default = "default_twilio_api_base")]
    pub api_base: String,
    /// Prefixed to the owner's 10 digit phone identifier
    #[serde(default = "default_country_code")]
    pub country_code: String,
}

fn default_twilio_api_base() -> String {
    "https://api.twilio.com".into()
}

fn default_country_code() -> String {
    "+1".into()
}

impl Default for Storage {
    fn default() -> Self {
        Self { data_dir: ".data".into(), log_dir: ".logs".into() }
    }
}

impl Default for Schedule {
    fn default() -> Self {
        Self { check_interval_seconds: 60, rotation_interval_seconds: 60 * 60 * 24, rotate_on_start: true }
    }
}

impl Logging {
    pub fn level_filter(&self) -> Result<LevelFilter, ConfigError> {
        LevelFilter::from_str(self.level.trim())
            .map_err(|_| ConfigError::Invalid(format!("logging.level {:?} is not a log level", self.level)))
    }
}

impl Default for Logging {
    fn default() -> Self {
        Self { level: "info".into(), format: LogFormat::Compact }
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

/// Get default config path ($XDG_CONFIG_HOME/uptime/config.toml or
/// $HOME/.config/...)
fn default_config_path() -> Result<path::PathBuf, ConfigError> {
    let path = if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
        path::PathBuf::from(config_home)
    } else if let Some(home_dir) = env::home_dir() {
        home_dir.join(".config")
    } else {
        return Err(ConfigError::ConfigPathUnavailable);
    };

    Ok(path.join("uptime/config.toml"))
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

        writeln!(f, "Current Internal Configuration State:")?;
        write_title_1(f, "Storage")?;
        write_1(f, "Data Directory", &self.storage.data_dir.display())?;
        write_1(f, "Log Directory", &self.storage.log_dir.display())?;
        write_title_1(f, "Schedule")?;
        write_1(f, "Check Interval (s)", &self.schedule.check_interval_seconds)?;
        write_1(f, "Rotation Interval (s)", &self.schedule.rotation_interval_seconds)?;
        write_1(f, "Rotate On Start", &self.schedule.rotate_on_start)?;
        write_title_1(f, "Logging")?;
        write_1(f, "Level", &self.logging.level)?;
        write_1(f, "Format", &self.logging.format)?;
        write_title_1(f, "SMS Gateway")?;
        match &self.twilio {
            Some(twilio) => {
                write_1(f, "API Base", &twilio.api_base)?;
                write_1(f, "Account", &twilio.account_sid)?;
                write_1(f, "From", &twilio.from_phone)?;
                write_1(f, "Auth Token", &"********")?;
            }
            None => write_1(f, "Enabled", &false)?,
        }

        Ok(())
    }
}

impl Config {
    /// Generate Config structure from file
    ///
    /// Creates a default config in ~/.config/uptime/config.toml
    ///  or the specified path, with the name config.toml if one does not exist
    ///
    /// ```rust,ignore
    /// let cfg = config::Config::from_config(None::<&path::Path>)?;
    /// println!("{}", cfg);
    /// ```
    pub fn from_config(optional_path: Option<impl AsRef<path::Path>>) -> Result<Self, ConfigError> {
        let config_path: path::PathBuf = if let Some(path) = optional_path {
            normalize_toml_path(path.as_ref())
        } else {
            default_config_path()?
        };

        let config = if config_path.exists() {
            let raw_string = fs::read_to_string(&config_path)
                .map_err(|source| ConfigError::ReadFailed { path: config_path.clone(), source })?;
            Self::from_toml(&raw_string)?
        } else {
            let config = Self::default();
            config.write_config(&config_path)?;
            config
        };

        Ok(config.with_env_overrides())
    }

    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.schedule.check_interval_seconds == 0 {
            return Err(ConfigError::Invalid("schedule.check_interval_seconds must be positive".into()));
        }
        if self.schedule.rotation_interval_seconds == 0 {
            return Err(ConfigError::Invalid(
                "schedule.rotation_interval_seconds must be positive".into(),
            ));
        }
        self.logging.level_filter()?;
        Ok(())
    }

    /// Gateway secrets may come from the environment instead of the file
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|name| env::var(name).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let sid = lookup("UPTIME_TWILIO_ACCOUNT_SID");
        let token = lookup("UPTIME_TWILIO_AUTH_TOKEN");
        let from = lookup("UPTIME_TWILIO_FROM_PHONE");

        match self.twilio.as_mut() {
            Some(twilio) => {
                if let Some(sid) = sid {
                    twilio.account_sid = sid;
                }
                if let Some(token) = token {
                    twilio.auth_token = token;
                }
                if let Some(from) = from {
                    twilio.from_phone = from;
                }
            }
            None => {
                if let (Some(account_sid), Some(auth_token), Some(from_phone)) = (sid, token, from) {
                    self.twilio = Some(TwilioConfig {
                        account_sid,
                        auth_token,
                        from_phone,
                        api_base: default_twilio_api_base(),
                        country_code: default_country_code(),
                    });
                }
            }
        }
        self
    }

    /// Serialize and write a config to a file
    pub fn write_config(&self, path: &std::path::Path) -> Result<(), ConfigError> {
        let config_str: String = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|source| ConfigError::WriteFailed { path: parent.to_path_buf(), source })?;
        }

        std::fs::write(path, config_str)
            .map_err(|source| ConfigError::WriteFailed { path: path.to_path_buf(), source })
    }
}
