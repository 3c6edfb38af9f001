use std::env;
use std::fs;
use std::path::PathBuf;

use camino::Utf8PathBuf;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::Credentials;
use crate::error::ArchiveError;
use crate::retry::BackoffSchedule;

pub const CONFIG_FILE_NAME: &str = "whoop-archive.json";
pub const DEFAULT_LOOKBACK_DAYS: u32 = 120;
pub const DEFAULT_HEART_RATE_STEP_SECS: u32 = 6;
/// Ten years of daily files; anything longer is a typo.
pub const MAX_LOOKBACK_DAYS: u32 = 3650;

/// File form of the configuration; every field is optional.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub notify_api_key: Option<String>,
    #[serde(default)]
    pub backoff_secs: Option<Vec<u64>>,
    #[serde(default)]
    pub lookback_days: Option<u32>,
    #[serde(default)]
    pub heart_rate_step_secs: Option<u32>,
    #[serde(default)]
    pub data_dir: Option<String>,
}

impl Config {
    /// Readable before credentials are checked, so a rejected configuration
    /// can still be reported.
    pub fn notify_api_key(&self) -> Option<&str> {
        self.notify_api_key
            .as_deref()
            .filter(|value| !value.trim().is_empty())
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub credentials: Credentials,
    pub notify_api_key: Option<String>,
    pub backoff: BackoffSchedule,
    pub lookback_days: u32,
    pub heart_rate_step_secs: u32,
    pub data_dir: Utf8PathBuf,
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, ArchiveError> {
        Self::resolve_config(Self::load(path)?)
    }

    /// Loads `.env`, the config file and environment overrides, in that
    /// order of increasing precedence. Nothing is validated yet.
    pub fn load(path: Option<&str>) -> Result<Config, ArchiveError> {
        if let Ok(dotenv) = dotenvy::dotenv() {
            debug!(path = %dotenv.display(), "loaded .env");
        }
        let config = Self::load_file(path)?;
        Self::apply_env(config, |key| env::var(key).ok())
    }

    fn load_file(path: Option<&str>) -> Result<Config, ArchiveError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => match default_config_path() {
                Some(path) => path,
                None => return Ok(Config::default()),
            },
        };
        if path.is_none() && !config_path.exists() {
            return Ok(Config::default());
        }
        let content = fs::read_to_string(&config_path)
            .map_err(|_| ArchiveError::ConfigRead(config_path.clone()))?;
        debug!(path = %config_path.display(), "loaded config file");
        serde_json::from_str(&content).map_err(|err| ArchiveError::ConfigParse(err.to_string()))
    }

    /// Overlays values found through `lookup` (normally the process
    /// environment) onto `config`.
    pub fn apply_env<F>(mut config: Config, lookup: F) -> Result<Config, ArchiveError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(value) = non_empty("WHOOP_EMAIL") {
            config.username = Some(value);
        }
        if let Some(value) = non_empty("WHOOP_PASSWORD") {
            config.password = Some(value);
        }
        if let Some(value) = non_empty("PUSHBULLET_API_KEY") {
            config.notify_api_key = Some(value);
        }
        if let Some(value) = non_empty("WHOOP_DATA_DIR") {
            config.data_dir = Some(value);
        }
        if let Some(value) = non_empty("WHOOP_LOOKBACK_DAYS") {
            config.lookback_days = Some(parse_number("WHOOP_LOOKBACK_DAYS", &value)?);
        }
        if let Some(value) = non_empty("WHOOP_HR_STEP_SECS") {
            config.heart_rate_step_secs = Some(parse_number("WHOOP_HR_STEP_SECS", &value)?);
        }
        if let Some(value) = non_empty("WHOOP_BACKOFF_SECS") {
            let secs = value
                .split(',')
                .map(|part| parse_number("WHOOP_BACKOFF_SECS", part))
                .collect::<Result<Vec<u64>, _>>()?;
            config.backoff_secs = Some(secs);
        }
        Ok(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, ArchiveError> {
        let notify_api_key = config.notify_api_key().map(str::to_string);
        let username = config.username.filter(|value| !value.trim().is_empty());
        let password = config.password.filter(|value| !value.is_empty());
        let (Some(username), Some(password)) = (username, password) else {
            return Err(ArchiveError::MissingCredentials);
        };

        let heart_rate_step_secs = config
            .heart_rate_step_secs
            .unwrap_or(DEFAULT_HEART_RATE_STEP_SECS);
        if heart_rate_step_secs == 0 {
            return Err(ArchiveError::InvalidConfig(
                "heart_rate_step_secs must be positive".to_string(),
            ));
        }

        let lookback_days = config.lookback_days.unwrap_or(DEFAULT_LOOKBACK_DAYS);
        if lookback_days > MAX_LOOKBACK_DAYS {
            return Err(ArchiveError::InvalidConfig(format!(
                "lookback_days must be at most {MAX_LOOKBACK_DAYS}, got {lookback_days}"
            )));
        }

        let backoff = config
            .backoff_secs
            .map(|secs| BackoffSchedule::from_secs(&secs))
            .unwrap_or_default();

        Ok(ResolvedConfig {
            credentials: Credentials::new(username.trim(), password),
            notify_api_key,
            backoff,
            lookback_days,
            heart_rate_step_secs,
            data_dir: Utf8PathBuf::from(config.data_dir.unwrap_or_else(|| "data".to_string())),
        })
    }
}

/// `whoop-archive.json` in the working directory, else in the platform
/// config directory.
fn default_config_path() -> Option<PathBuf> {
    let local = PathBuf::from(CONFIG_FILE_NAME);
    if local.exists() {
        return Some(local);
    }
    ProjectDirs::from("", "", "whoop-archive").map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ArchiveError> {
    value
        .trim()
        .parse()
        .map_err(|_| ArchiveError::InvalidConfig(format!("{key}: not a number: {value}")))
}
