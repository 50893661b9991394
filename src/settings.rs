use anyhow::{bail, Context, Result};
use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{fetch::DEFAULT_API_BASE, scheduler::DEFAULT_CADENCE_MINUTES};

pub const CONFIG_ENV: &str = "WEATHER_SYNC_CONFIG";
pub const DEBUG_ENV: &str = "WEATHER_SYNC_DEBUG";
pub const DEFAULT_CONFIG_PATH: &str = "settings.json";

/// Station credentials. Never logged.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub device_id: String,
    pub api_key: String,
    pub application_key: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("device_id", &self.device_id)
            .field("api_key", &"***")
            .field("application_key", &"***")
            .finish()
    }
}

impl Credentials {
    /// Parses the `mac,apiKey,appKey` secrets line.
    pub fn parse(contents: &str) -> Result<Self> {
        let line = contents
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .context("secrets file is empty")?;
        let parts: Vec<&str> = line.split(',').map(str::trim).collect();
        let [device_id, api_key, application_key] = parts.as_slice() else {
            bail!(
                "secrets line must be 'mac,apiKey,appKey', found {} field(s)",
                parts.len()
            );
        };
        if [device_id, api_key, application_key]
            .iter()
            .any(|part| part.is_empty())
        {
            bail!("secrets line has an empty field");
        }
        Ok(Self {
            device_id: device_id.to_string(),
            api_key: api_key.to_string(),
            application_key: application_key.to_string(),
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read secrets from {}", path.display()))?;
        Self::parse(&contents).with_context(|| format!("Invalid secrets file {}", path.display()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub device_id: Option<String>,
    pub api_key: Option<String>,
    pub application_key: Option<String>,
    pub api_base_url: String,
    pub catalog_path: PathBuf,
    pub database_path: PathBuf,
    /// Fallback credentials source when the three fields above are unset.
    pub secrets_path: Option<PathBuf>,
    pub cadence_minutes: u32,
    pub request_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            device_id: None,
            api_key: None,
            application_key: None,
            api_base_url: DEFAULT_API_BASE.into(),
            catalog_path: "sensors.csv".into(),
            database_path: "weather.sqlite3".into(),
            secrets_path: Some("secrets.txt".into()),
            cadence_minutes: DEFAULT_CADENCE_MINUTES,
            request_timeout_secs: 30,
        }
    }
}

impl Settings {
    /// Reads settings from `path`. A missing file yields the defaults; a file
    /// that exists but does not parse is an error.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings from {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse settings in {}", path.display()))
    }

    /// Path from `WEATHER_SYNC_CONFIG`, else `settings.json`.
    pub fn from_env() -> Result<Self> {
        let path = std::env::var_os(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
        let mut settings = Self::load(&path)?;
        if debug_enabled(std::env::var(DEBUG_ENV).ok().as_deref()) {
            settings.cadence_minutes = 1;
        }
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.cadence_minutes == 0 {
            bail!("cadence_minutes must be at least 1");
        }
        if self.request_timeout_secs == 0 {
            bail!("request_timeout_secs must be at least 1");
        }
        Ok(())
    }

    /// Credentials from the settings file when all three are present,
    /// otherwise from the secrets file.
    pub fn credentials(&self) -> Result<Credentials> {
        match (&self.device_id, &self.api_key, &self.application_key) {
            (Some(device_id), Some(api_key), Some(application_key))
                if !device_id.trim().is_empty()
                    && !api_key.trim().is_empty()
                    && !application_key.trim().is_empty() =>
            {
                Ok(Credentials {
                    device_id: device_id.trim().to_string(),
                    api_key: api_key.trim().to_string(),
                    application_key: application_key.trim().to_string(),
                })
            }
            _ => {
                let path = self
                    .secrets_path
                    .as_deref()
                    .context("station credentials missing and no secrets_path configured")?;
                Credentials::load(path)
            }
        }
    }

    pub fn cadence(&self) -> TimeDelta {
        TimeDelta::minutes(i64::from(self.cadence_minutes))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn debug_enabled(value: Option<&str>) -> bool {
    matches!(value.map(str::trim), Some("1" | "true" | "TRUE" | "yes"))
}
