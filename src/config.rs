use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use crate::error::{ArchiverError, Result};

pub const DEFAULT_CONFIG_PATH: &str = "archiver.toml";

/// 1 GiB.
pub const DEFAULT_MAX_ARCHIVE_SIZE: u64 = 1024 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalChannelType {
    Log,
    Webhook,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalConfig {
    pub channel: SignalChannelType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            channel: SignalChannelType::Log,
            webhook_url: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Ceiling on the summed size of all addons of one job, in bytes.
    pub max_archive_size: u64,
    /// Provider the registration's archive is written to.
    pub archive_provider: String,
    /// Base URL of the file API (copy and listing).
    pub file_api_url: String,
    /// Base URL of the OSF JSON API (nodes and addons).
    pub osf_api_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub osf_api_token: Option<String>,
    pub database_path: PathBuf,
    pub http_bind: SocketAddr,
    /// When false, jobs complete immediately without copying anything.
    pub enabled: bool,
    pub simulation: bool,
    pub verbose: bool,
    pub json_logs: bool,
    #[serde(default)]
    pub signals: SignalConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            max_archive_size: DEFAULT_MAX_ARCHIVE_SIZE,
            archive_provider: "osfstorage".to_string(),
            file_api_url: "http://localhost:7777".to_string(),
            osf_api_url: "http://localhost:8000".to_string(),
            osf_api_token: None,
            database_path: PathBuf::from("archiver.db"),
            http_bind: SocketAddr::from(([127, 0, 0, 1], 7780)),
            enabled: true,
            simulation: false,
            verbose: false,
            json_logs: false,
            signals: SignalConfig::default(),
        }
    }
}

impl AppConfig {
    /// Layer defaults, the TOML file, `ARCHIVER_*` environment variables and
    /// finally any command-line overrides.
    pub fn new<T: Serialize>(config_path: Option<&Path>, overrides: Option<&T>) -> Result<Self> {
        let path = config_path.unwrap_or(Path::new(DEFAULT_CONFIG_PATH));

        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("ARCHIVER_").split("__"));

        if let Some(overrides) = overrides {
            figment = figment.merge(Serialized::defaults(overrides));
        }

        let config: AppConfig = figment
            .extract()
            .map_err(|e| ArchiverError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.archive_provider.is_empty() {
            return Err(ArchiverError::Config(
                "archive_provider must not be empty".to_string(),
            ));
        }
        if !self.simulation && reqwest::Url::parse(&self.file_api_url).is_err() {
            return Err(ArchiverError::Config(format!(
                "file_api_url is not a valid URL: {}",
                self.file_api_url
            )));
        }
        Ok(())
    }

    /// Endpoint copy requests are posted to.
    pub fn copy_url(&self) -> String {
        format!("{}/ops/copy", self.file_api_url.trim_end_matches('/'))
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| ArchiverError::Config(e.to_string()))
    }
}
