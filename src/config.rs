use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::error::MofError;

pub const DEFAULT_CONFIG_FILE: &str = "mof-harvest.json";
pub const DEFAULT_BASE_URL: &str = "https://mof.tech.northwestern.edu";
pub const DEFAULT_SUMMARY_FILE: &str = "MOF_ISO_summary.csv";
pub const BASE_URL_ENV: &str = "MOF_CATALOG_URL";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub data_dir: Option<String>,
    #[serde(default)]
    pub page_size: Option<u32>,
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub retry_delay_ms: Option<u64>,
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
    #[serde(default)]
    pub workers: Option<usize>,
    #[serde(default)]
    pub summary_file: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub base_url: String,
    pub data_dir: Utf8PathBuf,
    pub paging: PagingPolicy,
    pub request_timeout: Duration,
    pub workers: usize,
    pub summary_file: String,
}

/// How `Catalog` walks the record pages of one collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PagingPolicy {
    pub page_size: u32,
    pub max_attempts: u32,
    pub retry_delay: Duration,
}

impl Default for PagingPolicy {
    fn default() -> Self {
        Self {
            page_size: 200,
            max_attempts: 3,
            retry_delay: Duration::from_secs(1),
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Reads the config file, if any, and applies the `MOF_CATALOG_URL`
    /// override. A missing default file means defaults; a missing explicit
    /// file is an error.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, MofError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        let mut config = if path.is_none() && !config_path.exists() {
            Config::default()
        } else {
            let content = fs::read_to_string(&config_path)
                .map_err(|_| MofError::ConfigRead(config_path.clone()))?;
            serde_json::from_str(&content).map_err(|err| MofError::ConfigParse(err.to_string()))?
        };

        if let Ok(url) = std::env::var(BASE_URL_ENV) {
            if !url.trim().is_empty() {
                config.base_url = Some(url.trim().to_string());
            }
        }

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, MofError> {
        let defaults = PagingPolicy::default();

        let page_size = config.page_size.unwrap_or(defaults.page_size);
        if page_size == 0 {
            return Err(MofError::InvalidConfig("page_size must be positive".to_string()));
        }
        let max_attempts = config.max_retries.unwrap_or(defaults.max_attempts);
        if max_attempts == 0 {
            return Err(MofError::InvalidConfig("max_retries must be positive".to_string()));
        }
        let workers = config.workers.unwrap_or(10);
        if workers == 0 {
            return Err(MofError::InvalidConfig("workers must be positive".to_string()));
        }

        let base_url = config
            .base_url
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        Ok(ResolvedConfig {
            base_url,
            data_dir: Utf8PathBuf::from(config.data_dir.unwrap_or_else(|| "data".to_string())),
            paging: PagingPolicy {
                page_size,
                max_attempts,
                retry_delay: config
                    .retry_delay_ms
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.retry_delay),
            },
            request_timeout: Duration::from_secs(config.request_timeout_secs.unwrap_or(10)),
            workers,
            summary_file: config
                .summary_file
                .unwrap_or_else(|| DEFAULT_SUMMARY_FILE.to_string()),
        })
    }
}
