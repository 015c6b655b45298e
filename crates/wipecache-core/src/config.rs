//! Application configuration management.
//!
//! Holds the service URL, the last scope used, demo mode, where the
//! persistent store lives, and per-collection cache policy overrides.
//!
//! Configuration is stored at `~/.config/wipecache/config.json`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::cache::ReadOptions;
use crate::metrics::{MetricsPolicy, DEFAULT_SECONDS_PER_DEVICE};
use crate::models::Collection;

/// Application name used for config/cache directory paths
const APP_NAME: &str = "wipecache";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Used when neither the config file nor the environment names a service.
pub const DEFAULT_API_URL: &str = "http://localhost:8080/api";

pub const ENV_API_URL: &str = "WIPECACHE_API_URL";
pub const ENV_DEMO: &str = "WIPECACHE_DEMO";

/// Overrides for one collection's cache policy. Unset fields keep the
/// collection's default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CachePolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stale_after_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retain_for_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_retries: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub api_base_url: Option<String>,
    pub last_scope: Option<String>,
    pub demo_mode: bool,
    pub store_dir: Option<PathBuf>,
    pub seconds_per_device: Option<f64>,
    pub policies: HashMap<Collection, CachePolicy>,
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Directory of the persistent store.
    pub fn store_dir(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.store_dir {
            return Ok(dir.clone());
        }
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    pub fn api_url(&self) -> &str {
        self.api_base_url.as_deref().unwrap_or(DEFAULT_API_URL)
    }

    /// Let `WIPECACHE_API_URL` and `WIPECACHE_DEMO` override the file.
    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var(ENV_API_URL) {
            if !url.trim().is_empty() {
                self.api_base_url = Some(url);
            }
        }
        if let Ok(flag) = std::env::var(ENV_DEMO) {
            self.demo_mode = parse_flag(&flag);
        }
    }

    pub fn read_options(&self, collection: Collection) -> ReadOptions {
        let mut options = ReadOptions::for_collection(collection);
        if let Some(policy) = self.policies.get(&collection) {
            if let Some(secs) = policy.stale_after_secs {
                options = options.stale_after(Duration::from_secs(secs));
            }
            if let Some(secs) = policy.retain_for_secs {
                options = options.retain_for(Duration::from_secs(secs));
            }
            if let Some(retries) = policy.read_retries {
                options = options.retries(retries);
            }
        }
        options
    }

    pub fn metrics_policy(&self) -> MetricsPolicy {
        MetricsPolicy::with_seconds_per_device(
            self.seconds_per_device
                .unwrap_or(DEFAULT_SECONDS_PER_DEVICE),
        )
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AuditReport;

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("config.json")).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.api_url(), DEFAULT_API_URL);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let mut config = Config {
            last_scope: Some("admin@x.com".into()),
            demo_mode: true,
            ..Config::default()
        };
        config.policies.insert(
            Collection::AuditReports,
            CachePolicy {
                stale_after_secs: Some(30),
                ..CachePolicy::default()
            },
        );
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"policies": {"machines": {"read_retries": 3}}}"#).unwrap();

        let config = Config::load_from(&path).unwrap();
        assert!(!config.demo_mode);
        let machines = config.read_options(Collection::Machines);
        assert_eq!(machines.retries, 3);
        assert_eq!(machines.stale_after, Collection::Machines.default_stale_after());
        assert_eq!(
            config.read_options(Collection::Subusers),
            ReadOptions::for_collection(Collection::Subusers)
        );
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(Config::load_from(&path).is_err());
    }

    #[test]
    fn test_metrics_policy_uses_seconds_per_device() {
        let config = Config {
            seconds_per_device: Some(10.0),
            ..Config::default()
        };
        let report: AuditReport =
            serde_json::from_value(serde_json::json!({"reportId": "r1", "deviceCount": 3})).unwrap();
        assert_eq!((config.metrics_policy().estimate_duration)(&report), 30.0);
    }

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("1"));
        assert!(parse_flag(" TRUE "));
        assert!(!parse_flag("0"));
        assert!(!parse_flag(""));
    }
}
