use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

/// Name of the configuration file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "vault-transfer.toml";

/// Prefix for environment variable overrides, e.g. `VAULT_TRANSFER__DRAIN__WORKERS`
pub const ENV_PREFIX: &str = "VAULT_TRANSFER__";

/// Admission domain: staging inbox polled by a single worker
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CollectConfig {
    /// Staging directory where upstream producers drop items
    pub inbox: PathBuf,
    /// Interval at which the staging directory is polled
    #[serde(with = "humantime_serde")]
    pub polling_interval: Duration,
    /// How often admission re-resolves a bucket that disappeared under it
    pub max_attempts: usize,
    /// Items whose key cannot be extracted
    pub rejected: PathBuf,
    /// Items that could not be relocated into their bucket
    pub failed: PathBuf,
}

impl Default for CollectConfig {
    fn default() -> Self {
        Self {
            inbox: PathBuf::from(".data/inbox"),
            polling_interval: Duration::from_millis(500),
            max_attempts: 5,
            rejected: PathBuf::from(".data/outbox/rejected"),
            failed: PathBuf::from(".data/outbox/failed"),
        }
    }
}

/// Drain domain: bucket directories drained by a worker pool
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DrainConfig {
    /// Root holding one bucket directory per live key
    pub destination: PathBuf,
    /// Interval at which the destination root is polled for buckets
    #[serde(with = "humantime_serde")]
    pub polling_interval: Duration,
    /// Maximum number of buckets drained concurrently
    pub workers: usize,
    /// Items whose processing failed, organized by key
    pub failed: PathBuf,
    /// Processed items, organized by key. Processed items are deleted when unset.
    #[serde(default)]
    pub processed: Option<PathBuf>,
}

impl Default for DrainConfig {
    fn default() -> Self {
        Self {
            destination: PathBuf::from(".data/buckets"),
            polling_interval: Duration::from_millis(500),
            workers: 4,
            failed: PathBuf::from(".data/outbox/failed"),
            processed: None,
        }
    }
}

/// Remote vault catalog receiving registrations
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Base URL of the catalog service
    pub url: String,
    /// Timeout for a single registration request
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            url: String::from("http://localhost:20305"),
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Configuration {
    /// Admission (bucketing) configuration
    pub collect: CollectConfig,
    /// Drain and reaper configuration
    pub drain: DrainConfig,
    /// Catalog registration configuration
    pub catalog: CatalogConfig,
}

impl Configuration {
    /// Directory names directly under the destination root that are sinks, not buckets.
    ///
    /// Deployments may place the outboxes next to the buckets; those directories must
    /// never be drained or reaped.
    pub fn reserved_bucket_names(&self) -> Vec<String> {
        let destination = &self.drain.destination;
        let mut sinks: Vec<&Path> = vec![
            self.collect.rejected.as_path(),
            self.collect.failed.as_path(),
            self.drain.failed.as_path(),
        ];
        if let Some(processed) = &self.drain.processed {
            sinks.push(processed.as_path());
        }

        let mut names: Vec<String> = sinks
            .into_iter()
            .filter(|sink| sink.parent() == Some(destination.as_path()))
            .filter_map(|sink| sink.file_name())
            .map(|name| name.to_string_lossy().into_owned())
            .collect();
        names.sort();
        names.dedup();
        names
    }

    fn figment() -> Figment {
        Figment::from(Serialized::defaults(Configuration::default()))
    }

    pub fn load() -> Result<Self, Box<figment::Error>> {
        let config = Self::figment()
            .merge(Toml::file(DEFAULT_CONFIG_FILE))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(Box::new)?;

        Ok(config)
    }

    pub fn load_from_path(path: &Path) -> Result<Self, Box<figment::Error>> {
        let config = Self::figment()
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(Box::new)?;

        Ok(config)
    }
}
