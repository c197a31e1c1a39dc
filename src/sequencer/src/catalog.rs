//! Registers drained dataset versions with the vault catalog.

use crate::drain::ItemProcessor;
use crate::error::{ExtractionError, ProcessingError};
use crate::extract::read_oai_ore;
use crate::key::Key;
use async_trait::async_trait;
use serde::Serialize;
use std::io;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Serialize)]
struct Registration<'a> {
    nbn: &'a str,
    item: &'a str,
    metadata: serde_json::Value,
}

/// [`ItemProcessor`] that posts each version's OAI-ORE metadata to
/// `<url>/nbn/<nbn>/versions`. Versions of one NBN arrive in admission order.
#[derive(Debug, Clone)]
pub struct CatalogRegistrar {
    base_url: String,
    http: reqwest::Client,
}

impl CatalogRegistrar {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ProcessingError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    pub fn versions_url(&self, key: &Key) -> String {
        format!("{}/nbn/{}/versions", self.base_url, key.encoded())
    }
}

#[async_trait]
impl ItemProcessor for CatalogRegistrar {
    async fn process(&self, item: &Path, key: &Key) -> Result<(), ProcessingError> {
        let path = item.to_path_buf();
        let metadata = tokio::task::spawn_blocking(move || read_oai_ore(&path))
            .await
            .map_err(|e| ExtractionError::Io(io::Error::other(e.to_string())))??;

        let name = item
            .file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_default();
        let registration = Registration {
            nbn: key.as_str(),
            item: &name,
            metadata,
        };

        let url = self.versions_url(key);
        tracing::debug!(url = %url, item = %name, "Registering version with catalog");
        let response = self.http.post(&url).json(&registration).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProcessingError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        tracing::info!(nbn = %key, item = %name, "Registered version with catalog");
        Ok(())
    }
}
