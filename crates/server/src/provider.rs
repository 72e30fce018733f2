//! Media-provider boundary.
//!
//! The catalog services themselves are external; the core only needs this
//! seam. Calls always go through [`crate::credentials::CredentialResolver`]
//! output, so guests transparently act with the host's token.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::credentials::EffectiveCredentials;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemDetails {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(default)]
    pub artwork_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Library {
    pub id: String,
    pub title: String,
    pub kind: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Genre {
    pub id: String,
    pub name: String,
}

#[async_trait]
pub trait MediaProvider: Send + Sync {
    async fn item_details(
        &self,
        item_id: &str,
        creds: &EffectiveCredentials,
    ) -> Result<ItemDetails>;

    async fn libraries(&self, creds: &EffectiveCredentials) -> Result<Vec<Library>>;

    async fn genres(&self, creds: &EffectiveCredentials) -> Result<Vec<Genre>>;
}

/// Server URL and extra tokens stored (serialized) on the session row.
#[derive(Debug, Deserialize)]
struct ProviderConfig {
    url: String,
}

pub struct HttpMediaProvider {
    client: reqwest::Client,
}

impl HttpMediaProvider {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    fn base_url(creds: &EffectiveCredentials) -> Result<String> {
        let raw = creds
            .provider_config
            .as_deref()
            .ok_or_else(|| anyhow!("no provider configuration for principal"))?;
        let config: ProviderConfig =
            serde_json::from_str(raw).context("invalid provider configuration")?;
        Ok(config.url.trim_end_matches('/').to_string())
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        creds: &EffectiveCredentials,
        path: &str,
    ) -> Result<T> {
        let url = format!("{}{}", Self::base_url(creds)?, path);
        let mut request = self.client.get(&url);
        if let Some(token) = &creds.access_token {
            request = request.header("X-Access-Token", token);
        }
        if let Some(device) = &creds.device_id {
            request = request.header("X-Device-Id", device);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("request to {url} failed"))?
            .error_for_status()
            .with_context(|| format!("provider rejected request to {url}"))?;
        Ok(response.json::<T>().await?)
    }
}

impl Default for HttpMediaProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaProvider for HttpMediaProvider {
    async fn item_details(
        &self,
        item_id: &str,
        creds: &EffectiveCredentials,
    ) -> Result<ItemDetails> {
        self.get_json(creds, &format!("/items/{item_id}")).await
    }

    async fn libraries(&self, creds: &EffectiveCredentials) -> Result<Vec<Library>> {
        self.get_json(creds, "/libraries").await
    }

    async fn genres(&self, creds: &EffectiveCredentials) -> Result<Vec<Genre>> {
        self.get_json(creds, "/genres").await
    }
}
