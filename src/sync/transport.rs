//! HTTP transport for the sync endpoint.
//!
//! All traffic goes to a single `<server_url>/sync` resource:
//! - `GET  sync`                           bootstrap schema (SQL text)
//! - `GET  sync?table=T&limit=L&after=A`   one pull page
//! - `POST sync?table=T`                   one push page
//!
//! When an API key is configured it is sent as the `key` query parameter.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::error::SyncError;
use crate::config::SyncConfig;

/// One page of remote changes, ordered by `updated_at` ascending.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PullPage {
    pub data: Vec<RemoteRow>,
    #[serde(default)]
    pub more: bool,
}

/// A remote row, either positional or keyed by column name.
///
/// Positional rows list values in local column order, without the phase
/// column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RemoteRow {
    Values(Vec<Value>),
    Fields(Map<String, Value>),
}

impl RemoteRow {
    /// Value of `column`, where `columns` are the synced (non-phase)
    /// columns in local order. Missing values are NULL.
    pub fn get(&self, columns: &[&str], column: &str) -> Value {
        match self {
            RemoteRow::Values(values) => columns
                .iter()
                .position(|c| *c == column)
                .and_then(|i| values.get(i))
                .cloned()
                .unwrap_or(Value::Null),
            RemoteRow::Fields(fields) => fields.get(column).cloned().unwrap_or(Value::Null),
        }
    }
}

/// Body of a push request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PushBatch {
    pub fields: Vec<String>,
    pub data: Vec<Vec<Value>>,
}

/// The remote side of the sync protocol.
#[async_trait]
pub trait SyncTransport: Send + Sync {
    /// Fetch the SQL script that creates the local schema.
    async fn fetch_schema(&self) -> Result<String, SyncError>;

    /// Fetch up to `limit` rows of `table` changed after `after`.
    async fn fetch_page(
        &self,
        table: &str,
        limit: usize,
        after: Option<&str>,
    ) -> Result<PullPage, SyncError>;

    /// Upload a batch of locally changed rows.
    async fn push(&self, table: &str, batch: &PushBatch) -> Result<(), SyncError>;
}

/// reqwest-backed [`SyncTransport`].
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    server_url: String,
    api_key: Option<String>,
}

impl HttpTransport {
    pub fn new(server_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            server_url: server_url.into(),
            api_key,
        }
    }

    /// Creates a transport from config.
    ///
    /// Returns an error if no server URL is configured.
    pub fn from_config(config: &SyncConfig) -> Result<Self, SyncError> {
        let server_url = config
            .server_url
            .clone()
            .ok_or(SyncError::NotConfigured)?;
        Ok(Self::new(server_url, config.api_key.clone()))
    }

    /// Returns the full sync endpoint URL.
    pub fn endpoint(&self) -> String {
        let base = if self.server_url.starts_with("http://") || self.server_url.starts_with("https://")
        {
            self.server_url.clone()
        } else {
            format!("http://{}", self.server_url)
        };
        format!("{}/sync", base.trim_end_matches('/'))
    }

    fn request(&self, method: reqwest::Method) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, self.endpoint());
        match &self.api_key {
            Some(key) => builder.query(&[("key", key)]),
            None => builder,
        }
    }

    async fn send(builder: reqwest::RequestBuilder) -> Result<reqwest::Response, SyncError> {
        let response = builder.send().await?;
        if !response.status().is_success() {
            return Err(SyncError::RemoteFetch(format!(
                "Server returned status {}",
                response.status()
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl SyncTransport for HttpTransport {
    async fn fetch_schema(&self) -> Result<String, SyncError> {
        let response = Self::send(self.request(reqwest::Method::GET)).await?;
        Ok(response.text().await?)
    }

    async fn fetch_page(
        &self,
        table: &str,
        limit: usize,
        after: Option<&str>,
    ) -> Result<PullPage, SyncError> {
        let limit = limit.to_string();
        let mut builder = self
            .request(reqwest::Method::GET)
            .query(&[("table", table), ("limit", limit.as_str())]);
        if let Some(after) = after {
            builder = builder.query(&[("after", after)]);
        }

        let response = Self::send(builder).await?;
        Ok(response.json().await?)
    }

    async fn push(&self, table: &str, batch: &PushBatch) -> Result<(), SyncError> {
        let builder = self
            .request(reqwest::Method::POST)
            .query(&[("table", table)])
            .json(batch);
        Self::send(builder).await?;
        Ok(())
    }
}
