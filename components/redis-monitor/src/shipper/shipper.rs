//! Shipper - responsibility and behavior
//!
//! The Shipper takes finished [`SnapshotDocument`]s and writes each one as a
//! new record into a daily Elasticsearch index through the document API
//! (`POST /<index>/_doc`). Elasticsearch creates the index on first write and
//! assigns the document id.
//!
//! Key responsibilities:
//! - Own one HTTP client for the whole run (connection pooling, basic auth).
//! - Verify the cluster answers before any Redis target is polled, so a bad
//! URL or credential fails the run early.
//! - Surface every rejected or undelivered document as an error; there is no
//! retry at this layer.

// Local crates
use crate::{
    helpers::{load_config::ElasticsearchSettings, targets::ElasticsearchConfig},
    metrics::metrics::{
        DOCUMENTS_INDEXED_TOTAL, INDEX_DURATION_SECONDS, INDEX_FAILURES_TOTAL, observe_duration,
    },
    snapshot::snapshot::SnapshotDocument,
};

// External crates
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use std::time::{Duration, Instant};
use tracing::instrument;

/// Shipper error handling
#[derive(Debug, thiserror::Error)]
pub enum ShipperError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("Elasticsearch at {url} is unreachable: {source}")]
    Unreachable {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("Elasticsearch health check at {url} returned {status}")]
    Unhealthy { url: String, status: StatusCode },
    #[error("request to index {index} failed: {source}")]
    Request {
        index: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("index {index} rejected document with {status}: {body}")]
    Rejected {
        index: String,
        status: StatusCode,
        body: String,
    },
}

/// Acknowledgement returned by Elasticsearch for an indexed document
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct IndexReceipt {
    #[serde(rename = "_index")]
    pub index: String,
    #[serde(rename = "_id")]
    pub id: String,
    pub result: String,
}

/// Destination of snapshot documents
#[async_trait]
pub trait DocumentSink: Send + Sync {
    /// Index `document` as a new record of `index`
    async fn index_document(
        &self,
        index: &str,
        document: &SnapshotDocument,
    ) -> Result<IndexReceipt, ShipperError>;
}

/// [`DocumentSink`] writing to Elasticsearch over HTTP
#[derive(Debug)]
pub struct Shipper {
    client: Client,
    base_url: String,
    username: String,
    password: String,
}

impl Shipper {
    /// Create the HTTP client and, when enabled, run one health check
    /// (`GET /`) against the cluster.
    #[instrument(
        name = "redis_monitor_shipper::connect",
        target = "shipper::shipper::Shipper",
        skip_all,
        fields(elasticsearch_url = %config.url),
        level = "debug"
    )]
    pub async fn connect(
        config: &ElasticsearchConfig,
        settings: &ElasticsearchSettings,
    ) -> Result<Self, ShipperError> {
        let mut builder = Client::builder();
        if let Some(timeout_ms) = settings.request_timeout_ms {
            builder = builder.timeout(Duration::from_millis(timeout_ms));
        }
        let client = builder.build().map_err(ShipperError::Client)?;

        let shipper = Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
        };

        if settings.healthcheck {
            shipper
                .healthcheck(Duration::from_millis(settings.healthcheck_timeout_ms))
                .await?;
        } else {
            tracing::debug!("Elasticsearch health check disabled");
        }

        Ok(shipper)
    }

    async fn healthcheck(&self, timeout: Duration) -> Result<(), ShipperError> {
        let url = format!("{}/", self.base_url);
        let response = self
            .authorized(self.client.get(&url))
            .timeout(timeout)
            .send()
            .await
            .map_err(|source| ShipperError::Unreachable {
                url: url.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            tracing::debug!(%status, "Elasticsearch health check failed");
            return Err(ShipperError::Unhealthy { url, status });
        }

        tracing::info!("Connected to Elasticsearch");
        Ok(())
    }

    /// Basic auth is sent when either credential is set
    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        if self.username.is_empty() && self.password.is_empty() {
            request
        } else {
            request.basic_auth(&self.username, Some(&self.password))
        }
    }

    /// Release the HTTP client and its pooled connections
    pub fn stop(self) {
        tracing::debug!(elasticsearch_url = %self.base_url, "Elasticsearch client stopped");
    }
}

#[async_trait]
impl DocumentSink for Shipper {
    #[instrument(
        name = "redis_monitor_shipper::index_document",
        target = "shipper::shipper::Shipper",
        skip_all,
        fields(index = %index),
        level = "debug"
    )]
    async fn index_document(
        &self,
        index: &str,
        document: &SnapshotDocument,
    ) -> Result<IndexReceipt, ShipperError> {
        let started = Instant::now();
        let result = self.post_document(index, document).await;
        observe_duration(&INDEX_DURATION_SECONDS, started);

        match &result {
            Ok(receipt) => {
                DOCUMENTS_INDEXED_TOTAL.inc();
                tracing::debug!(
                    document_index = %receipt.index,
                    document_id = %receipt.id,
                    result = %receipt.result,
                    "Snapshot document indexed"
                );
            }
            Err(e) => {
                INDEX_FAILURES_TOTAL.inc();
                tracing::debug!(error = %e, "Failed to index snapshot document");
            }
        }
        result
    }
}

impl Shipper {
    async fn post_document(
        &self,
        index: &str,
        document: &SnapshotDocument,
    ) -> Result<IndexReceipt, ShipperError> {
        let url = format!("{}/{}/_doc", self.base_url, index);
        let request_error = |source| ShipperError::Request {
            index: index.to_string(),
            source,
        };

        let response = self
            .authorized(self.client.post(&url))
            .json(document)
            .send()
            .await
            .map_err(request_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ShipperError::Rejected {
                index: index.to_string(),
                status,
                body,
            });
        }

        response.json::<IndexReceipt>().await.map_err(request_error)
    }
}
