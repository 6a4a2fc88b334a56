//! Collaborators outside the pipeline: invoice creation and review
//! notification. Both are HTTP webhooks when configured and log-only
//! otherwise.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use tracing::info;
use url::Url;

use crate::config::DownstreamConfig;
use crate::error::{FakturoError, Result};
use crate::models::FieldMap;

/// Extracted fields handed to invoice creation.
#[derive(Debug, Clone, Serialize)]
pub struct InvoicePayload {
    pub document_id: String,
    pub filename: String,
    pub result_id: Option<String>,
    pub fields: FieldMap,
    pub overall_confidence: Option<f64>,
    /// Set when the fields come from a completed review.
    pub reviewed_by: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReviewNotice {
    pub document_id: String,
    pub reviewer: String,
    pub corrected_fields: Vec<String>,
    pub accuracy_rating: Option<f64>,
    pub completed_at: DateTime<Utc>,
}

#[async_trait]
pub trait InvoiceSink: Send + Sync {
    async fn submit(&self, payload: &InvoicePayload) -> Result<()>;
}

#[async_trait]
pub trait ReviewNotifier: Send + Sync {
    async fn review_completed(&self, notice: &ReviewNotice) -> Result<()>;
}

#[derive(Clone)]
pub struct Downstream {
    pub invoices: Arc<dyn InvoiceSink>,
    pub reviews: Arc<dyn ReviewNotifier>,
}

impl Downstream {
    pub fn from_config(config: &DownstreamConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);

        let invoices: Arc<dyn InvoiceSink> = match &config.invoice_webhook_url {
            Some(url) => Arc::new(Webhook::new(url, timeout)?),
            None => Arc::new(LogOnly),
        };
        let reviews: Arc<dyn ReviewNotifier> = match &config.review_webhook_url {
            Some(url) => Arc::new(Webhook::new(url, timeout)?),
            None => Arc::new(LogOnly),
        };

        Ok(Self { invoices, reviews })
    }

    pub fn log_only() -> Self {
        Self {
            invoices: Arc::new(LogOnly),
            reviews: Arc::new(LogOnly),
        }
    }
}

/// POSTs JSON to a fixed URL; any non-2xx answer is an error.
pub struct Webhook {
    client: Client,
    url: Url,
}

impl Webhook {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let url = Url::parse(url)?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FakturoError::Configuration(format!("Failed to build webhook client: {e}")))?;
        Ok(Self { client, url })
    }

    async fn post<T: Serialize + Sync>(&self, body: &T) -> Result<()> {
        let response = self.client.post(self.url.clone()).json(body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(FakturoError::Downstream(format!(
                "{} answered {status}: {}",
                self.url,
                detail.chars().take(200).collect::<String>()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl InvoiceSink for Webhook {
    async fn submit(&self, payload: &InvoicePayload) -> Result<()> {
        self.post(payload).await
    }
}

#[async_trait]
impl ReviewNotifier for Webhook {
    async fn review_completed(&self, notice: &ReviewNotice) -> Result<()> {
        self.post(notice).await
    }
}

pub struct LogOnly;

#[async_trait]
impl InvoiceSink for LogOnly {
    async fn submit(&self, payload: &InvoicePayload) -> Result<()> {
        info!(
            doc_id = %payload.document_id,
            fields = payload.fields.len(),
            reviewed_by = ?payload.reviewed_by,
            "Invoice payload ready (no webhook configured)"
        );
        Ok(())
    }
}

#[async_trait]
impl ReviewNotifier for LogOnly {
    async fn review_completed(&self, notice: &ReviewNotice) -> Result<()> {
        info!(
            doc_id = %notice.document_id,
            reviewer = %notice.reviewer,
            "Review completed (no webhook configured)"
        );
        Ok(())
    }
}
