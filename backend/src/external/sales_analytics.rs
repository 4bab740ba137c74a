//! Sales analytics API client
//!
//! Reads aggregated point-of-sale lines for a date window. The analytics
//! store is eventually consistent and occasionally unreachable, so every
//! failure is typed for the retry classifier.

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use serde::Deserialize;
use shared::SaleLine;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use super::retry::{classify_message, classify_status, ErrorClass};
use crate::config::AnalyticsConfig;

/// Failure talking to a sales source
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("request failed: {0}")]
    Transport(String),

    #[error("request timed out")]
    Timeout,

    #[error("status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to decode response: {0}")]
    Decode(String),
}

impl SourceError {
    pub fn classify(&self) -> ErrorClass {
        match self {
            // Requests that never got an answer are always worth another try
            SourceError::Timeout | SourceError::Transport(_) => ErrorClass::Transient,
            SourceError::Status { status, body } => match classify_status(*status) {
                ErrorClass::Transient => ErrorClass::Transient,
                ErrorClass::Terminal => classify_message(body),
            },
            SourceError::Decode(_) => ErrorClass::Terminal,
        }
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SourceError::Timeout
        } else if err.is_decode() {
            SourceError::Decode(err.to_string())
        } else {
            SourceError::Transport(err.to_string())
        }
    }
}

/// Anything that can list sale lines for a window
#[async_trait]
pub trait SalesSource: Send + Sync {
    /// Name used in logs and error messages
    fn name(&self) -> &str;

    async fn fetch_sale_lines(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        branch_id: Option<Uuid>,
    ) -> Result<Vec<SaleLine>, SourceError>;
}

/// HTTP client for the analytics API
#[derive(Clone)]
pub struct SalesAnalyticsClient {
    client: Client,
    api_key: String,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct SaleLinesResponse {
    lines: Vec<SaleLine>,
}

impl SalesAnalyticsClient {
    pub fn new(config: &AnalyticsConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn lines_url(&self, start: NaiveDate, end: NaiveDate, branch_id: Option<Uuid>) -> String {
        let mut url = format!(
            "{}/sales/lines?start_date={}&end_date={}",
            self.base_url, start, end
        );
        if let Some(branch) = branch_id {
            url.push_str(&format!("&branch_id={}", branch));
        }
        url
    }
}

#[async_trait]
impl SalesSource for SalesAnalyticsClient {
    fn name(&self) -> &str {
        "sales analytics"
    }

    async fn fetch_sale_lines(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        branch_id: Option<Uuid>,
    ) -> Result<Vec<SaleLine>, SourceError> {
        let url = self.lines_url(start, end, branch_id);

        let mut request = self.client.get(&url);
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }
        let response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(SourceError::Status { status, body });
        }

        let data: SaleLinesResponse = response.json().await?;
        tracing::debug!(
            lines = data.lines.len(),
            %start,
            %end,
            "fetched sale lines"
        );
        Ok(data.lines)
    }
}
