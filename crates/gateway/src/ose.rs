//! Generic OSE gateway. Same answer shape as the SendFact API, reached over
//! a different REST surface with per-tenant credentials.

use super::sendfact::{translate_status_code, STATUS_IN_PROCESS};
use super::{GatewayClient, GatewayError, PollKey, PollOutcome, SubmitAck};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct OseConfig {
    pub base_url: String,
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Debug, Serialize)]
struct OseSendRequest {
    filename: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct OseSendResponse {
    success: bool,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    errors: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct OseSummaryResponse {
    success: bool,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    document_status: Option<i64>,
    #[serde(default)]
    rejected: bool,
    #[serde(default)]
    cdr: Option<String>,
}

pub struct OseClient {
    config: OseConfig,
    http_client: reqwest::Client,
}

impl OseClient {
    pub fn new(config: OseConfig) -> Result<Arc<Self>, GatewayError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Arc::new(Self {
            config,
            http_client,
        }))
    }
}

/// Map a summary answer to a poll outcome. The in-process status wins over
/// a `success = false` flag, and the `rejected` flag overrides whatever the
/// numeric status code would otherwise translate to.
fn map_summary(summary: OseSummaryResponse) -> Result<PollOutcome, GatewayError> {
    let message = summary.message.unwrap_or_default();
    let document_status = summary.document_status.unwrap_or_default();

    if document_status == STATUS_IN_PROCESS {
        return Ok(PollOutcome::InProcess {
            detail: format!(
                "PSE. TICKET - Document Status: {document_status}; Message: {message}"
            ),
        });
    }

    if !summary.success {
        return Err(GatewayError::Status {
            code: summary.code.unwrap_or_default(),
            message,
        });
    }

    let state = if summary.rejected {
        gre_core::DispatchState::Rejected
    } else {
        translate_status_code(document_status, &message)
    };
    Ok(PollOutcome::Completed {
        state,
        message: format!("PSE. {message}"),
        cdr: summary.cdr,
    })
}

#[async_trait]
impl GatewayClient for OseClient {
    async fn submit(&self, filename: &str, signed_xml: &[u8]) -> Result<SubmitAck, GatewayError> {
        let url = format!("{}/ose/api/send", self.config.base_url);
        let payload = OseSendRequest {
            filename: filename.to_string(),
            content: STANDARD.encode(signed_xml),
        };

        let response = self
            .http_client
            .post(&url)
            .header("X-Client-Id", &self.config.client_id)
            .header("X-Client-Secret", &self.config.client_secret)
            .json(&payload)
            .send()
            .await?;

        let parsed: OseSendResponse = response.json().await?;
        if !parsed.success {
            return Err(GatewayError::Submission {
                code: parsed.code.unwrap_or_default(),
                message: parsed.message.unwrap_or_default(),
                errors: parsed.errors.unwrap_or_default(),
            });
        }

        tracing::info!(%filename, "document ingested by OSE gateway");
        Ok(SubmitAck {
            ticket: None,
            reception_date: None,
            message: "PSE - Se obtuvo el nro. de ticket correctamente".to_string(),
        })
    }

    async fn poll(&self, key: &PollKey) -> Result<PollOutcome, GatewayError> {
        let url = format!("{}/ose/api/summary/{}", self.config.base_url, key.filename);

        let response = self
            .http_client
            .get(&url)
            .header("X-Client-Id", &self.config.client_id)
            .header("X-Client-Secret", &self.config.client_secret)
            .send()
            .await?;

        let parsed: OseSummaryResponse = response.json().await?;
        let outcome = map_summary(parsed)?;
        match &outcome {
            PollOutcome::InProcess { .. } => {
                tracing::warn!(filename = %key.filename, "OSE document still in process");
            }
            PollOutcome::Completed { state, .. } => {
                tracing::info!(
                    filename = %key.filename,
                    state = state.code(),
                    "OSE summary received"
                );
            }
        }
        Ok(outcome)
    }
}
