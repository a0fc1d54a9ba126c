//! SendFact API variant used by one PSE provider. Unlike the plain PSE
//! gateway it reports a numeric `document_status`, where 4 means "the
//! authority has not finished processing" and must short-circuit without
//! being treated as a failure.

use super::{GatewayClient, GatewayError, PollKey, PollOutcome, SubmitAck};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use gre_core::DispatchState;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

pub const STATUS_IN_PROCESS: i64 = 4;

#[derive(Debug, Serialize)]
struct SendFactRequest {
    #[serde(rename = "nombre_archivo")]
    filename: String,
    #[serde(rename = "archivo")]
    content: String,
}

#[derive(Debug, Deserialize)]
struct SendFactResponse {
    success: bool,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    errors: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct SendFactSummary {
    success: bool,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    document_status: Option<i64>,
    #[serde(default)]
    cdr: Option<String>,
}

pub struct SendFactClient {
    config: super::pse::PseConfig,
    http_client: reqwest::Client,
}

impl SendFactClient {
    pub fn new(config: super::pse::PseConfig) -> Result<Arc<Self>, GatewayError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Arc::new(Self {
            config,
            http_client,
        }))
    }
}

/// Map the SendFact `document_status` to a lifecycle state. Codes 1 and 2
/// cover received/accepted documents; 3 is a rejection. Anything else is
/// decided by the accompanying text, defaulting to accepted, which matches
/// how the provider phrases final verdicts.
pub fn translate_status_code(document_status: i64, message: &str) -> DispatchState {
    match document_status {
        1 | 2 => DispatchState::Accepted,
        3 => DispatchState::Rejected,
        _ => {
            if message.to_uppercase().contains("RECHAZ") {
                DispatchState::Rejected
            } else {
                DispatchState::Accepted
            }
        }
    }
}

/// Map a summary answer to a poll outcome. A `document_status` of 4 means
/// the authority has not finished; it wins over a `success = false` flag so
/// an in-process document is never misread as a failed query.
fn map_summary(summary: SendFactSummary) -> Result<PollOutcome, GatewayError> {
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

    let state = translate_status_code(document_status, &message);
    Ok(PollOutcome::Completed {
        state,
        message: format!("PSE. {message}"),
        cdr: summary.cdr,
    })
}

#[async_trait]
impl GatewayClient for SendFactClient {
    async fn submit(&self, filename: &str, signed_xml: &[u8]) -> Result<SubmitAck, GatewayError> {
        let url = format!("{}/api/sendfact/send", self.config.base_url);
        let payload = SendFactRequest {
            filename: filename.to_string(),
            content: STANDARD.encode(signed_xml),
        };

        let response = self
            .http_client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(&payload)
            .send()
            .await?;

        let parsed: SendFactResponse = response.json().await?;
        if !parsed.success {
            return Err(GatewayError::Submission {
                code: parsed.code.unwrap_or_default(),
                message: parsed.message.unwrap_or_default(),
                errors: parsed.errors.unwrap_or_default(),
            });
        }

        tracing::info!(%filename, "document ingested by SendFact gateway");
        Ok(SubmitAck {
            ticket: None,
            reception_date: None,
            message: "PSE - Se obtuvo el nro. de ticket correctamente".to_string(),
        })
    }

    async fn poll(&self, key: &PollKey) -> Result<PollOutcome, GatewayError> {
        let url = format!(
            "{}/api/sendfact/summary/{}",
            self.config.base_url, key.filename
        );

        let response = self
            .http_client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .send()
            .await?;

        let parsed: SendFactSummary = response.json().await?;
        let outcome = map_summary(parsed)?;
        match &outcome {
            PollOutcome::InProcess { .. } => {
                tracing::warn!(filename = %key.filename, "SendFact document still in process");
            }
            PollOutcome::Completed { state, .. } => {
                tracing::info!(
                    filename = %key.filename,
                    state = state.code(),
                    "SendFact summary received"
                );
            }
        }
        Ok(outcome)
    }
}
