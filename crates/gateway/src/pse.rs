//! PSE provider gateway (REST). The provider ingests the signed document
//! synchronously and later serves the authority's verdict, with the receipt
//! embedded in the summary answer.

use super::{GatewayClient, GatewayError, PollKey, PollOutcome, SubmitAck};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use gre_core::DispatchState;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct PseConfig {
    pub base_url: String,
    pub api_key: String,
}

pub struct PseClient {
    config: PseConfig,
    http_client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct SendRequest {
    filename: String,
    /// Signed document, base64.
    content: String,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    success: bool,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    errors: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct SummaryResponse {
    success: bool,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    rejected: bool,
    #[serde(default)]
    cdr: Option<String>,
    #[serde(default)]
    errores: Option<Vec<String>>,
}

impl PseClient {
    pub fn new(config: PseConfig) -> Result<Arc<Self>, GatewayError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Arc::new(Self {
            config,
            http_client,
        }))
    }
}

#[async_trait]
impl GatewayClient for PseClient {
    async fn submit(&self, filename: &str, signed_xml: &[u8]) -> Result<SubmitAck, GatewayError> {
        let url = format!("{}/api/documents/send", self.config.base_url);
        let payload = SendRequest {
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

        let parsed: SendResponse = response.json().await?;
        if !parsed.success {
            return Err(GatewayError::Submission {
                code: parsed.code.unwrap_or_default(),
                message: parsed.message.unwrap_or_default(),
                errors: parsed.errors.unwrap_or_default(),
            });
        }

        tracing::info!(%filename, "document ingested by PSE gateway");
        Ok(SubmitAck {
            ticket: None,
            reception_date: None,
            message: "PSE - Se obtuvo el nro. de ticket correctamente".to_string(),
        })
    }

    async fn poll(&self, key: &PollKey) -> Result<PollOutcome, GatewayError> {
        let url = format!(
            "{}/api/documents/summary/{}",
            self.config.base_url, key.filename
        );

        let response = self
            .http_client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .send()
            .await?;

        let parsed: SummaryResponse = response.json().await?;
        if !parsed.success {
            let mut message = parsed.message.unwrap_or_default();
            if let Some(errores) = parsed.errores {
                if !errores.is_empty() {
                    message = format!("{} - {}", message, errores.join(" "));
                }
            }
            return Err(GatewayError::Status {
                code: parsed.code.unwrap_or_default(),
                message,
            });
        }

        let state = if parsed.rejected {
            DispatchState::Rejected
        } else {
            DispatchState::Accepted
        };

        tracing::info!(filename = %key.filename, state = state.code(), "PSE summary received");
        Ok(PollOutcome::Completed {
            state,
            message: format!("PSE. {}", parsed.message.unwrap_or_default()),
            cdr: parsed.cdr,
        })
    }
}
