//! Direct submission to the tax authority's SOAP service.

use super::{GatewayClient, GatewayError, PollKey, PollOutcome, SubmitAck};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use gre_core::DispatchState;
use std::sync::Arc;
use std::time::Duration;

/// Poll answer codes the authority returns for a ticket.
const COD_ACCEPTED: &str = "0";
const COD_IN_PROCESS: &str = "98";
const COD_REJECTED: &str = "99";

pub const MSG_IN_PROCESS: &str = "La guía aún está en proceso, vuelva a consultar.";

#[derive(Debug, Clone)]
pub struct SunatConfig {
    pub base_url: String,
    /// Taxpayer registration number, prefixed to the SOL username.
    pub ruc: String,
    pub sol_username: String,
    pub sol_password: String,
}

pub struct SunatClient {
    config: SunatConfig,
    http_client: reqwest::Client,
}

impl SunatClient {
    pub fn new(config: SunatConfig) -> Result<Arc<Self>, GatewayError> {
        // The authority's SOAP endpoint is slow under load.
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .tcp_keepalive(Duration::from_secs(60))
            .build()?;

        Ok(Arc::new(Self {
            config,
            http_client,
        }))
    }

    fn soap_security_header(&self) -> String {
        format!(
            r#"<wsse:Security xmlns:wsse="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-secext-1.0.xsd">
      <wsse:UsernameToken>
        <wsse:Username>{}{}</wsse:Username>
        <wsse:Password>{}</wsse:Password>
      </wsse:UsernameToken>
    </wsse:Security>"#,
            self.config.ruc, self.config.sol_username, self.config.sol_password
        )
    }

    fn send_envelope(&self, filename: &str, signed_xml: &[u8]) -> String {
        format!(
            r#"<?xml version="1.0" encoding="utf-8"?>
<soapenv:Envelope xmlns:soapenv="http://schemas.xmlsoap.org/soap/envelope/" xmlns:ser="http://service.sunat.gob.pe">
  <soapenv:Header>
    {}
  </soapenv:Header>
  <soapenv:Body>
    <ser:sendBill>
      <fileName>{}</fileName>
      <contentFile>{}</contentFile>
    </ser:sendBill>
  </soapenv:Body>
</soapenv:Envelope>"#,
            self.soap_security_header(),
            filename,
            STANDARD.encode(signed_xml)
        )
    }

    fn status_envelope(&self, ticket: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="utf-8"?>
<soapenv:Envelope xmlns:soapenv="http://schemas.xmlsoap.org/soap/envelope/" xmlns:ser="http://service.sunat.gob.pe">
  <soapenv:Header>
    {}
  </soapenv:Header>
  <soapenv:Body>
    <ser:getStatus>
      <ticket>{}</ticket>
    </ser:getStatus>
  </soapenv:Body>
</soapenv:Envelope>"#,
            self.soap_security_header(),
            ticket
        )
    }

    async fn soap_call(&self, action: &str, body: String) -> Result<String, GatewayError> {
        let response = self
            .http_client
            .post(&self.config.base_url)
            .header("Content-Type", "text/xml; charset=utf-8")
            .header("SOAPAction", action)
            .body(body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(GatewayError::Status {
                code: status.as_str().to_string(),
                message: detail,
            });
        }

        Ok(response.text().await?)
    }
}

/// Extract the first descendant element with the given local name. The
/// authority's responses vary in namespace prefixes, so matching is by
/// local name only.
fn descendant_text(doc: &roxmltree::Document, name: &str) -> Option<String> {
    doc.descendants()
        .find(|n| n.is_element() && n.tag_name().name() == name)
        .and_then(|n| n.text())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Fields of a getStatus answer, pulled out of the SOAP response.
#[derive(Debug, Clone, Default)]
pub struct TicketAnswer {
    pub cod_respuesta: String,
    pub ind_cdr_generado: Option<String>,
    pub arc_cdr: Option<String>,
    pub des_error: Option<String>,
}

/// Map a ticket answer to a poll outcome:
/// "0" accepted with receipt, "98" still processing (retry later, not an
/// error), "99" rejected with a receipt only when `indCdrGenerado` is "1".
pub fn map_ticket_answer(answer: &TicketAnswer) -> Result<PollOutcome, GatewayError> {
    match answer.cod_respuesta.as_str() {
        COD_IN_PROCESS => Ok(PollOutcome::InProcess {
            detail: MSG_IN_PROCESS.to_string(),
        }),
        COD_ACCEPTED => Ok(PollOutcome::Completed {
            state: DispatchState::Accepted,
            message: String::new(),
            cdr: answer.arc_cdr.clone(),
        }),
        COD_REJECTED => {
            let cdr = if answer.ind_cdr_generado.as_deref() == Some("1") {
                answer.arc_cdr.clone()
            } else {
                None
            };
            let message = answer
                .des_error
                .clone()
                .unwrap_or_else(|| "Error desconocido".to_string());
            Ok(PollOutcome::Completed {
                state: DispatchState::Rejected,
                message,
                cdr,
            })
        }
        other => Err(GatewayError::Status {
            code: other.to_string(),
            message: answer
                .des_error
                .clone()
                .unwrap_or_else(|| "Respuesta no reconocida del servicio".to_string()),
        }),
    }
}

#[async_trait]
impl GatewayClient for SunatClient {
    async fn submit(&self, filename: &str, signed_xml: &[u8]) -> Result<SubmitAck, GatewayError> {
        let body = self.send_envelope(filename, signed_xml);
        let response = self.soap_call("urn:sendBill", body).await?;

        let doc = roxmltree::Document::parse(&response)
            .map_err(|e| GatewayError::Malformed(e.to_string()))?;

        let ticket = descendant_text(&doc, "numTicket").ok_or_else(|| {
            let fault = descendant_text(&doc, "faultstring")
                .unwrap_or_else(|| "sin numTicket en la respuesta".to_string());
            GatewayError::Submission {
                code: descendant_text(&doc, "faultcode").unwrap_or_default(),
                message: fault,
                errors: Vec::new(),
            }
        })?;
        let reception_date = descendant_text(&doc, "fecRecepcion");

        tracing::info!(%filename, %ticket, "document submitted to authority");

        Ok(SubmitAck {
            message: format!("Se obtuvo el nro. de ticket correctamente. Ticket: {ticket}"),
            ticket: Some(ticket),
            reception_date,
        })
    }

    async fn poll(&self, key: &PollKey) -> Result<PollOutcome, GatewayError> {
        let ticket = key.ticket.as_deref().ok_or_else(|| GatewayError::Status {
            code: String::new(),
            message: "el documento no tiene ticket asignado".to_string(),
        })?;

        let body = self.status_envelope(ticket);
        let response = self.soap_call("urn:getStatus", body).await?;

        let doc = roxmltree::Document::parse(&response)
            .map_err(|e| GatewayError::Malformed(e.to_string()))?;

        let answer = TicketAnswer {
            cod_respuesta: descendant_text(&doc, "codRespuesta")
                .ok_or_else(|| GatewayError::Malformed("sin codRespuesta".to_string()))?,
            ind_cdr_generado: descendant_text(&doc, "indCdrGenerado"),
            arc_cdr: descendant_text(&doc, "arcCdr"),
            des_error: descendant_text(&doc, "desError"),
        };

        tracing::info!(%ticket, cod_respuesta = %answer.cod_respuesta, "ticket answer received");
        map_ticket_answer(&answer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_process_is_not_an_error() {
        let answer = TicketAnswer {
            cod_respuesta: "98".into(),
            ..Default::default()
        };
        match map_ticket_answer(&answer).unwrap() {
            PollOutcome::InProcess { detail } => assert_eq!(detail, MSG_IN_PROCESS),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn accepted_carries_receipt() {
        let answer = TicketAnswer {
            cod_respuesta: "0".into(),
            arc_cdr: Some("UEs...".into()),
            ..Default::default()
        };
        match map_ticket_answer(&answer).unwrap() {
            PollOutcome::Completed { state, cdr, .. } => {
                assert_eq!(state, DispatchState::Accepted);
                assert_eq!(cdr.as_deref(), Some("UEs..."));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn rejected_without_generated_cdr_has_no_receipt() {
        let answer = TicketAnswer {
            cod_respuesta: "99".into(),
            ind_cdr_generado: Some("0".into()),
            arc_cdr: Some("ignored".into()),
            des_error: Some("documento inválido".into()),
        };
        match map_ticket_answer(&answer).unwrap() {
            PollOutcome::Completed { state, message, cdr } => {
                assert_eq!(state, DispatchState::Rejected);
                assert_eq!(message, "documento inválido");
                assert!(cdr.is_none());
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn rejected_with_generated_cdr_keeps_it() {
        let answer = TicketAnswer {
            cod_respuesta: "99".into(),
            ind_cdr_generado: Some("1".into()),
            arc_cdr: Some("UEs...".into()),
            des_error: None,
        };
        match map_ticket_answer(&answer).unwrap() {
            PollOutcome::Completed { state, cdr, .. } => {
                assert_eq!(state, DispatchState::Rejected);
                assert!(cdr.is_some());
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn unknown_code_is_a_status_error() {
        let answer = TicketAnswer {
            cod_respuesta: "42".into(),
            ..Default::default()
        };
        match map_ticket_answer(&answer).unwrap_err() {
            GatewayError::Status { code, .. } => assert_eq!(code, "42"),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
