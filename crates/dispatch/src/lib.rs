//! Submission and status-polling workflow for electronic dispatch
//! documents.
//!
//! `DispatchService::send` pushes a signed document through the configured
//! gateway and records the tracking ticket; `status_ticket` polls for the
//! authority's verdict, decodes the confirmation receipt when one arrives,
//! and advances the dispatch row. Receipt problems are always fail-soft:
//! the authority occasionally returns malformed or truncated payloads and
//! a later poll must be able to retry.

pub mod audit;
pub mod model;
pub mod projection;
pub mod repo;
pub mod store;

use audit::{sha256_hex, DispatchEvent, DispatchEvents};
use gateway::{
    select_channel, ChannelFlags, GatewayError, GatewayFactory, PollKey, PollOutcome,
};
use gre_core::{decode_envelope, parse_receipt, DispatchState};
use model::{Dispatch, DispatchUpdate, DownloadLinks};
use repo::{DispatchRepository, RepoError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use store::{FileKind, SignedDocumentStore, StoreError};
use thiserror::Error;

pub const MSG_BAD_EXTERNAL_ID: &str = "El external id es incorrecto";
pub const MSG_SEND_FAILED: &str = "No fue posible enviar a SUNAT";
pub const MSG_CDR_UNAVAILABLE: &str = "El CDR no pudo ser procesado";
pub const MSG_CDR_EMPTY: &str = "CDR obtenido está vacío, no se puede procesar";
pub const MSG_ALREADY_FINAL: &str = "El documento ya tiene un estado final";

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("{MSG_BAD_EXTERNAL_ID}")]
    NotFound,
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Tenant flags read fresh on every call, so a configuration change picks
/// a different gateway on the very next request.
pub trait ChannelFlagsSource: Send + Sync {
    fn current(&self) -> ChannelFlags;
}

pub struct FixedFlags(pub ChannelFlags);

impl ChannelFlagsSource for FixedFlags {
    fn current(&self) -> ChannelFlags {
        self.0.clone()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusData {
    pub number: String,
    pub filename: String,
    pub external_id: String,
    pub state_type_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub success: bool,
    pub data: Option<StatusData>,
    pub links: Option<DownloadLinks>,
    pub message: String,
}

pub struct DispatchService {
    repo: Arc<dyn DispatchRepository>,
    store: Arc<dyn SignedDocumentStore>,
    events: Arc<dyn DispatchEvents>,
    factory: Arc<dyn GatewayFactory>,
    flags: Arc<dyn ChannelFlagsSource>,
    links_base_url: String,
}

impl DispatchService {
    pub fn new(
        repo: Arc<dyn DispatchRepository>,
        store: Arc<dyn SignedDocumentStore>,
        events: Arc<dyn DispatchEvents>,
        factory: Arc<dyn GatewayFactory>,
        flags: Arc<dyn ChannelFlagsSource>,
        links_base_url: String,
    ) -> Self {
        Self {
            repo,
            store,
            events,
            factory,
            flags,
            links_base_url,
        }
    }

    /// Submit the signed document for `external_id` once. On success the
    /// ticket (when the channel issues one) and the sent state are persisted
    /// in a single atomic row write; on any failure the row is untouched.
    pub async fn send(&self, external_id: &str) -> SendResponse {
        match self.try_send(external_id).await {
            Ok(response) => response,
            Err(DispatchError::NotFound) => SendResponse {
                success: false,
                message: MSG_BAD_EXTERNAL_ID.to_string(),
            },
            Err(err) => {
                tracing::error!(%external_id, error = %err, "submission failed");
                self.events.emit(
                    &DispatchEvent::new("submission_failed", external_id)
                        .with_error(err.to_string()),
                );
                SendResponse {
                    success: false,
                    message: format!("{MSG_SEND_FAILED}: {err}"),
                }
            }
        }
    }

    async fn try_send(&self, external_id: &str) -> Result<SendResponse, DispatchError> {
        let dispatch = self
            .repo
            .find_by_external_id(external_id)?
            .ok_or(DispatchError::NotFound)?;

        let signed_xml = self.store.get_signed_xml(&dispatch.filename)?;

        let flags = self.flags.current();
        let channel = select_channel(&flags);
        tracing::info!(%external_id, filename = %dispatch.filename, ?channel, "submitting document");

        let gateway = self.factory.gateway_for(channel)?;
        let ack = gateway.submit(&dispatch.filename, &signed_xml).await?;

        let update = DispatchUpdate {
            ticket: ack.ticket.clone(),
            reception_date: ack.reception_date.clone(),
            state: Some(DispatchState::Sent),
            ..Default::default()
        };
        self.repo.update(external_id, &update)?;

        let mut event = DispatchEvent::new("dispatch_submitted", external_id)
            .with_filename(&dispatch.filename)
            .with_state(DispatchState::Sent.code())
            .with_hash(sha256_hex(&signed_xml));
        if let Some(ticket) = &ack.ticket {
            event = event.with_ticket(ticket);
            tracing::info!(%external_id, %ticket, "ticket recorded");
        }
        self.events.emit(&event);

        Ok(SendResponse {
            success: true,
            message: ack.message,
        })
    }

    /// Poll the gateway for the authority's verdict on `external_id`. A
    /// still-processing answer returns `success = false` with the row
    /// untouched; a terminal answer decodes the receipt, persists the new
    /// state atomically and reports the resulting payload.
    pub async fn status_ticket(&self, external_id: &str, simple_result: bool) -> StatusResponse {
        match self.try_status(external_id, simple_result).await {
            Ok(response) => response,
            Err(DispatchError::NotFound) => StatusResponse {
                success: false,
                data: None,
                links: None,
                message: MSG_BAD_EXTERNAL_ID.to_string(),
            },
            Err(err) => {
                tracing::error!(%external_id, error = %err, "status query failed");
                self.events.emit(
                    &DispatchEvent::new("status_query_failed", external_id)
                        .with_error(err.to_string()),
                );
                StatusResponse {
                    success: false,
                    data: None,
                    links: None,
                    message: err.to_string(),
                }
            }
        }
    }

    async fn try_status(
        &self,
        external_id: &str,
        simple_result: bool,
    ) -> Result<StatusResponse, DispatchError> {
        let dispatch = self
            .repo
            .find_by_external_id(external_id)?
            .ok_or(DispatchError::NotFound)?;

        // Accepted/rejected dispatches are stable; answer from the row
        // instead of bothering the gateway again.
        if dispatch.state.is_terminal() {
            tracing::info!(%external_id, state = dispatch.state.code(), "dispatch already in a final state");
            return Ok(StatusResponse {
                success: true,
                data: Some(Self::status_data(&dispatch)),
                links: (!simple_result).then(|| self.links_for(&dispatch)),
                message: MSG_ALREADY_FINAL.to_string(),
            });
        }

        let flags = self.flags.current();
        let channel = select_channel(&flags);
        tracing::info!(%external_id, filename = %dispatch.filename, ?channel, "querying document status");

        let gateway = self.factory.gateway_for(channel)?;
        let key = PollKey {
            filename: dispatch.filename.clone(),
            ticket: dispatch.ticket.clone(),
        };

        let outcome = match gateway.poll(&key).await {
            Ok(outcome) => outcome,
            // A failure reported by the gateway itself is a soft answer:
            // the caller still gets the document data alongside the message.
            Err(err @ GatewayError::Status { .. }) => {
                tracing::warn!(%external_id, error = %err, "gateway reported a failed status query");
                self.events.emit(
                    &DispatchEvent::new("status_query_failed", external_id)
                        .with_filename(&dispatch.filename)
                        .with_error(err.to_string()),
                );
                return Ok(StatusResponse {
                    success: false,
                    data: Some(Self::status_data(&dispatch)),
                    links: None,
                    message: err.to_string(),
                });
            }
            Err(err) => return Err(err.into()),
        };

        match outcome {
            PollOutcome::InProcess { detail } => {
                tracing::info!(%external_id, "document still in process");
                self.events
                    .emit(&DispatchEvent::new("status_in_process", external_id));
                Ok(StatusResponse {
                    success: false,
                    data: Some(Self::status_data(&dispatch)),
                    links: None,
                    message: detail,
                })
            }
            PollOutcome::Completed {
                state,
                message,
                cdr,
            } => {
                self.finish_poll(external_id, &dispatch, state, message, cdr, simple_result)
                    .await
            }
        }
    }

    async fn finish_poll(
        &self,
        external_id: &str,
        dispatch: &Dispatch,
        state: DispatchState,
        message: String,
        cdr: Option<String>,
        simple_result: bool,
    ) -> Result<StatusResponse, DispatchError> {
        let mut final_message = message;
        let mut has_cdr = false;
        let mut qr_url = None;

        if let Some(cdr_b64) = cdr {
            // Archive the payload exactly as received before any decoding,
            // so an undecodable receipt can still be inspected later.
            self.store
                .upload_raw(&dispatch.filename, cdr_b64.as_bytes(), FileKind::CdrBase64)?;

            let decoded = match decode_envelope(cdr_b64.as_bytes()) {
                Ok(decoded) => decoded,
                Err(err) => {
                    tracing::error!(
                        %external_id,
                        filename = %dispatch.filename,
                        error = %err,
                        "receipt envelope could not be decoded"
                    );
                    self.events.emit(
                        &DispatchEvent::new("cdr_decode_failed", external_id)
                            .with_filename(&dispatch.filename)
                            .with_error(err.to_string()),
                    );
                    return Ok(self.cdr_failure(dispatch, format!("{MSG_CDR_UNAVAILABLE}: {err}")));
                }
            };
            tracing::info!(
                %external_id,
                method = ?decoded.method,
                bytes = decoded.xml.len(),
                "receipt envelope decoded"
            );

            self.store.upload_cdr(&dispatch.filename, &decoded.xml)?;
            let stored = self.store.get_cdr(&dispatch.filename)?.unwrap_or_default();
            if stored.is_empty() {
                tracing::error!(%external_id, filename = %dispatch.filename, "stored receipt is empty");
                return Ok(self.cdr_failure(dispatch, MSG_CDR_EMPTY.to_string()));
            }

            let receipt = match parse_receipt(&stored) {
                Some(receipt) => receipt,
                None => {
                    tracing::error!(
                        %external_id,
                        filename = %dispatch.filename,
                        bytes = stored.len(),
                        "receipt XML could not be parsed"
                    );
                    self.events.emit(
                        &DispatchEvent::new("cdr_parse_failed", external_id)
                            .with_filename(&dispatch.filename),
                    );
                    return Ok(self.cdr_failure(dispatch, MSG_CDR_UNAVAILABLE.to_string()));
                }
            };

            has_cdr = true;
            qr_url = receipt.qr_url.clone();
            if let Some(receipt_message) = receipt.message {
                final_message = receipt_message;
            }
        }

        let update = DispatchUpdate {
            state: Some(state),
            has_cdr: Some(has_cdr),
            qr_url: Some(qr_url),
            ..Default::default()
        };
        let row = self.repo.update(external_id, &update)?;

        self.events.emit(
            &DispatchEvent::new("status_updated", external_id)
                .with_filename(&row.filename)
                .with_state(row.state.code()),
        );
        tracing::info!(%external_id, state = row.state.code(), has_cdr, "dispatch state updated");

        Ok(StatusResponse {
            success: true,
            data: Some(Self::status_data(&row)),
            links: (!simple_result).then(|| self.links_for(&row)),
            message: final_message,
        })
    }

    /// Fail-soft answer for an unusable receipt: the row keeps its current
    /// state so a later poll can retry the whole decode.
    fn cdr_failure(&self, dispatch: &Dispatch, message: String) -> StatusResponse {
        StatusResponse {
            success: false,
            data: Some(Self::status_data(dispatch)),
            links: None,
            message,
        }
    }

    fn status_data(dispatch: &Dispatch) -> StatusData {
        StatusData {
            number: dispatch.number_full(),
            filename: dispatch.filename.clone(),
            external_id: dispatch.external_id.clone(),
            state_type_id: dispatch.state.code().to_string(),
        }
    }

    fn links_for(&self, dispatch: &Dispatch) -> DownloadLinks {
        DownloadLinks::build(&self.links_base_url, dispatch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use audit::NoopEvents;
    use base64::{engine::general_purpose::STANDARD, Engine};
    use gateway::mock::{MockGateway, MockGatewayFactory};
    use gateway::SubmitAck;
    use repo::MemoryRepository;
    use store::MemoryStore;

    const RECEIPT_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<ar:ApplicationResponse
    xmlns:ar="urn:oasis:names:specification:ubl:schema:xsd:ApplicationResponse-2"
    xmlns:cac="urn:oasis:names:specification:ubl:schema:xsd:CommonAggregateComponents-2"
    xmlns:cbc="urn:oasis:names:specification:ubl:schema:xsd:CommonBasicComponents-2">
  <cac:DocumentResponse>
    <cac:Response>
      <cbc:ResponseCode>0</cbc:ResponseCode>
      <cbc:Description>La Guia ha sido aceptada</cbc:Description>
    </cac:Response>
    <cac:DocumentReference>
      <cbc:DocumentDescription>https://e.example.gob/verify?id=T001-123</cbc:DocumentDescription>
    </cac:DocumentReference>
  </cac:DocumentResponse>
</ar:ApplicationResponse>"#;

    struct Harness {
        service: DispatchService,
        repo: Arc<MemoryRepository>,
        store: Arc<MemoryStore>,
        gateway: Arc<MockGateway>,
    }

    fn harness() -> Harness {
        let repo = Arc::new(MemoryRepository::new());
        let store = Arc::new(MemoryStore::new());
        let gateway = MockGateway::new();
        let factory = MockGatewayFactory::new(Arc::clone(&gateway));
        let service = DispatchService::new(
            Arc::clone(&repo) as Arc<dyn DispatchRepository>,
            Arc::clone(&store) as Arc<dyn SignedDocumentStore>,
            Arc::new(NoopEvents),
            factory,
            Arc::new(FixedFlags(ChannelFlags::default())),
            "http://host".to_string(),
        );
        Harness {
            service,
            repo,
            store,
            gateway,
        }
    }

    fn seed(h: &Harness, external_id: &str, state: DispatchState, ticket: Option<&str>) {
        let row = Dispatch {
            id: 1,
            external_id: external_id.into(),
            document_type_id: "09".into(),
            series: "T001".into(),
            number: 123,
            filename: "20601234567-09-T001-123".into(),
            ticket: ticket.map(String::from),
            reception_date: None,
            state,
            has_cdr: false,
            qr_url: None,
        };
        h.repo.insert(&row).unwrap();
        h.store
            .put(&row.filename, b"<signed/>", FileKind::SignedXml);
    }

    #[tokio::test]
    async fn send_with_unknown_external_id_reports_and_writes_nothing() {
        let h = harness();
        let response = h.service.send("missing").await;
        assert!(!response.success);
        assert_eq!(response.message, MSG_BAD_EXTERNAL_ID);
        assert_eq!(h.gateway.submit_calls(), 0);
        assert!(h.repo.list().unwrap().is_empty());
    }

    #[tokio::test]
    async fn send_persists_ticket_and_sent_state() {
        let h = harness();
        seed(&h, "ext-1", DispatchState::Pending, None);
        h.gateway.push_submit(Ok(SubmitAck {
            ticket: Some("1609".into()),
            reception_date: Some("2026-08-30T10:00:00".into()),
            message: "Se obtuvo el nro. de ticket correctamente. Ticket: 1609".into(),
        }));

        let response = h.service.send("ext-1").await;
        assert!(response.success);
        assert!(response.message.contains("1609"));

        let row = h.repo.find_by_external_id("ext-1").unwrap().unwrap();
        assert_eq!(row.state, DispatchState::Sent);
        assert_eq!(row.ticket.as_deref(), Some("1609"));
        assert_eq!(row.reception_date.as_deref(), Some("2026-08-30T10:00:00"));
    }

    #[tokio::test]
    async fn failed_submission_leaves_the_row_untouched() {
        let h = harness();
        seed(&h, "ext-1", DispatchState::Pending, None);
        h.gateway.push_submit(Err(GatewayError::Submission {
            code: "2335".into(),
            message: "documento duplicado".into(),
            errors: vec!["serie ya registrada".into()],
        }));

        let response = h.service.send("ext-1").await;
        assert!(!response.success);
        assert!(response.message.contains("2335"));
        assert!(response.message.contains("serie ya registrada"));

        let row = h.repo.find_by_external_id("ext-1").unwrap().unwrap();
        assert_eq!(row.state, DispatchState::Pending);
        assert!(row.ticket.is_none());
    }

    #[tokio::test]
    async fn still_processing_answer_does_not_mutate_state_and_is_idempotent() {
        let h = harness();
        seed(&h, "ext-1", DispatchState::Sent, Some("1609"));
        for _ in 0..2 {
            h.gateway.push_poll(Ok(PollOutcome::InProcess {
                detail: "La guía aún está en proceso, vuelva a consultar.".into(),
            }));
        }

        let first = h.service.status_ticket("ext-1", false).await;
        let second = h.service.status_ticket("ext-1", false).await;

        for response in [&first, &second] {
            assert!(!response.success);
            let data = response.data.as_ref().unwrap();
            assert_eq!(data.state_type_id, "03");
            assert_eq!(data.number, "T001-123");
        }
        assert_eq!(first.data, second.data);
        assert_eq!(first.message, second.message);

        let row = h.repo.find_by_external_id("ext-1").unwrap().unwrap();
        assert_eq!(row.state, DispatchState::Sent);
        assert!(!row.has_cdr);
    }

    #[tokio::test]
    async fn accepted_with_receipt_updates_state_cdr_and_qr_url() {
        let h = harness();
        seed(&h, "ext-1", DispatchState::Sent, Some("1609"));
        h.gateway.push_poll(Ok(PollOutcome::Completed {
            state: DispatchState::Accepted,
            message: String::new(),
            cdr: Some(STANDARD.encode(RECEIPT_XML)),
        }));

        let response = h.service.status_ticket("ext-1", false).await;
        assert!(response.success);
        assert_eq!(response.message, "La Guia ha sido aceptada");

        let data = response.data.unwrap();
        assert_eq!(data.state_type_id, "05");

        let links = response.links.unwrap();
        assert!(links.cdr.is_some());

        let row = h.repo.find_by_external_id("ext-1").unwrap().unwrap();
        assert_eq!(row.state, DispatchState::Accepted);
        assert!(row.has_cdr);
        assert_eq!(
            row.qr_url.as_deref(),
            Some("https://e.example.gob/verify?id=T001-123")
        );

        // both artifacts archived: the payload as received, and the XML
        assert!(h
            .store
            .get(&row.filename, FileKind::CdrBase64)
            .is_some());
        assert_eq!(
            h.store.get(&row.filename, FileKind::Cdr).unwrap(),
            RECEIPT_XML.as_bytes()
        );
    }

    #[tokio::test]
    async fn undecodable_receipt_fails_soft_and_keeps_state() {
        let h = harness();
        seed(&h, "ext-1", DispatchState::Sent, Some("1609"));
        h.gateway.push_poll(Ok(PollOutcome::Completed {
            state: DispatchState::Accepted,
            message: "aceptado".into(),
            cdr: Some(STANDARD.encode([0x00u8, 0x01, 0xff, 0xfe])),
        }));

        let response = h.service.status_ticket("ext-1", false).await;
        assert!(!response.success);
        assert!(response.message.starts_with(MSG_CDR_UNAVAILABLE));

        let row = h.repo.find_by_external_id("ext-1").unwrap().unwrap();
        assert_eq!(row.state, DispatchState::Sent);
        assert!(!row.has_cdr);
        assert!(row.qr_url.is_none());
    }

    #[tokio::test]
    async fn gateway_reported_failure_keeps_the_document_data() {
        let h = harness();
        seed(&h, "ext-1", DispatchState::Sent, Some("1609"));
        h.gateway.push_poll(Err(GatewayError::Status {
            code: "500".into(),
            message: "servicio no disponible".into(),
        }));

        let response = h.service.status_ticket("ext-1", false).await;
        assert!(!response.success);
        assert!(response.message.contains("servicio no disponible"));

        // soft failure: the document block is still part of the answer
        let data = response.data.unwrap();
        assert_eq!(data.external_id, "ext-1");
        assert_eq!(data.state_type_id, "03");

        let row = h.repo.find_by_external_id("ext-1").unwrap().unwrap();
        assert_eq!(row.state, DispatchState::Sent);
    }

    #[tokio::test]
    async fn terminal_dispatch_short_circuits_without_polling() {
        let h = harness();
        seed(&h, "ext-1", DispatchState::Accepted, Some("1609"));

        let response = h.service.status_ticket("ext-1", false).await;
        assert!(response.success);
        assert_eq!(response.message, MSG_ALREADY_FINAL);
        assert_eq!(response.data.unwrap().state_type_id, "05");
        assert_eq!(h.gateway.poll_calls(), 0);
    }

    #[tokio::test]
    async fn simple_result_omits_links() {
        let h = harness();
        seed(&h, "ext-1", DispatchState::Sent, Some("1609"));
        h.gateway.push_poll(Ok(PollOutcome::Completed {
            state: DispatchState::Accepted,
            message: "aceptado".into(),
            cdr: Some(STANDARD.encode(RECEIPT_XML)),
        }));

        let response = h.service.status_ticket("ext-1", true).await;
        assert!(response.success);
        assert!(response.links.is_none());
        assert!(response.data.is_some());
    }

    #[tokio::test]
    async fn rejection_without_receipt_still_advances_state() {
        let h = harness();
        seed(&h, "ext-1", DispatchState::Sent, Some("1609"));
        h.gateway.push_poll(Ok(PollOutcome::Completed {
            state: DispatchState::Rejected,
            message: "documento inválido".into(),
            cdr: None,
        }));

        let response = h.service.status_ticket("ext-1", false).await;
        assert!(response.success);
        assert_eq!(response.message, "documento inválido");
        assert_eq!(response.data.unwrap().state_type_id, "09");

        let row = h.repo.find_by_external_id("ext-1").unwrap().unwrap();
        assert_eq!(row.state, DispatchState::Rejected);
        assert!(!row.has_cdr);
        // no receipt means no cdr download link
        assert!(response.links.unwrap().cdr.is_none());
    }
}
