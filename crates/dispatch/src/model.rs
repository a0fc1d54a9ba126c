use gre_core::DispatchState;
use serde::{Deserialize, Serialize};

/// One outbound shipment document and its lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dispatch {
    pub id: u64,
    /// Caller-facing correlation key, unique across the tenant.
    pub external_id: String,
    pub document_type_id: String,
    pub series: String,
    pub number: u32,
    /// Canonical document name, also the storage key.
    pub filename: String,
    /// Authority-issued tracking id; set only after a successful submit.
    pub ticket: Option<String>,
    pub reception_date: Option<String>,
    pub state: DispatchState,
    pub has_cdr: bool,
    pub qr_url: Option<String>,
}

impl Dispatch {
    pub fn number_full(&self) -> String {
        format!("{}-{}", self.series, self.number)
    }
}

/// All row mutations of one send/poll call, applied in a single atomic
/// repository write so a crash can never leave the row half-updated.
#[derive(Debug, Clone, Default)]
pub struct DispatchUpdate {
    pub ticket: Option<String>,
    pub reception_date: Option<String>,
    pub state: Option<DispatchState>,
    pub has_cdr: Option<bool>,
    /// `Some(None)` clears a previously stored URL.
    pub qr_url: Option<Option<String>>,
}

impl DispatchUpdate {
    pub fn apply(&self, row: &mut Dispatch) {
        if let Some(ticket) = &self.ticket {
            row.ticket = Some(ticket.clone());
        }
        if let Some(date) = &self.reception_date {
            row.reception_date = Some(date.clone());
        }
        if let Some(state) = self.state {
            row.state = state;
        }
        if let Some(has_cdr) = self.has_cdr {
            row.has_cdr = has_cdr;
        }
        if let Some(qr_url) = &self.qr_url {
            row.qr_url = qr_url.clone();
        }
    }
}

/// Public download endpoints for the document artifacts. The CDR link only
/// exists once a receipt has been decoded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadLinks {
    pub xml: String,
    pub pdf: String,
    pub cdr: Option<String>,
}

impl DownloadLinks {
    pub fn build(base_url: &str, dispatch: &Dispatch) -> Self {
        let base = base_url.trim_end_matches('/');
        let link = |kind: &str| format!("{}/dispatches/download/{}/{}", base, dispatch.external_id, kind);
        Self {
            xml: link("xml"),
            pdf: link("pdf"),
            cdr: dispatch.has_cdr.then(|| link("cdr")),
        }
    }
}
