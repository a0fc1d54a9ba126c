use serde::{Deserialize, Serialize};

/// Lifecycle state of a dispatch document, persisted as the authority's
/// two-digit state code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DispatchState {
    /// "01" - created, not yet submitted
    Pending,
    /// "03" - submitted, awaiting the authority's verdict
    Sent,
    /// "05" - accepted by the authority
    Accepted,
    /// "09" - rejected by the authority
    Rejected,
}

impl DispatchState {
    pub fn code(&self) -> &'static str {
        match self {
            DispatchState::Pending => "01",
            DispatchState::Sent => "03",
            DispatchState::Accepted => "05",
            DispatchState::Rejected => "09",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "01" => Some(DispatchState::Pending),
            "03" => Some(DispatchState::Sent),
            "05" => Some(DispatchState::Accepted),
            "09" => Some(DispatchState::Rejected),
            _ => None,
        }
    }

    /// Accepted and rejected are stable: no further transitions without an
    /// external re-submission.
    pub fn is_terminal(&self) -> bool {
        matches!(self, DispatchState::Accepted | DispatchState::Rejected)
    }
}
