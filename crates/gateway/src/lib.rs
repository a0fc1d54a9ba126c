//! Transport gateways for electronic dispatch documents.
//!
//! A signed document reaches the tax authority over one of four channels:
//! directly over the authority's SOAP service, through one of two PSE
//! provider APIs, or through a generic OSE REST gateway. All of them expose
//! the same capability pair: submit a signed document, then poll for the
//! verdict and its confirmation receipt.

use async_trait::async_trait;
use gre_core::DispatchState;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

pub mod mock;
pub mod ose;
pub mod pse;
pub mod sendfact;
pub mod sunat;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("SEND - Code: {code}; Description: {message}; detalle: {}", .errors.join(" "))]
    Submission {
        code: String,
        message: String,
        errors: Vec<String>,
    },
    #[error("TICKET - Code: {code}; Description: {message}")]
    Status { code: String, message: String },
    #[error("gateway transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("malformed gateway response: {0}")]
    Malformed(String),
}

/// Acknowledgement of an accepted submission. The direct authority channel
/// issues a tracking ticket and a reception timestamp; the delegated
/// gateways acknowledge ingestion without one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitAck {
    pub ticket: Option<String>,
    pub reception_date: Option<String>,
    pub message: String,
}

/// What a poll is keyed by. The direct authority polls by ticket; the REST
/// gateways poll by canonical document filename.
#[derive(Debug, Clone)]
pub struct PollKey {
    pub filename: String,
    pub ticket: Option<String>,
}

/// Outcome of one poll. Still-processing is a recognized non-terminal
/// answer, not an error; gateway-reported failures surface as
/// [`GatewayError`].
#[derive(Debug, Clone)]
pub enum PollOutcome {
    InProcess {
        detail: String,
    },
    Completed {
        state: DispatchState,
        message: String,
        /// Receipt payload as handed over by the gateway (base64, possibly
        /// layered; see `gre_core::cdr`).
        cdr: Option<String>,
    },
}

#[async_trait]
pub trait GatewayClient: Send + Sync {
    async fn submit(&self, filename: &str, signed_xml: &[u8]) -> Result<SubmitAck, GatewayError>;
    async fn poll(&self, key: &PollKey) -> Result<PollOutcome, GatewayError>;
}

/// Send channel derived from tenant configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    DirectAuthority,
    PseGateway,
    PseGatewayAlt,
    OseGateway,
}

/// Tenant flags that drive channel selection. Evaluated fresh on every
/// call so configuration changes take effect on the next request.
#[derive(Debug, Clone, Default)]
pub struct ChannelFlags {
    pub pse_send_enabled: bool,
    pub pse_provider_id: Option<u32>,
    pub soap_send_id: String,
}

/// Provider id whose PSE integration speaks the SendFact API.
pub const PSE_PROVIDER_SENDFACT: u32 = 4;
/// Sentinel send-channel value that routes through the OSE gateway.
pub const OSE_SEND_CHANNEL: &str = "04";

pub fn select_channel(flags: &ChannelFlags) -> Channel {
    if flags.pse_send_enabled {
        if flags.pse_provider_id == Some(PSE_PROVIDER_SENDFACT) {
            Channel::PseGatewayAlt
        } else {
            Channel::PseGateway
        }
    } else if flags.soap_send_id == OSE_SEND_CHANNEL {
        Channel::OseGateway
    } else {
        Channel::DirectAuthority
    }
}

/// Turns a selected channel into a live client. The HTTP factory builds
/// real clients from endpoint configuration; tests inject scripted mocks.
/// Building a client can fail (HTTP stack initialization), so the factory
/// is fallible rather than handing out a client without its timeouts.
pub trait GatewayFactory: Send + Sync {
    fn gateway_for(&self, channel: Channel) -> Result<Arc<dyn GatewayClient>, GatewayError>;
}

#[derive(Debug, Clone)]
pub struct HttpGatewayFactory {
    pub sunat: sunat::SunatConfig,
    pub pse: pse::PseConfig,
    pub ose: ose::OseConfig,
}

impl GatewayFactory for HttpGatewayFactory {
    fn gateway_for(&self, channel: Channel) -> Result<Arc<dyn GatewayClient>, GatewayError> {
        Ok(match channel {
            Channel::DirectAuthority => sunat::SunatClient::new(self.sunat.clone())?,
            Channel::PseGateway => pse::PseClient::new(self.pse.clone())?,
            Channel::PseGatewayAlt => sendfact::SendFactClient::new(self.pse.clone())?,
            Channel::OseGateway => ose::OseClient::new(self.ose.clone())?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pse_send_wins_over_everything() {
        let flags = ChannelFlags {
            pse_send_enabled: true,
            pse_provider_id: None,
            soap_send_id: OSE_SEND_CHANNEL.to_string(),
        };
        assert_eq!(select_channel(&flags), Channel::PseGateway);
    }

    #[test]
    fn provider_four_selects_sendfact_variant() {
        let flags = ChannelFlags {
            pse_send_enabled: true,
            pse_provider_id: Some(PSE_PROVIDER_SENDFACT),
            soap_send_id: String::new(),
        };
        assert_eq!(select_channel(&flags), Channel::PseGatewayAlt);
    }

    #[test]
    fn ose_sentinel_routes_to_ose() {
        let flags = ChannelFlags {
            pse_send_enabled: false,
            pse_provider_id: Some(PSE_PROVIDER_SENDFACT),
            soap_send_id: OSE_SEND_CHANNEL.to_string(),
        };
        assert_eq!(select_channel(&flags), Channel::OseGateway);
    }

    #[test]
    fn default_is_direct_authority() {
        assert_eq!(select_channel(&ChannelFlags::default()), Channel::DirectAuthority);
    }

    #[test]
    fn http_factory_builds_a_client_for_every_channel() {
        let factory = HttpGatewayFactory {
            sunat: sunat::SunatConfig {
                base_url: "https://authority.example/service".into(),
                ruc: "20601234567".into(),
                sol_username: "MODDATOS".into(),
                sol_password: "moddatos".into(),
            },
            pse: pse::PseConfig {
                base_url: "https://pse.example".into(),
                api_key: "key".into(),
            },
            ose: ose::OseConfig {
                base_url: "https://ose.example".into(),
                client_id: "id".into(),
                client_secret: "secret".into(),
            },
        };

        for channel in [
            Channel::DirectAuthority,
            Channel::PseGateway,
            Channel::PseGatewayAlt,
            Channel::OseGateway,
        ] {
            assert!(factory.gateway_for(channel).is_ok());
        }
    }
}
