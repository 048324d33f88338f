//! Error taxonomy shared by the fleet clients.
//!
//! Every error is contained to the unit of work that produced it (one poll,
//! one device connection, one pairing attempt). Callers log it and carry on
//! with whatever data they already have.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FleetError {
    /// Token grant, refresh or revocation was rejected.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Host unreachable, timeout, non-2xx status or undecodable body.
    #[error("network error: {0}")]
    Network(String),

    /// JSON-RPC failure response, handshake or authentication rejection,
    /// or a device that answered with something we could not use.
    #[error("protocol error in {method}: {message}")]
    Protocol { method: String, message: String },

    /// The device never reported a knob press within the allowed attempts.
    #[error("pairing timed out after {attempts} attempts")]
    PairingTimeout { attempts: u32 },

    /// A discovered service could not be resolved to a usable address.
    #[error("discovery error: {0}")]
    Discovery(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl FleetError {
    pub(crate) fn protocol(method: impl Into<String>, message: impl Into<String>) -> Self {
        FleetError::Protocol {
            method: method.into(),
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for FleetError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FleetError::Network(format!("request timed out: {}", err))
        } else if err.is_decode() {
            FleetError::Network(format!("malformed response: {}", err))
        } else {
            FleetError::Network(err.to_string())
        }
    }
}

impl From<std::io::Error> for FleetError {
    fn from(err: std::io::Error) -> Self {
        FleetError::Network(err.to_string())
    }
}

pub type Result<T, E = FleetError> = std::result::Result<T, E>;
