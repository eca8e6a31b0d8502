//! Error taxonomy for a bridged session.
//!
//! Only the two rejection variants ever reach the client as an HTTP
//! response. Everything else is logged and the connection is dropped.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use std::fmt;

use crate::session::ClientIdentity;

/// Which side of a bridged session a transport error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Client,
    Irc,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Client => f.write_str("websocket client"),
            Endpoint::Irc => f.write_str("irc server"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("could not resolve {target}: {source}")]
    Resolution {
        target: String,
        #[source]
        source: std::io::Error,
    },

    #[error("could not connect to {target}: {source}")]
    Connect {
        target: String,
        #[source]
        source: std::io::Error,
    },

    #[error("websocket upgrade failed: {0}")]
    Upgrade(String),

    #[error("read from {endpoint} failed: {reason}")]
    Read { endpoint: Endpoint, reason: String },

    #[error("write to {endpoint} failed: {reason}")]
    Write { endpoint: Endpoint, reason: String },

    #[error("too many ongoing connections from {identity}")]
    AdmissionRejected { identity: ClientIdentity },

    #[error("origin {origin:?} is not allowed")]
    OriginRejected { origin: Option<String> },
}

impl BridgeError {
    pub fn read(endpoint: Endpoint, reason: impl fmt::Display) -> Self {
        Self::Read {
            endpoint,
            reason: reason.to_string(),
        }
    }

    pub fn write(endpoint: Endpoint, reason: impl fmt::Display) -> Self {
        Self::Write {
            endpoint,
            reason: reason.to_string(),
        }
    }
}

impl IntoResponse for BridgeError {
    fn into_response(self) -> Response {
        match self {
            BridgeError::AdmissionRejected { .. } => (
                StatusCode::FORBIDDEN,
                "403 - Too many ongoing connections from your ip",
            )
                .into_response(),
            BridgeError::OriginRejected { .. } => {
                (StatusCode::FORBIDDEN, "403 - Origin not allowed").into_response()
            }
            // No error detail goes over the wire for anything else.
            _ => StatusCode::BAD_GATEWAY.into_response(),
        }
    }
}
