//! First frame exchanged on the direct channel.
//!
//! ```text
//! client → server   {"token":"1a2b3c4d"}
//! server → client   {"status":"accepted"}
//!                   {"status":"rejected","reason":"APP_AUTH_RETRY_V1"}
//! ```
//!
//! A rejected client is disconnected right after the reply.  The reason
//! string is stable so that clients can classify it as an authentication
//! failure rather than a reachability failure.

use serde::{Deserialize, Serialize};

/// Reason sent with every credential rejection.
pub const AUTH_REJECTED_REASON: &str = "APP_AUTH_RETRY_V1";

/// The client's opening frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeRequest {
    pub token: String,
}

/// The server's answer to a [`HandshakeRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum HandshakeReply {
    Accepted,
    Rejected { reason: String },
}

impl HandshakeReply {
    /// The canonical credential rejection.
    pub fn auth_rejected() -> Self {
        Self::Rejected {
            reason: AUTH_REJECTED_REASON.to_string(),
        }
    }
}
