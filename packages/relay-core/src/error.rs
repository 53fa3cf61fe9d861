//! Error taxonomy for the relay core.
//!
//! Errors fall into four families:
//!
//! - configuration problems, which are fatal and never retried
//! - transport and node failures, which the retry controller classifies
//! - decode failures, which the scanner converts into skipped logs
//! - double-submission risk, reported when a transaction may have been sent
//!   but its outcome is unknown

use std::fmt;

use alloy::primitives::B256;
use alloy::transports::TransportError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RelayError>;

/// Whether a failed RPC call was answered by the node or never got an answer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcErrorKind {
    /// Connection, timeout or HTTP-level failure; the node may not have seen the request
    Transport,
    /// The node answered with a JSON-RPC error
    Rejected,
}

impl fmt::Display for RpcErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RpcErrorKind::Transport => write!(f, "transport"),
            RpcErrorKind::Rejected => write!(f, "rejected"),
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum RelayError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("failed to connect to {chain}: {message}")]
    Connection { chain: String, message: String },

    #[error("rpc {kind} error: {message}")]
    Rpc { kind: RpcErrorKind, message: String },

    #[error("{operation} failed after {attempts} attempts: {last_error}")]
    TransientFailure {
        operation: String,
        attempts: u32,
        last_error: String,
    },

    #[error("failed to decode log: {0}")]
    Decode(String),

    #[error("transaction {tx_hash} may have been submitted without a receipt; verify on-chain before retrying")]
    DoubleSubmissionRisk { tx_hash: B256 },

    #[error("transaction {tx_hash} reverted")]
    Reverted { tx_hash: B256 },

    #[error("signing failed: {0}")]
    Signing(String),

    #[error("deadline exceeded during {0}")]
    DeadlineExceeded(String),

    #[error("invalid scan window: from block {from} is after to block {to}")]
    InvalidWindow { from: u64, to: u64 },

    #[error("failed to record submission: {0}")]
    Journal(String),
}

impl RelayError {
    pub fn configuration(message: impl Into<String>) -> Self {
        RelayError::Configuration(message.into())
    }

    pub fn transport(message: impl Into<String>) -> Self {
        RelayError::Rpc {
            kind: RpcErrorKind::Transport,
            message: message.into(),
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        RelayError::Rpc {
            kind: RpcErrorKind::Rejected,
            message: message.into(),
        }
    }

    /// Configuration errors abort the whole invocation
    pub fn is_fatal(&self) -> bool {
        matches!(self, RelayError::Configuration(_))
    }

    /// The node answered and refused the request
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            RelayError::Rpc {
                kind: RpcErrorKind::Rejected,
                ..
            }
        )
    }
}

impl From<TransportError> for RelayError {
    fn from(err: TransportError) -> Self {
        match err.as_error_resp() {
            Some(payload) => RelayError::rejected(format!("{} (code {})", payload.message, payload.code)),
            None => RelayError::transport(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_only_for_configuration() {
        assert!(RelayError::configuration("unknown chain").is_fatal());
        assert!(!RelayError::transport("connection reset").is_fatal());
        assert!(!RelayError::DeadlineExceeded("scan".into()).is_fatal());
    }

    #[test]
    fn test_rejection_kind() {
        assert!(RelayError::rejected("nonce too low").is_rejection());
        assert!(!RelayError::transport("timeout").is_rejection());
    }

    #[test]
    fn test_display_includes_context() {
        let err = RelayError::TransientFailure {
            operation: "eth_getLogs".into(),
            attempts: 5,
            last_error: "429 too many requests".into(),
        };
        assert_eq!(
            err.to_string(),
            "eth_getLogs failed after 5 attempts: 429 too many requests"
        );
    }
}
