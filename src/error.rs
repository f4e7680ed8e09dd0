//! Error types for the bridge.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use chrome_bridge::{Result, Error};
//!
//! async fn example(broker: &RelayBroker) -> Result<()> {
//!     let tabs = broker.dispatch("chrome_get_all_tabs", Value::Null).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Broker | [`Error::NoPeerConnection`], [`Error::PeerTimeout`], [`Error::PeerDisconnected`], [`Error::MalformedPeerResponse`], [`Error::Peer`] |
//! | Operation | [`Error::UnknownOperation`], [`Error::MissingArgument`], [`Error::InvalidArgument`] |
//! | Document | [`Error::ElementNotFound`], [`Error::RestrictedTarget`], [`Error::TabNotFound`] |
//! | Lifecycle | [`Error::ReconnectExhausted`], [`Error::Capability`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::Socket`], [`Error::ChannelClosed`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio::sync::oneshot::error::RecvError;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::identifiers::{CallId, TabId};

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging. Errors crossing
/// the wire are mapped to a numeric code via [`Error::wire_code`].
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Broker Errors
    // ========================================================================
    /// No peer is connected to the relay.
    ///
    /// Returned immediately by `dispatch` without touching any socket.
    #[error("No active peer connection")]
    NoPeerConnection,

    /// The peer did not reply to a call within its timeout window.
    #[error("Call {id} timed out after {timeout_ms}ms")]
    PeerTimeout {
        /// The correlation id that timed out.
        id: CallId,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// The peer connection dropped while a call was pending.
    #[error("Peer disconnected")]
    PeerDisconnected,

    /// A reply from the peer could not be decoded.
    #[error("Malformed peer response: {message}")]
    MalformedPeerResponse {
        /// Description of the decode failure.
        message: String,
    },

    /// The peer executed the call and reported a structured failure.
    #[error("Peer error {code}: {message}")]
    Peer {
        /// Numeric error code from the error envelope.
        code: i32,
        /// Message from the error envelope.
        message: String,
    },

    // ========================================================================
    // Operation Errors
    // ========================================================================
    /// Unknown operation or action name.
    #[error("Unknown operation: {method}")]
    UnknownOperation {
        /// The unrecognized method or action name.
        method: String,
    },

    /// A required argument field is absent.
    #[error("Missing required field `{field}` for {action}")]
    MissingArgument {
        /// The absent field.
        field: String,
        /// The operation or action the field belongs to.
        action: String,
    },

    /// An argument is present but unusable.
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        /// Description of the invalid argument.
        message: String,
    },

    // ========================================================================
    // Document Errors
    // ========================================================================
    /// A single-node lookup matched nothing.
    #[error("Element not found: {selector}")]
    ElementNotFound {
        /// CSS selector (or marker selector) used.
        selector: String,
    },

    /// DOM execution attempted against a restricted origin.
    #[error("Restricted target: {origin}")]
    RestrictedTarget {
        /// The origin where execution is disallowed.
        origin: String,
    },

    /// Tab id does not exist in the current tab state.
    #[error("Tab not found: {tab_id}")]
    TabNotFound {
        /// The missing tab id.
        tab_id: TabId,
    },

    // ========================================================================
    // Lifecycle Errors
    // ========================================================================
    /// Reconnect attempts exceeded the bound; automatic recovery halted.
    ///
    /// An external restart is required past this point.
    #[error("Reconnect halted after {attempts} failed attempts")]
    ReconnectExhausted {
        /// Number of attempts made before halting.
        attempts: u32,
    },

    /// A black-box browser capability failed.
    #[error("Capability error: {message}")]
    Capability {
        /// Description of the capability failure.
        message: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket transport error.
    #[error("Socket error: {0}")]
    Socket(#[from] WsError),

    /// Channel receive error.
    #[error("Channel closed")]
    ChannelClosed(#[from] RecvError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a peer timeout error.
    #[inline]
    pub fn peer_timeout(id: CallId, timeout_ms: u64) -> Self {
        Self::PeerTimeout { id, timeout_ms }
    }

    /// Creates a malformed peer response error.
    #[inline]
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedPeerResponse {
            message: message.into(),
        }
    }

    /// Creates a peer-reported error from an error envelope.
    #[inline]
    pub fn peer(code: i32, message: impl Into<String>) -> Self {
        Self::Peer {
            code,
            message: message.into(),
        }
    }

    /// Creates an unknown operation error.
    #[inline]
    pub fn unknown_operation(method: impl Into<String>) -> Self {
        Self::UnknownOperation {
            method: method.into(),
        }
    }

    /// Creates a missing argument error.
    #[inline]
    pub fn missing_argument(field: impl Into<String>, action: impl Into<String>) -> Self {
        Self::MissingArgument {
            field: field.into(),
            action: action.into(),
        }
    }

    /// Creates an invalid argument error.
    #[inline]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates an element not found error.
    #[inline]
    pub fn element_not_found(selector: impl Into<String>) -> Self {
        Self::ElementNotFound {
            selector: selector.into(),
        }
    }

    /// Creates a restricted target error.
    #[inline]
    pub fn restricted_target(origin: impl Into<String>) -> Self {
        Self::RestrictedTarget {
            origin: origin.into(),
        }
    }

    /// Creates a tab not found error.
    #[inline]
    pub fn tab_not_found(tab_id: TabId) -> Self {
        Self::TabNotFound { tab_id }
    }

    /// Creates a capability error.
    #[inline]
    pub fn capability(message: impl Into<String>) -> Self {
        Self::Capability {
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::PeerTimeout { .. })
    }

    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::NoPeerConnection | Self::PeerDisconnected | Self::Socket(_)
        )
    }

    /// Returns `true` if this error is recoverable.
    ///
    /// Recoverable errors may succeed on retry once a peer is (re)connected.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::NoPeerConnection
                | Self::PeerTimeout { .. }
                | Self::PeerDisconnected
                | Self::Socket(_)
        )
    }

    /// Returns the numeric code used in error envelopes.
    ///
    /// | Code | Meaning |
    /// |------|---------|
    /// | -32601 | method/action not found |
    /// | -32602 | missing or invalid arguments |
    /// | -32603 | everything else |
    #[inline]
    #[must_use]
    pub fn wire_code(&self) -> i32 {
        match self {
            Self::UnknownOperation { .. } => -32601,
            Self::MissingArgument { .. } | Self::InvalidArgument { .. } => -32602,
            Self::Peer { code, .. } => *code,
            _ => -32603,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::ErrorKind;

    #[test]
    fn test_error_display() {
        let err = Error::element_not_found("#missing");
        assert_eq!(err.to_string(), "Element not found: #missing");
    }

    #[test]
    fn test_missing_argument_names_field_and_action() {
        let err = Error::missing_argument("selector", "querySelector");
        assert_eq!(
            err.to_string(),
            "Missing required field `selector` for querySelector"
        );
    }

    #[test]
    fn test_is_timeout() {
        let timeout_err = Error::peer_timeout(CallId::from_wire("op_1"), 30_000);
        let other_err = Error::NoPeerConnection;

        assert!(timeout_err.is_timeout());
        assert!(!other_err.is_timeout());
    }

    #[test]
    fn test_is_connection_error() {
        assert!(Error::NoPeerConnection.is_connection_error());
        assert!(Error::PeerDisconnected.is_connection_error());
        assert!(!Error::unknown_operation("x").is_connection_error());
    }

    #[test]
    fn test_is_recoverable() {
        assert!(Error::PeerDisconnected.is_recoverable());
        assert!(!Error::restricted_target("chrome://settings").is_recoverable());
        assert!(!Error::ReconnectExhausted { attempts: 5 }.is_recoverable());
    }

    #[test]
    fn test_wire_codes() {
        assert_eq!(Error::unknown_operation("nope").wire_code(), -32601);
        assert_eq!(Error::missing_argument("css", "chrome_inject_css").wire_code(), -32602);
        assert_eq!(Error::invalid_argument("bad selector").wire_code(), -32602);
        assert_eq!(Error::element_not_found("#x").wire_code(), -32603);
        assert_eq!(Error::peer(-32000, "boom").wire_code(), -32000);
    }

    #[test]
    fn test_from_io_error() {
        let io_err = IoError::new(ErrorKind::NotFound, "refused");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<String>("invalid").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }
}
