//! Chrome bridge - relay between tool-calling clients and a browser peer.
//!
//! This library connects a tool-calling client to a single remote browser
//! peer (a Chrome extension runtime) that is only reachable asynchronously
//! over a persistent WebSocket. The client issues named operations with
//! arguments; the peer executes them against live browser state (tabs,
//! DOM, cookies, extensions) and replies. The bridge correlates replies to
//! the right caller, enforces timeouts, and recovers a dropped peer
//! connection without losing the relay's own availability.
//!
//! # Architecture
//!
//! The bridge has a server half and a client half:
//!
//! - **Relay side (server)**: [`RelayServer`] accepts exactly one peer
//!   connection at a time; [`RelayBroker`] assigns each outgoing call a
//!   correlation id, keeps a pending-call table, and resolves or rejects
//!   each call on matching reply, timeout, or disconnect.
//! - **Peer side (client)**: [`PeerManager`] drives the connection state
//!   machine — connect, heartbeat, staleness detection, reconnect with
//!   bounded exponential backoff — and dispatches relay-issued operations
//!   to the DOM executor or a named browser capability.
//!
//! # Quick Start
//!
//! Relay side:
//!
//! ```no_run
//! use chrome_bridge::{RelayBroker, RelayServer, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let broker = RelayBroker::new();
//!     let server = RelayServer::bind(std::sync::Arc::clone(&broker)).await?;
//!     println!("peer endpoint: {}", server.ws_url());
//!
//!     // Once a peer connects, calls route through it.
//!     let tabs = broker.dispatch("chrome_get_all_tabs", None).await?;
//!     println!("tabs: {tabs}");
//!     Ok(())
//! }
//! ```
//!
//! Peer side, given a platform adapter implementing
//! [`BrowserCapabilities`]:
//!
//! ```ignore
//! let (handle, task) = PeerManager::spawn(PeerConfig::default(), adapter);
//! handle.mirror().apply(TabEvent::Created(tab));
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`dom`] | DOM operation executor and page documents |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`peer`] | Connection manager, tab mirror, capability seam |
//! | [`protocol`] | Wire envelopes and the operation catalog |
//! | [`relay`] | Broker, peer link and listener |

// ============================================================================
// Modules
// ============================================================================

/// DOM operation execution against parsed documents.
pub mod dom;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers for bridge entities.
///
/// Newtype wrappers prevent mixing incompatible IDs at compile time.
pub mod identifiers;

/// Peer side: connection lifecycle, tab mirror, capabilities.
pub mod peer;

/// Wire protocol message types and operation catalog.
pub mod protocol;

/// Relay side: broker, link and listener.
pub mod relay;

// ============================================================================
// Re-exports
// ============================================================================

// DOM types
pub use dom::{Page, PageHandle, execute};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{CallId, MarkerId, TabId, WindowId};

// Peer types
pub use peer::{
    Backoff, BrowserCapabilities, ConnectionState, Cookie, LoadStatus, PeerConfig, PeerHandle,
    PeerManager, TabEvent, TabMirror, TabNotification, TabSnapshot,
};

// Protocol types
pub use protocol::{
    DomAction, Operation, OperationDescriptor, ReplyEnvelope, RequestEnvelope, WireMessage,
    descriptors,
};

// Relay types
pub use relay::{DEFAULT_PORT, PeerLink, RelayBroker, RelayServer};
