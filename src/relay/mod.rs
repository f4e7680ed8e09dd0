//! Relay side of the bridge.
//!
//! The relay accepts exactly one peer connection at a time, forwards typed
//! operation calls to it, and resolves the right pending caller when a
//! reply arrives.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐                         ┌──────────────────┐
//! │  Tool client     │   dispatch(method,..)   │  RelayBroker     │
//! │  (outer layer)   ├────────────────────────►│  ┌────────────┐  │
//! └──────────────────┘                         │  │ PeerLink   │  │
//!                                              │  │ pending:   │  │
//!          WebSocket  ◄────────────────────────┤  │ id → call  │  │
//!       localhost:8765        RelayServer      │  └────────────┘  │
//!                                              └──────────────────┘
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `broker` | Single-peer slot, dispatch, per-call timeout |
//! | `link` | One accepted connection: correlation table + event loop |
//! | `server` | Listener on the well-known port |

// ============================================================================
// Submodules
// ============================================================================

/// Single-peer broker: the relay's dispatch surface.
pub mod broker;

/// One accepted peer connection and its event loop.
pub mod link;

/// WebSocket listener for peer connections.
pub mod server;

// ============================================================================
// Re-exports
// ============================================================================

pub use broker::{CALL_TIMEOUT, RelayBroker};
pub use link::{LinkId, PeerLink};
pub use server::{DEFAULT_PORT, RelayServer};
