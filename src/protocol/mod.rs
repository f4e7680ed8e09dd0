//! Wire protocol: envelopes and the operation catalog.
//!
//! This module defines the message format exchanged between the relay and
//! the peer, plus the typed operation registry both sides validate against.
//!
//! # Protocol Overview
//!
//! | Message Type | Direction | Purpose |
//! |--------------|-----------|---------|
//! | [`RequestEnvelope`] | relay → peer | operation call |
//! | [`ReplyEnvelope`] | peer → relay | call result or structured error |
//! | heartbeat probe/ack | both | liveness, outside the call cycle |
//! | `tab_update` | peer → relay | unsolicited tab state notification |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `envelope` | Envelope structs and inbound frame classification |
//! | `operation` | Tool operations and the DOM sub-protocol |

// ============================================================================
// Submodules
// ============================================================================

/// Wire envelope types and inbound frame classification.
pub mod envelope;

/// Operation catalog: tool calls and the DOM sub-protocol.
pub mod operation;

// ============================================================================
// Re-exports
// ============================================================================

pub use envelope::{
    HEARTBEAT_METHOD, HEARTBEAT_RESPONSE, ReplyEnvelope, RequestEnvelope, TAB_UPDATE_METHOD,
    WireError, WireMessage, heartbeat_ack, heartbeat_probe, tab_update_frame,
};
pub use operation::{
    CaptureArea, CreateTabParams, DomAction, ImageFormat, Operation, OperationDescriptor,
    ScreenshotParams, descriptors,
};
