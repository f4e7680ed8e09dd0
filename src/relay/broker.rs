//! Single-peer broker: the relay's dispatch surface.
//!
//! The broker owns one slot for the active peer connection. Dispatching a
//! call when the slot is empty fails fast with `NoPeerConnection` and sends
//! nothing anywhere. A newly attached connection supersedes the previous
//! one through an explicit [`RelayBroker::supersede`]; superseding does not
//! close the old socket — peer-initiated close remains the only cleanup
//! trigger on that side, and the old link's pending calls fail through its
//! own close path.

// ============================================================================
// Imports
// ============================================================================

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::RwLock;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::peer::tabs::TabNotification;
use crate::protocol::RequestEnvelope;

use super::link::{LinkId, PeerLink};

// ============================================================================
// Constants
// ============================================================================

/// Default per-call reply timeout (30s).
pub const CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Buffered tab notifications per subscriber.
const NOTIFICATION_BUFFER: usize = 64;

// ============================================================================
// RelayBroker
// ============================================================================

/// Maps calls from the tool-calling client onto the single active peer.
pub struct RelayBroker {
    /// Per-call reply timeout.
    call_timeout: Duration,

    /// The active peer, exclusively owned and replaced on takeover.
    active: RwLock<Option<PeerLink>>,

    /// Fan-out of unsolicited tab notifications.
    notifications: broadcast::Sender<TabNotification>,

    /// Receives link ids whose event loops have ended.
    closed_tx: mpsc::UnboundedSender<LinkId>,
}

impl RelayBroker {
    /// Creates a broker with the default call timeout.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Self::with_call_timeout(CALL_TIMEOUT)
    }

    /// Creates a broker with an explicit call timeout.
    ///
    /// Tests compress the timeout through this constructor.
    #[must_use]
    pub fn with_call_timeout(call_timeout: Duration) -> Arc<Self> {
        let (closed_tx, mut closed_rx) = mpsc::unbounded_channel();
        let (notifications, _) = broadcast::channel(NOTIFICATION_BUFFER);

        let broker = Arc::new(Self {
            call_timeout,
            active: RwLock::new(None),
            notifications,
            closed_tx,
        });

        // Janitor: clear the active slot when its link dies, so later
        // dispatches fail fast instead of hitting a dead socket. Holds a
        // weak reference so the broker can be dropped.
        let weak: Weak<Self> = Arc::downgrade(&broker);
        tokio::spawn(async move {
            while let Some(link_id) = closed_rx.recv().await {
                match weak.upgrade() {
                    Some(broker) => broker.clear_if_active(link_id),
                    None => break,
                }
            }
        });

        broker
    }

    /// Wraps an accepted socket in a link and installs it as the active
    /// peer. Returns the superseded link, if any.
    pub fn attach(&self, socket: WebSocketStream<TcpStream>) -> Option<PeerLink> {
        let link = PeerLink::new(
            socket,
            self.notifications.clone(),
            self.closed_tx.clone(),
        );
        self.supersede(link)
    }

    /// Installs `link` as the active peer, returning the previous one.
    ///
    /// The old link is not closed here; whether to close it is the
    /// caller's policy decision.
    pub fn supersede(&self, link: PeerLink) -> Option<PeerLink> {
        let old = self.active.write().replace(link);
        if old.is_some() {
            info!("active peer superseded by a new connection");
        } else {
            info!("peer connected");
        }
        old
    }

    /// Returns `true` while a peer is attached.
    #[inline]
    #[must_use]
    pub fn has_peer(&self) -> bool {
        self.active.read().is_some()
    }

    /// Subscribes to unsolicited tab notifications.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<TabNotification> {
        self.notifications.subscribe()
    }

    /// Dispatches one operation to the active peer.
    ///
    /// # Errors
    ///
    /// - [`Error::NoPeerConnection`] when no peer is attached (nothing is
    ///   sent on any socket)
    /// - [`Error::PeerTimeout`] when the reply misses the call timeout
    /// - [`Error::PeerDisconnected`] when the peer drops mid-call
    /// - [`Error::MalformedPeerResponse`] when the reply fails to decode
    /// - [`Error::Peer`] when the peer reports a structured failure
    pub async fn dispatch(&self, method: &str, params: Option<Value>) -> Result<Value> {
        self.dispatch_with_timeout(method, params, self.call_timeout)
            .await
    }

    /// Dispatches with an explicit reply timeout.
    ///
    /// # Errors
    ///
    /// See [`RelayBroker::dispatch`].
    pub async fn dispatch_with_timeout(
        &self,
        method: &str,
        params: Option<Value>,
        call_timeout: Duration,
    ) -> Result<Value> {
        let link = self
            .active
            .read()
            .clone()
            .ok_or(Error::NoPeerConnection)?;

        let envelope = RequestEnvelope::new(method, params);
        debug!(id = %envelope.id, method, "dispatching call");

        let reply = link.call(envelope, call_timeout).await?;
        reply.into_result()
    }

    fn clear_if_active(&self, link_id: LinkId) {
        let mut active = self.active.write();
        if active.as_ref().is_some_and(|link| link.id() == link_id) {
            *active = None;
            info!("active peer disconnected; slot cleared");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
