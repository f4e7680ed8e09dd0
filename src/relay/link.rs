//! One accepted peer connection and its event loop.
//!
//! A [`PeerLink`] exclusively owns the socket of one connected peer inside
//! a spawned task. Callers talk to the task through commands; in-flight
//! calls live in a correlation table keyed by [`CallId`], so any number of
//! calls can be outstanding and replies resolve by id, not arrival order.
//!
//! Correlation entries are removed exactly once — by the matching reply,
//! by the caller's timeout (`Forget`), or by the event loop failing all
//! pending calls when the socket dies.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::timeout;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, trace, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::identifiers::CallId;
use crate::peer::tabs::TabNotification;
use crate::protocol::{ReplyEnvelope, RequestEnvelope, WireMessage, heartbeat_ack};

// ============================================================================
// Types
// ============================================================================

/// Map of correlation ids to reply channels.
type PendingMap = FxHashMap<CallId, oneshot::Sender<Result<ReplyEnvelope>>>;

type LinkSink = SplitSink<WebSocketStream<TcpStream>, Message>;

// ============================================================================
// LinkId
// ============================================================================

/// Process-unique identity of one accepted connection.
///
/// Used to make "clear the active slot" idempotent: only the link that
/// owns the slot may clear it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LinkId(Uuid);

impl LinkId {
    fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

// ============================================================================
// LinkCommand
// ============================================================================

/// Internal commands for the event loop.
enum LinkCommand {
    /// Send a call and register its reply channel.
    Send {
        envelope: RequestEnvelope,
        reply_tx: oneshot::Sender<Result<ReplyEnvelope>>,
    },
    /// Remove a timed-out correlation entry.
    Forget(CallId),
    /// Close the socket and stop.
    Shutdown,
}

// ============================================================================
// PeerLink
// ============================================================================

/// Handle to one connected peer.
///
/// Cloneable; all clones talk to the same event-loop task. The socket
/// itself is owned by the task and never shared.
#[derive(Clone)]
pub struct PeerLink {
    id: LinkId,
    command_tx: mpsc::UnboundedSender<LinkCommand>,
    pending: Arc<Mutex<PendingMap>>,
}

impl PeerLink {
    /// Wraps an accepted socket and spawns its event loop.
    ///
    /// Tab notifications from the peer are forwarded on `notifications`;
    /// `closed_tx` receives this link's id once the event loop ends.
    pub(crate) fn new(
        socket: WebSocketStream<TcpStream>,
        notifications: broadcast::Sender<TabNotification>,
        closed_tx: mpsc::UnboundedSender<LinkId>,
    ) -> Self {
        let id = LinkId::generate();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let pending: Arc<Mutex<PendingMap>> = Arc::new(Mutex::new(PendingMap::default()));

        tokio::spawn(Self::run_event_loop(
            socket,
            command_rx,
            Arc::clone(&pending),
            notifications,
            closed_tx,
            id,
        ));

        Self {
            id,
            command_tx,
            pending,
        }
    }

    /// Returns this link's identity.
    #[inline]
    #[must_use]
    pub fn id(&self) -> LinkId {
        self.id
    }

    /// Returns the number of in-flight calls.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Sends a call and waits for its reply.
    ///
    /// # Errors
    ///
    /// - [`Error::PeerDisconnected`] if the link's event loop is gone or
    ///   the socket dies while the call is pending
    /// - [`Error::PeerTimeout`] if no reply arrives within `call_timeout`;
    ///   the correlation entry is removed so a late reply resolves nothing
    pub(crate) async fn call(
        &self,
        envelope: RequestEnvelope,
        call_timeout: Duration,
    ) -> Result<ReplyEnvelope> {
        let id = envelope.id.clone();
        let (reply_tx, reply_rx) = oneshot::channel();

        self.command_tx
            .send(LinkCommand::Send { envelope, reply_tx })
            .map_err(|_| Error::PeerDisconnected)?;

        match timeout(call_timeout, reply_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::PeerDisconnected),
            Err(_) => {
                let _ = self.command_tx.send(LinkCommand::Forget(id.clone()));
                Err(Error::peer_timeout(id, call_timeout.as_millis() as u64))
            }
        }
    }

    /// Closes the socket and stops the event loop.
    pub fn shutdown(&self) {
        let _ = self.command_tx.send(LinkCommand::Shutdown);
    }

    /// Event loop owning the socket.
    async fn run_event_loop(
        socket: WebSocketStream<TcpStream>,
        mut command_rx: mpsc::UnboundedReceiver<LinkCommand>,
        pending: Arc<Mutex<PendingMap>>,
        notifications: broadcast::Sender<TabNotification>,
        closed_tx: mpsc::UnboundedSender<LinkId>,
        link_id: LinkId,
    ) {
        let (mut ws_write, mut ws_read) = socket.split();

        loop {
            tokio::select! {
                message = ws_read.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            let reply = Self::handle_incoming(&text, &pending, &notifications);
                            if let Some(frame) = reply
                                && let Err(err) = ws_write.send(Message::Text(frame.into())).await
                            {
                                warn!(error = %err, "failed to answer peer frame");
                                break;
                            }
                        }

                        Some(Ok(Message::Close(_))) => {
                            debug!("peer closed the connection");
                            break;
                        }

                        Some(Err(err)) => {
                            error!(error = %err, "peer socket error");
                            break;
                        }

                        None => {
                            debug!("peer stream ended");
                            break;
                        }

                        // Binary, Ping, Pong handled by the protocol layer.
                        _ => {}
                    }
                }

                command = command_rx.recv() => {
                    match command {
                        Some(LinkCommand::Send { envelope, reply_tx }) => {
                            Self::handle_send(envelope, reply_tx, &mut ws_write, &pending).await;
                        }

                        Some(LinkCommand::Forget(id)) => {
                            pending.lock().remove(&id);
                            debug!(%id, "removed timed-out correlation entry");
                        }

                        Some(LinkCommand::Shutdown) => {
                            debug!("link shutdown requested");
                            let _ = ws_write.close().await;
                            break;
                        }

                        None => {
                            debug!("link command channel closed");
                            break;
                        }
                    }
                }
            }
        }

        // Strict disconnect policy: nothing pending outlives the socket.
        Self::fail_pending(&pending);
        let _ = closed_tx.send(link_id);
        debug!("link event loop terminated");
    }

    /// Handles one inbound text frame; returns a frame to send back, if any.
    fn handle_incoming(
        text: &str,
        pending: &Arc<Mutex<PendingMap>>,
        notifications: &broadcast::Sender<TabNotification>,
    ) -> Option<String> {
        match WireMessage::classify(text) {
            Ok(WireMessage::Reply(reply)) => {
                let tx = pending.lock().remove(&reply.id);
                match tx {
                    Some(tx) => {
                        let _ = tx.send(Ok(reply));
                    }
                    // A reply nobody waits for: resolved late, superseded,
                    // or an id collision (a logic error upstream).
                    None => warn!(id = %reply.id, "reply for unknown call"),
                }
                None
            }

            Ok(WireMessage::HeartbeatProbe) => Some(heartbeat_ack()),

            Ok(WireMessage::HeartbeatAck) => None,

            Ok(WireMessage::TabUpdate(notification)) => {
                // No subscribers is fine; notifications are best-effort.
                let _ = notifications.send(notification);
                None
            }

            Ok(WireMessage::Request(request)) => {
                warn!(id = %request.id, method = %request.method, "unexpected request from peer");
                None
            }

            Err(err) => {
                // Reject the matching pending call instead of letting it
                // run out its timeout, when the frame still names one.
                if let Some(id) = WireMessage::salvage_id(text)
                    && let Some(tx) = pending.lock().remove(&id)
                {
                    let _ = tx.send(Err(err));
                    return None;
                }
                warn!(error = %err, "undecodable frame from peer");
                None
            }
        }
    }

    /// Registers the correlation entry and writes the call to the socket.
    async fn handle_send(
        envelope: RequestEnvelope,
        reply_tx: oneshot::Sender<Result<ReplyEnvelope>>,
        ws_write: &mut LinkSink,
        pending: &Arc<Mutex<PendingMap>>,
    ) {
        let id = envelope.id.clone();

        let json = match serde_json::to_string(&envelope) {
            Ok(json) => json,
            Err(err) => {
                let _ = reply_tx.send(Err(Error::Json(err)));
                return;
            }
        };

        // Register before sending so a fast reply always finds its entry.
        let displaced = pending.lock().insert(id.clone(), reply_tx);
        if let Some(displaced) = displaced {
            // Correlation ids are unique by construction; a displaced entry
            // is a logic error, surfaced rather than silently dropped.
            error!(%id, "correlation id collision");
            let _ = displaced.send(Err(Error::malformed("correlation id collision")));
        }

        if let Err(err) = ws_write.send(Message::Text(json.into())).await
            && let Some(tx) = pending.lock().remove(&id)
        {
            let _ = tx.send(Err(Error::Socket(err)));
        }

        trace!(%id, "call sent to peer");
    }

    /// Fails every pending call with [`Error::PeerDisconnected`].
    fn fail_pending(pending: &Arc<Mutex<PendingMap>>) {
        let drained: Vec<_> = pending.lock().drain().collect();
        let count = drained.len();

        for (_, tx) in drained {
            let _ = tx.send(Err(Error::PeerDisconnected));
        }

        if count > 0 {
            debug!(count, "failed pending calls on disconnect");
        }
    }
}
