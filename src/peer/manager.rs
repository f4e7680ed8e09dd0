//! Peer-side connection lifecycle and operation dispatch.
//!
//! The manager owns the single outbound socket to the relay and drives one
//! explicit state machine:
//!
//! ```text
//! Disconnected ──connect──► Connecting ──open──► Connected
//!      ▲                        │                   │
//!      │                     refused          close / error /
//!      └───── backoff ◄─────────┴──────── missed heartbeat ack
//! ```
//!
//! Reconnects are scheduled with exponential backoff and a hard attempt
//! bound; exceeding the bound halts the manager until an external restart.
//! While connected, the manager answers heartbeats, executes relay-issued
//! operations and forwards tab notifications.

// ============================================================================
// Imports
// ============================================================================

use std::future::pending;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, Sleep, interval_at, sleep};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, error, info, warn};

use crate::dom::executor;
use crate::error::{Error, Result};
use crate::protocol::{
    Operation, ReplyEnvelope, RequestEnvelope, WireMessage, heartbeat_ack, heartbeat_probe,
    tab_update_frame,
};
use crate::relay::DEFAULT_PORT;

use super::backoff::{self, Backoff};
use super::capabilities::BrowserCapabilities;
use super::tabs::{TabEvent, TabMirror, TabNotification};

// ============================================================================
// Constants
// ============================================================================

/// Interval between heartbeat probes (30s).
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Deadline for a heartbeat acknowledgment (10s).
pub const HEARTBEAT_DEADLINE: Duration = Duration::from_secs(10);

/// Interval of the coarse socket liveness probe.
pub const LIVENESS_INTERVAL: Duration = Duration::from_secs(60);

// ============================================================================
// Types
// ============================================================================

type PeerSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type PeerSink = SplitSink<PeerSocket, Message>;

// ============================================================================
// PeerConfig
// ============================================================================

/// Tunable parameters of the connection manager.
///
/// Defaults are the production values; tests compress them.
#[derive(Debug, Clone)]
pub struct PeerConfig {
    /// Relay WebSocket URL.
    pub relay_url: String,
    /// Interval between heartbeat probes.
    pub heartbeat_interval: Duration,
    /// Deadline for a heartbeat acknowledgment.
    pub heartbeat_deadline: Duration,
    /// Interval of the coarse liveness probe.
    pub liveness_interval: Duration,
    /// Delay before the first reconnect attempt.
    pub backoff_base: Duration,
    /// Upper bound on any reconnect delay.
    pub backoff_cap: Duration,
    /// Reconnect attempts before halting.
    pub max_reconnect_attempts: u32,
}

impl PeerConfig {
    /// Creates a config for the given relay URL with default timings.
    #[must_use]
    pub fn new(relay_url: impl Into<String>) -> Self {
        Self {
            relay_url: relay_url.into(),
            heartbeat_interval: HEARTBEAT_INTERVAL,
            heartbeat_deadline: HEARTBEAT_DEADLINE,
            liveness_interval: LIVENESS_INTERVAL,
            backoff_base: backoff::BASE_DELAY,
            backoff_cap: backoff::MAX_DELAY,
            max_reconnect_attempts: backoff::MAX_ATTEMPTS,
        }
    }
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self::new(format!("ws://127.0.0.1:{DEFAULT_PORT}"))
    }
}

// ============================================================================
// ConnectionState
// ============================================================================

/// The single authoritative connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No socket; possibly waiting out a backoff delay.
    Disconnected,
    /// Connection attempt in flight.
    Connecting,
    /// Socket open, heartbeat cycle running.
    Connected,
}

// ============================================================================
// ConnectionEnd
// ============================================================================

/// Why a connected session ended.
enum ConnectionEnd {
    /// Shutdown was requested; no reconnect.
    Shutdown,
    /// Remote closed the socket.
    Closed,
    /// Heartbeat ack deadline elapsed; socket torn down without close.
    Stale,
    /// Socket error.
    Failed(Error),
}

// ============================================================================
// PeerHandle
// ============================================================================

/// External handle to a running [`PeerManager`].
///
/// Dropping the handle requests shutdown, the same as calling
/// [`PeerHandle::shutdown`].
pub struct PeerHandle {
    mirror: Arc<TabMirror>,
    state_rx: watch::Receiver<ConnectionState>,
    shutdown_tx: watch::Sender<bool>,
}

impl PeerHandle {
    /// The tab mirror; the platform adapter feeds lifecycle events here.
    #[inline]
    #[must_use]
    pub fn mirror(&self) -> &Arc<TabMirror> {
        &self.mirror
    }

    /// Current connection state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// A receiver that observes every state transition.
    #[inline]
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Requests deterministic shutdown: the socket is closed and every
    /// timer is dropped with the connection-driving future.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

// ============================================================================
// PeerManager
// ============================================================================

/// Drives the peer side of the bridge.
pub struct PeerManager {
    config: PeerConfig,
    context: DispatchContext,
    notifications: mpsc::UnboundedReceiver<TabNotification>,
    state_tx: watch::Sender<ConnectionState>,
    shutdown_rx: watch::Receiver<bool>,
}

impl PeerManager {
    /// Creates a manager and its external handle.
    #[must_use]
    pub fn new(
        config: PeerConfig,
        capabilities: Arc<dyn BrowserCapabilities>,
    ) -> (Self, PeerHandle) {
        let (mirror, notifications) = TabMirror::new();
        let mirror = Arc::new(mirror);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let manager = Self {
            config,
            context: DispatchContext {
                capabilities,
                mirror: Arc::clone(&mirror),
            },
            notifications,
            state_tx,
            shutdown_rx,
        };
        let handle = PeerHandle {
            mirror,
            state_rx,
            shutdown_tx,
        };
        (manager, handle)
    }

    /// Creates a manager and spawns its run loop.
    #[must_use]
    pub fn spawn(
        config: PeerConfig,
        capabilities: Arc<dyn BrowserCapabilities>,
    ) -> (PeerHandle, JoinHandle<Result<()>>) {
        let (manager, handle) = Self::new(config, capabilities);
        (handle, tokio::spawn(manager.run()))
    }

    /// Runs the connection state machine to completion.
    ///
    /// Resolves `Ok(())` on requested shutdown.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ReconnectExhausted`] once the attempt bound is
    /// exceeded; no further connection attempt happens after that.
    pub async fn run(mut self) -> Result<()> {
        let mut backoff = Backoff::with_limits(
            self.config.backoff_base,
            self.config.backoff_cap,
            self.config.max_reconnect_attempts,
        );

        loop {
            if *self.shutdown_rx.borrow() {
                return Ok(());
            }

            self.set_state(ConnectionState::Connecting);
            match connect_async(self.config.relay_url.as_str()).await {
                Ok((socket, _response)) => {
                    info!(url = %self.config.relay_url, "connected to relay");
                    backoff.reset();
                    self.set_state(ConnectionState::Connected);

                    let end = Self::drive(
                        socket,
                        &self.config,
                        &self.context,
                        &mut self.notifications,
                        &mut self.shutdown_rx,
                    )
                    .await;
                    self.set_state(ConnectionState::Disconnected);

                    match end {
                        ConnectionEnd::Shutdown => return Ok(()),
                        ConnectionEnd::Closed => debug!("relay closed the connection"),
                        ConnectionEnd::Stale => {
                            warn!("heartbeat ack deadline missed; connection torn down");
                        }
                        ConnectionEnd::Failed(err) => warn!(error = %err, "socket failure"),
                    }
                }
                Err(err) => {
                    self.set_state(ConnectionState::Disconnected);
                    warn!(url = %self.config.relay_url, error = %err, "connect failed");
                }
            }

            let Some(delay) = backoff.next_delay() else {
                error!(
                    attempts = self.config.max_reconnect_attempts,
                    "reconnect attempts exhausted; halting until external restart"
                );
                return Err(Error::ReconnectExhausted {
                    attempts: self.config.max_reconnect_attempts,
                });
            };
            debug!(
                attempt = backoff.attempt(),
                delay_ms = delay.as_millis() as u64,
                "reconnect scheduled"
            );

            tokio::select! {
                () = sleep(delay) => {}
                _ = self.shutdown_rx.changed() => return Ok(()),
            }
        }
    }

    fn set_state(&self, state: ConnectionState) {
        let _ = self.state_tx.send(state);
    }

    /// Drives one connected session until it ends.
    ///
    /// All session timers (heartbeat interval, ack deadline, liveness
    /// probe) are locals of this future; whatever ends the session drops
    /// them with it.
    async fn drive(
        socket: PeerSocket,
        config: &PeerConfig,
        context: &DispatchContext,
        notifications: &mut mpsc::UnboundedReceiver<TabNotification>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> ConnectionEnd {
        let (mut sink, mut stream) = socket.split();

        // Seed the mirror from the platform inventory; state queries are
        // answered locally from here on.
        match context.capabilities.query_tabs().await {
            Ok(tabs) => context.mirror.sync(tabs),
            Err(err) => warn!(error = %err, "tab inventory seed failed"),
        }

        let mut heartbeat = interval_at(
            Instant::now() + config.heartbeat_interval,
            config.heartbeat_interval,
        );
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut liveness = interval_at(
            Instant::now() + config.liveness_interval,
            config.liveness_interval,
        );
        liveness.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut ack_deadline: Option<Pin<Box<Sleep>>> = None;

        loop {
            tokio::select! {
                message = stream.next() => match message {
                    Some(Ok(Message::Text(text))) => {
                        match Self::handle_frame(&text, context).await {
                            FrameAction::Reply(reply) => {
                                if let Err(err) = sink.send(Message::Text(reply.into())).await {
                                    return ConnectionEnd::Failed(err.into());
                                }
                            }
                            FrameAction::DisarmDeadline => ack_deadline = None,
                            FrameAction::Nothing => {}
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => return ConnectionEnd::Closed,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => return ConnectionEnd::Failed(err.into()),
                },

                _ = heartbeat.tick() => {
                    if let Err(err) = sink.send(Message::Text(heartbeat_probe().into())).await {
                        return ConnectionEnd::Failed(err.into());
                    }
                    if ack_deadline.is_none() {
                        ack_deadline = Some(Box::pin(sleep(config.heartbeat_deadline)));
                    }
                }

                () = async {
                    match ack_deadline.as_mut() {
                        Some(deadline) => deadline.as_mut().await,
                        None => pending().await,
                    }
                } => {
                    // Bypass graceful close: the socket is presumed dead.
                    return ConnectionEnd::Stale;
                }

                _ = liveness.tick() => {
                    // Safety net for missed close events: a dead socket
                    // surfaces as a failed write here.
                    if let Err(err) = sink.send(Message::Ping(Default::default())).await {
                        return ConnectionEnd::Failed(err.into());
                    }
                }

                notification = notifications.recv() => {
                    if let Some(notification) = notification
                        && let Err(end) = forward_notification(&mut sink, &notification).await
                    {
                        return end;
                    }
                }

                _ = shutdown.changed() => {
                    let _ = sink.close().await;
                    return ConnectionEnd::Shutdown;
                }
            }
        }
    }

    /// Classifies one inbound frame and produces the local reaction.
    async fn handle_frame(text: &str, context: &DispatchContext) -> FrameAction {
        match WireMessage::classify(text) {
            Ok(WireMessage::HeartbeatProbe) => FrameAction::Reply(heartbeat_ack()),
            Ok(WireMessage::HeartbeatAck) => FrameAction::DisarmDeadline,
            Ok(WireMessage::Request(request)) => {
                let reply = context.handle_request(request).await;
                match serde_json::to_string(&reply) {
                    Ok(json) => FrameAction::Reply(json),
                    Err(err) => {
                        error!(error = %err, "reply serialization failed");
                        FrameAction::Nothing
                    }
                }
            }
            Ok(WireMessage::Reply(reply)) => {
                warn!(id = %reply.id, "unexpected reply frame from relay");
                FrameAction::Nothing
            }
            Ok(WireMessage::TabUpdate(_)) => {
                warn!("unexpected tab_update frame from relay");
                FrameAction::Nothing
            }
            Err(err) => {
                warn!(error = %err, "undecodable frame from relay");
                FrameAction::Nothing
            }
        }
    }
}

/// Reaction to one inbound frame.
enum FrameAction {
    /// Send this text frame back.
    Reply(String),
    /// Cancel the armed heartbeat ack deadline.
    DisarmDeadline,
    /// No reaction.
    Nothing,
}

async fn forward_notification(
    sink: &mut PeerSink,
    notification: &TabNotification,
) -> std::result::Result<(), ConnectionEnd> {
    match tab_update_frame(notification) {
        Ok(frame) => sink
            .send(Message::Text(frame.into()))
            .await
            .map_err(|err| ConnectionEnd::Failed(err.into())),
        Err(err) => {
            warn!(error = %err, "tab notification serialization failed");
            Ok(())
        }
    }
}

// ============================================================================
// DispatchContext
// ============================================================================

/// Everything operation dispatch needs: the capability seam and the mirror.
struct DispatchContext {
    capabilities: Arc<dyn BrowserCapabilities>,
    mirror: Arc<TabMirror>,
}

impl DispatchContext {
    /// Executes one relay-issued request, always producing a reply envelope
    /// with the request's correlation id.
    async fn handle_request(&self, request: RequestEnvelope) -> ReplyEnvelope {
        let RequestEnvelope { id, method, params } = request;
        match self.dispatch(&method, params.as_ref()).await {
            Ok(result) => ReplyEnvelope::success(id, method, result),
            Err(err) => {
                debug!(%method, error = %err, "operation failed");
                ReplyEnvelope::failure(id, method, &err)
            }
        }
    }

    async fn dispatch(&self, method: &str, params: Option<&Value>) -> Result<Value> {
        let operation = Operation::parse(method, params)?;
        debug!(method = operation.method(), "dispatching operation");

        match operation {
            Operation::GetActiveTab => {
                let tab = self
                    .mirror
                    .active()
                    .ok_or_else(|| Error::capability("no active tab"))?;
                Ok(serde_json::to_value(tab)?)
            }
            Operation::GetAllTabs => Ok(serde_json::to_value(self.mirror.all())?),
            Operation::ExecuteScript { tab_id, operation } => {
                if self.mirror.get(tab_id).is_none() {
                    return Err(Error::tab_not_found(tab_id));
                }
                let page = self.capabilities.document(tab_id).await?;
                let mut page = page.lock();
                executor::execute(&mut page, &operation)
            }
            Operation::InjectCss { tab_id, css } => {
                if self.mirror.get(tab_id).is_none() {
                    return Err(Error::tab_not_found(tab_id));
                }
                self.capabilities.inject_css(tab_id, &css).await?;
                Ok(Value::Bool(true))
            }
            Operation::GetExtensionInfo { extension_id } => {
                self.capabilities
                    .extension_info(extension_id.as_deref())
                    .await
            }
            Operation::SendMessage {
                extension_id,
                message,
            } => {
                self.capabilities
                    .send_extension_message(&extension_id, message)
                    .await
            }
            Operation::GetCookies { domain } => {
                Ok(serde_json::to_value(self.capabilities.cookies(&domain).await?)?)
            }
            Operation::CaptureScreenshot(params) => Ok(Value::String(
                self.capabilities.capture_screenshot(params).await?,
            )),
            Operation::CreateTab(params) => {
                let tab = self.capabilities.create_tab(params).await?;
                // The platform would announce the new tab through its own
                // created event; the capability result stands in for it.
                self.mirror.apply(TabEvent::Created(tab.clone()));
                Ok(serde_json::to_value(tab)?)
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;
    use tokio::net::TcpListener;
    use tokio::time::timeout;

    use crate::identifiers::CallId;
    use crate::peer::testing::{StaticBrowser, accept_peer, next_reply, recv_frame};

    const WAIT: Duration = Duration::from_secs(5);

    fn quick_config(port: u16) -> PeerConfig {
        PeerConfig {
            heartbeat_interval: Duration::from_millis(50),
            heartbeat_deadline: Duration::from_millis(400),
            liveness_interval: Duration::from_secs(60),
            backoff_base: Duration::from_millis(5),
            backoff_cap: Duration::from_millis(20),
            max_reconnect_attempts: 3,
            ..PeerConfig::new(format!("ws://127.0.0.1:{port}"))
        }
    }

    async fn bound_listener() -> (TcpListener, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();
        (listener, port)
    }

    #[tokio::test]
    async fn test_answers_operation_requests() {
        let (listener, port) = bound_listener().await;
        let browser = StaticBrowser::with_sample_tabs();
        let (handle, join) = PeerManager::spawn(quick_config(port), Arc::new(browser));

        let mut relay = accept_peer(&listener).await;

        let id = CallId::generate("chrome_get_all_tabs");
        let request =
            json!({ "id": id, "method": "chrome_get_all_tabs" }).to_string();
        relay.send(Message::Text(request.into())).await.expect("send");

        let reply = timeout(WAIT, next_reply(&mut relay, &id)).await.expect("reply");
        let tabs = reply.into_result().expect("success");
        assert_eq!(tabs.as_array().expect("array").len(), 2);

        handle.shutdown();
        join.await.expect("join").expect("clean shutdown");
    }

    #[tokio::test]
    async fn test_unknown_method_gets_error_envelope() {
        let (listener, port) = bound_listener().await;
        let (handle, join) =
            PeerManager::spawn(quick_config(port), Arc::new(StaticBrowser::with_sample_tabs()));

        let mut relay = accept_peer(&listener).await;

        let id = CallId::generate("chrome_do_crime");
        let request = json!({ "id": id, "method": "chrome_do_crime" }).to_string();
        relay.send(Message::Text(request.into())).await.expect("send");

        let reply = timeout(WAIT, next_reply(&mut relay, &id)).await.expect("reply");
        assert!(reply.is_error());
        let err = reply.into_result().expect_err("error envelope");
        assert!(matches!(err, Error::Peer { code: -32601, .. }));

        handle.shutdown();
        join.await.expect("join").expect("clean shutdown");
    }

    #[tokio::test]
    async fn test_heartbeat_probe_and_ack_keep_connection() {
        let (listener, port) = bound_listener().await;
        let (handle, join) =
            PeerManager::spawn(quick_config(port), Arc::new(StaticBrowser::default()));

        let mut relay = accept_peer(&listener).await;

        // Ack every probe for several deadline windows; each ack disarms
        // the pending deadline, so the connection must survive.
        let mut probes_seen = 0u32;
        let window = Instant::now() + Duration::from_millis(600);
        while Instant::now() < window {
            match tokio::time::timeout_at(window, recv_frame(&mut relay)).await {
                Ok(WireMessage::HeartbeatProbe) => {
                    probes_seen += 1;
                    relay
                        .send(Message::Text(heartbeat_ack().into()))
                        .await
                        .expect("ack");
                }
                Ok(_) => {}
                Err(_) => break,
            }
        }
        assert!(probes_seen >= 2, "expected repeated probes, saw {probes_seen}");
        assert_eq!(handle.state(), ConnectionState::Connected);

        // And the peer answers probes from the relay side.
        relay
            .send(Message::Text(heartbeat_probe().into()))
            .await
            .expect("probe");
        let acked = timeout(WAIT, async {
            loop {
                if let WireMessage::HeartbeatAck = recv_frame(&mut relay).await {
                    return;
                }
            }
        })
        .await;
        acked.expect("heartbeat ack");

        handle.shutdown();
        join.await.expect("join").expect("clean shutdown");
    }

    #[tokio::test]
    async fn test_missed_heartbeat_ack_forces_reconnect() {
        let (listener, port) = bound_listener().await;
        let mut config = quick_config(port);
        config.heartbeat_interval = Duration::from_millis(30);
        config.heartbeat_deadline = Duration::from_millis(40);
        let (handle, join) = PeerManager::spawn(config, Arc::new(StaticBrowser::default()));

        // First session: never ack anything.
        let _first = accept_peer(&listener).await;

        // The stale transition tears the socket down and a fresh connection
        // attempt arrives.
        let second = timeout(WAIT, accept_peer(&listener)).await;
        assert!(second.is_ok(), "expected a reconnect attempt");

        handle.shutdown();
        join.await.expect("join").expect("clean shutdown");
    }

    #[tokio::test]
    async fn test_reconnect_halts_after_bound() {
        // Bind then drop, so the port refuses connections.
        let (listener, port) = bound_listener().await;
        drop(listener);

        let (handle, join) =
            PeerManager::spawn(quick_config(port), Arc::new(StaticBrowser::default()));

        let err = timeout(WAIT, join)
            .await
            .expect("halts within the window")
            .expect("join")
            .expect_err("exhaustion error");
        assert!(matches!(err, Error::ReconnectExhausted { attempts: 3 }));
        assert_eq!(handle.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_shutdown_resolves_run() {
        let (listener, port) = bound_listener().await;
        let (handle, join) =
            PeerManager::spawn(quick_config(port), Arc::new(StaticBrowser::default()));

        let _relay = accept_peer(&listener).await;
        handle.shutdown();

        timeout(WAIT, join)
            .await
            .expect("stops promptly")
            .expect("join")
            .expect("clean shutdown");
    }

    #[tokio::test]
    async fn test_tab_notifications_reach_relay() {
        let (listener, port) = bound_listener().await;
        let (handle, join) =
            PeerManager::spawn(quick_config(port), Arc::new(StaticBrowser::default()));

        let mut relay = accept_peer(&listener).await;

        handle.mirror().apply(TabEvent::Created(
            crate::peer::testing::sample_tab(7, 1, true),
        ));

        let note = timeout(WAIT, async {
            loop {
                if let WireMessage::TabUpdate(note) = recv_frame(&mut relay).await {
                    return note;
                }
            }
        })
        .await
        .expect("notification");
        assert_eq!(note.event_type, "created");
        assert_eq!(note.tab_id, crate::identifiers::TabId::new(7));

        handle.shutdown();
        join.await.expect("join").expect("clean shutdown");
    }
}
