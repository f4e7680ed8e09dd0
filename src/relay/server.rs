//! WebSocket listener for peer connections.
//!
//! The relay listens on a single well-known local port; the peer connects
//! outbound. Each accepted socket is upgraded to WebSocket and handed to
//! the broker, which supersedes whatever peer was active before.

// ============================================================================
// Imports
// ============================================================================

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};

use super::broker::RelayBroker;

// ============================================================================
// Constants
// ============================================================================

/// Well-known local port the peer connects to.
pub const DEFAULT_PORT: u16 = 8765;

/// Bind address (localhost only; the socket carries no authentication).
const BIND_IP: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

/// Accept poll interval while checking the shutdown flag.
const ACCEPT_POLL: Duration = Duration::from_millis(100);

// ============================================================================
// RelayServer
// ============================================================================

/// Accept loop feeding peer connections into a [`RelayBroker`].
///
/// # Example
///
/// ```ignore
/// let broker = RelayBroker::new();
/// let server = RelayServer::bind(Arc::clone(&broker)).await?;
/// info!("peers connect to {}", server.ws_url());
///
/// let tabs = broker.dispatch("chrome_get_all_tabs", None).await?;
/// ```
pub struct RelayServer {
    /// Port the listener is bound to.
    port: u16,

    /// Broker receiving accepted connections.
    broker: Arc<RelayBroker>,

    /// Shutdown flag checked by the accept loop.
    shutdown: AtomicBool,
}

impl RelayServer {
    /// Binds the well-known port and starts accepting.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if binding fails.
    pub async fn bind(broker: Arc<RelayBroker>) -> Result<Arc<Self>> {
        Self::with_port(broker, DEFAULT_PORT).await
    }

    /// Binds a specific port (0 for an OS-assigned one) and starts
    /// accepting.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if binding fails.
    pub async fn with_port(broker: Arc<RelayBroker>, port: u16) -> Result<Arc<Self>> {
        let addr = SocketAddr::new(BIND_IP, port);
        let listener = TcpListener::bind(addr).await?;
        let actual_port = listener.local_addr()?.port();

        debug!(port = actual_port, "relay listener bound");

        let server = Arc::new(Self {
            port: actual_port,
            broker,
            shutdown: AtomicBool::new(false),
        });

        let accept_server = Arc::clone(&server);
        tokio::spawn(async move {
            accept_server.accept_loop(listener).await;
        });

        info!(port = actual_port, "relay server started");
        Ok(server)
    }

    /// Returns the bound port.
    #[inline]
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Returns the WebSocket URL peers connect to.
    #[inline]
    #[must_use]
    pub fn ws_url(&self) -> String {
        format!("ws://127.0.0.1:{}", self.port)
    }

    /// Stops accepting new connections.
    ///
    /// The active peer, if any, is untouched.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        info!("relay server shutting down");
    }

    /// Background task accepting peer connections.
    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        debug!("accept loop started");

        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                debug!("accept loop shutting down");
                break;
            }

            // Bounded accept so the shutdown flag is checked periodically.
            match timeout(ACCEPT_POLL, listener.accept()).await {
                Ok(Ok((stream, addr))) => {
                    let server = Arc::clone(&self);
                    tokio::spawn(async move {
                        if let Err(err) = server.handle_connection(stream, addr).await {
                            warn!(error = %err, ?addr, "peer connection handling failed");
                        }
                    });
                }
                Ok(Err(err)) => {
                    error!(error = %err, "accept failed");
                }
                Err(_) => {}
            }
        }

        debug!("accept loop terminated");
    }

    /// Upgrades one connection and attaches it to the broker.
    async fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) -> Result<()> {
        debug!(?addr, "peer TCP connection");

        let socket = tokio_tungstenite::accept_async(stream)
            .await
            .map_err(Error::Socket)?;

        info!(?addr, "peer WebSocket connection established");

        // Takeover policy: the superseded link is dropped, not closed; its
        // socket stays open until the old peer goes away on its own.
        if let Some(old) = self.broker.attach(socket) {
            debug!(old_link = ?old.id(), "previous peer link left to drain");
        }

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    use crate::error::Error;
    use crate::identifiers::TabId;
    use crate::peer::manager::{PeerConfig, PeerManager};
    use crate::peer::testing::StaticBrowser;
    use crate::peer::{ConnectionState, TabEvent};

    const WAIT: Duration = Duration::from_secs(5);

    fn peer_config(url: String) -> PeerConfig {
        PeerConfig {
            heartbeat_interval: Duration::from_millis(100),
            heartbeat_deadline: Duration::from_millis(500),
            backoff_base: Duration::from_millis(10),
            backoff_cap: Duration::from_millis(50),
            max_reconnect_attempts: 5,
            ..PeerConfig::new(url)
        }
    }

    async fn wait_for_peer(broker: &Arc<RelayBroker>) {
        timeout(WAIT, async {
            while !broker.has_peer() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("peer attaches");
    }

    #[tokio::test]
    async fn test_bind_reports_url() {
        let broker = RelayBroker::new();
        let server = RelayServer::with_port(broker, 0).await.expect("bind");

        assert!(server.port() > 0);
        assert_eq!(server.ws_url(), format!("ws://127.0.0.1:{}", server.port()));
        server.shutdown();
    }

    #[tokio::test]
    async fn test_end_to_end_tab_query() {
        let broker = RelayBroker::new();
        let server = RelayServer::with_port(Arc::clone(&broker), 0)
            .await
            .expect("bind");

        let mut browser = StaticBrowser::with_sample_tabs();
        browser.add_cookie("example.com", "sid", "abc123");
        let (handle, join) = PeerManager::spawn(peer_config(server.ws_url()), Arc::new(browser));
        wait_for_peer(&broker).await;

        let tabs = broker
            .dispatch("chrome_get_all_tabs", None)
            .await
            .expect("tab query");
        assert_eq!(tabs.as_array().expect("array").len(), 2);

        let active = broker
            .dispatch("chrome_get_active_tab", None)
            .await
            .expect("active tab");
        assert_eq!(active["id"], 1);
        assert_eq!(active["active"], true);

        let cookies = broker
            .dispatch("chrome_get_cookies", Some(json!({ "domain": "example.com" })))
            .await
            .expect("cookies");
        assert_eq!(cookies[0]["name"], "sid");
        assert_eq!(cookies[0]["value"], "abc123");

        handle.shutdown();
        join.await.expect("join").expect("clean shutdown");
        server.shutdown();
    }

    #[tokio::test]
    async fn test_end_to_end_dom_execution() {
        let broker = RelayBroker::new();
        let server = RelayServer::with_port(Arc::clone(&broker), 0)
            .await
            .expect("bind");

        let browser = StaticBrowser::with_sample_tabs();
        browser.add_page(
            TabId::new(1),
            "https://example.com/1",
            "<html><body><p id='greet'>hello</p></body></html>",
        );
        let (handle, join) = PeerManager::spawn(peer_config(server.ws_url()), Arc::new(browser));
        wait_for_peer(&broker).await;

        // Create, append, then read back through the document.
        let created = broker
            .dispatch(
                "chrome_execute_script",
                Some(json!({
                    "tab_id": 1,
                    "operation": { "action": "createElement", "tagName": "div", "innerText": "hi" },
                })),
            )
            .await
            .expect("create element");
        let element_id = created["elementId"].as_str().expect("marker").to_string();

        broker
            .dispatch(
                "chrome_execute_script",
                Some(json!({
                    "tab_id": 1,
                    "operation": { "action": "appendChild", "selector": "body", "elementId": element_id },
                })),
            )
            .await
            .expect("append child");

        let read = broker
            .dispatch(
                "chrome_execute_script",
                Some(json!({
                    "tab_id": 1,
                    "operation": { "action": "querySelector", "selector": "body > div" },
                })),
            )
            .await
            .expect("query");
        assert_eq!(read["text"], "hi");

        // Failures arrive as structured peer errors naming the cause.
        let err = broker
            .dispatch(
                "chrome_execute_script",
                Some(json!({
                    "tab_id": 2,
                    "operation": { "action": "getPageInfo" },
                })),
            )
            .await
            .expect_err("no document for tab 2");
        match err {
            Error::Peer { message, .. } => assert!(message.contains("Tab not found")),
            other => panic!("unexpected error: {other}"),
        }

        handle.shutdown();
        join.await.expect("join").expect("clean shutdown");
        server.shutdown();
    }

    #[tokio::test]
    async fn test_end_to_end_restricted_target() {
        let broker = RelayBroker::new();
        let server = RelayServer::with_port(Arc::clone(&broker), 0)
            .await
            .expect("bind");

        let browser = StaticBrowser::with_sample_tabs();
        browser.add_page(TabId::new(1), "chrome://extensions/", "<html></html>");
        let (handle, join) = PeerManager::spawn(peer_config(server.ws_url()), Arc::new(browser));
        wait_for_peer(&broker).await;

        let err = broker
            .dispatch(
                "chrome_execute_script",
                Some(json!({
                    "tab_id": 1,
                    "operation": { "action": "querySelector", "selector": "body" },
                })),
            )
            .await
            .expect_err("restricted page");
        match err {
            Error::Peer { message, .. } => assert!(message.contains("Restricted target")),
            other => panic!("unexpected error: {other}"),
        }

        handle.shutdown();
        join.await.expect("join").expect("clean shutdown");
        server.shutdown();
    }

    #[tokio::test]
    async fn test_end_to_end_notifications() {
        let broker = RelayBroker::new();
        let server = RelayServer::with_port(Arc::clone(&broker), 0)
            .await
            .expect("bind");
        let mut notes = broker.subscribe();

        let (handle, join) = PeerManager::spawn(
            peer_config(server.ws_url()),
            Arc::new(StaticBrowser::with_sample_tabs()),
        );
        wait_for_peer(&broker).await;
        let mut states = handle.state_receiver();
        timeout(WAIT, states.wait_for(|s| *s == ConnectionState::Connected))
            .await
            .expect("connects")
            .expect("state channel open");

        // A mirror mutation on the peer side surfaces at the relay.
        handle
            .mirror()
            .apply(TabEvent::Removed(TabId::new(2)));
        let note = timeout(WAIT, notes.recv())
            .await
            .expect("notification")
            .expect("channel open");
        assert_eq!(note.event_type, "removed");

        handle.shutdown();
        join.await.expect("join").expect("clean shutdown");
        server.shutdown();
    }
}
