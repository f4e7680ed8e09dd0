//! Shared test scaffolding: a static capability double and raw-socket
//! helpers for scripting the other end of a connection.

// ============================================================================
// Imports
// ============================================================================

use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use futures_util::StreamExt;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::{Value, json};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{WebSocketStream, accept_async};

use crate::dom::{Page, PageHandle};
use crate::error::{Error, Result};
use crate::identifiers::{CallId, TabId, WindowId};
use crate::protocol::{CreateTabParams, ReplyEnvelope, ScreenshotParams, WireMessage};

use super::capabilities::{BrowserCapabilities, Cookie};
use super::tabs::{LoadStatus, TabSnapshot};

// ============================================================================
// Fixtures
// ============================================================================

/// A tab snapshot fixture.
pub(crate) fn sample_tab(id: i64, window: i64, active: bool) -> TabSnapshot {
    TabSnapshot {
        id: TabId::new(id),
        url: format!("https://example.com/{id}"),
        title: Some(format!("tab {id}")),
        active,
        window_id: WindowId::new(window),
        status: LoadStatus::Complete,
    }
}

// ============================================================================
// StaticBrowser
// ============================================================================

/// Canned [`BrowserCapabilities`] implementation.
#[derive(Default)]
pub(crate) struct StaticBrowser {
    tabs: Vec<TabSnapshot>,
    pages: Mutex<FxHashMap<TabId, PageHandle>>,
    cookies: FxHashMap<String, Vec<Cookie>>,
    next_tab: AtomicI64,
}

impl StaticBrowser {
    /// Two tabs in one window, tab 1 active.
    pub(crate) fn with_sample_tabs() -> Self {
        Self {
            tabs: vec![sample_tab(1, 1, true), sample_tab(2, 1, false)],
            next_tab: AtomicI64::new(100),
            ..Self::default()
        }
    }

    /// Registers a document for a tab.
    pub(crate) fn add_page(&self, tab_id: TabId, url: &str, html: &str) {
        let page = Page::parse(url, html).expect("fixture page parses");
        self.pages.lock().insert(tab_id, page.into_handle());
    }

    /// Registers cookies for a domain.
    pub(crate) fn add_cookie(&mut self, domain: &str, name: &str, value: &str) {
        self.cookies
            .entry(domain.to_string())
            .or_default()
            .push(Cookie {
                name: name.to_string(),
                value: value.to_string(),
                domain: domain.to_string(),
                path: "/".to_string(),
                secure: false,
                http_only: false,
            });
    }
}

#[async_trait]
impl BrowserCapabilities for StaticBrowser {
    async fn query_tabs(&self) -> Result<Vec<TabSnapshot>> {
        Ok(self.tabs.clone())
    }

    async fn create_tab(&self, params: CreateTabParams) -> Result<TabSnapshot> {
        let id = self.next_tab.fetch_add(1, Ordering::SeqCst);
        Ok(TabSnapshot {
            id: TabId::new(id),
            url: params.url.unwrap_or_else(|| "about:newtab".to_string()),
            title: None,
            active: params.active,
            window_id: params.window_id.unwrap_or(WindowId::new(1)),
            status: LoadStatus::Loading,
        })
    }

    async fn cookies(&self, domain: &str) -> Result<Vec<Cookie>> {
        Ok(self.cookies.get(domain).cloned().unwrap_or_default())
    }

    async fn extension_info(&self, extension_id: Option<&str>) -> Result<Value> {
        match extension_id {
            Some(id) => Ok(json!({ "id": id, "name": "Sample Extension", "enabled": true })),
            None => Ok(json!([{ "id": "sample", "name": "Sample Extension", "enabled": true }])),
        }
    }

    async fn send_extension_message(&self, extension_id: &str, message: Value) -> Result<Value> {
        Ok(json!({ "delivered": extension_id, "echo": message }))
    }

    async fn capture_screenshot(&self, _params: ScreenshotParams) -> Result<String> {
        Ok("data:image/png;base64,iVBORw0KGgo=".to_string())
    }

    async fn inject_css(&self, _tab_id: TabId, _css: &str) -> Result<()> {
        Ok(())
    }

    async fn document(&self, tab_id: TabId) -> Result<PageHandle> {
        self.pages
            .lock()
            .get(&tab_id)
            .cloned()
            .ok_or_else(|| Error::tab_not_found(tab_id))
    }
}

// ============================================================================
// Raw-socket helpers
// ============================================================================

/// Accepts one inbound WebSocket connection.
pub(crate) async fn accept_peer(listener: &TcpListener) -> WebSocketStream<TcpStream> {
    let (stream, _addr) = listener.accept().await.expect("tcp accept");
    accept_async(stream).await.expect("websocket upgrade")
}

/// Receives the next classifiable text frame.
pub(crate) async fn recv_frame<S>(socket: &mut WebSocketStream<S>) -> WireMessage
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        match socket.next().await {
            Some(Ok(Message::Text(text))) => {
                if let Ok(message) = WireMessage::classify(&text) {
                    return message;
                }
            }
            Some(Ok(_)) => {}
            Some(Err(err)) => panic!("socket error: {err}"),
            None => panic!("socket closed while waiting for a frame"),
        }
    }
}

/// Receives frames until the reply with the given correlation id arrives.
pub(crate) async fn next_reply<S>(socket: &mut WebSocketStream<S>, id: &CallId) -> ReplyEnvelope
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        if let WireMessage::Reply(reply) = recv_frame(socket).await
            && reply.id == *id
        {
            return reply;
        }
    }
}
