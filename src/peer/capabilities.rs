//! Browser capability seam.
//!
//! Everything the peer can do that is not the DOM sub-protocol — tab
//! inventory and creation, cookies, the extension registry, screenshots,
//! CSS injection, document access — is behind this trait. Implementations
//! are platform adapters; the crate only specifies the interface and ships
//! a test double.

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dom::PageHandle;
use crate::error::Result;
use crate::identifiers::TabId;
use crate::protocol::{CreateTabParams, ScreenshotParams};

use super::tabs::TabSnapshot;

// ============================================================================
// Cookie
// ============================================================================

/// One cookie as reported by the platform cookie store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cookie {
    /// Cookie name.
    pub name: String,
    /// Cookie value.
    pub value: String,
    /// Domain the cookie applies to.
    pub domain: String,
    /// Path the cookie applies to.
    #[serde(default = "root_path")]
    pub path: String,
    /// Whether the cookie is HTTPS-only.
    #[serde(default)]
    pub secure: bool,
    /// Whether the cookie is hidden from scripts.
    #[serde(default, rename = "httpOnly")]
    pub http_only: bool,
}

fn root_path() -> String {
    "/".to_string()
}

// ============================================================================
// BrowserCapabilities
// ============================================================================

/// The browser primitives the peer invokes by name.
///
/// All methods are black boxes from the bridge's point of view: the peer
/// forwards arguments, returns results, and converts failures into error
/// envelopes. Only `document` feeds a core component (the DOM executor).
#[async_trait]
pub trait BrowserCapabilities: Send + Sync {
    /// Current platform tab inventory.
    ///
    /// Used to seed the tab mirror on connect; state queries afterwards are
    /// answered from the mirror.
    async fn query_tabs(&self) -> Result<Vec<TabSnapshot>>;

    /// Creates a tab.
    async fn create_tab(&self, params: CreateTabParams) -> Result<TabSnapshot>;

    /// Cookies for a domain.
    async fn cookies(&self, domain: &str) -> Result<Vec<Cookie>>;

    /// Installed-extension information, optionally narrowed to one id.
    async fn extension_info(&self, extension_id: Option<&str>) -> Result<Value>;

    /// Delivers a message to an extension's background script.
    async fn send_extension_message(&self, extension_id: &str, message: Value) -> Result<Value>;

    /// Captures a screenshot, returned as the platform's data URL.
    async fn capture_screenshot(&self, params: ScreenshotParams) -> Result<String>;

    /// Injects CSS into a tab.
    async fn inject_css(&self, tab_id: TabId, css: &str) -> Result<()>;

    /// Exclusive handle to a tab's document for DOM execution.
    async fn document(&self, tab_id: TabId) -> Result<PageHandle>;
}
