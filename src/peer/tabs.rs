//! Local mirror of open-tab state.
//!
//! The mirror is fed tab lifecycle events by the embedding platform and
//! answers the state-query operations without touching the platform again.
//! Every mutation emits a [`TabNotification`] which the connection manager
//! forwards to the relay as an unsolicited `tab_update` message.
//!
//! Event streams are independent; the only ordering promise is
//! last-write-wins per tab id.

// ============================================================================
// Imports
// ============================================================================

use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

use crate::identifiers::{TabId, WindowId};

// ============================================================================
// TabSnapshot
// ============================================================================

/// Last-known attributes of one tab.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TabSnapshot {
    /// Tab identifier.
    pub id: TabId,
    /// Last-known URL.
    pub url: String,
    /// Last-known title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Whether this is the active tab of its window.
    pub active: bool,
    /// Owning window.
    #[serde(rename = "windowId")]
    pub window_id: WindowId,
    /// Load status.
    pub status: LoadStatus,
}

/// Tab load status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadStatus {
    /// Navigation in progress.
    Loading,
    /// Document loaded.
    Complete,
}

// ============================================================================
// TabEvent
// ============================================================================

/// One tab lifecycle event from the platform.
#[derive(Debug, Clone, PartialEq)]
pub enum TabEvent {
    /// A tab was opened.
    Created(TabSnapshot),
    /// A tab's attributes changed (navigation, title, status).
    Updated(TabSnapshot),
    /// A tab became the active tab of its window.
    Activated(TabId),
    /// A tab was closed.
    Removed(TabId),
    /// A tab's content scripting became available.
    ContentReady(TabId),
}

// ============================================================================
// TabNotification
// ============================================================================

/// Change notification emitted on every mirror mutation.
///
/// Serialized into `tab_update` frames; the relay never correlates these
/// with pending calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TabNotification {
    /// Event kind: `created`, `updated`, `activated`, `removed`,
    /// `content_ready`.
    #[serde(rename = "eventType")]
    pub event_type: String,
    /// The affected tab's snapshot, when one still exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tab: Option<TabSnapshot>,
    /// The affected tab id.
    #[serde(rename = "tabId")]
    pub tab_id: TabId,
}

// ============================================================================
// TabMirror
// ============================================================================

/// Snapshot of open tabs, mutated only by lifecycle events.
pub struct TabMirror {
    inner: Mutex<MirrorState>,
    notifications: mpsc::UnboundedSender<TabNotification>,
}

struct MirrorState {
    tabs: FxHashMap<TabId, TabSnapshot>,
    content_ready: FxHashSet<TabId>,
}

impl TabMirror {
    /// Creates an empty mirror and the receiving end of its notification
    /// stream.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TabNotification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mirror = Self {
            inner: Mutex::new(MirrorState {
                tabs: FxHashMap::default(),
                content_ready: FxHashSet::default(),
            }),
            notifications: tx,
        };
        (mirror, rx)
    }

    /// Replaces the mirror contents with a platform inventory snapshot.
    ///
    /// Used once per connection to seed state; emits no notifications.
    pub fn sync(&self, tabs: Vec<TabSnapshot>) {
        let mut state = self.inner.lock();
        let MirrorState {
            tabs: known,
            content_ready,
        } = &mut *state;
        *known = tabs.into_iter().map(|tab| (tab.id, tab)).collect();
        content_ready.retain(|id| known.contains_key(id));
        debug!(count = known.len(), "tab mirror seeded");
    }

    /// Applies one lifecycle event and emits the matching notification.
    pub fn apply(&self, event: TabEvent) {
        let notification = {
            let mut state = self.inner.lock();
            match event {
                TabEvent::Created(tab) => {
                    let id = tab.id;
                    state.tabs.insert(id, tab.clone());
                    TabNotification {
                        event_type: "created".into(),
                        tab: Some(tab),
                        tab_id: id,
                    }
                }
                TabEvent::Updated(tab) => {
                    let id = tab.id;
                    if tab.status == LoadStatus::Loading {
                        // A new navigation invalidates content scripting.
                        state.content_ready.remove(&id);
                    }
                    state.tabs.insert(id, tab.clone());
                    TabNotification {
                        event_type: "updated".into(),
                        tab: Some(tab),
                        tab_id: id,
                    }
                }
                TabEvent::Activated(id) => {
                    let window_id = state.tabs.get(&id).map(|tab| tab.window_id);
                    if let Some(window_id) = window_id {
                        for tab in state.tabs.values_mut() {
                            if tab.window_id == window_id {
                                tab.active = tab.id == id;
                            }
                        }
                    }
                    TabNotification {
                        event_type: "activated".into(),
                        tab: state.tabs.get(&id).cloned(),
                        tab_id: id,
                    }
                }
                TabEvent::Removed(id) => {
                    let removed = state.tabs.remove(&id);
                    state.content_ready.remove(&id);
                    TabNotification {
                        event_type: "removed".into(),
                        tab: removed,
                        tab_id: id,
                    }
                }
                TabEvent::ContentReady(id) => {
                    state.content_ready.insert(id);
                    TabNotification {
                        event_type: "content_ready".into(),
                        tab: state.tabs.get(&id).cloned(),
                        tab_id: id,
                    }
                }
            }
        };

        // Receiver gone just means nobody forwards notifications anymore.
        let _ = self.notifications.send(notification);
    }
}

// ============================================================================
// TabMirror - Queries
// ============================================================================

impl TabMirror {
    /// Returns all tab snapshots.
    #[must_use]
    pub fn all(&self) -> Vec<TabSnapshot> {
        let state = self.inner.lock();
        let mut tabs: Vec<_> = state.tabs.values().cloned().collect();
        tabs.sort_by_key(|tab| tab.id);
        tabs
    }

    /// Returns one tab by id.
    #[must_use]
    pub fn get(&self, id: TabId) -> Option<TabSnapshot> {
        self.inner.lock().tabs.get(&id).cloned()
    }

    /// Returns the active tab, if any.
    #[must_use]
    pub fn active(&self) -> Option<TabSnapshot> {
        let state = self.inner.lock();
        let mut active: Vec<_> = state.tabs.values().filter(|tab| tab.active).collect();
        active.sort_by_key(|tab| tab.id);
        active.first().map(|tab| (*tab).clone())
    }

    /// Returns `true` if the tab's content scripting is available.
    #[must_use]
    pub fn is_ready(&self, id: TabId) -> bool {
        self.inner.lock().content_ready.contains(&id)
    }

    /// Returns the number of known tabs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().tabs.len()
    }

    /// Returns `true` when no tabs are known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().tabs.is_empty()
    }
}

// ============================================================================
// Tests
// ============================================================================
