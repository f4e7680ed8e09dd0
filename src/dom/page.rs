//! Target document for DOM operations.
//!
//! A [`Page`] wraps one parsed document together with its URL and the
//! registry of created-but-unattached elements. The executor manipulates
//! pages exclusively through this module's surface; node-level tree surgery
//! (fragment grafting, attribute rebuilds, orphan bookkeeping) lives here.

// ============================================================================
// Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;

use ego_tree::{NodeId, NodeRef, Tree};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use scraper::node::Node;
use scraper::{ElementRef, Html, Selector};
use url::{Position, Url};

use crate::error::{Error, Result};
use crate::identifiers::MarkerId;

// ============================================================================
// Constants
// ============================================================================

/// Attribute carrying the marker id of a created element.
pub const MARKER_ATTRIBUTE: &str = "data-bridge-id";

/// Schemes whose pages never accept DOM execution.
const RESTRICTED_SCHEMES: &[&str] = &["chrome", "chrome-extension", "about", "devtools"];

/// Tags the fragment parser drops outside a table context; element markup
/// for these is parsed inside a `<table>` wrapper.
const TABLE_SCOPED_TAGS: &[&str] = &[
    "caption", "col", "colgroup", "tbody", "td", "tfoot", "th", "thead", "tr",
];

// ============================================================================
// PageHandle
// ============================================================================

/// Shared exclusive handle to one page.
///
/// Capability implementations hand these out; the executor locks one for
/// the duration of a single synchronous operation.
pub type PageHandle = Arc<Mutex<Page>>;

// ============================================================================
// Page
// ============================================================================

/// One document plus the state DOM operations need around it.
pub struct Page {
    /// Location the document was loaded from.
    url: Url,
    /// The parsed document tree.
    document: Html,
    /// Created-but-unattached elements, keyed by marker id.
    created: FxHashMap<String, NodeId>,
}

impl Page {
    /// Parses a document from its URL and HTML source.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the URL does not parse.
    pub fn parse(url: &str, html: &str) -> Result<Self> {
        let url =
            Url::parse(url).map_err(|e| Error::invalid_argument(format!("bad page url: {e}")))?;
        Ok(Self {
            url,
            document: Html::parse_document(html),
            created: FxHashMap::default(),
        })
    }

    /// Wraps the page in a shared handle.
    #[inline]
    #[must_use]
    pub fn into_handle(self) -> PageHandle {
        Arc::new(Mutex::new(self))
    }

    /// Returns the page URL.
    #[inline]
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Returns the origin portion of the URL (scheme through port).
    #[must_use]
    pub fn origin_label(&self) -> String {
        self.url[..Position::BeforePath].to_string()
    }

    /// Returns `true` if DOM execution is disallowed on this page.
    ///
    /// Covers browser-internal schemes, extension pages and the extension
    /// marketplace.
    #[must_use]
    pub fn is_restricted(&self) -> bool {
        if RESTRICTED_SCHEMES.contains(&self.url.scheme()) {
            return true;
        }
        match self.url.host_str() {
            Some("chrome.google.com") => self.url.path().starts_with("/webstore"),
            Some("chromewebstore.google.com") => true,
            _ => false,
        }
    }

    /// Serializes the current document.
    #[must_use]
    pub fn document_html(&self) -> String {
        self.document.root_element().html()
    }
}

// ============================================================================
// Page - Selection
// ============================================================================

impl Page {
    /// Finds the first element matching `selector`.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] if the selector does not parse
    /// - [`Error::ElementNotFound`] naming the selector if nothing matches
    pub(crate) fn select_first(&self, selector: &str) -> Result<NodeId> {
        let parsed = parse_selector(selector)?;
        self.document
            .select(&parsed)
            .next()
            .map(|el| el.id())
            .ok_or_else(|| Error::element_not_found(selector))
    }

    /// Finds all elements matching `selector`; empty when nothing matches.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the selector does not parse.
    pub(crate) fn select_all(&self, selector: &str) -> Result<Vec<NodeId>> {
        let parsed = parse_selector(selector)?;
        Ok(self.document.select(&parsed).map(|el| el.id()).collect())
    }

    /// Returns an element view of a previously selected node.
    pub(crate) fn element(&self, id: NodeId) -> Result<ElementRef<'_>> {
        self.document
            .tree
            .get(id)
            .and_then(ElementRef::wrap)
            .ok_or_else(|| Error::invalid_argument("node is no longer part of the document"))
    }
}

// ============================================================================
// Page - Mutation
// ============================================================================

impl Page {
    /// Detaches every child of `id`.
    pub(crate) fn clear_children(&mut self, id: NodeId) {
        let child_ids: Vec<NodeId> = match self.document.tree.get(id) {
            Some(node) => node.children().map(|child| child.id()).collect(),
            None => return,
        };
        for child_id in child_ids {
            if let Some(mut child) = self.document.tree.get_mut(child_id) {
                child.detach();
            }
        }
    }

    /// Replaces the children of `id` with the parse of `html`.
    pub(crate) fn set_inner_html(&mut self, id: NodeId, html: &str) -> Result<()> {
        self.clear_children(id);
        let fragment = Html::parse_fragment(html);
        for node in fragment_content(&fragment) {
            graft_subtree(&mut self.document.tree, id, node)?;
        }
        Ok(())
    }

    /// Replaces the children of `id` with a single text node.
    pub(crate) fn set_text(&mut self, id: NodeId, text: &str) -> Result<()> {
        self.set_inner_html(id, &escape_text(text))
    }

    /// Detaches the element itself from the document.
    pub(crate) fn remove(&mut self, id: NodeId) {
        if let Some(mut node) = self.document.tree.get_mut(id) {
            node.detach();
        }
    }

    /// Rewrites an element's attribute set through `apply`.
    ///
    /// The element value is rebuilt by re-parsing its open tag, so derived
    /// state (the id and class caches used by selector matching) stays
    /// consistent with the new attributes. The element's children are
    /// untouched — only the node value is replaced.
    pub(crate) fn update_attributes(
        &mut self,
        id: NodeId,
        apply: impl FnOnce(&mut BTreeMap<String, String>),
    ) -> Result<()> {
        let (name, mut attrs) = {
            let element = self.element(id)?;
            let value = element.value();
            let attrs: BTreeMap<String, String> = value
                .attrs()
                .filter(|(k, _)| attr_name_ok(k))
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect();
            (value.name().to_string(), attrs)
        };

        apply(&mut attrs);

        let mut markup = format!("<{name}");
        for (k, v) in &attrs {
            if attr_name_ok(k) {
                markup.push_str(&format!(" {k}=\"{}\"", escape_attr(v)));
            }
        }
        markup.push_str(&format!("></{name}>"));

        let fragment = parse_element_fragment(&name, &markup);
        let rebuilt = find_element_by_tag(&fragment, &name)
            .ok_or_else(|| Error::invalid_argument(format!("cannot rebuild `{name}` element")))?
            .value()
            .clone();

        let mut node = self
            .document
            .tree
            .get_mut(id)
            .ok_or_else(|| Error::invalid_argument("node is no longer part of the document"))?;
        *node.value() = rebuilt;
        Ok(())
    }
}

// ============================================================================
// Page - Created Elements
// ============================================================================

impl Page {
    /// Parses element `markup` and stores the marked element as an orphan.
    ///
    /// The element enters the page tree detached from the document root; it
    /// is invisible to selection and serialization until adopted. The
    /// marker must already be present in the markup as [`MARKER_ATTRIBUTE`].
    pub(crate) fn create_orphan(
        &mut self,
        tag_name: &str,
        markup: &str,
        marker: &MarkerId,
    ) -> Result<()> {
        let fragment = parse_element_fragment(tag_name, markup);
        let source = find_element_by_marker(&fragment, marker.as_str())
            .ok_or_else(|| Error::invalid_argument("markup produced no element"))?;

        let orphan_id = self
            .document
            .tree
            .orphan(source.value().clone())
            .id();
        for child in source.children() {
            graft_subtree(&mut self.document.tree, orphan_id, child)?;
        }

        self.created.insert(marker.as_str().to_string(), orphan_id);
        Ok(())
    }

    /// Moves a created element under `parent`, by marker id.
    ///
    /// Falls back to an attribute-selector scan of the attached document so
    /// an already-adopted element can be re-parented by the same marker.
    ///
    /// # Errors
    ///
    /// - [`Error::ElementNotFound`] naming the marker selector if no element
    ///   carries the marker
    /// - [`Error::InvalidArgument`] if adoption would create a cycle
    pub(crate) fn adopt_marked(&mut self, parent: NodeId, marker: &str) -> Result<()> {
        let marker_selector = format!("[{}=\"{}\"]", MARKER_ATTRIBUTE, escape_attr(marker));

        let child = match self.created.get(marker) {
            Some(id) => *id,
            None => self.select_first(&marker_selector)?,
        };

        if child == parent {
            return Err(Error::invalid_argument(
                "cannot append an element to itself",
            ));
        }
        let creates_cycle = self
            .document
            .tree
            .get(parent)
            .is_some_and(|node| node.ancestors().any(|ancestor| ancestor.id() == child));
        if creates_cycle {
            return Err(Error::invalid_argument(
                "cannot append an element into its own subtree",
            ));
        }

        let mut parent_node = self
            .document
            .tree
            .get_mut(parent)
            .ok_or_else(|| Error::invalid_argument("node is no longer part of the document"))?;
        parent_node.append_id(child);
        Ok(())
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Parses a CSS selector.
pub(crate) fn parse_selector(selector: &str) -> Result<Selector> {
    Selector::parse(selector)
        .map_err(|e| Error::invalid_argument(format!("invalid selector `{selector}`: {e}")))
}

/// Content nodes of a parsed fragment, skipping the `<html>` wrapper the
/// parser inserts around fragment input.
fn fragment_content<'a>(fragment: &'a Html) -> Vec<NodeRef<'a, Node>> {
    let root = fragment.tree.root();
    let content_root = root
        .children()
        .find(|child| {
            child
                .value()
                .as_element()
                .is_some_and(|el| el.name() == "html")
        })
        .unwrap_or(root);
    content_root.children().collect()
}

/// Parses markup for a single element, wrapping table-scoped tags in the
/// context the fragment parser requires.
fn parse_element_fragment(tag_name: &str, markup: &str) -> Html {
    let lower = tag_name.to_ascii_lowercase();
    if TABLE_SCOPED_TAGS.contains(&lower.as_str()) {
        Html::parse_fragment(&format!("<table>{markup}</table>"))
    } else {
        Html::parse_fragment(markup)
    }
}

/// First element in a fragment with the given tag name.
fn find_element_by_tag<'a>(fragment: &'a Html, tag_name: &str) -> Option<NodeRef<'a, Node>> {
    fragment.tree.root().descendants().find(|node| {
        node.value()
            .as_element()
            .is_some_and(|el| el.name().eq_ignore_ascii_case(tag_name))
    })
}

/// First element in a fragment carrying the given marker id.
fn find_element_by_marker<'a>(fragment: &'a Html, marker: &str) -> Option<NodeRef<'a, Node>> {
    fragment.tree.root().descendants().find(|node| {
        node.value()
            .as_element()
            .is_some_and(|el| el.attr(MARKER_ATTRIBUTE) == Some(marker))
    })
}

/// Attribute names that can be re-serialized into an open tag safely.
fn attr_name_ok(name: &str) -> bool {
    !name.is_empty()
        && !name
            .chars()
            .any(|c| c.is_ascii_whitespace() || matches!(c, '"' | '\'' | '<' | '>' | '=' | '/'))
}

/// Deep-copies `source` (from any tree) as the last child of `parent`.
fn graft_subtree(tree: &mut Tree<Node>, parent: NodeId, source: NodeRef<'_, Node>) -> Result<()> {
    let child_id = {
        let mut parent_node = tree
            .get_mut(parent)
            .ok_or_else(|| Error::invalid_argument("node is no longer part of the document"))?;
        parent_node.append(source.value().clone()).id()
    };
    for child in source.children() {
        graft_subtree(tree, child_id, child)?;
    }
    Ok(())
}

/// Escapes text content for embedding in markup.
pub(crate) fn escape_text(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Escapes an attribute value for embedding in double-quoted markup.
pub(crate) fn escape_attr(value: &str) -> String {
    escape_text(value).replace('"', "&quot;")
}

// ============================================================================
// Tests
// ============================================================================
