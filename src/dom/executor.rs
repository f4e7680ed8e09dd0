//! DOM primitive execution.
//!
//! [`execute`] runs one validated [`DomAction`] against a [`Page`] and
//! returns the structured value the wire protocol carries back. The
//! executor knows nothing about correlation ids or sockets; it is invoked
//! by the connection manager with dispatch already done.
//!
//! # Results
//!
//! | Action | Result |
//! |--------|--------|
//! | `querySelector` | `{ text, html, attributes }` |
//! | `querySelectorAll` | array of the above (empty when no match) |
//! | `createElement` | `{ elementId }` |
//! | `getPageInfo` | `{ title, url, metaTags }` |
//! | `getElementsInfo` | array of `{ tagName, text, attributes, classes }` |
//! | mutations, `log`, `click` | `true` |

// ============================================================================
// Imports
// ============================================================================

use std::collections::{BTreeMap, BTreeSet};

use ego_tree::NodeId;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::identifiers::MarkerId;
use crate::protocol::DomAction;

use super::page::{MARKER_ATTRIBUTE, Page, escape_attr, escape_text};

// ============================================================================
// Result Shapes
// ============================================================================

/// Read result of `querySelector` / `querySelectorAll`.
#[derive(Debug, Clone, Serialize)]
pub struct ElementInfo {
    /// Concatenated text content.
    pub text: String,
    /// Serialized inner markup.
    pub html: String,
    /// Attribute name to value.
    pub attributes: BTreeMap<String, String>,
}

/// Read result of `getElementsInfo`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementDetails {
    /// Upper-cased tag name, as the live DOM reports it.
    pub tag_name: String,
    /// Concatenated text content.
    pub text: String,
    /// Attribute name to value.
    pub attributes: BTreeMap<String, String>,
    /// Class list as a set.
    pub classes: BTreeSet<String>,
}

/// Read result of `getPageInfo`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    /// Document title, empty when absent.
    pub title: String,
    /// Page URL.
    pub url: String,
    /// All `<meta>` tags.
    pub meta_tags: Vec<MetaTag>,
}

/// One `<meta>` tag of a page.
#[derive(Debug, Clone, Serialize)]
pub struct MetaTag {
    /// `name` attribute.
    pub name: Option<String>,
    /// `content` attribute.
    pub content: Option<String>,
}

/// Result of `createElement`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedElement {
    /// Marker id by which the element can be appended later.
    pub element_id: MarkerId,
}

// ============================================================================
// Execution
// ============================================================================

/// Executes one DOM primitive against a page.
///
/// Restricted origins are rejected before any DOM access.
///
/// # Errors
///
/// - [`Error::RestrictedTarget`] naming the origin of a protected page
/// - [`Error::ElementNotFound`] naming the selector of an empty single-node
///   lookup
/// - [`Error::InvalidArgument`] for malformed selectors, tag names or
///   cycle-producing appends
pub fn execute(page: &mut Page, action: &DomAction) -> Result<Value> {
    if page.is_restricted() {
        return Err(Error::restricted_target(page.origin_label()));
    }

    debug!(action = action.action_name(), "executing DOM operation");

    match action {
        DomAction::QuerySelector { selector } => {
            let id = page.select_first(selector)?;
            to_value(element_info(page, id)?)
        }
        DomAction::QuerySelectorAll { selector } => {
            let infos = page
                .select_all(selector)?
                .into_iter()
                .map(|id| element_info(page, id))
                .collect::<Result<Vec<_>>>()?;
            to_value(infos)
        }
        DomAction::SetText { selector, value } => {
            let id = page.select_first(selector)?;
            page.set_text(id, value)?;
            Ok(Value::Bool(true))
        }
        DomAction::SetHtml { selector, value } => {
            let id = page.select_first(selector)?;
            page.set_inner_html(id, value)?;
            Ok(Value::Bool(true))
        }
        DomAction::SetAttribute {
            selector,
            attribute,
            value,
        } => {
            let id = page.select_first(selector)?;
            ensure_name(attribute)?;
            page.update_attributes(id, |attrs| {
                attrs.insert(attribute.clone(), value.clone());
            })?;
            Ok(Value::Bool(true))
        }
        DomAction::RemoveAttribute {
            selector,
            attribute,
        } => {
            let id = page.select_first(selector)?;
            page.update_attributes(id, |attrs| {
                attrs.remove(attribute);
            })?;
            Ok(Value::Bool(true))
        }
        DomAction::AddClass { selector, value } => {
            update_classes(page, selector, |classes| {
                classes.insert(value.clone());
            })
        }
        DomAction::RemoveClass { selector, value } => {
            update_classes(page, selector, |classes| {
                classes.remove(value);
            })
        }
        DomAction::ToggleClass { selector, value } => {
            update_classes(page, selector, |classes| {
                if !classes.remove(value) {
                    classes.insert(value.clone());
                }
            })
        }
        DomAction::CreateElement {
            tag_name,
            attributes,
            inner_text,
        } => {
            let marker = create_element(page, tag_name, attributes.as_ref(), inner_text.as_deref())?;
            to_value(CreatedElement { element_id: marker })
        }
        DomAction::AppendChild {
            selector,
            element_id,
        } => {
            let parent = page.select_first(selector)?;
            page.adopt_marked(parent, element_id)?;
            Ok(Value::Bool(true))
        }
        DomAction::RemoveElement { selector } => {
            let id = page.select_first(selector)?;
            page.remove(id);
            Ok(Value::Bool(true))
        }
        DomAction::GetPageInfo => to_value(page_info(page)?),
        DomAction::GetElementsInfo { selector } => {
            let details = page
                .select_all(selector)?
                .into_iter()
                .map(|id| element_details(page, id))
                .collect::<Result<Vec<_>>>()?;
            to_value(details)
        }
        DomAction::Log { message } => {
            info!(target: "chrome_bridge::page", page = %page.url(), "{message}");
            Ok(Value::Bool(true))
        }
        DomAction::Click { selector } => {
            // A parsed document has no event loop to run handlers on; the
            // click degrades to an existence check.
            page.select_first(selector)?;
            Ok(Value::Bool(true))
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn to_value<T: Serialize>(value: T) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}

fn element_info(page: &Page, id: NodeId) -> Result<ElementInfo> {
    let element = page.element(id)?;
    Ok(ElementInfo {
        text: element.text().collect(),
        html: element.inner_html(),
        attributes: element
            .value()
            .attrs()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    })
}

fn element_details(page: &Page, id: NodeId) -> Result<ElementDetails> {
    let element = page.element(id)?;
    let value = element.value();
    let classes = value
        .attr("class")
        .map(|list| list.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default();
    Ok(ElementDetails {
        tag_name: value.name().to_uppercase(),
        text: element.text().collect(),
        attributes: value
            .attrs()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        classes,
    })
}

fn page_info(page: &Page) -> Result<PageInfo> {
    let title = page
        .select_all("title")?
        .into_iter()
        .next()
        .map(|id| -> Result<String> { Ok(page.element(id)?.text().collect()) })
        .transpose()?
        .unwrap_or_default();

    let meta_tags = page
        .select_all("meta")?
        .into_iter()
        .map(|id| -> Result<MetaTag> {
            let element = page.element(id)?;
            Ok(MetaTag {
                name: element.value().attr("name").map(str::to_string),
                content: element.value().attr("content").map(str::to_string),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(PageInfo {
        title,
        url: page.url().to_string(),
        meta_tags,
    })
}

fn update_classes(
    page: &mut Page,
    selector: &str,
    apply: impl FnOnce(&mut BTreeSet<String>),
) -> Result<Value> {
    let id = page.select_first(selector)?;
    page.update_attributes(id, |attrs| {
        let mut classes: BTreeSet<String> = attrs
            .get("class")
            .map(|list| list.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();
        apply(&mut classes);
        let joined = classes.into_iter().collect::<Vec<_>>().join(" ");
        attrs.insert("class".to_string(), joined);
    })?;
    Ok(Value::Bool(true))
}

fn create_element(
    page: &mut Page,
    tag_name: &str,
    attributes: Option<&BTreeMap<String, String>>,
    inner_text: Option<&str>,
) -> Result<MarkerId> {
    ensure_name(tag_name)?;

    let marker = MarkerId::generate();
    let mut markup = format!("<{tag_name}");
    if let Some(attrs) = attributes {
        for (name, value) in attrs {
            ensure_name(name)?;
            markup.push_str(&format!(" {name}=\"{}\"", escape_attr(value)));
        }
    }
    markup.push_str(&format!(" {MARKER_ATTRIBUTE}=\"{marker}\">"));
    if let Some(text) = inner_text {
        markup.push_str(&escape_text(text));
    }
    markup.push_str(&format!("</{tag_name}>"));

    page.create_orphan(tag_name, &markup, &marker)?;
    Ok(marker)
}

/// Restricts tag and attribute names to characters that cannot break out of
/// the constructed markup.
fn ensure_name(name: &str) -> Result<()> {
    let ok = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok {
        Ok(())
    } else {
        Err(Error::invalid_argument(format!("invalid name `{name}`")))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    const DOC: &str = concat!(
        "<html><head><title>Fixture</title>",
        "<meta name=\"author\" content=\"someone\">",
        "</head><body>",
        "<div id=\"a\" class=\"one two\" data-x=\"1\">hello <b>world</b></div>",
        "<ul><li>first</li><li>second</li></ul>",
        "</body></html>",
    );

    fn page() -> Page {
        Page::parse("https://example.com/app", DOC).expect("parse page")
    }

    fn run(page: &mut Page, action: Value) -> Result<Value> {
        let action = DomAction::from_value(&action).expect("valid action");
        execute(page, &action)
    }

    #[test]
    fn test_query_selector_returns_structure() {
        let mut page = page();
        let value = run(&mut page, json!({ "action": "querySelector", "selector": "#a" }))
            .expect("query");

        assert_eq!(value["text"], "hello world");
        assert_eq!(value["html"], "hello <b>world</b>");
        assert_eq!(value["attributes"]["data-x"], "1");
        assert_eq!(value["attributes"]["class"], "one two");
    }

    #[test]
    fn test_query_selector_not_found() {
        let mut page = page();
        let err = run(&mut page, json!({ "action": "querySelector", "selector": "#nope" }))
            .expect_err("no match");
        assert!(matches!(err, Error::ElementNotFound { selector } if selector == "#nope"));
    }

    #[test]
    fn test_query_selector_all_empty_sequence() {
        let mut page = page();
        let value = run(
            &mut page,
            json!({ "action": "querySelectorAll", "selector": "article" }),
        )
        .expect("query");
        assert_eq!(value, json!([]));
    }

    #[test]
    fn test_query_selector_all_collects() {
        let mut page = page();
        let value = run(&mut page, json!({ "action": "querySelectorAll", "selector": "li" }))
            .expect("query");

        let items = value.as_array().expect("array");
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["text"], "first");
        assert_eq!(items[1]["text"], "second");
    }

    #[test]
    fn test_set_text_and_set_html() {
        let mut page = page();

        let value = run(
            &mut page,
            json!({ "action": "setText", "selector": "#a", "value": "plain" }),
        )
        .expect("set text");
        assert_eq!(value, json!(true));

        let read = run(&mut page, json!({ "action": "querySelector", "selector": "#a" }))
            .expect("query");
        assert_eq!(read["text"], "plain");

        run(
            &mut page,
            json!({ "action": "setHTML", "selector": "#a", "value": "<i>styled</i>" }),
        )
        .expect("set html");
        let read = run(&mut page, json!({ "action": "querySelector", "selector": "#a" }))
            .expect("query");
        assert_eq!(read["html"], "<i>styled</i>");
    }

    #[test]
    fn test_set_attribute_on_missing_selector_names_it() {
        let mut page = page();
        let err = run(
            &mut page,
            json!({
                "action": "setAttribute",
                "selector": "#ghost",
                "attribute": "data-y",
                "value": "2",
            }),
        )
        .expect_err("missing element");
        assert!(matches!(err, Error::ElementNotFound { selector } if selector == "#ghost"));
    }

    #[test]
    fn test_attribute_round_trip() {
        let mut page = page();

        run(
            &mut page,
            json!({
                "action": "setAttribute",
                "selector": "#a",
                "attribute": "data-y",
                "value": "2",
            }),
        )
        .expect("set");
        let read = run(&mut page, json!({ "action": "querySelector", "selector": "#a" }))
            .expect("query");
        assert_eq!(read["attributes"]["data-y"], "2");

        run(
            &mut page,
            json!({ "action": "removeAttribute", "selector": "#a", "attribute": "data-y" }),
        )
        .expect("remove");
        let read = run(&mut page, json!({ "action": "querySelector", "selector": "#a" }))
            .expect("query");
        assert!(read["attributes"].get("data-y").is_none());
    }

    #[test]
    fn test_class_operations() {
        let mut page = page();

        run(
            &mut page,
            json!({ "action": "addClass", "selector": "#a", "value": "three" }),
        )
        .expect("add");
        run(
            &mut page,
            json!({ "action": "removeClass", "selector": "#a", "value": "one" }),
        )
        .expect("remove");
        run(
            &mut page,
            json!({ "action": "toggleClass", "selector": "#a", "value": "two" }),
        )
        .expect("toggle off");

        let value = run(
            &mut page,
            json!({ "action": "getElementsInfo", "selector": "#a" }),
        )
        .expect("info");
        assert_eq!(value[0]["classes"], json!(["three"]));

        run(
            &mut page,
            json!({ "action": "toggleClass", "selector": "#a", "value": "two" }),
        )
        .expect("toggle on");
        let value = run(
            &mut page,
            json!({ "action": "getElementsInfo", "selector": "#a" }),
        )
        .expect("info");
        assert_eq!(value[0]["classes"], json!(["three", "two"]));
    }

    #[test]
    fn test_create_append_query_cycle() {
        let mut page = page();

        let created = run(
            &mut page,
            json!({ "action": "createElement", "tagName": "div", "innerText": "hi" }),
        )
        .expect("create");
        let element_id = created["elementId"].as_str().expect("marker").to_string();

        // Not visible until appended.
        let body_divs = run(
            &mut page,
            json!({ "action": "querySelectorAll", "selector": "body > div > div" }),
        )
        .expect("query");
        assert_eq!(body_divs, json!([]));

        run(
            &mut page,
            json!({ "action": "appendChild", "selector": "body", "elementId": element_id }),
        )
        .expect("append");

        let read = run(
            &mut page,
            json!({ "action": "querySelector", "selector": "body > div:last-child" }),
        )
        .expect("query");
        assert_eq!(read["text"], "hi");
        assert_eq!(
            read["attributes"][MARKER_ATTRIBUTE].as_str(),
            Some(element_id.as_str())
        );
    }

    #[test]
    fn test_create_element_with_attributes() {
        let mut page = page();

        let created = run(
            &mut page,
            json!({
                "action": "createElement",
                "tagName": "a",
                "attributes": { "href": "https://x.test/?a=1&b=\"2\"" },
            }),
        )
        .expect("create");
        let element_id = created["elementId"].as_str().expect("marker").to_string();

        run(
            &mut page,
            json!({ "action": "appendChild", "selector": "body", "elementId": element_id }),
        )
        .expect("append");

        let read = run(
            &mut page,
            json!({ "action": "querySelector", "selector": "body > a" }),
        )
        .expect("query");
        assert_eq!(read["attributes"]["href"], "https://x.test/?a=1&b=\"2\"");
    }

    #[test]
    fn test_create_element_rejects_hostile_tag() {
        let mut page = page();
        let err = run(
            &mut page,
            json!({ "action": "createElement", "tagName": "div><script" }),
        )
        .expect_err("hostile tag");
        assert!(matches!(err, Error::InvalidArgument { .. }));
    }

    #[test]
    fn test_remove_element() {
        let mut page = page();

        run(&mut page, json!({ "action": "removeElement", "selector": "#a" })).expect("remove");

        let err = run(&mut page, json!({ "action": "querySelector", "selector": "#a" }))
            .expect_err("gone");
        assert!(matches!(err, Error::ElementNotFound { .. }));
    }

    #[test]
    fn test_get_page_info() {
        let mut page = page();
        let value = run(&mut page, json!({ "action": "getPageInfo" })).expect("info");

        assert_eq!(value["title"], "Fixture");
        assert_eq!(value["url"], "https://example.com/app");
        assert_eq!(value["metaTags"][0]["name"], "author");
        assert_eq!(value["metaTags"][0]["content"], "someone");
    }

    #[test]
    fn test_get_elements_info_shape() {
        let mut page = page();
        let value = run(
            &mut page,
            json!({ "action": "getElementsInfo", "selector": "#a" }),
        )
        .expect("info");

        assert_eq!(value[0]["tagName"], "DIV");
        assert_eq!(value[0]["classes"], json!(["one", "two"]));
        assert_eq!(value[0]["attributes"]["id"], "a");
    }

    #[test]
    fn test_click_and_log() {
        let mut page = page();

        let value = run(&mut page, json!({ "action": "click", "selector": "#a" }))
            .expect("click");
        assert_eq!(value, json!(true));

        let err = run(&mut page, json!({ "action": "click", "selector": "#nope" }))
            .expect_err("missing");
        assert!(matches!(err, Error::ElementNotFound { .. }));

        let value = run(&mut page, json!({ "action": "log", "message": "note" }))
            .expect("log");
        assert_eq!(value, json!(true));
    }

    #[test]
    fn test_restricted_target_rejected_before_dom_access() {
        let mut page =
            Page::parse("chrome://settings/", "<div id='a'></div>").expect("parse page");

        let err = run(&mut page, json!({ "action": "querySelector", "selector": "#a" }))
            .expect_err("restricted");
        assert!(matches!(err, Error::RestrictedTarget { origin } if origin.starts_with("chrome:")));

        // Even a pure log action is refused on a restricted page.
        let err = run(&mut page, json!({ "action": "log", "message": "x" }))
            .expect_err("restricted");
        assert!(matches!(err, Error::RestrictedTarget { .. }));
    }
}
