//! Operation catalog: tool calls and the DOM sub-protocol.
//!
//! Operations are tagged variants with typed required fields, so a
//! well-formed value cannot lack a mandatory argument. Parsing from wire
//! JSON goes through hand-written validators that name the missing field
//! and the action it belongs to, matching the errors callers see from the
//! live peer.
//!
//! # Tool methods
//!
//! | Method | Arguments |
//! |--------|-----------|
//! | `chrome_get_active_tab` | — |
//! | `chrome_get_all_tabs` | — |
//! | `chrome_execute_script` | `tab_id`, `operation` |
//! | `chrome_inject_css` | `tab_id`, `css` |
//! | `chrome_get_extension_info` | `extension_id?` |
//! | `chrome_send_message` | `extension_id`, `message` |
//! | `chrome_get_cookies` | `domain` |
//! | `chrome_capture_screenshot` | `tab_id?`, `format?`, `quality?`, `area?` |
//! | `chrome_create_tab` | `url?`, `active?`, `index?`, `windowId?` |

// ============================================================================
// Imports
// ============================================================================

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::error::{Error, Result};
use crate::identifiers::{TabId, WindowId};

// ============================================================================
// Operation
// ============================================================================

/// One call from the tool-calling client, parsed and validated.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    /// Information about the currently active tab.
    GetActiveTab,

    /// Information about all open tabs.
    GetAllTabs,

    /// A DOM primitive executed in the context of a tab's document.
    ExecuteScript {
        /// Target tab.
        tab_id: TabId,
        /// The validated DOM primitive.
        operation: DomAction,
    },

    /// CSS injected into a tab.
    InjectCss {
        /// Target tab.
        tab_id: TabId,
        /// CSS source to inject.
        css: String,
    },

    /// Installed-extension inventory, optionally narrowed to one id.
    GetExtensionInfo {
        /// Specific extension to query; all extensions when absent.
        extension_id: Option<String>,
    },

    /// A message relayed to an extension's background script.
    SendMessage {
        /// Target extension id.
        extension_id: String,
        /// Opaque message payload.
        message: Value,
    },

    /// Cookies for a domain.
    GetCookies {
        /// Domain to read cookies for.
        domain: String,
    },

    /// Screenshot of a tab's visible area.
    CaptureScreenshot(ScreenshotParams),

    /// A newly created tab.
    CreateTab(CreateTabParams),
}

impl Operation {
    /// Returns the wire method name of this operation.
    #[must_use]
    pub fn method(&self) -> &'static str {
        match self {
            Self::GetActiveTab => "chrome_get_active_tab",
            Self::GetAllTabs => "chrome_get_all_tabs",
            Self::ExecuteScript { .. } => "chrome_execute_script",
            Self::InjectCss { .. } => "chrome_inject_css",
            Self::GetExtensionInfo { .. } => "chrome_get_extension_info",
            Self::SendMessage { .. } => "chrome_send_message",
            Self::GetCookies { .. } => "chrome_get_cookies",
            Self::CaptureScreenshot(_) => "chrome_capture_screenshot",
            Self::CreateTab(_) => "chrome_create_tab",
        }
    }

    /// Parses and validates one wire call.
    ///
    /// # Errors
    ///
    /// - [`Error::UnknownOperation`] for a method outside the catalog
    /// - [`Error::MissingArgument`] naming the absent field and its operation
    /// - [`Error::InvalidArgument`] for present-but-unusable fields
    pub fn parse(method: &str, params: Option<&Value>) -> Result<Self> {
        match method {
            "chrome_get_active_tab" => Ok(Self::GetActiveTab),
            "chrome_get_all_tabs" => Ok(Self::GetAllTabs),
            "chrome_execute_script" => {
                let map = require_object(params, method)?;
                let tab_id = TabId::new(required_i64(map, "tab_id", method)?);
                let operation = map
                    .get("operation")
                    .ok_or_else(|| Error::missing_argument("operation", method))?;
                Ok(Self::ExecuteScript {
                    tab_id,
                    operation: DomAction::from_value(operation)?,
                })
            }
            "chrome_inject_css" => {
                let map = require_object(params, method)?;
                Ok(Self::InjectCss {
                    tab_id: TabId::new(required_i64(map, "tab_id", method)?),
                    css: required_string(map, "css", method)?,
                })
            }
            "chrome_get_extension_info" => {
                let extension_id = match params.and_then(Value::as_object) {
                    Some(map) => optional_string(map, "extension_id")?,
                    None => None,
                };
                Ok(Self::GetExtensionInfo { extension_id })
            }
            "chrome_send_message" => {
                let map = require_object(params, method)?;
                let message = map
                    .get("message")
                    .cloned()
                    .ok_or_else(|| Error::missing_argument("message", method))?;
                Ok(Self::SendMessage {
                    extension_id: required_string(map, "extension_id", method)?,
                    message,
                })
            }
            "chrome_get_cookies" => {
                let map = require_object(params, method)?;
                Ok(Self::GetCookies {
                    domain: required_string(map, "domain", method)?,
                })
            }
            "chrome_capture_screenshot" => {
                let params = params.cloned().unwrap_or_else(|| json!({}));
                let parsed: ScreenshotParams = serde_json::from_value(params)
                    .map_err(|e| Error::invalid_argument(format!("{method}: {e}")))?;
                Ok(Self::CaptureScreenshot(parsed))
            }
            "chrome_create_tab" => {
                let params = params.cloned().unwrap_or_else(|| json!({}));
                let parsed: CreateTabParams = serde_json::from_value(params)
                    .map_err(|e| Error::invalid_argument(format!("{method}: {e}")))?;
                Ok(Self::CreateTab(parsed))
            }
            other => Err(Error::unknown_operation(other)),
        }
    }
}

// ============================================================================
// ScreenshotParams / CreateTabParams
// ============================================================================

/// Arguments of `chrome_capture_screenshot`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreenshotParams {
    /// Target tab; the active tab when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tab_id: Option<TabId>,

    /// Image format.
    #[serde(default)]
    pub format: ImageFormat,

    /// Image quality for jpeg (0-100).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<u8>,

    /// Capture a specific area instead of the whole viewport.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub area: Option<CaptureArea>,
}

/// Screenshot image format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    /// PNG (default).
    #[default]
    Png,
    /// JPEG.
    Jpeg,
}

/// Rectangular capture area in viewport coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CaptureArea {
    /// Left edge.
    pub x: f64,
    /// Top edge.
    pub y: f64,
    /// Width in pixels.
    pub width: f64,
    /// Height in pixels.
    pub height: f64,
}

/// Arguments of `chrome_create_tab`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateTabParams {
    /// URL to open; the platform's default page when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Whether the new tab becomes active.
    #[serde(default = "default_true")]
    pub active: bool,

    /// Position of the tab within its window.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,

    /// Window to create the tab in.
    #[serde(default, rename = "windowId", skip_serializing_if = "Option::is_none")]
    pub window_id: Option<WindowId>,
}

fn default_true() -> bool {
    true
}

// ============================================================================
// DomAction
// ============================================================================

/// One primitive of the DOM sub-protocol.
///
/// A closed enumeration; each variant carries exactly the fields its action
/// requires, so required-field checking happens at parse time and the
/// executor never sees a half-formed action.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action")]
pub enum DomAction {
    /// First element matching a selector.
    #[serde(rename = "querySelector")]
    QuerySelector {
        /// CSS selector.
        selector: String,
    },

    /// All elements matching a selector.
    #[serde(rename = "querySelectorAll")]
    QuerySelectorAll {
        /// CSS selector.
        selector: String,
    },

    /// Replace an element's text content.
    #[serde(rename = "setText")]
    SetText {
        /// CSS selector.
        selector: String,
        /// New text content.
        value: String,
    },

    /// Replace an element's inner markup.
    #[serde(rename = "setHTML")]
    SetHtml {
        /// CSS selector.
        selector: String,
        /// New inner markup.
        value: String,
    },

    /// Set an attribute.
    #[serde(rename = "setAttribute")]
    SetAttribute {
        /// CSS selector.
        selector: String,
        /// Attribute name.
        attribute: String,
        /// Attribute value.
        value: String,
    },

    /// Remove an attribute.
    #[serde(rename = "removeAttribute")]
    RemoveAttribute {
        /// CSS selector.
        selector: String,
        /// Attribute name.
        attribute: String,
    },

    /// Add a class.
    #[serde(rename = "addClass")]
    AddClass {
        /// CSS selector.
        selector: String,
        /// Class name.
        value: String,
    },

    /// Remove a class.
    #[serde(rename = "removeClass")]
    RemoveClass {
        /// CSS selector.
        selector: String,
        /// Class name.
        value: String,
    },

    /// Toggle a class.
    #[serde(rename = "toggleClass")]
    ToggleClass {
        /// CSS selector.
        selector: String,
        /// Class name.
        value: String,
    },

    /// Create a detached element, returned by marker id.
    #[serde(rename = "createElement", rename_all = "camelCase")]
    CreateElement {
        /// Tag name of the new element.
        tag_name: String,
        /// Initial attributes.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        attributes: Option<BTreeMap<String, String>>,
        /// Initial text content.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        inner_text: Option<String>,
    },

    /// Attach a previously created element under a parent.
    #[serde(rename = "appendChild", rename_all = "camelCase")]
    AppendChild {
        /// CSS selector of the parent.
        selector: String,
        /// Marker id returned by `createElement`.
        element_id: String,
    },

    /// Detach an element from the document.
    #[serde(rename = "removeElement")]
    RemoveElement {
        /// CSS selector.
        selector: String,
    },

    /// Title, URL and meta tags of the document.
    #[serde(rename = "getPageInfo")]
    GetPageInfo,

    /// Tag/text/attribute/class summary of all matching elements.
    #[serde(rename = "getElementsInfo")]
    GetElementsInfo {
        /// CSS selector.
        selector: String,
    },

    /// Write a message to the page log.
    #[serde(rename = "log")]
    Log {
        /// Message to log.
        message: String,
    },

    /// Click an element.
    #[serde(rename = "click")]
    Click {
        /// CSS selector.
        selector: String,
    },
}

impl DomAction {
    /// Returns the wire name of this action.
    #[must_use]
    pub fn action_name(&self) -> &'static str {
        match self {
            Self::QuerySelector { .. } => "querySelector",
            Self::QuerySelectorAll { .. } => "querySelectorAll",
            Self::SetText { .. } => "setText",
            Self::SetHtml { .. } => "setHTML",
            Self::SetAttribute { .. } => "setAttribute",
            Self::RemoveAttribute { .. } => "removeAttribute",
            Self::AddClass { .. } => "addClass",
            Self::RemoveClass { .. } => "removeClass",
            Self::ToggleClass { .. } => "toggleClass",
            Self::CreateElement { .. } => "createElement",
            Self::AppendChild { .. } => "appendChild",
            Self::RemoveElement { .. } => "removeElement",
            Self::GetPageInfo => "getPageInfo",
            Self::GetElementsInfo { .. } => "getElementsInfo",
            Self::Log { .. } => "log",
            Self::Click { .. } => "click",
        }
    }

    /// Parses one DOM operation object from the wire.
    ///
    /// The `value` field accepts strings, numbers and booleans and coerces
    /// them to their string form, as the live page does.
    ///
    /// # Errors
    ///
    /// - [`Error::UnknownOperation`] for an action outside the enumeration
    /// - [`Error::MissingArgument`] naming the absent field and its action
    /// - [`Error::InvalidArgument`] when the operation is not an object
    pub fn from_value(value: &Value) -> Result<Self> {
        let map = value
            .as_object()
            .ok_or_else(|| Error::invalid_argument("operation must be an object"))?;
        let action = map
            .get("action")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::missing_argument("action", "operation"))?;

        match action {
            "querySelector" => Ok(Self::QuerySelector {
                selector: required_string(map, "selector", action)?,
            }),
            "querySelectorAll" => Ok(Self::QuerySelectorAll {
                selector: required_string(map, "selector", action)?,
            }),
            "setText" => Ok(Self::SetText {
                selector: required_string(map, "selector", action)?,
                value: required_scalar(map, "value", action)?,
            }),
            "setHTML" => Ok(Self::SetHtml {
                selector: required_string(map, "selector", action)?,
                value: required_scalar(map, "value", action)?,
            }),
            "setAttribute" => Ok(Self::SetAttribute {
                selector: required_string(map, "selector", action)?,
                attribute: required_string(map, "attribute", action)?,
                value: required_scalar(map, "value", action)?,
            }),
            "removeAttribute" => Ok(Self::RemoveAttribute {
                selector: required_string(map, "selector", action)?,
                attribute: required_string(map, "attribute", action)?,
            }),
            "addClass" => Ok(Self::AddClass {
                selector: required_string(map, "selector", action)?,
                value: required_scalar(map, "value", action)?,
            }),
            "removeClass" => Ok(Self::RemoveClass {
                selector: required_string(map, "selector", action)?,
                value: required_scalar(map, "value", action)?,
            }),
            "toggleClass" => Ok(Self::ToggleClass {
                selector: required_string(map, "selector", action)?,
                value: required_scalar(map, "value", action)?,
            }),
            "createElement" => {
                let attributes = match map.get("attributes") {
                    None | Some(Value::Null) => None,
                    Some(Value::Object(attrs)) => {
                        let mut out = BTreeMap::new();
                        for (k, v) in attrs {
                            let coerced = scalar_string(v).ok_or_else(|| {
                                Error::invalid_argument(format!(
                                    "attribute `{k}` must be a string, number or boolean"
                                ))
                            })?;
                            out.insert(k.clone(), coerced);
                        }
                        Some(out)
                    }
                    Some(_) => {
                        return Err(Error::invalid_argument("attributes must be an object"));
                    }
                };
                Ok(Self::CreateElement {
                    tag_name: required_string(map, "tagName", action)?,
                    attributes,
                    inner_text: optional_string(map, "innerText")?,
                })
            }
            "appendChild" => Ok(Self::AppendChild {
                selector: required_string(map, "selector", action)?,
                element_id: required_string(map, "elementId", action)?,
            }),
            "removeElement" => Ok(Self::RemoveElement {
                selector: required_string(map, "selector", action)?,
            }),
            "getPageInfo" => Ok(Self::GetPageInfo),
            "getElementsInfo" => Ok(Self::GetElementsInfo {
                selector: required_string(map, "selector", action)?,
            }),
            "log" => Ok(Self::Log {
                message: required_string(map, "message", action)?,
            }),
            "click" => Ok(Self::Click {
                selector: required_string(map, "selector", action)?,
            }),
            other => Err(Error::unknown_operation(other)),
        }
    }
}

// ============================================================================
// Field helpers
// ============================================================================

fn require_object<'a>(params: Option<&'a Value>, method: &str) -> Result<&'a Map<String, Value>> {
    params
        .and_then(Value::as_object)
        .ok_or_else(|| Error::invalid_argument(format!("{method}: params must be an object")))
}

fn required_string(map: &Map<String, Value>, field: &str, action: &str) -> Result<String> {
    match map.get(field) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(Error::invalid_argument(format!(
            "field `{field}` of {action} must be a string"
        ))),
        None => Err(Error::missing_argument(field, action)),
    }
}

fn required_i64(map: &Map<String, Value>, field: &str, action: &str) -> Result<i64> {
    match map.get(field) {
        Some(v) => v.as_i64().ok_or_else(|| {
            Error::invalid_argument(format!("field `{field}` of {action} must be an integer"))
        }),
        None => Err(Error::missing_argument(field, action)),
    }
}

/// Required field accepting string, number or boolean, coerced to a string.
fn required_scalar(map: &Map<String, Value>, field: &str, action: &str) -> Result<String> {
    match map.get(field) {
        Some(v) => scalar_string(v).ok_or_else(|| {
            Error::invalid_argument(format!(
                "field `{field}` of {action} must be a string, number or boolean"
            ))
        }),
        None => Err(Error::missing_argument(field, action)),
    }
}

fn optional_string(map: &Map<String, Value>, field: &str) -> Result<Option<String>> {
    match map.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(Error::invalid_argument(format!(
            "field `{field}` must be a string"
        ))),
    }
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

// ============================================================================
// Descriptors
// ============================================================================

/// Catalog entry for the outer tool-listing exchange.
#[derive(Debug, Clone, Serialize)]
pub struct OperationDescriptor {
    /// Wire method name.
    pub name: &'static str,
    /// One-line description.
    pub description: &'static str,
    /// JSON schema of the arguments.
    pub schema: Value,
}

/// Returns the static operation catalog.
///
/// The DOM action list mirrors [`DomAction`]; per-action required fields
/// live in the variants themselves, so the schema only enumerates names.
#[must_use]
pub fn descriptors() -> Vec<OperationDescriptor> {
    vec![
        OperationDescriptor {
            name: "chrome_get_active_tab",
            description: "Get information about the currently active tab",
            schema: json!({ "type": "object", "properties": {} }),
        },
        OperationDescriptor {
            name: "chrome_get_all_tabs",
            description: "Get information about all open tabs",
            schema: json!({ "type": "object", "properties": {} }),
        },
        OperationDescriptor {
            name: "chrome_execute_script",
            description: "Execute DOM operations in the context of a web page",
            schema: json!({
                "type": "object",
                "properties": {
                    "tab_id": { "type": "number" },
                    "operation": {
                        "type": "object",
                        "required": ["action"],
                        "properties": {
                            "action": {
                                "type": "string",
                                "enum": [
                                    "querySelector", "querySelectorAll", "setText",
                                    "setHTML", "setAttribute", "removeAttribute",
                                    "addClass", "removeClass", "toggleClass",
                                    "createElement", "appendChild", "removeElement",
                                    "getPageInfo", "getElementsInfo", "log", "click",
                                ],
                            },
                            "selector": { "type": "string" },
                            "value": { "type": ["string", "number", "boolean"] },
                            "attribute": { "type": "string" },
                            "tagName": { "type": "string" },
                            "attributes": { "type": "object" },
                            "innerText": { "type": "string" },
                            "elementId": { "type": "string" },
                            "message": { "type": "string" },
                        },
                    },
                },
                "required": ["tab_id", "operation"],
            }),
        },
        OperationDescriptor {
            name: "chrome_inject_css",
            description: "Inject CSS into a web page",
            schema: json!({
                "type": "object",
                "properties": {
                    "tab_id": { "type": "number" },
                    "css": { "type": "string" },
                },
                "required": ["tab_id", "css"],
            }),
        },
        OperationDescriptor {
            name: "chrome_get_extension_info",
            description: "Get information about installed extensions",
            schema: json!({
                "type": "object",
                "properties": { "extension_id": { "type": "string" } },
            }),
        },
        OperationDescriptor {
            name: "chrome_send_message",
            description: "Send a message to an extension's background script",
            schema: json!({
                "type": "object",
                "properties": {
                    "extension_id": { "type": "string" },
                    "message": { "type": "object" },
                },
                "required": ["extension_id", "message"],
            }),
        },
        OperationDescriptor {
            name: "chrome_get_cookies",
            description: "Get cookies for a specific domain",
            schema: json!({
                "type": "object",
                "properties": { "domain": { "type": "string" } },
                "required": ["domain"],
            }),
        },
        OperationDescriptor {
            name: "chrome_capture_screenshot",
            description: "Take a screenshot of the current tab",
            schema: json!({
                "type": "object",
                "properties": {
                    "tab_id": { "type": "number" },
                    "format": { "type": "string", "enum": ["png", "jpeg"], "default": "png" },
                    "quality": { "type": "number", "minimum": 0, "maximum": 100 },
                    "area": {
                        "type": "object",
                        "properties": {
                            "x": { "type": "number" },
                            "y": { "type": "number" },
                            "width": { "type": "number" },
                            "height": { "type": "number" },
                        },
                        "required": ["x", "y", "width", "height"],
                    },
                },
            }),
        },
        OperationDescriptor {
            name: "chrome_create_tab",
            description: "Create a new tab with specified URL and options",
            schema: json!({
                "type": "object",
                "properties": {
                    "url": { "type": "string" },
                    "active": { "type": "boolean", "default": true },
                    "index": { "type": "number" },
                    "windowId": { "type": "number" },
                },
            }),
        },
    ]
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_no_param_methods() {
        let op = Operation::parse("chrome_get_all_tabs", None).expect("parse");
        assert_eq!(op, Operation::GetAllTabs);
        assert_eq!(op.method(), "chrome_get_all_tabs");

        let op = Operation::parse("chrome_get_active_tab", None).expect("parse");
        assert_eq!(op, Operation::GetActiveTab);
    }

    #[test]
    fn test_parse_unknown_method() {
        let err = Operation::parse("chrome_rm_rf", None).expect_err("unknown");
        assert!(matches!(err, Error::UnknownOperation { method } if method == "chrome_rm_rf"));
    }

    #[test]
    fn test_parse_execute_script() {
        let params = json!({
            "tab_id": 7,
            "operation": { "action": "setText", "selector": "#a", "value": "hi" },
        });
        let op = Operation::parse("chrome_execute_script", Some(&params)).expect("parse");

        match op {
            Operation::ExecuteScript { tab_id, operation } => {
                assert_eq!(tab_id, TabId::new(7));
                assert_eq!(
                    operation,
                    DomAction::SetText {
                        selector: "#a".into(),
                        value: "hi".into(),
                    }
                );
            }
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn test_parse_execute_script_missing_tab() {
        let params = json!({ "operation": { "action": "getPageInfo" } });
        let err = Operation::parse("chrome_execute_script", Some(&params)).expect_err("missing");
        assert!(matches!(err, Error::MissingArgument { field, .. } if field == "tab_id"));
    }

    #[test]
    fn test_dom_action_missing_selector_names_action() {
        let err = DomAction::from_value(&json!({ "action": "querySelector" })).expect_err("missing");
        match err {
            Error::MissingArgument { field, action } => {
                assert_eq!(field, "selector");
                assert_eq!(action, "querySelector");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_dom_action_set_attribute_requires_three_fields() {
        let err = DomAction::from_value(&json!({
            "action": "setAttribute",
            "selector": "#a",
            "value": "1",
        }))
        .expect_err("missing attribute");
        assert!(matches!(err, Error::MissingArgument { field, .. } if field == "attribute"));
    }

    #[test]
    fn test_dom_action_unknown_kind() {
        let err = DomAction::from_value(&json!({ "action": "detonate" })).expect_err("unknown");
        assert!(matches!(err, Error::UnknownOperation { method } if method == "detonate"));
    }

    #[test]
    fn test_dom_action_scalar_coercion() {
        let action = DomAction::from_value(&json!({
            "action": "setText",
            "selector": "#n",
            "value": 42,
        }))
        .expect("parse");
        assert_eq!(
            action,
            DomAction::SetText {
                selector: "#n".into(),
                value: "42".into(),
            }
        );

        let action = DomAction::from_value(&json!({
            "action": "setAttribute",
            "selector": "#n",
            "attribute": "data-on",
            "value": true,
        }))
        .expect("parse");
        assert!(matches!(action, DomAction::SetAttribute { value, .. } if value == "true"));
    }

    #[test]
    fn test_dom_action_create_element_optionals() {
        let action = DomAction::from_value(&json!({
            "action": "createElement",
            "tagName": "div",
            "innerText": "hi",
        }))
        .expect("parse");

        match action {
            DomAction::CreateElement {
                tag_name,
                attributes,
                inner_text,
            } => {
                assert_eq!(tag_name, "div");
                assert!(attributes.is_none());
                assert_eq!(inner_text.as_deref(), Some("hi"));
            }
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn test_dom_action_serializes_wire_names() {
        let action = DomAction::SetHtml {
            selector: "#a".into(),
            value: "<b>x</b>".into(),
        };
        let value = serde_json::to_value(&action).expect("serialize");
        assert_eq!(value["action"], "setHTML");

        let action = DomAction::AppendChild {
            selector: "body".into(),
            element_id: "bridge-1".into(),
        };
        let value = serde_json::to_value(&action).expect("serialize");
        assert_eq!(value["action"], "appendChild");
        assert_eq!(value["elementId"], "bridge-1");
    }

    #[test]
    fn test_parse_create_tab_defaults() {
        let op = Operation::parse("chrome_create_tab", Some(&json!({ "url": "https://a.com" })))
            .expect("parse");
        match op {
            Operation::CreateTab(params) => {
                assert_eq!(params.url.as_deref(), Some("https://a.com"));
                assert!(params.active);
                assert!(params.window_id.is_none());
            }
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn test_parse_screenshot_defaults() {
        let op = Operation::parse("chrome_capture_screenshot", None).expect("parse");
        match op {
            Operation::CaptureScreenshot(params) => {
                assert_eq!(params.format, ImageFormat::Png);
                assert!(params.tab_id.is_none());
            }
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn test_descriptors_cover_catalog() {
        let names: Vec<_> = descriptors().into_iter().map(|d| d.name).collect();
        assert_eq!(names.len(), 9);
        assert!(names.contains(&"chrome_execute_script"));
        assert!(names.contains(&"chrome_create_tab"));
    }
}
