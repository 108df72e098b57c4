//! Capability-based rendering.
//!
//! A snapshot may support any subset of three renderings. Hosts never probe
//! for them ad hoc: [`render_preferred`] walks [`CAPABILITY_PRIORITY`] and uses
//! the first capability the value supports.

use crate::errors::TimeMachineError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Markup,
    PlainText,
    StructuredPayload,
}

/// Markup first, then plain text, then the structured payload.
pub const CAPABILITY_PRIORITY: [Capability; 3] = [
    Capability::Markup,
    Capability::PlainText,
    Capability::StructuredPayload,
];

impl Capability {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Markup => "markup",
            Self::PlainText => "plain_text",
            Self::StructuredPayload => "structured_payload",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "markup" | "html" => Some(Self::Markup),
            "plain_text" | "text" => Some(Self::PlainText),
            "structured_payload" | "json" => Some(Self::StructuredPayload),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RenderedView {
    Markup(String),
    PlainText(String),
    Structured(Value),
}

impl RenderedView {
    pub fn capability(&self) -> Capability {
        match self {
            Self::Markup(_) => Capability::Markup,
            Self::PlainText(_) => Capability::PlainText,
            Self::Structured(_) => Capability::StructuredPayload,
        }
    }

    /// Text form suitable for writing to a terminal or file.
    pub fn to_text(&self) -> String {
        match self {
            Self::Markup(markup) => markup.clone(),
            Self::PlainText(text) => text.clone(),
            Self::Structured(value) => {
                serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
            }
        }
    }
}

/// Rendering capabilities of a snapshot. Every method defaults to "unsupported".
pub trait Renderable {
    fn render_markup(&self) -> Option<String> {
        None
    }

    fn render_plain_text(&self) -> Option<String> {
        None
    }

    fn render_structured(&self) -> Option<Value> {
        None
    }

    /// Short type name used in error messages.
    fn kind_name(&self) -> &'static str;
}

pub fn render_capability<R: Renderable + ?Sized>(
    value: &R,
    capability: Capability,
) -> Option<RenderedView> {
    match capability {
        Capability::Markup => value.render_markup().map(RenderedView::Markup),
        Capability::PlainText => value.render_plain_text().map(RenderedView::PlainText),
        Capability::StructuredPayload => value.render_structured().map(RenderedView::Structured),
    }
}

pub fn render_preferred<R: Renderable + ?Sized>(value: &R) -> Result<RenderedView, TimeMachineError> {
    CAPABILITY_PRIORITY
        .iter()
        .find_map(|capability| render_capability(value, *capability))
        .ok_or_else(|| {
            TimeMachineError::NoRenderableRepresentation(format!(
                "{} supports none of markup, plain_text, structured_payload",
                value.kind_name()
            ))
        })
}

pub fn render_exact<R: Renderable + ?Sized>(
    value: &R,
    capability: Capability,
) -> Result<RenderedView, TimeMachineError> {
    render_capability(value, capability).ok_or_else(|| {
        TimeMachineError::NoRenderableRepresentation(format!(
            "{} does not support {}",
            value.kind_name(),
            capability.as_str()
        ))
    })
}

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}
