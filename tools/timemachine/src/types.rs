use crate::render::Capability;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Richest capability the snapshot supports.
    #[default]
    Auto,
    Markup,
    Text,
    Json,
}

impl OutputFormat {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "auto" => Some(Self::Auto),
            "markup" | "html" => Some(Self::Markup),
            "text" => Some(Self::Text),
            "json" => Some(Self::Json),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Markup => "markup",
            Self::Text => "text",
            Self::Json => "json",
        }
    }

    /// `None` means "walk the capability priority".
    pub fn capability(self) -> Option<Capability> {
        match self {
            Self::Auto => None,
            Self::Markup => Some(Capability::Markup),
            Self::Text => Some(Capability::PlainText),
            Self::Json => Some(Capability::StructuredPayload),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Table,
    Text,
}

impl TargetKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Table => "table",
            Self::Text => "text",
        }
    }
}
