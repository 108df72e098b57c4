use crate::errors::{StepFailure, TimeMachineError};
use crate::pipeline::recorder::PipelineRecorder;
use crate::recordable::Recordable;
use crate::render::Renderable;
use crate::step::{bind, Signature, Step};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;

pub const TEXT_METHODS: [&str; 6] = [
    "append_text",
    "prepend_text",
    "upper",
    "lower",
    "replace",
    "trim",
];

const TEXT: Signature = Signature::new(&["text"]);
const NO_ARGS: Signature = Signature::new(&[]);
const REPLACE: Signature = Signature::new(&["from", "to"]);

/// Plain string wrapper. Renders as plain text or a JSON payload, never markup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextDocument {
    pub text: String,
}

impl TextDocument {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

impl Renderable for TextDocument {
    fn render_plain_text(&self) -> Option<String> {
        Some(self.text.clone())
    }

    fn render_structured(&self) -> Option<Value> {
        Some(json!({"text": self.text, "chars": self.text.chars().count()}))
    }

    fn kind_name(&self) -> &'static str {
        "text"
    }
}

impl Recordable for TextDocument {
    fn construct(args: &[Value], kwargs: &BTreeMap<String, Value>) -> Result<Self, StepFailure> {
        let value = args.first().or_else(|| kwargs.get("text"));
        match value {
            None | Some(Value::Null) => Ok(Self::default()),
            Some(Value::String(text)) => Ok(Self::new(text.clone())),
            Some(other) => Err(StepFailure::new(format!(
                "text document expects a string, got {other}"
            ))),
        }
    }

    fn supported_methods() -> &'static [&'static str] {
        &TEXT_METHODS
    }

    fn apply(&mut self, step: &Step) -> Result<(), StepFailure> {
        match step.method.as_str() {
            "append_text" => {
                let args = bind(step, &TEXT)?;
                self.text.push_str(args.required_str("text")?);
            }
            "prepend_text" => {
                let args = bind(step, &TEXT)?;
                self.text.insert_str(0, args.required_str("text")?);
            }
            "upper" => {
                bind(step, &NO_ARGS)?;
                self.text = self.text.to_uppercase();
            }
            "lower" => {
                bind(step, &NO_ARGS)?;
                self.text = self.text.to_lowercase();
            }
            "replace" => {
                let args = bind(step, &REPLACE)?;
                let from = args.required_str("from")?;
                if from.is_empty() {
                    return Err(StepFailure::new("replace() argument 'from' must not be empty"));
                }
                self.text = self.text.replace(from, args.required_str("to")?);
            }
            "trim" => {
                bind(step, &NO_ARGS)?;
                self.text = self.text.trim().to_string();
            }
            other => {
                return Err(StepFailure::new(format!("text has no method {other}()")));
            }
        }
        Ok(())
    }
}

/// Typed builders over `PipelineRecorder<TextDocument>`.
pub trait TextSteps: Sized {
    fn append_text(&mut self, text: &str) -> Result<&mut Self, TimeMachineError>;
    fn prepend_text(&mut self, text: &str) -> Result<&mut Self, TimeMachineError>;
    fn upper(&mut self) -> Result<&mut Self, TimeMachineError>;
    fn lower(&mut self) -> Result<&mut Self, TimeMachineError>;
    fn replace(&mut self, from: &str, to: &str) -> Result<&mut Self, TimeMachineError>;
    fn trim(&mut self) -> Result<&mut Self, TimeMachineError>;
}

impl TextSteps for PipelineRecorder<TextDocument> {
    fn append_text(&mut self, text: &str) -> Result<&mut Self, TimeMachineError> {
        self.record(Step::new("append_text").arg(text))
    }

    fn prepend_text(&mut self, text: &str) -> Result<&mut Self, TimeMachineError> {
        self.record(Step::new("prepend_text").arg(text))
    }

    fn upper(&mut self) -> Result<&mut Self, TimeMachineError> {
        self.record(Step::new("upper"))
    }

    fn lower(&mut self) -> Result<&mut Self, TimeMachineError> {
        self.record(Step::new("lower"))
    }

    fn replace(&mut self, from: &str, to: &str) -> Result<&mut Self, TimeMachineError> {
        self.record(Step::new("replace").arg(from).arg(to))
    }

    fn trim(&mut self) -> Result<&mut Self, TimeMachineError> {
        self.record(Step::new("trim"))
    }
}
