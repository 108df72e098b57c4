//! Pipeline files: a target plus an ordered list of steps, stored as TOML.
//!
//! ```toml
//! allowed_methods = ["append_text", "upper"]
//!
//! [target]
//! kind = "text"
//! args = [""]
//!
//! [[steps]]
//! method = "append_text"
//! args = ["ab"]
//! ```

use crate::errors::TimeMachineError;
use crate::fsm::RecorderPhase;
use crate::logging::JsonlLogger;
use crate::pipeline::recorder::PipelineRecorder;
use crate::recordable::Recordable;
use crate::render::{Capability, RenderedView};
use crate::runtime::FileSystem;
use crate::step::Step;
use crate::table::Table;
use crate::text::TextDocument;
use crate::types::TargetKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineFile {
    #[serde(default)]
    pub allowed_methods: Option<Vec<String>>,
    pub target: TargetSpec,
    #[serde(default)]
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TargetSpec {
    pub kind: TargetKind,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub kwargs: BTreeMap<String, Value>,
    /// Strings read as missing values (TOML has no null), e.g. `["NA"]`.
    #[serde(default)]
    pub null_values: Vec<String>,
}

impl TargetSpec {
    /// Constructor arguments with `null_values` replaced by JSON nulls.
    pub fn resolved_args(&self) -> (Vec<Value>, BTreeMap<String, Value>) {
        let mut args = self.args.clone();
        let mut kwargs = self.kwargs.clone();
        if !self.null_values.is_empty() {
            for value in args.iter_mut().chain(kwargs.values_mut()) {
                replace_null_markers(value, &self.null_values);
            }
        }
        (args, kwargs)
    }
}

fn replace_null_markers(value: &mut Value, markers: &[String]) {
    match value {
        Value::String(text) if markers.contains(text) => *value = Value::Null,
        Value::Array(items) => {
            for item in items {
                replace_null_markers(item, markers);
            }
        }
        Value::Object(map) => {
            for item in map.values_mut() {
                replace_null_markers(item, markers);
            }
        }
        _ => {}
    }
}

pub fn parse_pipeline(contents: &str) -> Result<PipelineFile, TimeMachineError> {
    toml::from_str(contents).map_err(|e| TimeMachineError::ConfigParse(e.to_string()))
}

pub fn load_pipeline(path: &Path, fs: &dyn FileSystem) -> Result<PipelineFile, TimeMachineError> {
    parse_pipeline(&fs.read_to_string(path)?)
}

/// A recorder over whichever target kind a pipeline file names.
#[derive(Debug, Clone)]
pub enum AnyRecorder {
    Table(PipelineRecorder<Table>),
    Text(PipelineRecorder<TextDocument>),
}

macro_rules! dispatch {
    ($self:expr, $recorder:ident => $body:expr) => {
        match $self {
            AnyRecorder::Table($recorder) => $body,
            AnyRecorder::Text($recorder) => $body,
        }
    };
}

impl AnyRecorder {
    pub fn kind(&self) -> TargetKind {
        match self {
            Self::Table(_) => TargetKind::Table,
            Self::Text(_) => TargetKind::Text,
        }
    }

    pub fn collect(&mut self) -> Result<(), TimeMachineError> {
        dispatch!(self, recorder => recorder.collect().map(|_| ()))
    }

    pub fn reset(&mut self) -> Result<(), TimeMachineError> {
        dispatch!(self, recorder => recorder.reset().map(|_| ()))
    }

    pub fn record(&mut self, step: Step) -> Result<(), TimeMachineError> {
        dispatch!(self, recorder => recorder.record(step).map(|_| ()))
    }

    pub fn render(&self, index: i64) -> Result<RenderedView, TimeMachineError> {
        dispatch!(self, recorder => recorder.render(index))
    }

    pub fn render_as(
        &self,
        index: i64,
        capability: Capability,
    ) -> Result<RenderedView, TimeMachineError> {
        dispatch!(self, recorder => recorder.render_as(index, capability))
    }

    pub fn set_annotation(&mut self, markup: Option<String>) {
        dispatch!(self, recorder => recorder.set_annotation(markup))
    }

    pub fn phase(&self) -> RecorderPhase {
        dispatch!(self, recorder => recorder.phase())
    }

    pub fn steps(&self) -> &[Step] {
        dispatch!(self, recorder => recorder.steps())
    }

    pub fn snapshot_count(&self) -> usize {
        dispatch!(self, recorder => recorder.snapshot_count())
    }

    pub fn clamp_index(&self, index: i64) -> usize {
        dispatch!(self, recorder => recorder.clamp_index(index))
    }

    pub fn fingerprints(&self) -> Vec<String> {
        dispatch!(self, recorder => recorder.fingerprints())
    }
}

/// Builds a recorder for `file` and queues its steps without running them.
///
/// The allow-list comes from the file, then `default_allowed` when non-empty,
/// otherwise every method the target supports.
pub fn build_recorder(
    file: &PipelineFile,
    default_allowed: &[String],
    logger: Option<JsonlLogger>,
) -> Result<AnyRecorder, TimeMachineError> {
    let allowed = match &file.allowed_methods {
        Some(list) => Some(list.as_slice()),
        None if !default_allowed.is_empty() => Some(default_allowed),
        None => None,
    };
    match file.target.kind {
        TargetKind::Table => {
            typed_recorder::<Table>(file, allowed, logger).map(AnyRecorder::Table)
        }
        TargetKind::Text => {
            typed_recorder::<TextDocument>(file, allowed, logger).map(AnyRecorder::Text)
        }
    }
}

fn typed_recorder<T: Recordable>(
    file: &PipelineFile,
    allowed: Option<&[String]>,
    logger: Option<JsonlLogger>,
) -> Result<PipelineRecorder<T>, TimeMachineError> {
    let (args, kwargs) = file.target.resolved_args();
    let mut recorder = match allowed {
        Some(list) => PipelineRecorder::<T>::create(&args, &kwargs, list)?,
        None => {
            let initial = T::construct(&args, &kwargs)
                .map_err(|failure| TimeMachineError::InvalidArgument(failure.to_string()))?;
            PipelineRecorder::with_all_methods(initial)
        }
    };
    if let Some(logger) = logger {
        recorder = recorder.with_logger(logger);
    }
    for step in &file.steps {
        recorder.record(step.clone())?;
    }
    Ok(recorder)
}

#[cfg(test)]
mod tests {
    use super::{build_recorder, parse_pipeline, AnyRecorder};
    use crate::errors::TimeMachineError;
    use crate::render::RenderedView;
    use crate::types::TargetKind;

    const TEXT_PIPELINE: &str = r#"
[target]
kind = "text"

[[steps]]
method = "append_text"
args = ["ab"]

[[steps]]
method = "append_text"
kwargs = { text = "cd" }

[[steps]]
method = "upper"
"#;

    #[test]
    fn text_pipeline_parses_builds_and_replays() {
        let file = parse_pipeline(TEXT_PIPELINE).expect("parse");
        assert_eq!(file.target.kind, TargetKind::Text);
        assert_eq!(file.steps.len(), 3);

        let mut recorder = build_recorder(&file, &[], None).expect("build");
        assert!(matches!(recorder, AnyRecorder::Text(_)));
        assert_eq!(recorder.snapshot_count(), 1);
        recorder.collect().expect("collect");
        assert_eq!(recorder.snapshot_count(), 4);
        assert_eq!(
            recorder.render(2).expect("render"),
            RenderedView::PlainText("abcd".to_string())
        );
    }

    #[test]
    fn file_allow_list_takes_precedence_over_default() {
        let mut file = parse_pipeline(TEXT_PIPELINE).expect("parse");
        file.allowed_methods = Some(vec!["append_text".to_string()]);
        let err = build_recorder(&file, &["upper".to_string()], None).expect_err("upper not listed");
        assert!(matches!(err, TimeMachineError::MethodNotAllowed(method) if method == "upper"));

        file.allowed_methods = None;
        let err = build_recorder(&file, &["upper".to_string()], None).expect_err("append not listed");
        assert!(matches!(err, TimeMachineError::MethodNotAllowed(method) if method == "append_text"));
    }

    #[test]
    fn table_target_and_bad_files() {
        let file = parse_pipeline(
            r#"
[target]
kind = "table"
kwargs = { data = { columns = ["a"], rows = [[1], [2]] } }

[[steps]]
method = "tab_header"
args = ["Numbers"]
"#,
        )
        .expect("parse");
        let mut recorder = build_recorder(&file, &[], None).expect("build");
        assert_eq!(recorder.kind(), TargetKind::Table);
        assert!(file.target.null_values.is_empty());
        recorder.collect().expect("collect");
        match recorder.render(9).expect("render") {
            RenderedView::Markup(markup) => assert!(markup.contains("Numbers")),
            other => panic!("expected markup, got {other:?}"),
        }

        assert!(matches!(
            parse_pipeline("[target]\nkind = \"chart\"\n"),
            Err(TimeMachineError::ConfigParse(_))
        ));
        let with_marker = parse_pipeline(
            "[target]\nkind = \"table\"\nnull_values = [\"NA\"]\nargs = [{ columns = [\"a\"], rows = [[\"NA\"], [1]] }]\n",
        )
        .expect("parse");
        let (args, _) = with_marker.target.resolved_args();
        assert_eq!(args[0]["rows"][0][0], serde_json::Value::Null);
        assert_eq!(args[0]["rows"][1][0], 1);

        let bad_data = parse_pipeline("[target]\nkind = \"table\"\n").expect("parse");
        assert!(matches!(
            build_recorder(&bad_data, &[], None),
            Err(TimeMachineError::InvalidArgument(_))
        ));
    }
}
