//! `PipelineRecorder`: allow-listed step queue plus replayed snapshot history.

use crate::errors::TimeMachineError;
use crate::fsm::{next_phase, PhaseEvent, RecorderPhase};
use crate::logging::{JsonlLogger, LogEvent, LogLevel};
use crate::recordable::Recordable;
use crate::render::{render_exact, render_preferred, Capability, RenderedView};
use crate::step::Step;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::cell::Cell;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone)]
pub struct PipelineRecorder<T: Recordable> {
    initial: T,
    allowed: BTreeSet<String>,
    steps: Vec<Step>,
    /// Always starts with a copy of `initial`.
    snapshots: Vec<T>,
    phase: RecorderPhase,
    annotation: Option<String>,
    logger: Option<JsonlLogger>,
    dropped_log_events: Cell<usize>,
}

impl<T: Recordable> PipelineRecorder<T> {
    /// Builds the wrapped object from constructor arguments.
    pub fn create<S: AsRef<str>>(
        args: &[Value],
        kwargs: &BTreeMap<String, Value>,
        allowed_methods: &[S],
    ) -> Result<Self, TimeMachineError> {
        let initial = T::construct(args, kwargs)
            .map_err(|failure| TimeMachineError::InvalidArgument(failure.to_string()))?;
        Self::new(initial, allowed_methods)
    }

    pub fn new<S: AsRef<str>>(initial: T, allowed_methods: &[S]) -> Result<Self, TimeMachineError> {
        let supported = T::supported_methods();
        let mut allowed = BTreeSet::new();
        for method in allowed_methods {
            let method = method.as_ref();
            if !supported.contains(&method) {
                return Err(TimeMachineError::MethodNotAllowed(format!(
                    "{method} is not a method of {}",
                    initial.kind_name()
                )));
            }
            allowed.insert(method.to_string());
        }

        Ok(Self {
            snapshots: vec![initial.clone()],
            initial,
            allowed,
            steps: Vec::new(),
            phase: RecorderPhase::Recording,
            annotation: None,
            logger: None,
            dropped_log_events: Cell::new(0),
        })
    }

    /// Allow-list covering every method the wrapped type supports.
    pub fn with_all_methods(initial: T) -> Self {
        let allowed = T::supported_methods()
            .iter()
            .map(|method| method.to_string())
            .collect();
        Self {
            snapshots: vec![initial.clone()],
            initial,
            allowed,
            steps: Vec::new(),
            phase: RecorderPhase::Recording,
            annotation: None,
            logger: None,
            dropped_log_events: Cell::new(0),
        }
    }

    pub fn with_logger(mut self, logger: JsonlLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Markup attached to every rendered snapshot (never to stored history).
    pub fn set_annotation(&mut self, markup: Option<String>) {
        self.annotation = markup;
    }

    pub fn annotation(&self) -> Option<&str> {
        self.annotation.as_deref()
    }

    /// Queues `step` without running it.
    pub fn record(&mut self, step: Step) -> Result<&mut Self, TimeMachineError> {
        if !self.allowed.contains(&step.method) {
            self.log(
                LogLevel::Warn,
                "step_rejected",
                json!({"method": step.method, "reason": "not allow-listed"}),
            );
            return Err(TimeMachineError::MethodNotAllowed(step.method));
        }

        let phase = match next_phase(self.phase, PhaseEvent::Record) {
            Ok(phase) => phase,
            Err(error) => {
                self.log(
                    LogLevel::Warn,
                    "step_rejected",
                    json!({"method": step.method, "reason": error.to_string()}),
                );
                return Err(error);
            }
        };

        self.log(
            LogLevel::Info,
            "step_recorded",
            json!({"index": self.steps.len(), "summary": step.summary()}),
        );
        self.steps.push(step);
        self.phase = phase;
        Ok(self)
    }

    pub fn call(
        &mut self,
        method: &str,
        args: Vec<Value>,
        kwargs: BTreeMap<String, Value>,
    ) -> Result<&mut Self, TimeMachineError> {
        self.record(Step {
            method: method.to_string(),
            args,
            kwargs,
        })
    }

    /// Replays every queued step. A second call is a no-op.
    ///
    /// On failure the partial history is rolled back to the initial snapshot,
    /// the recorder stays in `Recording` and the queued steps are kept.
    pub fn collect(&mut self) -> Result<&mut Self, TimeMachineError> {
        if self.phase == RecorderPhase::Collected {
            return Ok(self);
        }
        let next = next_phase(self.phase, PhaseEvent::Collect)?;

        self.log(
            LogLevel::Info,
            "collect_started",
            json!({"steps": self.steps.len()}),
        );

        if let Err(error) = replay(&self.steps, &mut self.snapshots) {
            self.snapshots.truncate(1);
            self.log(
                LogLevel::Error,
                "collect_failed",
                json!({"error": error.to_string()}),
            );
            return Err(error);
        }

        self.phase = next;
        let fingerprints = self.fingerprints();
        self.log(
            LogLevel::Info,
            "collect_completed",
            json!({"snapshots": self.snapshots.len(), "fingerprints": fingerprints}),
        );
        Ok(self)
    }

    /// Drops every step and all history except the initial snapshot.
    pub fn reset(&mut self) -> Result<&mut Self, TimeMachineError> {
        self.phase = next_phase(self.phase, PhaseEvent::Reset)?;
        let dropped = self.steps.len();
        self.steps.clear();
        self.snapshots.clear();
        self.snapshots.push(self.initial.clone());
        self.log(LogLevel::Info, "reset", json!({"dropped_steps": dropped}));
        Ok(self)
    }

    /// Replaces the initial object and restarts history from it.
    pub fn reset_with(&mut self, initial: T) -> Result<&mut Self, TimeMachineError> {
        self.initial = initial;
        self.reset()
    }

    pub fn phase(&self) -> RecorderPhase {
        self.phase
    }

    pub fn is_collected(&self) -> bool {
        self.phase == RecorderPhase::Collected
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    pub fn allowed_methods(&self) -> impl Iterator<Item = &str> {
        self.allowed.iter().map(String::as_str)
    }

    /// Log events that could not be written. The first drop is reported on stderr.
    pub fn dropped_log_events(&self) -> usize {
        self.dropped_log_events.get()
    }

    pub fn initial(&self) -> &T {
        &self.initial
    }

    /// Owned copy of the history; later recorder changes never affect it.
    pub fn snapshots(&self) -> Vec<T> {
        self.snapshots.clone()
    }

    pub fn snapshot_count(&self) -> usize {
        self.snapshots.len()
    }

    pub fn clamp_index(&self, index: i64) -> usize {
        let last = self.snapshots.len().saturating_sub(1);
        usize::try_from(index).unwrap_or(0).min(last)
    }

    pub fn snapshot(&self, index: i64) -> &T {
        &self.snapshots[self.clamp_index(index)]
    }

    pub fn render(&self, index: i64) -> Result<RenderedView, TimeMachineError> {
        let view = render_preferred(&self.presented(index))?;
        self.log_render(index, view.capability());
        Ok(view)
    }

    pub fn render_as(
        &self,
        index: i64,
        capability: Capability,
    ) -> Result<RenderedView, TimeMachineError> {
        let view = render_exact(&self.presented(index), capability)?;
        self.log_render(index, capability);
        Ok(view)
    }

    pub fn render_all(&self) -> Result<Vec<RenderedView>, TimeMachineError> {
        (0..self.snapshots.len())
            .map(|index| render_preferred(&self.presented(index as i64)))
            .collect()
    }

    /// Short sha256 digest per snapshot, from its richest machine-readable form.
    pub fn fingerprints(&self) -> Vec<String> {
        self.snapshots.iter().map(fingerprint).collect()
    }

    fn presented(&self, index: i64) -> T {
        let mut snapshot = self.snapshot(index).clone();
        if let Some(markup) = &self.annotation {
            snapshot.annotate(markup);
        }
        snapshot
    }

    fn log_render(&self, requested: i64, capability: Capability) {
        self.log(
            LogLevel::Debug,
            "render",
            json!({
                "requested": requested,
                "index": self.clamp_index(requested),
                "capability": capability.as_str(),
            }),
        );
    }

    fn log(&self, level: LogLevel, event_type: &str, payload: Value) {
        if let Some(logger) = &self.logger {
            let mut payload = payload;
            if let Value::Object(map) = &mut payload {
                map.insert("phase".to_string(), json!(self.phase.as_str()));
            }
            let appended = logger.append(&LogEvent {
                level,
                event_type,
                payload,
            });
            if let Err(error) = appended {
                let dropped = self.dropped_log_events.get();
                if dropped == 0 {
                    eprintln!("event log {} unavailable: {error}", logger.path.display());
                }
                self.dropped_log_events.set(dropped + 1);
            }
        }
    }
}

fn replay<T: Recordable>(steps: &[Step], snapshots: &mut Vec<T>) -> Result<(), TimeMachineError> {
    for (index, step) in steps.iter().enumerate() {
        let mut next = snapshots
            .last()
            .cloned()
            .ok_or_else(|| TimeMachineError::InvalidState("history has no initial snapshot".to_string()))?;
        next.apply(step)
            .map_err(|failure| TimeMachineError::StepExecution {
                index,
                method: step.method.clone(),
                reason: failure.to_string(),
            })?;
        snapshots.push(next);
    }
    Ok(())
}

fn fingerprint<T: Recordable>(snapshot: &T) -> String {
    let material = snapshot
        .render_structured()
        .map(|value| value.to_string())
        .or_else(|| snapshot.render_plain_text())
        .or_else(|| snapshot.render_markup())
        .unwrap_or_default();
    let digest = Sha256::digest(material.as_bytes());
    digest[..8].iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::StepFailure;
    use crate::render::Renderable;

    /// Counter whose `add` fails on negative input; renders plain text only.
    #[derive(Debug, Clone, PartialEq)]
    struct Counter(i64);

    impl Renderable for Counter {
        fn render_plain_text(&self) -> Option<String> {
            Some(self.0.to_string())
        }

        fn kind_name(&self) -> &'static str {
            "counter"
        }
    }

    impl Recordable for Counter {
        fn construct(args: &[Value], _kwargs: &BTreeMap<String, Value>) -> Result<Self, StepFailure> {
            let start = args.first().and_then(Value::as_i64).unwrap_or(0);
            Ok(Self(start))
        }

        fn supported_methods() -> &'static [&'static str] {
            &["add", "double"]
        }

        fn apply(&mut self, step: &Step) -> Result<(), StepFailure> {
            match step.method.as_str() {
                "add" => {
                    let amount = step
                        .args
                        .first()
                        .and_then(Value::as_i64)
                        .ok_or_else(|| StepFailure::new("add() needs an integer"))?;
                    if amount < 0 {
                        return Err(StepFailure::new("negative amount"));
                    }
                    self.0 += amount;
                }
                "double" => self.0 *= 2,
                other => return Err(StepFailure::new(format!("unknown method {other}"))),
            }
            Ok(())
        }

        fn annotate(&mut self, _markup: &str) {
            self.0 += 1000;
        }
    }

    fn add(amount: i64) -> Step {
        Step::new("add").arg(amount)
    }

    #[test]
    fn recording_does_not_execute_and_collect_builds_history() {
        let mut recorder = PipelineRecorder::new(Counter(1), &["add", "double"]).expect("recorder");
        recorder
            .record(add(2))
            .expect("add")
            .record(Step::new("double"))
            .expect("double");
        assert_eq!(recorder.snapshot_count(), 1);
        assert_eq!(recorder.snapshots(), vec![Counter(1)]);

        recorder.collect().expect("collect");
        assert!(recorder.is_collected());
        assert_eq!(recorder.snapshots(), vec![Counter(1), Counter(3), Counter(6)]);
    }

    #[test]
    fn allow_list_cannot_widen_supported_methods() {
        let err = PipelineRecorder::new(Counter(0), &["add", "explode"]).expect_err("unsupported");
        assert!(matches!(err, TimeMachineError::MethodNotAllowed(message) if message.contains("explode")));
    }

    #[test]
    fn narrowed_allow_list_rejects_supported_but_unlisted_method() {
        let mut recorder = PipelineRecorder::new(Counter(0), &["add"]).expect("recorder");
        assert_eq!(recorder.allowed_methods().collect::<Vec<_>>(), vec!["add"]);
        let err = recorder.record(Step::new("double")).expect_err("not listed");
        assert!(matches!(err, TimeMachineError::MethodNotAllowed(method) if method == "double"));
        assert_eq!(recorder.step_count(), 0);
    }

    #[test]
    fn failing_step_rolls_back_history_and_keeps_recording() {
        let mut recorder = PipelineRecorder::with_all_methods(Counter(0));
        recorder
            .record(add(1))
            .expect("ok")
            .record(add(-1))
            .expect("recorded lazily")
            .record(add(5))
            .expect("ok");

        let err = recorder.collect().expect_err("step 1 fails");
        match err {
            TimeMachineError::StepExecution { index, method, reason } => {
                assert_eq!(index, 1);
                assert_eq!(method, "add");
                assert_eq!(reason, "negative amount");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(recorder.phase(), RecorderPhase::Recording);
        assert_eq!(recorder.snapshots(), vec![Counter(0)]);
        assert_eq!(recorder.step_count(), 3);
    }

    #[test]
    fn reset_with_restarts_from_new_initial() {
        let mut recorder = PipelineRecorder::with_all_methods(Counter(0));
        recorder.record(add(1)).expect("add");
        recorder.collect().expect("collect");

        recorder.reset_with(Counter(10)).expect("reset");
        recorder.record(add(1)).expect("add");
        recorder.collect().expect("collect");
        assert_eq!(recorder.snapshots(), vec![Counter(10), Counter(11)]);
    }

    #[test]
    fn annotation_applies_to_rendered_copies_only() {
        let mut recorder = PipelineRecorder::with_all_methods(Counter(2));
        recorder.set_annotation(Some("<input>".to_string()));
        assert_eq!(recorder.annotation(), Some("<input>"));
        let view = recorder.render(0).expect("render");
        assert_eq!(view, RenderedView::PlainText("1002".to_string()));
        assert_eq!(recorder.snapshots(), vec![Counter(2)]);

        recorder.set_annotation(None);
        assert_eq!(recorder.render(0).expect("render"), RenderedView::PlainText("2".to_string()));
    }

    #[test]
    fn create_builds_initial_from_constructor_args() {
        let recorder = PipelineRecorder::<Counter>::create(&[json!(7)], &BTreeMap::new(), &["add"])
            .expect("create");
        assert_eq!(recorder.initial(), &Counter(7));
    }

    #[test]
    fn fingerprints_are_stable_and_distinct() {
        let mut recorder = PipelineRecorder::with_all_methods(Counter(0));
        recorder.record(add(1)).expect("add");
        recorder.collect().expect("collect");
        let first = recorder.fingerprints();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].len(), 16);
        assert_ne!(first[0], first[1]);
        recorder.collect().expect("collect again");
        assert_eq!(recorder.fingerprints(), first);
    }

    #[test]
    fn logger_receives_lifecycle_events() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("recorder.jsonl");
        let mut recorder =
            PipelineRecorder::with_all_methods(Counter(0)).with_logger(JsonlLogger::new(&path));
        recorder.record(add(1)).expect("add");
        let _ = recorder.record(Step::new("explode"));
        recorder.collect().expect("collect");
        recorder.reset().expect("reset");

        let text = std::fs::read_to_string(&path).expect("read log");
        for event in [
            "step_recorded",
            "step_rejected",
            "collect_started",
            "collect_completed",
            "reset",
        ] {
            assert!(text.contains(&format!("\"event_type\":\"{event}\"")), "missing {event}");
        }
    }

    #[test]
    fn unwritable_log_is_counted_without_failing_the_recorder() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut recorder = PipelineRecorder::with_all_methods(Counter(0))
            .with_logger(JsonlLogger::new(dir.path()));
        recorder.record(add(1)).expect("record still succeeds");
        recorder.collect().expect("collect still succeeds");

        assert_eq!(recorder.snapshots(), vec![Counter(0), Counter(1)]);
        assert_eq!(recorder.dropped_log_events(), 3);
    }
}
