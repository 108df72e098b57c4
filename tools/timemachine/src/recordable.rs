use crate::errors::StepFailure;
use crate::render::Renderable;
use crate::step::Step;
use serde_json::Value;
use std::collections::BTreeMap;

/// A type whose method calls can be recorded as [`Step`]s and replayed later.
///
/// `apply` always runs against a fresh clone of the previous snapshot, so an
/// implementation may mutate `self` freely.
pub trait Recordable: Clone + Renderable {
    fn construct(args: &[Value], kwargs: &BTreeMap<String, Value>) -> Result<Self, StepFailure>;

    /// Every method name `apply` understands. Allow-lists may only narrow this.
    fn supported_methods() -> &'static [&'static str];

    fn apply(&mut self, step: &Step) -> Result<(), StepFailure>;

    /// Attach host markup (e.g. the step control) to a rendered copy.
    fn annotate(&mut self, _markup: &str) {}
}
