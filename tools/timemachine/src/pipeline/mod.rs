//! Deferred pipelines over a wrapped object.
//!
//! # Overview
//!
//! A [`recorder::PipelineRecorder`] queues allow-listed method calls as steps
//! without running them. `collect()` replays the queue against successive
//! clones of the initial object and keeps one snapshot per step, so a host can
//! scrub through the history with a step index.
//!
//! Pipelines can also be described in a TOML file (`recording`) and shared
//! across threads behind a lock (`shared`).

pub mod recorder;
pub mod recording;
pub mod shared;
