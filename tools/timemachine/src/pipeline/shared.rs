//! Lock-guarded recorder handle for hosts that drive one recorder from several threads.

use crate::errors::TimeMachineError;
use crate::fsm::RecorderPhase;
use crate::pipeline::recorder::PipelineRecorder;
use crate::recordable::Recordable;
use crate::render::RenderedView;
use crate::step::Step;
use std::sync::{Arc, Mutex, MutexGuard};

pub struct SharedRecorder<T: Recordable> {
    inner: Arc<Mutex<PipelineRecorder<T>>>,
}

impl<T: Recordable> Clone for SharedRecorder<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Recordable> SharedRecorder<T> {
    pub fn new(recorder: PipelineRecorder<T>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(recorder)),
        }
    }

    pub fn record(&self, step: Step) -> Result<(), TimeMachineError> {
        self.lock()?.record(step).map(|_| ())
    }

    pub fn collect(&self) -> Result<(), TimeMachineError> {
        self.lock()?.collect().map(|_| ())
    }

    pub fn reset(&self) -> Result<(), TimeMachineError> {
        self.lock()?.reset().map(|_| ())
    }

    pub fn render(&self, index: i64) -> Result<RenderedView, TimeMachineError> {
        self.lock()?.render(index)
    }

    pub fn snapshots(&self) -> Result<Vec<T>, TimeMachineError> {
        Ok(self.lock()?.snapshots())
    }

    pub fn phase(&self) -> Result<RecorderPhase, TimeMachineError> {
        Ok(self.lock()?.phase())
    }

    /// Runs `f` with exclusive access, for multi-call sequences that must not interleave.
    pub fn with<R>(
        &self,
        f: impl FnOnce(&mut PipelineRecorder<T>) -> Result<R, TimeMachineError>,
    ) -> Result<R, TimeMachineError> {
        let mut guard = self.lock()?;
        f(&mut guard)
    }

    fn lock(&self) -> Result<MutexGuard<'_, PipelineRecorder<T>>, TimeMachineError> {
        self.inner
            .lock()
            .map_err(|_| TimeMachineError::InvalidState("recorder lock poisoned".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::SharedRecorder;
    use crate::errors::TimeMachineError;
    use crate::fsm::RecorderPhase;
    use crate::pipeline::recorder::PipelineRecorder;
    use crate::render::RenderedView;
    use crate::step::Step;
    use crate::text::TextDocument;
    use std::thread;

    #[test]
    fn concurrent_writers_never_lose_steps() {
        let shared = SharedRecorder::new(PipelineRecorder::with_all_methods(TextDocument::default()));

        let handles = (0..4)
            .map(|_| {
                let shared = shared.clone();
                thread::spawn(move || {
                    for _ in 0..25 {
                        shared
                            .record(Step::new("append_text").arg("x"))
                            .expect("record");
                    }
                })
            })
            .collect::<Vec<_>>();
        for handle in handles {
            handle.join().expect("join");
        }

        shared.collect().expect("collect");
        assert_eq!(shared.phase().expect("phase"), RecorderPhase::Collected);
        let snapshots = shared.snapshots().expect("snapshots");
        assert_eq!(snapshots.len(), 101);
        assert_eq!(
            shared.render(1000).expect("render"),
            RenderedView::PlainText("x".repeat(100))
        );
    }

    #[test]
    fn with_runs_a_sequence_atomically() {
        let shared = SharedRecorder::new(PipelineRecorder::with_all_methods(TextDocument::default()));
        let count = shared
            .with(|recorder| {
                recorder
                    .record(Step::new("append_text").arg("ab"))?
                    .record(Step::new("upper"))?
                    .collect()?;
                Ok(recorder.snapshot_count())
            })
            .expect("sequence");
        assert_eq!(count, 3);

        shared.reset().expect("reset");
        assert_eq!(shared.phase().expect("phase"), RecorderPhase::Recording);
    }

    #[test]
    fn panic_under_the_lock_surfaces_as_invalid_state() {
        let shared = SharedRecorder::new(PipelineRecorder::with_all_methods(TextDocument::default()));
        let holder = shared.clone();
        let outcome = thread::spawn(move || {
            holder.with::<()>(|_| panic!("host crashed mid-sequence"))
        })
        .join();
        assert!(outcome.is_err());

        let err = shared
            .record(Step::new("append_text").arg("x"))
            .expect_err("lock is poisoned");
        assert!(matches!(err, TimeMachineError::InvalidState(message) if message.contains("poisoned")));
        assert!(matches!(shared.phase(), Err(TimeMachineError::InvalidState(_))));
    }
}
