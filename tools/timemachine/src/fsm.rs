use crate::errors::TimeMachineError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecorderPhase {
    Recording,
    Collected,
}

impl RecorderPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Recording => "recording",
            Self::Collected => "collected",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseEvent {
    Record,
    Collect,
    Reset,
}

impl PhaseEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Record => "record",
            Self::Collect => "collect",
            Self::Reset => "reset",
        }
    }
}

/// Phase reached after `event`, or an error when the event is illegal in `from`.
///
/// `Collect` from `Collected` is legal and stays put (collection is idempotent).
pub fn next_phase(from: RecorderPhase, event: PhaseEvent) -> Result<RecorderPhase, TimeMachineError> {
    use PhaseEvent as E;
    use RecorderPhase as P;

    let next = match (from, event) {
        (P::Recording, E::Record) => Some(P::Recording),
        (P::Collected, E::Record) => None,
        (_, E::Collect) => Some(P::Collected),
        (_, E::Reset) => Some(P::Recording),
    };

    next.ok_or_else(|| {
        TimeMachineError::InvalidState(format!(
            "cannot {} while {}; call reset() first",
            event.as_str(),
            from.as_str()
        ))
    })
}
