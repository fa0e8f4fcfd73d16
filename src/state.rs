//! Seed capture lifecycle.
//!
//! ```text
//! NotEnqueued ──enqueue──► Pending ──Done, no errors──► DoneSuccess
//!                              └─────Done, errors─────► DoneFailure
//! ```
//!
//! The two `Done*` states are terminal. A seed that needs to be captured
//! again is submitted as a new seed.

use crate::{CaptureResult, InvalidStateError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Where a seed is in its capture lifecycle.
///
/// Serialized names are shared with the crawler worker and with storage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum CaptureState {
    /// Created but not handed to the crawler yet.
    #[default]
    NotEnqueued,
    /// A capture request sits in the request channel or with a worker.
    Pending,
    DoneSuccess,
    DoneFailure,
}

impl CaptureState {
    pub const ALL: [CaptureState; 4] = [
        CaptureState::NotEnqueued,
        CaptureState::Pending,
        CaptureState::DoneSuccess,
        CaptureState::DoneFailure,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CaptureState::NotEnqueued => "NotEnqueued",
            CaptureState::Pending => "Pending",
            CaptureState::DoneSuccess => "DoneSuccess",
            CaptureState::DoneFailure => "DoneFailure",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, CaptureState::DoneSuccess | CaptureState::DoneFailure)
    }

    pub fn can_transition_to(&self, next: CaptureState) -> bool {
        matches!(
            (self, next),
            (CaptureState::NotEnqueued, CaptureState::Pending)
                | (CaptureState::Pending, CaptureState::DoneSuccess)
                | (CaptureState::Pending, CaptureState::DoneFailure)
        )
    }
}

impl fmt::Display for CaptureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CaptureState {
    type Err = InvalidStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CaptureState::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| InvalidStateError(s.to_string()))
    }
}

/// The terminal state a finished result asks for, or `None` while the
/// worker reports the capture as still running.
pub fn target_state(result: &CaptureResult) -> Option<CaptureState> {
    if !result.done {
        None
    } else if result.error_messages.is_empty() {
        Some(CaptureState::DoneSuccess)
    } else {
        Some(CaptureState::DoneFailure)
    }
}

/// What the result listener should do with a result, given the seed's
/// current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultDecision {
    /// Move the seed to `target`. When `reconcile` is set the seed never got
    /// marked Pending after its request was enqueued, so the Pending step
    /// has to be applied first.
    Advance { target: CaptureState, reconcile: bool },
    /// `Done=false`: no defined transition, the result is dropped.
    Unfinished,
    /// The seed already finished; this is a redelivered result.
    AlreadyFinished(CaptureState),
    /// The seed reached DoneSuccess but its archive details were never
    /// written. A successful result with metadata can still fill them in.
    RecordArchive,
}

/// `archived` tells whether the seed already carries archive details.
pub fn decide(current: CaptureState, archived: bool, result: &CaptureResult) -> ResultDecision {
    let Some(target) = target_state(result) else {
        return ResultDecision::Unfinished;
    };
    match current {
        CaptureState::NotEnqueued => ResultDecision::Advance {
            target,
            reconcile: true,
        },
        CaptureState::Pending => ResultDecision::Advance {
            target,
            reconcile: false,
        },
        CaptureState::DoneSuccess
            if !archived && target == CaptureState::DoneSuccess && result.capture_metadata.is_some() =>
        {
            ResultDecision::RecordArchive
        }
        finished => ResultDecision::AlreadyFinished(finished),
    }
}
