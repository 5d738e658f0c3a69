//! Lifecycle state machine for the publish channel.
//!
//! State transitions:
//! UNOPENED → AWAITING_READER → OPEN → FAILED
//!
//! Any state may return to UNOPENED through teardown. There is no
//! transition from FAILED back to OPEN; recovery means tearing the
//! channel down and opening it again.

use crate::error::{ProbeError, ProbeResult};
use std::fmt;

/// Lifecycle states of the publish channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelState {
    /// No filesystem entry owned, no handle.
    #[default]
    Unopened,
    /// FIFO entry created; open-for-write is pending a reader.
    AwaitingReader,
    /// Reader attached; write handle is live.
    Open,
    /// Creation, open, or a write failed.
    Failed,
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unopened => write!(f, "UNOPENED"),
            Self::AwaitingReader => write!(f, "AWAITING_READER"),
            Self::Open => write!(f, "OPEN"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

impl ChannelState {
    /// Check if a transition to `target` is valid from the current state.
    #[must_use]
    pub fn can_transition_to(&self, target: ChannelState) -> bool {
        use ChannelState::{AwaitingReader, Failed, Open, Unopened};

        matches!(
            (self, target),
            (Unopened, AwaitingReader)
                | (AwaitingReader, Open)
                // Creation or open-for-write failed
                | (Unopened, Failed)
                | (AwaitingReader, Failed)
                // Write failures
                | (Open, Failed)
                | (Failed, Failed)
                // Teardown from anywhere
                | (_, Unopened)
        )
    }

    /// Attempt to transition to `target`, returning error if invalid.
    pub fn transition_to(&mut self, target: ChannelState) -> ProbeResult<()> {
        if self.can_transition_to(target) {
            *self = target;
            Ok(())
        } else {
            Err(ProbeError::InvalidStateTransition {
                from: self.to_string(),
                to: target.to_string(),
            })
        }
    }
}
