//! Atomic session phase and the utterance admission gate.
//!
//! The phase is written by the session actor and read by handles from any
//! thread. Transitions are compare-and-swap so an unexpected phase makes the
//! transition a no-op instead of corrupting the turn order.

use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::transcription::ActivationId;

/// Turn-taking phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum SessionPhase {
    /// Waiting for a manual or scheduled start.
    Idle = 0,
    /// Capturing the candidate's answer.
    Listening = 1,
    /// Generating the interviewer's next line.
    Processing = 2,
    /// Playing the interviewer's line.
    Speaking = 3,
}

impl SessionPhase {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Listening,
            2 => Self::Processing,
            3 => Self::Speaking,
            _ => Self::Idle,
        }
    }

    /// Listening must not start, and utterances are refused, in these phases.
    pub fn is_busy(self) -> bool {
        matches!(self, Self::Processing | Self::Speaking)
    }
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Listening => write!(f, "listening"),
            Self::Processing => write!(f, "processing"),
            Self::Speaking => write!(f, "speaking"),
        }
    }
}

/// Thread-safe phase, shareable via `Arc`.
#[derive(Debug)]
pub struct PhaseMachine {
    phase: AtomicU8,
}

impl PhaseMachine {
    pub fn new() -> Self {
        Self {
            phase: AtomicU8::new(SessionPhase::Idle as u8),
        }
    }

    pub fn current(&self) -> SessionPhase {
        SessionPhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    fn swap(&self, from: SessionPhase, to: SessionPhase) -> bool {
        self.phase
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Idle -> Listening.
    pub fn start_listening(&self) -> bool {
        self.swap(SessionPhase::Idle, SessionPhase::Listening)
    }

    /// Listening -> Idle.
    pub fn stop_listening(&self) -> bool {
        self.swap(SessionPhase::Listening, SessionPhase::Idle)
    }

    /// Listening or Idle -> Processing.
    ///
    /// Idle covers the opening question and an utterance flushed by a
    /// manual stop.
    pub fn begin_processing(&self) -> bool {
        self.swap(SessionPhase::Listening, SessionPhase::Processing)
            || self.swap(SessionPhase::Idle, SessionPhase::Processing)
    }

    /// Processing -> Speaking.
    pub fn begin_speaking(&self) -> bool {
        self.swap(SessionPhase::Processing, SessionPhase::Speaking)
    }

    /// Speaking -> Idle.
    pub fn finish_speaking(&self) -> bool {
        self.swap(SessionPhase::Speaking, SessionPhase::Idle)
    }

    /// Force back to Idle (end of interview). Returns the previous phase.
    pub fn reset(&self) -> SessionPhase {
        SessionPhase::from_u8(self.phase.swap(SessionPhase::Idle as u8, Ordering::AcqRel))
    }
}

impl Default for PhaseMachine {
    fn default() -> Self {
        Self::new()
    }
}

/// Where a candidate utterance came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnSource {
    Live(ActivationId),
    /// Scripted stand-in when transcription is unavailable.
    Simulated(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Accept,
    Busy(SessionPhase),
    Stale,
    Duplicate,
}

/// Decides whether a finalized utterance starts a new turn.
#[derive(Debug)]
pub struct TurnGate {
    duplicate_window: Duration,
    last_accepted: Option<Instant>,
}

impl TurnGate {
    pub fn new(duplicate_window: Duration) -> Self {
        Self {
            duplicate_window,
            last_accepted: None,
        }
    }

    /// `expected` is the source the session is currently listening to.
    pub fn admit(
        &mut self,
        phase: SessionPhase,
        expected: Option<TurnSource>,
        source: TurnSource,
        now: Instant,
    ) -> GateDecision {
        if phase.is_busy() {
            return GateDecision::Busy(phase);
        }
        if expected != Some(source) {
            return GateDecision::Stale;
        }
        if let Some(last) = self.last_accepted {
            if now.saturating_duration_since(last) < self.duplicate_window {
                return GateDecision::Duplicate;
            }
        }
        self.last_accepted = Some(now);
        GateDecision::Accept
    }
}
