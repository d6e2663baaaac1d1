//! Conversation state machine
//!
//! Defines the states a form-filling session moves through and the legal
//! transitions between them. The machine only tracks state; the engine
//! performs the work and feeds the outcomes back in as events.

use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Conversation state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConversationState {
    /// No session
    #[default]
    Idle,
    /// Scanning the document for fields
    Analyzing,
    /// Asking each field in turn
    Questioning,
    /// Waiting on batch validation
    Validating,
    /// Re-asking fields that failed validation
    Correcting,
    /// Writing values into the page
    Filling,
    /// Every field committed
    Completed,
    /// Stopped on a failure; needs stop/clear to leave
    Error,
}

impl ConversationState {
    /// Whether a session is in progress (work outstanding)
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Self::Analyzing | Self::Questioning | Self::Validating | Self::Correcting | Self::Filling
        )
    }

    /// Whether the session has finished, successfully or not
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }
}

/// Events that can trigger state transitions
#[derive(Debug, Clone, PartialEq)]
pub enum ConversationEvent {
    /// Start command received
    Start,
    /// Scanner returned a field list
    FieldsReady { count: usize },
    /// Scanner failed
    ScanFailed { message: String },
    /// An answer was stored for the current field
    AnswerStored { remaining: usize },
    /// Validation accepted every answer
    AllValid,
    /// Validation was unreachable and raw values are used instead
    ValidationSkipped,
    /// Validation rejected at least one answer
    InvalidFields { count: usize },
    /// Writer committed every field
    CommitSucceeded,
    /// Writer rejected at least one field
    CommitFailed { failed: Vec<String> },
    /// Stop command
    Stop,
    /// Clear command
    Clear,
    /// Unrecoverable failure or exhausted budget
    Failure { message: String },
}

/// Reason for entering a state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransitionReason {
    UserStart,
    FieldsDiscovered { count: usize },
    AnswerRecorded,
    QueueExhausted,
    ValidationPassed,
    /// Validation unreachable, raw values kept
    ValidationSkipped,
    CorrectionRequired { count: usize },
    FormCommitted,
    UserStop,
    UserClear,
    Error { message: String },
}

/// Result of a state transition
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionResult {
    pub previous_state: ConversationState,
    pub new_state: ConversationState,
    pub reason: TransitionReason,
}

/// Conversation state machine
///
/// Pure bookkeeping; owned by the engine's control loop.
#[derive(Debug)]
pub struct StateMachine {
    state: ConversationState,
    state_entered_at: Instant,
}

impl StateMachine {
    /// Creates a new state machine in the Idle state
    pub fn new() -> Self {
        Self {
            state: ConversationState::Idle,
            state_entered_at: Instant::now(),
        }
    }

    /// Returns the current state
    pub fn state(&self) -> ConversationState {
        self.state
    }

    /// Returns how long the machine has been in the current state
    pub fn time_in_state(&self) -> std::time::Duration {
        self.state_entered_at.elapsed()
    }

    /// Process an event and return the transition result if a transition occurred
    ///
    /// Returns `None` if the event is not valid for the current state.
    pub fn process_event(&mut self, event: ConversationEvent) -> Option<TransitionResult> {
        use ConversationEvent as E;
        use ConversationState as S;

        let (new_state, reason) = match (self.state, event) {
            // Stop/clear from anywhere except Idle
            (S::Idle, E::Stop | E::Clear) => return None,
            (_, E::Stop) => (S::Idle, TransitionReason::UserStop),
            (_, E::Clear) => (S::Idle, TransitionReason::UserClear),

            (S::Idle, E::Start) => (S::Analyzing, TransitionReason::UserStart),

            (S::Analyzing, E::FieldsReady { count }) if count > 0 => {
                (S::Questioning, TransitionReason::FieldsDiscovered { count })
            }
            (S::Analyzing, E::FieldsReady { .. }) => (
                S::Error,
                TransitionReason::Error {
                    message: "No fillable fields were found on this page".to_string(),
                },
            ),
            (S::Analyzing, E::ScanFailed { message }) => {
                (S::Error, TransitionReason::Error { message })
            }

            // Asking states advance per answer and hand over once the queue is done
            (S::Questioning, E::AnswerStored { remaining }) if remaining > 0 => {
                (S::Questioning, TransitionReason::AnswerRecorded)
            }
            (S::Correcting, E::AnswerStored { remaining }) if remaining > 0 => {
                (S::Correcting, TransitionReason::AnswerRecorded)
            }
            (S::Questioning | S::Correcting, E::AnswerStored { .. }) => {
                (S::Validating, TransitionReason::QueueExhausted)
            }

            (S::Validating, E::AllValid) => (S::Filling, TransitionReason::ValidationPassed),
            (S::Validating, E::ValidationSkipped) => {
                (S::Filling, TransitionReason::ValidationSkipped)
            }
            (S::Validating, E::InvalidFields { count }) if count > 0 => {
                (S::Correcting, TransitionReason::CorrectionRequired { count })
            }

            (S::Filling, E::CommitSucceeded) => (S::Completed, TransitionReason::FormCommitted),
            (S::Filling, E::CommitFailed { failed }) => (
                S::Error,
                TransitionReason::Error {
                    message: format!("{} field(s) could not be filled", failed.len()),
                },
            ),

            (state, E::Failure { message }) if state.is_active() => {
                (S::Error, TransitionReason::Error { message })
            }

            // Invalid transitions
            _ => return None,
        };

        let result = TransitionResult {
            previous_state: self.state,
            new_state,
            reason,
        };
        self.apply_transition(&result);
        Some(result)
    }

    /// Apply a transition, updating internal state
    fn apply_transition(&mut self, result: &TransitionResult) {
        if result.previous_state == result.new_state {
            tracing::debug!(
                "Conversation stays in {:?} (reason: {:?})",
                result.new_state,
                result.reason
            );
            return;
        }

        tracing::info!(
            "Conversation state transition: {:?} -> {:?} after {:?} (reason: {:?})",
            result.previous_state,
            result.new_state,
            self.time_in_state(),
            result.reason
        );
        self.state = result.new_state;
        self.state_entered_at = Instant::now();
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}
