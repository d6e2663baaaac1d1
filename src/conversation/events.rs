//! Outward events
//!
//! The engine reports progress through an [`EventSink`]. Emission never
//! blocks and never fails from the engine's point of view; a sink with no
//! listener simply drops events.

use super::autofill::CommitReport;
use super::correction::CorrectionItem;
use super::error::ErrorReport;
use super::state::{ConversationState, TransitionReason};
use crate::form::{Answer, FieldDescriptor};
use base64::{engine::general_purpose, Engine as _};
use serde::{Serialize, Serializer};
use tokio::sync::mpsc;

fn audio_as_base64<S: Serializer>(audio: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&general_purpose::STANDARD.encode(audio))
}

/// Event emitted by the conversation engine
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum EngineEvent {
    StateChanged {
        previous: ConversationState,
        state: ConversationState,
        reason: TransitionReason,
    },
    FieldListReady {
        fields: Vec<FieldDescriptor>,
    },
    QuestionAsked {
        field_id: String,
        label: String,
        text: String,
        /// 1-based position in the active queue
        current: usize,
        total: usize,
        attempt: u32,
        correcting: bool,
    },
    /// Spoken version of the last question
    SpeechReady {
        field_id: String,
        #[serde(serialize_with = "audio_as_base64")]
        audio: Vec<u8>,
        format: String,
    },
    /// The recording window is open; submit audio before it closes
    RecordingRequested {
        field_id: String,
        window_ms: u64,
    },
    AnswerReceived {
        field_id: String,
        label: String,
        transcript: String,
        current: usize,
        total: usize,
        attempt: u32,
    },
    /// A recording or transcription failed and the question will be repeated
    TurnRetry {
        field_id: String,
        label: String,
        retry: u32,
        budget: u32,
        message: String,
    },
    ValidationStarted {
        count: usize,
    },
    ValidationCompleted {
        valid: usize,
        invalid: usize,
        /// Validation was unreachable and raw values are used
        fallback: bool,
    },
    CorrectionNeeded {
        fields: Vec<CorrectionItem>,
        pass: u32,
        /// Same fields rejected as in the previous pass
        stalled: bool,
    },
    FormFilled {
        report: CommitReport,
        answers: Vec<Answer>,
    },
    Error {
        report: ErrorReport,
    },
}

impl EngineEvent {
    /// Event name as used on the wire
    pub fn name(&self) -> &'static str {
        match self {
            Self::StateChanged { .. } => "state_changed",
            Self::FieldListReady { .. } => "field_list_ready",
            Self::QuestionAsked { .. } => "question_asked",
            Self::SpeechReady { .. } => "speech_ready",
            Self::RecordingRequested { .. } => "recording_requested",
            Self::AnswerReceived { .. } => "answer_received",
            Self::TurnRetry { .. } => "turn_retry",
            Self::ValidationStarted { .. } => "validation_started",
            Self::ValidationCompleted { .. } => "validation_completed",
            Self::CorrectionNeeded { .. } => "correction_needed",
            Self::FormFilled { .. } => "form_filled",
            Self::Error { .. } => "error",
        }
    }
}

/// Receiver of engine events
pub trait EventSink: Send + Sync {
    fn emit(&self, event: EngineEvent);
}

/// Sink that discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn emit(&self, _event: EngineEvent) {}
}

/// Sink that forwards events into an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelEventSink {
    tx: mpsc::UnboundedSender<EngineEvent>,
}

impl ChannelEventSink {
    /// Create a sink and the receiver for its events
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<EngineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelEventSink {
    fn emit(&self, event: EngineEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("Event listener gone, dropping event");
        }
    }
}
