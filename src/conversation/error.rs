//! Engine errors
//!
//! [`EngineError`] is the failure taxonomy the control loop reasons about.
//! [`ErrorReport`] is what leaves the engine: a stage, the field involved and
//! a message fit for the user. Service error bodies are logged, never reported.

use super::session::Session;
use super::state::ConversationState;
use serde::{Deserialize, Serialize};

/// Where in the conversation a failure happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Scan,
    Recording,
    Transcription,
    Validation,
    Correction,
    Commit,
}

/// Failures raised while driving a session
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    /// No usable fields; always fatal
    #[error("Scan failed: {0}")]
    ScanFailure(String),

    /// Nothing (or nothing usable) was captured for a field
    #[error("Recording failed for {field_id}: {message}")]
    RecordingFailure { field_id: String, message: String },

    /// Transcription errored or came back empty
    #[error("Transcription failed for {field_id}: {message}")]
    TranscriptionFailure { field_id: String, message: String },

    /// Validation service could not be reached
    #[error("Validation service unavailable: {0}")]
    ValidationTransportFailure(String),

    /// Writer rejected one or more values
    #[error("{} field(s) could not be filled", .failed.len())]
    CommitFailure { failed: Vec<String> },

    /// Recording/transcription retry budget used up for a field.
    /// `stage` is where the last attempt failed.
    #[error("Gave up on {field_id} after {attempts} failed attempts")]
    RetriesExhausted {
        field_id: String,
        attempts: u32,
        stage: Stage,
    },

    /// Fields still invalid after the allowed number of correction passes
    #[error("{} field(s) still invalid after {passes} correction pass(es)", .fields.len())]
    CorrectionBudgetExhausted { passes: u32, fields: Vec<String> },
}

impl EngineError {
    pub fn stage(&self) -> Stage {
        match self {
            Self::ScanFailure(_) => Stage::Scan,
            Self::RecordingFailure { .. } => Stage::Recording,
            Self::RetriesExhausted { stage, .. } => *stage,
            Self::TranscriptionFailure { .. } => Stage::Transcription,
            Self::ValidationTransportFailure(_) => Stage::Validation,
            Self::CorrectionBudgetExhausted { .. } => Stage::Correction,
            Self::CommitFailure { .. } => Stage::Commit,
        }
    }

    /// Field the failure is about, if it concerns exactly one
    pub fn field_id(&self) -> Option<&str> {
        match self {
            Self::RecordingFailure { field_id, .. }
            | Self::TranscriptionFailure { field_id, .. }
            | Self::RetriesExhausted { field_id, .. } => Some(field_id),
            _ => None,
        }
    }

    /// Failures the turn controller retries locally before escalating
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RecordingFailure { .. } | Self::TranscriptionFailure { .. }
        )
    }

    /// Field ids the failure concerns
    pub fn failed_fields(&self) -> Vec<String> {
        match self {
            Self::CommitFailure { failed } => failed.clone(),
            Self::CorrectionBudgetExhausted { fields, .. } => fields.clone(),
            other => other.field_id().map(|id| vec![id.to_string()]).unwrap_or_default(),
        }
    }
}

/// User-facing description of an ERROR transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorReport {
    pub stage: Stage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field_label: Option<String>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_fields: Vec<String>,
}

impl ErrorReport {
    /// Build a report, resolving field labels through the session when available
    pub fn new(error: &EngineError, session: Option<&Session>) -> Self {
        let label_of = |id: &str| -> String {
            session
                .and_then(|s| s.field(id))
                .map(|f| f.human_label.clone())
                .unwrap_or_else(|| id.to_string())
        };
        let labels = |ids: &[String]| -> String {
            ids.iter()
                .map(|id| label_of(id))
                .collect::<Vec<_>>()
                .join(", ")
        };

        let field_id = error.field_id().map(String::from);
        let field_label = field_id.as_deref().map(|id| label_of(id));

        let message = match error {
            EngineError::ScanFailure(message) => message.clone(),
            EngineError::RecordingFailure { message, .. }
            | EngineError::TranscriptionFailure { message, .. } => {
                format!("{} ({})", message, field_label.as_deref().unwrap_or_default())
            }
            EngineError::ValidationTransportFailure(_) => {
                "The answer checking service is unavailable, so the form was not filled".to_string()
            }
            EngineError::CommitFailure { failed } => {
                format!("These fields could not be filled: {}", labels(failed))
            }
            EngineError::RetriesExhausted { attempts, .. } => format!(
                "I couldn't get an answer for {} after {} tries",
                field_label.as_deref().unwrap_or_default(),
                attempts
            ),
            EngineError::CorrectionBudgetExhausted { fields, .. } => {
                format!("These answers still don't look right: {}", labels(fields))
            }
        };

        Self {
            stage: error.stage(),
            field_id,
            field_label,
            message,
            failed_fields: error.failed_fields(),
        }
    }
}

/// Rejections from the command surface
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("A session is already in progress ({state:?}); stop or clear it first")]
    SessionActive { state: ConversationState },

    #[error("No recording is being waited for")]
    NotAwaitingRecording,

    #[error("Conversation engine is not running")]
    EngineStopped,
}
