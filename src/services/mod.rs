//! External collaborators
//!
//! The engine talks to five collaborators and never to anything else:
//!
//! - [`FieldScanner`] inspects a document and lists candidate inputs
//! - [`SpeechToText`] turns recorded audio into text
//! - [`TextToSpeech`] turns question text into audio
//! - [`FieldValidator`] validates and normalises a batch of answers
//! - [`AutofillWriter`] writes a final value into the page
//!
//! [`backend::BackendClient`] implements the three remote AI services over
//! HTTP. [`form`] provides in-process scanner and writer adapters.

pub mod backend;
pub mod form;

pub use backend::BackendClient;
pub use form::{JsonFormScanner, MemoryWriter};

use crate::form::FieldType;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Error types for collaborator calls
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Failed to create HTTP client: {0}")]
    ClientInit(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Request timeout after {0} seconds")]
    Timeout(u64),

    #[error("Server error ({status}): {message}")]
    ServerError { status: u16, message: String },

    #[error("Failed to parse response: {0}")]
    ParseError(String),

    #[error("Service returned an empty response")]
    EmptyResponse,

    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("All {attempts} retry attempts failed: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
}

impl ServiceError {
    /// Whether a repeated identical request could plausibly succeed
    pub fn is_transient(&self) -> bool {
        match self {
            Self::ConnectionFailed(_) | Self::Timeout(_) => true,
            Self::ServerError { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Opaque handle to the document being filled
///
/// The engine never looks inside; it is handed to the scanner as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentHandle(pub String);

impl DocumentHandle {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Candidate input as reported by a scanner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScannedField {
    /// DOM locator for the input
    pub locator: String,
    /// Raw input type (`email`, `tel`, `textarea`, ...)
    #[serde(rename = "type", default)]
    pub input_type: String,
    /// Best-effort label, if the page had one
    #[serde(default)]
    pub label: Option<String>,
}

/// Transcription returned by the speech-to-text service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcription {
    pub text: String,
    #[serde(default)]
    pub confidence: Option<f32>,
    #[serde(default)]
    pub language: Option<String>,
}

/// Request body for speech synthesis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeechRequest {
    pub text: String,
    pub voice: String,
    pub speed: f32,
}

/// Synthesised audio, decoded from the service's base64 payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesizedSpeech {
    pub audio: Vec<u8>,
    /// Container format, e.g. `mp3`
    pub format: String,
}

/// Batched validation request keyed by field label
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationRequest {
    /// Label to raw transcript
    pub fields: HashMap<String, String>,
    /// Label to field type
    pub field_types: HashMap<String, FieldType>,
}

/// Verdict for a single field
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    #[serde(default)]
    pub normalized: Option<String>,
    pub valid: bool,
    #[serde(default)]
    pub confidence: Option<f32>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub suggestions: Option<Vec<String>>,
}

impl ValidationResult {
    /// Verdict for a field the service did not return
    pub fn missing() -> Self {
        Self {
            normalized: None,
            valid: false,
            confidence: Some(0.0),
            reason: Some("no validation result".to_string()),
            suggestions: None,
        }
    }
}

/// Response from the validation service
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationResponse {
    /// Label to verdict; may be partial
    pub results: HashMap<String, ValidationResult>,
    #[serde(default)]
    pub all_valid: bool,
    #[serde(default)]
    pub invalid_count: usize,
}

/// Inspects a document and returns its fillable inputs in page order
#[async_trait]
pub trait FieldScanner: Send + Sync {
    async fn scan(&self, document: &DocumentHandle) -> Result<Vec<ScannedField>, ServiceError>;
}

/// Converts recorded audio to text
#[async_trait]
pub trait SpeechToText: Send + Sync {
    async fn transcribe(&self, audio: &[u8]) -> Result<Transcription, ServiceError>;
}

/// Converts question text to audio
#[async_trait]
pub trait TextToSpeech: Send + Sync {
    async fn synthesize(&self, request: &SpeechRequest) -> Result<SynthesizedSpeech, ServiceError>;
}

/// Validates and normalises a batch of answers in one call
#[async_trait]
pub trait FieldValidator: Send + Sync {
    async fn validate(&self, request: &ValidationRequest)
        -> Result<ValidationResponse, ServiceError>;
}

/// Injects a value into the page and dispatches the input events
///
/// `Ok(false)` and `Err(_)` both mean the value was not committed.
#[async_trait]
pub trait AutofillWriter: Send + Sync {
    async fn write(&self, locator: &str, value: &str) -> Result<bool, ServiceError>;
}
