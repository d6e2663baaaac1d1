//! HTTP client for the speech and validation backend
//!
//! Talks to the voice form backend (`/transcribe`, `/tts`, `/validate`,
//! `/health`). Speech synthesis is retried with exponential backoff on
//! transient failures; transcription and validation are single attempts
//! because the engine owns their retry and fallback policy.

use super::{
    FieldValidator, ServiceError, SpeechRequest, SpeechToText, SynthesizedSpeech, TextToSpeech,
    Transcription, ValidationRequest, ValidationResponse,
};
use crate::config::BackendConfig;
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::sleep;

/// Maximum number of synthesis attempts
const MAX_RETRY_ATTEMPTS: u32 = 3;

/// Base delay for exponential backoff in milliseconds
const BASE_RETRY_DELAY_MS: u64 = 100;

/// Response from the TTS endpoint
#[derive(Debug, Deserialize)]
struct TtsResponse {
    audio_data: String,
    #[serde(default = "default_audio_format")]
    format: String,
}

fn default_audio_format() -> String {
    "mp3".to_string()
}

/// Response from the health endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    #[serde(default)]
    pub version: String,
    /// Model name to availability
    #[serde(default)]
    pub models: HashMap<String, bool>,
}

impl HealthResponse {
    pub fn is_healthy(&self) -> bool {
        self.status == "healthy"
    }
}

/// HTTP client for the voice form backend
#[derive(Debug, Clone)]
pub struct BackendClient {
    base_url: String,
    client: reqwest::Client,
    timeout: Duration,
    audio_mime: String,
    audio_filename: String,
}

impl BackendClient {
    /// Create a client from backend configuration
    pub fn new(config: &BackendConfig) -> Result<Self, ServiceError> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::ClientInit(e.to_string()))?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client,
            timeout,
            audio_mime: config.audio_mime.clone(),
            audio_filename: config.audio_filename.clone(),
        })
    }

    /// Create a client for a base URL with default settings otherwise
    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self, ServiceError> {
        let config = BackendConfig {
            base_url: base_url.into(),
            ..BackendConfig::default()
        };
        Self::new(&config)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Get the configured timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn map_send_error(&self, e: reqwest::Error) -> ServiceError {
        if e.is_timeout() {
            ServiceError::Timeout(self.timeout.as_secs())
        } else {
            ServiceError::ConnectionFailed(e.to_string())
        }
    }

    /// Turn a non-2xx response into a server error carrying its body
    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ServiceError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .await
            .unwrap_or_else(|_| "unknown error".to_string());
        Err(ServiceError::ServerError { status, message })
    }

    /// Check if the backend is reachable
    pub async fn is_available(&self) -> bool {
        match self.client.get(self.url("/health")).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::debug!("Backend not available: {}", e);
                false
            }
        }
    }

    /// Fetch the backend's health report
    pub async fn health(&self) -> Result<HealthResponse, ServiceError> {
        let response = self
            .client
            .get(self.url("/health"))
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;
        let response = Self::check_status(response).await?;

        response
            .json()
            .await
            .map_err(|e| ServiceError::ParseError(e.to_string()))
    }

    /// Send a single synthesis request (internal helper)
    async fn send_tts_request(
        &self,
        request: &SpeechRequest,
    ) -> Result<SynthesizedSpeech, ServiceError> {
        let response = self
            .client
            .post(self.url("/tts"))
            .json(request)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;
        let response = Self::check_status(response).await?;

        let tts: TtsResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::ParseError(e.to_string()))?;

        let audio = general_purpose::STANDARD
            .decode(tts.audio_data.as_bytes())
            .map_err(|e| ServiceError::ParseError(format!("invalid base64 audio: {}", e)))?;

        if audio.is_empty() {
            return Err(ServiceError::EmptyResponse);
        }

        Ok(SynthesizedSpeech {
            audio,
            format: tts.format,
        })
    }
}

#[async_trait]
impl SpeechToText for BackendClient {
    async fn transcribe(&self, audio: &[u8]) -> Result<Transcription, ServiceError> {
        let part = reqwest::multipart::Part::bytes(audio.to_vec())
            .file_name(self.audio_filename.clone())
            .mime_str(&self.audio_mime)
            .map_err(|e| ServiceError::Rejected(format!("invalid audio content type: {}", e)))?;
        let form = reqwest::multipart::Form::new().part("file", part);

        tracing::debug!("Uploading {} bytes for transcription", audio.len());

        let response = self
            .client
            .post(self.url("/transcribe"))
            .multipart(form)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;
        let response = Self::check_status(response).await?;

        let mut transcription: Transcription = response
            .json()
            .await
            .map_err(|e| ServiceError::ParseError(e.to_string()))?;
        transcription.text = transcription.text.trim().to_string();

        Ok(transcription)
    }
}

#[async_trait]
impl TextToSpeech for BackendClient {
    /// Synthesise speech, retrying up to 3 times with exponential backoff
    /// (100ms, 200ms, 400ms) on transient failures.
    async fn synthesize(&self, request: &SpeechRequest) -> Result<SynthesizedSpeech, ServiceError> {
        tracing::debug!(
            "Requesting speech for {} characters (voice: {}, speed: {})",
            request.text.len(),
            request.voice,
            request.speed
        );

        let mut last_error: Option<ServiceError> = None;

        for attempt in 0..MAX_RETRY_ATTEMPTS {
            match self.send_tts_request(request).await {
                Ok(speech) => {
                    if attempt > 0 {
                        tracing::debug!("Speech request succeeded on attempt {}", attempt + 1);
                    }
                    return Ok(speech);
                }
                Err(e) => {
                    if !e.is_transient() {
                        tracing::error!("Speech request rejected (attempt {}): {}", attempt + 1, e);
                        return Err(e);
                    }
                    if attempt == MAX_RETRY_ATTEMPTS - 1 {
                        tracing::error!("Speech request failed (attempt {}): {}", attempt + 1, e);
                        last_error = Some(e);
                        break;
                    }

                    let delay_ms = BASE_RETRY_DELAY_MS * 2u64.pow(attempt);
                    tracing::warn!(
                        "Speech request failed (attempt {}), retrying in {}ms: {}",
                        attempt + 1,
                        delay_ms,
                        e
                    );
                    last_error = Some(e);
                    sleep(Duration::from_millis(delay_ms)).await;
                }
            }
        }

        Err(ServiceError::RetriesExhausted {
            attempts: MAX_RETRY_ATTEMPTS,
            last_error: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown".to_string()),
        })
    }
}

#[async_trait]
impl FieldValidator for BackendClient {
    async fn validate(
        &self,
        request: &ValidationRequest,
    ) -> Result<ValidationResponse, ServiceError> {
        tracing::debug!("Validating {} fields", request.fields.len());

        let response = self
            .client
            .post(self.url("/validate"))
            .json(request)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;
        let response = Self::check_status(response).await?;

        response
            .json()
            .await
            .map_err(|e| ServiceError::ParseError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = BackendClient::new(&BackendConfig::default()).unwrap();
        assert_eq!(client.base_url(), "http://localhost:8000");
        assert_eq!(client.timeout().as_secs(), 30);
    }

    #[test]
    fn test_client_with_custom_url_trims_slash() {
        let client = BackendClient::with_base_url("http://custom:8080/").unwrap();
        assert_eq!(client.base_url(), "http://custom:8080");
        assert_eq!(client.url("/tts"), "http://custom:8080/tts");
    }

    #[test]
    fn test_client_with_config() {
        let config = BackendConfig {
            base_url: "http://example.com:9000".to_string(),
            timeout_secs: 60,
            audio_mime: "audio/wav".to_string(),
            audio_filename: "answer.wav".to_string(),
        };
        let client = BackendClient::new(&config).unwrap();
        assert_eq!(client.timeout().as_secs(), 60);
        assert_eq!(client.audio_mime, "audio/wav");
        assert_eq!(client.audio_filename, "answer.wav");
    }

    #[test]
    fn test_tts_response_defaults_format() {
        let json = r#"{"audio_data": "AAEC"}"#;
        let response: TtsResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.format, "mp3");
    }

    #[test]
    fn test_speech_request_serialisation() {
        let request = SpeechRequest {
            text: "What is your email?".to_string(),
            voice: "alloy".to_string(),
            speed: 1.0,
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("\"voice\":\"alloy\""));
        assert!(json.contains("\"speed\":1.0"));
    }

    #[test]
    fn test_health_response_parsing() {
        let json = r#"{"status": "degraded", "version": "1.0.0", "models": {"whisper": false}}"#;
        let health: HealthResponse = serde_json::from_str(json).unwrap();
        assert!(!health.is_healthy());
        assert_eq!(health.models.get("whisper"), Some(&false));
    }
}
