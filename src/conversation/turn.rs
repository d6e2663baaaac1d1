//! Turn controller
//!
//! Runs one question, speech, recording and transcription cycle for a field.
//! Failed recordings and transcriptions are retried up to the configured
//! budget; the field's retry counter lives on the session.

use super::engine::{Halt, Inbox, Interrupt, Services};
use super::error::EngineError;
use super::events::{EngineEvent, EventSink};
use super::questions::{correction_text, question_text};
use super::session::Session;
use crate::config::{Config, ConversationConfig, SpeechConfig};
use crate::form::{Answer, FieldDescriptor};
use crate::services::{SpeechRequest, SpeechToText, TextToSpeech, Transcription};
use std::time::Duration;
use tokio::time::Instant;

/// Confidence assumed when the transcription service reports none
const DEFAULT_TRANSCRIPT_CONFIDENCE: f32 = 0.95;

/// Characters of a transcript written to the log
const TRANSCRIPT_PREVIEW_CHARS: usize = 50;

fn preview(text: &str) -> String {
    let mut preview: String = text.chars().take(TRANSCRIPT_PREVIEW_CHARS).collect();
    if text.chars().count() > TRANSCRIPT_PREVIEW_CHARS {
        preview.push_str("...");
    }
    preview
}

/// Hard deadline for one recording.
///
/// The window closes on its own at the deadline; dropping it before then
/// cancels it.
#[derive(Debug, Clone, Copy)]
pub struct RecordingWindow {
    duration: Duration,
    deadline: Instant,
}

impl RecordingWindow {
    /// Open a window that closes `duration` from now
    pub fn open(duration: Duration) -> Self {
        Self {
            duration,
            deadline: Instant::now() + duration,
        }
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn is_closed(&self) -> bool {
        Instant::now() >= self.deadline
    }
}

/// Asks one field at a time
pub(crate) struct TurnController<'a> {
    speech_to_text: &'a dyn SpeechToText,
    text_to_speech: &'a dyn TextToSpeech,
    events: &'a dyn EventSink,
    speech: &'a SpeechConfig,
    conversation: &'a ConversationConfig,
}

impl<'a> TurnController<'a> {
    pub(crate) fn new(services: &'a Services, config: &'a Config, events: &'a dyn EventSink) -> Self {
        Self {
            speech_to_text: services.speech_to_text.as_ref(),
            text_to_speech: services.text_to_speech.as_ref(),
            events,
            speech: &config.speech,
            conversation: &config.conversation,
        }
    }

    /// Ask `field` until an answer is transcribed or the retry budget runs out.
    ///
    /// When `correcting`, the question carries the previous rejection reason.
    pub(crate) async fn ask_and_record(
        &self,
        inbox: &mut Inbox<'_>,
        session: &mut Session,
        field: &FieldDescriptor,
        correcting: bool,
    ) -> Result<Answer, Halt> {
        let current = session.cursor() + 1;
        let total = session.active_len();
        let previous = session.answer(&field.id);
        let attempt = previous.map_or(1, |a| a.attempt + 1);
        let text = if correcting {
            let reason = previous.and_then(|a| a.reason.as_deref());
            correction_text(field.field_type, &field.human_label, attempt, session.seed(), reason)
        } else {
            question_text(field.field_type, &field.human_label, attempt, session.seed())
        };
        let budget = self.conversation.effective_retry_budget();

        loop {
            tracing::info!(
                "Asking for {} ({}/{}, attempt {})",
                field.id,
                current,
                total,
                attempt
            );
            self.events.emit(EngineEvent::QuestionAsked {
                field_id: field.id.clone(),
                label: field.human_label.clone(),
                text: text.clone(),
                current,
                total,
                attempt,
                correcting,
            });

            self.speak(inbox, field, &text).await?;

            let failure = match self.capture(inbox, field).await {
                Ok(transcription) => {
                    let confidence = transcription
                        .confidence
                        .unwrap_or(DEFAULT_TRANSCRIPT_CONFIDENCE);
                    let answer = session
                        .record_transcript(&field.id, &transcription.text, confidence)
                        .clone();
                    tracing::info!(
                        "Answer for {} (attempt {}): {}",
                        field.id,
                        answer.attempt,
                        preview(&answer.raw_transcript)
                    );
                    self.events.emit(EngineEvent::AnswerReceived {
                        field_id: field.id.clone(),
                        label: field.human_label.clone(),
                        transcript: answer.raw_transcript.clone(),
                        current,
                        total,
                        attempt: answer.attempt,
                    });
                    return Ok(answer);
                }
                Err(Halt::Failed(failure)) if failure.is_retryable() => failure,
                Err(other) => return Err(other),
            };

            let retries = session.register_failure(&field.id);
            if retries >= budget {
                tracing::error!("{} (failure {} of {})", failure, retries, budget);
                return Err(EngineError::RetriesExhausted {
                    field_id: field.id.clone(),
                    attempts: retries,
                    stage: failure.stage(),
                }
                .into());
            }

            tracing::warn!("{}; asking again (failure {} of {})", failure, retries, budget);
            let message = match &failure {
                EngineError::RecordingFailure { message, .. }
                | EngineError::TranscriptionFailure { message, .. } => message.clone(),
                other => other.to_string(),
            };
            self.events.emit(EngineEvent::TurnRetry {
                field_id: field.id.clone(),
                label: field.human_label.clone(),
                retry: retries,
                budget,
                message,
            });
            inbox.sleep(self.conversation.retry_delay()).await?;
        }
    }

    /// Synthesise the question. Failure degrades to a text-only question.
    async fn speak(
        &self,
        inbox: &mut Inbox<'_>,
        field: &FieldDescriptor,
        text: &str,
    ) -> Result<(), Interrupt> {
        let request = SpeechRequest {
            text: text.to_string(),
            voice: self.speech.voice.clone(),
            speed: self.speech.effective_speed(),
        };

        match inbox.run(self.text_to_speech.synthesize(&request)).await? {
            Ok(speech) => {
                tracing::debug!(
                    "Synthesised {} bytes of {} for {}",
                    speech.audio.len(),
                    speech.format,
                    field.id
                );
                self.events.emit(EngineEvent::SpeechReady {
                    field_id: field.id.clone(),
                    audio: speech.audio,
                    format: speech.format,
                });
            }
            Err(e) => {
                tracing::warn!(
                    "Speech synthesis failed for {}, asking as text only: {}",
                    field.id,
                    e
                );
            }
        }
        Ok(())
    }

    /// Open the recording window, wait for audio and transcribe it
    async fn capture(
        &self,
        inbox: &mut Inbox<'_>,
        field: &FieldDescriptor,
    ) -> Result<Transcription, Halt> {
        let window = RecordingWindow::open(self.conversation.recording_window());
        self.events.emit(EngineEvent::RecordingRequested {
            field_id: field.id.clone(),
            window_ms: window.duration().as_millis() as u64,
        });

        let Some(audio) = inbox.await_recording(&window).await? else {
            return Err(EngineError::RecordingFailure {
                field_id: field.id.clone(),
                message: "No answer was recorded in time".to_string(),
            }
            .into());
        };
        if audio.is_empty() {
            return Err(EngineError::RecordingFailure {
                field_id: field.id.clone(),
                message: "The recording was empty".to_string(),
            }
            .into());
        }

        tracing::debug!("Transcribing {} bytes of audio for {}", audio.len(), field.id);

        match inbox.run(self.speech_to_text.transcribe(&audio)).await? {
            Ok(transcription) if transcription.text.trim().is_empty() => {
                Err(EngineError::TranscriptionFailure {
                    field_id: field.id.clone(),
                    message: "No speech was recognised".to_string(),
                }
                .into())
            }
            Ok(transcription) => Ok(transcription),
            Err(e) => {
                tracing::warn!("Transcription request failed for {}: {}", field.id, e);
                Err(EngineError::TranscriptionFailure {
                    field_id: field.id.clone(),
                    message: "The answer could not be transcribed".to_string(),
                }
                .into())
            }
        }
    }
}
