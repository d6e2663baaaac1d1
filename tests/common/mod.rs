//! Shared harness for engine integration tests.
//!
//! Collaborators are scripted in-process: recorded audio is UTF-8 text that
//! the speech-to-text stub echoes back (`ERR` makes it fail), and a responder
//! task answers each recording request from a per-field script.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use voxfill::conversation::{ChannelEventSink, ConversationEngine, EngineEvent, EngineHandle, Services};
use voxfill::services::{
    FieldValidator, JsonFormScanner, MemoryWriter, ServiceError, SpeechRequest, SpeechToText,
    SynthesizedSpeech, TextToSpeech, Transcription, ValidationRequest, ValidationResponse,
    ValidationResult,
};
use voxfill::{Config, ConversationState, DocumentHandle};

/// Upper bound for anything a test waits on
pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Audio that makes the speech-to-text stub fail
pub const TRANSCRIBE_ERROR: &str = "ERR";

// =============================================================================
// Scripted Collaborators
// =============================================================================

/// Echoes the audio bytes back as the transcript, optionally after a delay
#[derive(Default)]
pub struct EchoSpeechToText {
    delay: Duration,
    calls: AtomicUsize,
    completed: AtomicUsize,
}

impl EchoSpeechToText {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Calls that ran to the end rather than being dropped mid-flight
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpeechToText for EchoSpeechToText {
    async fn transcribe(&self, audio: &[u8]) -> Result<Transcription, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.completed.fetch_add(1, Ordering::SeqCst);
        let text = String::from_utf8_lossy(audio).to_string();
        if text == TRANSCRIBE_ERROR {
            return Err(ServiceError::ServerError {
                status: 500,
                message: "whisper crashed".to_string(),
            });
        }
        Ok(Transcription {
            text,
            confidence: Some(0.9),
            language: Some("en".to_string()),
        })
    }
}

/// Returns a fixed clip, or always fails
pub struct StubTextToSpeech {
    fail: bool,
    calls: AtomicUsize,
}

impl StubTextToSpeech {
    pub fn new(fail: bool) -> Self {
        Self {
            fail,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextToSpeech for StubTextToSpeech {
    async fn synthesize(&self, request: &SpeechRequest) -> Result<SynthesizedSpeech, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(ServiceError::ConnectionFailed("tts offline".to_string()));
        }
        Ok(SynthesizedSpeech {
            audio: request.text.as_bytes().to_vec(),
            format: "mp3".to_string(),
        })
    }
}

type Rule = dyn Fn(&str, &str) -> ValidationResult + Send + Sync;

/// Validator applying a per-field rule, `(label, transcript) -> verdict`
pub struct ScriptedValidator {
    rule: Option<Box<Rule>>,
    delay: Duration,
    requests: Mutex<Vec<ValidationRequest>>,
    completed: AtomicUsize,
}

impl ScriptedValidator {
    pub fn with_rule<F>(rule: F) -> Self
    where
        F: Fn(&str, &str) -> ValidationResult + Send + Sync + 'static,
    {
        Self {
            rule: Some(Box::new(rule)),
            delay: Duration::ZERO,
            requests: Mutex::new(Vec::new()),
            completed: AtomicUsize::new(0),
        }
    }

    /// Accepts everything as spoken
    pub fn accept_all() -> Self {
        Self::with_rule(|_, text| valid(text))
    }

    /// Fails every call at the transport level
    pub fn unreachable() -> Self {
        Self {
            rule: None,
            delay: Duration::ZERO,
            requests: Mutex::new(Vec::new()),
            completed: AtomicUsize::new(0),
        }
    }

    /// Hold every call for `delay` before answering
    pub fn slow(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn requests(&self) -> Vec<ValidationRequest> {
        self.requests.lock().clone()
    }

    /// Calls that ran to the end rather than being dropped mid-flight
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FieldValidator for ScriptedValidator {
    async fn validate(
        &self,
        request: &ValidationRequest,
    ) -> Result<ValidationResponse, ServiceError> {
        self.requests.lock().push(request.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.completed.fetch_add(1, Ordering::SeqCst);
        let Some(rule) = &self.rule else {
            return Err(ServiceError::ConnectionFailed("connection refused".to_string()));
        };

        let results: HashMap<String, ValidationResult> = request
            .fields
            .iter()
            .map(|(label, text)| (label.clone(), rule(label, text)))
            .collect();
        let invalid_count = results.values().filter(|r| !r.valid).count();

        Ok(ValidationResponse {
            results,
            all_valid: invalid_count == 0,
            invalid_count,
        })
    }
}

pub fn valid(normalized: &str) -> ValidationResult {
    ValidationResult {
        normalized: Some(normalized.to_string()),
        valid: true,
        confidence: Some(0.95),
        reason: None,
        suggestions: None,
    }
}

pub fn invalid(reason: &str) -> ValidationResult {
    ValidationResult {
        normalized: None,
        valid: false,
        confidence: Some(0.2),
        reason: Some(reason.to_string()),
        suggestions: None,
    }
}

// =============================================================================
// Harness
// =============================================================================

/// Config with short windows so timeouts are quick
pub fn fast_config() -> Config {
    let mut config = Config::default();
    config.conversation.recording_window_ms = 300;
    config.conversation.max_recording_ms = 1000;
    config.conversation.retry_delay_ms = 10;
    config.conversation.question_seed = Some(7);
    config
}

/// Per-field recording script; `None` leaves the window to time out
pub type Script = HashMap<String, VecDeque<Option<Vec<u8>>>>;

/// Builder for a running engine with scripted collaborators
pub struct EngineHarness {
    config: Config,
    validator: Arc<ScriptedValidator>,
    tts_fails: bool,
    transcription_delay: Duration,
    script: Script,
    writer: Arc<MemoryWriter>,
}

impl EngineHarness {
    pub fn new(validator: ScriptedValidator) -> Self {
        Self {
            config: fast_config(),
            validator: Arc::new(validator),
            tts_fails: false,
            transcription_delay: Duration::ZERO,
            script: Script::new(),
            writer: Arc::new(MemoryWriter::new()),
        }
    }

    pub fn configure(mut self, update: impl FnOnce(&mut Config)) -> Self {
        update(&mut self.config);
        self
    }

    pub fn failing_tts(mut self) -> Self {
        self.tts_fails = true;
        self
    }

    /// Make every transcription take `delay`
    pub fn slow_transcription(mut self, delay: Duration) -> Self {
        self.transcription_delay = delay;
        self
    }

    /// Queue spoken answers for a field, one per recording request
    pub fn answers(mut self, field_id: &str, replies: &[Option<&str>]) -> Self {
        self.script
            .entry(field_id.to_string())
            .or_default()
            .extend(replies.iter().map(|r| r.map(|text| text.as_bytes().to_vec())));
        self
    }

    pub fn writer(&self) -> Arc<MemoryWriter> {
        self.writer.clone()
    }

    pub fn spawn(self) -> RunningEngine {
        let stt = Arc::new(EchoSpeechToText::with_delay(self.transcription_delay));
        let tts = Arc::new(StubTextToSpeech::new(self.tts_fails));
        let services = Services {
            scanner: Arc::new(JsonFormScanner),
            speech_to_text: stt.clone(),
            text_to_speech: tts.clone(),
            validator: self.validator.clone(),
            writer: self.writer.clone(),
        };

        let (sink, mut rx) = ChannelEventSink::channel();
        let handle = ConversationEngine::new(services, self.config)
            .with_event_sink(Arc::new(sink))
            .spawn();

        let events = Arc::new(Mutex::new(Vec::new()));
        let script = Arc::new(Mutex::new(self.script));
        {
            let events = events.clone();
            let script = script.clone();
            let handle = handle.clone();
            tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    let reply = match &event {
                        EngineEvent::RecordingRequested { field_id, .. } => script
                            .lock()
                            .get_mut(field_id)
                            .and_then(|queue| queue.pop_front())
                            .flatten(),
                        _ => None,
                    };
                    events.lock().push(event);

                    if let Some(audio) = reply {
                        let handle = handle.clone();
                        tokio::spawn(async move {
                            let _ = handle.submit_recording(audio).await;
                        });
                    }
                }
            });
        }

        RunningEngine {
            handle,
            events,
            validator: self.validator,
            writer: self.writer,
            stt,
            tts,
        }
    }
}

/// A spawned engine plus everything it talked to
pub struct RunningEngine {
    pub handle: EngineHandle,
    pub events: Arc<Mutex<Vec<EngineEvent>>>,
    pub validator: Arc<ScriptedValidator>,
    pub writer: Arc<MemoryWriter>,
    pub stt: Arc<EchoSpeechToText>,
    pub tts: Arc<StubTextToSpeech>,
}

impl RunningEngine {
    pub async fn start(&self, manifest: &str) {
        self.handle
            .start(DocumentHandle::new(manifest))
            .await
            .expect("start should be accepted");
    }

    pub fn events(&self) -> Vec<EngineEvent> {
        self.events.lock().clone()
    }

    /// Wait until an event matching `predicate` has been emitted
    pub async fn wait_for_event<F>(&self, predicate: F) -> EngineEvent
    where
        F: Fn(&EngineEvent) -> bool,
    {
        let found = tokio::time::timeout(TEST_TIMEOUT, async {
            loop {
                if let Some(event) = self.events.lock().iter().find(|e| predicate(e)).cloned() {
                    return event;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        found.expect("timed out waiting for event")
    }

    /// Wait until `condition` holds
    pub async fn wait_until<F>(&self, condition: F)
    where
        F: Fn(&Self) -> bool,
    {
        let reached = tokio::time::timeout(TEST_TIMEOUT, async {
            while !condition(self) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        reached.expect("timed out waiting for condition");
    }

    /// Wait for the session to finish and its final event to arrive
    pub async fn wait_until_finished(&self) -> ConversationState {
        self.wait_for_event(|e| {
            matches!(e, EngineEvent::FormFilled { .. } | EngineEvent::Error { .. })
        })
        .await;
        self.handle.state()
    }

    /// States visited, starting from Idle, with self-transitions collapsed
    pub fn state_path(&self) -> Vec<ConversationState> {
        let mut path = vec![ConversationState::Idle];
        for event in self.events() {
            if let EngineEvent::StateChanged { state, .. } = event {
                if path.last() != Some(&state) {
                    path.push(state);
                }
            }
        }
        path
    }

    pub fn count(&self, name: &str) -> usize {
        self.events().iter().filter(|e| e.name() == name).count()
    }
}

/// One-field-per-entry manifest: `(locator, type, label)`
pub fn manifest(fields: &[(&str, &str, &str)]) -> String {
    let fields: Vec<serde_json::Value> = fields
        .iter()
        .map(|(locator, input_type, label)| {
            serde_json::json!({ "locator": locator, "type": input_type, "label": label })
        })
        .collect();
    serde_json::Value::Array(fields).to_string()
}
