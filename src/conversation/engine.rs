//! Conversation engine
//!
//! One tokio task owns the state machine and the session and runs every
//! collaborator call itself, one at a time. The rest of the application talks
//! to it through an [`EngineHandle`]: commands go in over a channel, state
//! comes out over a watch channel and progress over an [`EventSink`].
//!
//! While a call is outstanding the task keeps listening for commands, so a
//! stop or clear abandons the call immediately and its result is never seen.

use super::autofill;
use super::correction;
use super::error::{CommandError, EngineError, ErrorReport};
use super::events::{EngineEvent, EventSink, NoopEventSink};
use super::session::{capture_fields, Session, SessionSnapshot};
use super::state::{ConversationEvent, ConversationState, StateMachine};
use super::turn::{RecordingWindow, TurnController};
use super::validation;
use crate::config::{Config, ValidationFallback};
use crate::services::{
    AutofillWriter, BackendClient, DocumentHandle, FieldScanner, FieldValidator, SpeechToText,
    TextToSpeech,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};

/// Commands queued before the engine task picks them up
const COMMAND_BUFFER: usize = 32;

pub(crate) type Reply<T> = oneshot::Sender<Result<T, CommandError>>;

/// Commands accepted by the engine task
#[derive(Debug)]
pub(crate) enum Command {
    Start {
        document: DocumentHandle,
        reply: Reply<()>,
    },
    Stop {
        reply: Reply<()>,
    },
    Clear {
        reply: Reply<()>,
    },
    SubmitRecording {
        audio: Vec<u8>,
        reply: Reply<()>,
    },
    Snapshot {
        reply: Reply<Option<SessionSnapshot>>,
    },
}

/// How a session was discarded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ResetKind {
    Stop,
    Clear,
}

/// Something arrived that ends the current piece of work early
#[derive(Debug)]
pub(crate) enum Interrupt {
    /// Stop or clear; the reply is sent once the reset is done
    Reset { kind: ResetKind, reply: Reply<()> },
    /// Every handle was dropped
    Closed,
}

/// Why a session stopped making progress
#[derive(Debug)]
pub(crate) enum Halt {
    Interrupted(Interrupt),
    Failed(EngineError),
}

impl From<Interrupt> for Halt {
    fn from(interrupt: Interrupt) -> Self {
        Self::Interrupted(interrupt)
    }
}

impl From<EngineError> for Halt {
    fn from(error: EngineError) -> Self {
        Self::Failed(error)
    }
}

/// Command receiver used while a session is being driven.
///
/// Every suspension point goes through here so that commands are handled
/// while a collaborator call is outstanding.
pub(crate) struct Inbox<'a> {
    commands: &'a mut mpsc::Receiver<Command>,
    state: watch::Receiver<ConversationState>,
}

impl<'a> Inbox<'a> {
    fn new(
        commands: &'a mut mpsc::Receiver<Command>,
        state: watch::Receiver<ConversationState>,
    ) -> Self {
        Self { commands, state }
    }

    /// Run `future` to completion unless a stop/clear arrives first
    pub(crate) async fn run<F: Future>(&mut self, future: F) -> Result<F::Output, Interrupt> {
        tokio::pin!(future);
        loop {
            tokio::select! {
                output = &mut future => return Ok(output),
                command = self.commands.recv() => {
                    self.screen(command, false)?;
                }
            }
        }
    }

    /// Sleep unless interrupted
    pub(crate) async fn sleep(&mut self, duration: Duration) -> Result<(), Interrupt> {
        self.run(tokio::time::sleep(duration)).await
    }

    /// Wait for a submitted recording until the window closes.
    ///
    /// `Ok(None)` means the window closed with nothing submitted.
    pub(crate) async fn await_recording(
        &mut self,
        window: &RecordingWindow,
    ) -> Result<Option<Vec<u8>>, Interrupt> {
        let deadline = tokio::time::sleep_until(window.deadline());
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                _ = &mut deadline => {
                    tracing::warn!("Recording window of {:?} closed without audio", window.duration());
                    return Ok(None);
                }
                command = self.commands.recv() => {
                    if let Some(audio) = self.screen(command, true)? {
                        return Ok(Some(audio));
                    }
                }
            }
        }
    }

    /// Handle a command that arrived mid-session
    fn screen(
        &self,
        command: Option<Command>,
        accept_recording: bool,
    ) -> Result<Option<Vec<u8>>, Interrupt> {
        match command {
            None => Err(Interrupt::Closed),
            Some(Command::Stop { reply }) => Err(Interrupt::Reset {
                kind: ResetKind::Stop,
                reply,
            }),
            Some(Command::Clear { reply }) => Err(Interrupt::Reset {
                kind: ResetKind::Clear,
                reply,
            }),
            Some(Command::Start { reply, .. }) => {
                let state = *self.state.borrow();
                tracing::warn!("Rejecting start: session already in {:?}", state);
                let _ = reply.send(Err(CommandError::SessionActive { state }));
                Ok(None)
            }
            Some(Command::SubmitRecording { audio, reply }) if accept_recording => {
                let _ = reply.send(Ok(()));
                Ok(Some(audio))
            }
            Some(Command::SubmitRecording { audio, reply }) => {
                tracing::debug!(
                    "Discarding {} bytes of audio: no recording window open",
                    audio.len()
                );
                let _ = reply.send(Err(CommandError::NotAwaitingRecording));
                Ok(None)
            }
            Some(Command::Snapshot { reply }) => {
                let state = *self.state.borrow();
                let _ = reply.send(Err(CommandError::SessionActive { state }));
                Ok(None)
            }
        }
    }
}

/// The engine's collaborators
#[derive(Clone)]
pub struct Services {
    pub scanner: Arc<dyn FieldScanner>,
    pub speech_to_text: Arc<dyn SpeechToText>,
    pub text_to_speech: Arc<dyn TextToSpeech>,
    pub validator: Arc<dyn FieldValidator>,
    pub writer: Arc<dyn AutofillWriter>,
}

impl Services {
    /// Use `backend` for speech and validation
    pub fn with_backend(
        backend: BackendClient,
        scanner: Arc<dyn FieldScanner>,
        writer: Arc<dyn AutofillWriter>,
    ) -> Self {
        let backend = Arc::new(backend);
        Self {
            scanner,
            speech_to_text: backend.clone(),
            text_to_speech: backend.clone(),
            validator: backend,
            writer,
        }
    }
}

/// Conversation engine, before it is spawned
pub struct ConversationEngine {
    services: Services,
    config: Config,
    events: Arc<dyn EventSink>,
}

impl ConversationEngine {
    /// Create an engine that reports to nobody
    pub fn new(services: Services, config: Config) -> Self {
        Self {
            services,
            config,
            events: Arc::new(NoopEventSink),
        }
    }

    /// Send progress events to `sink`
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = sink;
        self
    }

    /// Spawn the engine task on the current tokio runtime
    pub fn spawn(self) -> EngineHandle {
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_BUFFER);
        let (state_tx, state_rx) = watch::channel(ConversationState::Idle);

        let driver = Driver {
            engine: self,
            machine: StateMachine::new(),
            state_tx,
            session: None,
        };
        tokio::spawn(driver.run(commands_rx));

        EngineHandle {
            commands: commands_tx,
            state: state_rx,
        }
    }
}

/// Handle to a running engine. Cheap to clone.
///
/// The engine task exits once every handle is dropped.
#[derive(Clone)]
pub struct EngineHandle {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<ConversationState>,
}

impl EngineHandle {
    /// Start a session for `document`. Rejected unless the engine is idle.
    pub async fn start(&self, document: DocumentHandle) -> Result<(), CommandError> {
        self.request(|reply| Command::Start { document, reply }).await
    }

    /// Abandon whatever is running and return to idle
    pub async fn stop(&self) -> Result<(), CommandError> {
        self.request(|reply| Command::Stop { reply }).await
    }

    /// Discard the session (including a finished one) and return to idle
    pub async fn clear(&self) -> Result<(), CommandError> {
        self.request(|reply| Command::Clear { reply }).await
    }

    /// Hand over the audio for the open recording window
    pub async fn submit_recording(&self, audio: Vec<u8>) -> Result<(), CommandError> {
        self.request(|reply| Command::SubmitRecording { audio, reply })
            .await
    }

    /// Snapshot of the retained session once the engine is at rest.
    ///
    /// Fails with [`CommandError::SessionActive`] while work is in flight.
    pub async fn snapshot(&self) -> Result<Option<SessionSnapshot>, CommandError> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    /// Current state
    pub fn state(&self) -> ConversationState {
        *self.state.borrow()
    }

    /// Receiver that observes every state change
    pub fn subscribe(&self) -> watch::Receiver<ConversationState> {
        self.state.clone()
    }

    /// Wait until the state satisfies `predicate`
    pub async fn wait_for_state<F>(&self, predicate: F) -> Result<ConversationState, CommandError>
    where
        F: FnMut(&ConversationState) -> bool,
    {
        let mut state = self.state.clone();
        state
            .wait_for(predicate)
            .await
            .map(|s| *s)
            .map_err(|_| CommandError::EngineStopped)
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> Command,
    ) -> Result<T, CommandError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(build(reply))
            .await
            .map_err(|_| CommandError::EngineStopped)?;
        response.await.map_err(|_| CommandError::EngineStopped)?
    }
}

/// State owned by the engine task
struct Driver {
    engine: ConversationEngine,
    machine: StateMachine,
    state_tx: watch::Sender<ConversationState>,
    /// Session kept after COMPLETED or ERROR until stop/clear
    session: Option<Session>,
}

impl Driver {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        tracing::info!("Conversation engine started");

        while let Some(command) = commands.recv().await {
            match command {
                Command::Start { document, reply } => {
                    let state = self.machine.state();
                    if state != ConversationState::Idle {
                        tracing::warn!("Rejecting start: session already in {:?}", state);
                        let _ = reply.send(Err(CommandError::SessionActive { state }));
                        continue;
                    }
                    self.transition(ConversationEvent::Start);
                    let _ = reply.send(Ok(()));

                    let mut inbox = Inbox::new(&mut commands, self.state_tx.subscribe());
                    let mut session = None;
                    match self.drive(&mut inbox, document, &mut session).await {
                        Ok(()) => self.session = session,
                        Err(Halt::Failed(error)) => {
                            self.fail(&error, session.as_ref());
                            self.session = session;
                        }
                        Err(Halt::Interrupted(Interrupt::Reset { kind, reply })) => {
                            drop(session);
                            self.reset(kind);
                            let _ = reply.send(Ok(()));
                        }
                        Err(Halt::Interrupted(Interrupt::Closed)) => break,
                    }
                }
                Command::Stop { reply } => {
                    self.reset(ResetKind::Stop);
                    let _ = reply.send(Ok(()));
                }
                Command::Clear { reply } => {
                    self.reset(ResetKind::Clear);
                    let _ = reply.send(Ok(()));
                }
                Command::SubmitRecording { audio, reply } => {
                    tracing::debug!(
                        "Discarding {} bytes of audio: no session running",
                        audio.len()
                    );
                    let _ = reply.send(Err(CommandError::NotAwaitingRecording));
                }
                Command::Snapshot { reply } => {
                    let state = self.machine.state();
                    let snapshot = self.session.as_ref().map(|s| s.snapshot(state));
                    let _ = reply.send(Ok(snapshot));
                }
            }
        }

        tracing::info!("Conversation engine stopped");
    }

    /// Drive one session from ANALYZING to COMPLETED.
    ///
    /// The session is built into `slot` so the caller can keep it (or drop
    /// it) however this ends.
    async fn drive(
        &mut self,
        inbox: &mut Inbox<'_>,
        document: DocumentHandle,
        slot: &mut Option<Session>,
    ) -> Result<(), Halt> {
        let scanned = inbox
            .run(self.engine.services.scanner.scan(&document))
            .await?
            .map_err(|e| {
                tracing::warn!("Field scan failed: {}", e);
                EngineError::ScanFailure("Could not read the form on this page".to_string())
            })?;

        let fields = capture_fields(scanned);
        if fields.is_empty() {
            return Err(EngineError::ScanFailure(
                "No fillable fields were found on this page".to_string(),
            )
            .into());
        }

        let seed = self
            .engine
            .config
            .conversation
            .question_seed
            .unwrap_or_else(rand::random);
        let session = slot.insert(Session::new(fields, seed));
        tracing::info!(
            "Session {} started with {} field(s)",
            session.id(),
            session.fields().len()
        );

        self.transition(ConversationEvent::FieldsReady {
            count: session.fields().len(),
        });
        self.emit(EngineEvent::FieldListReady {
            fields: session.fields().to_vec(),
        });

        let max_passes = self.engine.config.conversation.max_correction_passes;
        let attempt_limit = self.engine.config.conversation.effective_retry_budget();
        let fallback = self.engine.config.conversation.validation_fallback;
        let mut correcting = false;

        loop {
            while let Some(field) = session.current_field().cloned() {
                TurnController::new(
                    &self.engine.services,
                    &self.engine.config,
                    self.engine.events.as_ref(),
                )
                .ask_and_record(inbox, session, &field, correcting)
                .await?;

                let remaining = session.advance();
                self.transition(ConversationEvent::AnswerStored { remaining });
            }
            debug_assert!(session.active_queue_answered());

            let order: Vec<String> = session
                .active_queue()
                .iter()
                .map(|f| f.id.clone())
                .collect();
            self.emit(EngineEvent::ValidationStarted { count: order.len() });

            let outcome = {
                let answers = session.active_answers();
                inbox
                    .run(validation::validate_all(
                        self.engine.services.validator.as_ref(),
                        &answers,
                    ))
                    .await?
            };

            match outcome {
                Ok(results) => {
                    let summary = validation::merge_results(session.answers_mut(), &order, results);
                    tracing::info!(
                        "Validation finished: {} valid, {} invalid",
                        summary.valid.len(),
                        summary.invalid.len()
                    );
                    self.emit(EngineEvent::ValidationCompleted {
                        valid: summary.valid.len(),
                        invalid: summary.invalid.len(),
                        fallback: false,
                    });

                    if summary.all_valid() {
                        self.transition(ConversationEvent::AllValid);
                        break;
                    }

                    let pass = correction::schedule(session, max_passes, attempt_limit)?;
                    self.transition(ConversationEvent::InvalidFields {
                        count: pass.items.len(),
                    });
                    self.emit(EngineEvent::CorrectionNeeded {
                        fields: pass.items,
                        pass: pass.number,
                        stalled: pass.stalled,
                    });
                    correcting = true;
                }
                Err(error) => match fallback {
                    ValidationFallback::UseRawValues => {
                        tracing::warn!(
                            "Validation unavailable, keeping raw answers for {} field(s)",
                            order.len()
                        );
                        validation::apply_raw_fallback(session.answers_mut(), &order);
                        self.emit(EngineEvent::ValidationCompleted {
                            valid: 0,
                            invalid: 0,
                            fallback: true,
                        });
                        self.transition(ConversationEvent::ValidationSkipped);
                        break;
                    }
                    ValidationFallback::Abort => return Err(error.into()),
                },
            }
        }

        let report = inbox
            .run(autofill::commit(
                self.engine.services.writer.as_ref(),
                session.fields(),
                session.answers(),
            ))
            .await?;
        if !report.is_complete() {
            return Err(EngineError::CommitFailure {
                failed: report.failed_ids(),
            }
            .into());
        }

        self.transition(ConversationEvent::CommitSucceeded);
        let answers = session
            .fields()
            .iter()
            .filter_map(|f| session.answer(&f.id).cloned())
            .collect();
        self.emit(EngineEvent::FormFilled { report, answers });

        tracing::info!("Session {} completed", session.id());
        Ok(())
    }

    fn emit(&self, event: EngineEvent) {
        self.engine.events.emit(event);
    }

    /// Feed an event to the state machine and publish the result
    fn transition(&mut self, event: ConversationEvent) {
        let state = self.machine.state();
        let Some(result) = self.machine.process_event(event.clone()) else {
            tracing::warn!("Ignoring {:?} in state {:?}", event, state);
            return;
        };

        self.state_tx.send_replace(result.new_state);
        self.emit(EngineEvent::StateChanged {
            previous: result.previous_state,
            state: result.new_state,
            reason: result.reason,
        });
    }

    /// Move to ERROR and tell the listener why
    fn fail(&mut self, error: &EngineError, session: Option<&Session>) {
        let report = ErrorReport::new(error, session);
        tracing::error!("Conversation failed at {:?}: {}", report.stage, error);

        let event = match error {
            EngineError::ScanFailure(_) => ConversationEvent::ScanFailed {
                message: report.message.clone(),
            },
            EngineError::CommitFailure { failed } => ConversationEvent::CommitFailed {
                failed: failed.clone(),
            },
            _ => ConversationEvent::Failure {
                message: report.message.clone(),
            },
        };
        self.transition(event);
        self.emit(EngineEvent::Error { report });
    }

    /// Discard any session and return to IDLE
    fn reset(&mut self, kind: ResetKind) {
        if let Some(session) = self.session.take() {
            tracing::info!("Discarding session {}", session.id());
        }
        if self.machine.state() == ConversationState::Idle {
            return;
        }
        let event = match kind {
            ResetKind::Stop => ConversationEvent::Stop,
            ResetKind::Clear => ConversationEvent::Clear,
        };
        self.transition(event);
    }
}
