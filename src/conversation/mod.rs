//! Conversation orchestration
//!
//! Sequences field discovery, spoken question and answer turns, batch
//! validation, correction passes and the final write-back for one page.

pub mod autofill;
pub mod correction;
pub mod engine;
pub mod error;
pub mod events;
pub mod questions;
pub mod session;
pub mod state;
pub mod turn;
pub mod validation;

pub use autofill::{CommitReport, FailedCommit};
pub use correction::CorrectionItem;
pub use engine::{ConversationEngine, EngineHandle, Services};
pub use error::{CommandError, EngineError, ErrorReport, Stage};
pub use events::{ChannelEventSink, EngineEvent, EventSink, NoopEventSink};
pub use session::{Session, SessionSnapshot};
pub use state::{ConversationState, TransitionReason};
