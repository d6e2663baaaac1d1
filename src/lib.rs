//! Voxfill - fill web forms by voice
//!
//! Hosts the conversation engine that asks for each field of a form, checks
//! the spoken answers and writes them back, plus HTTP adapters for the
//! speech and validation backend.

pub mod config;
pub mod conversation;
pub mod form;
pub mod logging;
pub mod services;

pub use config::Config;
pub use conversation::{
    ChannelEventSink, CommandError, ConversationEngine, ConversationState, EngineEvent,
    EngineHandle, EventSink, Services,
};
pub use form::{Answer, FieldDescriptor, FieldType, Validity};
pub use services::{BackendClient, DocumentHandle, ServiceError};

use services::{AutofillWriter, FieldScanner};
use std::sync::Arc;

/// Build an engine that uses the backend named in `config` for speech and
/// validation.
pub fn engine_from_config(
    config: Config,
    scanner: Arc<dyn FieldScanner>,
    writer: Arc<dyn AutofillWriter>,
) -> Result<ConversationEngine, ServiceError> {
    let backend = BackendClient::new(&config.backend)?;
    tracing::info!(
        "Using speech and validation backend at {}",
        backend.base_url()
    );
    Ok(ConversationEngine::new(
        Services::with_backend(backend, scanner, writer),
        config,
    ))
}
