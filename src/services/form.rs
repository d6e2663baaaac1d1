//! In-process scanner and writer
//!
//! [`JsonFormScanner`] reads a field manifest carried in the document handle,
//! for hosts that scan the DOM themselves and hand the engine the result.
//! [`MemoryWriter`] records committed values instead of touching a page,
//! for headless runs and tests.

use super::{AutofillWriter, DocumentHandle, FieldScanner, ScannedField, ServiceError};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};

/// Manifest shapes accepted by [`JsonFormScanner`]
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FormManifest {
    Bare(Vec<ScannedField>),
    Wrapped { fields: Vec<ScannedField> },
}

/// Scanner whose document handle is a JSON field manifest
///
/// Accepts either `[{"locator", "type", "label"}, ...]` or
/// `{"fields": [...]}`. Entries without a locator are skipped.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonFormScanner;

#[async_trait]
impl FieldScanner for JsonFormScanner {
    async fn scan(&self, document: &DocumentHandle) -> Result<Vec<ScannedField>, ServiceError> {
        let manifest: FormManifest = serde_json::from_str(document.as_str())
            .map_err(|e| ServiceError::Rejected(format!("document is not a form manifest: {}", e)))?;

        let fields = match manifest {
            FormManifest::Bare(fields) | FormManifest::Wrapped { fields } => fields,
        };

        Ok(fields
            .into_iter()
            .filter(|f| !f.locator.trim().is_empty())
            .collect())
    }
}

/// Writer that keeps committed values in memory
#[derive(Debug, Default)]
pub struct MemoryWriter {
    writes: Mutex<Vec<(String, String)>>,
    rejected: Mutex<HashSet<String>>,
}

impl MemoryWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every write to `locator` report failure
    pub fn reject(&self, locator: impl Into<String>) {
        self.rejected.lock().insert(locator.into());
    }

    /// Committed writes in the order they happened
    pub fn writes(&self) -> Vec<(String, String)> {
        self.writes.lock().clone()
    }

    /// Latest committed value per locator
    pub fn values(&self) -> HashMap<String, String> {
        self.writes.lock().iter().cloned().collect()
    }

    pub fn value(&self, locator: &str) -> Option<String> {
        self.writes
            .lock()
            .iter()
            .rev()
            .find(|(l, _)| l == locator)
            .map(|(_, v)| v.clone())
    }
}

#[async_trait]
impl AutofillWriter for MemoryWriter {
    async fn write(&self, locator: &str, value: &str) -> Result<bool, ServiceError> {
        if self.rejected.lock().contains(locator) {
            tracing::debug!("MemoryWriter: rejecting write to {}", locator);
            return Ok(false);
        }
        self.writes
            .lock()
            .push((locator.to_string(), value.to_string()));
        Ok(true)
    }
}
