//! Session aggregate
//!
//! A [`Session`] owns every field descriptor and answer for one
//! "fill this page" run. It is created on start, mutated only by the engine's
//! control loop, and dropped wholesale on stop/clear.

use super::state::ConversationState;
use crate::form::{Answer, FieldDescriptor, FieldType};
use crate::services::ScannedField;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// Build descriptors from raw scanner output, in page order.
///
/// Duplicate locators are dropped (first occurrence wins) so ids stay
/// unique within a session.
pub fn capture_fields(scanned: Vec<ScannedField>) -> Vec<FieldDescriptor> {
    let mut seen = HashSet::new();
    let mut fields = Vec::with_capacity(scanned.len());

    for field in scanned {
        let locator = field.locator.trim().to_string();
        if locator.is_empty() {
            continue;
        }
        if !seen.insert(locator.clone()) {
            tracing::warn!("Dropping duplicate field locator: {}", locator);
            continue;
        }
        let field_type = FieldType::from_input_type(&field.input_type);
        let order = fields.len();
        fields.push(FieldDescriptor::new(
            locator,
            field_type,
            field.label.as_deref(),
            order,
        ));
    }

    fields
}

/// Read-only view of a session for the presentation layer
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub state: ConversationState,
    pub fields: Vec<FieldDescriptor>,
    /// Answers in field order
    pub answers: Vec<Answer>,
    pub correction_passes: u32,
}

/// State of one form-filling run
#[derive(Debug, Clone)]
pub struct Session {
    id: Uuid,
    started_at: DateTime<Utc>,
    fields: Vec<FieldDescriptor>,
    answers: HashMap<String, Answer>,
    /// Indices into `fields` currently being asked
    active_queue: Vec<usize>,
    cursor: usize,
    retry_counts: HashMap<String, u32>,
    correction_passes: u32,
    last_invalid: Option<Vec<String>>,
    seed: u64,
}

impl Session {
    /// Start a session over `fields`, sorted by their order rank
    pub fn new(mut fields: Vec<FieldDescriptor>, seed: u64) -> Self {
        fields.sort_by_key(|f| f.order);
        let active_queue = (0..fields.len()).collect();
        Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            fields,
            answers: HashMap::new(),
            active_queue,
            cursor: 0,
            retry_counts: HashMap::new(),
            correction_passes: 0,
            last_invalid: None,
            seed,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Seed for question phrasing
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// All fields in traversal order
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn field(&self, field_id: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.id == field_id)
    }

    pub fn answers(&self) -> &HashMap<String, Answer> {
        &self.answers
    }

    pub(crate) fn answers_mut(&mut self) -> &mut HashMap<String, Answer> {
        &mut self.answers
    }

    pub fn answer(&self, field_id: &str) -> Option<&Answer> {
        self.answers.get(field_id)
    }

    /// Fields currently being asked, in order
    pub fn active_queue(&self) -> Vec<&FieldDescriptor> {
        self.active_queue.iter().map(|&i| &self.fields[i]).collect()
    }

    pub fn active_len(&self) -> usize {
        self.active_queue.len()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Field under the cursor, `None` once the queue is exhausted
    pub fn current_field(&self) -> Option<&FieldDescriptor> {
        self.active_queue
            .get(self.cursor)
            .map(|&i| &self.fields[i])
    }

    /// Move past the current field; returns how many remain in the queue
    pub fn advance(&mut self) -> usize {
        if self.cursor < self.active_queue.len() {
            self.cursor += 1;
        }
        self.remaining()
    }

    pub fn remaining(&self) -> usize {
        self.active_queue.len() - self.cursor
    }

    /// Whether every field in the active queue has an answer
    pub fn active_queue_answered(&self) -> bool {
        self.active_queue
            .iter()
            .all(|&i| self.answers.contains_key(&self.fields[i].id))
    }

    /// Store a transcript for a field.
    ///
    /// Creates the answer on the first attempt and bumps `attempt` on every
    /// later one. Clears the field's retry counter.
    pub fn record_transcript(&mut self, field_id: &str, transcript: &str, confidence: f32) -> &Answer {
        self.retry_counts.remove(field_id);
        self.answers
            .entry(field_id.to_string())
            .and_modify(|a| a.record_attempt(transcript, confidence))
            .or_insert_with(|| Answer::new(field_id, transcript, confidence))
    }

    /// Count a failed recording or transcription; returns the new count
    pub fn register_failure(&mut self, field_id: &str) -> u32 {
        let count = self.retry_counts.entry(field_id.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    pub fn retry_count(&self, field_id: &str) -> u32 {
        self.retry_counts.get(field_id).copied().unwrap_or(0)
    }

    /// Number of correction passes started so far
    pub fn correction_passes(&self) -> u32 {
        self.correction_passes
    }

    /// Restrict the active queue to `field_ids` and rewind the cursor.
    ///
    /// Returns `true` when the set is identical to the one that started the
    /// previous pass, meaning the last pass made no progress.
    pub fn begin_pass(&mut self, field_ids: &[String]) -> bool {
        let stalled = self.last_invalid.as_deref() == Some(field_ids);

        let wanted: HashSet<&str> = field_ids.iter().map(String::as_str).collect();
        self.active_queue = self
            .fields
            .iter()
            .enumerate()
            .filter(|(_, f)| wanted.contains(f.id.as_str()))
            .map(|(i, _)| i)
            .collect();
        self.cursor = 0;
        self.correction_passes += 1;
        self.last_invalid = Some(field_ids.to_vec());

        stalled
    }

    pub fn snapshot(&self, state: ConversationState) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id,
            started_at: self.started_at,
            state,
            fields: self.fields.clone(),
            answers: self
                .fields
                .iter()
                .filter_map(|f| self.answers.get(&f.id).cloned())
                .collect(),
            correction_passes: self.correction_passes,
        }
    }

    /// Answers for the active queue, in queue order
    pub fn active_answers(&self) -> Vec<(&FieldDescriptor, &Answer)> {
        self.active_queue
            .iter()
            .filter_map(|&i| {
                let field = &self.fields[i];
                self.answers.get(&field.id).map(|a| (field, a))
            })
            .collect()
    }
}
