//! Autofill reconciliation
//!
//! Maps final answers back onto their fields by id and hands each value to
//! the writer. Every field is attempted; failures are collected, not raised.

use crate::form::{Answer, FieldDescriptor};
use crate::services::AutofillWriter;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A field whose value was not committed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedCommit {
    pub field_id: String,
    pub reason: String,
}

/// Outcome of committing every field
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitReport {
    /// Committed field ids, in field order
    pub succeeded: Vec<String>,
    pub failed: Vec<FailedCommit>,
}

impl CommitReport {
    /// Whether every field was committed
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn failed_ids(&self) -> Vec<String> {
        self.failed.iter().map(|f| f.field_id.clone()).collect()
    }
}

/// Write every field's final value through `writer`, in field order
pub async fn commit(
    writer: &dyn AutofillWriter,
    fields: &[FieldDescriptor],
    answers: &HashMap<String, Answer>,
) -> CommitReport {
    let mut report = CommitReport::default();

    for field in fields {
        let Some(answer) = answers.get(&field.id) else {
            tracing::warn!("No answer for {} at commit time", field.id);
            report.failed.push(FailedCommit {
                field_id: field.id.clone(),
                reason: "no answer was collected".to_string(),
            });
            continue;
        };

        match writer.write(&field.id, &answer.normalized_value).await {
            Ok(true) => report.succeeded.push(field.id.clone()),
            Ok(false) => {
                tracing::warn!("Writer rejected value for {}", field.id);
                report.failed.push(FailedCommit {
                    field_id: field.id.clone(),
                    reason: "the page rejected the value".to_string(),
                });
            }
            Err(e) => {
                tracing::warn!("Writer failed for {}: {}", field.id, e);
                report.failed.push(FailedCommit {
                    field_id: field.id.clone(),
                    reason: "the value could not be written".to_string(),
                });
            }
        }
    }

    tracing::info!(
        "Commit finished: {} succeeded, {} failed",
        report.succeeded.len(),
        report.failed.len()
    );

    report
}
