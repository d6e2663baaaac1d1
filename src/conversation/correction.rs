//! Correction scheduling
//!
//! Picks out the fields validation rejected and narrows the session's active
//! queue to them, bounded by a pass budget.

use super::error::EngineError;
use super::session::Session;
use crate::form::{Answer, FieldDescriptor};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Invalid fields in original field order.
///
/// Depends only on the stored verdicts, so repeated calls agree.
pub fn select_invalid<'a>(
    fields: &'a [FieldDescriptor],
    answers: &HashMap<String, Answer>,
) -> Vec<&'a FieldDescriptor> {
    fields
        .iter()
        .filter(|f| answers.get(&f.id).is_some_and(Answer::is_invalid))
        .collect()
}

/// A field queued for correction, as shown to the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorrectionItem {
    pub field_id: String,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
}

/// A scheduled correction pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrectionPass {
    /// 1-based pass number
    pub number: u32,
    pub items: Vec<CorrectionItem>,
    /// Same invalid set as the previous pass
    pub stalled: bool,
}

/// Start a correction pass over the session's invalid fields.
///
/// Fails with [`EngineError::CorrectionBudgetExhausted`] once `max_passes`
/// passes have already run, or once an invalid answer has already used
/// `attempt_limit` attempts, so no answer is ever asked for more than
/// `attempt_limit` times.
pub fn schedule(
    session: &mut Session,
    max_passes: u32,
    attempt_limit: u32,
) -> Result<CorrectionPass, EngineError> {
    let items: Vec<CorrectionItem> = select_invalid(session.fields(), session.answers())
        .into_iter()
        .map(|field| {
            let answer = session.answer(&field.id);
            CorrectionItem {
                field_id: field.id.clone(),
                label: field.human_label.clone(),
                reason: answer.and_then(|a| a.reason.clone()),
                suggestions: answer.map(|a| a.suggestions.clone()).unwrap_or_default(),
            }
        })
        .collect();
    let ids: Vec<String> = items.iter().map(|i| i.field_id.clone()).collect();

    let attempts_spent = ids
        .iter()
        .filter_map(|id| session.answer(id))
        .any(|a| a.attempt >= attempt_limit);
    if session.correction_passes() >= max_passes || attempts_spent {
        tracing::error!(
            "Correction budget exhausted after {} pass(es) (max {}, {} attempts per field); still invalid: {:?}",
            session.correction_passes(),
            max_passes,
            attempt_limit,
            ids
        );
        return Err(EngineError::CorrectionBudgetExhausted {
            passes: session.correction_passes(),
            fields: ids,
        });
    }

    let stalled = session.begin_pass(&ids);
    if stalled {
        tracing::warn!("Correction pass made no progress on {:?}", ids);
    }

    Ok(CorrectionPass {
        number: session.correction_passes(),
        items,
        stalled,
    })
}
