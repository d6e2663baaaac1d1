//! Validation coordination
//!
//! Answers are validated in one batched call keyed by label. Labels can
//! collide, so each request carries a key map back to field ids and results
//! are merged by id.

use super::error::EngineError;
use crate::form::{Answer, FieldDescriptor, Validity};
use crate::services::{FieldValidator, ValidationRequest, ValidationResult};
use std::collections::HashMap;

/// Batched request plus the key map needed to merge its results
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationBatch {
    pub request: ValidationRequest,
    /// Request key to field id, in field order
    keys: Vec<(String, String)>,
}

impl ValidationBatch {
    /// Build the batch for `answers`, disambiguating repeated labels as
    /// `"Name"`, `"Name (2)"`, ...
    pub fn new(answers: &[(&FieldDescriptor, &Answer)]) -> Self {
        let mut batch = Self::default();
        let mut used: HashMap<String, usize> = HashMap::new();

        for (field, answer) in answers {
            let count = used.entry(field.human_label.clone()).or_insert(0);
            *count += 1;
            let mut key = if *count == 1 {
                field.human_label.clone()
            } else {
                format!("{} ({})", field.human_label, count)
            };
            // A page could already have a label literally called "Name (2)"
            while batch.request.fields.contains_key(&key) {
                *count += 1;
                key = format!("{} ({})", field.human_label, count);
            }

            batch
                .request
                .fields
                .insert(key.clone(), answer.raw_transcript.clone());
            batch
                .request
                .field_types
                .insert(key.clone(), field.field_type);
            batch.keys.push((key, field.id.clone()));
        }

        batch
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Request key used for a field id
    pub fn key_for(&self, field_id: &str) -> Option<&str> {
        self.keys
            .iter()
            .find(|(_, id)| id == field_id)
            .map(|(key, _)| key.as_str())
    }

    /// Map label-keyed results to field ids. Fields the service left out
    /// get [`ValidationResult::missing`].
    pub fn resolve(
        &self,
        mut results: HashMap<String, ValidationResult>,
    ) -> HashMap<String, ValidationResult> {
        self.keys
            .iter()
            .map(|(key, id)| {
                let result = results.remove(key).unwrap_or_else(|| {
                    tracing::warn!("No validation result for {} ({})", key, id);
                    ValidationResult::missing()
                });
                (id.clone(), result)
            })
            .collect()
    }
}

/// Validate `answers` with a single call to the service.
///
/// Returns one result per field id. A transport failure fails the whole
/// batch; the caller decides what to do about it.
pub async fn validate_all(
    validator: &dyn FieldValidator,
    answers: &[(&FieldDescriptor, &Answer)],
) -> Result<HashMap<String, ValidationResult>, EngineError> {
    let batch = ValidationBatch::new(answers);
    tracing::info!("Validating {} answer(s)", batch.len());

    let response = validator.validate(&batch.request).await.map_err(|e| {
        tracing::error!("Validation request failed: {}", e);
        EngineError::ValidationTransportFailure(e.to_string())
    })?;

    tracing::debug!(
        "Validation returned {} result(s), {} invalid",
        response.results.len(),
        response.invalid_count
    );

    Ok(batch.resolve(response.results))
}

/// Field ids split by verdict after a merge
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationSummary {
    pub valid: Vec<String>,
    pub invalid: Vec<String>,
}

impl ValidationSummary {
    pub fn all_valid(&self) -> bool {
        self.invalid.is_empty()
    }
}

/// Write verdicts onto the stored answers
pub fn merge_results(
    answers: &mut HashMap<String, Answer>,
    order: &[String],
    mut results: HashMap<String, ValidationResult>,
) -> ValidationSummary {
    let mut summary = ValidationSummary::default();

    for id in order {
        let (Some(answer), Some(result)) = (answers.get_mut(id), results.remove(id)) else {
            continue;
        };

        if let Some(normalized) = result.normalized.filter(|n| !n.trim().is_empty()) {
            answer.normalized_value = normalized;
        }
        if let Some(confidence) = result.confidence {
            answer.confidence = confidence.clamp(0.0, 1.0);
        }
        answer.suggestions = result.suggestions.unwrap_or_default();

        if result.valid {
            answer.validity = Validity::Valid;
            answer.reason = None;
            summary.valid.push(id.clone());
        } else {
            answer.validity = Validity::Invalid;
            answer.reason = Some(
                result
                    .reason
                    .filter(|r| !r.trim().is_empty())
                    .unwrap_or_else(|| "the answer was not accepted".to_string()),
            );
            summary.invalid.push(id.clone());
        }
    }

    summary
}

/// Keep raw transcripts as final values when validation is unreachable
pub fn apply_raw_fallback(answers: &mut HashMap<String, Answer>, order: &[String]) {
    for id in order {
        if let Some(answer) = answers.get_mut(id) {
            answer.normalized_value = answer.raw_transcript.clone();
            answer.validity = Validity::Unknown;
            answer.reason = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::form::FieldType;
    use crate::services::{ServiceError, ValidationResponse};
    use async_trait::async_trait;

    struct FixedValidator(Result<ValidationResponse, ()>);

    #[async_trait]
    impl FieldValidator for FixedValidator {
        async fn validate(
            &self,
            _request: &ValidationRequest,
        ) -> Result<ValidationResponse, ServiceError> {
            self.0
                .clone()
                .map_err(|_| ServiceError::ConnectionFailed("refused".to_string()))
        }
    }

    fn valid(normalized: &str) -> ValidationResult {
        ValidationResult {
            normalized: Some(normalized.to_string()),
            valid: true,
            confidence: Some(0.95),
            reason: None,
            suggestions: None,
        }
    }

    fn invalid(reason: &str) -> ValidationResult {
        ValidationResult {
            normalized: None,
            valid: false,
            confidence: Some(0.3),
            reason: Some(reason.to_string()),
            suggestions: Some(vec!["john@example.com".to_string()]),
        }
    }

    #[test]
    fn test_batch_disambiguates_colliding_labels() {
        let first = FieldDescriptor::new("#a", FieldType::Text, Some("Name"), 0);
        let second = FieldDescriptor::new("#b", FieldType::Text, Some("Name"), 1);
        let a1 = Answer::new("#a", "Ada", 1.0);
        let a2 = Answer::new("#b", "Grace", 1.0);

        let batch = ValidationBatch::new(&[(&first, &a1), (&second, &a2)]);

        assert_eq!(batch.len(), 2);
        assert_eq!(batch.key_for("#a"), Some("Name"));
        assert_eq!(batch.key_for("#b"), Some("Name (2)"));
        assert_eq!(batch.request.fields["Name (2)"], "Grace");
        assert_eq!(batch.request.field_types["Name"], FieldType::Text);
    }

    #[test]
    fn test_resolve_marks_missing_results_invalid() {
        let email = FieldDescriptor::new("#email", FieldType::Email, Some("Email"), 0);
        let phone = FieldDescriptor::new("#phone", FieldType::Phone, Some("Phone"), 1);
        let a1 = Answer::new("#email", "john at example dot com", 1.0);
        let a2 = Answer::new("#phone", "555", 1.0);
        let batch = ValidationBatch::new(&[(&email, &a1), (&phone, &a2)]);

        let results: HashMap<_, _> = [("Email".to_string(), valid("john@example.com"))]
            .into_iter()
            .collect();
        let resolved = batch.resolve(results);

        assert!(resolved["#email"].valid);
        assert!(!resolved["#phone"].valid);
        assert_eq!(
            resolved["#phone"].reason.as_deref(),
            Some("no validation result")
        );
    }

    #[test]
    fn test_merge_results_updates_answers() {
        let mut answers: HashMap<String, Answer> = [
            ("#email".to_string(), Answer::new("#email", "john at example dot com", 0.8)),
            ("#phone".to_string(), Answer::new("#phone", "five five", 0.8)),
        ]
        .into_iter()
        .collect();
        let results: HashMap<_, _> = [
            ("#email".to_string(), valid("john@example.com")),
            ("#phone".to_string(), invalid("too short")),
        ]
        .into_iter()
        .collect();
        let order = vec!["#email".to_string(), "#phone".to_string()];

        let summary = merge_results(&mut answers, &order, results);

        assert_eq!(summary.valid, vec!["#email"]);
        assert_eq!(summary.invalid, vec!["#phone"]);
        assert!(!summary.all_valid());

        let email = &answers["#email"];
        assert_eq!(email.normalized_value, "john@example.com");
        assert!(email.is_valid());
        assert!(email.reason.is_none());
        assert_eq!(email.confidence, 0.95);

        let phone = &answers["#phone"];
        assert!(phone.is_invalid());
        assert_eq!(phone.reason.as_deref(), Some("too short"));
        assert_eq!(phone.normalized_value, "five five");
        assert_eq!(phone.suggestions.len(), 1);
    }

    #[test]
    fn test_invalid_without_reason_gets_one() {
        let mut answers: HashMap<String, Answer> =
            [("#a".to_string(), Answer::new("#a", "x", 1.0))].into_iter().collect();
        let mut result = invalid("");
        result.reason = None;
        let results: HashMap<_, _> = [("#a".to_string(), result)].into_iter().collect();

        merge_results(&mut answers, &["#a".to_string()], results);
        assert!(answers["#a"].reason.is_some());
    }

    #[test]
    fn test_raw_fallback_keeps_transcripts() {
        let mut answer = Answer::new("#a", "raw words", 1.0);
        answer.normalized_value = "stale".to_string();
        answer.validity = Validity::Invalid;
        answer.reason = Some("bad".to_string());
        let mut answers: HashMap<String, Answer> = [("#a".to_string(), answer)].into_iter().collect();

        apply_raw_fallback(&mut answers, &["#a".to_string()]);

        let answer = &answers["#a"];
        assert_eq!(answer.normalized_value, "raw words");
        assert_eq!(answer.validity, Validity::Unknown);
        assert!(answer.reason.is_none());
    }

    #[tokio::test]
    async fn test_validate_all_maps_transport_failure() {
        let field = FieldDescriptor::new("#a", FieldType::Text, Some("Name"), 0);
        let answer = Answer::new("#a", "Ada", 1.0);
        let result = validate_all(&FixedValidator(Err(())), &[(&field, &answer)]).await;
        assert!(matches!(
            result,
            Err(EngineError::ValidationTransportFailure(_))
        ));
    }

    #[tokio::test]
    async fn test_validate_all_returns_results_by_id() {
        let field = FieldDescriptor::new("#a", FieldType::Text, Some("Name"), 0);
        let answer = Answer::new("#a", "ada", 1.0);
        let response = ValidationResponse {
            results: [("Name".to_string(), valid("Ada"))].into_iter().collect(),
            all_valid: true,
            invalid_count: 0,
        };

        let results = validate_all(&FixedValidator(Ok(response)), &[(&field, &answer)])
            .await
            .unwrap();
        assert_eq!(results["#a"].normalized.as_deref(), Some("Ada"));
    }
}
