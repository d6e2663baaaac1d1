//! Form field model
//!
//! Field descriptors captured from the page and the answers collected for them.
//! Descriptors are immutable once captured; answers are rewritten by every
//! recording attempt and by validation.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// Kind of input a field accepts
///
/// Serialises to the vocabulary the validation service understands
/// (`text`, `email`, `tel`, `password`, `textarea`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum FieldType {
    /// Single-line free text
    #[default]
    #[serde(rename = "text")]
    Text,
    /// Email address
    #[serde(rename = "email")]
    Email,
    /// Telephone number
    #[serde(rename = "tel", alias = "phone")]
    Phone,
    /// Password or other secret
    #[serde(rename = "password")]
    Password,
    /// Multi-line free text
    #[serde(rename = "textarea", alias = "multiline-text")]
    MultilineText,
}

impl FieldType {
    /// Map a scanner-reported input type onto the closed set.
    ///
    /// Anything unrecognised is treated as plain text.
    pub fn from_input_type(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "email" => Self::Email,
            "tel" | "phone" => Self::Phone,
            "password" => Self::Password,
            "textarea" | "multiline-text" | "multiline" => Self::MultilineText,
            _ => Self::Text,
        }
    }

    /// Wire name used by the validation service
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Email => "email",
            Self::Phone => "tel",
            Self::Password => "password",
            Self::MultilineText => "textarea",
        }
    }

    /// Label used when the page offers nothing better
    pub fn default_label(&self) -> &'static str {
        match self {
            Self::Text => "Text",
            Self::Email => "Email address",
            Self::Phone => "Phone number",
            Self::Password => "Password",
            Self::MultilineText => "Message",
        }
    }
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One fillable input discovered on the page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDescriptor {
    /// Stable locator, unique within a session
    pub id: String,
    /// Input kind
    pub field_type: FieldType,
    /// Label spoken to the user
    pub human_label: String,
    /// Rank used for traversal
    pub order: usize,
}

impl FieldDescriptor {
    /// Build a descriptor, cleaning the raw label or falling back to the
    /// type's default label.
    pub fn new(
        id: impl Into<String>,
        field_type: FieldType,
        raw_label: Option<&str>,
        order: usize,
    ) -> Self {
        Self {
            id: id.into(),
            field_type,
            human_label: humanize_label(raw_label, field_type),
            order,
        }
    }
}

/// Runs of whitespace, including newlines inside wrapped labels
static WHITESPACE_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Lower-case `kebab-case` identifiers such as `first-name`
static KEBAB_IDENTIFIER_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9]+(-[a-z][a-z0-9]*)+$").unwrap());

/// Turn a best-effort page label into something worth saying out loud.
///
/// Strips required-field markers and trailing colons, splits `snake_case`
/// and lower-case `kebab-case` identifiers and collapses whitespace.
/// Hyphens in ordinary labels ("E-mail", "DD-MM-YYYY") are kept.
pub fn humanize_label(raw: Option<&str>, field_type: FieldType) -> String {
    let raw = raw.unwrap_or_default().replace('_', " ");
    let collapsed = WHITESPACE_PATTERN.replace_all(raw.trim(), " ");
    let cleaned = collapsed
        .trim_end_matches(|c: char| c == '*' || c == ':' || c.is_whitespace())
        .trim_start_matches(|c: char| c == '*' || c.is_whitespace());

    if cleaned.is_empty() {
        field_type.default_label().to_string()
    } else if KEBAB_IDENTIFIER_PATTERN.is_match(cleaned) {
        cleaned.replace('-', " ")
    } else {
        cleaned.to_string()
    }
}

/// Outcome of validation for a single answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Validity {
    /// Not validated yet, or validation was skipped
    #[default]
    Unknown,
    Valid,
    Invalid,
}

/// Answer collected for one field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Answer {
    /// Id of the field this answer belongs to
    pub field_id: String,
    /// Transcript of the latest attempt
    pub raw_transcript: String,
    /// Value to write into the page
    pub normalized_value: String,
    pub validity: Validity,
    /// Confidence in the value (0.0 to 1.0)
    pub confidence: f32,
    /// Why the value was rejected; only present when invalid
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Corrections proposed by the validator
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
    /// Number of transcribed attempts so far
    pub attempt: u32,
}

impl Answer {
    /// First transcribed attempt for a field
    pub fn new(field_id: impl Into<String>, transcript: impl Into<String>, confidence: f32) -> Self {
        let transcript = transcript.into();
        Self {
            field_id: field_id.into(),
            normalized_value: transcript.clone(),
            raw_transcript: transcript,
            validity: Validity::Unknown,
            confidence: confidence.clamp(0.0, 1.0),
            reason: None,
            suggestions: Vec::new(),
            attempt: 1,
        }
    }

    /// Replace the answer with a newer transcript, discarding the previous verdict
    pub fn record_attempt(&mut self, transcript: impl Into<String>, confidence: f32) {
        let transcript = transcript.into();
        self.normalized_value = transcript.clone();
        self.raw_transcript = transcript;
        self.validity = Validity::Unknown;
        self.confidence = confidence.clamp(0.0, 1.0);
        self.reason = None;
        self.suggestions.clear();
        self.attempt += 1;
    }

    pub fn is_valid(&self) -> bool {
        self.validity == Validity::Valid
    }

    pub fn is_invalid(&self) -> bool {
        self.validity == Validity::Invalid
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_type_from_input_type() {
        assert_eq!(FieldType::from_input_type("email"), FieldType::Email);
        assert_eq!(FieldType::from_input_type("TEL"), FieldType::Phone);
        assert_eq!(FieldType::from_input_type("phone"), FieldType::Phone);
        assert_eq!(FieldType::from_input_type("textarea"), FieldType::MultilineText);
        assert_eq!(
            FieldType::from_input_type("multiline-text"),
            FieldType::MultilineText
        );
        assert_eq!(FieldType::from_input_type("password"), FieldType::Password);
        assert_eq!(FieldType::from_input_type("search"), FieldType::Text);
        assert_eq!(FieldType::from_input_type(""), FieldType::Text);
    }

    #[test]
    fn test_field_type_serialisation_uses_wire_names() {
        assert_eq!(serde_json::to_string(&FieldType::Phone).unwrap(), "\"tel\"");
        assert_eq!(
            serde_json::to_string(&FieldType::MultilineText).unwrap(),
            "\"textarea\""
        );

        let parsed: FieldType = serde_json::from_str("\"phone\"").unwrap();
        assert_eq!(parsed, FieldType::Phone);
        let parsed: FieldType = serde_json::from_str("\"multiline-text\"").unwrap();
        assert_eq!(parsed, FieldType::MultilineText);
    }

    #[test]
    fn test_humanize_label_strips_markers() {
        assert_eq!(humanize_label(Some("  First Name *: "), FieldType::Text), "First Name");
        assert_eq!(humanize_label(Some("email_address"), FieldType::Email), "email address");
        assert_eq!(humanize_label(Some("Street\n   Line"), FieldType::Text), "Street Line");
    }

    #[test]
    fn test_humanize_label_keeps_hyphens_in_prose() {
        assert_eq!(humanize_label(Some("E-mail *"), FieldType::Email), "E-mail");
        assert_eq!(humanize_label(Some("DD-MM-YYYY"), FieldType::Text), "DD-MM-YYYY");
        assert_eq!(humanize_label(Some("Follow-up notes"), FieldType::Text), "Follow-up notes");
        assert_eq!(humanize_label(Some("first-name"), FieldType::Text), "first name");
        assert_eq!(humanize_label(Some("e-mail"), FieldType::Email), "e-mail");
    }

    #[test]
    fn test_humanize_label_falls_back_to_type_default() {
        assert_eq!(humanize_label(None, FieldType::Email), "Email address");
        assert_eq!(humanize_label(Some(" * "), FieldType::Phone), "Phone number");
        assert_eq!(humanize_label(Some(""), FieldType::MultilineText), "Message");
    }

    #[test]
    fn test_descriptor_serialises_camel_case() {
        let field = FieldDescriptor::new("#email", FieldType::Email, Some("Email"), 0);
        let json = serde_json::to_string(&field).unwrap();
        assert!(json.contains("\"humanLabel\":\"Email\""));
        assert!(json.contains("\"fieldType\":\"email\""));
    }

    #[test]
    fn test_answer_attempts_increment() {
        let mut answer = Answer::new("#email", "john at example dot com", 0.95);
        assert_eq!(answer.attempt, 1);
        assert_eq!(answer.normalized_value, "john at example dot com");
        assert_eq!(answer.validity, Validity::Unknown);

        answer.validity = Validity::Invalid;
        answer.reason = Some("missing @".to_string());
        answer.record_attempt("john@example.com", 0.9);

        assert_eq!(answer.attempt, 2);
        assert_eq!(answer.raw_transcript, "john@example.com");
        assert_eq!(answer.validity, Validity::Unknown);
        assert!(answer.reason.is_none());
    }

    #[test]
    fn test_answer_confidence_is_clamped() {
        let answer = Answer::new("a", "x", 1.7);
        assert_eq!(answer.confidence, 1.0);
    }
}
