//! Question phrasing
//!
//! Picks a phrasing per field type from fixed variant sets. Selection is
//! driven by an explicit seed so a session can pin its wording.

use crate::form::FieldType;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const TEXT_VARIANTS: &[&str] = &[
    "What is your {label}?",
    "Please tell me your {label}.",
    "Could you say your {label}?",
];

const EMAIL_VARIANTS: &[&str] = &[
    "What is your {label}?",
    "Please say your {label}, for example name at example dot com.",
    "Which {label} should I use?",
];

const PHONE_VARIANTS: &[&str] = &[
    "What is your {label}?",
    "Please read out your {label}, digit by digit.",
    "Which {label} can you be reached on?",
];

const PASSWORD_VARIANTS: &[&str] = &[
    "Please say the {label} you want to use.",
    "What should the {label} be?",
];

const MULTILINE_VARIANTS: &[&str] = &[
    "What would you like to write for {label}?",
    "Please tell me what to put in {label}.",
    "Go ahead with your {label}.",
];

fn variants(field_type: FieldType) -> &'static [&'static str] {
    match field_type {
        FieldType::Email => EMAIL_VARIANTS,
        FieldType::Phone => PHONE_VARIANTS,
        FieldType::Password => PASSWORD_VARIANTS,
        FieldType::MultilineText => MULTILINE_VARIANTS,
        FieldType::Text => TEXT_VARIANTS,
    }
}

/// Question for a field.
///
/// Deterministic for a given `(field_type, label, attempt, seed)`. The label
/// always appears in the text.
pub fn question_text(field_type: FieldType, label: &str, attempt: u32, seed: u64) -> String {
    let set = variants(field_type);
    let mut rng = StdRng::seed_from_u64(seed.wrapping_add(u64::from(attempt)));
    let template = set[rng.gen_range(0..set.len())];
    let label = label.trim();
    let label = if label.is_empty() {
        field_type.default_label()
    } else {
        label
    };
    template.replace("{label}", label)
}

/// Question for a field being corrected, with the rejection reason as a hint
pub fn correction_text(
    field_type: FieldType,
    label: &str,
    attempt: u32,
    seed: u64,
    reason: Option<&str>,
) -> String {
    let question = question_text(field_type, label, attempt, seed);
    match reason.map(str::trim).filter(|r| !r.is_empty()) {
        Some(reason) => format!(
            "Sorry, that {} didn't look right: {}. {}",
            label.trim(),
            reason.trim_end_matches('.'),
            question
        ),
        None => format!("Let's try your {} again. {}", label.trim(), question),
    }
}
