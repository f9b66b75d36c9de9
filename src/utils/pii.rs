//! Regex-based PII recognition and anonymization.

use std::sync::LazyLock;

use regex::{Captures, Regex};

struct Recognizer {
    entity: &'static str,
    pattern: Regex,
    validate: fn(&str) -> bool,
}

fn always(_: &str) -> bool {
    true
}

/// Luhn checksum over the digits of a candidate card number.
fn luhn_valid(candidate: &str) -> bool {
    let digits: Vec<u32> = candidate.chars().filter_map(|c| c.to_digit(10)).collect();
    if !(13..=19).contains(&digits.len()) {
        return false;
    }
    let sum: u32 = digits
        .iter()
        .rev()
        .enumerate()
        .map(|(i, &d)| {
            if i % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 { doubled - 9 } else { doubled }
            } else {
                d
            }
        })
        .sum();
    sum % 10 == 0
}

// Order matters: earlier recognizers consume text before later ones see it.
static RECOGNIZERS: LazyLock<Vec<Recognizer>> = LazyLock::new(|| {
    let specs: [(&'static str, &str, fn(&str) -> bool); 6] = [
        (
            "EMAIL_ADDRESS",
            r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b",
            always,
        ),
        ("URL", r#"\bhttps?://[^\s<>"']+"#, always),
        ("CREDIT_CARD", r"\b(?:\d[ -]?){12,18}\d\b", luhn_valid),
        ("US_SSN", r"\b\d{3}-\d{2}-\d{4}\b", always),
        (
            "PHONE_NUMBER",
            r"(?:\+?1[ .-]?)?(?:\(\d{3}\)\s?|\b\d{3}[ .-])\d{3}[ .-]\d{4}\b",
            always,
        ),
        (
            "IP_ADDRESS",
            r"\b(?:(?:25[0-5]|2[0-4]\d|1?\d?\d)\.){3}(?:25[0-5]|2[0-4]\d|1?\d?\d)\b",
            always,
        ),
    ];
    specs
        .into_iter()
        .map(|(entity, pattern, validate)| Recognizer {
            entity,
            pattern: Regex::new(pattern).expect("valid PII pattern"),
            validate,
        })
        .collect()
});

/// Replaces recognized entities with `<ENTITY_TYPE>` placeholders.
#[derive(Debug, Clone, Copy, Default)]
pub struct PiiAnonymizer;

impl PiiAnonymizer {
    pub fn new() -> Self {
        Self
    }

    /// Returns the rewritten text, or `None` if nothing was recognized.
    pub fn anonymize(&self, text: &str) -> Option<String> {
        let mut current = text.to_string();
        for recognizer in RECOGNIZERS.iter() {
            let replaced = recognizer
                .pattern
                .replace_all(&current, |caps: &Captures| {
                    let matched = &caps[0];
                    if (recognizer.validate)(matched) {
                        format!("<{}>", recognizer.entity)
                    } else {
                        matched.to_string()
                    }
                })
                .into_owned();
            current = replaced;
        }
        (current != text).then_some(current)
    }
}
