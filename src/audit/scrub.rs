//! Secret redaction for audit parameters and error text.

use serde_json::Value;
use std::borrow::Cow;

pub const REDACTED: &str = "[REDACTED]";

const SECRET_KEY_FRAGMENTS: [&str; 10] = [
    "password",
    "passwd",
    "secret",
    "token",
    "api_key",
    "apikey",
    "authorization",
    "credential",
    "private_key",
    "cookie",
];

/// Token shapes that are redacted wherever they appear inside a string.
const TOKEN_PREFIXES: [&str; 10] = [
    "sk-", "xoxb-", "xoxp-", "xapp-", "ghp_", "github_pat_", "glpat-", "ya29.", "AIza", "Bearer ",
];

const ASSIGNMENT_MARKERS: [&str; 5] = [
    "api_key=",
    "access_token=",
    "refresh_token=",
    "password=",
    "token=",
];

fn is_secret_key(key: &str) -> bool {
    let lower = key.to_ascii_lowercase();
    SECRET_KEY_FRAGMENTS
        .iter()
        .any(|fragment| lower.contains(fragment))
}

fn is_token_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':' | '+' | '/' | '=')
}

/// Replace the token following each occurrence of `marker` (marker included).
fn redact_after(text: &mut String, marker: &str) {
    let mut cursor = 0;
    while let Some(offset) = text[cursor..].find(marker) {
        let start = cursor + offset;
        let value_start = start + marker.len();
        let value_len: usize = text[value_start..]
            .chars()
            .take_while(|c| is_token_char(*c))
            .map(char::len_utf8)
            .sum();

        if value_len == 0 {
            cursor = value_start;
            continue;
        }

        text.replace_range(start..value_start + value_len, REDACTED);
        cursor = start + REDACTED.len();
    }
}

/// Scrub known secret shapes out of free text.
pub fn scrub_text(input: &str) -> Cow<'_, str> {
    let hit = TOKEN_PREFIXES
        .iter()
        .chain(ASSIGNMENT_MARKERS.iter())
        .any(|marker| input.contains(marker));
    if !hit {
        return Cow::Borrowed(input);
    }

    let mut scrubbed = input.to_string();
    for marker in TOKEN_PREFIXES.iter().chain(ASSIGNMENT_MARKERS.iter()) {
        redact_after(&mut scrubbed, marker);
    }
    Cow::Owned(scrubbed)
}

/// Redact a parameter tree: values under secret-named keys are replaced
/// wholesale, other strings are scrubbed of token shapes.
pub fn redact_parameters(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, inner)| {
                    let redacted = if is_secret_key(key) && !inner.is_null() {
                        Value::String(REDACTED.to_string())
                    } else {
                        redact_parameters(inner)
                    };
                    (key.clone(), redacted)
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(redact_parameters).collect()),
        Value::String(text) => Value::String(scrub_text(text).into_owned()),
        other => other.clone(),
    }
}
