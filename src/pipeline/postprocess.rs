//! Post-processing: deterministic cleanup of raw model output before parsing.
//!
//! Even with a response schema and `application/json` as the requested MIME
//! type, models occasionally wrap the JSON in ```` ```json ```` fences,
//! prepend a BOM, or pad it with whitespace. These rules strip that noise
//! without touching the JSON itself. Each rule is a pure `&str → String`
//! function and independently testable.
//!
//! ## Rule Order
//!
//! 1. Strip invisible Unicode (BOM, zero-width spaces) so fence detection
//!    sees the real first character
//! 2. Strip outer markdown fences
//! 3. Trim surrounding whitespace

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

/// Apply all cleanup rules to raw model output.
pub fn clean_model_output(input: &str) -> String {
    let s = remove_invisible_chars(input);
    let s = strip_code_fences(&s);
    s.trim().to_string()
}

/// Clean then parse model output as JSON.
pub fn parse_model_json(input: &str) -> Result<Value, String> {
    let cleaned = clean_model_output(input);
    if cleaned.is_empty() {
        return Err("model returned no text".to_string());
    }
    serde_json::from_str(&cleaned).map_err(|e| {
        let preview: String = cleaned.chars().take(120).collect();
        format!("response is not valid JSON ({e}): {preview}")
    })
}

// ── Rule 1: Strip invisible characters ───────────────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input
        .chars()
        .filter(|c| {
            !matches!(
                c,
                '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{2060}' | '\u{FEFF}' | '\u{00AD}'
            )
        })
        .collect()
}

// ── Rule 2: Strip outer markdown fences ──────────────────────────────────────

static OUTER_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^\s*```[a-zA-Z]*[ \t]*\r?\n(.*?)\r?\n?```\s*$").unwrap());

fn strip_code_fences(input: &str) -> String {
    match OUTER_FENCE.captures(input) {
        Some(caps) => caps[1].to_string(),
        None => input.to_string(),
    }
}
