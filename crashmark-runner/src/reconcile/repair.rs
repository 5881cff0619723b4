// Copyright (c) The crashmark Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Repair of JSON text corrupted by literal control characters.
//!
//! A crash or a naive text splice can leave raw newlines and tabs inside a
//! JSON string literal, which a conformant parser rejects. The repair pass
//! escapes control characters only where the scanner is inside a string
//! literal, so token structure outside strings is preserved byte for byte.

use serde_json::Value;
use swrite::{SWrite, swrite};

/// Escapes raw control characters appearing inside JSON string literals.
///
/// The scanner toggles in/out of string context on unescaped quotes, with a
/// one-character lookback for backslash escapes. Inside a string, a literal
/// control character becomes `\n`, `\r`, `\t`, or a generic `\u00XX`
/// escape; everything outside strings passes through unchanged.
pub fn escape_control_chars_in_json_strings(json_text: &str) -> String {
    let mut out = String::with_capacity(json_text.len());
    let mut in_string = false;
    let mut escaped = false;

    for c in json_text.chars() {
        if !in_string {
            out.push(c);
            if c == '"' {
                in_string = true;
            }
            continue;
        }

        // Inside a JSON string literal.
        if escaped {
            out.push(c);
            escaped = false;
            continue;
        }

        match c {
            '\\' => {
                out.push(c);
                escaped = true;
            }
            '"' => {
                out.push(c);
                in_string = false;
            }
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => swrite!(out, "\\u{:04x}", c as u32),
            c => out.push(c),
        }
    }

    out
}

/// Strict parse, falling back to one repair pass.
///
/// Returns the post-repair parse error when even the repaired text doesn't
/// parse.
pub(crate) fn parse_or_repair(json_text: &str) -> Result<Value, serde_json::Error> {
    match serde_json::from_str(json_text) {
        Ok(value) => Ok(value),
        Err(_) => serde_json::from_str(&escape_control_chars_in_json_strings(json_text)),
    }
}
