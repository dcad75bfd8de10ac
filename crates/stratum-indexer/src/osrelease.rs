//! `KEY=VALUE` parsing for os-release style files
//!
//! Handles the POSIX-shell quoting subset those files actually use:
//! optional single or double quotes around the value, backslash escapes
//! inside double quotes, `#` comments.

use std::collections::HashMap;

/// Parse an os-release (or lsb-release) blob into its key/value pairs
pub fn parse(data: &[u8]) -> HashMap<String, String> {
    let text = String::from_utf8_lossy(data);
    let mut out = HashMap::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, raw)) = line.split_once('=') else {
            continue;
        };
        out.insert(key.trim().to_string(), unquote(raw.trim()));
    }
    out
}

fn unquote(raw: &str) -> String {
    let bytes = raw.as_bytes();
    match bytes.first() {
        Some(b'"') => {
            let inner = raw[1..].strip_suffix('"').unwrap_or(&raw[1..]);
            let mut val = String::with_capacity(inner.len());
            let mut chars = inner.chars();
            while let Some(c) = chars.next() {
                if c == '\\' {
                    match chars.next() {
                        Some(e @ ('"' | '\\' | '$' | '`')) => val.push(e),
                        Some(e) => {
                            val.push('\\');
                            val.push(e);
                        }
                        None => val.push('\\'),
                    }
                } else {
                    val.push(c);
                }
            }
            val
        }
        Some(b'\'') => raw[1..].strip_suffix('\'').unwrap_or(&raw[1..]).to_string(),
        _ => raw.to_string(),
    }
}
