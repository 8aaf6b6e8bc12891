//! Lenient parser for model-produced "almost JSON".
//!
//! Judge models are asked for exact JSON and routinely return it wrapped in
//! prose or code fences, or with single-quoted strings. Rather than scatter
//! ad hoc repairs around, this module is the one place that tolerates a fixed
//! set of malformations, and nothing else:
//!
//! - text before the outermost `[`/`{` and after the matching `]`/`}` is
//!   dropped (this also disposes of markdown code fences),
//! - single quotes acting as string delimiters (adjacent to `{ [ : , } ]`)
//!   become double quotes; apostrophes inside strings are left alone,
//! - `\'` escapes are unescaped.
//!
//! Valid JSON always parses unchanged.

use shopscout_core::{Error, Result};

fn slice_outer(s: &str) -> Option<&str> {
    let open = s.find(|c| c == '[' || c == '{')?;
    let close_ch = if s.as_bytes()[open] == b'[' { ']' } else { '}' };
    let close = s.rfind(close_ch)?;
    if close < open {
        return None;
    }
    Some(&s[open..=close])
}

fn normalize_quotes(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    let mut out = String::with_capacity(s.len());
    let mut in_double = false;
    let mut escaped = false;

    for (i, &ch) in chars.iter().enumerate() {
        if in_double {
            out.push(ch);
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_double = false;
            }
            continue;
        }
        if ch == '\'' {
            let prev = chars[..i].iter().rev().find(|c| !c.is_whitespace()).copied();
            let next = chars[i + 1..].iter().find(|c| !c.is_whitespace()).copied();
            let after_structural = matches!(prev, None | Some('{') | Some('[') | Some(':') | Some(','));
            let before_structural = matches!(next, Some(':') | Some(',') | Some('}') | Some(']'));
            if after_structural || before_structural {
                out.push('"');
                continue;
            }
        }
        if ch == '"' {
            in_double = true;
        }
        out.push(ch);
    }

    out.replace("\\'", "'")
}

pub fn parse_lenient(s: &str) -> Result<serde_json::Value> {
    let sliced = slice_outer(s).ok_or_else(|| Error::Parse("no JSON value found".to_string()))?;
    if let Ok(v) = serde_json::from_str(sliced) {
        return Ok(v);
    }
    let repaired = normalize_quotes(sliced);
    serde_json::from_str(&repaired).map_err(|e| Error::Parse(e.to_string()))
}
