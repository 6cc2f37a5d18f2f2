//! Best-effort completion of truncated JSON.
//!
//! A streaming generation delivers the output object as an ever-growing text
//! prefix. To surface partial objects to the client before the stream ends,
//! the prefix is "repaired" — unterminated strings and open containers are
//! closed, and dangling fragments dropped — until it parses.

use serde_json::Value;

/// Upper bound on backtracking attempts for a single prefix.
const MAX_BACKTRACK: usize = 24;

/// Try to turn a truncated JSON prefix into a parseable value.
///
/// Returns `None` when no JSON object has started yet or nothing parseable
/// can be recovered.
pub fn complete_truncated(text: &str) -> Option<Value> {
    let start = text.find(['{', '['])?;
    let mut candidate = &text[start..];

    if let Ok(value) = serde_json::from_str::<Value>(&repair(candidate)) {
        return Some(value);
    }

    // Drop trailing fragments (a half-written key, a bare `tru`, ...) by
    // cutting back to structural characters and re-closing.
    for _ in 0..MAX_BACKTRACK {
        let cut = last_structural_cut(candidate)?;
        candidate = &candidate[..cut];
        if candidate.is_empty() {
            return None;
        }
        if let Ok(value) = serde_json::from_str::<Value>(&repair(candidate)) {
            return Some(value);
        }
    }

    None
}

/// Close any unterminated string, then close open containers innermost-first.
fn repair(text: &str) -> String {
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for c in text.chars() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                stack.pop();
            }
            _ => {}
        }
    }

    let mut repaired = text.to_string();
    // A trailing backslash would escape the closing quote.
    if in_string && escaped {
        repaired.pop();
    }
    if in_string {
        repaired.push('"');
    }
    while let Some(closer) = stack.pop() {
        repaired.push(closer);
    }
    repaired
}

/// Position of the last comma or opening bracket outside a string, i.e. the
/// point to cut a dangling fragment at. Cutting at a comma removes the
/// fragment after it; cutting after `{`/`[` empties the container.
fn last_structural_cut(text: &str) -> Option<usize> {
    let mut in_string = false;
    let mut escaped = false;
    let mut cut = None;

    for (i, c) in text.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            ',' => cut = Some(i),
            '{' | '[' => cut = Some(i + c.len_utf8()),
            _ => {}
        }
    }

    // Cutting at the very end makes no progress; retry excluding it.
    match cut {
        Some(pos) if pos >= text.len() => {
            if pos == 0 {
                None
            } else {
                last_structural_cut(&text[..text.len() - 1])
            }
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_complete_object_passes_through() {
        let value = complete_truncated(r#"{"name": "n", "items": []}"#).unwrap();
        assert_eq!(value, json!({"name": "n", "items": []}));
    }

    #[test]
    fn test_unterminated_string_is_closed() {
        let value = complete_truncated(r#"{"name": "Daily rou"#).unwrap();
        assert_eq!(value, json!({"name": "Daily rou"}));
    }

    #[test]
    fn test_dangling_key_is_dropped() {
        let value = complete_truncated(r#"{"name": "n", "phra"#).unwrap();
        assert_eq!(value, json!({"name": "n"}));
    }

    #[test]
    fn test_dangling_key_with_colon_is_dropped() {
        let value = complete_truncated(r#"{"name": "n", "items":"#).unwrap();
        assert_eq!(value, json!({"name": "n"}));
    }

    #[test]
    fn test_open_array_of_objects() {
        let text = r#"{"items": [{"word": "a", "translation": "b"}, {"word": "c"#;
        let value = complete_truncated(text).unwrap();
        assert_eq!(
            value,
            json!({"items": [{"word": "a", "translation": "b"}, {"word": "c"}]})
        );
    }

    #[test]
    fn test_leading_prose_is_skipped() {
        let value = complete_truncated("Here you go:\n```json\n{\"a\": 1}").unwrap();
        assert_eq!(value, json!({"a": 1}));
    }

    #[test]
    fn test_no_json_yet() {
        assert!(complete_truncated("").is_none());
        assert!(complete_truncated("Thinking about it").is_none());
    }

    #[test]
    fn test_bare_brace_recovers_empty_object() {
        assert_eq!(complete_truncated(r#"{"na"#).unwrap(), json!({}));
    }

    #[test]
    fn test_escaped_quote_inside_string() {
        let value = complete_truncated(r#"{"note": "say \"hi\" to"#).unwrap();
        assert_eq!(value, json!({"note": "say \"hi\" to"}));
    }

    #[test]
    fn test_trailing_escape_does_not_break_close() {
        let value = complete_truncated(r#"{"note": "line\"#).unwrap();
        assert_eq!(value, json!({"note": "line"}));
    }

    #[test]
    fn test_prefixes_grow_monotonically() {
        let full = r#"{"name": "set", "phrase": "hola", "items": [{"word": "hola", "translation": "hello", "note": "greeting"}]}"#;
        let mut last_len = 0;
        for end in (1..=full.len()).filter(|i| full.is_char_boundary(*i)) {
            if let Some(value) = complete_truncated(&full[..end]) {
                let rendered = serde_json::to_string(&value).unwrap();
                // Each successive repair should never lose settled content.
                assert!(
                    rendered.len() + 4 >= last_len,
                    "partial shrank at prefix {}: {}",
                    end,
                    rendered
                );
                last_len = rendered.len();
            }
        }
        assert_eq!(
            complete_truncated(full).unwrap(),
            serde_json::from_str::<Value>(full).unwrap()
        );
    }
}
