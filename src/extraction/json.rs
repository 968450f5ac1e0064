//! Locate and decode the JSON object embedded in a model response.
//!
//! Responses usually wrap the object in prose or a code fence. The scan finds
//! the first brace-balanced region, counting nested braces and ignoring braces
//! inside JSON strings, and decodes exactly that region.

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum JsonExtractError {
    #[error("no balanced JSON object found")]
    NotFound,

    #[error("JSON object is malformed: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Return the first balanced `{...}` region of `text`
pub fn find_balanced_object(text: &str) -> Option<&str> {
    let mut search_from = 0;
    while let Some(offset) = text[search_from..].find('{') {
        let start = search_from + offset;
        if let Some(end) = balanced_end(text, start) {
            return Some(&text[start..end]);
        }
        search_from = start + 1;
    }
    None
}

/// Byte index just past the brace closing the one at `start`
fn balanced_end(text: &str, start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, c) in text[start..].char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match c {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            _ if in_string => {}
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(start + i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

/// Find and strictly decode the first JSON object in `text`
pub fn extract_json_object(text: &str) -> Result<Value, JsonExtractError> {
    let region = find_balanced_object(text).ok_or(JsonExtractError::NotFound)?;
    Ok(serde_json::from_str(region)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extracts_nested_object_from_prose() {
        let text = r#"here is your data: {"events":[{"title":"A","meta":{"x":1}}]} thanks"#;
        assert_eq!(
            find_balanced_object(text),
            Some(r#"{"events":[{"title":"A","meta":{"x":1}}]}"#)
        );
        let value = extract_json_object(text).unwrap();
        assert_eq!(value, json!({"events": [{"title": "A", "meta": {"x": 1}}]}));
    }

    #[test]
    fn test_not_greedy_to_last_brace() {
        let text = r#"{"a":1} and later {"b":2}"#;
        assert_eq!(extract_json_object(text).unwrap(), json!({"a": 1}));
    }

    #[test]
    fn test_braces_inside_strings_are_ignored() {
        let text = r#"Result: {"title":"Set {late}","note":"quote \" and }"} done"#;
        let value = extract_json_object(text).unwrap();
        assert_eq!(value["title"], "Set {late}");
        assert_eq!(value["note"], "quote \" and }");
    }

    #[test]
    fn test_code_fence_and_multibyte_prose() {
        let text = "結果です:\n```json\n{\"title\": \"ジャズの夜\", \"prices\": [{\"amount\": 0}]}\n```";
        let value = extract_json_object(text).unwrap();
        assert_eq!(value["title"], "ジャズの夜");
    }

    #[test]
    fn test_unbalanced_is_not_found() {
        let text = r#"partial: {"events": [{"title": "A""#;
        assert!(matches!(extract_json_object(text), Err(JsonExtractError::NotFound)));
        assert!(matches!(extract_json_object("no json here"), Err(JsonExtractError::NotFound)));
    }

    #[test]
    fn test_balanced_but_invalid_is_malformed() {
        let text = r#"data: {"a": 1, "b": [1, 2,],} end"#;
        assert!(matches!(extract_json_object(text), Err(JsonExtractError::Malformed(_))));
    }

    #[test]
    fn test_skips_unclosed_leading_brace() {
        let text = r#"{ oops then {"ok": true}"#;
        assert_eq!(extract_json_object(text).unwrap(), json!({"ok": true}));
    }
}
