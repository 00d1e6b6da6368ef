//! Shared helpers for planner output and URL handling.

use url::Url;

/// Extract a JSON object from text that may carry prose or markdown fences
/// around it.
///
/// Each `{` is tried in turn and the first balanced slice that parses as JSON
/// wins, so stray braces in leading prose are skipped. When no slice parses,
/// the first balanced one is returned for the caller to report on. Braces
/// inside string literals are ignored so `{"message": "use {x}"}` is
/// returned whole.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let mut first_balanced = None;
    for (start, _) in text.match_indices('{') {
        let Some(candidate) = balanced_object(&text[start..]) else {
            continue;
        };
        if serde_json::from_str::<serde::de::IgnoredAny>(candidate).is_ok() {
            return Some(candidate);
        }
        if first_balanced.is_none() {
            first_balanced = Some(candidate);
        }
    }
    first_balanced
}

/// The `{...}` prefix of `text` with balanced braces, if it closes.
fn balanced_object(text: &str) -> Option<&str> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in text.char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(&text[..i + 1]);
                }
            }
            _ => {}
        }
    }

    None
}

/// Scheme + host (+ port) of a URL, e.g. `https://shop.example.com`.
pub fn origin_of(raw: &str) -> Option<String> {
    let url = Url::parse(raw).ok()?;
    match url.origin() {
        url::Origin::Tuple(..) => Some(url.origin().ascii_serialization()),
        url::Origin::Opaque(_) => None,
    }
}

/// Lowercased host of a URL with any leading `www.` removed.
pub fn host_of(raw: &str) -> Option<String> {
    let url = Url::parse(raw).ok()?;
    let host = url.host_str()?.to_lowercase();
    Some(host.strip_prefix("www.").map(str::to_string).unwrap_or(host))
}

/// Truncate to at most `max` characters, appending an ellipsis when cut.
pub fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let cut: String = text.chars().take(max).collect();
    format!("{}...", cut)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_json_object_with_prose_around() {
        let text = r#"Sure! {"type": "complete", "message": "done"} hope that helps"#;
        assert_eq!(
            extract_json_object(text),
            Some(r#"{"type": "complete", "message": "done"}"#)
        );
    }

    #[test]
    fn test_extract_json_object_from_markdown_fence() {
        let text = "```json\n{\"type\": \"action\", \"tool\": \"click\"}\n```";
        assert_eq!(
            extract_json_object(text),
            Some("{\"type\": \"action\", \"tool\": \"click\"}")
        );
    }

    #[test]
    fn test_extract_json_object_nested() {
        let text = r#"{"outer": {"inner": "value"}}"#;
        assert_eq!(extract_json_object(text), Some(text));
    }

    #[test]
    fn test_extract_json_object_ignores_braces_in_strings() {
        let text = r#"{"message": "press } then {"} trailing"#;
        assert_eq!(
            extract_json_object(text),
            Some(r#"{"message": "press } then {"}"#)
        );
    }

    #[test]
    fn test_extract_json_object_skips_braces_in_leading_prose() {
        let text = "I will use {ref} here.\n```json\n{\"type\": \"complete\", \"message\": \"ok\"}\n```";
        assert_eq!(
            extract_json_object(text),
            Some("{\"type\": \"complete\", \"message\": \"ok\"}")
        );
    }

    #[test]
    fn test_extract_json_object_falls_back_to_first_balanced() {
        assert_eq!(extract_json_object("{not json} at all"), Some("{not json}"));
    }

    #[test]
    fn test_extract_json_object_none_cases() {
        assert_eq!(extract_json_object("No JSON here"), None);
        assert_eq!(extract_json_object(r#"{"key": "value""#), None);
    }

    #[test]
    fn test_origin_of() {
        assert_eq!(
            origin_of("https://shop.example.com/cart?x=1").as_deref(),
            Some("https://shop.example.com")
        );
        assert_eq!(
            origin_of("http://localhost:8080/a").as_deref(),
            Some("http://localhost:8080")
        );
        assert_eq!(origin_of("not a url"), None);
    }

    #[test]
    fn test_host_of_strips_www() {
        assert_eq!(
            host_of("https://www.Patagonia.com/p/1").as_deref(),
            Some("patagonia.com")
        );
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdefghij", 4), "abcd...");
    }
}
