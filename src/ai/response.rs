use crate::error::ParseError;
use crate::json;

/// Pull the assistant text out of a chat-completions response body.
///
/// Takes the first `"content"` after the top-level `"choices"` key, which
/// belongs to the first choice, and returns it unescaped. Returns `None`
/// when there is no choice or that content is not a string (a filtered
/// completion carries `"content": null`). Later choices are never used.
pub fn extract_message_text(body: &str) -> Option<String> {
    let choices = find_choices(body)?;
    json::first_string_field(body, "content", choices).map(|(text, _)| text)
}

/// Like [`extract_message_text`], but keeps the raw body in the error for
/// whoever has to debug an unexpected response.
pub fn parse_message_text(body: &str) -> Result<String, ParseError> {
    extract_message_text(body).ok_or_else(|| ParseError::UnrecognizedShape {
        body: body.to_string(),
    })
}

/// Byte offset just past the `"choices"` key.
fn find_choices(body: &str) -> Option<usize> {
    const KEY: &str = "\"choices\"";
    body.find(KEY).map(|i| i + KEY.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unescapes_newline_and_quotes() {
        let body = r#"{"choices":[{"message":{"content":"Line1\nLine2 \"quoted\""}}]}"#;
        assert_eq!(
            extract_message_text(body).as_deref(),
            Some("Line1\nLine2 \"quoted\"")
        );
    }

    #[test]
    fn full_azure_response() {
        let body = r#"{
          "id": "chatcmpl-123",
          "object": "chat.completion",
          "model": "gpt-4o-2024-08-06",
          "prompt_filter_results": [{"prompt_index":0,"content_filter_results":{"hate":{"filtered":false,"severity":"safe"}}}],
          "choices": [
            {
              "finish_reason": "stop",
              "index": 0,
              "message": {
                "role": "assistant",
                "content": "Warm the white balance slightly.\n\tReduce Orange saturation by 10."
              }
            }
          ],
          "usage": {"completion_tokens": 20, "prompt_tokens": 500, "total_tokens": 520}
        }"#;
        assert_eq!(
            extract_message_text(body).as_deref(),
            Some("Warm the white balance slightly.\n\tReduce Orange saturation by 10.")
        );
    }

    #[test]
    fn content_before_choices_is_ignored() {
        let body = r#"{"content":"wrong","choices":[{"message":{"content":"right"}}]}"#;
        assert_eq!(extract_message_text(body).as_deref(), Some("right"));
    }

    #[test]
    fn first_choice_wins() {
        let body = r#"{"choices":[{"message":{"content":"one"}},{"message":{"content":"two"}}]}"#;
        assert_eq!(extract_message_text(body).as_deref(), Some("one"));
    }

    #[test]
    fn backslashes_and_carriage_returns() {
        let body = r#"{"choices":[{"message":{"content":"C:\\photos\r\nend"}}]}"#;
        assert_eq!(extract_message_text(body).as_deref(), Some("C:\\photos\r\nend"));
    }

    #[test]
    fn missing_choices_is_none() {
        assert!(extract_message_text(r#"{"error":{"message":"bad"}}"#).is_none());
        assert!(extract_message_text("").is_none());
        assert!(extract_message_text("<html>502 Bad Gateway</html>").is_none());
    }

    #[test]
    fn null_content_is_none() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":null}}]}"#;
        assert!(extract_message_text(body).is_none());
    }

    #[test]
    fn filtered_first_choice_does_not_borrow_later_content() {
        let body = r#"{"choices":[{"finish_reason":"content_filter","message":{"role":"assistant","content":null}}],"system_hint":{"content":"not the assistant"}}"#;
        assert!(extract_message_text(body).is_none());

        let two = r#"{"choices":[{"message":{"content":null}},{"message":{"content":"second"}}]}"#;
        assert!(extract_message_text(two).is_none());
    }

    #[test]
    fn content_filter_results_key_is_not_content() {
        let body = r#"{"choices":[{"content_filter_results":{"hate":{"filtered":false}},"message":{"content":"ok"}}]}"#;
        assert_eq!(extract_message_text(body).as_deref(), Some("ok"));
    }

    #[test]
    fn parse_error_keeps_body() {
        let err = parse_message_text("not json").unwrap_err();
        assert_eq!(
            err,
            ParseError::UnrecognizedShape {
                body: "not json".into()
            }
        );
    }
}
