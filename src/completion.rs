//! Detects when the assistant has answered with something a person would read.

use crate::entry::{ContentPart, LogEntry, Role};

/// True for assistant entries carrying non-empty text or user-visible tool output.
///
/// Entries that only request tools mean the agent is still working.
pub fn is_terminal(entry: &LogEntry) -> bool {
    if entry.role != Some(Role::Assistant) {
        return false;
    }
    entry.content.iter().any(|part| match part {
        ContentPart::Text { text } => !text.is_empty(),
        ContentPart::ToolResponse { user_visible_text, .. } => {
            user_visible_text.as_deref().is_some_and(|t| !t.is_empty())
        }
        ContentPart::ToolRequest { .. } => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(line: &str) -> LogEntry {
        LogEntry::decode(line)
    }

    #[test]
    fn test_assistant_text_is_terminal() {
        assert!(is_terminal(&decode(
            r#"{"data":{"role":"assistant","content":[{"type":"text","text":"pong"}]}}"#
        )));
    }

    #[test]
    fn test_tool_request_only_is_not_terminal() {
        assert!(!is_terminal(&decode(
            r#"{"role":"assistant","content":[{"type":"toolRequest","toolCall":{"value":{"name":"developer__shell","arguments":{"command":"ls"}}}}]}"#
        )));
    }

    #[test]
    fn test_text_alongside_tool_request_is_terminal() {
        assert!(is_terminal(&decode(
            r#"{"role":"assistant","content":[{"type":"text","text":"Listing files"},{"type":"toolRequest","toolCall":{"value":{"name":"developer__shell","arguments":{}}}}]}"#
        )));
    }

    #[test]
    fn test_empty_text_is_not_terminal() {
        assert!(!is_terminal(&decode(
            r#"{"role":"assistant","content":[{"type":"text","text":""}]}"#
        )));
    }

    #[test]
    fn test_assistant_tool_response_with_user_text() {
        let visible = r#"{"role":"assistant","content":[{"type":"toolResponse","toolResult":{"status":"success","value":[{"type":"text","text":"done","annotations":{"audience":["user"]}}]}}]}"#;
        let hidden = r#"{"role":"assistant","content":[{"type":"toolResponse","toolResult":{"status":"success","value":[{"type":"text","text":"done","annotations":{"audience":["assistant"]}}]}}]}"#;
        assert!(is_terminal(&decode(visible)));
        assert!(!is_terminal(&decode(hidden)));
    }

    #[test]
    fn test_user_and_metadata_are_not_terminal() {
        assert!(!is_terminal(&decode(
            r#"{"role":"user","content":[{"type":"text","text":"ping"}]}"#
        )));
        assert!(!is_terminal(&decode(r#"{"description":"session header"}"#)));
        assert!(!is_terminal(&decode("garbage")));
    }
}
