//! Decoding of Goose session log lines.
//!
//! Goose appends one JSON object per line to `~/.local/share/goose/sessions/{id}.jsonl`.
//! The first line is a metadata header (`working_dir`, `description`, ...); every
//! following line is a message, sometimes wrapped as `{"data": {...}}`:
//!
//! ```text
//! {"data":{"role":"user","content":[{"type":"text","text":"ping"}]}}
//! {"role":"assistant","content":[{"type":"toolRequest","toolCall":{"value":{"name":"developer__shell","arguments":{"command":"ls"}}}}]}
//! ```

use serde::Serialize;
use serde_json::{Map, Value};

/// Author of a message line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Unknown,
}

impl Role {
    fn parse(role: &str) -> Self {
        match role {
            "user" => Role::User,
            "assistant" => Role::Assistant,
            _ => Role::Unknown,
        }
    }
}

/// One content part of a message
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum ContentPart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "toolRequest")]
    ToolRequest {
        tool_name: String,
        arguments: Map<String, Value>,
    },
    #[serde(rename = "toolResponse")]
    ToolResponse {
        status: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        user_visible_text: Option<String>,
    },
}

/// A single decoded log line.
///
/// Decoding never fails: a line that is not valid JSON keeps its text in `raw`
/// with no role and no content.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEntry {
    /// `None` for metadata and undecodable lines
    pub role: Option<Role>,
    pub content: Vec<ContentPart>,
    /// The decoded JSON object as written by the agent
    pub data: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
}

impl LogEntry {
    /// Decode one line of a session log
    pub fn decode(line: &str) -> Self {
        let data = match serde_json::from_str::<Value>(line) {
            Ok(value) => value,
            Err(_) => {
                return Self {
                    role: None,
                    content: Vec::new(),
                    data: Value::Object(Map::new()),
                    raw: Some(line.trim().to_string()),
                }
            }
        };

        // Messages are either bare or wrapped in a "data" object
        let body = match data.get("data") {
            Some(inner @ Value::Object(_)) => inner,
            _ => &data,
        };

        let role = body.get("role").and_then(|r| r.as_str()).map(Role::parse);
        let content = decode_content(body.get("content"));

        Self {
            role,
            content,
            data,
            raw: None,
        }
    }

    /// Role-less lines that describe the session rather than carry a message
    pub fn is_metadata(&self) -> bool {
        if self.role.is_some() {
            return false;
        }
        let has_description = |v: &Value| v.get("description").is_some();
        has_description(&self.data)
            || self.data.get("data").map(has_description).unwrap_or(false)
    }

    /// Concatenated text of all `Text` parts
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }
}

fn decode_content(content: Option<&Value>) -> Vec<ContentPart> {
    match content {
        Some(Value::Array(items)) => items.iter().filter_map(decode_part).collect(),
        Some(Value::String(s)) => vec![ContentPart::Text { text: s.clone() }],
        _ => Vec::new(),
    }
}

fn decode_part(item: &Value) -> Option<ContentPart> {
    // Older Goose builds serialize text parts as {"Text": {"text": "..."}}
    if let Some(text) = item.get("Text").and_then(|t| t.get("text")).and_then(|t| t.as_str()) {
        return Some(ContentPart::Text { text: text.to_string() });
    }

    match item.get("type")?.as_str()? {
        "text" => {
            let text = item.get("text")?.as_str()?.to_string();
            Some(ContentPart::Text { text })
        }
        "toolRequest" => {
            let call = item.get("toolCall").and_then(|c| c.get("value"));
            let tool_name = call
                .and_then(|c| c.get("name"))
                .and_then(|n| n.as_str())
                .unwrap_or("unknown_tool")
                .to_string();
            let arguments = call
                .and_then(|c| c.get("arguments"))
                .and_then(|a| a.as_object())
                .cloned()
                .unwrap_or_default();
            Some(ContentPart::ToolRequest { tool_name, arguments })
        }
        "toolResponse" => {
            let result = item.get("toolResult");
            let status = result
                .and_then(|r| r.get("status"))
                .and_then(|s| s.as_str())
                .unwrap_or("unknown")
                .to_string();
            let user_visible_text = result
                .and_then(|r| r.get("value"))
                .and_then(|v| v.as_array())
                .map(|parts| user_visible_text(parts))
                .filter(|text| !text.is_empty());
            Some(ContentPart::ToolResponse { status, user_visible_text })
        }
        _ => None,
    }
}

/// Text of tool output parts annotated for the user's eyes only
fn user_visible_text(parts: &[Value]) -> String {
    parts
        .iter()
        .filter(|part| part.get("type").and_then(|t| t.as_str()) == Some("text"))
        .filter(|part| {
            part.get("annotations")
                .and_then(|a| a.get("audience"))
                .and_then(|a| a.as_array())
                .map(|audience| audience.len() == 1 && audience[0].as_str() == Some("user"))
                .unwrap_or(false)
        })
        .filter_map(|part| part.get("text").and_then(|t| t.as_str()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_decode_wrapped_user_text() {
        let entry = LogEntry::decode(
            r#"{"data":{"role":"user","content":[{"type":"text","text":"ping"}]}}"#,
        );
        assert_eq!(entry.role, Some(Role::User));
        assert_eq!(entry.text(), "ping");
        assert_eq!(entry.raw, None);
    }

    #[test]
    fn test_decode_bare_message_and_legacy_text() {
        let entry = LogEntry::decode(
            r#"{"role":"assistant","created":1741400000,"content":[{"Text":{"text":"hi "}},{"type":"text","text":"there"}]}"#,
        );
        assert_eq!(entry.role, Some(Role::Assistant));
        assert_eq!(entry.text(), "hi there");
    }

    #[test]
    fn test_decode_malformed_keeps_raw() {
        let entry = LogEntry::decode("{\"role\":\"user\",  \n");
        assert_eq!(entry.role, None);
        assert!(entry.content.is_empty());
        assert_eq!(entry.raw.as_deref(), Some("{\"role\":\"user\","));
        assert!(!entry.is_metadata());
    }

    #[test]
    fn test_metadata_header() {
        let entry = LogEntry::decode(
            r#"{"working_dir":"/home/coder","description":"Weather lookup","message_count":4}"#,
        );
        assert!(entry.is_metadata());
        assert_eq!(entry.role, None);
    }

    #[test]
    fn test_unknown_role() {
        let entry = LogEntry::decode(r#"{"role":"system","content":"boot"}"#);
        assert_eq!(entry.role, Some(Role::Unknown));
        assert_eq!(entry.text(), "boot");
    }

    #[test]
    fn test_tool_request() {
        let entry = LogEntry::decode(
            r#"{"role":"assistant","content":[{"type":"toolRequest","id":"t1","toolCall":{"status":"success","value":{"name":"developer__shell","arguments":{"command":"ls -la"}}}}]}"#,
        );
        match &entry.content[..] {
            [ContentPart::ToolRequest { tool_name, arguments }] => {
                assert_eq!(tool_name, "developer__shell");
                assert_eq!(arguments.get("command"), Some(&Value::from("ls -la")));
            }
            other => panic!("unexpected content: {:?}", other),
        }
    }

    #[test]
    fn test_tool_response_user_visible_text() {
        let entry = LogEntry::decode(
            r#"{"role":"user","content":[{"type":"toolResponse","id":"t1","toolResult":{"status":"success","value":[
                {"type":"text","text":"for the model","annotations":{"audience":["assistant"]}},
                {"type":"text","text":"total 0","annotations":{"audience":["user"]}},
                {"type":"text","text":"both","annotations":{"audience":["user","assistant"]}}
            ]}}]}"#
                .replace('\n', "")
                .as_str(),
        );
        assert_eq!(
            entry.content,
            vec![ContentPart::ToolResponse {
                status: "success".to_string(),
                user_visible_text: Some("total 0".to_string()),
            }]
        );
    }

    #[test]
    fn test_tool_response_without_user_text() {
        let entry = LogEntry::decode(
            r#"{"role":"user","content":[{"type":"toolResponse","toolResult":{"status":"error"}}]}"#,
        );
        assert_eq!(
            entry.content,
            vec![ContentPart::ToolResponse {
                status: "error".to_string(),
                user_visible_text: None,
            }]
        );
    }

    #[test]
    fn test_non_object_json_has_no_role() {
        let entry = LogEntry::decode("42");
        assert_eq!(entry.role, None);
        assert_eq!(entry.data, Value::from(42));
        assert!(!entry.is_metadata());
    }
}
