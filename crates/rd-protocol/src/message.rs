//! Conversation messages, streamed chunks and upload records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Role of a conversation participant.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Reference to a file already stored server-side.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AttachmentRef {
    pub filename: String,
    pub path: String,
}

/// One entry of the displayed conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub attachments: Vec<AttachmentRef>,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(
        id: impl Into<String>,
        role: Role,
        content: impl Into<String>,
        attachments: Vec<AttachmentRef>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            role,
            content: content.into(),
            attachments,
            timestamp,
        }
    }
}

/// Classification of a streamed chat fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChunkKind {
    Text,
    ToolUse,
    ToolResult,
    Error,
    Result,
    Status,
}

impl ChunkKind {
    /// Map the optional `chunk_type` wire field to a kind.
    ///
    /// A missing field means narrated text. Unrecognised values are also
    /// treated as text so newer servers degrade to readable output.
    pub fn from_wire(chunk_type: Option<&str>) -> Self {
        match chunk_type {
            Some("tool_use") => ChunkKind::ToolUse,
            Some("tool_result") => ChunkKind::ToolResult,
            Some("error") => ChunkKind::Error,
            Some("result") => ChunkKind::Result,
            Some("status") => ChunkKind::Status,
            _ => ChunkKind::Text,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkKind::Text => "text",
            ChunkKind::ToolUse => "tool_use",
            ChunkKind::ToolResult => "tool_result",
            ChunkKind::Error => "error",
            ChunkKind::Result => "result",
            ChunkKind::Status => "status",
        }
    }
}

/// One typed fragment of a streamed exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub kind: ChunkKind,
    pub content: String,
}

impl Chunk {
    pub fn new(kind: ChunkKind, content: impl Into<String>) -> Self {
        Self {
            kind,
            content: content.into(),
        }
    }

    pub fn text(content: impl Into<String>) -> Self {
        Self::new(ChunkKind::Text, content)
    }

    pub fn result(content: impl Into<String>) -> Self {
        Self::new(ChunkKind::Result, content)
    }
}

/// Response body of the upload endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UploadRecord {
    pub filename: String,
    pub path: String,
    pub size: u64,
    #[serde(default)]
    pub content_type: Option<String>,
}

impl UploadRecord {
    pub fn attachment(&self) -> AttachmentRef {
        AttachmentRef {
            filename: self.filename.clone(),
            path: self.path.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_serialization() {
        assert_eq!(serde_json::to_string(&Role::User).unwrap(), "\"user\"");
        assert_eq!(
            serde_json::to_string(&Role::Assistant).unwrap(),
            "\"assistant\""
        );
    }

    #[test]
    fn chunk_kind_from_wire() {
        assert_eq!(ChunkKind::from_wire(None), ChunkKind::Text);
        assert_eq!(ChunkKind::from_wire(Some("text")), ChunkKind::Text);
        assert_eq!(ChunkKind::from_wire(Some("tool_use")), ChunkKind::ToolUse);
        assert_eq!(
            ChunkKind::from_wire(Some("tool_result")),
            ChunkKind::ToolResult
        );
        assert_eq!(ChunkKind::from_wire(Some("error")), ChunkKind::Error);
        assert_eq!(ChunkKind::from_wire(Some("result")), ChunkKind::Result);
        assert_eq!(ChunkKind::from_wire(Some("status")), ChunkKind::Status);
    }

    #[test]
    fn unknown_chunk_type_is_text() {
        assert_eq!(ChunkKind::from_wire(Some("thinking")), ChunkKind::Text);
    }

    #[test]
    fn chunk_kind_names_match_wire() {
        for name in ["text", "tool_use", "tool_result", "error", "result", "status"] {
            assert_eq!(ChunkKind::from_wire(Some(name)).as_str(), name);
        }
    }

    #[test]
    fn upload_record_parses_server_body() {
        let body = r#"{"filename":"1700000000_a.png","path":"/home/u/uploads/1700000000_a.png","size":42,"content_type":"image/png"}"#;
        let record: UploadRecord = serde_json::from_str(body).unwrap();
        assert_eq!(record.size, 42);
        assert_eq!(record.content_type.as_deref(), Some("image/png"));

        let att = record.attachment();
        assert_eq!(att.filename, "1700000000_a.png");
        assert_eq!(att.path, "/home/u/uploads/1700000000_a.png");
    }

    #[test]
    fn upload_record_null_content_type() {
        let body = r#"{"filename":"f","path":"/p/f","size":0,"content_type":null}"#;
        let record: UploadRecord = serde_json::from_str(body).unwrap();
        assert!(record.content_type.is_none());
    }

    #[test]
    fn message_attachments_default_empty() {
        let json = r#"{"id":"m1","role":"assistant","content":"hi","timestamp":"2024-05-01T10:00:00Z"}"#;
        let msg: Message = serde_json::from_str(json).unwrap();
        assert_eq!(msg.role, Role::Assistant);
        assert!(msg.attachments.is_empty());
    }
}
