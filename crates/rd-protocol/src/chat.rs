//! Frames carried by the chat transport.

use serde::{Deserialize, Serialize};

use crate::message::{AttachmentRef, Chunk, ChunkKind};

/// Client-to-server chat frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatOutbound {
    Message {
        content: String,
        attachments: Vec<AttachmentRef>,
        /// `null` until the server has assigned a session.
        session_id: Option<String>,
        is_first_message: bool,
    },
}

/// Server-to-client chat frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatInbound {
    Chunk {
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        chunk_type: Option<String>,
    },
    SessionId {
        session_id: String,
    },
    Done {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },
    Error {
        message: String,
    },
}

impl ChatInbound {
    pub fn chunk(kind: ChunkKind, content: impl Into<String>) -> Self {
        ChatInbound::Chunk {
            content: content.into(),
            chunk_type: Some(kind.as_str().to_string()),
        }
    }

    /// Convert a `chunk` frame into its typed chunk.
    pub fn as_chunk(&self) -> Option<Chunk> {
        match self {
            ChatInbound::Chunk {
                content,
                chunk_type,
            } => Some(Chunk::new(
                ChunkKind::from_wire(chunk_type.as_deref()),
                content.clone(),
            )),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn outbound_message_wire_shape() {
        let frame = ChatOutbound::Message {
            content: "list files".to_string(),
            attachments: vec![AttachmentRef {
                filename: "a.txt".to_string(),
                path: "/up/a.txt".to_string(),
            }],
            session_id: None,
            is_first_message: true,
        };
        let value: Value = serde_json::to_value(&frame).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "message",
                "content": "list files",
                "attachments": [{"filename": "a.txt", "path": "/up/a.txt"}],
                "session_id": null,
                "is_first_message": true,
            })
        );
    }

    #[test]
    fn outbound_message_with_session() {
        let frame = ChatOutbound::Message {
            content: "again".to_string(),
            attachments: Vec::new(),
            session_id: Some("abc".to_string()),
            is_first_message: false,
        };
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains("\"session_id\":\"abc\""));
        assert!(json.contains("\"attachments\":[]"));
    }

    #[test]
    fn inbound_chunk_with_type() {
        let frame: ChatInbound =
            serde_json::from_str(r#"{"type":"chunk","content":"[Bash] ls","chunk_type":"tool_use"}"#)
                .unwrap();
        assert_eq!(
            frame.as_chunk(),
            Some(Chunk::new(ChunkKind::ToolUse, "[Bash] ls"))
        );
    }

    #[test]
    fn inbound_chunk_without_type_is_text() {
        let frame: ChatInbound =
            serde_json::from_str(r#"{"type":"chunk","content":"hello"}"#).unwrap();
        assert_eq!(frame.as_chunk(), Some(Chunk::text("hello")));
    }

    #[test]
    fn inbound_session_done_error() {
        let sid: ChatInbound =
            serde_json::from_str(r#"{"type":"session_id","session_id":"s-1"}"#).unwrap();
        assert_eq!(
            sid,
            ChatInbound::SessionId {
                session_id: "s-1".to_string()
            }
        );

        let done: ChatInbound = serde_json::from_str(r#"{"type":"done"}"#).unwrap();
        assert_eq!(done, ChatInbound::Done { session_id: None });

        let done: ChatInbound =
            serde_json::from_str(r#"{"type":"done","session_id":"s-1"}"#).unwrap();
        assert_eq!(
            done,
            ChatInbound::Done {
                session_id: Some("s-1".to_string())
            }
        );

        let err: ChatInbound =
            serde_json::from_str(r#"{"type":"error","message":"Empty message"}"#).unwrap();
        assert_eq!(
            err,
            ChatInbound::Error {
                message: "Empty message".to_string()
            }
        );
        assert!(err.as_chunk().is_none());
    }

    #[test]
    fn inbound_unknown_type_rejected() {
        let result: Result<ChatInbound, _> = serde_json::from_str(r#"{"type":"ping"}"#);
        assert!(result.is_err());
    }
}
