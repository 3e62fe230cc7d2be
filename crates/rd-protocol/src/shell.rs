//! Frames carried by the shell transport.
//!
//! Two server variants exist and a deployment talks to exactly one of them:
//!
//! - the full PTY bridge, which exchanges raw terminal bytes and uses JSON
//!   text frames only for `resize` control;
//! - the simple command runner, which exchanges structured JSON only
//!   (`command` out; `prompt`, `output`, `exit` in).

use serde::{Deserialize, Serialize};

/// A frame as it appears on the socket: text or binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireFrame {
    Text(String),
    Binary(Vec<u8>),
}

impl WireFrame {
    pub fn len(&self) -> usize {
        match self {
            WireFrame::Text(s) => s.len(),
            WireFrame::Binary(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Terminal output carried by the frame, regardless of representation.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            WireFrame::Text(s) => s.as_bytes(),
            WireFrame::Binary(b) => b,
        }
    }
}

/// JSON control frames of the PTY variant.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PtyControl {
    /// Absolute terminal dimensions. Each frame replaces the previous size.
    Resize { cols: u16, rows: u16 },
}

/// Client-to-server frames of the runner variant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunnerOutbound {
    Command { content: String },
}

/// Server-to-client frames of the runner variant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunnerInbound {
    Prompt {
        cwd: String,
    },
    Output {
        content: String,
    },
    Exit {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<i32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cwd: Option<String>,
    },
}

/// Outbound shell intent before wire encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellFrame {
    Resize { cols: u16, rows: u16 },
    RawBytes(Vec<u8>),
    Command(String),
}

impl ShellFrame {
    /// Encode for the socket: control intents become JSON text, raw bytes
    /// stay binary.
    pub fn encode(&self) -> Result<WireFrame, serde_json::Error> {
        match self {
            ShellFrame::Resize { cols, rows } => {
                let ctl = PtyControl::Resize {
                    cols: *cols,
                    rows: *rows,
                };
                Ok(WireFrame::Text(serde_json::to_string(&ctl)?))
            }
            ShellFrame::RawBytes(bytes) => Ok(WireFrame::Binary(bytes.clone())),
            ShellFrame::Command(text) => {
                let cmd = RunnerOutbound::Command {
                    content: text.clone(),
                };
                Ok(WireFrame::Text(serde_json::to_string(&cmd)?))
            }
        }
    }
}
