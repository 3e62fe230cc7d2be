//! rd-protocol: Wire types for the relaydeck session bridge.
//!
//! This crate defines the frames exchanged with the dashboard server over the
//! shell and chat transports, plus the message and upload records shared by
//! the core bridge and the HTTP collaborators.

pub mod chat;
pub mod message;
pub mod shell;

pub use chat::{ChatInbound, ChatOutbound};
pub use message::{AttachmentRef, Chunk, ChunkKind, Message, Role, UploadRecord};
pub use shell::{PtyControl, RunnerInbound, RunnerOutbound, ShellFrame, WireFrame};
