//! Upload coordination: send a file out of band, then hand its reference
//! to the chat composer or type it into the shell.
//!
//! The upload itself runs detached from the transports so in-flight traffic
//! is never held up. Failures are not retried; they raise a [`Notice`] that
//! expires on its own and, for the shell, a red marker line.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use rd_backend::{DashboardClient, DashboardError, ProgressFn};
use rd_protocol::{AttachmentRef, UploadRecord};
use thiserror::Error;
use tokio::time::Instant;

use crate::attachment::load_upload;
use crate::chat::ChatSession;
use crate::shell::ShellBridge;
use crate::surface::Surface;

/// How long a failure notice stays visible.
pub const NOTICE_TTL: Duration = Duration::from_secs(3);

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("{0}")]
    Invalid(String),
    #[error(transparent)]
    Dashboard(#[from] DashboardError),
}

/// Where a finished upload goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadTarget {
    /// Pending attachment of the next chat message.
    Composer,
    /// Path typed into the live shell.
    Shell,
}

#[derive(Clone)]
pub struct Uploader {
    client: Arc<DashboardClient>,
    max_bytes: u64,
}

impl Uploader {
    pub fn new(client: Arc<DashboardClient>, max_bytes: u64) -> Self {
        Self { client, max_bytes }
    }

    /// Validate and upload one file. Never retried.
    pub async fn upload(
        &self,
        path: &Path,
        progress: ProgressFn,
    ) -> Result<UploadRecord, UploadError> {
        let payload = load_upload(path, self.max_bytes).map_err(UploadError::Invalid)?;
        tracing::info!(file = %payload.filename, bytes = payload.data.len(), "upload started");
        let record = self.client.upload(payload, progress).await?;
        tracing::info!(path = %record.path, "upload finished");
        Ok(record)
    }

    /// Run the upload on its own task.
    pub fn spawn(
        &self,
        path: PathBuf,
        progress: ProgressFn,
    ) -> tokio::task::JoinHandle<Result<UploadRecord, UploadError>> {
        let uploader = self.clone();
        tokio::spawn(async move { uploader.upload(&path, progress).await })
    }
}

/// A transient message with an expiry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub text: String,
    pub expires_at: Instant,
}

#[derive(Debug, Default)]
pub struct Notices {
    items: VecDeque<Notice>,
}

impl Notices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, text: impl Into<String>, now: Instant) {
        self.items.push_back(Notice {
            text: text.into(),
            expires_at: now + NOTICE_TTL,
        });
    }

    /// Drop expired notices and return the rest.
    pub fn active(&mut self, now: Instant) -> &VecDeque<Notice> {
        self.items.retain(|n| n.expires_at > now);
        &self.items
    }

    pub fn next_expiry(&self) -> Option<Instant> {
        self.items.iter().map(|n| n.expires_at).min()
    }

    /// One line of everything still live, newest last. `None` once all
    /// notices have expired.
    pub fn banner(&mut self, now: Instant) -> Option<String> {
        let active = self.active(now);
        if active.is_empty() {
            return None;
        }
        let texts: Vec<&str> = active.iter().map(|n| n.text.as_str()).collect();
        Some(texts.join(" · "))
    }
}

fn failure_text(err: &UploadError) -> String {
    format!("Upload failed: {err}")
}

/// Queue a finished upload as an attachment of the next chat message.
pub fn deliver_to_composer(
    result: Result<UploadRecord, UploadError>,
    chat: &mut ChatSession,
    notices: &mut Notices,
    now: Instant,
) -> Option<AttachmentRef> {
    match result {
        Ok(record) => {
            let attachment = record.attachment();
            chat.attach(attachment.clone());
            Some(attachment)
        }
        Err(e) => {
            tracing::warn!("upload failed: {e}");
            notices.push(failure_text(&e), now);
            None
        }
    }
}

/// Type a finished upload's path into the shell, without submitting it.
pub fn deliver_to_shell<S: Surface>(
    result: Result<UploadRecord, UploadError>,
    shell: &mut ShellBridge<S>,
    notices: &mut Notices,
    now: Instant,
) -> Option<UploadRecord> {
    match result {
        Ok(record) => {
            shell.inject_path(&record.path);
            Some(record)
        }
        Err(e) => {
            tracing::warn!("upload failed: {e}");
            let text = failure_text(&e);
            shell.write_failure(&text);
            notices.push(text, now);
            None
        }
    }
}
