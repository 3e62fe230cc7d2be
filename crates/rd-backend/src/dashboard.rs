//! REST client for the dashboard endpoints used by the bridge.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use rd_protocol::{AttachmentRef, Message, Role, UploadRecord};
use reqwest::{multipart, Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use url::Url;

use crate::credentials::CredentialStore;

const UPLOAD_PATH: &str = "api/files/upload";
const SESSIONS_PATH: &str = "api/sessions/";

/// Bytes handed to the body stream per progress report.
const PROGRESS_CHUNK: usize = 64 * 1024;

/// Fractional progress callback, called with values in `0.0..=1.0`.
pub type ProgressFn = Arc<dyn Fn(f64) + Send + Sync>;

#[derive(Debug, Error)]
pub enum DashboardError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("no credential available")]
    MissingCredential,
    #[error("unauthorized")]
    Unauthorized,
    #[error("server error {status}: {detail}")]
    Api { status: u16, detail: String },
}

/// A file ready to be sent to the upload endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadPayload {
    pub filename: String,
    pub content_type: String,
    pub data: Bytes,
}

/// Join an API path onto the configured base URL, keeping any path prefix
/// the base already carries.
pub fn endpoint(base: &Url, path: &str) -> Result<Url, url::ParseError> {
    let mut base = base.clone();
    if !base.path().ends_with('/') {
        let with_slash = format!("{}/", base.path());
        base.set_path(&with_slash);
    }
    base.join(path.trim_start_matches('/'))
}

/// URL of one stored session. The id is escaped into a single path segment,
/// so `/`, `?` and `..` in it cannot leave `api/sessions/`.
fn session_url(base: &Url, session_id: &str) -> Result<Url, DashboardError> {
    let mut url = endpoint(base, SESSIONS_PATH)?;
    url.path_segments_mut()
        .map_err(|()| DashboardError::Url(url::ParseError::RelativeUrlWithCannotBeABaseBase))?
        .pop_if_empty()
        .push(session_id);
    Ok(url)
}

/// Build an HTTP client with upload-friendly timeouts.
fn build_http_client() -> Result<Client, reqwest::Error> {
    Client::builder()
        .timeout(Duration::from_secs(300))
        .connect_timeout(Duration::from_secs(10))
        .pool_max_idle_per_host(2)
        .build()
}

/// Dashboard REST client.
pub struct DashboardClient {
    base: Url,
    http: Client,
    credentials: Arc<dyn CredentialStore>,
}

impl DashboardClient {
    pub fn new(base: Url, credentials: Arc<dyn CredentialStore>) -> Result<Self, DashboardError> {
        Ok(Self {
            base,
            http: build_http_client()?,
            credentials,
        })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    fn bearer(&self) -> Result<String, DashboardError> {
        self.credentials
            .token()
            .ok_or(DashboardError::MissingCredential)
    }

    /// Upload a payload as multipart field `file`.
    ///
    /// Progress is reported as the body is handed to the connection. No retry
    /// is attempted on failure.
    pub async fn upload(
        &self,
        payload: UploadPayload,
        progress: ProgressFn,
    ) -> Result<UploadRecord, DashboardError> {
        let token = self.bearer()?;
        let url = endpoint(&self.base, UPLOAD_PATH)?;

        let total = payload.data.len() as u64;
        let data = payload.data;
        let pieces: Vec<Bytes> = (0..data.len())
            .step_by(PROGRESS_CHUNK)
            .map(|start| data.slice(start..(start + PROGRESS_CHUNK).min(data.len())))
            .collect();

        let report = progress.clone();
        let mut sent: u64 = 0;
        let body_stream = futures::stream::iter(pieces).map(move |piece| {
            sent += piece.len() as u64;
            report(sent as f64 / total as f64);
            Ok::<Bytes, std::io::Error>(piece)
        });

        let part = multipart::Part::stream_with_length(
            reqwest::Body::wrap_stream(body_stream),
            total,
        )
        .file_name(payload.filename.clone())
        .mime_str(&payload.content_type)?;
        let form = multipart::Form::new().part("file", part);

        tracing::debug!(filename = %payload.filename, bytes = total, "uploading");
        let response = self
            .http
            .post(url)
            .bearer_auth(token)
            .multipart(form)
            .send()
            .await?;

        let response = self.check_status(response).await?;
        let record: UploadRecord = response.json().await?;
        progress(1.0);
        Ok(record)
    }

    /// Fetch the stored messages of a chat session.
    pub async fn session_history(&self, session_id: &str) -> Result<Vec<Message>, DashboardError> {
        let token = self.bearer()?;
        let url = session_url(&self.base, session_id)?;

        let response = self.http.get(url).bearer_auth(token).send().await?;
        let response = self.check_status(response).await?;
        let session: SessionBody = response.json().await?;

        Ok(session
            .messages
            .into_iter()
            .map(HistoryRow::into_message)
            .collect())
    }

    async fn check_status(&self, response: Response) -> Result<Response, DashboardError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::UNAUTHORIZED {
            self.credentials.clear_on_unauthorized();
            return Err(DashboardError::Unauthorized);
        }
        let body = response.text().await.unwrap_or_default();
        Err(DashboardError::Api {
            status: status.as_u16(),
            detail: error_detail(&body),
        })
    }
}

/// Extract `detail` from a JSON error body, or return the raw body.
fn error_detail(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("detail").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| body.to_string())
}

#[derive(Deserialize)]
struct SessionBody {
    #[serde(default)]
    messages: Vec<HistoryRow>,
}

#[derive(Deserialize)]
struct HistoryRow {
    #[serde(default)]
    id: Value,
    role: Role,
    #[serde(default)]
    content: String,
    #[serde(default)]
    attachments: Vec<AttachmentRef>,
    #[serde(default)]
    timestamp: String,
}

impl HistoryRow {
    fn into_message(self) -> Message {
        let id = match self.id {
            Value::String(s) => s,
            Value::Null => String::new(),
            other => other.to_string(),
        };
        let timestamp = DateTime::parse_from_rfc3339(&self.timestamp)
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or(DateTime::UNIX_EPOCH);
        Message::new(id, self.role, self.content, self.attachments, timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::MemoryCredentials;
    use crate::mock::MockDashboard;
    use parking_lot::Mutex;

    fn client_for(mock: &MockDashboard, token: Option<&str>) -> (DashboardClient, Arc<MemoryCredentials>) {
        let creds = Arc::new(MemoryCredentials::new(token.map(str::to_string)));
        let client = DashboardClient::new(mock.http_base(), creds.clone()).unwrap();
        (client, creds)
    }

    fn payload(name: &str, data: &[u8]) -> UploadPayload {
        UploadPayload {
            filename: name.to_string(),
            content_type: "text/plain".to_string(),
            data: Bytes::copy_from_slice(data),
        }
    }

    #[test]
    fn endpoint_keeps_prefix() {
        let base = Url::parse("https://host.example/dash").unwrap();
        assert_eq!(
            endpoint(&base, "api/files/upload").unwrap().as_str(),
            "https://host.example/dash/api/files/upload"
        );

        let base = Url::parse("http://localhost:8000/").unwrap();
        assert_eq!(
            endpoint(&base, "/api/sessions/abc").unwrap().as_str(),
            "http://localhost:8000/api/sessions/abc"
        );
    }

    #[test]
    fn session_id_stays_one_segment() {
        let base = Url::parse("https://host.example/dash").unwrap();
        assert_eq!(
            session_url(&base, "abc").unwrap().as_str(),
            "https://host.example/dash/api/sessions/abc"
        );

        let url = session_url(&base, "../../files/upload").unwrap();
        assert_eq!(url.path(), "/dash/api/sessions/..%2F..%2Ffiles%2Fupload");

        let url = session_url(&base, "a?admin=1#x").unwrap();
        assert_eq!(url.path(), "/dash/api/sessions/a%3Fadmin=1%23x");
        assert_eq!(url.query(), None);
        assert_eq!(url.fragment(), None);
    }

    #[test]
    fn error_detail_prefers_json_detail() {
        assert_eq!(
            error_detail(r#"{"detail":"File too large (max 10MB)"}"#),
            "File too large (max 10MB)"
        );
        assert_eq!(error_detail("plain failure"), "plain failure");
    }

    #[test]
    fn history_row_conversion() {
        let row: HistoryRow = serde_json::from_str(
            r#"{"id":7,"session_id":"s","role":"user","content":"hi","attachments":[{"filename":"a","path":"/a"}],"timestamp":"2024-05-01T10:00:00.123456+00:00"}"#,
        )
        .unwrap();
        let msg = row.into_message();
        assert_eq!(msg.id, "7");
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.attachments.len(), 1);
        assert_eq!(msg.timestamp.timestamp(), 1_714_557_600);
    }

    #[test]
    fn history_row_bad_timestamp_falls_back_to_epoch() {
        let row: HistoryRow =
            serde_json::from_str(r#"{"role":"assistant","content":"x","timestamp":"yesterday"}"#)
                .unwrap();
        assert_eq!(row.into_message().timestamp, DateTime::UNIX_EPOCH);
    }

    #[tokio::test]
    async fn upload_returns_record_and_reports_progress() {
        let mock = MockDashboard::builder().token("tok").start().await.unwrap();
        let (client, _) = client_for(&mock, Some("tok"));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let progress: ProgressFn = Arc::new(move |p| sink.lock().push(p));

        let data = vec![7u8; PROGRESS_CHUNK * 2 + 10];
        let record = client
            .upload(payload("notes.txt", &data), progress)
            .await
            .unwrap();

        assert!(record.filename.ends_with("_notes.txt"));
        assert!(record.path.ends_with(&record.filename));
        assert_eq!(record.size, data.len() as u64);
        assert_eq!(record.content_type.as_deref(), Some("text/plain"));

        let seen = seen.lock();
        assert!(seen.len() >= 3);
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(*seen.last().unwrap(), 1.0);
    }

    #[tokio::test]
    async fn upload_without_credential_fails_fast() {
        let mock = MockDashboard::builder().token("tok").start().await.unwrap();
        let (client, _) = client_for(&mock, None);

        let err = client
            .upload(payload("a.txt", b"a"), Arc::new(|_| {}))
            .await
            .unwrap_err();
        assert!(matches!(err, DashboardError::MissingCredential));
        assert_eq!(mock.upload_count(), 0);
    }

    #[tokio::test]
    async fn upload_unauthorized_clears_credential() {
        let mock = MockDashboard::builder().token("tok").start().await.unwrap();
        let (client, creds) = client_for(&mock, Some("stale"));

        let err = client
            .upload(payload("a.txt", b"a"), Arc::new(|_| {}))
            .await
            .unwrap_err();
        assert!(matches!(err, DashboardError::Unauthorized));
        assert!(creds.token().is_none());
    }

    #[tokio::test]
    async fn upload_server_failure_surfaces_detail() {
        let mock = MockDashboard::builder()
            .token("tok")
            .fail_uploads("disk full")
            .start()
            .await
            .unwrap();
        let (client, _) = client_for(&mock, Some("tok"));

        let err = client
            .upload(payload("a.txt", b"a"), Arc::new(|_| {}))
            .await
            .unwrap_err();
        match err {
            DashboardError::Api { status, detail } => {
                assert_eq!(status, 500);
                assert_eq!(detail, "disk full");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn session_history_roundtrip() {
        let mock = MockDashboard::builder()
            .token("tok")
            .history(
                "s-1",
                vec![(Role::User, "hello"), (Role::Assistant, "hi there")],
            )
            .start()
            .await
            .unwrap();
        let (client, _) = client_for(&mock, Some("tok"));

        let messages = client.session_history("s-1").await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[1].content, "hi there");

        let missing = client.session_history("nope").await.unwrap_err();
        assert!(matches!(missing, DashboardError::Api { status: 404, .. }));
    }
}
