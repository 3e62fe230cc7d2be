//! Wiring: one place that turns a [`Config`] into transports, bridges and
//! clients. Every view gets its own transport; nothing is shared between
//! the chat and the shell except credentials and the REST client.

use std::sync::Arc;

use rd_backend::{endpoint, CredentialStore, DashboardClient, DashboardError, MemoryCredentials};
use thiserror::Error;
use tokio::sync::mpsc;
use url::Url;

use crate::chat::{ChatSession, ChatState};
use crate::config::{Config, ShellVariant};
use crate::pty::PtyBridge;
use crate::runner::RunnerBridge;
use crate::shell::ShellBridge;
use crate::surface::Surface;
use crate::transport::{Dialer, Transport, TransportConfig, TransportEvent, WsDialer};
use crate::upload::Uploader;

pub const CHAT_PATH: &str = "api/chat/stream";

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("invalid server url: {0}")]
    Url(#[from] url::ParseError),
    #[error(transparent)]
    Dashboard(#[from] DashboardError),
}

pub struct DeckContext {
    config: Config,
    ws_base: Url,
    credentials: Arc<dyn CredentialStore>,
    dialer: Arc<dyn Dialer>,
    dashboard: Arc<DashboardClient>,
    uploader: Uploader,
}

impl DeckContext {
    pub fn new(
        config: Config,
        credentials: Arc<dyn CredentialStore>,
        dialer: Arc<dyn Dialer>,
    ) -> Result<Self, ContextError> {
        let http_base = config.server.http_base()?;
        let ws_base = config.server.ws_base()?;
        let dashboard = Arc::new(DashboardClient::new(http_base, credentials.clone())?);
        let uploader = Uploader::new(dashboard.clone(), config.upload.max_bytes);
        Ok(Self {
            config,
            ws_base,
            credentials,
            dialer,
            dashboard,
            uploader,
        })
    }

    /// Production wiring: token from the config or environment, real sockets.
    pub fn from_config(config: Config) -> Result<Self, ContextError> {
        let token = match config.server.resolve_token() {
            Ok(token) => Some(token),
            Err(e) => {
                tracing::warn!("no access token: {e}");
                None
            }
        };
        Self::new(
            config,
            Arc::new(MemoryCredentials::new(token)),
            Arc::new(WsDialer),
        )
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn credentials(&self) -> &Arc<dyn CredentialStore> {
        &self.credentials
    }

    pub fn dashboard(&self) -> &Arc<DashboardClient> {
        &self.dashboard
    }

    pub fn uploader(&self) -> &Uploader {
        &self.uploader
    }

    fn transport(
        &self,
        name: &'static str,
        path: &str,
    ) -> Result<(Transport, mpsc::UnboundedReceiver<TransportEvent>), ContextError> {
        let mut config = TransportConfig::new(name, endpoint(&self.ws_base, path)?);
        config.reconnect_delay = self.config.transport.reconnect_delay();
        Ok(Transport::new(
            config,
            self.dialer.clone(),
            self.credentials.clone(),
        ))
    }

    /// The shell bridge for the configured variant. Not yet mounted.
    pub fn shell_bridge<S: Surface>(&self, surface: S) -> Result<ShellBridge<S>, ContextError> {
        let variant = self.config.terminal.variant;
        let (transport, events) = self.transport("shell", variant.path())?;
        Ok(match variant {
            ShellVariant::Pty => ShellBridge::Pty(PtyBridge::new(
                transport,
                events,
                surface,
                self.config.terminal.resize_retries(),
            )),
            ShellVariant::Runner => ShellBridge::Runner(RunnerBridge::new(transport, events, surface)),
        })
    }

    /// A fresh chat with no session. Not yet connected.
    pub fn chat_session(&self) -> Result<ChatSession, ContextError> {
        let (transport, events) = self.transport("chat", CHAT_PATH)?;
        Ok(ChatSession::new(transport, events))
    }

    /// Continue an earlier session, seeded with its stored history.
    pub async fn resume_chat(&self, session_id: &str) -> Result<ChatSession, ContextError> {
        let history = self.dashboard.session_history(session_id).await?;
        tracing::info!(session_id, messages = history.len(), "resuming chat");
        let (transport, events) = self.transport("chat", CHAT_PATH)?;
        Ok(ChatSession::with_state(
            transport,
            events,
            ChatState::resumed(session_id.to_string(), history),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::MemorySurface;
    use crate::transport::memory::MemoryDialer;
    use std::time::Duration;

    fn context(variant: ShellVariant, base: &str) -> (DeckContext, Arc<MemoryDialer>) {
        let mut config = Config::default();
        config.server.base_url = base.to_string();
        config.terminal.variant = variant;
        let dialer = Arc::new(MemoryDialer::new());
        let ctx = DeckContext::new(
            config,
            Arc::new(MemoryCredentials::new(Some("tok".to_string()))),
            dialer.clone(),
        )
        .unwrap();
        (ctx, dialer)
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn shell_endpoint_follows_variant() {
        let (ctx, dialer) = context(ShellVariant::Runner, "https://deck.example.com/base");
        let mut shell = ctx.shell_bridge(MemorySurface::new(80, 24)).unwrap();
        assert!(matches!(shell, ShellBridge::Runner(_)));
        shell.mount();
        settle().await;
        let urls = dialer.attempted_urls();
        assert_eq!(
            urls[0].as_str(),
            "wss://deck.example.com/base/api/terminal/ws?token=tok"
        );
        shell.dispose();
    }

    #[tokio::test]
    async fn chat_endpoint() {
        let (ctx, dialer) = context(ShellVariant::Pty, "http://localhost:8000");
        let mut chat = ctx.chat_session().unwrap();
        chat.connect();
        settle().await;
        assert_eq!(
            dialer.attempted_urls()[0].as_str(),
            "ws://localhost:8000/api/chat/stream?token=tok"
        );
        chat.dispose();
    }

    #[test]
    fn pty_variant_gets_resize_retries() {
        let (ctx, _) = context(ShellVariant::Pty, "http://localhost:8000");
        assert_eq!(
            ctx.config().terminal.resize_retries(),
            vec![
                Duration::from_millis(100),
                Duration::from_millis(500),
                Duration::from_millis(1500)
            ]
        );
        let shell = ctx.shell_bridge(MemorySurface::new(80, 24)).unwrap();
        assert!(matches!(shell, ShellBridge::Pty(_)));
    }

    #[test]
    fn bad_base_url_rejected() {
        let mut config = Config::default();
        config.server.base_url = "not a url".to_string();
        let result = DeckContext::new(
            config,
            Arc::new(MemoryCredentials::new(None)),
            Arc::new(MemoryDialer::new()),
        );
        assert!(matches!(result, Err(ContextError::Url(_))));
    }
}
