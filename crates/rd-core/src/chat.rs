//! Chat stream protocol: one request/response exchange per submission.
//!
//! [`ChatState`] is the synchronous state machine: session binding, the
//! first-message flag, the `streaming` gate and the aggregation buffer.
//! [`ChatSession`] pairs it with a [`Transport`] and is the single
//! dispatcher for that transport's events.

use chrono::Utc;
use rd_protocol::{AttachmentRef, ChatInbound, ChatOutbound, Chunk, Message, Role, WireFrame};
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::aggregate::{AggregationBuffer, Projection};
use crate::transport::{LinkStatus, Transport, TransportEvent};

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("a response is still streaming")]
    Busy,
    #[error("chat is not connected")]
    NotConnected,
    #[error("nothing to send")]
    Empty,
    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Observable effect of one dispatched event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatUpdate {
    Connected,
    /// The link dropped. `abandoned` is set when an exchange was in flight.
    Disconnected { abandoned: bool },
    SessionBound(String),
    Chunk(Chunk),
    /// The exchange completed; `None` when it produced nothing to show.
    Finished(Option<Message>),
    /// The server reported an error, appended as an assistant message.
    Failed(Message),
    /// Frame that could not be used (malformed, or outside an exchange).
    Ignored,
}

#[derive(Debug, Default)]
pub struct ChatState {
    session_id: Option<String>,
    /// A `session_id` event arrived on this transport instance.
    session_event_seen: bool,
    /// Present exactly while streaming.
    exchange: Option<AggregationBuffer>,
    history: Vec<Message>,
    pending_attachments: Vec<AttachmentRef>,
}

impl ChatState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a resumed session. The first message on the new transport is
    /// still flagged first until the server confirms the session.
    pub fn resumed(session_id: String, history: Vec<Message>) -> Self {
        Self {
            session_id: Some(session_id),
            history,
            ..Self::default()
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn is_streaming(&self) -> bool {
        self.exchange.is_some()
    }

    pub fn is_first_message(&self) -> bool {
        self.session_id.is_none() || !self.session_event_seen
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    pub fn pending_attachments(&self) -> &[AttachmentRef] {
        &self.pending_attachments
    }

    pub fn buffer(&self) -> Option<&AggregationBuffer> {
        self.exchange.as_ref()
    }

    pub fn projection(&self) -> Option<Projection<'_>> {
        self.exchange.as_ref().map(AggregationBuffer::projection)
    }

    /// Queue an uploaded file for the next submission.
    pub fn attach(&mut self, attachment: AttachmentRef) {
        self.pending_attachments.push(attachment);
    }

    /// Start an exchange: record the user message and build the outbound
    /// frame. Rejected submissions leave every field untouched.
    pub fn begin(&mut self, content: &str, connected: bool) -> Result<ChatOutbound, SubmitError> {
        if self.is_streaming() {
            return Err(SubmitError::Busy);
        }
        if content.trim().is_empty() && self.pending_attachments.is_empty() {
            return Err(SubmitError::Empty);
        }
        if !connected {
            return Err(SubmitError::NotConnected);
        }

        let attachments = std::mem::take(&mut self.pending_attachments);
        let frame = ChatOutbound::Message {
            content: content.to_string(),
            attachments: attachments.clone(),
            session_id: self.session_id.clone(),
            is_first_message: self.is_first_message(),
        };
        self.history.push(Message::new(
            Uuid::new_v4().to_string(),
            Role::User,
            content,
            attachments,
            Utc::now(),
        ));
        self.exchange = Some(AggregationBuffer::new());
        Ok(frame)
    }

    /// Undo [`ChatState::begin`] when the frame never left.
    fn retract(&mut self, frame: ChatOutbound) {
        let ChatOutbound::Message { attachments, .. } = frame;
        self.history.pop();
        self.pending_attachments = attachments;
        self.exchange = None;
    }

    pub fn handle(&mut self, event: ChatInbound) -> ChatUpdate {
        match event {
            ChatInbound::Chunk { .. } => {
                let Some(chunk) = event.as_chunk() else {
                    return ChatUpdate::Ignored;
                };
                match self.exchange.as_mut() {
                    Some(buffer) => {
                        buffer.push(chunk.clone());
                        ChatUpdate::Chunk(chunk)
                    }
                    None => {
                        tracing::warn!(kind = chunk.kind.as_str(), "chunk outside an exchange");
                        ChatUpdate::Ignored
                    }
                }
            }
            ChatInbound::SessionId { session_id } => {
                tracing::debug!(%session_id, "session bound");
                self.session_id = Some(session_id.clone());
                self.session_event_seen = true;
                ChatUpdate::SessionBound(session_id)
            }
            ChatInbound::Done { session_id } => {
                if let Some(id) = session_id {
                    self.session_id = Some(id);
                }
                let Some(buffer) = self.exchange.take() else {
                    tracing::warn!("done outside an exchange");
                    return ChatUpdate::Ignored;
                };
                let message = buffer.finalize().map(|content| {
                    let msg = Message::new(
                        Uuid::new_v4().to_string(),
                        Role::Assistant,
                        content,
                        Vec::new(),
                        Utc::now(),
                    );
                    self.history.push(msg.clone());
                    msg
                });
                ChatUpdate::Finished(message)
            }
            ChatInbound::Error { message } => {
                self.exchange = None;
                let msg = Message::new(
                    Uuid::new_v4().to_string(),
                    Role::Assistant,
                    format!("Error: {message}"),
                    Vec::new(),
                    Utc::now(),
                );
                self.history.push(msg.clone());
                ChatUpdate::Failed(msg)
            }
        }
    }

    pub fn handle_frame(&mut self, frame: WireFrame) -> ChatUpdate {
        let WireFrame::Text(text) = frame else {
            tracing::warn!("binary frame on chat transport");
            return ChatUpdate::Ignored;
        };
        match serde_json::from_str::<ChatInbound>(&text) {
            Ok(event) => self.handle(event),
            Err(e) => {
                tracing::warn!("malformed chat frame: {e}");
                ChatUpdate::Ignored
            }
        }
    }

    /// Transport loss: any exchange in flight is abandoned.
    pub fn link_lost(&mut self) -> ChatUpdate {
        let abandoned = self.exchange.take().is_some();
        if abandoned {
            tracing::warn!("connection lost mid-stream, exchange abandoned");
        }
        ChatUpdate::Disconnected { abandoned }
    }

    fn reset_transport_scope(&mut self) {
        self.session_event_seen = false;
        self.exchange = None;
    }
}

/// Chat state bound to its transport.
pub struct ChatSession {
    transport: Transport,
    events: mpsc::UnboundedReceiver<TransportEvent>,
    state: ChatState,
}

impl ChatSession {
    pub fn new(transport: Transport, events: mpsc::UnboundedReceiver<TransportEvent>) -> Self {
        Self::with_state(transport, events, ChatState::new())
    }

    pub fn with_state(
        transport: Transport,
        events: mpsc::UnboundedReceiver<TransportEvent>,
        state: ChatState,
    ) -> Self {
        Self {
            transport,
            events,
            state,
        }
    }

    pub fn connect(&self) {
        self.transport.connect();
    }

    pub fn status(&self) -> LinkStatus {
        self.transport.status()
    }

    pub fn state(&self) -> &ChatState {
        &self.state
    }

    pub fn attach(&mut self, attachment: AttachmentRef) {
        self.state.attach(attachment);
    }

    /// Send one user message. Does not wait for the reply.
    pub fn submit(&mut self, content: &str) -> Result<(), SubmitError> {
        let frame = self.state.begin(content, self.transport.is_connected())?;
        let text = match serde_json::to_string(&frame) {
            Ok(text) => text,
            Err(e) => {
                self.state.retract(frame);
                return Err(e.into());
            }
        };
        if !self.transport.send(WireFrame::Text(text)) {
            self.state.retract(frame);
            return Err(SubmitError::NotConnected);
        }
        Ok(())
    }

    /// Dispatch the next transport event. `None` once the transport is gone.
    pub async fn next_update(&mut self) -> Option<ChatUpdate> {
        let event = self.events.recv().await?;
        Some(match event {
            TransportEvent::Opened => ChatUpdate::Connected,
            TransportEvent::Frame(frame) => self.state.handle_frame(frame),
            TransportEvent::Closed => self.state.link_lost(),
        })
    }

    /// Dispose the transport; the first-message flag resets with it.
    pub fn dispose(&mut self) {
        self.transport.dispose();
        self.state.reset_transport_scope();
    }

    pub async fn join(&self) {
        self.transport.join().await;
    }
}
