//! Transport manager: one logical duplex channel with fixed-backoff reconnect.
//!
//! A [`Transport`] owns a single connection task. The task dials, pumps frames
//! in both directions while the link is up, and on loss waits a fixed delay
//! before dialing again. Consumers see only [`Transport::send`],
//! [`Transport::status`] and the [`TransportEvent`] receiver handed out by
//! [`Transport::new`]. The receiver survives reconnects, so a transport keeps
//! its identity across any number of physical connections.
//!
//! ```text
//! Disconnected --connect()--> Connecting --open--> Connected
//!      ^                                               |
//!      +---------- close/error (3 s backoff) ----------+
//! ```
//!
//! Disposal is terminal: the backoff is cancelled, the socket is closed once,
//! queued outbound frames are dropped and nothing is dialed again.

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{self, BoxFuture};
use futures::{Sink, SinkExt, Stream, StreamExt};
use parking_lot::Mutex;
use rd_backend::CredentialStore;
use rd_protocol::WireFrame;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use url::Url;

/// Fixed delay between losing a link and the next dial.
pub const RECONNECT_DELAY: Duration = Duration::from_millis(3000);

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("connection refused: {0}")]
    Refused(String),
    #[error("connection closed")]
    Closed,
}

pub type FrameSink = Pin<Box<dyn Sink<WireFrame, Error = TransportError> + Send>>;
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<WireFrame, TransportError>> + Send>>;

/// Opens the physical channel for a transport.
pub trait Dialer: Send + Sync + 'static {
    fn dial(&self, url: Url) -> BoxFuture<'static, Result<(FrameSink, FrameStream), TransportError>>;
}

/// Production dialer over `tokio-tungstenite`.
#[derive(Debug, Default, Clone, Copy)]
pub struct WsDialer;

impl Dialer for WsDialer {
    fn dial(&self, url: Url) -> BoxFuture<'static, Result<(FrameSink, FrameStream), TransportError>> {
        Box::pin(async move {
            let (ws_stream, _) = tokio_tungstenite::connect_async(url.as_str()).await?;
            let (ws_sender, ws_receiver) = ws_stream.split();

            let sink = ws_sender
                .sink_map_err(TransportError::from)
                .with(|frame: WireFrame| {
                    future::ready(Ok::<_, TransportError>(match frame {
                        WireFrame::Text(text) => WsMessage::Text(text),
                        WireFrame::Binary(bytes) => WsMessage::Binary(bytes),
                    }))
                });

            let stream = ws_receiver.filter_map(|msg| {
                future::ready(match msg {
                    Ok(WsMessage::Text(text)) => Some(Ok(WireFrame::Text(text))),
                    Ok(WsMessage::Binary(bytes)) => Some(Ok(WireFrame::Binary(bytes))),
                    // Ping/pong are answered by tungstenite; close ends the stream.
                    Ok(_) => None,
                    Err(e) => Some(Err(TransportError::from(e))),
                })
            });

            Ok((Box::pin(sink) as FrameSink, Box::pin(stream) as FrameStream))
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LinkStatus::Disconnected => "disconnected",
            LinkStatus::Connecting => "connecting",
            LinkStatus::Connected => "connected",
        })
    }
}

/// What the consumer's dispatcher receives, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A physical connection opened. Delivered once per successful dial.
    Opened,
    Frame(WireFrame),
    /// The current connection ended. A reconnect follows unless disposed.
    Closed,
}

#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Logical channel name, for logs (`shell`, `chat`).
    pub name: &'static str,
    /// WebSocket endpoint without the credential.
    pub endpoint: Url,
    pub reconnect_delay: Duration,
}

impl TransportConfig {
    pub fn new(name: &'static str, endpoint: Url) -> Self {
        Self {
            name,
            endpoint,
            reconnect_delay: RECONNECT_DELAY,
        }
    }
}

/// Append `token=<credential>` to the endpoint query.
pub fn authorized_url(endpoint: &Url, token: &str) -> Url {
    let mut url = endpoint.clone();
    url.query_pairs_mut().append_pair("token", token);
    url
}

struct LinkState {
    status: LinkStatus,
    /// Outbound queue of the live connection; replaced on every open.
    outbound: Option<mpsc::UnboundedSender<WireFrame>>,
    disposed: bool,
}

struct Shared {
    config: TransportConfig,
    dialer: Arc<dyn Dialer>,
    credentials: Arc<dyn CredentialStore>,
    link: Mutex<LinkState>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl Shared {
    fn set_status(&self, status: LinkStatus) {
        let mut link = self.link.lock();
        if link.status != status {
            tracing::debug!(channel = self.config.name, %status, "link status");
        }
        link.status = status;
        if status != LinkStatus::Connected {
            link.outbound = None;
        }
    }

    fn emit(&self, event: TransportEvent) {
        // The consumer may already have dropped its receiver during teardown.
        let _ = self.events.send(event);
    }
}

/// A named logical connection with automatic reconnect.
pub struct Transport {
    shared: Arc<Shared>,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Transport {
    /// Create an idle transport. Nothing is dialed until [`Transport::connect`].
    pub fn new(
        config: TransportConfig,
        dialer: Arc<dyn Dialer>,
        credentials: Arc<dyn CredentialStore>,
    ) -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let (shutdown, _) = watch::channel(false);
        let transport = Self {
            shared: Arc::new(Shared {
                config,
                dialer,
                credentials,
                link: Mutex::new(LinkState {
                    status: LinkStatus::Disconnected,
                    outbound: None,
                    disposed: false,
                }),
                events,
            }),
            shutdown,
            task: Mutex::new(None),
        };
        (transport, rx)
    }

    pub fn name(&self) -> &'static str {
        self.shared.config.name
    }

    pub fn status(&self) -> LinkStatus {
        self.shared.link.lock().status
    }

    pub fn is_connected(&self) -> bool {
        self.status() == LinkStatus::Connected
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.link.lock().disposed
    }

    /// Start the connection task.
    ///
    /// Without a credential the transport stays `Disconnected` and nothing is
    /// scheduled. Calling this while a connection task is alive, or after
    /// disposal, does nothing.
    pub fn connect(&self) {
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|t| !t.is_finished()) || self.is_disposed() {
            return;
        }
        if self.shared.credentials.token().is_none() {
            tracing::info!(channel = self.name(), "no credential, not connecting");
            self.shared.set_status(LinkStatus::Disconnected);
            return;
        }
        self.shared.set_status(LinkStatus::Connecting);
        let shared = self.shared.clone();
        let shutdown = self.shutdown.subscribe();
        *task = Some(tokio::spawn(run_link(shared, shutdown)));
    }

    /// Queue a frame on the live connection.
    ///
    /// At-most-once: when not connected the frame is dropped and `false` is
    /// returned. There is no acknowledgement.
    pub fn send(&self, frame: WireFrame) -> bool {
        let link = self.shared.link.lock();
        match (&link.status, &link.outbound) {
            (LinkStatus::Connected, Some(tx)) => tx.send(frame).is_ok(),
            _ => {
                tracing::debug!(
                    channel = self.shared.config.name,
                    status = %link.status,
                    bytes = frame.len(),
                    "dropping frame, not connected"
                );
                false
            }
        }
    }

    /// Tear the transport down for good.
    pub fn dispose(&self) {
        {
            let mut link = self.shared.link.lock();
            if link.disposed {
                return;
            }
            link.disposed = true;
            link.status = LinkStatus::Disconnected;
            link.outbound = None;
        }
        tracing::info!(channel = self.name(), "transport disposed");
        self.shutdown.send_replace(true);
    }

    /// Wait for the connection task to finish. Used after [`Transport::dispose`].
    pub async fn join(&self) {
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.dispose();
    }
}

enum PumpEnd {
    Lost,
    Shutdown,
}

async fn run_link(shared: Arc<Shared>, mut shutdown: watch::Receiver<bool>) {
    let name = shared.config.name;
    loop {
        if *shutdown.borrow() {
            break;
        }
        let Some(token) = shared.credentials.token() else {
            tracing::info!(channel = name, "credential gone, not reconnecting");
            break;
        };

        shared.set_status(LinkStatus::Connecting);
        let url = authorized_url(&shared.config.endpoint, &token);
        tracing::debug!(channel = name, endpoint = %shared.config.endpoint, "dialing");

        let dialed = tokio::select! {
            r = shared.dialer.dial(url) => r,
            _ = shutdown.changed() => break,
        };

        match dialed {
            Ok((sink, stream)) => {
                let (tx, rx) = mpsc::unbounded_channel();
                {
                    let mut link = shared.link.lock();
                    if link.disposed {
                        break;
                    }
                    link.status = LinkStatus::Connected;
                    link.outbound = Some(tx);
                }
                tracing::info!(channel = name, "connected");
                shared.emit(TransportEvent::Opened);

                let end = pump(&shared, sink, stream, rx, &mut shutdown).await;

                shared.set_status(LinkStatus::Disconnected);
                shared.emit(TransportEvent::Closed);
                if let PumpEnd::Shutdown = end {
                    break;
                }
                tracing::warn!(
                    channel = name,
                    delay_ms = shared.config.reconnect_delay.as_millis() as u64,
                    "connection lost, reconnecting"
                );
            }
            Err(e) => {
                shared.set_status(LinkStatus::Disconnected);
                tracing::warn!(channel = name, "dial failed: {e}");
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(shared.config.reconnect_delay) => {}
            _ = shutdown.changed() => break,
        }
    }
    shared.set_status(LinkStatus::Disconnected);
}

async fn pump(
    shared: &Shared,
    mut sink: FrameSink,
    mut stream: FrameStream,
    mut outbound: mpsc::UnboundedReceiver<WireFrame>,
    shutdown: &mut watch::Receiver<bool>,
) -> PumpEnd {
    let name = shared.config.name;
    let end = loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break PumpEnd::Shutdown,
            frame = outbound.recv() => {
                let Some(frame) = frame else { break PumpEnd::Lost };
                if let Err(e) = sink.send(frame).await {
                    tracing::warn!(channel = name, "send failed: {e}");
                    break PumpEnd::Lost;
                }
            }
            inbound = stream.next() => match inbound {
                Some(Ok(frame)) => {
                    tracing::trace!(channel = name, bytes = frame.len(), "frame in");
                    shared.emit(TransportEvent::Frame(frame));
                }
                Some(Err(e)) => {
                    tracing::warn!(channel = name, "receive failed: {e}");
                    break PumpEnd::Lost;
                }
                None => break PumpEnd::Lost,
            },
        }
    };
    // Queued frames are dropped with `outbound`, not flushed.
    drop(outbound);
    let _ = sink.close().await;
    end
}

/// In-memory dialer for deterministic tests.
///
/// Every successful dial creates a [`MemoryPeer`] holding the server side of
/// the connection.
pub mod memory {
    use super::*;
    use futures::channel::mpsc as fmpsc;

    /// Server side of one in-memory connection.
    pub struct MemoryPeer {
        pub url: Url,
        /// Frames the client sent.
        pub inbound: fmpsc::UnboundedReceiver<WireFrame>,
        outbound: Option<fmpsc::UnboundedSender<Result<WireFrame, TransportError>>>,
    }

    impl MemoryPeer {
        /// Deliver a frame to the client.
        pub fn send(&self, frame: WireFrame) -> bool {
            self.outbound
                .as_ref()
                .is_some_and(|tx| tx.unbounded_send(Ok(frame)).is_ok())
        }

        /// Hang up from the server side.
        pub fn close(&mut self) {
            self.outbound = None;
        }

        /// Frames received so far, without waiting.
        pub fn drain(&mut self) -> Vec<WireFrame> {
            let mut frames = Vec::new();
            while let Ok(Some(frame)) = self.inbound.try_next() {
                frames.push(frame);
            }
            frames
        }
    }

    #[derive(Default)]
    struct DialerState {
        attempts: Vec<Url>,
        refuse: bool,
        peers: Vec<MemoryPeer>,
    }

    #[derive(Clone, Default)]
    pub struct MemoryDialer {
        state: Arc<Mutex<DialerState>>,
    }

    impl MemoryDialer {
        pub fn new() -> Self {
            Self::default()
        }

        /// Make subsequent dials fail.
        pub fn refuse(&self, refuse: bool) {
            self.state.lock().refuse = refuse;
        }

        pub fn attempts(&self) -> usize {
            self.state.lock().attempts.len()
        }

        pub fn attempted_urls(&self) -> Vec<Url> {
            self.state.lock().attempts.clone()
        }

        /// Take the server side of the oldest unclaimed connection.
        pub fn take_peer(&self) -> Option<MemoryPeer> {
            let mut state = self.state.lock();
            if state.peers.is_empty() {
                None
            } else {
                Some(state.peers.remove(0))
            }
        }
    }

    impl Dialer for MemoryDialer {
        fn dial(
            &self,
            url: Url,
        ) -> BoxFuture<'static, Result<(FrameSink, FrameStream), TransportError>> {
            let mut state = self.state.lock();
            state.attempts.push(url.clone());
            if state.refuse {
                return Box::pin(future::ready(Err(TransportError::Refused(url.to_string()))));
            }

            let (to_server, from_client) = fmpsc::unbounded::<WireFrame>();
            let (to_client, from_server) = fmpsc::unbounded::<Result<WireFrame, TransportError>>();
            state.peers.push(MemoryPeer {
                url,
                inbound: from_client,
                outbound: Some(to_client),
            });

            let sink: FrameSink = Box::pin(to_server.sink_map_err(|_| TransportError::Closed));
            let stream: FrameStream = Box::pin(from_server);
            Box::pin(future::ready(Ok((sink, stream))))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryDialer;
    use super::*;
    use rd_backend::MemoryCredentials;
    use tokio::time::{advance, sleep};

    fn endpoint() -> Url {
        Url::parse("ws://dash.test/api/pty/ws").unwrap()
    }

    fn transport(
        dialer: &MemoryDialer,
        token: Option<&str>,
    ) -> (Transport, mpsc::UnboundedReceiver<TransportEvent>) {
        let creds = Arc::new(MemoryCredentials::new(token.map(str::to_string)));
        Transport::new(
            TransportConfig::new("shell", endpoint()),
            Arc::new(dialer.clone()),
            creds,
        )
    }

    /// Let spawned tasks run without moving the clock.
    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn token_is_appended_to_query() {
        let url = authorized_url(&endpoint(), "a b&c");
        assert_eq!(url.as_str(), "ws://dash.test/api/pty/ws?token=a+b%26c");
    }

    #[tokio::test(start_paused = true)]
    async fn missing_credential_stays_disconnected() {
        let dialer = MemoryDialer::new();
        let (t, _rx) = transport(&dialer, None);

        t.connect();
        settle().await;
        sleep(Duration::from_secs(10)).await;

        assert_eq!(t.status(), LinkStatus::Disconnected);
        assert_eq!(dialer.attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn open_emits_opened_once_and_accepts_sends() {
        let dialer = MemoryDialer::new();
        let (t, mut rx) = transport(&dialer, Some("tok"));

        t.connect();
        assert_eq!(rx.recv().await, Some(TransportEvent::Opened));
        assert_eq!(t.status(), LinkStatus::Connected);
        assert_eq!(
            dialer.attempted_urls()[0].query(),
            Some("token=tok")
        );

        let mut peer = dialer.take_peer().unwrap();
        assert!(t.send(WireFrame::Binary(b"ls\r".to_vec())));
        settle().await;
        assert_eq!(peer.drain(), vec![WireFrame::Binary(b"ls\r".to_vec())]);

        peer.send(WireFrame::Text("hello".to_string()));
        assert_eq!(
            rx.recv().await,
            Some(TransportEvent::Frame(WireFrame::Text("hello".to_string())))
        );
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn send_while_disconnected_is_dropped() {
        let dialer = MemoryDialer::new();
        let (t, _rx) = transport(&dialer, Some("tok"));

        assert!(!t.send(WireFrame::Text("early".to_string())));

        t.connect();
        settle().await;
        let mut peer = dialer.take_peer().unwrap();
        settle().await;
        assert!(peer.drain().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn reconnects_after_fixed_backoff() {
        let dialer = MemoryDialer::new();
        let (t, mut rx) = transport(&dialer, Some("tok"));

        t.connect();
        assert_eq!(rx.recv().await, Some(TransportEvent::Opened));
        let mut peer = dialer.take_peer().unwrap();

        peer.close();
        assert_eq!(rx.recv().await, Some(TransportEvent::Closed));
        assert_eq!(t.status(), LinkStatus::Disconnected);
        assert!(!t.send(WireFrame::Text("lost".to_string())));

        advance(Duration::from_millis(2999)).await;
        settle().await;
        assert_eq!(dialer.attempts(), 1);

        advance(Duration::from_millis(2)).await;
        settle().await;
        assert_eq!(dialer.attempts(), 2);
        assert_eq!(rx.recv().await, Some(TransportEvent::Opened));
        assert!(t.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_dial_retries_at_same_interval() {
        let dialer = MemoryDialer::new();
        dialer.refuse(true);
        let (t, _rx) = transport(&dialer, Some("tok"));

        t.connect();
        settle().await;
        assert_eq!(dialer.attempts(), 1);
        assert_eq!(t.status(), LinkStatus::Disconnected);

        advance(Duration::from_millis(3000)).await;
        settle().await;
        assert_eq!(dialer.attempts(), 2);

        advance(Duration::from_millis(3000)).await;
        settle().await;
        assert_eq!(dialer.attempts(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn dispose_mid_backoff_prevents_reconnect() {
        let dialer = MemoryDialer::new();
        let (t, mut rx) = transport(&dialer, Some("tok"));

        t.connect();
        assert_eq!(rx.recv().await, Some(TransportEvent::Opened));
        dialer.take_peer().unwrap().close();
        assert_eq!(rx.recv().await, Some(TransportEvent::Closed));

        advance(Duration::from_millis(1000)).await;
        t.dispose();
        t.join().await;

        sleep(Duration::from_secs(30)).await;
        assert_eq!(dialer.attempts(), 1);
        assert_eq!(t.status(), LinkStatus::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn dispose_while_connected_closes_once_and_drops_queue() {
        let dialer = MemoryDialer::new();
        let (t, mut rx) = transport(&dialer, Some("tok"));

        t.connect();
        assert_eq!(rx.recv().await, Some(TransportEvent::Opened));
        let mut peer = dialer.take_peer().unwrap();

        t.dispose();
        t.dispose();
        assert!(!t.send(WireFrame::Text("late".to_string())));
        t.join().await;

        assert_eq!(rx.recv().await, Some(TransportEvent::Closed));
        // Sink closed: the server side sees end of stream.
        assert_eq!(peer.inbound.next().await, None);

        sleep(Duration::from_secs(30)).await;
        assert_eq!(dialer.attempts(), 1);

        t.connect();
        settle().await;
        assert_eq!(dialer.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn frames_do_not_leak_across_connections() {
        let dialer = MemoryDialer::new();
        let (t, mut rx) = transport(&dialer, Some("tok"));

        t.connect();
        assert_eq!(rx.recv().await, Some(TransportEvent::Opened));
        let mut first = dialer.take_peer().unwrap();
        first.close();
        assert_eq!(rx.recv().await, Some(TransportEvent::Closed));

        advance(RECONNECT_DELAY).await;
        assert_eq!(rx.recv().await, Some(TransportEvent::Opened));
        let mut second = dialer.take_peer().unwrap();

        assert!(t.send(WireFrame::Text("fresh".to_string())));
        settle().await;
        assert!(first.drain().is_empty());
        assert_eq!(second.drain(), vec![WireFrame::Text("fresh".to_string())]);
    }

    #[tokio::test(start_paused = true)]
    async fn credential_is_reread_on_every_attempt() {
        let dialer = MemoryDialer::new();
        let creds = Arc::new(MemoryCredentials::new(Some("one".to_string())));
        let (t, mut rx) = Transport::new(
            TransportConfig::new("chat", endpoint()),
            Arc::new(dialer.clone()),
            creds.clone(),
        );

        t.connect();
        assert_eq!(rx.recv().await, Some(TransportEvent::Opened));
        creds.set("two");
        dialer.take_peer().unwrap().close();
        assert_eq!(rx.recv().await, Some(TransportEvent::Closed));

        advance(RECONNECT_DELAY).await;
        assert_eq!(rx.recv().await, Some(TransportEvent::Opened));
        let urls = dialer.attempted_urls();
        assert_eq!(urls[1].query(), Some("token=two"));
    }
}
