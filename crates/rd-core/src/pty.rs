//! Full PTY bridge: raw terminal bytes plus JSON resize control.
//!
//! Keystrokes and pastes go out as binary frames, resizes as
//! `{"type":"resize",...}` text frames. Every inbound frame, binary or text,
//! is terminal output and is written to the surface verbatim.
//!
//! Terminal geometry is not stable right after mount, so the size is sent on
//! every open, again at each offset of the retry schedule, and on every
//! geometry change. Resizes while disconnected are skipped, never queued.

use std::collections::VecDeque;
use std::time::Duration;

use rd_protocol::ShellFrame;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::shell::ShellEvent;
use crate::style::Style;
use crate::surface::{failure_line, Surface};
use crate::transport::{LinkStatus, Transport, TransportEvent};

/// Default refit offsets after mount.
pub const RESIZE_RETRIES: [Duration; 3] = [
    Duration::from_millis(100),
    Duration::from_millis(500),
    Duration::from_millis(1500),
];

/// Pending refit deadlines, earliest first.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ResizeSchedule {
    deadlines: VecDeque<Instant>,
}

impl ResizeSchedule {
    pub fn starting_at(mount: Instant, offsets: &[Duration]) -> Self {
        let mut deadlines: Vec<Instant> = offsets.iter().map(|d| mount + *d).collect();
        deadlines.sort();
        Self {
            deadlines: deadlines.into(),
        }
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.front().copied()
    }

    /// Drop every deadline at or before `now`; true if any was due.
    pub fn pop_due(&mut self, now: Instant) -> bool {
        let mut due = false;
        while self.deadlines.front().is_some_and(|d| *d <= now) {
            self.deadlines.pop_front();
            due = true;
        }
        due
    }

    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }

    pub fn clear(&mut self) {
        self.deadlines.clear();
    }
}

pub struct PtyBridge<S: Surface> {
    transport: Transport,
    events: mpsc::UnboundedReceiver<TransportEvent>,
    surface: S,
    style: Style,
    retries: Vec<Duration>,
    schedule: ResizeSchedule,
    last_size: Option<(u16, u16)>,
}

impl<S: Surface> PtyBridge<S> {
    pub fn new(
        transport: Transport,
        events: mpsc::UnboundedReceiver<TransportEvent>,
        surface: S,
        retries: Vec<Duration>,
    ) -> Self {
        Self {
            transport,
            events,
            surface,
            style: Style::new(),
            retries,
            schedule: ResizeSchedule::default(),
            last_size: None,
        }
    }

    pub fn with_style(mut self, style: Style) -> Self {
        self.style = style;
        self
    }

    /// Connect and arm the post-mount refit schedule.
    pub fn mount(&mut self) {
        self.schedule = ResizeSchedule::starting_at(Instant::now(), &self.retries);
        self.transport.connect();
    }

    pub fn status(&self) -> LinkStatus {
        self.transport.status()
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut S {
        &mut self.surface
    }

    /// Last size actually sent.
    pub fn last_size(&self) -> Option<(u16, u16)> {
        self.last_size
    }

    pub fn schedule(&self) -> &ResizeSchedule {
        &self.schedule
    }

    fn send(&self, frame: ShellFrame) -> bool {
        match frame.encode() {
            Ok(wire) => self.transport.send(wire),
            Err(e) => {
                tracing::warn!("failed to encode shell frame: {e}");
                false
            }
        }
    }

    /// Keystrokes, forwarded as-is.
    pub fn input(&self, bytes: &[u8]) -> bool {
        self.send(ShellFrame::RawBytes(bytes.to_vec()))
    }

    /// Type text into the remote shell without submitting it.
    pub fn paste(&self, text: &str) -> bool {
        self.send(ShellFrame::RawBytes(text.as_bytes().to_vec()))
    }

    /// Measure the surface and send the full size. Skipped while disconnected.
    pub fn refit(&mut self) -> Option<(u16, u16)> {
        if !self.transport.is_connected() {
            tracing::debug!("resize skipped, not connected");
            return None;
        }
        let (cols, rows) = self.surface.fit();
        if self.send(ShellFrame::Resize { cols, rows }) {
            self.last_size = Some((cols, rows));
            Some((cols, rows))
        } else {
            None
        }
    }

    pub fn geometry_changed(&mut self) -> ShellEvent {
        resized(self.refit())
    }

    pub fn write_failure(&mut self, message: &str) {
        let line = failure_line(&self.style, message);
        self.write(line.as_bytes());
    }

    fn write(&mut self, bytes: &[u8]) {
        if let Err(e) = self.surface.write(bytes) {
            tracing::warn!("terminal write failed: {e}");
        }
    }

    /// Wait for the next transport event or refit deadline and apply it.
    /// `None` once the transport is gone.
    pub async fn step(&mut self) -> Option<ShellEvent> {
        let deadline = self.schedule.next_deadline();
        tokio::select! {
            event = self.events.recv() => Some(self.handle(event?)),
            _ = sleep_until_some(deadline) => {
                self.schedule.pop_due(Instant::now());
                Some(resized(self.refit()))
            }
        }
    }

    pub fn handle(&mut self, event: TransportEvent) -> ShellEvent {
        match event {
            TransportEvent::Opened => {
                self.refit();
                ShellEvent::Connected
            }
            TransportEvent::Frame(frame) => {
                self.write(frame.as_bytes());
                ShellEvent::Output(frame.len())
            }
            TransportEvent::Closed => ShellEvent::Disconnected,
        }
    }

    pub fn dispose(&mut self) {
        self.schedule.clear();
        self.transport.dispose();
    }

    pub async fn join(&self) {
        self.transport.join().await;
    }
}

fn resized(size: Option<(u16, u16)>) -> ShellEvent {
    match size {
        Some((cols, rows)) => ShellEvent::Resized { cols, rows },
        None => ShellEvent::ResizeSkipped,
    }
}

pub(crate) async fn sleep_until_some(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
