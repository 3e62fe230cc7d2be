//! Simple command-runner bridge: structured JSON only.
//!
//! The server has no PTY, so line editing happens locally. A finished line
//! goes out as `{"type":"command","content":...}`; the server answers with
//! `output` chunks and an `exit`, and announces its working directory with
//! `prompt`. Text that is not a runner frame is shown as-is.

use rd_protocol::{RunnerInbound, ShellFrame, WireFrame};
use tokio::sync::mpsc;

use crate::shell::ShellEvent;
use crate::style::Style;
use crate::surface::{failure_line, raw_newlines, Surface};
use crate::transport::{LinkStatus, Transport, TransportEvent};

const BACKSPACE: u8 = 0x7f;
const CTRL_H: u8 = 0x08;
const CTRL_U: u8 = 0x15;

pub struct RunnerBridge<S: Surface> {
    transport: Transport,
    events: mpsc::UnboundedReceiver<TransportEvent>,
    surface: S,
    style: Style,
    line: String,
    cwd: Option<String>,
    last_exit: Option<i32>,
}

impl<S: Surface> RunnerBridge<S> {
    pub fn new(
        transport: Transport,
        events: mpsc::UnboundedReceiver<TransportEvent>,
        surface: S,
    ) -> Self {
        Self {
            transport,
            events,
            surface,
            style: Style::new(),
            line: String::new(),
            cwd: None,
            last_exit: None,
        }
    }

    pub fn with_style(mut self, style: Style) -> Self {
        self.style = style;
        self
    }

    pub fn mount(&mut self) {
        self.transport.connect();
    }

    pub fn status(&self) -> LinkStatus {
        self.transport.status()
    }

    pub fn cwd(&self) -> Option<&str> {
        self.cwd.as_deref()
    }

    pub fn last_exit(&self) -> Option<i32> {
        self.last_exit
    }

    /// The line being edited.
    pub fn line(&self) -> &str {
        &self.line
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut S {
        &mut self.surface
    }

    /// Send one command line.
    pub fn run_command(&self, command: &str) -> bool {
        match ShellFrame::Command(command.to_string()).encode() {
            Ok(wire) => self.transport.send(wire),
            Err(e) => {
                tracing::warn!("failed to encode command: {e}");
                false
            }
        }
    }

    /// Local line editing over raw keystrokes.
    pub fn input(&mut self, bytes: &[u8]) {
        let text = String::from_utf8_lossy(bytes).into_owned();
        for c in text.chars() {
            match c {
                '\r' | '\n' => {
                    self.write(b"\r\n");
                    let line = std::mem::take(&mut self.line);
                    if !self.run_command(&line) {
                        let marker = failure_line(&self.style, "not connected");
                        self.write(marker.as_bytes());
                    }
                }
                c if c as u32 == BACKSPACE as u32 || c as u32 == CTRL_H as u32 => {
                    if self.line.pop().is_some() {
                        self.write(b"\x08 \x08");
                    }
                }
                c if c as u32 == CTRL_U as u32 => {
                    let erase = "\x08 \x08".repeat(self.line.chars().count());
                    self.line.clear();
                    self.write(erase.as_bytes());
                }
                c if c.is_control() => {}
                c => {
                    self.line.push(c);
                    let mut buf = [0u8; 4];
                    self.write(c.encode_utf8(&mut buf).as_bytes());
                }
            }
        }
    }

    /// Type text into the current line without submitting it.
    pub fn paste(&mut self, text: &str) {
        let clean: String = text.chars().filter(|c| !c.is_control()).collect();
        self.line.push_str(&clean);
        self.write(clean.as_bytes());
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

    fn render_prompt(&mut self) {
        let prompt = format!(
            "{}{}{} $ {}",
            self.style.cyan_start(),
            self.cwd.as_deref().unwrap_or("~"),
            self.style.reset(),
            self.line
        );
        self.write(prompt.as_bytes());
    }

    pub async fn step(&mut self) -> Option<ShellEvent> {
        let event = self.events.recv().await?;
        Some(self.handle(event))
    }

    pub fn handle(&mut self, event: TransportEvent) -> ShellEvent {
        match event {
            TransportEvent::Opened => ShellEvent::Connected,
            TransportEvent::Closed => ShellEvent::Disconnected,
            TransportEvent::Frame(WireFrame::Binary(bytes)) => {
                self.write(&bytes);
                ShellEvent::Output(bytes.len())
            }
            TransportEvent::Frame(WireFrame::Text(text)) => {
                match serde_json::from_str::<RunnerInbound>(&text) {
                    Ok(frame) => self.apply(frame),
                    Err(_) => {
                        tracing::debug!("non-runner text frame rendered literally");
                        let shown = raw_newlines(&text);
                        self.write(shown.as_bytes());
                        ShellEvent::Output(text.len())
                    }
                }
            }
        }
    }

    fn apply(&mut self, frame: RunnerInbound) -> ShellEvent {
        match frame {
            RunnerInbound::Prompt { cwd } => {
                self.cwd = Some(cwd.clone());
                self.render_prompt();
                ShellEvent::Prompt { cwd }
            }
            RunnerInbound::Output { content } => {
                let shown = raw_newlines(&content);
                self.write(shown.as_bytes());
                ShellEvent::Output(content.len())
            }
            RunnerInbound::Exit { code, cwd } => {
                if let Some(cwd) = cwd {
                    self.cwd = Some(cwd);
                }
                self.last_exit = code;
                if let Some(code) = code.filter(|c| *c != 0) {
                    let marker = format!(
                        "{}[exit {code}]{}\r\n",
                        self.style.red_start(),
                        self.style.reset()
                    );
                    self.write(marker.as_bytes());
                }
                self.render_prompt();
                ShellEvent::Exited { code }
            }
        }
    }

    pub fn dispose(&mut self) {
        self.transport.dispose();
    }

    pub async fn join(&self) {
        self.transport.join().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::MemorySurface;
    use crate::transport::memory::MemoryDialer;
    use crate::transport::TransportConfig;
    use rd_backend::MemoryCredentials;
    use rd_protocol::RunnerOutbound;
    use std::sync::Arc;
    use url::Url;

    fn bridge(dialer: &MemoryDialer) -> RunnerBridge<MemorySurface> {
        let creds = Arc::new(MemoryCredentials::new(Some("tok".to_string())));
        let (transport, events) = Transport::new(
            TransportConfig::new(
                "shell",
                Url::parse("ws://dash.test/api/terminal/ws").unwrap(),
            ),
            Arc::new(dialer.clone()),
            creds,
        );
        RunnerBridge::new(transport, events, MemorySurface::new(80, 24)).with_style(Style::disabled())
    }

    fn text(s: &str) -> TransportEvent {
        TransportEvent::Frame(WireFrame::Text(s.to_string()))
    }

    #[test]
    fn prompt_output_exit_sequence() {
        let dialer = MemoryDialer::new();
        let mut b = bridge(&dialer);

        assert_eq!(
            b.handle(text(r#"{"type":"prompt","cwd":"/home/u"}"#)),
            ShellEvent::Prompt {
                cwd: "/home/u".to_string()
            }
        );
        b.handle(text(r#"{"type":"output","content":"a\nb\n"}"#));
        assert_eq!(
            b.handle(text(r#"{"type":"exit","code":2,"cwd":"/tmp"}"#)),
            ShellEvent::Exited { code: Some(2) }
        );

        assert_eq!(b.cwd(), Some("/tmp"));
        assert_eq!(b.last_exit(), Some(2));
        assert_eq!(
            b.surface().text(),
            "/home/u $ a\r\nb\r\n[exit 2]\r\n/tmp $ "
        );
    }

    #[test]
    fn exit_without_fields_keeps_cwd() {
        let dialer = MemoryDialer::new();
        let mut b = bridge(&dialer);
        b.handle(text(r#"{"type":"prompt","cwd":"/srv"}"#));
        b.handle(text(r#"{"type":"exit"}"#));
        assert_eq!(b.cwd(), Some("/srv"));
        assert_eq!(b.last_exit(), None);
    }

    #[test]
    fn malformed_json_is_rendered_literally() {
        let dialer = MemoryDialer::new();
        let mut b = bridge(&dialer);
        assert_eq!(b.handle(text("{oops\n")), ShellEvent::Output(6));
        assert_eq!(b.handle(text(r#"{"type":"mystery"}"#)), ShellEvent::Output(18));
        assert_eq!(b.surface().text(), "{oops\r\n{\"type\":\"mystery\"}");
    }

    #[test]
    fn line_editing_echoes_locally() {
        let dialer = MemoryDialer::new();
        let mut b = bridge(&dialer);
        b.input(b"lsx");
        b.input(&[BACKSPACE]);
        assert_eq!(b.line(), "ls");
        b.paste(" /up/1_a.txt\n");
        assert_eq!(b.line(), "ls /up/1_a.txt");
        b.input(&[CTRL_U]);
        assert_eq!(b.line(), "");
    }

    #[tokio::test(start_paused = true)]
    async fn enter_sends_command_frame() {
        let dialer = MemoryDialer::new();
        let mut b = bridge(&dialer);
        b.mount();
        assert_eq!(b.step().await, Some(ShellEvent::Connected));
        let mut peer = dialer.take_peer().unwrap();

        b.input(b"pwd\r");
        assert_eq!(b.line(), "");
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        let sent = peer.drain();
        assert_eq!(sent.len(), 1);
        let WireFrame::Text(json) = &sent[0] else {
            panic!("expected text frame");
        };
        let cmd: RunnerOutbound = serde_json::from_str(json).unwrap();
        assert_eq!(
            cmd,
            RunnerOutbound::Command {
                content: "pwd".to_string()
            }
        );
    }

    #[test]
    fn enter_while_disconnected_marks_failure() {
        let dialer = MemoryDialer::new();
        let mut b = bridge(&dialer);
        b.input(b"ls\r");
        assert!(b.surface().text().contains("not connected"));
    }
}
