//! Front-end event loops for the `relaydeck` binary.
//!
//! Blocking inputs (stdin, SIGWINCH) are read on plain threads and forwarded
//! into tokio channels; everything else runs on the bridge's own dispatcher
//! inside one `select!` loop per view.

use std::io::{self, BufRead, Read};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rd_backend::ProgressFn;
use rd_protocol::{ChunkKind, UploadRecord};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::chat::{ChatSession, ChatUpdate};
use crate::context::{ContextError, DeckContext};
use crate::pty::sleep_until_some;
use crate::renderer::ChatRenderer;
use crate::shell::{ShellBridge, ShellEvent};
use crate::style::Style;
use crate::surface::{HostTerminal, Surface};
use crate::transport::LinkStatus;
use crate::upload::{deliver_to_composer, deliver_to_shell, Notices, UploadError};

/// Ctrl-] leaves the shell view.
pub const DETACH_KEY: u8 = 0x1d;

const SPINNER_INTERVAL: Duration = Duration::from_millis(120);

type UploadTask = JoinHandle<Result<UploadRecord, UploadError>>;

#[derive(Debug, Default)]
pub struct ShellOptions {
    /// Upload this file, then type its server path at the prompt.
    pub inject: Option<PathBuf>,
}

#[derive(Debug, Default)]
pub struct ChatOptions {
    pub session: Option<String>,
    pub attach: Vec<PathBuf>,
    /// Send one message, print the answer, exit.
    pub message: Option<String>,
}

fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<Vec<u8>> {
    let (tx, rx) = mpsc::unbounded_channel();
    thread::spawn(move || {
        let stdin = io::stdin();
        let mut handle = stdin.lock();
        let mut buf = [0u8; 1024];
        loop {
            match handle.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if tx.send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
            }
        }
    });
    rx
}

fn spawn_line_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

#[cfg(unix)]
fn spawn_winch_listener() -> mpsc::UnboundedReceiver<()> {
    use signal_hook::consts::SIGWINCH;
    use signal_hook::iterator::Signals;

    let (tx, rx) = mpsc::unbounded_channel();
    thread::spawn(move || {
        let mut signals = match Signals::new([SIGWINCH]) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!("SIGWINCH handler unavailable: {e}");
                return;
            }
        };
        for _ in signals.forever() {
            if tx.send(()).is_err() {
                break;
            }
        }
    });
    rx
}

#[cfg(not(unix))]
fn spawn_winch_listener() -> mpsc::UnboundedReceiver<()> {
    let (_tx, rx) = mpsc::unbounded_channel();
    rx
}

/// Await an optional task; pending forever when there is none.
async fn finished(task: &mut Option<UploadTask>) -> Result<UploadRecord, UploadError> {
    match task.as_mut() {
        Some(handle) => {
            let result = handle.await;
            *task = None;
            match result {
                Ok(result) => result,
                Err(e) => Err(UploadError::Invalid(format!("upload task failed: {e}"))),
            }
        }
        None => std::future::pending().await,
    }
}

fn progress_channel() -> (ProgressFn, mpsc::UnboundedReceiver<f64>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let progress: ProgressFn = Arc::new(move |fraction| {
        let _ = tx.send(fraction);
    });
    (progress, rx)
}

/// Mirror the live notices onto the shell banner.
fn refresh_shell_banner<S: Surface>(
    shell: &mut ShellBridge<S>,
    notices: &mut Notices,
    now: Instant,
) {
    let text = notices.banner(now);
    shell.set_banner(text.as_deref());
}

/// Interactive shell view. The terminal must already be in raw mode.
pub async fn run_shell(ctx: &DeckContext, options: ShellOptions) -> Result<(), ContextError> {
    let mut shell = ctx.shell_bridge(HostTerminal::new(io::stdout()))?;
    let mut notices = Notices::new();
    let mut stdin = spawn_stdin_reader();
    let mut winch = spawn_winch_listener();
    let mut upload = options.inject.map(|path| {
        let noop: ProgressFn = Arc::new(|_| {});
        ctx.uploader().spawn(path, noop)
    });

    shell.mount();
    loop {
        tokio::select! {
            event = shell.step() => match event {
                Some(ShellEvent::Connected) => tracing::info!("shell connected"),
                Some(ShellEvent::Disconnected) => tracing::info!("shell disconnected, retrying"),
                Some(_) => {}
                None => break,
            },
            bytes = stdin.recv() => {
                let Some(bytes) = bytes else { break };
                if bytes.contains(&DETACH_KEY) {
                    break;
                }
                shell.input(&bytes);
            }
            Some(()) = winch.recv() => {
                if let Some(event) = shell.geometry_changed() {
                    tracing::debug!(?event, "host resized");
                }
            }
            result = finished(&mut upload) => {
                let now = Instant::now();
                deliver_to_shell(result, &mut shell, &mut notices, now);
                refresh_shell_banner(&mut shell, &mut notices, now);
            }
            _ = sleep_until_some(notices.next_expiry()) => {
                refresh_shell_banner(&mut shell, &mut notices, Instant::now());
            }
        }
    }

    shell.set_banner(None);
    shell.dispose();
    shell.join().await;
    Ok(())
}

struct ChatView<W: io::Write> {
    chat: ChatSession,
    renderer: ChatRenderer<W>,
    notices: Notices,
    upload: Option<UploadTask>,
    progress: Option<mpsc::UnboundedReceiver<f64>>,
    frame: usize,
}

impl<W: io::Write> ChatView<W> {
    fn start_upload(&mut self, ctx: &DeckContext, path: PathBuf) {
        if self.upload.is_some() {
            self.renderer.emit_error("an upload is already running");
            return;
        }
        let (progress, rx) = progress_channel();
        self.upload = Some(ctx.uploader().spawn(path, progress));
        self.progress = Some(rx);
    }

    fn upload_done(&mut self, result: Result<UploadRecord, UploadError>) {
        self.progress = None;
        let shown = result.as_ref().ok().cloned();
        let now = Instant::now();
        if deliver_to_composer(result, &mut self.chat, &mut self.notices, now).is_some() {
            if let Some(record) = shown {
                self.renderer.emit_attached(&record);
            }
        }
        self.refresh_banner(now);
    }

    /// Redraw the notice banner, or take it down once every notice expired.
    fn refresh_banner(&mut self, now: Instant) {
        let text = self.notices.banner(now);
        self.renderer.set_banner(text);
    }

    /// Render one update. Returns true when an exchange just ended.
    fn show(&mut self, update: ChatUpdate) -> bool {
        match update {
            ChatUpdate::Connected => {
                self.renderer.emit_status(LinkStatus::Connected);
                false
            }
            ChatUpdate::Disconnected { abandoned } => {
                self.renderer.emit_status(LinkStatus::Disconnected);
                if abandoned {
                    self.renderer.emit_abandoned();
                }
                abandoned
            }
            ChatUpdate::SessionBound(id) => {
                tracing::info!(session_id = %id, "session bound");
                false
            }
            ChatUpdate::Chunk(chunk) => {
                self.renderer.emit_chunk(&chunk);
                if chunk.kind != ChunkKind::Result {
                    if let Some(view) = self.chat.state().projection() {
                        self.renderer.emit_projection_tail(&view);
                    }
                }
                false
            }
            ChatUpdate::Finished(answer) => {
                self.renderer.emit_finished(answer.as_ref());
                true
            }
            ChatUpdate::Failed(message) => {
                self.renderer.emit_message(&message);
                true
            }
            ChatUpdate::Ignored => false,
        }
    }

    fn submit(&mut self, content: &str) {
        if let Err(e) = self.chat.submit(content) {
            self.renderer.emit_error(&e.to_string());
        }
    }
}

async fn next_progress(rx: &mut Option<mpsc::UnboundedReceiver<f64>>) -> Option<f64> {
    match rx.as_mut() {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Chat view: line-oriented, rendered to stdout.
pub async fn run_chat(ctx: &DeckContext, options: ChatOptions) -> Result<(), ContextError> {
    let chat = match &options.session {
        Some(id) => ctx.resume_chat(id).await?,
        None => ctx.chat_session()?,
    };
    let mut view = ChatView {
        chat,
        renderer: ChatRenderer::new(io::stdout(), Style::new()),
        notices: Notices::new(),
        upload: None,
        progress: None,
        frame: 0,
    };
    view.renderer.emit_history(view.chat.state().history());
    if ctx.credentials().token().is_none() {
        view.renderer
            .emit_error("no access token (set RELAYDECK_TOKEN or server.token_cmd)");
        return Ok(());
    }

    let mut attach = options.attach.into_iter();
    if let Some(path) = attach.next() {
        view.start_upload(ctx, path);
    }

    view.chat.connect();
    view.renderer.emit_status(view.chat.status());

    let one_shot = options.message;
    let mut sent = false;
    let mut lines = if one_shot.is_none() {
        Some(spawn_line_reader())
    } else {
        None
    };
    let mut spinner = tokio::time::interval(SPINNER_INTERVAL);

    loop {
        view.refresh_banner(Instant::now());

        // One-shot mode sends once the link is up and every attachment landed.
        if let Some(message) = &one_shot {
            if !sent && view.upload.is_none() && view.chat.status() == LinkStatus::Connected {
                view.submit(message);
                sent = true;
                if !view.chat.state().is_streaming() {
                    break;
                }
            }
        }

        tokio::select! {
            update = view.chat.next_update() => {
                let Some(update) = update else { break };
                if view.show(update) && one_shot.is_some() {
                    break;
                }
            }
            line = async {
                match lines.as_mut() {
                    Some(rx) => rx.recv().await,
                    None => std::future::pending().await,
                }
            } => {
                let Some(line) = line else { break };
                let line = line.trim();
                if line == "/quit" {
                    break;
                } else if let Some(path) = line.strip_prefix("/attach ") {
                    view.start_upload(ctx, PathBuf::from(path.trim()));
                } else if !line.is_empty() {
                    view.submit(line);
                }
            }
            Some(fraction) = next_progress(&mut view.progress) => {
                view.renderer.emit_upload_progress(fraction);
            }
            result = finished(&mut view.upload) => {
                view.upload_done(result);
                if let Some(path) = attach.next() {
                    view.start_upload(ctx, path);
                }
            }
            _ = sleep_until_some(view.notices.next_expiry()) => {
                view.refresh_banner(Instant::now());
            }
            _ = spinner.tick(), if view.chat.state().is_streaming() => {
                let working = view
                    .chat
                    .state()
                    .projection()
                    .is_some_and(|p| p.working());
                if working {
                    view.renderer.emit_spinner_tick(view.frame);
                    view.frame = view.frame.wrapping_add(1);
                }
            }
        }
    }

    view.renderer.set_banner(None);
    view.renderer.clear_spinner();
    view.chat.dispose();
    view.chat.join().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::surface::MemorySurface;
    use crate::transport::memory::MemoryDialer;
    use crate::upload::NOTICE_TTL;
    use rd_backend::MemoryCredentials;
    use rd_protocol::Chunk;

    fn context() -> DeckContext {
        DeckContext::new(
            Config::default(),
            Arc::new(MemoryCredentials::new(Some("tok".to_string()))),
            Arc::new(MemoryDialer::new()),
        )
        .unwrap()
    }

    fn chat_view(ctx: &DeckContext) -> ChatView<Vec<u8>> {
        ChatView {
            chat: ctx.chat_session().unwrap(),
            renderer: ChatRenderer::new_with_width(Vec::new(), Style::disabled(), 40),
            notices: Notices::new(),
            upload: None,
            progress: None,
            frame: 0,
        }
    }

    fn output(view: &ChatView<Vec<u8>>) -> String {
        String::from_utf8_lossy(&view.renderer.writer).into_owned()
    }

    #[tokio::test]
    async fn failed_upload_banner_clears_on_expiry() {
        let ctx = context();
        let mut view = chat_view(&ctx);
        view.upload_done(Err(UploadError::Invalid("file too large".to_string())));
        assert_eq!(view.renderer.banner(), Some("Upload failed: file too large"));
        assert!(output(&view).contains("! Upload failed: file too large"));

        let expiry = view.notices.next_expiry().unwrap();
        view.refresh_banner(expiry);
        assert_eq!(view.renderer.banner(), None);
        assert!(output(&view).ends_with("\r\x1b[K"));
        assert_eq!(view.notices.next_expiry(), None);
    }

    #[tokio::test]
    async fn result_chunk_is_shown_while_streaming() {
        let ctx = context();
        let mut view = chat_view(&ctx);
        let ended = view.show(ChatUpdate::Chunk(Chunk::result("Two files.")));
        assert!(!ended);
        assert!(output(&view).contains("▐ Two files."));
    }

    #[tokio::test]
    async fn shell_banner_follows_notices() {
        let ctx = context();
        let mut shell = ctx.shell_bridge(MemorySurface::new(80, 24)).unwrap();
        let mut notices = Notices::new();
        let t0 = Instant::now();

        let failed = Err(UploadError::Invalid("disk full".to_string()));
        deliver_to_shell(failed, &mut shell, &mut notices, t0);
        refresh_shell_banner(&mut shell, &mut notices, t0);
        assert_eq!(
            shell.surface().banner.as_deref(),
            Some("Upload failed: disk full")
        );
        assert!(shell.surface().text().contains("Upload failed: disk full"));

        refresh_shell_banner(&mut shell, &mut notices, t0 + NOTICE_TTL);
        assert_eq!(shell.surface().banner, None);
    }
}
