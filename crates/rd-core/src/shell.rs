//! The shell bridge of one deployment: full PTY or simple runner.

use crate::pty::PtyBridge;
use crate::runner::RunnerBridge;
use crate::surface::Surface;
use crate::transport::LinkStatus;

/// Observable effect of one dispatched shell event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellEvent {
    Connected,
    Disconnected,
    /// Bytes written to the surface.
    Output(usize),
    Resized { cols: u16, rows: u16 },
    ResizeSkipped,
    Prompt { cwd: String },
    Exited { code: Option<i32> },
}

pub enum ShellBridge<S: Surface> {
    Pty(PtyBridge<S>),
    Runner(RunnerBridge<S>),
}

impl<S: Surface> ShellBridge<S> {
    pub fn mount(&mut self) {
        match self {
            ShellBridge::Pty(b) => b.mount(),
            ShellBridge::Runner(b) => b.mount(),
        }
    }

    pub fn status(&self) -> LinkStatus {
        match self {
            ShellBridge::Pty(b) => b.status(),
            ShellBridge::Runner(b) => b.status(),
        }
    }

    pub fn surface(&self) -> &S {
        match self {
            ShellBridge::Pty(b) => b.surface(),
            ShellBridge::Runner(b) => b.surface(),
        }
    }

    /// Mirror live notices onto the surface banner.
    pub fn set_banner(&mut self, text: Option<&str>) {
        let surface = match self {
            ShellBridge::Pty(b) => b.surface_mut(),
            ShellBridge::Runner(b) => b.surface_mut(),
        };
        if let Err(e) = surface.banner(text) {
            tracing::warn!("banner update failed: {e}");
        }
    }

    /// Raw keystrokes from the local terminal.
    pub fn input(&mut self, bytes: &[u8]) {
        match self {
            ShellBridge::Pty(b) => {
                b.input(bytes);
            }
            ShellBridge::Runner(b) => b.input(bytes),
        }
    }

    /// Type an uploaded file's path at the cursor, without a newline.
    pub fn inject_path(&mut self, path: &str) {
        match self {
            ShellBridge::Pty(b) => {
                if !b.paste(path) {
                    tracing::warn!("path not injected, shell not connected");
                }
            }
            ShellBridge::Runner(b) => b.paste(path),
        }
    }

    /// The host terminal changed size.
    pub fn geometry_changed(&mut self) -> Option<ShellEvent> {
        match self {
            ShellBridge::Pty(b) => Some(b.geometry_changed()),
            ShellBridge::Runner(_) => None,
        }
    }

    pub fn write_failure(&mut self, message: &str) {
        match self {
            ShellBridge::Pty(b) => b.write_failure(message),
            ShellBridge::Runner(b) => b.write_failure(message),
        }
    }

    pub async fn step(&mut self) -> Option<ShellEvent> {
        match self {
            ShellBridge::Pty(b) => b.step().await,
            ShellBridge::Runner(b) => b.step().await,
        }
    }

    pub fn dispose(&mut self) {
        match self {
            ShellBridge::Pty(b) => b.dispose(),
            ShellBridge::Runner(b) => b.dispose(),
        }
    }

    pub async fn join(&self) {
        match self {
            ShellBridge::Pty(b) => b.join().await,
            ShellBridge::Runner(b) => b.join().await,
        }
    }
}
