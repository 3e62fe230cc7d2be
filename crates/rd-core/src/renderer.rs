//! Chat display output.
//!
//! `ChatRenderer<W: Write>` owns all formatting of the chat front end. A
//! streaming exchange renders as an activity log (tool calls, results,
//! narration) with a working spinner until a `result` chunk arrives. The
//! result is shown as a provisional answer below the log as soon as it
//! streams in; the committed answer is printed once the exchange completes.
//! Every persistent emit clears the transient line first so spinner and
//! banner never bleed into output.

use std::io::Write;

use rd_protocol::{Chunk, ChunkKind, Message, Role, UploadRecord};

use crate::aggregate::Projection;
use crate::style::{format_bytes, truncate_to_width, Style};
use crate::transport::LinkStatus;

/// Braille spinner frames.
const SPINNER_FRAMES: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];

pub struct ChatRenderer<W: Write> {
    pub writer: W,
    style: Style,
    term_width: u16,
    spinner_active: bool,
    /// Narrated text is mid-line.
    in_text: bool,
    /// Notice text shown on the transient line until it expires.
    banner: Option<String>,
}

impl<W: Write> ChatRenderer<W> {
    pub fn new(writer: W, style: Style) -> Self {
        let term_width = crossterm::terminal::size().map(|(w, _)| w).unwrap_or(80);
        Self::new_with_width(writer, style, term_width)
    }

    pub fn new_with_width(writer: W, style: Style, width: u16) -> Self {
        Self {
            writer,
            style,
            term_width: width,
            spinner_active: false,
            in_text: false,
            banner: None,
        }
    }

    pub fn style(&self) -> &Style {
        &self.style
    }

    pub fn spinner_active(&self) -> bool {
        self.spinner_active
    }

    // ── Spinner ─────────────────────────────────────────────────────────

    pub fn clear_spinner(&mut self) {
        if self.spinner_active {
            let _ = write!(self.writer, "\r\x1b[K");
            self.spinner_active = false;
        }
    }

    pub fn emit_spinner_tick(&mut self, frame: usize) {
        if self.in_text {
            return;
        }
        let _ = write!(
            self.writer,
            "\r\x1b[K{}{} working...{}",
            self.style.cyan_start(),
            SPINNER_FRAMES[frame % SPINNER_FRAMES.len()],
            self.style.reset()
        );
        self.write_banner_tail();
        let _ = self.writer.flush();
        self.spinner_active = true;
    }

    pub fn banner(&self) -> Option<&str> {
        self.banner.as_deref()
    }

    /// Show `text` on the transient line, or take it down with `None`.
    /// Redraws when the text changed or a persistent emit wiped the line.
    pub fn set_banner(&mut self, text: Option<String>) {
        let drawn = self.banner.is_none() || self.spinner_active;
        if text == self.banner && drawn {
            return;
        }
        self.banner = text;
        if self.in_text {
            return;
        }
        if self.banner.is_some() {
            let _ = write!(self.writer, "\r\x1b[K");
            self.write_banner_tail();
            self.spinner_active = true;
        } else {
            self.clear_spinner();
        }
        let _ = self.writer.flush();
    }

    fn write_banner_tail(&mut self) {
        if let Some(text) = &self.banner {
            let _ = write!(
                self.writer,
                "  {}! {}{}",
                self.style.yellow_start(),
                text,
                self.style.reset()
            );
        }
    }

    fn end_text(&mut self) {
        if self.in_text {
            let _ = writeln!(self.writer);
            self.in_text = false;
        }
    }

    // ── Persistent output ───────────────────────────────────────────────

    /// Connection status label: `● connected`.
    pub fn emit_status(&mut self, status: LinkStatus) {
        self.clear_spinner();
        self.end_text();
        let color = match status {
            LinkStatus::Connected => self.style.green_start(),
            LinkStatus::Connecting => self.style.yellow_start(),
            LinkStatus::Disconnected => self.style.red_start(),
        };
        let _ = writeln!(self.writer, "{color}●{} {status}", self.style.reset());
        let _ = self.writer.flush();
    }

    pub fn emit_message(&mut self, msg: &Message) {
        self.clear_spinner();
        self.end_text();
        let (label, color) = match msg.role {
            Role::User => ("you", self.style.bold_start()),
            Role::Assistant => ("agent", self.style.cyan_start()),
        };
        let _ = writeln!(self.writer, "{color}{label}:{} {}", self.style.reset(), msg.content);
        for att in &msg.attachments {
            let _ = writeln!(
                self.writer,
                "  {}📎 {}{}",
                self.style.dim_start(),
                att.filename,
                self.style.reset()
            );
        }
        let _ = self.writer.flush();
    }

    pub fn emit_history(&mut self, messages: &[Message]) {
        for msg in messages {
            self.emit_message(msg);
        }
    }

    /// One activity-log entry of a streaming exchange.
    pub fn emit_chunk(&mut self, chunk: &Chunk) {
        self.clear_spinner();
        let width = self.term_width.saturating_sub(4) as usize;
        match chunk.kind {
            ChunkKind::Text => {
                let _ = write!(self.writer, "{}", chunk.content);
                self.in_text = !chunk.content.ends_with('\n');
            }
            ChunkKind::ToolUse => {
                self.end_text();
                let line = truncate_to_width(chunk.content.lines().next().unwrap_or(""), width);
                let _ = writeln!(self.writer, "  ❯ {line}");
            }
            ChunkKind::ToolResult => {
                self.end_text();
                let line = truncate_to_width(chunk.content.lines().next().unwrap_or(""), width);
                let _ = writeln!(
                    self.writer,
                    "    {}{line}{}",
                    self.style.dim_start(),
                    self.style.reset()
                );
            }
            ChunkKind::Error => {
                self.end_text();
                let _ = writeln!(
                    self.writer,
                    "  {}⚠ {}{}",
                    self.style.red_start(),
                    chunk.content,
                    self.style.reset()
                );
            }
            ChunkKind::Status => {
                self.end_text();
                let _ = writeln!(
                    self.writer,
                    "  {}{}{}",
                    self.style.dim_start(),
                    chunk.content,
                    self.style.reset()
                );
            }
            ChunkKind::Result => {
                self.end_text();
                self.write_provisional(&chunk.content);
            }
        }
        let _ = self.writer.flush();
    }

    fn write_provisional(&mut self, content: &str) {
        let _ = writeln!(
            self.writer,
            "{}▐ answer{}",
            self.style.green_start(),
            self.style.reset()
        );
        let bar = format!("{}▐{}", self.style.green_start(), self.style.reset());
        for line in content.lines() {
            let _ = writeln!(self.writer, "{bar} {line}");
        }
    }

    /// Activity entries that arrived after the provisional answer push it up
    /// the screen; repeat it so it stays the last thing shown.
    pub fn emit_projection_tail(&mut self, view: &Projection<'_>) {
        let Some(result) = view.provisional else {
            return;
        };
        self.clear_spinner();
        self.end_text();
        self.write_provisional(&result.content);
        let _ = self.writer.flush();
    }

    /// The exchange ended. `answer` is the appended message, if any.
    pub fn emit_finished(&mut self, answer: Option<&Message>) {
        self.clear_spinner();
        self.end_text();
        match answer {
            Some(msg) => {
                let _ = writeln!(self.writer);
                self.emit_message(msg);
            }
            None => {
                let _ = writeln!(
                    self.writer,
                    "{}(no answer){}",
                    self.style.dim_start(),
                    self.style.reset()
                );
            }
        }
        let _ = self.writer.flush();
    }

    pub fn emit_abandoned(&mut self) {
        self.clear_spinner();
        self.end_text();
        let _ = writeln!(
            self.writer,
            "{}connection lost, response abandoned{}",
            self.style.yellow_start(),
            self.style.reset()
        );
    }

    pub fn emit_error(&mut self, msg: &str) {
        self.clear_spinner();
        self.end_text();
        let _ = writeln!(
            self.writer,
            "{}error:{} {}",
            self.style.red_start(),
            self.style.reset(),
            msg
        );
    }

    pub fn emit_upload_progress(&mut self, fraction: f64) {
        let pct = (fraction.clamp(0.0, 1.0) * 100.0).round() as u32;
        let _ = write!(
            self.writer,
            "\r\x1b[K{}uploading {pct}%{}",
            self.style.dim_start(),
            self.style.reset()
        );
        let _ = self.writer.flush();
        self.spinner_active = true;
    }

    pub fn emit_attached(&mut self, record: &UploadRecord) {
        self.clear_spinner();
        let _ = writeln!(
            self.writer,
            "{}📎 {} ({}) attached to next message{}",
            self.style.dim_start(),
            record.filename,
            format_bytes(record.size),
            self.style.reset()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rd_protocol::AttachmentRef;

    fn make_renderer(style: Style) -> ChatRenderer<Vec<u8>> {
        ChatRenderer::new_with_width(Vec::new(), style, 40)
    }

    fn output_str(r: &ChatRenderer<Vec<u8>>) -> String {
        String::from_utf8_lossy(&r.writer).into_owned()
    }

    fn msg(role: Role, content: &str) -> Message {
        Message::new("1", role, content, Vec::new(), Utc::now())
    }

    #[test]
    fn spinner_cleared_before_persistent_output() {
        let mut r = make_renderer(Style::disabled());
        r.emit_spinner_tick(0);
        assert!(r.spinner_active());
        r.emit_chunk(&Chunk::new(ChunkKind::ToolUse, "[Bash] ls"));
        assert!(!r.spinner_active());
        let s = output_str(&r);
        assert!(s.contains("\r\x1b[K  ❯ [Bash] ls"));
    }

    #[test]
    fn spinner_clear_is_idempotent() {
        let mut r = make_renderer(Style::disabled());
        r.clear_spinner();
        r.clear_spinner();
        assert!(output_str(&r).is_empty());
    }

    #[test]
    fn narrated_text_flows_then_breaks_for_tools() {
        let mut r = make_renderer(Style::disabled());
        r.emit_chunk(&Chunk::text("Hello "));
        r.emit_chunk(&Chunk::text("world"));
        r.emit_spinner_tick(1);
        r.emit_chunk(&Chunk::new(ChunkKind::ToolUse, "ls"));
        assert_eq!(output_str(&r), "Hello world\n  ❯ ls\n");
    }

    #[test]
    fn long_tool_lines_are_truncated() {
        let mut r = make_renderer(Style::disabled());
        let long = "x".repeat(100);
        r.emit_chunk(&Chunk::new(ChunkKind::ToolResult, &long));
        let s = output_str(&r);
        assert!(s.contains('…'));
        assert!(!s.contains(&long));
    }

    #[test]
    fn error_chunk_is_red() {
        let mut r = make_renderer(Style::force_enabled());
        r.emit_chunk(&Chunk::new(ChunkKind::Error, "tool crashed"));
        assert!(output_str(&r).contains("\x1b[31m⚠ tool crashed"));
    }

    #[test]
    fn finished_without_answer() {
        let mut r = make_renderer(Style::disabled());
        r.emit_finished(None);
        assert!(output_str(&r).contains("(no answer)"));
    }

    #[test]
    fn finished_with_answer() {
        let mut r = make_renderer(Style::disabled());
        r.emit_finished(Some(&msg(Role::Assistant, "Two files.")));
        assert!(output_str(&r).contains("agent: Two files."));
    }

    #[test]
    fn message_lists_attachments() {
        let mut r = make_renderer(Style::disabled());
        let mut m = msg(Role::User, "see file");
        m.attachments.push(AttachmentRef {
            filename: "1_a.txt".to_string(),
            path: "/up/1_a.txt".to_string(),
        });
        r.emit_message(&m);
        let s = output_str(&r);
        assert!(s.contains("you: see file"));
        assert!(s.contains("1_a.txt"));
    }

    #[test]
    fn result_chunk_shows_answer_before_finish() {
        let mut r = make_renderer(Style::disabled());
        r.emit_chunk(&Chunk::new(ChunkKind::ToolUse, "ls"));
        r.emit_chunk(&Chunk::result("Two files.\nBoth empty."));
        assert_eq!(
            output_str(&r),
            "  ❯ ls\n▐ answer\n▐ Two files.\n▐ Both empty.\n"
        );
    }

    #[test]
    fn projection_tail_repeats_provisional_after_late_activity() {
        let chunks = vec![
            Chunk::new(ChunkKind::ToolUse, "ls"),
            Chunk::result("final"),
            Chunk::new(ChunkKind::Status, "cleanup"),
        ];
        let mut r = make_renderer(Style::disabled());
        for chunk in &chunks {
            r.emit_chunk(chunk);
        }
        r.emit_projection_tail(&Projection::of(&chunks));
        let s = output_str(&r);
        let status_at = s.find("cleanup").unwrap();
        let final_at = s.rfind("▐ final").unwrap();
        assert!(final_at > status_at);
    }

    #[test]
    fn projection_tail_without_result_writes_nothing() {
        let chunks = vec![Chunk::new(ChunkKind::ToolUse, "ls")];
        let mut r = make_renderer(Style::disabled());
        r.emit_projection_tail(&Projection::of(&chunks));
        assert!(output_str(&r).is_empty());
    }

    #[test]
    fn banner_draws_once_and_clears() {
        let mut r = make_renderer(Style::disabled());
        r.set_banner(Some("Upload failed: disk full".to_string()));
        r.set_banner(Some("Upload failed: disk full".to_string()));
        assert_eq!(output_str(&r), "\r\x1b[K  ! Upload failed: disk full");
        assert!(r.spinner_active());

        r.set_banner(None);
        assert!(output_str(&r).ends_with("disk full\r\x1b[K"));
        assert!(!r.spinner_active());
        assert_eq!(r.banner(), None);
    }

    #[test]
    fn banner_redrawn_after_persistent_output() {
        let mut r = make_renderer(Style::disabled());
        r.set_banner(Some("note".to_string()));
        r.emit_status(LinkStatus::Connected);
        assert!(!r.spinner_active());
        r.set_banner(Some("note".to_string()));
        assert!(output_str(&r).ends_with("● connected\n\r\x1b[K  ! note"));
    }

    #[test]
    fn spinner_tick_carries_banner() {
        let mut r = make_renderer(Style::disabled());
        r.set_banner(Some("note".to_string()));
        r.emit_spinner_tick(0);
        assert!(output_str(&r).ends_with("\r\x1b[K⠋ working...  ! note"));
    }

    #[test]
    fn status_labels() {
        let mut r = make_renderer(Style::disabled());
        r.emit_status(LinkStatus::Connecting);
        r.emit_status(LinkStatus::Connected);
        assert_eq!(output_str(&r), "● connecting\n● connected\n");
    }

    #[test]
    fn upload_progress_and_attach() {
        let mut r = make_renderer(Style::disabled());
        r.emit_upload_progress(0.456);
        assert!(output_str(&r).contains("uploading 46%"));
        r.emit_attached(&UploadRecord {
            filename: "1_a.txt".to_string(),
            path: "/up/1_a.txt".to_string(),
            size: 2048,
            content_type: None,
        });
        assert!(!r.spinner_active());
        assert!(output_str(&r).contains("1_a.txt (2.0 KB)"));
    }
}
