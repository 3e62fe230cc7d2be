//! ANSI styling for the chat view and shell markers, and the column
//! arithmetic the activity log needs to stay on one line.

/// Double-width codepoint blocks (Hangul Jamo, CJK, fullwidth forms).
const WIDE_BLOCKS: &[(u32, u32)] = &[
    (0x1100, 0x115F),
    (0x2E80, 0x303E),
    (0x3040, 0x33BF),
    (0x3400, 0x4DBF),
    (0x4E00, 0x9FFF),
    (0xF900, 0xFAFF),
    (0xFE30, 0xFE6F),
    (0xFF01, 0xFF60),
    (0x20000, 0x2FFFF),
];

/// SGR sequences for the few colours relaydeck uses. Every accessor yields
/// an empty string when colour is off.
#[derive(Debug, Clone, Copy)]
pub struct Style {
    enabled: bool,
}

impl Default for Style {
    fn default() -> Self {
        Self::new()
    }
}

impl Style {
    /// Colour unless `NO_COLOR` is set.
    pub fn new() -> Self {
        Self {
            enabled: std::env::var_os("NO_COLOR").is_none(),
        }
    }

    pub fn force_enabled() -> Self {
        Self { enabled: true }
    }

    pub fn disabled() -> Self {
        Self { enabled: false }
    }

    fn sgr(&self, seq: &'static str) -> &'static str {
        if self.enabled {
            seq
        } else {
            ""
        }
    }

    /// Tool results, progress, attachments.
    pub fn dim_start(&self) -> &'static str {
        self.sgr("\x1b[2m")
    }

    pub fn bold_start(&self) -> &'static str {
        self.sgr("\x1b[1m")
    }

    /// Failures: error chunks, upload markers, non-zero exits.
    pub fn red_start(&self) -> &'static str {
        self.sgr("\x1b[31m")
    }

    pub fn yellow_start(&self) -> &'static str {
        self.sgr("\x1b[33m")
    }

    pub fn green_start(&self) -> &'static str {
        self.sgr("\x1b[32m")
    }

    pub fn cyan_start(&self) -> &'static str {
        self.sgr("\x1b[36m")
    }

    pub fn reset(&self) -> &'static str {
        self.sgr("\x1b[0m")
    }
}

/// Terminal columns taken by `c`.
fn char_width(c: char) -> usize {
    if c.is_control() {
        return 0;
    }
    let cp = u32::from(c);
    if WIDE_BLOCKS.iter().any(|&(lo, hi)| (lo..=hi).contains(&cp)) {
        2
    } else {
        1
    }
}

/// Truncate to at most `width` columns, ending in `…` when cut.
/// Input must be free of escape sequences.
pub fn truncate_to_width(s: &str, width: usize) -> String {
    if s.chars().map(char_width).sum::<usize>() <= width {
        return s.to_string();
    }
    let mut out = String::new();
    let mut used = 0;
    for c in s.chars() {
        let w = char_width(c);
        if used + w + 1 > width {
            break;
        }
        out.push(c);
        used += w;
    }
    out.push('…');
    out
}

/// Byte count for display: `512 B`, `1.5 KB`, `10.0 MB`.
pub fn format_bytes(n: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    let f = n as f64;
    if f >= MB {
        format!("{:.1} MB", f / MB)
    } else if f >= KB {
        format!("{:.1} KB", f / KB)
    } else {
        format!("{n} B")
    }
}
