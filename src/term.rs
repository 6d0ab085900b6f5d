//! terminal introspection
//!
//! collects everything the canvas needs to know about its host before any
//! X11 work starts: the cell grid, best-effort font pixel metrics, the
//! ancestor pid chain used to find the terminal's window, and whether we
//! run inside a tmux pane. the canvas core itself never touches env vars
//! or /proc; it only sees the resulting [`TermInfo`].

use anyhow::Result;
use std::fs;

// glyph cell guess for terminals that leave ws_xpixel/ws_ypixel at zero
const FALLBACK_FONT_W: u16 = 8;
const FALLBACK_FONT_H: u16 = 16;

const MAX_PID_CHAIN: usize = 32;

#[derive(Debug, Clone)]
pub struct TermInfo {
    pub cols: u16,
    pub rows: u16,
    /// glyph cell width in pixels
    pub font_width: u16,
    /// glyph cell height in pixels
    pub font_height: u16,
    /// this process and its ancestors, nearest first
    pub parent_pids: Vec<u32>,
    /// pane id from $TMUX_PANE when running under tmux
    pub tmux_pane: Option<String>,
}

impl TermInfo {
    pub fn detect() -> Result<TermInfo> {
        let ws = winsize()?;
        let cols = ws.ws_col.max(1);
        let rows = ws.ws_row.max(1);
        let font_width = if ws.ws_xpixel > 0 {
            (ws.ws_xpixel / cols).max(1)
        } else {
            FALLBACK_FONT_W
        };
        let font_height = if ws.ws_ypixel > 0 {
            (ws.ws_ypixel / rows).max(1)
        } else {
            FALLBACK_FONT_H
        };
        Ok(TermInfo {
            cols,
            rows,
            font_width,
            font_height,
            parent_pids: pid_chain(std::process::id()),
            tmux_pane: std::env::var("TMUX_PANE").ok().filter(|p| !p.is_empty()),
        })
    }

    /// cell bounds → pixel bounds via the font metrics; saturates rather
    /// than overflowing on absurd cell counts from the command channel
    pub fn pixel_bounds(&self, cells_w: u32, cells_h: u32) -> (u32, u32) {
        (
            cells_w.saturating_mul(self.font_width as u32),
            cells_h.saturating_mul(self.font_height as u32),
        )
    }
}

fn winsize() -> Result<libc::winsize> {
    let mut ws: libc::winsize = unsafe { std::mem::zeroed() };
    for fd in [libc::STDOUT_FILENO, libc::STDERR_FILENO, libc::STDIN_FILENO] {
        let ok = unsafe { libc::ioctl(fd, libc::TIOCGWINSZ, &mut ws) } == 0;
        if ok && ws.ws_col > 0 {
            return Ok(ws);
        }
    }
    anyhow::bail!("no attached tty reports a window size")
}

/// ancestor chain via /proc, nearest first; stops at init or a parse failure
pub fn pid_chain(mut pid: u32) -> Vec<u32> {
    let mut chain = Vec::new();
    while pid > 1 && chain.len() < MAX_PID_CHAIN {
        chain.push(pid);
        match fs::read_to_string(format!("/proc/{pid}/stat"))
            .ok()
            .and_then(|stat| parse_ppid(&stat))
        {
            Some(ppid) => pid = ppid,
            None => break,
        }
    }
    chain
}

/// ppid is the second field after the parenthesised comm, which may itself
/// contain spaces and parens
fn parse_ppid(stat: &str) -> Option<u32> {
    let (_, rest) = stat.rsplit_once(')')?;
    rest.split_whitespace().nth(1)?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ppid() {
        assert_eq!(parse_ppid("1234 (bash) S 77 1234 1234 0 -1"), Some(77));
    }

    #[test]
    fn test_parse_ppid_comm_with_spaces() {
        assert_eq!(
            parse_ppid("42 (tmux: client (v3)) S 991 42 42 0 -1"),
            Some(991)
        );
    }

    #[test]
    fn test_parse_ppid_malformed() {
        assert_eq!(parse_ppid("garbage"), None);
        assert_eq!(parse_ppid("1 (init) S"), None);
    }

    fn info() -> TermInfo {
        TermInfo {
            cols: 80,
            rows: 24,
            font_width: 8,
            font_height: 16,
            parent_pids: Vec::new(),
            tmux_pane: None,
        }
    }

    #[test]
    fn test_pixel_bounds() {
        assert_eq!(info().pixel_bounds(40, 20), (320, 320));
        assert_eq!(info().pixel_bounds(0, 0), (0, 0));
    }

    #[test]
    fn test_pixel_bounds_saturate() {
        assert_eq!(info().pixel_bounds(u32::MAX, u32::MAX), (u32::MAX, u32::MAX));
    }

    #[test]
    fn test_pid_chain_starts_with_self() {
        let chain = pid_chain(std::process::id());
        assert_eq!(chain.first(), Some(&std::process::id()));
        assert!(chain.len() <= MAX_PID_CHAIN);
    }
}
