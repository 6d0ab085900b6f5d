//! geometry resolver
//!
//! finds the terminal windows an overlay must cover — one per attached
//! tmux client, or the single owning terminal — and translates cell-grid
//! placement into pixel rectangles inside them. terminals that vanish
//! mid-query are silently skipped.

use std::collections::{HashMap, HashSet, VecDeque};

use anyhow::Result;
use tracing::debug;
use x11rb::protocol::xproto::{AtomEnum, ConnectionExt as _};

use super::conn::XContext;
use crate::canvas::Placement;
use crate::term::{self, TermInfo};
use crate::tmux;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PixelRect {
    pub x: i16,
    pub y: i16,
    pub width: u16,
    pub height: u16,
}

/// every terminal window the overlay must consider
pub async fn terminal_windows(ctx: &XContext, info: &TermInfo) -> Result<Vec<u32>> {
    let mut pids: HashSet<u32> = HashSet::new();
    if let Some(pane) = &info.tmux_pane {
        for pid in tmux::client_pids(pane).await {
            pids.extend(term::pid_chain(pid));
        }
    } else {
        pids.extend(info.parent_pids.iter().copied());
    }
    let windows = windows_for_pids(ctx, &pids);
    debug!("resolved {} terminal window(s)", windows.len());
    Ok(windows)
}

/// cell offset every placement must shift by; (0, 0) outside tmux
pub async fn cell_offset(info: &TermInfo) -> (u32, u32) {
    match &info.tmux_pane {
        Some(pane) => tmux::pane_offset(pane).await.unwrap_or((0, 0)),
        None => (0, 0),
    }
}

/// pixel rectangle for `place` inside `terminal`, or None when the terminal
/// disappeared between enumeration and this query
pub fn compute_placement(
    ctx: &XContext,
    terminal: u32,
    info: &TermInfo,
    place: Placement,
    offset: (u32, u32),
    image_w: u32,
    image_h: u32,
) -> Option<PixelRect> {
    let geo = ctx.conn.get_geometry(terminal).ok()?.reply().ok()?;
    Some(place_in(
        geo.width,
        geo.height,
        info.cols,
        info.rows,
        place.col + offset.0,
        place.row + offset.1,
        image_w,
        image_h,
    ))
}

/// cell→pixel math: the cell size comes from the window dimensions, and
/// leftover pixels become the centering padding terminals render with
fn place_in(
    win_w: u16,
    win_h: u16,
    cols: u16,
    rows: u16,
    col: u32,
    row: u32,
    width: u32,
    height: u32,
) -> PixelRect {
    let cell_w = (win_w / cols.max(1)).max(1);
    let cell_h = (win_h / rows.max(1)).max(1);
    let pad_x = win_w.saturating_sub(cell_w * cols) / 2;
    let pad_y = win_h.saturating_sub(cell_h * rows) / 2;
    PixelRect {
        x: (pad_x as i32 + col as i32 * cell_w as i32).min(i16::MAX as i32) as i16,
        y: (pad_y as i32 + row as i32 * cell_h as i32).min(i16::MAX as i32) as i16,
        width: width.min(u16::MAX as u32) as u16,
        height: height.min(u16::MAX as u32) as u16,
    }
}

/// breadth-first walk of the window tree matching _NET_WM_PID against
/// `pids`; one window per matched pid, matches are not descended into
fn windows_for_pids(ctx: &XContext, pids: &HashSet<u32>) -> Vec<u32> {
    let conn = &ctx.conn;
    let pid_atom = match conn
        .intern_atom(true, b"_NET_WM_PID")
        .ok()
        .and_then(|cookie| cookie.reply().ok())
    {
        Some(reply) if reply.atom != 0 => reply.atom,
        _ => return Vec::new(),
    };

    let mut matched: HashMap<u32, u32> = HashMap::new();
    let mut queue = VecDeque::from([ctx.screen.root]);
    while let Some(window) = queue.pop_front() {
        let Some(tree) = conn
            .query_tree(window)
            .ok()
            .and_then(|cookie| cookie.reply().ok())
        else {
            continue; // window went away mid-walk
        };
        for child in tree.children {
            match window_pid(ctx, child, pid_atom) {
                Some(pid) if pids.contains(&pid) => {
                    matched.entry(pid).or_insert(child);
                }
                _ => queue.push_back(child),
            }
        }
    }
    matched.into_values().collect()
}

fn window_pid(ctx: &XContext, window: u32, pid_atom: u32) -> Option<u32> {
    ctx.conn
        .get_property(false, window, pid_atom, AtomEnum::CARDINAL, 0, 1)
        .ok()?
        .reply()
        .ok()?
        .value32()?
        .next()
}
