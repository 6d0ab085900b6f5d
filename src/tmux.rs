//! tmux control-interface queries
//!
//! the canvas needs to know which terminal processes host the current tmux
//! session (one per attached client) and where the active pane sits inside
//! the window. everything here shells out to tmux; a missing binary or a
//! dead session degrades to an empty client list, which leaves the image
//! with no surfaces.

use anyhow::{Context, Result};
use tokio::process::Command;
use tracing::warn;

/// pids of every client attached to the session owning `pane`; a failed
/// query degrades to no clients
pub async fn client_pids(pane: &str) -> Vec<u32> {
    match run(&["list-clients", "-t", pane, "-F", "#{client_pid}"]).await {
        Ok(out) => parse_pids(&out),
        Err(e) => {
            warn!("tmux client query failed, treating session as detached: {e:#}");
            Vec::new()
        }
    }
}

/// cell offset of `pane` inside its hosting terminal window
pub async fn pane_offset(pane: &str) -> Result<(u32, u32)> {
    let out = run(&[
        "display-message",
        "-t",
        pane,
        "-p",
        "#{pane_left} #{pane_top} #{status} #{status-position}",
    ])
    .await?;
    parse_offset(&out)
}

async fn run(args: &[&str]) -> Result<String> {
    let out = Command::new("tmux")
        .args(args)
        .output()
        .await
        .context("failed to spawn tmux")?;
    if !out.status.success() {
        anyhow::bail!(
            "tmux {} failed: {}",
            args[0],
            String::from_utf8_lossy(&out.stderr).trim()
        );
    }
    Ok(String::from_utf8_lossy(&out.stdout).into_owned())
}

fn parse_pids(out: &str) -> Vec<u32> {
    out.lines().filter_map(|l| l.trim().parse().ok()).collect()
}

/// `pane_top` counts from the content area; a status line drawn at the top
/// shifts every pane down by its row count
fn parse_offset(out: &str) -> Result<(u32, u32)> {
    let mut fields = out.split_whitespace();
    let left: u32 = fields
        .next()
        .and_then(|f| f.parse().ok())
        .context("missing pane_left")?;
    let top: u32 = fields
        .next()
        .and_then(|f| f.parse().ok())
        .context("missing pane_top")?;
    let status_rows = match fields.next() {
        None | Some("off") => 0,
        Some("on") => 1,
        Some(n) => n.parse().unwrap_or(1),
    };
    let top = if fields.next() == Some("top") {
        top + status_rows
    } else {
        top
    };
    Ok((left, top))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_client_pids_degrade_without_session() {
        // no tmux binary or no such pane, either way: no clients, no error
        assert!(client_pids("%xlayer-no-such-pane").await.is_empty());
    }

    #[test]
    fn test_parse_pids() {
        assert_eq!(parse_pids("1234\n5678\n"), vec![1234, 5678]);
        assert_eq!(parse_pids(""), Vec::<u32>::new());
        assert_eq!(parse_pids("1234\nnot-a-pid\n90"), vec![1234, 90]);
    }

    #[test]
    fn test_parse_offset_status_bottom() {
        assert_eq!(parse_offset("5 12 on bottom\n").unwrap(), (5, 12));
    }

    #[test]
    fn test_parse_offset_status_top() {
        assert_eq!(parse_offset("0 0 on top\n").unwrap(), (0, 1));
        assert_eq!(parse_offset("0 3 2 top\n").unwrap(), (0, 5));
    }

    #[test]
    fn test_parse_offset_status_off() {
        assert_eq!(parse_offset("2 4 off bottom\n").unwrap(), (2, 4));
    }

    #[test]
    fn test_parse_offset_malformed() {
        assert!(parse_offset("").is_err());
        assert!(parse_offset("x y").is_err());
    }
}
