//! stdin command protocol
//!
//! one json record per line, field-compatible with the ueberzug layer
//! protocol:
//!
//! ```text
//! {"action":"add","identifier":"preview","x":2,"y":4,"max_width":40,"max_height":20,"path":"/tmp/a.png"}
//! {"action":"remove","identifier":"preview"}
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;

/// one decoded command record
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum Command {
    Add(AddCommand),
    Remove { identifier: String },
    Hide,
    Show,
}

/// payload of an `add` record; coordinates and bounds are in terminal cells
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AddCommand {
    pub identifier: String,
    pub path: String,
    /// column of the top-left cell
    #[serde(default)]
    pub x: u32,
    /// row of the top-left cell
    #[serde(default)]
    pub y: u32,
    /// scale down to fit this many columns, 0 = keep intrinsic size
    #[serde(default)]
    pub max_width: u32,
    /// scale down to fit this many rows, 0 = keep intrinsic size
    #[serde(default)]
    pub max_height: u32,
}

pub fn parse(line: &str) -> Result<Command> {
    serde_json::from_str(line.trim()).with_context(|| format!("bad command record: {line:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_add() {
        let cmd = parse(
            r#"{"action":"add","identifier":"a","path":"/tmp/a.png","x":2,"y":4,"max_width":40,"max_height":20}"#,
        )
        .unwrap();
        match cmd {
            Command::Add(add) => {
                assert_eq!(add.identifier, "a");
                assert_eq!(add.path, "/tmp/a.png");
                assert_eq!((add.x, add.y), (2, 4));
                assert_eq!((add.max_width, add.max_height), (40, 20));
            }
            other => panic!("expected add, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_add_defaults() {
        let cmd = parse(r#"{"action":"add","identifier":"a","path":"/a.png"}"#).unwrap();
        match cmd {
            Command::Add(add) => {
                assert_eq!((add.x, add.y), (0, 0));
                assert_eq!((add.max_width, add.max_height), (0, 0));
            }
            other => panic!("expected add, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_remove() {
        let cmd = parse(r#"{"action":"remove","identifier":"a"}"#).unwrap();
        assert_eq!(
            cmd,
            Command::Remove {
                identifier: "a".into()
            }
        );
    }

    #[test]
    fn test_parse_visibility() {
        assert_eq!(parse(r#"{"action":"hide"}"#).unwrap(), Command::Hide);
        assert_eq!(parse(r#"{"action":"show"}"#).unwrap(), Command::Show);
    }

    #[test]
    fn test_parse_rejects_unknown_action() {
        assert!(parse(r#"{"action":"explode"}"#).is_err());
        assert!(parse("not json at all").is_err());
    }
}
