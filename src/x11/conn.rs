//! X11 connection state
//!
//! owns the display connection, the screen descriptor, and the capabilities
//! resolved once at startup: MIT-SHM for accelerated pixel uploads and the
//! extension table behind human-readable protocol error reports. both
//! capabilities degrade to a fallback without failing the process; only the
//! initial connect is fatal.

use std::collections::HashMap;

use anyhow::{Context, Result};
use tracing::debug;
use x11rb::connection::{Connection, RequestConnection};
use x11rb::protocol::shm::{self, ConnectionExt as _};
use x11rb::protocol::xproto::{ConnectionExt as _, Screen};
use x11rb::rust_connection::RustConnection;
use x11rb::x11_utils::X11Error;

pub struct XContext {
    pub conn: RustConnection,
    pub screen: Screen,
    /// MIT-SHM usable for uploads; false routes every paint through the
    /// unaccelerated PutImage path
    pub shm_available: bool,
    errors: ErrorNames,
}

impl XContext {
    /// connect over the ambient DISPLAY; failure here is fatal for the
    /// process, everything probed afterwards only degrades
    pub fn connect() -> Result<XContext> {
        let (conn, screen_num) =
            x11rb::connect(None).context("cannot connect to the X display")?;
        let screen = conn.setup().roots[screen_num].clone();
        let shm_available = probe_shm(&conn);
        let errors = ErrorNames::probe(&conn);
        debug!(
            shm = shm_available,
            "connected, screen {}x{} depth {}",
            screen.width_in_pixels,
            screen.height_in_pixels,
            screen.root_depth
        );
        Ok(XContext {
            conn,
            screen,
            shm_available,
            errors,
        })
    }

    /// decode a protocol error for the log; falls back to numeric codes
    /// when the extension table could not be resolved at startup
    pub fn describe_error(&self, err: &X11Error) -> String {
        self.errors.describe(err)
    }
}

fn probe_shm(conn: &RustConnection) -> bool {
    match conn.extension_information(shm::X11_EXTENSION_NAME) {
        Ok(Some(_)) => {}
        _ => return false,
    }
    match conn.shm_query_version() {
        Ok(cookie) => cookie.reply().is_ok(),
        Err(_) => false,
    }
}

/// error-description capability: a real major-opcode → extension-name table,
/// or plain numbers when building it failed
enum ErrorNames {
    Table(HashMap<u8, String>),
    Numeric,
}

impl ErrorNames {
    fn probe(conn: &RustConnection) -> ErrorNames {
        match extension_table(conn) {
            Ok(table) => ErrorNames::Table(table),
            Err(e) => {
                debug!("extension name lookup unavailable, using numeric errors: {e:#}");
                ErrorNames::Numeric
            }
        }
    }

    fn describe(&self, err: &X11Error) -> String {
        match self {
            ErrorNames::Table(extensions) => {
                let kind = format!("{:?}", err.error_kind);
                match extensions.get(&err.major_opcode) {
                    Some(ext) => format!(
                        "{kind} error from {ext} request {}:{} (value {:#x})",
                        err.major_opcode, err.minor_opcode, err.bad_value
                    ),
                    None => format!(
                        "{kind} error from request {}:{} (value {:#x})",
                        err.major_opcode, err.minor_opcode, err.bad_value
                    ),
                }
            }
            ErrorNames::Numeric => format!(
                "X error code {} on request {}:{} (value {:#x})",
                err.error_code, err.major_opcode, err.minor_opcode, err.bad_value
            ),
        }
    }
}

fn extension_table(conn: &RustConnection) -> Result<HashMap<u8, String>> {
    let names = conn.list_extensions()?.reply()?.names;
    let mut table = HashMap::new();
    for name in names {
        let info = conn.query_extension(&name.name)?.reply()?;
        if info.present {
            table.insert(
                info.major_opcode,
                String::from_utf8_lossy(&name.name).into_owned(),
            );
        }
    }
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use x11rb::protocol::ErrorKind;

    fn sample_error() -> X11Error {
        X11Error {
            error_kind: ErrorKind::Window,
            error_code: 3,
            sequence: 9,
            bad_value: 0x2a,
            minor_opcode: 0,
            major_opcode: 12,
            extension_name: None,
            request_name: None,
        }
    }

    #[test]
    fn test_describe_with_table() {
        let mut table = HashMap::new();
        table.insert(12u8, "MIT-SHM".to_string());
        let names = ErrorNames::Table(table);
        let msg = names.describe(&sample_error());
        assert!(msg.contains("MIT-SHM"), "{msg}");
        assert!(msg.contains("Window"), "{msg}");
    }

    #[test]
    fn test_describe_numeric_fallback() {
        let msg = ErrorNames::Numeric.describe(&sample_error());
        assert!(msg.contains("code 3"), "{msg}");
        assert!(msg.contains("12:0"), "{msg}");
    }
}
