//! rendering backend contract
//!
//! every backend that can lay images over the terminal sits behind this
//! trait; the X11 windowing canvas is the one implemented in this crate,
//! in-band graphics backends plug in at the same seam.

use anyhow::Result;
use tokio::sync::watch;

use crate::img::Image;

/// cell-grid placement for an overlay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Placement {
    pub col: u32,
    pub row: u32,
}

#[allow(async_fn_in_trait)]
pub trait Canvas {
    /// display `image` at `place`; an existing image under the same
    /// identifier is replaced, surfaces and all
    async fn add_image(&mut self, identifier: &str, image: Image, place: Placement) -> Result<()>;

    /// tear down one image and its surfaces; unknown identifiers are a no-op
    async fn remove_image(&mut self, identifier: &str) -> Result<()>;

    /// unmap every surface, keeping layout state; idempotent
    async fn hide(&mut self) -> Result<()>;

    /// undo [`hide`](Canvas::hide) without re-resolving geometry; idempotent
    async fn show(&mut self) -> Result<()>;

    /// fires `true` when the backend can no longer continue, e.g. its
    /// display connection died
    fn shutdown_signal(&self) -> watch::Receiver<bool>;

    /// stop every task and release every protocol resource; the canvas is
    /// unusable afterwards
    async fn destroy(&mut self);
}
