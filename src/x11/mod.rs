//! X11 windowing canvas
//!
//! the controller owns the connection, the surface registry, one event
//! dispatch task, and one drawing task per displayed image. dispatch and
//! drawing meet at the registry (handle lookup must be O(1) against live
//! state), while paint triggers travel over a per-image FIFO so paint
//! order matches protocol event order.

mod conn;
mod geometry;
mod registry;
mod window;

pub use conn::XContext;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};
use x11rb::connection::Connection;
use x11rb::protocol::Event;

use crate::canvas::{Canvas, Placement};
use crate::img::Image;
use crate::term::TermInfo;
use registry::SurfaceRegistry;
use window::{OverlaySurface, SurfaceEvent};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

struct ImageEntry {
    image: Arc<Image>,
    /// None while the image is idle (zero surfaces resolved)
    task: Option<DrawTask>,
}

struct DrawTask {
    events: mpsc::UnboundedSender<SurfaceEvent>,
    handle: JoinHandle<()>,
}

pub struct X11Canvas {
    ctx: Arc<XContext>,
    registry: Arc<SurfaceRegistry>,
    term: TermInfo,
    images: HashMap<String, ImageEntry>,
    visible: bool,
    dispatch: Option<JoinHandle<()>>,
    stop_tx: watch::Sender<bool>,
    lost_rx: watch::Receiver<bool>,
}

impl X11Canvas {
    /// connect and start the event dispatch task; connection failure here
    /// is fatal for the caller
    pub fn new(term: TermInfo) -> Result<X11Canvas> {
        let ctx = Arc::new(XContext::connect()?);
        let registry = Arc::new(SurfaceRegistry::new());
        let (stop_tx, stop_rx) = watch::channel(false);
        let (lost_tx, lost_rx) = watch::channel(false);
        let dispatch = tokio::spawn(dispatch_loop(
            Arc::clone(&ctx),
            Arc::clone(&registry),
            stop_rx,
            lost_tx,
        ));
        Ok(X11Canvas {
            ctx,
            registry,
            term,
            images: HashMap::new(),
            visible: true,
            dispatch: Some(dispatch),
            stop_tx,
            lost_rx,
        })
    }

    /// stop and join one image's drawing task, then tear down its protocol
    /// windows; join strictly precedes destruction so no paint can race a
    /// dead handle
    async fn teardown_image(&mut self, identifier: &str) -> Result<()> {
        let Some(entry) = self.images.remove(identifier) else {
            return Ok(());
        };
        if let Some(task) = entry.task {
            let _ = task.events.send(SurfaceEvent::Shutdown);
            let _ = task.handle.await;
        }
        for surface in self.registry.remove_image(identifier) {
            if let Err(e) = window::destroy_window(&self.ctx, surface.window()) {
                debug!("destroy of {:#x} failed: {e:#}", surface.window());
            }
        }
        self.ctx.conn.flush()?;
        Ok(())
    }
}

impl Canvas for X11Canvas {
    async fn add_image(&mut self, identifier: &str, image: Image, place: Placement) -> Result<()> {
        // replace semantics: the old image and its task go first
        self.teardown_image(identifier).await?;

        let image = Arc::new(image);
        let terminals = geometry::terminal_windows(&self.ctx, &self.term).await?;
        let offset = geometry::cell_offset(&self.term).await;

        let (tx, rx) = mpsc::unbounded_channel();
        let mut surfaces = 0usize;
        for terminal in terminals {
            let Some(rect) = geometry::compute_placement(
                &self.ctx,
                terminal,
                &self.term,
                place,
                offset,
                image.width,
                image.height,
            ) else {
                continue; // terminal vanished mid-query
            };
            match window::create_window(&self.ctx, terminal, rect, self.visible) {
                Ok(win) => {
                    self.registry.insert(
                        identifier,
                        Arc::new(OverlaySurface::new(win, identifier, rect, tx.clone())),
                    );
                    surfaces += 1;
                }
                Err(e) => {
                    warn!("{identifier}: surface on terminal {terminal:#x} failed: {e:#}");
                }
            }
        }
        self.ctx.conn.flush()?;

        let task = if surfaces > 0 {
            let handle = tokio::spawn(draw_loop(
                Arc::clone(&self.ctx),
                Arc::clone(&self.registry),
                identifier.to_owned(),
                Arc::clone(&image),
                rx,
            ));
            Some(DrawTask { events: tx, handle })
        } else {
            // zero surfaces: keep the image idle, a later add re-resolves
            debug!("{identifier}: no terminal surfaces, keeping image idle");
            None
        };
        self.images
            .insert(identifier.to_owned(), ImageEntry { image, task });
        Ok(())
    }

    async fn remove_image(&mut self, identifier: &str) -> Result<()> {
        self.teardown_image(identifier).await
    }

    async fn hide(&mut self) -> Result<()> {
        if !flip_visibility(&mut self.visible, false) {
            return Ok(());
        }
        for surface in self.registry.all() {
            if let Err(e) = window::set_mapped(&self.ctx, surface.window(), false) {
                debug!("unmap of {:#x} failed: {e:#}", surface.window());
            }
        }
        self.ctx.conn.flush()?;
        Ok(())
    }

    async fn show(&mut self) -> Result<()> {
        if !flip_visibility(&mut self.visible, true) {
            return Ok(());
        }
        for surface in self.registry.all() {
            if let Err(e) = window::set_mapped(&self.ctx, surface.window(), true) {
                debug!("map of {:#x} failed: {e:#}", surface.window());
            }
            // mapping redraws via the Expose the server sends back
        }
        self.ctx.conn.flush()?;
        Ok(())
    }

    fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.lost_rx.clone()
    }

    async fn destroy(&mut self) {
        // drawing tasks first, then dispatch, then surfaces; the connection
        // itself drops with self, after everything that could touch it
        let identifiers: Vec<String> = self.images.keys().cloned().collect();
        for identifier in identifiers {
            if let Err(e) = self.teardown_image(&identifier).await {
                debug!("teardown of {identifier} failed: {e:#}");
            }
        }
        let _ = self.stop_tx.send(true);
        if let Some(handle) = self.dispatch.take() {
            let _ = handle.await;
        }
        let _ = self.ctx.conn.flush();
    }
}

/// blocks on the next protocol event and routes it to the owning surface;
/// terminates on connection death, flagging the controller
async fn dispatch_loop(
    ctx: Arc<XContext>,
    registry: Arc<SurfaceRegistry>,
    mut stop: watch::Receiver<bool>,
    lost: watch::Sender<bool>,
) {
    loop {
        if *stop.borrow() {
            break;
        }
        match ctx.conn.poll_for_event() {
            Ok(Some(event)) => route_event(&ctx, &registry, event),
            Ok(None) => {
                tokio::select! {
                    _ = tokio::time::sleep(POLL_INTERVAL) => {}
                    _ = stop.changed() => {}
                }
            }
            Err(e) => {
                error!("X connection lost: {e}");
                let _ = lost.send(true);
                break;
            }
        }
    }
    debug!("event dispatch stopped");
}

fn route_event(ctx: &XContext, registry: &SurfaceRegistry, event: Event) {
    if let Event::Error(err) = &event {
        warn!("{}", ctx.describe_error(err));
        return;
    }
    let Some((window, action)) = classify(&event) else {
        return;
    };
    // an unknown handle means teardown raced ahead of the event queue
    let Some(surface) = registry.lookup(window) else {
        return;
    };
    match action {
        Routed::Exposed => surface.notify(SurfaceEvent::Exposed(window)),
        Routed::Resized(w, h) => {
            surface.resize(w, h);
            surface.notify(SurfaceEvent::Resized(window, w, h));
        }
        Routed::Destroyed => {
            surface.retire();
            surface.notify(SurfaceEvent::Destroyed(window));
        }
    }
}

/// idempotent visibility transition; false means the canvas already was in
/// the requested state and no surface needs touching
fn flip_visibility(visible: &mut bool, want: bool) -> bool {
    if *visible == want {
        return false;
    }
    *visible = want;
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Routed {
    Exposed,
    Resized(u16, u16),
    Destroyed,
}

/// translate a protocol event into a surface notification; events the
/// canvas does not care about map to None
fn classify(event: &Event) -> Option<(u32, Routed)> {
    match event {
        // intermediate expose records are followed by a final count=0 one
        Event::Expose(e) if e.count == 0 => Some((e.window, Routed::Exposed)),
        Event::ConfigureNotify(e) => Some((e.window, Routed::Resized(e.width, e.height))),
        Event::DestroyNotify(e) => Some((e.window, Routed::Destroyed)),
        _ => None,
    }
}

/// one drawing task per image: initial paint over the surface snapshot,
/// then repaints as notifications arrive, until shutdown. surface liveness
/// is re-checked per notification; a failed paint never aborts the
/// remaining surfaces
async fn draw_loop(
    ctx: Arc<XContext>,
    registry: Arc<SurfaceRegistry>,
    identifier: String,
    image: Arc<Image>,
    mut rx: mpsc::UnboundedReceiver<SurfaceEvent>,
) {
    for surface in registry.snapshot(&identifier) {
        if let Err(e) = window::paint(&ctx, &surface, &image) {
            warn!("{identifier}: paint on {:#x} failed: {e:#}", surface.window());
        }
    }
    while let Some(event) = rx.recv().await {
        match event {
            SurfaceEvent::Shutdown => break,
            SurfaceEvent::Exposed(win) | SurfaceEvent::Resized(win, ..) => {
                let Some(surface) = registry.lookup(win) else {
                    continue; // torn down since delivery
                };
                if surface.image_id() != identifier {
                    continue;
                }
                if let Err(e) = window::paint(&ctx, &surface, &image) {
                    warn!("{identifier}: paint on {win:#x} failed: {e:#}");
                }
            }
            SurfaceEvent::Destroyed(win) => {
                debug!("{identifier}: surface {win:#x} destroyed externally");
            }
        }
    }
    debug!("{identifier}: drawing task stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use x11rb::protocol::xproto::{ConfigureNotifyEvent, DestroyNotifyEvent, ExposeEvent};

    fn expose(window: u32, count: u16) -> Event {
        Event::Expose(ExposeEvent {
            response_type: 12,
            sequence: 0,
            window,
            x: 0,
            y: 0,
            width: 10,
            height: 10,
            count,
        })
    }

    #[test]
    fn test_classify_final_expose() {
        assert_eq!(classify(&expose(7, 0)), Some((7, Routed::Exposed)));
    }

    #[test]
    fn test_classify_skips_partial_expose() {
        assert_eq!(classify(&expose(7, 3)), None);
    }

    #[test]
    fn test_classify_configure() {
        let ev = Event::ConfigureNotify(ConfigureNotifyEvent {
            response_type: 22,
            sequence: 0,
            event: 7,
            window: 7,
            above_sibling: 0,
            x: 10,
            y: 20,
            width: 50,
            height: 50,
            border_width: 0,
            override_redirect: true,
        });
        assert_eq!(classify(&ev), Some((7, Routed::Resized(50, 50))));
    }

    #[test]
    fn test_classify_destroy() {
        let ev = Event::DestroyNotify(DestroyNotifyEvent {
            response_type: 17,
            sequence: 0,
            event: 7,
            window: 7,
        });
        assert_eq!(classify(&ev), Some((7, Routed::Destroyed)));
    }

    #[test]
    fn test_show_when_already_visible_is_noop() {
        let mut visible = true;
        assert!(!flip_visibility(&mut visible, true));
        assert!(visible);
    }

    #[test]
    fn test_hide_twice_flips_once() {
        let mut visible = true;
        assert!(flip_visibility(&mut visible, false));
        assert!(!flip_visibility(&mut visible, false));
        assert!(!visible);
        assert!(flip_visibility(&mut visible, true));
        assert!(visible);
    }

    #[test]
    fn test_classify_ignores_unrelated() {
        use x11rb::protocol::xproto::MappingNotifyEvent;
        let ev = Event::MappingNotify(MappingNotifyEvent {
            response_type: 34,
            sequence: 0,
            request: x11rb::protocol::xproto::Mapping::POINTER,
            first_keycode: 0,
            count: 0,
        });
        assert_eq!(classify(&ev), None);
    }
}
