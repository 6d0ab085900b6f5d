//! overlay surfaces
//!
//! one surface is one override-redirect child window of a terminal window.
//! pixel uploads go through MIT-SHM when the connection supports it and
//! fall back to chunked core PutImage otherwise; a failed paint is
//! contained to the surface it targeted.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use anyhow::{Context, Result};
use tokio::sync::mpsc::UnboundedSender;
use x11rb::connection::{Connection, RequestConnection};
use x11rb::protocol::shm::ConnectionExt as _;
use x11rb::protocol::xproto::{
    ConnectionExt as _, CreateGCAux, CreateWindowAux, EventMask, ImageFormat, WindowClass,
};

use super::conn::XContext;
use super::geometry::PixelRect;
use crate::img::Image;

// request header slack when splitting PutImage under the server limit
const REQUEST_SLACK: usize = 1024;

/// notification delivered to an image's drawing task, in protocol event
/// order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceEvent {
    Exposed(u32),
    Resized(u32, u16, u16),
    Destroyed(u32),
    Shutdown,
}

pub struct OverlaySurface {
    window: u32,
    image: String,
    rect: Mutex<PixelRect>,
    alive: AtomicBool,
    events: UnboundedSender<SurfaceEvent>,
}

impl OverlaySurface {
    pub fn new(
        window: u32,
        image: &str,
        rect: PixelRect,
        events: UnboundedSender<SurfaceEvent>,
    ) -> OverlaySurface {
        OverlaySurface {
            window,
            image: image.to_owned(),
            rect: Mutex::new(rect),
            alive: AtomicBool::new(true),
            events,
        }
    }

    pub fn window(&self) -> u32 {
        self.window
    }

    pub fn image_id(&self) -> &str {
        &self.image
    }

    pub fn rect(&self) -> PixelRect {
        *self.rect.lock().unwrap()
    }

    pub fn resize(&self, width: u16, height: u16) {
        let mut rect = self.rect.lock().unwrap();
        rect.width = width;
        rect.height = height;
    }

    pub fn alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// logically removed; dispatch and drawing skip it from here on
    pub fn retire(&self) {
        self.alive.store(false, Ordering::Release);
    }

    /// deliver a notification; a drawing task that is already gone just
    /// drops it
    pub fn notify(&self, event: SurfaceEvent) {
        let _ = self.events.send(event);
    }
}

/// create the protocol window backing a surface, mapped unless the canvas
/// is currently hidden
pub fn create_window(ctx: &XContext, parent: u32, rect: PixelRect, mapped: bool) -> Result<u32> {
    let wid = ctx.conn.generate_id()?;
    let aux = CreateWindowAux::new()
        .override_redirect(1)
        .background_pixel(ctx.screen.black_pixel)
        .event_mask(EventMask::EXPOSURE | EventMask::STRUCTURE_NOTIFY);
    ctx.conn
        .create_window(
            x11rb::COPY_DEPTH_FROM_PARENT,
            wid,
            parent,
            rect.x,
            rect.y,
            rect.width.max(1),
            rect.height.max(1),
            0,
            WindowClass::INPUT_OUTPUT,
            x11rb::COPY_FROM_PARENT,
            &aux,
        )
        .context("CreateWindow failed")?;
    if mapped {
        ctx.conn.map_window(wid)?;
    }
    Ok(wid)
}

pub fn destroy_window(ctx: &XContext, window: u32) -> Result<()> {
    ctx.conn.destroy_window(window)?;
    Ok(())
}

pub fn set_mapped(ctx: &XContext, window: u32, mapped: bool) -> Result<()> {
    if mapped {
        ctx.conn.map_window(window)?;
    } else {
        ctx.conn.unmap_window(window)?;
    }
    Ok(())
}

/// paint `image` into the surface's current rectangle, cropped to fit
pub fn paint(ctx: &XContext, surface: &OverlaySurface, image: &Image) -> Result<()> {
    if !surface.alive() {
        return Ok(());
    }
    let rect = surface.rect();
    let w = image.width.min(rect.width as u32) as u16;
    let h = image.height.min(rect.height as u32) as u16;
    if w == 0 || h == 0 {
        return Ok(());
    }
    let data = image.cropped(w as u32, h as u32);

    let gc = ctx.conn.generate_id()?;
    ctx.conn
        .create_gc(gc, surface.window(), &CreateGCAux::new().graphics_exposures(0))?;
    let result = if ctx.shm_available {
        put_shm(ctx, surface.window(), gc, w, h, &data)
    } else {
        put_core(ctx, surface.window(), gc, w, h, &data)
    };
    ctx.conn.free_gc(gc)?;
    ctx.conn.flush()?;
    result
}

/// unaccelerated path: split rows so each PutImage stays under the server's
/// request length limit
fn put_core(ctx: &XContext, drawable: u32, gc: u32, w: u16, h: u16, data: &[u8]) -> Result<()> {
    let row_bytes = w as usize * 4;
    let budget = ctx.conn.maximum_request_bytes().saturating_sub(REQUEST_SLACK);
    let max_rows = (budget / row_bytes).clamp(1, u16::MAX as usize) as u16;
    let mut y = 0u16;
    while y < h {
        let rows = max_rows.min(h - y);
        let start = y as usize * row_bytes;
        let end = start + rows as usize * row_bytes;
        ctx.conn
            .put_image(
                ImageFormat::Z_PIXMAP,
                drawable,
                gc,
                w,
                rows,
                0,
                y as i16,
                0,
                ctx.screen.root_depth,
                &data[start..end],
            )
            .context("PutImage failed")?;
        y += rows;
    }
    Ok(())
}

/// accelerated path: one shared-memory segment per upload, detached once
/// the server has copied it out
fn put_shm(ctx: &XContext, drawable: u32, gc: u32, w: u16, h: u16, data: &[u8]) -> Result<()> {
    let mut segment = ShmSegment::new(data.len())?;
    segment.bytes_mut().copy_from_slice(data);

    let shmseg = ctx.conn.generate_id()?;
    ctx.conn
        .shm_attach(shmseg, segment.id() as u32, false)
        .context("ShmAttach failed")?;
    // the server holds the segment from here; detach runs whether or not
    // the upload went through, else a failed put leaves it attached forever
    let put = shm_upload(ctx, drawable, gc, w, h, shmseg);
    let detach = ctx.conn.shm_detach(shmseg);
    put?;
    detach?;
    // round-trip so the server has copied the pixels before the segment
    // unmaps on drop
    ctx.conn.get_input_focus()?.reply()?;
    Ok(())
}

fn shm_upload(ctx: &XContext, drawable: u32, gc: u32, w: u16, h: u16, shmseg: u32) -> Result<()> {
    ctx.conn
        .shm_put_image(
            drawable,
            gc,
            w,
            h,
            0,
            0,
            w,
            h,
            0,
            0,
            ctx.screen.root_depth,
            ImageFormat::Z_PIXMAP.into(),
            false,
            shmseg,
            0,
        )
        .context("ShmPutImage failed")?;
    Ok(())
}

/// System V shared memory segment, removed as soon as both sides detach
struct ShmSegment {
    id: i32,
    addr: *mut u8,
    size: usize,
}

impl ShmSegment {
    fn new(size: usize) -> Result<ShmSegment> {
        unsafe {
            let id = libc::shmget(libc::IPC_PRIVATE, size, libc::IPC_CREAT | 0o600);
            if id < 0 {
                return Err(std::io::Error::last_os_error()).context("shmget failed");
            }
            let addr = libc::shmat(id, std::ptr::null(), 0);
            // mark for removal now so the id cannot leak even if we crash
            libc::shmctl(id, libc::IPC_RMID, std::ptr::null_mut());
            if addr as isize == -1 {
                return Err(std::io::Error::last_os_error()).context("shmat failed");
            }
            Ok(ShmSegment {
                id,
                addr: addr as *mut u8,
                size,
            })
        }
    }

    fn id(&self) -> i32 {
        self.id
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.addr, self.size) }
    }
}

impl Drop for ShmSegment {
    fn drop(&mut self) {
        unsafe {
            libc::shmdt(self.addr as *const libc::c_void);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn rect(w: u16, h: u16) -> PixelRect {
        PixelRect {
            x: 0,
            y: 0,
            width: w,
            height: h,
        }
    }

    #[test]
    fn test_surface_resize_keeps_origin() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let s = OverlaySurface::new(
            1,
            "a",
            PixelRect {
                x: 10,
                y: 20,
                width: 100,
                height: 100,
            },
            tx,
        );
        s.resize(50, 50);
        assert_eq!(s.rect(), PixelRect { x: 10, y: 20, width: 50, height: 50 });
    }

    #[test]
    fn test_retire_is_sticky() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let s = OverlaySurface::new(1, "a", rect(10, 10), tx);
        assert!(s.alive());
        s.retire();
        s.retire();
        assert!(!s.alive());
    }

    #[test]
    fn test_notify_delivers_in_order() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let s = OverlaySurface::new(3, "a", rect(10, 10), tx);
        s.notify(SurfaceEvent::Exposed(3));
        s.notify(SurfaceEvent::Resized(3, 5, 5));
        assert_eq!(rx.try_recv().unwrap(), SurfaceEvent::Exposed(3));
        assert_eq!(rx.try_recv().unwrap(), SurfaceEvent::Resized(3, 5, 5));
    }

    #[test]
    fn test_notify_without_task_is_silent() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let s = OverlaySurface::new(3, "a", rect(10, 10), tx);
        s.notify(SurfaceEvent::Exposed(3)); // must not panic
    }

    #[test]
    fn test_shm_segment_roundtrip() {
        let mut seg = ShmSegment::new(64).unwrap();
        seg.bytes_mut().fill(0xab);
        assert!(seg.bytes_mut().iter().all(|&b| b == 0xab));
        assert!(seg.id() >= 0);
    }
}
