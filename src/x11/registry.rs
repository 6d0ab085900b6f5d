//! surface registry
//!
//! two views over the same ownership: window handle → surface for event
//! dispatch, image identifier → surfaces for per-image operations. both
//! views mutate under one lock, and the lock never outlives a map
//! operation — protocol I/O happens strictly outside it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::window::OverlaySurface;

#[derive(Default)]
pub struct SurfaceRegistry {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    by_handle: HashMap<u32, Arc<OverlaySurface>>,
    by_image: HashMap<String, Vec<Arc<OverlaySurface>>>,
}

impl SurfaceRegistry {
    pub fn new() -> SurfaceRegistry {
        SurfaceRegistry::default()
    }

    pub fn insert(&self, identifier: &str, surface: Arc<OverlaySurface>) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .by_handle
            .insert(surface.window(), Arc::clone(&surface));
        inner
            .by_image
            .entry(identifier.to_owned())
            .or_default()
            .push(surface);
    }

    /// detach every surface owned by `identifier` and hand them back for
    /// protocol teardown; their handles are unknown to dispatch the moment
    /// this returns
    pub fn remove_image(&self, identifier: &str) -> Vec<Arc<OverlaySurface>> {
        let mut inner = self.inner.lock().unwrap();
        let surfaces = inner.by_image.remove(identifier).unwrap_or_default();
        for surface in &surfaces {
            surface.retire();
            inner.by_handle.remove(&surface.window());
        }
        surfaces
    }

    /// dispatch lookup; an unknown handle is an expected race with teardown,
    /// not an error
    pub fn lookup(&self, window: u32) -> Option<Arc<OverlaySurface>> {
        self.inner.lock().unwrap().by_handle.get(&window).cloned()
    }

    /// immutable snapshot of an image's surfaces for one drawing pass
    pub fn snapshot(&self, identifier: &str) -> Vec<Arc<OverlaySurface>> {
        self.inner
            .lock()
            .unwrap()
            .by_image
            .get(identifier)
            .cloned()
            .unwrap_or_default()
    }

    /// every live surface, for whole-canvas visibility flips
    pub fn all(&self) -> Vec<Arc<OverlaySurface>> {
        self.inner
            .lock()
            .unwrap()
            .by_handle
            .values()
            .cloned()
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().by_handle.is_empty()
    }

    /// both views agree on the set of live handles
    #[cfg(test)]
    fn consistent(&self) -> bool {
        use std::collections::HashSet;
        let inner = self.inner.lock().unwrap();
        let handles: HashSet<u32> = inner.by_handle.keys().copied().collect();
        let from_images: HashSet<u32> = inner
            .by_image
            .values()
            .flatten()
            .map(|s| s.window())
            .collect();
        handles == from_images
    }
}
