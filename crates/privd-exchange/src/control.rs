//! The remote-invocable control object and its publication slot

use privd_core::HandleInfo;
use std::sync::{Arc, RwLock};

/// Operations a peer may invoke on a granted handle.
///
/// `query_status` is called from connection tasks and must return without
/// touching I/O. `request_stop` is fire-and-forget: the reply to the peer has
/// already been written when it runs.
pub trait ControlObject: Send + Sync + 'static {
    fn query_status(&self) -> String;
    fn request_stop(&self);
}

/// A control object together with the handle peers know it by.
#[derive(Clone)]
pub struct Published {
    pub info: HandleInfo,
    pub object: Arc<dyn ControlObject>,
}

impl std::fmt::Debug for Published {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Published").field("info", &self.info).finish()
    }
}

/// Holds at most one published control object.
#[derive(Clone, Default)]
pub struct ControlSlot {
    inner: Arc<RwLock<Option<Published>>>,
}

impl ControlSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace whatever was published, returning the previous handle.
    pub fn set(&self, published: Published) -> Option<HandleInfo> {
        let mut slot = self.inner.write().unwrap_or_else(|e| e.into_inner());
        slot.replace(published).map(|p| p.info)
    }

    pub fn clear(&self) -> Option<HandleInfo> {
        let mut slot = self.inner.write().unwrap_or_else(|e| e.into_inner());
        slot.take().map(|p| p.info)
    }

    pub fn current(&self) -> Option<Published> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// The object behind `id`, if that handle is still the published one.
    pub fn resolve(&self, id: &str) -> Option<Arc<dyn ControlObject>> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .filter(|p| p.info.id == id)
            .map(|p| p.object.clone())
    }
}
