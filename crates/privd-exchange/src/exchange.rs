//! What a service publishes and what peers can fetch

use crate::control::{ControlObject, ControlSlot, Published};
use crate::notify::Notifier;
use privd_core::{HandleInfo, Notification};
use std::os::unix::net::UnixStream;
use std::sync::{Arc, Mutex};
use tracing::info;

struct Inner {
    server_name: String,
    pid: u32,
    slot: ControlSlot,
    notifier: Notifier,
    // Serializes publish/retract/subscribe so a subscriber never misses a transition.
    transition: Mutex<()>,
}

/// Shared between the service logic that publishes and the server that hands out handles.
#[derive(Clone)]
pub struct ControlExchange {
    inner: Arc<Inner>,
}

impl ControlExchange {
    pub fn new(server_name: impl Into<String>) -> Self {
        Self::with_pid(server_name, std::process::id())
    }

    pub fn with_pid(server_name: impl Into<String>, pid: u32) -> Self {
        Self {
            inner: Arc::new(Inner {
                server_name: server_name.into(),
                pid,
                slot: ControlSlot::new(),
                notifier: Notifier::new(),
                transition: Mutex::new(()),
            }),
        }
    }

    pub fn server_name(&self) -> &str {
        &self.inner.server_name
    }

    /// Publish `object` under a fresh handle and announce it as running.
    pub fn publish(&self, object: Arc<dyn ControlObject>) -> HandleInfo {
        let _guard = self.lock_transition();
        let info = HandleInfo::new(self.inner.server_name.clone(), self.inner.pid);
        self.inner.slot.set(Published {
            info: info.clone(),
            object,
        });
        let delivered = self.inner.notifier.announce(&Notification::Running {
            handle: info.clone(),
        });
        info!(
            "published control handle {} ({} subscribers notified)",
            info.id, delivered
        );
        info
    }

    /// Withdraw the published object and announce the service as stopped.
    /// Safe to call repeatedly.
    pub fn retract(&self) -> Option<HandleInfo> {
        let _guard = self.lock_transition();
        let previous = self.inner.slot.clear();
        let delivered = self.inner.notifier.announce(&Notification::Stopped);
        if let Some(info) = &previous {
            info!(
                "retracted control handle {} ({} subscribers notified)",
                info.id, delivered
            );
        }
        previous
    }

    pub fn current(&self) -> Option<HandleInfo> {
        self.inner.slot.current().map(|p| p.info)
    }

    pub fn is_published(&self) -> bool {
        self.inner.slot.current().is_some()
    }

    pub fn resolve(&self, id: &str) -> Option<Arc<dyn ControlObject>> {
        self.inner.slot.resolve(id)
    }

    /// Register a subscriber; it immediately receives the current state.
    pub fn subscribe(&self, stream: UnixStream, uid: Option<u32>) -> std::io::Result<()> {
        let _guard = self.lock_transition();
        let initial = match self.inner.slot.current() {
            Some(p) => Notification::Running { handle: p.info },
            None => Notification::Stopped,
        };
        self.inner.notifier.add(stream, uid, &initial)
    }

    /// Live subscribers; peers that have hung up are dropped first.
    pub fn subscriber_count(&self) -> usize {
        self.inner.notifier.prune()
    }

    fn lock_transition(&self) -> std::sync::MutexGuard<'_, ()> {
        self.inner
            .transition
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }
}
