//! Host adapter
//!
//! Everything the template needs from the operating environment goes through
//! [`Host`]: who we are running as, where privileged lookups come from, how
//! the process is named, how it learns it should stop and how it ends.

use super::registry::{IdentityRegistry, PackagesList, PasswdRegistry, StaticRegistry};
use privd_core::{Error, Result};
use std::sync::{Arc, Mutex};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{debug, info, warn};

/// Callback run once when the host asks the process to stop.
pub type ShutdownHook = Box<dyn FnOnce() + Send + 'static>;

pub trait Host: Send + Sync + 'static {
    fn effective_uid(&self) -> u32;

    fn pid(&self) -> u32;

    /// Best effort; failures are logged, never returned.
    fn set_process_name(&self, name: &str);

    /// Acquire the privileged owner registry.
    fn identity_registry(&self) -> Result<Arc<dyn IdentityRegistry>>;

    fn install_shutdown_hook(&self, hook: ShutdownHook) -> Result<()>;

    /// End the process with `status`. Hosts that embed the template may
    /// record the status and return instead.
    fn terminate(&self, status: i32);
}

/// The real process.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemHost;

impl Host for SystemHost {
    fn effective_uid(&self) -> u32 {
        nix::unistd::geteuid().as_raw()
    }

    fn pid(&self) -> u32 {
        std::process::id()
    }

    #[cfg(target_os = "linux")]
    fn set_process_name(&self, name: &str) {
        let name = truncate_comm(name);
        match std::ffi::CString::new(name) {
            Ok(cname) => {
                if let Err(e) = nix::sys::prctl::set_name(&cname) {
                    warn!("cannot set process name to {}: {}", name, e);
                }
            }
            Err(e) => warn!("invalid process name {:?}: {}", name, e),
        }
    }

    #[cfg(not(target_os = "linux"))]
    fn set_process_name(&self, name: &str) {
        debug!("process renaming unsupported on this platform, keeping name for {}", name);
    }

    fn identity_registry(&self) -> Result<Arc<dyn IdentityRegistry>> {
        let packages = PackagesList::system();
        if packages.exists() {
            debug!("owner lookups via {}", packages.path().display());
            Ok(Arc::new(packages))
        } else {
            debug!("owner lookups via the account database");
            Ok(Arc::new(PasswdRegistry))
        }
    }

    fn install_shutdown_hook(&self, hook: ShutdownHook) -> Result<()> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        // Registration needs a runtime context; do it here so failures surface
        // to the caller.
        let (mut term, mut int, mut hup) = {
            let _guard = runtime.enter();
            (
                signal(SignalKind::terminate())?,
                signal(SignalKind::interrupt())?,
                signal(SignalKind::hangup())?,
            )
        };
        std::thread::Builder::new()
            .name("shutdown-hook".into())
            .spawn(move || {
                let name = runtime.block_on(async {
                    tokio::select! {
                        _ = term.recv() => "SIGTERM",
                        _ = int.recv() => "SIGINT",
                        _ = hup.recv() => "SIGHUP",
                    }
                });
                info!("received {}, shutting down", name);
                hook();
            })?;
        Ok(())
    }

    fn terminate(&self, status: i32) {
        std::process::exit(status);
    }
}

/// `comm` holds 15 bytes plus the terminator.
fn truncate_comm(name: &str) -> &str {
    const MAX: usize = 15;
    if name.len() <= MAX {
        return name;
    }
    let mut end = MAX;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    &name[..end]
}

/// A host with a fixed identity for running the template inside another
/// process. `terminate` records the status and returns, which lets
/// `ServerTemplate::run` hand the status back to its caller.
pub struct StaticHost {
    uid: u32,
    pid: u32,
    registry: Option<Arc<dyn IdentityRegistry>>,
    process_name: Mutex<Option<String>>,
    shutdown_hook: Mutex<Option<ShutdownHook>>,
    terminations: Mutex<Vec<i32>>,
}

impl StaticHost {
    pub fn new(uid: u32) -> Self {
        Self {
            uid,
            pid: std::process::id(),
            registry: Some(Arc::new(StaticRegistry::new())),
            process_name: Mutex::new(None),
            shutdown_hook: Mutex::new(None),
            terminations: Mutex::new(Vec::new()),
        }
    }

    pub fn with_registry(mut self, registry: impl IdentityRegistry + 'static) -> Self {
        self.registry = Some(Arc::new(registry));
        self
    }

    /// Registry acquisition fails, as when the privileged service is absent.
    pub fn without_registry(mut self) -> Self {
        self.registry = None;
        self
    }

    pub fn process_name(&self) -> Option<String> {
        lock(&self.process_name).clone()
    }

    /// Every status passed to `terminate`, oldest first.
    pub fn terminations(&self) -> Vec<i32> {
        lock(&self.terminations).clone()
    }

    /// Deliver a stop request the way a signal would. Returns `false` when
    /// no hook is installed or it already ran.
    pub fn trigger_shutdown(&self) -> bool {
        let hook = lock(&self.shutdown_hook).take();
        match hook {
            Some(hook) => {
                hook();
                true
            }
            None => false,
        }
    }
}

impl Host for StaticHost {
    fn effective_uid(&self) -> u32 {
        self.uid
    }

    fn pid(&self) -> u32 {
        self.pid
    }

    fn set_process_name(&self, name: &str) {
        *lock(&self.process_name) = Some(name.to_string());
    }

    fn identity_registry(&self) -> Result<Arc<dyn IdentityRegistry>> {
        self.registry
            .clone()
            .ok_or_else(|| Error::Internal("identity registry unavailable".into()))
    }

    fn install_shutdown_hook(&self, hook: ShutdownHook) -> Result<()> {
        *lock(&self.shutdown_hook) = Some(hook);
        Ok(())
    }

    fn terminate(&self, status: i32) {
        debug!("terminate({}) recorded", status);
        lock(&self.terminations).push(status);
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}
