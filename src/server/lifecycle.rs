//! Service lifecycle
//!
//! [`ServerTemplate::run`] walks a service through
//! `UNSTARTED -> GATING -> INITIALIZING -> RUNNING -> STOPPING -> TERMINATED`:
//!
//! 1. The identity gate checks the effective uid against the allow-list,
//!    before or after `on_create` depending on [`GateOrder`].
//! 2. The calling thread names the process, opens the logger, installs the
//!    panic hook, acquires the owner registry, resolves the impersonated
//!    identity and installs the shutdown hook.
//! 3. `on_start` runs on a `<name>-start` thread while the calling thread
//!    becomes the main thread and drains the dispatch queue.
//! 4. [`ServerContext::exit`] runs the stop path once and terminates.

use super::context::{resolve_identity, ExecutionContext, ProcessContext};
use super::crash::CrashRoute;
use super::dispatch::{DispatchLoop, MainThread};
use super::gate::{check_identity, rejection_message};
use super::host::Host;
use super::log::{Logger, LoggerOptions, SystemClock};
use super::registry::IdentityRegistry;
use privd_core::{
    GateOrder, ImpersonationDescriptor, ImpersonationMode, LifecycleState, ServerArgs,
    ServiceIdentity, FATAL_EXIT_STATUS,
};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info};

/// Service logic plugged into the template.
pub trait Service: Send + Sync + 'static {
    /// Main thread, before the logger exists.
    fn on_create(&self) {}

    /// Background `<name>-start` thread. May block for the life of the service.
    fn on_start(&self, ctx: &Arc<ServerContext>);

    /// Runs once on the way out, whoever triggered the stop. Must not call
    /// [`ServerContext::exit`].
    fn on_stop(&self, _ctx: &ServerContext) {}
}

/// Lifecycle state of one run, created before the gate and shared with the
/// context and the crash route.
pub(super) struct StateCell {
    server: String,
    state: Mutex<LifecycleState>,
}

impl StateCell {
    pub(super) fn new(server: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            state: Mutex::new(LifecycleState::Unstarted),
        }
    }

    pub(super) fn get(&self) -> LifecycleState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(super) fn set(&self, next: LifecycleState) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        // No way back from a terminal state
        if state.is_terminal() && !next.is_terminal() {
            debug!(server = %self.server, "ignoring {} while {}", next.as_str(), state.as_str());
            return;
        }
        if *state != next {
            debug!(server = %self.server, "{} -> {}", state.as_str(), next.as_str());
            *state = next;
        }
    }
}

/// What the template has gathered by the time the context is built.
pub(super) struct Bootstrap {
    pub(super) identity: ServiceIdentity,
    pub(super) state: Arc<StateCell>,
    pub(super) logger: Arc<Logger>,
    pub(super) registry: Option<Arc<dyn IdentityRegistry>>,
    pub(super) impersonation: Option<ImpersonationDescriptor>,
}

/// Process-scoped state shared by the template, the service and the crash
/// handler.
pub struct ServerContext {
    args: ServerArgs,
    pub(super) host: Arc<dyn Host>,
    service: Arc<dyn Service>,
    pub(super) logger: Arc<Logger>,
    pub(super) main: MainThread,
    identity: ServiceIdentity,
    state: Arc<StateCell>,
    registry: Option<Arc<dyn IdentityRegistry>>,
    impersonation: Option<ImpersonationDescriptor>,
    process: ProcessContext,
    pub(super) crash_guard: AtomicBool,
    stopped: Mutex<bool>,
}

impl ServerContext {
    pub(super) fn new(
        args: ServerArgs,
        host: Arc<dyn Host>,
        service: Arc<dyn Service>,
        main: MainThread,
        boot: Bootstrap,
    ) -> Self {
        let process = ProcessContext::new(boot.identity.numeric_id(), args.server_name());
        Self {
            args,
            host,
            service,
            logger: boot.logger,
            main,
            identity: boot.identity,
            state: boot.state,
            registry: boot.registry,
            impersonation: boot.impersonation,
            process,
            crash_guard: AtomicBool::new(false),
            stopped: Mutex::new(false),
        }
    }

    pub fn args(&self) -> &ServerArgs {
        &self.args
    }

    pub fn server_name(&self) -> &str {
        self.args.server_name()
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    pub fn host(&self) -> &Arc<dyn Host> {
        &self.host
    }

    /// The uid that passed the gate, with the allow-list it was checked against.
    pub fn identity(&self) -> &ServiceIdentity {
        &self.identity
    }

    pub fn registry(&self) -> Option<&Arc<dyn IdentityRegistry>> {
        self.registry.as_ref()
    }

    /// The resolved identity, if impersonation ran and succeeded.
    pub fn impersonation(&self) -> Option<&ImpersonationDescriptor> {
        self.impersonation.as_ref()
    }

    /// Context privileged calls should be made with: the impersonated
    /// identity when there is one, the process itself otherwise.
    pub fn execution_context(&self) -> &dyn ExecutionContext {
        match &self.impersonation {
            Some(desc) => desc,
            None => &self.process,
        }
    }

    pub fn main_thread(&self) -> &MainThread {
        &self.main
    }

    pub fn is_main_thread(&self) -> bool {
        self.main.is_main_thread()
    }

    pub fn run_on_main_thread<F>(&self, task: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.main.run_on_main_thread(task)
    }

    pub fn state(&self) -> LifecycleState {
        self.state.get()
    }

    /// Lifecycle state name, `"running"` while the service is up.
    pub fn status(&self) -> &'static str {
        self.state().as_str()
    }

    pub(super) fn set_state(&self, next: LifecycleState) {
        self.state.set(next);
    }

    /// Run the stop path, then terminate with `status`.
    pub fn exit(&self, status: i32) {
        self.stop();
        self.set_state(LifecycleState::Terminated);
        info!(server = %self.args.server_name(), "exiting with status {}", status);
        self.host.terminate(status);
        self.main.quit(status);
    }

    /// `on_stop`, the `onStop` record and logger close, at most once.
    /// Concurrent callers wait for the first to finish.
    fn stop(&self) {
        let mut stopped = self.stopped.lock().unwrap_or_else(|e| e.into_inner());
        if *stopped {
            return;
        }
        *stopped = true;
        if self.state() != LifecycleState::Crashing {
            self.set_state(LifecycleState::Stopping);
        }
        self.service.on_stop(self);
        self.logger.info("onStop");
        self.logger.close();
    }
}

impl std::fmt::Debug for ServerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerContext")
            .field("server", &self.args.server_name())
            .field("state", &self.state())
            .field("impersonation", &self.impersonation)
            .finish()
    }
}

/// Bootstraps a [`Service`] under a [`Host`].
pub struct ServerTemplate {
    args: ServerArgs,
    service: Arc<dyn Service>,
    host: Arc<dyn Host>,
    logger_options: LoggerOptions,
}

impl ServerTemplate {
    pub fn new(args: ServerArgs, service: Arc<dyn Service>, host: Arc<dyn Host>) -> Self {
        Self {
            args,
            service,
            host,
            logger_options: LoggerOptions::default(),
        }
    }

    pub fn with_logger_options(mut self, options: LoggerOptions) -> Self {
        self.logger_options = options;
        self
    }

    /// Run the service to completion on the calling thread, which becomes the
    /// main thread. Returns the exit status when the host lets `terminate`
    /// return.
    pub fn run(self) -> i32 {
        let name = self.args.server_name().to_string();
        let state = Arc::new(StateCell::new(name.clone()));
        let identity = ServiceIdentity::new(
            self.host.effective_uid(),
            self.args.allowed_uids().iter().copied(),
        );
        state.set(LifecycleState::Gating);
        debug!(server = %name, "gating uid {}", identity.numeric_id());

        match self.args.gate_order() {
            GateOrder::BeforeCreate => {
                if let Some(status) = self.gate(&identity, &state) {
                    return status;
                }
                self.service.on_create();
            }
            GateOrder::AfterCreate => {
                self.service.on_create();
                if let Some(status) = self.gate(&identity, &state) {
                    return status;
                }
            }
        }

        state.set(LifecycleState::Initializing);
        self.host.set_process_name(&name);
        let logger = Arc::new(match self.args.log_dir() {
            Some(dir) if self.args.enable_logger() => {
                Logger::with_clock(name.clone(), dir, Arc::new(SystemClock), self.logger_options)
            }
            _ => Logger::disabled(),
        });
        let crash_route = CrashRoute::new(self.host.clone(), logger.clone(), state.clone());
        crash_route.install();

        let registry = match self.host.identity_registry() {
            Ok(registry) => Some(registry),
            Err(e) => {
                logger.error_fmt(format_args!("cannot acquire identity registry: {}", e));
                None
            }
        };

        let uid = identity.numeric_id();
        let impersonation = match self.impersonate(uid, registry.as_deref(), &logger) {
            Ok(desc) => desc,
            Err(status) => {
                state.set(LifecycleState::Terminated);
                logger.close();
                self.host.terminate(status);
                return status;
            }
        };

        let (main, dispatch) = DispatchLoop::new();
        let ctx = Arc::new(ServerContext::new(
            self.args.clone(),
            self.host.clone(),
            self.service.clone(),
            main,
            Bootstrap {
                identity,
                state,
                logger,
                registry,
                impersonation,
            },
        ));
        crash_route.attach(&ctx);

        let weak = Arc::downgrade(&ctx);
        let hook = Box::new(move || {
            if let Some(ctx) = weak.upgrade() {
                ctx.exit(0);
            }
        });
        if let Err(e) = self.host.install_shutdown_hook(hook) {
            ctx.logger
                .warn_fmt(format_args!("shutdown hook not installed: {}", e));
        }

        ctx.set_state(LifecycleState::Running);
        if ctx.state() != LifecycleState::Running {
            // Stopped while initializing
            let status = dispatch.run();
            drop(ctx);
            return status;
        }
        let start_ctx = ctx.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("{}-start", name))
            .spawn(move || {
                start_ctx.logger.info("onStart");
                let service = start_ctx.service.clone();
                service.on_start(&start_ctx);
                debug!(server = %start_ctx.server_name(), "on_start returned");
            });
        if let Err(e) = spawned {
            error!(server = %name, "cannot spawn start thread: {}", e);
            ctx.logger
                .error_fmt(format_args!("cannot spawn start thread: {}", e));
            ctx.exit(FATAL_EXIT_STATUS);
        }

        let status = dispatch.run();
        debug!(server = %name, "main thread released with status {}", status);
        drop(ctx);
        status
    }

    /// `Some(status)` when the process must end here.
    fn gate(&self, identity: &ServiceIdentity, state: &StateCell) -> Option<i32> {
        match check_identity(identity) {
            Ok(()) => None,
            Err(e) => {
                eprintln!("{}", rejection_message(identity));
                error!("{}", e);
                state.set(LifecycleState::Terminated);
                self.host.terminate(FATAL_EXIT_STATUS);
                Some(FATAL_EXIT_STATUS)
            }
        }
    }

    fn impersonate(
        &self,
        uid: u32,
        registry: Option<&dyn IdentityRegistry>,
        logger: &Logger,
    ) -> std::result::Result<Option<ImpersonationDescriptor>, i32> {
        let mode = self.args.impersonation();
        if mode == ImpersonationMode::Disabled {
            return Ok(None);
        }
        let resolved = match registry {
            Some(registry) => resolve_identity(uid, registry),
            None => Err(privd_core::Error::lookup_failed(uid, "no identity registry")),
        };
        match resolved {
            Ok(desc) => {
                logger.info_fmt(format_args!("impersonating {}", desc));
                Ok(Some(desc))
            }
            Err(e) if mode == ImpersonationMode::Required => {
                logger.error_fmt(format_args!("impersonation required but failed: {}", e));
                eprintln!("Cannot resolve the owner of uid {}: {}", uid, e);
                Err(FATAL_EXIT_STATUS)
            }
            Err(e) => {
                logger.error_fmt(format_args!("impersonation unavailable: {}", e));
                Ok(None)
            }
        }
    }
}
