//! One-shot crash handling
//!
//! The hook goes in as soon as the logger exists. Until the context is built
//! a panic is reported by the panicking thread itself; after that, the first
//! panic on any thread gets a crash report written by a dedicated thread,
//! followed by the normal stop path and exit 255. A panic while either is in
//! progress takes the fast path: terminate 255, nothing else.

use super::host::Host;
use super::lifecycle::{ServerContext, StateCell};
use super::log::Logger;
use privd_core::{LifecycleState, FATAL_EXIT_STATUS};
use std::backtrace::Backtrace;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::thread::JoinHandle;

/// Header of the single ERROR record a crash produces.
pub const CRASH_HEADER: &str = "** Program Crashed ! **";

/// What went wrong, and where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaultReport {
    pub thread_name: String,
    pub thread_id: String,
    pub description: String,
}

impl FaultReport {
    /// Attribute `description` to the calling thread.
    pub fn capture(description: impl Into<String>) -> Self {
        let current = std::thread::current();
        Self {
            thread_name: current.name().unwrap_or("<unnamed>").to_string(),
            thread_id: format!("{:?}", current.id()),
            description: description.into(),
        }
    }
}

impl fmt::Display for FaultReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.thread_name, self.thread_id, self.description)
    }
}

/// Owner of every panic in the process for the length of one template run.
pub(super) struct CrashRoute {
    host: Arc<dyn Host>,
    logger: Arc<Logger>,
    state: Arc<StateCell>,
    early_guard: AtomicBool,
    ctx: OnceLock<Weak<ServerContext>>,
}

impl CrashRoute {
    pub(super) fn new(host: Arc<dyn Host>, logger: Arc<Logger>, state: Arc<StateCell>) -> Arc<Self> {
        Arc::new(Self {
            host,
            logger,
            state,
            early_guard: AtomicBool::new(false),
            ctx: OnceLock::new(),
        })
    }

    /// Route every panic in the process here. Once the route or its context
    /// is gone, panics go to whatever hook was installed before.
    pub(super) fn install(self: &Arc<Self>) {
        let route = Arc::downgrade(self);
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let delivered = match route.upgrade() {
                Some(route) => {
                    let description = format!("{}\n{}", info, Backtrace::force_capture());
                    route.deliver(FaultReport::capture(description))
                }
                None => false,
            };
            if !delivered {
                previous(info);
            }
        }));
    }

    /// From here on faults belong to `ctx`.
    pub(super) fn attach(&self, ctx: &Arc<ServerContext>) {
        if self.ctx.set(Arc::downgrade(ctx)).is_err() {
            tracing::debug!("crash route already attached");
        }
    }

    /// `false` when the attached context no longer exists.
    pub(super) fn deliver(&self, report: FaultReport) -> bool {
        match self.ctx.get() {
            Some(ctx) => match ctx.upgrade() {
                Some(ctx) => {
                    ctx.handle_fault(report);
                    true
                }
                None => false,
            },
            None => {
                self.early_fault(report);
                true
            }
        }
    }

    // No context and no main-thread loop yet: report inline.
    fn early_fault(&self, report: FaultReport) {
        if self.early_guard.swap(true, Ordering::SeqCst) {
            self.host.terminate(FATAL_EXIT_STATUS);
            return;
        }
        self.state.set(LifecycleState::Crashing);
        self.logger.error(crash_record(
            &report,
            self.host.effective_uid(),
            self.host.pid(),
        ));
        self.logger.close();
        self.state.set(LifecycleState::Terminated);
        self.host.terminate(FATAL_EXIT_STATUS);
    }
}

impl ServerContext {
    /// Crash entry point. Returns the reporting thread on the first fault,
    /// `None` when the fast path was taken.
    pub fn handle_fault(self: &Arc<Self>, report: FaultReport) -> Option<JoinHandle<()>> {
        if self.crash_guard.swap(true, Ordering::SeqCst) {
            self.fast_exit();
            return None;
        }
        self.set_state(LifecycleState::Crashing);

        let ctx = self.clone();
        let spawned = std::thread::Builder::new()
            .name("crash-report".into())
            .spawn(move || {
                ctx.logger.error(crash_record(
                    &report,
                    ctx.host.effective_uid(),
                    ctx.host.pid(),
                ));
                ctx.exit(FATAL_EXIT_STATUS);
            });
        match spawned {
            Ok(handle) => Some(handle),
            Err(e) => {
                eprintln!("cannot spawn crash reporter: {}", e);
                self.fast_exit();
                None
            }
        }
    }

    fn fast_exit(&self) {
        self.host.terminate(FATAL_EXIT_STATUS);
        self.main.quit(FATAL_EXIT_STATUS);
    }
}

fn crash_record(report: &FaultReport, uid: u32, pid: u32) -> String {
    format!(
        "{}\nThread: {} ({})\nUid: {}\nPid: {}\n{}",
        CRASH_HEADER, report.thread_name, report.thread_id, uid, pid, report.description
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::dispatch::DispatchLoop;
    use crate::server::host::StaticHost;
    use crate::server::lifecycle::{Bootstrap, Service};
    use crate::server::log::{LoggerOptions, ManualClock};
    use privd_core::{ServerArgs, ServiceIdentity};
    use tempfile::TempDir;

    struct Quiet;

    impl Service for Quiet {
        fn on_start(&self, _ctx: &Arc<ServerContext>) {}
    }

    fn logger(dir: &TempDir) -> Arc<Logger> {
        let clock = Arc::new(ManualClock::new(
            chrono::NaiveDate::from_ymd_opt(2026, 7, 1)
                .unwrap()
                .and_hms_opt(12, 0, 0)
                .unwrap(),
        ));
        Arc::new(Logger::with_clock("crashy", dir.path(), clock, LoggerOptions { console: false }))
    }

    fn initializing() -> Arc<StateCell> {
        let state = Arc::new(StateCell::new("crashy"));
        state.set(LifecycleState::Initializing);
        state
    }

    fn context(dir: &TempDir, host: Arc<StaticHost>) -> (Arc<ServerContext>, DispatchLoop) {
        let args = ServerArgs::builder()
            .server_name("crashy")
            .log_dir(dir.path())
            .enable_logger(true)
            .allow_uid(0)
            .build()
            .unwrap();
        let (main, dispatch) = DispatchLoop::new();
        let boot = Bootstrap {
            identity: ServiceIdentity::new(0, [0]),
            state: initializing(),
            logger: logger(dir),
            registry: None,
            impersonation: None,
        };
        let ctx = ServerContext::new(args, host, Arc::new(Quiet), main, boot);
        (Arc::new(ctx), dispatch)
    }

    fn log_text(dir: &TempDir) -> String {
        std::fs::read_to_string(dir.path().join("2026-07-01.log")).unwrap()
    }

    #[test]
    fn report_names_calling_thread() {
        let report = std::thread::Builder::new()
            .name("worker-7".into())
            .spawn(|| FaultReport::capture("boom"))
            .unwrap()
            .join()
            .unwrap();
        assert_eq!(report.thread_name, "worker-7");
        assert_eq!(report.description, "boom");
        assert!(report.to_string().starts_with("worker-7 ("));
    }

    #[test]
    fn first_fault_reports_and_exits_255() {
        let dir = TempDir::new().unwrap();
        let host = Arc::new(StaticHost::new(0));
        let (ctx, dispatch) = context(&dir, host.clone());

        let reporter = ctx.handle_fault(FaultReport::capture("index out of bounds"));
        reporter.expect("reporting thread").join().unwrap();

        assert_eq!(dispatch.run(), 255);
        assert_eq!(host.terminations(), vec![255]);
        assert_eq!(ctx.state(), LifecycleState::Terminated);

        let log = log_text(&dir);
        assert!(log.contains("[crashy] [ERROR] ** Program Crashed ! **"));
        assert!(log.contains("index out of bounds"));
        assert!(log.contains(&format!("Pid: {}", std::process::id())));
        assert!(log.contains("[INFO] onStop"));
    }

    #[test]
    fn second_fault_takes_fast_path() {
        let dir = TempDir::new().unwrap();
        let host = Arc::new(StaticHost::new(0));
        let (ctx, dispatch) = context(&dir, host.clone());

        let reporter = ctx.handle_fault(FaultReport::capture("first"));
        assert!(ctx.handle_fault(FaultReport::capture("second")).is_none());
        reporter.unwrap().join().unwrap();

        assert_eq!(dispatch.run(), 255);
        let terminations = host.terminations();
        assert_eq!(terminations.len(), 2);
        assert!(terminations.iter().all(|s| *s == 255));

        let log = log_text(&dir);
        assert_eq!(log.matches(CRASH_HEADER).count(), 1);
        assert!(!log.contains("second"));
    }

    #[test]
    fn fault_before_context_is_reported_inline() {
        let dir = TempDir::new().unwrap();
        let host = Arc::new(StaticHost::new(0));
        let logger = logger(&dir);
        let state = initializing();
        let route = CrashRoute::new(host.clone(), logger.clone(), state.clone());

        assert!(route.deliver(FaultReport::capture("registry lookup failed")));
        assert_eq!(host.terminations(), vec![255]);
        assert_eq!(state.get(), LifecycleState::Terminated);
        assert!(!logger.is_open());

        assert!(route.deliver(FaultReport::capture("again")));
        assert_eq!(host.terminations(), vec![255, 255]);

        let log = log_text(&dir);
        assert_eq!(log.matches(CRASH_HEADER).count(), 1);
        assert!(log.contains("registry lookup failed"));
        assert!(!log.contains("again"));
    }

    #[test]
    fn attached_route_hands_faults_to_the_context() {
        let dir = TempDir::new().unwrap();
        let host = Arc::new(StaticHost::new(0));
        let (ctx, dispatch) = context(&dir, host.clone());
        let route = CrashRoute::new(host.clone(), ctx.logger.clone(), initializing());
        route.attach(&ctx);

        assert!(route.deliver(FaultReport::capture("after attach")));
        assert_eq!(dispatch.run(), 255);
        assert_eq!(host.terminations(), vec![255]);
        assert!(log_text(&dir).contains("[INFO] onStop"));
    }

    #[test]
    fn route_declines_once_context_is_gone() {
        let dir = TempDir::new().unwrap();
        let host = Arc::new(StaticHost::new(0));
        let (ctx, _dispatch) = context(&dir, host.clone());
        let route = CrashRoute::new(host.clone(), ctx.logger.clone(), initializing());
        route.attach(&ctx);
        drop(ctx);

        assert!(!route.deliver(FaultReport::capture("too late")));
        assert!(host.terminations().is_empty());
    }
}
