//! Full template runs under a `StaticHost`
//!
//! None of these panic on purpose: the panic hook is process-wide, so crash
//! scenarios live in their own test binaries.

use privd::demo::DemoService;
use privd::server::{
    CallerIdentity, ExecutionContext, LoggerOptions, ServerContext, ServerTemplate, Service, StaticHost,
    StaticRegistry,
};
use privd_core::{
    GateOrder, ImpersonationDescriptor, ImpersonationMode, PeerStatus, ServerArgs, ServerArgsBuilder,
    ServiceIdentity,
};
use privd_exchange::{ControlClient, PeerPolicy};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

fn args(allowed: &[u32]) -> ServerArgsBuilder {
    ServerArgs::builder()
        .server_name("counted")
        .enable_logger(false)
        .allowed_uids(allowed.iter().copied())
}

/// Every `.log` file in `dir`, concatenated.
fn read_logs(dir: &Path) -> String {
    let mut files: Vec<_> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "log"))
        .collect();
    files.sort();
    files
        .iter()
        .map(|p| std::fs::read_to_string(p).unwrap())
        .collect()
}

// ===========================================================================
// Demo scenario
// ===========================================================================

#[tokio::test(flavor = "multi_thread")]
async fn demo_server_runs_and_stops_on_request() {
    let logs = TempDir::new().unwrap();
    let sockets = TempDir::new().unwrap();
    let host = Arc::new(StaticHost::new(0));

    let service = DemoService::new("demo_server", sockets.path(), PeerPolicy::any());
    let path = service.socket_path();
    let client = ControlClient::new(&path).with_timeout(Duration::from_secs(2));

    // Nothing listening yet
    assert_eq!(client.status().await, PeerStatus::Stopped);

    let template_args = ServerArgs::builder()
        .server_name("demo_server")
        .log_dir(logs.path())
        .allow_uid(0)
        .enable_logger(true)
        .build()
        .unwrap();
    let run_host = host.clone();
    let server = std::thread::spawn(move || {
        ServerTemplate::new(template_args, Arc::new(service), run_host)
            .with_logger_options(LoggerOptions { console: false })
            .run()
    });

    let mut running = false;
    for _ in 0..200 {
        if client.status().await == PeerStatus::Running {
            running = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(running, "service never reported running");
    assert_eq!(host.process_name().as_deref(), Some("demo_server"));

    let mut remote = client.fetch().await.unwrap().expect("live handle");
    assert_eq!(remote.query_status().await.unwrap(), "running");
    remote.request_stop().await.unwrap();

    let status = tokio::task::spawn_blocking(move || server.join().unwrap())
        .await
        .unwrap();
    assert_eq!(status, 0);
    assert_eq!(host.terminations(), vec![0]);

    let log = read_logs(logs.path());
    let start = log.find("[demo_server] [INFO] onStart").expect("onStart line");
    let stop = log.find("[demo_server] [INFO] onStop").expect("onStop line");
    assert!(start < stop);
    assert!(log.contains("impersonating root(0)"));

    // Socket removed on the way out
    assert!(!path.exists());
    assert_eq!(client.status().await, PeerStatus::Stopped);
}

// ===========================================================================
// Identity gate
// ===========================================================================

#[derive(Default)]
struct Counted {
    created: AtomicUsize,
    started: AtomicUsize,
    stopped: AtomicUsize,
}

impl Service for Counted {
    fn on_create(&self) {
        self.created.fetch_add(1, Ordering::SeqCst);
    }
    fn on_start(&self, ctx: &Arc<ServerContext>) {
        self.started.fetch_add(1, Ordering::SeqCst);
        ctx.exit(0);
    }
    fn on_stop(&self, _ctx: &ServerContext) {
        self.stopped.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn rejected_uid_runs_no_service_logic() {
    let host = Arc::new(StaticHost::new(10001));
    let counted = Arc::new(Counted::default());
    let status = ServerTemplate::new(args(&[0, 2000]).build().unwrap(), counted.clone(), host.clone()).run();

    assert_eq!(status, 255);
    assert_eq!(host.terminations(), vec![255]);
    assert_eq!(counted.created.load(Ordering::SeqCst), 0);
    assert_eq!(counted.started.load(Ordering::SeqCst), 0);
    assert_eq!(host.process_name(), None);
}

#[test]
fn rejected_uid_creates_no_log_file() {
    let logs = TempDir::new().unwrap();
    let host = Arc::new(StaticHost::new(10001));
    let args = ServerArgs::builder()
        .server_name("counted")
        .log_dir(logs.path())
        .allow_uid(0)
        .enable_logger(true)
        .build()
        .unwrap();
    assert_eq!(ServerTemplate::new(args, Arc::new(Counted::default()), host).run(), 255);
    assert_eq!(std::fs::read_dir(logs.path()).unwrap().count(), 0);
}

#[test]
fn gate_after_create_still_blocks_start() {
    let host = Arc::new(StaticHost::new(10001));
    let counted = Arc::new(Counted::default());
    let args = args(&[0]).gate_order(GateOrder::AfterCreate).build().unwrap();
    let status = ServerTemplate::new(args, counted.clone(), host).run();

    assert_eq!(status, 255);
    assert_eq!(counted.created.load(Ordering::SeqCst), 1);
    assert_eq!(counted.started.load(Ordering::SeqCst), 0);
}

#[test]
fn allowed_uid_starts_once_and_stops_once() {
    let host = Arc::new(StaticHost::new(2000));
    let counted = Arc::new(Counted::default());
    let status = ServerTemplate::new(args(&[0, 2000]).build().unwrap(), counted.clone(), host.clone()).run();

    assert_eq!(status, 0);
    assert_eq!(host.terminations(), vec![0]);
    assert_eq!(host.process_name().as_deref(), Some("counted"));
    assert_eq!(counted.created.load(Ordering::SeqCst), 1);
    assert_eq!(counted.started.load(Ordering::SeqCst), 1);
    assert_eq!(counted.stopped.load(Ordering::SeqCst), 1);
}

/// Keeps the identity the context was built with.
#[derive(Default)]
struct Gated {
    identity: Mutex<Option<ServiceIdentity>>,
}

impl Service for Gated {
    fn on_start(&self, ctx: &Arc<ServerContext>) {
        *self.identity.lock().unwrap() = Some(ctx.identity().clone());
        ctx.exit(0);
    }
}

#[test]
fn context_carries_the_identity_that_passed_the_gate() {
    let host = Arc::new(StaticHost::new(2000));
    let gated = Arc::new(Gated::default());
    let status = ServerTemplate::new(args(&[2000, 0]).build().unwrap(), gated.clone(), host).run();

    assert_eq!(status, 0);
    let identity = gated.identity.lock().unwrap().clone().expect("on_start ran");
    assert_eq!(identity, ServiceIdentity::new(2000, [0, 2000]));
    assert!(identity.is_allowed());
}

// ===========================================================================
// Impersonation
// ===========================================================================

type Seen = (String, u32, Option<ImpersonationDescriptor>, &'static str);

/// Records what the context looked like from inside `on_start`.
#[derive(Default)]
struct Inspect {
    seen: Mutex<Option<Seen>>,
}

impl Service for Inspect {
    fn on_start(&self, ctx: &Arc<ServerContext>) {
        let exec = ctx.execution_context().application_context();
        *self.seen.lock().unwrap() = Some((
            exec.current_owner_name().to_string(),
            exec.current_numeric_id(),
            ctx.impersonation().cloned(),
            ctx.status(),
        ));
        ctx.exit(0);
    }
}

impl Inspect {
    fn seen(&self) -> Seen {
        self.seen.lock().unwrap().clone().expect("on_start ran")
    }
}

#[test]
fn optional_impersonation_resolves_owner() {
    let host = Arc::new(
        StaticHost::new(2000).with_registry(StaticRegistry::new().with_owner(2000, "com.android.shell")),
    );
    let inspect = Arc::new(Inspect::default());
    let status = ServerTemplate::new(args(&[2000]).build().unwrap(), inspect.clone(), host).run();

    assert_eq!(status, 0);
    let (owner, uid, desc, state) = inspect.seen();
    assert_eq!(owner, "com.android.shell");
    assert_eq!(uid, 2000);
    assert_eq!(desc, Some(ImpersonationDescriptor::new(2000, "com.android.shell")));
    assert_eq!(state, "running");
}

#[test]
fn optional_impersonation_failure_falls_back_to_process() {
    let host = Arc::new(StaticHost::new(2000).without_registry());
    let inspect = Arc::new(Inspect::default());
    let status = ServerTemplate::new(args(&[2000]).build().unwrap(), inspect.clone(), host).run();

    assert_eq!(status, 0);
    let (owner, uid, desc, _) = inspect.seen();
    assert_eq!(owner, "counted");
    assert_eq!(uid, 2000);
    assert_eq!(desc, None);
}

#[test]
fn required_impersonation_failure_is_fatal() {
    let host = Arc::new(StaticHost::new(2000).with_registry(StaticRegistry::unavailable()));
    let inspect = Arc::new(Inspect::default());
    let args = args(&[2000])
        .impersonation(ImpersonationMode::Required)
        .build()
        .unwrap();
    let status = ServerTemplate::new(args, inspect.clone(), host.clone()).run();

    assert_eq!(status, 255);
    assert_eq!(host.terminations(), vec![255]);
    assert!(inspect.seen.lock().unwrap().is_none());
}

#[test]
fn disabled_impersonation_skips_lookup() {
    let host = Arc::new(StaticHost::new(0));
    let inspect = Arc::new(Inspect::default());
    let args = args(&[0])
        .impersonation(ImpersonationMode::Disabled)
        .build()
        .unwrap();
    assert_eq!(ServerTemplate::new(args, inspect.clone(), host).run(), 0);
    assert_eq!(inspect.seen().2, None);
}

// ===========================================================================
// Main thread and shutdown
// ===========================================================================

/// Posts the exit to the main thread.
struct Poster {
    off_main: Mutex<Option<bool>>,
}

impl Service for Poster {
    fn on_start(&self, ctx: &Arc<ServerContext>) {
        *self.off_main.lock().unwrap() = Some(!ctx.is_main_thread());
        let main_ctx = ctx.clone();
        ctx.run_on_main_thread(move || {
            if main_ctx.is_main_thread() {
                main_ctx.exit(9);
            } else {
                main_ctx.exit(1);
            }
        });
    }
}

#[test]
fn exit_from_main_thread_task() {
    let host = Arc::new(StaticHost::new(0));
    let poster = Arc::new(Poster {
        off_main: Mutex::new(None),
    });
    let status = ServerTemplate::new(args(&[0]).build().unwrap(), poster.clone(), host.clone()).run();

    assert_eq!(status, 9);
    assert_eq!(host.terminations(), vec![9]);
    assert_eq!(*poster.off_main.lock().unwrap(), Some(true));
}

/// Returns from `on_start` immediately and waits to be told to stop.
#[derive(Default)]
struct Idle {
    stopped: AtomicUsize,
}

impl Service for Idle {
    fn on_start(&self, _ctx: &Arc<ServerContext>) {}
    fn on_stop(&self, _ctx: &ServerContext) {
        self.stopped.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn shutdown_hook_exits_zero() {
    let logs = TempDir::new().unwrap();
    let host = Arc::new(StaticHost::new(0));
    let trigger = host.clone();
    let signaller = std::thread::spawn(move || {
        while !trigger.trigger_shutdown() {
            std::thread::sleep(Duration::from_millis(5));
        }
    });
    let idle = Arc::new(Idle::default());
    let args = ServerArgs::builder()
        .server_name("idle")
        .log_dir(logs.path())
        .allow_uid(0)
        .enable_logger(true)
        .build()
        .unwrap();
    let status = ServerTemplate::new(args, idle.clone(), host.clone())
        .with_logger_options(LoggerOptions { console: false })
        .run();
    signaller.join().unwrap();

    assert_eq!(status, 0);
    assert_eq!(host.terminations(), vec![0]);
    assert_eq!(idle.stopped.load(Ordering::SeqCst), 1);
    assert!(read_logs(logs.path()).contains("[idle] [INFO] onStop"));
}
