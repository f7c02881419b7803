use clap::Parser;
use privd::demo::DemoService;
use privd::server::{ServerTemplate, SystemHost};
use privd_core::{GateOrder, ImpersonationMode, ServerArgs};
use privd_exchange::PeerPolicy;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "privd-demo",
    about = "Privileged demo service exposing a status/stop control object"
)]
struct Cli {
    /// Name used for the process, the log tag and the socket file
    #[arg(long, default_value = "demo_server")]
    server_name: String,

    /// Directory for the dated log files
    #[arg(long, default_value = "/data/local/tmp/privd/logs")]
    log_dir: PathBuf,

    /// Effective uid allowed to launch the service (repeatable)
    #[arg(long = "allow-uid", default_values_t = [0u32, 2000])]
    allow_uids: Vec<u32>,

    /// Disable the file logger
    #[arg(long)]
    no_logger: bool,

    /// Directory holding the control socket
    #[arg(long, default_value = "/data/local/tmp/privd")]
    socket_dir: PathBuf,

    /// Peer uid allowed on the control socket (repeatable, default: any)
    #[arg(long = "peer-uid")]
    peer_uids: Vec<u32>,

    /// Exit when the caller identity cannot be resolved
    #[arg(long)]
    require_impersonation: bool,

    /// Run on_create before the identity gate
    #[arg(long)]
    gate_after_create: bool,
}

// Not #[tokio::main]: the calling thread becomes the dispatch thread.
fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "privd=info,privd_exchange=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = ServerArgs::builder()
        .server_name(&cli.server_name)
        .log_dir(&cli.log_dir)
        .allowed_uids(cli.allow_uids)
        .enable_logger(!cli.no_logger)
        .gate_order(if cli.gate_after_create {
            GateOrder::AfterCreate
        } else {
            GateOrder::BeforeCreate
        })
        .impersonation(if cli.require_impersonation {
            ImpersonationMode::Required
        } else {
            ImpersonationMode::Optional
        })
        .build()?;

    let policy = if cli.peer_uids.is_empty() {
        PeerPolicy::any()
    } else {
        PeerPolicy::only(cli.peer_uids)
    };
    let service = DemoService::new(&cli.server_name, &cli.socket_dir, policy);

    let status = ServerTemplate::new(args, Arc::new(service), Arc::new(SystemHost)).run();
    std::process::exit(status);
}
