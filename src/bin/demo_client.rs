use clap::{Parser, Subcommand};
use privd_core::{Notification, PeerStatus};
use privd_exchange::{socket_path, ControlClient};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "privd-peer", about = "Peer client for a running privd service")]
struct Cli {
    /// Service to talk to
    #[arg(long, default_value = "demo_server")]
    server_name: String,

    /// Directory holding the control socket
    #[arg(long, default_value = "/data/local/tmp/privd")]
    socket_dir: PathBuf,

    /// Reply timeout in milliseconds
    #[arg(long, default_value_t = 5000)]
    timeout_ms: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print "running" or "stopped"
    Status,
    /// Ask the service to stop
    Stop,
    /// Print running/stopped events until the service goes away
    Watch,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "privd_exchange=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let client = ControlClient::new(socket_path(&cli.socket_dir, &cli.server_name))
        .with_timeout(Duration::from_millis(cli.timeout_ms));

    match cli.command {
        Commands::Status => {
            println!("{}", client.status().await);
        }
        Commands::Stop => match client.fetch().await {
            Ok(Some(mut remote)) => {
                remote.request_stop().await?;
                println!("stop requested (pid {})", remote.handle().pid);
            }
            Ok(None) | Err(_) => println!("{}", PeerStatus::Stopped),
        },
        Commands::Watch => {
            let mut events = match client.subscribe().await {
                Ok(events) => events,
                Err(_) => {
                    println!("{}", PeerStatus::Stopped);
                    return Ok(());
                }
            };
            loop {
                match events.next().await? {
                    Some(Notification::Running { handle }) => {
                        println!("running (pid {}, handle {})", handle.pid, handle.id)
                    }
                    Some(Notification::Stopped) => println!("{}", PeerStatus::Stopped),
                    None => {
                        println!("{}", PeerStatus::Stopped);
                        break;
                    }
                }
            }
        }
    }
    Ok(())
}
