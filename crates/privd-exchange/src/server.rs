//! Rendezvous server on a local Unix socket
//!
//! A peer connects, writes a request token line and either receives the live
//! control handle (then issues calls on the same connection) or is kept as a
//! notification subscriber. Peers outside the [`PeerPolicy`] are dropped
//! without a reply.

use crate::auth::PeerPolicy;
use crate::exchange::ControlExchange;
use crate::rpc;
use privd_core::{encode_line, Error, HandshakeReply, RequestToken, Result, RpcRequest, RpcResponse};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Time a peer has to send its request token.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

const CODE_PARSE_ERROR: i32 = -32700;

/// `<dir>/<server_name>.sock`
pub fn socket_path(dir: &Path, server_name: &str) -> PathBuf {
    dir.join(format!("{}.sock", server_name))
}

pub struct ExchangeServer {
    exchange: ControlExchange,
    path: PathBuf,
    policy: PeerPolicy,
}

impl ExchangeServer {
    pub fn new(exchange: ControlExchange, path: impl Into<PathBuf>, policy: PeerPolicy) -> Self {
        Self {
            exchange,
            path: path.into(),
            policy,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bind the socket, replacing a stale one left by a previous run.
    pub async fn bind(self) -> Result<BoundServer> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => debug!("removed stale socket {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        let listener = UnixListener::bind(&self.path)?;
        std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o660))?;
        info!("control exchange listening on {}", self.path.display());
        Ok(BoundServer {
            listener,
            server: self,
        })
    }

    /// Bind and serve on a fresh current-thread runtime, blocking the caller
    /// until `shutdown` flips to `true`.
    pub fn run_blocking(self, shutdown: watch::Receiver<bool>) -> Result<()> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        runtime.block_on(async move { self.bind().await?.serve(shutdown).await })
    }
}

pub struct BoundServer {
    listener: UnixListener,
    server: ExchangeServer,
}

impl BoundServer {
    pub fn path(&self) -> &Path {
        &self.server.path
    }

    pub async fn serve(self, shutdown: watch::Receiver<bool>) -> Result<()> {
        let BoundServer { listener, server } = self;
        let mut shutdown = shutdown;
        // A stop that landed before we got here
        let mut stopping = *shutdown.borrow_and_update();
        while !stopping {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, _)) => {
                            let exchange = server.exchange.clone();
                            let policy = server.policy.clone();
                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(stream, exchange, policy).await {
                                    debug!("connection ended with error: {}", e);
                                }
                            });
                        }
                        Err(e) => warn!("accept failed: {}", e),
                    }
                }
                changed = shutdown.changed() => {
                    stopping = changed.is_err() || *shutdown.borrow();
                }
            }
        }
        drop(listener);
        if let Err(e) = std::fs::remove_file(&server.path) {
            debug!("cannot remove socket {}: {}", server.path.display(), e);
        }
        info!("control exchange on {} closed", server.path.display());
        Ok(())
    }
}

async fn handle_connection(
    stream: UnixStream,
    exchange: ControlExchange,
    policy: PeerPolicy,
) -> Result<()> {
    let peer_uid = stream.peer_cred().ok().map(|cred| cred.uid());
    if let Err(e) = policy.verify(peer_uid) {
        debug!("{}", e);
        return Ok(());
    }

    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    match tokio::time::timeout(HANDSHAKE_TIMEOUT, reader.read_line(&mut line)).await {
        Ok(Ok(0)) | Err(_) => return Ok(()),
        Ok(Ok(_)) => {}
        Ok(Err(e)) => return Err(e.into()),
    }

    match RequestToken::parse(&line) {
        Some(RequestToken::Handle) => serve_handle(reader, exchange, peer_uid).await,
        Some(RequestToken::Subscribe) => {
            // The initial event is a blocking write under the transition lock.
            let stream = reader.into_inner().into_std()?;
            tokio::task::spawn_blocking(move || exchange.subscribe(stream, peer_uid))
                .await
                .map_err(|e| Error::Internal(format!("subscribe task failed: {}", e)))??;
            debug!("subscriber uid={:?} registered", peer_uid);
            Ok(())
        }
        None => {
            debug!("unknown request token {:?} from uid={:?}", line.trim(), peer_uid);
            Ok(())
        }
    }
}

async fn serve_handle(
    mut reader: BufReader<UnixStream>,
    exchange: ControlExchange,
    peer_uid: Option<u32>,
) -> Result<()> {
    let handle = exchange.current();
    let reply = match &handle {
        Some(info) => HandshakeReply::granted(info.clone()),
        None => HandshakeReply::absent(),
    };
    write_frame(&mut reader, &reply).await?;
    let handle = match handle {
        Some(handle) => handle,
        None => return Ok(()),
    };
    debug!("granted handle {} to uid={:?}", handle.id, peer_uid);

    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(());
        }
        if line.trim().is_empty() {
            continue;
        }
        let request: RpcRequest = match serde_json::from_str(line.trim()) {
            Ok(request) => request,
            Err(e) => {
                let resp = RpcResponse::err("", CODE_PARSE_ERROR, format!("invalid call: {}", e));
                write_frame(&mut reader, &resp).await?;
                continue;
            }
        };
        let (response, follow_up) = rpc::route(&request, exchange.resolve(&handle.id));
        write_frame(&mut reader, &response).await?;
        follow_up.run();
    }
}

async fn write_frame<T: serde::Serialize>(
    reader: &mut BufReader<UnixStream>,
    frame: &T,
) -> Result<()> {
    let line = encode_line(frame)?;
    let stream = reader.get_mut();
    stream.write_all(line.as_bytes()).await?;
    stream.flush().await?;
    Ok(())
}
