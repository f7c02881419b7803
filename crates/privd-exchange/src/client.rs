//! Peer side of the exchange
//!
//! Every failure mode a peer can hit (no socket, refused, `null` handle,
//! EOF, slow reply) collapses to "stopped" in [`ControlClient::status`].

use privd_core::{
    encode_line, Error, HandleInfo, HandshakeReply, Notification, PeerStatus, RequestToken,
    Result, RpcRequest, RpcResponse, METHOD_QUERY_STATUS, METHOD_REQUEST_STOP,
};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tracing::debug;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct ControlClient {
    path: PathBuf,
    timeout: Duration,
}

impl ControlClient {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Ask for the live handle. `Ok(None)` means the service answered but has
    /// nothing published.
    pub async fn fetch(&self) -> Result<Option<RemoteControl>> {
        let mut reader = self.open(RequestToken::Handle).await?;
        let line = read_line(&mut reader, self.timeout).await?;
        let line = match line {
            Some(line) => line,
            None => return Ok(None),
        };
        let reply: HandshakeReply = serde_json::from_str(&line)?;
        Ok(reply.handle.map(|handle| RemoteControl {
            handle,
            reader,
            next_id: 1,
            timeout: self.timeout,
        }))
    }

    /// Fetch a handle and ask it for its status; never fails.
    pub async fn status(&self) -> PeerStatus {
        let mut remote = match self.fetch().await {
            Ok(Some(remote)) => remote,
            Ok(None) => return PeerStatus::Stopped,
            Err(e) => {
                debug!("service unreachable at {}: {}", self.path.display(), e);
                return PeerStatus::Stopped;
            }
        };
        match remote.query_status().await {
            Ok(status) => PeerStatus::from_status(&status),
            Err(e) => {
                debug!("status query failed: {}", e);
                PeerStatus::Stopped
            }
        }
    }

    pub async fn subscribe(&self) -> Result<Subscription> {
        let reader = self.open(RequestToken::Subscribe).await?;
        Ok(Subscription { reader })
    }

    async fn open(&self, token: RequestToken) -> Result<BufReader<UnixStream>> {
        let connect = UnixStream::connect(&self.path);
        let mut stream = tokio::time::timeout(self.timeout, connect)
            .await
            .map_err(|_| Error::NotRunning)??;
        stream.write_all(token.as_str().as_bytes()).await?;
        stream.write_all(b"\n").await?;
        stream.flush().await?;
        Ok(BufReader::new(stream))
    }
}

/// A granted control handle, invoked over the connection it was granted on.
pub struct RemoteControl {
    handle: HandleInfo,
    reader: BufReader<UnixStream>,
    next_id: u64,
    timeout: Duration,
}

impl RemoteControl {
    pub fn handle(&self) -> &HandleInfo {
        &self.handle
    }

    pub async fn query_status(&mut self) -> Result<String> {
        let response = self.call(METHOD_QUERY_STATUS).await?;
        match response.result {
            Some(serde_json::Value::String(status)) => Ok(status),
            other => Err(Error::protocol(format!("unexpected status payload: {:?}", other))),
        }
    }

    /// Fire-and-forget: returns once the service acknowledged the request.
    pub async fn request_stop(&mut self) -> Result<()> {
        self.call(METHOD_REQUEST_STOP).await.map(|_| ())
    }

    async fn call(&mut self, method: &str) -> Result<RpcResponse> {
        let id = self.next_id.to_string();
        self.next_id += 1;
        let line = encode_line(&RpcRequest::new(id.clone(), method))?;
        let stream = self.reader.get_mut();
        stream.write_all(line.as_bytes()).await?;
        stream.flush().await?;

        let reply = read_line(&mut self.reader, self.timeout)
            .await?
            .ok_or(Error::NotRunning)?;
        let response: RpcResponse = serde_json::from_str(&reply)?;
        if response.id != id {
            return Err(Error::protocol(format!(
                "reply id {} does not match call id {}",
                response.id, id
            )));
        }
        if let Some(err) = &response.error {
            return Err(Error::protocol(format!("{} ({})", err.message, err.code)));
        }
        Ok(response)
    }
}

/// Running/stopped events pushed by the service.
pub struct Subscription {
    reader: BufReader<UnixStream>,
}

impl Subscription {
    /// Next event; `None` once the service closed the connection, which a
    /// peer should read as "stopped".
    pub async fn next(&mut self) -> Result<Option<Notification>> {
        let mut line = String::new();
        loop {
            line.clear();
            if self.reader.read_line(&mut line).await? == 0 {
                return Ok(None);
            }
            if !line.trim().is_empty() {
                return Ok(Some(serde_json::from_str(line.trim())?));
            }
        }
    }
}

async fn read_line(reader: &mut BufReader<UnixStream>, timeout: Duration) -> Result<Option<String>> {
    let mut line = String::new();
    let read = tokio::time::timeout(timeout, reader.read_line(&mut line))
        .await
        .map_err(|_| Error::NotRunning)??;
    if read == 0 {
        Ok(None)
    } else {
        Ok(Some(line.trim().to_string()))
    }
}
