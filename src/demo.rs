//! Demo service: publishes a control object on the exchange socket and
//! serves it until stopped

use crate::server::{ServerContext, Service};
use privd_core::{Result, STATUS_STOPPED};
use privd_exchange::{socket_path, ControlExchange, ControlObject, ExchangeServer, PeerPolicy};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use tokio::sync::watch;

/// Remote face of a running [`DemoService`].
pub struct DemoControl {
    ctx: Weak<ServerContext>,
}

impl DemoControl {
    pub fn new(ctx: &Arc<ServerContext>) -> Self {
        Self {
            ctx: Arc::downgrade(ctx),
        }
    }
}

impl ControlObject for DemoControl {
    fn query_status(&self) -> String {
        match self.ctx.upgrade() {
            Some(ctx) => ctx.status().to_string(),
            None => STATUS_STOPPED.to_string(),
        }
    }

    // Called off the connection that asked, after the acknowledgement went out
    fn request_stop(&self) {
        if let Some(ctx) = self.ctx.upgrade() {
            ctx.logger().info("stop requested by peer");
            ctx.exit(0);
        }
    }
}

pub struct DemoService {
    socket_dir: PathBuf,
    policy: PeerPolicy,
    exchange: ControlExchange,
    shutdown: watch::Sender<bool>,
}

impl DemoService {
    pub fn new(server_name: &str, socket_dir: impl Into<PathBuf>, policy: PeerPolicy) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            socket_dir: socket_dir.into(),
            policy,
            exchange: ControlExchange::new(server_name),
            shutdown,
        }
    }

    pub fn socket_path(&self) -> PathBuf {
        socket_path(&self.socket_dir, self.exchange.server_name())
    }

    pub fn exchange(&self) -> &ControlExchange {
        &self.exchange
    }

    fn serve(&self, ctx: &Arc<ServerContext>, path: &Path) -> Result<()> {
        let handle = self.exchange.publish(Arc::new(DemoControl::new(ctx)));
        ctx.logger()
            .info_fmt(format_args!("control handle {} published at {}", handle.id, path.display()));
        ExchangeServer::new(self.exchange.clone(), path, self.policy.clone())
            .run_blocking(self.shutdown.subscribe())
    }
}

impl Service for DemoService {
    fn on_start(&self, ctx: &Arc<ServerContext>) {
        let path = self.socket_path();
        if let Err(e) = self.serve(ctx, &path) {
            ctx.logger()
                .error_fmt(format_args!("control exchange failed on {}: {}", path.display(), e));
            ctx.exit(e.exit_status());
        }
    }

    fn on_stop(&self, ctx: &ServerContext) {
        if let Some(handle) = self.exchange.retract() {
            ctx.logger()
                .info_fmt(format_args!("control handle {} retracted", handle.id));
        }
        self.shutdown.send_replace(true);
    }
}
