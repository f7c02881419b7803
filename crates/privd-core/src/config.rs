//! Server configuration
//!
//! Supplied by the process entry point through [`ServerArgs::builder`]. The
//! core reads no file and no environment; everything arrives here.

use crate::error::{Error, Result};
use crate::types::{GateOrder, ImpersonationMode};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Validated startup options.
#[derive(Debug, Clone)]
pub struct ServerArgs {
    server_name: String,
    log_dir: Option<PathBuf>,
    allowed_uids: BTreeSet<u32>,
    enable_logger: bool,
    gate_order: GateOrder,
    impersonation: ImpersonationMode,
}

impl ServerArgs {
    pub fn builder() -> ServerArgsBuilder {
        ServerArgsBuilder::default()
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    /// Present whenever the logger is enabled.
    pub fn log_dir(&self) -> Option<&Path> {
        self.log_dir.as_deref()
    }

    pub fn allowed_uids(&self) -> &BTreeSet<u32> {
        &self.allowed_uids
    }

    pub fn enable_logger(&self) -> bool {
        self.enable_logger
    }

    pub fn gate_order(&self) -> GateOrder {
        self.gate_order
    }

    pub fn impersonation(&self) -> ImpersonationMode {
        self.impersonation
    }
}

#[derive(Debug, Clone, Default)]
pub struct ServerArgsBuilder {
    server_name: Option<String>,
    log_dir: Option<PathBuf>,
    allowed_uids: BTreeSet<u32>,
    enable_logger: bool,
    gate_order: GateOrder,
    impersonation: ImpersonationMode,
}

impl ServerArgsBuilder {
    pub fn server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }

    pub fn log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(dir.into());
        self
    }

    pub fn allow_uid(mut self, uid: u32) -> Self {
        self.allowed_uids.insert(uid);
        self
    }

    pub fn allowed_uids(mut self, uids: impl IntoIterator<Item = u32>) -> Self {
        self.allowed_uids.extend(uids);
        self
    }

    pub fn enable_logger(mut self, enable: bool) -> Self {
        self.enable_logger = enable;
        self
    }

    pub fn gate_order(mut self, order: GateOrder) -> Self {
        self.gate_order = order;
        self
    }

    pub fn impersonation(mut self, mode: ImpersonationMode) -> Self {
        self.impersonation = mode;
        self
    }

    pub fn build(self) -> Result<ServerArgs> {
        let server_name = self
            .server_name
            .filter(|n| !n.trim().is_empty())
            .ok_or_else(|| Error::Config("server_name must not be empty".into()))?;
        if self.enable_logger && self.log_dir.is_none() {
            return Err(Error::Config(
                "log_dir is required when the logger is enabled".into(),
            ));
        }
        if self.allowed_uids.is_empty() {
            return Err(Error::Config("allowed_uids must not be empty".into()));
        }
        Ok(ServerArgs {
            server_name,
            log_dir: self.log_dir,
            allowed_uids: self.allowed_uids,
            enable_logger: self.enable_logger,
            gate_order: self.gate_order,
            impersonation: self.impersonation,
        })
    }
}
