//! Core types for privd

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Numeric identity of the superuser.
pub const SUPERUSER_UID: u32 = 0;

/// Owner name reported for the superuser without consulting any registry.
pub const SUPERUSER_OWNER: &str = "root";

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// The process identity checked by the identity gate, captured once at startup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceIdentity {
    numeric_id: u32,
    allowed: BTreeSet<u32>,
}

impl ServiceIdentity {
    pub fn new(numeric_id: u32, allowed: impl IntoIterator<Item = u32>) -> Self {
        Self {
            numeric_id,
            allowed: allowed.into_iter().collect(),
        }
    }

    pub fn numeric_id(&self) -> u32 {
        self.numeric_id
    }

    pub fn allowed(&self) -> &BTreeSet<u32> {
        &self.allowed
    }

    /// Set membership, not a range check.
    pub fn is_allowed(&self) -> bool {
        self.allowed.contains(&self.numeric_id)
    }
}

/// "Act as `owner`/`uid`" for downstream privileged calls.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImpersonationDescriptor {
    pub uid: u32,
    pub owner: String,
}

impl ImpersonationDescriptor {
    pub fn new(uid: u32, owner: impl Into<String>) -> Self {
        Self {
            uid,
            owner: owner.into(),
        }
    }

    pub fn superuser() -> Self {
        Self::new(SUPERUSER_UID, SUPERUSER_OWNER)
    }

    pub fn attribution_token(&self) -> AttributionToken {
        AttributionToken {
            uid: self.uid,
            owner: self.owner.clone(),
            device_id: DEFAULT_DEVICE_ID,
        }
    }
}

impl std::fmt::Display for ImpersonationDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.owner, self.uid)
    }
}

pub const DEFAULT_DEVICE_ID: u32 = 0;

/// Attribution attached to privileged calls so permission checks evaluate
/// against the impersonated identity instead of the literal process identity.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttributionToken {
    pub uid: u32,
    pub owner: String,
    pub device_id: u32,
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// Log record level
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Verbose,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Verbose => "VERBOSE",
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Unstarted,
    Gating,
    Initializing,
    Running,
    Stopping,
    Crashing,
    Terminated,
}

impl LifecycleState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unstarted => "unstarted",
            Self::Gating => "gating",
            Self::Initializing => "initializing",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Crashing => "crashing",
            Self::Terminated => "terminated",
        }
    }

    /// STOPPING, CRASHING and TERMINATED have no way back.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stopping | Self::Crashing | Self::Terminated)
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether the identity gate runs before or after the service's `on_create`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum GateOrder {
    #[default]
    BeforeCreate,
    AfterCreate,
}

/// How a failed owner lookup is treated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ImpersonationMode {
    /// Never resolve an impersonation descriptor.
    Disabled,
    /// Resolve it; on failure log and continue without one.
    #[default]
    Optional,
    /// Resolve it; on failure terminate like a rejected identity.
    Required,
}

// ---------------------------------------------------------------------------
// Control surface
// ---------------------------------------------------------------------------

/// Describes a published control object to a peer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandleInfo {
    pub id: String,
    pub server: String,
    pub pid: u32,
}

impl HandleInfo {
    pub fn new(server: impl Into<String>, pid: u32) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            server: server.into(),
            pid,
        }
    }
}

/// What a peer observes about the service.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerStatus {
    Running,
    Stopped,
}

impl PeerStatus {
    pub fn from_status(status: &str) -> Self {
        if status == STATUS_RUNNING {
            Self::Running
        } else {
            Self::Stopped
        }
    }
}

impl std::fmt::Display for PeerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

pub const STATUS_RUNNING: &str = "running";
pub const STATUS_STOPPED: &str = "stopped";
