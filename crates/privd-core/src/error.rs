//! Error types for privd

use std::collections::BTreeSet;
use thiserror::Error;

/// Exit status reserved for identity rejection, crash termination and fatal startup faults.
pub const FATAL_EXIT_STATUS: i32 = 255;

#[derive(Error, Debug)]
pub enum Error {
    #[error("insufficient permission: need to be launched by {allowed:?}, but uid is {current}")]
    IdentityRejected { current: u32, allowed: BTreeSet<u32> },

    #[error("cannot resolve owner of uid {uid}: {reason}")]
    LookupFailed { uid: u32, reason: String },

    #[error("uid {uid} resolved to an empty owner name")]
    EmptyOwner { uid: u32 },

    #[error("peer uid {uid} is outside the trust domain")]
    PeerRejected { uid: u32 },

    #[error("service is not running")]
    NotRunning,

    #[error("config error: {0}")]
    Config(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn lookup_failed(uid: u32, reason: impl Into<String>) -> Self {
        Self::LookupFailed {
            uid,
            reason: reason.into(),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    /// Recoverable errors degrade a feature; everything else ends the process.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::LookupFailed { .. }
                | Self::EmptyOwner { .. }
                | Self::PeerRejected { .. }
                | Self::NotRunning
                | Self::Protocol(_)
                | Self::Io(_)
                | Self::Json(_)
        )
    }

    /// Process exit status a fatal error terminates with.
    pub fn exit_status(&self) -> i32 {
        match self {
            Self::Config(_) => 2,
            _ => FATAL_EXIT_STATUS,
        }
    }
}
