//! Peer admission: which peer identities belong to the service's trust domain

use privd_core::{Error, Result};
use std::collections::BTreeSet;

#[derive(Clone, Debug, Default)]
pub struct PeerPolicy {
    allowed: Option<BTreeSet<u32>>,
}

impl PeerPolicy {
    /// Admit any peer that can reach the socket.
    pub fn any() -> Self {
        Self { allowed: None }
    }

    /// Admit only peers whose credentials carry one of `uids`.
    pub fn only(uids: impl IntoIterator<Item = u32>) -> Self {
        Self {
            allowed: Some(uids.into_iter().collect()),
        }
    }

    pub fn is_restricted(&self) -> bool {
        self.allowed.is_some()
    }

    /// `peer_uid` is `None` when the kernel did not report credentials.
    pub fn verify(&self, peer_uid: Option<u32>) -> Result<()> {
        match (&self.allowed, peer_uid) {
            (None, _) => Ok(()),
            (Some(allowed), Some(uid)) if allowed.contains(&uid) => Ok(()),
            (Some(_), Some(uid)) => Err(Error::PeerRejected { uid }),
            (Some(_), None) => Err(Error::PeerRejected { uid: u32::MAX }),
        }
    }
}
