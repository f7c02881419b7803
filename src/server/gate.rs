//! Identity gate: the first thing the template runs

use privd_core::{Error, Result, ServiceIdentity};

/// Membership test of the identity's numeric id against its allow-list.
///
/// The allow-list is a `BTreeSet`, so no caller-side sorting is involved in
/// the decision.
pub fn check_identity(identity: &ServiceIdentity) -> Result<()> {
    if identity.is_allowed() {
        Ok(())
    } else {
        Err(Error::IdentityRejected {
            current: identity.numeric_id(),
            allowed: identity.allowed().clone(),
        })
    }
}

/// Line printed to stderr before the process is terminated.
pub fn rejection_message(identity: &ServiceIdentity) -> String {
    format!(
        "Insufficient permission! Need to be launched by {:?}, but your uid is {}.",
        identity.allowed(),
        identity.numeric_id()
    )
}
