//! Impersonated execution context
//!
//! Code that issues privileged calls asks a [`CallerIdentity`] who it is
//! acting for instead of reading the literal process identity. The resolved
//! [`ImpersonationDescriptor`] and the plain [`ProcessContext`] both answer,
//! so either can be handed to anything that wants an [`ExecutionContext`].

use super::registry::IdentityRegistry;
use privd_core::{
    AttributionToken, Error, ImpersonationDescriptor, Result, DEFAULT_DEVICE_ID, SUPERUSER_UID,
};

/// Resolve the owner name bound to `uid`.
///
/// The superuser never hits the registry. For anyone else the first owner
/// the registry reports wins; a failed call or an empty/blank answer is a
/// recoverable error.
pub fn resolve_identity(uid: u32, registry: &dyn IdentityRegistry) -> Result<ImpersonationDescriptor> {
    if uid == SUPERUSER_UID {
        return Ok(ImpersonationDescriptor::superuser());
    }
    let owners = registry.owners_of(uid)?;
    match owners.into_iter().next() {
        Some(owner) if !owner.trim().is_empty() => Ok(ImpersonationDescriptor::new(uid, owner)),
        _ => Err(Error::EmptyOwner { uid }),
    }
}

/// What a caller identity looks like to a permission check.
pub trait CallerIdentity {
    fn current_owner_name(&self) -> &str;
    fn current_numeric_id(&self) -> u32;
    fn attribution_token(&self) -> AttributionToken;
}

/// Generic execution context. Anything that needs "a context" takes
/// `&dyn ExecutionContext` and cannot tell an impersonated one apart.
pub trait ExecutionContext: CallerIdentity {
    /// Owner name reported on operations (app-ops style attribution).
    fn op_owner_name(&self) -> &str {
        self.current_owner_name()
    }

    fn device_id(&self) -> u32 {
        DEFAULT_DEVICE_ID
    }

    fn application_context(&self) -> &dyn ExecutionContext;
}

impl CallerIdentity for ImpersonationDescriptor {
    fn current_owner_name(&self) -> &str {
        &self.owner
    }

    fn current_numeric_id(&self) -> u32 {
        self.uid
    }

    fn attribution_token(&self) -> AttributionToken {
        ImpersonationDescriptor::attribution_token(self)
    }
}

impl ExecutionContext for ImpersonationDescriptor {
    fn application_context(&self) -> &dyn ExecutionContext {
        self
    }
}

/// The literal identity of this process, used when impersonation is
/// disabled or could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessContext {
    uid: u32,
    name: String,
}

impl ProcessContext {
    pub fn new(uid: u32, name: impl Into<String>) -> Self {
        Self {
            uid,
            name: name.into(),
        }
    }
}

impl CallerIdentity for ProcessContext {
    fn current_owner_name(&self) -> &str {
        &self.name
    }

    fn current_numeric_id(&self) -> u32 {
        self.uid
    }

    fn attribution_token(&self) -> AttributionToken {
        AttributionToken {
            uid: self.uid,
            owner: self.name.clone(),
            device_id: self.device_id(),
        }
    }
}

impl ExecutionContext for ProcessContext {
    fn application_context(&self) -> &dyn ExecutionContext {
        self
    }
}
