//! Routes calls on a granted handle to the control object
//!
//! Exactly two methods exist. `requestStop` is acknowledged first and only
//! then carried out, so the router returns the work to do after replying.

use crate::control::ControlObject;
use privd_core::{RpcRequest, RpcResponse, METHOD_QUERY_STATUS, METHOD_REQUEST_STOP};
use std::sync::Arc;

/// Work left to do once the response is on the wire.
pub enum FollowUp {
    None,
    Stop(Arc<dyn ControlObject>),
}

impl FollowUp {
    /// Run the deferred action on a blocking thread.
    pub fn run(self) {
        if let FollowUp::Stop(object) = self {
            std::thread::spawn(move || object.request_stop());
        }
    }
}

/// Route a call. `object` is `None` when the handle the peer holds has been retracted.
pub fn route(request: &RpcRequest, object: Option<Arc<dyn ControlObject>>) -> (RpcResponse, FollowUp) {
    let object = match object {
        Some(object) => object,
        None => return (RpcResponse::handle_revoked(&request.id), FollowUp::None),
    };

    match request.method.as_str() {
        METHOD_QUERY_STATUS => (
            RpcResponse::ok(&request.id, serde_json::Value::String(object.query_status())),
            FollowUp::None,
        ),
        METHOD_REQUEST_STOP => (
            RpcResponse::ok(&request.id, serde_json::Value::Null),
            FollowUp::Stop(object),
        ),
        other => (RpcResponse::method_not_found(&request.id, other), FollowUp::None),
    }
}
