//! Built-in routes.

use std::sync::Arc;

use serde_json::Value;

use central_protocol::routes::{ALLOCATE, CONFIRM, HEALTH_ACK, HEALTH_CHECK};
use central_protocol::{AllocateRequest, ConfirmRequest};

use crate::allocation::AllocationEngine;
use crate::dispatch::{HandlerError, RoutingTable};
use crate::store::RoomStore;

/// Liveness probe. Ignores its content.
pub fn health_check(_content: Value) -> Result<Value, HandlerError> {
    Ok(Value::String(HEALTH_ACK.to_owned()))
}

/// Builds the server's routing table around `engine`.
#[must_use]
pub fn standard_routes<S>(engine: Arc<AllocationEngine<S>>) -> RoutingTable
where
    S: RoomStore + 'static,
{
    let confirm_engine = Arc::clone(&engine);
    RoutingTable::builder()
        .route(HEALTH_CHECK, health_check)
        .typed_route(ALLOCATE, move |request: AllocateRequest| {
            Ok(engine.allocate(&request)?)
        })
        .typed_route(CONFIRM, move |request: ConfirmRequest| {
            Ok(confirm_engine.confirm(&request)?)
        })
        .build()
}
