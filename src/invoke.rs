//! Operation invocation
//!
//! Executes a bound operation against its resolved handler instance
//! and reduces every failure mode to one tagged outcome, so the
//! connection layer only ever turns an outcome into a response.

use crate::bind::{self, BindError};
use crate::registry::{HandlerRegistry, RegisteredOperation};
use futures::FutureExt;
use serde_json::Value;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::warn;

/// Outcome of dispatching one request
#[derive(Debug)]
pub enum InvokeOutcome {
    /// The operation completed; the value may legitimately be null
    Ok(Value),
    /// The wire arguments did not fit the declared parameters; the
    /// handler body never ran
    BindingFailed(BindError),
    /// The handler body (or its construction) failed; its message is
    /// surfaced verbatim
    HandlerFailed(String),
}

/// Bind, resolve and execute one operation
pub async fn invoke(
    registry: &Arc<HandlerRegistry>,
    entry: &RegisteredOperation,
    wire_args: &[Value],
) -> InvokeOutcome {
    let operation = entry.operation();

    let bound = match bind::bind(operation, wire_args) {
        Ok(bound) => bound,
        Err(e) => return InvokeOutcome::BindingFailed(e),
    };

    let instance = match registry.resolve_for(entry) {
        Ok(instance) => instance,
        Err(e) => {
            warn!("Failed to resolve handler for {}: {}", operation.name(), e);
            return InvokeOutcome::HandlerFailed(e.to_string());
        }
    };

    // A panicking handler must not take the connection down with it.
    let call = AssertUnwindSafe(operation.call(&instance, bound));
    match call.catch_unwind().await {
        Ok(Ok(value)) => InvokeOutcome::Ok(value),
        Ok(Err(e)) => {
            warn!("Invocation error in {}: {}", operation.name(), e);
            InvokeOutcome::HandlerFailed(e.to_string())
        }
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            warn!("Handler panicked in {}: {}", operation.name(), message);
            InvokeOutcome::HandlerFailed(message)
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "handler panicked".to_string()
    }
}
