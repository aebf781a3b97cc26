//! Response building and delivery.

use super::types::RequestKind;
use crate::json::{Map, Value};

/// Generic reply to a frame that is not a JSON object.
pub const INVALID_JSON: &str = "Invalid JSON or processing error";

/// Reply to an object without a recognised request key.
pub const UNKNOWN_TYPE: &str = "Unknown message type. Use 'message', 'command', or 'getEffects' fields.";

/// Reply when a command reports a non-positive result.
pub const COMMAND_NO_EFFECT: &str =
    "Command returned 0 - may lack permissions, be invalid, or had no effect";

/// Reply when the host executor no longer accepts work.
pub const EXECUTOR_UNAVAILABLE: &str = "Host executor unavailable";

/// Stands in for a reply that does not fit in a single frame.
pub const RESPONSE_TOO_LARGE: &str = "Response exceeds the 65535 byte frame limit";

/// Receives the JSON replies produced for one client.
///
/// Implemented for connection handles and for plain closures, so the same
/// dispatcher serves WebSocket clients and the host console.
pub trait Responder: Send + Sync + 'static {
    fn respond(&self, response: Value);
}

impl<F> Responder for F
where
    F: Fn(Value) + Send + Sync + 'static,
{
    fn respond(&self, response: Value) {
        self(response)
    }
}

/// Builds a response object.
///
/// `error` present means `status: "error"`, absent means `"success"`. Keys
/// are ordered `status`, then `type` (success) or `error`, `type` (error),
/// then `extra` in its own order.
pub fn response(kind: Option<RequestKind>, error: Option<&str>, extra: Map) -> Value {
    let mut object = Map::new();
    match error {
        Some(error) => {
            object.insert("status", "error");
            object.insert("error", error);
        }
        None => {
            object.insert("status", "success");
        }
    }
    if let Some(kind) = kind {
        object.insert("type", kind.as_str());
    }
    for (key, value) in extra {
        object.insert(key, value);
    }
    Value::Object(object)
}

pub fn success(kind: RequestKind, extra: Map) -> Value {
    response(Some(kind), None, extra)
}

pub fn failure(kind: Option<RequestKind>, error: &str, extra: Map) -> Value {
    response(kind, Some(error), extra)
}
