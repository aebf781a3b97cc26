//! Request classification, dispatch and JSON responses.

pub mod response;
pub mod router;
pub mod types;

pub use response::{response, Responder};
pub use router::dispatch;
pub use types::{ChatMessage, Request, RequestKind};
