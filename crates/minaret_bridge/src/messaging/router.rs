//! Request dispatch from raw client text to the host executor.
//!
//! The dispatcher never blocks the caller. Chat requests are acknowledged
//! immediately; command and effect queries reply from the host thread once
//! the backend has answered.

use super::response::{
    failure, success, Responder, COMMAND_NO_EFFECT, EXECUTOR_UNAVAILABLE, INVALID_JSON, UNKNOWN_TYPE,
};
use super::types::{ChatMessage, Request, RequestKind};
use crate::executor::{guarded, HostBackend, HostExecutor};
use crate::json::{self, Map, Value};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Dispatches one client request and arranges for its reply.
///
/// Exactly one response reaches `responder` for every call, either
/// synchronously (parse and classification failures, chat acknowledgements,
/// an unavailable executor) or later from the host thread.
///
/// # Arguments
///
/// * `raw` - The request text, expected to be a flat JSON object
/// * `executor` - Where backend work is submitted
/// * `responder` - Receives the JSON reply
///
/// # Example Request
///
/// ```json
/// { "command": "time set day" }
/// ```
pub fn dispatch(raw: &str, executor: &HostExecutor, responder: Arc<dyn Responder>) {
    let fields = match json::parse_flat(raw) {
        Ok(fields) => fields,
        Err(e) => {
            warn!("⚠️ Rejected malformed request ({e}): {raw}");
            responder.respond(failure(None, INVALID_JSON, Map::new()));
            return;
        }
    };

    let Some(request) = Request::from_fields(fields) else {
        debug!("❓ Request without a recognised type: {raw}");
        responder.respond(failure(None, UNKNOWN_TYPE, Map::new()));
        return;
    };

    let kind = request.kind();
    debug!("📨 Dispatching '{kind}' request");

    let submitted = match request {
        Request::Chat(chat) => {
            let submitted = executor.submit(move |backend| broadcast_chat(backend, &chat));
            if submitted.is_ok() {
                responder.respond(success(kind, Map::new()));
            }
            submitted
        }
        Request::Command(command) => {
            let responder = Arc::clone(&responder);
            executor.submit(move |backend| responder.respond(run_command(backend, &command)))
        }
        Request::GetEffects(player) => {
            let responder = Arc::clone(&responder);
            executor.submit(move |backend| responder.respond(query_effects(backend, &player)))
        }
    };

    if let Err(e) = submitted {
        warn!("⚠️ Could not submit '{kind}' request: {e}");
        responder.respond(failure(Some(kind), EXECUTOR_UNAVAILABLE, Map::new()));
    }
}

fn broadcast_chat(backend: &mut dyn HostBackend, chat: &ChatMessage) {
    backend.broadcast_chat(&chat.render());
    info!("💬 Chat: {}", chat.message);
}

fn run_command(backend: &mut dyn HostBackend, command: &str) -> Value {
    let kind = RequestKind::Command;
    match guarded(|| backend.execute_command(command)) {
        Ok(result) => {
            let extra: Map = [("command", command.to_string()), ("result", result.to_string())]
                .into_iter()
                .collect();
            if result > 0 {
                info!("✅ Command executed: {command} (result: {result})");
                success(kind, extra)
            } else {
                warn!("⚠️ Command failed: {command} (result: {result})");
                failure(Some(kind), COMMAND_NO_EFFECT, extra)
            }
        }
        Err(e) => {
            error!("❌ Command error: {command}: {e}");
            let extra: Map = [("command", command)].into_iter().collect();
            failure(
                Some(kind),
                e.message().unwrap_or("Command execution failed"),
                extra,
            )
        }
    }
}

fn query_effects(backend: &mut dyn HostBackend, player: &str) -> Value {
    let kind = RequestKind::GetEffects;
    match guarded(|| backend.active_effects(player)) {
        Ok(Some(effects)) => {
            info!("🧪 getEffects for player: {player}");
            let effects: Vec<Value> = effects.iter().map(|effect| effect.to_json()).collect();
            let extra: Map = [("player", Value::from(player)), ("effects", Value::from(effects))]
                .into_iter()
                .collect();
            success(kind, extra)
        }
        Ok(None) => failure(Some(kind), &format!("Player not found: {player}"), Map::new()),
        Err(e) => {
            error!("❌ getEffects failed for {player}: {e}");
            failure(
                Some(kind),
                e.message().unwrap_or("Failed to get effects"),
                Map::new(),
            )
        }
    }
}
