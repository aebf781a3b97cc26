//! Request types recognised by the dispatcher.
//!
//! Requests are flat JSON objects carrying exactly one "kind" key. When more
//! than one is present the first match in the order `message`, `command`,
//! `getEffects` wins.

use std::collections::HashMap;
use std::fmt;

/// The kinds of request a client can send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    Message,
    Command,
    GetEffects,
}

impl RequestKind {
    /// The request key, also echoed as the response `type`.
    pub fn as_str(self) -> &'static str {
        match self {
            RequestKind::Message => "message",
            RequestKind::Command => "command",
            RequestKind::GetEffects => "getEffects",
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A chat line to show to every player.
///
/// # Example
///
/// ```json
/// { "message": "hello", "user": "alice", "chat": "global" }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub message: String,
    /// Display name of the sender, if any.
    pub user: Option<String>,
    /// Channel tag shown in front of the line, if any.
    pub chat: Option<String>,
}

impl ChatMessage {
    /// Formats the line with the host's `§` colour codes.
    ///
    /// `§7[<chat>]` is prepended when a channel is given, followed by
    /// `§f<user> ` for a named sender or `§7[WebSocket] §f` otherwise, and
    /// finally `§f<message>`.
    pub fn render(&self) -> String {
        let mut line = String::new();
        if let Some(chat) = self.chat.as_deref().filter(|c| !c.is_empty()) {
            line.push_str("\u{a7}7[");
            line.push_str(chat);
            line.push(']');
        }
        match self.user.as_deref().filter(|u| !u.is_empty()) {
            Some(user) => {
                line.push_str("\u{a7}f<");
                line.push_str(user);
                line.push_str("> ");
            }
            None => line.push_str("\u{a7}7[WebSocket] \u{a7}f"),
        }
        line.push_str("\u{a7}f");
        line.push_str(&self.message);
        line
    }
}

/// A classified client request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Chat(ChatMessage),
    /// A host command line, e.g. `time set day`.
    Command(String),
    /// Name of the player whose effects are queried.
    GetEffects(String),
}

impl Request {
    /// Classifies the flat view of a request object.
    ///
    /// Returns `None` when no recognised key is present.
    pub fn from_fields(mut fields: HashMap<String, String>) -> Option<Self> {
        if let Some(message) = fields.remove("message") {
            return Some(Request::Chat(ChatMessage {
                message,
                user: fields.remove("user"),
                chat: fields.remove("chat"),
            }));
        }
        if let Some(command) = fields.remove("command") {
            return Some(Request::Command(command));
        }
        fields.remove("getEffects").map(Request::GetEffects)
    }

    pub fn kind(&self) -> RequestKind {
        match self {
            Request::Chat(_) => RequestKind::Message,
            Request::Command(_) => RequestKind::Command,
            Request::GetEffects(_) => RequestKind::GetEffects,
        }
    }
}
