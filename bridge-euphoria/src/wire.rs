//! Wire types for the Euphoria/Heim room protocol (spec §6, "Platform A
//! event contract"). The protocol is a stream of `{id?, type, data}`
//! envelopes in both directions; `id` correlates a command with its reply.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One participant as Euphoria reports it in `who-reply`, `snapshot-event`,
/// `join-event`, and as a message's `sender`.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionView {
    pub session_id: String,
    pub name: String,
    #[serde(default)]
    pub server_id: String,
    #[serde(default)]
    pub server_era: String,
}

/// A logged or live chat message.
#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub id: String,
    pub parent: Option<String>,
    pub time: f64,
    pub sender: SessionView,
    pub content: String,
}

/// A parsed inbound envelope, dispatched on `type` (spec §9 "map each event
/// to a variant in a tagged sum").
#[derive(Debug, Clone)]
pub enum Event {
    HelloEvent { session: SessionView },
    SnapshotEvent { listing: Vec<SessionView>, log: Vec<Message> },
    WhoReply { listing: Vec<SessionView> },
    NetworkEvent { kind: String, server_id: String, server_era: String },
    NickEvent { session_id: String, to: String },
    JoinEvent(SessionView),
    PartEvent(SessionView),
    SendEvent(Message),
    SendReply { reply_id: Option<String>, message: Message },
    LogReply { reply_id: Option<String>, log: Vec<Message> },
    Other { kind: String },
}

/// Parses one inbound envelope's `type` and `data` fields into an [`Event`].
/// Unknown or malformed envelopes become [`Event::Other`] rather than an
/// error, matching spec §7's `PROTOCOL_VIOLATION`/log-and-drop disposition.
pub fn parse_envelope(raw: &str) -> Option<Event> {
    let env: Value = serde_json::from_str(raw).ok()?;
    let kind = env.get("type")?.as_str()?.to_string();
    let data = env.get("data").cloned().unwrap_or(Value::Null);
    let reply_id = env.get("id").and_then(|v| v.as_str()).map(str::to_string);

    let event = match kind.as_str() {
        "hello-event" => Event::HelloEvent {
            session: serde_json::from_value(data.get("session")?.clone()).ok()?,
        },
        "snapshot-event" => {
            let listing = serde_json::from_value(data.get("listing")?.clone()).ok()?;
            let log = serde_json::from_value(data.get("log")?.clone()).unwrap_or_default();
            Event::SnapshotEvent { listing, log }
        }
        "who-reply" => Event::WhoReply {
            listing: serde_json::from_value(data.get("listing")?.clone()).ok()?,
        },
        "network-event" => Event::NetworkEvent {
            kind: data.get("type")?.as_str()?.to_string(),
            server_id: data.get("server_id")?.as_str()?.to_string(),
            server_era: data.get("server_era")?.as_str()?.to_string(),
        },
        "nick-event" => Event::NickEvent {
            session_id: data.get("session_id")?.as_str()?.to_string(),
            to: data.get("to")?.as_str()?.to_string(),
        },
        "join-event" => Event::JoinEvent(serde_json::from_value(data).ok()?),
        "part-event" => Event::PartEvent(serde_json::from_value(data).ok()?),
        "send-event" => Event::SendEvent(serde_json::from_value(data).ok()?),
        "send-reply" => Event::SendReply {
            reply_id,
            message: serde_json::from_value(data).ok()?,
        },
        "log-reply" => Event::LogReply {
            reply_id,
            log: serde_json::from_value(data.get("log")?.clone()).unwrap_or_default(),
        },
        other => Event::Other { kind: other.to_string() },
    };
    Some(event)
}

#[derive(Serialize)]
struct Command<'a> {
    id: &'a str,
    #[serde(rename = "type")]
    kind: &'static str,
    data: Value,
}

/// Builds a `send` command: post `content` as a reply to `parent` (or a
/// top-level post if `None`).
pub fn send_command(cmd_id: &str, content: &str, parent: Option<&str>) -> String {
    let mut data = serde_json::json!({ "content": content });
    if let Some(parent) = parent {
        data["parent"] = Value::String(parent.to_string());
    }
    serde_json::to_string(&Command { id: cmd_id, kind: "send", data }).expect("serializable")
}

/// Builds a `nick` command.
pub fn nick_command(cmd_id: &str, name: &str) -> String {
    serde_json::to_string(&Command {
        id: cmd_id,
        kind: "nick",
        data: serde_json::json!({ "name": name }),
    })
    .expect("serializable")
}

/// Builds a `log` command requesting up to `count` messages before `before`
/// (exclusive — the bridge is responsible for the off-by-one adjustment
/// described in spec §4.8).
pub fn log_command(cmd_id: &str, before: Option<&str>, count: u32) -> String {
    let mut data = serde_json::json!({ "n": count });
    if let Some(before) = before {
        data["before"] = Value::String(before.to_string());
    }
    serde_json::to_string(&Command { id: cmd_id, kind: "log", data }).expect("serializable")
}
