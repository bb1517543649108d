//! Wire types for the Instant room protocol (spec §6, "Platform B event
//! contract"): `identity`, `joined`/`left`, and `client-message` envelopes
//! carrying `who` / `nick` / `post` / `log-query` / `log-request` payloads.

use serde::Serialize;
use serde_json::Value;

/// A parsed inbound message, dispatched on the envelope's (possibly
/// nested) `type` tag.
#[derive(Debug, Clone)]
pub enum Event {
    Identity { id: String },
    Joined { id: String, nick: Option<String> },
    Left { id: String },
    Post {
        from: String,
        nick: String,
        parent: Option<String>,
        text: String,
        id: String,
        seq: Option<String>,
    },
    Who { listing: Vec<(String, String)> },
    LogRequest {
        /// Connection id of the requester, so the reply can be unicast
        /// straight back to them.
        from: String,
        to: Option<String>,
        after: Option<String>,
        length: u32,
    },
    Other { kind: String },
}

/// Parses one inbound frame. Unrecognized shapes become [`Event::Other`]
/// rather than an error (spec §7 `PROTOCOL_VIOLATION`: log and drop).
pub fn parse_message(raw: &str) -> Option<Event> {
    let env: Value = serde_json::from_str(raw).ok()?;
    let kind = env.get("type")?.as_str()?;

    let event = match kind {
        "identity" => Event::Identity {
            id: env.get("id")?.as_str()?.to_string(),
        },
        "joined" => Event::Joined {
            id: env.get("id")?.as_str()?.to_string(),
            nick: env.get("nick").and_then(|v| v.as_str()).map(str::to_string),
        },
        "left" => Event::Left {
            id: env.get("id")?.as_str()?.to_string(),
        },
        "client-message" => return parse_client_message(&env),
        other => Event::Other { kind: other.to_string() },
    };
    Some(event)
}

fn parse_client_message(env: &Value) -> Option<Event> {
    let from = env.get("from")?.as_str()?.to_string();
    // The ack/echo correlation token lives on the outer envelope, not
    // inside `data` (spec §6: "Responses carry a `seq` field used for
    // correlation").
    let seq = env.get("seq").and_then(|v| v.as_str()).map(str::to_string);
    let data = env.get("data")?;
    let kind = data.get("type")?.as_str()?;

    let event = match kind {
        "post" => Event::Post {
            nick: data.get("nick")?.as_str()?.to_string(),
            parent: data.get("parent").and_then(|v| v.as_str()).map(str::to_string),
            text: data.get("text")?.as_str()?.to_string(),
            id: data.get("id")?.as_str()?.to_string(),
            seq,
            from,
        },
        "who" => Event::Who {
            listing: data
                .get("listing")
                .and_then(|v| v.as_array())
                .map(|items| {
                    items
                        .iter()
                        .filter_map(|item| {
                            Some((item.get("id")?.as_str()?.to_string(), item.get("nick")?.as_str()?.to_string()))
                        })
                        .collect()
                })
                .unwrap_or_default(),
        },
        "log-request" => Event::LogRequest {
            from,
            to: data.get("to").and_then(|v| v.as_str()).map(str::to_string),
            after: data.get("from").and_then(|v| v.as_str()).map(str::to_string),
            length: data.get("length").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
        },
        other => Event::Other { kind: other.to_string() },
    };
    Some(event)
}

/// Builds an outgoing `post` broadcast, per spec §6's "Message-id
/// correlation protocol": `seq` is the `"<origin-side>:<origin-msgid>"`
/// token the bridge stamps on the send so the ack can be correlated back.
/// `seq` sits on the outer envelope, not inside `data` — that's where a
/// real server echoes it back (spec §6: "Responses carry a `seq` field
/// used for correlation").
pub fn post_command(nick: &str, parent: Option<&str>, text: &str, seq: &str) -> String {
    let data = serde_json::json!({ "type": "post", "parent": parent, "nick": nick, "text": text });
    let packet = serde_json::json!({ "type": "broadcast", "data": data, "seq": seq });
    serde_json::to_string(&packet).expect("serializable")
}

pub fn nick_command(nick: &str) -> String {
    let packet = serde_json::json!({ "type": "nick", "nick": nick });
    serde_json::to_string(&packet).expect("serializable")
}

pub fn who_command() -> String {
    let packet = serde_json::json!({ "type": "broadcast", "data": { "type": "who" } });
    serde_json::to_string(&packet).expect("serializable")
}

/// Builds the response the bridge sends back after serving a
/// `log-request`: a unicast straight back to `to` (the requester's own
/// connection id), carrying a batch of already-translated log entries.
pub fn log_query_reply(to: &str, entries: &[LogEntryOut]) -> String {
    let packet = serde_json::json!({
        "type": "unicast",
        "to": to,
        "data": { "type": "log", "data": entries },
    });
    serde_json::to_string(&packet).expect("serializable")
}

#[derive(Serialize)]
pub struct LogEntryOut {
    pub id: String,
    pub parent: Option<String>,
    pub nick: String,
    pub text: String,
    pub timestamp: i64,
}
