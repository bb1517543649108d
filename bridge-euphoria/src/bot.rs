//! The bridge's own Euphoria connection: adds room-name and log-query
//! support on top of a plain [`EuphoriaConnection`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use bridge_core::{BridgeEndpoint, LogMessage, LogSource, PostCallback, ReadyCallback, SurrogateBot};

use crate::client::{EuphoriaConnection, EventSink};
use crate::wire::{self, Event};

type LogCallback = Box<dyn FnOnce(Vec<wire::Message>) + Send>;

pub struct EuphoriaBridgeEndpoint {
    conn: Arc<EuphoriaConnection>,
    roomname: String,
    log_pending: Mutex<HashMap<String, LogCallback>>,
}

impl EuphoriaBridgeEndpoint {
    /// Connects the bridge's own bot to `room_url` (room name `roomname`),
    /// forwarding every event other than `log-reply` (intercepted here) to
    /// `on_event`.
    pub fn connect(
        room_url: String,
        roomname: String,
        nick: &str,
        on_ready: ReadyCallback,
        on_event: impl Fn(Event) + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let weak = weak.clone();
            let sink: EventSink = Arc::new(move |event| {
                if let Some(this) = weak.upgrade() {
                    this.dispatch(event, &on_event);
                }
            });
            let conn = EuphoriaConnection::connect(room_url, Some(nick.to_string()), on_ready, sink);
            Self {
                conn,
                roomname,
                log_pending: Mutex::new(HashMap::new()),
            }
        })
    }

    fn dispatch(&self, event: Event, on_event: &(impl Fn(Event) + Send + Sync)) {
        if let Event::LogReply { reply_id: Some(id), log } = &event {
            if let Some(cb) = self.log_pending.lock().unwrap().remove(id) {
                cb(log.clone());
                return;
            }
        }
        on_event(event);
    }
}

impl SurrogateBot for EuphoriaBridgeEndpoint {
    fn ready(&self) -> bool {
        self.conn.ready()
    }
    fn nickname(&self) -> Option<String> {
        self.conn.nickname()
    }
    fn set_nickname(&self, nick: &str) {
        self.conn.set_nickname(nick);
    }
    fn submit_post(&self, parent: Option<String>, text: String, seq: String, on_posted: PostCallback) {
        self.conn.submit_post(parent, text, seq, on_posted);
    }
    fn close(&self) {
        self.conn.close();
    }
}

impl BridgeEndpoint for EuphoriaBridgeEndpoint {
    fn roomname(&self) -> String {
        self.roomname.clone()
    }
}

impl LogSource for EuphoriaBridgeEndpoint {
    /// Euphoria's `log` command isn't inclusive of `before`; per spec
    /// §4.8 the caller's upper bound is decremented (as a base-36 integer)
    /// before the request goes out.
    fn query_logs(&self, before: Option<String>, max_len: u32, callback: Box<dyn FnOnce(Vec<LogMessage>) + Send>) {
        let adjusted_before = before.as_deref().map(decrement_base36);
        let wrapped: LogCallback = Box::new(move |messages| {
            let translated = messages
                .into_iter()
                .map(|m| LogMessage {
                    id: m.id,
                    parent: m.parent,
                    sender_nick: m.sender.name,
                    text: m.content,
                    timestamp_ms: (m.time * 1000.0) as i64,
                })
                .collect();
            callback(translated);
        });
        let id = self
            .conn
            .issue(|id| wire::log_command(id, adjusted_before.as_deref(), max_len.min(100)));
        self.log_pending.lock().unwrap().insert(id, wrapped);
    }
}

const BASE36_DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

fn decrement_base36(id: &str) -> String {
    match u128::from_str_radix(id, 36) {
        Ok(0) | Err(_) => id.to_string(),
        Ok(v) => encode_base36(v - 1),
    }
}

fn encode_base36(mut v: u128) -> String {
    if v == 0 {
        return "0".to_string();
    }
    let mut buf = Vec::new();
    while v > 0 {
        buf.push(BASE36_DIGITS[(v % 36) as usize]);
        v /= 36;
    }
    buf.reverse();
    String::from_utf8(buf).expect("base36 digits are ascii")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decrement_base36_subtracts_one() {
        assert_eq!(decrement_base36("11"), "10");
        assert_eq!(decrement_base36("10"), "z");
        assert_eq!(decrement_base36("0"), "0");
    }
}
