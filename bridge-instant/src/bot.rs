//! The bridge's own Instant connection: adds room-name bookkeeping and
//! `log-request` replies on top of a plain [`InstantConnection`].
//!
//! Instant has no server-side history of its own (spec §4.8); it is never
//! a [`bridge_core::endpoint::LogSource`] — only a `log-request` sender.

use std::sync::Arc;

use bridge_core::{BridgeEndpoint, PostCallback, ReadyCallback, SurrogateBot};

use crate::client::{EventSink, InstantConnection};
use crate::wire::Event;

pub struct InstantBridgeEndpoint {
    conn: Arc<InstantConnection>,
    roomname: String,
}

impl InstantBridgeEndpoint {
    /// Connects the bridge's own bot to `room_url` (room name `roomname`).
    /// `on_event` also receives a clone of the underlying connection, so a
    /// `log-request` handler can write its `log-query` reply back out on
    /// the same socket via [`InstantConnection::send_raw`] from inside a
    /// callback that outlives this call (e.g. a `Nexus::request_messages`
    /// completion running later on the scheduler thread).
    pub fn connect(
        room_url: String,
        roomname: String,
        nick: &str,
        on_ready: ReadyCallback,
        on_event: impl Fn(Arc<InstantConnection>, Event) + Send + Sync + 'static,
    ) -> Arc<Self> {
        // `sink` needs to hand `on_event` the very connection it is a
        // callback of, which doesn't exist yet when the sink closure is
        // built. `InstantConnection::connect` only starts dispatching
        // events once its background task has connected, which can't
        // happen before this function returns and fills the cell.
        let cell: Arc<once_cell::sync::OnceCell<Arc<InstantConnection>>> = Arc::new(once_cell::sync::OnceCell::new());
        let cell_for_sink = cell.clone();
        let sink: EventSink = Arc::new(move |event| {
            if let Some(conn) = cell_for_sink.get() {
                on_event(conn.clone(), event);
            }
        });
        let conn = InstantConnection::connect(room_url, Some(nick.to_string()), on_ready, sink);
        cell.set(conn.clone()).ok();
        Arc::new(Self { conn, roomname })
    }

    /// Sends a pre-built frame verbatim (used for `log-query` replies).
    pub fn send_raw(&self, text: String) {
        self.conn.send_raw(text);
    }
}

impl SurrogateBot for InstantBridgeEndpoint {
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

impl BridgeEndpoint for InstantBridgeEndpoint {
    fn roomname(&self) -> String {
        self.roomname.clone()
    }
}
