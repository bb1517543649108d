//! WebSocket connection management for one Euphoria session (either the
//! bridge's own bot, or a single surrogate). Grounded on the reconnect-loop
//! shape used for outbound client feeds elsewhere in the retrieval pack,
//! since the teacher repo's own client ([`freeq_sdk::client`], not
//! vendored here) speaks IRC rather than a JSON WebSocket protocol.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bridge_core::{PostCallback, ReadyCallback, SurrogateBot};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::wire::{self, Event};

enum Outbound {
    Text(String),
    Close,
}

/// Invoked for every parsed inbound event, so the caller (the bridge's own
/// bot) can drive `Nexus` calls. Surrogates pass a sink that only cares
/// about `send-reply`/`hello-event`, both already handled internally.
pub type EventSink = Arc<dyn Fn(Event) + Send + Sync>;

/// One live (or reconnecting) connection to a Euphoria room, as a
/// particular nick.
pub struct EuphoriaConnection {
    room_url: String,
    out_tx: mpsc::UnboundedSender<Outbound>,
    ready: AtomicBool,
    nick: Mutex<Option<String>>,
    pending_sends: Mutex<HashMap<String, PostCallback>>,
    next_id: AtomicU64,
}

impl EuphoriaConnection {
    /// Connects to `room_url` (a full `wss://.../room/<name>/ws` URL),
    /// optionally setting `nick` once the handshake completes, and spawns
    /// the background reader/writer/reconnect task. `on_ready` fires every
    /// time the connection (re)enters the ready state; `sink` receives
    /// every parsed event.
    pub fn connect(room_url: String, nick: Option<String>, on_ready: ReadyCallback, sink: EventSink) -> Arc<Self> {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let conn = Arc::new(Self {
            room_url,
            out_tx,
            ready: AtomicBool::new(false),
            nick: Mutex::new(nick),
            pending_sends: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        });
        tokio::spawn(run(conn.clone(), out_rx, on_ready, sink));
        conn
    }

    fn next_cmd_id(&self) -> String {
        format!("c{}", self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Allocates a command id, builds the outgoing command text from it,
    /// sends it, and returns the id so the caller can correlate the reply
    /// (used for `log` requests, which this type otherwise knows nothing
    /// about).
    pub fn issue(&self, build: impl FnOnce(&str) -> String) -> String {
        let id = self.next_cmd_id();
        let text = build(&id);
        let _ = self.out_tx.send(Outbound::Text(text));
        id
    }

    /// Used by the dispatcher loop to resolve a `send` command's reply.
    fn take_pending_send(&self, id: &str) -> Option<PostCallback> {
        self.pending_sends.lock().unwrap().remove(id)
    }
}

impl SurrogateBot for EuphoriaConnection {
    fn ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn nickname(&self) -> Option<String> {
        self.nick.lock().unwrap().clone()
    }

    fn set_nickname(&self, nick: &str) {
        *self.nick.lock().unwrap() = Some(nick.to_string());
        let id = self.next_cmd_id();
        let _ = self.out_tx.send(Outbound::Text(wire::nick_command(&id, nick)));
    }

    fn submit_post(&self, parent: Option<String>, text: String, _seq: String, on_posted: PostCallback) {
        let id = self.next_cmd_id();
        self.pending_sends.lock().unwrap().insert(id.clone(), on_posted);
        let _ = self
            .out_tx
            .send(Outbound::Text(wire::send_command(&id, &text, parent.as_deref())));
    }

    fn close(&self) {
        self.ready.store(false, Ordering::SeqCst);
        let _ = self.out_tx.send(Outbound::Close);
    }
}

async fn run(
    conn: Arc<EuphoriaConnection>,
    mut out_rx: mpsc::UnboundedReceiver<Outbound>,
    on_ready: ReadyCallback,
    sink: EventSink,
) {
    let mut backoff = Duration::from_millis(200);
    let max_backoff = Duration::from_secs(30);

    loop {
        match tokio_tungstenite::connect_async(&conn.room_url).await {
            Ok((ws, _resp)) => {
                backoff = Duration::from_millis(200);
                let (mut write, mut read) = ws.split();
                let mut closing = false;

                loop {
                    tokio::select! {
                        outbound = out_rx.recv() => {
                            match outbound {
                                Some(Outbound::Text(text)) => {
                                    if write.send(WsMessage::Text(text.into())).await.is_err() {
                                        break;
                                    }
                                }
                                Some(Outbound::Close) | None => {
                                    let _ = write.send(WsMessage::Close(None)).await;
                                    closing = true;
                                    break;
                                }
                            }
                        }
                        incoming = read.next() => {
                            match incoming {
                                Some(Ok(WsMessage::Text(text))) => {
                                    handle_inbound(&conn, &text, &on_ready, &sink);
                                }
                                Some(Ok(_)) => {}
                                Some(Err(e)) => {
                                    tracing::debug!(room = %conn.room_url, error = %e, "euphoria ws error");
                                    break;
                                }
                                None => break,
                            }
                        }
                    }
                }

                conn.ready.store(false, Ordering::SeqCst);
                if closing {
                    return;
                }
            }
            Err(e) => {
                tracing::warn!(room = %conn.room_url, error = %e, "euphoria connect failed");
            }
        }

        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(max_backoff);
    }
}

fn handle_inbound(conn: &Arc<EuphoriaConnection>, text: &str, on_ready: &ReadyCallback, sink: &EventSink) {
    let Some(event) = wire::parse_envelope(text) else {
        tracing::warn!("unparseable euphoria envelope");
        return;
    };

    match &event {
        Event::HelloEvent { .. } => {
            conn.ready.store(true, Ordering::SeqCst);
            if let Some(nick) = conn.nick.lock().unwrap().clone() {
                let id = conn.next_cmd_id();
                let _ = conn.out_tx.send(Outbound::Text(wire::nick_command(&id, &nick)));
            }
            on_ready();
        }
        Event::SendReply { reply_id: Some(id), message } => {
            if let Some(cb) = conn.take_pending_send(id) {
                cb(message.id.clone());
            }
        }
        _ => {}
    }

    sink(event);
}
