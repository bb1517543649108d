//! WebSocket connection management for one Instant session (either the
//! bridge's own bot, or a single surrogate).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
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

/// Invoked for every parsed inbound event.
pub type EventSink = Arc<dyn Fn(Event) + Send + Sync>;

/// One live (or reconnecting) connection to an Instant room.
///
/// Unlike Euphoria, Instant correlates an outgoing post with its broadcast
/// echo by the application-level `seq` token the caller supplies (spec
/// §6's "Message-id correlation protocol"), not by a request id — posts
/// are broadcast to every listener, including the sender, so the ack
/// simply comes back round as an ordinary `post` event.
pub struct InstantConnection {
    room_url: String,
    out_tx: mpsc::UnboundedSender<Outbound>,
    ready: AtomicBool,
    nick: Mutex<Option<String>>,
    pending_posts: Mutex<HashMap<String, PostCallback>>,
}

impl InstantConnection {
    pub fn connect(room_url: String, nick: Option<String>, on_ready: ReadyCallback, sink: EventSink) -> Arc<Self> {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let conn = Arc::new(Self {
            room_url,
            out_tx,
            ready: AtomicBool::new(false),
            nick: Mutex::new(nick),
            pending_posts: Mutex::new(HashMap::new()),
        });
        tokio::spawn(run(conn.clone(), out_rx, on_ready, sink));
        conn
    }

    fn take_pending_post(&self, seq: &str) -> Option<PostCallback> {
        self.pending_posts.lock().unwrap().remove(seq)
    }

    /// Sends a pre-built frame verbatim. Used for `log-query` replies,
    /// which answer on the same connection a `log-request` arrived on
    /// rather than going through [`SurrogateBot::submit_post`].
    pub fn send_raw(&self, text: String) {
        let _ = self.out_tx.send(Outbound::Text(text));
    }
}

impl SurrogateBot for InstantConnection {
    fn ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn nickname(&self) -> Option<String> {
        self.nick.lock().unwrap().clone()
    }

    fn set_nickname(&self, nick: &str) {
        *self.nick.lock().unwrap() = Some(nick.to_string());
        let _ = self.out_tx.send(Outbound::Text(wire::nick_command(nick)));
    }

    fn submit_post(&self, parent: Option<String>, text: String, seq: String, on_posted: PostCallback) {
        let nick = self.nick.lock().unwrap().clone().unwrap_or_default();
        self.pending_posts.lock().unwrap().insert(seq.clone(), on_posted);
        let _ = self
            .out_tx
            .send(Outbound::Text(wire::post_command(&nick, parent.as_deref(), &text, &seq)));
    }

    fn close(&self) {
        self.ready.store(false, Ordering::SeqCst);
        let _ = self.out_tx.send(Outbound::Close);
    }
}

async fn run(conn: Arc<InstantConnection>, mut out_rx: mpsc::UnboundedReceiver<Outbound>, on_ready: ReadyCallback, sink: EventSink) {
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
                                    tracing::debug!(room = %conn.room_url, error = %e, "instant ws error");
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
                tracing::warn!(room = %conn.room_url, error = %e, "instant connect failed");
            }
        }

        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(max_backoff);
    }
}

fn handle_inbound(conn: &Arc<InstantConnection>, text: &str, on_ready: &ReadyCallback, sink: &EventSink) {
    let Some(event) = wire::parse_message(text) else {
        tracing::warn!("unparseable instant frame");
        return;
    };

    match &event {
        Event::Identity { .. } => {
            conn.ready.store(true, Ordering::SeqCst);
            if let Some(nick) = conn.nick.lock().unwrap().clone() {
                let _ = conn.out_tx.send(Outbound::Text(wire::nick_command(&nick)));
            }
            on_ready();
        }
        Event::Post { seq: Some(seq), id, .. } => {
            if let Some(cb) = conn.take_pending_post(seq) {
                cb(id.clone());
                return;
            }
        }
        _ => {}
    }

    sink(event);
}
