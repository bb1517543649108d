//! Translates parsed Instant events into `Nexus` calls — the B-side half
//! of spec component C8 ("Bridge endpoints").

use std::sync::Arc;

use bridge_core::{IncomingMessage, JoinEvent, Nexus, Platform, RemoveEvent};

use crate::wire::{self, Event, LogEntryOut};

/// Feeds one parsed event to `nexus`, and writes a `log-query` reply
/// directly to `reply` when the event was a `log-request` (the Instant
/// protocol answers history requests on the same connection that asked).
pub fn forward_event(nexus: &Arc<Nexus>, event: Event, reply: impl Fn(String) + Send + Sync + 'static) {
    match event {
        Event::Identity { id } => {
            nexus.ignore_users(&[JoinEvent {
                instant_id: Some(id),
                platform: Some(Platform::Instant),
                ..Default::default()
            }]);
        }
        Event::Joined { id, nick } => {
            nexus.add_users(
                &[JoinEvent {
                    instant_id: Some(id),
                    platform: Some(Platform::Instant),
                    nick,
                    ..Default::default()
                }],
                true,
            );
        }
        Event::Left { id } => {
            nexus.remove_users(&[RemoveEvent {
                euphoria_id: None,
                instant_id: Some(id),
            }]);
        }
        Event::Post { from, nick, parent, text, id, .. } => {
            nexus.handle_message(IncomingMessage {
                platform: Platform::Instant,
                euphoria_id: None,
                instant_id: Some(from),
                nick: Some(nick),
                msgid: id,
                parent,
                text,
            });
        }
        Event::Who { listing } => {
            let events: Vec<JoinEvent> = listing
                .into_iter()
                .map(|(id, nick)| JoinEvent {
                    instant_id: Some(id),
                    platform: Some(Platform::Instant),
                    nick: Some(nick),
                    ..Default::default()
                })
                .collect();
            nexus.add_users(&events, false);
        }
        Event::LogRequest { from, to, after, length } => {
            let outcome = nexus.request_messages(Platform::Instant, to, after, Some(length), move |messages| {
                let entries: Vec<LogEntryOut> = messages
                    .into_iter()
                    .map(|m| LogEntryOut {
                        id: m.id,
                        parent: m.parent,
                        nick: m.nick,
                        text: m.text,
                        timestamp: m.timestamp_ms,
                    })
                    .collect();
                reply(wire::log_query_reply(&from, &entries));
            });
            if let Err(e) = outcome {
                tracing::warn!(error = %e, "log-request failed");
            }
        }
        Event::Other { .. } => {}
    }
}
