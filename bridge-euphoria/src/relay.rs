//! Translates parsed Euphoria events into `Nexus` calls — the A-side half
//! of spec component C8 ("Bridge endpoints").

use std::sync::Arc;

use bridge_core::{IncomingMessage, JoinEvent, Nexus, Platform, RemoveEvent};

use crate::wire::Event;

/// Feeds one parsed event to `nexus`. Called from the main bridge bot's
/// event sink; surrogates never call this (they only care about their own
/// readiness and send replies, handled inside [`crate::client`]).
pub fn forward_event(nexus: &Arc<Nexus>, event: Event) {
    match event {
        Event::HelloEvent { session } => {
            nexus.ignore_users(&[JoinEvent {
                euphoria_id: Some(session.session_id),
                platform: Some(Platform::Euphoria),
                ..Default::default()
            }]);
        }
        Event::SnapshotEvent { listing, log } => {
            let events: Vec<JoinEvent> = listing.into_iter().map(session_to_join).collect();
            nexus.add_users(&events, false);
            let ids: Vec<Option<String>> = log
                .iter()
                .flat_map(|m| [Some(m.id.clone()), m.parent.clone()])
                .collect();
            nexus.gather_ids(Platform::Euphoria, &ids);
        }
        Event::WhoReply { listing } => {
            let events: Vec<JoinEvent> = listing.into_iter().map(session_to_join).collect();
            nexus.add_users(&events, false);
        }
        Event::NetworkEvent { kind, server_id, server_era } => {
            if kind == "partition" {
                nexus.remove_group(&(server_id, server_era));
            }
        }
        Event::NickEvent { session_id, to } => {
            nexus.add_users(
                &[JoinEvent {
                    euphoria_id: Some(session_id),
                    platform: Some(Platform::Euphoria),
                    nick: Some(to),
                    ..Default::default()
                }],
                false,
            );
        }
        Event::JoinEvent(session) => {
            nexus.add_users(&[session_to_join(session)], true);
        }
        Event::PartEvent(session) => {
            nexus.remove_users(&[RemoveEvent {
                euphoria_id: Some(session.session_id),
                instant_id: None,
            }]);
        }
        Event::SendEvent(message) => {
            nexus.handle_message(IncomingMessage {
                platform: Platform::Euphoria,
                euphoria_id: Some(message.sender.session_id),
                instant_id: None,
                nick: Some(message.sender.name),
                msgid: message.id,
                parent: message.parent,
                text: message.content,
            });
        }
        Event::SendReply { .. } | Event::LogReply { .. } | Event::Other { .. } => {}
    }
}

fn session_to_join(session: crate::wire::SessionView) -> JoinEvent {
    JoinEvent {
        euphoria_id: Some(session.session_id),
        platform: Some(Platform::Euphoria),
        group: Some((session.server_id, session.server_era)),
        nick: Some(session.name),
        ..Default::default()
    }
}
