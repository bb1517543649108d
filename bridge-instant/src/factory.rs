//! Builds per-user surrogate connections to the Instant room (spec §4.4).

use std::sync::Arc;

use bridge_core::{BotFactory, JoinEvent, Nexus, Platform, ReadyCallback, SurrogateBot};

use crate::client::{EventSink, InstantConnection};
use crate::wire::Event;

/// Creates Instant surrogates for a single fixed room.
pub struct InstantBotFactory {
    room_url: String,
    nexus: Arc<Nexus>,
}

impl InstantBotFactory {
    pub fn new(room_url: String, nexus: Arc<Nexus>) -> Self {
        Self { room_url, nexus }
    }
}

impl BotFactory for InstantBotFactory {
    fn make_bot(&self, platform: Platform, _identity: &str, on_ready: ReadyCallback) -> Arc<dyn SurrogateBot> {
        debug_assert_eq!(platform, Platform::Instant, "factory only builds Instant-side surrogates");
        let nexus = self.nexus.clone();
        // A surrogate's own post is otherwise indistinguishable from a
        // real Instant user's, and the bridge's own Instant observer would
        // relay it straight back to Euphoria — registering `ignore` on its
        // own connection id the moment it learns it (mirrors the
        // Euphoria-side `hello-event` self-ignore, spec §8 scenario 5).
        let sink: EventSink = Arc::new(move |event| {
            if let Event::Identity { id } = event {
                nexus.ignore_users(&[JoinEvent {
                    instant_id: Some(id),
                    platform: Some(Platform::Instant),
                    ..Default::default()
                }]);
            }
        });
        InstantConnection::connect(self.room_url.clone(), None, on_ready, sink)
    }
}
