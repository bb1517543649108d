//! Builds per-user surrogate connections to the Euphoria room (spec §4.4).

use std::sync::Arc;

use bridge_core::{BotFactory, JoinEvent, Nexus, Platform, ReadyCallback, SurrogateBot};

use crate::client::{EuphoriaConnection, EventSink};
use crate::wire::Event;

/// Creates Euphoria surrogates for a single fixed room. `room_url` is the
/// full `wss://.../room/<name>/ws` endpoint.
pub struct EuphoriaBotFactory {
    room_url: String,
    nexus: Arc<Nexus>,
}

impl EuphoriaBotFactory {
    pub fn new(room_url: String, nexus: Arc<Nexus>) -> Self {
        Self { room_url, nexus }
    }
}

impl BotFactory for EuphoriaBotFactory {
    fn make_bot(&self, platform: Platform, _identity: &str, on_ready: ReadyCallback) -> Arc<dyn SurrogateBot> {
        debug_assert_eq!(platform, Platform::Euphoria, "factory only builds Euphoria-side surrogates");
        let nexus = self.nexus.clone();
        // Register self-ignore the moment the surrogate learns its own
        // session id, so the bridge's own Euphoria observer never relays
        // this surrogate's posts back to Instant (spec §8 scenario 5).
        let sink: EventSink = Arc::new(move |event| {
            if let Event::HelloEvent { session } = event {
                nexus.ignore_users(&[JoinEvent {
                    euphoria_id: Some(session.session_id),
                    platform: Some(Platform::Euphoria),
                    ..Default::default()
                }]);
            }
        });
        EuphoriaConnection::connect(self.room_url.clone(), None, on_ready, sink)
    }
}
