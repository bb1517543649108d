//! Instant adapter: the B-side half of spec component C8.

pub mod bot;
pub mod client;
pub mod factory;
pub mod relay;
pub mod wire;

pub use bot::InstantBridgeEndpoint;
pub use client::InstantConnection;
pub use factory::InstantBotFactory;

/// Default Instant room URL template; `{}` is replaced with the room name
/// (spec §6). Overridable via the `INSTANT_ROOM_TEMPLATE` environment
/// variable at the call site, matching the original's deployment knob.
pub const DEFAULT_ROOM_TEMPLATE: &str = "wss://instant.leet.nu/room/{}/ws";

pub fn room_url(template: &str, room: &str) -> String {
    template.replacen("{}", room, 1)
}
