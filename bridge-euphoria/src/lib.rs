//! Euphoria/Heim adapter: the A-side half of spec component C8.

pub mod bot;
pub mod client;
pub mod factory;
pub mod relay;
pub mod wire;

pub use bot::EuphoriaBridgeEndpoint;
pub use client::EuphoriaConnection;
pub use factory::EuphoriaBotFactory;

/// Default Euphoria base URL; the room's WebSocket endpoint is
/// `{base}/room/{room}/ws`.
pub const DEFAULT_BASE_URL: &str = "wss://euphoria.leet.nu";

pub fn room_url(base: &str, room: &str) -> String {
    format!("{}/room/{room}/ws", base.trim_end_matches('/'))
}
