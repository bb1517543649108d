//! Nexus-wide configuration constants and environment overrides.

use std::time::Duration;

/// UNIX timestamp for 2014-11-30 00:00:00 UTC, in seconds. The Euphoria id
/// epoch. (The original bridge's comment notes the off-by-one in the
/// "2014-12-00" wording it inherited; the constant itself is correct.)
pub const EUPHORIA_ID_EPOCH_SECS: i64 = 1_417_305_600;

/// How long a freshly joined user's surrogate activation is deferred, to
/// absorb the "join then immediately part" ghost pattern.
pub const SURROGATE_DELAY: Duration = Duration::from_secs(2);

/// Hard cap on a single log-history request, regardless of what the
/// requester asked for.
pub const MAX_LOG_REQUEST: u32 = 100;

/// Template the bridge's own nickname is compared against for `!help @nick`.
pub const BRIDGE_NICKNAME: &str = "bridge";

/// Template for the help command's reply text. `%s` placeholders are filled
/// with the Euphoria and Instant room names, in that order.
pub const HELP_TEMPLATE: &str =
    "I relay messages between a Euphoria room (&{euphoria}) and an Instant room (&{instant}).";

/// Runtime configuration for a [`crate::nexus::Nexus`].
#[derive(Debug, Clone)]
pub struct NexusConfig {
    /// Path to the SQLite id-map database, or `None` for in-memory (state
    /// lost on restart).
    pub db_path: Option<String>,
    /// Euphoria room name, used in `!help` replies.
    pub euphoria_room: String,
    /// Instant room name, used in `!help` replies.
    pub instant_room: String,
    /// Delay before a newly joined user's surrogate may activate.
    pub surrogate_delay: Duration,
    /// Cap on a single log-history request.
    pub max_log_request: u32,
}

impl Default for NexusConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            euphoria_room: "test".to_string(),
            instant_room: "test".to_string(),
            surrogate_delay: SURROGATE_DELAY,
            max_log_request: MAX_LOG_REQUEST,
        }
    }
}

/// Reads `BRIDGE_DB_SYNC` and returns it if it looks like a valid
/// `PRAGMA synchronous` value (`^[A-Za-z0-9]+$`), per spec §6.
pub fn db_sync_pragma_override() -> Option<String> {
    let val = std::env::var("BRIDGE_DB_SYNC").ok()?;
    if !val.is_empty() && val.chars().all(|c| c.is_ascii_alphanumeric()) {
        Some(val)
    } else {
        None
    }
}
