//! The bridge's own two connections (spec §4.6/§4.8) — as opposed to the
//! per-user surrogates in [`crate::surrogate`], these speak as the bridge
//! itself and are the only connections that can serve history queries.

use crate::surrogate::SurrogateBot;

/// One platform connection belonging to the bridge's own account. Extends
/// [`SurrogateBot`] with the room name `Nexus` needs for `!help` replies.
pub trait BridgeEndpoint: SurrogateBot {
    fn roomname(&self) -> String;
}

/// A message returned from a history query, in the querying platform's
/// native representation (ids untranslated).
#[derive(Debug, Clone)]
pub struct LogMessage {
    pub id: String,
    pub parent: Option<String>,
    pub sender_nick: String,
    pub text: String,
    pub timestamp_ms: i64,
}

/// History query support. Only the Euphoria side implements this; per the
/// original's restriction, Instant cannot be queried for log history
/// (surfaced as [`crate::error::BridgeError::UnsupportedLogQuery`]).
pub trait LogSource: Send + Sync {
    /// Requests up to `max_len` messages at or after `before` (an id
    /// native to this source's platform, already translated by the
    /// caller), calling `callback` with the results.
    fn query_logs(&self, before: Option<String>, max_len: u32, callback: Box<dyn FnOnce(Vec<LogMessage>) + Send>);
}
