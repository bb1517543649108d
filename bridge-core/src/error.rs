//! Error kinds the core distinguishes (spec §7).

/// Errors surfaced by `bridge-core`. Nothing in here is fatal to the
/// `Nexus` itself — callers log and drop the affected action, except where
/// noted.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// The 1024-slot sequence space for a single Euphoria timestamp was
    /// exhausted while synthesizing an Instant id.
    #[error("exhausted all 1024 sequence slots for timestamp")]
    TranslateExhausted,

    /// Caller asked to synthesize an id on a side that cannot be
    /// synthesized (only Euphoria -> Instant synthesis is supported).
    #[error("cannot synthesize an id on this side")]
    TranslateUnsupported,

    /// A message's parent has no counterpart id yet; the caller should
    /// suspend via `watch_id` rather than treat this as failure.
    #[error("parent id has no counterpart yet")]
    ParentUnavailable,

    /// An event from a platform adapter had an unexpected shape.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// The underlying platform connection for a surrogate closed.
    #[error("surrogate connection closed: {0}")]
    Disconnect(String),

    /// Log query asked for a lower bound from a platform whose API does
    /// not support one directly (spec §4.8).
    #[error("platform does not support this log query")]
    UnsupportedLogQuery,

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, BridgeError>;
