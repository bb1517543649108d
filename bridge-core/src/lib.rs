//! Platform-independent coordinator for the Euphoria <-> Instant bridge.
//!
//! This crate knows nothing about WebSockets or either platform's wire
//! format; it owns the id map, the user index, the surrogate pool, and the
//! scheduler, and exposes the [`surrogate::BotFactory`] /
//! [`endpoint::BridgeEndpoint`] / [`endpoint::LogSource`] traits that the
//! `bridge-euphoria` and `bridge-instant` crates implement.

pub mod autolinker;
pub mod command;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod id_codec;
pub mod message_store;
pub mod nexus;
pub mod scheduler;
pub mod surrogate;
pub mod transcoder;
pub mod types;

pub use config::NexusConfig;
pub use error::{BridgeError, Result};
pub use nexus::{IncomingMessage, JoinEvent, Nexus, RemoveEvent, TranslatedLogMessage};
pub use surrogate::{BotFactory, PostCallback, ReadyCallback, SurrogateBot};
pub use types::Platform;
