//! Core data model (spec §3).

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use crate::scheduler::Timestamp;

/// Which side of the bridge a user, message, or action originated on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    Euphoria,
    Instant,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Euphoria => "euphoria",
            Platform::Instant => "instant",
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Partition key on Euphoria: `(server_id, server_era)`. Used to bulk-remove
/// users when the upstream signals a network partition.
pub type Group = (String, String);

/// A pending operation queued on a user record. Mirrors the original's
/// untyped per-event dict: any subset of a nickname change, a message to
/// relay, and a removal request may be carried by the same queue entry.
#[derive(Debug, Clone, Default)]
pub struct QueuedAction {
    /// If set and different from the surrogate's current nickname, renames
    /// it before anything else in this entry is processed.
    pub nick: Option<String>,
    /// If set, relay this message once a parent translation is available.
    pub speak: Option<SpeakAction>,
    /// If true, close the surrogate and forget it after this entry drains.
    pub remove: bool,
}

#[derive(Debug, Clone)]
pub struct SpeakAction {
    pub text: String,
    /// Origin-platform id of the message being relayed, used to key the
    /// synthesized id-map row and as the outgoing post's dedup token.
    pub msgid: String,
    pub parent: Option<String>,
}

/// One observed remote session, indexed by whichever of `euphoria_id` /
/// `instant_id` is known.
#[derive(Debug, Default)]
pub struct UserRecord {
    pub euphoria_id: Option<String>,
    pub instant_id: Option<String>,
    pub nick: Option<String>,
    /// If set, no surrogate is ever created and any enqueued actions are
    /// discarded on drain. Used for the bridge's own sessions and for each
    /// surrogate's own reflected session, to prevent loops.
    pub ignore: bool,
    /// Absolute scheduler time before which surrogate activation is
    /// suppressed.
    pub delay: Option<Timestamp>,
    pub group: Option<Group>,
    /// The platform this user was last observed on (origin platform for
    /// queued `Speak` actions without one of their own).
    pub platform: Option<Platform>,
    pub actions: VecDeque<QueuedAction>,
}

impl UserRecord {
    fn new() -> Self {
        Self::default()
    }

    /// Identity string used to key the surrogate pool: `"e/<id>"` or
    /// `"i/<id>"`, preferring the side opposite of `platform` (the side the
    /// surrogate impersonates on), falling back to whichever id is set.
    pub fn bot_identity(&self) -> Option<String> {
        if let Some(id) = &self.euphoria_id {
            return Some(format!("e/{id}"));
        }
        if let Some(id) = &self.instant_id {
            return Some(format!("i/{id}"));
        }
        None
    }
}

pub type UserHandle = Arc<Mutex<UserRecord>>;

/// Index of user records by each platform's session id. A single record is
/// reachable from both maps once both platforms have been correlated for it
/// (rare for end users, common for the bridge's own self-ignore entries
/// after a round trip).
#[derive(Default)]
pub struct UserIndex {
    pub by_euphoria: HashMap<String, UserHandle>,
    pub by_instant: HashMap<String, UserHandle>,
}

/// A lookup query identifying a user by either or both platform ids.
#[derive(Debug, Clone, Default)]
pub struct UserQuery {
    pub euphoria_id: Option<String>,
    pub instant_id: Option<String>,
    pub platform: Option<Platform>,
    pub group: Option<Group>,
    pub nick: Option<String>,
}

impl UserIndex {
    /// Find or create the record matching `query`, per spec §4.7
    /// `_get_user`. Returns `None` only if `create` is false and no record
    /// matches.
    pub fn get_or_create(&mut self, query: &UserQuery, create: bool) -> Option<UserHandle> {
        let mut found: Option<UserHandle> = None;

        if let Some(id) = &query.euphoria_id {
            if let Some(existing) = self.by_euphoria.get(id) {
                found = Some(existing.clone());
            } else if create {
                let rec = Arc::new(Mutex::new(UserRecord::new()));
                rec.lock().unwrap().euphoria_id = Some(id.clone());
                self.by_euphoria.insert(id.clone(), rec.clone());
                found = Some(rec);
            }
        }

        if let Some(id) = &query.instant_id {
            if let Some(existing) = self.by_instant.get(id) {
                found = Some(existing.clone());
            } else if create {
                let rec = found.unwrap_or_else(|| Arc::new(Mutex::new(UserRecord::new())));
                rec.lock().unwrap().instant_id = Some(id.clone());
                self.by_instant.insert(id.clone(), rec.clone());
                found = Some(rec);
            }
        }

        found
    }

    pub fn remove_euphoria(&mut self, id: &str) -> Option<UserHandle> {
        self.by_euphoria.remove(id)
    }

    pub fn remove_instant(&mut self, id: &str) -> Option<UserHandle> {
        self.by_instant.remove(id)
    }

    /// All records (deduplicated) whose `group` equals `group`.
    pub fn matching_group(&self, group: &Group) -> Vec<UserQuery> {
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        for rec in self.by_euphoria.values().chain(self.by_instant.values()) {
            let guard = rec.lock().unwrap();
            if guard.group.as_ref() == Some(group) {
                let key = (guard.euphoria_id.clone(), guard.instant_id.clone());
                if seen.insert(key) {
                    out.push(UserQuery {
                        euphoria_id: guard.euphoria_id.clone(),
                        instant_id: guard.instant_id.clone(),
                        ..Default::default()
                    });
                }
            }
        }
        out
    }
}
