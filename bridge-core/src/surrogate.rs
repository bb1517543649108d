//! Per-user impersonator bots (spec §4.4): one bot per observed remote
//! session, created lazily and kept only as long as there are actions
//! queued for its owner.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::types::Platform;

/// Invoked once a posted message's id is known, so the caller can record it
/// in the [`crate::message_store::MessageStore`].
pub type PostCallback = Box<dyn FnOnce(String) + Send>;

/// Invoked every time the bot transitions into the ready state (initial
/// connect, and again after any reconnect). Never owns bridge state
/// directly — it exists so [`crate::nexus::Nexus`] can re-drain a user's
/// action queue once their surrogate can actually speak.
pub type ReadyCallback = Arc<dyn Fn() + Send + Sync>;

/// A single impersonator connection to one platform, speaking as one
/// remote user. Implementations live in the `bridge-euphoria` and
/// `bridge-instant` crates; `bridge-core` only depends on this trait, per
/// the "no concrete platform dependency" boundary (spec §1 Non-goals).
pub trait SurrogateBot: Send + Sync {
    /// Whether the underlying connection has completed its handshake and
    /// can accept posts. Actions stay queued while this is false.
    fn ready(&self) -> bool;

    /// The nickname currently presented, if any.
    fn nickname(&self) -> Option<String>;

    /// Changes the presented nickname. A no-op if already set to `nick`.
    fn set_nickname(&self, nick: &str);

    /// Posts `text` as a reply to `parent` (platform-native parent id, or
    /// `None` for a top-level post). `seq` is an opaque dedup/idempotency
    /// token threaded through from the caller (`<platform>:<msgid>` for
    /// relayed user messages, or a `Nexus`-issued sequence for the
    /// bridge's own messages); implementations may ignore it but should
    /// pass it through to the underlying send API where one exists.
    /// `on_posted` fires with the new message's native id once accepted.
    fn submit_post(&self, parent: Option<String>, text: String, seq: String, on_posted: PostCallback);

    /// Disconnects. The bot must not be reused afterward.
    fn close(&self);
}

/// Builds bots on demand. One instance exists per bridge run and is
/// handed to the `Nexus` at construction time.
pub trait BotFactory: Send + Sync {
    /// Creates (and starts connecting) a surrogate that will impersonate
    /// the remote user described by `identity` on `platform` — note that
    /// `platform` names the side the surrogate *appears on*, the opposite
    /// of the side the impersonated user actually connected from.
    fn make_bot(&self, platform: Platform, identity: &str, on_ready: ReadyCallback) -> Arc<dyn SurrogateBot>;
}

/// Registry of live surrogates, keyed by owner identity (`"e/<id>"` or
/// `"i/<id>"`, see [`crate::types::UserRecord::bot_identity`]). Mirrors the
/// original's `Nexus.bots` dict plus its `bot_lock`.
#[derive(Default)]
pub struct SurrogatePool {
    bots: Mutex<HashMap<String, Arc<dyn SurrogateBot>>>,
}

impl SurrogatePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the bot for `identity`, creating it via `factory` if this is
    /// the first time it has been needed.
    pub fn get_or_create(
        &self,
        factory: &dyn BotFactory,
        platform: Platform,
        identity: &str,
        on_ready: ReadyCallback,
    ) -> Arc<dyn SurrogateBot> {
        let mut bots = self.bots.lock().unwrap();
        if let Some(bot) = bots.get(identity) {
            return bot.clone();
        }
        let bot = factory.make_bot(platform, identity, on_ready);
        bots.insert(identity.to_string(), bot.clone());
        bot
    }

    /// Drops and closes the bot for `identity`, if one exists. The caller
    /// is responsible for having already called [`SurrogateBot::close`].
    pub fn remove(&self, identity: &str) {
        self.bots.lock().unwrap().remove(identity);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeBot {
        ready: std::sync::atomic::AtomicBool,
        nick: Mutex<Option<String>>,
        posts: Mutex<Vec<(Option<String>, String, String)>>,
    }

    impl SurrogateBot for FakeBot {
        fn ready(&self) -> bool {
            self.ready.load(Ordering::SeqCst)
        }
        fn nickname(&self) -> Option<String> {
            self.nick.lock().unwrap().clone()
        }
        fn set_nickname(&self, nick: &str) {
            *self.nick.lock().unwrap() = Some(nick.to_string());
        }
        fn submit_post(&self, parent: Option<String>, text: String, seq: String, on_posted: PostCallback) {
            self.posts.lock().unwrap().push((parent, text, seq));
            on_posted("native-id".to_string());
        }
        fn close(&self) {
            self.ready.store(false, Ordering::SeqCst);
        }
    }

    struct CountingFactory {
        calls: AtomicUsize,
    }

    impl BotFactory for CountingFactory {
        fn make_bot(&self, _platform: Platform, _identity: &str, _on_ready: ReadyCallback) -> Arc<dyn SurrogateBot> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Arc::new(FakeBot {
                ready: std::sync::atomic::AtomicBool::new(true),
                nick: Mutex::new(None),
                posts: Mutex::new(Vec::new()),
            })
        }
    }

    #[test]
    fn get_or_create_is_memoized_per_identity() {
        let pool = SurrogatePool::new();
        let factory = CountingFactory { calls: AtomicUsize::new(0) };
        let cb: ReadyCallback = Arc::new(|| {});
        let a = pool.get_or_create(&factory, Platform::Instant, "e/1", cb.clone());
        let b = pool.get_or_create(&factory, Platform::Instant, "e/1", cb.clone());
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(factory.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn remove_forgets_the_bot_so_it_is_recreated() {
        let pool = SurrogatePool::new();
        let factory = CountingFactory { calls: AtomicUsize::new(0) };
        let cb: ReadyCallback = Arc::new(|| {});
        pool.get_or_create(&factory, Platform::Instant, "e/1", cb.clone());
        pool.remove("e/1");
        pool.get_or_create(&factory, Platform::Instant, "e/1", cb);
        assert_eq!(factory.calls.load(Ordering::SeqCst), 2);
    }
}
