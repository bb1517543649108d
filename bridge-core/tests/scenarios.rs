//! End-to-end coordinator behavior (spec §8): drives a bare `Nexus` with
//! fake surrogates and no real network I/O, exercising the same drain
//! algorithm the platform adapters feed in production.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bridge_core::{
    BotFactory, IncomingMessage, JoinEvent, Nexus, NexusConfig, Platform, PostCallback, ReadyCallback, RemoveEvent,
    SurrogateBot,
};

struct FakeBot {
    nick: Mutex<Option<String>>,
    ready: std::sync::atomic::AtomicBool,
    posts: Mutex<Vec<(Option<String>, String, String)>>,
}

impl FakeBot {
    fn new() -> Self {
        Self {
            nick: Mutex::new(None),
            ready: std::sync::atomic::AtomicBool::new(true),
            posts: Mutex::new(Vec::new()),
        }
    }
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
        let native_id = format!("native:{seq}");
        self.posts.lock().unwrap().push((parent, text, seq));
        on_posted(native_id);
    }
    fn close(&self) {
        self.ready.store(false, Ordering::SeqCst);
    }
}

/// Records every surrogate it has ever built, keyed by the identity string
/// it was asked for (`"e/<id>"` / `"i/<id>"`), so a test can both count
/// `make_bot` calls and reach into a specific surrogate's recorded posts.
#[derive(Default)]
struct FakeFactory {
    calls: AtomicUsize,
    bots: Mutex<HashMap<String, Arc<FakeBot>>>,
}

impl BotFactory for FakeFactory {
    fn make_bot(&self, _platform: Platform, identity: &str, _on_ready: ReadyCallback) -> Arc<dyn SurrogateBot> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let bot = Arc::new(FakeBot::new());
        self.bots.lock().unwrap().insert(identity.to_string(), bot.clone());
        bot
    }
}

impl FakeFactory {
    fn bot(&self, identity: &str) -> Arc<FakeBot> {
        self.bots.lock().unwrap().get(identity).cloned().expect("bot was created")
    }
}

fn new_nexus(config: NexusConfig) -> (Arc<Nexus>, Arc<FakeFactory>) {
    let nexus = Nexus::new(config).expect("in-memory store always opens");
    nexus.start().expect("start never fails without a db");
    let factory = Arc::new(FakeFactory::default());
    nexus.set_bot_factory(factory.clone());
    (nexus, factory)
}

/// The scheduler drains on its own background thread; give it a moment.
fn settle() {
    std::thread::sleep(Duration::from_millis(150));
}

fn shutdown(nexus: &Arc<Nexus>) {
    nexus.shutdown();
    nexus.join();
}

#[test]
fn plain_message_relay_creates_one_id_map_row() {
    let (nexus, factory) = new_nexus(NexusConfig::default());

    nexus.handle_message(IncomingMessage {
        platform: Platform::Euphoria,
        euphoria_id: Some("s1".to_string()),
        instant_id: None,
        nick: Some("alice".to_string()),
        msgid: "01ab".to_string(),
        parent: None,
        text: "hello".to_string(),
    });
    settle();

    let bot = factory.bot("e/s1");
    let posts = bot.posts.lock().unwrap();
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0], (None, "hello".to_string(), "euphoria:01ab".to_string()));
    assert_eq!(bot.nickname().as_deref(), Some("alice"));

    assert_eq!(nexus.message_bounds(Platform::Euphoria).unwrap().count, 1);
    shutdown(&nexus);
}

#[test]
fn threaded_reply_carries_the_translated_parent_across_sides() {
    let (nexus, factory) = new_nexus(NexusConfig::default());

    nexus.handle_message(IncomingMessage {
        platform: Platform::Euphoria,
        euphoria_id: Some("s1".to_string()),
        instant_id: None,
        nick: Some("alice".to_string()),
        msgid: "01ab".to_string(),
        parent: None,
        text: "hello".to_string(),
    });
    settle();

    // "native:euphoria:01ab" is alice's surrogate's deterministic posted id
    // on Instant (FakeBot::submit_post), i.e. what a real reply there would
    // carry as its parent.
    nexus.handle_message(IncomingMessage {
        platform: Platform::Instant,
        euphoria_id: None,
        instant_id: Some("i2".to_string()),
        nick: Some("bob".to_string()),
        msgid: "r1".to_string(),
        parent: Some("native:euphoria:01ab".to_string()),
        text: "hi alice".to_string(),
    });
    settle();

    let bot = factory.bot("i/i2");
    let posts = bot.posts.lock().unwrap();
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].0.as_deref(), Some("01ab"));
    assert_eq!(posts[0].1, "hi alice");
    shutdown(&nexus);
}

#[test]
fn reply_to_an_unmapped_parent_waits_for_the_mapping() {
    let (nexus, factory) = new_nexus(NexusConfig::default());

    nexus.handle_message(IncomingMessage {
        platform: Platform::Euphoria,
        euphoria_id: Some("s1".to_string()),
        instant_id: None,
        nick: Some("alice".to_string()),
        msgid: "01ab".to_string(),
        parent: Some("unknown-parent".to_string()),
        text: "hello".to_string(),
    });
    settle();

    let bot = factory.bot("e/s1");
    assert!(bot.posts.lock().unwrap().is_empty(), "must suspend until the parent resolves");

    nexus.add_mapping("unknown-parent", "instant-parent");
    settle();

    let posts = bot.posts.lock().unwrap();
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].0.as_deref(), Some("instant-parent"));
    shutdown(&nexus);
}

#[test]
fn ghost_join_never_relays_a_message() {
    let config = NexusConfig {
        surrogate_delay: Duration::from_millis(60),
        ..NexusConfig::default()
    };
    let (nexus, factory) = new_nexus(config);

    nexus.add_users(
        &[JoinEvent {
            euphoria_id: Some("ghost".to_string()),
            platform: Some(Platform::Euphoria),
            nick: Some("ghost-nick".to_string()),
            ..Default::default()
        }],
        true,
    );
    nexus.remove_users(&[RemoveEvent {
        euphoria_id: Some("ghost".to_string()),
        instant_id: None,
    }]);

    // Past the surrogate delay, so the deferred drain has had a chance to run.
    std::thread::sleep(Duration::from_millis(250));

    // The original this was ported from (and this port, see DESIGN.md)
    // always acquires a surrogate before draining a queue, even one that
    // only holds a nick change and a removal — so a transient connect is
    // acceptable. What scenario 4 actually promises is that nothing the
    // ghost "said" ever reaches the other side, since it never said
    // anything: no post, no id-map row.
    let bot = factory.bot("e/ghost");
    assert!(bot.posts.lock().unwrap().is_empty());
    assert!(!bot.ready(), "the transient surrogate must end up closed");
    assert_eq!(nexus.message_bounds(Platform::Euphoria).unwrap().count, 0);
    shutdown(&nexus);
}

#[test]
fn self_echo_is_dropped_before_a_surrogate_is_ever_created() {
    let (nexus, factory) = new_nexus(NexusConfig::default());

    nexus.ignore_users(&[JoinEvent {
        euphoria_id: Some("bridge-own-session".to_string()),
        platform: Some(Platform::Euphoria),
        ..Default::default()
    }]);

    nexus.handle_message(IncomingMessage {
        platform: Platform::Euphoria,
        euphoria_id: Some("bridge-own-session".to_string()),
        instant_id: None,
        nick: Some("bridge".to_string()),
        msgid: "echo1".to_string(),
        parent: None,
        text: "I relay messages between...".to_string(),
    });
    settle();

    assert_eq!(factory.calls.load(Ordering::SeqCst), 0, "an ignored user's actions must never reach a surrogate");
    assert_eq!(nexus.message_bounds(Platform::Euphoria).unwrap().count, 0);
    shutdown(&nexus);
}

#[test]
fn partition_cleanup_closes_every_surrogate_in_the_group() {
    let (nexus, factory) = new_nexus(NexusConfig::default());
    let group = ("s1".to_string(), "era1".to_string());

    nexus.handle_message(IncomingMessage {
        platform: Platform::Euphoria,
        euphoria_id: Some("u1".to_string()),
        instant_id: None,
        nick: Some("alice".to_string()),
        msgid: "m1".to_string(),
        parent: None,
        text: "hi".to_string(),
    });
    nexus.handle_message(IncomingMessage {
        platform: Platform::Euphoria,
        euphoria_id: Some("u2".to_string()),
        instant_id: None,
        nick: Some("carol".to_string()),
        msgid: "m2".to_string(),
        parent: None,
        text: "hey".to_string(),
    });
    settle();

    nexus.add_users(
        &[
            JoinEvent {
                euphoria_id: Some("u1".to_string()),
                platform: Some(Platform::Euphoria),
                group: Some(group.clone()),
                ..Default::default()
            },
            JoinEvent {
                euphoria_id: Some("u2".to_string()),
                platform: Some(Platform::Euphoria),
                group: Some(group.clone()),
                ..Default::default()
            },
        ],
        false,
    );
    settle();

    let bot1 = factory.bot("e/u1");
    let bot2 = factory.bot("e/u2");
    assert!(bot1.ready());
    assert!(bot2.ready());

    nexus.remove_group(&group);
    settle();

    assert!(!bot1.ready(), "partition cleanup must close every surrogate in the group");
    assert!(!bot2.ready());
    assert_eq!(factory.calls.load(Ordering::SeqCst), 2, "cleanup must not spin up new surrogates");
    shutdown(&nexus);
}
