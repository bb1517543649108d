//! The coordinator tying together the id map, user index, surrogate pool,
//! and scheduler (spec §4.7) — the platform-independent heart of the
//! bridge. Platform adapters feed it events and read `Nexus` back out
//! through the [`crate::endpoint::BridgeEndpoint`] / [`crate::surrogate::BotFactory`]
//! traits; nothing in this module knows about WebSockets or either
//! platform's wire format.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::command;
use crate::config::NexusConfig;
use crate::endpoint::{BridgeEndpoint, LogMessage, LogSource};
use crate::error::{BridgeError, Result};
use crate::message_store::{Bounds, MessageStore};
use crate::scheduler::{Scheduler, Timestamp};
use crate::surrogate::{BotFactory, ReadyCallback, SurrogatePool};
use crate::transcoder;
use crate::types::{Group, Platform, QueuedAction, SpeakAction, UserHandle, UserIndex, UserQuery};

/// A user observed joining (or already present on) one side of the
/// bridge. `platform` is the side they connected from.
#[derive(Debug, Clone, Default)]
pub struct JoinEvent {
    pub euphoria_id: Option<String>,
    pub instant_id: Option<String>,
    pub platform: Option<Platform>,
    pub group: Option<Group>,
    pub nick: Option<String>,
}

/// A user observed leaving one side of the bridge.
#[derive(Debug, Clone, Default)]
pub struct RemoveEvent {
    pub euphoria_id: Option<String>,
    pub instant_id: Option<String>,
}

/// A chat message observed on one side of the bridge.
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub platform: Platform,
    pub euphoria_id: Option<String>,
    pub instant_id: Option<String>,
    pub nick: Option<String>,
    pub msgid: String,
    pub parent: Option<String>,
    pub text: String,
}

/// A history message with both of its ids resolved, ready for the
/// requesting platform to render.
#[derive(Debug, Clone)]
pub struct TranslatedLogMessage {
    pub id: String,
    pub parent: Option<String>,
    pub nick: String,
    pub text: String,
    pub timestamp_ms: i64,
}

impl Platform {
    /// The side a surrogate impersonating a user from this platform
    /// appears on.
    pub fn opposite(self) -> Platform {
        match self {
            Platform::Euphoria => Platform::Instant,
            Platform::Instant => Platform::Euphoria,
        }
    }
}

pub struct Nexus {
    config: NexusConfig,
    index: Mutex<UserIndex>,
    messages: Arc<MessageStore>,
    scheduler: Scheduler,
    bots: SurrogatePool,
    bot_factory: Mutex<Option<Arc<dyn BotFactory>>>,
    euphoria: Mutex<Option<Arc<dyn BridgeEndpoint>>>,
    instant: Mutex<Option<Arc<dyn BridgeEndpoint>>>,
    log_source: Mutex<Option<Arc<dyn LogSource>>>,
    seq: AtomicU64,
}

impl Nexus {
    /// Opens the id map and spawns the scheduler thread. The bot factory
    /// and endpoints are attached afterward via [`Nexus::set_bot_factory`]
    /// and [`Nexus::set_endpoints`], since the platform adapters that
    /// implement them typically need a `Nexus` reference themselves (the
    /// same circular-construction problem the original's
    /// `nexus.euphoria_bot = ...` post-assignment solves).
    pub fn new(config: NexusConfig) -> Result<Arc<Self>> {
        let messages = Arc::new(MessageStore::open(config.db_path.as_deref())?);
        Ok(Arc::new(Self {
            config,
            index: Mutex::new(UserIndex::default()),
            messages,
            scheduler: Scheduler::start(),
            bots: SurrogatePool::new(),
            bot_factory: Mutex::new(None),
            euphoria: Mutex::new(None),
            instant: Mutex::new(None),
            log_source: Mutex::new(None),
            seq: AtomicU64::new(0),
        }))
    }

    pub fn set_bot_factory(&self, factory: Arc<dyn BotFactory>) {
        *self.bot_factory.lock().unwrap() = Some(factory);
    }

    pub fn set_endpoints(&self, euphoria: Arc<dyn BridgeEndpoint>, instant: Arc<dyn BridgeEndpoint>) {
        *self.euphoria.lock().unwrap() = Some(euphoria);
        *self.instant.lock().unwrap() = Some(instant);
    }

    pub fn set_log_source(&self, source: Arc<dyn LogSource>) {
        *self.log_source.lock().unwrap() = Some(source);
    }

    /// Runs startup GC (discarding any rows left over from a previous run
    /// that never resolved) and logs what it found.
    pub fn start(&self) -> Result<()> {
        tracing::info!("starting");
        let discarded = self.messages.gc()?;
        match discarded {
            0 => {}
            1 => tracing::warn!("discarded 1 incomplete mapping"),
            n => tracing::warn!(count = n, "discarded incomplete mappings"),
        }
        Ok(())
    }

    pub fn shutdown(&self) {
        self.scheduler.shutdown();
    }

    pub fn join(&self) {
        self.scheduler.join();
    }

    fn next_sequence(&self) -> String {
        format!("nexus:{}", self.seq.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Registers `users` as present, optionally deferring their surrogate
    /// activation by [`crate::config::NexusConfig::surrogate_delay`] if
    /// `new` (a fresh join rather than a roster sync).
    pub fn add_users(self: &Arc<Self>, users: &[JoinEvent], new: bool) {
        self.add_users_impl(users, new, true);
    }

    fn add_users_impl(self: &Arc<Self>, users: &[JoinEvent], new: bool, run: bool) -> Vec<UserHandle> {
        let delay = if new {
            Some(self.scheduler.time() + self.config.surrogate_delay.as_secs_f64())
        } else {
            None
        };

        let mut pending = Vec::with_capacity(users.len());
        {
            let mut index = self.index.lock().unwrap();
            for u in users {
                let query = UserQuery {
                    euphoria_id: u.euphoria_id.clone(),
                    instant_id: u.instant_id.clone(),
                    ..Default::default()
                };
                let handle = index
                    .get_or_create(&query, true)
                    .expect("get_or_create(create=true) always returns Some");
                {
                    let mut rec = handle.lock().unwrap();
                    if let Some(p) = u.platform {
                        rec.platform = Some(p);
                    }
                    if let Some(g) = &u.group {
                        rec.group = Some(g.clone());
                    }
                    if let Some(nick) = &u.nick {
                        rec.nick = Some(nick.clone());
                        rec.actions.push_back(QueuedAction {
                            nick: Some(nick.clone()),
                            ..Default::default()
                        });
                    }
                    if let Some(d) = delay {
                        if rec.delay.is_none_or(|existing| existing < d) {
                            rec.delay = Some(d);
                        }
                    }
                }
                pending.push(handle);
            }
        }

        if run {
            let nexus = self.clone();
            let entries = pending.clone();
            match delay {
                Some(d) => self.scheduler.add_abs(d, move || nexus.perform_actions(&entries)),
                None => self.scheduler.add_now(move || nexus.perform_actions(&entries)),
            }
        }
        pending
    }

    /// Drops `users` from the index and queues their surrogates for
    /// removal.
    pub fn remove_users(self: &Arc<Self>, users: &[RemoveEvent]) {
        let mut pending = Vec::new();
        {
            let mut index = self.index.lock().unwrap();
            for u in users {
                if let Some(id) = &u.euphoria_id {
                    if let Some(handle) = index.remove_euphoria(id) {
                        handle.lock().unwrap().actions.push_back(QueuedAction {
                            remove: true,
                            ..Default::default()
                        });
                        pending.push(handle);
                    }
                }
                if let Some(id) = &u.instant_id {
                    if let Some(handle) = index.remove_instant(id) {
                        handle.lock().unwrap().actions.push_back(QueuedAction {
                            remove: true,
                            ..Default::default()
                        });
                        pending.push(handle);
                    }
                }
            }
        }
        let nexus = self.clone();
        self.scheduler.add_now(move || nexus.perform_actions(&pending));
    }

    /// Removes every user whose `group` matches, per a network-partition
    /// notification from a platform adapter.
    pub fn remove_group(self: &Arc<Self>, group: &Group) {
        let queries = {
            let index = self.index.lock().unwrap();
            index.matching_group(group)
        };
        let events: Vec<RemoveEvent> = queries
            .into_iter()
            .map(|q| RemoveEvent {
                euphoria_id: q.euphoria_id,
                instant_id: q.instant_id,
            })
            .collect();
        self.remove_users(&events);
    }

    /// Marks `users` so no surrogate is ever created for them and any
    /// actions queued on their behalf are discarded. Used for the
    /// bridge's own two accounts and for each surrogate's reflected
    /// presence, to prevent relay loops.
    pub fn ignore_users(self: &Arc<Self>, users: &[JoinEvent]) {
        let handles = self.add_users_impl(users, false, false);
        for h in handles {
            h.lock().unwrap().ignore = true;
        }
    }

    /// Relays an observed chat message and, if it is a recognized bridge
    /// command, replies to it.
    pub fn handle_message(self: &Arc<Self>, msg: IncomingMessage) {
        let join = JoinEvent {
            euphoria_id: msg.euphoria_id.clone(),
            instant_id: msg.instant_id.clone(),
            platform: Some(msg.platform),
            group: None,
            nick: msg.nick.clone(),
        };
        let handles = self.add_users_impl(std::slice::from_ref(&join), false, false);
        let handle = handles
            .into_iter()
            .next()
            .expect("add_users_impl returns exactly one handle per input");

        let translated_text = transcoder::translate(msg.platform, &msg.text);
        let ignore = {
            let mut rec = handle.lock().unwrap();
            rec.actions.push_back(QueuedAction {
                speak: Some(SpeakAction {
                    text: translated_text.clone(),
                    msgid: msg.msgid.clone(),
                    parent: msg.parent.clone(),
                }),
                ..Default::default()
            });
            rec.ignore
        };

        let nexus = self.clone();
        let entries = vec![handle];
        self.scheduler.add_now(move || nexus.perform_actions(&entries));

        if !ignore && translated_text.starts_with('!') {
            let tokens = command::parse_command(&translated_text);
            let nexus = self.clone();
            let platform = msg.platform;
            let msgid = msg.msgid.clone();
            command::dispatch(&tokens, &self.config.euphoria_room, &self.config.instant_room, move |text| {
                nexus.send_bridge_message(platform, Some(&msgid), text);
            });
        }
    }

    /// Records a known `(euphoria_id, instant_id)` pair directly, as when
    /// an external source already knows both sides of a mapping.
    pub fn add_mapping(&self, euphoria_id: &str, instant_id: &str) {
        if let Err(e) = self
            .messages
            .update_ids(Platform::Euphoria, &[(Some(euphoria_id.to_string()), Some(instant_id.to_string()))])
        {
            tracing::warn!(error = %e, "failed to record id mapping");
        }
    }

    /// Best-effort warm-up: resolves (and if needed, synthesizes)
    /// translations for `ids` without caring about the result, so later
    /// lookups hit cache rather than synthesizing inline.
    pub fn gather_ids(&self, platform: Platform, ids: &[Option<String>]) {
        if let Err(e) = self.messages.translate_ids(platform, ids, true) {
            tracing::warn!(error = %e, "could not gather up message ids");
        }
    }

    pub fn message_bounds(&self, platform: Platform) -> Result<Bounds> {
        let (euphoria, instant) = self.messages.get_bounds()?;
        Ok(match platform {
            Platform::Euphoria => euphoria,
            Platform::Instant => instant,
        })
    }

    /// Serves a history request. Only Instant can request history (it has
    /// no history of its own; Euphoria's log is the source of truth), per
    /// the original's restriction.
    pub fn request_messages(
        self: &Arc<Self>,
        platform: Platform,
        before: Option<String>,
        after: Option<String>,
        max_len: Option<u32>,
        callback: impl FnOnce(Vec<TranslatedLogMessage>) + Send + 'static,
    ) -> Result<()> {
        if platform != Platform::Instant {
            return Err(BridgeError::UnsupportedLogQuery);
        }
        let max_len = max_len.map(|m| m.min(self.config.max_log_request)).unwrap_or(self.config.max_log_request);

        let nexus = self.clone();
        self.messages.watch_id(Platform::Instant, before.as_deref(), move |translated_before| {
            let nexus2 = nexus.clone();
            nexus.scheduler.add_now(move || {
                nexus2.run_log_query(translated_before, after, max_len, callback);
            });
        })
    }

    fn run_log_query(
        self: &Arc<Self>,
        translated_before: Option<String>,
        after: Option<String>,
        max_len: u32,
        callback: impl FnOnce(Vec<TranslatedLogMessage>) + Send + 'static,
    ) {
        let Some(log_source) = self.log_source.lock().unwrap().clone() else {
            return;
        };
        let nexus = self.clone();
        log_source.query_logs(
            translated_before,
            max_len,
            Box::new(move |logs| nexus.process_logs(logs, after, callback)),
        );
    }

    fn process_logs(
        self: &Arc<Self>,
        logs: Vec<LogMessage>,
        after: Option<String>,
        callback: impl FnOnce(Vec<TranslatedLogMessage>) + Send + 'static,
    ) {
        let mut ids: Vec<Option<String>> = Vec::with_capacity(logs.len() * 2);
        for msg in &logs {
            ids.push(Some(msg.id.clone()));
            if let Some(parent) = &msg.parent {
                ids.push(Some(parent.clone()));
            }
        }
        let nexus = self.clone();
        if let Err(e) = self.messages.watch_ids(Platform::Euphoria, &ids, true, move |mapping| {
            nexus.finish_request_messages(logs, mapping, after, callback);
        }) {
            tracing::warn!(error = %e, "could not translate log message ids");
        }
    }

    /// Translates and filters logged messages.
    ///
    /// Euphoria has no way to query "downward" from a message, so
    /// `request_messages` ignores `after` up to here, over-fetching from
    /// `before` and cutting the excess out now. This is only correct as
    /// long as fewer than `max_log_request` messages were missed since the
    /// last successful sync, matching the original's documented caveat.
    fn finish_request_messages(
        &self,
        logs: Vec<LogMessage>,
        mapping: HashMap<String, Option<String>>,
        after: Option<String>,
        callback: impl FnOnce(Vec<TranslatedLogMessage>) + Send + 'static,
    ) {
        let mut result = Vec::new();
        for msg in logs {
            let Some(translated_id) = mapping.get(&msg.id).cloned().flatten() else {
                continue;
            };
            if let Some(after) = &after {
                if &translated_id < after {
                    continue;
                }
            }
            let translated_parent = msg.parent.as_ref().and_then(|p| mapping.get(p).cloned().flatten());
            result.push(TranslatedLogMessage {
                id: translated_id,
                parent: translated_parent,
                nick: msg.sender_nick,
                text: transcoder::translate(Platform::Euphoria, &msg.text),
                timestamp_ms: msg.timestamp_ms,
            });
        }
        callback(result);
    }

    /// Posts `text` as the bridge's own message on both platforms,
    /// replying to `parent` (native to `platform`), and correlates the two
    /// resulting native ids once both are known.
    pub fn send_bridge_message(self: &Arc<Self>, platform: Platform, parent: Option<&str>, text: String) {
        let nexus = self.clone();
        let parent_owned = parent.map(|s| s.to_string());
        self.messages.watch_id(platform, parent, move |other| {
            let (euphoria_parent, instant_parent) = match platform {
                Platform::Euphoria => (parent_owned, other),
                Platform::Instant => (other, parent_owned),
            };
            let nexus2 = nexus.clone();
            nexus.scheduler.add_now(move || {
                nexus2.do_send_bridge_message(euphoria_parent, instant_parent, text);
            });
        }).ok();
    }

    fn do_send_bridge_message(self: &Arc<Self>, euphoria_parent: Option<String>, instant_parent: Option<String>, text: String) {
        let euphoria = self.euphoria.lock().unwrap().clone();
        let instant = self.instant.lock().unwrap().clone();
        let (Some(euphoria), Some(instant)) = (euphoria, instant) else {
            tracing::warn!("cannot send bridge message before both endpoints are attached");
            return;
        };

        let ids: Arc<Mutex<(Option<String>, Option<String>)>> = Arc::new(Mutex::new((None, None)));

        let nexus_e = self.clone();
        let ids_e = ids.clone();
        euphoria.submit_post(
            euphoria_parent,
            text.clone(),
            self.next_sequence(),
            Box::new(move |posted_id| {
                let nexus = nexus_e.clone();
                nexus_e.scheduler.add_now(move || {
                    let counterpart = {
                        let mut guard = ids_e.lock().unwrap();
                        guard.0 = Some(posted_id);
                        guard.1.clone()
                    };
                    if let Some(instant_id) = counterpart {
                        let euphoria_id = ids_e.lock().unwrap().0.clone().unwrap();
                        nexus.add_mapping(&euphoria_id, &instant_id);
                    }
                });
            }),
        );

        let nexus_i = self.clone();
        let ids_i = ids.clone();
        instant.submit_post(
            instant_parent,
            text,
            self.next_sequence(),
            Box::new(move |posted_id| {
                let nexus = nexus_i.clone();
                nexus_i.scheduler.add_now(move || {
                    let counterpart = {
                        let mut guard = ids_i.lock().unwrap();
                        guard.1 = Some(posted_id);
                        guard.0.clone()
                    };
                    if let Some(euphoria_id) = counterpart {
                        let instant_id = ids_i.lock().unwrap().1.clone().unwrap();
                        nexus.add_mapping(&euphoria_id, &instant_id);
                    }
                });
            }),
        );
    }

    /// Drains as much of each entry's action queue as its surrogate's
    /// readiness and pending parent translations allow. Always runs on
    /// the scheduler thread.
    fn perform_actions(self: &Arc<Self>, entries: &[UserHandle]) {
        let now = self.scheduler.time();
        for entry in entries {
            self.drain_one(entry, now);
        }
    }

    fn drain_one(self: &Arc<Self>, entry: &UserHandle, now: Timestamp) {
        let platform = {
            let mut rec = entry.lock().unwrap();
            if rec.ignore {
                rec.actions.clear();
                return;
            }
            if rec.actions.is_empty() {
                return;
            }
            if rec.delay.is_some_and(|d| d > now) {
                return;
            }
            match rec.platform {
                Some(p) => p,
                None => return,
            }
        };

        let Some(identity) = entry.lock().unwrap().bot_identity() else {
            return;
        };
        let bot_platform = platform.opposite();

        let entry_for_runner = entry.clone();
        let nexus_for_runner = self.clone();
        let runner: ReadyCallback = Arc::new(move || {
            let now = nexus_for_runner.scheduler.time();
            nexus_for_runner.drain_one(&entry_for_runner, now);
        });
        let factory = self.bot_factory.lock().unwrap().clone();
        let Some(factory) = factory else {
            tracing::warn!("no bot factory attached yet, dropping drain attempt");
            return;
        };
        let bot = self.bots.get_or_create(factory.as_ref(), bot_platform, &identity, runner);

        if !bot.ready() {
            return;
        }

        loop {
            let action = match entry.lock().unwrap().actions.pop_front() {
                Some(a) => a,
                None => break,
            };

            if let Some(nick) = &action.nick {
                if bot.nickname().as_deref() != Some(nick.as_str()) {
                    bot.set_nickname(nick);
                }
            }

            if let Some(speak) = &action.speak {
                let translated_parent = match self.messages.translate_id(platform, speak.parent.as_deref(), false) {
                    Ok(p) => p,
                    Err(e) => {
                        tracing::warn!(
                            platform = %platform,
                            parent = ?speak.parent,
                            error = %e,
                            "could not translate message parent id"
                        );
                        continue;
                    }
                };

                if speak.parent.is_some() && translated_parent.is_none() {
                    let entry_for_resume = entry.clone();
                    let nexus_for_resume = self.clone();
                    let _ = self.messages.watch_id(platform, speak.parent.as_deref(), move |_resolved| {
                        let now = nexus_for_resume.scheduler.time();
                        nexus_for_resume.drain_one(&entry_for_resume, now);
                    });
                    entry.lock().unwrap().actions.push_front(action);
                    break;
                }

                let seq = format!("{platform}:{}", speak.msgid);
                let msgid = speak.msgid.clone();
                let nexus = self.clone();
                bot.submit_post(
                    translated_parent,
                    speak.text.clone(),
                    seq,
                    Box::new(move |native_id| {
                        let pair = match platform {
                            Platform::Euphoria => (Some(msgid), Some(native_id)),
                            Platform::Instant => (Some(native_id), Some(msgid)),
                        };
                        if let Err(e) = nexus.messages.update_ids(Platform::Euphoria, &[pair]) {
                            tracing::warn!(error = %e, "failed to record relayed message id");
                        }
                    }),
                );
            }

            if action.remove {
                bot.close();
                self.bots.remove(&identity);
            }
        }
    }
}
