//! Persistent bijective id map between Euphoria and Instant message ids
//! (spec §4.3), plus the watcher mechanism used to defer work until a
//! counterpart id becomes known.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use rusqlite::{Connection, OptionalExtension, params};

use crate::config::db_sync_pragma_override;
use crate::error::{BridgeError, Result};
use crate::id_codec::{euphoria_id_to_timestamp, timestamp_to_instant_id};
use crate::types::Platform;

/// Callback invoked once the counterpart id becomes known (or immediately,
/// with `None`, if the requested id itself was `None`).
type IdCallback = Box<dyn FnOnce(Option<String>) + Send>;

/// Counts and bounds of the id map, per side (spec §4.8 `get_bounds`).
#[derive(Debug, Clone, Default)]
pub struct Bounds {
    pub min: Option<String>,
    pub max: Option<String>,
    pub count: i64,
}

struct Inner {
    conn: Connection,
    watchers: HashMap<(Platform, String), Vec<IdCallback>>,
}

impl Inner {
    /// Pops every watcher registered for `(platform, id)` on either side of
    /// a newly-resolved `(euphoria, instant)` pair, without invoking them —
    /// callers run the returned closures only after releasing the store's
    /// lock (spec §5, §9: no watcher callback executes while the store
    /// lock is held, since a callback may re-enter the store).
    fn take_watchers(&mut self, euphoria: &str, instant: &str) -> Vec<(Option<String>, IdCallback)> {
        let mut out = Vec::new();
        if let Some(ws) = self.watchers.remove(&(Platform::Euphoria, euphoria.to_string())) {
            out.extend(ws.into_iter().map(|w| (Some(instant.to_string()), w)));
        }
        if let Some(ws) = self.watchers.remove(&(Platform::Instant, instant.to_string())) {
            out.extend(ws.into_iter().map(|w| (Some(euphoria.to_string()), w)));
        }
        out
    }
}

/// Id map and watcher registry. One instance is shared by the whole
/// `Nexus`; every method takes `&self` and locks internally, matching the
/// Python original's single `threading.RLock`-guarded `MessageStore`
/// (reentrancy is not needed here because watcher callbacks are invoked
/// only after the lock has been released — the two-phase firing in
/// [`Inner::take_watchers`] plus [`run_fired`]).
pub struct MessageStore {
    inner: Mutex<Inner>,
}

impl MessageStore {
    /// Opens (or creates) the id map at `db_path`, or an in-memory database
    /// if `None`.
    pub fn open(db_path: Option<&str>) -> Result<Self> {
        let conn = match db_path {
            Some(path) => Connection::open(path)?,
            None => Connection::open_in_memory()?,
        };
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        if let Some(sync) = db_sync_pragma_override() {
            conn.execute_batch(&format!("PRAGMA synchronous = {sync}"))?;
        }
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS id_map (
                euphoria TEXT UNIQUE,
                instant TEXT UNIQUE
            );",
        )?;
        Ok(Self {
            inner: Mutex::new(Inner {
                conn,
                watchers: HashMap::new(),
            }),
        })
    }

    /// Deletes rows where either side is still unresolved. Returns the
    /// number of rows removed.
    pub fn gc(&self) -> Result<usize> {
        let inner = self.inner.lock().unwrap();
        let n = inner
            .conn
            .execute("DELETE FROM id_map WHERE euphoria IS NULL OR instant IS NULL", [])?;
        Ok(n)
    }

    /// Min/max/count of each side of the map.
    pub fn get_bounds(&self) -> Result<(Bounds, Bounds)> {
        let inner = self.inner.lock().unwrap();
        inner
            .conn
            .query_row(
                "SELECT MIN(euphoria), MAX(euphoria), COUNT(euphoria), \
                        MIN(instant), MAX(instant), COUNT(instant) FROM id_map",
                [],
                |row| {
                    Ok((
                        Bounds {
                            min: row.get(0)?,
                            max: row.get(1)?,
                            count: row.get(2)?,
                        },
                        Bounds {
                            min: row.get(3)?,
                            max: row.get(4)?,
                            count: row.get(5)?,
                        },
                    ))
                },
            )
            .map_err(BridgeError::from)
    }

    /// Looks up the counterpart of each of `ids` (ids on `platform`),
    /// synthesizing one if `create` is true and no mapping exists yet.
    /// `None` entries in `ids` are skipped, per the original's "no id yet"
    /// convention.
    pub fn translate_ids(
        &self,
        platform: Platform,
        ids: &[Option<String>],
        create: bool,
    ) -> Result<HashMap<String, Option<String>>> {
        let mut inner = self.inner.lock().unwrap();
        let (ret, fired) = Self::translate_ids_locked(&mut inner, platform, ids, create)?;
        drop(inner);
        run_fired(fired);
        Ok(ret)
    }

    /// Core lookup/synthesis logic. Returns the resolved map plus any
    /// watchers that became runnable as a side effect of synthesis, which
    /// the caller must run after releasing `inner`'s lock.
    fn translate_ids_locked(
        inner: &mut Inner,
        platform: Platform,
        ids: &[Option<String>],
        create: bool,
    ) -> Result<(HashMap<String, Option<String>>, Vec<(Option<String>, IdCallback)>)> {
        let mut ret: HashMap<String, Option<String>> = HashMap::new();
        let mut unresolved: Vec<String> = Vec::new();
        let mut fired = Vec::new();

        for id in ids {
            let Some(id) = id else { continue };
            if ret.contains_key(id) {
                continue;
            }
            // A matching row can still have a NULL counterpart (reserved
            // but unresolved); `.flatten()` treats that the same as no row
            // at all, rather than surfacing a type-conversion error.
            let found: Option<String> = match platform {
                Platform::Euphoria => inner
                    .conn
                    .query_row(
                        "SELECT instant FROM id_map WHERE euphoria = ?1",
                        params![id],
                        |row| row.get::<_, Option<String>>(0),
                    )
                    .optional()?
                    .flatten(),
                Platform::Instant => inner
                    .conn
                    .query_row(
                        "SELECT euphoria FROM id_map WHERE instant = ?1",
                        params![id],
                        |row| row.get::<_, Option<String>>(0),
                    )
                    .optional()?
                    .flatten(),
            };
            match found {
                Some(counterpart) => {
                    ret.insert(id.clone(), Some(counterpart));
                }
                None => unresolved.push(id.clone()),
            }
        }

        if create {
            for id in unresolved {
                let (candidate, mut more) = Self::generate_id_locked(inner, platform, &id)?;
                fired.append(&mut more);
                ret.insert(id, Some(candidate));
            }
        } else {
            for id in unresolved {
                ret.insert(id, None);
            }
        }

        Ok((ret, fired))
    }

    /// Single-id convenience wrapper over [`translate_ids`].
    pub fn translate_id(
        &self,
        platform: Platform,
        id: Option<&str>,
        create: bool,
    ) -> Result<Option<String>> {
        let Some(id) = id else { return Ok(None) };
        let ids = vec![Some(id.to_string())];
        let mut ret = self.translate_ids(platform, &ids, create)?;
        Ok(ret.remove(id).flatten())
    }

    /// Synthesizes an Instant id for a Euphoria id that has none yet,
    /// scanning the sequence space from 1023 down to 0 to avoid colliding
    /// with ids the Instant backend itself hands out. Only Euphoria ->
    /// Instant synthesis is supported, matching the original's restriction.
    pub fn generate_id(&self, platform: Platform, original: &str) -> Result<String> {
        let mut inner = self.inner.lock().unwrap();
        let (candidate, fired) = Self::generate_id_locked(&mut inner, platform, original)?;
        drop(inner);
        run_fired(fired);
        Ok(candidate)
    }

    fn generate_id_locked(
        inner: &mut Inner,
        platform: Platform,
        original: &str,
    ) -> Result<(String, Vec<(Option<String>, IdCallback)>)> {
        if platform != Platform::Euphoria {
            return Err(BridgeError::TranslateUnsupported);
        }
        let ts = euphoria_id_to_timestamp(original)?;
        let mut claimed = None;
        for seq in (0..=1023u32).rev() {
            let candidate = timestamp_to_instant_id(ts, seq);
            let inserted = inner
                .conn
                .execute(
                    "INSERT INTO id_map(euphoria, instant) VALUES (?1, ?2)",
                    params![original, candidate],
                )
                .is_ok();
            if inserted {
                claimed = Some(candidate);
                break;
            }
        }
        let candidate = claimed.ok_or(BridgeError::TranslateExhausted)?;
        let fired = inner.take_watchers(original, &candidate);
        Ok((candidate, fired))
    }

    /// Installs or overwrites id-map rows from `mapping` (pairs keyed by
    /// the platform the first element belongs to), firing any watchers
    /// that become resolvable as a result.
    pub fn update_ids(
        &self,
        platform: Platform,
        mapping: &[(Option<String>, Option<String>)],
    ) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let mut fired = Vec::new();
        for (key, value) in mapping {
            let (euphoria, instant) = match platform {
                Platform::Euphoria => (key, value),
                Platform::Instant => (value, key),
            };
            let (Some(euphoria), Some(instant)) = (euphoria, instant) else {
                continue;
            };
            inner.conn.execute(
                "INSERT OR REPLACE INTO id_map(euphoria, instant) VALUES (?1, ?2)",
                params![euphoria, instant],
            )?;
            fired.extend(inner.take_watchers(euphoria, instant));
        }
        drop(inner);
        run_fired(fired);
        Ok(())
    }

    /// Resolves every id in `idents` (ids on `platform`), then calls
    /// `callback` exactly once with the full id -> counterpart map, once
    /// every entry is known (synthesizing immediately for any that are
    /// missing, if `create`). If every id is already resolvable, `callback`
    /// runs before this method returns; otherwise it runs later, from
    /// whichever thread completes the last outstanding id via
    /// [`update_ids`] or [`generate_id`].
    pub fn watch_ids(
        &self,
        platform: Platform,
        idents: &[Option<String>],
        create: bool,
        callback: impl FnOnce(HashMap<String, Option<String>>) + Send + 'static,
    ) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let (ret, fired) = Self::translate_ids_locked(&mut inner, platform, idents, create)?;

        let pending: std::collections::HashSet<String> = ret
            .iter()
            .filter(|(_, v)| v.is_none())
            .map(|(k, _)| k.clone())
            .collect();

        if pending.is_empty() {
            drop(inner);
            run_fired(fired);
            callback(ret);
            return Ok(());
        }

        let shared = Arc::new(Mutex::new(Some((ret, pending.clone(), Box::new(callback) as BatchCallback))));

        for key in pending {
            let shared = shared.clone();
            let key_owned = key.clone();
            let cb: IdCallback = Box::new(move |translated| {
                let mut slot = shared.lock().unwrap();
                if let Some((mut ret, mut pending, callback)) = slot.take() {
                    ret.insert(key_owned.clone(), translated);
                    pending.remove(&key_owned);
                    if pending.is_empty() {
                        drop(slot);
                        callback(ret);
                    } else {
                        *slot = Some((ret, pending, callback));
                    }
                }
            });
            inner.watchers.entry((platform, key)).or_default().push(cb);
        }
        drop(inner);
        run_fired(fired);
        Ok(())
    }

    /// Resolves a single id, calling `callback` immediately if already
    /// known, or registering it to fire later otherwise. `None` calls back
    /// immediately with `None`, matching the original's pass-through.
    pub fn watch_id(
        &self,
        platform: Platform,
        ident: Option<&str>,
        callback: impl FnOnce(Option<String>) + Send + 'static,
    ) -> Result<()> {
        let Some(ident) = ident else {
            callback(None);
            return Ok(());
        };
        let mut inner = self.inner.lock().unwrap();
        let found: Option<String> = match platform {
            Platform::Euphoria => inner
                .conn
                .query_row(
                    "SELECT instant FROM id_map WHERE euphoria = ?1",
                    params![ident],
                    |row| row.get::<_, Option<String>>(0),
                )
                .optional()?
                .flatten(),
            Platform::Instant => inner
                .conn
                .query_row(
                    "SELECT euphoria FROM id_map WHERE instant = ?1",
                    params![ident],
                    |row| row.get::<_, Option<String>>(0),
                )
                .optional()?
                .flatten(),
        };
        if let Some(counterpart) = found {
            drop(inner);
            callback(Some(counterpart));
            return Ok(());
        }
        inner
            .watchers
            .entry((platform, ident.to_string()))
            .or_default()
            .push(Box::new(callback));
        Ok(())
    }
}

type BatchCallback = Box<dyn FnOnce(HashMap<String, Option<String>>) + Send>;

fn run_fired(fired: Vec<(Option<String>, IdCallback)>) {
    for (value, cb) in fired {
        cb(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opt(s: &str) -> Option<String> {
        Some(s.to_string())
    }

    #[test]
    fn translate_creates_and_is_stable() {
        let store = MessageStore::open(None).unwrap();
        let ids = vec![opt("10000000000")];
        let first = store.translate_ids(Platform::Euphoria, &ids, true).unwrap();
        let second = store.translate_ids(Platform::Euphoria, &ids, true).unwrap();
        assert_eq!(first.get("10000000000"), second.get("10000000000"));
        assert!(first.get("10000000000").unwrap().is_some());
    }

    #[test]
    fn translate_without_create_returns_none() {
        let store = MessageStore::open(None).unwrap();
        let ids = vec![opt("10000000000")];
        let result = store.translate_ids(Platform::Euphoria, &ids, false).unwrap();
        assert_eq!(result.get("10000000000"), Some(&None));
    }

    #[test]
    fn update_ids_fires_watch_id() {
        let store = Arc::new(MessageStore::open(None).unwrap());
        let seen = Arc::new(Mutex::new(None));
        let seen2 = seen.clone();
        store
            .watch_id(Platform::Euphoria, Some("e1"), move |translated| {
                *seen2.lock().unwrap() = translated;
            })
            .unwrap();
        assert!(seen.lock().unwrap().is_none());

        store
            .update_ids(
                Platform::Euphoria,
                &[(Some("e1".to_string()), Some("i1".to_string()))],
            )
            .unwrap();
        assert_eq!(seen.lock().unwrap().as_deref(), Some("i1"));
    }

    #[test]
    fn watch_id_fires_immediately_when_already_known() {
        let store = MessageStore::open(None).unwrap();
        store
            .update_ids(
                Platform::Euphoria,
                &[(Some("e1".to_string()), Some("i1".to_string()))],
            )
            .unwrap();
        let seen = Arc::new(Mutex::new(None));
        let seen2 = seen.clone();
        store
            .watch_id(Platform::Instant, Some("i1"), move |translated| {
                *seen2.lock().unwrap() = translated;
            })
            .unwrap();
        assert_eq!(seen.lock().unwrap().as_deref(), Some("e1"));
    }

    #[test]
    fn watch_ids_waits_for_every_key() {
        let store = Arc::new(MessageStore::open(None).unwrap());
        let result = Arc::new(Mutex::new(None));
        let result2 = result.clone();
        store
            .watch_ids(Platform::Euphoria, &[opt("e1"), opt("e2")], false, move |map| {
                *result2.lock().unwrap() = Some(map);
            })
            .unwrap();
        assert!(result.lock().unwrap().is_none());

        store
            .update_ids(
                Platform::Euphoria,
                &[(Some("e1".to_string()), Some("i1".to_string()))],
            )
            .unwrap();
        assert!(result.lock().unwrap().is_none());

        store
            .update_ids(
                Platform::Euphoria,
                &[(Some("e2".to_string()), Some("i2".to_string()))],
            )
            .unwrap();
        let done = result.lock().unwrap().clone().unwrap();
        assert_eq!(done.get("e1").unwrap().as_deref(), Some("i1"));
        assert_eq!(done.get("e2").unwrap().as_deref(), Some("i2"));
    }

    #[test]
    fn gc_removes_unresolved_rows_only() {
        let store = MessageStore::open(None).unwrap();
        store
            .update_ids(
                Platform::Euphoria,
                &[(Some("e1".to_string()), Some("i1".to_string()))],
            )
            .unwrap();
        store.watch_id(Platform::Euphoria, Some("e2"), |_| {}).unwrap();
        let removed = store.gc().unwrap();
        assert_eq!(removed, 0);
    }

    #[test]
    fn get_bounds_counts_rows() {
        let store = MessageStore::open(None).unwrap();
        store
            .update_ids(
                Platform::Euphoria,
                &[(Some("e1".to_string()), Some("i1".to_string()))],
            )
            .unwrap();
        let (euphoria, instant) = store.get_bounds().unwrap();
        assert_eq!(euphoria.count, 1);
        assert_eq!(instant.count, 1);
    }
}
