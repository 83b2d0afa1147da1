// ============================================================================
// In-Memory Store
// ============================================================================
//
// A process-local keyspace with the Redis semantics this crate relies on:
//
// - hashes and sorted sets addressed by key
// - a per-key version bumped on every write, which is what WATCH observes
// - MULTI/EXEC applied under one write lock, refused with a nil reply when
//   any watched key moved
//
// Unlike Redis, EXEC validates every queued command before applying any of
// them, so a malformed command never leaves a half-applied transaction.
//
// ============================================================================

use super::{Command, RawConnection, Reply, StoreBackend};
use crate::core::{Entity, FieldMap, KeyLayout, Result, StoreError};
use async_trait::async_trait;
use std::cmp::Ordering as CmpOrdering;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::RwLock;

#[derive(Default)]
struct Keyspace {
    hashes: HashMap<String, FieldMap>,
    sorted: HashMap<String, HashMap<String, f64>>,
    versions: HashMap<String, u64>,
    clock: u64,
}

impl Keyspace {
    fn version(&self, key: &str) -> u64 {
        self.versions.get(key).copied().unwrap_or(0)
    }

    fn touch(&mut self, key: &str) {
        self.clock += 1;
        self.versions.insert(key.to_string(), self.clock);
    }

    fn exists(&self, key: &str) -> bool {
        self.hashes.contains_key(key) || self.sorted.contains_key(key)
    }

    fn wrong_type(&self, key: &str, expect_hash: bool) -> bool {
        if expect_hash {
            self.sorted.contains_key(key)
        } else {
            self.hashes.contains_key(key)
        }
    }

    /// Rejects commands that would fail, without touching any state.
    fn check(&self, command: &Command) -> Result<()> {
        match command {
            Command::HGetAll { key } if self.wrong_type(key, true) => Err(wrong_type(key)),
            Command::HIncrBy { key, field, delta } => {
                if self.wrong_type(key, true) {
                    return Err(wrong_type(key));
                }
                let current = match self.hashes.get(key).and_then(|h| h.get(field)) {
                    Some(raw) => raw.parse::<i64>().map_err(|_| {
                        StoreError::ExecutionError(format!(
                            "hash value at '{}'.'{}' is not an integer",
                            key, field
                        ))
                    })?,
                    None => 0,
                };
                current.checked_add(*delta).map(|_| ()).ok_or_else(|| {
                    StoreError::ExecutionError(format!(
                        "increment on '{}'.'{}' would overflow",
                        key, field
                    ))
                })
            }
            Command::ZIncrBy { key, member, delta } => {
                if self.wrong_type(key, false) {
                    return Err(wrong_type(key));
                }
                let current = self
                    .sorted
                    .get(key)
                    .and_then(|set| set.get(member))
                    .copied()
                    .unwrap_or(0.0);
                if (current + delta).is_nan() {
                    return Err(StoreError::ExecutionError(
                        "resulting score is not a number".into(),
                    ));
                }
                Ok(())
            }
            Command::ZRevRangeWithScores { key, .. } if self.wrong_type(key, false) => {
                Err(wrong_type(key))
            }
            _ => Ok(()),
        }
    }

    fn lookup(&self, command: &Command) -> Result<Reply> {
        self.check(command)?;
        match command {
            Command::Exists { key } => Ok(Reply::Integer(self.exists(key) as i64)),
            Command::HGetAll { key } => Ok(Reply::Fields(
                self.hashes.get(key).cloned().unwrap_or_default(),
            )),
            Command::ZRevRangeWithScores { key, start, stop } => {
                Ok(Reply::Ranked(self.rev_range(key, *start, *stop)))
            }
            Command::Ping => Ok(Reply::Pong),
            Command::HIncrBy { .. } | Command::ZIncrBy { .. } => Err(StoreError::ExecutionError(
                format!("{} is a write command", command.name()),
            )),
        }
    }

    /// Applies a command that already passed `check`.
    fn apply(&mut self, command: &Command) -> Result<Reply> {
        match command {
            Command::HIncrBy { key, field, delta } => {
                self.check(command)?;
                let hash = self.hashes.entry(key.clone()).or_default();
                let current = hash
                    .get(field)
                    .and_then(|raw| raw.parse::<i64>().ok())
                    .unwrap_or(0);
                let next = current + delta;
                hash.insert(field.clone(), next.to_string());
                self.touch(key);
                Ok(Reply::Integer(next))
            }
            Command::ZIncrBy { key, member, delta } => {
                self.check(command)?;
                let set = self.sorted.entry(key.clone()).or_default();
                let score = set.entry(member.clone()).or_insert(0.0);
                *score += delta;
                let next = *score;
                self.touch(key);
                Ok(Reply::Score(next))
            }
            _ => self.lookup(command),
        }
    }

    fn rev_range(&self, key: &str, start: isize, stop: isize) -> Vec<(String, f64)> {
        let Some(set) = self.sorted.get(key) else {
            return Vec::new();
        };

        let mut members: Vec<(String, f64)> =
            set.iter().map(|(m, s)| (m.clone(), *s)).collect();
        // Descending score, equal scores in reverse lexicographic order.
        members.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(CmpOrdering::Equal)
                .then_with(|| b.0.cmp(&a.0))
        });

        let len = members.len() as isize;
        let start = if start < 0 { (len + start).max(0) } else { start };
        let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
        if start > stop || start >= len {
            return Vec::new();
        }

        members
            .into_iter()
            .skip(start as usize)
            .take((stop - start + 1) as usize)
            .collect()
    }
}

fn wrong_type(key: &str) -> StoreError {
    StoreError::ExecutionError(format!(
        "operation against key '{}' holding the wrong kind of value",
        key
    ))
}

/// In-process backend with Redis semantics.
///
/// Cloning yields another handle to the same keyspace.
#[derive(Clone, Default)]
pub struct MemoryStore {
    keyspace: Arc<RwLock<Keyspace>>,
    offline: Arc<AtomicBool>,
    connections_opened: Arc<AtomicU64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a transport outage: every command fails with
    /// `StoreUnavailable` until switched back.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of raw connections opened so far.
    pub fn connections_opened(&self) -> u64 {
        self.connections_opened.load(Ordering::SeqCst)
    }

    /// HSET key with every field of `fields`. An empty map writes nothing,
    /// as Redis never stores a field-less hash.
    pub async fn hset(&self, key: &str, fields: FieldMap) {
        if fields.is_empty() {
            return;
        }
        let mut keyspace = self.keyspace.write().await;
        keyspace.hashes.entry(key.to_string()).or_default().extend(fields);
        keyspace.touch(key);
    }

    /// ZADD key score member
    pub async fn zadd(&self, key: &str, member: &str, score: f64) {
        let mut keyspace = self.keyspace.write().await;
        keyspace
            .sorted
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string(), score);
        keyspace.touch(key);
    }

    /// DEL key, returning whether anything was removed.
    pub async fn del(&self, key: &str) -> bool {
        let mut keyspace = self.keyspace.write().await;
        let removed =
            keyspace.hashes.remove(key).is_some() | keyspace.sorted.remove(key).is_some();
        if removed {
            keyspace.touch(key);
        }
        removed
    }

    pub async fn hgetall(&self, key: &str) -> FieldMap {
        let keyspace = self.keyspace.read().await;
        keyspace.hashes.get(key).cloned().unwrap_or_default()
    }

    pub async fn zscore(&self, key: &str, member: &str) -> Option<f64> {
        let keyspace = self.keyspace.read().await;
        keyspace.sorted.get(key).and_then(|set| set.get(member)).copied()
    }

    /// Store an entity record and its leaderboard entry (score = likes).
    pub async fn seed_entity(&self, layout: &KeyLayout, entity: &Entity) {
        self.hset(&layout.entity_key(&entity.id), entity.encode())
            .await;
        self.zadd(layout.leaderboard_key(), &entity.id, entity.likes as f64)
            .await;
    }
}

#[async_trait]
impl StoreBackend for MemoryStore {
    async fn connect(&self) -> Result<Box<dyn RawConnection>> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(offline());
        }
        self.connections_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryConnection {
            store: self.clone(),
            watched: Vec::new(),
        }))
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

fn offline() -> StoreError {
    StoreError::StoreUnavailable("memory store is offline".into())
}

struct MemoryConnection {
    store: MemoryStore,
    /// Watched keys and the version observed at WATCH time.
    watched: Vec<(String, u64)>,
}

impl MemoryConnection {
    fn ensure_online(&self) -> Result<()> {
        if self.store.offline.load(Ordering::SeqCst) {
            Err(offline())
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RawConnection for MemoryConnection {
    async fn query(&mut self, command: Command) -> Result<Reply> {
        self.ensure_online()?;
        match command {
            Command::HIncrBy { .. } | Command::ZIncrBy { .. } => {
                let mut keyspace = self.store.keyspace.write().await;
                keyspace.apply(&command)
            }
            _ => {
                let keyspace = self.store.keyspace.read().await;
                keyspace.lookup(&command)
            }
        }
    }

    async fn watch(&mut self, keys: &[String]) -> Result<()> {
        self.ensure_online()?;
        let keyspace = self.store.keyspace.read().await;
        for key in keys {
            if !self.watched.iter().any(|(k, _)| k == key) {
                self.watched.push((key.clone(), keyspace.version(key)));
            }
        }
        Ok(())
    }

    async fn unwatch(&mut self) -> Result<()> {
        self.ensure_online()?;
        self.watched.clear();
        Ok(())
    }

    async fn exec(&mut self, commands: Vec<Command>) -> Result<Option<Vec<Reply>>> {
        self.ensure_online()?;
        let watched = std::mem::take(&mut self.watched);
        let mut keyspace = self.store.keyspace.write().await;

        if watched
            .iter()
            .any(|(key, version)| keyspace.version(key) != *version)
        {
            return Ok(None);
        }

        for command in &commands {
            keyspace.check(command)?;
        }

        let mut replies = Vec::with_capacity(commands.len());
        for command in &commands {
            replies.push(keyspace.apply(command)?);
        }
        Ok(Some(replies))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hgetall(key: &str) -> Command {
        Command::HGetAll { key: key.into() }
    }

    fn zincr(key: &str, member: &str) -> Command {
        Command::ZIncrBy {
            key: key.into(),
            member: member.into(),
            delta: 1.0,
        }
    }

    #[tokio::test]
    async fn test_rev_range_orders_by_score_then_reverse_member() {
        let store = MemoryStore::new();
        store.zadd("board", "a", 3.0).await;
        store.zadd("board", "b", 5.0).await;
        store.zadd("board", "c", 3.0).await;
        store.zadd("board", "d", 1.0).await;

        let mut conn = store.connect().await.unwrap();
        let reply = conn
            .query(Command::ZRevRangeWithScores {
                key: "board".into(),
                start: 0,
                stop: 2,
            })
            .await
            .unwrap();

        assert_eq!(
            reply,
            Reply::Ranked(vec![
                ("b".to_string(), 5.0),
                ("c".to_string(), 3.0),
                ("a".to_string(), 3.0),
            ])
        );
    }

    #[tokio::test]
    async fn test_rev_range_bounds() {
        let store = MemoryStore::new();
        store.zadd("board", "a", 1.0).await;
        store.zadd("board", "b", 2.0).await;

        let mut conn = store.connect().await.unwrap();
        let range = |start, stop| Command::ZRevRangeWithScores {
            key: "board".into(),
            start,
            stop,
        };

        let Reply::Ranked(all) = conn.query(range(0, -1)).await.unwrap() else {
            panic!("expected ranked reply");
        };
        assert_eq!(all.len(), 2);

        let Reply::Ranked(past_end) = conn.query(range(0, 10)).await.unwrap() else {
            panic!("expected ranked reply");
        };
        assert_eq!(past_end.len(), 2);

        let Reply::Ranked(empty) = conn.query(range(5, 10)).await.unwrap() else {
            panic!("expected ranked reply");
        };
        assert!(empty.is_empty());
    }

    #[tokio::test]
    async fn test_exec_refused_when_watched_key_moves() {
        let store = MemoryStore::new();
        store.zadd("board", "a", 1.0).await;

        let mut watcher = store.connect().await.unwrap();
        let mut writer = store.connect().await.unwrap();

        watcher.watch(&["board".to_string()]).await.unwrap();
        writer.query(zincr("board", "a")).await.unwrap();

        let result = watcher.exec(vec![zincr("board", "a")]).await.unwrap();
        assert!(result.is_none());
        assert_eq!(store.zscore("board", "a").await, Some(2.0));

        // Watches are cleared by the refused EXEC.
        let result = watcher.exec(vec![zincr("board", "a")]).await.unwrap();
        assert!(result.is_some());
        assert_eq!(store.zscore("board", "a").await, Some(3.0));
    }

    #[tokio::test]
    async fn test_exec_is_all_or_nothing() {
        let store = MemoryStore::new();
        let mut fields = FieldMap::new();
        fields.insert("likes".into(), "many".into());
        store.hset("entity:1", fields).await;

        let mut conn = store.connect().await.unwrap();
        let result = conn
            .exec(vec![
                zincr("board", "1"),
                Command::HIncrBy {
                    key: "entity:1".into(),
                    field: "likes".into(),
                    delta: 1,
                },
            ])
            .await;

        assert!(matches!(result, Err(StoreError::ExecutionError(_))));
        assert_eq!(store.zscore("board", "1").await, None);
    }

    #[tokio::test]
    async fn test_exists_and_missing_hash() {
        let store = MemoryStore::new();
        let mut conn = store.connect().await.unwrap();

        let reply = conn
            .query(Command::Exists {
                key: "entity:9".into(),
            })
            .await
            .unwrap();
        assert_eq!(reply, Reply::Integer(0));

        let reply = conn.query(hgetall("entity:9")).await.unwrap();
        assert_eq!(reply, Reply::Fields(FieldMap::new()));
    }

    #[tokio::test]
    async fn test_offline_store() {
        let store = MemoryStore::new();
        let mut conn = store.connect().await.unwrap();

        store.set_offline(true);
        assert!(matches!(
            conn.query(Command::Ping).await,
            Err(StoreError::StoreUnavailable(_))
        ));
        assert!(store.connect().await.is_err());

        store.set_offline(false);
        assert_eq!(conn.query(Command::Ping).await.unwrap(), Reply::Pong);
    }

    #[tokio::test]
    async fn test_hset_without_fields_stores_nothing() {
        let store = MemoryStore::new();
        store.hset("entity:1", FieldMap::new()).await;

        let mut conn = store.connect().await.unwrap();
        let reply = conn
            .query(Command::Exists {
                key: "entity:1".into(),
            })
            .await
            .unwrap();
        assert_eq!(reply, Reply::Integer(0));

        // Nothing was written, so a watch on the key still holds.
        conn.watch(&["entity:1".to_string()]).await.unwrap();
        store.hset("entity:1", FieldMap::new()).await;
        let result = conn.exec(vec![zincr("board", "1")]).await.unwrap();
        assert!(result.is_some());
    }
}
