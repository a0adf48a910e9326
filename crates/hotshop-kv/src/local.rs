//! Single-process key-value backend.
//!
//! Every command, including atomic scripts, runs while holding one keyspace
//! mutex, which gives the same per-command linearizability Redis provides.
//! Expired keys are purged lazily on access.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::KvError;
use crate::script::AtomicScript;
use crate::traits::{KeyTtl, KeyValueStore};

const LIST_MOVE_POLL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone)]
enum LocalValue {
    Str(String),
    List(VecDeque<String>),
    Set(HashSet<String>),
}

#[derive(Debug, Clone)]
struct LocalEntry {
    value: LocalValue,
    expires_at: Option<Instant>,
}

impl LocalEntry {
    fn new(value: LocalValue, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// The keyspace of a [`LocalKvStore`].
///
/// Exposed so that native script renditions can operate on it while the
/// store lock is held.
#[derive(Debug, Default)]
pub struct LocalKeyspace {
    entries: HashMap<String, LocalEntry>,
}

impl LocalKeyspace {
    fn live(&mut self, key: &str) -> Option<&mut LocalEntry> {
        let now = Instant::now();
        if self.entries.get(key).is_some_and(|e| e.is_expired(now)) {
            self.entries.remove(key);
        }
        self.entries.get_mut(key)
    }

    pub fn exists(&mut self, key: &str) -> bool {
        self.live(key).is_some()
    }

    pub fn get_string(&mut self, key: &str) -> Result<Option<String>, KvError> {
        match self.live(key) {
            None => Ok(None),
            Some(LocalEntry {
                value: LocalValue::Str(s),
                ..
            }) => Ok(Some(s.clone())),
            Some(_) => Err(KvError::wrong_type(key)),
        }
    }

    pub fn set_string(&mut self, key: &str, value: &str, ttl: Option<Duration>) {
        self.entries.insert(
            key.to_string(),
            LocalEntry::new(LocalValue::Str(value.to_string()), ttl),
        );
    }

    pub fn delete(&mut self, key: &str) -> bool {
        self.live(key).is_some() && self.entries.remove(key).is_some()
    }

    /// Adds `delta` to an integer string value, keeping its TTL.
    pub fn incr_by(&mut self, key: &str, delta: i64) -> Result<i64, KvError> {
        match self.live(key) {
            None => {
                self.set_string(key, &delta.to_string(), None);
                Ok(delta)
            }
            Some(entry) => match &mut entry.value {
                LocalValue::Str(s) => {
                    let current: i64 = s.parse().map_err(|_| {
                        KvError::command(format!("value at {key} is not an integer"))
                    })?;
                    let next = current + delta;
                    *s = next.to_string();
                    Ok(next)
                }
                _ => Err(KvError::wrong_type(key)),
            },
        }
    }

    pub fn set_add(&mut self, key: &str, member: &str) -> Result<bool, KvError> {
        if self.live(key).is_none() {
            self.entries.insert(
                key.to_string(),
                LocalEntry::new(LocalValue::Set(HashSet::new()), None),
            );
        }
        match self.live(key).map(|e| &mut e.value) {
            Some(LocalValue::Set(set)) => Ok(set.insert(member.to_string())),
            _ => Err(KvError::wrong_type(key)),
        }
    }

    pub fn set_remove(&mut self, key: &str, member: &str) -> Result<bool, KvError> {
        let removed = match self.live(key).map(|e| &mut e.value) {
            None => return Ok(false),
            Some(LocalValue::Set(set)) => set.remove(member),
            Some(_) => return Err(KvError::wrong_type(key)),
        };
        if matches!(self.live(key).map(|e| &e.value), Some(LocalValue::Set(s)) if s.is_empty()) {
            self.entries.remove(key);
        }
        Ok(removed)
    }

    pub fn set_contains(&mut self, key: &str, member: &str) -> Result<bool, KvError> {
        match self.live(key).map(|e| &e.value) {
            None => Ok(false),
            Some(LocalValue::Set(set)) => Ok(set.contains(member)),
            Some(_) => Err(KvError::wrong_type(key)),
        }
    }

    fn list_mut(&mut self, key: &str) -> Result<Option<&mut VecDeque<String>>, KvError> {
        match self.live(key) {
            None => Ok(None),
            Some(LocalEntry {
                value: LocalValue::List(list),
                ..
            }) => Ok(Some(list)),
            Some(_) => Err(KvError::wrong_type(key)),
        }
    }

    fn drop_if_empty_list(&mut self, key: &str) {
        let empty = matches!(self.list_mut(key), Ok(Some(list)) if list.is_empty());
        if empty {
            self.entries.remove(key);
        }
    }

    pub fn list_push(&mut self, key: &str, values: &[String]) -> Result<usize, KvError> {
        if self.live(key).is_none() {
            self.entries.insert(
                key.to_string(),
                LocalEntry::new(LocalValue::List(VecDeque::new()), None),
            );
        }
        let list = self
            .list_mut(key)?
            .ok_or_else(|| KvError::command(format!("list {key} vanished")))?;
        list.extend(values.iter().cloned());
        Ok(list.len())
    }

    pub fn list_range(
        &mut self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<Vec<String>, KvError> {
        let Some(list) = self.list_mut(key)? else {
            return Ok(Vec::new());
        };
        let len = list.len() as isize;
        let start = if start < 0 { (len + start).max(0) } else { start };
        let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
        if start > stop || start >= len {
            return Ok(Vec::new());
        }
        Ok(list
            .iter()
            .skip(start as usize)
            .take((stop - start + 1) as usize)
            .cloned()
            .collect())
    }

    /// Removes up to `count` occurrences of `value`, from the head when
    /// `count > 0`, from the tail when negative, all of them when zero.
    pub fn list_remove(&mut self, key: &str, count: isize, value: &str) -> Result<usize, KvError> {
        let Some(list) = self.list_mut(key)? else {
            return Ok(0);
        };
        let limit = if count == 0 {
            usize::MAX
        } else {
            count.unsigned_abs()
        };
        let mut removed = 0;
        if count >= 0 {
            let mut i = 0;
            while i < list.len() && removed < limit {
                if list[i] == value {
                    list.remove(i);
                    removed += 1;
                } else {
                    i += 1;
                }
            }
        } else {
            let mut i = list.len();
            while i > 0 && removed < limit {
                i -= 1;
                if list[i] == value {
                    list.remove(i);
                    removed += 1;
                }
            }
        }
        self.drop_if_empty_list(key);
        Ok(removed)
    }

    fn ttl(&mut self, key: &str) -> KeyTtl {
        match self.live(key) {
            None => KeyTtl::Missing,
            Some(LocalEntry {
                expires_at: None, ..
            }) => KeyTtl::Persistent,
            Some(LocalEntry {
                expires_at: Some(at),
                ..
            }) => KeyTtl::Expires(at.saturating_duration_since(Instant::now())),
        }
    }
}

/// In-process [`KeyValueStore`] for tests and single-instance deployments.
#[derive(Debug, Clone, Default)]
pub struct LocalKvStore {
    keyspace: Arc<Mutex<LocalKeyspace>>,
}

impl LocalKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.keyspace
            .lock()
            .entries
            .values()
            .filter(|e| !e.is_expired(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn try_move(&self, source: &str, destination: &str) -> Result<Option<String>, KvError> {
        let mut ks = self.keyspace.lock();
        // Reject a non-list destination before anything leaves the source.
        ks.list_mut(destination)?;
        let value = match ks.list_mut(source)? {
            Some(list) => list.pop_front(),
            None => None,
        };
        let Some(value) = value else {
            return Ok(None);
        };
        ks.drop_if_empty_list(source);
        if ks.live(destination).is_none() {
            ks.entries.insert(
                destination.to_string(),
                LocalEntry::new(LocalValue::List(VecDeque::new()), None),
            );
        }
        if let Some(list) = ks.list_mut(destination)? {
            list.push_back(value.clone());
        }
        Ok(Some(value))
    }
}

#[async_trait]
impl KeyValueStore for LocalKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        self.keyspace.lock().get_string(key)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), KvError> {
        self.keyspace.lock().set_string(key, value, ttl);
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, KvError> {
        let mut ks = self.keyspace.lock();
        if ks.exists(key) {
            return Ok(false);
        }
        ks.set_string(key, value, Some(ttl));
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<bool, KvError> {
        Ok(self.keyspace.lock().delete(key))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, KvError> {
        let mut ks = self.keyspace.lock();
        match ks.live(key) {
            Some(entry) => {
                entry.expires_at = Some(Instant::now() + ttl);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn ttl(&self, key: &str) -> Result<KeyTtl, KvError> {
        Ok(self.keyspace.lock().ttl(key))
    }

    async fn incr(&self, key: &str) -> Result<i64, KvError> {
        self.keyspace.lock().incr_by(key, 1)
    }

    async fn list_push(&self, key: &str, values: &[String]) -> Result<usize, KvError> {
        self.keyspace.lock().list_push(key, values)
    }

    async fn list_range(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<Vec<String>, KvError> {
        self.keyspace.lock().list_range(key, start, stop)
    }

    async fn replace_list(
        &self,
        key: &str,
        values: &[String],
        ttl: Duration,
    ) -> Result<(), KvError> {
        let mut ks = self.keyspace.lock();
        ks.entries.remove(key);
        if values.is_empty() {
            return Ok(());
        }
        ks.entries.insert(
            key.to_string(),
            LocalEntry::new(
                LocalValue::List(values.iter().cloned().collect()),
                Some(ttl),
            ),
        );
        Ok(())
    }

    async fn list_move(
        &self,
        source: &str,
        destination: &str,
        wait: Duration,
    ) -> Result<Option<String>, KvError> {
        let deadline = Instant::now() + wait;
        loop {
            if let Some(value) = self.try_move(source, destination)? {
                return Ok(Some(value));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(LIST_MOVE_POLL).await;
        }
    }

    async fn list_remove(&self, key: &str, count: isize, value: &str) -> Result<usize, KvError> {
        self.keyspace.lock().list_remove(key, count, value)
    }

    async fn eval(
        &self,
        script: &AtomicScript,
        keys: &[String],
        args: &[String],
    ) -> Result<i64, KvError> {
        let mut ks = self.keyspace.lock();
        script.run_local(&mut ks, keys, args)
    }

    fn backend_name(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[tokio::test]
    async fn test_get_set_delete() {
        let store = LocalKvStore::new();
        assert_eq!(store.get("k").await.unwrap(), None);
        store.set("k", "v", None).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
        assert_eq!(store.ttl("k").await.unwrap(), KeyTtl::Persistent);
        assert!(store.delete("k").await.unwrap());
        assert!(!store.delete("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_expiry_is_lazy_but_exact() {
        let store = LocalKvStore::new();
        store
            .set("short", "v", Some(Duration::from_millis(30)))
            .await
            .unwrap();
        assert!(matches!(
            store.ttl("short").await.unwrap(),
            KeyTtl::Expires(_)
        ));
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(store.get("short").await.unwrap(), None);
        assert_eq!(store.ttl("short").await.unwrap(), KeyTtl::Missing);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_set_nx_only_once() {
        let store = LocalKvStore::new();
        assert!(store.set_nx("lock", "a", Duration::from_secs(5)).await.unwrap());
        assert!(!store.set_nx("lock", "b", Duration::from_secs(5)).await.unwrap());
        assert_eq!(store.get("lock").await.unwrap().as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn test_incr_and_wrong_type() {
        let store = LocalKvStore::new();
        assert_eq!(store.incr("n").await.unwrap(), 1);
        assert_eq!(store.incr("n").await.unwrap(), 2);
        store.list_push("l", &strings(&["x"])).await.unwrap();
        assert!(matches!(store.get("l").await, Err(KvError::WrongType { .. })));
        store.set("s", "abc", None).await.unwrap();
        assert!(store.incr("s").await.is_err());
    }

    #[tokio::test]
    async fn test_list_range_semantics() {
        let store = LocalKvStore::new();
        store
            .list_push("l", &strings(&["a", "b", "c", "d"]))
            .await
            .unwrap();
        assert_eq!(store.list_range("l", 0, -1).await.unwrap(), strings(&["a", "b", "c", "d"]));
        assert_eq!(store.list_range("l", 1, 2).await.unwrap(), strings(&["b", "c"]));
        assert_eq!(store.list_range("l", -2, -1).await.unwrap(), strings(&["c", "d"]));
        assert!(store.list_range("l", 5, 9).await.unwrap().is_empty());
        assert!(store.list_range("missing", 0, -1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_replace_list_sets_ttl() {
        let store = LocalKvStore::new();
        store.list_push("l", &strings(&["old"])).await.unwrap();
        store
            .replace_list("l", &strings(&["n1", "n2"]), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(store.list_range("l", 0, -1).await.unwrap(), strings(&["n1", "n2"]));
        assert!(matches!(store.ttl("l").await.unwrap(), KeyTtl::Expires(_)));
    }

    #[tokio::test]
    async fn test_list_move_and_remove() {
        let store = LocalKvStore::new();
        store.list_push("q", &strings(&["m1", "m2"])).await.unwrap();
        let moved = store
            .list_move("q", "q:processing", Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(moved.as_deref(), Some("m1"));
        assert_eq!(
            store.list_range("q:processing", 0, -1).await.unwrap(),
            strings(&["m1"])
        );
        assert_eq!(store.list_range("q", 0, -1).await.unwrap(), strings(&["m2"]));
        assert_eq!(store.list_remove("q:processing", 1, "m1").await.unwrap(), 1);
        assert!(store.list_range("q:processing", 0, -1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_move_into_wrong_type_keeps_source() {
        let store = LocalKvStore::new();
        store.list_push("q", &strings(&["m1"])).await.unwrap();
        store.set("q:processing", "not a list", None).await.unwrap();

        let err = store
            .list_move("q", "q:processing", Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, KvError::WrongType { .. }));
        assert_eq!(store.list_range("q", 0, -1).await.unwrap(), strings(&["m1"]));
    }

    #[tokio::test]
    async fn test_list_move_waits_for_push() {
        let store = LocalKvStore::new();
        let producer = store.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            producer.list_push("q", &["late".to_string()]).await.unwrap();
        });
        let moved = store
            .list_move("q", "p", Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(moved.as_deref(), Some("late"));
        assert_eq!(
            store.list_move("q", "p", Duration::from_millis(20)).await.unwrap(),
            None
        );
    }

    #[test]
    fn test_set_operations() {
        let mut ks = LocalKeyspace::default();
        assert!(ks.set_add("s", "1").unwrap());
        assert!(!ks.set_add("s", "1").unwrap());
        assert!(ks.set_contains("s", "1").unwrap());
        assert!(ks.set_remove("s", "1").unwrap());
        assert!(!ks.exists("s"));
    }
}
