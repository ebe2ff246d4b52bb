//! Key-value store abstraction.
//!
//! Queues, webhook dedup, rate-limit counters, concurrency tracking, and
//! config-change pub/sub all go through [`KvStore`]. The production backend
//! is Redis (implemented in the connectors crate); [`MemoryKv`] backs tests
//! and single-process dev runs.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};

use crate::Result;

/// Async key-value operations needed by the engine.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Get a string value.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Set a string value with a TTL.
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Set if not exists, with TTL. Returns true if the key was set.
    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    /// Delete a key.
    async fn del(&self, key: &str) -> Result<()>;

    /// Atomically increment a counter and ensure it expires. Returns the
    /// post-increment value.
    async fn incr_with_expiry(&self, key: &str, ttl: Duration) -> Result<i64>;

    /// Push a value onto the head of a list.
    async fn lpush(&self, key: &str, value: &str) -> Result<i64>;

    /// Pop from the tail of the first non-empty list, waiting up to
    /// `timeout`. Returns `(key, value)`.
    async fn brpop(&self, keys: &[String], timeout: Duration) -> Result<Option<(String, String)>>;

    /// List length.
    async fn llen(&self, key: &str) -> Result<i64>;

    /// Add a member to a sorted set with a score.
    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<()>;

    /// Remove a member from a sorted set.
    async fn zrem(&self, key: &str, member: &str) -> Result<()>;

    /// Drop members scoring below `min_score` and return the remaining count.
    async fn zcard_prune(&self, key: &str, min_score: f64) -> Result<i64>;

    /// Publish a payload on a channel.
    async fn publish(&self, channel: &str, payload: &str) -> Result<()>;

    /// Subscribe to a channel. The receiver yields raw payloads; it closes
    /// when the backend connection drops.
    async fn subscribe(&self, channel: &str) -> Result<mpsc::Receiver<String>>;

    /// Liveness probe.
    async fn ping(&self) -> Result<()>;
}

enum Entry {
    Str(String),
    List(VecDeque<String>),
    Zset(BTreeMap<String, f64>),
}

struct Stored {
    entry: Entry,
    expires_at: Option<Instant>,
}

impl Stored {
    fn expired(&self) -> bool {
        self.expires_at.is_some_and(|t| Instant::now() >= t)
    }
}

/// In-memory [`KvStore`] with TTL support.
///
/// Single-process only; used by tests and dev mode without Redis.
#[derive(Clone, Default)]
pub struct MemoryKv {
    inner: Arc<Mutex<HashMap<String, Stored>>>,
    channels: Arc<Mutex<HashMap<String, broadcast::Sender<String>>>>,
}

impl MemoryKv {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with_live_entry<R>(&self, key: &str, f: impl FnOnce(Option<&mut Stored>) -> R) -> R {
        let mut map = self.inner.lock();
        if map.get(key).is_some_and(Stored::expired) {
            map.remove(key);
        }
        f(map.get_mut(key))
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.with_live_entry(key, |stored| match stored {
            Some(Stored {
                entry: Entry::Str(v),
                ..
            }) => Some(v.clone()),
            _ => None,
        }))
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.inner.lock().insert(
            key.to_string(),
            Stored {
                entry: Entry::Str(value.to_string()),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut map = self.inner.lock();
        if map.get(key).is_some_and(Stored::expired) {
            map.remove(key);
        }
        if map.contains_key(key) {
            return Ok(false);
        }
        map.insert(
            key.to_string(),
            Stored {
                entry: Entry::Str(value.to_string()),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(true)
    }

    async fn del(&self, key: &str) -> Result<()> {
        self.inner.lock().remove(key);
        Ok(())
    }

    async fn incr_with_expiry(&self, key: &str, ttl: Duration) -> Result<i64> {
        let mut map = self.inner.lock();
        if map.get(key).is_some_and(Stored::expired) {
            map.remove(key);
        }
        let stored = map.entry(key.to_string()).or_insert_with(|| Stored {
            entry: Entry::Str("0".to_string()),
            expires_at: Some(Instant::now() + ttl),
        });
        let next = match &stored.entry {
            Entry::Str(v) => v.parse::<i64>().unwrap_or(0) + 1,
            _ => 1,
        };
        stored.entry = Entry::Str(next.to_string());
        Ok(next)
    }

    async fn lpush(&self, key: &str, value: &str) -> Result<i64> {
        let mut map = self.inner.lock();
        let stored = map.entry(key.to_string()).or_insert_with(|| Stored {
            entry: Entry::List(VecDeque::new()),
            expires_at: None,
        });
        if let Entry::List(list) = &mut stored.entry {
            list.push_front(value.to_string());
            Ok(list.len() as i64)
        } else {
            stored.entry = Entry::List(VecDeque::from([value.to_string()]));
            Ok(1)
        }
    }

    async fn brpop(&self, keys: &[String], timeout: Duration) -> Result<Option<(String, String)>> {
        let deadline = Instant::now() + timeout;
        loop {
            {
                let mut map = self.inner.lock();
                for key in keys {
                    if let Some(Stored {
                        entry: Entry::List(list),
                        ..
                    }) = map.get_mut(key)
                    {
                        if let Some(value) = list.pop_back() {
                            return Ok(Some((key.clone(), value)));
                        }
                    }
                }
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    async fn llen(&self, key: &str) -> Result<i64> {
        Ok(self.with_live_entry(key, |stored| match stored {
            Some(Stored {
                entry: Entry::List(list),
                ..
            }) => list.len() as i64,
            _ => 0,
        }))
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<()> {
        let mut map = self.inner.lock();
        let stored = map.entry(key.to_string()).or_insert_with(|| Stored {
            entry: Entry::Zset(BTreeMap::new()),
            expires_at: None,
        });
        if let Entry::Zset(set) = &mut stored.entry {
            set.insert(member.to_string(), score);
        } else {
            stored.entry = Entry::Zset(BTreeMap::from([(member.to_string(), score)]));
        }
        Ok(())
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<()> {
        self.with_live_entry(key, |stored| {
            if let Some(Stored {
                entry: Entry::Zset(set),
                ..
            }) = stored
            {
                set.remove(member);
            }
        });
        Ok(())
    }

    async fn zcard_prune(&self, key: &str, min_score: f64) -> Result<i64> {
        Ok(self.with_live_entry(key, |stored| {
            if let Some(Stored {
                entry: Entry::Zset(set),
                ..
            }) = stored
            {
                set.retain(|_, score| *score >= min_score);
                set.len() as i64
            } else {
                0
            }
        }))
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        let sender = {
            let mut channels = self.channels.lock();
            channels
                .entry(channel.to_string())
                .or_insert_with(|| broadcast::channel(64).0)
                .clone()
        };
        // No subscribers is not an error
        let _ = sender.send(payload.to_string());
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<mpsc::Receiver<String>> {
        let mut rx = {
            let mut channels = self.channels.lock();
            channels
                .entry(channel.to_string())
                .or_insert_with(|| broadcast::channel(64).0)
                .subscribe()
        };
        let (tx, out) = mpsc::channel(64);
        tokio::spawn(async move {
            while let Ok(msg) = rx.recv().await {
                if tx.send(msg).await.is_err() {
                    break;
                }
            }
        });
        Ok(out)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_nx_is_exclusive_until_expiry() {
        let kv = MemoryKv::new();
        assert!(kv
            .set_nx_ex("dedup:a", "1", Duration::from_millis(40))
            .await
            .unwrap());
        assert!(!kv
            .set_nx_ex("dedup:a", "1", Duration::from_millis(40))
            .await
            .unwrap());
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(kv
            .set_nx_ex("dedup:a", "1", Duration::from_millis(40))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn incr_counts_within_window() {
        let kv = MemoryKv::new();
        assert_eq!(
            kv.incr_with_expiry("rl:x", Duration::from_secs(1))
                .await
                .unwrap(),
            1
        );
        assert_eq!(
            kv.incr_with_expiry("rl:x", Duration::from_secs(1))
                .await
                .unwrap(),
            2
        );
    }

    #[tokio::test]
    async fn lists_are_fifo_through_lpush_brpop() {
        let kv = MemoryKv::new();
        kv.lpush("q", "first").await.unwrap();
        kv.lpush("q", "second").await.unwrap();
        let (key, value) = kv
            .brpop(&["q".to_string()], Duration::from_millis(50))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(key, "q");
        assert_eq!(value, "first");
        assert_eq!(kv.llen("q").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn brpop_times_out_on_empty_lists() {
        let kv = MemoryKv::new();
        let popped = kv
            .brpop(&["empty".to_string()], Duration::from_millis(30))
            .await
            .unwrap();
        assert!(popped.is_none());
    }

    #[tokio::test]
    async fn zset_prune_drops_stale_members() {
        let kv = MemoryKv::new();
        kv.zadd("inflight", "a", 100.0).await.unwrap();
        kv.zadd("inflight", "b", 200.0).await.unwrap();
        assert_eq!(kv.zcard_prune("inflight", 150.0).await.unwrap(), 1);
        kv.zrem("inflight", "b").await.unwrap();
        assert_eq!(kv.zcard_prune("inflight", 0.0).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn pubsub_delivers_to_subscriber() {
        let kv = MemoryKv::new();
        let mut rx = kv.subscribe("chan").await.unwrap();
        kv.publish("chan", "hello").await.unwrap();
        let msg = tokio::time::timeout(Duration::from_millis(200), rx.recv())
            .await
            .unwrap();
        assert_eq!(msg.as_deref(), Some("hello"));
    }
}
