// src/store/kv.rs
// Key/value cache: Redis-backed or in-process TTL map

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use std::collections::HashMap;
use tracing::info;

use crate::config::KvConfig;
use crate::error::{Result, TrellisError};

enum KvBackend {
    Redis(ConnectionManager),
    Memory(Mutex<HashMap<String, MemoryEntry>>),
}

struct MemoryEntry {
    value: String,
    expires_at: Option<DateTime<Utc>>,
}

impl MemoryEntry {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Utc::now() > at)
    }
}

/// Small key/value cache used for the last-AI-message cache, email
/// verification codes and simple counters. Backed by Redis when `KV_URL` is
/// configured, otherwise by an in-process map with lazy expiry.
pub struct Kv {
    backend: KvBackend,
}

impl Kv {
    pub async fn connect(config: &KvConfig) -> Result<Self> {
        let backend = match &config.url {
            Some(url) => {
                let client = redis::Client::open(url.as_str())
                    .map_err(|e| TrellisError::Store(format!("invalid KV url: {e}")))?;
                let manager = ConnectionManager::new(client)
                    .await
                    .map_err(|e| TrellisError::Store(format!("KV connect failed: {e}")))?;
                info!("key/value cache connected (redis)");
                KvBackend::Redis(manager)
            }
            None => {
                info!("key/value cache running in-process");
                KvBackend::Memory(Mutex::new(HashMap::new()))
            }
        };
        Ok(Self { backend })
    }

    pub fn in_memory() -> Self {
        Self {
            backend: KvBackend::Memory(Mutex::new(HashMap::new())),
        }
    }

    /// Set a value with an expiry in seconds (0 = no expiry).
    pub async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        match &self.backend {
            KvBackend::Redis(manager) => {
                let mut conn = manager.clone();
                if ttl_secs > 0 {
                    conn.set_ex::<_, _, ()>(key, value, ttl_secs)
                        .await
                        .map_err(|e| TrellisError::Store(format!("kv set failed: {e}")))?;
                } else {
                    conn.set::<_, _, ()>(key, value)
                        .await
                        .map_err(|e| TrellisError::Store(format!("kv set failed: {e}")))?;
                }
            }
            KvBackend::Memory(map) => {
                let expires_at = (ttl_secs > 0)
                    .then(|| Utc::now() + Duration::seconds(ttl_secs as i64));
                map.lock().insert(
                    key.to_string(),
                    MemoryEntry {
                        value: value.to_string(),
                        expires_at,
                    },
                );
            }
        }
        Ok(())
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        match &self.backend {
            KvBackend::Redis(manager) => {
                let mut conn = manager.clone();
                conn.get(key)
                    .await
                    .map_err(|e| TrellisError::Store(format!("kv get failed: {e}")))
            }
            KvBackend::Memory(map) => {
                let mut guard = map.lock();
                match guard.get(key) {
                    Some(entry) if entry.is_expired() => {
                        guard.remove(key);
                        Ok(None)
                    }
                    Some(entry) => Ok(Some(entry.value.clone())),
                    None => Ok(None),
                }
            }
        }
    }

    pub async fn delete(&self, key: &str) -> Result<()> {
        match &self.backend {
            KvBackend::Redis(manager) => {
                let mut conn = manager.clone();
                conn.del::<_, ()>(key)
                    .await
                    .map_err(|e| TrellisError::Store(format!("kv delete failed: {e}")))?;
            }
            KvBackend::Memory(map) => {
                map.lock().remove(key);
            }
        }
        Ok(())
    }

    /// Increment a counter, creating it at 1 when absent.
    pub async fn incr(&self, key: &str) -> Result<i64> {
        match &self.backend {
            KvBackend::Redis(manager) => {
                let mut conn = manager.clone();
                conn.incr(key, 1)
                    .await
                    .map_err(|e| TrellisError::Store(format!("kv incr failed: {e}")))
            }
            KvBackend::Memory(map) => {
                let mut guard = map.lock();
                let next = match guard.get(key) {
                    Some(entry) if !entry.is_expired() => {
                        entry.value.parse::<i64>().unwrap_or(0) + 1
                    }
                    _ => 1,
                };
                guard.insert(
                    key.to_string(),
                    MemoryEntry {
                        value: next.to_string(),
                        expires_at: None,
                    },
                );
                Ok(next)
            }
        }
    }
}

/// Key of the cached last AI answer for a session.
pub fn last_ai_message_key(session_id: &str) -> String {
    format!("session:{session_id}:last_ai_message")
}

/// Key of a pending email verification code.
pub fn email_code_key(email: &str) -> String {
    format!("email_code:{email}")
}
