use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use log::debug;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::error::Result;

/// How long unread entries of an idle session are kept.
pub const DEFAULT_FLASH_TTL: Duration = Duration::from_secs(60 * 60);

/// Session-scoped values meant to be read once by the next rendered view.
#[async_trait]
pub trait FlashStore: Send + Sync {
    async fn set(&self, session: &str, key: &str, value: Value) -> Result<()>;

    /// Return every entry of `session` and forget them.
    async fn take_all(&self, session: &str) -> Result<BTreeMap<String, Value>>;
}

#[derive(Debug)]
struct SessionFlash {
    entries: BTreeMap<String, Value>,
    touched: Instant,
}

/// Process-local flash store. Sessions untouched for longer than the TTL
/// are dropped on the next `set`, and never returned by `take_all`.
#[derive(Debug)]
pub struct MemoryFlashStore {
    sessions: Mutex<HashMap<String, SessionFlash>>,
    ttl: Duration,
}

impl MemoryFlashStore {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_FLASH_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    #[cfg(test)]
    pub(crate) async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }
}

impl Default for MemoryFlashStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FlashStore for MemoryFlashStore {
    async fn set(&self, session: &str, key: &str, value: Value) -> Result<()> {
        let now = Instant::now();
        let mut sessions = self.sessions.lock().await;

        let before = sessions.len();
        sessions.retain(|_, flash| now.duration_since(flash.touched) <= self.ttl);
        if sessions.len() < before {
            debug!("Evicted {} idle flash sessions", before - sessions.len());
        }

        let flash = sessions
            .entry(session.to_string())
            .or_insert_with(|| SessionFlash {
                entries: BTreeMap::new(),
                touched: now,
            });
        flash.touched = now;
        flash.entries.insert(key.to_string(), value);
        Ok(())
    }

    async fn take_all(&self, session: &str) -> Result<BTreeMap<String, Value>> {
        let mut sessions = self.sessions.lock().await;
        Ok(match sessions.remove(session) {
            Some(flash) if flash.touched.elapsed() <= self.ttl => flash.entries,
            _ => BTreeMap::new(),
        })
    }
}
