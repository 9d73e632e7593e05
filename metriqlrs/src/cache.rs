//! Single-flight cache of compiled queries.
//!
//! Each key owns a `OnceCell`; the first caller compiles while concurrent
//! callers for the same key wait on the cell. A failed compilation leaves
//! the cell empty and the entry is dropped, so errors are never cached.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tokio::sync::{Mutex, OnceCell};

use crate::config::CacheConfig;
use crate::dialect::DialectKind;
use crate::error::Result;
use crate::query_builder::CompiledQuery;
use crate::request::QueryRequest;

type Slot = Arc<OnceCell<Arc<CompiledQuery>>>;

/// Cache key: hex SHA-256 of the JSON encoding of the dialect and request.
pub fn cache_key(dialect: DialectKind, request: &QueryRequest) -> Result<String> {
    let json = serde_json::to_vec(&(dialect, request))?;
    let mut hasher = Sha256::new();
    hasher.update(&json);
    Ok(hex::encode(hasher.finalize()))
}

#[derive(Debug, Default)]
struct Slots {
    cells: HashMap<String, Slot>,
    /// Insertion order, oldest first.
    order: VecDeque<String>,
}

#[derive(Debug)]
pub struct PlanCache {
    max_entries: usize,
    slots: Mutex<Slots>,
}

impl Default for PlanCache {
    fn default() -> Self {
        Self::with_config(&CacheConfig::default())
    }
}

impl PlanCache {
    pub fn with_config(config: &CacheConfig) -> Self {
        Self::new(config.max_entries)
    }

    pub fn new(max_entries: usize) -> Self {
        Self {
            max_entries: max_entries.max(1),
            slots: Mutex::new(Slots::default()),
        }
    }

    pub async fn len(&self) -> usize {
        self.slots.lock().await.cells.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn clear(&self) {
        let mut slots = self.slots.lock().await;
        slots.cells.clear();
        slots.order.clear();
    }

    async fn slot(&self, key: &str) -> Slot {
        let mut slots = self.slots.lock().await;
        if let Some(cell) = slots.cells.get(key) {
            return cell.clone();
        }
        let cell: Slot = Arc::new(OnceCell::new());
        slots.cells.insert(key.to_string(), cell.clone());
        slots.order.push_back(key.to_string());
        while slots.cells.len() > self.max_entries {
            let Some(oldest) = slots.order.pop_front() else {
                break;
            };
            slots.cells.remove(&oldest);
            tracing::debug!(key = %oldest, "evicted compiled query");
        }
        cell
    }

    /// Return the cached value for `key`, running `init` at most once across
    /// concurrent callers.
    pub async fn get_or_try_init<F, Fut>(&self, key: &str, init: F) -> Result<Arc<CompiledQuery>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<CompiledQuery>>,
    {
        let cell = self.slot(key).await;
        let outcome = cell
            .get_or_try_init(|| async { init().await.map(Arc::new) })
            .await
            .map(Arc::clone);
        if outcome.is_err() {
            let mut slots = self.slots.lock().await;
            let stale = slots
                .cells
                .get(key)
                .map(|current| Arc::ptr_eq(current, &cell) && !current.initialized())
                .unwrap_or(false);
            if stale {
                slots.cells.remove(key);
                slots.order.retain(|k| k != key);
            }
        }
        outcome
    }
}
