//! Client-side data synchronization
//!
//! A [`Collection`] mirrors one backend table for the signed-in user. It keeps
//! the records in memory, refetches when the cache is stale or the user
//! changed, collapses concurrent fetches into one backend call, inserts
//! optimistically on create and applies realtime [`ChangeEvent`]s by id.
//!
//! The backend is abstracted behind [`Source`]; [`HttpSource`] talks to the
//! server routes, tests plug in in-memory sources.

mod http;
mod records;
mod store;

pub use http::{ApiClient, HttpSource};
pub use records::Record;
pub use store::TransactionStore;

use std::future::Future;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::constants::*;
use crate::realtime::{ChangeEvent, ChangeKind, Subscription};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SyncError {
    #[error("request failed: {0}")]
    Transport(String),
    #[error("server returned {status}: {message}")]
    Api { status: u16, message: String },
    #[error("not authenticated")]
    Unauthenticated,
    #[error("record not found: {0}")]
    NotFound(String),
    #[error("invalid response: {0}")]
    Decode(String),
}

/// Backend operations for one record type.
pub trait Source<T: Record>: Send + Sync {
    fn fetch_all(&self) -> impl Future<Output = Result<Vec<T>, SyncError>> + Send;
    fn create(&self, draft: &T::Draft) -> impl Future<Output = Result<T, SyncError>> + Send;
    fn update(&self, id: &str, patch: &T::Patch)
    -> impl Future<Output = Result<T, SyncError>> + Send;
    fn delete(&self, id: &str) -> impl Future<Output = Result<(), SyncError>> + Send;
}

#[derive(Debug, Clone, Copy)]
pub struct SyncOptions {
    pub stale_time: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            stale_time: Duration::from_secs(DEFAULT_STALE_SECS),
        }
    }
}

struct CacheState<T> {
    items: Vec<T>,
    loading: bool,
    error: Option<SyncError>,
    owner: Option<String>,
    /// Bumped on every owner change; fetches are tagged with it.
    epoch: u64,
    last_fetched_at: Option<Instant>,
    last_completed: Option<(u64, Instant)>,
}

impl<T> CacheState<T> {
    fn switch_owner(&mut self, owner: &str) {
        self.owner = Some(owner.to_string());
        self.epoch += 1;
        self.items.clear();
        self.error = None;
        self.last_fetched_at = None;
    }
}

impl<T> Default for CacheState<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            loading: false,
            error: None,
            owner: None,
            epoch: 0,
            last_fetched_at: None,
            last_completed: None,
        }
    }
}

pub struct Collection<T: Record, S: Source<T>> {
    source: S,
    options: SyncOptions,
    state: RwLock<CacheState<T>>,
    fetch_lock: Mutex<()>,
}

pub fn is_temp_id(id: &str) -> bool {
    id.starts_with(TEMP_ID_PREFIX)
}

impl<T: Record, S: Source<T>> Collection<T, S> {
    pub fn new(source: S) -> Self {
        Self::with_options(source, SyncOptions::default())
    }

    pub fn with_options(source: S, options: SyncOptions) -> Self {
        Self {
            source,
            options,
            state: RwLock::new(CacheState::default()),
            fetch_lock: Mutex::new(()),
        }
    }

    /// Seeds the cache with server-rendered records. The next `ensure_fresh`
    /// still fetches since nothing has been confirmed by this collection.
    pub async fn hydrate(&self, owner: &str, items: Vec<T>) {
        let mut state = self.state.write().await;
        if state.owner.as_deref() != Some(owner) {
            state.switch_owner(owner);
        }
        state.items = items;
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub async fn items(&self) -> Vec<T> {
        self.state.read().await.items.clone()
    }

    pub async fn get(&self, id: &str) -> Option<T> {
        self.state
            .read()
            .await
            .items
            .iter()
            .find(|item| item.id() == id)
            .cloned()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.items.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.items.is_empty()
    }

    pub async fn is_loading(&self) -> bool {
        self.state.read().await.loading
    }

    pub async fn last_error(&self) -> Option<SyncError> {
        self.state.read().await.error.clone()
    }

    pub async fn is_stale(&self) -> bool {
        let state = self.state.read().await;
        state
            .last_fetched_at
            .is_none_or(|at| at.elapsed() > self.options.stale_time)
    }

    /// Fetches when the owner changed, the cache is stale or empty.
    /// Returns whether a fetch was issued.
    pub async fn ensure_fresh(&self, user_id: &str) -> Result<bool, SyncError> {
        {
            let mut state = self.state.write().await;
            let owner_changed = state.owner.as_deref() != Some(user_id);
            let stale = state
                .last_fetched_at
                .is_none_or(|at| at.elapsed() > self.options.stale_time);
            if !(owner_changed || stale || state.items.is_empty()) {
                return Ok(false);
            }
            if owner_changed {
                state.switch_owner(user_id);
            }
        }
        self.refetch().await?;
        Ok(true)
    }

    /// Reloads everything from the source. Callers that arrive while a fetch is
    /// running wait for it and reuse its outcome instead of fetching again,
    /// as long as the owner did not change in between.
    pub async fn refetch(&self) -> Result<(), SyncError> {
        let started = Instant::now();
        let _guard = self.fetch_lock.lock().await;

        let epoch = {
            let mut state = self.state.write().await;
            let current = state.epoch;
            let reusable = state
                .last_completed
                .is_some_and(|(epoch, at)| epoch == current && at >= started);
            if reusable {
                return match &state.error {
                    Some(e) => Err(e.clone()),
                    None => Ok(()),
                };
            }
            state.loading = true;
            current
        };

        let result = self.source.fetch_all().await;

        let mut state = self.state.write().await;
        state.loading = false;
        if state.epoch != epoch {
            // Owner switched mid-fetch; the caller waiting for the new owner fetches again.
            tracing::debug!(table = T::TABLE, "discarding fetch for previous owner");
            return Ok(());
        }
        state.last_completed = Some((epoch, Instant::now()));
        match result {
            Ok(items) => {
                tracing::debug!(table = T::TABLE, count = items.len(), "collection fetched");
                state.items = items;
                state.error = None;
                state.last_fetched_at = Some(Instant::now());
                Ok(())
            }
            Err(e) => {
                tracing::error!(table = T::TABLE, error = %e, "collection fetch failed");
                state.items.clear();
                state.error = Some(e.clone());
                Err(e)
            }
        }
    }

    /// Optimistic create: a provisional record is shown at the front until the
    /// source confirms it (replaced) or fails (rolled back).
    pub async fn create(&self, draft: &T::Draft) -> Result<T, SyncError> {
        let temp_id = format!("{}{}", TEMP_ID_PREFIX, Uuid::new_v4());
        {
            let mut state = self.state.write().await;
            let owner = state.owner.clone().unwrap_or_default();
            state.items.insert(0, T::provisional(temp_id.clone(), &owner, draft));
        }

        match self.source.create(draft).await {
            Ok(confirmed) => {
                self.replace_temp(&temp_id, confirmed.clone()).await;
                Ok(confirmed)
            }
            Err(e) => {
                tracing::warn!(table = T::TABLE, error = %e, "create failed, rolling back");
                self.state
                    .write()
                    .await
                    .items
                    .retain(|item| item.id() != temp_id);
                Err(e)
            }
        }
    }

    /// Swaps a provisional record for the confirmed one. If a realtime insert
    /// already delivered the confirmed record, the provisional one is dropped.
    pub async fn replace_temp(&self, temp_id: &str, confirmed: T) {
        let mut state = self.state.write().await;
        let already_present = state.items.iter().any(|item| item.id() == confirmed.id());
        if already_present {
            state.items.retain(|item| item.id() != temp_id);
        } else if let Some(index) = state.items.iter().position(|item| item.id() == temp_id) {
            state.items[index] = confirmed;
        } else {
            state.items.insert(0, confirmed);
        }
        state.last_fetched_at = Some(Instant::now());
    }

    pub async fn update(&self, id: &str, patch: &T::Patch) -> Result<T, SyncError> {
        let updated = self.source.update(id, patch).await?;
        let mut state = self.state.write().await;
        if let Some(slot) = state.items.iter_mut().find(|item| item.id() == id) {
            *slot = updated.clone();
        }
        Ok(updated)
    }

    pub async fn delete(&self, id: &str) -> Result<(), SyncError> {
        self.source.delete(id).await?;
        self.state.write().await.items.retain(|item| item.id() != id);
        Ok(())
    }

    /// Applies one realtime event; returns whether the cache changed.
    pub async fn apply(&self, event: &ChangeEvent) -> bool {
        if event.table != T::TABLE {
            return false;
        }

        let mut state = self.state.write().await;
        if state.owner.as_deref().is_some_and(|owner| owner != event.user_id) {
            return false;
        }

        match event.event {
            ChangeKind::Insert | ChangeKind::Update => {
                let Some(value) = event.new.clone() else {
                    return false;
                };
                let record: T = match serde_json::from_value(value) {
                    Ok(record) => record,
                    Err(e) => {
                        tracing::warn!(table = T::TABLE, error = %e, "ignoring malformed change event");
                        return false;
                    }
                };
                match state.items.iter().position(|item| item.id() == record.id()) {
                    Some(_) if event.event == ChangeKind::Insert => false,
                    Some(index) => {
                        state.items[index] = record;
                        true
                    }
                    None => {
                        state.items.insert(0, record);
                        true
                    }
                }
            }
            ChangeKind::Delete => {
                let Some(id) = event.record_id() else {
                    return false;
                };
                let before = state.items.len();
                state.items.retain(|item| item.id() != id);
                state.items.len() != before
            }
        }
    }

    /// Applies events from an in-process feed until it closes.
    pub async fn follow(&self, mut subscription: Subscription) {
        while let Some(event) = subscription.next().await {
            self.apply(&event).await;
        }
    }
}
