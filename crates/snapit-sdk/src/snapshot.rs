use std::any::type_name;
use std::ops::Range;
use std::sync::{Arc, OnceLock};

use futures::Stream;
use serde::de::DeserializeOwned;
use serde::Serialize;
use snapit_store::{
    CancellationToken, CaptureStore, CaptureView, Copier, CopyEngine, IngestQueue, StoreConfig,
};
use tracing::{debug, info};

use crate::error::{SdkError, SdkResult};
use crate::registry::{Capturable, Captures, Registry};

static GLOBAL: OnceLock<Snapshot> = OnceLock::new();

/// Entry object for all capture operations.
///
/// Dispatches each call to the store/queue pair registered for the type
/// argument. Use [`Snapshot::global`] for the process-wide context, or
/// [`Snapshot::new`] for an independent one (tests, embedding).
///
/// Writes to a type with no store create one with the configured default
/// capacity. Reads on a type with no store fail with
/// [`SdkError::NotRegistered`].
pub struct Snapshot {
    config: StoreConfig,
    registry: Registry,
}

impl Snapshot {
    /// New context with the default configuration.
    pub fn new() -> Self {
        Self::with_config(StoreConfig::default())
    }

    pub fn with_config(config: StoreConfig) -> Self {
        Self {
            config,
            registry: Registry::new(),
        }
    }

    /// The process-wide context, initialized on first use with the default
    /// configuration unless [`Snapshot::init_global`] ran first.
    ///
    /// Teardown is [`Snapshot::clear_all`]; the context itself lives for the
    /// rest of the process.
    pub fn global() -> &'static Snapshot {
        GLOBAL.get_or_init(Snapshot::new)
    }

    /// Initialize the process-wide context with `config`.
    ///
    /// Returns `false` if it was already initialized, in which case `config`
    /// is ignored.
    pub fn init_global(config: StoreConfig) -> bool {
        let mut installed = false;
        GLOBAL.get_or_init(|| {
            installed = true;
            Snapshot::with_config(config)
        });
        installed
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    // ---- Lifecycle ----

    /// Create (or recreate) `T`'s store with `capacity`, discarding any
    /// previous store and queued items for `T`.
    pub fn create<T: Capturable>(&self, capacity: usize) {
        self.create_with_copier::<T>(capacity, CopyEngine::cloning());
    }

    /// As [`Snapshot::create`], isolating values through `copier`.
    pub fn create_with_copier<T: Capturable>(&self, capacity: usize, copier: Copier<T>) {
        self.registry
            .replace(Captures::new(capacity, copier, &self.config));
        info!(type_name = type_name::<T>(), capacity, "capture store registered");
    }

    /// Empty `T`'s store, keeping it registered. Without an explicit size the
    /// last configured capacity is reused.
    pub fn reset<T: Capturable>(&self, capacity: Option<usize>) -> SdkResult<()> {
        self.captures::<T>()?.store.reset(capacity);
        Ok(())
    }

    /// Remove `T`'s store from the registry. Returns `true` if it existed.
    pub fn clear<T: Capturable>(&self) -> bool {
        let removed = self.registry.remove::<T>();
        debug!(type_name = type_name::<T>(), removed, "capture store cleared");
        removed
    }

    /// Remove every registered store. Returns how many were removed.
    pub fn clear_all(&self) -> usize {
        let removed = self.registry.clear();
        info!(removed, "all capture stores cleared");
        removed
    }

    // ---- Writes ----

    /// Isolate `value` and commit it at the next position.
    pub fn post<T: Capturable>(&self, value: &T) -> SdkResult<usize> {
        Ok(self.captures_or_create::<T>().store.post(value)?)
    }

    /// Isolate `value` and queue it; it becomes readable on the next drain.
    pub async fn post_async<T: Capturable>(&self, value: &T) -> SdkResult<usize> {
        let queue = Arc::clone(&self.captures_or_create::<T>().queue);
        Ok(queue.enqueue(value, &CancellationToken::new()).await?)
    }

    /// Isolate `value` and queue it for an explicit position. Positions the
    /// store already handed out fail with `PositionOccupied`.
    pub async fn post_at_async<T: Capturable>(&self, value: &T, position: usize) -> SdkResult<()> {
        let queue = Arc::clone(&self.captures_or_create::<T>().queue);
        Ok(queue
            .enqueue_at(value, position, &CancellationToken::new())
            .await?)
    }

    /// Isolate every value and queue them as one contiguous run. Nothing is
    /// queued if any value fails to isolate.
    pub async fn post_batch_async<T: Capturable>(&self, values: &[T]) -> SdkResult<Range<usize>> {
        let queue = Arc::clone(&self.captures_or_create::<T>().queue);
        Ok(queue.enqueue_batch(values, &CancellationToken::new()).await?)
    }

    // ---- Buffer lines ----

    /// Push an isolated copy of `value` onto `T`'s buffer line.
    pub fn push_line<T: Capturable>(&self, value: &T) -> SdkResult<()> {
        let captures = self.captures_or_create::<T>();
        let copy = captures.store.isolate(value)?;
        Ok(captures.line.push(copy)?)
    }

    /// Stream of `T`'s buffer line. Ends once the line is closed and drained.
    pub fn read_line<T: Capturable>(&self) -> SdkResult<impl Stream<Item = T> + Send + 'static> {
        Ok(self.captures::<T>()?.line.stream())
    }

    /// Close `T`'s buffer line. Returns `false` if it was already closed.
    pub fn close_line<T: Capturable>(&self) -> SdkResult<bool> {
        Ok(self.captures::<T>()?.line.close())
    }

    /// Start a fresh buffer line for `T`, registering `T` if needed.
    pub fn create_line<T: Capturable>(&self) {
        self.captures_or_create::<T>().line.recreate();
    }

    // ---- Reads ----

    /// Entry at `position`; `None` for a readable slot with no entry.
    ///
    /// Earlier async posts are committed first. Called from inside a tokio
    /// runtime, items held by a drain running on another task may not be
    /// visible yet; use [`Snapshot::get_async`] there to wait for them.
    pub fn get<T: Capturable>(&self, position: usize) -> SdkResult<Option<T>> {
        let captures = self.drained::<T>()?;
        Ok(captures.store.get(position)?)
    }

    /// First entry, in position order, matching `predicate`. Sees async posts
    /// under the same rules as [`Snapshot::get`].
    pub fn find<T, F>(&self, predicate: F) -> SdkResult<T>
    where
        T: Capturable,
        F: Fn(&T) -> bool,
    {
        let captures = self.drained::<T>()?;
        Ok(captures.store.find(predicate)?)
    }

    /// Wait for pending async posts to land, then read `position`.
    pub async fn get_async<T: Capturable>(&self, position: usize) -> SdkResult<Option<T>> {
        let queue = Arc::clone(&self.captures::<T>()?.queue);
        Ok(queue.get_async(position).await?)
    }

    /// Wait for pending async posts to land, then return every entry in
    /// position order.
    pub async fn get_all_async<T: Capturable>(&self) -> SdkResult<Vec<T>> {
        let queue = Arc::clone(&self.captures::<T>()?.queue);
        Ok(queue.get_all_async().await?)
    }

    /// Copy-out view over `T`'s current backing array.
    pub fn as_sequence<T: Capturable>(&self) -> SdkResult<CaptureView<T>> {
        Ok(self.drained::<T>()?.store.as_sequence())
    }

    /// Entries in position order, at most `size` of them.
    pub fn as_list<T: Capturable>(&self, size: Option<usize>) -> SdkResult<Vec<T>> {
        Ok(self.drained::<T>()?.store.as_list(size))
    }

    // ---- Copies ----

    /// Isolated copy of `value` without storing it.
    pub fn copy<T: Clone>(&self, value: Option<&T>) -> SdkResult<T> {
        Ok(CopyEngine::isolate(value)?)
    }

    /// Project `source` onto a default `D` by field name.
    pub fn copy_fields<S, D>(&self, source: &S) -> SdkResult<D>
    where
        S: Serialize,
        D: Serialize + DeserializeOwned + Default,
    {
        Ok(CopyEngine::copy_fields(source)?)
    }

    // ---- Introspection ----

    pub fn is_registered<T: Capturable>(&self) -> bool {
        self.registry.contains::<T>()
    }

    /// Sorted type names of every registered store.
    pub fn registered_types(&self) -> Vec<&'static str> {
        self.registry.type_names()
    }

    /// Direct handle to `T`'s store.
    pub fn store<T: Capturable>(&self) -> SdkResult<Arc<CaptureStore<T>>> {
        Ok(Arc::clone(&self.captures::<T>()?.store))
    }

    /// Direct handle to `T`'s ingest queue, for cancellable enqueue/drain.
    pub fn queue<T: Capturable>(&self) -> SdkResult<Arc<IngestQueue<T>>> {
        Ok(Arc::clone(&self.captures::<T>()?.queue))
    }

    fn captures<T: Capturable>(&self) -> SdkResult<Arc<Captures<T>>> {
        self.registry
            .get::<T>()
            .ok_or(SdkError::NotRegistered(type_name::<T>()))
    }

    /// Registered captures with any queued items committed first, so
    /// synchronous reads see earlier async posts.
    fn drained<T: Capturable>(&self) -> SdkResult<Arc<Captures<T>>> {
        let captures = self.captures::<T>()?;
        captures.queue.drain_blocking();
        Ok(captures)
    }

    fn captures_or_create<T: Capturable>(&self) -> Arc<Captures<T>> {
        self.registry.get_or_insert_with(|| {
            debug!(
                type_name = type_name::<T>(),
                capacity = self.config.default_capacity,
                "creating capture store on first post"
            );
            Captures::new(
                self.config.default_capacity,
                CopyEngine::cloning(),
                &self.config,
            )
        })
    }
}

impl Default for Snapshot {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Snapshot")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .finish()
    }
}
