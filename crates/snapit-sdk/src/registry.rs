//! Type-keyed registry of capture stores.
//!
//! Each registered type owns one [`Captures`] pair (store plus ingest
//! queue). Entries are held type-erased and recovered by downcasting on the
//! caller's type argument.

use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use snapit_store::{BufferLine, CaptureStore, Copier, IngestQueue, StoreConfig};

/// Bound shared by every type that can be captured.
pub trait Capturable: Clone + Send + Sync + 'static {}

impl<T> Capturable for T where T: Clone + Send + Sync + 'static {}

/// The store, ingest queue, and buffer line for one captured type.
pub struct Captures<T> {
    pub store: Arc<CaptureStore<T>>,
    pub queue: Arc<IngestQueue<T>>,
    pub line: Arc<BufferLine<T>>,
}

impl<T: Capturable> Captures<T> {
    pub fn new(capacity: usize, copier: Copier<T>, config: &StoreConfig) -> Self {
        let store = Arc::new(CaptureStore::with_copier(capacity, copier));
        let queue = Arc::new(IngestQueue::new(Arc::clone(&store), config.queue_bound));
        Self {
            store,
            queue,
            line: Arc::new(BufferLine::new()),
        }
    }
}

struct Entry {
    type_name: &'static str,
    captures: Arc<dyn Any + Send + Sync>,
}

/// Concurrency-safe map from type identity to that type's captures.
#[derive(Default)]
pub struct Registry {
    entries: RwLock<HashMap<TypeId, Entry>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Captures for `T`, if registered.
    pub fn get<T: Capturable>(&self) -> Option<Arc<Captures<T>>> {
        let entries = self.entries.read().expect("registry lock poisoned");
        let entry = entries.get(&TypeId::of::<T>())?;
        Arc::clone(&entry.captures).downcast::<Captures<T>>().ok()
    }

    /// Captures for `T`, registering the result of `make` if absent.
    pub fn get_or_insert_with<T, F>(&self, make: F) -> Arc<Captures<T>>
    where
        T: Capturable,
        F: FnOnce() -> Captures<T>,
    {
        if let Some(existing) = self.get::<T>() {
            return existing;
        }
        let mut entries = self.entries.write().expect("registry lock poisoned");
        let entry = entries.entry(TypeId::of::<T>()).or_insert_with(|| Entry {
            type_name: type_name::<T>(),
            captures: Arc::new(make()),
        });
        Arc::clone(&entry.captures)
            .downcast::<Captures<T>>()
            .expect("registry entry keyed by TypeId holds that type")
    }

    /// Register `captures` for `T`, discarding any previous pair.
    pub fn replace<T: Capturable>(&self, captures: Captures<T>) -> Arc<Captures<T>> {
        let captures = Arc::new(captures);
        let erased: Arc<dyn Any + Send + Sync> = captures.clone();
        self.entries
            .write()
            .expect("registry lock poisoned")
            .insert(
                TypeId::of::<T>(),
                Entry {
                    type_name: type_name::<T>(),
                    captures: erased,
                },
            );
        captures
    }

    /// Drop `T`'s captures. Returns `true` if `T` was registered.
    pub fn remove<T: Capturable>(&self) -> bool {
        self.entries
            .write()
            .expect("registry lock poisoned")
            .remove(&TypeId::of::<T>())
            .is_some()
    }

    /// Drop every registered type. Returns how many were removed.
    pub fn clear(&self) -> usize {
        let mut entries = self.entries.write().expect("registry lock poisoned");
        let removed = entries.len();
        entries.clear();
        removed
    }

    pub fn contains<T: Capturable>(&self) -> bool {
        self.entries
            .read()
            .expect("registry lock poisoned")
            .contains_key(&TypeId::of::<T>())
    }

    /// Sorted names of every registered type.
    pub fn type_names(&self) -> Vec<&'static str> {
        let entries = self.entries.read().expect("registry lock poisoned");
        let mut names: Vec<&'static str> = entries.values().map(|e| e.type_name).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("registry lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("types", &self.type_names())
            .finish()
    }
}
