use std::any::type_name;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, RwLock};

use tracing::debug;

use crate::copy::{Copier, CopyEngine};
use crate::error::{CaptureError, CaptureResult};
use crate::view::CaptureView;

/// Backing array. Each slot is written at most once; a replaced array is
/// never written again.
struct Slots<T> {
    cells: Box<[OnceLock<Arc<T>>]>,
}

impl<T> Slots<T> {
    fn empty(capacity: usize) -> Self {
        Self {
            cells: (0..capacity).map(|_| OnceLock::new()).collect(),
        }
    }

    fn capacity(&self) -> usize {
        self.cells.len()
    }

    /// A larger array carrying every filled slot at the same position.
    fn grown_to(&self, capacity: usize) -> Self {
        let grown = Self::empty(capacity);
        for (old, new) in self.cells.iter().zip(grown.cells.iter()) {
            if let Some(value) = old.get() {
                let _ = new.set(Arc::clone(value));
            }
        }
        grown
    }
}

/// State only touched while the writer mutex is held.
struct WriterState {
    /// Capacity restored by `reset(None)`.
    configured_capacity: usize,
}

/// Positions handed out by [`CaptureStore::reserve`], stamped with the
/// epoch they belong to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Reservation {
    pub start: usize,
    pub epoch: u64,
}

/// Growable, indexed buffer of isolated captures for one value type.
///
/// Concurrency model:
/// - Every mutation of the backing array (commit, growth, reset, create)
///   happens under one writer `Mutex`.
/// - Readers clone an `Arc` of the current array under a short read lock
///   and then read write-once slots with no lock held.
/// - Positions come from an atomic cursor shared with the async ingest
///   path, so two writers never claim the same position.
pub struct CaptureStore<T> {
    slots: RwLock<Arc<Slots<T>>>,
    writer: Mutex<WriterState>,
    cursor: AtomicUsize,
    /// Positions below this stay readable even if the cursor never reached
    /// them. Set to the fresh capacity on reset, zero on create.
    floor: AtomicUsize,
    committed: AtomicUsize,
    epoch: AtomicU64,
    copier: Copier<T>,
}

impl<T> CaptureStore<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a store that isolates values through `Clone`.
    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_copier(capacity, CopyEngine::cloning())
    }

    /// Create a store that isolates values through `copier`.
    pub fn with_copier(capacity: usize, copier: Copier<T>) -> Self {
        Self {
            slots: RwLock::new(Arc::new(Slots::empty(capacity))),
            writer: Mutex::new(WriterState {
                configured_capacity: capacity,
            }),
            cursor: AtomicUsize::new(0),
            floor: AtomicUsize::new(0),
            committed: AtomicUsize::new(0),
            epoch: AtomicU64::new(0),
            copier,
        }
    }

    /// Replace the backing array with an empty one of `capacity` and restart
    /// positions from zero. Queued items reserved before this call are
    /// discarded when drained.
    pub fn create(&self, capacity: usize) {
        let mut state = self.lock_writer();
        state.configured_capacity = capacity;
        self.install(Slots::empty(capacity));
        self.cursor.store(0, Ordering::Release);
        self.floor.store(0, Ordering::Release);
        debug!(type_name = type_name::<T>(), capacity, "capture store created");
    }

    /// Replace the backing array with an empty one, keeping the cursor so
    /// earlier positions are never handed out again.
    ///
    /// Without an explicit size the last configured capacity is reused.
    pub fn reset(&self, capacity: Option<usize>) {
        let mut state = self.lock_writer();
        if let Some(capacity) = capacity {
            state.configured_capacity = capacity;
        }
        let capacity = state.configured_capacity;
        self.install(Slots::empty(capacity));
        self.floor.store(capacity, Ordering::Release);
        debug!(type_name = type_name::<T>(), capacity, "capture store reset");
    }

    /// Isolate `value` with this store's copier.
    pub fn isolate(&self, value: &T) -> CaptureResult<T> {
        (self.copier)(value)
    }

    /// Isolate `value` and commit it at the next cursor position.
    ///
    /// Grows the backing array when the position is past capacity. Returns
    /// the assigned position.
    pub fn post(&self, value: &T) -> CaptureResult<usize> {
        let copy = Arc::new(self.isolate(value)?);
        let mut state = self.lock_writer();
        let position = self.cursor.fetch_add(1, Ordering::AcqRel);
        self.commit_locked(&mut state, position, vec![copy])?;
        Ok(position)
    }

    /// Isolate `value` and commit it at an explicit position.
    ///
    /// Only positions the cursor has not handed out yet can be claimed:
    /// anything below the cursor is already committed, reserved by a queued
    /// item, or retired by a reset, and fails with
    /// [`CaptureError::PositionOccupied`]. On success the cursor moves past
    /// `position`.
    pub fn post_at(&self, value: &T, position: usize) -> CaptureResult<()> {
        let copy = Arc::new(self.isolate(value)?);
        let mut state = self.lock_writer();
        self.claim_locked(&mut state, position)?;
        self.commit_locked(&mut state, position, vec![copy])
    }

    /// Entry at `position`.
    ///
    /// A position is readable when it is below both the capacity and the
    /// cursor. Readable slots without a committed entry (after a reset, or
    /// reserved by a queued item that has not been drained) yield `None`.
    pub fn get(&self, position: usize) -> CaptureResult<Option<T>> {
        let slots = self.current();
        let capacity = slots.capacity();
        let readable = capacity.min(self.cursor().max(self.floor.load(Ordering::Acquire)));
        if position >= readable {
            return Err(CaptureError::IndexOutOfRange {
                position,
                readable,
                capacity,
            });
        }
        Ok(slots.cells[position].get().map(|value| T::clone(value)))
    }

    /// First committed entry, in position order, matching `predicate`.
    ///
    /// Unfilled slots never match.
    pub fn find<F>(&self, predicate: F) -> CaptureResult<T>
    where
        F: Fn(&T) -> bool,
    {
        let slots = self.current();
        slots
            .cells
            .iter()
            .filter_map(|cell| cell.get().map(Arc::as_ref))
            .find(|value| predicate(*value))
            .cloned()
            .ok_or(CaptureError::NotFound {
                type_name: type_name::<T>(),
            })
    }

    /// Snapshot of the current backing array.
    pub fn as_sequence(&self) -> CaptureView<T> {
        let slots = self.current();
        CaptureView::new(slots.cells.iter().map(|cell| cell.get().cloned()).collect())
    }

    /// Committed entries in position order, at most `size` of them.
    pub fn as_list(&self, size: Option<usize>) -> Vec<T> {
        let view = self.as_sequence();
        let limit = size.unwrap_or(usize::MAX);
        view.entries()
            .take(limit)
            .map(|(_, value)| value.clone())
            .collect()
    }

    /// Allocated length of the current backing array.
    pub fn capacity(&self) -> usize {
        self.current().capacity()
    }

    /// Next position the store will hand out.
    pub fn cursor(&self) -> usize {
        self.cursor.load(Ordering::Acquire)
    }

    /// Number of filled slots in the current backing array.
    pub fn committed(&self) -> usize {
        self.committed.load(Ordering::Acquire)
    }

    pub(crate) fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Reserve `count` consecutive positions without committing anything.
    ///
    /// Runs under the writer lock so the epoch and the positions always
    /// come from the same generation of the store.
    pub(crate) fn reserve(&self, count: usize) -> Reservation {
        let _state = self.lock_writer();
        let epoch = self.epoch();
        let start = self.cursor.fetch_add(count, Ordering::AcqRel);
        Reservation { start, epoch }
    }

    /// Reserve one explicit position, under the same rules as
    /// [`CaptureStore::post_at`].
    pub(crate) fn reserve_at(&self, position: usize) -> CaptureResult<Reservation> {
        let mut state = self.lock_writer();
        self.claim_locked(&mut state, position)?;
        Ok(Reservation {
            start: position,
            epoch: self.epoch(),
        })
    }

    /// Commit already-isolated values at a reserved run of positions.
    ///
    /// Returns `Ok(false)` when the reservation predates the last
    /// `create`/`reset` and was discarded.
    pub(crate) fn commit_reserved(
        &self,
        reservation: Reservation,
        values: Vec<T>,
    ) -> CaptureResult<bool> {
        let mut state = self.lock_writer();
        if reservation.epoch != self.epoch() {
            debug!(
                type_name = type_name::<T>(),
                start = reservation.start,
                count = values.len(),
                "discarding captures reserved before reset"
            );
            return Ok(false);
        }
        let values = values.into_iter().map(Arc::new).collect();
        self.commit_locked(&mut state, reservation.start, values)?;
        Ok(true)
    }

    /// Move the cursor past `position` if no one holds it yet. Caller holds
    /// the writer lock.
    fn claim_locked(
        &self,
        _state: &mut MutexGuard<'_, WriterState>,
        position: usize,
    ) -> CaptureResult<()> {
        let cursor = self.cursor();
        if position < cursor {
            return Err(CaptureError::PositionOccupied { position });
        }
        let next = position
            .checked_add(1)
            .ok_or_else(|| CaptureError::IndexOutOfRange {
                position,
                readable: cursor,
                capacity: self.capacity(),
            })?;
        self.cursor.store(next, Ordering::Release);
        Ok(())
    }

    fn commit_locked(
        &self,
        _state: &mut MutexGuard<'_, WriterState>,
        start: usize,
        values: Vec<Arc<T>>,
    ) -> CaptureResult<()> {
        if values.is_empty() {
            return Ok(());
        }
        let last = start + values.len() - 1;
        let slots = self.ensure_capacity(last);

        if let Some(offset) = slots.cells[start..=last]
            .iter()
            .position(|cell| cell.get().is_some())
        {
            return Err(CaptureError::PositionOccupied {
                position: start + offset,
            });
        }

        let count = values.len();
        for (cell, value) in slots.cells[start..=last].iter().zip(values) {
            let _ = cell.set(value);
        }
        self.committed.fetch_add(count, Ordering::AcqRel);
        Ok(())
    }

    /// Grow until `position` is addressable. Caller holds the writer lock.
    fn ensure_capacity(&self, position: usize) -> Arc<Slots<T>> {
        let current = self.current();
        if position < current.capacity() {
            return current;
        }
        let capacity = grown_capacity(current.capacity(), position);
        let grown = Arc::new(current.grown_to(capacity));
        *self.slots.write().expect("slots lock poisoned") = Arc::clone(&grown);
        debug!(
            type_name = type_name::<T>(),
            from = current.capacity(),
            to = capacity,
            "capture store grown"
        );
        grown
    }

    /// Swap in a fresh array and start a new epoch. Caller holds the writer
    /// lock.
    fn install(&self, slots: Slots<T>) {
        *self.slots.write().expect("slots lock poisoned") = Arc::new(slots);
        self.committed.store(0, Ordering::Release);
        self.epoch.fetch_add(1, Ordering::AcqRel);
    }

    fn current(&self) -> Arc<Slots<T>> {
        Arc::clone(&self.slots.read().expect("slots lock poisoned"))
    }

    fn lock_writer(&self) -> MutexGuard<'_, WriterState> {
        self.writer.lock().expect("writer lock poisoned")
    }
}

/// Double `capacity` until `position` fits.
fn grown_capacity(capacity: usize, position: usize) -> usize {
    let mut grown = capacity.max(1);
    while grown <= position {
        grown = grown.checked_mul(2).unwrap_or(position.saturating_add(1));
    }
    grown
}

impl<T> std::fmt::Debug for CaptureStore<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let capacity = self.slots.read().map(|s| s.capacity()).unwrap_or_default();
        f.debug_struct("CaptureStore")
            .field("type_name", &type_name::<T>())
            .field("capacity", &capacity)
            .field("cursor", &self.cursor.load(Ordering::Acquire))
            .field("committed", &self.committed.load(Ordering::Acquire))
            .finish()
    }
}
