use std::any::type_name;
use std::ops::Range;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc::error::{TryRecvError, TrySendError};
use tokio::sync::mpsc::{self, OwnedPermit, Receiver, Sender};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{CaptureError, CaptureResult};
use crate::store::{CaptureStore, Reservation};

/// Observable phase of an [`IngestQueue`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueueState {
    /// Nothing queued.
    Idle,
    /// Items are queued but not yet drained.
    Accepting,
    /// A drain is committing items into the store.
    Draining,
}

/// One hand-off item: an isolated run of values and the positions reserved
/// for them.
struct Pocket<T> {
    reservation: Reservation,
    values: Vec<T>,
}

/// Ordered async hand-off in front of a [`CaptureStore`].
///
/// Producers isolate their value, wait for room in a bounded channel, then
/// reserve positions from the store's cursor and push. A single drain at a
/// time pulls items in FIFO order and commits them at their reserved
/// positions. The queue only feeds the store; it never answers a read.
pub struct IngestQueue<T> {
    store: Arc<CaptureStore<T>>,
    sender: Sender<Pocket<T>>,
    receiver: Mutex<Receiver<Pocket<T>>>,
    pending: AtomicUsize,
    draining: AtomicBool,
}

impl<T> IngestQueue<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a queue feeding `store`, holding at most `bound` pending items.
    pub fn new(store: Arc<CaptureStore<T>>, bound: usize) -> Self {
        let (sender, receiver) = mpsc::channel(bound.max(1));
        Self {
            store,
            sender,
            receiver: Mutex::new(receiver),
            pending: AtomicUsize::new(0),
            draining: AtomicBool::new(false),
        }
    }

    /// The store this queue drains into.
    pub fn store(&self) -> &Arc<CaptureStore<T>> {
        &self.store
    }

    /// Isolate `value`, reserve the next position, and queue it.
    ///
    /// Returns as soon as the item is queued; the value becomes readable
    /// after the next drain. If the channel is full the producer drains it
    /// first. Cancellation before the reservation leaves nothing reserved.
    pub async fn enqueue(&self, value: &T, cancel: &CancellationToken) -> CaptureResult<usize> {
        let copy = self.store.isolate(value)?;
        let permit = self.acquire(cancel).await?;
        let reservation = self.store.reserve(1);
        self.push(permit, reservation, vec![copy]);
        Ok(reservation.start)
    }

    /// Isolate `value` and queue it for an explicit position.
    ///
    /// The position is claimed when the item is queued, under the same rules
    /// as [`CaptureStore::post_at`], so a position below the cursor fails
    /// here rather than at drain.
    pub async fn enqueue_at(
        &self,
        value: &T,
        position: usize,
        cancel: &CancellationToken,
    ) -> CaptureResult<()> {
        let copy = self.store.isolate(value)?;
        let permit = self.acquire(cancel).await?;
        let reservation = self.store.reserve_at(position)?;
        self.push(permit, reservation, vec![copy]);
        Ok(())
    }

    /// Isolate every value, reserve a contiguous run of positions, and queue
    /// the run as one item.
    ///
    /// If any value fails to isolate, nothing is reserved or queued.
    pub async fn enqueue_batch(
        &self,
        values: &[T],
        cancel: &CancellationToken,
    ) -> CaptureResult<Range<usize>> {
        let copies = values
            .iter()
            .map(|value| self.store.isolate(value))
            .collect::<CaptureResult<Vec<_>>>()?;
        if copies.is_empty() {
            let cursor = self.store.cursor();
            return Ok(cursor..cursor);
        }

        let permit = self.acquire(cancel).await?;
        let reservation = self.store.reserve(copies.len());
        let positions = reservation.start..reservation.start + copies.len();
        self.push(permit, reservation, copies);
        Ok(positions)
    }

    /// Commit every queued item into the store, in FIFO order.
    ///
    /// Waits for any drain already in progress. Cancellation is checked
    /// between items; undrained items stay queued for the next drain.
    /// Returns the number of values committed. If an item could not be
    /// committed the rest are still drained and the first failure is
    /// returned.
    pub async fn drain(&self, cancel: &CancellationToken) -> CaptureResult<usize> {
        let mut receiver = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(CaptureError::Cancelled),
            guard = self.receiver.lock() => guard,
        };
        self.drain_locked(&mut receiver, Some(cancel))
    }

    /// Drain without waiting. Returns `0` if another drain is running.
    pub fn try_drain(&self) -> usize {
        match self.receiver.try_lock() {
            Ok(mut receiver) => self.drain_locked(&mut receiver, None).unwrap_or_default(),
            Err(_) => 0,
        }
    }

    /// Drain from synchronous code.
    ///
    /// Outside a tokio runtime this waits for a drain already in progress,
    /// so every item queued before the call is committed on return. Inside a
    /// runtime blocking is not allowed and it falls back to
    /// [`IngestQueue::try_drain`]; items held by a concurrent drain then
    /// land when that drain finishes.
    pub fn drain_blocking(&self) -> usize {
        if tokio::runtime::Handle::try_current().is_ok() {
            return self.try_drain();
        }
        let mut receiver = self.receiver.blocking_lock();
        self.drain_locked(&mut receiver, None).unwrap_or_default()
    }

    /// Drain, then read `position` from the store.
    pub async fn get_async(&self, position: usize) -> CaptureResult<Option<T>> {
        self.drain_all().await?;
        self.store.get(position)
    }

    /// Drain, then return every committed entry in position order.
    pub async fn get_all_async(&self) -> CaptureResult<Vec<T>> {
        self.drain_all().await?;
        Ok(self.store.as_list(None))
    }

    /// Current phase of the queue.
    pub fn state(&self) -> QueueState {
        if self.draining.load(Ordering::Acquire) {
            QueueState::Draining
        } else if self.pending.load(Ordering::Acquire) > 0 {
            QueueState::Accepting
        } else {
            QueueState::Idle
        }
    }

    /// Number of queued items (single values or batches) not yet drained.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    async fn drain_all(&self) -> CaptureResult<usize> {
        let mut receiver = self.receiver.lock().await;
        self.drain_locked(&mut receiver, None)
    }

    /// Wait for room in the channel. A full channel is drained by the
    /// producer itself, so progress never depends on a separate consumer.
    async fn acquire(&self, cancel: &CancellationToken) -> CaptureResult<OwnedPermit<Pocket<T>>> {
        loop {
            if cancel.is_cancelled() {
                return Err(CaptureError::Cancelled);
            }
            match self.sender.clone().try_reserve_owned() {
                Ok(permit) => return Ok(permit),
                Err(TrySendError::Closed(_)) => return Err(CaptureError::QueueClosed),
                Err(TrySendError::Full(_)) => {
                    debug!(type_name = type_name::<T>(), "ingest queue full, draining inline");
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(CaptureError::Cancelled),
                        drained = self.drain_all() => { drained?; }
                    }
                    tokio::task::yield_now().await;
                }
            }
        }
    }

    fn push(&self, permit: OwnedPermit<Pocket<T>>, reservation: Reservation, values: Vec<T>) {
        self.pending.fetch_add(1, Ordering::AcqRel);
        permit.send(Pocket {
            reservation,
            values,
        });
    }

    fn drain_locked(
        &self,
        receiver: &mut Receiver<Pocket<T>>,
        cancel: Option<&CancellationToken>,
    ) -> CaptureResult<usize> {
        self.draining.store(true, Ordering::Release);
        let result = self.pull(receiver, cancel);
        self.draining.store(false, Ordering::Release);
        result
    }

    fn pull(
        &self,
        receiver: &mut Receiver<Pocket<T>>,
        cancel: Option<&CancellationToken>,
    ) -> CaptureResult<usize> {
        let mut drained = 0;
        let mut failure = None;
        loop {
            if cancel.is_some_and(CancellationToken::is_cancelled) {
                debug!(
                    type_name = type_name::<T>(),
                    drained,
                    remaining = self.pending(),
                    "drain cancelled"
                );
                return Err(CaptureError::Cancelled);
            }
            let pocket = match receiver.try_recv() {
                Ok(pocket) => pocket,
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
            };
            self.pending.fetch_sub(1, Ordering::AcqRel);

            let count = pocket.values.len();
            match self.store.commit_reserved(pocket.reservation, pocket.values) {
                Ok(true) => drained += count,
                Ok(false) => {}
                Err(e) => {
                    warn!(
                        type_name = type_name::<T>(),
                        start = pocket.reservation.start,
                        count,
                        error = %e,
                        "dropping queued captures"
                    );
                    failure.get_or_insert(e);
                }
            }
        }
        if drained > 0 {
            debug!(type_name = type_name::<T>(), drained, "ingest queue drained");
        }
        match failure {
            Some(e) => Err(e),
            None => Ok(drained),
        }
    }
}

impl<T> std::fmt::Debug for IngestQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestQueue")
            .field("type_name", &type_name::<T>())
            .field("pending", &self.pending.load(Ordering::Acquire))
            .field("draining", &self.draining.load(Ordering::Acquire))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::copy::Copier;

    #[derive(Clone, Debug, PartialEq)]
    struct Reading {
        id: u32,
        samples: Vec<f64>,
    }

    fn reading(id: u32) -> Reading {
        Reading {
            id,
            samples: vec![f64::from(id); 3],
        }
    }

    fn queue(capacity: usize, bound: usize) -> IngestQueue<Reading> {
        IngestQueue::new(Arc::new(CaptureStore::with_capacity(capacity)), bound)
    }

    fn ids(values: &[Reading]) -> Vec<u32> {
        values.iter().map(|r| r.id).collect()
    }

    #[tokio::test]
    async fn enqueue_is_invisible_until_drained() {
        let q = queue(4, 16);
        let token = CancellationToken::new();

        let position = q.enqueue(&reading(1), &token).await.unwrap();
        assert_eq!(position, 0);
        assert_eq!(q.state(), QueueState::Accepting);
        assert_eq!(q.store().get(0).unwrap(), None);

        assert_eq!(q.drain(&token).await.unwrap(), 1);
        assert_eq!(q.state(), QueueState::Idle);
        assert_eq!(q.store().get(0).unwrap(), Some(reading(1)));
    }

    #[tokio::test]
    async fn batch_converges_with_sync_order() {
        let q = queue(2, 16);
        let token = CancellationToken::new();
        let batch = vec![reading(1), reading(2), reading(3)];

        let positions = q.enqueue_batch(&batch, &token).await.unwrap();
        assert_eq!(positions, 0..3);

        let all = q.get_all_async().await.unwrap();
        assert_eq!(all, batch);
        assert_eq!(q.store().capacity(), 4);
    }

    #[tokio::test]
    async fn async_and_sync_posts_share_positions() {
        let q = queue(4, 16);
        let token = CancellationToken::new();

        assert_eq!(q.enqueue(&reading(1), &token).await.unwrap(), 0);
        assert_eq!(q.store().post(&reading(2)).unwrap(), 1);
        assert_eq!(q.enqueue(&reading(3), &token).await.unwrap(), 2);

        let all = q.get_all_async().await.unwrap();
        assert_eq!(ids(&all), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn failing_batch_reserves_nothing() {
        let copier: Copier<Reading> = Arc::new(|r: &Reading| -> CaptureResult<Reading> {
            if r.id == 2 {
                Err(CaptureError::NullInput {
                    type_name: "Reading",
                })
            } else {
                Ok(r.clone())
            }
        });
        let q = IngestQueue::new(Arc::new(CaptureStore::with_copier(4, copier)), 16);
        let token = CancellationToken::new();

        let err = q
            .enqueue_batch(&[reading(1), reading(2), reading(3)], &token)
            .await
            .unwrap_err();
        assert!(matches!(err, CaptureError::NullInput { .. }));
        assert_eq!(q.pending(), 0);
        assert_eq!(q.store().cursor(), 0);
        assert!(q.get_all_async().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_batch_is_a_no_op() {
        let q = queue(4, 16);
        let token = CancellationToken::new();
        let positions = q.enqueue_batch(&[], &token).await.unwrap();
        assert!(positions.is_empty());
        assert_eq!(q.state(), QueueState::Idle);
    }

    #[tokio::test]
    async fn drain_on_empty_queue_is_idempotent() {
        let q = queue(4, 16);
        let token = CancellationToken::new();
        assert_eq!(q.drain(&token).await.unwrap(), 0);
        assert_eq!(q.drain(&token).await.unwrap(), 0);
        assert_eq!(q.try_drain(), 0);
    }

    #[tokio::test]
    async fn cancelled_enqueue_reserves_nothing() {
        let q = queue(4, 16);
        let token = CancellationToken::new();
        token.cancel();

        let err = q.enqueue(&reading(1), &token).await.unwrap_err();
        assert!(matches!(err, CaptureError::Cancelled));
        assert_eq!(q.store().cursor(), 0);
        assert_eq!(q.pending(), 0);
    }

    #[tokio::test]
    async fn cancelled_drain_leaves_items_queued() {
        let q = queue(8, 16);
        let live = CancellationToken::new();
        q.enqueue(&reading(1), &live).await.unwrap();
        q.enqueue(&reading(2), &live).await.unwrap();

        let cancelled = CancellationToken::new();
        cancelled.cancel();
        assert!(matches!(
            q.drain(&cancelled).await,
            Err(CaptureError::Cancelled)
        ));

        // Reserved but undelivered positions read as empty slots.
        assert_eq!(q.pending(), 2);
        assert_eq!(q.store().get(0).unwrap(), None);
        assert_eq!(q.store().get(1).unwrap(), None);
        assert!(matches!(
            q.store().get(2),
            Err(CaptureError::IndexOutOfRange { .. })
        ));

        assert_eq!(q.get_async(1).await.unwrap(), Some(reading(2)));
        assert_eq!(q.state(), QueueState::Idle);
    }

    #[tokio::test]
    async fn undelivered_position_past_capacity_is_out_of_range() {
        let q = queue(1, 16);
        let token = CancellationToken::new();
        q.enqueue(&reading(1), &token).await.unwrap();
        q.enqueue(&reading(2), &token).await.unwrap();

        // Position 1 is reserved but the array has not grown to hold it yet.
        assert!(matches!(
            q.store().get(1),
            Err(CaptureError::IndexOutOfRange { .. })
        ));
        assert_eq!(q.get_async(1).await.unwrap(), Some(reading(2)));
    }

    #[tokio::test]
    async fn reset_discards_queued_items() {
        let q = queue(4, 16);
        let token = CancellationToken::new();
        q.enqueue(&reading(1), &token).await.unwrap();

        q.store().reset(None);
        assert_eq!(q.drain(&token).await.unwrap(), 0);
        assert_eq!(q.store().get(0).unwrap(), None);
        assert_eq!(q.store().committed(), 0);
    }

    #[tokio::test]
    async fn full_channel_drains_inline() {
        let q = queue(1, 2);
        let token = CancellationToken::new();
        for id in 0..10 {
            assert_eq!(q.enqueue(&reading(id), &token).await.unwrap(), id as usize);
        }
        assert!(q.pending() <= 2);

        let all = q.get_all_async().await.unwrap();
        assert_eq!(ids(&all), (0..10).collect::<Vec<_>>());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_producers_keep_their_positions() {
        let q = Arc::new(queue(2, 8));
        let mut tasks = Vec::new();
        for t in 0..8u32 {
            let q = Arc::clone(&q);
            tasks.push(tokio::spawn(async move {
                let token = CancellationToken::new();
                let mut placed = Vec::new();
                for i in 0..25u32 {
                    let value = reading(t * 100 + i);
                    let position = q.enqueue(&value, &token).await.unwrap();
                    placed.push((position, value));
                }
                placed
            }));
        }

        let mut placed = Vec::new();
        for task in tasks {
            placed.extend(task.await.unwrap());
        }

        assert_eq!(q.get_all_async().await.unwrap().len(), 200);
        for (position, value) in placed {
            assert_eq!(q.store().get(position).unwrap(), Some(value));
        }
    }

    #[tokio::test]
    async fn explicit_post_cannot_take_a_queued_position() {
        let q = queue(4, 16);
        let token = CancellationToken::new();
        assert_eq!(q.enqueue(&reading(1), &token).await.unwrap(), 0);

        assert!(matches!(
            q.store().post_at(&reading(99), 0),
            Err(CaptureError::PositionOccupied { position: 0 })
        ));

        let all = q.get_all_async().await.unwrap();
        assert_eq!(all, vec![reading(1)]);
    }

    #[tokio::test]
    async fn failed_commit_reaches_the_drain_caller() {
        let q = queue(4, 16);
        let token = CancellationToken::new();
        q.enqueue(&reading(1), &token).await.unwrap();
        q.enqueue(&reading(2), &token).await.unwrap();

        // Fill position 0 behind the queue's back.
        let taken = Reservation {
            start: 0,
            epoch: q.store().epoch(),
        };
        assert!(q.store().commit_reserved(taken, vec![reading(9)]).unwrap());

        assert!(matches!(
            q.drain(&token).await,
            Err(CaptureError::PositionOccupied { position: 0 })
        ));
        // The item after the failed one is still committed.
        assert_eq!(q.store().get(1).unwrap(), Some(reading(2)));
        assert_eq!(q.state(), QueueState::Idle);
    }

    #[tokio::test]
    async fn enqueue_at_lands_at_the_requested_position() {
        let q = queue(2, 16);
        let token = CancellationToken::new();

        q.enqueue_at(&reading(5), 5, &token).await.unwrap();
        assert_eq!(q.store().cursor(), 6);
        assert_eq!(q.enqueue(&reading(6), &token).await.unwrap(), 6);

        assert_eq!(q.get_async(5).await.unwrap(), Some(reading(5)));
        assert_eq!(q.store().get(6).unwrap(), Some(reading(6)));
        assert_eq!(q.store().get(0).unwrap(), None);
    }

    #[tokio::test]
    async fn enqueue_at_claimed_position_fails_up_front() {
        let q = queue(4, 16);
        let token = CancellationToken::new();
        q.enqueue(&reading(1), &token).await.unwrap();

        let err = q.enqueue_at(&reading(2), 0, &token).await.unwrap_err();
        assert!(matches!(err, CaptureError::PositionOccupied { position: 0 }));
        assert_eq!(q.pending(), 1);
        assert_eq!(q.get_all_async().await.unwrap(), vec![reading(1)]);
    }

    #[test]
    fn drain_blocking_waits_for_a_running_drain() {
        use std::thread;
        use std::time::Duration;

        let q = Arc::new(queue(4, 16));
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        runtime
            .block_on(q.enqueue(&reading(1), &CancellationToken::new()))
            .unwrap();

        // Hold the receiver as an in-flight drain would.
        let held = q.receiver.try_lock().unwrap();
        let reader = {
            let q = Arc::clone(&q);
            thread::spawn(move || {
                let drained = q.drain_blocking();
                (drained, q.store().get(0).unwrap())
            })
        };
        thread::sleep(Duration::from_millis(20));
        drop(held);

        assert_eq!(reader.join().unwrap(), (1, Some(reading(1))));
    }

    #[tokio::test]
    async fn debug_format() {
        let q = queue(1, 1);
        let debug = format!("{q:?}");
        assert!(debug.contains("IngestQueue"));
        assert!(debug.contains("pending"));
    }
}
