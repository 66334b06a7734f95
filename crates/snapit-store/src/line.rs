use std::any::type_name;
use std::sync::{Arc, Mutex, MutexGuard};

use futures::stream::{self, Stream};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::debug;

use crate::error::{CaptureError, CaptureResult};

type SharedReceiver<T> = Arc<tokio::sync::Mutex<UnboundedReceiver<T>>>;

struct Channel<T> {
    sender: Option<UnboundedSender<T>>,
    receiver: SharedReceiver<T>,
}

impl<T> Channel<T> {
    fn open() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender: Some(sender),
            receiver: Arc::new(tokio::sync::Mutex::new(receiver)),
        }
    }
}

/// Unbounded, closable stream of values for one type, separate from the
/// positioned store.
///
/// Values pushed to the line are read back once, in push order, by whoever
/// is streaming it. Closing the line lets readers finish what was already
/// pushed and then end; [`BufferLine::recreate`] starts a fresh line.
pub struct BufferLine<T> {
    channel: Mutex<Channel<T>>,
}

impl<T: Send + 'static> BufferLine<T> {
    pub fn new() -> Self {
        Self {
            channel: Mutex::new(Channel::open()),
        }
    }

    /// Append `value`. Fails with [`CaptureError::LineClosed`] once the line
    /// has been closed.
    pub fn push(&self, value: T) -> CaptureResult<()> {
        let channel = self.lock();
        let sender = channel.sender.as_ref().ok_or(CaptureError::LineClosed)?;
        sender.send(value).map_err(|_| CaptureError::LineClosed)
    }

    /// Stream of the line's values. Ends after the line is closed (or
    /// recreated) and everything pushed before that has been read.
    pub fn stream(&self) -> impl Stream<Item = T> + Send + 'static {
        let receiver = Arc::clone(&self.lock().receiver);
        stream::unfold(receiver, |receiver| async move {
            let next = receiver.lock().await.recv().await;
            next.map(|value| (value, receiver))
        })
    }

    /// Stop accepting values. Returns `false` if it was already closed.
    pub fn close(&self) -> bool {
        let closed = self.lock().sender.take().is_some();
        if closed {
            debug!(type_name = type_name::<T>(), "buffer line closed");
        }
        closed
    }

    /// Replace the line with a fresh, open one. Readers of the old line see
    /// its remaining values and then end.
    pub fn recreate(&self) {
        *self.lock() = Channel::open();
        debug!(type_name = type_name::<T>(), "buffer line recreated");
    }

    pub fn is_closed(&self) -> bool {
        self.lock().sender.is_none()
    }

    fn lock(&self) -> MutexGuard<'_, Channel<T>> {
        self.channel.lock().expect("line lock poisoned")
    }
}

impl<T: Send + 'static> Default for BufferLine<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for BufferLine<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let closed = self
            .channel
            .lock()
            .map(|c| c.sender.is_none())
            .unwrap_or_default();
        f.debug_struct("BufferLine")
            .field("type_name", &type_name::<T>())
            .field("closed", &closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn closed_line_streams_what_was_pushed() {
        let line = BufferLine::new();
        for n in 1..=3u32 {
            line.push(n).unwrap();
        }
        assert!(line.close());

        let seen: Vec<u32> = line.stream().collect().await;
        assert_eq!(seen, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn push_after_close_fails() {
        let line = BufferLine::new();
        line.close();
        assert!(line.is_closed());
        assert!(matches!(line.push(1u8), Err(CaptureError::LineClosed)));
        assert!(!line.close());
    }

    #[tokio::test]
    async fn reader_waits_for_values_pushed_later() {
        let line = Arc::new(BufferLine::new());
        let reader = {
            let line = Arc::clone(&line);
            tokio::spawn(async move { line.stream().collect::<Vec<String>>().await })
        };

        line.push("a".to_string()).unwrap();
        tokio::task::yield_now().await;
        line.push("b".to_string()).unwrap();
        line.close();

        assert_eq!(reader.await.unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn recreate_opens_a_fresh_line() {
        let line = BufferLine::new();
        line.push(1u32).unwrap();
        let old = line.stream();

        line.recreate();
        assert!(!line.is_closed());
        line.push(2).unwrap();
        line.close();

        assert_eq!(old.collect::<Vec<_>>().await, vec![1]);
        assert_eq!(line.stream().collect::<Vec<_>>().await, vec![2]);
    }
}
