use std::sync::Arc;

/// Point-in-time, copy-out view over a store's backing array.
///
/// Taken under a short read lock; later commits, growth, or resets of the
/// store never change a view that already exists. Iteration is restartable
/// and yields one item per slot, in position order.
pub struct CaptureView<T> {
    slots: Arc<[Option<Arc<T>>]>,
}

impl<T> CaptureView<T> {
    pub(crate) fn new(slots: Vec<Option<Arc<T>>>) -> Self {
        Self {
            slots: slots.into(),
        }
    }

    /// Number of slots (the store's capacity when the view was taken).
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns `true` if the view has no slots at all.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Entry at `position`, if that slot held a capture.
    pub fn get(&self, position: usize) -> Option<&T> {
        self.slots.get(position)?.as_deref()
    }

    /// Every slot in position order; `None` marks an unfilled slot.
    pub fn iter(&self) -> impl Iterator<Item = Option<&T>> + '_ {
        self.slots.iter().map(|slot| slot.as_deref())
    }

    /// Filled slots only, paired with their positions.
    pub fn entries(&self) -> impl Iterator<Item = (usize, &T)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(position, slot)| slot.as_deref().map(|value| (position, value)))
    }

    /// Number of filled slots.
    pub fn filled(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }
}

impl<T: Clone> CaptureView<T> {
    /// Owned copies of the filled slots, in position order.
    pub fn to_vec(&self) -> Vec<T> {
        self.entries().map(|(_, value)| value.clone()).collect()
    }
}

impl<T> Clone for CaptureView<T> {
    fn clone(&self) -> Self {
        Self {
            slots: Arc::clone(&self.slots),
        }
    }
}

impl<'a, T> IntoIterator for &'a CaptureView<T> {
    type Item = Option<&'a T>;
    type IntoIter = std::iter::Map<
        std::slice::Iter<'a, Option<Arc<T>>>,
        fn(&'a Option<Arc<T>>) -> Option<&'a T>,
    >;

    fn into_iter(self) -> Self::IntoIter {
        self.slots
            .iter()
            .map(slot_ref::<T> as fn(&'a Option<Arc<T>>) -> Option<&'a T>)
    }
}

fn slot_ref<T>(slot: &Option<Arc<T>>) -> Option<&T> {
    slot.as_deref()
}

impl<T> std::fmt::Debug for CaptureView<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureView")
            .field("len", &self.len())
            .field("filled", &self.filled())
            .finish()
    }
}
