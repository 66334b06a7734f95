use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use snapit_store::CaptureStore;

use crate::error::{SdkError, SdkResult};
use crate::registry::Capturable;

/// Initial slot count of a [`Snap`] history.
const SNAP_CAPACITY: usize = 5;

/// Read result wrapping a capture that may be absent.
#[derive(Clone, Debug, PartialEq)]
pub struct SnapValue<T> {
    value: Option<T>,
}

impl<T> SnapValue<T> {
    pub fn new(value: Option<T>) -> Self {
        Self { value }
    }

    pub fn value(&self) -> Option<&T> {
        self.value.as_ref()
    }

    pub fn into_inner(self) -> Option<T> {
        self.value
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_none()
    }
}

impl<T: Serialize> SnapValue<T> {
    /// A named field of the captured value.
    ///
    /// Fails with [`SdkError::PropertyNotFound`] if the value is empty, is
    /// not a record, or has no field called `name`.
    pub fn property(&self, name: &str) -> SdkResult<Value> {
        let value = self
            .value
            .as_ref()
            .ok_or_else(|| SdkError::PropertyNotFound(name.to_string()))?;
        let fields = serde_json::to_value(value).map_err(|e| SdkError::PropertyType {
            name: name.to_string(),
            reason: e.to_string(),
        })?;
        match fields {
            Value::Object(mut map) => map
                .remove(name)
                .ok_or_else(|| SdkError::PropertyNotFound(name.to_string())),
            _ => Err(SdkError::PropertyNotFound(name.to_string())),
        }
    }

    /// A named field decoded as `V`.
    pub fn property_as<V: DeserializeOwned>(&self, name: &str) -> SdkResult<V> {
        serde_json::from_value(self.property(name)?).map_err(|e| SdkError::PropertyType {
            name: name.to_string(),
            reason: e.to_string(),
        })
    }
}

/// Small capture history for one value, independent of the global registry.
///
/// `pick` records an isolated copy; `latest` and `at` read them back.
pub struct Snap<T> {
    captures: CaptureStore<T>,
}

impl<T: Capturable> Snap<T> {
    pub fn new() -> Self {
        Self {
            captures: CaptureStore::with_capacity(SNAP_CAPACITY),
        }
    }

    /// A history whose first capture is `value`.
    pub fn starting_with(value: &T) -> SdkResult<Self> {
        let snap = Self::new();
        snap.pick(value)?;
        Ok(snap)
    }

    /// Record a copy of `value`. Returns its index in the history.
    pub fn pick(&self, value: &T) -> SdkResult<usize> {
        Ok(self.captures.post(value)?)
    }

    /// The most recent capture; empty if nothing was picked.
    pub fn latest(&self) -> SnapValue<T> {
        let latest = self
            .captures
            .cursor()
            .checked_sub(1)
            .and_then(|index| self.captures.get(index).ok().flatten());
        SnapValue::new(latest)
    }

    /// The capture at `index`.
    pub fn at(&self, index: usize) -> SdkResult<SnapValue<T>> {
        Ok(SnapValue::new(self.captures.get(index)?))
    }

    /// Every capture, oldest first.
    pub fn history(&self) -> Vec<T> {
        self.captures.as_list(None)
    }

    pub fn len(&self) -> usize {
        self.captures.committed()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget the history.
    pub fn clear(&self) {
        self.captures.create(SNAP_CAPACITY);
    }
}

impl<T: Capturable> Default for Snap<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for Snap<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Snap")
            .field("captures", &self.captures)
            .finish()
    }
}
