//! Copy engine: produces captures that share no mutable state with the
//! value they were taken from.
//!
//! Two strategies are available. The default goes through `Clone`, which for
//! `#[derive(Clone)]` records is a compile-time, field-by-field deep copy.
//! [`CopyEngine::copy_fields`] projects one record onto another by field
//! name through the serde data model, for callers that capture into a
//! different (or default-filled) shape.

use std::any::type_name;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{CaptureError, CaptureResult};

/// Isolation function a store applies to every value before committing it.
pub type Copier<T> = Arc<dyn Fn(&T) -> CaptureResult<T> + Send + Sync>;

/// Stateless entry point for value isolation.
#[derive(Clone, Copy, Debug, Default)]
pub struct CopyEngine;

impl CopyEngine {
    /// Isolate a possibly-absent value.
    ///
    /// Returns [`CaptureError::NullInput`] for `None`.
    pub fn isolate<T: Clone>(value: Option<&T>) -> CaptureResult<T> {
        value.cloned().ok_or(CaptureError::NullInput {
            type_name: type_name::<T>(),
        })
    }

    /// Copy every field of `source` that `D` also declares onto a
    /// default-initialized `D`, matched by name.
    ///
    /// Fields present on the source but unknown to `D` are dropped; fields of
    /// `D` the source lacks keep their default. Scalar sources pass through
    /// unchanged when `D` is scalar too.
    pub fn copy_fields<S, D>(source: &S) -> CaptureResult<D>
    where
        S: Serialize,
        D: Serialize + DeserializeOwned + Default,
    {
        let source_value =
            serde_json::to_value(source).map_err(|e| CaptureError::Serialization(e.to_string()))?;
        let template = serde_json::to_value(D::default()).map_err(|e| uninstantiable::<D>(e))?;

        let merged = match (source_value, template) {
            (Value::Null, _) => {
                return Err(CaptureError::NullInput {
                    type_name: type_name::<S>(),
                })
            }
            (Value::Object(fields), Value::Object(mut target)) => {
                overlay(&mut target, fields);
                Value::Object(target)
            }
            (Value::Object(_), _) => {
                return Err(uninstantiable::<D>("default form is not a record"));
            }
            (_, Value::Object(_)) => {
                return Err(uninstantiable::<D>("source value is not a record"));
            }
            (scalar, _) => scalar,
        };

        serde_json::from_value(merged).map_err(|e| uninstantiable::<D>(e))
    }

    /// Copier that isolates through `Clone`.
    pub fn cloning<T>() -> Copier<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        Arc::new(|value: &T| Ok(value.clone()))
    }

    /// Copier that isolates through [`CopyEngine::copy_fields`] onto the
    /// same type.
    pub fn by_fields<T>() -> Copier<T>
    where
        T: Serialize + DeserializeOwned + Default + Send + Sync + 'static,
    {
        Arc::new(|value: &T| Self::copy_fields::<T, T>(value))
    }
}

fn overlay(target: &mut Map<String, Value>, fields: Map<String, Value>) {
    for (name, value) in fields {
        if let Some(slot) = target.get_mut(&name) {
            *slot = value;
        }
    }
}

fn uninstantiable<D>(reason: impl ToString) -> CaptureError {
    CaptureError::UninstantiableType {
        type_name: type_name::<D>(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Product {
        id: u32,
        name: String,
        tags: Vec<String>,
        price_cents: u64,
    }

    #[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Listing {
        id: u32,
        name: String,
        featured: bool,
    }

    fn laptop() -> Product {
        Product {
            id: 1,
            name: "laptop".into(),
            tags: vec!["electronics".into()],
            price_cents: 129_999,
        }
    }

    #[test]
    fn isolate_absent_value_fails() {
        let err = CopyEngine::isolate::<Product>(None).unwrap_err();
        assert!(matches!(err, CaptureError::NullInput { .. }));
    }

    #[test]
    fn isolated_copy_is_independent() {
        let mut original = laptop();
        let copy = CopyEngine::isolate(Some(&original)).unwrap();

        original.tags.push("sale".into());
        original.name.push_str(" pro");

        assert_eq!(copy, laptop());
    }

    #[test]
    fn scalars_pass_through() {
        assert_eq!(CopyEngine::isolate(Some(&42u64)).unwrap(), 42);
        assert_eq!(CopyEngine::copy_fields::<u64, u64>(&7).unwrap(), 7);
    }

    #[test]
    fn copy_fields_matches_by_name() {
        let listing: Listing = CopyEngine::copy_fields(&laptop()).unwrap();
        assert_eq!(
            listing,
            Listing {
                id: 1,
                name: "laptop".into(),
                featured: false,
            }
        );
    }

    #[test]
    fn copy_fields_absent_source_fails() {
        let err = CopyEngine::copy_fields::<Option<Product>, Product>(&None).unwrap_err();
        assert!(matches!(err, CaptureError::NullInput { .. }));
    }

    #[test]
    fn copy_fields_into_non_record_fails() {
        let err = CopyEngine::copy_fields::<Product, Vec<u8>>(&laptop()).unwrap_err();
        assert!(matches!(err, CaptureError::UninstantiableType { .. }));
    }

    #[test]
    fn copy_fields_from_scalar_into_record_fails() {
        let err = CopyEngine::copy_fields::<u32, Product>(&3).unwrap_err();
        assert!(matches!(err, CaptureError::UninstantiableType { .. }));
    }

    #[test]
    fn copiers_agree_on_round_trip() {
        let cloned = (CopyEngine::cloning::<Product>())(&laptop()).unwrap();
        let fielded = (CopyEngine::by_fields::<Product>())(&laptop()).unwrap();
        assert_eq!(cloned, fielded);
    }
}
