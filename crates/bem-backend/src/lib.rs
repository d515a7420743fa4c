#![forbid(unsafe_code)]
//! Filesystem backend abstraction.
//!
//! The model never talks to the pool directly: every scan, property read or
//! write, clone listing and promotion goes through the [`Backend`] trait.
//! [`MemBackend`] is an in-memory implementation with the inheritance,
//! clone and promote behaviour of the real filesystem, used by tests and by
//! the fixture harness.

pub mod mem;

pub use mem::{Fault, MemBackend, MemDatasetSpec, MemFixture, MemPoolSpec};

use bem_types::{DatasetKind, NativeProp, UNSET_SENTINEL, UNSET_SOURCE_NONE};
use std::collections::BTreeMap;
use thiserror::Error;

/// Opaque reference to one object on the backend.
///
/// Move-only: exactly one `Dataset` node owns the handle for the object it
/// mirrors, and dropping the node releases it.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct DatasetHandle {
    id: u64,
}

impl DatasetHandle {
    /// Wrap a backend-specific object identifier.
    #[must_use]
    pub fn new(id: u64) -> Self {
        Self { id }
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }
}

/// A property value together with the backend's own source tag.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawProperty {
    pub value: String,
    pub source: String,
}

impl RawProperty {
    pub fn new(value: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            source: source.into(),
        }
    }

    /// The backend reports `-` for unset user properties, with either `-`
    /// or `none` as source depending on the binding.
    #[must_use]
    pub fn is_unset(&self) -> bool {
        self.value == UNSET_SENTINEL
            && (self.source == UNSET_SENTINEL || self.source == UNSET_SOURCE_NONE)
    }
}

/// Native property record returned by a scan.
pub type NativeProperties = BTreeMap<NativeProp, RawProperty>;

/// One object from a recursive scan, with its children.
#[derive(Debug)]
pub struct ScannedDataset {
    pub handle: DatasetHandle,
    pub kind: DatasetKind,
    pub properties: NativeProperties,
    pub children: Vec<ScannedDataset>,
}

impl ScannedDataset {
    /// Value of the native `name` property, empty if the backend omitted it.
    #[must_use]
    pub fn name(&self) -> &str {
        self.native_value(NativeProp::Name)
    }

    #[must_use]
    pub fn native_value(&self, prop: NativeProp) -> &str {
        self.properties.get(&prop).map_or("", |p| p.value.as_str())
    }
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("unknown dataset handle {0}")]
    UnknownHandle(u64),
    #[error("dataset {0:?} does not exist")]
    NotFound(String),
    #[error("{dataset:?}: {reason}")]
    Rejected { dataset: String, reason: String },
    #[error("injected failure: {0}")]
    Injected(String),
}

/// Operations the model needs from the native filesystem binding.
///
/// All calls are synchronous; failures surface as ordinary errors and are
/// never retried by the model.
pub trait Backend: Send + Sync {
    /// Recursively scan every pool. Each returned tree is rooted at a pool's
    /// top-level dataset.
    fn scan(&self) -> Result<Vec<ScannedDataset>, BackendError>;

    /// Alternate-root prefix of the pool holding `handle` (empty if none).
    fn pool_altroot(&self, handle: &DatasetHandle) -> Result<String, BackendError>;

    /// Read a user property. Unset properties are returned with
    /// [`RawProperty::is_unset`] true, not as an error.
    fn user_property(&self, handle: &DatasetHandle, name: &str)
    -> Result<RawProperty, BackendError>;

    fn set_native_property(
        &self,
        handle: &DatasetHandle,
        prop: NativeProp,
        value: &str,
    ) -> Result<(), BackendError>;

    fn set_user_property(
        &self,
        handle: &DatasetHandle,
        name: &str,
        value: &str,
    ) -> Result<(), BackendError>;

    /// Names of the datasets cloned from `handle` (only snapshots have any).
    fn clones(&self, handle: &DatasetHandle) -> Result<Vec<String>, BackendError>;

    /// Promote the clone behind `handle` over the dataset it was cloned from.
    fn promote(&self, handle: &DatasetHandle) -> Result<(), BackendError>;
}
