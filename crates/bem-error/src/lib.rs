#![forbid(unsafe_code)]
//! Error types for the boot-environment dataset model.
//!
//! # Error Taxonomy
//!
//! Two layers, as in the rest of the workspace:
//!
//! | Layer | Type | Crate | Purpose |
//! |-------|------|-------|---------|
//! | Decoding | `ParseError` | `bem-types` | A stored property value has the wrong shape |
//! | Backend | `BackendError` | `bem-backend` | The filesystem binding refused or failed a call |
//! | Model | `BemError` | `bem-error` (this crate) | Single error surfaced to callers of the model |
//!
//! `bem-error` does not depend on `bem-types` or `bem-backend`; the lower
//! layers are converted in `bem-core`, which knows which dataset and
//! property an error belongs to.
//!
//! ## Integrity violations
//!
//! `SnapshotHierarchy` and `ClonesExist` are precondition gates used before
//! destructive operations. They describe the state of the pool, not a defect
//! in the model. `InternalConsistency` is the opposite: the model's own
//! bookkeeping diverged and the current operation must be abandoned.
//!
//! ## errno Mapping
//!
//! | Variant | errno |
//! |---------|-------|
//! | `Scan` | `EIO` |
//! | `PropertyRead` | `EIO` |
//! | `PropertyWrite` | `EIO` |
//! | `InvalidProperty` | `EINVAL` |
//! | `SnapshotHierarchy` | `EINVAL` |
//! | `ClonesExist` | `EBUSY` |
//! | `DatasetNotFound` | `ENOENT` |
//! | `InternalConsistency` | `EIO` |
//! | `Backend` | `EIO` |
//! | `Config` | `EINVAL` |

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BemError {
    /// Tree construction failed; no part of the scanned model is usable.
    #[error("couldn't scan dataset {dataset:?}: {detail}")]
    Scan { dataset: String, detail: String },

    /// Reading one property from the backend failed.
    #[error("can't get {property:?} property of {dataset:?}: {detail}")]
    PropertyRead {
        dataset: String,
        property: String,
        detail: String,
    },

    /// Writing one property to the backend failed.
    #[error("can't set {property:?} property on {dataset:?}: {detail}")]
    PropertyWrite {
        dataset: String,
        property: String,
        detail: String,
    },

    /// A stored or requested value does not have the expected format.
    #[error("{property:?} property of {dataset:?} is invalid: {detail}")]
    InvalidProperty {
        dataset: String,
        property: String,
        detail: String,
    },

    /// A descendant carries a snapshot name its parent lacks.
    #[error("parent of {snapshot:?} doesn't have a snapshot with the same name")]
    SnapshotHierarchy { snapshot: String },

    /// A dataset in a subtree that must be clone-free has clones.
    #[error("{dataset:?} has some clones when it shouldn't: {}", .clones.join(", "))]
    ClonesExist { dataset: String, clones: Vec<String> },

    #[error("dataset {0:?} not found")]
    DatasetNotFound(String),

    /// The model's own bookkeeping diverged. Always a defect.
    #[error("internal consistency violation: {0}")]
    InternalConsistency(String),

    /// A non-property backend call (clone listing, promote) failed.
    #[error("backend operation on {dataset:?} failed: {detail}")]
    Backend { dataset: String, detail: String },

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl BemError {
    /// Whether this is one of the pool-state precondition failures.
    #[must_use]
    pub fn is_integrity_violation(&self) -> bool {
        matches!(
            self,
            Self::SnapshotHierarchy { .. } | Self::ClonesExist { .. }
        )
    }

    /// Convert this error into a POSIX errno for the command surface.
    ///
    /// The match is exhaustive so a new variant cannot ship without one.
    #[must_use]
    pub fn to_errno(&self) -> libc::c_int {
        match self {
            Self::Scan { .. }
            | Self::PropertyRead { .. }
            | Self::PropertyWrite { .. }
            | Self::InternalConsistency(_)
            | Self::Backend { .. } => libc::EIO,
            Self::InvalidProperty { .. } | Self::SnapshotHierarchy { .. } | Self::Config(_) => {
                libc::EINVAL
            }
            Self::ClonesExist { .. } => libc::EBUSY,
            Self::DatasetNotFound(_) => libc::ENOENT,
        }
    }
}

/// Result alias using `BemError`.
pub type Result<T> = std::result::Result<T, BemError>;
