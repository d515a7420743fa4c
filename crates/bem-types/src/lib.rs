#![forbid(unsafe_code)]
//! Shared vocabulary for the boot-environment dataset model.
//!
//! Pure types with no I/O: dataset identifiers, property kinds, provenance,
//! and the small name helpers every other crate needs. Decoding failures are
//! reported as [`ParseError`]; `bem-core` converts them into the user-facing
//! `BemError` at its boundary.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Separator between a dataset name and its snapshot leaf (`pool/a@leaf`).
pub const SNAPSHOT_SEPARATOR: char = '@';

/// Separator between dataset path components (`pool/a/b`).
pub const PATH_SEPARATOR: char = '/';

/// Separator inside a frozen `value:provenance` pair.
pub const FROZEN_PAIR_SEPARATOR: char = ':';

/// Value (and source) the backend reports for a user property that was never set.
pub const UNSET_SENTINEL: &str = "-";

/// Alternate source string some backend bindings use for unset user properties.
pub const UNSET_SOURCE_NONE: &str = "none";

/// Default namespace for the custom properties owned by the model.
pub const DEFAULT_USER_NAMESPACE: &str = "com.ubuntu.zsys";

/// Index of a dataset node inside a `DatasetModel` arena.
///
/// Stable for the lifetime of the model: promotion renames and re-parents a
/// node but never changes its id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DatasetId(pub usize);

impl fmt::Display for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Where the current value of an inheritable property came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    /// Set explicitly on this dataset.
    Local,
    /// Never set anywhere in the ancestor chain.
    #[default]
    Default,
    /// Taken from an ancestor.
    Inherited,
}

impl Provenance {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Default => "default",
            Self::Inherited => "inherited",
        }
    }
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Object types the backend scan can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetKind {
    Filesystem,
    Snapshot,
    Volume,
    Bookmark,
}

impl DatasetKind {
    /// Volumes and bookmarks carry none of the semantics the model manages.
    #[must_use]
    pub fn is_eligible(self) -> bool {
        matches!(self, Self::Filesystem | Self::Snapshot)
    }

    /// Guess the kind from a fully-qualified name (`@` snapshot, `#` bookmark).
    #[must_use]
    pub fn infer_from_name(name: &str) -> Self {
        if name.contains(SNAPSHOT_SEPARATOR) {
            Self::Snapshot
        } else if name.contains('#') {
            Self::Bookmark
        } else {
            Self::Filesystem
        }
    }
}

/// Native (non-user) properties the model reads from a backend scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NativeProp {
    Name,
    Mountpoint,
    CanMount,
    Mounted,
    Origin,
    Creation,
}

impl NativeProp {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::Mountpoint => "mountpoint",
            Self::CanMount => "canmount",
            Self::Mounted => "mounted",
            Self::Origin => "origin",
            Self::Creation => "creation",
        }
    }
}

/// The closed set of inheritable properties the model tracks provenance for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PropertyKind {
    CanMount,
    Mountpoint,
    BootFs,
    LastUsed,
    BootfsDatasets,
    LastBootedKernel,
}

impl PropertyKind {
    pub const ALL: [Self; 6] = [
        Self::CanMount,
        Self::Mountpoint,
        Self::BootFs,
        Self::LastUsed,
        Self::BootfsDatasets,
        Self::LastBootedKernel,
    ];

    /// Logical property name, also the suffix of its user-property name.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::CanMount => "canmount",
            Self::Mountpoint => "mountpoint",
            Self::BootFs => "bootfs",
            Self::LastUsed => "last-used",
            Self::BootfsDatasets => "bootfs-datasets",
            Self::LastBootedKernel => "last-booted-kernel",
        }
    }

    /// Native counterpart on filesystems, if any.
    ///
    /// Snapshots never use it: their mount properties live in frozen user
    /// properties instead.
    #[must_use]
    pub fn native(self) -> Option<NativeProp> {
        match self {
            Self::CanMount => Some(NativeProp::CanMount),
            Self::Mountpoint => Some(NativeProp::Mountpoint),
            Self::BootFs | Self::LastUsed | Self::BootfsDatasets | Self::LastBootedKernel => None,
        }
    }

    #[must_use]
    pub fn is_native(self) -> bool {
        self.native().is_some()
    }
}

impl fmt::Display for PropertyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PropertyKind {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| ParseError::UnknownProperty(s.to_owned()))
    }
}

/// Values of the native `canmount` property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CanMount {
    On,
    Off,
    NoAuto,
}

impl CanMount {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::On => "on",
            Self::Off => "off",
            Self::NoAuto => "noauto",
        }
    }
}

impl fmt::Display for CanMount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CanMount {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "on" => Ok(Self::On),
            "off" => Ok(Self::Off),
            "noauto" => Ok(Self::NoAuto),
            _ => Err(ParseError::InvalidValue {
                property: "canmount",
                value: s.to_owned(),
                reason: "expected on, off or noauto",
            }),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("invalid value {value:?} for {property}: {reason}")]
    InvalidValue {
        property: &'static str,
        value: String,
        reason: &'static str,
    },
    #[error("unknown property {0:?}")]
    UnknownProperty(String),
    #[error("{0:?} is not a 'value:provenance' pair")]
    MissingSeparator(String),
}

/// Split `pool/a@leaf` into `("pool/a", Some("leaf"))`.
///
/// Splits on the last `@`; a plain dataset name yields `(name, None)`.
#[must_use]
pub fn split_snapshot_name(name: &str) -> (&str, Option<&str>) {
    match name.rfind(SNAPSHOT_SEPARATOR) {
        Some(idx) => (&name[..idx], Some(&name[idx + 1..])),
        None => (name, None),
    }
}

/// Build the full snapshot name `<dataset>@<leaf>`.
#[must_use]
pub fn snapshot_name(dataset: &str, leaf: &str) -> String {
    format!("{dataset}{SNAPSHOT_SEPARATOR}{leaf}")
}

/// Pool component of a dataset or snapshot name.
#[must_use]
pub fn pool_name(name: &str) -> &str {
    let (base, _) = split_snapshot_name(name);
    base.split(PATH_SEPARATOR).next().unwrap_or(base)
}
