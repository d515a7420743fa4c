//! Dataset nodes and their normalized property record.

use crate::codec::PropertyValue;
use bem_backend::{DatasetHandle, NativeProperties, RawProperty};
use bem_types::{CanMount, DatasetId, NativeProp, PropertyKind, Provenance};
use serde::Serialize;

// ── Properties ──────────────────────────────────────────────────────────────

/// Normalized view of the properties the model manages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DatasetProperties {
    /// Altroot stripped. On snapshots, the value frozen at creation time.
    pub mountpoint: String,
    /// `None` when a snapshot carries no frozen value.
    pub can_mount: Option<CanMount>,
    /// Always false for snapshots.
    pub mounted: bool,
    pub boot_fs: bool,
    /// Seconds since epoch. Snapshot creation time on snapshots.
    pub last_used: i64,
    pub last_booted_kernel: String,
    pub bootfs_datasets: String,
    /// Snapshot this filesystem was cloned from, empty if none.
    pub origin: String,
}

impl DatasetProperties {
    /// Typed value of one inheritable property.
    #[must_use]
    pub fn value(&self, kind: PropertyKind) -> PropertyValue {
        match kind {
            PropertyKind::CanMount => PropertyValue::CanMount(self.can_mount),
            PropertyKind::Mountpoint => PropertyValue::Mountpoint(self.mountpoint.clone()),
            PropertyKind::BootFs => PropertyValue::BootFs(self.boot_fs),
            PropertyKind::LastUsed => PropertyValue::LastUsed(self.last_used),
            PropertyKind::BootfsDatasets => {
                PropertyValue::BootfsDatasets(self.bootfs_datasets.clone())
            }
            PropertyKind::LastBootedKernel => {
                PropertyValue::LastBootedKernel(self.last_booted_kernel.clone())
            }
        }
    }

    /// Store a typed value in the field it belongs to.
    pub fn assign(&mut self, value: PropertyValue) {
        match value {
            PropertyValue::CanMount(v) => self.can_mount = v,
            PropertyValue::Mountpoint(v) => self.mountpoint = v,
            PropertyValue::BootFs(v) => self.boot_fs = v,
            PropertyValue::LastUsed(v) => self.last_used = v,
            PropertyValue::BootfsDatasets(v) => self.bootfs_datasets = v,
            PropertyValue::LastBootedKernel(v) => self.last_booted_kernel = v,
        }
    }
}

/// Provenance of each inheritable property.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PropertySources {
    pub can_mount: Provenance,
    pub mountpoint: Provenance,
    pub boot_fs: Provenance,
    pub last_used: Provenance,
    pub bootfs_datasets: Provenance,
    pub last_booted_kernel: Provenance,
}

impl PropertySources {
    #[must_use]
    pub fn get(&self, kind: PropertyKind) -> Provenance {
        match kind {
            PropertyKind::CanMount => self.can_mount,
            PropertyKind::Mountpoint => self.mountpoint,
            PropertyKind::BootFs => self.boot_fs,
            PropertyKind::LastUsed => self.last_used,
            PropertyKind::BootfsDatasets => self.bootfs_datasets,
            PropertyKind::LastBootedKernel => self.last_booted_kernel,
        }
    }

    pub fn set(&mut self, kind: PropertyKind, provenance: Provenance) {
        let slot = match kind {
            PropertyKind::CanMount => &mut self.can_mount,
            PropertyKind::Mountpoint => &mut self.mountpoint,
            PropertyKind::BootFs => &mut self.boot_fs,
            PropertyKind::LastUsed => &mut self.last_used,
            PropertyKind::BootfsDatasets => &mut self.bootfs_datasets,
            PropertyKind::LastBootedKernel => &mut self.last_booted_kernel,
        };
        *slot = provenance;
    }
}

// ── Dataset ─────────────────────────────────────────────────────────────────

/// One filesystem or snapshot in the model.
///
/// Owns the backend handle of the object it mirrors and a cache of the
/// native properties as the backend reports them (mountpoints keep the
/// pool's alternate root).
#[derive(Debug)]
pub struct Dataset {
    pub(crate) name: String,
    pub(crate) is_snapshot: bool,
    pub(crate) properties: DatasetProperties,
    pub(crate) sources: PropertySources,
    pub(crate) parent: Option<DatasetId>,
    pub(crate) children: Vec<DatasetId>,
    pub(crate) handle: DatasetHandle,
    pub(crate) native: NativeProperties,
}

impl Dataset {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn is_snapshot(&self) -> bool {
        self.is_snapshot
    }

    #[must_use]
    pub fn properties(&self) -> &DatasetProperties {
        &self.properties
    }

    #[must_use]
    pub fn sources(&self) -> &PropertySources {
        &self.sources
    }

    #[must_use]
    pub fn parent(&self) -> Option<DatasetId> {
        self.parent
    }

    /// Child filesystems and snapshots, in scan order.
    #[must_use]
    pub fn children(&self) -> &[DatasetId] {
        &self.children
    }

    #[must_use]
    pub fn handle(&self) -> &DatasetHandle {
        &self.handle
    }

    /// Cached native property as last seen or written by the model.
    #[must_use]
    pub fn native_property(&self, prop: NativeProp) -> Option<&RawProperty> {
        self.native.get(&prop)
    }

    /// Value and provenance of one inheritable property.
    #[must_use]
    pub fn property(&self, kind: PropertyKind) -> (PropertyValue, Provenance) {
        (self.properties.value(kind), self.sources.get(kind))
    }
}

/// Serializable recursive view of a subtree.
#[derive(Debug, Clone, Serialize)]
pub struct DatasetSummary {
    pub name: String,
    pub is_snapshot: bool,
    pub properties: DatasetProperties,
    pub sources: PropertySources,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<DatasetSummary>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assign_and_value_agree_for_every_kind() {
        let mut props = DatasetProperties::default();
        let values = [
            PropertyValue::CanMount(Some(CanMount::NoAuto)),
            PropertyValue::Mountpoint("/srv".into()),
            PropertyValue::BootFs(true),
            PropertyValue::LastUsed(1_600_000_000),
            PropertyValue::BootfsDatasets("rpool/ROOT/ubuntu".into()),
            PropertyValue::LastBootedKernel("vmlinuz-5.4.0".into()),
        ];
        for value in values {
            let kind = value.kind();
            props.assign(value.clone());
            assert_eq!(props.value(kind), value);
        }
        assert_eq!(props.mountpoint, "/srv");
        assert!(props.boot_fs);
    }

    #[test]
    fn sources_are_tracked_per_kind() {
        let mut sources = PropertySources::default();
        sources.set(PropertyKind::Mountpoint, Provenance::Local);
        sources.set(PropertyKind::BootFs, Provenance::Inherited);
        assert_eq!(sources.get(PropertyKind::Mountpoint), Provenance::Local);
        assert_eq!(sources.get(PropertyKind::BootFs), Provenance::Inherited);
        assert_eq!(sources.get(PropertyKind::LastUsed), Provenance::Default);
    }
}
