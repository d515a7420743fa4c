//! In-memory backend.
//!
//! Keeps a flat list of objects and derives the hierarchy from their names,
//! the way the real pool does. Inheritance is computed on read: a user
//! property or mountpoint not set on an object comes from the nearest
//! ancestor that sets it, tagged `inherited from <ancestor>`.

use crate::{Backend, BackendError, DatasetHandle, NativeProperties, RawProperty, ScannedDataset};
use bem_types::{
    CanMount, DatasetKind, NativeProp, PATH_SEPARATOR, UNSET_SENTINEL, pool_name, snapshot_name,
    split_snapshot_name,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, trace};

/// Failure points that can be armed on a [`MemBackend`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "fault", content = "dataset")]
pub enum Fault {
    /// Every scan fails.
    Scan,
    /// User property reads on this dataset fail.
    UserPropertyRead(String),
    /// Native and user property writes on this dataset fail.
    Write(String),
    /// Clone listing on this dataset fails.
    Clones(String),
    /// Promoting this dataset fails.
    Promote(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MemPoolSpec {
    pub name: String,
    pub altroot: String,
}

/// Description of one object, as written in fixtures.
///
/// Only locally-set values are listed; inherited and default values are
/// computed by the backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MemDatasetSpec {
    pub name: String,
    /// Inferred from the name when absent.
    pub kind: Option<DatasetKind>,
    pub mountpoint: Option<String>,
    pub canmount: Option<String>,
    pub mounted: bool,
    /// Snapshot this dataset was cloned from.
    pub origin: Option<String>,
    /// Creation timestamp (seconds), meaningful for snapshots.
    pub creation: i64,
    pub user_properties: BTreeMap<String, String>,
}

impl MemDatasetSpec {
    pub fn filesystem(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: Some(DatasetKind::Filesystem),
            ..Self::default()
        }
    }

    pub fn snapshot(name: impl Into<String>, creation: i64) -> Self {
        Self {
            name: name.into(),
            kind: Some(DatasetKind::Snapshot),
            creation,
            ..Self::default()
        }
    }

    pub fn volume(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: Some(DatasetKind::Volume),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_mountpoint(mut self, mountpoint: impl Into<String>) -> Self {
        self.mountpoint = Some(mountpoint.into());
        self
    }

    #[must_use]
    pub fn with_canmount(mut self, canmount: impl Into<String>) -> Self {
        self.canmount = Some(canmount.into());
        self
    }

    #[must_use]
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    #[must_use]
    pub fn with_user(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.user_properties.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn mounted(mut self) -> Self {
        self.mounted = true;
        self
    }

    fn resolved_kind(&self) -> DatasetKind {
        self.kind
            .unwrap_or_else(|| DatasetKind::infer_from_name(&self.name))
    }
}

/// Serializable description of a whole backend.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MemFixture {
    pub pools: Vec<MemPoolSpec>,
    pub datasets: Vec<MemDatasetSpec>,
}

#[derive(Debug, Clone)]
struct MemEntry {
    id: u64,
    kind: DatasetKind,
    spec: MemDatasetSpec,
}

#[derive(Debug, Default)]
struct MemState {
    next_id: u64,
    pools: BTreeMap<String, String>,
    entries: Vec<MemEntry>,
    faults: Vec<Fault>,
}

/// Parent object name: the base dataset for snapshots and bookmarks, the
/// enclosing filesystem otherwise, `None` for a pool root.
fn parent_name(name: &str) -> Option<&str> {
    if let Some(idx) = name.rfind('#') {
        return Some(&name[..idx]);
    }
    match split_snapshot_name(name) {
        (base, Some(_)) => Some(base),
        (base, None) => base.rsplit_once(PATH_SEPARATOR).map(|(parent, _)| parent),
    }
}

fn leaf_name(name: &str) -> &str {
    name.rsplit_once(PATH_SEPARATOR).map_or(name, |(_, leaf)| leaf)
}

impl MemState {
    fn find(&self, name: &str) -> Option<&MemEntry> {
        self.entries.iter().find(|e| e.spec.name == name)
    }

    fn find_mut(&mut self, name: &str) -> Option<&mut MemEntry> {
        self.entries.iter_mut().find(|e| e.spec.name == name)
    }

    fn by_handle(&self, handle: &DatasetHandle) -> Result<&MemEntry, BackendError> {
        self.entries
            .iter()
            .find(|e| e.id == handle.id())
            .ok_or(BackendError::UnknownHandle(handle.id()))
    }

    fn check_fault(&self, fault: &Fault) -> Result<(), BackendError> {
        if self.faults.contains(fault) {
            return Err(BackendError::Injected(format!("{fault:?}")));
        }
        Ok(())
    }

    /// Effective mountpoint without the altroot prefix, plus its source tag.
    fn mountpoint(&self, name: &str) -> RawProperty {
        let Some(entry) = self.find(name) else {
            return RawProperty::new(UNSET_SENTINEL, UNSET_SENTINEL);
        };
        if let Some(mp) = &entry.spec.mountpoint {
            return RawProperty::new(mp.clone(), "local");
        }
        let Some(parent) = parent_name(name) else {
            return RawProperty::new(format!("/{name}"), "default");
        };
        let inherited = self.mountpoint(parent);
        let value = match inherited.value.as_str() {
            "none" | "legacy" => inherited.value.clone(),
            "/" => format!("/{}", leaf_name(name)),
            base => format!("{base}/{}", leaf_name(name)),
        };
        let source = if inherited.source == "default" {
            "default".to_owned()
        } else if inherited.source == "local" {
            format!("inherited from {parent}")
        } else {
            inherited.source
        };
        RawProperty::new(value, source)
    }

    fn user_property(&self, name: &str, prop: &str) -> RawProperty {
        let mut current = Some(name);
        let mut first = true;
        while let Some(n) = current {
            if let Some(value) = self.find(n).and_then(|e| e.spec.user_properties.get(prop)) {
                let source = if first {
                    "local".to_owned()
                } else {
                    format!("inherited from {n}")
                };
                return RawProperty::new(value.clone(), source);
            }
            first = false;
            current = parent_name(n);
        }
        RawProperty::new(UNSET_SENTINEL, UNSET_SENTINEL)
    }

    fn native_properties(&self, entry: &MemEntry) -> NativeProperties {
        let name = entry.spec.name.as_str();
        let mut props = NativeProperties::new();
        props.insert(NativeProp::Name, RawProperty::new(name, UNSET_SENTINEL));
        props.insert(
            NativeProp::Origin,
            RawProperty::new(entry.spec.origin.clone().unwrap_or_default(), UNSET_SENTINEL),
        );
        match entry.kind {
            DatasetKind::Snapshot => {
                props.insert(
                    NativeProp::Creation,
                    RawProperty::new(entry.spec.creation.to_string(), UNSET_SENTINEL),
                );
            }
            DatasetKind::Filesystem => {
                let altroot = self
                    .pools
                    .get(pool_name(name))
                    .cloned()
                    .unwrap_or_default();
                let mut mp = self.mountpoint(name);
                if !altroot.is_empty() && mp.value.starts_with('/') {
                    mp.value = if mp.value == "/" {
                        altroot
                    } else {
                        format!("{altroot}{}", mp.value)
                    };
                }
                props.insert(NativeProp::Mountpoint, mp);
                let canmount = match &entry.spec.canmount {
                    Some(v) => RawProperty::new(v.clone(), "local"),
                    None => RawProperty::new("on", "default"),
                };
                props.insert(NativeProp::CanMount, canmount);
                let mounted = if entry.spec.mounted { "yes" } else { "no" };
                props.insert(NativeProp::Mounted, RawProperty::new(mounted, UNSET_SENTINEL));
            }
            DatasetKind::Volume | DatasetKind::Bookmark => {}
        }
        props
    }

    fn scan_entry(&self, entry: &MemEntry) -> ScannedDataset {
        let children = self
            .entries
            .iter()
            .filter(|c| parent_name(&c.spec.name) == Some(entry.spec.name.as_str()))
            .map(|c| self.scan_entry(c))
            .collect();
        ScannedDataset {
            handle: DatasetHandle::new(entry.id),
            kind: entry.kind,
            properties: self.native_properties(entry),
            children,
        }
    }
}

/// Thread-safe in-memory backend.
#[derive(Debug, Default)]
pub struct MemBackend {
    state: Mutex<MemState>,
}

impl MemBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a backend from a fixture description.
    pub fn from_fixture(fixture: MemFixture) -> Result<Self, BackendError> {
        let backend = Self::new();
        for pool in fixture.pools {
            backend.add_pool(pool.name, pool.altroot);
        }
        for dataset in fixture.datasets {
            backend.add(dataset)?;
        }
        Ok(backend)
    }

    pub fn add_pool(&self, name: impl Into<String>, altroot: impl Into<String>) {
        self.state.lock().pools.insert(name.into(), altroot.into());
    }

    /// Register one object. Its parent must already exist.
    pub fn add(&self, spec: MemDatasetSpec) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        if state.find(&spec.name).is_some() {
            return Err(BackendError::Rejected {
                dataset: spec.name,
                reason: "dataset already exists".to_owned(),
            });
        }
        if let Some(parent) = parent_name(&spec.name) {
            if state.find(parent).is_none() {
                return Err(BackendError::NotFound(parent.to_owned()));
            }
        }
        let id = state.next_id;
        state.next_id += 1;
        trace!(dataset = %spec.name, id, "mem_backend_add");
        let kind = spec.resolved_kind();
        state.entries.push(MemEntry { id, kind, spec });
        Ok(())
    }

    /// Builder-style [`Self::add`] for tests.
    #[must_use]
    pub fn with(self, spec: MemDatasetSpec) -> Self {
        if let Err(err) = self.add(spec) {
            panic!("invalid in-memory backend layout: {err}");
        }
        self
    }

    pub fn inject(&self, fault: Fault) {
        self.state.lock().faults.push(fault);
    }

    pub fn clear_faults(&self) {
        self.state.lock().faults.clear();
    }

    /// Current description of one object, as it would appear in a fixture.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<MemDatasetSpec> {
        self.state.lock().find(name).map(|e| e.spec.clone())
    }

    /// Names of every object, in registration order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.state
            .lock()
            .entries
            .iter()
            .map(|e| e.spec.name.clone())
            .collect()
    }
}

impl Backend for MemBackend {
    fn scan(&self) -> Result<Vec<ScannedDataset>, BackendError> {
        let state = self.state.lock();
        state.check_fault(&Fault::Scan)?;
        Ok(state
            .entries
            .iter()
            .filter(|e| parent_name(&e.spec.name).is_none())
            .map(|e| state.scan_entry(e))
            .collect())
    }

    fn pool_altroot(&self, handle: &DatasetHandle) -> Result<String, BackendError> {
        let state = self.state.lock();
        let entry = state.by_handle(handle)?;
        Ok(state
            .pools
            .get(pool_name(&entry.spec.name))
            .cloned()
            .unwrap_or_default())
    }

    fn user_property(
        &self,
        handle: &DatasetHandle,
        name: &str,
    ) -> Result<RawProperty, BackendError> {
        let state = self.state.lock();
        let entry = state.by_handle(handle)?;
        state.check_fault(&Fault::UserPropertyRead(entry.spec.name.clone()))?;
        Ok(state.user_property(&entry.spec.name, name))
    }

    fn set_native_property(
        &self,
        handle: &DatasetHandle,
        prop: NativeProp,
        value: &str,
    ) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        let entry = state.by_handle(handle)?;
        let name = entry.spec.name.clone();
        state.check_fault(&Fault::Write(name.clone()))?;
        if entry.kind != DatasetKind::Filesystem {
            return Err(BackendError::Rejected {
                dataset: name,
                reason: format!("{} can't be modified on this object type", prop.as_str()),
            });
        }
        let rejected = |reason: &str| BackendError::Rejected {
            dataset: name.clone(),
            reason: reason.to_owned(),
        };
        let entry = state.find_mut(&name).ok_or_else(|| rejected("vanished"))?;
        match prop {
            NativeProp::Mountpoint => {
                if !(value.starts_with('/') || value == "none" || value == "legacy") {
                    return Err(rejected("mountpoint must be an absolute path, none or legacy"));
                }
                entry.spec.mountpoint = Some(value.to_owned());
            }
            NativeProp::CanMount => {
                value
                    .parse::<CanMount>()
                    .map_err(|_| rejected("canmount must be on, off or noauto"))?;
                entry.spec.canmount = Some(value.to_owned());
            }
            NativeProp::Name
            | NativeProp::Mounted
            | NativeProp::Origin
            | NativeProp::Creation => return Err(rejected("read-only property")),
        }
        debug!(dataset = %name, property = prop.as_str(), value, "mem_backend_set_native");
        Ok(())
    }

    fn set_user_property(
        &self,
        handle: &DatasetHandle,
        name: &str,
        value: &str,
    ) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        let dataset = state.by_handle(handle)?.spec.name.clone();
        state.check_fault(&Fault::Write(dataset.clone()))?;
        if !name.contains(':') {
            return Err(BackendError::Rejected {
                dataset,
                reason: format!("{name:?} is not a valid user property name"),
            });
        }
        if let Some(entry) = state.find_mut(&dataset) {
            entry
                .spec
                .user_properties
                .insert(name.to_owned(), value.to_owned());
        }
        debug!(dataset = %dataset, property = name, value, "mem_backend_set_user");
        Ok(())
    }

    fn clones(&self, handle: &DatasetHandle) -> Result<Vec<String>, BackendError> {
        let state = self.state.lock();
        let name = state.by_handle(handle)?.spec.name.clone();
        state.check_fault(&Fault::Clones(name.clone()))?;
        Ok(state
            .entries
            .iter()
            .filter(|e| e.spec.origin.as_deref() == Some(name.as_str()))
            .map(|e| e.spec.name.clone())
            .collect())
    }

    fn promote(&self, handle: &DatasetHandle) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        let clone = state.by_handle(handle)?.spec.clone();
        state.check_fault(&Fault::Promote(clone.name.clone()))?;
        let rejected = |reason: &str| BackendError::Rejected {
            dataset: clone.name.clone(),
            reason: reason.to_owned(),
        };
        let origin = clone
            .origin
            .clone()
            .filter(|o| !o.is_empty())
            .ok_or_else(|| rejected("not a cloned filesystem"))?;
        let base = state
            .find(&origin)
            .map(|e| e.spec.clone())
            .ok_or_else(|| BackendError::NotFound(origin.clone()))?;
        let (old_origin, _) = split_snapshot_name(&origin);
        let old_origin = old_origin.to_owned();

        let moving: Vec<String> = state
            .entries
            .iter()
            .filter(|e| {
                e.kind == DatasetKind::Snapshot
                    && parent_name(&e.spec.name) == Some(old_origin.as_str())
                    && e.spec.creation <= base.creation
            })
            .map(|e| e.spec.name.clone())
            .collect();

        let renames: Vec<(String, String)> = moving
            .iter()
            .map(|old| {
                let (_, leaf) = split_snapshot_name(old);
                (old.clone(), snapshot_name(&clone.name, leaf.unwrap_or_default()))
            })
            .collect();
        if let Some((_, clash)) = renames.iter().find(|(_, new)| state.find(new).is_some()) {
            return Err(rejected(&format!("snapshot {clash:?} already exists")));
        }

        for (old, new) in &renames {
            for entry in &mut state.entries {
                if entry.spec.name == *old {
                    entry.spec.name.clone_from(new);
                }
                if entry.spec.origin.as_deref() == Some(old.as_str()) {
                    entry.spec.origin = Some(new.clone());
                }
            }
        }

        let previous_origin = state.find(&old_origin).and_then(|e| e.spec.origin.clone());
        let (_, base_leaf) = split_snapshot_name(&origin);
        let new_base = snapshot_name(&clone.name, base_leaf.unwrap_or_default());
        if let Some(entry) = state.find_mut(&old_origin) {
            entry.spec.origin = Some(new_base);
        }
        if let Some(entry) = state.find_mut(&clone.name) {
            entry.spec.origin = previous_origin;
        }
        debug!(clone = %clone.name, old_origin = %old_origin, moved = renames.len(), "mem_backend_promote");
        Ok(())
    }
}
