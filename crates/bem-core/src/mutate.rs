//! Property writes and their cascade through inheriting descendants.

use crate::DatasetModel;
use crate::codec::{PropertyValue, apply_altroot, join_mountpoint, pack_frozen, rebase_mountpoint};
use crate::dataset::Dataset;
use crate::options::UserPropertyNames;
use bem_backend::{Backend, RawProperty};
use bem_error::{BemError, Result};
use bem_types::{DatasetId, NativeProp, PropertyKind, Provenance};
use tracing::{debug, trace, warn};

/// Parse `value` for `kind` and apply it with [`set_property_value`].
///
/// The value is validated before anything is written.
pub fn set_property(
    model: &mut DatasetModel,
    backend: &dyn Backend,
    id: DatasetId,
    kind: PropertyKind,
    value: &str,
    provenance: Provenance,
) -> Result<Vec<DatasetId>> {
    let parsed = PropertyValue::parse(kind, value).map_err(|e| BemError::InvalidProperty {
        dataset: model[id].name.clone(),
        property: kind.name().to_owned(),
        detail: e.to_string(),
    })?;
    set_property_value(model, backend, id, parsed, provenance)
}

/// Write one property to the backend, record it on `id`, then propagate it
/// to every descendant filesystem that inherits it.
///
/// Snapshots store the value as a frozen `value:provenance` pair and never
/// propagate. Propagation stops at descendants that set the property
/// themselves; a `default` provenance counts as inheriting for the custom
/// properties but not for the native ones. A mountpoint is rebased onto the
/// new value rather than copied.
///
/// Returns the descendants that were updated, in pre-order. Nothing in the
/// model changes if the backend write fails.
pub fn set_property_value(
    model: &mut DatasetModel,
    backend: &dyn Backend,
    id: DatasetId,
    value: PropertyValue,
    provenance: Provenance,
) -> Result<Vec<DatasetId>> {
    let kind = value.kind();
    let encoded = value.encode();
    let altroot = match kind {
        PropertyKind::Mountpoint if !model[id].is_snapshot => backend
            .pool_altroot(&model[id].handle)
            .map_err(|e| BemError::PropertyRead {
                dataset: model[id].name.clone(),
                property: "altroot".to_owned(),
                detail: e.to_string(),
            })?,
        _ => String::new(),
    };
    write_through(backend, &model.names, &model[id], kind, &encoded, provenance)?;

    let old = model[id].properties.value(kind);
    let is_snapshot = model[id].is_snapshot;
    {
        let node = model.node_mut(id);
        node.properties.assign(value.clone());
        node.sources.set(kind, provenance);
        if !is_snapshot {
            refresh_native(node, kind, &encoded, &altroot, Some("local"));
        }
    }
    debug!(dataset = %model[id].name, property = kind.name(), value = %encoded, %provenance, "property_set");

    if is_snapshot {
        return Ok(Vec::new());
    }

    let targets = inheriting_descendants(model, id, kind);
    for target in &targets {
        let next = match (&old, &value) {
            (PropertyValue::Mountpoint(old_base), PropertyValue::Mountpoint(new_base)) => {
                let current = &model[*target].properties.mountpoint;
                PropertyValue::Mountpoint(rebased(
                    &model[*target].name,
                    current,
                    old_base,
                    new_base,
                ))
            }
            _ => value.clone(),
        };
        let encoded = next.encode();
        let node = model.node_mut(*target);
        node.properties.assign(next);
        node.sources.set(kind, Provenance::Inherited);
        refresh_native(node, kind, &encoded, &altroot, None);
        trace!(dataset = %node.name, property = kind.name(), value = %encoded, "property_cascaded");
    }
    if !targets.is_empty() {
        debug!(dataset = %model[id].name, property = kind.name(), cascaded = targets.len(), "cascade_done");
    }
    Ok(targets)
}

/// Copy the mount properties of a snapshot's base dataset onto the
/// snapshot as frozen pairs.
///
/// Records what the snapshot would mount as if it were reverted to; later
/// changes on the base dataset do not touch it.
pub fn freeze_mount_properties(
    model: &mut DatasetModel,
    backend: &dyn Backend,
    snapshot: DatasetId,
) -> Result<()> {
    let node = &model[snapshot];
    if !node.is_snapshot {
        return Err(BemError::InvalidProperty {
            dataset: node.name.clone(),
            property: PropertyKind::Mountpoint.name().to_owned(),
            detail: "only snapshots carry frozen mount properties".to_owned(),
        });
    }
    let base = node.parent.ok_or_else(|| {
        BemError::InternalConsistency(format!("snapshot {:?} has no parent", node.name))
    })?;
    for kind in [PropertyKind::Mountpoint, PropertyKind::CanMount] {
        let (value, provenance) = model.property(base, kind);
        set_property_value(model, backend, snapshot, value, provenance)?;
    }
    Ok(())
}

fn write_through(
    backend: &dyn Backend,
    names: &UserPropertyNames,
    node: &Dataset,
    kind: PropertyKind,
    encoded: &str,
    provenance: Provenance,
) -> Result<()> {
    let result = match kind.native() {
        Some(prop) if !node.is_snapshot => backend
            .set_native_property(&node.handle, prop, encoded)
            .map_err(|e| (prop.as_str().to_owned(), e)),
        _ => {
            let name = names.for_kind(kind);
            let stored = if node.is_snapshot {
                pack_frozen(encoded, provenance)
            } else {
                encoded.to_owned()
            };
            backend
                .set_user_property(&node.handle, &name, &stored)
                .map_err(|e| (name, e))
        }
    };
    result.map_err(|(property, e)| {
        warn!(dataset = %node.name, property = %property, error = %e, "property_write_failed");
        BemError::PropertyWrite {
            dataset: node.name.clone(),
            property,
            detail: e.to_string(),
        }
    })
}

/// Cache entries hold what the backend would report, so mountpoints get the
/// pool's alternate root back.
fn refresh_native(
    node: &mut Dataset,
    kind: PropertyKind,
    encoded: &str,
    altroot: &str,
    source: Option<&str>,
) {
    let Some(prop) = kind.native() else {
        return;
    };
    let entry = node.native.entry(prop).or_insert_with(RawProperty::default);
    entry.value = if prop == NativeProp::Mountpoint {
        apply_altroot(encoded, altroot)
    } else {
        encoded.to_owned()
    };
    if let Some(source) = source {
        entry.source = source.to_owned();
    }
}

fn inherits(provenance: Provenance, kind: PropertyKind) -> bool {
    match provenance {
        Provenance::Inherited => true,
        Provenance::Default => !kind.is_native(),
        Provenance::Local => false,
    }
}

/// Descendant filesystems reached through an unbroken chain of inheriting
/// datasets, in pre-order.
fn inheriting_descendants(model: &DatasetModel, id: DatasetId, kind: PropertyKind) -> Vec<DatasetId> {
    let mut found = Vec::new();
    let mut stack: Vec<DatasetId> = model[id].children.iter().rev().copied().collect();
    while let Some(current) = stack.pop() {
        let node = &model[current];
        if node.is_snapshot || !inherits(node.sources.get(kind), kind) {
            continue;
        }
        found.push(current);
        stack.extend(node.children.iter().rev().copied());
    }
    found
}

fn rebased(name: &str, current: &str, old_base: &str, new_base: &str) -> String {
    rebase_mountpoint(current, old_base, new_base).unwrap_or_else(|| {
        warn!(dataset = name, current, old_base, new_base, "mountpoint_outside_old_base");
        join_mountpoint(new_base, current)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ModelOptions;
    use bem_backend::{Fault, MemBackend, MemDatasetSpec};
    use bem_types::CanMount;

    fn backend() -> MemBackend {
        let backend = MemBackend::new();
        backend.add_pool("rpool", "");
        backend
            .with(MemDatasetSpec::filesystem("rpool").with_mountpoint("/"))
            .with(MemDatasetSpec::filesystem("rpool/a"))
            .with(MemDatasetSpec::filesystem("rpool/a/b").with_mountpoint("/custom"))
            .with(MemDatasetSpec::filesystem("rpool/a/b/c"))
            .with(MemDatasetSpec::filesystem("rpool/a/d"))
            .with(MemDatasetSpec::snapshot("rpool/a@s", 5))
    }

    fn scan(backend: &MemBackend) -> DatasetModel {
        DatasetModel::scan(backend, &ModelOptions::default()).expect("scan")
    }

    fn id(model: &DatasetModel, name: &str) -> DatasetId {
        model.find_by_name(name).expect("dataset exists")
    }

    #[test]
    fn mountpoint_cascade_rebases_and_stops_at_local() {
        let backend = backend();
        let mut model = scan(&backend);
        let root = id(&model, "rpool");
        let updated = set_property(
            &mut model,
            &backend,
            root,
            PropertyKind::Mountpoint,
            "/srv",
            Provenance::Local,
        )
        .expect("set");

        let names: Vec<_> = updated.iter().map(|i| model[*i].name().to_owned()).collect();
        assert_eq!(names, vec!["rpool/a", "rpool/a/d"]);
        assert_eq!(model[id(&model, "rpool/a")].properties().mountpoint, "/srv/a");
        assert_eq!(model[id(&model, "rpool/a/d")].properties().mountpoint, "/srv/a/d");
        assert_eq!(model[id(&model, "rpool/a/b")].properties().mountpoint, "/custom");
        assert_eq!(model[id(&model, "rpool/a/b/c")].properties().mountpoint, "/custom/c");
        assert_eq!(
            model[id(&model, "rpool/a")].sources().mountpoint,
            Provenance::Inherited
        );
        assert_eq!(
            model[root].native_property(NativeProp::Mountpoint).map(|p| p.value.as_str()),
            Some("/srv")
        );
        assert_eq!(
            model[id(&model, "rpool/a/d")]
                .native_property(NativeProp::Mountpoint)
                .map(|p| p.value.as_str()),
            Some("/srv/a/d")
        );
    }

    #[test]
    fn native_cache_keeps_the_reported_altroot_form() {
        let backend = MemBackend::new();
        backend.add_pool("rpool", "/mnt");
        let backend = backend
            .with(MemDatasetSpec::filesystem("rpool").with_mountpoint("/"))
            .with(MemDatasetSpec::filesystem("rpool/a"));
        let mut model = scan(&backend);
        let root = id(&model, "rpool");
        let a = id(&model, "rpool/a");
        assert_eq!(
            model[a].native_property(NativeProp::Mountpoint).map(|p| p.value.as_str()),
            Some("/mnt/a")
        );

        set_property(&mut model, &backend, root, PropertyKind::Mountpoint, "/srv", Provenance::Local)
            .expect("set");
        assert_eq!(model[a].properties().mountpoint, "/srv/a");

        let rescanned = scan(&backend);
        for name in ["rpool", "rpool/a"] {
            let cached = model[id(&model, name)].native_property(NativeProp::Mountpoint).cloned();
            let reported = rescanned[id(&rescanned, name)]
                .native_property(NativeProp::Mountpoint)
                .cloned();
            assert_eq!(cached.map(|p| p.value), reported.map(|p| p.value), "{name}");
        }
        assert_eq!(
            model[root].native_property(NativeProp::Mountpoint).map(|p| p.value.as_str()),
            Some("/mnt/srv")
        );
    }

    #[test]
    fn native_default_does_not_inherit() {
        let backend = backend();
        let mut model = scan(&backend);
        let a = id(&model, "rpool/a");
        let updated = set_property(&mut model, &backend, a, PropertyKind::CanMount, "noauto", Provenance::Local)
            .expect("set");
        assert!(updated.is_empty());
        assert_eq!(model[a].properties().can_mount, Some(CanMount::NoAuto));
        assert_eq!(
            model[id(&model, "rpool/a/d")].properties().can_mount,
            Some(CanMount::On)
        );
    }

    #[test]
    fn custom_default_inherits() {
        let backend = backend();
        let mut model = scan(&backend);
        let a = id(&model, "rpool/a");
        let updated =
            set_property(&mut model, &backend, a, PropertyKind::BootFs, "yes", Provenance::Local)
                .expect("set");
        assert_eq!(updated.len(), 3);
        for name in ["rpool/a/b", "rpool/a/b/c", "rpool/a/d"] {
            let node = &model[id(&model, name)];
            assert!(node.properties().boot_fs, "{name}");
            assert_eq!(node.sources().boot_fs, Provenance::Inherited, "{name}");
        }
        // The snapshot is never part of a cascade.
        assert!(!model[id(&model, "rpool/a@s")].properties().boot_fs);
        assert_eq!(
            backend
                .get("rpool/a")
                .expect("a")
                .user_properties
                .get("com.ubuntu.zsys:bootfs")
                .map(String::as_str),
            Some("yes")
        );
    }

    #[test]
    fn snapshot_write_is_frozen_pair_without_cascade() {
        let backend = backend();
        let mut model = scan(&backend);
        let snap = id(&model, "rpool/a@s");
        let updated = set_property(
            &mut model,
            &backend,
            snap,
            PropertyKind::Mountpoint,
            "/frozen",
            Provenance::Inherited,
        )
        .expect("set");
        assert!(updated.is_empty());
        assert_eq!(model[snap].properties().mountpoint, "/frozen");
        assert_eq!(
            backend
                .get("rpool/a@s")
                .expect("snap")
                .user_properties
                .get("com.ubuntu.zsys:mountpoint")
                .map(String::as_str),
            Some("/frozen:inherited")
        );
        assert_eq!(backend.get("rpool/a").expect("a").mountpoint, None);
    }

    #[test]
    fn failed_write_leaves_model_untouched() {
        let backend = backend();
        let mut model = scan(&backend);
        backend.inject(Fault::Write("rpool".into()));
        let root = id(&model, "rpool");
        let err = set_property(&mut model, &backend, root, PropertyKind::Mountpoint, "/x", Provenance::Local)
            .unwrap_err();
        assert!(matches!(err, BemError::PropertyWrite { .. }), "{err:?}");
        assert_eq!(model[root].properties().mountpoint, "/");
        assert_eq!(model[id(&model, "rpool/a")].properties().mountpoint, "/a");
    }

    #[test]
    fn invalid_value_is_rejected_before_writing() {
        let backend = backend();
        let mut model = scan(&backend);
        let a = id(&model, "rpool/a");
        let err = set_property(&mut model, &backend, a, PropertyKind::LastUsed, "later", Provenance::Local)
            .unwrap_err();
        assert!(matches!(err, BemError::InvalidProperty { .. }));
        assert!(backend.get("rpool/a").expect("a").user_properties.is_empty());
    }

    #[test]
    fn freezing_copies_base_mount_properties() {
        let backend = backend();
        let mut model = scan(&backend);
        let snap = id(&model, "rpool/a@s");
        freeze_mount_properties(&mut model, &backend, snap).expect("freeze");
        assert_eq!(model[snap].properties().mountpoint, "/a");
        assert_eq!(model[snap].sources().mountpoint, Provenance::Inherited);
        assert_eq!(model[snap].properties().can_mount, Some(CanMount::On));
        let stored = backend.get("rpool/a@s").expect("snap").user_properties;
        assert_eq!(stored["com.ubuntu.zsys:mountpoint"], "/a:inherited");
        assert_eq!(stored["com.ubuntu.zsys:canmount"], "on:default");

        let a = id(&model, "rpool/a");
        assert!(freeze_mount_properties(&mut model, &backend, a).is_err());
    }
}
