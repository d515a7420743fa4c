//! Reading a dataset's properties and their provenance from the backend.

use crate::codec::{
    PropertyValue, is_recognized_user_source, simplify_source, strip_altroot, unpack_frozen,
};
use crate::dataset::{Dataset, DatasetProperties, PropertySources};
use crate::options::UserPropertyNames;
use bem_backend::{Backend, DatasetHandle, NativeProperties};
use bem_error::{BemError, Result};
use bem_types::{CanMount, NativeProp, PropertyKind, Provenance, UNSET_SENTINEL};
use tracing::{debug, trace, warn};

/// The parts of an object needed to resolve its properties.
#[derive(Clone, Copy)]
pub(crate) struct Target<'a> {
    pub name: &'a str,
    pub handle: &'a DatasetHandle,
    pub is_snapshot: bool,
    pub native: &'a NativeProperties,
}

/// Read one custom property of `dataset` from the backend.
///
/// `None` means unset: the backend returned its unset sentinel, the source
/// tag was not recognized, or (on a snapshot) the value was not set on the
/// snapshot itself or is not a `value:provenance` pair.
pub fn resolve_user_property(
    backend: &dyn Backend,
    names: &UserPropertyNames,
    dataset: &Dataset,
    kind: PropertyKind,
) -> Result<Option<(String, Provenance)>> {
    read_user_property(
        backend,
        names,
        Target {
            name: &dataset.name,
            handle: &dataset.handle,
            is_snapshot: dataset.is_snapshot,
            native: &dataset.native,
        },
        kind,
    )
}

pub(crate) fn read_user_property(
    backend: &dyn Backend,
    names: &UserPropertyNames,
    target: Target<'_>,
    kind: PropertyKind,
) -> Result<Option<(String, Provenance)>> {
    let prop_name = names.for_kind(kind);
    let raw = backend
        .user_property(target.handle, &prop_name)
        .map_err(|e| BemError::PropertyRead {
            dataset: target.name.to_owned(),
            property: prop_name.clone(),
            detail: e.to_string(),
        })?;
    if raw.is_unset() {
        return Ok(None);
    }

    if target.is_snapshot {
        // Inherited from the base dataset: not frozen on this snapshot.
        if raw.source != "local" {
            return Ok(None);
        }
        let (value, provenance) = match unpack_frozen(&raw.value) {
            Ok(pair) => pair,
            Err(err) => {
                // Set by hand rather than frozen by us.
                warn!(dataset = target.name, property = %prop_name, %err, "frozen_property_malformed");
                return Ok(None);
            }
        };
        trace!(dataset = target.name, property = %prop_name, value, %provenance, "frozen_property");
        return Ok(Some((value.to_owned(), provenance)));
    }

    if !is_recognized_user_source(&raw.source) {
        debug!(dataset = target.name, property = %prop_name, source = %raw.source, "unrecognized_source");
        return Ok(None);
    }
    Ok(Some((raw.value, simplify_source(&raw.source))))
}

fn native<'a>(target: Target<'a>, prop: NativeProp) -> Result<&'a bem_backend::RawProperty> {
    target.native.get(&prop).ok_or_else(|| BemError::PropertyRead {
        dataset: target.name.to_owned(),
        property: prop.as_str().to_owned(),
        detail: "missing from scan".to_owned(),
    })
}

fn invalid(target: Target<'_>, kind: PropertyKind, detail: impl ToString) -> BemError {
    BemError::InvalidProperty {
        dataset: target.name.to_owned(),
        property: kind.name().to_owned(),
        detail: detail.to_string(),
    }
}

/// Frozen mount property on a snapshot. Unreadable or malformed values are
/// treated as absent so one bad snapshot does not fail a whole scan.
fn frozen_mount_property(
    backend: &dyn Backend,
    names: &UserPropertyNames,
    target: Target<'_>,
    kind: PropertyKind,
) -> Option<(String, Provenance)> {
    match read_user_property(backend, names, target, kind) {
        Ok(found) => found,
        Err(err) => {
            debug!(dataset = target.name, property = kind.name(), error = %err, "frozen_property_ignored");
            None
        }
    }
}

fn custom_property(
    backend: &dyn Backend,
    names: &UserPropertyNames,
    target: Target<'_>,
    kind: PropertyKind,
) -> Result<(PropertyValue, Provenance)> {
    match read_user_property(backend, names, target, kind)? {
        Some((raw, provenance)) => {
            let value = PropertyValue::parse(kind, &raw).map_err(|e| invalid(target, kind, e))?;
            Ok((value, provenance))
        }
        None => Ok((PropertyValue::zero(kind), Provenance::Default)),
    }
}

/// Build the full property record of one object.
pub(crate) fn load_properties(
    backend: &dyn Backend,
    names: &UserPropertyNames,
    target: Target<'_>,
) -> Result<(DatasetProperties, PropertySources)> {
    let mut props = DatasetProperties::default();
    let mut sources = PropertySources::default();

    if target.is_snapshot {
        if let Some((mp, provenance)) =
            frozen_mount_property(backend, names, target, PropertyKind::Mountpoint)
        {
            props.mountpoint = mp;
            sources.mountpoint = provenance;
        }
        if let Some((cm, provenance)) =
            frozen_mount_property(backend, names, target, PropertyKind::CanMount)
        {
            match cm.parse::<CanMount>() {
                Ok(v) => {
                    props.can_mount = Some(v);
                    sources.can_mount = provenance;
                }
                Err(err) if cm.is_empty() => trace!(dataset = target.name, %err, "frozen_canmount_empty"),
                Err(err) => warn!(dataset = target.name, %err, "frozen_canmount_invalid"),
            }
        }
        let creation = native(target, NativeProp::Creation)?;
        let value = PropertyValue::parse(PropertyKind::LastUsed, &creation.value)
            .map_err(|e| invalid(target, PropertyKind::LastUsed, e))?;
        props.assign(value);
    } else {
        let altroot = backend
            .pool_altroot(target.handle)
            .map_err(|e| BemError::PropertyRead {
                dataset: target.name.to_owned(),
                property: "altroot".to_owned(),
                detail: e.to_string(),
            })?;
        let mp = native(target, NativeProp::Mountpoint)?;
        props.mountpoint = strip_altroot(&mp.value, &altroot);
        sources.mountpoint = simplify_source(&mp.source);

        let cm = native(target, NativeProp::CanMount)?;
        props.can_mount = Some(
            cm.value
                .parse::<CanMount>()
                .map_err(|e| invalid(target, PropertyKind::CanMount, e))?,
        );
        sources.can_mount = simplify_source(&cm.source);
        if sources.can_mount == Provenance::Inherited {
            warn!(dataset = target.name, source = %cm.source, "canmount_unexpected_source");
        }

        props.mounted = native(target, NativeProp::Mounted)?.value == "yes";

        let (value, provenance) = custom_property(backend, names, target, PropertyKind::LastUsed)?;
        props.assign(value);
        sources.last_used = provenance;
    }

    for kind in [
        PropertyKind::BootFs,
        PropertyKind::LastBootedKernel,
        PropertyKind::BootfsDatasets,
    ] {
        let (value, provenance) = custom_property(backend, names, target, kind)?;
        props.assign(value);
        sources.set(kind, provenance);
    }

    props.origin = match target.native.get(&NativeProp::Origin) {
        Some(origin) if origin.value != UNSET_SENTINEL => origin.value.clone(),
        _ => String::new(),
    };

    trace!(
        dataset = target.name,
        mountpoint = %props.mountpoint,
        boot_fs = props.boot_fs,
        last_used = props.last_used,
        "properties_loaded"
    );
    Ok((props, sources))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bem_backend::{Fault, MemBackend, MemDatasetSpec, ScannedDataset};

    fn find<'a>(trees: &'a [ScannedDataset], name: &str) -> &'a ScannedDataset {
        fn walk<'a>(trees: &'a [ScannedDataset], name: &str) -> Option<&'a ScannedDataset> {
            trees.iter().find_map(|t| {
                if t.name() == name {
                    Some(t)
                } else {
                    walk(&t.children, name)
                }
            })
        }
        walk(trees, name).expect("dataset present in scan")
    }

    fn target(scanned: &ScannedDataset) -> Target<'_> {
        Target {
            name: scanned.name(),
            handle: &scanned.handle,
            is_snapshot: scanned.kind == bem_types::DatasetKind::Snapshot,
            native: &scanned.properties,
        }
    }

    fn backend() -> MemBackend {
        let backend = MemBackend::new();
        backend.add_pool("rpool", "/mnt");
        backend
            .with(MemDatasetSpec::filesystem("rpool").with_mountpoint("/"))
            .with(
                MemDatasetSpec::filesystem("rpool/ROOT")
                    .with_mountpoint("none")
                    .with_canmount("off"),
            )
            .with(
                MemDatasetSpec::filesystem("rpool/ROOT/ubuntu")
                    .with_mountpoint("/")
                    .with_user("com.ubuntu.zsys:bootfs", "yes")
                    .with_user("com.ubuntu.zsys:last-used", "1588000000")
                    .mounted(),
            )
            .with(MemDatasetSpec::filesystem("rpool/ROOT/ubuntu/var"))
            .with(
                MemDatasetSpec::snapshot("rpool/ROOT/ubuntu@s1", 1_500_000_000)
                    .with_user("com.ubuntu.zsys:mountpoint", "/:local")
                    .with_user("com.ubuntu.zsys:canmount", "noauto:local"),
            )
            .with(MemDatasetSpec::snapshot("rpool/ROOT/ubuntu@s2", 1_550_000_000))
    }

    #[test]
    fn filesystem_properties_resolve_with_provenance() {
        let backend = backend();
        let trees = backend.scan().expect("scan");
        let names = UserPropertyNames::default();

        let (props, sources) =
            load_properties(&backend, &names, target(find(&trees, "rpool/ROOT/ubuntu"))).expect("load");
        assert_eq!(props.mountpoint, "/");
        assert_eq!(sources.mountpoint, Provenance::Local);
        assert_eq!(props.can_mount, Some(CanMount::On));
        assert_eq!(sources.can_mount, Provenance::Default);
        assert!(props.mounted);
        assert!(props.boot_fs);
        assert_eq!(sources.boot_fs, Provenance::Local);
        assert_eq!(props.last_used, 1_588_000_000);

        let (props, sources) =
            load_properties(&backend, &names, target(find(&trees, "rpool/ROOT/ubuntu/var")))
                .expect("load");
        assert_eq!(props.mountpoint, "/var");
        assert_eq!(sources.mountpoint, Provenance::Inherited);
        assert!(props.boot_fs);
        assert_eq!(sources.boot_fs, Provenance::Inherited);
        assert_eq!(props.last_booted_kernel, "");
        assert_eq!(sources.last_booted_kernel, Provenance::Default);
    }

    #[test]
    fn pool_root_under_altroot_is_slash() {
        let backend = backend();
        let trees = backend.scan().expect("scan");
        let names = UserPropertyNames::default();
        let (props, _) = load_properties(&backend, &names, target(find(&trees, "rpool"))).expect("load");
        assert_eq!(props.mountpoint, "/");
    }

    #[test]
    fn snapshots_use_frozen_values_and_creation_time() {
        let backend = backend();
        let trees = backend.scan().expect("scan");
        let names = UserPropertyNames::default();

        let (props, sources) =
            load_properties(&backend, &names, target(find(&trees, "rpool/ROOT/ubuntu@s1")))
                .expect("load");
        assert_eq!(props.mountpoint, "/");
        assert_eq!(sources.mountpoint, Provenance::Local);
        assert_eq!(props.can_mount, Some(CanMount::NoAuto));
        assert!(!props.mounted);
        assert_eq!(props.last_used, 1_500_000_000);
        // bootfs inherited from the base dataset is not frozen on the snapshot.
        assert!(!props.boot_fs);

        let (props, sources) =
            load_properties(&backend, &names, target(find(&trees, "rpool/ROOT/ubuntu@s2")))
                .expect("load");
        assert_eq!(props.mountpoint, "");
        assert_eq!(props.can_mount, None);
        assert_eq!(sources.mountpoint, Provenance::Default);
    }

    #[test]
    fn malformed_frozen_custom_property_is_treated_as_absent() {
        let backend = backend().with(
            MemDatasetSpec::snapshot("rpool/ROOT/ubuntu/var@manual", 3)
                .with_user("com.ubuntu.zsys:last-booted-kernel", "vmlinuz")
                .with_user("com.ubuntu.zsys:bootfs", "yes"),
        );
        let trees = backend.scan().expect("scan");
        let names = UserPropertyNames::default();
        let (props, sources) =
            load_properties(&backend, &names, target(find(&trees, "rpool/ROOT/ubuntu/var@manual")))
                .expect("load");
        assert_eq!(props.last_booted_kernel, "");
        assert_eq!(sources.last_booted_kernel, Provenance::Default);
        assert!(!props.boot_fs);
        assert_eq!(props.last_used, 3);
    }

    #[test]
    fn malformed_frozen_value_does_not_fail_the_scan() {
        let backend = backend().with(
            MemDatasetSpec::snapshot("rpool@manual", 7).with_user("com.ubuntu.zsys:last-booted-kernel", "vmlinuz"),
        );
        let model = crate::DatasetModel::scan(&backend, &crate::ModelOptions::default()).expect("scan");
        let snap = model.find_by_name("rpool@manual").expect("snapshot");
        assert_eq!(
            model.property(snap, PropertyKind::LastBootedKernel),
            (PropertyValue::LastBootedKernel(String::new()), Provenance::Default)
        );
    }

    #[test]
    fn malformed_frozen_mount_property_is_ignored() {
        let backend = backend().with(
            MemDatasetSpec::snapshot("rpool/ROOT/ubuntu/var@odd", 3)
                .with_user("com.ubuntu.zsys:mountpoint", "no-separator"),
        );
        let trees = backend.scan().expect("scan");
        let names = UserPropertyNames::default();
        let (props, _) =
            load_properties(&backend, &names, target(find(&trees, "rpool/ROOT/ubuntu/var@odd")))
                .expect("load");
        assert_eq!(props.mountpoint, "");
    }

    #[test]
    fn backend_read_failure_is_reported_with_property_name() {
        let backend = backend();
        backend.inject(Fault::UserPropertyRead("rpool/ROOT/ubuntu".into()));
        let trees = backend.scan().expect("scan");
        let names = UserPropertyNames::default();
        let err = load_properties(&backend, &names, target(find(&trees, "rpool/ROOT/ubuntu")))
            .unwrap_err();
        match err {
            BemError::PropertyRead { dataset, property, .. } => {
                assert_eq!(dataset, "rpool/ROOT/ubuntu");
                assert!(property.starts_with("com.ubuntu.zsys:"), "{property}");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn invalid_last_used_is_rejected() {
        let backend = backend().with(
            MemDatasetSpec::filesystem("rpool/USERDATA").with_user("com.ubuntu.zsys:last-used", "soon"),
        );
        let trees = backend.scan().expect("scan");
        let names = UserPropertyNames::default();
        let err = load_properties(&backend, &names, target(find(&trees, "rpool/USERDATA"))).unwrap_err();
        assert!(matches!(err, BemError::InvalidProperty { ref property, .. } if property == "last-used"));
    }
}
