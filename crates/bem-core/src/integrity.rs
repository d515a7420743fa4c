//! Precondition checks run before destructive operations.

use crate::DatasetModel;
use bem_backend::Backend;
use bem_error::{BemError, Result};
use bem_types::{DatasetId, snapshot_name};
use tracing::{debug, warn};

fn has_snapshot(model: &DatasetModel, id: DatasetId, leaf: &str) -> bool {
    let wanted = snapshot_name(&model[id].name, leaf);
    model
        .snapshots_of(id)
        .any(|snap| model[snap].name == wanted)
}

/// Walk the subtree of `id` and fail on the first dataset that owns a
/// snapshot `<dataset>@<leaf>` while its parent does not.
///
/// `parent_has_snapshot` tells whether the parent of `id` owns one. Only the
/// direct parent matters: a gap followed by a reappearance deeper down is
/// still a violation.
pub fn check_snapshot_hierarchy_integrity(
    model: &DatasetModel,
    id: DatasetId,
    leaf: &str,
    parent_has_snapshot: bool,
) -> Result<()> {
    let found = has_snapshot(model, id, leaf);
    if found && !parent_has_snapshot {
        let snapshot = snapshot_name(&model[id].name, leaf);
        warn!(snapshot = %snapshot, "snapshot_hierarchy_violation");
        return Err(BemError::SnapshotHierarchy { snapshot });
    }
    for child in &model[id].children {
        if model[*child].is_snapshot {
            continue;
        }
        check_snapshot_hierarchy_integrity(model, *child, leaf, found)?;
    }
    Ok(())
}

/// [`check_snapshot_hierarchy_integrity`] for a whole subtree, seeded with
/// whether `id` itself owns the snapshot.
pub fn check_snapshot_hierarchy(model: &DatasetModel, id: DatasetId, leaf: &str) -> Result<()> {
    let seed = has_snapshot(model, id, leaf);
    debug!(dataset = %model[id].name, leaf, seed, "check_snapshot_hierarchy");
    check_snapshot_hierarchy_integrity(model, id, leaf, seed)
}

/// Fail if any dataset in the subtree of `id`, snapshots included, has
/// clones.
pub fn check_no_clone(model: &DatasetModel, backend: &dyn Backend, id: DatasetId) -> Result<()> {
    let node = &model[id];
    let clones = backend.clones(&node.handle).map_err(|e| BemError::Backend {
        dataset: node.name.clone(),
        detail: e.to_string(),
    })?;
    if !clones.is_empty() {
        warn!(dataset = %node.name, clones = clones.len(), "clones_exist");
        return Err(BemError::ClonesExist {
            dataset: node.name.clone(),
            clones,
        });
    }
    for child in &node.children {
        check_no_clone(model, backend, *child)?;
    }
    Ok(())
}
