//! Clone promotion.

use crate::DatasetModel;
use bem_backend::Backend;
use bem_error::{BemError, Result};
use bem_types::{DatasetId, snapshot_name, split_snapshot_name};
use tracing::{debug, error, info};

/// Mirror a completed promotion of `new_origin` over `old_origin` in the
/// model.
///
/// Snapshots of `old_origin` up to and including the one `new_origin` was
/// cloned from (by `last_used`) move under `new_origin` and are renamed to
/// `<new_origin>@<leaf>`. Afterwards `old_origin` is a clone of the moved
/// base snapshot and `new_origin` has no origin. Any other clone of a moved
/// snapshot is re-pointed at the new name.
///
/// Every move is validated before any is applied. Returns the moved
/// snapshots.
pub fn inverse_origin(
    model: &mut DatasetModel,
    old_origin: DatasetId,
    new_origin: DatasetId,
) -> Result<Vec<DatasetId>> {
    let base_name = model[new_origin].properties.origin.clone();
    let base = model.find_by_name(&base_name)?;
    if model[base].parent != Some(old_origin) {
        return Err(BemError::InternalConsistency(format!(
            "origin {base_name:?} of {:?} is not a snapshot of {:?}",
            model[new_origin].name, model[old_origin].name
        )));
    }
    let cutoff = model[base].properties.last_used;

    // Selected by parent link so a node missing from the parent's child
    // list is caught before anything moves.
    let selected: Vec<DatasetId> = (0..model.nodes.len())
        .map(DatasetId)
        .filter(|id| {
            let node = &model[*id];
            node.is_snapshot && node.parent == Some(old_origin) && node.properties.last_used <= cutoff
        })
        .collect();

    let mut moves = Vec::with_capacity(selected.len());
    for snap in selected {
        let Some(pos) = model[old_origin].children.iter().position(|c| *c == snap) else {
            error!(snapshot = %model[snap].name, parent = %model[old_origin].name, "snapshot_not_a_child");
            return Err(BemError::InternalConsistency(format!(
                "{:?} is not a child of {:?}",
                model[snap].name, model[old_origin].name
            )));
        };
        let (_, leaf) = split_snapshot_name(&model[snap].name);
        let new_name = snapshot_name(&model[new_origin].name, leaf.unwrap_or_default());
        if model.registry.contains(&new_name) {
            return Err(BemError::InternalConsistency(format!(
                "can't move {:?}: {new_name:?} already exists",
                model[snap].name
            )));
        }
        moves.push((pos, snap, new_name));
    }
    // Keep the old origin's child order on the new origin.
    moves.sort_by_key(|(pos, _, _)| *pos);

    for (_, snap, new_name) in &moves {
        let old_name = model[*snap].name.clone();
        model.registry_mut().rename(&old_name, new_name.clone(), *snap)?;
        model.node_mut(old_origin).children.retain(|c| c != snap);
        model.node_mut(new_origin).children.push(*snap);
        let node = model.node_mut(*snap);
        node.name.clone_from(new_name);
        node.parent = Some(new_origin);

        // Other clones of the moved snapshot follow the rename.
        let dependents: Vec<DatasetId> = model
            .iter()
            .filter(|id| model[*id].properties.origin == old_name)
            .collect();
        for id in dependents {
            model.node_mut(id).properties.origin.clone_from(new_name);
        }
        debug!(from = %old_name, to = %new_name, "snapshot_moved");
    }

    let base_renamed = model[base].name.clone();
    model.node_mut(old_origin).properties.origin = base_renamed;
    model.node_mut(new_origin).properties.origin = String::new();
    Ok(moves.into_iter().map(|(_, snap, _)| snap).collect())
}

/// Promote the clone `clone` on the backend and update the model to match.
///
/// If the model cannot be updated, the promotion is undone on the backend
/// by promoting the old origin back.
pub fn promote_clone(model: &mut DatasetModel, backend: &dyn Backend, clone: DatasetId) -> Result<()> {
    let origin = model[clone].properties.origin.clone();
    if origin.is_empty() {
        return Err(BemError::InvalidProperty {
            dataset: model[clone].name.clone(),
            property: "origin".to_owned(),
            detail: "dataset is not a clone".to_owned(),
        });
    }
    let base = model.find_by_name(&origin)?;
    let old_origin = model[base].parent.ok_or_else(|| {
        BemError::InternalConsistency(format!("snapshot {origin:?} has no parent"))
    })?;

    backend
        .promote(&model[clone].handle)
        .map_err(|e| BemError::Backend {
            dataset: model[clone].name.clone(),
            detail: e.to_string(),
        })?;

    match inverse_origin(model, old_origin, clone) {
        Ok(moved) => {
            info!(
                clone = %model[clone].name,
                old_origin = %model[old_origin].name,
                moved = moved.len(),
                "clone_promoted"
            );
            Ok(())
        }
        Err(err) => {
            error!(clone = %model[clone].name, error = %err, "promote_model_update_failed");
            if let Err(rollback) = backend.promote(&model[old_origin].handle) {
                error!(dataset = %model[old_origin].name, error = %rollback, "promote_rollback_failed");
            }
            Err(err)
        }
    }
}
