#![forbid(unsafe_code)]
//! In-memory model of the pool's dataset hierarchy.
//!
//! [`DatasetModel::scan`] mirrors every filesystem and snapshot reported by a
//! [`Backend`] into an arena of [`Dataset`] nodes, resolving the managed
//! properties and where each value came from. On top of the model:
//!
//! - [`set_property`] writes through to the backend and cascades the new
//!   value to descendants that inherit it.
//! - [`check_snapshot_hierarchy`] and [`check_no_clone`] gate destructive
//!   operations.
//! - [`promote_clone`] and [`inverse_origin`] keep the tree in step with a
//!   clone promotion.
//!
//! Read-only operations take `&DatasetModel` and can run concurrently;
//! mutations take `&mut DatasetModel`. [`SharedModel`] wraps a model for
//! callers that need both from several threads.

mod builder;
pub mod codec;
pub mod dataset;
pub mod integrity;
pub mod mutate;
pub mod options;
pub mod promote;
pub mod registry;
pub mod resolve;
pub mod shared;

pub use bem_backend::{Backend, BackendError, DatasetHandle, MemBackend, RawProperty};
pub use bem_error::{BemError, Result};
pub use bem_types::{CanMount, DatasetId, DatasetKind, NativeProp, PropertyKind, Provenance};
pub use codec::PropertyValue;
pub use dataset::{Dataset, DatasetProperties, DatasetSummary, PropertySources};
pub use integrity::{check_no_clone, check_snapshot_hierarchy, check_snapshot_hierarchy_integrity};
pub use mutate::{freeze_mount_properties, set_property, set_property_value};
pub use options::{ModelOptions, UserPropertyNames};
pub use promote::{inverse_origin, promote_clone};
pub use registry::DatasetRegistry;
pub use resolve::resolve_user_property;
pub use shared::SharedModel;

use bem_types::split_snapshot_name;
use builder::Builder;
use std::ops::Index;
use tracing::{debug, error, info};

/// Arena of datasets plus the name registry.
///
/// Nodes are never removed: promotion renames and re-parents snapshots in
/// place, so a [`DatasetId`] stays valid for the life of the model.
#[derive(Debug)]
pub struct DatasetModel {
    nodes: Vec<Dataset>,
    roots: Vec<DatasetId>,
    registry: DatasetRegistry,
    names: UserPropertyNames,
}

impl DatasetModel {
    /// Scan every pool on `backend` and build the model.
    ///
    /// All or nothing: any failure aborts the whole construction.
    pub fn scan(backend: &dyn Backend, options: &ModelOptions) -> Result<Self> {
        options.validate()?;
        let names = options.user_property_names();
        let trees = backend.scan().map_err(|e| BemError::Scan {
            dataset: "all pools".to_owned(),
            detail: e.to_string(),
        })?;
        let built = Builder::new(backend, options, &names).build_all(trees)?;
        info!(
            datasets = built.nodes.len(),
            pools = built.roots.len(),
            "dataset_model_scanned"
        );
        Ok(Self {
            nodes: built.nodes,
            roots: built.roots,
            registry: built.registry,
            names,
        })
    }

    /// Top-level dataset of each pool, in scan order.
    #[must_use]
    pub fn roots(&self) -> &[DatasetId] {
        &self.roots
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    #[must_use]
    pub fn get(&self, id: DatasetId) -> Option<&Dataset> {
        self.nodes.get(id.0)
    }

    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<DatasetId> {
        self.registry.get(name)
    }

    pub fn find_by_name(&self, name: &str) -> Result<DatasetId> {
        self.lookup(name)
            .ok_or_else(|| BemError::DatasetNotFound(name.to_owned()))
    }

    #[must_use]
    pub fn parent_of(&self, id: DatasetId) -> Option<DatasetId> {
        self[id].parent
    }

    #[must_use]
    pub fn children_of(&self, id: DatasetId) -> &[DatasetId] {
        &self[id].children
    }

    /// Snapshots directly owned by `id`.
    pub fn snapshots_of(&self, id: DatasetId) -> impl Iterator<Item = DatasetId> + '_ {
        self[id]
            .children
            .iter()
            .copied()
            .filter(|c| self[*c].is_snapshot)
    }

    /// Pre-order walk of the subtree rooted at `id`, `id` first.
    #[must_use]
    pub fn walk(&self, id: DatasetId) -> Walk<'_> {
        Walk {
            model: self,
            stack: vec![id],
        }
    }

    /// Every dataset reachable from a root, pool by pool.
    pub fn iter(&self) -> impl Iterator<Item = DatasetId> + '_ {
        self.roots.iter().flat_map(|root| self.walk(*root))
    }

    #[must_use]
    pub fn property(&self, id: DatasetId, kind: PropertyKind) -> (PropertyValue, Provenance) {
        self[id].property(kind)
    }

    #[must_use]
    pub fn registry(&self) -> &DatasetRegistry {
        &self.registry
    }

    #[must_use]
    pub fn user_property_names(&self) -> &UserPropertyNames {
        &self.names
    }

    #[must_use]
    pub fn summary(&self, id: DatasetId) -> DatasetSummary {
        let node = &self[id];
        DatasetSummary {
            name: node.name.clone(),
            is_snapshot: node.is_snapshot,
            properties: node.properties.clone(),
            sources: node.sources,
            children: node.children.iter().map(|c| self.summary(*c)).collect(),
        }
    }

    /// Verify that the tree, the parent links and the registry agree, and
    /// that every clone's origin is a registered name.
    pub fn check_registry(&self) -> Result<()> {
        let fail = |msg: String| {
            error!(detail = %msg, "registry_inconsistent");
            Err(BemError::InternalConsistency(msg))
        };
        let mut reachable = 0usize;
        for root in &self.roots {
            if self[*root].parent.is_some() {
                return fail(format!("root {:?} has a parent", self[*root].name));
            }
            for id in self.walk(*root) {
                reachable += 1;
                let node = &self[id];
                match self.registry.get(&node.name) {
                    Some(registered) if registered == id => {}
                    other => {
                        return fail(format!(
                            "{:?} is {id} in the tree but {other:?} in the registry",
                            node.name
                        ));
                    }
                }
                let origin = &node.properties.origin;
                if !origin.is_empty() && !self.registry.contains(origin) {
                    return fail(format!(
                        "{:?} has origin {origin:?}, which is not registered",
                        node.name
                    ));
                }
                if node.is_snapshot && !node.children.is_empty() {
                    return fail(format!("snapshot {:?} has children", node.name));
                }
                for child in &node.children {
                    let child_node = &self[*child];
                    if child_node.parent != Some(id) {
                        return fail(format!(
                            "{:?} is listed under {:?} but points to {:?}",
                            child_node.name, node.name, child_node.parent
                        ));
                    }
                    if child_node.is_snapshot {
                        let (base, leaf) = split_snapshot_name(&child_node.name);
                        if base != node.name || leaf.is_none() {
                            return fail(format!(
                                "snapshot {:?} does not belong to {:?}",
                                child_node.name, node.name
                            ));
                        }
                    }
                }
            }
        }
        if reachable != self.registry.len() || reachable != self.nodes.len() {
            return fail(format!(
                "{reachable} reachable datasets, {} registered, {} allocated",
                self.registry.len(),
                self.nodes.len()
            ));
        }
        debug!(datasets = reachable, "registry_consistent");
        Ok(())
    }

    pub(crate) fn node_mut(&mut self, id: DatasetId) -> &mut Dataset {
        &mut self.nodes[id.0]
    }

    pub(crate) fn registry_mut(&mut self) -> &mut DatasetRegistry {
        &mut self.registry
    }
}

impl Index<DatasetId> for DatasetModel {
    type Output = Dataset;

    /// Panics if `id` was not issued by this model.
    fn index(&self, id: DatasetId) -> &Dataset {
        &self.nodes[id.0]
    }
}

/// Pre-order iterator returned by [`DatasetModel::walk`].
pub struct Walk<'a> {
    model: &'a DatasetModel,
    stack: Vec<DatasetId>,
}

impl Iterator for Walk<'_> {
    type Item = DatasetId;

    fn next(&mut self) -> Option<DatasetId> {
        let id = self.stack.pop()?;
        self.stack
            .extend(self.model[id].children.iter().rev().copied());
        Some(id)
    }
}
