//! Building the model from a backend scan.

use crate::dataset::Dataset;
use crate::options::{ModelOptions, UserPropertyNames};
use crate::registry::DatasetRegistry;
use crate::resolve::{Target, load_properties};
use bem_backend::{Backend, ScannedDataset};
use bem_error::{BemError, Result};
use bem_types::{DatasetId, DatasetKind};
use tracing::{debug, trace};

pub(crate) struct Built {
    pub nodes: Vec<Dataset>,
    pub roots: Vec<DatasetId>,
    pub registry: DatasetRegistry,
}

pub(crate) struct Builder<'a> {
    backend: &'a dyn Backend,
    options: &'a ModelOptions,
    names: &'a UserPropertyNames,
    nodes: Vec<Dataset>,
    registry: DatasetRegistry,
}

impl<'a> Builder<'a> {
    pub fn new(
        backend: &'a dyn Backend,
        options: &'a ModelOptions,
        names: &'a UserPropertyNames,
    ) -> Self {
        Self {
            backend,
            options,
            names,
            nodes: Vec::new(),
            registry: DatasetRegistry::default(),
        }
    }

    /// Build every tree. Any failure discards everything built so far.
    pub fn build_all(mut self, trees: Vec<ScannedDataset>) -> Result<Built> {
        let mut roots = Vec::with_capacity(trees.len());
        for tree in trees {
            if let Some(id) = self.build(tree)? {
                roots.push(id);
            }
        }
        Ok(Built {
            nodes: self.nodes,
            roots,
            registry: self.registry,
        })
    }

    /// Children are built and registered before their parent.
    fn build(&mut self, scanned: ScannedDataset) -> Result<Option<DatasetId>> {
        let name = scanned.name().to_owned();
        if name.is_empty() {
            return Err(BemError::Scan {
                dataset: format!("handle {}", scanned.handle.id()),
                detail: "object has no name".to_owned(),
            });
        }
        if !scanned.kind.is_eligible() {
            if self.options.skip_ineligible {
                trace!(dataset = %name, kind = ?scanned.kind, "skip_ineligible");
                return Ok(None);
            }
            return Err(BemError::Scan {
                dataset: name,
                detail: format!("unsupported object type {:?}", scanned.kind),
            });
        }

        let ScannedDataset {
            handle,
            kind,
            properties,
            children,
        } = scanned;
        let is_snapshot = kind == DatasetKind::Snapshot;

        let mut child_ids = Vec::with_capacity(children.len());
        for child in children {
            if let Some(id) = self.build(child)? {
                child_ids.push(id);
            }
        }

        let (props, sources) = load_properties(
            self.backend,
            self.names,
            Target {
                name: &name,
                handle: &handle,
                is_snapshot,
                native: &properties,
            },
        )
        .map_err(|e| BemError::Scan {
            dataset: name.clone(),
            detail: e.to_string(),
        })?;

        let id = DatasetId(self.nodes.len());
        for child in &child_ids {
            self.nodes[child.0].parent = Some(id);
        }
        self.registry
            .insert(name.clone(), id)
            .map_err(|e| BemError::Scan {
                dataset: name.clone(),
                detail: e.to_string(),
            })?;
        debug!(dataset = %name, %id, children = child_ids.len(), "dataset_built");
        self.nodes.push(Dataset {
            name,
            is_snapshot,
            properties: props,
            sources,
            parent: None,
            children: child_ids,
            handle,
            native: properties,
        });
        Ok(Some(id))
    }
}
