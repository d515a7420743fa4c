#![forbid(unsafe_code)]
//! Scenario fixtures for the dataset model.
//!
//! A scenario is a JSON file describing an in-memory pool, optional armed
//! faults, and an ordered list of steps: property expectations, integrity
//! checks, mutations, and rescan comparisons. [`run_scenario`] replays it
//! against a freshly scanned model.

use anyhow::{Context, Result, bail, ensure};
use bem_backend::{Fault, MemBackend, MemFixture};
use bem_core::{
    DatasetModel, ModelOptions, check_no_clone, check_snapshot_hierarchy,
    promote_clone, set_property,
};
use bem_types::{PropertyKind, Provenance};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Scenario {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub options: ModelOptions,
    pub pool: MemFixture,
    #[serde(default)]
    pub faults: Vec<Fault>,
    #[serde(default)]
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case", deny_unknown_fields)]
pub enum Step {
    /// Expect a property's encoded value and provenance.
    Expect {
        dataset: String,
        property: PropertyKind,
        value: String,
        provenance: Provenance,
    },
    SetProperty {
        dataset: String,
        property: PropertyKind,
        value: String,
        provenance: Provenance,
        /// Names expected to be updated by the cascade, in order.
        #[serde(default)]
        cascaded: Option<Vec<String>>,
    },
    SnapshotHierarchy {
        dataset: String,
        snapshot: String,
        ok: bool,
    },
    NoClone {
        dataset: String,
        ok: bool,
    },
    Promote {
        dataset: String,
    },
    /// Rescan the backend and compare it with the current model.
    RescanMatches,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScenarioReport {
    pub description: String,
    pub datasets: usize,
    pub steps_run: usize,
}

pub fn load_scenario(path: &Path) -> Result<Scenario> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read scenario {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("invalid scenario json {}", path.display()))
}

impl Scenario {
    /// Build the backend described by this scenario, with its faults armed.
    pub fn backend(&self) -> Result<MemBackend> {
        let backend =
            MemBackend::from_fixture(self.pool.clone()).context("invalid pool description")?;
        for fault in &self.faults {
            backend.inject(fault.clone());
        }
        Ok(backend)
    }

    pub fn scan(&self, backend: &MemBackend) -> Result<DatasetModel> {
        DatasetModel::scan(backend, &self.options).context("failed to scan scenario pool")
    }
}

/// Load a scenario file and scan it.
pub fn load_model(path: &Path) -> Result<(MemBackend, DatasetModel)> {
    let scenario = load_scenario(path)?;
    let backend = scenario.backend()?;
    let model = scenario.scan(&backend)?;
    Ok((backend, model))
}

pub fn run_scenario(scenario: &Scenario) -> Result<ScenarioReport> {
    let backend = scenario.backend()?;
    let mut model = scenario.scan(&backend)?;
    for (index, step) in scenario.steps.iter().enumerate() {
        run_step(&mut model, &backend, scenario, step)
            .with_context(|| format!("step #{index} ({step:?})"))?;
    }
    Ok(ScenarioReport {
        description: scenario.description.clone(),
        datasets: model.len(),
        steps_run: scenario.steps.len(),
    })
}

fn run_step(
    model: &mut DatasetModel,
    backend: &MemBackend,
    scenario: &Scenario,
    step: &Step,
) -> Result<()> {
    match step {
        Step::Expect {
            dataset,
            property,
            value,
            provenance,
        } => {
            let id = model.find_by_name(dataset)?;
            let (actual, actual_provenance) = model.property(id, *property);
            ensure!(
                actual.encode() == *value && actual_provenance == *provenance,
                "{dataset} {property}: expected {value:?} ({provenance}), got {:?} ({actual_provenance})",
                actual.encode()
            );
        }
        Step::SetProperty {
            dataset,
            property,
            value,
            provenance,
            cascaded,
        } => {
            let id = model.find_by_name(dataset)?;
            let updated = set_property(model, backend, id, *property, value, *provenance)?;
            if let Some(expected) = cascaded {
                let names: Vec<&str> = updated.iter().map(|u| model[*u].name()).collect();
                ensure!(
                    names == expected.iter().map(String::as_str).collect::<Vec<_>>(),
                    "cascade from {dataset}: expected {expected:?}, got {names:?}"
                );
            }
        }
        Step::SnapshotHierarchy { dataset, snapshot, ok } => {
            let id = model.find_by_name(dataset)?;
            expect_outcome(check_snapshot_hierarchy(model, id, snapshot), *ok)?;
        }
        Step::NoClone { dataset, ok } => {
            let id = model.find_by_name(dataset)?;
            expect_outcome(check_no_clone(model, backend, id), *ok)?;
        }
        Step::Promote { dataset } => {
            let id = model.find_by_name(dataset)?;
            promote_clone(model, backend, id)?;
        }
        Step::RescanMatches => {
            let rescanned = scenario.scan(backend)?;
            compare_models(model, &rescanned)?;
        }
    }
    Ok(())
}

fn expect_outcome(result: bem_core::Result<()>, ok: bool) -> Result<()> {
    match (result, ok) {
        (Ok(()), true) => Ok(()),
        (Err(err), false) if err.is_integrity_violation() => Ok(()),
        (Ok(()), false) => bail!("expected an integrity violation, check passed"),
        (Err(err), _) => Err(err.into()),
    }
}

/// Fail unless both models hold the same datasets with the same properties
/// and provenance.
pub fn compare_models(model: &DatasetModel, other: &DatasetModel) -> Result<()> {
    model.check_registry()?;
    other.check_registry()?;
    ensure!(
        model.len() == other.len(),
        "model has {} datasets, rescan has {}",
        model.len(),
        other.len()
    );
    for id in model.iter() {
        let node = &model[id];
        let other_id = other
            .lookup(node.name())
            .with_context(|| format!("{} missing from rescan", node.name()))?;
        let other_node = &other[other_id];
        for kind in PropertyKind::ALL {
            let here = node.property(kind);
            let there = other_node.property(kind);
            ensure!(
                here == there,
                "{} {kind}: model has {here:?}, rescan has {there:?}",
                node.name()
            );
        }
        ensure!(
            node.properties().origin == other_node.properties().origin,
            "{} origin: model has {:?}, rescan has {:?}",
            node.name(),
            node.properties().origin,
            other_node.properties().origin
        );
        let parent = |m: &DatasetModel, p: Option<bem_types::DatasetId>| {
            p.map(|p| m[p].name().to_owned())
        };
        ensure!(
            parent(model, node.parent()) == parent(other, other_node.parent()),
            "{} has a different parent after rescan",
            node.name()
        );
    }
    Ok(())
}
