#![forbid(unsafe_code)]

use anyhow::{Context, Result, bail};
use bem::{
    DatasetId, DatasetModel, DatasetSummary, PropertyKind, Provenance, check_no_clone,
    check_snapshot_hierarchy, set_property,
};
use bem_harness::{compare_models, load_model, load_scenario, run_scenario};
use serde::Serialize;
use std::env;
use std::path::Path;

#[derive(Debug, Serialize)]
struct CheckOutput {
    dataset: String,
    snapshot: String,
    snapshot_hierarchy: Outcome,
    no_clone: Outcome,
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "lowercase")]
enum Outcome {
    Ok,
    Violation(String),
}

impl Outcome {
    fn from_result(result: bem::Result<()>) -> Result<Self> {
        match result {
            Ok(()) => Ok(Self::Ok),
            Err(err) if err.is_integrity_violation() => Ok(Self::Violation(err.to_string())),
            Err(err) => Err(err.into()),
        }
    }
}

fn main() {
    if let Err(error) = run() {
        eprintln!("error: {error:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args: Vec<String> = env::args().skip(1).collect();
    let cmd = args.first().map(String::as_str);

    match cmd {
        Some("inspect") => {
            let Some(path) = args.get(1) else {
                bail!("inspect requires a scenario path");
            };
            let json = args[2..].iter().any(|arg| arg == "--json");
            inspect(Path::new(path), json)
        }
        Some("check") => {
            let (Some(path), Some(dataset), Some(snapshot)) = (args.get(1), args.get(2), args.get(3))
            else {
                bail!("check requires <scenario> <dataset> <snapshot>");
            };
            check(Path::new(path), dataset, snapshot)
        }
        Some("set") => {
            let [_, path, dataset, property, value, ..] = args.as_slice() else {
                bail!("set requires <scenario> <dataset> <property> <value>");
            };
            set(Path::new(path), dataset, property, value)
        }
        Some("run") => {
            let Some(path) = args.get(1) else {
                bail!("run requires a scenario path");
            };
            let scenario = load_scenario(Path::new(path))?;
            let report = run_scenario(&scenario)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Some("--help" | "-h" | "help") | None => {
            print_usage();
            Ok(())
        }
        Some(other) => {
            print_usage();
            bail!("unknown command: {other}")
        }
    }
}

fn print_usage() {
    println!("bem-cli\n");
    println!("USAGE:");
    println!("  bem-cli inspect <scenario> [--json]");
    println!("  bem-cli check <scenario> <dataset> <snapshot>");
    println!("  bem-cli set <scenario> <dataset> <property> <value>");
    println!("  bem-cli run <scenario>");
    println!();
    println!("PROPERTIES:");
    let names: Vec<&str> = PropertyKind::ALL.iter().map(|k| k.name()).collect();
    println!("  {}", names.join(", "));
}

fn inspect(path: &Path, json: bool) -> Result<()> {
    let (_backend, model) = load_model(path)?;

    if json {
        let trees: Vec<DatasetSummary> = model.roots().iter().map(|r| model.summary(*r)).collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&trees).context("serialize output")?
        );
        return Ok(());
    }

    println!("Dataset Model Inspector");
    println!("datasets: {}", model.len());
    for root in model.roots() {
        print_tree(&model, *root, 0);
    }
    Ok(())
}

fn print_tree(model: &DatasetModel, id: DatasetId, depth: usize) {
    let node = &model[id];
    let props = node.properties();
    let sources = node.sources();
    let indent = "  ".repeat(depth);
    if node.is_snapshot() {
        println!(
            "{indent}{} last_used={} mountpoint={:?} ({})",
            node.name(),
            props.last_used,
            props.mountpoint,
            sources.mountpoint
        );
    } else {
        let canmount = props.can_mount.map_or("-", |c| c.as_str());
        println!(
            "{indent}{} mountpoint={} ({}) canmount={canmount} bootfs={} ({}) mounted={}",
            node.name(),
            props.mountpoint,
            sources.mountpoint,
            props.boot_fs,
            sources.boot_fs,
            props.mounted
        );
        if !props.origin.is_empty() {
            println!("{indent}  origin: {}", props.origin);
        }
    }
    for child in node.children() {
        print_tree(model, *child, depth + 1);
    }
}

fn check(path: &Path, dataset: &str, snapshot: &str) -> Result<()> {
    let (backend, model) = load_model(path)?;
    let id = model.find_by_name(dataset)?;
    let output = CheckOutput {
        dataset: dataset.to_owned(),
        snapshot: snapshot.to_owned(),
        snapshot_hierarchy: Outcome::from_result(check_snapshot_hierarchy(&model, id, snapshot))?,
        no_clone: Outcome::from_result(check_no_clone(&model, &backend, id))?,
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&output).context("serialize output")?
    );
    if matches!(output.snapshot_hierarchy, Outcome::Violation(_))
        || matches!(output.no_clone, Outcome::Violation(_))
    {
        bail!("{dataset} is not safe to operate on");
    }
    Ok(())
}

/// Apply a local write, then verify a rescan of the backend agrees with the
/// updated model.
fn set(path: &Path, dataset: &str, property: &str, value: &str) -> Result<()> {
    let scenario = load_scenario(path)?;
    let backend = scenario.backend()?;
    let mut model = scenario.scan(&backend)?;
    let kind: PropertyKind = property
        .parse()
        .with_context(|| format!("unsupported property {property:?}"))?;
    let id = model.find_by_name(dataset)?;
    let updated = set_property(&mut model, &backend, id, kind, value, Provenance::Local)?;

    let rescanned = scenario.scan(&backend).context("rescan")?;
    compare_models(&model, &rescanned).context("model diverged from backend after write")?;

    println!("{dataset}: {kind}={value} (local)");
    for target in updated {
        let (value, provenance) = model.property(target, kind);
        println!("  {} {kind}={} ({provenance})", model[target].name(), value.encode());
    }
    Ok(())
}
