use std::collections::{HashMap, HashSet, VecDeque};

use anyhow::{Context, Result};
use cargo_metadata::{DependencyKind, MetadataCommand, PackageId};

/// Each package and the crates it must never reach through normal
/// (non-dev) dependency edges.
const RULES: &[(&str, &[&str])] = &[
    (
        "medrec-normalizer",
        &[
            "medrec-chain",
            "medrec-session",
            "medrec-ledger",
            "medrec-upload",
            "reqwest",
        ],
    ),
    ("medrec-contracts", &["medrec-chain", "reqwest", "tokio"]),
    (
        "medrec-upload",
        &["medrec-chain", "medrec-session", "medrec-ledger"],
    ),
];

fn main() -> Result<()> {
    let metadata = MetadataCommand::new()
        .exec()
        .context("failed to run `cargo metadata`")?;

    let resolve = metadata
        .resolve
        .as_ref()
        .context("`cargo metadata` did not include a resolved dependency graph")?;

    let id_to_name: HashMap<_, _> = metadata
        .packages
        .iter()
        .map(|p| (p.id.clone(), p.name.as_str()))
        .collect();

    let adjacency: HashMap<_, Vec<PackageId>> = resolve
        .nodes
        .iter()
        .map(|node| {
            let deps = node
                .deps
                .iter()
                .filter(|dep| {
                    dep.dep_kinds
                        .iter()
                        .any(|info| info.kind == DependencyKind::Normal)
                })
                .map(|dep| dep.pkg.clone())
                .collect();
            (node.id.clone(), deps)
        })
        .collect();

    let mut failed = false;
    for (package_name, forbidden) in RULES {
        let package = metadata
            .packages
            .iter()
            .find(|p| p.name == *package_name)
            .with_context(|| format!("package `{}` not found in workspace", package_name))?;

        let violations = reachable_forbidden(&package.id, forbidden, &adjacency, &id_to_name);
        if violations.is_empty() {
            println!(
                "OK: `{}` has no dependency edge to {}",
                package_name,
                forbidden.join(", ")
            );
        } else {
            eprintln!(
                "FAIL: `{}` depends on forbidden crate(s): {}",
                package_name,
                violations.join(", ")
            );
            failed = true;
        }
    }

    if failed {
        std::process::exit(1);
    }
    Ok(())
}

fn reachable_forbidden(
    root: &PackageId,
    forbidden: &[&str],
    adjacency: &HashMap<PackageId, Vec<PackageId>>,
    id_to_name: &HashMap<PackageId, &str>,
) -> Vec<String> {
    let mut visited = HashSet::from([root.clone()]);
    let mut queue = VecDeque::from([root.clone()]);
    let mut violations = Vec::new();

    while let Some(current) = queue.pop_front() {
        let Some(deps) = adjacency.get(&current) else {
            continue;
        };

        for dep in deps {
            if !visited.insert(dep.clone()) {
                continue;
            }

            if let Some(name) = id_to_name.get(dep)
                && forbidden.contains(name)
            {
                violations.push((*name).to_string());
            }

            queue.push_back(dep.clone());
        }
    }

    violations.sort();
    violations.dedup();
    violations
}
