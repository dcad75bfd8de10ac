//! Layer coalescing
//!
//! Reduces the ordered list of per-layer artifacts into one image-level
//! inventory. The reduction is deterministic: identical ordered artifacts
//! produce a bit-identical report.

use std::collections::BTreeMap;

use stratum_core::{
    Digest, Distribution, Environment, IndexReport, IndexState, Package, Repository,
};

use crate::scan::{LayerArtifacts, Whiteout};

/// Package state while walking the layer stack
struct PkgState {
    package: Package,
    introduced_in: Digest,
    layer_index: usize,
    scanner: String,
}

/// Reduces ordered per-layer artifacts into an [`IndexReport`]
#[derive(Debug, Default)]
pub struct Coalescer;

impl Coalescer {
    pub fn new() -> Self {
        Self
    }

    /// Walk the layers oldest-first and build the final inventory
    pub fn coalesce(&self, manifest_hash: Digest, layers: &[LayerArtifacts]) -> IndexReport {
        // working map: package-database path -> identity -> state
        let mut dbs: BTreeMap<String, BTreeMap<String, PkgState>> = BTreeMap::new();
        // first observation of each distribution identity
        let mut dist_seen: BTreeMap<String, (usize, Distribution)> = BTreeMap::new();
        // repository union, plus per-layer attribution for environments
        let mut repo_seen: BTreeMap<String, Repository> = BTreeMap::new();
        let mut layer_repos: Vec<Vec<(String, String)>> = Vec::with_capacity(layers.len());
        let mut errors: Vec<String> = Vec::new();

        for (idx, art) in layers.iter().enumerate() {
            // 1. whiteouts delete lower-layer state before this layer's own
            //    artifacts apply
            for wh in &art.whiteouts {
                match wh {
                    Whiteout::Path(p) => {
                        dbs.remove(p);
                        let prefix = format!("{}/", p);
                        dbs.retain(|db, _| !db.starts_with(&prefix));
                    }
                    Whiteout::Opaque(dir) => {
                        let prefix = format!("{}/", dir);
                        dbs.retain(|db, _| !db.starts_with(&prefix));
                    }
                }
            }

            // 2. a layer that writes a package database replaces that
            //    database's entire package set; identical packages keep
            //    their original introduced-in layer
            let mut by_db: BTreeMap<String, Vec<(&str, &Package)>> = BTreeMap::new();
            for (scanner, pkgs) in &art.packages {
                for p in pkgs {
                    by_db
                        .entry(p.package_db.clone())
                        .or_default()
                        .push((scanner.as_str(), p));
                }
            }
            for (db, pkgs) in by_db {
                let old = dbs.remove(&db).unwrap_or_default();
                let mut fresh: BTreeMap<String, PkgState> = BTreeMap::new();
                for (scanner, p) in pkgs {
                    let key = p.identity_key();
                    if fresh.contains_key(&key) {
                        continue;
                    }
                    let state = match old.get(&key) {
                        Some(prev) => PkgState {
                            package: p.clone(),
                            introduced_in: prev.introduced_in.clone(),
                            layer_index: prev.layer_index,
                            scanner: prev.scanner.clone(),
                        },
                        None => PkgState {
                            package: p.clone(),
                            introduced_in: art.layer.clone(),
                            layer_index: idx,
                            scanner: scanner.to_string(),
                        },
                    };
                    fresh.insert(key, state);
                }
                dbs.insert(db, fresh);
            }

            // 3. distributions carry forward; the report keeps the earliest
            //    observation of each identity
            for (_scanner, dist) in &art.distributions {
                dist_seen
                    .entry(dist.identity_key())
                    .or_insert_with(|| (idx, dist.clone()));
            }

            // 4. repositories union across layers
            let mut here = Vec::new();
            for (scanner, repos) in &art.repositories {
                for r in repos {
                    let key = r.identity_key();
                    repo_seen.entry(key.clone()).or_insert_with(|| r.clone());
                    here.push((ecosystem_prefix(scanner).to_string(), key));
                }
            }
            layer_repos.push(here);

            for e in &art.errors {
                errors.push(format!("layer {}: scanner {}: {}", art.layer, e.scanner, e.message));
            }
        }

        // assemble the report with stable ids
        let mut report = IndexReport::new(manifest_hash);
        report.state = IndexState::IndexFinished;
        report.success = true;
        if !errors.is_empty() {
            report.err = Some(errors.join("; "));
        }

        let mut dist_obs: Vec<(usize, String)> = Vec::new();
        {
            let mut ordered: Vec<_> = dist_seen.iter().collect();
            ordered.sort_by_key(|(key, (idx, _))| (*idx, (*key).clone()));
            for (n, (_key, (idx, dist))) in ordered.into_iter().enumerate() {
                let id = (n + 1).to_string();
                report.distributions.insert(id.clone(), dist.clone());
                dist_obs.push((*idx, id));
            }
        }

        let mut repo_ids: BTreeMap<String, String> = BTreeMap::new();
        for (n, (key, repo)) in repo_seen.iter().enumerate() {
            let id = (n + 1).to_string();
            report.repositories.insert(id.clone(), repo.clone());
            repo_ids.insert(key.clone(), id.clone());
        }

        let mut next_pkg = 1usize;
        for states in dbs.values() {
            for state in states.values() {
                let id = next_pkg.to_string();
                next_pkg += 1;
                let mut pkg = state.package.clone();
                pkg.id = id.clone();

                let distribution_id = effective_distribution(&dist_obs, state.layer_index);
                let eco = ecosystem_prefix(&state.scanner);
                let repository_ids = layer_repos
                    .get(state.layer_index)
                    .map(|repos| {
                        repos
                            .iter()
                            .filter(|(prefix, _)| prefix == eco)
                            .filter_map(|(_, key)| repo_ids.get(key).cloned())
                            .collect()
                    })
                    .unwrap_or_default();

                report.environments.insert(
                    id.clone(),
                    vec![Environment {
                        package_db: pkg.package_db.clone(),
                        introduced_in: state.introduced_in.clone(),
                        distribution_id,
                        repository_ids,
                    }],
                );
                report.packages.insert(id, pkg);
            }
        }
        report
    }
}

/// The distribution in effect for a layer: the latest observation at or
/// before it, else the earliest one at all
fn effective_distribution(obs: &[(usize, String)], layer_index: usize) -> Option<String> {
    obs.iter()
        .filter(|(idx, _)| *idx <= layer_index)
        .max_by_key(|(idx, _)| *idx)
        .or_else(|| obs.iter().min_by_key(|(idx, _)| *idx))
        .map(|(_, id)| id.clone())
}

fn ecosystem_prefix(scanner: &str) -> &str {
    scanner.split('-').next().unwrap_or(scanner)
}
