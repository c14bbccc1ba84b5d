// src/plan/resolver.rs

//! Feature-cluster dependency resolution
//!
//! The resolver runs two interleaved marking passes over the cluster graph.
//! `mark_plus` requests a feature and walks its dependencies; `mark_minus`
//! schedules a removal and re-expands everything the removed installation
//! provided, so feature additions, removals and newly appearing default
//! features all converge on one pair of remove/install graphs. Both marks
//! are monotone, which bounds the recursion on cyclic feature graphs.

use crate::error::{Error, Result};
use crate::graph::Randomizer;
use crate::plan::cluster::{Cluster, ClusterGraph, ClusterInstalled, GraphPlan};
use crate::plan::{
    AnyAction, ExportPlanAction, ExportPlanType, InstallPlanAction, RemovePlanAction,
    RemovePlanType, RequestType,
};
use crate::ports::PortProvider;
use crate::spec::{FeatureSpec, PackageSpec};
use crate::status::StatusDb;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tracing::warn;

/// Options for plan serialization
#[derive(Default)]
pub struct CreateInstallPlanOptions<'a> {
    /// Shuffles equal-rank siblings during the topological sorts; used by
    /// deterministic-seed tests to check order-independence.
    pub randomizer: Option<&'a mut dyn Randomizer>,
}

/// Reborrows the randomizer with a fresh, shorter lifetime so it can be
/// passed to multiple calls without moving it out of `options`.
fn reborrow_randomizer<'b>(
    randomizer: &'b mut Option<&mut dyn Randomizer>,
) -> Option<&'b mut dyn Randomizer> {
    match randomizer {
        Some(r) => Some(&mut **r),
        None => None,
    }
}

/// Outcome of a `mark_plus` propagation step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MarkPlus {
    Success,
    FeatureNotFound,
}

/// Compute the actions required to reach the state described by `specs`
///
/// For every requested feature spec the resolver marks the corresponding
/// cluster, interleaving removals and rebuilds where the installed state no
/// longer matches the requested one, then serializes the graphs into an
/// ordered action list: removals first (dependents before dependencies),
/// then installs (dependencies before dependents).
pub fn create_feature_install_plan(
    provider: &dyn PortProvider,
    specs: &[FeatureSpec],
    status_db: &StatusDb,
    options: CreateInstallPlanOptions<'_>,
) -> Result<Vec<AnyAction>> {
    // When "core" is explicitly listed, default features are suppressed for
    // that package name.
    let prevent_default_features: HashSet<String> = specs
        .iter()
        .filter(|spec| spec.feature() == "core")
        .map(|spec| spec.name().to_string())
        .collect();

    let mut pgraph = PackageGraph::new(provider, status_db)?;
    for spec in specs {
        // Ignore the automatically generated "" references for suppressed names.
        if spec.feature().is_empty() && prevent_default_features.contains(spec.name()) {
            continue;
        }
        pgraph.install(spec, &prevent_default_features)?;
    }

    pgraph.serialize(options)
}

/// The resolver state for one planning run
struct PackageGraph<'a> {
    graph: ClusterGraph<'a>,
    plan: GraphPlan,
}

impl<'a> PackageGraph<'a> {
    /// Seed the cluster graph from the status database
    ///
    /// Every installed view gets its cluster populated, then a second pass
    /// records the reverse Build-Depends edges used by `mark_minus`. An
    /// installed package whose dependency has no installed cluster means
    /// the database is corrupted.
    fn new(provider: &'a dyn PortProvider, status_db: &StatusDb) -> Result<Self> {
        let mut graph = ClusterGraph::new(provider);

        for ipv in status_db.iter() {
            let cluster = graph.get(ipv.spec())?;
            cluster.transient_uninstalled = false;
            cluster.installed = Some(ClusterInstalled::new(ipv.clone()));
        }

        for ipv in status_db.iter() {
            for dep in ipv.dependencies() {
                let cluster = graph.get(&dep)?;
                let installed =
                    cluster
                        .installed
                        .as_mut()
                        .ok_or_else(|| Error::DatabaseCorrupted {
                            package: ipv.spec().to_string(),
                            dependency: dep.to_string(),
                        })?;
                installed.remove_edges.insert(ipv.spec().clone());
            }
        }

        Ok(Self {
            graph,
            plan: GraphPlan::default(),
        })
    }

    /// Mark one user-requested feature spec for installation
    fn install(&mut self, spec: &FeatureSpec, prevent: &HashSet<String>) -> Result<()> {
        self.graph.get(spec.spec())?.request_type = RequestType::UserRequested;

        match self.mark_plus(spec.feature(), spec.spec(), prevent)? {
            MarkPlus::Success => {}
            MarkPlus::FeatureNotFound => {
                return Err(Error::FeatureNotFound {
                    package: spec.name().to_string(),
                    feature: spec.feature().to_string(),
                });
            }
        }

        self.plan.install_graph.add_vertex(spec.spec().clone());
        Ok(())
    }

    fn mark_plus(
        &mut self,
        feature: &str,
        spec: &PackageSpec,
        prevent: &HashSet<String>,
    ) -> Result<MarkPlus> {
        enum Step {
            AlreadyMarked,
            ExpandDefaults(Vec<String>),
            ExpandAll(Vec<String>),
            AlreadyInstalled,
            Follow,
        }

        let step = {
            let cluster = self.graph.get(spec)?;
            let plus = cluster.plus.entry(feature.to_string()).or_insert(false);
            if *plus {
                Step::AlreadyMarked
            } else {
                *plus = true;
                let source = cluster
                    .source
                    .as_ref()
                    .ok_or_else(|| Error::DefinitionMissing(spec.name().to_string()))?;
                if feature.is_empty() {
                    // An exact reference to the default set; suppression does
                    // not apply here.
                    Step::ExpandDefaults(source.scf.core_paragraph.default_features.clone())
                } else if feature == "*" {
                    Step::ExpandAll(
                        source
                            .scf
                            .feature_paragraphs
                            .iter()
                            .map(|f| f.name.clone())
                            .collect(),
                    )
                } else {
                    match cluster.installed.as_ref() {
                        Some(installed) if installed.original_features.contains(feature) => {
                            // The installed build only still matches if no
                            // default feature appeared since it was recorded;
                            // a stale default set forces the rebuild path so
                            // mark_minus can pick the new defaults up.
                            let recorded = &installed.ipv.core.default_features;
                            let defaults_stale = source
                                .scf
                                .core_paragraph
                                .default_features
                                .iter()
                                .any(|df| !recorded.contains(df));
                            if defaults_stale {
                                Step::Follow
                            } else {
                                Step::AlreadyInstalled
                            }
                        }
                        _ => Step::Follow,
                    }
                }
            }
        };

        match step {
            Step::AlreadyMarked | Step::AlreadyInstalled => Ok(MarkPlus::Success),
            Step::ExpandDefaults(defaults) => {
                for default_feature in defaults {
                    match self.mark_plus(&default_feature, spec, prevent)? {
                        MarkPlus::Success => {}
                        not_found => return Ok(not_found),
                    }
                }
                // "core" is always required.
                self.mark_plus("core", spec, prevent)
            }
            Step::ExpandAll(features) => {
                for feature_name in features {
                    if self.mark_plus(&feature_name, spec, prevent)? == MarkPlus::FeatureNotFound {
                        return Err(Error::FeatureNotFound {
                            package: spec.name().to_string(),
                            feature: feature_name,
                        });
                    }
                }
                self.mark_plus("core", spec, prevent)
            }
            Step::Follow => {
                // The feature was or will be uninstalled, so a rebuild is due.
                self.mark_minus(spec, prevent)?;
                self.follow_plus_dependencies(feature, spec, prevent)
            }
        }
    }

    /// Record `feature` for installation and propagate along its build edges
    ///
    /// Unlike `mark_plus`, this ignores the "already installed" shortcut;
    /// `mark_minus` relies on that to re-expand original features.
    fn follow_plus_dependencies(
        &mut self,
        feature: &str,
        spec: &PackageSpec,
        prevent: &HashSet<String>,
    ) -> Result<MarkPlus> {
        let deps = {
            let cluster = self.graph.get(spec)?;
            cluster
                .source
                .as_ref()
                .and_then(|source| source.build_edges.get(feature).cloned())
        };
        // The feature exists in neither the installed package nor the source.
        let Some(deps) = deps else {
            return Ok(MarkPlus::FeatureNotFound);
        };

        self.mark_minus(spec, prevent)?;
        self.plan.install_graph.add_vertex(spec.clone());

        let was_installed = {
            let cluster = self.graph.get(spec)?;
            cluster.to_install_features.insert(feature.to_string());
            cluster.installed.is_some()
        };

        if feature != "core" {
            // All features implicitly depend on core, which always exists.
            if self.mark_plus("core", spec, prevent)? == MarkPlus::FeatureNotFound {
                return Err(Error::internal(format!(
                    "core feature missing while marking {}",
                    spec
                )));
            }
        }

        if !was_installed && !prevent.contains(spec.name()) {
            // A package entering the installed set pulls in its defaults
            // unless the user suppressed them.
            if self.mark_plus("", spec, prevent)? == MarkPlus::FeatureNotFound {
                return Err(Error::DefaultFeaturesUnsatisfiable(spec.to_string()));
            }
        }

        for dep in deps {
            if self.mark_plus(dep.feature(), dep.spec(), prevent)? == MarkPlus::FeatureNotFound {
                return Err(Error::UnsatisfiableDependency {
                    dependency: dep.to_string(),
                    dependent: FeatureSpec::new(spec.clone(), feature).to_string(),
                });
            }
            if dep.spec() != spec {
                self.plan.install_graph.add_edge(spec, dep.spec());
            }
        }

        Ok(MarkPlus::Success)
    }

    /// Schedule a cluster's current installation for removal
    ///
    /// Removal cascades through the reverse dependents, then everything the
    /// old installation provided is re-expanded against the new source:
    /// original features (drift is a warning, not an error) and any default
    /// features the new source added.
    fn mark_minus(&mut self, spec: &PackageSpec, prevent: &HashSet<String>) -> Result<()> {
        let installed_state = {
            let cluster = self.graph.get(spec)?;
            if cluster.minus {
                return Ok(());
            }
            cluster.minus = true;
            cluster.transient_uninstalled = true;

            if cluster.source.is_none() {
                return Err(Error::SourceMissing(spec.to_string()));
            }

            cluster.installed.as_ref().map(|installed| {
                (
                    installed.remove_edges.iter().cloned().collect::<Vec<_>>(),
                    installed
                        .original_features
                        .iter()
                        .cloned()
                        .collect::<Vec<_>>(),
                    installed.ipv.core.default_features.clone(),
                )
            })
        };

        let Some((remove_edges, original_features, previous_defaults)) = installed_state else {
            return Ok(());
        };

        self.plan.remove_graph.add_vertex(spec.clone());
        for dependent in remove_edges {
            self.plan.remove_graph.add_edge(spec, &dependent);
            self.mark_minus(&dependent, prevent)?;
        }

        // Reinstall every original feature, bypassing the "already installed"
        // shortcut in mark_plus. Features that no longer exist in the new
        // source only warn; the user's old feature set may have drifted.
        for feature in original_features {
            if self.follow_plus_dependencies(&feature, spec, prevent)?
                == MarkPlus::FeatureNotFound
            {
                warn!(
                    "could not reinstall feature {}",
                    FeatureSpec::new(spec.clone(), feature)
                );
            }
        }

        // Pick up default features added since the recorded installation.
        let new_defaults = {
            let cluster = self.graph.get(spec)?;
            cluster
                .source
                .as_ref()
                .map(|source| source.scf.core_paragraph.default_features.clone())
                .unwrap_or_default()
        };
        for default_feature in new_defaults {
            if previous_defaults.contains(&default_feature) {
                continue;
            }
            if self.mark_plus(&default_feature, spec, prevent)? == MarkPlus::FeatureNotFound {
                warn!(
                    "could not install new default feature {}",
                    FeatureSpec::new(spec.clone(), default_feature)
                );
            }
        }

        Ok(())
    }

    /// Serialize the graphs into the ordered action list
    fn serialize(self, mut options: CreateInstallPlanOptions<'_>) -> Result<Vec<AnyAction>> {
        let remove_order = self.plan.remove_graph.topological_sort(
            &self.plan.remove_graph.vertex_list(),
            reborrow_randomizer(&mut options.randomizer),
        )?;
        let install_order = self.plan.install_graph.topological_sort(
            &self.plan.install_graph.vertex_list(),
            reborrow_randomizer(&mut options.randomizer),
        )?;

        let mut plan = Vec::new();

        for spec in remove_order {
            let cluster = self.cluster(&spec)?;
            plan.push(AnyAction::Remove(RemovePlanAction {
                spec,
                plan_type: RemovePlanType::Remove,
                request_type: cluster.request_type,
            }));
        }

        for spec in install_order {
            let cluster = self.cluster(&spec)?;
            if cluster.transient_uninstalled {
                let source = cluster
                    .source
                    .as_ref()
                    .ok_or_else(|| Error::internal(format!("no source for {}", spec)))?;
                let mut dep_specs = self.plan.install_graph.adjacency_of(&spec);
                dep_specs.sort();
                dep_specs.dedup();

                plan.push(AnyAction::Install(InstallPlanAction::new_build_and_install(
                    spec,
                    Arc::clone(&source.scf),
                    None,
                    cluster.to_install_features.clone(),
                    cluster.request_type,
                    dep_specs,
                )));
            } else {
                // Still installed; only report it when the user asked for it.
                if cluster.request_type != RequestType::UserRequested {
                    continue;
                }
                let installed = cluster
                    .installed
                    .as_ref()
                    .ok_or_else(|| Error::internal(format!("no installed view for {}", spec)))?;
                plan.push(AnyAction::Install(InstallPlanAction::new_already_installed(
                    installed.ipv.clone(),
                    installed.original_features.clone(),
                    cluster.request_type,
                )));
            }
        }

        Ok(plan)
    }

    fn cluster(&self, spec: &PackageSpec) -> Result<&Cluster> {
        self.graph
            .existing(spec)
            .ok_or_else(|| Error::internal(format!("no cluster for planned spec {}", spec)))
    }
}

/// Compute the ordered removals for `specs`, cascading through dependents
///
/// Specs that are not installed yield `NotInstalled` actions. Dependents
/// pulled in by the cascade are marked auto-selected.
pub fn create_remove_plan(
    specs: &[PackageSpec],
    status_db: &StatusDb,
) -> Result<Vec<RemovePlanAction>> {
    let specs_as_set: HashSet<&PackageSpec> = specs.iter().collect();

    let mut graph = crate::graph::Digraph::new();
    let mut queue: VecDeque<PackageSpec> = specs.iter().cloned().collect();
    let mut seen: HashSet<PackageSpec> = specs.iter().cloned().collect();

    while let Some(spec) = queue.pop_front() {
        graph.add_vertex(spec.clone());
        if status_db.find(&spec).is_none() {
            continue;
        }
        for ipv in status_db.iter() {
            if !ipv.dependencies().contains(&spec) {
                continue;
            }
            graph.add_edge(&spec, ipv.spec());
            if seen.insert(ipv.spec().clone()) {
                queue.push_back(ipv.spec().clone());
            }
        }
    }

    let order = graph.topological_sort(&graph.vertex_list(), None)?;
    Ok(order
        .into_iter()
        .map(|spec| {
            let plan_type = if status_db.find(&spec).is_some() {
                RemovePlanType::Remove
            } else {
                RemovePlanType::NotInstalled
            };
            let request_type = if specs_as_set.contains(&spec) {
                RequestType::UserRequested
            } else {
                RequestType::AutoSelected
            };
            RemovePlanAction {
                spec,
                plan_type,
                request_type,
            }
        })
        .collect())
}

/// Compute the ordered exports for `specs`, dependencies first
pub fn create_export_plan(
    specs: &[PackageSpec],
    status_db: &StatusDb,
) -> Result<Vec<ExportPlanAction>> {
    let specs_as_set: HashSet<&PackageSpec> = specs.iter().collect();

    let mut graph = crate::graph::Digraph::new();
    let mut queue: VecDeque<PackageSpec> = specs.iter().cloned().collect();
    let mut seen: HashSet<PackageSpec> = specs.iter().cloned().collect();

    while let Some(spec) = queue.pop_front() {
        graph.add_vertex(spec.clone());
        if let Some(ipv) = status_db.find(&spec) {
            for dep in ipv.dependencies() {
                graph.add_edge(&spec, &dep);
                if seen.insert(dep.clone()) {
                    queue.push_back(dep);
                }
            }
        }
    }

    let order = graph.topological_sort(&graph.vertex_list(), None)?;
    Ok(order
        .into_iter()
        .map(|spec| {
            let request_type = if specs_as_set.contains(&spec) {
                RequestType::UserRequested
            } else {
                RequestType::AutoSelected
            };
            match status_db.find(&spec) {
                Some(ipv) => ExportPlanAction {
                    spec,
                    plan_type: ExportPlanType::AlreadyBuilt,
                    request_type,
                    installed_package: Some(ipv.clone()),
                },
                None => ExportPlanAction {
                    spec,
                    plan_type: ExportPlanType::NotBuilt,
                    request_type,
                    installed_package: None,
                },
            }
        })
        .collect())
}
