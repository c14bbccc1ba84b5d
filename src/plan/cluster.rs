// src/plan/cluster.rs

//! Cluster graph: the resolver's working structure
//!
//! One cluster exists per `(name, triplet)` the resolver has touched,
//! holding the installed view and the source view side by side so the
//! mark-plus/mark-minus passes can reason about transitions between them.
//! Clusters are owned by the graph and addressed by spec, never by pointer.

use crate::error::Result;
use crate::graph::Digraph;
use crate::plan::RequestType;
use crate::ports::{filter_dependencies_to_specs, PortProvider, SourceControlFile};
use crate::spec::{FeatureSpec, PackageSpec, Triplet};
use crate::status::InstalledPackageView;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// The installed half of a cluster
#[derive(Debug)]
pub(crate) struct ClusterInstalled {
    pub ipv: InstalledPackageView,
    /// Reverse Build-Depends edges: the installed specs that depend on this
    /// cluster. Populated once at graph construction; derived data only.
    pub remove_edges: BTreeSet<PackageSpec>,
    /// `{"core"}` plus every feature installed at snapshot time
    pub original_features: BTreeSet<String>,
}

impl ClusterInstalled {
    pub fn new(ipv: InstalledPackageView) -> Self {
        let mut original_features = BTreeSet::new();
        original_features.insert("core".to_string());
        for feature in ipv.feature_names() {
            original_features.insert(feature.to_string());
        }
        Self {
            ipv,
            remove_edges: BTreeSet::new(),
            original_features,
        }
    }
}

/// The source half of a cluster
#[derive(Debug)]
pub(crate) struct ClusterSource {
    pub scf: Arc<SourceControlFile>,
    /// Feature name to the dependency feature specs it pulls in. `"core"`
    /// is derived from the core paragraph.
    pub build_edges: HashMap<String, Vec<FeatureSpec>>,
}

impl ClusterSource {
    fn from_scf(scf: Arc<SourceControlFile>, triplet: &Triplet) -> Self {
        let mut build_edges = HashMap::new();
        build_edges.insert(
            "core".to_string(),
            filter_dependencies_to_specs(&scf.core_paragraph.depends, triplet),
        );
        for feature in &scf.feature_paragraphs {
            build_edges.insert(
                feature.name.clone(),
                filter_dependencies_to_specs(&feature.depends, triplet),
            );
        }
        Self { scf, build_edges }
    }
}

/// Per-spec bookkeeping node of the resolver
///
/// `minus` and the entries of `plus` are monotone: once set they stay set
/// for the lifetime of the plan, which is what keeps the marking passes
/// from recursing forever through feature cycles.
#[derive(Debug)]
pub(crate) struct Cluster {
    pub spec: PackageSpec,
    pub installed: Option<ClusterInstalled>,
    pub source: Option<ClusterSource>,
    /// Marking state per feature; holds the "special" names `""` and `"*"` too
    pub plus: HashMap<String, bool>,
    pub to_install_features: BTreeSet<String>,
    pub minus: bool,
    /// True when the cluster will not be installed at the moment its install
    /// action is considered
    pub transient_uninstalled: bool,
    pub request_type: RequestType,
}

impl Cluster {
    fn new(spec: PackageSpec) -> Self {
        Self {
            spec,
            installed: None,
            source: None,
            plus: HashMap::new(),
            to_install_features: BTreeSet::new(),
            minus: false,
            transient_uninstalled: true,
            request_type: RequestType::AutoSelected,
        }
    }
}

/// All clusters the resolver has touched, created lazily from the catalog
pub(crate) struct ClusterGraph<'a> {
    clusters: HashMap<PackageSpec, Cluster>,
    provider: &'a dyn PortProvider,
}

impl<'a> ClusterGraph<'a> {
    pub fn new(provider: &'a dyn PortProvider) -> Self {
        Self {
            clusters: HashMap::new(),
            provider,
        }
    }

    /// Find the cluster for `spec`, creating it from the catalog on demand
    pub fn get(&mut self, spec: &PackageSpec) -> Result<&mut Cluster> {
        if !self.clusters.contains_key(spec) {
            let mut cluster = Cluster::new(spec.clone());
            if let Some(scf) = self.provider.get_control_file(spec.name())? {
                cluster.source = Some(ClusterSource::from_scf(scf, spec.triplet()));
            }
            self.clusters.insert(spec.clone(), cluster);
        }
        Ok(self
            .clusters
            .get_mut(spec)
            .unwrap_or_else(|| unreachable!("cluster inserted above")))
    }

    /// Look up an already-created cluster
    pub fn existing(&self, spec: &PackageSpec) -> Option<&Cluster> {
        self.clusters.get(spec)
    }
}

/// The resolver's output graphs: removals and installs kept separate
#[derive(Default)]
pub(crate) struct GraphPlan {
    pub remove_graph: Digraph<PackageSpec>,
    pub install_graph: Digraph<PackageSpec>,
}
