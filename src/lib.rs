// src/lib.rs

//! Portico
//!
//! Core of a C/C++ package builder: computes install/remove plans over a
//! feature-aware dependency graph, derives a reproducible content-addressed
//! build identifier (ABI tag) for every package to be built, and drives
//! builds through a content-addressed binary cache with failure tombstones
//! and background uploads.
//!
//! # Architecture
//!
//! - Planner: mark-plus/mark-minus over a cluster graph, serialized into an
//!   ordered remove-then-install action list
//! - ABI computer: canonical `key value` serialization of every build
//!   input, hashed to SHA-1
//! - Binary cache: two-hex fan-out archive tree plus optional remote feed,
//!   with failure memoization
//! - Orchestrator: cache lookup, build, post-build lint, cache publication
//! - Background queue: fire-and-forget upload tasks joined before exit

pub mod abi;
pub mod build;
pub mod cache;
mod error;
pub mod graph;
pub mod hash;
pub mod jobs;
pub mod paragraph;
pub mod paths;
pub mod plan;
pub mod ports;
pub mod spec;
pub mod status;
pub mod tools;

pub use abi::{compute_abi_tag, compute_all_abi_tags, AbiEntry, AbiTagAndFile};
pub use build::{
    apply_build_options, build_package, read_build_info, BuildContext, BuildInfo,
    BuildPackageOptions, BuildResult, ExtendedBuildResult, PreBuildInfo,
};
pub use cache::{nuget_package_version, BinaryCache};
pub use error::{Error, Result};
pub use graph::{Digraph, Randomizer};
pub use jobs::JobQueue;
pub use paths::InstallationPaths;
pub use plan::{
    classify_plan, create_export_plan, create_feature_install_plan, create_remove_plan, print_plan,
    AnyAction, CreateInstallPlanOptions, InstallPlanAction, InstallPlanType, RemovePlanAction,
    RemovePlanType, RequestType,
};
pub use ports::{MapPortProvider, PathsPortProvider, PortProvider, SourceControlFile};
pub use spec::{FeatureSpec, PackageSpec, Triplet};
pub use status::{BinaryControlFile, BinaryParagraph, InstalledPackageView, StatusDb};
pub use tools::{DefaultLint, PostBuildLint, ProcessToolset, Toolset};
