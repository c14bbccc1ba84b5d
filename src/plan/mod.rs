// src/plan/mod.rs

//! Plan actions and user-facing plan reporting
//!
//! The planner serializes a resolved cluster graph into an ordered list of
//! `AnyAction` values: removals first, then installs. `print_plan` renders
//! the classified plan for the user and enforces the explicit opt-in for
//! plans that remove or rebuild packages.

mod cluster;
mod resolver;

pub use resolver::{
    create_export_plan, create_feature_install_plan, create_remove_plan, CreateInstallPlanOptions,
};

use crate::abi::AbiTagAndFile;
use crate::build::BuildPackageOptions;
use crate::error::{Error, Result};
use crate::ports::SourceControlFile;
use crate::spec::PackageSpec;
use crate::status::InstalledPackageView;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

/// Who asked for an action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestType {
    /// Named in the user's input specs
    UserRequested,
    /// Pulled in by dependency propagation
    AutoSelected,
}

/// What kind of install action was planned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallPlanType {
    AlreadyInstalled,
    BuildAndInstall,
    Excluded,
}

/// What kind of remove action was planned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovePlanType {
    NotInstalled,
    Remove,
}

/// The build half of a `BuildAndInstall` action
#[derive(Debug, Clone)]
pub struct BuildAndInstallAction {
    pub scf: Arc<SourceControlFile>,
    pub build_options: BuildPackageOptions,
    /// Overrides the catalog's port directory when set
    pub port_dir: Option<PathBuf>,
}

/// A planned install of one package spec
///
/// Exactly one of `build_action` / `installed_package` is set, matching
/// `plan_type`. The `abi` field is filled after planning, before execution.
#[derive(Debug, Clone)]
pub struct InstallPlanAction {
    pub spec: PackageSpec,
    pub feature_list: BTreeSet<String>,
    pub computed_dependencies: Vec<PackageSpec>,
    pub plan_type: InstallPlanType,
    pub request_type: RequestType,
    pub build_action: Option<BuildAndInstallAction>,
    pub installed_package: Option<InstalledPackageView>,
    pub abi: Option<AbiTagAndFile>,
}

impl InstallPlanAction {
    /// A full build-and-install of a package from its manifest
    pub fn new_build_and_install(
        spec: PackageSpec,
        scf: Arc<SourceControlFile>,
        port_dir: Option<PathBuf>,
        feature_list: BTreeSet<String>,
        request_type: RequestType,
        computed_dependencies: Vec<PackageSpec>,
    ) -> Self {
        Self {
            spec,
            feature_list,
            computed_dependencies,
            plan_type: InstallPlanType::BuildAndInstall,
            request_type,
            build_action: Some(BuildAndInstallAction {
                scf,
                build_options: BuildPackageOptions::default(),
                port_dir,
            }),
            installed_package: None,
            abi: None,
        }
    }

    /// A no-op action for a package already in the requested state
    pub fn new_already_installed(
        installed: InstalledPackageView,
        feature_list: BTreeSet<String>,
        request_type: RequestType,
    ) -> Self {
        Self {
            spec: installed.spec().clone(),
            feature_list,
            computed_dependencies: installed.dependencies(),
            plan_type: InstallPlanType::AlreadyInstalled,
            request_type,
            build_action: None,
            installed_package: Some(installed),
            abi: None,
        }
    }

    /// `name[f1,f2]:triplet`, or the bare spec when no features are listed
    pub fn display_name(&self) -> String {
        if self.feature_list.is_empty() {
            return self.spec.to_string();
        }
        let features: Vec<&str> = self.feature_list.iter().map(String::as_str).collect();
        format!(
            "{}[{}]:{}",
            self.spec.name(),
            features.join(","),
            self.spec.triplet()
        )
    }

    /// The version that will be (or is) installed
    pub fn version(&self) -> &str {
        if let Some(installed) = &self.installed_package {
            return &installed.core.version;
        }
        if let Some(build) = &self.build_action {
            return &build.scf.core_paragraph.version;
        }
        unreachable!("install action carries neither a build action nor an installed view")
    }

    pub fn compare_by_name(a: &&InstallPlanAction, b: &&InstallPlanAction) -> Ordering {
        a.spec.name().cmp(b.spec.name())
    }
}

/// A planned removal of one package spec
#[derive(Debug, Clone)]
pub struct RemovePlanAction {
    pub spec: PackageSpec,
    pub plan_type: RemovePlanType,
    pub request_type: RequestType,
}

impl RemovePlanAction {
    pub fn compare_by_name(a: &&RemovePlanAction, b: &&RemovePlanAction) -> Ordering {
        a.spec.name().cmp(b.spec.name())
    }
}

/// What kind of export action was planned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportPlanType {
    NotBuilt,
    AlreadyBuilt,
}

/// A planned export of one installed package
#[derive(Debug, Clone)]
pub struct ExportPlanAction {
    pub spec: PackageSpec,
    pub plan_type: ExportPlanType,
    pub request_type: RequestType,
    pub installed_package: Option<InstalledPackageView>,
}

impl ExportPlanAction {
    pub fn dependencies(&self) -> Vec<PackageSpec> {
        self.installed_package
            .as_ref()
            .map(InstalledPackageView::dependencies)
            .unwrap_or_default()
    }
}

/// One step of a serialized plan
#[derive(Debug, Clone)]
pub enum AnyAction {
    Install(InstallPlanAction),
    Remove(RemovePlanAction),
}

impl AnyAction {
    pub fn spec(&self) -> &PackageSpec {
        match self {
            AnyAction::Install(action) => &action.spec,
            AnyAction::Remove(action) => &action.spec,
        }
    }

    pub fn install(&self) -> Option<&InstallPlanAction> {
        match self {
            AnyAction::Install(action) => Some(action),
            AnyAction::Remove(_) => None,
        }
    }

    pub fn remove(&self) -> Option<&RemovePlanAction> {
        match self {
            AnyAction::Remove(action) => Some(action),
            AnyAction::Install(_) => None,
        }
    }
}

fn to_output_string(request_type: RequestType, text: &str, from_head: bool) -> String {
    let head_suffix = if from_head { " (from HEAD)" } else { "" };
    match request_type {
        RequestType::AutoSelected => format!("  * {}{}", text, head_suffix),
        RequestType::UserRequested => format!("    {}{}", text, head_suffix),
    }
}

/// The plan grouped for reporting
#[derive(Debug, Default)]
pub struct PlanClassification<'a> {
    pub excluded: Vec<&'a InstallPlanAction>,
    pub already_installed: Vec<&'a InstallPlanAction>,
    pub rebuilt: Vec<&'a InstallPlanAction>,
    pub new_installs: Vec<&'a InstallPlanAction>,
    pub only_install: Vec<&'a InstallPlanAction>,
    pub remove_plans: Vec<&'a RemovePlanAction>,
    pub has_auto_selected: bool,
}

/// Group a serialized plan for reporting
///
/// Remove actions precede install actions in any serialized plan, so an
/// install with a matching remove already collected is a rebuild. The remove
/// list is searched in discovery order.
pub fn classify_plan(plan: &[AnyAction]) -> PlanClassification<'_> {
    let mut classified = PlanClassification {
        has_auto_selected: plan.iter().any(|action| {
            action
                .install()
                .is_some_and(|i| i.request_type != RequestType::UserRequested)
        }),
        ..Default::default()
    };

    for action in plan {
        match action {
            AnyAction::Remove(remove) => classified.remove_plans.push(remove),
            AnyAction::Install(install) => {
                if classified
                    .remove_plans
                    .iter()
                    .any(|remove| remove.spec == install.spec)
                {
                    classified.rebuilt.push(install);
                    continue;
                }
                match install.plan_type {
                    InstallPlanType::AlreadyInstalled => {
                        if install.request_type == RequestType::UserRequested {
                            classified.already_installed.push(install);
                        }
                    }
                    InstallPlanType::BuildAndInstall => classified.new_installs.push(install),
                    InstallPlanType::Excluded => classified.excluded.push(install),
                }
            }
        }
    }

    classified
}

fn install_section(actions: &[&InstallPlanAction]) -> String {
    actions
        .iter()
        .map(|action| {
            let from_head = action
                .build_action
                .as_ref()
                .is_some_and(|b| b.build_options.use_head_version);
            to_output_string(action.request_type, &action.display_name(), from_head)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Print the plan report and enforce the remove/rebuild opt-in
///
/// When the plan contains remove actions and `is_recursive` is false, the
/// user has not confirmed the cascading rebuild and the call fails.
pub fn print_plan(plan: &[AnyAction], is_recursive: bool) -> Result<()> {
    let mut classified = classify_plan(plan);

    classified.remove_plans.sort_by(RemovePlanAction::compare_by_name);
    classified.excluded.sort_by(InstallPlanAction::compare_by_name);
    classified
        .already_installed
        .sort_by(InstallPlanAction::compare_by_name);
    classified.rebuilt.sort_by(InstallPlanAction::compare_by_name);
    classified.new_installs.sort_by(InstallPlanAction::compare_by_name);
    classified.only_install.sort_by(InstallPlanAction::compare_by_name);

    if !classified.excluded.is_empty() {
        println!(
            "The following packages are excluded:\n{}",
            install_section(&classified.excluded)
        );
    }
    if !classified.already_installed.is_empty() {
        println!(
            "The following packages are already installed:\n{}",
            install_section(&classified.already_installed)
        );
    }
    if !classified.rebuilt.is_empty() {
        println!(
            "The following packages will be rebuilt:\n{}",
            install_section(&classified.rebuilt)
        );
    }
    if !classified.new_installs.is_empty() {
        println!(
            "The following packages will be built and installed:\n{}",
            install_section(&classified.new_installs)
        );
    }
    if !classified.only_install.is_empty() {
        println!(
            "The following packages will be directly installed:\n{}",
            install_section(&classified.only_install)
        );
    }
    if classified.has_auto_selected {
        println!("Additional packages (*) will be modified to complete this operation.");
    }

    if !classified.remove_plans.is_empty() && !is_recursive {
        warn!("packages will be removed or rebuilt; re-run with the recurse option to confirm");
        return Err(Error::PlanNotConfirmed);
    }

    Ok(())
}
