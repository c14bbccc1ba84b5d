// src/build/mod.rs

//! Build orchestration
//!
//! Drives one install action at a time through cache lookup, the build
//! tool, the post-build verifier and cache publication. The only
//! concurrency is the background upload queue; everything here blocks the
//! calling thread.

use crate::cache::{nuget_package_version, BinaryCache};
use crate::error::{Error, Result};
use crate::hash::file_sha1;
use crate::jobs::JobQueue;
use crate::paragraph::{get_single_paragraph, optional_field, required_field};
use crate::paths::InstallationPaths;
use crate::plan::{AnyAction, InstallPlanAction};
use crate::ports::{filter_dependencies_to_specs, SourceControlFile};
use crate::spec::{FeatureSpec, PackageSpec, Triplet};
use crate::status::{
    try_load_cached_package, write_binary_control_file, BinaryControlFile, BinaryParagraph,
    StatusDb,
};
use crate::tools::{PostBuildLint, Toolset};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Instant;
use tracing::{info, warn};

/// Sentinel the triplet-inspection script echoes before its variables
pub const TRIPLET_INFO_GUID: &str = "c35112b6-d1ba-415b-aa5d-81de856ef8eb";

/// How a binary links against its dependencies and the C runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkageType {
    #[default]
    Dynamic,
    Static,
}

/// Parse a linkage field value
pub fn to_linkage_type(value: &str) -> Option<LinkageType> {
    match value {
        "dynamic" => Some(LinkageType::Dynamic),
        "static" => Some(LinkageType::Static),
        _ => None,
    }
}

/// Lint policies a port can toggle from its BUILD_INFO
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BuildPolicy {
    EmptyPackage,
    DllsWithoutLibs,
    OnlyReleaseCrt,
    EmptyIncludeFolder,
    AllowObsoleteMsvcrt,
}

/// Every known policy, in BUILD_INFO field order
pub const ALL_POLICIES: [BuildPolicy; 5] = [
    BuildPolicy::EmptyPackage,
    BuildPolicy::DllsWithoutLibs,
    BuildPolicy::OnlyReleaseCrt,
    BuildPolicy::EmptyIncludeFolder,
    BuildPolicy::AllowObsoleteMsvcrt,
];

impl BuildPolicy {
    /// The BUILD_INFO field name
    pub fn name(&self) -> &'static str {
        match self {
            Self::EmptyPackage => "PolicyEmptyPackage",
            Self::DllsWithoutLibs => "PolicyDLLsWithoutLIBs",
            Self::OnlyReleaseCrt => "PolicyOnlyReleaseCRT",
            Self::EmptyIncludeFolder => "PolicyEmptyIncludeFolder",
            Self::AllowObsoleteMsvcrt => "PolicyAllowObsoleteMsvcrt",
        }
    }

    /// The variable name the build scripts use
    pub fn cmake_variable(&self) -> &'static str {
        match self {
            Self::EmptyPackage => "VCPKG_POLICY_EMPTY_PACKAGE",
            Self::DllsWithoutLibs => "VCPKG_POLICY_DLLS_WITHOUT_LIBS",
            Self::OnlyReleaseCrt => "VCPKG_POLICY_ONLY_RELEASE_CRT",
            Self::EmptyIncludeFolder => "VCPKG_POLICY_EMPTY_INCLUDE_FOLDER",
            Self::AllowObsoleteMsvcrt => "VCPKG_POLICY_ALLOW_OBSOLETE_MSVCRT",
        }
    }
}

/// Policy settings read from a BUILD_INFO file
#[derive(Debug, Clone, Default)]
pub struct BuildPolicies(BTreeMap<BuildPolicy, bool>);

impl BuildPolicies {
    pub fn new(policies: BTreeMap<BuildPolicy, bool>) -> Self {
        Self(policies)
    }

    pub fn is_enabled(&self, policy: BuildPolicy) -> bool {
        self.0.get(&policy).copied().unwrap_or(false)
    }
}

/// Which downloader the port scripts should use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DownloadTool {
    #[default]
    BuiltIn,
    Aria2,
}

impl DownloadTool {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BuiltIn => "BUILT_IN",
            Self::Aria2 => "ARIA2",
        }
    }
}

/// Per-build switches carried on every install action
#[derive(Debug, Clone)]
pub struct BuildPackageOptions {
    pub use_head_version: bool,
    pub allow_downloads: bool,
    pub clean_buildtrees: bool,
    pub download_tool: DownloadTool,
    pub binary_caching: bool,
    pub fail_on_tombstone: bool,
}

impl Default for BuildPackageOptions {
    fn default() -> Self {
        Self {
            use_head_version: false,
            allow_downloads: true,
            clean_buildtrees: false,
            download_tool: DownloadTool::BuiltIn,
            binary_caching: false,
            fail_on_tombstone: false,
        }
    }
}

/// Set the build options on every build action of a serialized plan
pub fn apply_build_options(plan: &mut [AnyAction], options: &BuildPackageOptions) {
    for action in plan {
        if let AnyAction::Install(install) = action {
            if let Some(build_action) = install.build_action.as_mut() {
                build_action.build_options = options.clone();
            }
        }
    }
}

/// The post-build facts a port reports about itself
#[derive(Debug, Clone, Default)]
pub struct BuildInfo {
    pub crt_linkage: LinkageType,
    pub library_linkage: LinkageType,
    pub version: Option<String>,
    pub policies: BuildPolicies,
}

/// Read and validate a BUILD_INFO file
pub fn read_build_info(path: &Path) -> Result<BuildInfo> {
    let mut paragraph = get_single_paragraph(path)
        .map_err(|e| Error::ParseError(format!("invalid BUILD_INFO file for package: {}", e)))?;

    let crt_value = required_field(&mut paragraph, "CRTLinkage")?;
    let crt_linkage = to_linkage_type(&crt_value).ok_or_else(|| Error::InvalidField {
        field: "CRTLinkage".to_string(),
        value: crt_value,
    })?;

    let lib_value = required_field(&mut paragraph, "LibraryLinkage")?;
    let library_linkage = to_linkage_type(&lib_value).ok_or_else(|| Error::InvalidField {
        field: "LibraryLinkage".to_string(),
        value: lib_value,
    })?;

    let version = optional_field(&mut paragraph, "Version").filter(|v| !v.is_empty());

    let mut policies = BTreeMap::new();
    for policy in ALL_POLICIES {
        let Some(setting) = optional_field(&mut paragraph, policy.name()) else {
            continue;
        };
        match setting.as_str() {
            "enabled" => policies.insert(policy, true),
            "disabled" => policies.insert(policy, false),
            _ => {
                return Err(Error::InvalidField {
                    field: policy.name().to_string(),
                    value: setting,
                })
            }
        };
    }

    Ok(BuildInfo {
        crt_linkage,
        library_linkage,
        version,
        policies: BuildPolicies::new(policies),
    })
}

/// Debug or release, when the triplet pins one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigurationType {
    Debug,
    Release,
}

/// Everything the triplet file decides before a build starts
#[derive(Debug, Clone, Default)]
pub struct PreBuildInfo {
    pub target_architecture: String,
    pub cmake_system_name: String,
    pub cmake_system_version: String,
    pub platform_toolset: Option<String>,
    pub visual_studio_path: Option<PathBuf>,
    pub external_toolchain_file: Option<String>,
    pub build_type: Option<ConfigurationType>,
    /// SHA-1 of the triplet file, suffixed with the toolchain file hash
    pub triplet_abi_tag: String,
}

impl PreBuildInfo {
    /// Parse the `KEY=VALUE` lines following the inspection sentinel
    ///
    /// Lines before the sentinel are ignored; an unrecognized variable name
    /// is fatal; a value-less line is permitted.
    pub fn parse_inspection_output(output: &str) -> Result<Self> {
        let mut info = Self::default();

        let mut lines = output.lines();
        for line in lines.by_ref() {
            if line.trim() == TRIPLET_INFO_GUID {
                break;
            }
        }

        for line in lines {
            if line.trim().is_empty() {
                continue;
            }
            let (name, value) = match line.split_once('=') {
                Some((name, value)) => (name.trim(), value.trim()),
                None => (line.trim(), ""),
            };

            match name {
                "VCPKG_TARGET_ARCHITECTURE" => info.target_architecture = value.to_string(),
                "VCPKG_CMAKE_SYSTEM_NAME" => info.cmake_system_name = value.to_string(),
                "VCPKG_CMAKE_SYSTEM_VERSION" => info.cmake_system_version = value.to_string(),
                "VCPKG_PLATFORM_TOOLSET" => {
                    info.platform_toolset = (!value.is_empty()).then(|| value.to_string());
                }
                "VCPKG_VISUAL_STUDIO_PATH" => {
                    info.visual_studio_path = (!value.is_empty()).then(|| PathBuf::from(value));
                }
                "VCPKG_CHAINLOAD_TOOLCHAIN_FILE" => {
                    info.external_toolchain_file = (!value.is_empty()).then(|| value.to_string());
                }
                "VCPKG_BUILD_TYPE" => {
                    info.build_type = match value.to_ascii_lowercase().as_str() {
                        "" => None,
                        "debug" => Some(ConfigurationType::Debug),
                        "release" => Some(ConfigurationType::Release),
                        _ => {
                            return Err(Error::InvalidField {
                                field: "VCPKG_BUILD_TYPE".to_string(),
                                value: value.to_string(),
                            })
                        }
                    };
                }
                _ => return Err(Error::UnknownTripletVariable(line.to_string())),
            }
        }

        Ok(info)
    }

    /// Inspect a triplet file and compute its ABI contribution
    pub fn from_triplet_file(
        paths: &InstallationPaths,
        triplet: &Triplet,
        toolset: &dyn Toolset,
    ) -> Result<Self> {
        let triplet_file = paths.triplet_file(triplet);
        let output = toolset.inspect_triplet(&paths.triplet_inspection_script(), &triplet_file)?;
        let mut info = Self::parse_inspection_output(&output)?;

        let mut tag = file_sha1(&triplet_file)?;
        if let Some(toolchain) = &info.external_toolchain_file {
            tag.push('-');
            tag.push_str(&file_sha1(Path::new(toolchain))?);
        } else if let Some(toolchain) = paths.toolchain_file(&info.cmake_system_name) {
            tag.push('-');
            tag.push_str(&file_sha1(&toolchain)?);
        }
        info.triplet_abi_tag = tag;

        Ok(info)
    }
}

/// Outcome of one build attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildResult {
    Succeeded,
    BuildFailed,
    PostBuildChecksFailed,
    FileConflicts,
    CascadedDueToMissingDependencies,
    Excluded,
}

impl fmt::Display for BuildResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Succeeded => "SUCCEEDED",
            Self::BuildFailed => "BUILD_FAILED",
            Self::PostBuildChecksFailed => "POST_BUILD_CHECKS_FAILED",
            Self::FileConflicts => "FILE_CONFLICTS",
            Self::CascadedDueToMissingDependencies => "CASCADED_DUE_TO_MISSING_DEPENDENCIES",
            Self::Excluded => "EXCLUDED",
        };
        write!(f, "{}", text)
    }
}

/// One-line failure summary for reporting
pub fn create_error_message(result: BuildResult, spec: &PackageSpec) -> String {
    format!("Error: Building package {} failed with: {}", spec, result)
}

/// A build outcome with its payload
#[derive(Debug)]
pub struct ExtendedBuildResult {
    pub code: BuildResult,
    pub binary_control_file: Option<BinaryControlFile>,
    pub unmet_dependencies: Vec<FeatureSpec>,
}

impl ExtendedBuildResult {
    pub fn new(code: BuildResult) -> Self {
        Self {
            code,
            binary_control_file: None,
            unmet_dependencies: Vec::new(),
        }
    }

    pub fn succeeded(bcf: BinaryControlFile) -> Self {
        Self {
            code: BuildResult::Succeeded,
            binary_control_file: Some(bcf),
            unmet_dependencies: Vec::new(),
        }
    }

    pub fn cascaded(unmet_dependencies: Vec<FeatureSpec>) -> Self {
        Self {
            code: BuildResult::CascadedDueToMissingDependencies,
            binary_control_file: None,
            unmet_dependencies,
        }
    }
}

/// Parallelism handed to port scripts, memoized process-wide
///
/// `VCPKG_MAX_CONCURRENCY` overrides; the default is logical cores plus one.
pub fn get_concurrency() -> usize {
    static CONCURRENCY: OnceLock<usize> = OnceLock::new();
    *CONCURRENCY.get_or_init(|| {
        std::env::var("VCPKG_MAX_CONCURRENCY")
            .ok()
            .and_then(|value| value.trim().parse().ok())
            .unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(1)
                    + 1
            })
    })
}

/// Shared collaborators and per-process caches for the orchestrator
pub struct BuildContext {
    toolset: Arc<dyn Toolset>,
    lint: Arc<dyn PostBuildLint>,
    jobs: JobQueue,
    pre_build_info_cache: Mutex<HashMap<Triplet, Arc<PreBuildInfo>>>,
}

impl BuildContext {
    pub fn new(toolset: Arc<dyn Toolset>, lint: Arc<dyn PostBuildLint>, jobs: JobQueue) -> Self {
        Self {
            toolset,
            lint,
            jobs,
            pre_build_info_cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn toolset(&self) -> &dyn Toolset {
        self.toolset.as_ref()
    }

    pub fn jobs(&self) -> &JobQueue {
        &self.jobs
    }

    /// Triplet inspection result, cached per triplet for the process
    pub fn pre_build_info(
        &self,
        paths: &InstallationPaths,
        triplet: &Triplet,
    ) -> Result<Arc<PreBuildInfo>> {
        let mut cache = self
            .pre_build_info_cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(info) = cache.get(triplet) {
            return Ok(Arc::clone(info));
        }
        let info = Arc::new(PreBuildInfo::from_triplet_file(
            paths,
            triplet,
            self.toolset.as_ref(),
        )?);
        cache.insert(triplet.clone(), Arc::clone(&info));
        Ok(info)
    }
}

/// The features of the package's dependencies that must already be installed
///
/// References to default feature sets are expanded against the installed
/// state; a dependency not installed at all keeps its `""` reference so the
/// guard below reports it.
fn compute_required_feature_specs(
    scf: &SourceControlFile,
    triplet: &Triplet,
    feature_list: &BTreeSet<String>,
    status_db: &StatusDb,
) -> Result<Vec<FeatureSpec>> {
    let mut dep_fspecs: Vec<FeatureSpec> = Vec::new();
    for feature in feature_list {
        let depends = if feature == "core" {
            &scf.core_paragraph.depends
        } else {
            &scf.find_feature(feature)
                .ok_or_else(|| Error::FeatureNotFound {
                    package: scf.core_paragraph.name.clone(),
                    feature: feature.clone(),
                })?
                .depends
        };
        dep_fspecs.extend(filter_dependencies_to_specs(depends, triplet));
    }
    dep_fspecs.sort();
    dep_fspecs.dedup();

    let mut expanded = Vec::new();
    for fspec in dep_fspecs {
        if !fspec.feature().is_empty() {
            expanded.push(fspec);
            continue;
        }
        match status_db.find(fspec.spec()) {
            // Not installed; leave the default reference so it fails below.
            None => expanded.push(fspec),
            Some(ipv) => {
                expanded.push(FeatureSpec::new(fspec.spec().clone(), "core"));
                for default_feature in &ipv.core.default_features {
                    expanded.push(FeatureSpec::new(fspec.spec().clone(), default_feature.clone()));
                }
            }
        }
    }
    expanded.sort();
    expanded.dedup();
    Ok(expanded)
}

fn bool_flag(value: bool) -> String {
    String::from(if value { "1" } else { "0" })
}

fn do_build_package(
    paths: &InstallationPaths,
    pre_build_info: &PreBuildInfo,
    action: &InstallPlanAction,
    ctx: &BuildContext,
) -> Result<ExtendedBuildResult> {
    let build_action = action
        .build_action
        .as_ref()
        .ok_or_else(|| Error::internal("build_package called without a build action"))?;
    let scf = &build_action.scf;
    let name = &scf.core_paragraph.name;
    let port_dir = build_action
        .port_dir
        .clone()
        .unwrap_or_else(|| paths.port_dir(name));

    let mut all_features = String::new();
    for feature in &scf.feature_paragraphs {
        all_features.push_str(&feature.name);
        all_features.push(';');
    }
    let features: Vec<&str> = action.feature_list.iter().map(String::as_str).collect();

    let var = |name: &str, value: String| (name.to_string(), value);
    let mut variables = vec![
        var("CMD", "BUILD".to_string()),
        var("PORT", name.clone()),
        var("CURRENT_PORT_DIR", port_dir.display().to_string()),
        var("TARGET_TRIPLET", action.spec.triplet().to_string()),
        var(
            "VCPKG_PLATFORM_TOOLSET",
            pre_build_info.platform_toolset.clone().unwrap_or_default(),
        ),
        var(
            "VCPKG_USE_HEAD_VERSION",
            bool_flag(build_action.build_options.use_head_version),
        ),
        var("DOWNLOADS", paths.downloads.display().to_string()),
        var(
            "_VCPKG_NO_DOWNLOADS",
            bool_flag(!build_action.build_options.allow_downloads),
        ),
        var(
            "_VCPKG_DOWNLOAD_TOOL",
            build_action.build_options.download_tool.as_str().to_string(),
        ),
        var("FEATURES", features.join(";")),
        var("ALL_FEATURES", all_features),
        var("VCPKG_CONCURRENCY", get_concurrency().to_string()),
    ];
    if std::env::var_os("VCPKG_FORCE_SYSTEM_BINARIES").is_none() {
        variables.push(var("GIT", ctx.toolset().git_exe().display().to_string()));
    }

    let timer = Instant::now();
    let return_code = ctx.toolset().run_build(&paths.ports_script(), &variables)?;
    info!(
        "Elapsed time for package {}: {:.2?}",
        action.spec,
        timer.elapsed()
    );

    if return_code != 0 {
        return Ok(ExtendedBuildResult::new(BuildResult::BuildFailed));
    }

    let build_info = read_build_info(&paths.build_info_path(&action.spec))?;
    let error_count =
        ctx.lint
            .perform_all_checks(&action.spec, paths, pre_build_info, &build_info);
    if error_count != 0 {
        return Ok(ExtendedBuildResult::new(BuildResult::PostBuildChecksFailed));
    }

    let abi_tag = action.abi.as_ref().map(|abi| abi.tag.clone()).unwrap_or_default();
    let mut core = BinaryParagraph::from_source(&scf.core_paragraph, action.spec.triplet(), abi_tag);
    if let Some(version) = &build_info.version {
        core.version = version.clone();
    }
    let mut bcf = BinaryControlFile::new(core);
    for feature in &action.feature_list {
        for paragraph in &scf.feature_paragraphs {
            if &paragraph.name == feature {
                bcf.features.push(BinaryParagraph::from_feature(
                    &scf.core_paragraph,
                    paragraph,
                    action.spec.triplet(),
                ));
            }
        }
    }

    write_binary_control_file(paths, &bcf)?;
    Ok(ExtendedBuildResult::succeeded(bcf))
}

fn do_build_package_and_clean_buildtrees(
    paths: &InstallationPaths,
    pre_build_info: &PreBuildInfo,
    action: &InstallPlanAction,
    ctx: &BuildContext,
) -> Result<ExtendedBuildResult> {
    let result = do_build_package(paths, pre_build_info, action, ctx)?;

    let clean = action
        .build_action
        .as_ref()
        .is_some_and(|b| b.build_options.clean_buildtrees);
    if clean {
        let buildtree_dir = paths.buildtree_dir(action.spec.name());
        if buildtree_dir.is_dir() {
            // Directories go; top-level files (the logs) stay.
            for entry in std::fs::read_dir(&buildtree_dir)? {
                let path = entry?.path();
                if path.is_dir() {
                    let _ = std::fs::remove_dir_all(&path);
                }
            }
        }
    }

    Ok(result)
}

/// Build one install action, consulting and feeding the binary cache
///
/// The action must already be resolved and ABI-tagged. Without an ABI tag
/// the cache is skipped entirely; with one, the lookup order is the local
/// nuget mirror, then the archive tree, then the tombstone check, then a
/// real build whose outcome is published back to the cache.
pub fn build_package(
    paths: &InstallationPaths,
    action: &InstallPlanAction,
    status_db: &StatusDb,
    ctx: &BuildContext,
) -> Result<ExtendedBuildResult> {
    let build_action = action
        .build_action
        .as_ref()
        .ok_or_else(|| Error::internal("build_package called without a build action"))?;
    let scf = &build_action.scf;
    let name = &scf.core_paragraph.name;

    let mut required_fspecs =
        compute_required_feature_specs(scf, action.spec.triplet(), &action.feature_list, status_db)?;

    let mut dep_pspecs: Vec<PackageSpec> =
        required_fspecs.iter().map(|f| f.spec().clone()).collect();
    dep_pspecs.sort();
    dep_pspecs.dedup();

    // The planner should have prevented missing dependencies; this is a
    // guard, not an expected path.
    required_fspecs.retain(|fspec| !(status_db.is_installed(fspec) || fspec.name() == name));
    if !required_fspecs.is_empty() {
        return Ok(ExtendedBuildResult::cascaded(required_fspecs));
    }

    let mut nuget_dependency_strings = Vec::new();
    for pspec in &dep_pspecs {
        if pspec == &action.spec {
            continue;
        }
        let ipv = status_db
            .find(pspec)
            .ok_or_else(|| Error::internal(format!("dependency {} vanished from status", pspec)))?;
        if action.abi.is_some() {
            nuget_dependency_strings.push(format!(
                "{} {}",
                ipv.core.dir(),
                nuget_package_version(&ipv.core.version, &ipv.core.abi)
            ));
        }
    }

    let pre_build_info = ctx.pre_build_info(paths, action.spec.triplet())?;

    let Some(abi) = action.abi.as_ref() else {
        // Binary caching is off for this action.
        return do_build_package_and_clean_buildtrees(paths, &pre_build_info, action, ctx);
    };

    let cache = BinaryCache::new(paths);
    let package_dir = paths.package_dir(&action.spec);
    let nuget_id = action.spec.dir();
    let nuget_version = nuget_package_version(action.version(), &abi.tag);

    let mut restored = cache.try_restore_nuget(&package_dir, &nuget_id, &nuget_version)?;
    if !restored {
        restored = cache.try_restore_archive(&package_dir, &abi.tag)?;
    }
    if restored {
        let bcf = try_load_cached_package(paths, &action.spec)?;
        return Ok(ExtendedBuildResult::succeeded(bcf));
    }

    let tombstone_path = cache.tombstone_path(&abi.tag);
    if tombstone_path.exists() {
        if build_action.build_options.fail_on_tombstone {
            info!("Found failure tombstone: {}", tombstone_path.display());
            return Ok(ExtendedBuildResult::new(BuildResult::BuildFailed));
        }
        warn!("Found failure tombstone: {}", tombstone_path.display());
    }

    info!(
        "Could not locate cached archive: {}",
        cache.archive_path(&abi.tag).display()
    );

    let result = do_build_package_and_clean_buildtrees(paths, &pre_build_info, action, ctx)?;

    // Record the ABI info next to the package so installs carry it forward.
    let share_dir = package_dir.join("share").join(name);
    std::fs::create_dir_all(&share_dir)?;
    std::fs::copy(&abi.tag_file, share_dir.join("vcpkg_abi_info.txt"))?;

    match result.code {
        BuildResult::Succeeded => {
            let feed = std::env::var("VCPKG_BINARYCACHING_FEED")
                .ok()
                .filter(|feed| !feed.is_empty());
            match feed {
                Some(feed) => cache.publish_nuget(
                    action,
                    &nuget_id,
                    &nuget_version,
                    &nuget_dependency_strings,
                    &feed,
                    Arc::clone(&ctx.toolset),
                    ctx.jobs(),
                )?,
                None => cache.publish_archive(&action.spec, &abi.tag)?,
            }
        }
        BuildResult::BuildFailed | BuildResult::PostBuildChecksFailed => {
            cache.publish_failure(&action.spec, &abi.tag)?;
        }
        _ => {}
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_build_info_required_and_policies() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("BUILD_INFO");

        std::fs::write(
            &path,
            "CRTLinkage: dynamic\nLibraryLinkage: static\nPolicyEmptyPackage: enabled\n",
        )
        .unwrap();
        let info = read_build_info(&path).unwrap();
        assert_eq!(info.crt_linkage, LinkageType::Dynamic);
        assert_eq!(info.library_linkage, LinkageType::Static);
        assert!(info.policies.is_enabled(BuildPolicy::EmptyPackage));
        assert!(!info.policies.is_enabled(BuildPolicy::OnlyReleaseCrt));
        assert!(info.version.is_none());

        std::fs::write(&path, "CRTLinkage: dynamic\n").unwrap();
        assert!(read_build_info(&path).is_err());

        std::fs::write(&path, "CRTLinkage: shared\nLibraryLinkage: static\n").unwrap();
        assert!(matches!(
            read_build_info(&path),
            Err(Error::InvalidField { .. })
        ));

        std::fs::write(
            &path,
            "CRTLinkage: static\nLibraryLinkage: static\nPolicyEmptyPackage: sometimes\n",
        )
        .unwrap();
        assert!(read_build_info(&path).is_err());
    }

    #[test]
    fn test_parse_inspection_output() {
        let output = format!(
            "-- some cmake banner\n{}\nVCPKG_TARGET_ARCHITECTURE=x64\n\
             VCPKG_CMAKE_SYSTEM_NAME=Linux\nVCPKG_CMAKE_SYSTEM_VERSION=\n\
             VCPKG_PLATFORM_TOOLSET\nVCPKG_BUILD_TYPE=release\n",
            TRIPLET_INFO_GUID
        );
        let info = PreBuildInfo::parse_inspection_output(&output).unwrap();
        assert_eq!(info.target_architecture, "x64");
        assert_eq!(info.cmake_system_name, "Linux");
        assert_eq!(info.cmake_system_version, "");
        assert!(info.platform_toolset.is_none());
        assert_eq!(info.build_type, Some(ConfigurationType::Release));
    }

    #[test]
    fn test_parse_inspection_rejects_unknown_variable() {
        let output = format!("{}\nVCPKG_SOMETHING_ELSE=1\n", TRIPLET_INFO_GUID);
        assert!(matches!(
            PreBuildInfo::parse_inspection_output(&output),
            Err(Error::UnknownTripletVariable(_))
        ));
    }

    #[test]
    fn test_parse_inspection_ignores_lines_before_sentinel() {
        let output = format!("VCPKG_NOT_A_VARIABLE=junk\n{}\n", TRIPLET_INFO_GUID);
        let info = PreBuildInfo::parse_inspection_output(&output).unwrap();
        assert_eq!(info.target_architecture, "");
    }

    #[test]
    fn test_parse_inspection_rejects_bad_build_type() {
        let output = format!("{}\nVCPKG_BUILD_TYPE=profile\n", TRIPLET_INFO_GUID);
        assert!(PreBuildInfo::parse_inspection_output(&output).is_err());
    }

    #[test]
    fn test_build_result_display() {
        assert_eq!(BuildResult::Succeeded.to_string(), "SUCCEEDED");
        assert_eq!(
            BuildResult::CascadedDueToMissingDependencies.to_string(),
            "CASCADED_DUE_TO_MISSING_DEPENDENCIES"
        );
        let spec = PackageSpec::new("zlib", Triplet::new("x64-linux"));
        assert_eq!(
            create_error_message(BuildResult::BuildFailed, &spec),
            "Error: Building package zlib:x64-linux failed with: BUILD_FAILED"
        );
    }
}
