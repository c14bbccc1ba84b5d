// src/abi.rs

//! Content-addressed build identifiers
//!
//! Every input that can influence binary compatibility is reduced to a
//! `(key, value)` entry; the sorted `"<key> <value>\n"` serialization is
//! written next to the buildtree and its SHA-1 becomes the ABI tag. The
//! scheme is value-driven rather than path-driven so equivalent ports at
//! different absolute locations hash identically, and it refuses to produce
//! a tag when any required entry is missing a value rather than fabricate a
//! false cache hit.

use crate::build::{BuildContext, PreBuildInfo};
use crate::error::Result;
use crate::hash::file_sha1;
use crate::paths::InstallationPaths;
use crate::plan::{AnyAction, InstallPlanAction};
use crate::spec::PackageSpec;
use crate::status::StatusDb;
use crate::tools::Toolset;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Ports with more files than this are marked unhashable instead of hashed.
const MAX_PORT_FILE_COUNT: usize = 100;

/// One `(key, value)` input to the ABI tag
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct AbiEntry {
    pub key: String,
    pub value: String,
}

impl AbiEntry {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// A computed ABI tag and the serialized info file it hashes
#[derive(Debug, Clone)]
pub struct AbiTagAndFile {
    /// Lowercase hex SHA-1
    pub tag: String,
    pub tag_file: PathBuf,
}

fn hash_port_files(port_dir: &Path, entries: &mut Vec<AbiEntry>) -> Result<()> {
    // Directory enumeration order is unspecified, so collect and sort.
    let mut port_files: Vec<PathBuf> = Vec::new();
    for entry in walkdir::WalkDir::new(port_dir) {
        let entry = entry.map_err(std::io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }
        port_files.push(entry.into_path());
        if port_files.len() > MAX_PORT_FILE_COUNT {
            // An unusually large port is suspicious; mark it unhashable
            // rather than hash everything.
            entries.push(AbiEntry::new("no_hash_max_portfile", ""));
            return Ok(());
        }
    }

    port_files.sort();
    // The zero-padded counter is the stable key; file names are left out of
    // the key so the scheme stays relative-path-agnostic.
    for (counter, port_file) in port_files.iter().enumerate() {
        let key = format!("file_{:03}", counter);
        debug!("mapping {} from {}", key, port_file.display());
        entries.push(AbiEntry::new(key, file_sha1(port_file)?));
    }
    Ok(())
}

/// Compute the ABI tag for one install action
///
/// Returns `None` when binary caching is off for the action or when a
/// required entry has no value; the latter emits a warning listing the
/// offending keys and disables caching for the action.
pub fn compute_abi_tag(
    paths: &InstallationPaths,
    action: &InstallPlanAction,
    pre_build_info: &PreBuildInfo,
    dependency_abis: Vec<AbiEntry>,
    toolset: &dyn Toolset,
) -> Result<Option<AbiTagAndFile>> {
    let Some(build_action) = action.build_action.as_ref() else {
        return Ok(None);
    };
    if !build_action.build_options.binary_caching {
        return Ok(None);
    }

    let name = &build_action.scf.core_paragraph.name;
    let port_dir = build_action
        .port_dir
        .clone()
        .unwrap_or_else(|| paths.port_dir(name));

    let mut entries = dependency_abis;
    entries.push(AbiEntry::new("cmake", toolset.cmake_version()?));

    hash_port_files(&port_dir, &mut entries)?;

    entries.push(AbiEntry::new(
        "vcpkg_fixup_cmake_targets",
        file_sha1(&paths.fixup_script())?,
    ));
    entries.push(AbiEntry::new(
        "triplet",
        pre_build_info.triplet_abi_tag.clone(),
    ));

    let features: Vec<&str> = action.feature_list.iter().map(String::as_str).collect();
    entries.push(AbiEntry::new("features", features.join(";")));

    if build_action.build_options.use_head_version {
        entries.push(AbiEntry::new("head", ""));
    }

    entries.sort();

    let full_abi_info: String = entries
        .iter()
        .map(|entry| format!("{} {}\n", entry.key, entry.value))
        .collect();

    debug!("<abientries>");
    for entry in &entries {
        debug!("{}|{}", entry.key, entry.value);
    }
    debug!("</abientries>");

    let missing: Vec<&str> = entries
        .iter()
        .filter(|entry| {
            entry.value.is_empty() && entry.key != "no_hash_max_portfile" && entry.key != "head"
        })
        .map(|entry| entry.key.as_str())
        .collect();

    if !missing.is_empty() {
        warn!(
            "binary caching disabled because abi keys are missing values: {}",
            missing.join(", ")
        );
        return Ok(None);
    }

    std::fs::create_dir_all(paths.buildtree_dir(name))?;
    let abi_file_path = paths.abi_info_path(name, action.spec.triplet());
    std::fs::write(&abi_file_path, &full_abi_info)?;

    Ok(Some(AbiTagAndFile {
        tag: file_sha1(&abi_file_path)?,
        tag_file: abi_file_path,
    }))
}

/// Annotate every install action of a plan with its ABI tag
///
/// Dependency ABIs resolve first against tags computed earlier in the same
/// plan, then against the status database; a dependency with neither yields
/// an empty value, which disables caching for the dependent action.
pub fn compute_all_abi_tags(
    paths: &InstallationPaths,
    plan: &mut [AnyAction],
    status_db: &StatusDb,
    ctx: &BuildContext,
) -> Result<()> {
    let mut abi_tag_map: HashMap<PackageSpec, String> = HashMap::new();

    for action in plan {
        let AnyAction::Install(install) = action else {
            continue;
        };

        if install.build_action.is_some() {
            let dependency_abis: Vec<AbiEntry> = install
                .computed_dependencies
                .iter()
                .map(|dep| {
                    let abi = abi_tag_map
                        .get(dep)
                        .cloned()
                        .or_else(|| status_db.find(dep).map(|ipv| ipv.core.abi.clone()))
                        .unwrap_or_default();
                    AbiEntry::new(dep.name(), abi)
                })
                .collect();

            let pre_build_info = ctx.pre_build_info(paths, install.spec.triplet())?;
            install.abi = compute_abi_tag(
                paths,
                install,
                &pre_build_info,
                dependency_abis,
                ctx.toolset(),
            )?;
            if let Some(abi) = &install.abi {
                abi_tag_map.insert(install.spec.clone(), abi.tag.clone());
            }
        } else if let Some(ipv) = &install.installed_package {
            abi_tag_map.insert(install.spec.clone(), ipv.core.abi.clone());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{InstallPlanAction, RequestType};
    use crate::ports::SourceControlFile;
    use crate::spec::Triplet;
    use crate::tools::Toolset;
    use std::collections::BTreeSet;
    use std::sync::Arc;

    struct StubToolset;

    impl Toolset for StubToolset {
        fn cmake_version(&self) -> Result<String> {
            Ok("3.14.0".to_string())
        }
        fn git_exe(&self) -> &Path {
            Path::new("git")
        }
        fn run_build(&self, _: &Path, _: &[(String, String)]) -> Result<i32> {
            unimplemented!("not used by abi tests")
        }
        fn inspect_triplet(&self, _: &Path, _: &Path) -> Result<String> {
            unimplemented!("not used by abi tests")
        }
        fn pack_nuget(&self, _: &Path, _: &Path) -> Result<i32> {
            unimplemented!("not used by abi tests")
        }
        fn push_nuget(&self, _: &Path, _: &str) -> Result<i32> {
            unimplemented!("not used by abi tests")
        }
    }

    fn pre_build_info() -> PreBuildInfo {
        PreBuildInfo {
            triplet_abi_tag: "tripletabitag".to_string(),
            ..PreBuildInfo::default()
        }
    }

    fn setup(dir: &Path) -> (InstallationPaths, InstallPlanAction) {
        let paths = InstallationPaths::from_root(dir);
        std::fs::create_dir_all(paths.port_dir("zlib")).unwrap();
        std::fs::write(
            paths.port_dir("zlib").join("CONTROL"),
            "Source: zlib\nVersion: 1.2.11\n",
        )
        .unwrap();
        std::fs::write(paths.port_dir("zlib").join("portfile.cmake"), "# build\n").unwrap();
        std::fs::create_dir_all(paths.fixup_script().parent().unwrap()).unwrap();
        std::fs::write(paths.fixup_script(), "# fixup\n").unwrap();

        let scf = SourceControlFile::parse("Source: zlib\nVersion: 1.2.11\n").unwrap();
        let mut action = InstallPlanAction::new_build_and_install(
            PackageSpec::new("zlib", Triplet::new("x64-linux")),
            Arc::new(scf),
            None,
            BTreeSet::from(["core".to_string()]),
            RequestType::UserRequested,
            Vec::new(),
        );
        action
            .build_action
            .as_mut()
            .unwrap()
            .build_options
            .binary_caching = true;
        (paths, action)
    }

    #[test]
    fn test_abi_tag_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let (paths, action) = setup(dir.path());

        let first = compute_abi_tag(&paths, &action, &pre_build_info(), Vec::new(), &StubToolset)
            .unwrap()
            .unwrap();
        let second = compute_abi_tag(&paths, &action, &pre_build_info(), Vec::new(), &StubToolset)
            .unwrap()
            .unwrap();
        assert_eq!(first.tag, second.tag);
        assert_eq!(first.tag.len(), 40);
        assert!(first.tag_file.exists());
    }

    #[test]
    fn test_dependency_order_does_not_change_the_tag() {
        let dir = tempfile::tempdir().unwrap();
        let (paths, action) = setup(dir.path());

        let forward = vec![
            AbiEntry::new("bzip2", "aaa"),
            AbiEntry::new("openssl", "bbb"),
        ];
        let reversed = vec![
            AbiEntry::new("openssl", "bbb"),
            AbiEntry::new("bzip2", "aaa"),
        ];

        let a = compute_abi_tag(&paths, &action, &pre_build_info(), forward, &StubToolset)
            .unwrap()
            .unwrap();
        let b = compute_abi_tag(&paths, &action, &pre_build_info(), reversed, &StubToolset)
            .unwrap()
            .unwrap();
        assert_eq!(a.tag, b.tag);
    }

    #[test]
    fn test_missing_dependency_value_disables_caching() {
        let dir = tempfile::tempdir().unwrap();
        let (paths, action) = setup(dir.path());

        let deps = vec![AbiEntry::new("openssl", "")];
        let result = compute_abi_tag(&paths, &action, &pre_build_info(), deps, &StubToolset).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_head_and_features_change_the_tag() {
        let dir = tempfile::tempdir().unwrap();
        let (paths, mut action) = setup(dir.path());

        let plain = compute_abi_tag(&paths, &action, &pre_build_info(), Vec::new(), &StubToolset)
            .unwrap()
            .unwrap();

        action.feature_list.insert("bzip2".to_string());
        let with_feature =
            compute_abi_tag(&paths, &action, &pre_build_info(), Vec::new(), &StubToolset)
                .unwrap()
                .unwrap();
        assert_ne!(plain.tag, with_feature.tag);

        // A "head" entry is exempt from the missing-value check but still
        // contributes to the tag.
        action
            .build_action
            .as_mut()
            .unwrap()
            .build_options
            .use_head_version = true;
        let with_head =
            compute_abi_tag(&paths, &action, &pre_build_info(), Vec::new(), &StubToolset)
                .unwrap()
                .unwrap();
        assert_ne!(with_feature.tag, with_head.tag);
    }

    #[test]
    fn test_oversized_port_is_marked_unhashable() {
        let dir = tempfile::tempdir().unwrap();
        let (paths, action) = setup(dir.path());
        for i in 0..MAX_PORT_FILE_COUNT + 1 {
            std::fs::write(paths.port_dir("zlib").join(format!("f{}", i)), "x").unwrap();
        }

        // The sentinel is exempt from the missing-value check, so a tag is
        // still produced.
        let result = compute_abi_tag(&paths, &action, &pre_build_info(), Vec::new(), &StubToolset)
            .unwrap()
            .unwrap();
        let info = std::fs::read_to_string(&result.tag_file).unwrap();
        assert!(info.contains("no_hash_max_portfile \n"));
        assert!(!info.contains("file_000"));
    }

    #[test]
    fn test_caching_disabled_when_option_off() {
        let dir = tempfile::tempdir().unwrap();
        let (paths, mut action) = setup(dir.path());
        action
            .build_action
            .as_mut()
            .unwrap()
            .build_options
            .binary_caching = false;
        let result =
            compute_abi_tag(&paths, &action, &pre_build_info(), Vec::new(), &StubToolset).unwrap();
        assert!(result.is_none());
    }
}
