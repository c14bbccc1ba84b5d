// tests/common/mod.rs

//! Shared fixtures for the scenario tests: manifest and status-database
//! construction plus a scripted toolset that records build invocations.

#![allow(dead_code)]

use portico::{
    BinaryParagraph, FeatureSpec, InstallationPaths, InstalledPackageView, PackageSpec,
    PortProvider, Result, SourceControlFile, Toolset, Triplet,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Route tracing output through the test harness; safe to call repeatedly
pub fn init_logging() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

pub fn triplet() -> Triplet {
    Triplet::new("x64-linux")
}

pub fn pspec(name: &str) -> PackageSpec {
    PackageSpec::new(name, triplet())
}

pub fn fspec(name: &str, feature: &str) -> FeatureSpec {
    FeatureSpec::new(pspec(name), feature)
}

pub fn scf(text: &str) -> SourceControlFile {
    SourceControlFile::parse(text).expect("test manifest parses")
}

/// Build an installed view from a provider's manifest, with a fake ABI tag
pub fn installed_view(
    provider: &dyn PortProvider,
    name: &str,
    features: &[&str],
) -> InstalledPackageView {
    let scf = provider
        .get_control_file(name)
        .expect("provider lookup")
        .expect("port exists");
    let core = BinaryParagraph::from_source(
        &scf.core_paragraph,
        &triplet(),
        format!("{}-installed-abi", name),
    );
    let feature_paragraphs = features
        .iter()
        .map(|feature| {
            BinaryParagraph::from_feature(
                &scf.core_paragraph,
                scf.find_feature(feature).expect("feature exists"),
                &triplet(),
            )
        })
        .collect();
    InstalledPackageView::new(core, feature_paragraphs)
}

/// Populate the prefix files the ABI computer and orchestrator expect
pub fn seed_prefix(paths: &InstallationPaths) {
    std::fs::create_dir_all(&paths.scripts).unwrap();
    std::fs::create_dir_all(paths.fixup_script().parent().unwrap()).unwrap();
    std::fs::write(paths.fixup_script(), "# fixup helper\n").unwrap();
    std::fs::write(paths.ports_script(), "# build driver\n").unwrap();
    std::fs::write(paths.triplet_inspection_script(), "# inspection\n").unwrap();
    std::fs::create_dir_all(&paths.triplets).unwrap();
    std::fs::write(
        paths.triplet_file(&triplet()),
        "set(VCPKG_TARGET_ARCHITECTURE x64)\n",
    )
    .unwrap();
}

/// Write a port directory with a manifest and a portfile
pub fn seed_port(paths: &InstallationPaths, name: &str, control: &str) {
    let port_dir = paths.port_dir(name);
    std::fs::create_dir_all(&port_dir).unwrap();
    std::fs::write(port_dir.join("CONTROL"), control).unwrap();
    std::fs::write(port_dir.join("portfile.cmake"), "# portfile\n").unwrap();
}

type BuildHook = Box<dyn Fn(&[(String, String)]) -> i32 + Send + Sync>;

/// A toolset that never spawns a process
///
/// `run_build` counts invocations and defers to a hook so tests can fake
/// the build's side effects (BUILD_INFO, package contents) or its failure.
pub struct ScriptedToolset {
    pub build_calls: AtomicUsize,
    git_exe: PathBuf,
    inspection_output: String,
    on_build: BuildHook,
}

impl ScriptedToolset {
    pub fn new(on_build: impl Fn(&[(String, String)]) -> i32 + Send + Sync + 'static) -> Self {
        Self {
            build_calls: AtomicUsize::new(0),
            git_exe: PathBuf::from("/usr/bin/git"),
            inspection_output: format!(
                "{}\nVCPKG_TARGET_ARCHITECTURE=x64\n",
                portico::build::TRIPLET_INFO_GUID
            ),
            on_build: Box::new(on_build),
        }
    }

    pub fn build_call_count(&self) -> usize {
        self.build_calls.load(Ordering::SeqCst)
    }
}

impl Toolset for ScriptedToolset {
    fn cmake_version(&self) -> Result<String> {
        Ok("3.14.0".to_string())
    }

    fn git_exe(&self) -> &Path {
        &self.git_exe
    }

    fn run_build(&self, _script: &Path, variables: &[(String, String)]) -> Result<i32> {
        self.build_calls.fetch_add(1, Ordering::SeqCst);
        Ok((self.on_build)(variables))
    }

    fn inspect_triplet(&self, _script: &Path, _triplet_file: &Path) -> Result<String> {
        Ok(self.inspection_output.clone())
    }

    fn pack_nuget(&self, _nuspec: &Path, _out_dir: &Path) -> Result<i32> {
        Ok(0)
    }

    fn push_nuget(&self, _package: &Path, _feed: &str) -> Result<i32> {
        Ok(0)
    }
}
