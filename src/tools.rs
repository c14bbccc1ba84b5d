// src/tools.rs

//! External tool seams
//!
//! The core never shells out directly: builds, triplet inspection and nuget
//! packing/pushing go through the `Toolset` trait, and the post-build
//! verifier goes through `PostBuildLint`. Production code uses
//! `ProcessToolset`; tests substitute scripted implementations.

use crate::build::{BuildInfo, PreBuildInfo};
use crate::error::{Error, Result};
use crate::paths::InstallationPaths;
use crate::spec::PackageSpec;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::OnceLock;
use tracing::debug;

/// Named interface over the external processes the orchestrator drives
pub trait Toolset: Send + Sync {
    /// Version string of the build tool, hashed into every ABI tag
    fn cmake_version(&self) -> Result<String>;

    /// Path to the git executable handed to port scripts
    fn git_exe(&self) -> &Path;

    /// Run the build driver script with `-D` variables; returns the exit code
    fn run_build(&self, script: &Path, variables: &[(String, String)]) -> Result<i32>;

    /// Run the triplet-inspection script and return its combined output
    fn inspect_triplet(&self, script: &Path, triplet_file: &Path) -> Result<String>;

    /// Pack a nuspec into a `.nupkg`; returns the exit code
    fn pack_nuget(&self, nuspec: &Path, out_dir: &Path) -> Result<i32>;

    /// Push a `.nupkg` to a remote feed; returns the exit code
    fn push_nuget(&self, package: &Path, feed: &str) -> Result<i32>;
}

/// Toolset backed by real processes
pub struct ProcessToolset {
    cmake_exe: PathBuf,
    git_exe: PathBuf,
    nuget_exe: PathBuf,
    cmake_version: OnceLock<String>,
}

impl ProcessToolset {
    pub fn new(
        cmake_exe: impl Into<PathBuf>,
        git_exe: impl Into<PathBuf>,
        nuget_exe: impl Into<PathBuf>,
    ) -> Self {
        Self {
            cmake_exe: cmake_exe.into(),
            git_exe: git_exe.into(),
            nuget_exe: nuget_exe.into(),
            cmake_version: OnceLock::new(),
        }
    }

    /// A toolset that expects `cmake`, `git` and `nuget` on PATH
    pub fn from_path() -> Self {
        Self::new("cmake", "git", "nuget")
    }

    fn cmake_args(script: &Path, variables: &[(String, String)]) -> Vec<String> {
        let mut args: Vec<String> = variables
            .iter()
            .map(|(name, value)| format!("-D{}={}", name, value))
            .collect();
        args.push("-P".to_string());
        args.push(script.display().to_string());
        args
    }
}

impl Toolset for ProcessToolset {
    fn cmake_version(&self) -> Result<String> {
        if let Some(version) = self.cmake_version.get() {
            return Ok(version.clone());
        }
        let output = Command::new(&self.cmake_exe).arg("--version").output()?;
        if !output.status.success() {
            return Err(Error::ToolFailed {
                tool: "cmake".to_string(),
                code: output.status.code().unwrap_or(-1),
            });
        }
        // First line is "cmake version X.Y.Z".
        let stdout = String::from_utf8_lossy(&output.stdout);
        let version = stdout
            .lines()
            .next()
            .and_then(|line| line.split_whitespace().last())
            .ok_or_else(|| Error::ParseError("unrecognized cmake version output".to_string()))?
            .to_string();
        Ok(self.cmake_version.get_or_init(|| version).clone())
    }

    fn git_exe(&self) -> &Path {
        &self.git_exe
    }

    fn run_build(&self, script: &Path, variables: &[(String, String)]) -> Result<i32> {
        let status = Command::new(&self.cmake_exe)
            .args(Self::cmake_args(script, variables))
            .status()?;
        Ok(status.code().unwrap_or(-1))
    }

    fn inspect_triplet(&self, script: &Path, triplet_file: &Path) -> Result<String> {
        let variables = [(
            "CMAKE_TRIPLET_FILE".to_string(),
            triplet_file.display().to_string(),
        )];
        let output = Command::new(&self.cmake_exe)
            .args(Self::cmake_args(script, &variables))
            .output()?;
        // cmake message() output lands on stderr; merge both streams.
        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        if !output.status.success() {
            debug!("triplet inspection output:\n{}", combined);
            return Err(Error::ToolFailed {
                tool: "cmake".to_string(),
                code: output.status.code().unwrap_or(-1),
            });
        }
        Ok(combined)
    }

    fn pack_nuget(&self, nuspec: &Path, out_dir: &Path) -> Result<i32> {
        let output = Command::new(&self.nuget_exe)
            .arg("pack")
            .arg(nuspec)
            .arg("-OutputDirectory")
            .arg(out_dir)
            .args(["-NoDefaultExcludes", "-NonInteractive", "-ForceEnglishOutput"])
            .output()?;
        if !output.status.success() {
            debug!("{}", String::from_utf8_lossy(&output.stdout));
        }
        Ok(output.status.code().unwrap_or(-1))
    }

    fn push_nuget(&self, package: &Path, feed: &str) -> Result<i32> {
        let output = Command::new(&self.nuget_exe)
            .arg("push")
            .arg(package)
            .args(["-Source", feed, "-ApiKey", "AzureDevOps"])
            .args(["-NonInteractive", "-ForceEnglishOutput"])
            .output()?;
        if !output.status.success() {
            debug!("{}", String::from_utf8_lossy(&output.stdout));
        }
        Ok(output.status.code().unwrap_or(-1))
    }
}

/// Named interface over the post-build verifier
pub trait PostBuildLint: Send + Sync {
    /// Run all checks against a built package; returns the error count
    fn perform_all_checks(
        &self,
        spec: &PackageSpec,
        paths: &InstallationPaths,
        pre_build_info: &PreBuildInfo,
        build_info: &BuildInfo,
    ) -> usize;
}

/// Structural checks only; rule internals live outside the core
pub struct DefaultLint;

impl PostBuildLint for DefaultLint {
    fn perform_all_checks(
        &self,
        spec: &PackageSpec,
        paths: &InstallationPaths,
        _pre_build_info: &PreBuildInfo,
        _build_info: &BuildInfo,
    ) -> usize {
        if !paths.package_dir(spec).is_dir() {
            tracing::error!("build produced no package directory for {}", spec);
            return 1;
        }
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cmake_args_shape() {
        let variables = [
            ("CMD".to_string(), "BUILD".to_string()),
            ("PORT".to_string(), "zlib".to_string()),
        ];
        let args = ProcessToolset::cmake_args(Path::new("/s/ports.cmake"), &variables);
        assert_eq!(
            args,
            vec!["-DCMD=BUILD", "-DPORT=zlib", "-P", "/s/ports.cmake"]
        );
    }

    #[test]
    fn test_default_lint_requires_package_dir() {
        let dir = tempfile::tempdir().unwrap();
        let paths = InstallationPaths::from_root(dir.path());
        let spec = PackageSpec::new("zlib", crate::spec::Triplet::new("x64-linux"));
        let pre = PreBuildInfo::default();
        let info = BuildInfo::default();

        assert_eq!(DefaultLint.perform_all_checks(&spec, &paths, &pre, &info), 1);
        std::fs::create_dir_all(paths.package_dir(&spec)).unwrap();
        assert_eq!(DefaultLint.perform_all_checks(&spec, &paths, &pre, &info), 0);
    }
}
