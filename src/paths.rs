// src/paths.rs

//! Directory layout of an installation prefix
//!
//! All well-known locations are derived from a single root so tests can run
//! against a throwaway prefix.

use crate::spec::{PackageSpec, Triplet};
use std::path::{Path, PathBuf};

/// The well-known directories of an installation prefix
#[derive(Debug, Clone)]
pub struct InstallationPaths {
    pub root: PathBuf,
    pub ports: PathBuf,
    pub triplets: PathBuf,
    pub buildtrees: PathBuf,
    pub packages: PathBuf,
    pub scripts: PathBuf,
    pub downloads: PathBuf,
}

impl InstallationPaths {
    /// Derive the standard layout from a root directory
    pub fn from_root(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            ports: root.join("ports"),
            triplets: root.join("triplets"),
            buildtrees: root.join("buildtrees"),
            packages: root.join("packages"),
            scripts: root.join("scripts"),
            downloads: root.join("downloads"),
            root,
        }
    }

    /// Directory of a port's manifest and build scripts
    pub fn port_dir(&self, name: &str) -> PathBuf {
        self.ports.join(name)
    }

    /// Staging directory of a built package
    pub fn package_dir(&self, spec: &PackageSpec) -> PathBuf {
        self.packages.join(spec.dir())
    }

    /// The BUILD_INFO file the build writes into the package directory
    pub fn build_info_path(&self, spec: &PackageSpec) -> PathBuf {
        self.package_dir(spec).join("BUILD_INFO")
    }

    /// Scratch directory of a port's build
    pub fn buildtree_dir(&self, name: &str) -> PathBuf {
        self.buildtrees.join(name)
    }

    /// The serialized ABI info written before hashing
    pub fn abi_info_path(&self, name: &str, triplet: &Triplet) -> PathBuf {
        self.buildtree_dir(name)
            .join(format!("{}.vcpkg_abi_info.txt", triplet))
    }

    /// The triplet definition file
    pub fn triplet_file(&self, triplet: &Triplet) -> PathBuf {
        self.triplets.join(format!("{}.cmake", triplet))
    }

    /// The build driver script handed to the build tool
    pub fn ports_script(&self) -> PathBuf {
        self.scripts.join("ports.cmake")
    }

    /// The script that echoes the triplet-inspection protocol
    pub fn triplet_inspection_script(&self) -> PathBuf {
        self.scripts.join("get_triplet_environment.cmake")
    }

    /// The helper script hashed into every ABI tag
    pub fn fixup_script(&self) -> PathBuf {
        self.scripts
            .join("cmake")
            .join("vcpkg_fixup_cmake_targets.cmake")
    }

    /// The bundled toolchain file for a cmake system name, if any
    pub fn toolchain_file(&self, cmake_system_name: &str) -> Option<PathBuf> {
        let file = match cmake_system_name {
            "Linux" => "linux.cmake",
            "Darwin" => "osx.cmake",
            "FreeBSD" => "freebsd.cmake",
            "Android" => "android.cmake",
            _ => return None,
        };
        Some(self.scripts.join("toolchains").join(file))
    }

    /// Root of the local archive cache
    pub fn archives_root(&self) -> PathBuf {
        self.root.join("archives")
    }

    /// Local mirror of restored and packed nuget packages
    pub fn nuget_archives(&self) -> PathBuf {
        self.root.join("archives.nuget")
    }
}

impl AsRef<Path> for InstallationPaths {
    fn as_ref(&self) -> &Path {
        &self.root
    }
}
