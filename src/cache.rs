// src/cache.rs

//! Content-addressed binary cache
//!
//! Successful builds are stored as zip archives keyed by ABI tag under
//! `<root>/archives/<tag[0:2]>/<tag>.zip`; failures leave a tombstone of
//! captured logs under `archives/fail/` with the same fan-out. When a remote
//! nuget feed is configured, successes are additionally packed as `.nupkg`
//! files, mirrored into `archives.nuget/` and uploaded in the background.
//! All cache writes go through a temp-then-rename swing.

use crate::error::{Error, Result};
use crate::jobs::JobQueue;
use crate::paths::InstallationPaths;
use crate::plan::InstallPlanAction;
use crate::spec::PackageSpec;
use crate::tools::Toolset;
use regex::Regex;
use std::fs;
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use tracing::{info, warn};

/// Map a package version and ABI tag to a nuget-compatible version string
///
/// Versions matching `v?major.minor(.patch)?` keep their numeric prefix
/// (patch padded to `.0` when absent); anything else maps to `0.0.0`. The
/// ABI tag always rides along as the prerelease label.
pub fn nuget_package_version(version: &str, abi_tag: &str) -> String {
    static SEMVER: OnceLock<Regex> = OnceLock::new();
    let semver = SEMVER.get_or_init(|| {
        Regex::new(r"^v?(\d+\.\d+)(\.(\d+))?.*$").expect("semver matcher is a valid regex")
    });

    match semver.captures(version) {
        Some(captures) => match captures.get(2) {
            Some(patch) => format!("{}{}-{}", &captures[1], patch.as_str(), abi_tag),
            None => format!("{}.0-{}", &captures[1], abi_tag),
        },
        None => format!("0.0.0-{}", abi_tag),
    }
}

const NUSPEC_TEMPLATE: &str = r#"
<package>
    <metadata>
        <id>@NUGET_ID@</id>
        <version>@VERSION@</version>
        <authors>portico</authors>
        <summary>@SUMMARY@</summary>
        <description>
            @DESCRIPTION@
        </description>
        <packageTypes><packageType name="portico" /></packageTypes>
        @METADATA@
    </metadata>
    <files>
        <file src="@PACKAGE_DIR@\**" target="" />
    </files>
</package>
"#;

const NUSPEC_SUMMARY: &str =
    "Binary cache package automatically generated by portico. NOT FOR DIRECT USE.";

/// Compress a directory's contents into a zip archive
///
/// Any existing archive at `destination` is replaced.
pub fn compress_directory(source: &Path, destination: &Path) -> Result<()> {
    if destination.exists() {
        fs::remove_file(destination)?;
    }
    let file = fs::File::create(destination)?;
    let mut writer = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default();

    for entry in walkdir::WalkDir::new(source) {
        let entry = entry.map_err(std::io::Error::from)?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|e| Error::archive(entry.path(), e))?;
        if relative.as_os_str().is_empty() {
            continue;
        }
        let name = relative.to_string_lossy().replace('\\', "/");

        if entry.file_type().is_dir() {
            writer
                .add_directory(name, options)
                .map_err(|e| Error::archive(destination, e))?;
        } else if entry.file_type().is_file() {
            writer
                .start_file(name, options)
                .map_err(|e| Error::archive(destination, e))?;
            let mut contents = Vec::new();
            fs::File::open(entry.path())?.read_to_end(&mut contents)?;
            writer.write_all(&contents)?;
        }
    }

    writer.finish().map_err(|e| Error::archive(destination, e))?;
    Ok(())
}

/// Unpack a zip archive into a directory
pub fn extract_archive(archive: &Path, destination: &Path) -> Result<()> {
    let file = fs::File::open(archive)?;
    let mut zip =
        zip::ZipArchive::new(BufReader::new(file)).map_err(|e| Error::archive(archive, e))?;

    for i in 0..zip.len() {
        let mut entry = zip.by_index(i).map_err(|e| Error::archive(archive, e))?;
        let relative = entry
            .enclosed_name()
            .ok_or_else(|| Error::archive(archive, "entry escapes the destination"))?;
        let out_path = destination.join(relative);
        if entry.is_dir() {
            fs::create_dir_all(&out_path)?;
        } else {
            if let Some(parent) = out_path.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut out = fs::File::create(&out_path)?;
            std::io::copy(&mut entry, &mut out)?;
        }
    }

    Ok(())
}

// Rename with a copy fallback for cross-device moves; the copy lands on a
// `.tmp` swing file first so the final name only ever appears complete.
fn rename_or_copy(from: &Path, to: &Path) -> Result<()> {
    if fs::rename(from, to).is_ok() {
        return Ok(());
    }
    let swing = PathBuf::from(format!("{}.tmp", to.display()));
    fs::copy(from, &swing)?;
    fs::rename(&swing, to)?;
    let _ = fs::remove_file(from);
    Ok(())
}

/// The composed local-archive + optional-remote-feed cache
pub struct BinaryCache<'a> {
    paths: &'a InstallationPaths,
}

impl<'a> BinaryCache<'a> {
    pub fn new(paths: &'a InstallationPaths) -> Self {
        Self { paths }
    }

    // The two-hex-char prefix fan-out keeps any single directory small.
    fn archive_subpath(tag: &str) -> PathBuf {
        PathBuf::from(&tag[..2]).join(format!("{}.zip", tag))
    }

    /// Archive path for a successful build with this ABI tag
    pub fn archive_path(&self, tag: &str) -> PathBuf {
        self.paths.archives_root().join(Self::archive_subpath(tag))
    }

    /// Tombstone path for a failed build with this ABI tag
    pub fn tombstone_path(&self, tag: &str) -> PathBuf {
        self.paths
            .archives_root()
            .join("fail")
            .join(Self::archive_subpath(tag))
    }

    fn nuget_archive_path(&self, nuget_id: &str, nuget_version: &str) -> PathBuf {
        self.paths
            .nuget_archives()
            .join(format!("{}.{}.nupkg", nuget_id, nuget_version))
    }

    /// Restore a previously downloaded remote package left in the package dir
    ///
    /// The unpacked `.nupkg` is moved aside into the local nuget mirror:
    /// renamed when the mirror does not have it yet, deleted otherwise.
    pub fn try_restore_nuget(
        &self,
        package_dir: &Path,
        nuget_id: &str,
        nuget_version: &str,
    ) -> Result<bool> {
        let nupkg = package_dir.join(format!("{}.nupkg", nuget_id));
        if !nupkg.exists() {
            return Ok(false);
        }

        let target = self.nuget_archive_path(nuget_id, nuget_version);
        if target.exists() {
            fs::remove_file(&nupkg)?;
        } else {
            fs::create_dir_all(self.paths.nuget_archives())?;
            fs::rename(&nupkg, &target)?;
        }
        info!("Using unpacked NuGet package");
        Ok(true)
    }

    /// Restore a build from the local archive tree
    pub fn try_restore_archive(&self, package_dir: &Path, tag: &str) -> Result<bool> {
        let archive = self.archive_path(tag);
        if !archive.exists() {
            return Ok(false);
        }

        info!("Using cached binary package: {}", archive.display());

        let _ = fs::remove_dir_all(package_dir);
        fs::create_dir_all(package_dir)?;
        if fs::read_dir(package_dir)?.next().is_some() {
            return Err(Error::archive(package_dir, "unable to clear path"));
        }
        extract_archive(&archive, package_dir)?;
        Ok(true)
    }

    /// Store a successful build in the local archive tree
    ///
    /// A publication failure is a warning; the build outcome stands.
    pub fn publish_archive(&self, spec: &PackageSpec, tag: &str) -> Result<()> {
        let tmp_archive = self
            .paths
            .buildtree_dir(spec.name())
            .join(format!("{}.zip", spec.triplet()));
        compress_directory(&self.paths.package_dir(spec), &tmp_archive)?;

        let archive_path = self.archive_path(tag);
        if let Some(parent) = archive_path.parent() {
            fs::create_dir_all(parent)?;
        }
        match rename_or_copy(&tmp_archive, &archive_path) {
            Ok(()) => info!("Stored binary cache: {}", archive_path.display()),
            Err(e) => warn!(
                "Failed to store binary cache {}: {}",
                archive_path.display(),
                e
            ),
        }
        Ok(())
    }

    /// Pack a successful build for the remote feed and upload in background
    ///
    /// The `.nupkg` lands in the local nuget mirror first, so a failed
    /// upload still leaves the package restorable on the next run.
    #[allow(clippy::too_many_arguments)]
    pub fn publish_nuget(
        &self,
        action: &InstallPlanAction,
        nuget_id: &str,
        nuget_version: &str,
        nuget_dependency_strings: &[String],
        feed: &str,
        toolset: Arc<dyn Toolset>,
        jobs: &JobQueue,
    ) -> Result<()> {
        let build_action = action
            .build_action
            .as_ref()
            .ok_or_else(|| Error::internal("nuget publish without a build action"))?;
        let core = &build_action.scf.core_paragraph;
        let buildtree_dir = self.paths.buildtree_dir(&core.name);
        let package_dir = self.paths.package_dir(&action.spec);

        let mut description = format!("{}\n\n", NUSPEC_SUMMARY);
        description.push_str(&core.description);
        description.push_str("\n\n");
        description.push_str(&format!("Version: {}\n", core.version));
        let features: Vec<&str> = action.feature_list.iter().map(String::as_str).collect();
        description.push_str(&format!("Features: {}\n", features.join(", ")));
        if !nuget_dependency_strings.is_empty() {
            description.push_str("\nDependencies:\n");
            for dep in nuget_dependency_strings {
                description.push_str(&format!("    {}\n", dep));
            }
        }

        let mut metadata = String::new();
        if !core.homepage.is_empty() {
            metadata.push_str(&format!("<projectUrl>{}</projectUrl>", core.homepage));
        }

        let nuspec_content = NUSPEC_TEMPLATE
            .replace("@NUGET_ID@", nuget_id)
            .replace("@VERSION@", nuget_version)
            .replace("@PACKAGE_DIR@", &package_dir.display().to_string())
            .replace("@SUMMARY@", NUSPEC_SUMMARY)
            .replace("@DESCRIPTION@", &description)
            .replace("@METADATA@", &metadata);

        let nuspec_path = buildtree_dir.join(format!("{}.nuspec", nuget_id));
        fs::write(&nuspec_path, nuspec_content)?;

        let pack_code = toolset.pack_nuget(&nuspec_path, &buildtree_dir)?;
        if pack_code != 0 {
            tracing::error!("Packing NuGet failed with code {}", pack_code);
            return Ok(());
        }

        fs::create_dir_all(self.paths.nuget_archives())?;
        let packed = buildtree_dir.join(format!("{}.{}.nupkg", nuget_id, nuget_version));
        let mirrored = self.nuget_archive_path(nuget_id, nuget_version);
        rename_or_copy(&packed, &mirrored)?;

        info!("Uploading package to NuGet Feed in background.");
        let feed = feed.to_string();
        let spec = action.spec.clone();
        let description = format!("Uploading {} to NuGet Feed", spec);
        jobs.post(
            move || match toolset.push_nuget(&mirrored, &feed) {
                Ok(0) => {}
                Ok(code) => tracing::debug!("nuget push for {} exited with {}", spec, code),
                Err(e) => tracing::debug!("nuget push for {} failed: {}", spec, e),
            },
            description,
        );
        Ok(())
    }

    /// Record a build failure as a tombstone of captured logs
    ///
    /// Only the first failure for a tag is recorded; tombstones are never
    /// overwritten. The log staging directory is removed on every path out.
    pub fn publish_failure(&self, spec: &PackageSpec, tag: &str) -> Result<()> {
        let tombstone = self.tombstone_path(tag);
        if tombstone.exists() {
            return Ok(());
        }

        let buildtree_dir = self.paths.buildtree_dir(spec.name());
        let staging = buildtree_dir.join("tmp_failure_logs");
        let staging_dest = staging.join(spec.name());
        let tmp_zip = buildtree_dir.join("failure_logs.zip");

        let outcome = (|| -> Result<()> {
            fs::create_dir_all(&staging_dest)?;
            if buildtree_dir.is_dir() {
                for entry in fs::read_dir(&buildtree_dir)? {
                    let path = entry?.path();
                    if path.extension().is_some_and(|ext| ext == "log") {
                        if let Some(file_name) = path.file_name() {
                            fs::copy(&path, staging_dest.join(file_name))?;
                        }
                    }
                }
            }
            compress_directory(&staging, &tmp_zip)?;
            if let Some(parent) = tombstone.parent() {
                fs::create_dir_all(parent)?;
            }
            rename_or_copy(&tmp_zip, &tombstone)
        })();

        let _ = fs::remove_dir_all(&staging);
        if let Err(e) = outcome {
            warn!(
                "failed to record failure tombstone {}: {}",
                tombstone.display(),
                e
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::Triplet;

    #[test]
    fn test_nuget_package_version_scheme() {
        assert_eq!(nuget_package_version("1.2.11", "abc"), "1.2.11-abc");
        assert_eq!(nuget_package_version("1.2", "abc"), "1.2.0-abc");
        assert_eq!(nuget_package_version("v1.2.3", "abc"), "1.2.3-abc");
        assert_eq!(nuget_package_version("1.2.11-8", "abc"), "1.2.11-abc");
        assert_eq!(nuget_package_version("2019-02-21", "abc"), "0.0.0-abc");
        assert_eq!(nuget_package_version("latest", "abc"), "0.0.0-abc");
    }

    #[test]
    fn test_cache_paths_use_two_hex_fanout() {
        let paths = InstallationPaths::from_root("/prefix");
        let cache = BinaryCache::new(&paths);
        let tag = "abcdef0123456789abcdef0123456789abcdef01";

        let archive = cache.archive_path(tag);
        assert_eq!(
            archive,
            Path::new("/prefix/archives/ab/abcdef0123456789abcdef0123456789abcdef01.zip")
        );
        assert_eq!(archive.parent().unwrap().file_name().unwrap(), "ab");

        let tombstone = cache.tombstone_path(tag);
        assert_eq!(
            tombstone,
            Path::new("/prefix/archives/fail/ab/abcdef0123456789abcdef0123456789abcdef01.zip")
        );
        assert_eq!(tombstone.parent().unwrap().file_name().unwrap(), "ab");
    }

    #[test]
    fn test_compress_extract_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("pkg");
        fs::create_dir_all(source.join("share/zlib")).unwrap();
        fs::write(source.join("CONTROL"), "Package: zlib\n").unwrap();
        fs::write(source.join("share/zlib/info.txt"), "hello").unwrap();

        let archive = dir.path().join("out.zip");
        compress_directory(&source, &archive).unwrap();
        assert!(archive.exists());

        let restored = dir.path().join("restored");
        extract_archive(&archive, &restored).unwrap();
        assert_eq!(
            fs::read_to_string(restored.join("CONTROL")).unwrap(),
            "Package: zlib\n"
        );
        assert_eq!(
            fs::read_to_string(restored.join("share/zlib/info.txt")).unwrap(),
            "hello"
        );
    }

    #[test]
    fn test_try_restore_archive_miss_and_hit() {
        let dir = tempfile::tempdir().unwrap();
        let paths = InstallationPaths::from_root(dir.path());
        let cache = BinaryCache::new(&paths);
        let tag = "ab00000000000000000000000000000000000000";
        let package_dir = dir.path().join("packages/zlib_x64-linux");

        assert!(!cache.try_restore_archive(&package_dir, tag).unwrap());

        // Stage an archive at the content address, then restore it.
        let staged = dir.path().join("staged");
        fs::create_dir_all(&staged).unwrap();
        fs::write(staged.join("CONTROL"), "Package: zlib\n").unwrap();
        let archive = cache.archive_path(tag);
        fs::create_dir_all(archive.parent().unwrap()).unwrap();
        compress_directory(&staged, &archive).unwrap();

        assert!(cache.try_restore_archive(&package_dir, tag).unwrap());
        assert!(package_dir.join("CONTROL").exists());
    }

    #[test]
    fn test_try_restore_nuget_moves_package_aside() {
        let dir = tempfile::tempdir().unwrap();
        let paths = InstallationPaths::from_root(dir.path());
        let cache = BinaryCache::new(&paths);
        let package_dir = dir.path().join("packages/zlib_x64-linux");
        fs::create_dir_all(&package_dir).unwrap();

        assert!(!cache
            .try_restore_nuget(&package_dir, "zlib_x64-linux", "1.2.11-abc")
            .unwrap());

        fs::write(package_dir.join("zlib_x64-linux.nupkg"), "pkg").unwrap();
        assert!(cache
            .try_restore_nuget(&package_dir, "zlib_x64-linux", "1.2.11-abc")
            .unwrap());
        assert!(!package_dir.join("zlib_x64-linux.nupkg").exists());
        assert!(paths
            .nuget_archives()
            .join("zlib_x64-linux.1.2.11-abc.nupkg")
            .exists());

        // A second restore with the mirror already populated deletes the
        // unpacked copy instead of renaming it.
        fs::write(package_dir.join("zlib_x64-linux.nupkg"), "pkg").unwrap();
        assert!(cache
            .try_restore_nuget(&package_dir, "zlib_x64-linux", "1.2.11-abc")
            .unwrap());
        assert!(!package_dir.join("zlib_x64-linux.nupkg").exists());
    }

    #[test]
    fn test_publish_failure_records_logs_once() {
        let dir = tempfile::tempdir().unwrap();
        let paths = InstallationPaths::from_root(dir.path());
        let cache = BinaryCache::new(&paths);
        let spec = PackageSpec::new("zlib", Triplet::new("x64-linux"));
        let tag = "cd00000000000000000000000000000000000000";

        let buildtree = paths.buildtree_dir("zlib");
        fs::create_dir_all(&buildtree).unwrap();
        fs::write(buildtree.join("build.log"), "error: boom\n").unwrap();
        fs::write(buildtree.join("not-a-log.txt"), "ignored").unwrap();

        cache.publish_failure(&spec, tag).unwrap();
        let tombstone = cache.tombstone_path(tag);
        assert!(tombstone.exists());
        // Staging directory is cleaned up.
        assert!(!buildtree.join("tmp_failure_logs").exists());

        // A second failure does not rewrite the tombstone.
        let first_len = fs::metadata(&tombstone).unwrap().len();
        fs::write(buildtree.join("second.log"), "more\n").unwrap();
        cache.publish_failure(&spec, tag).unwrap();
        assert_eq!(fs::metadata(&tombstone).unwrap().len(), first_len);

        // The tombstone contains the captured log.
        let unpacked = dir.path().join("unpacked");
        extract_archive(&tombstone, &unpacked).unwrap();
        assert!(unpacked.join("zlib/build.log").exists());
        assert!(!unpacked.join("zlib/not-a-log.txt").exists());
    }
}
