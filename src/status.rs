// src/status.rs

//! Installed-state model: binary paragraphs and the status database
//!
//! A `BinaryParagraph` records one built paragraph (the core package or one
//! feature) with its version, ABI tag, recorded default features and direct
//! dependencies. An `InstalledPackageView` groups the core paragraph with
//! its installed feature paragraphs. The `StatusDb` is the snapshot of all
//! currently installed views the planner works against.

use crate::error::{Error, Result};
use crate::paragraph::{optional_field, parse_paragraphs, required_field, split_comma_list};
use crate::paths::InstallationPaths;
use crate::ports::{filter_dependency_names, FeatureParagraph, SourceParagraph};
use crate::spec::{FeatureSpec, PackageSpec, Triplet};

/// One installed (or freshly built) paragraph
#[derive(Debug, Clone)]
pub struct BinaryParagraph {
    pub spec: PackageSpec,
    /// `None` for the core paragraph, `Some(name)` for a feature paragraph
    pub feature: Option<String>,
    pub version: String,
    pub description: String,
    pub abi: String,
    pub default_features: Vec<String>,
    /// Direct dependency package names
    pub depends: Vec<String>,
}

impl BinaryParagraph {
    /// Build the core paragraph for a freshly built package
    pub fn from_source(source: &SourceParagraph, triplet: &Triplet, abi: String) -> Self {
        Self {
            spec: PackageSpec::new(source.name.clone(), triplet.clone()),
            feature: None,
            version: source.version.clone(),
            description: source.description.clone(),
            abi,
            default_features: source.default_features.clone(),
            depends: filter_dependency_names(&source.depends, triplet),
        }
    }

    /// Build a feature paragraph for a freshly built package
    pub fn from_feature(
        source: &SourceParagraph,
        feature: &FeatureParagraph,
        triplet: &Triplet,
    ) -> Self {
        Self {
            spec: PackageSpec::new(source.name.clone(), triplet.clone()),
            feature: Some(feature.name.clone()),
            version: source.version.clone(),
            description: feature.description.clone(),
            abi: String::new(),
            default_features: Vec::new(),
            depends: filter_dependency_names(&feature.depends, triplet),
        }
    }

    /// Directory name of this package under `packages/`
    pub fn dir(&self) -> String {
        self.spec.dir()
    }

    /// Serialize to the paragraph format
    pub fn serialize(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("Package: {}\n", self.spec.name()));
        if let Some(feature) = &self.feature {
            out.push_str(&format!("Feature: {}\n", feature));
        }
        out.push_str(&format!("Version: {}\n", self.version));
        out.push_str(&format!("Architecture: {}\n", self.spec.triplet()));
        if !self.abi.is_empty() {
            out.push_str(&format!("Abi: {}\n", self.abi));
        }
        if !self.depends.is_empty() {
            out.push_str(&format!("Depends: {}\n", self.depends.join(", ")));
        }
        if !self.default_features.is_empty() {
            out.push_str(&format!(
                "Default-Features: {}\n",
                self.default_features.join(", ")
            ));
        }
        if !self.description.is_empty() {
            out.push_str(&format!("Description: {}\n", self.description));
        }
        out
    }

    /// Parse a paragraph back from its serialized form
    pub fn from_paragraph(mut paragraph: crate::paragraph::Paragraph) -> Result<Self> {
        let name = required_field(&mut paragraph, "Package")?;
        let triplet = Triplet::new(required_field(&mut paragraph, "Architecture")?);
        Ok(Self {
            spec: PackageSpec::new(name, triplet),
            feature: optional_field(&mut paragraph, "Feature"),
            version: required_field(&mut paragraph, "Version")?,
            description: optional_field(&mut paragraph, "Description").unwrap_or_default(),
            abi: optional_field(&mut paragraph, "Abi").unwrap_or_default(),
            default_features: optional_field(&mut paragraph, "Default-Features")
                .map(|v| split_comma_list(&v))
                .unwrap_or_default(),
            depends: optional_field(&mut paragraph, "Depends")
                .map(|v| split_comma_list(&v))
                .unwrap_or_default(),
        })
    }
}

/// The CONTROL file written next to a built package
#[derive(Debug, Clone)]
pub struct BinaryControlFile {
    pub core_paragraph: BinaryParagraph,
    pub features: Vec<BinaryParagraph>,
}

impl BinaryControlFile {
    pub fn new(core_paragraph: BinaryParagraph) -> Self {
        Self {
            core_paragraph,
            features: Vec::new(),
        }
    }

    pub fn serialize(&self) -> String {
        let mut out = self.core_paragraph.serialize();
        for feature in &self.features {
            out.push('\n');
            out.push_str(&feature.serialize());
        }
        out
    }
}

/// Write a binary control file into its package directory
pub fn write_binary_control_file(paths: &InstallationPaths, bcf: &BinaryControlFile) -> Result<()> {
    let package_dir = paths.packages.join(bcf.core_paragraph.dir());
    std::fs::create_dir_all(&package_dir)?;
    std::fs::write(package_dir.join("CONTROL"), bcf.serialize())?;
    Ok(())
}

/// Reload the control file of a cached package directory
pub fn try_load_cached_package(
    paths: &InstallationPaths,
    spec: &PackageSpec,
) -> Result<BinaryControlFile> {
    let control_path = paths.package_dir(spec).join("CONTROL");
    let text = std::fs::read_to_string(&control_path).map_err(|e| {
        Error::ParseError(format!(
            "cached package has no control file at {}: {}",
            control_path.display(),
            e
        ))
    })?;
    let mut paragraphs = parse_paragraphs(&text)?
        .into_iter()
        .map(BinaryParagraph::from_paragraph)
        .collect::<Result<Vec<_>>>()?;
    if paragraphs.is_empty() {
        return Err(Error::ParseError(format!(
            "cached package control file {} is empty",
            control_path.display()
        )));
    }
    let core = paragraphs.remove(0);
    Ok(BinaryControlFile {
        core_paragraph: core,
        features: paragraphs,
    })
}

/// A currently installed package: core paragraph plus installed features
#[derive(Debug, Clone)]
pub struct InstalledPackageView {
    pub core: BinaryParagraph,
    pub features: Vec<BinaryParagraph>,
}

impl InstalledPackageView {
    pub fn new(core: BinaryParagraph, features: Vec<BinaryParagraph>) -> Self {
        Self { core, features }
    }

    pub fn spec(&self) -> &PackageSpec {
        &self.core.spec
    }

    /// Names of the installed feature paragraphs
    pub fn feature_names(&self) -> impl Iterator<Item = &str> {
        self.features.iter().filter_map(|f| f.feature.as_deref())
    }

    /// Direct dependencies of every installed paragraph, as package specs
    ///
    /// Dependencies resolve to the view's own triplet; the package itself is
    /// excluded (feature paragraphs list their own core as a dependency).
    pub fn dependencies(&self) -> Vec<PackageSpec> {
        let mut specs: Vec<PackageSpec> = std::iter::once(&self.core)
            .chain(self.features.iter())
            .flat_map(|paragraph| paragraph.depends.iter())
            .filter(|name| name.as_str() != self.core.spec.name())
            .map(|name| PackageSpec::new(name.clone(), self.core.spec.triplet().clone()))
            .collect();
        specs.sort();
        specs.dedup();
        specs
    }
}

/// Snapshot of the currently installed package views
#[derive(Debug, Default)]
pub struct StatusDb {
    installed: Vec<InstalledPackageView>,
}

impl StatusDb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, view: InstalledPackageView) {
        self.installed.push(view);
    }

    pub fn find(&self, spec: &PackageSpec) -> Option<&InstalledPackageView> {
        self.installed.iter().find(|view| view.spec() == spec)
    }

    /// Whether a feature spec is satisfied by the installed state
    pub fn is_installed(&self, fspec: &FeatureSpec) -> bool {
        match self.find(fspec.spec()) {
            None => false,
            Some(view) => {
                let feature = fspec.feature();
                feature.is_empty()
                    || feature == "core"
                    || view.feature_names().any(|name| name == feature)
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &InstalledPackageView> {
        self.installed.iter()
    }

    pub fn len(&self) -> usize {
        self.installed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.installed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::SourceControlFile;

    fn t(name: &str) -> Triplet {
        Triplet::new(name)
    }

    fn curl_scf() -> SourceControlFile {
        SourceControlFile::parse(
            "Source: curl\nVersion: 7.68.0\nBuild-Depends: zlib\nDescription: curl\n\n\
             Feature: ssl\nBuild-Depends: openssl, curl\n",
        )
        .unwrap()
    }

    fn installed_curl() -> InstalledPackageView {
        let scf = curl_scf();
        let core = BinaryParagraph::from_source(&scf.core_paragraph, &t("x64-linux"), "abc".into());
        let ssl = BinaryParagraph::from_feature(
            &scf.core_paragraph,
            scf.find_feature("ssl").unwrap(),
            &t("x64-linux"),
        );
        InstalledPackageView::new(core, vec![ssl])
    }

    #[test]
    fn test_dependencies_union_excludes_self() {
        let view = installed_curl();
        let deps = view.dependencies();
        assert_eq!(
            deps,
            vec![
                PackageSpec::new("openssl", t("x64-linux")),
                PackageSpec::new("zlib", t("x64-linux")),
            ]
        );
    }

    #[test]
    fn test_serialize_parse_round_trip() {
        let view = installed_curl();
        let text = view.core.serialize();
        let mut paragraphs = parse_paragraphs(&text).unwrap();
        let parsed = BinaryParagraph::from_paragraph(paragraphs.remove(0)).unwrap();
        assert_eq!(parsed.spec, view.core.spec);
        assert_eq!(parsed.version, view.core.version);
        assert_eq!(parsed.abi, "abc");
        assert_eq!(parsed.depends, vec!["zlib"]);
    }

    #[test]
    fn test_status_db_is_installed() {
        let mut db = StatusDb::new();
        db.insert(installed_curl());

        let spec = PackageSpec::new("curl", t("x64-linux"));
        assert!(db.is_installed(&FeatureSpec::new(spec.clone(), "core")));
        assert!(db.is_installed(&FeatureSpec::new(spec.clone(), "ssl")));
        assert!(db.is_installed(&FeatureSpec::new(spec.clone(), "")));
        assert!(!db.is_installed(&FeatureSpec::new(spec, "http2")));
        assert!(!db.is_installed(&FeatureSpec::new(
            PackageSpec::new("zlib", t("x64-linux")),
            "core"
        )));
    }

    #[test]
    fn test_binary_control_file_serialize_has_blank_separator() {
        let view = installed_curl();
        let mut bcf = BinaryControlFile::new(view.core.clone());
        bcf.features = view.features.clone();
        let text = bcf.serialize();
        let paragraphs = parse_paragraphs(&text).unwrap();
        assert_eq!(paragraphs.len(), 2);
    }
}
