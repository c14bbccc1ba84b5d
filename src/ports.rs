// src/ports.rs

//! Port manifests and port catalogs
//!
//! A port is described by a `CONTROL` manifest: one core paragraph plus zero
//! or more feature paragraphs, each listing dependencies as
//! `name[feature,feature]:triplet` references filtered by an optional
//! platform qualifier. Catalogs hand out parsed manifests either from an
//! in-memory map or on demand from a ports directory, memoized per name.

use crate::error::{Error, Result};
use crate::paragraph::{
    optional_field, parse_paragraphs, required_field, split_comma_list, Paragraph,
};
use crate::spec::{FeatureSpec, PackageSpec, Triplet};
use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Platform qualifier on a dependency entry, e.g. `(windows)` or `(!windows)`
///
/// The single term is matched as a substring of the dependent's triplet name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformExpr {
    negated: bool,
    term: String,
}

impl PlatformExpr {
    pub fn parse(expr: &str) -> Result<Self> {
        let expr = expr.trim();
        let (negated, term) = match expr.strip_prefix('!') {
            Some(rest) => (true, rest.trim()),
            None => (false, expr),
        };
        if term.is_empty() {
            return Err(Error::ParseError("empty platform expression".to_string()));
        }
        Ok(Self {
            negated,
            term: term.to_string(),
        })
    }

    pub fn matches(&self, triplet: &Triplet) -> bool {
        triplet.canonical_name().contains(&self.term) != self.negated
    }
}

/// One parsed `Build-Depends` entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    pub name: String,
    pub features: Vec<String>,
    pub triplet: Option<Triplet>,
    pub platform: Option<PlatformExpr>,
}

impl Dependency {
    /// Whether this entry applies when the dependent targets `triplet`
    pub fn applies_to(&self, triplet: &Triplet) -> bool {
        self.platform
            .as_ref()
            .map_or(true, |expr| expr.matches(triplet))
    }
}

/// Parse a dependency entry: `name[ "[" feature_list "]" ][ ":" triplet ][ "(" platform ")" ]`
pub fn parse_dependency(entry: &str) -> Result<Dependency> {
    let mut rest = entry.trim();

    let platform = match (rest.rfind('('), rest.ends_with(')')) {
        (Some(open), true) => {
            let expr = PlatformExpr::parse(&rest[open + 1..rest.len() - 1])?;
            rest = rest[..open].trim_end();
            Some(expr)
        }
        _ => None,
    };

    let triplet = match rest.split_once(':') {
        Some((before, after)) => {
            rest = before;
            Some(Triplet::new(after.trim()))
        }
        None => None,
    };

    let features = match rest.find('[') {
        Some(open) => {
            if !rest.ends_with(']') {
                return Err(Error::ParseError(format!(
                    "unterminated feature list in dependency {:?}",
                    entry
                )));
            }
            let list = split_comma_list(&rest[open + 1..rest.len() - 1]);
            rest = &rest[..open];
            list
        }
        None => Vec::new(),
    };

    let name = rest.trim();
    if name.is_empty() {
        return Err(Error::ParseError(format!(
            "dependency entry {:?} has no package name",
            entry
        )));
    }

    Ok(Dependency {
        name: name.to_string(),
        features,
        triplet,
        platform,
    })
}

fn parse_depends_field(value: &str) -> Result<Vec<Dependency>> {
    split_comma_list_outside_brackets(value)
        .iter()
        .map(|entry| parse_dependency(entry))
        .collect()
}

// Feature lists inside `[...]` use commas too, so the entry separator must
// skip over bracketed spans.
fn split_comma_list_outside_brackets(value: &str) -> Vec<String> {
    let mut entries = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for (i, c) in value.char_indices() {
        match c {
            '[' => depth += 1,
            ']' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                entries.push(value[start..i].trim().to_string());
                start = i + 1;
            }
            _ => {}
        }
    }
    entries.push(value[start..].trim().to_string());
    entries.retain(|e| !e.is_empty());
    entries
}

/// The core paragraph of a port manifest
#[derive(Debug, Clone)]
pub struct SourceParagraph {
    pub name: String,
    pub version: String,
    pub description: String,
    pub homepage: String,
    pub depends: Vec<Dependency>,
    pub default_features: Vec<String>,
}

/// A feature paragraph of a port manifest
#[derive(Debug, Clone)]
pub struct FeatureParagraph {
    pub name: String,
    pub description: String,
    pub depends: Vec<Dependency>,
}

/// A parsed port manifest: core paragraph plus feature paragraphs
#[derive(Debug, Clone)]
pub struct SourceControlFile {
    pub core_paragraph: SourceParagraph,
    pub feature_paragraphs: Vec<FeatureParagraph>,
}

impl SourceControlFile {
    /// Parse a manifest from its text form
    pub fn parse(text: &str) -> Result<Self> {
        let mut paragraphs = parse_paragraphs(text)?;
        if paragraphs.is_empty() {
            return Err(Error::ParseError("manifest has no paragraphs".to_string()));
        }

        let core = Self::parse_core(paragraphs.remove(0))?;
        let features = paragraphs
            .into_iter()
            .map(Self::parse_feature)
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            core_paragraph: core,
            feature_paragraphs: features,
        })
    }

    fn parse_core(mut paragraph: Paragraph) -> Result<SourceParagraph> {
        let name = required_field(&mut paragraph, "Source")?;
        let version = required_field(&mut paragraph, "Version")?;
        let description = optional_field(&mut paragraph, "Description").unwrap_or_default();
        let homepage = optional_field(&mut paragraph, "Homepage").unwrap_or_default();
        let depends = match optional_field(&mut paragraph, "Build-Depends") {
            Some(value) => parse_depends_field(&value)?,
            None => Vec::new(),
        };
        let default_features = optional_field(&mut paragraph, "Default-Features")
            .map(|v| split_comma_list(&v))
            .unwrap_or_default();

        Ok(SourceParagraph {
            name,
            version,
            description,
            homepage,
            depends,
            default_features,
        })
    }

    fn parse_feature(mut paragraph: Paragraph) -> Result<FeatureParagraph> {
        let name = required_field(&mut paragraph, "Feature")?;
        let description = optional_field(&mut paragraph, "Description").unwrap_or_default();
        let depends = match optional_field(&mut paragraph, "Build-Depends") {
            Some(value) => parse_depends_field(&value)?,
            None => Vec::new(),
        };

        Ok(FeatureParagraph {
            name,
            description,
            depends,
        })
    }

    /// Look up a feature paragraph by name
    pub fn find_feature(&self, name: &str) -> Option<&FeatureParagraph> {
        self.feature_paragraphs.iter().find(|f| f.name == name)
    }
}

/// Expand dependency entries into feature specs for a dependent triplet
///
/// Entries whose platform qualifier excludes the triplet are dropped. A bare
/// dependency becomes a reference to the package's default feature set
/// (feature `""`); an unresolved triplet defaults to the dependent's.
pub fn filter_dependencies_to_specs(deps: &[Dependency], triplet: &Triplet) -> Vec<FeatureSpec> {
    let mut specs = Vec::new();
    for dep in deps {
        if !dep.applies_to(triplet) {
            continue;
        }
        let spec = PackageSpec::new(
            dep.name.clone(),
            dep.triplet.clone().unwrap_or_else(|| triplet.clone()),
        );
        if dep.features.is_empty() {
            specs.push(FeatureSpec::new(spec, ""));
        } else {
            for feature in &dep.features {
                specs.push(FeatureSpec::new(spec.clone(), feature.clone()));
            }
        }
    }
    specs
}

/// The names of the dependencies that apply to a triplet
pub fn filter_dependency_names(deps: &[Dependency], triplet: &Triplet) -> Vec<String> {
    deps.iter()
        .filter(|dep| dep.applies_to(triplet))
        .map(|dep| dep.name.clone())
        .collect()
}

/// Catalog mapping a package name to its manifest
pub trait PortProvider {
    /// Fetch the manifest for `name`
    ///
    /// `Ok(None)` means the catalog has no such port. A malformed manifest
    /// surfaces as a parse error so the planner can abort.
    fn get_control_file(&self, name: &str) -> Result<Option<Arc<SourceControlFile>>>;
}

/// In-memory catalog
#[derive(Default)]
pub struct MapPortProvider {
    ports: HashMap<String, Arc<SourceControlFile>>,
}

impl MapPortProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, scf: SourceControlFile) {
        self.ports
            .insert(scf.core_paragraph.name.clone(), Arc::new(scf));
    }
}

impl FromIterator<SourceControlFile> for MapPortProvider {
    fn from_iter<I: IntoIterator<Item = SourceControlFile>>(iter: I) -> Self {
        let mut provider = Self::new();
        for scf in iter {
            provider.insert(scf);
        }
        provider
    }
}

impl PortProvider for MapPortProvider {
    fn get_control_file(&self, name: &str) -> Result<Option<Arc<SourceControlFile>>> {
        Ok(self.ports.get(name).cloned())
    }
}

/// On-demand catalog rooted at a ports directory
///
/// Reads `<root>/<name>/CONTROL` the first time a port is requested and
/// memoizes the parsed manifest.
pub struct PathsPortProvider {
    ports_root: PathBuf,
    cache: RefCell<HashMap<String, Arc<SourceControlFile>>>,
}

impl PathsPortProvider {
    pub fn new(ports_root: impl Into<PathBuf>) -> Self {
        Self {
            ports_root: ports_root.into(),
            cache: RefCell::new(HashMap::new()),
        }
    }

    pub fn port_dir(&self, name: &str) -> PathBuf {
        self.ports_root.join(name)
    }
}

impl PortProvider for PathsPortProvider {
    fn get_control_file(&self, name: &str) -> Result<Option<Arc<SourceControlFile>>> {
        if let Some(scf) = self.cache.borrow().get(name) {
            return Ok(Some(Arc::clone(scf)));
        }

        let control_path = self.port_dir(name).join("CONTROL");
        if !control_path.exists() {
            return Ok(None);
        }

        let text = std::fs::read_to_string(&control_path)?;
        let scf = Arc::new(SourceControlFile::parse(&text).map_err(|e| {
            Error::ParseError(format!("in {}: {}", control_path.display(), e))
        })?);
        self.cache
            .borrow_mut()
            .insert(name.to_string(), Arc::clone(&scf));
        Ok(Some(scf))
    }
}

/// Load a port manifest directly from a port directory
pub fn try_load_port(port_dir: &Path) -> Result<Option<SourceControlFile>> {
    let control_path = port_dir.join("CONTROL");
    if !control_path.exists() {
        return Ok(None);
    }
    let text = std::fs::read_to_string(&control_path)?;
    SourceControlFile::parse(&text).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(name: &str) -> Triplet {
        Triplet::new(name)
    }

    #[test]
    fn test_parse_dependency_forms() {
        let dep = parse_dependency("zlib").unwrap();
        assert_eq!(dep.name, "zlib");
        assert!(dep.features.is_empty());
        assert!(dep.triplet.is_none());

        let dep = parse_dependency("curl[ssl,http2]:x64-linux").unwrap();
        assert_eq!(dep.name, "curl");
        assert_eq!(dep.features, vec!["ssl", "http2"]);
        assert_eq!(dep.triplet, Some(t("x64-linux")));

        let dep = parse_dependency("libiconv (!windows)").unwrap();
        assert_eq!(dep.name, "libiconv");
        assert!(dep.applies_to(&t("x64-linux")));
        assert!(!dep.applies_to(&t("x64-windows")));

        assert!(parse_dependency("").is_err());
        assert!(parse_dependency("curl[ssl").is_err());
    }

    #[test]
    fn test_platform_expr_positive() {
        let expr = PlatformExpr::parse("windows").unwrap();
        assert!(expr.matches(&t("x64-windows")));
        assert!(!expr.matches(&t("x64-linux")));
    }

    #[test]
    fn test_parse_manifest_with_features() {
        let text = "\
Source: curl
Version: 7.68.0
Description: the curl library
Build-Depends: zlib
Default-Features: ssl

Feature: ssl
Description: openssl backend
Build-Depends: openssl[core]

Feature: http2
Build-Depends: nghttp2
";
        let scf = SourceControlFile::parse(text).unwrap();
        assert_eq!(scf.core_paragraph.name, "curl");
        assert_eq!(scf.core_paragraph.default_features, vec!["ssl"]);
        assert_eq!(scf.feature_paragraphs.len(), 2);

        let ssl = scf.find_feature("ssl").unwrap();
        assert_eq!(ssl.depends[0].name, "openssl");
        assert_eq!(ssl.depends[0].features, vec!["core"]);
        assert!(scf.find_feature("nope").is_none());
    }

    #[test]
    fn test_manifest_requires_source_and_version() {
        assert!(SourceControlFile::parse("Source: zlib\n").is_err());
        assert!(SourceControlFile::parse("Version: 1.0\n").is_err());
    }

    #[test]
    fn test_filter_dependencies_to_specs() {
        let deps = vec![
            parse_dependency("zlib").unwrap(),
            parse_dependency("curl[ssl]").unwrap(),
            parse_dependency("winsock (windows)").unwrap(),
        ];
        let specs = filter_dependencies_to_specs(&deps, &t("x64-linux"));
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].feature(), "");
        assert_eq!(specs[0].spec().triplet(), &t("x64-linux"));
        assert_eq!(specs[1].to_string(), "curl[ssl]:x64-linux");
    }

    #[test]
    fn test_depends_field_with_bracketed_commas() {
        let deps = parse_depends_field("curl[ssl,http2], zlib").unwrap();
        assert_eq!(deps.len(), 2);
        assert_eq!(deps[0].features, vec!["ssl", "http2"]);
        assert_eq!(deps[1].name, "zlib");
    }

    #[test]
    fn test_paths_provider_memoizes() {
        let dir = tempfile::tempdir().unwrap();
        let port = dir.path().join("zlib");
        std::fs::create_dir_all(&port).unwrap();
        std::fs::write(port.join("CONTROL"), "Source: zlib\nVersion: 1.2.11\n").unwrap();

        let provider = PathsPortProvider::new(dir.path());
        let first = provider.get_control_file("zlib").unwrap().unwrap();
        // Mutating the file after the first load must not change the answer.
        std::fs::write(port.join("CONTROL"), "garbage").unwrap();
        let second = provider.get_control_file("zlib").unwrap().unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        assert!(provider.get_control_file("missing").unwrap().is_none());
    }

    #[test]
    fn test_paths_provider_surfaces_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let port = dir.path().join("broken");
        std::fs::create_dir_all(&port).unwrap();
        std::fs::write(port.join("CONTROL"), "not a paragraph at all\n").unwrap();

        let provider = PathsPortProvider::new(dir.path());
        assert!(matches!(
            provider.get_control_file("broken"),
            Err(Error::ParseError(_))
        ));
    }
}
