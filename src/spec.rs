// src/spec.rs

//! Package and feature identities
//!
//! A `PackageSpec` is the canonical `name:triplet` pair used as identity
//! everywhere in the planner and cache. A `FeatureSpec` qualifies a spec with
//! a feature name, where `"core"` is the required baseline, `""` stands for
//! the default feature set and `"*"` for every feature.

use std::fmt;

/// Opaque target platform configuration, compared by string equality
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Triplet(String);

impl Triplet {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The canonical triplet name, e.g. `x64-linux`
    pub fn canonical_name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Triplet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A package qualified by its target triplet
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PackageSpec {
    name: String,
    triplet: Triplet,
}

impl PackageSpec {
    pub fn new(name: impl Into<String>, triplet: Triplet) -> Self {
        Self {
            name: name.into(),
            triplet,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn triplet(&self) -> &Triplet {
        &self.triplet
    }

    /// Directory name used under `packages/` and as the nuget id,
    /// e.g. `zlib_x64-linux`
    pub fn dir(&self) -> String {
        format!("{}_{}", self.name, self.triplet)
    }
}

impl fmt::Display for PackageSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.triplet)
    }
}

/// A feature of a package spec
///
/// The feature name may be one of the "special" strings: `""` (the default
/// feature set) or `"*"` (all features).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FeatureSpec {
    spec: PackageSpec,
    feature: String,
}

impl FeatureSpec {
    pub fn new(spec: PackageSpec, feature: impl Into<String>) -> Self {
        Self {
            spec,
            feature: feature.into(),
        }
    }

    pub fn spec(&self) -> &PackageSpec {
        &self.spec
    }

    pub fn name(&self) -> &str {
        self.spec.name()
    }

    pub fn feature(&self) -> &str {
        &self.feature
    }
}

impl fmt::Display for FeatureSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.feature.is_empty() {
            write!(f, "{}", self.spec)
        } else {
            write!(
                f,
                "{}[{}]:{}",
                self.spec.name(),
                self.feature,
                self.spec.triplet()
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(name: &str) -> Triplet {
        Triplet::new(name)
    }

    #[test]
    fn test_spec_display_and_dir() {
        let spec = PackageSpec::new("zlib", t("x64-linux"));
        assert_eq!(spec.to_string(), "zlib:x64-linux");
        assert_eq!(spec.dir(), "zlib_x64-linux");
    }

    #[test]
    fn test_feature_spec_display() {
        let spec = PackageSpec::new("curl", t("x64-linux"));
        assert_eq!(
            FeatureSpec::new(spec.clone(), "ssl").to_string(),
            "curl[ssl]:x64-linux"
        );
        assert_eq!(FeatureSpec::new(spec, "").to_string(), "curl:x64-linux");
    }

    #[test]
    fn test_spec_ordering_is_by_name_then_triplet() {
        let a = PackageSpec::new("abc", t("x64-linux"));
        let b = PackageSpec::new("abd", t("arm64-linux"));
        assert!(a < b);
    }
}
