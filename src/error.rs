// src/error.rs

//! Central error type for the portico core
//!
//! Fatal conditions in the planner, ABI computer and orchestrator surface as
//! `Error` values propagated with `?`. Non-fatal conditions (disabled binary
//! caching, cache publication failures, feature drift on reinstall) are
//! reported through `tracing::warn!` instead and never appear here.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for portico operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while planning, hashing or building packages
#[derive(Error, Debug)]
pub enum Error {
    /// Port manifest or BUILD_INFO paragraph is malformed
    #[error("parse error: {0}")]
    ParseError(String),

    /// A cluster was reached that has no source manifest at all
    #[error("cannot find definition for package `{0}`")]
    DefinitionMissing(String),

    /// An installed package must be rebuilt but its portfile is gone
    #[error("cannot locate portfile for {0}; explicitly remove this package first")]
    SourceMissing(String),

    /// The status database references a dependency that is not installed
    #[error("database corrupted: package {package} is installed but dependency {dependency} is not")]
    DatabaseCorrupted {
        package: String,
        dependency: String,
    },

    /// A requested feature does not exist in the package's manifest
    #[error("`{feature}` is not a feature of package `{package}`")]
    FeatureNotFound { package: String, feature: String },

    /// Dependency propagation reached a feature that cannot be satisfied
    #[error("unable to satisfy dependency {dependency} of {dependent}")]
    UnsatisfiableDependency {
        dependency: String,
        dependent: String,
    },

    /// Default-feature expansion of a package cannot be satisfied
    #[error("unable to satisfy default dependencies of {0}")]
    DefaultFeaturesUnsatisfiable(String),

    /// The plan graph contains a dependency cycle
    #[error("circular dependency detected involving {0}")]
    GraphCycle(String),

    /// The plan removes or rebuilds packages and the caller did not opt in
    #[error("refusing to remove or rebuild packages without an explicit opt-in")]
    PlanNotConfirmed,

    /// An external tool exited with a non-zero status
    #[error("{tool} exited with code {code}")]
    ToolFailed { tool: String, code: i32 },

    /// A recognized field carried a value outside its domain
    #[error("invalid {field} value: [{value}]")]
    InvalidField { field: String, value: String },

    /// Triplet inspection emitted a variable the protocol does not define
    #[error("unknown variable in triplet inspection output: {0}")]
    UnknownTripletVariable(String),

    /// Cache archive could not be written or read
    #[error("archive error on {path}: {detail}")]
    Archive { path: PathBuf, detail: String },

    /// Broken internal invariant
    #[error("internal error: {0}")]
    Internal(String),

    /// I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create an internal error with a message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Create an archive error for a path
    pub fn archive(path: impl Into<PathBuf>, detail: impl ToString) -> Self {
        Self::Archive {
            path: path.into(),
            detail: detail.to_string(),
        }
    }
}
