//! Error types for policy loading.
//!
//! Every load error carries a dotted field path so the caller can point
//! at the offending part of the document.

use thiserror::Error;

/// Policy loading result type.
pub type Result<T> = std::result::Result<T, PolicyError>;

/// Errors rejecting a policy document at load time.
#[derive(Error, Debug)]
pub enum PolicyError {
    /// `schema_version` is newer than this build understands.
    #[error("unsupported schema_version {version} (latest supported: {latest})")]
    UnsupportedSchema { version: u64, latest: u32 },

    /// The document shape does not match the schema.
    #[error("{path}: expected {expected}")]
    Structural { path: String, expected: String },

    /// The shape is fine but a value violates a semantic rule.
    #[error("{path}: {reason}")]
    Semantic { path: String, reason: String },

    /// A user-supplied pattern failed to compile.
    #[error("{path}: invalid regex: {source}")]
    RegexCompile {
        path: String,
        #[source]
        source: Box<regex::Error>,
    },

    /// The document is not parseable at all.
    #[error("policy parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
}

impl PolicyError {
    pub fn structural(path: impl Into<String>, expected: impl Into<String>) -> Self {
        Self::Structural {
            path: path.into(),
            expected: expected.into(),
        }
    }

    pub fn semantic(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Semantic {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn regex(path: impl Into<String>, source: regex::Error) -> Self {
        Self::RegexCompile {
            path: path.into(),
            source: Box::new(source),
        }
    }
}

/// Non-fatal findings surfaced alongside a successfully loaded policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadWarning {
    /// Dotted path of the field the warning refers to.
    pub path: String,
    pub message: String,
}

impl LoadWarning {
    pub fn unknown_field(path: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            message: format!("unknown field '{}'", path),
            path,
        }
    }
}

impl std::fmt::Display for LoadWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}
