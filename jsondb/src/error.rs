use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum JsonDbError {
    #[error("{0}")]
    Validation(ValidationErrors),

    #[error("Collection not found: {0}")]
    CollectionNotFound(String),

    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Write task for {0} was dropped before it completed")]
    WriterStopped(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl From<ValidationErrors> for JsonDbError {
    fn from(errors: ValidationErrors) -> Self {
        JsonDbError::Validation(errors)
    }
}

pub type Result<T> = std::result::Result<T, JsonDbError>;

/// A single schema violation. `path` points at the offending value using
/// `.field` and `[index]` segments; the root is the empty string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    pub path: String,
    pub message: String,
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}: {}", self.path, self.message)
        }
    }
}

/// The structured error list produced by a failed validation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.issues.push(ValidationIssue {
            path: path.into(),
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn len(&self) -> usize {
        self.issues.len()
    }

    /// Re-root every issue under `prefix`, used to tag batch items.
    pub fn prefixed(self, prefix: &str) -> Self {
        let issues = self
            .issues
            .into_iter()
            .map(|issue| ValidationIssue {
                path: format!("{prefix}{}", issue.path),
                message: issue.message,
            })
            .collect();
        ValidationErrors { issues }
    }

    pub fn extend(&mut self, other: ValidationErrors) {
        self.issues.extend(other.issues);
    }

    pub fn into_result(self) -> std::result::Result<(), ValidationErrors> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Schema validation failed:")?;
        for issue in &self.issues {
            write!(f, "\n  - {issue}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}
