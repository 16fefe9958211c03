//! Validation errors: a single [`Invalid`] or a [`MultipleInvalid`] bundle.
//!
//! Paths are relative to the schema that raised them; every combinator that
//! descends into a child prefixes the child's key or index on the way out.
use std::fmt;

use crate::value::{ConfigPath, PathSegment};

pub const EXTRA_KEYS_NOT_ALLOWED: &str = "extra keys not allowed";
pub const REQUIRED_KEY_NOT_PROVIDED: &str = "required key not provided";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidKind {
    ExtraKey,
    RequiredKey,
    Other,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct Invalid {
    pub message: String,
    pub path: ConfigPath,
    pub kind: InvalidKind,
}

impl Invalid {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into(), path: ConfigPath::root(), kind: InvalidKind::Other }
    }
    pub fn at(mut self, path: ConfigPath) -> Self {
        self.path = path;
        self
    }
    pub fn extra_key(key: &str) -> Self {
        Self { message: EXTRA_KEYS_NOT_ALLOWED.into(), path: ConfigPath::key(key), kind: InvalidKind::ExtraKey }
    }
    pub fn required_key(key: &str) -> Self {
        Self {
            message: REQUIRED_KEY_NOT_PROVIDED.into(),
            path: ConfigPath::key(key),
            kind: InvalidKind::RequiredKey,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MultipleInvalid {
    pub errors: Vec<Invalid>,
}

impl fmt::Display for MultipleInvalid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.errors.iter().map(|e| format!("{} @ {}", e.message, e.path)).collect();
        f.write_str(&parts.join("; "))
    }
}

impl std::error::Error for MultipleInvalid {}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error(transparent)]
    Invalid(Invalid),
    #[error(transparent)]
    Multiple(MultipleInvalid),
}

pub type VResult<T = crate::value::ConfigValue> = Result<T, ValidationError>;

impl From<Invalid> for ValidationError {
    fn from(value: Invalid) -> Self {
        ValidationError::Invalid(value)
    }
}

/// Shorthand for a root-level `Invalid`.
pub fn invalid(message: impl Into<String>) -> ValidationError {
    Invalid::new(message).into()
}

impl ValidationError {
    /// Bundles collected errors; a single error stays single.
    pub fn from_errors(mut errors: Vec<Invalid>) -> Option<Self> {
        match errors.len() {
            0 => None,
            1 => errors.pop().map(ValidationError::Invalid),
            _ => Some(ValidationError::Multiple(MultipleInvalid { errors })),
        }
    }
    pub fn errors(&self) -> Vec<&Invalid> {
        match self {
            ValidationError::Invalid(e) => vec![e],
            ValidationError::Multiple(m) => m.errors.iter().collect(),
        }
    }
    pub fn into_errors(self) -> Vec<Invalid> {
        match self {
            ValidationError::Invalid(e) => vec![e],
            ValidationError::Multiple(m) => m.errors,
        }
    }
    pub fn prefixed(self, prefix: &ConfigPath) -> Self {
        if prefix.is_empty() {
            return self;
        }
        self.map_paths(|p| p.prefixed(prefix))
    }
    pub fn under_key(self, key: &str) -> Self {
        self.prefixed(&ConfigPath::key(key))
    }
    pub fn under_index(self, index: usize) -> Self {
        self.prefixed(&ConfigPath::index(index))
    }
    pub fn map_paths(self, f: impl Fn(&ConfigPath) -> ConfigPath) -> Self {
        match self {
            ValidationError::Invalid(mut e) => {
                e.path = f(&e.path);
                ValidationError::Invalid(e)
            }
            ValidationError::Multiple(mut m) => {
                for e in &mut m.errors {
                    e.path = f(&e.path);
                }
                ValidationError::Multiple(m)
            }
        }
    }
    /// Length of the longest path among the bundled errors.
    pub fn depth(&self) -> usize {
        self.errors().iter().map(|e| e.path.len()).max().unwrap_or(0)
    }
    pub fn mentions(&self, needle: &str) -> bool {
        self.errors().iter().any(|e| e.message.contains(needle))
    }
    pub fn has_extra_key_at_depth(&self, depth: usize) -> bool {
        self.errors().iter().any(|e| e.kind == InvalidKind::ExtraKey && e.path.len() == depth)
    }
    /// Drops a leading `key` segment from every path that starts with it.
    pub fn strip_leading_key(self, key: &str) -> Self {
        self.map_paths(|p| match p.segments().first() {
            Some(PathSegment::Key(k)) if k == key => p.without_first(),
            _ => p.clone(),
        })
    }
}

/// Picks the error that got deepest into the value; ties keep every candidate.
pub fn deepest(failures: Vec<ValidationError>) -> ValidationError {
    let max = failures.iter().map(ValidationError::depth).max().unwrap_or(0);
    let mut candidates: Vec<ValidationError> = failures.into_iter().filter(|f| f.depth() == max).collect();
    if candidates.len() == 1 {
        if let Some(only) = candidates.pop() {
            return only;
        }
    }
    let errors: Vec<Invalid> = candidates.into_iter().flat_map(ValidationError::into_errors).collect();
    ValidationError::from_errors(errors).unwrap_or_else(|| invalid("no valid value"))
}
