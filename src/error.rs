//! Top-level error of a pipeline run, wrapping each phase's own error type.
use crate::codegen::CodegenError;
use crate::loader::LoaderError;
use crate::settings::SettingsError;
use crate::validate::{ConfigError, ValidationReport};
use crate::writer::WriterError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Validation(#[from] ValidationReport),
    #[error(transparent)]
    Codegen(#[from] CodegenError),
    #[error("failed to load the component catalog: {0}")]
    Loader(#[from] LoaderError),
    #[error(transparent)]
    Settings(#[from] SettingsError),
    #[error(transparent)]
    Writer(#[from] WriterError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl ConfigError {
    pub fn kind(&self) -> &'static str {
        match self {
            ConfigError::InvalidConfig { .. } => "InvalidConfig",
            ConfigError::UnknownComponent { .. } => "UnknownComponent",
            ConfigError::MissingDependency { .. } => "MissingDependency",
            ConfigError::DuplicateId { .. } => "DuplicateId",
            ConfigError::TypeMismatch { .. } => "TypeMismatch",
        }
    }
}

impl CodegenError {
    pub fn kind(&self) -> &'static str {
        match self {
            CodegenError::Unresolved(_) => "UnresolvedId",
            CodegenError::DuplicateVariable(_) => "DuplicateId",
            _ => "GeneratorFailure",
        }
    }
}

impl Error {
    /// Stable names of every problem in this error, for fixtures and scripts.
    pub fn kinds(&self) -> Vec<&'static str> {
        match self {
            Error::Validation(report) => report.errors.iter().map(ConfigError::kind).collect(),
            Error::Codegen(err) => vec![err.kind()],
            Error::Loader(_) => vec!["Loader"],
            Error::Settings(_) => vec!["Settings"],
            Error::Writer(_) => vec!["Writer"],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::UnresolvedId;

    #[test]
    fn kinds_name_every_problem() {
        let report = ValidationReport {
            errors: vec![
                ConfigError::UnknownComponent { key: "bogus".into() },
                ConfigError::MissingDependency { component: "pcf8574".into(), required: "i2c".into() },
            ],
        };
        assert_eq!(Error::from(report).kinds(), ["UnknownComponent", "MissingDependency"]);
        let unresolved = CodegenError::Unresolved(vec![UnresolvedId { name: "x".into(), demanders: vec![] }]);
        assert_eq!(Error::from(unresolved).kinds(), ["UnresolvedId"]);
    }
}
