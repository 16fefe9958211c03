//! Optional JSON settings file for the binary.
//!
//! Deserialization goes through `serde_path_to_error`, so a typo deep in the
//! file is reported with its JSON path instead of a bare serde message.
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::codegen::PlatformioOption;

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("failed to read settings file {path}: {source}")]
    Io { path: PathBuf, source: std::io::Error },
    #[error("invalid settings at JSON path {json_path}: {message}")]
    Parse { json_path: String, message: String },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Project directories are created below this, one per device name.
    pub build_root: PathBuf,
    /// `EnvFilter` directives used when neither `RUST_LOG` nor `-v` is given.
    pub log_filter: Option<String>,
    pub write_manifest: bool,
    /// Merged under the config's own `esphome.platformio_options`.
    pub platformio_options: IndexMap<String, PlatformioOption>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            build_root: PathBuf::from("build"),
            log_filter: None,
            write_manifest: true,
            platformio_options: IndexMap::new(),
        }
    }
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let src = std::fs::read_to_string(path)
            .map_err(|source| SettingsError::Io { path: path.to_path_buf(), source })?;
        from_str_with_path(&src)
    }

    /// `path` when given, defaults otherwise.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, SettingsError> {
        path.map_or_else(|| Ok(Self::default()), Self::load)
    }
}

/// Deserialize with JSON-path context in error messages.
pub fn from_str_with_path<T: DeserializeOwned>(src: &str) -> Result<T, SettingsError> {
    let de = &mut serde_json::Deserializer::from_str(src);
    serde_path_to_error::deserialize::<_, T>(de).map_err(|err| SettingsError::Parse {
        json_path: err.path().to_string(),
        message: err.into_inner().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_fall_back() {
        let s: Settings = from_str_with_path(r#"{"build_root": "out"}"#).unwrap();
        assert_eq!(s.build_root, PathBuf::from("out"));
        assert!(s.write_manifest);
        assert!(s.platformio_options.is_empty());
    }

    #[test]
    fn errors_carry_the_json_path() {
        let err = from_str_with_path::<Settings>(r#"{"platformio_options": {"board_build.f_cpu": 5}}"#).unwrap_err();
        let SettingsError::Parse { json_path, .. } = err else { panic!("expected a parse error") };
        assert_eq!(json_path, "platformio_options.board_build.f_cpu");

        let err = from_str_with_path::<Settings>(r#"{"write_manfest": false}"#).unwrap_err();
        assert!(err.to_string().contains("write_manfest"), "{err}");
    }
}
