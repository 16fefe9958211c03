//! Mutable state shared by every generator routine of one run.
use std::collections::{BTreeMap, BTreeSet};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::{BuildFuture, CodegenError, CodegenResult};
use crate::ir::{Define, Expression, Library, Statement};
use crate::registry::EntryBuilder;
use crate::target::Target;
use crate::value::ConfigId;

/// A `platformio.ini` value: a scalar or a list rendered one per line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PlatformioOption {
    Value(String),
    List(Vec<String>),
}

pub(super) struct SpawnedJob {
    pub priority: f64,
    pub label: String,
    pub future: BuildFuture<()>,
}

#[derive(Default)]
pub struct CodegenState {
    pub target: Target,
    pub statements: Vec<Statement>,
    pub globals: Vec<Statement>,
    pub includes: Vec<String>,
    pub libraries: Vec<Library>,
    pub build_flags: BTreeSet<String>,
    pub defines: BTreeMap<String, Define>,
    pub platformio_options: IndexMap<String, PlatformioOption>,
    pub(super) variables: IndexMap<String, (ConfigId, Expression)>,
    /// Component variables not yet passed to `register_component`.
    pub(super) unregistered_components: BTreeSet<String>,
    /// Names declared since the scheduler last looked.
    pub(super) newly_declared: Vec<String>,
    /// Set by a variable lookup right before it returns `Pending`.
    pub(super) demand: Option<String>,
    pub(super) spawned: Vec<SpawnedJob>,
    /// Registry builders by registry name, then entry name.
    pub(super) builders: BTreeMap<String, BTreeMap<String, EntryBuilder>>,
}

impl CodegenState {
    pub fn new(target: Target) -> Self {
        Self { target, ..Self::default() }
    }

    /// Unversioned requests yield to versioned ones; two different versions
    /// of the same library are a conflict.
    pub fn add_library(&mut self, library: Library) -> CodegenResult<()> {
        let Some(existing) = self.libraries.iter_mut().find(|l| l.name == library.name) else {
            self.libraries.push(library);
            return Ok(());
        };
        match (&existing.version, &library.version) {
            (_, None) => Ok(()),
            (None, Some(_)) => {
                existing.version = library.version;
                Ok(())
            }
            (Some(a), Some(b)) if a == b => Ok(()),
            (Some(a), Some(b)) => Err(CodegenError::LibraryConflict {
                name: library.name.clone(),
                first: a.clone(),
                second: b.clone(),
            }),
        }
    }

    pub fn add_define(&mut self, define: Define) {
        self.build_flags.insert(define.as_build_flag());
        self.defines.insert(define.name.clone(), define);
    }

    pub fn add_platformio_option(&mut self, key: &str, value: PlatformioOption) {
        if let Some(old) = self.platformio_options.get(key) {
            if *old != value {
                tracing::warn!(key, "platformio option set twice, the later value wins");
            }
        }
        self.platformio_options.insert(key.to_string(), value);
    }

    pub fn lookup(&self, name: &str) -> Option<&(ConfigId, Expression)> {
        self.variables.get(name)
    }

    pub fn register_variable(&mut self, id: &ConfigId, expr: Expression) -> CodegenResult<()> {
        let name = id.name().ok_or_else(|| CodegenError::UnnamedId(id.type_tag.to_string()))?;
        if self.variables.contains_key(name) {
            return Err(CodegenError::DuplicateVariable(name.to_string()));
        }
        tracing::trace!(name, "variable declared");
        self.variables.insert(name.to_string(), (id.clone(), expr));
        self.newly_declared.push(name.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn library_versions_pin() {
        let mut state = CodegenState::default();
        state.add_library(Library::parse("Wire")).unwrap();
        state.add_library(Library::parse("Wire@1.0")).unwrap();
        state.add_library(Library::parse("Wire")).unwrap();
        state.add_library(Library::parse("Wire@1.0")).unwrap();
        assert_eq!(state.libraries, vec![Library::parse("Wire@1.0")]);
        let err = state.add_library(Library::parse("Wire@2.0")).unwrap_err();
        assert!(err.to_string().contains("Version pinning failed!"));
    }

    #[test]
    fn defines_also_become_build_flags() {
        let mut state = CodegenState::default();
        state.add_define(Define::new("USE_SENSOR", None));
        state.add_define(Define::new("USE_SENSOR", None));
        assert_eq!(state.build_flags.iter().collect::<Vec<_>>(), ["-DUSE_SENSOR"]);
        assert_eq!(state.defines.len(), 1);
    }

    #[test]
    fn variables_register_once() {
        let mut state = CodegenState::default();
        let id = ConfigId::declare(Some("t".into()), crate::ir::types::FLOAT.clone());
        state.register_variable(&id, Expression::raw("t")).unwrap();
        assert!(matches!(state.register_variable(&id, Expression::raw("t")), Err(CodegenError::DuplicateVariable(_))));
        assert_eq!(state.newly_declared, vec!["t".to_string()]);
    }
}
