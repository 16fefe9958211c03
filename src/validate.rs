//! Whole-config validation: component discovery, AUTO_LOAD, dependency
//! checks, per-block schemas, final validators, pin conflicts and the ID
//! pass. Errors are collected, never fail-fast, so a user sees every mistake
//! of a run at once.
use std::collections::BTreeSet;
use std::fmt;

use crate::ids::resolve_ids;
use crate::loader::{ComponentDescriptor, RunContext};
use crate::schema::error::{EXTRA_KEYS_NOT_ALLOWED, REQUIRED_KEY_NOT_PROVIDED};
use crate::schema::{Schema, ValidationContext, ValidationError};
use crate::target::Target;
use crate::value::{ConfigMap, ConfigPath, ConfigValue};

pub const CORE_KEY: &str = "esphome";

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("{path}: {message}")]
    InvalidConfig { path: ConfigPath, message: String },
    #[error("Component not found: {key}")]
    UnknownComponent { key: String },
    #[error("Component {component} requires component {required}")]
    MissingDependency { component: String, required: String },
    #[error("ID {name} redefined! First defined at {first_path}, again at {second_path}")]
    DuplicateId { name: String, first_path: ConfigPath, second_path: ConfigPath },
    #[error(
        "ID '{name}' of type {declared} doesn't inherit from {demanded}. Please double check your ID is pointing to the correct value"
    )]
    TypeMismatch { name: String, declared: String, demanded: String, path: ConfigPath },
}

impl ConfigError {
    fn from_validation(err: ValidationError) -> Vec<ConfigError> {
        err.into_errors()
            .into_iter()
            .map(|e| ConfigError::InvalidConfig { path: e.path, message: e.message })
            .collect()
    }

    /// Where in the config the problem is, when it is anywhere specific.
    pub fn path(&self) -> Option<ConfigPath> {
        match self {
            ConfigError::InvalidConfig { path, .. } | ConfigError::TypeMismatch { path, .. } => Some(path.clone()),
            ConfigError::UnknownComponent { key } => Some(ConfigPath::key(key.as_str())),
            ConfigError::MissingDependency { component, .. } => {
                Some(ConfigPath::key(component.split('.').next().unwrap_or(component)))
            }
            ConfigError::DuplicateId { second_path, .. } => Some(second_path.clone()),
        }
    }

    /// Message phrased for a person editing the config.
    pub fn user_message(&self) -> String {
        let ConfigError::InvalidConfig { path, message } = self else { return self.to_string() };
        let key = path.last_key().unwrap_or("<root>");
        let parent = path.parent();
        let parent = parent.last_key().unwrap_or("<root>");
        match message.as_str() {
            EXTRA_KEYS_NOT_ALLOWED => format!("[{key}] is an invalid option for [{parent}]."),
            REQUIRED_KEY_NOT_PROVIDED => format!("'{key}' is a required option for [{parent}]."),
            _ => message.clone(),
        }
    }
}

/// Every problem found in one config.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationReport {
    pub errors: Vec<ConfigError>,
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} error(s) in configuration:", self.errors.len())?;
        for error in &self.errors {
            match error.path() {
                Some(path) => writeln!(f, "  {path}: {}", error.user_message())?,
                None => writeln!(f, "  {}", error.user_message())?,
            }
        }
        Ok(())
    }
}

impl std::error::Error for ValidationReport {}

impl ValidationReport {
    fn single(error: ConfigError) -> Self {
        Self { errors: vec![error] }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedConfig {
    /// Core block first, then components in input order, then auto-loaded ones.
    pub root: ConfigMap,
    pub target: Target,
    pub loaded: BTreeSet<String>,
}

impl ValidatedConfig {
    pub fn components(&self) -> impl Iterator<Item = (&str, &ConfigValue)> {
        self.root.iter().map(|(k, v)| (k.as_str(), v))
    }
    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.root.get(key)
    }
    pub fn to_json(&self) -> serde_json::Value {
        ConfigValue::Map(self.root.clone()).to_json()
    }
}

// ---------------------------------------------------------------------------- //

fn platform_pairs(domain: &str, value: &ConfigValue) -> Vec<(String, String)> {
    value
        .iter_list()
        .into_iter()
        .filter_map(|entry| entry.get("platform").and_then(ConfigValue::as_str))
        .map(|p| (domain.to_string(), p.to_lowercase()))
        .collect()
}

#[tracing::instrument(level = "info", skip_all)]
pub fn validate_config(raw: &ConfigValue, ctx: &RunContext) -> Result<ValidatedConfig, ValidationReport> {
    let Some(input) = raw.as_map() else {
        return Err(ValidationReport::single(ConfigError::InvalidConfig {
            path: ConfigPath::root(),
            message: "Configuration must be a mapping of component names to their configuration".into(),
        }));
    };
    if !input.contains_key(CORE_KEY) {
        return Err(ValidationReport::single(ConfigError::InvalidConfig {
            path: ConfigPath::root(),
            message: format!(
                "'{CORE_KEY}' section missing from configuration. Please make sure your configuration has an '{CORE_KEY}:' line in it."
            ),
        }));
    }
    let target = Target::preload(input.get(CORE_KEY));
    let mut errors: Vec<ConfigError> = Vec::new();

    // ---- discovery ----
    let mut declared: Vec<String> = Vec::new();
    let mut platforms: Vec<(String, String)> = Vec::new();
    for (key, value) in input {
        match ctx.catalog.component(key) {
            Some(component) => {
                if component.is_platform_component {
                    platforms.extend(platform_pairs(key, value));
                }
                declared.push(key.clone());
            }
            None => errors.push(ConfigError::UnknownComponent { key: key.clone() }),
        }
    }
    let order = ctx.catalog.auto_load_closure(&declared, &platforms);
    let loaded: BTreeSet<String> = order.iter().cloned().collect();
    for key in order.iter().filter(|k| !input.contains_key(*k)) {
        tracing::info!(component = %key, "auto-loaded");
    }

    // ---- dependencies and conflicts ----
    let mut check_requirements = |name: &str, descriptor: &ComponentDescriptor| {
        for required in &descriptor.dependencies {
            if !loaded.contains(required) {
                errors.push(ConfigError::MissingDependency {
                    component: name.to_string(),
                    required: required.clone(),
                });
            }
        }
        for other in &descriptor.conflicts_with {
            if loaded.contains(other) {
                errors.push(ConfigError::InvalidConfig {
                    path: ConfigPath::key(name.split('.').next().unwrap_or(name)),
                    message: format!("Component {name} cannot be used together with component {other}"),
                });
            }
        }
    };
    for key in &order {
        if let Some(descriptor) = ctx.catalog.component(key) {
            check_requirements(key, descriptor);
        }
    }
    for (domain, name) in &platforms {
        if let Some(descriptor) = ctx.catalog.platform(domain, name) {
            check_requirements(&format!("{domain}.{name}"), descriptor);
        }
    }

    // ---- per-block schemas, core first ----
    let vctx = ValidationContext::new(&ctx.registries, &loaded, &target);
    let mut root = ConfigMap::new();
    let keys = std::iter::once(CORE_KEY.to_string()).chain(order.iter().filter(|k| *k != CORE_KEY).cloned());
    for key in keys {
        let Some(component) = ctx.catalog.component(&key) else { continue };
        let value = input.get(&key).cloned().unwrap_or(ConfigValue::Null);
        match validate_block(&key, component, &value, ctx, &vctx) {
            Ok(v) => {
                root.insert(key, v);
            }
            Err(mut e) => errors.append(&mut e),
        }
    }
    if !errors.is_empty() {
        return Err(ValidationReport { errors });
    }

    // ---- final validators ----
    run_final_validators(&mut root, ctx, &mut errors);
    errors.extend(crate::pins::check_pin_conflicts(&root));
    if !errors.is_empty() {
        return Err(ValidationReport { errors });
    }

    // ---- IDs ----
    let mut tree = ConfigValue::Map(root);
    let id_errors = resolve_ids(&mut tree);
    if !id_errors.is_empty() {
        return Err(ValidationReport { errors: id_errors });
    }
    let ConfigValue::Map(root) = tree else {
        unreachable!("the root stays a mapping")
    };
    tracing::info!(components = root.len(), "configuration valid");
    Ok(ValidatedConfig { root, target, loaded })
}

fn validate_block(
    key: &str,
    component: &ComponentDescriptor,
    value: &ConfigValue,
    ctx: &RunContext,
    vctx: &ValidationContext<'_>,
) -> Result<ConfigValue, Vec<ConfigError>> {
    let base = ConfigPath::key(key);
    if component.is_platform_component {
        let schema = ctx.catalog.platform_schema(key);
        return validate_items(key, value, |i, item| {
            let path = base.child_index(i);
            let Some(platform) = item.get("platform") else {
                return Err(vec![ConfigError::InvalidConfig {
                    path,
                    message: format!("No platform specified for {key}! See the 'platform' key."),
                }]);
            };
            let name = platform.display_scalar().to_lowercase();
            if ctx.catalog.platform(key, &name).is_none() {
                return Err(vec![ConfigError::InvalidConfig {
                    path: path.child_key("platform"),
                    message: format!("Platform not found: '{key}.{name}'"),
                }]);
            }
            schema.validate_at(item, &path, vctx).map_err(ConfigError::from_validation)
        });
    }
    let schema = component.config_schema.clone().unwrap_or_else(|| Schema::mapping([]).allow_extra());
    if component.multi_conf {
        let items = if value.is_null() { ConfigValue::Seq(vec![ConfigValue::map()]) } else { value.clone() };
        return validate_items(key, &items, |i, item| {
            schema.validate_at(item, &base.child_index(i), vctx).map_err(ConfigError::from_validation)
        });
    }
    schema.validate_at(value, &base, vctx).map_err(ConfigError::from_validation)
}

fn validate_items(
    key: &str,
    value: &ConfigValue,
    mut each: impl FnMut(usize, &ConfigValue) -> Result<ConfigValue, Vec<ConfigError>>,
) -> Result<ConfigValue, Vec<ConfigError>> {
    let items = match value {
        ConfigValue::Seq(items) => items.iter().collect(),
        ConfigValue::Null => Vec::new(),
        ConfigValue::Map(_) => vec![value],
        other => {
            return Err(vec![ConfigError::InvalidConfig {
                path: ConfigPath::key(key),
                message: format!("Expected a list or a mapping for {key}, got {}", other.kind()),
            }]);
        }
    };
    let mut out = Vec::with_capacity(items.len());
    let mut errors = Vec::new();
    for (i, item) in items.into_iter().enumerate() {
        match each(i, item) {
            Ok(v) => out.push(v),
            Err(mut e) => errors.append(&mut e),
        }
    }
    if errors.is_empty() { Ok(ConfigValue::Seq(out)) } else { Err(errors) }
}

/// Multi-conf validators see the whole list at `[key]`; platform validators
/// run once per entry at `[key, i]`. Amendments are written back right away.
fn run_final_validators(root: &mut ConfigMap, ctx: &RunContext, errors: &mut Vec<ConfigError>) {
    let keys: Vec<String> = root.keys().cloned().collect();
    for key in keys {
        let Some(component) = ctx.catalog.component(&key) else { continue };
        if let Some(validator) = &component.final_validate {
            let snapshot = ConfigValue::Map(root.clone());
            let Some(value) = root.get(&key).cloned() else { continue };
            match validator(&value, &snapshot) {
                Ok(v) => {
                    root.insert(key.clone(), v);
                }
                Err(e) => errors.extend(ConfigError::from_validation(e.under_key(&key))),
            }
        }
        if !component.is_platform_component {
            continue;
        }
        let count = root.get(&key).and_then(ConfigValue::as_seq).map_or(0, <[ConfigValue]>::len);
        for i in 0..count {
            let path = ConfigPath::key(key.as_str()).child_index(i);
            let snapshot = ConfigValue::Map(root.clone());
            let Some(entry) = snapshot.at(&path).cloned() else { continue };
            let Some(name) = entry.get("platform").and_then(ConfigValue::as_str) else { continue };
            let Some(validator) = ctx.catalog.platform(&key, name).and_then(|p| p.final_validate.clone()) else {
                continue;
            };
            match validator(&entry, &snapshot) {
                Ok(v) => {
                    let mut tree = ConfigValue::Map(std::mem::take(root));
                    if let Some(slot) = tree.at_mut(&path) {
                        *slot = v;
                    }
                    if let ConfigValue::Map(m) = tree {
                        *root = m;
                    }
                }
                Err(e) => errors.extend(ConfigError::from_validation(e.prefixed(&path))),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn run(value: serde_json::Value) -> Result<ValidatedConfig, ValidationReport> {
        let ctx = RunContext::builtin().unwrap();
        validate_config(&ConfigValue::from_json(&value), &ctx)
    }

    fn core() -> serde_json::Value {
        json!({"name": "node", "platform": "ESP32", "board": "esp32dev"})
    }

    #[test]
    fn core_block_is_mandatory() {
        let report = run(json!({"logger": {}})).unwrap_err();
        assert!(report.errors[0].to_string().contains("'esphome' section missing"));
    }

    #[test]
    fn unknown_components_are_reported() {
        let report = run(json!({"esphome": core(), "flux_capacitor": {}})).unwrap_err();
        assert_eq!(report.errors, vec![ConfigError::UnknownComponent { key: "flux_capacitor".into() }]);
    }

    #[test]
    fn auto_load_pulls_in_the_bus() {
        let cfg = run(json!({"esphome": core(), "pcf8574": {"id": "io"}})).unwrap();
        let keys: Vec<&str> = cfg.components().map(|(k, _)| k).collect();
        assert_eq!(keys, ["esphome", "pcf8574", "i2c"]);
        assert!(cfg.loaded.contains("i2c"));
    }

    #[test]
    fn platform_entries_need_a_known_platform() {
        let report = run(json!({"esphome": core(), "sensor": [{"name": "a"}, {"platform": "nope", "name": "b"}]}))
            .unwrap_err();
        let paths: Vec<String> = report.errors.iter().filter_map(|e| e.path()).map(|p| p.to_string()).collect();
        assert_eq!(paths, ["sensor[0]", "sensor[1].platform"]);
    }

    #[test]
    fn errors_are_collected_across_blocks() {
        let report = run(json!({
            "esphome": core(),
            "sensor": [{"platform": "template", "name": "t", "bogus": 1}],
            "switch": [{"platform": "gpio", "name": "s"}],
        }))
        .unwrap_err();
        let messages: Vec<String> = report.errors.iter().map(ConfigError::user_message).collect();
        assert!(messages.contains(&"[bogus] is an invalid option for [sensor].".to_string()), "{messages:?}");
        assert!(messages.contains(&"'pin' is a required option for [switch].".to_string()), "{messages:?}");
    }

    #[test]
    fn type_mismatches_name_their_path_once() {
        let report = run(json!({
            "esphome": core(),
            "switch": [{"platform": "template", "id": "t", "name": "T"}],
            "sensor": [{"platform": "copy", "source_id": "t", "name": "C"}],
        }))
        .unwrap_err();
        let mismatch = report.errors.iter().find(|e| matches!(e, ConfigError::TypeMismatch { .. })).unwrap();
        assert_eq!(mismatch.path().map(|p| p.to_string()).as_deref(), Some("sensor[0].source_id"));
        let text = report.to_string();
        assert_eq!(text.matches("sensor[0].source_id").count(), 1, "{text}");
        assert!(text.contains("sensor[0].source_id: ID 't' of type"), "{text}");
    }

    #[test]
    fn missing_dependencies_are_reported() {
        let report = run(json!({
            "esphome": core(),
            "sensor": [
                {"platform": "template", "id": "src", "name": "src"},
                {"platform": "statistics", "source_id": "src", "mean": {"name": "m"}}
            ],
        }))
        .unwrap_err();
        assert!(report.errors.contains(&ConfigError::MissingDependency {
            component: "sensor.statistics".into(),
            required: "time".into(),
        }));
    }
}
