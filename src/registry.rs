//! Named tables of `{schema, cpp type, builder}` entries.
//!
//! Actions, conditions, pin schemas, light effects and sensor filters are all
//! registries. Config refers to an entry by using its name as the single key
//! of a mapping (`{delay: 500ms}`); the validated form carries an extra
//! `type_id` declaration the builder instantiates.
use indexmap::IndexMap;

use crate::codegen::{BuildFuture, Codegen};
use crate::ir::{AutomationArgs, Expression, TemplateArguments, TypeRef};
use crate::schema::{
    Invalid, RegistryMode, RegistryRef, Schema, VResult, ValidationContext, ValidationError, invalid,
};
use crate::value::{ConfigId, ConfigMap, ConfigPath, ConfigValue};

pub const TYPE_ID: &str = "type_id";

pub const ACTIONS: &str = "action";
pub const CONDITIONS: &str = "condition";
pub const PINS: &str = "pin";
pub const EFFECTS: &str = "light.effect";
pub const SENSOR_FILTERS: &str = "sensor.filter";

/// Everything a builder needs to emit one registry entry.
pub struct EntryCall {
    /// The entry's own validated config (the value under its name).
    pub config: ConfigValue,
    pub id: ConfigId,
    /// `<args...>` of the enclosing automation, for templated action types.
    pub template_arg: TemplateArguments,
    pub args: AutomationArgs,
}

pub type EntryBuilder = fn(Codegen, EntryCall) -> BuildFuture<Expression>;

pub struct RegistryEntry {
    pub name: String,
    pub cpp_type: TypeRef,
    pub schema: Schema,
    pub builder: EntryBuilder,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("{registry}: an entry named '{name}' is already registered")]
    Duplicate { registry: String, name: String },
    #[error("no registry named '{0}'")]
    Unknown(String),
}

pub struct Registry {
    name: String,
    /// Name used for the exported JSON-Schema definition.
    json_name: String,
    entries: IndexMap<String, RegistryEntry>,
}

impl Registry {
    pub fn new(name: &str, json_name: &str) -> Self {
        Self { name: name.to_string(), json_name: json_name.to_string(), entries: IndexMap::new() }
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn json_name(&self) -> &str {
        &self.json_name
    }
    pub fn get(&self, name: &str) -> Option<&RegistryEntry> {
        self.entries.get(name)
    }
    pub fn entries(&self) -> impl Iterator<Item = &RegistryEntry> {
        self.entries.values()
    }
    pub fn len(&self) -> usize {
        self.entries.len()
    }
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn register(
        &mut self,
        name: &str,
        cpp_type: &TypeRef,
        schema: Schema,
        builder: EntryBuilder,
    ) -> Result<(), RegistryError> {
        if self.entries.contains_key(name) {
            return Err(RegistryError::Duplicate { registry: self.name.clone(), name: name.to_string() });
        }
        self.entries.insert(
            name.to_string(),
            RegistryEntry { name: name.to_string(), cpp_type: cpp_type.clone(), schema, builder },
        );
        Ok(())
    }

    /// `{name: inner}` (or bare `"name"`) into `{type_id, name: validated}`.
    pub fn validate_entry(&self, value: &ConfigValue, ctx: &ValidationContext<'_>) -> VResult {
        let owned;
        let map = match value {
            ConfigValue::Map(m) => m,
            ConfigValue::Str(s) => {
                let mut m = ConfigMap::new();
                m.insert(s.clone(), ConfigValue::map());
                owned = m;
                &owned
            }
            other => {
                return Err(invalid(format!(
                    "Expected a dictionary or the name of a {}, got {}",
                    self.name,
                    other.kind()
                )));
            }
        };
        let keys: Vec<&String> = map.keys().filter(|k| k.as_str() != TYPE_ID).collect();
        let key = match keys.as_slice() {
            [] => return Err(invalid(format!("Key missing from {}! Got {}", self.name, value.display_scalar()))),
            [only] => only.as_str(),
            [first, second, ..] => {
                return Err(invalid(format!(
                    "Cannot have two {name}s in one item. Key '{second}' overrides '{first}'! \
                     Did you forget to indent the block inside the {name}?",
                    name = self.name
                )));
            }
        };
        let Some(entry) = self.get(key) else {
            return Err(Invalid::new(format!("Unable to find {} with the name '{key}'.", self.name))
                .at(ConfigPath::key(key))
                .into());
        };
        let inner = map.get(key).cloned().unwrap_or(ConfigValue::Null);
        let validated = entry.schema.validate(&inner, ctx).map_err(|e| e.under_key(key))?;
        let type_id = match map.get(TYPE_ID) {
            Some(ConfigValue::Id(id)) => id.clone(),
            _ => ConfigId::declare(None, entry.cpp_type.clone()),
        };
        let mut out = ConfigMap::new();
        out.insert(TYPE_ID.to_string(), ConfigValue::Id(type_id));
        out.insert(key.to_string(), validated);
        Ok(ConfigValue::Map(out))
    }

    /// A list of entries (a lone entry counts as a list of one).
    pub fn validate_list(&self, value: &ConfigValue, ctx: &ValidationContext<'_>) -> VResult {
        let items: Vec<&ConfigValue> = value.iter_list();
        let mut out = Vec::with_capacity(items.len());
        let mut errors = Vec::new();
        for (i, item) in items.into_iter().enumerate() {
            match self.validate_entry(item, ctx) {
                Ok(v) => out.push(v),
                Err(e) => errors.extend(e.under_index(i).into_errors()),
            }
        }
        match ValidationError::from_errors(errors) {
            Some(err) => Err(err),
            None => Ok(ConfigValue::Seq(out)),
        }
    }

    /// Pin mappings name their provider by key (`{pcf8574: hub, number: 3}`);
    /// without one the value is an internal GPIO pin.
    pub fn validate_pin(&self, value: &ConfigValue, fallback: &Schema, ctx: &ValidationContext<'_>) -> VResult {
        if let Some(map) = value.as_map() {
            if let Some(entry) = map.keys().find_map(|k| self.get(k)) {
                return entry.schema.validate(value, ctx);
            }
        }
        fallback.validate(value, ctx)
    }

    /// The entry a validated `{type_id, name: ...}` item refers to.
    pub fn entry_for<'a>(&self, item: &'a ConfigValue) -> Option<(&RegistryEntry, &'a ConfigValue)> {
        let map = item.as_map()?;
        map.iter().filter(|(k, _)| k.as_str() != TYPE_ID).find_map(|(k, v)| Some((self.get(k)?, v)))
    }
}

impl RegistryRef {
    pub fn validate(&self, value: &ConfigValue, ctx: &ValidationContext<'_>) -> VResult {
        let Some(registry) = ctx.registries.get(&self.registry) else {
            return Err(invalid(RegistryError::Unknown(self.registry.clone()).to_string()));
        };
        match &self.mode {
            RegistryMode::Entry => registry.validate_entry(value, ctx),
            RegistryMode::List => registry.validate_list(value, ctx),
            RegistryMode::Pin { fallback } => registry.validate_pin(value, fallback, ctx),
        }
    }
}

/// All registries of a run. Frozen once components are registered.
#[derive(Default)]
pub struct RegistrySet {
    registries: IndexMap<String, Registry>,
}

impl RegistrySet {
    /// Actions, conditions, pin schemas and effects.
    pub fn standard() -> Self {
        let mut set = Self::default();
        set.declare(ACTIONS, "automation.ACTION_REGISTRY");
        set.declare(CONDITIONS, "automation.CONDITION_REGISTRY");
        set.declare(PINS, "pins.PIN_SCHEMA_REGISTRY");
        set.declare(EFFECTS, "light.EFFECTS_REGISTRY");
        set
    }
    /// Adds an empty registry, or returns the existing one.
    pub fn declare(&mut self, name: &str, json_name: &str) -> &mut Registry {
        self.registries.entry(name.to_string()).or_insert_with(|| Registry::new(name, json_name))
    }
    pub fn get(&self, name: &str) -> Option<&Registry> {
        self.registries.get(name)
    }
    pub fn iter(&self) -> impl Iterator<Item = &Registry> {
        self.registries.values()
    }
    pub fn register(
        &mut self,
        registry: &str,
        name: &str,
        cpp_type: &TypeRef,
        schema: Schema,
        builder: EntryBuilder,
    ) -> Result<(), RegistryError> {
        self.registries
            .get_mut(registry)
            .ok_or_else(|| RegistryError::Unknown(registry.to_string()))?
            .register(name, cpp_type, schema, builder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::types::ACTION;
    use crate::schema::{Field, leaf, registry_list, registry_pin, time};
    use crate::target::Target;
    use serde_json::json;
    use std::collections::BTreeSet;

    fn noop(_: Codegen, _: EntryCall) -> BuildFuture<Expression> {
        Box::pin(async { Ok(Expression::raw("noop")) })
    }

    fn actions() -> RegistrySet {
        let mut set = RegistrySet::standard();
        set.register(ACTIONS, "delay", &ACTION, time::positive_time_period_milliseconds(), noop).unwrap();
        set.register(
            ACTIONS,
            "logger.log",
            &ACTION,
            Schema::mapping([Field::required("format", leaf::string())]),
            noop,
        )
        .unwrap();
        set
    }

    fn run(set: &RegistrySet, schema: &Schema, value: serde_json::Value) -> VResult {
        let loaded = BTreeSet::new();
        let target = Target::default();
        schema.validate(&ConfigValue::from_json(&value), &ValidationContext::new(set, &loaded, &target))
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut set = actions();
        let err = set.register(ACTIONS, "delay", &ACTION, leaf::string(), noop).unwrap_err();
        assert!(matches!(err, RegistryError::Duplicate { .. }));
    }

    #[test]
    fn entries_gain_a_type_id() {
        let set = actions();
        let v = run(&set, &registry_list(ACTIONS), json!([{"delay": "500ms"}])).unwrap();
        let item = &v.as_seq().unwrap()[0];
        assert!(item.get(TYPE_ID).and_then(|x| x.as_id()).is_some_and(|id| id.is_declaration));
        assert_eq!(item.get("delay").and_then(|x| x.as_time()).map(|t| t.total_millis()), Some(500));
    }

    #[test]
    fn entry_errors_name_the_problem() {
        let set = actions();
        let err = run(&set, &registry_list(ACTIONS), json!([{"dleay": "1s"}])).unwrap_err();
        assert_eq!(err.errors()[0].message, "Unable to find action with the name 'dleay'.");
        assert_eq!(err.errors()[0].path.to_string(), "[0].dleay");

        let err = run(&set, &registry_list(ACTIONS), json!([{"delay": "1s", "logger.log": "x"}])).unwrap_err();
        assert!(err.errors()[0].message.starts_with("Cannot have two actions in one item."));

        let err = run(&set, &registry_list(ACTIONS), json!([{}])).unwrap_err();
        assert!(err.errors()[0].message.starts_with("Key missing from action!"));
    }

    #[test]
    fn pin_mode_dispatches_on_key_presence() {
        let mut set = RegistrySet::standard();
        let expander = Schema::mapping([
            Field::required("expander", leaf::string()),
            Field::required("number", leaf::int_range(Some(0), Some(7))),
        ]);
        set.register(PINS, "expander", &ACTION, expander, noop).unwrap();
        let schema = registry_pin(PINS, leaf::int_());
        assert_eq!(run(&set, &schema, json!(4)).unwrap(), ConfigValue::Int(4));
        assert!(run(&set, &schema, json!({"expander": "hub", "number": 3})).is_ok());
        assert!(run(&set, &schema, json!({"expander": "hub", "number": 9})).is_err());
    }
}
