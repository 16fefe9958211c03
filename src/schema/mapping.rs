//! Mapping schemas: marked keys, defaults, inclusion/exclusion groups.
use indexmap::IndexMap;

use super::error::{Invalid, VResult, ValidationError};
use super::{Schema, ValidationContext, declare_id};
use crate::ir::TypeRef;
use crate::value::{ConfigMap, ConfigPath, ConfigValue};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Marker {
    Required,
    Optional,
    /// All keys of the group or none of them.
    Inclusive(String),
    /// At most one key of the group.
    Exclusive(String),
    /// Only meaningful (and only defaulted) when the named component is loaded.
    OnlyWith(String),
    /// Optional ID whose name is filled in by the ID pass when absent.
    GenerateId,
}

#[derive(Clone)]
pub struct Field {
    pub key: String,
    pub marker: Marker,
    pub schema: Schema,
    pub default: Option<ConfigValue>,
    pub description: Option<String>,
}

impl Field {
    fn new(key: &str, marker: Marker, schema: Schema) -> Self {
        Self { key: key.to_string(), marker, schema, default: None, description: None }
    }
    pub fn required(key: &str, schema: Schema) -> Self {
        Self::new(key, Marker::Required, schema)
    }
    pub fn optional(key: &str, schema: Schema) -> Self {
        Self::new(key, Marker::Optional, schema)
    }
    pub fn inclusive(key: &str, group: &str, schema: Schema) -> Self {
        Self::new(key, Marker::Inclusive(group.to_string()), schema)
    }
    pub fn exclusive(key: &str, group: &str, schema: Schema) -> Self {
        Self::new(key, Marker::Exclusive(group.to_string()), schema)
    }
    pub fn only_with(key: &str, component: &str, schema: Schema) -> Self {
        Self::new(key, Marker::OnlyWith(component.to_string()), schema)
    }
    /// `id:` declaring a `ty`, auto-named when left out.
    pub fn generate_id(ty: &TypeRef) -> Self {
        Self::new("id", Marker::GenerateId, declare_id(ty))
    }
    /// Generated ID under another key (`trigger_id`, `automation_id`).
    pub fn generate_id_at(key: &str, ty: &TypeRef) -> Self {
        Self::new(key, Marker::GenerateId, declare_id(ty))
    }
    pub fn with_default(mut self, value: impl Into<ConfigValue>) -> Self {
        self.default = Some(value.into());
        self
    }
    pub fn describe(mut self, text: &str) -> Self {
        self.description = Some(text.to_string());
        self
    }
    pub fn is_required(&self) -> bool {
        self.marker == Marker::Required
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtraPolicy {
    Reject,
    Allow,
}

#[derive(Clone)]
pub struct MappingSchema {
    fields: Vec<Field>,
    extra: ExtraPolicy,
    /// Keys replaced by an `extend` further down the chain.
    overrides: Vec<String>,
}

impl MappingSchema {
    pub fn new(fields: impl IntoIterator<Item = Field>) -> Self {
        Self { fields: fields.into_iter().collect(), extra: ExtraPolicy::Reject, overrides: Vec::new() }
    }
    pub fn with_extra(mut self, extra: ExtraPolicy) -> Self {
        self.extra = extra;
        self
    }
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }
    pub fn field(&self, key: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.key == key)
    }
    pub fn extra(&self) -> ExtraPolicy {
        self.extra
    }
    pub fn overrides(&self) -> &[String] {
        &self.overrides
    }

    /// `other`'s fields win; `self`'s extra-key policy is kept.
    pub fn extend(&self, other: &MappingSchema) -> MappingSchema {
        let mut fields = self.fields.clone();
        let mut overrides = self.overrides.clone();
        for field in &other.fields {
            match fields.iter_mut().find(|f| f.key == field.key) {
                Some(slot) => {
                    *slot = field.clone();
                    overrides.push(field.key.clone());
                }
                None => fields.push(field.clone()),
            }
        }
        MappingSchema { fields, extra: self.extra, overrides }
    }

    pub fn validate(&self, value: &ConfigValue, ctx: &ValidationContext<'_>) -> VResult {
        let empty = ConfigMap::new();
        let input = match value {
            ConfigValue::Map(m) => m,
            ConfigValue::Null => &empty,
            _ => return Err(super::invalid("expected a dictionary")),
        };
        let mut errors: Vec<Invalid> = Vec::new();
        let mut out = ConfigMap::with_capacity(input.len());

        for (key, raw) in input {
            let Some(field) = self.field(key) else {
                match self.extra {
                    ExtraPolicy::Reject => errors.push(Invalid::extra_key(key)),
                    ExtraPolicy::Allow => {
                        out.insert(key.clone(), raw.clone());
                    }
                }
                continue;
            };
            if let Marker::OnlyWith(component) = &field.marker {
                if !ctx.is_loaded(component) {
                    errors.push(
                        Invalid::new(format!("'{key}' requires component {component}")).at(ConfigPath::key(key)),
                    );
                    continue;
                }
            }
            match field.schema.validate(raw, ctx) {
                Ok(v) => {
                    out.insert(key.clone(), v);
                }
                Err(e) => errors.extend(e.under_key(key).into_errors()),
            }
        }

        for field in &self.fields {
            if input.contains_key(&field.key) {
                continue;
            }
            let fallback = match &field.marker {
                Marker::Required => {
                    errors.push(Invalid::required_key(&field.key));
                    continue;
                }
                Marker::GenerateId => Some(ConfigValue::Null),
                Marker::OnlyWith(component) if !ctx.is_loaded(component) => None,
                _ => field.default.clone(),
            };
            let Some(fallback) = fallback else { continue };
            match field.schema.validate(&fallback, ctx) {
                Ok(v) => {
                    out.insert(field.key.clone(), v);
                }
                Err(e) => errors.extend(e.under_key(&field.key).into_errors()),
            }
        }

        errors.extend(self.check_groups(input));

        if let Some(err) = ValidationError::from_errors(sorted(errors)) {
            return Err(err);
        }
        Ok(ConfigValue::Map(out))
    }

    fn check_groups(&self, input: &ConfigMap) -> Vec<Invalid> {
        let mut inclusive: IndexMap<&str, Vec<&str>> = IndexMap::new();
        let mut exclusive: IndexMap<&str, Vec<&str>> = IndexMap::new();
        for field in &self.fields {
            match &field.marker {
                Marker::Inclusive(group) => inclusive.entry(group.as_str()).or_default().push(&field.key),
                Marker::Exclusive(group) => exclusive.entry(group.as_str()).or_default().push(&field.key),
                _ => {}
            }
        }
        let mut errors = Vec::new();
        for (group, keys) in inclusive {
            let present = keys.iter().filter(|k| input.contains_key(**k)).count();
            if present > 0 && present < keys.len() {
                errors.push(Invalid::new(format!(
                    "some but not all values in the same group of inclusion '{group}'"
                )));
            }
        }
        for (group, keys) in exclusive {
            let present: Vec<&&str> = keys.iter().filter(|k| input.contains_key(**k)).collect();
            if present.len() > 1 {
                errors.push(
                    Invalid::new(format!("two or more values in the same group of exclusion '{group}'"))
                        .at(ConfigPath::key(*present[1])),
                );
            }
        }
        errors
    }
}

fn sorted(mut errors: Vec<Invalid>) -> Vec<Invalid> {
    errors.sort_by(|a, b| a.path.cmp(&b.path));
    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::RegistrySet;
    use crate::schema::leaf;
    use crate::target::Target;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::collections::BTreeSet;

    fn run(schema: &Schema, value: serde_json::Value, loaded: &[&str]) -> VResult {
        let registries = RegistrySet::default();
        let loaded: BTreeSet<String> = loaded.iter().map(|s| s.to_string()).collect();
        let target = Target::default();
        let ctx = ValidationContext::new(&registries, &loaded, &target);
        schema.validate(&ConfigValue::from_json(&value), &ctx)
    }

    fn messages(err: &ValidationError) -> Vec<String> {
        err.errors().iter().map(|e| format!("{} @ {}", e.message, e.path)).collect()
    }

    #[test]
    fn collects_every_error_sorted_by_path() {
        let schema = Schema::mapping([
            Field::required("name", leaf::string()),
            Field::optional("pin", leaf::int_()),
        ]);
        let err = run(&schema, json!({"pin": "x", "zzz": 1}), &[]).unwrap_err();
        assert_eq!(
            messages(&err),
            [
                "required key not provided @ name",
                "expected integer @ pin",
                "extra keys not allowed @ zzz",
            ]
        );
    }

    #[test]
    fn defaults_follow_input_keys_in_field_order() {
        let schema = Schema::mapping([
            Field::optional("a", leaf::int_()).with_default(1),
            Field::required("b", leaf::int_()),
            Field::optional("c", leaf::int_()).with_default(3),
        ]);
        let v = run(&schema, json!({"b": 2}), &[]).unwrap();
        let keys: Vec<&str> = v.as_map().unwrap().keys().map(String::as_str).collect();
        assert_eq!(keys, ["b", "a", "c"]);
    }

    #[test]
    fn inclusion_and_exclusion_groups() {
        let schema = Schema::mapping([
            Field::inclusive("min", "range", leaf::float_()),
            Field::inclusive("max", "range", leaf::float_()),
            Field::exclusive("lambda", "src", leaf::string()),
            Field::exclusive("value", "src", leaf::string()),
        ]);
        assert!(run(&schema, json!({"min": 1, "max": 2}), &[]).is_ok());
        let err = run(&schema, json!({"min": 1}), &[]).unwrap_err();
        assert_eq!(err.errors()[0].message, "some but not all values in the same group of inclusion 'range'");
        let err = run(&schema, json!({"lambda": "a", "value": "b"}), &[]).unwrap_err();
        assert_eq!(err.errors()[0].message, "two or more values in the same group of exclusion 'src'");
    }

    #[test]
    fn only_with_depends_on_loaded_components() {
        let schema = Schema::mapping([Field::only_with("mqtt_id", "mqtt", leaf::string()).with_default("m")]);
        assert_eq!(run(&schema, json!({}), &[]).unwrap(), ConfigValue::map());
        let v = run(&schema, json!({}), &["mqtt"]).unwrap();
        assert_eq!(v.get("mqtt_id").and_then(|x| x.as_str()), Some("m"));
        assert!(run(&schema, json!({"mqtt_id": "x"}), &[]).is_err());
    }

    #[test]
    fn generate_id_fills_an_unnamed_declaration() {
        let schema = Schema::mapping([Field::generate_id(&crate::ir::types::COMPONENT)]);
        let v = run(&schema, json!({}), &[]).unwrap();
        let id = v.get("id").and_then(|x| x.as_id()).unwrap();
        assert!(id.is_declaration && id.name.is_none());
    }

    #[test]
    fn extend_overrides_and_records() {
        let base = MappingSchema::new([Field::optional("a", leaf::int_()), Field::optional("b", leaf::int_())]);
        let other = MappingSchema::new([Field::required("b", leaf::string()), Field::optional("c", leaf::int_())]);
        let merged = base.extend(&other);
        let keys: Vec<&str> = merged.fields().iter().map(|f| f.key.as_str()).collect();
        assert_eq!(keys, ["a", "b", "c"]);
        assert!(merged.field("b").unwrap().is_required());
        assert_eq!(merged.overrides(), ["b".to_string()]);
    }
}
