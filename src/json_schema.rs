//! JSON-Schema export of every component schema, for editor completion and
//! external validation tooling.
//!
//! Registries and automations are emitted once under `definitions` and
//! referenced by name, which is also what keeps recursive shapes (conditions
//! inside `and`, filters inside `or`) finite.
use std::collections::{BTreeMap, BTreeSet};

use serde_json::{Map, Value, json};

use crate::loader::RunContext;
use crate::registry::{ACTIONS, RegistrySet};
use crate::schema::{
    AutomationSchema, ExtraPolicy, Field, JsonHint, ListSchema, MappingSchema, Marker, RegistryMode, RegistryRef,
    Schema, SchemaNode, TypedSchema,
};

pub const DRAFT: &str = "http://json-schema.org/draft-07/schema#";
const AUTOMATION: &str = "automation";
const LAMBDA: &str = "lambda";

/// Keys every automation mapping carries; anything beyond these is trigger specific.
const AUTOMATION_BASE_KEYS: [&str; 4] = ["trigger_id", "automation_id", "if", "then"];

fn reference(name: &str) -> Value {
    json!({ "$ref": format!("#/definitions/{name}") })
}

fn one_or_many(item: Value) -> Value {
    json!({ "anyOf": [{ "type": "array", "items": item.clone() }, item] })
}

struct Exporter<'a> {
    registries: &'a RegistrySet,
    definitions: BTreeMap<String, Value>,
    /// Registries referenced but not yet emitted.
    pending: Vec<String>,
    seen: BTreeSet<String>,
}

impl<'a> Exporter<'a> {
    fn new(registries: &'a RegistrySet) -> Self {
        Self { registries, definitions: BTreeMap::new(), pending: Vec::new(), seen: BTreeSet::new() }
    }

    fn registry_ref(&mut self, name: &str) -> Value {
        let registries = self.registries;
        let Some(registry) = registries.get(name) else {
            tracing::warn!(registry = name, "schema points at an undeclared registry");
            return json!({});
        };
        if self.seen.insert(name.to_string()) {
            self.pending.push(name.to_string());
        }
        reference(registry.json_name())
    }

    /// Emits queued registries until none are left; entry schemas may queue more.
    fn drain(&mut self) {
        let registries = self.registries;
        while let Some(name) = self.pending.pop() {
            let Some(registry) = registries.get(&name) else { continue };
            let mut arms = Vec::new();
            for entry in registry.entries() {
                let body = self.schema(&entry.schema);
                arms.push(json!({
                    "type": "object",
                    "properties": { entry.name.clone(): body },
                    "required": [entry.name.clone()],
                    "additionalProperties": false,
                }));
            }
            self.definitions.insert(registry.json_name().to_string(), json!({ "anyOf": arms }));
        }
    }

    fn ensure_lambda(&mut self) -> Value {
        self.definitions.entry(LAMBDA.to_string()).or_insert_with(|| {
            json!({
                "anyOf": [
                    { "type": "string", "pattern": "^!lambda\\s" },
                    {
                        "type": "object",
                        "properties": { "!lambda": { "type": "string" } },
                        "required": ["!lambda"],
                        "additionalProperties": false,
                    },
                ]
            })
        });
        reference(LAMBDA)
    }

    fn ensure_automation(&mut self) -> Value {
        if !self.definitions.contains_key(AUTOMATION) {
            let action = self.registry_ref(ACTIONS);
            let definition = json!({
                "anyOf": [
                    { "type": "array", "items": action.clone() },
                    action.clone(),
                    {
                        "type": "object",
                        "properties": { "then": { "anyOf": [{ "type": "array", "items": action.clone() }, action] } },
                        "required": ["then"],
                    },
                ]
            });
            self.definitions.insert(AUTOMATION.to_string(), definition);
        }
        reference(AUTOMATION)
    }

    // ---- nodes ----

    fn schema(&mut self, schema: &Schema) -> Value {
        match schema.node() {
            SchemaNode::Leaf(leaf) => match leaf.json {
                JsonHint::String => json!({ "type": "string" }),
                JsonHint::Integer => json!({ "type": "integer" }),
                JsonHint::Number => json!({ "type": "number" }),
                JsonHint::Boolean => json!({ "type": "boolean" }),
                JsonHint::Any => json!({}),
            },
            SchemaNode::Mapping(m) => self.mapping(m),
            SchemaNode::All(parts) => {
                let mut exported: Vec<Value> =
                    parts.iter().map(|p| self.schema(p)).filter(|v| *v != json!({})).collect();
                match exported.len() {
                    0 => json!({}),
                    1 => exported.remove(0),
                    _ => json!({ "allOf": exported }),
                }
            }
            SchemaNode::Any(parts) => {
                let arms: Vec<Value> = parts.iter().map(|p| self.schema(p)).collect();
                json!({ "anyOf": arms })
            }
            SchemaNode::Typed(t) => self.typed(t),
            SchemaNode::List(l) => self.list(l),
            SchemaNode::Templatable(inner) => {
                let inner = self.schema(inner);
                json!({ "anyOf": [inner, self.ensure_lambda()] })
            }
            SchemaNode::MaybeSimple { inner, key } => {
                let simple = inner
                    .fields()
                    .and_then(|fields| fields.iter().find(|f| f.key == *key))
                    .map(|f| f.schema.clone());
                let full = self.schema(inner);
                match simple {
                    Some(simple) => json!({ "anyOf": [full, self.schema(&simple)] }),
                    None => full,
                }
            }
            SchemaNode::Id { ty, .. } => json!({ "type": "string", "description": format!("ID of {ty}") }),
            SchemaNode::Lambda { .. } => self.ensure_lambda(),
            SchemaNode::OneOf(o) => {
                let values: Vec<Value> = o.values.iter().map(|v| v.to_json()).collect();
                json!({ "enum": values })
            }
            SchemaNode::Registry(r) => self.registry(r),
            SchemaNode::Automation(a) => self.automation(a),
        }
    }

    fn field(&mut self, field: &Field) -> Value {
        let mut out = self.schema(&field.schema);
        if let Value::Object(obj) = &mut out {
            if let Some(default) = &field.default {
                obj.insert("default".into(), default.to_json());
            }
            if let Some(text) = &field.description {
                obj.insert("description".into(), Value::from(text.clone()));
            }
        }
        out
    }

    fn mapping(&mut self, m: &MappingSchema) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for field in m.fields() {
            properties.insert(field.key.clone(), self.field(field));
            if field.marker == Marker::Required {
                required.push(Value::from(field.key.clone()));
            }
        }
        let mut out = json!({ "type": "object", "properties": properties });
        if !required.is_empty() {
            out["required"] = Value::Array(required);
        }
        if m.extra() == ExtraPolicy::Reject {
            out["additionalProperties"] = Value::Bool(false);
        }
        out
    }

    /// `allOf` of `if {key: const} then branch`, one per discriminator value.
    fn typed(&mut self, t: &TypedSchema) -> Value {
        let names: Vec<Value> = t.branches.keys().map(|k| Value::from(k.clone())).collect();
        let mut cases = Vec::new();
        for (name, branch) in &t.branches {
            let mut then = self.schema(branch);
            // The discriminator is validated by the outer object.
            if let Some(props) = then.get_mut("properties").and_then(Value::as_object_mut) {
                props.insert(t.key.clone(), json!({ "const": name }));
            }
            cases.push(json!({
                "if": { "properties": { t.key.clone(): { "const": name } } },
                "then": then,
            }));
        }
        let mut out = json!({
            "type": "object",
            "properties": { t.key.clone(): { "enum": names } },
            "allOf": cases,
        });
        match &t.default_type {
            Some(default) => out["properties"][&t.key]["default"] = Value::from(default.clone()),
            None => out["required"] = json!([t.key.clone()]),
        }
        out
    }

    fn list(&mut self, l: &ListSchema) -> Value {
        let item = self.schema(&l.item);
        let mut array = json!({ "type": "array", "items": item.clone() });
        if let Some(min) = l.min {
            array["minItems"] = Value::from(min);
        }
        if let Some(max) = l.max {
            array["maxItems"] = Value::from(max);
        }
        if l.coerce { json!({ "anyOf": [array, item] }) } else { array }
    }

    fn registry(&mut self, r: &RegistryRef) -> Value {
        let entry = self.registry_ref(&r.registry);
        match &r.mode {
            RegistryMode::Entry => entry,
            RegistryMode::List => json!({ "anyOf": [{ "type": "array", "items": entry.clone() }, entry] }),
            RegistryMode::Pin { fallback } => {
                let fallback = self.schema(fallback);
                json!({ "anyOf": [entry, fallback] })
            }
        }
    }

    /// Plain automations share one named definition; trigger-specific keys
    /// add the concrete mapping alongside it.
    fn automation(&mut self, a: &AutomationSchema) -> Value {
        let shared = self.ensure_automation();
        let specific = a
            .schema
            .fields()
            .is_some_and(|fields| fields.iter().any(|f| !AUTOMATION_BASE_KEYS.contains(&f.key.as_str())));
        if !specific {
            return shared;
        }
        let mapping = self.schema(&a.schema);
        let automations = if a.single { mapping } else { one_or_many(mapping) };
        json!({ "anyOf": [shared, automations] })
    }
}

/// The whole document: one property per known component.
#[tracing::instrument(level = "info", skip_all)]
pub fn export(ctx: &RunContext) -> Value {
    let mut exporter = Exporter::new(&ctx.registries);
    let mut properties = Map::new();
    for component in ctx.catalog.components() {
        let body = if component.is_platform_component {
            one_or_many(exporter.schema(&ctx.catalog.platform_schema(&component.key)))
        } else {
            match &component.config_schema {
                Some(schema) if component.multi_conf => one_or_many(exporter.schema(schema)),
                Some(schema) => exporter.schema(schema),
                None => json!({ "type": ["object", "null"] }),
            }
        };
        properties.insert(component.key.clone(), body);
    }
    exporter.drain();
    tracing::info!(definitions = exporter.definitions.len(), "schema exported");
    json!({
        "$schema": DRAFT,
        "type": "object",
        "properties": properties,
        "required": [crate::validate::CORE_KEY],
        "definitions": exporter.definitions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn document() -> Value {
        export(&RunContext::builtin().unwrap())
    }

    #[test]
    fn platforms_become_if_then_cases() {
        let doc = document();
        let sensor = &doc["properties"]["sensor"]["anyOf"][1];
        let platforms = sensor["properties"]["platform"]["enum"].as_array().unwrap();
        assert!(platforms.contains(&json!("template")));
        let cases = sensor["allOf"].as_array().unwrap();
        assert_eq!(cases.len(), platforms.len());
        assert!(cases.iter().any(|c| c["if"]["properties"]["platform"]["const"] == json!("copy")));
        assert_eq!(sensor["required"], json!(["platform"]));
    }

    #[test]
    fn registries_are_named_references() {
        let doc = document();
        let actions = &doc["definitions"]["automation.ACTION_REGISTRY"]["anyOf"];
        let delay = actions
            .as_array()
            .unwrap()
            .iter()
            .find(|arm| arm["required"] == json!(["delay"]))
            .expect("delay action exported");
        assert_eq!(delay["additionalProperties"], json!(false));
        assert!(doc["definitions"]["automation"]["anyOf"].as_array().is_some_and(|a| a.len() == 3));
        assert!(doc["definitions"].get("sensor.FILTER_REGISTRY").is_some());
    }

    #[test]
    fn export_is_stable() {
        assert_eq!(document(), document());
    }
}
