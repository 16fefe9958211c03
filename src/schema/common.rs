//! Schemas shared by most components: setup priority, polling interval and
//! the entity base (name, icon, visibility).
use super::error::invalid;
use super::time::update_interval;
use super::{Field, JsonHint, OneOfOptions, Schema, enum_, leaf};
use crate::ir::TypeRef;
use crate::value::{ConfigMap, ConfigValue};

pub fn component_schema() -> Schema {
    Schema::mapping([Field::optional("setup_priority", super::leaf::float_())])
}

pub fn polling_component_schema(default_interval: &str) -> Schema {
    component_schema().extend_fields([Field::optional("update_interval", update_interval())
        .with_default(default_interval)])
}

pub fn entity_category() -> Schema {
    enum_(
        [
            ("config", "ENTITY_CATEGORY_CONFIG".to_string()),
            ("diagnostic", "ENTITY_CATEGORY_DIAGNOSTIC".to_string()),
        ],
        OneOfOptions::lower(),
    )
}

/// Entity fields, plus the rule that an entity needs an `id:` or a `name:`;
/// nameless entities are internal.
pub fn entity_base_schema() -> Schema {
    Schema::mapping([
        Field::optional("name", super::leaf::string()),
        Field::optional("internal", super::leaf::boolean()),
        Field::optional("disabled_by_default", super::leaf::boolean()).with_default(false),
        Field::optional("icon", super::leaf::icon()),
        Field::optional("entity_category", entity_category()),
    ])
    .with_validators([id_or_name()])
}

/// Entity base with a generated `id:` of `ty`.
pub fn entity_schema(ty: &TypeRef) -> Schema {
    Schema::mapping([Field::generate_id(ty)]).extend(&entity_base_schema())
}

fn id_or_name() -> Schema {
    leaf("id_or_name", JsonHint::Any, |value, _| {
        let Some(map) = value.as_map() else { return Ok(value.clone()) };
        let manual_id = map.get("id").and_then(ConfigValue::as_id).is_some_and(|id| id.is_manual);
        if map.contains_key("name") {
            return Ok(value.clone());
        }
        if !manual_id {
            return Err(invalid("At least one of 'id:' or 'name:' is required!"));
        }
        let mut out: ConfigMap = map.clone();
        out.entry("internal".to_string()).or_insert(ConfigValue::Bool(true));
        Ok(ConfigValue::Map(out))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::types::ENTITY_BASE;
    use crate::registry::RegistrySet;
    use crate::schema::{ValidationContext, VResult};
    use crate::target::Target;
    use serde_json::json;
    use std::collections::BTreeSet;

    fn run(schema: &Schema, value: serde_json::Value) -> VResult {
        let registries = RegistrySet::default();
        let loaded = BTreeSet::new();
        let target = Target::default();
        schema.validate(&ConfigValue::from_json(&value), &ValidationContext::new(&registries, &loaded, &target))
    }

    #[test]
    fn polling_default_is_milliseconds() {
        let v = run(&polling_component_schema("60s"), json!({})).unwrap();
        assert_eq!(v.get("update_interval").and_then(|t| t.as_time()).map(|t| t.in_unit()), Some(60_000));
    }

    #[test]
    fn entities_need_an_id_or_a_name() {
        let schema = entity_schema(&ENTITY_BASE);
        assert!(run(&schema, json!({"name": "Kitchen"})).is_ok());
        let err = run(&schema, json!({})).unwrap_err();
        assert_eq!(err.errors()[0].message, "At least one of 'id:' or 'name:' is required!");
        let v = run(&schema, json!({"id": "hidden"})).unwrap();
        assert_eq!(v.get("internal"), Some(&ConfigValue::Bool(true)));
    }
}
