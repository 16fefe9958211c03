//! Entity plumbing shared by sensors, switches, lights and friends: the
//! common setters, and copying display properties from the entity a wrapper
//! reads from (`copy`, `statistics`).
use std::collections::BTreeSet;

use crate::codegen::Codegen;
use crate::ir::Expression;
use crate::value::{ConfigMap, ConfigValue};

/// Object ID derived from a friendly name: `"Living Room Temp"` becomes
/// `living_room_temp`.
pub fn object_id(name: &str) -> String {
    name.chars()
        .filter_map(|c| match c {
            ' ' => Some('_'),
            c if c.is_ascii_alphanumeric() || c == '_' || c == '-' => Some(c.to_ascii_lowercase()),
            _ => None,
        })
        .collect()
}

/// Emits the `EntityBase` setters for whatever the entity config carries.
pub fn setup_entity(cg: &Codegen, var: &Expression, config: &ConfigValue) {
    if let Some(name) = config.get("name").and_then(ConfigValue::as_str) {
        cg.add(var.method("set_name", vec![Expression::string(name)]));
        cg.add(var.method("set_object_id", vec![Expression::string(object_id(name))]));
    }
    if config.get("disabled_by_default").and_then(ConfigValue::as_bool) == Some(true) {
        cg.add(var.method("set_disabled_by_default", vec![Expression::bool(true)]));
    }
    if let Some(internal) = config.get("internal").and_then(ConfigValue::as_bool) {
        cg.add(var.method("set_internal", vec![Expression::bool(internal)]));
    }
    if let Some(icon) = config.get("icon").and_then(ConfigValue::as_str) {
        cg.add(var.method("set_icon", vec![Expression::string(icon)]));
    }
    if let Some(category) = config.get("entity_category").and_then(ConfigValue::as_enum) {
        cg.add(var.method("set_entity_category", vec![Expression::raw(category.cpp.clone())]));
    }
}

// ------------------------- Property inheritance --------------------------- //

/// The mapping anywhere under `root` whose `id:` declares `name`.
pub fn find_declaration<'a>(root: &'a ConfigValue, name: &str) -> Option<&'a ConfigMap> {
    match root {
        ConfigValue::Map(m) => {
            let declares = m
                .get("id")
                .and_then(ConfigValue::as_id)
                .is_some_and(|id| id.is_declaration && id.name() == Some(name));
            if declares {
                return Some(m);
            }
            m.values().find_map(|v| find_declaration(v, name))
        }
        ConfigValue::Seq(items) => items.iter().find_map(|v| find_declaration(v, name)),
        _ => None,
    }
}

/// `property` of the entity `name`. When that entity doesn't set it and
/// itself wraps another entity through `via`, the chain is followed.
pub fn resolve_property(root: &ConfigValue, name: &str, property: &str, via: &str) -> Option<ConfigValue> {
    let mut seen = BTreeSet::new();
    let mut current = name.to_string();
    while seen.insert(current.clone()) {
        let entity = find_declaration(root, &current)?;
        if let Some(value) = entity.get(property) {
            return Some(value.clone());
        }
        current = entity.get(via)?.as_id()?.name()?.to_string();
    }
    None
}

/// Fills `property` into `own` from the source entity unless `own` already
/// sets it. `transform` may rewrite or drop the inherited value.
pub fn inherit_property_from(
    own: &mut ConfigMap,
    root: &ConfigValue,
    source: &str,
    via: &str,
    property: &str,
    transform: impl Fn(ConfigValue) -> Option<ConfigValue>,
) {
    if own.contains_key(property) {
        return;
    }
    if let Some(value) = resolve_property(root, source, property, via).and_then(transform) {
        own.insert(property.to_string(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::types::ENTITY_BASE;
    use crate::value::ConfigId;

    fn entity(id: &str, pairs: Vec<(&str, ConfigValue)>) -> ConfigValue {
        let mut m = ConfigMap::new();
        m.insert("id".into(), ConfigValue::Id(ConfigId::declare(Some(id.into()), ENTITY_BASE.clone())));
        for (k, v) in pairs {
            m.insert(k.into(), v);
        }
        ConfigValue::Map(m)
    }

    fn source_ref(name: &str) -> ConfigValue {
        ConfigValue::Id(ConfigId::reference(Some(name.into()), ENTITY_BASE.clone()))
    }

    #[test]
    fn object_ids_are_sanitized() {
        assert_eq!(object_id("Living Room Temp (°C)"), "living_room_temp_c");
    }

    #[test]
    fn properties_follow_wrapper_chains() {
        let root = ConfigValue::Map(
            [(
                "sensor".to_string(),
                ConfigValue::Seq(vec![
                    entity("raw", vec![("unit_of_measurement", "°C".into())]),
                    entity("copy1", vec![("source_id", source_ref("raw"))]),
                    entity("loop_a", vec![("source_id", source_ref("loop_b"))]),
                    entity("loop_b", vec![("source_id", source_ref("loop_a"))]),
                ]),
            )]
            .into_iter()
            .collect(),
        );
        assert_eq!(resolve_property(&root, "copy1", "unit_of_measurement", "source_id"), Some("°C".into()));
        assert_eq!(resolve_property(&root, "loop_a", "unit_of_measurement", "source_id"), None);

        let mut own = ConfigMap::new();
        inherit_property_from(&mut own, &root, "copy1", "source_id", "unit_of_measurement", |v| {
            v.as_str().map(|u| ConfigValue::from(format!("{u}²")))
        });
        assert_eq!(own.get("unit_of_measurement"), Some(&"°C²".into()));

        let mut own: ConfigMap = [("unit_of_measurement".to_string(), ConfigValue::from("K"))].into_iter().collect();
        inherit_property_from(&mut own, &root, "raw", "source_id", "unit_of_measurement", Some);
        assert_eq!(own.get("unit_of_measurement"), Some(&"K".into()));
    }
}
