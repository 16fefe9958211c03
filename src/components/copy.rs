//! `sensor: platform: copy`, a second sensor mirroring another one. Display
//! properties the copy leaves out are taken from its source.
use once_cell::sync::Lazy;

use super::sensor::{SENSOR, new_sensor, sensor_schema};
use super::id_at;
use crate::codegen::{BuildFuture, Codegen};
use crate::entity::inherit_property_from;
use crate::ir::types::{COMPONENT, ESPHOME_NS};
use crate::ir::{Namespace, TypeRef};
use crate::loader::{ComponentCatalog, ComponentDescriptor, LoaderError};
use crate::schema::common::component_schema;
use crate::schema::{Field, VResult, use_id};
use crate::value::ConfigValue;

pub static COPY_NS: Lazy<Namespace> = Lazy::new(|| ESPHOME_NS.namespace("copy"));
pub static COPY_SENSOR: Lazy<TypeRef> =
    Lazy::new(|| COPY_NS.class("CopySensor", &[SENSOR.clone(), COMPONENT.clone()]));

const SOURCE: &str = "source_id";

/// Sensor properties a copy inherits unchanged.
pub const INHERITED: [&str; 6] =
    ["unit_of_measurement", "icon", "accuracy_decimals", "device_class", "state_class", "entity_category"];

fn inherit_from_source(own: &ConfigValue, root: &ConfigValue) -> VResult {
    let mut out = own.clone();
    let source = own.get(SOURCE).and_then(ConfigValue::as_id).and_then(|id| id.name()).map(str::to_string);
    if let (Some(source), Some(map)) = (source, out.as_map_mut()) {
        for property in INHERITED {
            inherit_property_from(map, root, &source, SOURCE, property, Some);
        }
    }
    Ok(out)
}

fn to_code(cg: Codegen, config: ConfigValue) -> BuildFuture<()> {
    Box::pin(async move {
        let var = new_sensor(&cg, &config, vec![]).await?;
        cg.register_component(&var, &config).await?;
        let source = cg.get_variable(id_at(&config, SOURCE)?).await?;
        cg.add(var.method("set_source", vec![source]));
        Ok(())
    })
}

pub fn register(catalog: &mut ComponentCatalog) -> Result<(), LoaderError> {
    catalog.add_platform(
        "sensor",
        ComponentDescriptor::new("copy")
            .schema(
                sensor_schema(&COPY_SENSOR)
                    .extend_fields([Field::required(SOURCE, use_id(&SENSOR))])
                    .extend(&component_schema()),
            )
            .codeowners(&["@OttoWinter"])
            .final_validate(inherit_from_source)
            .to_code(0.0, to_code),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{ConfigId, ConfigMap};

    fn sensor(id: ConfigId, pairs: Vec<(&str, ConfigValue)>) -> ConfigValue {
        let mut m = ConfigMap::new();
        m.insert("id".into(), ConfigValue::Id(id));
        for (k, v) in pairs {
            m.insert(k.into(), v);
        }
        ConfigValue::Map(m)
    }

    #[test]
    fn copies_take_unset_properties_from_the_source() {
        let source = sensor(
            ConfigId::declare(Some("raw".into()), SENSOR.clone()),
            vec![("unit_of_measurement", "°C".into()), ("icon", "mdi:thermometer".into())],
        );
        let copy = sensor(
            ConfigId::declare(Some("mirror".into()), COPY_SENSOR.clone()),
            vec![
                (SOURCE, ConfigValue::Id(ConfigId::reference(Some("raw".into()), SENSOR.clone()))),
                ("icon", "mdi:flask".into()),
            ],
        );
        let mut root = ConfigMap::new();
        root.insert("sensor".into(), ConfigValue::Seq(vec![source, copy.clone()]));

        let out = inherit_from_source(&copy, &ConfigValue::Map(root)).unwrap();
        assert_eq!(out.get("unit_of_measurement").and_then(ConfigValue::as_str), Some("°C"));
        assert_eq!(out.get("icon").and_then(ConfigValue::as_str), Some("mdi:flask"));
        assert!(out.get("device_class").is_none());
    }
}
