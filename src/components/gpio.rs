//! `platform: gpio` for switches, binary sensors and outputs.
//!
//! The pin is built first: for expander pins that means waiting on the hub,
//! so the entity itself is only declared once its pin exists.
use once_cell::sync::Lazy;

use super::binary_sensor::{BINARY_SENSOR, binary_sensor_schema, register_binary_sensor};
use super::output::{BINARY_OUTPUT, binary_output_schema, setup_output};
use super::switch::{SWITCH, register_switch, switch_schema};
use super::{field, own_id};
use crate::codegen::{BuildFuture, Codegen};
use crate::ir::types::{COMPONENT, ESPHOME_NS};
use crate::ir::{Namespace, TypeRef};
use crate::loader::{ComponentCatalog, ComponentDescriptor, LoaderError};
use crate::pins::{gpio_input_pin_schema, gpio_output_pin_schema, gpio_pin_expression};
use crate::schema::common::component_schema;
use crate::schema::{Field, declare_id};
use crate::value::ConfigValue;

pub static GPIO_NS: Lazy<Namespace> = Lazy::new(|| ESPHOME_NS.namespace("gpio"));
pub static GPIO_SWITCH: Lazy<TypeRef> =
    Lazy::new(|| GPIO_NS.class("GPIOSwitch", &[SWITCH.clone(), COMPONENT.clone()]));
pub static GPIO_BINARY_SENSOR: Lazy<TypeRef> =
    Lazy::new(|| GPIO_NS.class("GPIOBinarySensor", &[BINARY_SENSOR.clone(), COMPONENT.clone()]));
pub static GPIO_BINARY_OUTPUT: Lazy<TypeRef> =
    Lazy::new(|| GPIO_NS.class("GPIOBinaryOutput", &[BINARY_OUTPUT.clone(), COMPONENT.clone()]));

fn switch_to_code(cg: Codegen, config: ConfigValue) -> BuildFuture<()> {
    Box::pin(async move {
        let pin = gpio_pin_expression(&cg, field(&config, "pin")?).await?;
        let var = cg.new_pvariable(own_id(&config)?, vec![])?;
        cg.register_component(&var, &config).await?;
        register_switch(&cg, &var, &config).await?;
        cg.add(var.method("set_pin", vec![pin]));
        Ok(())
    })
}

fn binary_sensor_to_code(cg: Codegen, config: ConfigValue) -> BuildFuture<()> {
    Box::pin(async move {
        let pin = gpio_pin_expression(&cg, field(&config, "pin")?).await?;
        let var = cg.new_pvariable(own_id(&config)?, vec![])?;
        cg.register_component(&var, &config).await?;
        register_binary_sensor(&cg, &var, &config).await?;
        cg.add(var.method("set_pin", vec![pin]));
        Ok(())
    })
}

fn output_to_code(cg: Codegen, config: ConfigValue) -> BuildFuture<()> {
    Box::pin(async move {
        let pin = gpio_pin_expression(&cg, field(&config, "pin")?).await?;
        let var = cg.new_pvariable(own_id(&config)?, vec![])?;
        cg.register_component(&var, &config).await?;
        setup_output(&cg, &var, &config);
        cg.add(var.method("set_pin", vec![pin]));
        Ok(())
    })
}

pub fn register(catalog: &mut ComponentCatalog) -> Result<(), LoaderError> {
    catalog.add_platform(
        "switch",
        ComponentDescriptor::new("gpio")
            .schema(
                switch_schema(&GPIO_SWITCH)
                    .extend_fields([Field::required("pin", gpio_output_pin_schema())])
                    .extend(&component_schema()),
            )
            .to_code(0.0, switch_to_code),
    )?;
    catalog.add_platform(
        "binary_sensor",
        ComponentDescriptor::new("gpio")
            .schema(
                binary_sensor_schema(&GPIO_BINARY_SENSOR)
                    .extend_fields([Field::required("pin", gpio_input_pin_schema())])
                    .extend(&component_schema()),
            )
            .to_code(0.0, binary_sensor_to_code),
    )?;
    catalog.add_platform(
        "output",
        ComponentDescriptor::new("gpio")
            .schema(
                binary_output_schema()
                    .extend_fields([
                        Field::required("id", declare_id(&GPIO_BINARY_OUTPUT)),
                        Field::required("pin", gpio_output_pin_schema()),
                    ])
                    .extend(&component_schema()),
            )
            .to_code(0.0, output_to_code),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::RegistrySet;
    use crate::schema::ValidationContext;
    use crate::target::Target;
    use serde_json::json;
    use std::collections::BTreeSet;

    #[test]
    fn switch_pin_accepts_the_short_form() {
        let mut catalog = ComponentCatalog::default();
        register(&mut catalog).unwrap();
        let registries = RegistrySet::standard();
        let loaded = BTreeSet::new();
        let target = Target::default();
        let ctx = ValidationContext::new(&registries, &loaded, &target);

        let v = catalog
            .platform_schema("switch")
            .validate(&ConfigValue::from_json(&json!({"platform": "gpio", "name": "Relay", "pin": "GPIO5"})), &ctx)
            .unwrap();
        let pin = v.get("pin").unwrap();
        assert_eq!(pin.get("number").and_then(ConfigValue::as_i64), Some(5));
        assert_eq!(pin.get("mode").and_then(ConfigValue::as_enum).map(|m| m.key.as_str()), Some("OUTPUT"));
        let restore = v.get("restore_mode").and_then(ConfigValue::as_enum).map(|m| m.key.as_str());
        assert_eq!(restore, Some("RESTORE_DEFAULT_OFF"));
    }
}
