//! PCF8574/PCF8575 I/O expanders and the pins they provide.
use once_cell::sync::Lazy;

use super::{field, id_at, own_id};
use crate::codegen::{BuildFuture, Codegen};
use crate::components::i2c::{I2C_DEVICE, i2c_device_schema, register_i2c_device};
use crate::ir::types::{COMPONENT, ESPHOME_NS, GPIO_PIN};
use crate::ir::{Expression, Namespace, TypeRef};
use crate::loader::{ComponentCatalog, ComponentDescriptor, LoaderError};
use crate::pins::{apply_pin_settings, expander_pin_fields};
use crate::registry::{EntryCall, PINS, RegistrySet};
use crate::schema::common::component_schema;
use crate::schema::leaf::boolean;
use crate::schema::{Field, Schema, declare_id, use_id};
use crate::value::ConfigValue;

pub const KEY: &str = "pcf8574";

pub static PCF8574_NS: Lazy<Namespace> = Lazy::new(|| ESPHOME_NS.namespace("pcf8574"));
pub static PCF8574_COMPONENT: Lazy<TypeRef> =
    Lazy::new(|| PCF8574_NS.class("PCF8574Component", &[COMPONENT.clone(), I2C_DEVICE.clone()]));
pub static PCF8574_GPIO_PIN: Lazy<TypeRef> = Lazy::new(|| PCF8574_NS.class("PCF8574GPIOPin", &[GPIO_PIN.clone()]));

pub fn config_schema() -> Schema {
    Schema::mapping([
        Field::required("id", declare_id(&PCF8574_COMPONENT)),
        Field::optional("pcf8575", boolean()).with_default(false),
    ])
    .extend(&component_schema())
    .extend(&i2c_device_schema(0x21))
}

/// `{pcf8574: hub, number: 3}`. Up to 16 pins, the PCF8575 has that many.
pub fn pin_schema() -> Schema {
    let mut fields = vec![Field::required(KEY, use_id(&PCF8574_COMPONENT))];
    fields.extend(expander_pin_fields(&PCF8574_GPIO_PIN, 15));
    Schema::mapping(fields)
}

fn to_code(cg: Codegen, config: ConfigValue) -> BuildFuture<()> {
    Box::pin(async move {
        let var = cg.new_pvariable(own_id(&config)?, vec![])?;
        cg.register_component(&var, &config).await?;
        register_i2c_device(&cg, &var, &config).await?;
        let wide = field(&config, "pcf8575")?.as_bool().unwrap_or(false);
        cg.add(var.method("set_pcf8575", vec![Expression::bool(wide)]));
        Ok(())
    })
}

/// Waits for the hub, then declares the pin bound to it.
fn pin_builder(cg: Codegen, call: EntryCall) -> BuildFuture<Expression> {
    Box::pin(async move {
        let hub = cg.get_variable(id_at(&call.config, KEY)?).await?;
        let pin = cg.new_pvariable(&call.id, vec![])?;
        cg.add(pin.method("set_parent", vec![hub]));
        apply_pin_settings(&cg, &pin, &call.config);
        Ok(pin)
    })
}

pub fn register(catalog: &mut ComponentCatalog, registries: &mut RegistrySet) -> Result<(), LoaderError> {
    registries.register(PINS, KEY, &PCF8574_GPIO_PIN, pin_schema(), pin_builder)?;
    catalog.add_component(
        ComponentDescriptor::new(KEY)
            .schema(config_schema())
            .multi_conf()
            .auto_load(&["i2c"])
            .codeowners(&["@jesserockz"])
            .to_code(0.0, to_code),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pins::gpio_output_pin_schema;
    use crate::schema::ValidationContext;
    use crate::target::Target;
    use serde_json::json;
    use std::collections::BTreeSet;

    #[test]
    fn pin_registry_takes_over_by_key() {
        let mut registries = RegistrySet::standard();
        let mut catalog = ComponentCatalog::default();
        register(&mut catalog, &mut registries).unwrap();
        let loaded = BTreeSet::new();
        let target = Target::default();
        let ctx = ValidationContext::new(&registries, &loaded, &target);

        let v = gpio_output_pin_schema()
            .validate(&ConfigValue::from_json(&json!({"pcf8574": "io", "number": 3})), &ctx)
            .unwrap();
        let id = v.get("id").and_then(ConfigValue::as_id).unwrap();
        assert_eq!(id.type_tag, *PCF8574_GPIO_PIN);
        assert_eq!(v.get(KEY).and_then(ConfigValue::as_id).and_then(|i| i.name()), Some("io"));

        let err = gpio_output_pin_schema()
            .validate(&ConfigValue::from_json(&json!({"pcf8574": "io", "number": 16})), &ctx)
            .unwrap_err();
        assert_eq!(err.errors()[0].path.to_string(), "number");
    }
}
