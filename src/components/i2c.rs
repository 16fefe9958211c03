//! The I2C bus and the schema devices on it share.
use once_cell::sync::Lazy;

use super::{field, id_at, own_id};
use crate::codegen::{BuildFuture, Codegen, CodegenResult};
use crate::ir::types::{COMPONENT, ESPHOME_NS};
use crate::ir::{Expression, Namespace, TypeRef};
use crate::loader::{ComponentCatalog, ComponentDescriptor, LoaderError};
use crate::pins::gpio_number;
use crate::schema::common::component_schema;
use crate::schema::leaf::{boolean, frequency, i2c_address};
use crate::schema::{Field, JsonHint, Schema, leaf, use_id};
use crate::target::Platform;
use crate::value::ConfigValue;

pub static I2C_NS: Lazy<Namespace> = Lazy::new(|| ESPHOME_NS.namespace("i2c"));
pub static I2C_BUS: Lazy<TypeRef> = Lazy::new(|| I2C_NS.class("I2CBus", &[]));
pub static ARDUINO_I2C_BUS: Lazy<TypeRef> =
    Lazy::new(|| I2C_NS.class("ArduinoI2CBus", &[I2C_BUS.clone(), COMPONENT.clone()]));
pub static I2C_DEVICE: Lazy<TypeRef> = Lazy::new(|| I2C_NS.class("I2CDevice", &[]));

/// Fills `sda`/`scl` from the board when left out.
fn default_bus_pins() -> Schema {
    leaf("i2c_default_pins", JsonHint::Any, |value, ctx| {
        let mut value = value.clone();
        let (sda, scl) = ctx.target.platform.unwrap_or(Platform::Esp32).default_i2c_pins();
        if let Some(map) = value.as_map_mut() {
            map.entry("sda".to_string()).or_insert(ConfigValue::Int(sda));
            map.entry("scl".to_string()).or_insert(ConfigValue::Int(scl));
        }
        Ok(value)
    })
}

pub fn config_schema() -> Schema {
    Schema::mapping([
        Field::generate_id(&ARDUINO_I2C_BUS),
        Field::optional("sda", gpio_number()),
        Field::optional("scl", gpio_number()),
        Field::optional("frequency", frequency()).with_default("50kHz"),
        Field::optional("scan", boolean()).with_default(true),
    ])
    .extend(&component_schema())
    .with_validators([default_bus_pins()])
}

/// Fields of a device sitting on the bus: which bus, and its address.
pub fn i2c_device_schema(default_address: i64) -> Schema {
    Schema::mapping([
        Field::optional("i2c_id", use_id(&I2C_BUS)).with_default(ConfigValue::Null),
        Field::optional("address", i2c_address()).with_default(default_address),
    ])
}

/// Binds `var` to its bus; waits for the bus to be declared.
pub async fn register_i2c_device(cg: &Codegen, var: &Expression, config: &ConfigValue) -> CodegenResult<()> {
    let bus = cg.get_variable(id_at(config, "i2c_id")?).await?;
    cg.add(var.method("set_i2c_bus", vec![bus]));
    let address = field(config, "address")?.as_i64().unwrap_or_default();
    cg.add(var.method("set_i2c_address", vec![Expression::raw(format!("0x{address:02X}"))]));
    Ok(())
}

fn to_code(cg: Codegen, config: ConfigValue) -> BuildFuture<()> {
    Box::pin(async move {
        let bus = cg.new_pvariable(own_id(&config)?, vec![])?;
        cg.register_component(&bus, &config).await?;
        for (key, setter) in [("sda", "set_sda_pin"), ("scl", "set_scl_pin")] {
            cg.add(bus.method(setter, vec![Expression::int(field(&config, key)?.as_i64().unwrap_or_default())]));
        }
        let hz = field(&config, "frequency")?.as_f64().unwrap_or_default();
        cg.add(bus.method("set_frequency", vec![Expression::int(hz.round() as i64)]));
        cg.add(bus.method("set_scan", vec![Expression::bool(field(&config, "scan")?.as_bool().unwrap_or(true))]));
        cg.add_define("USE_I2C", None);
        cg.add_library("Wire", None)?;
        Ok(())
    })
}

pub fn register(catalog: &mut ComponentCatalog) -> Result<(), LoaderError> {
    catalog.add_component(ComponentDescriptor::new("i2c").schema(config_schema()).to_code(1.0, to_code))
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
    fn pins_default_to_the_board() {
        let registries = RegistrySet::standard();
        let loaded = BTreeSet::new();
        let target = Target { platform: Some(Platform::Esp8266), ..Target::default() };
        let ctx = ValidationContext::new(&registries, &loaded, &target);
        let v = config_schema().validate(&ConfigValue::from_json(&json!({"scl": "D3"})), &ctx).unwrap();
        assert_eq!(v.get("sda"), Some(&ConfigValue::Int(4)));
        assert_eq!(v.get("scl"), Some(&ConfigValue::Int(0)));
        assert_eq!(v.get("frequency").and_then(ConfigValue::as_f64), Some(50_000.0));
    }
}
