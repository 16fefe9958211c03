//! The built-in component set.
//!
//! Each module registers its descriptors (and any registry entries it
//! contributes) through a `register` function; [`register_all`] is what
//! [`crate::loader::RunContext::builtin`] calls.
pub mod binary_sensor;
pub mod combination;
pub mod copy;
pub mod esphome;
pub mod gpio;
pub mod i2c;
pub mod interval;
pub mod light;
pub mod logger;
pub mod output;
pub mod pcf8574;
pub mod sensor;
pub mod statistics;
pub mod switch;
pub mod template;
pub mod time;

use crate::automation;
use crate::codegen::{CodegenError, CodegenResult};
use crate::loader::{ComponentCatalog, LoaderError};
use crate::registry::RegistrySet;
use crate::value::{ConfigId, ConfigValue};

pub fn register_all(catalog: &mut ComponentCatalog, registries: &mut RegistrySet) -> Result<(), LoaderError> {
    automation::register_builtins(registries)?;
    esphome::register(catalog)?;
    logger::register(catalog, registries)?;
    i2c::register(catalog)?;
    pcf8574::register(catalog, registries)?;
    output::register(catalog, registries)?;
    switch::register(catalog, registries)?;
    binary_sensor::register(catalog, registries)?;
    sensor::register(catalog, registries)?;
    light::register(catalog, registries)?;
    time::register(catalog)?;
    interval::register(catalog)?;
    gpio::register(catalog)?;
    template::register(catalog, registries)?;
    copy::register(catalog)?;
    combination::register(catalog)?;
    statistics::register(catalog)?;
    Ok(())
}

// ------------------------- Shared codegen helpers ------------------------- //

fn absent(key: &str) -> CodegenError {
    CodegenError::Expression(format!("validated config has no '{key}'"))
}

/// A key validation guarantees to be present.
pub(crate) fn field<'a>(config: &'a ConfigValue, key: &str) -> CodegenResult<&'a ConfigValue> {
    config.get(key).ok_or_else(|| absent(key))
}

/// The ID stored under `key`.
pub(crate) fn id_at<'a>(config: &'a ConfigValue, key: &str) -> CodegenResult<&'a ConfigId> {
    field(config, key)?.as_id().ok_or_else(|| absent(key))
}

/// The entry's own `id:`.
pub(crate) fn own_id(config: &ConfigValue) -> CodegenResult<&ConfigId> {
    id_at(config, "id")
}

#[cfg(test)]
mod tests {
    use crate::loader::RunContext;

    #[test]
    fn builtin_catalog_loads() {
        let ctx = RunContext::builtin().unwrap();
        for key in ["esphome", "logger", "i2c", "pcf8574", "sensor", "switch", "light", "time", "interval"] {
            assert!(ctx.catalog.component(key).is_some(), "{key}");
        }
        let platforms = [("sensor", "template"), ("sensor", "copy"), ("sensor", "statistics"), ("switch", "gpio")];
        for (domain, name) in platforms {
            assert!(ctx.catalog.platform(domain, name).is_some(), "{domain}.{name}");
        }
        assert!(ctx.registries.get(crate::registry::SENSOR_FILTERS).is_some_and(|r| !r.is_empty()));
    }
}
