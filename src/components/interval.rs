//! `interval:` runs an action list periodically. Every block is its own
//! polling component.
use once_cell::sync::Lazy;

use super::own_id;
use crate::automation::{build_automation, validate_automation};
use crate::codegen::{BuildFuture, Codegen};
use crate::ir::types::{ESPHOME_NS, POLLING_COMPONENT, TRIGGER};
use crate::ir::{AutomationArgs, Expression, Namespace, TypeRef};
use crate::loader::{ComponentCatalog, ComponentDescriptor, LoaderError};
use crate::schema::time::positive_time_period_milliseconds;
use crate::schema::{Field, Schema};
use crate::value::ConfigValue;

pub static INTERVAL_NS: Lazy<Namespace> = Lazy::new(|| ESPHOME_NS.namespace("interval"));
pub static INTERVAL_TRIGGER: Lazy<TypeRef> =
    Lazy::new(|| INTERVAL_NS.class("IntervalTrigger", &[TRIGGER.clone(), POLLING_COMPONENT.clone()]));

pub fn config_schema() -> Schema {
    validate_automation(
        Some(Schema::mapping([
            Field::generate_id(&INTERVAL_TRIGGER),
            Field::required("interval", positive_time_period_milliseconds()),
            Field::optional("startup_delay", positive_time_period_milliseconds()).with_default("0s"),
        ])),
        true,
    )
}

fn millis(config: &ConfigValue, key: &str) -> i64 {
    config.get(key).and_then(ConfigValue::as_time).map_or(0, |t| t.in_unit() as i64)
}

fn to_code(cg: Codegen, config: ConfigValue) -> BuildFuture<()> {
    Box::pin(async move {
        let var = cg.new_pvariable(own_id(&config)?, vec![])?;
        cg.register_component(&var, &config).await?;
        cg.add(var.method("set_update_interval", vec![Expression::int(millis(&config, "interval"))]));
        cg.add(var.method("set_startup_delay", vec![Expression::int(millis(&config, "startup_delay"))]));
        build_automation(&cg, &var, &AutomationArgs::new(), &config).await?;
        Ok(())
    })
}

pub fn register(catalog: &mut ComponentCatalog) -> Result<(), LoaderError> {
    catalog.add_component(
        ComponentDescriptor::new("interval").schema(config_schema()).multi_conf().to_code(0.0, to_code),
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
    fn interval_fills_startup_delay() {
        let mut registries = RegistrySet::standard();
        crate::automation::register_builtins(&mut registries).unwrap();
        let loaded = BTreeSet::new();
        let target = Target::default();
        let ctx = ValidationContext::new(&registries, &loaded, &target);

        let v = config_schema()
            .validate(&ConfigValue::from_json(&json!({"interval": "5s", "then": [{"delay": "1s"}]})), &ctx)
            .unwrap();
        assert_eq!(millis(&v, "interval"), 5_000);
        assert_eq!(millis(&v, "startup_delay"), 0);
        assert!(v.get("id").and_then(ConfigValue::as_id).is_some_and(|id| id.type_tag == *INTERVAL_TRIGGER));

        let err = config_schema().validate(&ConfigValue::from_json(&json!({"then": []})), &ctx).unwrap_err();
        assert!(err.errors().iter().any(|e| e.path.to_string() == "interval"), "{err:?}");
    }
}
