//! `binary_sensor:` platform domain.
use once_cell::sync::Lazy;

use super::id_at;
use crate::automation::{build_triggers, validate_automation};
use crate::codegen::{BuildFuture, Codegen, CodegenResult};
use crate::entity::setup_entity;
use crate::ir::types::{BOOL, CONDITION, ENTITY_BASE, ESPHOME_NS, TRIGGER, UINT32};
use crate::ir::{AutomationArgs, Expression, Namespace, TypeRef, app};
use crate::loader::{ComponentCatalog, ComponentDescriptor, LoaderError};
use crate::registry::{CONDITIONS, EntryCall, RegistrySet};
use crate::schema::common::entity_schema;
use crate::schema::time::positive_time_period_milliseconds;
use crate::schema::{Field, OneOfOptions, Schema, maybe_simple_id, one_of, templatable, use_id};
use crate::value::ConfigValue;

pub static BINARY_SENSOR_NS: Lazy<Namespace> = Lazy::new(|| ESPHOME_NS.namespace("binary_sensor"));
pub static BINARY_SENSOR: Lazy<TypeRef> =
    Lazy::new(|| BINARY_SENSOR_NS.class("BinarySensor", &[ENTITY_BASE.clone()]));
pub static PRESS_TRIGGER: Lazy<TypeRef> = Lazy::new(|| BINARY_SENSOR_NS.class("PressTrigger", &[TRIGGER.clone()]));
pub static RELEASE_TRIGGER: Lazy<TypeRef> =
    Lazy::new(|| BINARY_SENSOR_NS.class("ReleaseTrigger", &[TRIGGER.clone()]));
pub static STATE_TRIGGER: Lazy<TypeRef> = Lazy::new(|| BINARY_SENSOR_NS.class("StateTrigger", &[TRIGGER.clone()]));
pub static BINARY_SENSOR_CONDITION: Lazy<TypeRef> =
    Lazy::new(|| BINARY_SENSOR_NS.class("BinarySensorCondition", &[CONDITION.clone()]));

const DEVICE_CLASSES: [&str; 12] = [
    "battery", "cold", "connectivity", "door", "gas", "heat", "light", "motion", "occupancy", "power", "smoke",
    "window",
];

fn trigger(ty: &TypeRef) -> Schema {
    validate_automation(Some(Schema::mapping([Field::generate_id_at("trigger_id", ty)])), false)
}

pub fn binary_sensor_schema(ty: &TypeRef) -> Schema {
    entity_schema(ty).extend_fields([
        Field::optional("device_class", one_of(DEVICE_CLASSES, OneOfOptions::lower().space('_'))),
        Field::optional("on_press", trigger(&PRESS_TRIGGER)),
        Field::optional("on_release", trigger(&RELEASE_TRIGGER)),
        Field::optional("on_state", trigger(&STATE_TRIGGER)),
    ])
}

pub async fn register_binary_sensor(cg: &Codegen, var: &Expression, config: &ConfigValue) -> CodegenResult<()> {
    cg.add(app().method("register_binary_sensor", vec![var.clone()]));
    setup_entity(cg, var, config);
    if let Some(class) = config.get("device_class").and_then(ConfigValue::as_str) {
        cg.add(var.method("set_device_class", vec![Expression::string(class)]));
    }
    let no_args = AutomationArgs::new();
    build_triggers(cg, config, "on_press", &no_args, |_| vec![var.clone()]).await?;
    build_triggers(cg, config, "on_release", &no_args, |_| vec![var.clone()]).await?;
    let state_args = vec![(BOOL.clone(), "x".to_string())];
    build_triggers(cg, config, "on_state", &state_args, |_| vec![var.clone()]).await?;
    cg.add_define("USE_BINARY_SENSOR", None);
    Ok(())
}

// ------------------------------ Conditions -------------------------------- //

fn state_condition(cg: Codegen, call: EntryCall, state: bool) -> BuildFuture<Expression> {
    Box::pin(async move {
        let parent = cg.get_variable(id_at(&call.config, "id")?).await?;
        let var = cg.new_pvariable_templated(&call.id, &call.template_arg, vec![parent, Expression::bool(state)])?;
        if let Some(duration) = call.config.get("for") {
            let duration = cg.templatable(duration, &call.args, Some(&UINT32)).await?;
            cg.add(var.method("set_min_time", vec![duration]));
        }
        Ok(var)
    })
}

fn is_on(cg: Codegen, call: EntryCall) -> BuildFuture<Expression> {
    state_condition(cg, call, true)
}

fn is_off(cg: Codegen, call: EntryCall) -> BuildFuture<Expression> {
    state_condition(cg, call, false)
}

pub fn register(catalog: &mut ComponentCatalog, registries: &mut RegistrySet) -> Result<(), LoaderError> {
    let schema = || {
        maybe_simple_id(Schema::mapping([
            Field::required("id", use_id(&BINARY_SENSOR)),
            Field::optional("for", templatable(positive_time_period_milliseconds())),
        ]))
    };
    registries.register(CONDITIONS, "binary_sensor.is_on", &BINARY_SENSOR_CONDITION, schema(), is_on)?;
    registries.register(CONDITIONS, "binary_sensor.is_off", &BINARY_SENSOR_CONDITION, schema(), is_off)?;
    catalog.add_component(ComponentDescriptor::new("binary_sensor").platform_component())
}
