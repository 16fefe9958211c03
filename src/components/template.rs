//! `platform: template` entities: state comes from a lambda, writes run an
//! automation. Also the `<domain>.template.publish` actions.
use once_cell::sync::Lazy;

use super::binary_sensor::{BINARY_SENSOR, binary_sensor_schema, register_binary_sensor};
use super::output::{BINARY_OUTPUT, FLOAT_OUTPUT, binary_output_schema, float_output_schema, setup_output};
use super::sensor::{SENSOR, new_sensor, sensor_schema};
use super::switch::{SWITCH, register_switch, switch_schema};
use super::{field, id_at, own_id};
use crate::automation::{build_automation, validate_automation};
use crate::codegen::{BuildFuture, Codegen, CodegenResult};
use crate::ir::types::{ACTION, BOOL, COMPONENT, ESPHOME_NS, FLOAT, OPTIONAL, POLLING_COMPONENT};
use crate::ir::{AutomationArgs, Expression, Namespace, TemplateArguments, TypeRef};
use crate::loader::{ComponentCatalog, ComponentDescriptor, LoaderError};
use crate::registry::{ACTIONS, EntryCall, RegistrySet};
use crate::schema::common::{component_schema, polling_component_schema};
use crate::schema::leaf::{boolean, float_};
use crate::schema::{Field, Schema, declare_id, returning_lambda, templatable, typed_schema, use_id};
use crate::value::ConfigValue;

pub static TEMPLATE_NS: Lazy<Namespace> = Lazy::new(|| ESPHOME_NS.namespace("template_"));
pub static TEMPLATE_SENSOR: Lazy<TypeRef> =
    Lazy::new(|| TEMPLATE_NS.class("TemplateSensor", &[SENSOR.clone(), POLLING_COMPONENT.clone()]));
pub static TEMPLATE_SWITCH: Lazy<TypeRef> =
    Lazy::new(|| TEMPLATE_NS.class("TemplateSwitch", &[SWITCH.clone(), COMPONENT.clone()]));
pub static TEMPLATE_BINARY_SENSOR: Lazy<TypeRef> =
    Lazy::new(|| TEMPLATE_NS.class("TemplateBinarySensor", &[BINARY_SENSOR.clone(), COMPONENT.clone()]));
pub static TEMPLATE_BINARY_OUTPUT: Lazy<TypeRef> =
    Lazy::new(|| TEMPLATE_NS.class("TemplateBinaryOutput", &[BINARY_OUTPUT.clone()]));
pub static TEMPLATE_FLOAT_OUTPUT: Lazy<TypeRef> =
    Lazy::new(|| TEMPLATE_NS.class("TemplateFloatOutput", &[FLOAT_OUTPUT.clone()]));

pub static SENSOR_PUBLISH_ACTION: Lazy<TypeRef> =
    Lazy::new(|| TEMPLATE_NS.class("TemplateSensorPublishAction", &[ACTION.clone()]));
pub static SWITCH_PUBLISH_ACTION: Lazy<TypeRef> =
    Lazy::new(|| TEMPLATE_NS.class("TemplateSwitchPublishAction", &[ACTION.clone()]));
pub static BINARY_SENSOR_PUBLISH_ACTION: Lazy<TypeRef> =
    Lazy::new(|| TEMPLATE_NS.class("TemplateBinarySensorPublishAction", &[ACTION.clone()]));

fn optional_of(ty: &TypeRef) -> TypeRef {
    OPTIONAL.template(&TemplateArguments::of_types([ty]))
}

/// `set_template([=]() -> optional<T> {...})` when a lambda is configured.
async fn state_lambda(
    cg: &Codegen,
    var: &Expression,
    config: &ConfigValue,
    ty: &TypeRef,
    setter: &str,
) -> CodegenResult<()> {
    let Some(lambda) = config.get("lambda").and_then(ConfigValue::as_lambda) else { return Ok(()) };
    let body = cg.process_lambda(lambda, &AutomationArgs::new(), "=", Some(&optional_of(ty))).await?;
    cg.add(var.method(setter, vec![body]));
    Ok(())
}

// -------------------------------- Sensor ---------------------------------- //

fn sensor_to_code(cg: Codegen, config: ConfigValue) -> BuildFuture<()> {
    Box::pin(async move {
        let var = new_sensor(&cg, &config, vec![]).await?;
        cg.register_component(&var, &config).await?;
        state_lambda(&cg, &var, &config, &FLOAT, "set_template").await
    })
}

// -------------------------------- Switch ---------------------------------- //

fn switch_to_code(cg: Codegen, config: ConfigValue) -> BuildFuture<()> {
    Box::pin(async move {
        let var = cg.new_pvariable(own_id(&config)?, vec![])?;
        cg.register_component(&var, &config).await?;
        register_switch(&cg, &var, &config).await?;
        state_lambda(&cg, &var, &config, &BOOL, "set_state_lambda").await?;
        let actions = [("turn_on_action", "get_turn_on_trigger"), ("turn_off_action", "get_turn_off_trigger")];
        for (key, trigger) in actions {
            if let Some(automation) = config.get(key) {
                build_automation(&cg, &var.method(trigger, vec![]), &AutomationArgs::new(), automation).await?;
            }
        }
        for (key, setter) in [("optimistic", "set_optimistic"), ("assumed_state", "set_assumed_state")] {
            let flag = field(&config, key)?.as_bool().unwrap_or(false);
            cg.add(var.method(setter, vec![Expression::bool(flag)]));
        }
        Ok(())
    })
}

// ---------------------------- Binary sensor ------------------------------- //

fn binary_sensor_to_code(cg: Codegen, config: ConfigValue) -> BuildFuture<()> {
    Box::pin(async move {
        let var = cg.new_pvariable(own_id(&config)?, vec![])?;
        cg.register_component(&var, &config).await?;
        register_binary_sensor(&cg, &var, &config).await?;
        state_lambda(&cg, &var, &config, &BOOL, "set_template").await
    })
}

// -------------------------------- Output ---------------------------------- //

fn output_schema() -> Schema {
    let write_action = || Field::required("write_action", validate_automation(None, true));
    typed_schema(
        "type",
        [
            (
                "binary",
                binary_output_schema()
                    .extend_fields([Field::required("id", declare_id(&TEMPLATE_BINARY_OUTPUT)), write_action()]),
            ),
            (
                "float",
                float_output_schema()
                    .extend_fields([Field::required("id", declare_id(&TEMPLATE_FLOAT_OUTPUT)), write_action()]),
            ),
        ],
        None,
    )
}

fn output_to_code(cg: Codegen, config: ConfigValue) -> BuildFuture<()> {
    Box::pin(async move {
        let var = cg.new_pvariable(own_id(&config)?, vec![])?;
        let state_type = match field(&config, "type")?.as_str() {
            Some("float") => FLOAT.clone(),
            _ => BOOL.clone(),
        };
        let args = vec![(state_type, "state".to_string())];
        build_automation(&cg, &var.method("get_trigger", vec![]), &args, field(&config, "write_action")?).await?;
        setup_output(&cg, &var, &config);
        Ok(())
    })
}

// ------------------------------- Publish ---------------------------------- //

fn publish_action(cg: Codegen, call: EntryCall) -> BuildFuture<Expression> {
    Box::pin(async move {
        let parent = cg.get_variable(id_at(&call.config, "id")?).await?;
        let var = cg.new_pvariable_templated(&call.id, &call.template_arg, vec![parent])?;
        let state_type = if call.id.type_tag == *SENSOR_PUBLISH_ACTION { &*FLOAT } else { &*BOOL };
        let state = cg.templatable(field(&call.config, "state")?, &call.args, Some(state_type)).await?;
        cg.add(var.method("set_state", vec![state]));
        Ok(var)
    })
}

fn publish_schema(ty: &TypeRef, state: Schema) -> Schema {
    Schema::mapping([Field::required("id", use_id(ty)), Field::required("state", templatable(state))])
}

pub fn register(catalog: &mut ComponentCatalog, registries: &mut RegistrySet) -> Result<(), LoaderError> {
    registries.register(
        ACTIONS,
        "sensor.template.publish",
        &SENSOR_PUBLISH_ACTION,
        publish_schema(&TEMPLATE_SENSOR, float_()),
        publish_action,
    )?;
    registries.register(
        ACTIONS,
        "switch.template.publish",
        &SWITCH_PUBLISH_ACTION,
        publish_schema(&TEMPLATE_SWITCH, boolean()),
        publish_action,
    )?;
    registries.register(
        ACTIONS,
        "binary_sensor.template.publish",
        &BINARY_SENSOR_PUBLISH_ACTION,
        publish_schema(&TEMPLATE_BINARY_SENSOR, boolean()),
        publish_action,
    )?;

    catalog.add_platform(
        "sensor",
        ComponentDescriptor::new("template")
            .schema(
                sensor_schema(&TEMPLATE_SENSOR)
                    .extend(&polling_component_schema("60s"))
                    .extend_fields([Field::optional("lambda", returning_lambda())]),
            )
            .to_code(0.0, sensor_to_code),
    )?;
    catalog.add_platform(
        "switch",
        ComponentDescriptor::new("template")
            .schema(
                switch_schema(&TEMPLATE_SWITCH)
                    .extend(&component_schema())
                    .extend_fields([
                        Field::optional("lambda", returning_lambda()),
                        Field::optional("optimistic", boolean()).with_default(false),
                        Field::optional("assumed_state", boolean()).with_default(false),
                        Field::optional("turn_on_action", validate_automation(None, true)),
                        Field::optional("turn_off_action", validate_automation(None, true)),
                    ]),
            )
            .to_code(0.0, switch_to_code),
    )?;
    catalog.add_platform(
        "binary_sensor",
        ComponentDescriptor::new("template")
            .schema(
                binary_sensor_schema(&TEMPLATE_BINARY_SENSOR)
                    .extend(&component_schema())
                    .extend_fields([Field::optional("lambda", returning_lambda())]),
            )
            .to_code(0.0, binary_sensor_to_code),
    )?;
    catalog.add_platform(
        "output",
        ComponentDescriptor::new("template").schema(output_schema()).to_code(0.0, output_to_code),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ValidationContext;
    use crate::target::Target;
    use serde_json::json;
    use std::collections::BTreeSet;

    #[test]
    fn output_type_picks_the_branch() {
        let mut catalog = ComponentCatalog::default();
        let mut registries = RegistrySet::standard();
        crate::automation::register_builtins(&mut registries).unwrap();
        register(&mut catalog, &mut registries).unwrap();
        let loaded = BTreeSet::new();
        let target = Target::default();
        let ctx = ValidationContext::new(&registries, &loaded, &target);
        let schema = catalog.platform_schema("output");

        let raw = json!({
            "platform": "template", "id": "out", "type": "float", "max_power": "80%",
            "write_action": [{"lambda": "!lambda ESP_LOGD(\"out\", \"%f\", state);"}],
        });
        let v = schema.validate(&ConfigValue::from_json(&raw), &ctx).unwrap();
        assert_eq!(v.get("max_power").and_then(ConfigValue::as_f64), Some(0.8));
        let id = v.get("id").and_then(ConfigValue::as_id).unwrap();
        assert_eq!(id.type_tag, *TEMPLATE_FLOAT_OUTPUT);

        let raw = json!({
            "platform": "template", "id": "out", "type": "binary", "max_power": "80%",
            "write_action": [{"lambda": "!lambda return;"}],
        });
        let err = schema.validate(&ConfigValue::from_json(&raw), &ctx).unwrap_err();
        assert!(err.mentions("extra keys not allowed"), "{err:?}");
    }
}
