//! `light:` platform domain: the light state object wrapping an output,
//! effects, actions and the `binary`/`monochromatic` platforms.
use once_cell::sync::Lazy;

use super::output::{BINARY_OUTPUT, FLOAT_OUTPUT};
use super::{field, id_at};
use crate::automation::{build_automation, build_triggers, validate_automation};
use crate::codegen::{BuildFuture, Codegen, CodegenError, CodegenResult};
use crate::entity::setup_entity;
use crate::ir::types::{ACTION, BOOL, COMPONENT, ENTITY_BASE, ESPHOME_NS, FLOAT, STD_STRING, TRIGGER, UINT32, VOID};
use crate::ir::{AutomationArgs, Expression, Namespace, TemplateArguments, TypeRef, app};
use crate::loader::{ComponentCatalog, ComponentDescriptor, LoaderError};
use crate::registry::{ACTIONS, EFFECTS, EntryCall, RegistrySet};
use crate::schema::common::entity_schema;
use crate::schema::leaf::{boolean, percentage, positive_float, string};
use crate::schema::time::{positive_time_period_milliseconds, update_interval};
use crate::schema::{
    Field, JsonHint, OneOfOptions, Schema, enum_, invalid, lambda_, leaf, maybe_simple_id, registry_list,
    templatable, use_id,
};
use crate::value::ConfigValue;

pub static LIGHT_NS: Lazy<Namespace> = Lazy::new(|| ESPHOME_NS.namespace("light"));
pub static LIGHT_STATE: Lazy<TypeRef> =
    Lazy::new(|| LIGHT_NS.class("LightState", &[ENTITY_BASE.clone(), COMPONENT.clone()]));
pub static LIGHT_OUTPUT: Lazy<TypeRef> = Lazy::new(|| LIGHT_NS.class("LightOutput", &[]));
pub static LIGHT_EFFECT: Lazy<TypeRef> = Lazy::new(|| LIGHT_NS.class("LightEffect", &[]));

pub static TOGGLE_ACTION: Lazy<TypeRef> = Lazy::new(|| LIGHT_NS.class("ToggleAction", &[ACTION.clone()]));
pub static CONTROL_ACTION: Lazy<TypeRef> = Lazy::new(|| LIGHT_NS.class("LightControlAction", &[ACTION.clone()]));
pub static TURN_ON_TRIGGER: Lazy<TypeRef> = Lazy::new(|| LIGHT_NS.class("LightTurnOnTrigger", &[TRIGGER.clone()]));
pub static TURN_OFF_TRIGGER: Lazy<TypeRef> =
    Lazy::new(|| LIGHT_NS.class("LightTurnOffTrigger", &[TRIGGER.clone()]));

pub static BINARY_LIGHT_OUTPUT: Lazy<TypeRef> =
    Lazy::new(|| ESPHOME_NS.namespace("binary").class("BinaryLightOutput", &[LIGHT_OUTPUT.clone()]));
pub static MONOCHROMATIC_LIGHT_OUTPUT: Lazy<TypeRef> = Lazy::new(|| {
    ESPHOME_NS.namespace("monochromatic").class("MonochromaticLightOutput", &[LIGHT_OUTPUT.clone()])
});

fn effect_class(name: &str) -> TypeRef {
    LIGHT_NS.class(name, &[LIGHT_EFFECT.clone()])
}

// -------------------------------- Schemas --------------------------------- //

fn restore_mode() -> Schema {
    let modes = ["RESTORE_DEFAULT_OFF", "RESTORE_DEFAULT_ON", "ALWAYS_OFF", "ALWAYS_ON"];
    enum_(modes.map(|m| (m, format!("light::LIGHT_{m}"))), OneOfOptions::upper())
}

fn trigger(ty: &TypeRef) -> Schema {
    validate_automation(Some(Schema::mapping([Field::generate_id_at("trigger_id", ty)])), false)
}

/// Effect names show up in frontends and `light.turn_on: {effect: ...}`.
fn unique_effect_names() -> Schema {
    leaf("unique_effect_names", JsonHint::Any, |value, _| {
        let mut seen = Vec::new();
        for item in value.iter_list() {
            let name = item
                .as_map()
                .and_then(|m| m.values().find_map(|inner| inner.get("name")))
                .and_then(ConfigValue::as_str);
            let Some(name) = name else { continue };
            if seen.contains(&name) {
                return Err(invalid(format!(
                    "Found the effect name '{name}' twice. All effects must have unique names"
                )));
            }
            seen.push(name);
        }
        Ok(value.clone())
    })
}

/// Shared fields of every light; `output_type` is the platform's output class.
pub fn light_schema(output_type: &TypeRef) -> Schema {
    entity_schema(&LIGHT_STATE).extend_fields([
        Field::generate_id_at("output_id", output_type),
        Field::optional("restore_mode", restore_mode()).with_default("RESTORE_DEFAULT_OFF"),
        Field::optional("effects", crate::schema::all([registry_list(EFFECTS), unique_effect_names()])),
        Field::optional("on_turn_on", trigger(&TURN_ON_TRIGGER)),
        Field::optional("on_turn_off", trigger(&TURN_OFF_TRIGGER)),
    ])
}

/// Lights that can dim.
pub fn brightness_only_light_schema(output_type: &TypeRef) -> Schema {
    light_schema(output_type).extend_fields([
        Field::optional("gamma_correct", positive_float()).with_default(2.8),
        Field::optional("default_transition_length", positive_time_period_milliseconds()).with_default("1s"),
    ])
}

// -------------------------------- Codegen --------------------------------- //

/// `new LightState(output)`, registration, settings, effects and triggers.
pub async fn register_light(cg: &Codegen, output: &Expression, config: &ConfigValue) -> CodegenResult<Expression> {
    let var = cg.new_pvariable(id_at(config, "id")?, vec![output.clone()])?;
    cg.add(app().method("register_light", vec![var.clone()]));
    cg.register_component(&var, config).await?;
    setup_entity(cg, &var, config);
    if let Some(mode) = config.get("restore_mode").and_then(ConfigValue::as_enum) {
        cg.add(var.method("set_restore_mode", vec![Expression::raw(mode.cpp.clone())]));
    }
    if let Some(gamma) = config.get("gamma_correct").and_then(ConfigValue::as_f64) {
        cg.add(var.method("set_gamma_correct", vec![Expression::float(gamma)]));
    }
    if let Some(length) = config.get("default_transition_length").and_then(ConfigValue::as_time) {
        cg.add(var.method("set_default_transition_length", vec![Expression::int(length.in_unit() as i64)]));
    }
    if let Some(effects) = config.get("effects") {
        let built =
            cg.build_registry_list(EFFECTS, effects, &TemplateArguments::default(), &AutomationArgs::new()).await?;
        cg.add(var.method("add_effects", vec![Expression::Array(built)]));
    }
    let no_args = AutomationArgs::new();
    build_triggers(cg, config, "on_turn_on", &no_args, |_| vec![var.clone()]).await?;
    build_triggers(cg, config, "on_turn_off", &no_args, |_| vec![var.clone()]).await?;
    cg.add_define("USE_LIGHT", None);
    Ok(var)
}

fn light_to_code(cg: Codegen, config: ConfigValue) -> BuildFuture<()> {
    Box::pin(async move {
        let output = cg.new_pvariable(id_at(&config, "output_id")?, vec![])?;
        let target = cg.get_variable(id_at(&config, "output")?).await?;
        cg.add(output.method("set_output", vec![target]));
        register_light(&cg, &output, &config).await?;
        Ok(())
    })
}

// -------------------------------- Effects --------------------------------- //

fn literal(value: &ConfigValue) -> CodegenResult<Expression> {
    Expression::from_config(value).map_err(CodegenError::Expression)
}

fn named_effect(cg: &Codegen, call: &EntryCall) -> CodegenResult<Expression> {
    cg.new_pvariable(&call.id, vec![literal(field(&call.config, "name")?)?])
}

fn lambda_effect(cg: Codegen, call: EntryCall) -> BuildFuture<Expression> {
    Box::pin(async move {
        let lambda = field(&call.config, "lambda")?
            .as_lambda()
            .ok_or_else(|| CodegenError::Expression("lambda effect without a lambda".into()))?;
        let params = vec![(BOOL.clone(), "initial_run".to_string())];
        let body = cg.process_lambda(lambda, &params, "=", Some(&VOID)).await?;
        let interval = literal(field(&call.config, "update_interval")?)?;
        cg.new_pvariable(&call.id, vec![literal(field(&call.config, "name")?)?, body, interval])
    })
}

fn automation_effect(cg: Codegen, call: EntryCall) -> BuildFuture<Expression> {
    Box::pin(async move {
        let var = named_effect(&cg, &call)?;
        let trigger = var.method("get_trig", vec![]);
        build_automation(&cg, &trigger, &AutomationArgs::new(), field(&call.config, "sequence")?).await?;
        Ok(var)
    })
}

fn timed_effect(cg: Codegen, call: EntryCall) -> BuildFuture<Expression> {
    Box::pin(async move {
        let var = named_effect(&cg, &call)?;
        let setters = [("transition_length", "set_transition_length"), ("update_interval", "set_update_interval")];
        for (key, setter) in setters {
            if let Some(value) = call.config.get(key) {
                cg.add(var.method(setter, vec![literal(value)?]));
            }
        }
        if let (Some(min), Some(max)) = (call.config.get("min_brightness"), call.config.get("max_brightness")) {
            cg.add(var.method("set_min_max_brightness", vec![literal(min)?, literal(max)?]));
        }
        Ok(var)
    })
}

fn strobe_effect(cg: Codegen, call: EntryCall) -> BuildFuture<Expression> {
    Box::pin(async move {
        let var = named_effect(&cg, &call)?;
        let mut colors = Vec::new();
        for color in field(&call.config, "colors")?.iter_list() {
            let state = literal(field(color, "state")?)?;
            let brightness = literal(field(color, "brightness")?)?;
            let duration = literal(field(color, "duration")?)?;
            colors.push(Expression::raw(format!("{{{state}, {brightness}, {duration}}}")));
        }
        cg.add(var.method("set_colors", vec![Expression::Array(colors)]));
        Ok(var)
    })
}

fn effect_name(default: &str) -> Field {
    Field::optional("name", string()).with_default(default)
}

fn register_effects(registries: &mut RegistrySet) -> Result<(), LoaderError> {
    registries.register(
        EFFECTS,
        "lambda",
        &effect_class("LambdaLightEffect"),
        Schema::mapping([
            Field::required("name", string()),
            Field::required("lambda", lambda_()),
            Field::optional("update_interval", update_interval()).with_default("0ms"),
        ]),
        lambda_effect,
    )?;
    registries.register(
        EFFECTS,
        "automation",
        &effect_class("AutomationLightEffect"),
        Schema::mapping([
            Field::required("name", string()),
            Field::required("sequence", validate_automation(None, true)),
        ]),
        automation_effect,
    )?;
    registries.register(
        EFFECTS,
        "pulse",
        &effect_class("PulseLightEffect"),
        Schema::mapping([
            effect_name("Pulse"),
            Field::optional("transition_length", positive_time_period_milliseconds()).with_default("1s"),
            Field::optional("update_interval", positive_time_period_milliseconds()).with_default("1s"),
            Field::optional("min_brightness", percentage()).with_default("0%"),
            Field::optional("max_brightness", percentage()).with_default("100%"),
        ]),
        timed_effect,
    )?;
    registries.register(
        EFFECTS,
        "random",
        &effect_class("RandomLightEffect"),
        Schema::mapping([
            effect_name("Random"),
            Field::optional("transition_length", positive_time_period_milliseconds()).with_default("7.5s"),
            Field::optional("update_interval", positive_time_period_milliseconds()).with_default("10s"),
        ]),
        timed_effect,
    )?;
    let color = Schema::mapping([
        Field::optional("state", boolean()).with_default(true),
        Field::optional("brightness", percentage()).with_default("100%"),
        Field::required("duration", positive_time_period_milliseconds()),
    ]);
    registries.register(
        EFFECTS,
        "strobe",
        &effect_class("StrobeLightEffect"),
        Schema::mapping([
            effect_name("Strobe"),
            Field::optional("colors", crate::schema::ensure_list_bounded(color, Some(2), None)).with_default(
                vec![
                    ConfigValue::from_json(&serde_json::json!({"state": true, "duration": "0.5s"})),
                    ConfigValue::from_json(&serde_json::json!({"state": false, "duration": "0.5s"})),
                ],
            ),
        ]),
        strobe_effect,
    )?;
    Ok(())
}

// -------------------------------- Actions --------------------------------- //

async fn control(cg: &Codegen, call: &EntryCall) -> CodegenResult<Expression> {
    let parent = cg.get_variable(id_at(&call.config, "id")?).await?;
    let var = cg.new_pvariable_templated(&call.id, &call.template_arg, vec![parent])?;
    let setters: [(&str, &str, &TypeRef); 3] = [
        ("transition_length", "set_transition_length", &UINT32),
        ("brightness", "set_brightness", &FLOAT),
        ("effect", "set_effect", &STD_STRING),
    ];
    for (key, setter, ty) in setters {
        if let Some(value) = call.config.get(key) {
            let value = cg.templatable(value, &call.args, Some(ty)).await?;
            cg.add(var.method(setter, vec![value]));
        }
    }
    Ok(var)
}

fn toggle_action(cg: Codegen, call: EntryCall) -> BuildFuture<Expression> {
    Box::pin(async move { control(&cg, &call).await })
}

fn turn_on_action(cg: Codegen, call: EntryCall) -> BuildFuture<Expression> {
    Box::pin(async move {
        let var = control(&cg, &call).await?;
        cg.add(var.method("set_state", vec![Expression::bool(true)]));
        Ok(var)
    })
}

fn turn_off_action(cg: Codegen, call: EntryCall) -> BuildFuture<Expression> {
    Box::pin(async move {
        let var = control(&cg, &call).await?;
        cg.add(var.method("set_state", vec![Expression::bool(false)]));
        Ok(var)
    })
}

fn register_actions(registries: &mut RegistrySet) -> Result<(), LoaderError> {
    let id = || Field::required("id", use_id(&LIGHT_STATE));
    let transition = || Field::optional("transition_length", templatable(positive_time_period_milliseconds()));
    registries.register(
        ACTIONS,
        "light.toggle",
        &TOGGLE_ACTION,
        maybe_simple_id(Schema::mapping([id(), transition()])),
        toggle_action,
    )?;
    registries.register(
        ACTIONS,
        "light.turn_on",
        &CONTROL_ACTION,
        maybe_simple_id(Schema::mapping([
            id(),
            transition(),
            Field::optional("brightness", templatable(percentage())),
            Field::optional("effect", templatable(string())),
        ])),
        turn_on_action,
    )?;
    registries.register(
        ACTIONS,
        "light.turn_off",
        &CONTROL_ACTION,
        maybe_simple_id(Schema::mapping([id(), transition()])),
        turn_off_action,
    )?;
    Ok(())
}

pub fn register(catalog: &mut ComponentCatalog, registries: &mut RegistrySet) -> Result<(), LoaderError> {
    register_effects(registries)?;
    register_actions(registries)?;
    catalog.add_component(ComponentDescriptor::new("light").platform_component())?;
    catalog.add_platform(
        "light",
        ComponentDescriptor::new("binary")
            .schema(
                light_schema(&BINARY_LIGHT_OUTPUT).extend_fields([Field::required("output", use_id(&BINARY_OUTPUT))]),
            )
            .to_code(0.0, light_to_code),
    )?;
    catalog.add_platform(
        "light",
        ComponentDescriptor::new("monochromatic")
            .schema(
                brightness_only_light_schema(&MONOCHROMATIC_LIGHT_OUTPUT)
                    .extend_fields([Field::required("output", use_id(&FLOAT_OUTPUT))]),
            )
            .to_code(0.0, light_to_code),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ValidationContext;
    use crate::target::Target;
    use serde_json::json;
    use std::collections::BTreeSet;

    fn setup() -> (ComponentCatalog, RegistrySet) {
        let mut catalog = ComponentCatalog::default();
        let mut registries = RegistrySet::standard();
        crate::automation::register_builtins(&mut registries).unwrap();
        register(&mut catalog, &mut registries).unwrap();
        (catalog, registries)
    }

    #[test]
    fn effects_fill_defaults_and_need_unique_names() {
        let (catalog, registries) = setup();
        let loaded = BTreeSet::new();
        let target = Target::default();
        let ctx = ValidationContext::new(&registries, &loaded, &target);
        let schema = catalog.platform_schema("light");

        let v = schema
            .validate(
                &ConfigValue::from_json(&json!({
                    "platform": "monochromatic", "name": "Desk", "output": "pwm",
                    "effects": ["pulse", {"strobe": {}}],
                })),
                &ctx,
            )
            .unwrap();
        let effects = v.get("effects").and_then(ConfigValue::as_seq).unwrap();
        assert_eq!(effects[0].get("pulse").and_then(|p| p.get("name")).and_then(ConfigValue::as_str), Some("Pulse"));
        let colors = effects[1].get("strobe").and_then(|s| s.get("colors")).and_then(ConfigValue::as_seq).unwrap();
        assert_eq!(colors.len(), 2);
        assert_eq!(v.get("gamma_correct").and_then(ConfigValue::as_f64), Some(2.8));

        let err = schema
            .validate(
                &ConfigValue::from_json(&json!({
                    "platform": "binary", "name": "Lamp", "output": "relay",
                    "effects": [{"pulse": {"name": "Blink"}}, {"random": {"name": "Blink"}}],
                })),
                &ctx,
            )
            .unwrap_err();
        assert!(err.mentions("Found the effect name 'Blink' twice"), "{err:?}");
    }

    #[test]
    fn binary_lights_cannot_dim() {
        let (catalog, registries) = setup();
        let loaded = BTreeSet::new();
        let target = Target::default();
        let ctx = ValidationContext::new(&registries, &loaded, &target);
        let err = catalog
            .platform_schema("light")
            .validate(
                &ConfigValue::from_json(&json!({
                    "platform": "binary", "name": "Lamp", "output": "relay", "gamma_correct": 2.2,
                })),
                &ctx,
            )
            .unwrap_err();
        assert_eq!(err.errors()[0].message, "extra keys not allowed");
    }
}
