//! `switch:` platform domain with its actions, conditions and triggers.
use once_cell::sync::Lazy;

use super::id_at;
use crate::automation::{build_triggers, validate_automation};
use crate::codegen::{BuildFuture, Codegen, CodegenResult};
use crate::entity::setup_entity;
use crate::ir::types::{ACTION, CONDITION, ENTITY_BASE, ESPHOME_NS, TRIGGER};
use crate::ir::{AutomationArgs, Expression, Namespace, TypeRef, app};
use crate::loader::{ComponentCatalog, ComponentDescriptor, LoaderError};
use crate::registry::{ACTIONS, CONDITIONS, EntryCall, RegistrySet};
use crate::schema::common::entity_schema;
use crate::schema::leaf::boolean;
use crate::schema::{Field, OneOfOptions, Schema, enum_, maybe_simple_id, use_id};
use crate::value::ConfigValue;

pub static SWITCH_NS: Lazy<Namespace> = Lazy::new(|| ESPHOME_NS.namespace("switch_"));
pub static SWITCH: Lazy<TypeRef> = Lazy::new(|| SWITCH_NS.class("Switch", &[ENTITY_BASE.clone()]));

pub static TURN_ON_ACTION: Lazy<TypeRef> = Lazy::new(|| SWITCH_NS.class("TurnOnAction", &[ACTION.clone()]));
pub static TURN_OFF_ACTION: Lazy<TypeRef> = Lazy::new(|| SWITCH_NS.class("TurnOffAction", &[ACTION.clone()]));
pub static TOGGLE_ACTION: Lazy<TypeRef> = Lazy::new(|| SWITCH_NS.class("ToggleAction", &[ACTION.clone()]));
pub static SWITCH_CONDITION: Lazy<TypeRef> = Lazy::new(|| SWITCH_NS.class("SwitchCondition", &[CONDITION.clone()]));
pub static TURN_ON_TRIGGER: Lazy<TypeRef> = Lazy::new(|| SWITCH_NS.class("SwitchTurnOnTrigger", &[TRIGGER.clone()]));
pub static TURN_OFF_TRIGGER: Lazy<TypeRef> =
    Lazy::new(|| SWITCH_NS.class("SwitchTurnOffTrigger", &[TRIGGER.clone()]));

fn restore_mode() -> Schema {
    enum_(
        [
            ("RESTORE_DEFAULT_OFF", "switch_::SWITCH_RESTORE_DEFAULT_OFF".to_string()),
            ("RESTORE_DEFAULT_ON", "switch_::SWITCH_RESTORE_DEFAULT_ON".to_string()),
            ("ALWAYS_OFF", "switch_::SWITCH_ALWAYS_OFF".to_string()),
            ("ALWAYS_ON", "switch_::SWITCH_ALWAYS_ON".to_string()),
        ],
        OneOfOptions::upper(),
    )
}

fn trigger(ty: &TypeRef) -> Schema {
    validate_automation(Some(Schema::mapping([Field::generate_id_at("trigger_id", ty)])), false)
}

/// Entity fields of a switch whose `id:` declares `ty`.
pub fn switch_schema(ty: &TypeRef) -> Schema {
    entity_schema(ty).extend_fields([
        Field::optional("inverted", boolean()),
        Field::optional("restore_mode", restore_mode()).with_default("RESTORE_DEFAULT_OFF"),
        Field::optional("on_turn_on", trigger(&TURN_ON_TRIGGER)),
        Field::optional("on_turn_off", trigger(&TURN_OFF_TRIGGER)),
    ])
}

/// `App.register_switch(var)` plus entity setters and triggers.
pub async fn register_switch(cg: &Codegen, var: &Expression, config: &ConfigValue) -> CodegenResult<()> {
    cg.add(app().method("register_switch", vec![var.clone()]));
    setup_entity(cg, var, config);
    if let Some(inverted) = config.get("inverted").and_then(ConfigValue::as_bool) {
        cg.add(var.method("set_inverted", vec![Expression::bool(inverted)]));
    }
    if let Some(mode) = config.get("restore_mode").and_then(ConfigValue::as_enum) {
        cg.add(var.method("set_restore_mode", vec![Expression::raw(mode.cpp.clone())]));
    }
    let no_args = AutomationArgs::new();
    build_triggers(cg, config, "on_turn_on", &no_args, |_| vec![var.clone()]).await?;
    build_triggers(cg, config, "on_turn_off", &no_args, |_| vec![var.clone()]).await?;
    cg.add_define("USE_SWITCH", None);
    Ok(())
}

// ------------------------- Actions and conditions ------------------------- //

fn parented(cg: Codegen, call: EntryCall) -> BuildFuture<Expression> {
    Box::pin(async move {
        let parent = cg.get_variable(id_at(&call.config, "id")?).await?;
        cg.new_pvariable_templated(&call.id, &call.template_arg, vec![parent])
    })
}

fn is_on(cg: Codegen, call: EntryCall) -> BuildFuture<Expression> {
    state_condition(cg, call, true)
}

fn is_off(cg: Codegen, call: EntryCall) -> BuildFuture<Expression> {
    state_condition(cg, call, false)
}

fn state_condition(cg: Codegen, call: EntryCall, state: bool) -> BuildFuture<Expression> {
    Box::pin(async move {
        let parent = cg.get_variable(id_at(&call.config, "id")?).await?;
        cg.new_pvariable_templated(&call.id, &call.template_arg, vec![parent, Expression::bool(state)])
    })
}

pub fn register(catalog: &mut ComponentCatalog, registries: &mut RegistrySet) -> Result<(), LoaderError> {
    let target = || maybe_simple_id(Schema::mapping([Field::required("id", use_id(&SWITCH))]));
    registries.register(ACTIONS, "switch.turn_on", &TURN_ON_ACTION, target(), parented)?;
    registries.register(ACTIONS, "switch.turn_off", &TURN_OFF_ACTION, target(), parented)?;
    registries.register(ACTIONS, "switch.toggle", &TOGGLE_ACTION, target(), parented)?;
    registries.register(CONDITIONS, "switch.is_on", &SWITCH_CONDITION, target(), is_on)?;
    registries.register(CONDITIONS, "switch.is_off", &SWITCH_CONDITION, target(), is_off)?;
    catalog.add_component(ComponentDescriptor::new("switch").platform_component())
}
