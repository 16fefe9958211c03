//! Automations: a trigger, an optional gate condition and a list of actions.
//!
//! The surface syntax is forgiving (a single action, a list of actions, a
//! `{then: ...}` mapping or a list of those); validation always normalizes to
//! a list of mappings with a `then` key. Actions and conditions are registry
//! entries, so components contribute their own by registering them.
use once_cell::sync::Lazy;

use crate::codegen::{BuildFuture, Codegen, CodegenError, CodegenResult};
use crate::ir::types::{
    ACTION, AUTOMATION, BOOL, COMPONENT, CONDITION, ESPHOME_NS, POLLING_COMPONENT, TRIGGER, UINT32, VOID,
};
use crate::ir::{AutomationArgs, Expression, TemplateArguments, TypeRef};
use crate::registry::{ACTIONS, CONDITIONS, EntryCall, RegistryError, RegistrySet, TYPE_ID};
use crate::schema::{
    AutomationSchema, Field, JsonHint, Schema, SchemaNode, VResult, ValidationContext, ValidationError, all, any,
    deepest, invalid, leaf, leaf::has_at_least_one_key, list_of, maybe_simple_id, maybe_simple_value, registry_entry,
    registry_list, returning_lambda, templatable, time::positive_time_period_milliseconds, use_id,
};
use crate::value::{ConfigId, ConfigMap, ConfigValue};

pub const THEN: &str = "then";

pub static AND_CONDITION: Lazy<TypeRef> = Lazy::new(|| ESPHOME_NS.class("AndCondition", &[CONDITION.clone()]));
pub static OR_CONDITION: Lazy<TypeRef> = Lazy::new(|| ESPHOME_NS.class("OrCondition", &[CONDITION.clone()]));
pub static NOT_CONDITION: Lazy<TypeRef> = Lazy::new(|| ESPHOME_NS.class("NotCondition", &[CONDITION.clone()]));
pub static LAMBDA_CONDITION: Lazy<TypeRef> =
    Lazy::new(|| ESPHOME_NS.class("LambdaCondition", &[CONDITION.clone()]));
pub static FOR_CONDITION: Lazy<TypeRef> =
    Lazy::new(|| ESPHOME_NS.class("ForCondition", &[CONDITION.clone(), COMPONENT.clone()]));

pub static DELAY_ACTION: Lazy<TypeRef> =
    Lazy::new(|| ESPHOME_NS.class("DelayAction", &[ACTION.clone(), COMPONENT.clone()]));
pub static LAMBDA_ACTION: Lazy<TypeRef> = Lazy::new(|| ESPHOME_NS.class("LambdaAction", &[ACTION.clone()]));
pub static IF_ACTION: Lazy<TypeRef> = Lazy::new(|| ESPHOME_NS.class("IfAction", &[ACTION.clone()]));
pub static WHILE_ACTION: Lazy<TypeRef> = Lazy::new(|| ESPHOME_NS.class("WhileAction", &[ACTION.clone()]));
pub static WAIT_UNTIL_ACTION: Lazy<TypeRef> =
    Lazy::new(|| ESPHOME_NS.class("WaitUntilAction", &[ACTION.clone(), COMPONENT.clone()]));
pub static UPDATE_COMPONENT_ACTION: Lazy<TypeRef> =
    Lazy::new(|| ESPHOME_NS.class("UpdateComponentAction", &[ACTION.clone()]));

// ------------------------------- Schemas ---------------------------------- //

pub fn action_list() -> Schema {
    registry_list(ACTIONS)
}

/// One condition, or a list of them meaning `and`.
pub fn potentially_and_condition() -> Schema {
    let as_and = leaf("and_condition", JsonHint::Any, |value, _| {
        let mut out = ConfigMap::new();
        out.insert(TYPE_ID.to_string(), ConfigValue::Id(ConfigId::declare(None, AND_CONDITION.clone())));
        out.insert("and".to_string(), value.clone());
        Ok(ConfigValue::Map(out))
    });
    any([registry_entry(CONDITIONS), all([list_of(registry_entry(CONDITIONS)), as_and])])
}

/// The mapping every automation validates against before trigger extras.
pub fn automation_schema() -> Schema {
    Schema::mapping([
        Field::generate_id_at("trigger_id", &TRIGGER),
        Field::generate_id_at("automation_id", &AUTOMATION),
        Field::optional("if", potentially_and_condition()),
        Field::required(THEN, action_list()),
    ])
}

/// Automation field accepting every surface shape. `extra` adds trigger
/// specific keys (usually a `trigger_id` of the concrete trigger type);
/// `single` yields one mapping instead of a list.
pub fn validate_automation(extra: Option<Schema>, single: bool) -> Schema {
    let schema = match extra {
        Some(extra) => automation_schema().extend(&extra),
        None => automation_schema(),
    };
    Schema::new(SchemaNode::Automation(AutomationSchema { schema, single }))
}

fn wrap_then(value: &ConfigValue) -> ConfigValue {
    let mut m = ConfigMap::new();
    m.insert(THEN.to_string(), value.clone());
    ConfigValue::Map(m)
}

/// Validation entry point for [`SchemaNode::Automation`].
pub fn validate_surface(a: &AutomationSchema, value: &ConfigValue, ctx: &ValidationContext<'_>) -> VResult {
    let mut automations = match value {
        ConfigValue::Seq(items) => validate_list_surface(&a.schema, value, items, ctx)?,
        ConfigValue::Map(m) if m.contains_key(THEN) => vec![a.schema.validate(value, ctx)?],
        ConfigValue::Map(_) => vec![a.schema.validate(&wrap_then(value), ctx)?],
        other => vec![a.schema.validate(other, ctx)?],
    };
    if !a.single {
        return Ok(ConfigValue::Seq(automations));
    }
    match automations.len() {
        1 => Ok(automations.remove(0)),
        _ => Err(invalid("Cannot have more than 1 automation for templates")),
    }
}

/// A list is either a sequence of actions or a sequence of automations.
/// Actions are tried first; the error kept is the one that says more.
fn validate_list_surface(
    schema: &Schema,
    value: &ConfigValue,
    items: &[ConfigValue],
    ctx: &ValidationContext<'_>,
) -> Result<Vec<ConfigValue>, ValidationError> {
    let as_actions = match schema.validate(&wrap_then(value), ctx) {
        Ok(v) => return Ok(vec![v]),
        Err(e) => e.strip_leading_key(THEN),
    };
    let mut out = Vec::with_capacity(items.len());
    let mut errors = Vec::new();
    for (i, item) in items.iter().enumerate() {
        match schema.validate(item, ctx) {
            Ok(v) => out.push(v),
            Err(e) => errors.extend(e.under_index(i).into_errors()),
        }
    }
    let Some(as_automations) = ValidationError::from_errors(errors) else { return Ok(out) };
    if as_automations.has_extra_key_at_depth(2) {
        return Err(as_actions);
    }
    if as_actions.mentions("Unable to find action") {
        return Err(as_automations);
    }
    Err(deepest(vec![as_actions, as_automations]))
}

// ------------------------------- Codegen ---------------------------------- //

pub fn template_arguments(args: &AutomationArgs) -> TemplateArguments {
    TemplateArguments::of_types(args.iter().map(|(ty, _)| ty))
}

fn missing(what: &str) -> CodegenError {
    CodegenError::Expression(format!("validated automation has no {what}"))
}

/// `new Automation<args...>(trigger)` plus its action list.
pub async fn build_automation(
    cg: &Codegen,
    trigger: &Expression,
    args: &AutomationArgs,
    config: &ConfigValue,
) -> CodegenResult<Expression> {
    let template_arg = template_arguments(args);
    let id = config.get("automation_id").and_then(ConfigValue::as_id).ok_or_else(|| missing("automation_id"))?;
    let automation = cg.new_pvariable_templated(id, &template_arg, vec![trigger.clone()])?;
    // automation-level `if:` gates the whole action list
    if let Some(gate) = config.get("if") {
        let condition = cg.build_registry_entry(CONDITIONS, gate, &template_arg, args).await?;
        cg.add(automation.method("add_conditions", vec![Expression::Array(vec![condition])]));
    }
    let then = config.get(THEN).ok_or_else(|| missing(THEN))?;
    let actions = cg.build_registry_list(ACTIONS, then, &template_arg, args).await?;
    cg.add(automation.method("add_actions", vec![Expression::Array(actions)]));
    Ok(automation)
}

/// Triggers of `parent` built from every automation under `key`. `make`
/// returns the trigger's constructor arguments.
pub async fn build_triggers(
    cg: &Codegen,
    config: &ConfigValue,
    key: &str,
    args: &AutomationArgs,
    make: impl Fn(&ConfigValue) -> Vec<Expression>,
) -> CodegenResult<()> {
    let Some(automations) = config.get(key) else { return Ok(()) };
    for conf in automations.iter_list() {
        let id = conf.get("trigger_id").and_then(ConfigValue::as_id).ok_or_else(|| missing("trigger_id"))?;
        let trigger = cg.new_pvariable(id, make(conf))?;
        if id.type_tag.inherits_from(&COMPONENT) {
            cg.register_component(&trigger, conf).await?;
        }
        build_automation(cg, &trigger, args, conf).await?;
    }
    Ok(())
}

fn config_key<'a>(call: &'a EntryCall, key: &str) -> CodegenResult<&'a ConfigValue> {
    call.config.get(key).ok_or_else(|| CodegenError::Expression(format!("missing '{key}' in {}", call.id)))
}

fn condition_of(cg: &Codegen, call: &EntryCall) -> BuildFuture<Expression> {
    let cg = cg.clone();
    let condition = call.config.get("condition").cloned();
    let template_arg = call.template_arg.clone();
    let args = call.args.clone();
    Box::pin(async move {
        let condition = condition.ok_or_else(|| missing("condition"))?;
        cg.build_registry_entry(CONDITIONS, &condition, &template_arg, &args).await
    })
}

fn delay_action(cg: Codegen, call: EntryCall) -> BuildFuture<Expression> {
    Box::pin(async move {
        let var = cg.new_pvariable_templated(&call.id, &call.template_arg, vec![])?;
        cg.register_component(&var, &ConfigValue::map()).await?;
        let delay = cg.templatable(&call.config, &call.args, Some(&UINT32)).await?;
        cg.add(var.method("set_delay", vec![delay]));
        Ok(var)
    })
}

fn lambda_action(cg: Codegen, call: EntryCall) -> BuildFuture<Expression> {
    Box::pin(async move {
        let lambda = call.config.as_lambda().ok_or_else(|| missing("lambda"))?;
        let body = cg.process_lambda(lambda, &call.args, "=", Some(&VOID)).await?;
        cg.new_pvariable_templated(&call.id, &call.template_arg, vec![body])
    })
}

fn if_action(cg: Codegen, call: EntryCall) -> BuildFuture<Expression> {
    Box::pin(async move {
        let condition = condition_of(&cg, &call).await?;
        let var = cg.new_pvariable_templated(&call.id, &call.template_arg, vec![condition])?;
        for (key, method) in [(THEN, "add_then"), ("else", "add_else")] {
            if let Some(actions) = call.config.get(key) {
                let built = cg.build_registry_list(ACTIONS, actions, &call.template_arg, &call.args).await?;
                cg.add(var.method(method, vec![Expression::Array(built)]));
            }
        }
        Ok(var)
    })
}

fn while_action(cg: Codegen, call: EntryCall) -> BuildFuture<Expression> {
    Box::pin(async move {
        let condition = condition_of(&cg, &call).await?;
        let var = cg.new_pvariable_templated(&call.id, &call.template_arg, vec![condition])?;
        let built = cg.build_registry_list(ACTIONS, config_key(&call, THEN)?, &call.template_arg, &call.args).await?;
        cg.add(var.method("add_then", vec![Expression::Array(built)]));
        Ok(var)
    })
}

fn wait_until_action(cg: Codegen, call: EntryCall) -> BuildFuture<Expression> {
    Box::pin(async move {
        let condition = condition_of(&cg, &call).await?;
        let var = cg.new_pvariable_templated(&call.id, &call.template_arg, vec![condition])?;
        cg.register_component(&var, &ConfigValue::map()).await?;
        if let Some(timeout) = call.config.get("timeout") {
            let timeout = cg.templatable(timeout, &call.args, Some(&UINT32)).await?;
            cg.add(var.method("set_timeout_value", vec![timeout]));
        }
        Ok(var)
    })
}

fn update_component_action(cg: Codegen, call: EntryCall) -> BuildFuture<Expression> {
    Box::pin(async move {
        let target = config_key(&call, "id")?.as_id().ok_or_else(|| missing("id"))?;
        let parent = cg.get_variable(target).await?;
        cg.new_pvariable_templated(&call.id, &call.template_arg, vec![parent])
    })
}

fn combined_condition(cg: Codegen, call: EntryCall) -> BuildFuture<Expression> {
    Box::pin(async move {
        let conditions = cg.build_registry_list(CONDITIONS, &call.config, &call.template_arg, &call.args).await?;
        cg.new_pvariable_templated(&call.id, &call.template_arg, vec![Expression::Array(conditions)])
    })
}

fn not_condition(cg: Codegen, call: EntryCall) -> BuildFuture<Expression> {
    Box::pin(async move {
        let inner = cg.build_registry_entry(CONDITIONS, &call.config, &call.template_arg, &call.args).await?;
        cg.new_pvariable_templated(&call.id, &call.template_arg, vec![inner])
    })
}

fn lambda_condition(cg: Codegen, call: EntryCall) -> BuildFuture<Expression> {
    Box::pin(async move {
        let lambda = call.config.as_lambda().ok_or_else(|| missing("lambda"))?;
        let body = cg.process_lambda(lambda, &call.args, "=", Some(&BOOL)).await?;
        cg.new_pvariable_templated(&call.id, &call.template_arg, vec![body])
    })
}

fn for_condition(cg: Codegen, call: EntryCall) -> BuildFuture<Expression> {
    Box::pin(async move {
        let condition = condition_of(&cg, &call).await?;
        let var = cg.new_pvariable_templated(&call.id, &call.template_arg, vec![condition])?;
        cg.register_component(&var, &ConfigValue::map()).await?;
        let time = cg.templatable(config_key(&call, "time")?, &call.args, Some(&UINT32)).await?;
        cg.add(var.method("set_time", vec![time]));
        Ok(var)
    })
}

/// The built-in actions and conditions.
pub fn register_builtins(registries: &mut RegistrySet) -> Result<(), RegistryError> {
    let condition = || Field::required("condition", potentially_and_condition());

    registries.register(
        ACTIONS,
        "delay",
        &DELAY_ACTION,
        templatable(positive_time_period_milliseconds()),
        delay_action,
    )?;
    registries.register(ACTIONS, "lambda", &LAMBDA_ACTION, crate::schema::lambda_(), lambda_action)?;
    registries.register(
        ACTIONS,
        "if",
        &IF_ACTION,
        Schema::mapping([condition(), Field::optional(THEN, action_list()), Field::optional("else", action_list())])
            .with_validators([has_at_least_one_key(&[THEN, "else"])]),
        if_action,
    )?;
    registries.register(
        ACTIONS,
        "while",
        &WHILE_ACTION,
        Schema::mapping([condition(), Field::required(THEN, action_list())]),
        while_action,
    )?;
    registries.register(
        ACTIONS,
        "wait_until",
        &WAIT_UNTIL_ACTION,
        maybe_simple_value(
            Schema::mapping([
                condition(),
                Field::optional("timeout", templatable(positive_time_period_milliseconds())),
            ]),
            "condition",
        ),
        wait_until_action,
    )?;
    registries.register(
        ACTIONS,
        "component.update",
        &UPDATE_COMPONENT_ACTION,
        maybe_simple_id(Schema::mapping([Field::required("id", use_id(&POLLING_COMPONENT))])),
        update_component_action,
    )?;

    registries.register(CONDITIONS, "and", &AND_CONDITION, registry_list(CONDITIONS), combined_condition)?;
    registries.register(CONDITIONS, "or", &OR_CONDITION, registry_list(CONDITIONS), combined_condition)?;
    registries.register(CONDITIONS, "not", &NOT_CONDITION, potentially_and_condition(), not_condition)?;
    registries.register(CONDITIONS, "lambda", &LAMBDA_CONDITION, returning_lambda(), lambda_condition)?;
    registries.register(
        CONDITIONS,
        "for",
        &FOR_CONDITION,
        Schema::mapping([Field::required("time", templatable(positive_time_period_milliseconds())), condition()]),
        for_condition,
    )?;
    Ok(())
}
