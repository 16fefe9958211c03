//! `sensor:` platform domain: the sensor entity schema, its filter registry,
//! value triggers and the `sensor.in_range` condition.
use once_cell::sync::Lazy;

use super::{field, id_at, own_id};
use crate::automation::{build_automation, build_triggers, validate_automation};
use crate::codegen::{BuildFuture, Codegen, CodegenError, CodegenResult};
use crate::entity::setup_entity;
use crate::ir::types::{COMPONENT, CONDITION, ENTITY_BASE, ESPHOME_NS, FLOAT, OPTIONAL, TRIGGER};
use crate::ir::{AutomationArgs, Expression, Namespace, TemplateArguments, TypeRef, app};
use crate::loader::{ComponentCatalog, ComponentDescriptor, LoaderError};
use crate::registry::{CONDITIONS, EntryCall, RegistrySet, SENSOR_FILTERS};
use crate::schema::common::entity_schema;
use crate::schema::leaf::{
    boolean, float_, has_at_least_one_key, int_, positive_not_null_int, string_strict, zero_to_one_float,
};
use crate::schema::time::positive_time_period_milliseconds;
use crate::schema::{
    Field, OneOfOptions, Schema, enum_, one_of, registry_list, returning_lambda, templatable, use_id,
};
use crate::value::ConfigValue;

pub static SENSOR_NS: Lazy<Namespace> = Lazy::new(|| ESPHOME_NS.namespace("sensor"));
pub static SENSOR: Lazy<TypeRef> = Lazy::new(|| SENSOR_NS.class("Sensor", &[ENTITY_BASE.clone()]));

pub static STATE_TRIGGER: Lazy<TypeRef> = Lazy::new(|| SENSOR_NS.class("SensorStateTrigger", &[TRIGGER.clone()]));
pub static RAW_STATE_TRIGGER: Lazy<TypeRef> =
    Lazy::new(|| SENSOR_NS.class("SensorRawStateTrigger", &[TRIGGER.clone()]));
pub static VALUE_RANGE_TRIGGER: Lazy<TypeRef> =
    Lazy::new(|| SENSOR_NS.class("ValueRangeTrigger", &[TRIGGER.clone(), COMPONENT.clone()]));
pub static IN_RANGE_CONDITION: Lazy<TypeRef> =
    Lazy::new(|| SENSOR_NS.class("SensorInRangeCondition", &[CONDITION.clone()]));

pub static FILTER: Lazy<TypeRef> = Lazy::new(|| SENSOR_NS.class("Filter", &[]));

fn filter_class(name: &str) -> TypeRef {
    SENSOR_NS.class(name, &[FILTER.clone()])
}

const DEVICE_CLASSES: [&str; 14] = [
    "battery", "carbon_dioxide", "current", "distance", "energy", "humidity", "illuminance", "power",
    "power_factor", "pressure", "signal_strength", "temperature", "timestamp", "voltage",
];

fn state_class() -> Schema {
    enum_(
        [
            ("measurement", "sensor::STATE_CLASS_MEASUREMENT".to_string()),
            ("total_increasing", "sensor::STATE_CLASS_TOTAL_INCREASING".to_string()),
            ("total", "sensor::STATE_CLASS_TOTAL".to_string()),
        ],
        OneOfOptions::lower().space('_'),
    )
}

/// The value a sensor trigger's automation receives.
pub fn value_args() -> AutomationArgs {
    vec![(FLOAT.clone(), "x".to_string())]
}

fn trigger(ty: &TypeRef) -> Schema {
    validate_automation(Some(Schema::mapping([Field::generate_id_at("trigger_id", ty)])), false)
}

fn value_range_trigger() -> Schema {
    let extra = Schema::mapping([
        Field::generate_id_at("trigger_id", &VALUE_RANGE_TRIGGER),
        Field::optional("above", templatable(float_())),
        Field::optional("below", templatable(float_())),
    ])
    .with_validators([has_at_least_one_key(&["above", "below"])]);
    validate_automation(Some(extra), false)
}

/// Entity fields of a sensor whose `id:` declares `ty`.
pub fn sensor_schema(ty: &TypeRef) -> Schema {
    entity_schema(ty).extend_fields([
        Field::optional("unit_of_measurement", string_strict()),
        Field::optional("accuracy_decimals", int_()),
        Field::optional("device_class", one_of(DEVICE_CLASSES, OneOfOptions::lower().space('_'))),
        Field::optional("state_class", state_class()),
        Field::optional("force_update", boolean()).with_default(false),
        Field::optional("filters", registry_list(SENSOR_FILTERS)),
        Field::optional("on_value", trigger(&STATE_TRIGGER)),
        Field::optional("on_raw_value", trigger(&RAW_STATE_TRIGGER)),
        Field::optional("on_value_range", value_range_trigger()),
    ])
}

// -------------------------------- Codegen --------------------------------- //

/// `App.register_sensor(var)`, entity setters, filters and triggers.
pub async fn register_sensor(cg: &Codegen, var: &Expression, config: &ConfigValue) -> CodegenResult<()> {
    cg.add(app().method("register_sensor", vec![var.clone()]));
    setup_entity(cg, var, config);
    if let Some(unit) = config.get("unit_of_measurement").and_then(ConfigValue::as_str) {
        cg.add(var.method("set_unit_of_measurement", vec![Expression::string(unit)]));
    }
    if let Some(decimals) = config.get("accuracy_decimals").and_then(ConfigValue::as_i64) {
        cg.add(var.method("set_accuracy_decimals", vec![Expression::int(decimals)]));
    }
    if let Some(class) = config.get("device_class").and_then(ConfigValue::as_str) {
        cg.add(var.method("set_device_class", vec![Expression::string(class)]));
    }
    if let Some(class) = config.get("state_class").and_then(ConfigValue::as_enum) {
        cg.add(var.method("set_state_class", vec![Expression::raw(class.cpp.clone())]));
    }
    if config.get("force_update").and_then(ConfigValue::as_bool) == Some(true) {
        cg.add(var.method("set_force_update", vec![Expression::bool(true)]));
    }
    if let Some(filters) = config.get("filters") {
        let built = cg
            .build_registry_list(SENSOR_FILTERS, filters, &TemplateArguments::default(), &AutomationArgs::new())
            .await?;
        cg.add(var.method("set_filters", vec![Expression::Array(built)]));
    }

    let args = value_args();
    build_triggers(cg, config, "on_value", &args, |_| vec![var.clone()]).await?;
    build_triggers(cg, config, "on_raw_value", &args, |_| vec![var.clone()]).await?;
    if let Some(automations) = config.get("on_value_range") {
        for conf in automations.iter_list() {
            let trigger = cg.new_pvariable(id_at(conf, "trigger_id")?, vec![var.clone()])?;
            cg.register_component(&trigger, conf).await?;
            for (key, setter) in [("above", "set_min"), ("below", "set_max")] {
                if let Some(bound) = conf.get(key) {
                    let bound = cg.templatable(bound, &args, Some(&FLOAT)).await?;
                    cg.add(trigger.method(setter, vec![bound]));
                }
            }
            build_automation(cg, &trigger, &args, conf).await?;
        }
    }
    cg.add_define("USE_SENSOR", None);
    Ok(())
}

/// Declares the sensor under `config`'s `id:` and registers it.
pub async fn new_sensor(cg: &Codegen, config: &ConfigValue, args: Vec<Expression>) -> CodegenResult<Expression> {
    let var = cg.new_pvariable(own_id(config)?, args)?;
    register_sensor(cg, &var, config).await?;
    Ok(var)
}

// ------------------------------- Filters ---------------------------------- //

async fn literal_filter(cg: &Codegen, call: &EntryCall, value: &ConfigValue) -> CodegenResult<Expression> {
    let arg = cg.templatable(value, &AutomationArgs::new(), Some(&FLOAT)).await?;
    cg.new_pvariable(&call.id, vec![arg])
}

fn value_filter(cg: Codegen, call: EntryCall) -> BuildFuture<Expression> {
    Box::pin(async move { literal_filter(&cg, &call, &call.config).await })
}

fn lambda_filter(cg: Codegen, call: EntryCall) -> BuildFuture<Expression> {
    Box::pin(async move {
        let lambda = call
            .config
            .as_lambda()
            .ok_or_else(|| CodegenError::Expression(format!("{} needs a lambda", call.id)))?;
        let returns = OPTIONAL.template(&TemplateArguments::of_types([&*FLOAT]));
        let body = cg.process_lambda(lambda, &value_args(), "&", Some(&returns)).await?;
        cg.new_pvariable(&call.id, vec![body])
    })
}

fn window_filter(cg: Codegen, call: EntryCall) -> BuildFuture<Expression> {
    Box::pin(async move {
        let mut args = Vec::new();
        for key in ["window_size", "send_every", "send_first_at"] {
            args.push(Expression::int(field(&call.config, key)?.as_i64().unwrap_or(1)));
        }
        cg.new_pvariable(&call.id, args)
    })
}

fn ema_filter(cg: Codegen, call: EntryCall) -> BuildFuture<Expression> {
    Box::pin(async move {
        let alpha = field(&call.config, "alpha")?.as_f64().unwrap_or(0.1);
        let every = field(&call.config, "send_every")?.as_i64().unwrap_or(1);
        let first = field(&call.config, "send_first_at")?.as_i64().unwrap_or(1);
        cg.new_pvariable(&call.id, vec![Expression::float(alpha), Expression::int(every), Expression::int(first)])
    })
}

fn time_filter(cg: Codegen, call: EntryCall) -> BuildFuture<Expression> {
    Box::pin(async move {
        let ms = call.config.as_time().map(|t| t.in_unit() as i64).unwrap_or_default();
        let var = cg.new_pvariable(&call.id, vec![Expression::int(ms)])?;
        if call.id.type_tag.inherits_from(&COMPONENT) {
            cg.register_component(&var, &ConfigValue::map()).await?;
        }
        Ok(var)
    })
}

fn or_filter(cg: Codegen, call: EntryCall) -> BuildFuture<Expression> {
    Box::pin(async move {
        let inner = cg
            .build_registry_list(SENSOR_FILTERS, &call.config, &TemplateArguments::default(), &AutomationArgs::new())
            .await?;
        cg.new_pvariable(&call.id, vec![Expression::Array(inner)])
    })
}

fn register_filters(registries: &mut RegistrySet) -> Result<(), LoaderError> {
    registries.declare(SENSOR_FILTERS, "sensor.FILTER_REGISTRY");
    let float_value = || templatable(float_());
    registries.register(SENSOR_FILTERS, "offset", &filter_class("OffsetFilter"), float_value(), value_filter)?;
    registries.register(SENSOR_FILTERS, "multiply", &filter_class("MultiplyFilter"), float_value(), value_filter)?;
    registries.register(SENSOR_FILTERS, "filter_out", &filter_class("FilterOutValueFilter"), float_(), value_filter)?;
    registries.register(SENSOR_FILTERS, "delta", &filter_class("DeltaFilter"), float_(), value_filter)?;
    registries.register(SENSOR_FILTERS, "lambda", &filter_class("LambdaFilter"), returning_lambda(), lambda_filter)?;
    registries.register(
        SENSOR_FILTERS,
        "sliding_window_moving_average",
        &filter_class("SlidingWindowMovingAverageFilter"),
        Schema::mapping([
            Field::optional("window_size", positive_not_null_int()).with_default(15),
            Field::optional("send_every", positive_not_null_int()).with_default(15),
            Field::optional("send_first_at", positive_not_null_int()).with_default(1),
        ]),
        window_filter,
    )?;
    registries.register(
        SENSOR_FILTERS,
        "exponential_moving_average",
        &filter_class("ExponentialMovingAverageFilter"),
        Schema::mapping([
            Field::optional("alpha", zero_to_one_float()).with_default(0.1),
            Field::optional("send_every", positive_not_null_int()).with_default(15),
            Field::optional("send_first_at", positive_not_null_int()).with_default(1),
        ]),
        ema_filter,
    )?;
    registries.register(
        SENSOR_FILTERS,
        "throttle",
        &filter_class("ThrottleFilter"),
        positive_time_period_milliseconds(),
        time_filter,
    )?;
    registries.register(
        SENSOR_FILTERS,
        "debounce",
        &SENSOR_NS.class("DebounceFilter", &[FILTER.clone(), COMPONENT.clone()]),
        positive_time_period_milliseconds(),
        time_filter,
    )?;
    registries.register(SENSOR_FILTERS, "or", &filter_class("OrFilter"), registry_list(SENSOR_FILTERS), or_filter)?;
    Ok(())
}

// ------------------------------ in_range ---------------------------------- //

fn in_range_condition(cg: Codegen, call: EntryCall) -> BuildFuture<Expression> {
    Box::pin(async move {
        let parent = cg.get_variable(id_at(&call.config, "id")?).await?;
        let var = cg.new_pvariable_templated(&call.id, &call.template_arg, vec![parent])?;
        for (key, setter) in [("above", "set_min"), ("below", "set_max")] {
            if let Some(bound) = call.config.get(key) {
                let bound = cg.templatable(bound, &call.args, Some(&FLOAT)).await?;
                cg.add(var.method(setter, vec![bound]));
            }
        }
        Ok(var)
    })
}

pub fn register(catalog: &mut ComponentCatalog, registries: &mut RegistrySet) -> Result<(), LoaderError> {
    register_filters(registries)?;
    registries.register(
        CONDITIONS,
        "sensor.in_range",
        &IN_RANGE_CONDITION,
        Schema::mapping([
            Field::required("id", use_id(&SENSOR)),
            Field::optional("above", templatable(float_())),
            Field::optional("below", templatable(float_())),
        ])
        .with_validators([has_at_least_one_key(&["above", "below"])]),
        in_range_condition,
    )?;
    catalog.add_component(ComponentDescriptor::new("sensor").platform_component())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ValidationContext;
    use crate::target::Target;
    use serde_json::json;
    use std::collections::BTreeSet;

    fn registries() -> RegistrySet {
        let mut set = RegistrySet::standard();
        crate::automation::register_builtins(&mut set).unwrap();
        register(&mut ComponentCatalog::default(), &mut set).unwrap();
        set
    }

    #[test]
    fn filters_nest_through_the_registry() {
        let set = registries();
        let loaded = BTreeSet::new();
        let target = Target::default();
        let ctx = ValidationContext::new(&set, &loaded, &target);
        let v = sensor_schema(&SENSOR)
            .validate(
                &ConfigValue::from_json(&json!({
                    "name": "t",
                    "filters": [{"offset": 2.0}, {"or": [{"throttle": "1s"}, {"delta": 0.5}]}],
                })),
                &ctx,
            )
            .unwrap();
        let filters = v.get("filters").and_then(ConfigValue::as_seq).unwrap();
        let inner = filters[1].get("or").and_then(ConfigValue::as_seq).unwrap();
        assert_eq!(inner.len(), 2);

        let err = sensor_schema(&SENSOR)
            .validate(&ConfigValue::from_json(&json!({"name": "t", "filters": [{"median": {}}]})), &ctx)
            .unwrap_err();
        assert_eq!(err.errors()[0].message, "Unable to find sensor.filter with the name 'median'.");
        assert_eq!(err.errors()[0].path.to_string(), "filters[0].median");
    }

    #[test]
    fn value_range_needs_a_bound() {
        let set = registries();
        let loaded = BTreeSet::new();
        let target = Target::default();
        let ctx = ValidationContext::new(&set, &loaded, &target);
        let err = sensor_schema(&SENSOR)
            .validate(
                &ConfigValue::from_json(&json!({"name": "t", "on_value_range": {"then": [{"delay": "1s"}]}})),
                &ctx,
            )
            .unwrap_err();
        assert!(err.mentions("Must contain at least one of"), "{err:?}");
    }
}
