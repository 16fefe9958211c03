//! `output:` platform domain. Outputs aren't entities; lights and switches
//! drive them by ID.
use once_cell::sync::Lazy;

use super::id_at;
use crate::codegen::{BuildFuture, Codegen, CodegenResult};
use crate::ir::types::{ACTION, ESPHOME_NS, FLOAT};
use crate::ir::{Expression, Namespace, TypeRef};
use crate::loader::{ComponentCatalog, ComponentDescriptor, LoaderError};
use crate::registry::{ACTIONS, EntryCall, RegistrySet};
use crate::schema::leaf::{boolean, percentage};
use crate::schema::{Field, Schema, maybe_simple_id, templatable, use_id};
use crate::value::ConfigValue;

pub static OUTPUT_NS: Lazy<Namespace> = Lazy::new(|| ESPHOME_NS.namespace("output"));
pub static BINARY_OUTPUT: Lazy<TypeRef> = Lazy::new(|| OUTPUT_NS.class("BinaryOutput", &[]));
pub static FLOAT_OUTPUT: Lazy<TypeRef> = Lazy::new(|| OUTPUT_NS.class("FloatOutput", &[BINARY_OUTPUT.clone()]));

pub static TURN_ON_ACTION: Lazy<TypeRef> = Lazy::new(|| OUTPUT_NS.class("TurnOnAction", &[ACTION.clone()]));
pub static TURN_OFF_ACTION: Lazy<TypeRef> = Lazy::new(|| OUTPUT_NS.class("TurnOffAction", &[ACTION.clone()]));
pub static SET_LEVEL_ACTION: Lazy<TypeRef> = Lazy::new(|| OUTPUT_NS.class("SetLevelAction", &[ACTION.clone()]));

/// Fields of every binary output; platforms add a required `id:`.
pub fn binary_output_schema() -> Schema {
    Schema::mapping([Field::optional("inverted", boolean())])
}

pub fn float_output_schema() -> Schema {
    binary_output_schema().extend_fields([
        Field::optional("min_power", percentage()),
        Field::optional("max_power", percentage()),
        Field::optional("zero_means_zero", boolean()),
    ])
}

/// Applies the shared output settings present in `config`.
pub fn setup_output(cg: &Codegen, var: &Expression, config: &ConfigValue) {
    for (key, setter) in [("inverted", "set_inverted"), ("zero_means_zero", "set_zero_means_zero")] {
        if let Some(flag) = config.get(key).and_then(ConfigValue::as_bool) {
            cg.add(var.method(setter, vec![Expression::bool(flag)]));
        }
    }
    for (key, setter) in [("min_power", "set_min_power"), ("max_power", "set_max_power")] {
        if let Some(level) = config.get(key).and_then(ConfigValue::as_f64) {
            cg.add(var.method(setter, vec![Expression::float(level)]));
        }
    }
}

// -------------------------------- Actions --------------------------------- //

async fn parented_action(cg: &Codegen, call: &EntryCall) -> CodegenResult<Expression> {
    let parent = cg.get_variable(id_at(&call.config, "id")?).await?;
    cg.new_pvariable_templated(&call.id, &call.template_arg, vec![parent])
}

fn on_off_action(cg: Codegen, call: EntryCall) -> BuildFuture<Expression> {
    Box::pin(async move { parented_action(&cg, &call).await })
}

fn set_level_action(cg: Codegen, call: EntryCall) -> BuildFuture<Expression> {
    Box::pin(async move {
        let var = parented_action(&cg, &call).await?;
        let level = cg.templatable(super::field(&call.config, "level")?, &call.args, Some(&FLOAT)).await?;
        cg.add(var.method("set_level", vec![level]));
        Ok(var)
    })
}

pub fn register(catalog: &mut ComponentCatalog, registries: &mut RegistrySet) -> Result<(), LoaderError> {
    let target = || maybe_simple_id(Schema::mapping([Field::required("id", use_id(&BINARY_OUTPUT))]));
    registries.register(ACTIONS, "output.turn_on", &TURN_ON_ACTION, target(), on_off_action)?;
    registries.register(ACTIONS, "output.turn_off", &TURN_OFF_ACTION, target(), on_off_action)?;
    registries.register(
        ACTIONS,
        "output.set_level",
        &SET_LEVEL_ACTION,
        Schema::mapping([
            Field::required("id", use_id(&FLOAT_OUTPUT)),
            Field::required("level", templatable(percentage())),
        ]),
        set_level_action,
    )?;
    catalog.add_component(ComponentDescriptor::new("output").platform_component())
}
