//! `sensor: platform: combination`, one value folded from several source
//! sensors. `type:` picks the fold; only `kalman` weighs its sources.
use once_cell::sync::Lazy;

use super::copy::INHERITED;
use super::sensor::{SENSOR, new_sensor, sensor_schema, value_args};
use super::{field, id_at};
use crate::codegen::{BuildFuture, Codegen, CodegenError, CodegenResult};
use crate::entity::inherit_property_from;
use crate::ir::types::{COMPONENT, ESPHOME_NS, FLOAT};
use crate::ir::{Expression, Namespace, TypeRef};
use crate::loader::{ComponentCatalog, ComponentDescriptor, LoaderError};
use crate::schema::common::component_schema;
use crate::schema::leaf::{float_, positive_float};
use crate::schema::{Field, Schema, VResult, ensure_list_bounded, templatable, typed_schema, use_id};
use crate::value::ConfigValue;

pub static COMBINATION_NS: Lazy<Namespace> = Lazy::new(|| ESPHOME_NS.namespace("combination"));
pub static COMBINATION_COMPONENT: Lazy<TypeRef> =
    Lazy::new(|| COMBINATION_NS.class("CombinationComponent", &[COMPONENT.clone(), SENSOR.clone()]));

/// `type:` value and the C++ class implementing it.
const FOLDS: [(&str, &str); 7] = [
    ("kalman", "KalmanCombinationComponent"),
    ("linear", "LinearCombinationComponent"),
    ("max", "MaximumCombinationComponent"),
    ("mean", "MeanCombinationComponent"),
    ("median", "MedianCombinationComponent"),
    ("min", "MinimumCombinationComponent"),
    ("range", "RangeCombinationComponent"),
];

/// Folds without per-source settings.
const PLAIN: [&str; 5] = ["max", "mean", "median", "min", "range"];

fn fold_class(name: &str) -> TypeRef {
    let class = FOLDS.iter().find(|(key, _)| *key == name).map_or("CombinationComponent", |(_, class)| class);
    COMBINATION_NS.class(class, &[COMBINATION_COMPONENT.clone()])
}

fn sources(extra: Vec<Field>) -> Field {
    let mut fields = vec![Field::required("source", use_id(&SENSOR))];
    fields.extend(extra);
    Field::required("sources", ensure_list_bounded(Schema::mapping(fields), Some(1), None))
}

fn base(name: &str) -> Schema {
    sensor_schema(&fold_class(name)).extend(&component_schema())
}

fn branch_schema(name: &str) -> Schema {
    match name {
        "kalman" => base(name).extend_fields([
            sources(vec![Field::required("error", templatable(positive_float()))]),
            Field::required("process_std_dev", positive_float()),
            Field::optional("std_dev", sensor_schema(&SENSOR)),
        ]),
        "linear" => base(name).extend_fields([sources(vec![Field::required("coefficient", templatable(float_()))])]),
        _ => base(name).extend_fields([sources(Vec::new())]),
    }
}

pub fn config_schema() -> Schema {
    let names = FOLDS.iter().map(|(name, _)| *name);
    typed_schema("type", names.map(|name| (name, branch_schema(name))).collect::<Vec<_>>(), None)
}

/// Display properties come from the first source unless set here.
fn inherit_from_first_source(own: &ConfigValue, root: &ConfigValue) -> VResult {
    let mut out = own.clone();
    let first = own
        .get("sources")
        .and_then(ConfigValue::as_seq)
        .and_then(|s| s.first())
        .and_then(|s| s.get("source"))
        .and_then(ConfigValue::as_id)
        .and_then(|id| id.name())
        .map(str::to_string);
    if let (Some(first), Some(map)) = (first, out.as_map_mut()) {
        for property in INHERITED {
            inherit_property_from(map, root, &first, "source_id", property, Some);
        }
    }
    Ok(out)
}

async fn add_sources(
    cg: &Codegen,
    var: &Expression,
    config: &ConfigValue,
    weight: Option<&str>,
) -> CodegenResult<()> {
    for source in field(config, "sources")?.iter_list() {
        let mut args = vec![cg.get_variable(id_at(source, "source")?).await?];
        if let Some(key) = weight {
            args.push(cg.templatable(field(source, key)?, &value_args(), Some(&FLOAT)).await?);
        }
        cg.add(var.method("add_source", args));
    }
    Ok(())
}

fn to_code(cg: Codegen, config: ConfigValue) -> BuildFuture<()> {
    Box::pin(async move {
        let var = new_sensor(&cg, &config, vec![]).await?;
        cg.register_component(&var, &config).await?;
        match field(&config, "type")?.as_str().unwrap_or_default() {
            "kalman" => {
                add_sources(&cg, &var, &config, Some("error")).await?;
                let spread = field(&config, "process_std_dev")?.as_f64().unwrap_or_default();
                cg.add(var.method("set_process_std_dev", vec![Expression::float(spread)]));
                if let Some(std_dev) = config.get("std_dev") {
                    let sens = new_sensor(&cg, std_dev, vec![]).await?;
                    cg.add(var.method("set_std_dev_sensor", vec![sens]));
                }
            }
            "linear" => add_sources(&cg, &var, &config, Some("coefficient")).await?,
            name if PLAIN.contains(&name) => add_sources(&cg, &var, &config, None).await?,
            other => return Err(CodegenError::Expression(format!("unknown combination type '{other}'"))),
        }
        Ok(())
    })
}

pub fn register(catalog: &mut ComponentCatalog) -> Result<(), LoaderError> {
    catalog.add_platform(
        "sensor",
        ComponentDescriptor::new("combination")
            .schema(config_schema())
            .codeowners(&["@Cat-Ion", "@kahrendt"])
            .final_validate(inherit_from_first_source)
            .to_code(0.0, to_code),
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

    fn validate(raw: serde_json::Value) -> VResult {
        let registries = RegistrySet::standard();
        let loaded = BTreeSet::new();
        let target = Target::default();
        let ctx = ValidationContext::new(&registries, &loaded, &target);
        config_schema().validate(&ConfigValue::from_json(&raw), &ctx)
    }

    #[test]
    fn kalman_keys_are_rejected_under_mean() {
        let ok = validate(json!({"type": "mean", "name": "avg", "sources": [{"source": "s1"}, {"source": "s2"}]}))
            .unwrap();
        let id = ok.get("id").and_then(ConfigValue::as_id).unwrap();
        assert_eq!(id.type_tag.name(), "combination::MeanCombinationComponent");

        let err = validate(json!({
            "type": "mean", "name": "avg", "process_std_dev": 0.1,
            "sources": [{"source": "s1"}, {"source": "s2"}],
        }))
        .unwrap_err();
        assert_eq!(err.errors()[0].message, "extra keys not allowed");
        assert_eq!(err.errors()[0].path.to_string(), "process_std_dev");
    }

    #[test]
    fn kalman_sources_need_an_error() {
        let err = validate(json!({
            "type": "kalman", "name": "k", "process_std_dev": 0.01,
            "sources": [{"source": "s1"}],
        }))
        .unwrap_err();
        assert_eq!(err.errors()[0].path.to_string(), "sources[0].error");
    }
}
