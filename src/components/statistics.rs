//! `sensor: platform: statistics`: running mean, variance and trend of a
//! source sensor over a sliding window, each published as its own sensor.
use once_cell::sync::Lazy;

use super::sensor::{SENSOR, new_sensor, sensor_schema};
use super::time::REAL_TIME_CLOCK;
use super::{field, id_at, own_id};
use crate::codegen::{BuildFuture, Codegen};
use crate::entity::inherit_property_from;
use crate::ir::types::{COMPONENT, ESPHOME_NS};
use crate::ir::{Expression, Namespace, TypeRef};
use crate::loader::{ComponentCatalog, ComponentDescriptor, LoaderError};
use crate::schema::common::component_schema;
use crate::schema::leaf::{has_at_least_one_key, positive_not_null_int};
use crate::schema::{Field, OneOfOptions, Schema, VResult, enum_, use_id};
use crate::value::{ConfigMap, ConfigValue};

pub static STATISTICS_NS: Lazy<Namespace> = Lazy::new(|| ESPHOME_NS.namespace("statistics"));
pub static STATISTICS_COMPONENT: Lazy<TypeRef> =
    Lazy::new(|| STATISTICS_NS.class("StatisticsComponent", &[COMPONENT.clone()]));

const SOURCE: &str = "source_id";
const OUTPUTS: [(&str, &str); 3] =
    [("mean", "set_mean_sensor"), ("variance", "set_variance_sensor"), ("trend", "set_trend_sensor")];

/// Unit suffix and milliseconds per unit.
const TIME_UNITS: [(&str, &str, i64); 5] =
    [("ms", "ms", 1), ("s", "s", 1_000), ("min", "min", 60_000), ("h", "h", 3_600_000), ("d", "d", 86_400_000)];

fn time_unit() -> Schema {
    enum_(TIME_UNITS.iter().map(|(key, _, ms)| (*key, ms.to_string())), OneOfOptions::lower())
}

pub fn config_schema() -> Schema {
    Schema::mapping([
        Field::generate_id(&STATISTICS_COMPONENT),
        Field::required(SOURCE, use_id(&SENSOR)),
        Field::optional("window_size", positive_not_null_int()).with_default(15),
        Field::optional("send_every", positive_not_null_int()).with_default(15),
        Field::optional("send_first_at", positive_not_null_int()).with_default(1),
        Field::optional("time_id", use_id(&REAL_TIME_CLOCK)).with_default(ConfigValue::Null),
        Field::optional("time_unit", time_unit()).with_default("s"),
        Field::optional("mean", sensor_schema(&SENSOR)),
        Field::optional("variance", sensor_schema(&SENSOR)),
        Field::optional("trend", sensor_schema(&SENSOR)),
    ])
    .extend(&component_schema())
    .with_validators([has_at_least_one_key(&["mean", "variance", "trend"])])
}

// ----------------------------- Inheritance -------------------------------- //

const PLAIN: [&str; 4] = ["icon", "device_class", "state_class", "entity_category"];

fn inherit_output(output: &mut ConfigMap, root: &ConfigValue, source: &str, kind: &str, per: &str) {
    for property in PLAIN {
        inherit_property_from(output, root, source, SOURCE, property, Some);
    }
    let add_decimals = if kind == "mean" { 0 } else { 2 };
    inherit_property_from(output, root, source, SOURCE, "accuracy_decimals", |v| {
        v.as_i64().map(|d| ConfigValue::Int(d + add_decimals))
    });
    inherit_property_from(output, root, source, SOURCE, "unit_of_measurement", |v| {
        let unit = v.as_str()?;
        Some(ConfigValue::from(match kind {
            "variance" => format!("({unit})²"),
            "trend" => format!("{unit}/{per}"),
            _ => unit.to_string(),
        }))
    });
}

/// Mean keeps the source's properties; variance squares the unit and adds two
/// decimals; trend divides the unit by `time_unit`.
fn inherit_from_source(own: &ConfigValue, root: &ConfigValue) -> VResult {
    let mut out = own.clone();
    let source = own.get(SOURCE).and_then(ConfigValue::as_id).and_then(|id| id.name()).map(str::to_string);
    let per = own
        .get("time_unit")
        .and_then(ConfigValue::as_enum)
        .and_then(|unit| TIME_UNITS.iter().find(|(key, _, _)| *key == unit.key))
        .map_or("s", |(_, suffix, _)| suffix);
    let (Some(source), Some(map)) = (source, out.as_map_mut()) else { return Ok(out) };
    for (kind, _) in OUTPUTS {
        if let Some(output) = map.get_mut(kind).and_then(ConfigValue::as_map_mut) {
            inherit_output(output, root, &source, kind, per);
        }
    }
    Ok(out)
}

// -------------------------------- Codegen --------------------------------- //

fn to_code(cg: Codegen, config: ConfigValue) -> BuildFuture<()> {
    Box::pin(async move {
        let var = cg.new_pvariable(own_id(&config)?, vec![])?;
        cg.register_component(&var, &config).await?;
        let source = cg.get_variable(id_at(&config, SOURCE)?).await?;
        cg.add(var.method("set_source_sensor", vec![source]));
        for (key, setter) in
            [("window_size", "set_window_size"), ("send_every", "set_send_every"), ("send_first_at", "set_first_at")]
        {
            let n = field(&config, key)?.as_i64().unwrap_or(1);
            cg.add(var.method(setter, vec![Expression::int(n)]));
        }
        let clock = cg.get_variable(id_at(&config, "time_id")?).await?;
        cg.add(var.method("set_time", vec![clock]));
        if let Some(unit) = config.get("time_unit").and_then(ConfigValue::as_enum) {
            cg.add(var.method("set_time_conversion_factor", vec![Expression::raw(unit.cpp.clone())]));
        }
        for (key, setter) in OUTPUTS {
            if let Some(output) = config.get(key) {
                let sens = new_sensor(&cg, output, vec![]).await?;
                cg.add(var.method(setter, vec![sens]));
            }
        }
        Ok(())
    })
}

pub fn register(catalog: &mut ComponentCatalog) -> Result<(), LoaderError> {
    catalog.add_platform(
        "sensor",
        ComponentDescriptor::new("statistics")
            .schema(config_schema())
            .dependencies(&["time"])
            .codeowners(&["@kahrendt"])
            .final_validate(inherit_from_source)
            .to_code(0.0, to_code),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::ConfigId;

    fn map(pairs: Vec<(&str, ConfigValue)>) -> ConfigValue {
        ConfigValue::Map(pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
    }

    #[test]
    fn derived_units_and_decimals() {
        let source = map(vec![
            ("id", ConfigValue::Id(ConfigId::declare(Some("temp".into()), SENSOR.clone()))),
            ("unit_of_measurement", "°C".into()),
            ("accuracy_decimals", ConfigValue::Int(1)),
        ]);
        let minutes = ConfigValue::Enum(crate::value::EnumValue { key: "min".into(), cpp: "60000".into() });
        let own = map(vec![
            (SOURCE, ConfigValue::Id(ConfigId::reference(Some("temp".into()), SENSOR.clone()))),
            ("time_unit", minutes),
            ("mean", ConfigValue::map()),
            ("variance", ConfigValue::map()),
            ("trend", map(vec![("unit_of_measurement", "K/min".into())])),
        ]);
        let root = map(vec![("sensor", ConfigValue::Seq(vec![source]))]);

        let out = inherit_from_source(&own, &root).unwrap();
        let get = |kind: &str, key: &str| out.get(kind).and_then(|o| o.get(key)).cloned();
        assert_eq!(get("mean", "unit_of_measurement"), Some("°C".into()));
        assert_eq!(get("mean", "accuracy_decimals"), Some(ConfigValue::Int(1)));
        assert_eq!(get("variance", "unit_of_measurement"), Some("(°C)²".into()));
        assert_eq!(get("variance", "accuracy_decimals"), Some(ConfigValue::Int(3)));
        assert_eq!(get("trend", "unit_of_measurement"), Some("K/min".into()));
    }
}
