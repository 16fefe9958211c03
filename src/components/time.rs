//! `time:` platform domain: real-time clocks and the `on_time` cron
//! triggers hanging off them.
use std::collections::BTreeSet;

use once_cell::sync::Lazy;

use super::{field, id_at, own_id};
use crate::automation::{build_automation, build_triggers, validate_automation};
use crate::codegen::{BuildFuture, Codegen, CodegenResult};
use crate::ir::types::{COMPONENT, ESPHOME_NS, POLLING_COMPONENT, TRIGGER};
use crate::ir::{AutomationArgs, Expression, Namespace, TypeRef};
use crate::loader::{ComponentCatalog, ComponentDescriptor, LoaderError};
use crate::schema::common::polling_component_schema;
use crate::schema::leaf::string_strict;
use crate::schema::time::time_of_day;
use crate::schema::{Field, JsonHint, Schema, VResult, ensure_list_bounded, invalid, leaf};
use crate::value::{ConfigMap, ConfigValue};

pub static TIME_NS: Lazy<Namespace> = Lazy::new(|| ESPHOME_NS.namespace("time"));
pub static REAL_TIME_CLOCK: Lazy<TypeRef> =
    Lazy::new(|| TIME_NS.class("RealTimeClock", &[POLLING_COMPONENT.clone()]));
pub static CRON_TRIGGER: Lazy<TypeRef> =
    Lazy::new(|| TIME_NS.class("CronTrigger", &[TRIGGER.clone(), COMPONENT.clone()]));
pub static SYNC_TRIGGER: Lazy<TypeRef> = Lazy::new(|| TIME_NS.class("SyncTrigger", &[TRIGGER.clone()]));

pub static SNTP_COMPONENT: Lazy<TypeRef> =
    Lazy::new(|| ESPHOME_NS.namespace("sntp").class("SNTPComponent", &[REAL_TIME_CLOCK.clone()]));
pub static HOMEASSISTANT_TIME: Lazy<TypeRef> = Lazy::new(|| {
    ESPHOME_NS.namespace("homeassistant").class("HomeassistantTime", &[REAL_TIME_CLOCK.clone()])
});

// --------------------------------- Cron ----------------------------------- //

/// One cron field: key, lowest and highest value, and names usable in place
/// of numbers (indexed from the lowest value).
struct CronField {
    key: &'static str,
    min: i64,
    max: i64,
    names: &'static [&'static str],
}

const DAYS: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];
const MONTHS: [&str; 12] = ["JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC"];

/// In `cron:` string order.
static CRON_FIELDS: [CronField; 6] = [
    CronField { key: "seconds", min: 0, max: 59, names: &[] },
    CronField { key: "minutes", min: 0, max: 59, names: &[] },
    CronField { key: "hours", min: 0, max: 23, names: &[] },
    CronField { key: "days_of_month", min: 1, max: 31, names: &[] },
    CronField { key: "months", min: 1, max: 12, names: &MONTHS },
    CronField { key: "days_of_week", min: 1, max: 7, names: &DAYS },
];

impl CronField {
    fn number(&self, raw: &str) -> Result<i64, String> {
        let upper = raw.trim().to_ascii_uppercase();
        if let Some(i) = self.names.iter().position(|n| *n == upper) {
            return Ok(self.min + i as i64);
        }
        let n: i64 = upper.parse().map_err(|_| format!("Invalid {} value '{raw}'", self.key))?;
        if !(self.min..=self.max).contains(&n) {
            return Err(format!("{} value {n} is out of range [{}, {}]", self.key, self.min, self.max));
        }
        Ok(n)
    }

    /// `*`, `?`, `5`, `MON-FRI`, `*/15`, `10/5` and comma lists of those.
    fn parse(&self, spec: &str) -> Result<BTreeSet<i64>, String> {
        let mut out = BTreeSet::new();
        for part in spec.split(',').map(str::trim) {
            let (range, step) = match part.split_once('/') {
                Some((range, step)) => {
                    let step: i64 = step.trim().parse().map_err(|_| format!("Invalid step in '{part}'"))?;
                    if step <= 0 {
                        return Err(format!("Step must be positive in '{part}'"));
                    }
                    (range, step)
                }
                None => (part, 1),
            };
            let (start, end) = match range {
                "*" | "?" | "" => (self.min, self.max),
                r => match r.split_once('-') {
                    Some((a, b)) => (self.number(a)?, self.number(b)?),
                    None if part.contains('/') => (self.number(r)?, self.max),
                    None => {
                        let n = self.number(r)?;
                        (n, n)
                    }
                },
            };
            if start > end {
                return Err(format!("Range '{part}' of {} runs backwards", self.key));
            }
            out.extend((start..=end).step_by(step as usize));
        }
        Ok(out)
    }

    fn validate(&self, value: &ConfigValue) -> VResult {
        let mut all = BTreeSet::new();
        for item in value.iter_list() {
            let parsed = match item {
                ConfigValue::Int(n) => self.number(&n.to_string()).map(|n| BTreeSet::from([n])),
                ConfigValue::Str(s) => self.parse(s),
                other => Err(format!("Expected a {} value, got {}", self.key, other.kind())),
            };
            all.extend(parsed.map_err(invalid)?);
        }
        Ok(ConfigValue::Seq(all.into_iter().map(ConfigValue::Int).collect()))
    }

    fn schema(&'static self) -> Schema {
        leaf("cron_field", JsonHint::Any, move |value, _| self.validate(value))
    }
}

/// `"0 /5 * * * *"`: seconds, minutes, hours, days of month, months, days of week.
fn cron_expression() -> Schema {
    leaf("cron_expression", JsonHint::String, |value, _| {
        let s = value.as_str().ok_or_else(|| invalid("cron expression must be a string"))?;
        let parts: Vec<&str> = s.split_whitespace().collect();
        if parts.len() != CRON_FIELDS.len() {
            return Err(invalid(format!(
                "Cron expression '{s}' must have {} fields (seconds minutes hours days-of-month months days-of-week)",
                CRON_FIELDS.len()
            )));
        }
        let mut out = ConfigMap::new();
        for (field, part) in CRON_FIELDS.iter().zip(parts) {
            let values = field.validate(&ConfigValue::from(part)).map_err(|e| e.under_key(field.key))?;
            out.insert(field.key.to_string(), values);
        }
        Ok(ConfigValue::Map(out))
    })
}

/// `at: "14:30"` fixes seconds, minutes and hours.
fn at_schema() -> Schema {
    let time = time_of_day();
    leaf("at", JsonHint::String, move |value, ctx| {
        let parsed = time.validate(value, ctx)?;
        let mut out = ConfigMap::new();
        for (key, part) in [("seconds", "second"), ("minutes", "minute"), ("hours", "hour")] {
            let n = parsed.get(part).cloned().unwrap_or(ConfigValue::Int(0));
            out.insert(key.to_string(), ConfigValue::Seq(vec![n]));
        }
        Ok(ConfigValue::Map(out))
    })
}

/// `cron:` and `at:` each exclude the per-field keys they set; with neither
/// at least one per-field key is needed.
fn merge_cron_keys() -> Schema {
    leaf("cron_keys", JsonHint::Any, |value, _| {
        let Some(map) = value.as_map() else { return Ok(value.clone()) };
        let per_field: Vec<&str> = CRON_FIELDS.iter().map(|f| f.key).filter(|k| map.contains_key(*k)).collect();
        for (shorthand, excludes) in [("cron", &CRON_FIELDS[..]), ("at", &CRON_FIELDS[..3])] {
            let Some(expanded) = map.get(shorthand) else { continue };
            if shorthand == "at" && map.contains_key("cron") {
                return Err(invalid("Cannot use option at with cron!"));
            }
            if let Some(key) = excludes.iter().map(|f| f.key).find(|k| per_field.contains(k)) {
                return Err(invalid(format!("Cannot use option {key} when {shorthand}: is specified.")));
            }
            let mut out = map.clone();
            out.shift_remove(shorthand);
            if let Some(fields) = expanded.as_map() {
                out.extend(fields.clone());
            }
            return Ok(ConfigValue::Map(out));
        }
        if per_field.is_empty() {
            let keys: Vec<&str> = CRON_FIELDS.iter().map(|f| f.key).chain(["cron", "at"]).collect();
            return Err(invalid(format!("Must contain at least one of {}.", keys.join(", "))));
        }
        Ok(value.clone())
    })
}

fn on_time_schema() -> Schema {
    let mut fields = vec![Field::generate_id_at("trigger_id", &CRON_TRIGGER)];
    fields.extend(CRON_FIELDS.iter().map(|f| Field::optional(f.key, f.schema())));
    fields.push(Field::optional("cron", cron_expression()));
    fields.push(Field::optional("at", at_schema()));
    validate_automation(Some(Schema::mapping(fields).with_validators([merge_cron_keys()])), false)
}

/// Fields of every clock; `ty` is the platform's class.
pub fn time_schema(ty: &TypeRef) -> Schema {
    Schema::mapping([
        Field::generate_id(ty),
        Field::optional("timezone", string_strict()),
        Field::optional("on_time", on_time_schema()),
        Field::optional(
            "on_time_sync",
            validate_automation(Some(Schema::mapping([Field::generate_id_at("trigger_id", &SYNC_TRIGGER)])), false),
        ),
    ])
    .extend(&polling_component_schema("15min"))
}

// -------------------------------- Codegen --------------------------------- //

/// Timezone plus `on_time`/`on_time_sync` triggers of a declared clock.
pub async fn setup_time(cg: &Codegen, var: &Expression, config: &ConfigValue) -> CodegenResult<()> {
    if let Some(tz) = config.get("timezone").and_then(ConfigValue::as_str) {
        cg.add(var.method("set_timezone", vec![Expression::string(tz)]));
    }
    if let Some(automations) = config.get("on_time") {
        for conf in automations.iter_list() {
            let trigger = cg.new_pvariable(id_at(conf, "trigger_id")?, vec![var.clone()])?;
            for f in &CRON_FIELDS {
                let values: Vec<Expression> = match conf.get(f.key) {
                    Some(list) => {
                        list.iter_list().into_iter().filter_map(ConfigValue::as_i64).map(Expression::int).collect()
                    }
                    None => (f.min..=f.max).map(Expression::int).collect(),
                };
                cg.add(trigger.method(&format!("add_{}", f.key), vec![Expression::Array(values)]));
            }
            cg.register_component(&trigger, conf).await?;
            build_automation(cg, &trigger, &AutomationArgs::new(), conf).await?;
        }
    }
    build_triggers(cg, config, "on_time_sync", &AutomationArgs::new(), |_| vec![var.clone()]).await?;
    cg.add_define("USE_TIME", None);
    Ok(())
}

fn sntp_to_code(cg: Codegen, config: ConfigValue) -> BuildFuture<()> {
    Box::pin(async move {
        let var = cg.new_pvariable(own_id(&config)?, vec![])?;
        let servers: Vec<Expression> = field(&config, "servers")?
            .iter_list()
            .into_iter()
            .filter_map(ConfigValue::as_str)
            .map(Expression::string)
            .collect();
        cg.add(var.method("set_servers", servers));
        cg.register_component(&var, &config).await?;
        setup_time(&cg, &var, &config).await
    })
}

fn homeassistant_to_code(cg: Codegen, config: ConfigValue) -> BuildFuture<()> {
    Box::pin(async move {
        let var = cg.new_pvariable(own_id(&config)?, vec![])?;
        cg.register_component(&var, &config).await?;
        setup_time(&cg, &var, &config).await
    })
}

fn sntp_schema() -> Schema {
    let default_servers: Vec<ConfigValue> =
        ["0.pool.ntp.org", "1.pool.ntp.org", "2.pool.ntp.org"].into_iter().map(ConfigValue::from).collect();
    time_schema(&SNTP_COMPONENT).extend_fields([
        Field::optional("servers", ensure_list_bounded(string_strict(), Some(1), Some(3))).with_default(default_servers)
    ])
}

pub fn register(catalog: &mut ComponentCatalog) -> Result<(), LoaderError> {
    catalog.add_component(ComponentDescriptor::new("time").platform_component())?;
    catalog.add_platform("time", ComponentDescriptor::new("sntp").schema(sntp_schema()).to_code(0.0, sntp_to_code))?;
    catalog.add_platform(
        "time",
        ComponentDescriptor::new("homeassistant")
            .schema(time_schema(&HOMEASSISTANT_TIME))
            .to_code(0.0, homeassistant_to_code),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::RegistrySet;
    use crate::schema::ValidationContext;
    use crate::target::Target;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn ints(values: &[i64]) -> ConfigValue {
        ConfigValue::Seq(values.iter().copied().map(ConfigValue::Int).collect())
    }

    #[test]
    fn cron_fields_expand() {
        let dow = &CRON_FIELDS[5];
        assert_eq!(dow.validate(&"MON-FRI".into()).unwrap(), ints(&[2, 3, 4, 5, 6]));
        let minutes = &CRON_FIELDS[1];
        assert_eq!(minutes.validate(&"*/15".into()).unwrap(), ints(&[0, 15, 30, 45]));
        assert_eq!(minutes.validate(&"10/20".into()).unwrap(), ints(&[10, 30, 50]));
        let mixed = ConfigValue::Seq(vec![ConfigValue::Int(5), "1,2".into()]);
        assert_eq!(minutes.validate(&mixed).unwrap(), ints(&[1, 2, 5]));
        assert!(minutes.validate(&"60".into()).is_err());
        assert!(CRON_FIELDS[2].validate(&"20-4".into()).is_err());
    }

    #[test]
    fn shorthands_expand_and_exclude() {
        let mut registries = RegistrySet::standard();
        crate::automation::register_builtins(&mut registries).unwrap();
        let loaded = BTreeSet::new();
        let target = Target::default();
        let ctx = ValidationContext::new(&registries, &loaded, &target);
        let schema = time_schema(&SNTP_COMPONENT);

        let v = schema
            .validate(
                &ConfigValue::from_json(&json!({
                    "on_time": [
                        {"at": "14:30", "then": [{"delay": "1s"}]},
                        {"cron": "0 /5 * * * *", "then": [{"delay": "1s"}]},
                    ],
                })),
                &ctx,
            )
            .unwrap();
        let on_time = v.get("on_time").and_then(ConfigValue::as_seq).unwrap();
        assert_eq!(on_time[0].get("hours"), Some(&ints(&[14])));
        assert_eq!(on_time[0].get("seconds"), Some(&ints(&[0])));
        assert!(on_time[0].get("at").is_none());
        assert_eq!(on_time[1].get("minutes").and_then(ConfigValue::as_seq).map(<[_]>::len), Some(12));

        let err = schema
            .validate(
                &ConfigValue::from_json(&json!({
                    "on_time": {"at": "14:30", "hours": 3, "then": [{"delay": "1s"}]},
                })),
                &ctx,
            )
            .unwrap_err();
        assert!(err.mentions("Cannot use option hours when at: is specified."), "{err:?}");
    }
}
