//! The mandatory `esphome:` block: node identity, build target and the
//! node-level automations.
use once_cell::sync::Lazy;

use super::field;
use crate::automation::{build_triggers, validate_automation};
use crate::codegen::{BuildFuture, Codegen, PlatformioOption};
use crate::ir::types::{COMPONENT, ESPHOME_NS, TRIGGER};
use crate::ir::{AutomationArgs, Expression, Library, TypeRef, app};
use crate::loader::{ComponentCatalog, ComponentDescriptor, LoaderError};
use crate::schema::leaf::{boolean, float_, hostname, string, string_strict};
use crate::schema::{Field, JsonHint, OneOfOptions, Schema, ensure_list, invalid, leaf, one_of};
use crate::target::Platform;
use crate::validate::CORE_KEY;
use crate::value::{ConfigMap, ConfigValue};

pub static STARTUP_TRIGGER: Lazy<TypeRef> =
    Lazy::new(|| ESPHOME_NS.class("StartupTrigger", &[TRIGGER.clone(), COMPONENT.clone()]));
pub static SHUTDOWN_TRIGGER: Lazy<TypeRef> =
    Lazy::new(|| ESPHOME_NS.class("ShutdownTrigger", &[TRIGGER.clone(), COMPONENT.clone()]));
pub static LOOP_TRIGGER: Lazy<TypeRef> =
    Lazy::new(|| ESPHOME_NS.class("LoopTrigger", &[TRIGGER.clone(), COMPONENT.clone()]));

const AUTOMATION_PRIORITY: f64 = 30.0;
const INCLUDES_PRIORITY: f64 = -1000.0;

fn trigger_fields(ty: &TypeRef, priority: Option<f64>) -> Schema {
    let mut fields = vec![Field::generate_id_at("trigger_id", ty)];
    if let Some(default) = priority {
        fields.push(Field::optional("priority", float_()).with_default(default));
    }
    Schema::mapping(fields)
}

/// `{key: value}` where each value is a string or a list of strings.
fn platformio_options() -> Schema {
    leaf("platformio_options", JsonHint::Any, |value, _| {
        let empty = ConfigMap::new();
        let map = match value {
            ConfigValue::Map(m) => m,
            ConfigValue::Null => &empty,
            other => return Err(invalid(format!("expected a dictionary, got {}", other.kind()))),
        };
        let mut out = ConfigMap::new();
        for (key, v) in map {
            let normalized = match v {
                ConfigValue::Seq(items) => {
                    ConfigValue::Seq(items.iter().map(|i| ConfigValue::Str(i.display_scalar())).collect())
                }
                ConfigValue::Map(_) | ConfigValue::Null => {
                    return Err(invalid(format!("platformio option '{key}' must be a string or a list")));
                }
                scalar => ConfigValue::Str(scalar.display_scalar()),
            };
            out.insert(key.clone(), normalized);
        }
        Ok(ConfigValue::Map(out))
    })
}

fn project_name() -> Schema {
    leaf("project_name", JsonHint::String, |value, _| {
        let name = value.as_str().ok_or_else(|| invalid("project name must be a string"))?;
        if !name.contains('.') {
            return Err(invalid(
                "project name needs to have a namespace, e.g. 'acme.kitchen_sensor'",
            ));
        }
        Ok(value.clone())
    })
}

pub fn config_schema() -> Schema {
    Schema::mapping([
        Field::required("name", hostname()),
        Field::optional("friendly_name", string()),
        Field::optional("area", string()),
        Field::optional("comment", string()),
        Field::required("platform", one_of(["ESP32", "ESP8266"], OneOfOptions::upper())),
        Field::required("board", string_strict()),
        Field::optional("build_path", string()),
        Field::optional("platformio_options", platformio_options()).with_default(ConfigValue::map()),
        Field::optional("on_boot", validate_automation(Some(trigger_fields(&STARTUP_TRIGGER, Some(600.0))), false)),
        Field::optional("on_shutdown", validate_automation(Some(trigger_fields(&SHUTDOWN_TRIGGER, None)), false)),
        Field::optional("on_loop", validate_automation(Some(trigger_fields(&LOOP_TRIGGER, None)), false)),
        Field::optional("includes", ensure_list(string())).with_default(Vec::<ConfigValue>::new()),
        Field::optional("libraries", ensure_list(string())).with_default(Vec::<ConfigValue>::new()),
        Field::optional("name_add_mac_suffix", boolean()).with_default(false),
        Field::optional(
            "project",
            Schema::mapping([
                Field::required("name", project_name()),
                Field::required("version", string_strict()),
            ]),
        ),
    ])
}

// -------------------------------- Codegen --------------------------------- //

fn str_or_empty<'a>(config: &'a ConfigValue, key: &str) -> &'a str {
    config.get(key).and_then(ConfigValue::as_str).unwrap_or_default()
}

fn to_code(cg: Codegen, config: ConfigValue) -> BuildFuture<()> {
    Box::pin(async move {
        let name = field(&config, "name")?.display_scalar();
        cg.add_global(ESPHOME_NS.using_statement());
        cg.add(app().method(
            "pre_setup",
            vec![
                Expression::string(name.clone()),
                Expression::string(str_or_empty(&config, "friendly_name")),
                Expression::string(str_or_empty(&config, "area")),
                Expression::string(str_or_empty(&config, "comment")),
                Expression::raw(r#"__DATE__ ", " __TIME__"#),
                Expression::bool(config.get("name_add_mac_suffix").and_then(ConfigValue::as_bool).unwrap_or(false)),
            ],
        ));

        if let Some(platform) = field(&config, "platform")?.as_str().and_then(Platform::parse) {
            cg.add_platformio_option("platform", PlatformioOption::Value(platform.pio_platform().to_string()));
        }
        cg.add_platformio_option("board", PlatformioOption::Value(field(&config, "board")?.display_scalar()));
        cg.add_platformio_option("framework", PlatformioOption::Value("arduino".to_string()));
        if let Some(options) = config.get("platformio_options").and_then(ConfigValue::as_map) {
            for (key, value) in options {
                let option = match value {
                    ConfigValue::Seq(items) => {
                        PlatformioOption::List(items.iter().map(ConfigValue::display_scalar).collect())
                    }
                    scalar => PlatformioOption::Value(scalar.display_scalar()),
                };
                cg.add_platformio_option(key, option);
            }
        }

        for library in config.get("libraries").map(ConfigValue::iter_list).unwrap_or_default() {
            let spec = Library::parse(&library.display_scalar());
            cg.add_library(&spec.name, spec.version.as_deref())?;
        }

        if let Some(project) = config.get("project") {
            cg.add_define("ESPHOME_PROJECT_NAME", Some(Expression::string(str_or_empty(project, "name")).to_string()));
            cg.add_define(
                "ESPHOME_PROJECT_VERSION",
                Some(Expression::string(str_or_empty(project, "version")).to_string()),
            );
        }

        let automations = config.clone();
        let no_args = AutomationArgs::new();
        let job_cg = cg.clone();
        cg.add_job(AUTOMATION_PRIORITY, format!("{CORE_KEY}.automations"), Box::pin(async move {
            build_triggers(&job_cg, &automations, "on_boot", &no_args, |conf| {
                conf.get("priority").and_then(ConfigValue::as_f64).map(Expression::float).into_iter().collect()
            })
            .await?;
            build_triggers(&job_cg, &automations, "on_shutdown", &no_args, |_| vec![]).await?;
            build_triggers(&job_cg, &automations, "on_loop", &no_args, |_| vec![]).await
        }));

        let includes: Vec<String> = config
            .get("includes")
            .map(ConfigValue::iter_list)
            .unwrap_or_default()
            .into_iter()
            .map(ConfigValue::display_scalar)
            .collect();
        if !includes.is_empty() {
            let job_cg = cg.clone();
            cg.add_job(INCLUDES_PRIORITY, format!("{CORE_KEY}.includes"), Box::pin(async move {
                for include in includes {
                    job_cg.add_include(&include);
                }
                Ok(())
            }));
        }
        tracing::debug!(node = %name, "core block generated");
        Ok(())
    })
}

pub fn register(catalog: &mut ComponentCatalog) -> Result<(), LoaderError> {
    catalog.add_component(
        ComponentDescriptor::new(CORE_KEY)
            .schema(config_schema())
            .codeowners(&["@esphome/core"])
            .to_code(100.0, to_code),
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

    fn run(value: serde_json::Value) -> crate::schema::VResult {
        let mut registries = RegistrySet::standard();
        crate::automation::register_builtins(&mut registries).unwrap();
        let loaded = BTreeSet::new();
        let target = Target::default();
        let ctx = ValidationContext::new(&registries, &loaded, &target);
        config_schema().validate(&ConfigValue::from_json(&value), &ctx)
    }

    #[test]
    fn defaults_and_boot_priority() {
        let v = run(json!({
            "name": "node", "platform": "esp32", "board": "esp32dev",
            "on_boot": {"then": [{"delay": "1s"}]},
        }))
        .unwrap();
        assert_eq!(v.get("platform"), Some(&ConfigValue::from("ESP32")));
        assert_eq!(v.get("name_add_mac_suffix"), Some(&ConfigValue::Bool(false)));
        let boot = v.get("on_boot").and_then(|b| b.as_seq()).unwrap();
        assert_eq!(boot[0].get("priority").and_then(ConfigValue::as_f64), Some(600.0));
    }

    #[test]
    fn project_names_need_a_namespace() {
        let err = run(json!({
            "name": "node", "platform": "ESP8266", "board": "d1_mini",
            "project": {"name": "kitchen", "version": "1.0"},
        }))
        .unwrap_err();
        assert_eq!(err.errors()[0].path.to_string(), "project.name");
    }
}
