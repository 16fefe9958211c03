//! `logger:` plus the `logger.log` action.
use once_cell::sync::Lazy;

use super::{field, own_id};
use crate::automation::LAMBDA_ACTION;
use crate::codegen::{BuildFuture, Codegen};
use crate::ir::types::{COMPONENT, ESPHOME_NS, VOID};
use crate::ir::expr::cpp_string_escape;
use crate::ir::{Expression, Namespace, TypeRef};
use crate::loader::{ComponentCatalog, ComponentDescriptor, LoaderError};
use crate::registry::{ACTIONS, EntryCall, RegistrySet};
use crate::schema::leaf::{int_range, positive_int, string, string_strict};
use crate::schema::{Field, OneOfOptions, Schema, ensure_list, enum_, maybe_simple_value};
use crate::value::{ConfigValue, Lambda};

pub static LOGGER_NS: Lazy<Namespace> = Lazy::new(|| ESPHOME_NS.namespace("logger"));
pub static LOGGER: Lazy<TypeRef> = Lazy::new(|| LOGGER_NS.class("Logger", &[COMPONENT.clone()]));

const LEVELS: [(&str, &str, &str); 7] = [
    ("NONE", "ESPHOME_LOG_LEVEL_NONE", "ESP_LOGE"),
    ("ERROR", "ESPHOME_LOG_LEVEL_ERROR", "ESP_LOGE"),
    ("WARN", "ESPHOME_LOG_LEVEL_WARN", "ESP_LOGW"),
    ("INFO", "ESPHOME_LOG_LEVEL_INFO", "ESP_LOGI"),
    ("DEBUG", "ESPHOME_LOG_LEVEL_DEBUG", "ESP_LOGD"),
    ("VERBOSE", "ESPHOME_LOG_LEVEL_VERBOSE", "ESP_LOGV"),
    ("VERY_VERBOSE", "ESPHOME_LOG_LEVEL_VERY_VERBOSE", "ESP_LOGVV"),
];

fn log_level() -> Schema {
    enum_(LEVELS.iter().map(|(key, cpp, _)| (*key, cpp.to_string())), OneOfOptions::upper())
}

fn log_macro(level: &str) -> &'static str {
    LEVELS.iter().find(|(key, _, _)| *key == level).map_or("ESP_LOGD", |(_, _, m)| *m)
}

pub fn config_schema() -> Schema {
    Schema::mapping([
        Field::generate_id(&LOGGER),
        Field::optional("baud_rate", positive_int()).with_default(115200),
        Field::optional("tx_buffer_size", int_range(Some(0), Some(65535))).with_default(512),
        Field::optional("level", log_level()).with_default("DEBUG"),
    ])
}

fn to_code(cg: Codegen, config: ConfigValue) -> BuildFuture<()> {
    Box::pin(async move {
        let level = field(&config, "level")?.as_enum().map(|e| e.cpp.clone()).unwrap_or_default();
        let baud = field(&config, "baud_rate")?.as_i64().unwrap_or(115200);
        let buffer = field(&config, "tx_buffer_size")?.as_i64().unwrap_or(512);
        let log = cg.new_pvariable(own_id(&config)?, vec![Expression::int(baud), Expression::int(buffer)])?;
        cg.add(log.method("pre_setup", vec![]));
        cg.register_component(&log, &config).await?;
        cg.add_define("USE_LOGGER", None);
        cg.add_build_flag(&format!("-DESPHOME_LOG_LEVEL={level}"));
        Ok(())
    })
}

// ------------------------------ logger.log -------------------------------- //

fn log_action_schema() -> Schema {
    maybe_simple_value(
        Schema::mapping([
            Field::required("format", string()),
            Field::optional("args", ensure_list(string_strict())).with_default(Vec::<ConfigValue>::new()),
            Field::optional("level", log_level()).with_default("DEBUG"),
            Field::optional("tag", string()).with_default("main"),
        ]),
        "format",
    )
}

/// `ESP_LOGD("main", "fmt", args...);` wrapped in a lambda action.
fn log_action(cg: Codegen, call: EntryCall) -> BuildFuture<Expression> {
    Box::pin(async move {
        let level = field(&call.config, "level")?.as_enum().map(|e| e.key.clone()).unwrap_or_default();
        let tag = field(&call.config, "tag")?.display_scalar();
        let format = field(&call.config, "format")?.display_scalar();
        let mut parts = vec![cpp_string_escape(&tag), cpp_string_escape(&format)];
        parts.extend(field(&call.config, "args")?.iter_list().into_iter().map(ConfigValue::display_scalar));
        let body = Lambda::new(format!("{}({});", log_macro(&level), parts.join(", ")));
        let lambda = cg.process_lambda(&body, &call.args, "=", Some(&VOID)).await?;
        cg.new_pvariable_templated(&call.id, &call.template_arg, vec![lambda])
    })
}

pub fn register(catalog: &mut ComponentCatalog, registries: &mut RegistrySet) -> Result<(), LoaderError> {
    registries.register(ACTIONS, "logger.log", &LAMBDA_ACTION, log_action_schema(), log_action)?;
    catalog.add_component(ComponentDescriptor::new("logger").schema(config_schema()).to_code(90.0, to_code))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_map_to_macros() {
        assert_eq!(log_macro("WARN"), "ESP_LOGW");
        assert_eq!(log_macro("bogus"), "ESP_LOGD");
    }
}
