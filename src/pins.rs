//! GPIO pins: the chip's own pins, plus pins provided by expanders through
//! the pin registry (`{pcf8574: hub, number: 3}`).
use std::collections::BTreeMap;

use once_cell::sync::Lazy;

use crate::codegen::{Codegen, CodegenError, CodegenResult};
use crate::ir::types::{ESPHOME_NS, INTERNAL_GPIO_PIN};
use crate::ir::{Expression, TemplateArguments, TypeRef};
use crate::registry::{EntryCall, PINS};
use crate::schema::{
    Field, JsonHint, OneOfOptions, Schema, enum_, invalid, leaf, leaf::boolean, maybe_simple_value, registry_pin,
};
use crate::target::{Platform, Target};
use crate::validate::ConfigError;
use crate::value::{ConfigMap, ConfigPath, ConfigValue};

pub static ESP32_INTERNAL_GPIO_PIN: Lazy<TypeRef> =
    Lazy::new(|| ESPHOME_NS.namespace("esp32").class("ESP32InternalGPIOPin", &[INTERNAL_GPIO_PIN.clone()]));
pub static ESP8266_GPIO_PIN: Lazy<TypeRef> =
    Lazy::new(|| ESPHOME_NS.namespace("esp8266").class("ESP8266GPIOPin", &[INTERNAL_GPIO_PIN.clone()]));

fn internal_pin_type(target: &Target) -> &'static TypeRef {
    match target.platform {
        Some(Platform::Esp8266) => &ESP8266_GPIO_PIN,
        _ => &ESP32_INTERNAL_GPIO_PIN,
    }
}

/// `4`, `"GPIO4"`, `"4"` or a board alias such as `"D2"`.
pub fn gpio_number() -> Schema {
    leaf("gpio_number", JsonHint::Any, |value, ctx| {
        let number = match value {
            ConfigValue::Int(n) => *n,
            ConfigValue::Str(s) => {
                let upper = s.trim().to_ascii_uppercase();
                let parsed = match upper.strip_prefix("GPIO") {
                    Some(rest) => rest.parse::<i64>().ok(),
                    None => upper.parse::<i64>().ok().or_else(|| ctx.target.board_pin_alias(&upper)),
                };
                parsed.ok_or_else(|| invalid(format!("Invalid pin number: {s}")))?
            }
            other => return Err(invalid(format!("Expected a pin number, got {}", other.kind()))),
        };
        let max = ctx.target.platform.map_or(Platform::Esp32.max_gpio(), Platform::max_gpio);
        if !(0..=max).contains(&number) {
            return Err(invalid(format!("Invalid pin number: {number}, must be between 0 and {max}")));
        }
        Ok(ConfigValue::Int(number))
    })
}

pub fn pin_mode() -> Schema {
    enum_(
        [
            ("INPUT", "gpio::FLAG_INPUT".to_string()),
            ("OUTPUT", "gpio::FLAG_OUTPUT".to_string()),
            ("INPUT_PULLUP", "gpio::FLAG_INPUT | gpio::FLAG_PULLUP".to_string()),
            ("INPUT_PULLDOWN", "gpio::FLAG_INPUT | gpio::FLAG_PULLDOWN".to_string()),
            ("OUTPUT_OPEN_DRAIN", "gpio::FLAG_OUTPUT | gpio::FLAG_OPEN_DRAIN".to_string()),
        ],
        OneOfOptions::upper(),
    )
}

/// The pin's ID type depends on the chip; fix it up once the target is known.
fn retype_for_target() -> Schema {
    leaf("internal_pin_type", JsonHint::Any, |value, ctx| {
        let mut value = value.clone();
        if let Some(ConfigValue::Id(id)) = value.as_map_mut().and_then(|m| m.get_mut("id")) {
            id.type_tag = internal_pin_type(ctx.target).clone();
        }
        Ok(value)
    })
}

pub fn internal_gpio_pin_schema(default_mode: &str) -> Schema {
    let mapping = Schema::mapping([
        Field::generate_id(&INTERNAL_GPIO_PIN),
        Field::required("number", gpio_number()),
        Field::optional("mode", pin_mode()).with_default(default_mode),
        Field::optional("inverted", boolean()).with_default(false),
        Field::optional("allow_other_uses", boolean()).with_default(false),
    ])
    .with_validators([retype_for_target()]);
    maybe_simple_value(mapping, "number")
}

/// Internal pin, or any pin schema from the registry.
pub fn gpio_pin_schema(default_mode: &str) -> Schema {
    registry_pin(PINS, internal_gpio_pin_schema(default_mode))
}

pub fn gpio_output_pin_schema() -> Schema {
    gpio_pin_schema("OUTPUT")
}

pub fn gpio_input_pin_schema() -> Schema {
    gpio_pin_schema("INPUT")
}

/// Fields every expander pin schema carries besides its hub reference.
pub fn expander_pin_fields(pin_type: &TypeRef, max_number: i64) -> Vec<Field> {
    vec![
        Field::generate_id(pin_type),
        Field::required("number", crate::schema::leaf::int_range(Some(0), Some(max_number))),
        Field::optional("mode", pin_mode()),
        Field::optional("inverted", boolean()).with_default(false),
    ]
}

fn malformed(config: &ConfigValue) -> CodegenError {
    CodegenError::Expression(format!("malformed pin {}", config.display_scalar()))
}

/// `set_pin`, `set_inverted` and `set_flags` calls shared by every pin kind.
pub fn apply_pin_settings(cg: &Codegen, var: &Expression, config: &ConfigValue) {
    if let Some(number) = config.get("number").and_then(ConfigValue::as_i64) {
        cg.add(var.method("set_pin", vec![Expression::int(number)]));
    }
    if let Some(inverted) = config.get("inverted").and_then(ConfigValue::as_bool) {
        cg.add(var.method("set_inverted", vec![Expression::bool(inverted)]));
    }
    if let Some(mode) = config.get("mode").and_then(ConfigValue::as_enum) {
        cg.add(var.method("set_flags", vec![Expression::raw(format!("({})", mode.cpp))]));
    }
}

/// Declares the pin object for a validated pin config and returns it.
/// Expander pins suspend until their hub is declared.
pub async fn gpio_pin_expression(cg: &Codegen, config: &ConfigValue) -> CodegenResult<Expression> {
    let map = config.as_map().ok_or_else(|| malformed(config))?;
    let id = map.get("id").and_then(ConfigValue::as_id).cloned().ok_or_else(|| malformed(config))?;
    if let Some(builder) = map.keys().find_map(|k| cg.registry_builder(PINS, k)) {
        let call =
            EntryCall { config: config.clone(), id, template_arg: TemplateArguments::default(), args: Vec::new() };
        return builder(cg.clone(), call).await;
    }
    let var = cg.new_pvariable(&id, vec![])?;
    apply_pin_settings(cg, &var, config);
    Ok(var)
}

// --------------------------- Conflict checking ---------------------------- //

fn collect_internal_pins(value: &ConfigValue, path: &ConfigPath, out: &mut BTreeMap<i64, Vec<(ConfigPath, bool)>>) {
    match value {
        ConfigValue::Map(m) => {
            if let Some((number, shared)) = internal_pin(m) {
                out.entry(number).or_default().push((path.clone(), shared));
                return;
            }
            for (k, v) in m {
                collect_internal_pins(v, &path.child_key(k.as_str()), out);
            }
        }
        ConfigValue::Seq(items) => {
            for (i, v) in items.iter().enumerate() {
                collect_internal_pins(v, &path.child_index(i), out);
            }
        }
        _ => {}
    }
}

fn internal_pin(m: &ConfigMap) -> Option<(i64, bool)> {
    let id = m.get("id")?.as_id()?;
    if !id.type_tag.inherits_from(&INTERNAL_GPIO_PIN) {
        return None;
    }
    Some((m.get("number")?.as_i64()?, m.get("allow_other_uses")?.as_bool()?))
}

/// A chip pin may only be used once, unless every use opts in with
/// `allow_other_uses`.
pub fn check_pin_conflicts(root: &ConfigMap) -> Vec<ConfigError> {
    let mut uses = BTreeMap::new();
    for (key, value) in root {
        collect_internal_pins(value, &ConfigPath::key(key.as_str()), &mut uses);
    }
    let mut errors = Vec::new();
    for (number, places) in uses {
        if places.len() < 2 || places.iter().all(|(_, shared)| *shared) {
            continue;
        }
        for (path, _) in places.into_iter().skip(1) {
            errors.push(ConfigError::InvalidConfig {
                path,
                message: format!(
                    "Pin {number} is used in multiple places. Set 'allow_other_uses: true' on every use to share it."
                ),
            });
        }
    }
    errors
}
