//! Scalar validators.
use once_cell::sync::Lazy;
use ordered_float::OrderedFloat;
use regex::Regex;

use super::error::{VResult, invalid};
use super::{JsonHint, Schema, leaf};
use crate::ir::TypeRef;
use crate::value::{ConfigId, ConfigValue, Lambda};

/// C++ keywords plus names the generated `main.cpp` already uses.
const RESERVED_IDS: &[&str] = &[
    "alignas", "alignof", "and", "and_eq", "asm", "auto", "bitand", "bitor", "bool", "break", "case", "catch", "char",
    "char16_t", "char32_t", "class", "compl", "concept", "const", "constexpr", "const_cast", "continue", "decltype",
    "default", "delete", "do", "double", "dynamic_cast", "else", "enum", "explicit", "export", "extern", "false",
    "float", "for", "friend", "goto", "if", "inline", "int", "long", "mutable", "namespace", "new", "noexcept", "not",
    "not_eq", "nullptr", "operator", "or", "or_eq", "private", "protected", "public", "register",
    "reinterpret_cast", "requires", "return", "short", "signed", "sizeof", "static", "static_assert",
    "static_cast", "struct", "switch", "template", "this", "thread_local", "throw", "true", "try", "typedef",
    "typeid", "typename", "union", "unsigned", "using", "virtual", "void", "volatile", "wchar_t", "while", "xor",
    "xor_eq", "App", "pinMode", "delay", "delayMicroseconds", "digitalRead", "digitalWrite", "INPUT", "OUTPUT",
    "uint8_t", "uint16_t", "uint32_t", "uint64_t", "int8_t", "int16_t", "int32_t", "int64_t", "close", "pause",
    "sleep", "open", "setup", "loop", "esphome",
];

pub fn is_reserved_id(name: &str) -> bool {
    RESERVED_IDS.contains(&name)
}

pub fn validate_id_name(name: &str) -> Result<(), String> {
    let Some(first) = name.chars().next() else {
        return Err("ID must not be empty".into());
    };
    if first.is_ascii_digit() {
        return Err("First character in ID cannot be a digit.".into());
    }
    if name.contains('-') {
        return Err("Dashes are not supported in IDs, please use underscores instead.".into());
    }
    if let Some(bad) = name.chars().find(|c| !(c.is_ascii_alphanumeric() || *c == '_')) {
        return Err(format!(
            "IDs must only consist of upper/lowercase characters, the underscore character and numbers. The character '{bad}' cannot be used"
        ));
    }
    if is_reserved_id(name) {
        return Err(format!("ID '{name}' is reserved internally and cannot be used"));
    }
    Ok(())
}

pub fn validate_id(value: &ConfigValue, ty: &TypeRef, declare: bool) -> VResult {
    let name = match value {
        ConfigValue::Null => None,
        ConfigValue::Id(id) => return Ok(ConfigValue::Id(id.clone())),
        ConfigValue::Str(s) => {
            validate_id_name(s).map_err(invalid)?;
            Some(s.clone())
        }
        other => return Err(invalid(format!("IDs must be strings, got {}", other.kind()))),
    };
    let id = if declare { ConfigId::declare(name, ty.clone()) } else { ConfigId::reference(name, ty.clone()) };
    Ok(ConfigValue::Id(id))
}

/// Plain strings are taken as lambda source; only templatable fields need the tag.
pub fn validate_lambda(value: &ConfigValue, returning: bool) -> VResult {
    let lambda = match value {
        ConfigValue::Lambda(lambda) => lambda.clone(),
        ConfigValue::Str(source) => Lambda::new(source.clone()),
        other => return Err(invalid(format!("This value must be a lambda, got {}", other.kind()))),
    };
    for name in lambda.requires_ids() {
        validate_id_name(&name).map_err(invalid)?;
    }
    if returning && !lambda.source().contains("return") {
        return Err(invalid(
            "Lambda doesn't contain a 'return' statement, but the lambda is expected to return a value.",
        ));
    }
    Ok(ConfigValue::Lambda(lambda))
}

// --------------------------------- Basic ---------------------------------- //

fn as_bool(value: &ConfigValue) -> Option<bool> {
    match value {
        ConfigValue::Bool(b) => Some(*b),
        ConfigValue::Str(s) => match s.to_lowercase().as_str() {
            "true" | "yes" | "on" | "enable" => Some(true),
            "false" | "no" | "off" | "disable" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

pub fn boolean() -> Schema {
    leaf("boolean", JsonHint::Boolean, |value, _| {
        as_bool(value).map(ConfigValue::Bool).ok_or_else(|| {
            invalid(format!(
                "Expected boolean value, but cannot convert {} to a boolean. Please use 'true' or 'false'",
                value.display_scalar()
            ))
        })
    })
}

/// Any scalar, rendered as a string.
pub fn string() -> Schema {
    leaf("string", JsonHint::String, |value, _| match value {
        ConfigValue::Map(_) | ConfigValue::Seq(_) => Err(invalid("string value cannot be dictionary or list.")),
        ConfigValue::Null => Err(invalid("string value is None")),
        ConfigValue::Str(_) => Ok(value.clone()),
        other => Ok(ConfigValue::Str(other.display_scalar())),
    })
}

pub fn string_strict() -> Schema {
    leaf("string", JsonHint::String, |value, _| match value {
        ConfigValue::Str(_) => Ok(value.clone()),
        other => Err(invalid(format!(
            "Must be string, got {}. did you forget putting quotes around the value?",
            other.kind()
        ))),
    })
}

fn to_int(value: &ConfigValue) -> Option<i64> {
    match value {
        ConfigValue::Int(i) => Some(*i),
        ConfigValue::Float(f) if f.0.fract() == 0.0 => Some(f.0 as i64),
        ConfigValue::Str(s) => {
            let s = s.trim();
            match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
                Some(hex) => i64::from_str_radix(hex, 16).ok(),
                None => s.parse().ok(),
            }
        }
        _ => None,
    }
}

fn to_float(value: &ConfigValue) -> Option<f64> {
    match value {
        ConfigValue::Str(s) => s.trim().parse().ok(),
        other => other.as_f64(),
    }
}

pub fn int_() -> Schema {
    leaf("int", JsonHint::Integer, |value, _| {
        to_int(value).map(ConfigValue::Int).ok_or_else(|| invalid("expected integer"))
    })
}

pub fn float_() -> Schema {
    leaf("float", JsonHint::Number, |value, _| {
        to_float(value).map(|f| ConfigValue::Float(OrderedFloat(f))).ok_or_else(|| invalid("expected float"))
    })
}

pub fn int_range(min: Option<i64>, max: Option<i64>) -> Schema {
    leaf("int", JsonHint::Integer, move |value, _| {
        let i = to_int(value).ok_or_else(|| invalid("expected integer"))?;
        check_range(i as f64, min.map(|m| m as f64), max.map(|m| m as f64))?;
        Ok(ConfigValue::Int(i))
    })
}

pub fn float_range(min: Option<f64>, max: Option<f64>) -> Schema {
    leaf("float", JsonHint::Number, move |value, _| {
        let f = to_float(value).ok_or_else(|| invalid("expected float"))?;
        check_range(f, min, max)?;
        Ok(ConfigValue::Float(OrderedFloat(f)))
    })
}

fn check_range(v: f64, min: Option<f64>, max: Option<f64>) -> VResult<()> {
    if let Some(min) = min {
        if v < min {
            return Err(invalid(format!("value must be at least {min}")));
        }
    }
    if let Some(max) = max {
        if v > max {
            return Err(invalid(format!("value must be at most {max}")));
        }
    }
    Ok(())
}

pub fn positive_float() -> Schema {
    float_range(Some(0.0), None)
}

pub fn positive_int() -> Schema {
    int_range(Some(0), None)
}

pub fn positive_not_null_int() -> Schema {
    int_range(Some(1), None)
}

pub fn uint8() -> Schema {
    int_range(Some(0), Some(255))
}

pub fn port() -> Schema {
    int_range(Some(1), Some(65535))
}

/// `"50%"`, `0.5` or `"0.5"`, as a float in `0..=1`.
pub fn percentage() -> Schema {
    leaf("percentage", JsonHint::Any, |value, _| {
        let raw = match value {
            ConfigValue::Str(s) if s.trim_end().ends_with('%') => {
                let number = s.trim_end().trim_end_matches('%').trim_end();
                number.parse::<f64>().map(|f| f / 100.0).map_err(|_| invalid("invalid percentage"))?
            }
            other => {
                let f = to_float(other).ok_or_else(|| invalid("expected percentage"))?;
                if f > 1.0 {
                    return Err(invalid(
                        "Percentages above 1 must be given with a percent sign, like '50%'",
                    ));
                }
                f
            }
        };
        if !(0.0..=1.0).contains(&raw) {
            return Err(invalid("Percentage must be in range 0% to 100%"));
        }
        Ok(ConfigValue::Float(OrderedFloat(raw)))
    })
}

pub fn zero_to_one_float() -> Schema {
    leaf("float", JsonHint::Number, |value, _| {
        let f = to_float(value).ok_or_else(|| invalid("expected float"))?;
        if !(0.0..=1.0).contains(&f) {
            return Err(invalid("Value must be in range 0 to 1"));
        }
        Ok(ConfigValue::Float(OrderedFloat(f)))
    })
}

/// `"100kHz"`, `"1MHz"`, `"400000"` in Hz.
pub fn frequency() -> Schema {
    leaf("frequency", JsonHint::Any, |value, _| {
        let hz = match value {
            ConfigValue::Str(s) => {
                let s = s.trim();
                let lower = s.to_lowercase();
                let (number, factor) = if let Some(n) = lower.strip_suffix("mhz") {
                    (n, 1e6)
                } else if let Some(n) = lower.strip_suffix("khz") {
                    (n, 1e3)
                } else if let Some(n) = lower.strip_suffix("hz") {
                    (n, 1.0)
                } else {
                    (lower.as_str(), 1.0)
                };
                number.trim().parse::<f64>().map(|f| f * factor).map_err(|_| {
                    invalid(format!("'{s}' is not a valid frequency"))
                })?
            }
            other => to_float(other).ok_or_else(|| invalid("expected frequency"))?,
        };
        if hz < 0.0 {
            return Err(invalid("frequency must not be negative"));
        }
        Ok(ConfigValue::Float(OrderedFloat(hz)))
    })
}

/// Integer, rendered as a hex literal in C++.
pub fn hex_int() -> Schema {
    leaf("hex_int", JsonHint::Any, |value, _| {
        let i = to_int(value).ok_or_else(|| invalid("expected integer"))?;
        Ok(ConfigValue::Int(i))
    })
}

/// I2C and similar 7-bit bus addresses.
pub fn i2c_address() -> Schema {
    leaf("i2c_address", JsonHint::Any, |value, _| {
        let i = to_int(value).ok_or_else(|| invalid("expected integer"))?;
        if !(0..=0x7F).contains(&i) {
            return Err(invalid(format!("I2C address 0x{i:02X} is out of range 0x00-0x7F")));
        }
        Ok(ConfigValue::Int(i))
    })
}

static ICON: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[\w\-]+:[\w\-]+$").expect("static pattern"));

pub fn icon() -> Schema {
    leaf("icon", JsonHint::String, |value, _| {
        let s = value.as_str().ok_or_else(|| invalid("icon must be a string"))?;
        if s.is_empty() || ICON.is_match(s) {
            return Ok(value.clone());
        }
        Err(invalid("Icons must match the format '[icon pack]:[icon]', e.g. 'mdi:home-assistant'"))
    })
}

/// Device hostname: lowercase letters, digits and hyphens, at most 31 chars.
pub fn hostname() -> Schema {
    leaf("hostname", JsonHint::String, |value, _| {
        let s = value.as_str().ok_or_else(|| invalid("name must be a string"))?;
        if s.is_empty() || s.len() > 31 {
            return Err(invalid("Hostnames can only be 1 to 31 characters long"));
        }
        if let Some(bad) = s.chars().find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-' || *c == '_')) {
            return Err(invalid(format!(
                "'{bad}' is an invalid character for names. Valid characters are: abcdefghijklmnopqrstuvwxyz0123456789-_ (lowercase, no spaces)"
            )));
        }
        Ok(value.clone())
    })
}

pub fn mac_address() -> Schema {
    leaf("mac_address", JsonHint::String, |value, _| {
        let s = value.as_str().ok_or_else(|| invalid("MAC address must be a string"))?;
        let parts: Vec<&str> = s.split(':').collect();
        let ok = parts.len() == 6 && parts.iter().all(|p| p.len() == 2 && u8::from_str_radix(p, 16).is_ok());
        if !ok {
            return Err(invalid("MAC Address must be format XX:XX:XX:XX:XX:XX"));
        }
        Ok(ConfigValue::Str(s.to_uppercase()))
    })
}

// ------------------------------ Key checks -------------------------------- //

fn present<'a>(value: &ConfigValue, keys: &'a [String]) -> Vec<&'a str> {
    let Some(map) = value.as_map() else { return Vec::new() };
    keys.iter().filter(|k| map.contains_key(k.as_str())).map(String::as_str).collect()
}

fn owned(keys: &[&str]) -> Vec<String> {
    keys.iter().map(|k| k.to_string()).collect()
}

pub fn has_at_least_one_key(keys: &[&str]) -> Schema {
    let keys = owned(keys);
    leaf("has_at_least_one_key", JsonHint::Any, move |value, _| {
        if present(value, &keys).is_empty() {
            return Err(invalid(format!("Must contain at least one of {}.", keys.join(", "))));
        }
        Ok(value.clone())
    })
}

pub fn has_exactly_one_key(keys: &[&str]) -> Schema {
    let keys = owned(keys);
    leaf("has_exactly_one_key", JsonHint::Any, move |value, _| {
        if present(value, &keys).len() != 1 {
            return Err(invalid(format!("Must contain exactly one of {}.", keys.join(", "))));
        }
        Ok(value.clone())
    })
}

pub fn has_at_most_one_key(keys: &[&str]) -> Schema {
    let keys = owned(keys);
    leaf("has_at_most_one_key", JsonHint::Any, move |value, _| {
        if present(value, &keys).len() > 1 {
            return Err(invalid(format!("Cannot specify more than one of {}.", keys.join(", "))));
        }
        Ok(value.clone())
    })
}

pub fn has_none_or_all_keys(keys: &[&str]) -> Schema {
    let keys = owned(keys);
    leaf("has_none_or_all_keys", JsonHint::Any, move |value, _| {
        let count = present(value, &keys).len();
        if count != 0 && count != keys.len() {
            return Err(invalid(format!("Must specify either none or all of {}.", keys.join(", "))));
        }
        Ok(value.clone())
    })
}

/// Length bounds for strings and lists.
pub fn length(min: Option<usize>, max: Option<usize>) -> Schema {
    leaf("length", JsonHint::Any, move |value, _| {
        let len = match value {
            ConfigValue::Str(s) => s.chars().count(),
            ConfigValue::Seq(items) => items.len(),
            ConfigValue::Map(m) => m.len(),
            other => return Err(invalid(format!("{} has no length", other.kind()))),
        };
        if let Some(min) = min {
            if len < min {
                return Err(invalid(format!("length of value must be at least {min}")));
            }
        }
        if let Some(max) = max {
            if len > max {
                return Err(invalid(format!("length of value must be at most {max}")));
            }
        }
        Ok(value.clone())
    })
}

// ---------------------------- Suggestions --------------------------------- //

fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    for (i, ca) in a.iter().enumerate() {
        let mut row = vec![i + 1; b.len() + 1];
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            row[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(row[j] + 1);
        }
        prev = row;
    }
    prev[b.len()]
}

/// Best option with at least 60% similarity.
pub fn closest_match<'a>(value: &str, options: &[&'a str]) -> Option<&'a str> {
    options
        .iter()
        .map(|o| {
            let longest = value.chars().count().max(o.chars().count()).max(1);
            let similarity = 1.0 - edit_distance(value, o) as f64 / longest as f64;
            (*o, similarity)
        })
        .filter(|(_, s)| *s >= 0.6)
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(o, _)| o)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::types::COMPONENT;
    use crate::registry::RegistrySet;
    use crate::schema::ValidationContext;
    use crate::target::Target;
    use std::collections::BTreeSet;

    fn check(schema: &Schema, value: ConfigValue) -> VResult {
        let registries = RegistrySet::default();
        let loaded = BTreeSet::new();
        let target = Target::default();
        schema.validate(&value, &ValidationContext::new(&registries, &loaded, &target))
    }

    #[test]
    fn id_names_follow_identifier_rules() {
        assert!(validate_id_name("relay_1").is_ok());
        assert_eq!(validate_id_name("1relay").unwrap_err(), "First character in ID cannot be a digit.");
        assert!(validate_id_name("my-relay").unwrap_err().contains("Dashes"));
        assert!(validate_id_name("a.b").unwrap_err().contains("'.'"));
        assert!(validate_id_name("delay").unwrap_err().contains("reserved"));
    }

    #[test]
    fn ids_become_typed_handles() {
        let v = validate_id(&ConfigValue::from("relay"), &COMPONENT, true).unwrap();
        let id = v.as_id().unwrap();
        assert_eq!(id.name(), Some("relay"));
        assert!(id.is_manual && id.is_declaration);
        assert!(validate_id(&ConfigValue::Int(3), &COMPONENT, false).is_err());
    }

    #[test]
    fn booleans_accept_common_spellings() {
        assert_eq!(check(&boolean(), "ON".into()).unwrap(), ConfigValue::Bool(true));
        assert_eq!(check(&boolean(), "no".into()).unwrap(), ConfigValue::Bool(false));
        assert!(check(&boolean(), "maybe".into()).is_err());
    }

    #[test]
    fn numbers_and_ranges() {
        assert_eq!(check(&int_(), "0x10".into()).unwrap(), ConfigValue::Int(16));
        assert_eq!(check(&int_(), 2.0.into()).unwrap(), ConfigValue::Int(2));
        assert!(check(&int_(), 2.5.into()).is_err());
        assert!(check(&port(), ConfigValue::Int(0)).is_err());
        assert_eq!(check(&positive_float(), "1.5".into()).unwrap(), ConfigValue::from(1.5));
    }

    #[test]
    fn percentages_and_frequencies() {
        assert_eq!(check(&percentage(), "50%".into()).unwrap(), ConfigValue::from(0.5));
        assert_eq!(check(&percentage(), 0.25.into()).unwrap(), ConfigValue::from(0.25));
        assert!(check(&percentage(), ConfigValue::Int(50)).is_err());
        assert_eq!(check(&frequency(), "100kHz".into()).unwrap(), ConfigValue::from(100_000.0));
    }

    #[test]
    fn returning_lambdas_need_a_return() {
        let ok = ConfigValue::Lambda(Lambda::new("return id(x).state;"));
        assert!(validate_lambda(&ok, true).is_ok());
        let no_return = ConfigValue::Lambda(Lambda::new("id(x).publish_state(1);"));
        assert!(validate_lambda(&no_return, false).is_ok());
        assert!(validate_lambda(&no_return, true).is_err());
        let plain = validate_lambda(&"return 1;".into(), true).unwrap();
        assert_eq!(plain, ConfigValue::Lambda(Lambda::new("return 1;")));
        assert!(validate_lambda(&ConfigValue::Int(1), false).is_err());
    }

    #[test]
    fn key_presence_checks() {
        let schema = has_at_least_one_key(&["then", "else"]);
        assert!(check(&schema, ConfigValue::from_json(&serde_json::json!({"else": []}))).is_ok());
        assert!(check(&schema, ConfigValue::map()).is_err());
    }

    #[test]
    fn lengths_and_groups() {
        assert!(check(&length(Some(1), None), ConfigValue::Seq(vec![])).is_err());
        assert!(check(&length(None, Some(3)), "abc".into()).is_ok());
        let both = has_none_or_all_keys(&["min", "max"]);
        assert!(check(&both, ConfigValue::map()).is_ok());
        assert!(check(&both, ConfigValue::from_json(&serde_json::json!({"min": 1}))).is_err());
        assert_eq!(check(&i2c_address(), "0x20".into()).unwrap(), ConfigValue::Int(0x20));
        assert!(check(&i2c_address(), ConfigValue::Int(0x80)).is_err());
    }

    #[test]
    fn suggestions_require_similarity() {
        assert_eq!(closest_match("swtich", &["switch", "sensor"]), Some("switch"));
        assert_eq!(closest_match("xyz", &["switch", "sensor"]), None);
    }
}
