//! Time periods and times of day.
use chrono::{Datelike, NaiveDateTime, NaiveTime, Timelike};
use once_cell::sync::Lazy;
use regex::Regex;

use super::error::{VResult, invalid};
use super::{JsonHint, Schema, leaf};
use crate::value::{ConfigMap, ConfigValue, TimePeriod, TimeUnit};

/// `update_interval: never`, the scheduler's "don't run" sentinel.
pub const NEVER_MS: u64 = 4_294_967_295;

static UNIT_PERIOD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([-+]?[0-9]*\.?[0-9]*)\s*(\w*)$").expect("static pattern")
});

fn unit_nanos(unit: &str) -> Option<f64> {
    Some(match unit {
        "ns" | "nanoseconds" => 1.0,
        "us" | "µs" | "microseconds" => 1e3,
        "ms" | "milliseconds" => 1e6,
        "s" | "sec" | "secs" | "seconds" => 1e9,
        "min" | "mins" | "minutes" => 60e9,
        "h" | "hours" => 3600e9,
        "d" | "days" => 86_400e9,
        _ => return None,
    })
}

fn from_float_nanos(nanos: f64) -> VResult<TimePeriod> {
    if nanos < 0.0 {
        return Err(invalid("Time period must not be negative"));
    }
    if nanos >= u64::MAX as f64 {
        return Err(invalid("Time period too large"));
    }
    Ok(TimePeriod::from_nanos(nanos.round() as u64))
}

fn parse_unit_string(s: &str) -> VResult<TimePeriod> {
    let caps = UNIT_PERIOD
        .captures(s.trim())
        .ok_or_else(|| invalid(format!("Expected time period with unit, got {s}")))?;
    let number = &caps[1];
    let unit = &caps[2];
    if unit.is_empty() {
        return Err(invalid(format!(
            "Don't know what '{s}' means as it has no time *unit*! Did you mean '{s}s'?"
        )));
    }
    let factor = unit_nanos(unit).ok_or_else(|| {
        invalid(format!("Invalid time unit '{unit}', valid units are ns, us, ms, s, min, h, d"))
    })?;
    let amount: f64 = number.parse().map_err(|_| invalid(format!("Expected time period with unit, got {s}")))?;
    from_float_nanos(amount * factor)
}

/// `HH:MM:SS` or `HH:MM`.
fn parse_colon_string(s: &str) -> Option<VResult<TimePeriod>> {
    if !s.contains(':') {
        return None;
    }
    let parts: Result<Vec<u64>, _> = s.split(':').map(|p| p.trim().parse::<u64>()).collect();
    let (h, m, sec) = match parts.as_deref() {
        Ok(&[h, m, sec]) => (h, m, sec),
        Ok(&[h, m]) => (h, m, 0),
        _ => return Some(Err(invalid(format!("Invalid time period '{s}', expected HH:MM:SS")))),
    };
    let nanos = h
        .checked_mul(3600)
        .and_then(|h| m.checked_mul(60).and_then(|m| h.checked_add(m)))
        .and_then(|s| s.checked_add(sec))
        .and_then(|s| s.checked_mul(1_000_000_000));
    Some(nanos.map(TimePeriod::from_nanos).ok_or_else(|| invalid(format!("Time period '{s}' too large"))))
}

fn parse_dict(map: &ConfigMap) -> VResult<TimePeriod> {
    const KEYS: [(&str, f64); 6] = [
        ("days", 86_400e9),
        ("hours", 3600e9),
        ("minutes", 60e9),
        ("seconds", 1e9),
        ("milliseconds", 1e6),
        ("microseconds", 1e3),
    ];
    let mut nanos = 0.0;
    for (key, value) in map {
        let Some((_, factor)) = KEYS.iter().find(|(k, _)| k == key) else {
            return Err(invalid(format!("Invalid time period key '{key}'")).under_key(key));
        };
        let amount = value.as_f64().ok_or_else(|| invalid("expected a number").under_key(key))?;
        nanos += amount * factor;
    }
    from_float_nanos(nanos)
}

pub fn parse_time_period(value: &ConfigValue) -> VResult<TimePeriod> {
    match value {
        ConfigValue::Time(t) => Ok(*t),
        ConfigValue::Int(i) => Err(invalid(format!(
            "Don't know what '{i}' means as it has no time *unit*! Did you mean '{i}s'?"
        ))),
        ConfigValue::Float(f) => Err(invalid(format!(
            "Don't know what '{}' means as it has no time *unit*! Did you mean '{}s'?",
            f.0, f.0
        ))),
        ConfigValue::Str(s) => match parse_colon_string(s) {
            Some(result) => result,
            None => parse_unit_string(s),
        },
        ConfigValue::Map(m) => parse_dict(m),
        other => Err(invalid(format!("Expected time period, got {}", other.kind()))),
    }
}

pub fn time_period() -> Schema {
    leaf("time_period", JsonHint::Any, |value, _| parse_time_period(value).map(ConfigValue::Time))
}

fn positive_period(name: &'static str, unit: TimeUnit) -> Schema {
    leaf(name, JsonHint::Any, move |value, _| {
        let period = parse_time_period(value)?;
        if period.total_nanos() % unit.nanos() != 0 {
            let precision = match unit {
                TimeUnit::Nanoseconds => "nanoseconds",
                TimeUnit::Microseconds => "microseconds",
                TimeUnit::Milliseconds => "milliseconds",
                TimeUnit::Seconds => "seconds",
                TimeUnit::Minutes => "minutes",
            };
            return Err(invalid(format!("Maximum precision is {precision}")));
        }
        Ok(ConfigValue::Time(period.with_unit(unit)))
    })
}

pub fn positive_time_period_microseconds() -> Schema {
    positive_period("time_period", TimeUnit::Microseconds)
}

pub fn positive_time_period_milliseconds() -> Schema {
    positive_period("time_period", TimeUnit::Milliseconds)
}

pub fn positive_time_period_seconds() -> Schema {
    positive_period("time_period", TimeUnit::Seconds)
}

pub fn positive_time_period_minutes() -> Schema {
    positive_period("time_period", TimeUnit::Minutes)
}

/// Milliseconds, or `never`.
pub fn update_interval() -> Schema {
    let ms = positive_time_period_milliseconds();
    leaf("update_interval", JsonHint::Any, move |value, ctx| {
        if value.as_str().is_some_and(|s| s.eq_ignore_ascii_case("never")) {
            return Ok(ConfigValue::Time(TimePeriod::from_millis(NEVER_MS)));
        }
        ms.validate(value, ctx)
    })
}

/// `"14:30"`, `"14:30:05"`, `"2:30PM"` into `{hour, minute, second}`.
pub fn time_of_day() -> Schema {
    leaf("time_of_day", JsonHint::String, |value, _| {
        let s = value.as_str().ok_or_else(|| invalid("time of day must be a string"))?;
        let compact = s.trim().replace(' ', "").to_uppercase();
        let parsed = ["%H:%M:%S", "%H:%M", "%I:%M:%S%p", "%I:%M%p"]
            .iter()
            .find_map(|fmt| NaiveTime::parse_from_str(&compact, fmt).ok())
            .ok_or_else(|| invalid(format!("Invalid time of day '{s}', expected HH:MM or HH:MM:SS")))?;
        let mut out = ConfigMap::new();
        out.insert("hour".into(), ConfigValue::Int(parsed.hour() as i64));
        out.insert("minute".into(), ConfigValue::Int(parsed.minute() as i64));
        out.insert("second".into(), ConfigValue::Int(parsed.second() as i64));
        Ok(ConfigValue::Map(out))
    })
}

/// `"2024-05-01 14:30:00"` into date and time fields.
pub fn date_time() -> Schema {
    leaf("date_time", JsonHint::String, |value, _| {
        let s = value.as_str().ok_or_else(|| invalid("date and time must be a string"))?;
        let parsed = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M:%S"]
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(s.trim(), fmt).ok())
            .ok_or_else(|| invalid(format!("Invalid date and time '{s}', expected YYYY-MM-DD HH:MM:SS")))?;
        let mut out = ConfigMap::new();
        out.insert("year".into(), ConfigValue::Int(parsed.year() as i64));
        out.insert("month".into(), ConfigValue::Int(parsed.month() as i64));
        out.insert("day".into(), ConfigValue::Int(parsed.day() as i64));
        out.insert("hour".into(), ConfigValue::Int(parsed.hour() as i64));
        out.insert("minute".into(), ConfigValue::Int(parsed.minute() as i64));
        out.insert("second".into(), ConfigValue::Int(parsed.second() as i64));
        Ok(ConfigValue::Map(out))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unit_strings_parse() {
        let p = parse_time_period(&"500ms".into()).unwrap();
        assert_eq!(p.total_millis(), 500);
        assert_eq!(parse_time_period(&"1.5s".into()).unwrap().total_millis(), 1500);
        assert_eq!(parse_time_period(&"2 min".into()).unwrap().total_millis(), 120_000);
        assert_eq!(parse_time_period(&"100us".into()).unwrap().total_nanos(), 100_000);
    }

    #[test]
    fn bare_numbers_need_a_unit() {
        let err = parse_time_period(&ConfigValue::Int(5)).unwrap_err();
        assert!(err.errors()[0].message.contains("Did you mean '5s'?"));
        assert!(parse_time_period(&"5 parsecs".into()).is_err());
    }

    #[test]
    fn colon_and_dict_forms() {
        assert_eq!(parse_time_period(&"01:02:03".into()).unwrap().total_millis(), 3_723_000);
        let dict = ConfigValue::from_json(&json!({"minutes": 1, "seconds": 30}));
        assert_eq!(parse_time_period(&dict).unwrap().total_millis(), 90_000);
    }

    #[test]
    fn oversized_periods_are_invalid() {
        let err = parse_time_period(&"99999999999999999:00:00".into()).unwrap_err();
        assert!(err.errors()[0].message.contains("too large"), "{err}");
        let err = parse_time_period(&"99999999999999999999999d".into()).unwrap_err();
        assert!(err.errors()[0].message.contains("too large"), "{err}");
    }

    #[test]
    fn never_maps_to_the_sentinel() {
        let registries = crate::registry::RegistrySet::default();
        let loaded = Default::default();
        let target = Default::default();
        let ctx = crate::schema::ValidationContext::new(&registries, &loaded, &target);
        let v = update_interval().validate(&"never".into(), &ctx).unwrap();
        assert_eq!(v.as_time().map(|t| t.in_unit()), Some(NEVER_MS));
        let v = positive_time_period_seconds().validate(&"2min".into(), &ctx).unwrap();
        assert_eq!(v.as_time().map(|t| t.in_unit()), Some(120));
        assert!(positive_time_period_seconds().validate(&"1500ms".into(), &ctx).is_err());
    }

    #[test]
    fn times_of_day() {
        let registries = crate::registry::RegistrySet::default();
        let loaded = Default::default();
        let target = Default::default();
        let ctx = crate::schema::ValidationContext::new(&registries, &loaded, &target);
        let v = time_of_day().validate(&"2:30 PM".into(), &ctx).unwrap();
        assert_eq!(v.get("hour"), Some(&ConfigValue::Int(14)));
        assert_eq!(v.get("minute"), Some(&ConfigValue::Int(30)));
        assert!(time_of_day().validate(&"25:00".into(), &ctx).is_err());
        let v = date_time().validate(&"2024-05-01 07:08:09".into(), &ctx).unwrap();
        assert_eq!(v.get("month"), Some(&ConfigValue::Int(5)));
        assert_eq!(v.get("second"), Some(&ConfigValue::Int(9)));
    }
}
