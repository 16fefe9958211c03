//! Configuration AST.
//!
//! The front-end never sees YAML. Input arrives as JSON (ordered, thanks to
//! `serde_json/preserve_order`) and is lifted into [`ConfigValue`]; validation
//! then replaces raw scalars with canonical forms (IDs, lambdas, time periods,
//! enum members) so code generators don't have to re-parse anything.
use std::fmt;

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use ordered_float::OrderedFloat;
use regex::Regex;
use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};
use serde_json::Value;

use crate::ir::TypeRef;

pub type ConfigMap = IndexMap<String, ConfigValue>;

/// Key used to mark a lambda in JSON input: `{"!lambda": "return 1;"}`.
pub const LAMBDA_TAG: &str = "!lambda";

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(OrderedFloat<f64>),
    Str(String),
    Map(ConfigMap),
    Seq(Vec<ConfigValue>),
    // ---- canonical forms, produced by validation only ----
    Id(ConfigId),
    Lambda(Lambda),
    Time(TimePeriod),
    Enum(EnumValue),
}

// ------------------------------- Paths ------------------------------------ //

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

/// Structural location inside the config tree, e.g. `sensor[0].filters[2]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConfigPath(Vec<PathSegment>);

impl ConfigPath {
    pub fn root() -> Self {
        Self(Vec::new())
    }
    pub fn key(key: impl Into<String>) -> Self {
        Self(vec![PathSegment::Key(key.into())])
    }
    pub fn index(index: usize) -> Self {
        Self(vec![PathSegment::Index(index)])
    }
    pub fn child_key(&self, key: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(PathSegment::Key(key.into()));
        Self(segments)
    }
    pub fn child_index(&self, index: usize) -> Self {
        let mut segments = self.0.clone();
        segments.push(PathSegment::Index(index));
        Self(segments)
    }
    /// `prefix ++ self`
    pub fn prefixed(&self, prefix: &ConfigPath) -> Self {
        let mut segments = prefix.0.clone();
        segments.extend(self.0.iter().cloned());
        Self(segments)
    }
    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }
    pub fn len(&self) -> usize {
        self.0.len()
    }
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
    pub fn first_key(&self) -> Option<&str> {
        match self.0.first() {
            Some(PathSegment::Key(k)) => Some(k),
            _ => None,
        }
    }
    pub fn last_key(&self) -> Option<&str> {
        self.0.iter().rev().find_map(|s| match s {
            PathSegment::Key(k) => Some(k.as_str()),
            PathSegment::Index(_) => None,
        })
    }
    pub fn parent(&self) -> Self {
        let mut segments = self.0.clone();
        segments.pop();
        Self(segments)
    }
    pub fn starts_with_key(&self, key: &str) -> bool {
        self.first_key() == Some(key)
    }
    /// Drops the leading segment; used when a wrapper key is synthetic.
    pub fn without_first(&self) -> Self {
        Self(self.0.iter().skip(1).cloned().collect())
    }
}

impl From<Vec<PathSegment>> for ConfigPath {
    fn from(segments: Vec<PathSegment>) -> Self {
        Self(segments)
    }
}

impl fmt::Display for ConfigPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("<root>");
        }
        for (i, segment) in self.0.iter().enumerate() {
            match segment {
                PathSegment::Key(k) if i == 0 => write!(f, "{k}")?,
                PathSegment::Key(k) => write!(f, ".{k}")?,
                PathSegment::Index(n) => write!(f, "[{n}]")?,
            }
        }
        Ok(())
    }
}

// -------------------------------- IDs ------------------------------------- //

/// A named handle bound to a C++ variable.
///
/// `name` is `None` only between validation and the ID pass: auto-generated
/// declarations and type-resolved uses get their name there.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigId {
    pub name: Option<String>,
    pub type_tag: TypeRef,
    pub is_declaration: bool,
    pub is_manual: bool,
}

impl ConfigId {
    pub fn declare(name: Option<String>, type_tag: TypeRef) -> Self {
        let is_manual = name.is_some();
        Self { name, type_tag, is_declaration: true, is_manual }
    }
    pub fn reference(name: Option<String>, type_tag: TypeRef) -> Self {
        let is_manual = name.is_some();
        Self { name, type_tag, is_declaration: false, is_manual }
    }
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

impl fmt::Display for ConfigId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => f.write_str(name),
            None => write!(f, "<unnamed {}>", self.type_tag),
        }
    }
}

// ------------------------------ Lambdas ----------------------------------- //

static ID_CALL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"id\(\s*([a-zA-Z_][a-zA-Z0-9_]*)\s*\)(\.?)").expect("static pattern")
});

// strings are matched so that `//` inside a literal isn't mistaken for a comment
static COMMENTS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?ms)//[^\n]*$|/\*.*?\*/|'(?:\\.|[^\\'])*'|"(?:\\.|[^\\"])*""#)
        .expect("static pattern")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LambdaPart {
    Text(String),
    /// `id(name)`; `member` is set for `id(name).` (member access follows).
    IdRef { name: String, member: bool },
}

/// Inline C++ snippet. Parsed into text and `id(...)` references on demand.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Lambda {
    source: String,
}

impl Lambda {
    pub fn new(source: impl Into<String>) -> Self {
        Self { source: source.into() }
    }
    pub fn source(&self) -> &str {
        &self.source
    }
    pub fn parts(&self) -> Vec<LambdaPart> {
        let stripped = strip_comments(&self.source);
        let mut parts = Vec::new();
        let mut last = 0;
        for caps in ID_CALL.captures_iter(&stripped) {
            let Some(whole) = caps.get(0) else { continue };
            if whole.start() > last {
                parts.push(LambdaPart::Text(stripped[last..whole.start()].to_string()));
            }
            parts.push(LambdaPart::IdRef {
                name: caps[1].to_string(),
                member: !caps[2].is_empty(),
            });
            last = whole.end();
        }
        if last < stripped.len() {
            parts.push(LambdaPart::Text(stripped[last..].to_string()));
        }
        parts
    }
    /// Names referenced through `id(...)`, in order of first appearance.
    pub fn requires_ids(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for part in self.parts() {
            if let LambdaPart::IdRef { name, .. } = part {
                if !out.contains(&name) {
                    out.push(name);
                }
            }
        }
        out
    }
}

fn strip_comments(src: &str) -> String {
    COMMENTS
        .replace_all(src, |caps: &regex::Captures| {
            let m = &caps[0];
            if m.starts_with('/') { " ".to_string() } else { m.to_string() }
        })
        .into_owned()
}

// ---------------------------- Time periods -------------------------------- //

/// Unit a period is expressed in when it becomes a C++ literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimeUnit {
    Nanoseconds,
    Microseconds,
    Milliseconds,
    Seconds,
    Minutes,
}

impl TimeUnit {
    pub fn nanos(self) -> u64 {
        match self {
            TimeUnit::Nanoseconds => 1,
            TimeUnit::Microseconds => 1_000,
            TimeUnit::Milliseconds => 1_000_000,
            TimeUnit::Seconds => 1_000_000_000,
            TimeUnit::Minutes => 60_000_000_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimePeriod {
    nanos: u64,
    unit: TimeUnit,
}

impl TimePeriod {
    pub const NS_PER_MS: u64 = 1_000_000;

    pub fn from_nanos(nanos: u64) -> Self {
        Self { nanos, unit: TimeUnit::Milliseconds }
    }
    pub fn from_millis(ms: u64) -> Self {
        Self::from_nanos(ms.saturating_mul(Self::NS_PER_MS))
    }
    pub fn with_unit(self, unit: TimeUnit) -> Self {
        Self { unit, ..self }
    }
    pub fn unit(&self) -> TimeUnit {
        self.unit
    }
    pub fn total_nanos(&self) -> u64 {
        self.nanos
    }
    pub fn total_millis(&self) -> u64 {
        self.nanos / Self::NS_PER_MS
    }
    /// Value in the period's own unit, truncated; what ends up in C++.
    pub fn in_unit(&self) -> u64 {
        self.nanos / self.unit.nanos()
    }
}

impl fmt::Display for TimePeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const UNITS: [(u64, &str); 7] = [
            (86_400_000_000_000, "d"),
            (3_600_000_000_000, "h"),
            (60_000_000_000, "min"),
            (1_000_000_000, "s"),
            (1_000_000, "ms"),
            (1_000, "us"),
            (1, "ns"),
        ];
        if self.nanos == 0 {
            return f.write_str("0ms");
        }
        for (size, suffix) in UNITS {
            if self.nanos % size == 0 {
                return write!(f, "{}{suffix}", self.nanos / size);
            }
        }
        write!(f, "{}ns", self.nanos)
    }
}

// ------------------------------- Enums ------------------------------------ //

/// A validated enum member: the user-facing key and its C++ spelling.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EnumValue {
    pub key: String,
    pub cpp: String,
}

// ---------------------------- Construction -------------------------------- //

impl ConfigValue {
    pub fn map() -> Self {
        ConfigValue::Map(ConfigMap::new())
    }

    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => ConfigValue::Null,
            Value::Bool(b) => ConfigValue::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => ConfigValue::Int(i),
                None => ConfigValue::Float(OrderedFloat(n.as_f64().unwrap_or(f64::NAN))),
            },
            Value::String(s) => match s.strip_prefix(LAMBDA_TAG) {
                Some(rest) if rest.starts_with(char::is_whitespace) => {
                    ConfigValue::Lambda(Lambda::new(rest.trim_start()))
                }
                _ => ConfigValue::Str(s.clone()),
            },
            Value::Array(items) => ConfigValue::Seq(items.iter().map(Self::from_json).collect()),
            Value::Object(obj) => {
                if obj.len() == 1 {
                    if let Some(Value::String(src)) = obj.get(LAMBDA_TAG) {
                        return ConfigValue::Lambda(Lambda::new(src.clone()));
                    }
                }
                ConfigValue::Map(
                    obj.iter().map(|(k, v)| (k.clone(), Self::from_json(v))).collect(),
                )
            }
        }
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

impl From<bool> for ConfigValue {
    fn from(value: bool) -> Self {
        ConfigValue::Bool(value)
    }
}
impl From<i64> for ConfigValue {
    fn from(value: i64) -> Self {
        ConfigValue::Int(value)
    }
}
impl From<i32> for ConfigValue {
    fn from(value: i32) -> Self {
        ConfigValue::Int(value as i64)
    }
}
impl From<f64> for ConfigValue {
    fn from(value: f64) -> Self {
        ConfigValue::Float(OrderedFloat(value))
    }
}
impl From<&str> for ConfigValue {
    fn from(value: &str) -> Self {
        ConfigValue::Str(value.to_string())
    }
}
impl From<String> for ConfigValue {
    fn from(value: String) -> Self {
        ConfigValue::Str(value)
    }
}
impl From<ConfigMap> for ConfigValue {
    fn from(value: ConfigMap) -> Self {
        ConfigValue::Map(value)
    }
}
impl From<Vec<ConfigValue>> for ConfigValue {
    fn from(value: Vec<ConfigValue>) -> Self {
        ConfigValue::Seq(value)
    }
}
impl From<Value> for ConfigValue {
    fn from(value: Value) -> Self {
        ConfigValue::from_json(&value)
    }
}

// ------------------------------ Accessors --------------------------------- //

impl ConfigValue {
    pub fn is_null(&self) -> bool {
        matches!(self, ConfigValue::Null)
    }
    pub fn as_map(&self) -> Option<&ConfigMap> {
        match self {
            ConfigValue::Map(m) => Some(m),
            _ => None,
        }
    }
    pub fn as_map_mut(&mut self) -> Option<&mut ConfigMap> {
        match self {
            ConfigValue::Map(m) => Some(m),
            _ => None,
        }
    }
    pub fn as_seq(&self) -> Option<&[ConfigValue]> {
        match self {
            ConfigValue::Seq(s) => Some(s),
            _ => None,
        }
    }
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConfigValue::Str(s) => Some(s),
            _ => None,
        }
    }
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ConfigValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ConfigValue::Int(i) => Some(*i),
            _ => None,
        }
    }
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ConfigValue::Int(i) => Some(*i as f64),
            ConfigValue::Float(f) => Some(f.0),
            _ => None,
        }
    }
    pub fn as_id(&self) -> Option<&ConfigId> {
        match self {
            ConfigValue::Id(id) => Some(id),
            _ => None,
        }
    }
    pub fn as_lambda(&self) -> Option<&Lambda> {
        match self {
            ConfigValue::Lambda(l) => Some(l),
            _ => None,
        }
    }
    pub fn as_time(&self) -> Option<TimePeriod> {
        match self {
            ConfigValue::Time(t) => Some(*t),
            _ => None,
        }
    }
    pub fn as_enum(&self) -> Option<&EnumValue> {
        match self {
            ConfigValue::Enum(e) => Some(e),
            _ => None,
        }
    }
    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.as_map().and_then(|m| m.get(key))
    }
    /// Seq as-is, Null as empty, anything else as a one-element list.
    pub fn iter_list(&self) -> Vec<&ConfigValue> {
        match self {
            ConfigValue::Seq(items) => items.iter().collect(),
            ConfigValue::Null => Vec::new(),
            other => vec![other],
        }
    }
    pub fn at(&self, path: &ConfigPath) -> Option<&ConfigValue> {
        let mut cursor = self;
        for segment in path.segments() {
            cursor = match (segment, cursor) {
                (PathSegment::Key(k), ConfigValue::Map(m)) => m.get(k)?,
                (PathSegment::Index(i), ConfigValue::Seq(s)) => s.get(*i)?,
                _ => return None,
            };
        }
        Some(cursor)
    }
    pub fn at_mut(&mut self, path: &ConfigPath) -> Option<&mut ConfigValue> {
        let mut cursor = self;
        for segment in path.segments() {
            cursor = match (segment, cursor) {
                (PathSegment::Key(k), ConfigValue::Map(m)) => m.get_mut(k)?,
                (PathSegment::Index(i), ConfigValue::Seq(s)) => s.get_mut(*i)?,
                _ => return None,
            };
        }
        Some(cursor)
    }

    /// Human name of the value's kind, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            ConfigValue::Null => "null",
            ConfigValue::Bool(_) => "boolean",
            ConfigValue::Int(_) => "integer",
            ConfigValue::Float(_) => "float",
            ConfigValue::Str(_) => "string",
            ConfigValue::Map(_) => "mapping",
            ConfigValue::Seq(_) => "list",
            ConfigValue::Id(_) => "ID",
            ConfigValue::Lambda(_) => "lambda",
            ConfigValue::Time(_) => "time period",
            ConfigValue::Enum(_) => "enum value",
        }
    }

    /// Scalar rendered the way a user would have typed it.
    pub fn display_scalar(&self) -> String {
        match self {
            ConfigValue::Null => "null".into(),
            ConfigValue::Bool(b) => b.to_string(),
            ConfigValue::Int(i) => i.to_string(),
            ConfigValue::Float(f) => f.0.to_string(),
            ConfigValue::Str(s) => s.clone(),
            ConfigValue::Id(id) => id.to_string(),
            ConfigValue::Lambda(l) => l.source().to_string(),
            ConfigValue::Time(t) => t.to_string(),
            ConfigValue::Enum(e) => e.key.clone(),
            other => other.to_json().to_string(),
        }
    }
}

impl Serialize for ConfigValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ConfigValue::Null => serializer.serialize_unit(),
            ConfigValue::Bool(b) => serializer.serialize_bool(*b),
            ConfigValue::Int(i) => serializer.serialize_i64(*i),
            ConfigValue::Float(f) => serializer.serialize_f64(f.0),
            ConfigValue::Str(s) => serializer.serialize_str(s),
            ConfigValue::Map(m) => {
                let mut out = serializer.serialize_map(Some(m.len()))?;
                for (k, v) in m {
                    out.serialize_entry(k, v)?;
                }
                out.end()
            }
            ConfigValue::Seq(items) => {
                let mut out = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    out.serialize_element(item)?;
                }
                out.end()
            }
            ConfigValue::Id(id) => match &id.name {
                Some(name) => serializer.serialize_str(name),
                None => serializer.serialize_unit(),
            },
            ConfigValue::Lambda(l) => {
                let mut out = serializer.serialize_map(Some(1))?;
                out.serialize_entry(LAMBDA_TAG, l.source())?;
                out.end()
            }
            ConfigValue::Time(t) => serializer.serialize_str(&t.to_string()),
            ConfigValue::Enum(e) => serializer.serialize_str(&e.key),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_lambda_forms_become_lambdas() {
        let v = ConfigValue::from_json(&json!({"a": {"!lambda": "return 1;"}, "b": "!lambda return 2;"}));
        assert_eq!(v.get("a").and_then(|x| x.as_lambda()).map(|l| l.source()), Some("return 1;"));
        assert_eq!(v.get("b").and_then(|x| x.as_lambda()).map(|l| l.source()), Some("return 2;"));
    }

    #[test]
    fn json_object_order_is_preserved() {
        let v = ConfigValue::from_json(&json!({"z": 1, "a": 2, "m": 3}));
        let keys: Vec<&str> = v.as_map().unwrap().keys().map(|k| k.as_str()).collect();
        assert_eq!(keys, ["z", "a", "m"]);
    }

    #[test]
    fn lambda_parts_split_on_id_calls() {
        let l = Lambda::new("return id(temp).state + id( other );");
        assert_eq!(
            l.parts(),
            vec![
                LambdaPart::Text("return ".into()),
                LambdaPart::IdRef { name: "temp".into(), member: true },
                LambdaPart::Text("state + ".into()),
                LambdaPart::IdRef { name: "other".into(), member: false },
                LambdaPart::Text(";".into()),
            ]
        );
        assert_eq!(l.requires_ids(), vec!["temp".to_string(), "other".to_string()]);
    }

    #[test]
    fn lambda_ignores_ids_in_comments_but_not_strings() {
        let l = Lambda::new("// id(hidden)\nESP_LOGD(\"x\", \"//\"); return id(shown);");
        assert_eq!(l.requires_ids(), vec!["shown".to_string()]);
    }

    #[test]
    fn path_display_mixes_keys_and_indices() {
        let p = ConfigPath::key("sensor").child_index(0).child_key("filters").child_index(2);
        assert_eq!(p.to_string(), "sensor[0].filters[2]");
        assert_eq!(ConfigPath::root().to_string(), "<root>");
    }

    #[test]
    fn time_period_display_picks_largest_exact_unit() {
        assert_eq!(TimePeriod::from_millis(500).to_string(), "500ms");
        assert_eq!(TimePeriod::from_millis(60_000).to_string(), "1min");
        assert_eq!(TimePeriod::from_millis(1_500).to_string(), "1500ms");
        assert_eq!(TimePeriod::from_millis(1_500).with_unit(TimeUnit::Seconds).in_unit(), 1);
    }

    #[test]
    fn at_walks_keys_and_indices() {
        let v = ConfigValue::from_json(&json!({"sensor": [{"name": "a"}, {"name": "b"}]}));
        let p = ConfigPath::key("sensor").child_index(1).child_key("name");
        assert_eq!(v.at(&p).and_then(|x| x.as_str()), Some("b"));
    }
}
