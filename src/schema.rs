//! Composable, introspectable schema combinators.
//!
//! A [`Schema`] is a cheap `Arc` handle around a [`SchemaNode`]. Validation
//! returns the canonical value or a [`ValidationError`] whose paths are
//! relative to the node that was asked; introspection (`fields`, `branches`,
//! `inner`) is what the JSON-Schema exporter walks.
//!
//! Recursive shapes (conditions inside `and`, filters inside `or`) never
//! recurse through construction: they point at a registry by name and the
//! registry is looked up at validation time.
pub mod common;
pub mod error;
pub mod leaf;
pub mod mapping;
pub mod time;

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::ir::TypeRef;
use crate::registry::RegistrySet;
use crate::target::Target;
use crate::value::{ConfigMap, ConfigValue};

pub use error::{Invalid, InvalidKind, MultipleInvalid, VResult, ValidationError, deepest, invalid};
pub use mapping::{ExtraPolicy, Field, MappingSchema, Marker};

pub type ValidatorFn = Arc<dyn Fn(&ConfigValue, &ValidationContext<'_>) -> VResult + Send + Sync>;

/// What a validator may look at besides the value itself.
#[derive(Clone, Copy)]
pub struct ValidationContext<'a> {
    pub registries: &'a RegistrySet,
    /// Components present in the root config, after AUTO_LOAD.
    pub loaded: &'a BTreeSet<String>,
    pub target: &'a Target,
}

impl<'a> ValidationContext<'a> {
    pub fn new(registries: &'a RegistrySet, loaded: &'a BTreeSet<String>, target: &'a Target) -> Self {
        Self { registries, loaded, target }
    }
    pub fn is_loaded(&self, component: &str) -> bool {
        self.loaded.contains(component)
    }
}

/// JSON type a leaf accepts; only used for export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonHint {
    String,
    Integer,
    Number,
    Boolean,
    Any,
}

pub struct Leaf {
    pub name: &'static str,
    pub json: JsonHint,
    func: ValidatorFn,
}

pub struct TypedSchema {
    pub key: String,
    pub branches: IndexMap<String, Schema>,
    pub default_type: Option<String>,
    pub lower: bool,
}

pub struct ListSchema {
    pub item: Schema,
    /// `ensure_list`: a lone value is wrapped, null and `{}` become `[]`.
    pub coerce: bool,
    pub min: Option<usize>,
    pub max: Option<usize>,
}

pub struct OneOf {
    pub values: Vec<ConfigValue>,
    pub lower: bool,
    pub upper: bool,
    pub space: Option<char>,
    /// C++ spelling per value, for `enum_`.
    pub cpp: Option<Vec<String>>,
}

#[derive(Clone)]
pub enum RegistryMode {
    Entry,
    List,
    /// Pin schemas pick an entry by key presence, else fall back.
    Pin { fallback: Schema },
}

pub struct RegistryRef {
    pub registry: String,
    pub mode: RegistryMode,
}

pub struct AutomationSchema {
    /// The full per-automation mapping (`trigger_id`, `automation_id`, `then`, extras).
    pub schema: Schema,
    pub single: bool,
}

pub enum SchemaNode {
    Leaf(Leaf),
    Mapping(MappingSchema),
    All(Vec<Schema>),
    Any(Vec<Schema>),
    Typed(TypedSchema),
    List(ListSchema),
    Templatable(Schema),
    MaybeSimple { inner: Schema, key: String },
    Id { ty: TypeRef, declare: bool },
    Lambda { returning: bool },
    OneOf(OneOf),
    Registry(RegistryRef),
    Automation(AutomationSchema),
}

#[derive(Clone)]
pub struct Schema(Arc<SchemaNode>);

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Schema({})", self.describe())
    }
}

impl From<MappingSchema> for Schema {
    fn from(value: MappingSchema) -> Self {
        Schema::new(SchemaNode::Mapping(value))
    }
}

// ---------------------------- Construction -------------------------------- //

impl Schema {
    pub fn new(node: SchemaNode) -> Self {
        Self(Arc::new(node))
    }
    pub fn node(&self) -> &SchemaNode {
        &self.0
    }
    pub fn mapping(fields: impl IntoIterator<Item = Field>) -> Self {
        MappingSchema::new(fields).into()
    }

    /// Right-hand side wins on collisions; the overridden keys are recorded.
    /// Looks through `All(mapping, validators...)` on either side.
    pub fn extend(&self, other: &Schema) -> Schema {
        let (Some(left), Some(right)) = (self.as_mapping(), other.as_mapping()) else {
            panic!("extend() needs mapping schemas, got {} and {}", self.describe(), other.describe())
        };
        let merged: Schema = left.extend(right).into();
        let mut tail: Vec<Schema> = Vec::new();
        for side in [self, other] {
            if let SchemaNode::All(parts) = side.node() {
                tail.extend(parts.iter().skip(1).cloned());
            }
        }
        if tail.is_empty() {
            merged
        } else {
            all(std::iter::once(merged).chain(tail))
        }
    }
    pub fn extend_fields(&self, fields: impl IntoIterator<Item = Field>) -> Schema {
        self.extend(&Schema::mapping(fields))
    }
    /// Same mapping, unknown keys kept as-is.
    pub fn allow_extra(&self) -> Schema {
        match self.node() {
            SchemaNode::Mapping(m) => m.clone().with_extra(ExtraPolicy::Allow).into(),
            _ => self.clone(),
        }
    }
    /// Appends post-validators run on the validated mapping.
    pub fn with_validators(&self, validators: impl IntoIterator<Item = Schema>) -> Schema {
        all(std::iter::once(self.clone()).chain(validators))
    }
}

pub fn leaf(
    name: &'static str,
    json: JsonHint,
    func: impl Fn(&ConfigValue, &ValidationContext<'_>) -> VResult + Send + Sync + 'static,
) -> Schema {
    Schema::new(SchemaNode::Leaf(Leaf { name, json, func: Arc::new(func) }))
}

pub fn all(schemas: impl IntoIterator<Item = Schema>) -> Schema {
    Schema::new(SchemaNode::All(schemas.into_iter().collect()))
}

pub fn any(schemas: impl IntoIterator<Item = Schema>) -> Schema {
    Schema::new(SchemaNode::Any(schemas.into_iter().collect()))
}

/// Dispatches on `key` (usually `type`) to one branch schema per value.
pub fn typed_schema<'a>(
    key: &str,
    branches: impl IntoIterator<Item = (&'a str, Schema)>,
    default_type: Option<&str>,
) -> Schema {
    Schema::new(SchemaNode::Typed(TypedSchema {
        key: key.to_string(),
        branches: branches.into_iter().map(|(k, s)| (k.to_string(), s)).collect(),
        default_type: default_type.map(str::to_string),
        lower: true,
    }))
}

pub fn ensure_list(item: Schema) -> Schema {
    Schema::new(SchemaNode::List(ListSchema { item, coerce: true, min: None, max: None }))
}

pub fn ensure_list_bounded(item: Schema, min: Option<usize>, max: Option<usize>) -> Schema {
    Schema::new(SchemaNode::List(ListSchema { item, coerce: true, min, max }))
}

/// Requires an actual list.
pub fn list_of(item: Schema) -> Schema {
    Schema::new(SchemaNode::List(ListSchema { item, coerce: false, min: None, max: None }))
}

pub fn templatable(inner: Schema) -> Schema {
    Schema::new(SchemaNode::Templatable(inner))
}

pub fn maybe_simple_value(inner: Schema, key: &str) -> Schema {
    Schema::new(SchemaNode::MaybeSimple { inner, key: key.to_string() })
}

pub fn maybe_simple_id(inner: Schema) -> Schema {
    maybe_simple_value(inner, "id")
}

pub fn declare_id(ty: &TypeRef) -> Schema {
    Schema::new(SchemaNode::Id { ty: ty.clone(), declare: true })
}

pub fn use_id(ty: &TypeRef) -> Schema {
    Schema::new(SchemaNode::Id { ty: ty.clone(), declare: false })
}

pub fn lambda_() -> Schema {
    Schema::new(SchemaNode::Lambda { returning: false })
}

pub fn returning_lambda() -> Schema {
    Schema::new(SchemaNode::Lambda { returning: true })
}

#[derive(Debug, Clone, Copy, Default)]
pub struct OneOfOptions {
    pub lower: bool,
    pub upper: bool,
    pub space: Option<char>,
}

impl OneOfOptions {
    pub fn lower() -> Self {
        Self { lower: true, ..Self::default() }
    }
    pub fn upper() -> Self {
        Self { upper: true, ..Self::default() }
    }
    pub fn space(self, c: char) -> Self {
        Self { space: Some(c), ..self }
    }
}

pub fn one_of<V: Into<ConfigValue>>(values: impl IntoIterator<Item = V>, options: OneOfOptions) -> Schema {
    Schema::new(SchemaNode::OneOf(OneOf {
        values: values.into_iter().map(Into::into).collect(),
        lower: options.lower,
        upper: options.upper,
        space: options.space,
        cpp: None,
    }))
}

/// `one_of` over the keys, canonicalized to [`crate::value::EnumValue`].
pub fn enum_<'a>(members: impl IntoIterator<Item = (&'a str, String)>, options: OneOfOptions) -> Schema {
    let (keys, cpp): (Vec<ConfigValue>, Vec<String>) =
        members.into_iter().map(|(k, c)| (ConfigValue::from(k), c)).unzip();
    Schema::new(SchemaNode::OneOf(OneOf {
        values: keys,
        lower: options.lower,
        upper: options.upper,
        space: options.space,
        cpp: Some(cpp),
    }))
}

pub fn registry_entry(registry: &str) -> Schema {
    Schema::new(SchemaNode::Registry(RegistryRef { registry: registry.to_string(), mode: RegistryMode::Entry }))
}

pub fn registry_list(registry: &str) -> Schema {
    Schema::new(SchemaNode::Registry(RegistryRef { registry: registry.to_string(), mode: RegistryMode::List }))
}

pub fn registry_pin(registry: &str, fallback: Schema) -> Schema {
    Schema::new(SchemaNode::Registry(RegistryRef {
        registry: registry.to_string(),
        mode: RegistryMode::Pin { fallback },
    }))
}

// ------------------------------ Validation -------------------------------- //

impl Schema {
    pub fn validate(&self, value: &ConfigValue, ctx: &ValidationContext<'_>) -> VResult {
        match self.node() {
            SchemaNode::Leaf(l) => (l.func)(value, ctx),
            SchemaNode::Mapping(m) => m.validate(value, ctx),
            SchemaNode::All(parts) => {
                let mut current = value.clone();
                for part in parts {
                    current = part.validate(&current, ctx)?;
                }
                Ok(current)
            }
            SchemaNode::Any(parts) => {
                let mut failures = Vec::with_capacity(parts.len());
                for part in parts {
                    match part.validate(value, ctx) {
                        Ok(v) => return Ok(v),
                        Err(e) => failures.push(e),
                    }
                }
                Err(deepest(failures))
            }
            SchemaNode::Typed(t) => t.validate(value, ctx),
            SchemaNode::List(l) => l.validate(value, ctx),
            SchemaNode::Templatable(inner) => match value {
                ConfigValue::Lambda(_) => leaf::validate_lambda(value, true),
                _ => inner.validate(value, ctx),
            },
            SchemaNode::MaybeSimple { inner, key } => match value {
                ConfigValue::Map(m) if m.contains_key(key) => inner.validate(value, ctx),
                _ => {
                    let mut wrapped = ConfigMap::new();
                    wrapped.insert(key.clone(), value.clone());
                    inner.validate(&ConfigValue::Map(wrapped), ctx)
                }
            },
            SchemaNode::Id { ty, declare } => leaf::validate_id(value, ty, *declare),
            SchemaNode::Lambda { returning } => leaf::validate_lambda(value, *returning),
            SchemaNode::OneOf(o) => o.validate(value),
            SchemaNode::Registry(r) => r.validate(value, ctx),
            SchemaNode::Automation(a) => crate::automation::validate_surface(a, value, ctx),
        }
    }

    /// Validates `value` that lives at `path`; error paths come back absolute.
    pub fn validate_at(
        &self,
        value: &ConfigValue,
        path: &crate::value::ConfigPath,
        ctx: &ValidationContext<'_>,
    ) -> VResult {
        self.validate(value, ctx).map_err(|e| e.prefixed(path))
    }
}

impl TypedSchema {
    fn validate(&self, value: &ConfigValue, ctx: &ValidationContext<'_>) -> VResult {
        let Some(map) = value.as_map() else {
            return Err(invalid("expected a dictionary"));
        };
        let raw_type = match map.get(&self.key) {
            Some(v) => v.display_scalar(),
            None => match &self.default_type {
                Some(d) => d.clone(),
                None => return Err(invalid(format!("{} not specified!", self.key))),
            },
        };
        let type_name = if self.lower { raw_type.to_lowercase() } else { raw_type };
        let Some(branch) = self.branches.get(&type_name) else {
            let options: Vec<&str> = self.branches.keys().map(String::as_str).collect();
            return Err(Invalid::new(unknown_value_message(&type_name, &options))
                .at(crate::value::ConfigPath::key(&self.key))
                .into());
        };
        let mut rest = map.clone();
        rest.shift_remove(&self.key);
        let validated = branch.validate(&ConfigValue::Map(rest), ctx)?;
        let mut out = ConfigMap::new();
        out.insert(self.key.clone(), ConfigValue::Str(type_name));
        if let ConfigValue::Map(fields) = validated {
            out.extend(fields);
        }
        Ok(ConfigValue::Map(out))
    }
}

impl ListSchema {
    fn validate(&self, value: &ConfigValue, ctx: &ValidationContext<'_>) -> VResult {
        let items = match value {
            ConfigValue::Seq(items) => items,
            ConfigValue::Null if self.coerce => return self.check_len(Vec::new()),
            ConfigValue::Map(m) if self.coerce && m.is_empty() => return self.check_len(Vec::new()),
            other if self.coerce => {
                let one = self.item.validate(other, ctx)?;
                return self.check_len(vec![one]);
            }
            _ => return Err(invalid("expected a list")),
        };
        let mut out = Vec::with_capacity(items.len());
        let mut errors = Vec::new();
        for (i, item) in items.iter().enumerate() {
            match self.item.validate(item, ctx) {
                Ok(v) => out.push(v),
                Err(e) => errors.extend(e.under_index(i).into_errors()),
            }
        }
        if let Some(err) = ValidationError::from_errors(errors) {
            return Err(err);
        }
        self.check_len(out)
    }

    fn check_len(&self, items: Vec<ConfigValue>) -> VResult {
        if let Some(min) = self.min {
            if items.len() < min {
                return Err(invalid(format!("length of value must be at least {min}")));
            }
        }
        if let Some(max) = self.max {
            if items.len() > max {
                return Err(invalid(format!("length of value must be at most {max}")));
            }
        }
        Ok(ConfigValue::Seq(items))
    }
}

impl OneOf {
    fn validate(&self, value: &ConfigValue) -> VResult {
        let candidate = match value {
            ConfigValue::Str(s) => {
                let mut s = s.clone();
                if self.lower {
                    s = s.to_lowercase();
                }
                if self.upper {
                    s = s.to_uppercase();
                }
                if let Some(c) = self.space {
                    s = s.replace(' ', &c.to_string());
                }
                ConfigValue::Str(s)
            }
            ConfigValue::Enum(e) => ConfigValue::Str(e.key.clone()),
            other => other.clone(),
        };
        let position = self.values.iter().position(|v| loose_eq(v, &candidate));
        match position {
            Some(i) => Ok(match &self.cpp {
                Some(cpp) => ConfigValue::Enum(crate::value::EnumValue {
                    key: self.values[i].display_scalar(),
                    cpp: cpp[i].clone(),
                }),
                None => self.values[i].clone(),
            }),
            None => {
                let options: Vec<String> = self.values.iter().map(ConfigValue::display_scalar).collect();
                let options: Vec<&str> = options.iter().map(String::as_str).collect();
                Err(invalid(unknown_value_message(&candidate.display_scalar(), &options)))
            }
        }
    }
}

/// Numbers compare across int/float; everything else structurally.
fn loose_eq(a: &ConfigValue, b: &ConfigValue) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => match (a, b) {
            (ConfigValue::Str(x), other) | (other, ConfigValue::Str(x)) if !matches!(other, ConfigValue::Str(_)) => {
                *x == other.display_scalar()
            }
            _ => a == b,
        },
    }
}

/// "Unknown value 'x', did you mean 'y'?" with a close-match suggestion.
pub fn unknown_value_message(value: &str, options: &[&str]) -> String {
    match leaf::closest_match(value, options) {
        Some(best) => format!("Unknown value '{value}', did you mean '{best}'?"),
        None => {
            let listed: Vec<String> = options.iter().map(|o| format!("'{o}'")).collect();
            format!("Unknown value '{value}', valid options are {}.", listed.join(", "))
        }
    }
}

// ---------------------------- Introspection ------------------------------- //

impl Schema {
    /// The mapping behind this schema, looking through `All(mapping, ...)`.
    pub fn as_mapping(&self) -> Option<&MappingSchema> {
        match self.node() {
            SchemaNode::Mapping(m) => Some(m),
            SchemaNode::All(parts) => parts.first().and_then(Schema::as_mapping),
            _ => None,
        }
    }
    pub fn fields(&self) -> Option<&[Field]> {
        self.as_mapping().map(MappingSchema::fields)
    }
    /// Alternatives: union members (unnamed) or typed branches (named).
    pub fn branches(&self) -> Vec<(Option<&str>, &Schema)> {
        match self.node() {
            SchemaNode::Any(parts) => parts.iter().map(|p| (None, p)).collect(),
            SchemaNode::Typed(t) => t.branches.iter().map(|(k, s)| (Some(k.as_str()), s)).collect(),
            _ => Vec::new(),
        }
    }
    /// The wrapped schema of single-child wrappers.
    pub fn inner(&self) -> Option<&Schema> {
        match self.node() {
            SchemaNode::Templatable(inner) => Some(inner),
            SchemaNode::MaybeSimple { inner, .. } => Some(inner),
            SchemaNode::List(l) => Some(&l.item),
            SchemaNode::Automation(a) => Some(&a.schema),
            _ => None,
        }
    }
    /// Registry a late-bound node points at.
    pub fn resolve<'r>(&self, registries: &'r RegistrySet) -> Option<&'r crate::registry::Registry> {
        match self.node() {
            SchemaNode::Registry(r) => registries.get(&r.registry),
            _ => None,
        }
    }

    /// Short structural description, for debugging and messages.
    pub fn describe(&self) -> String {
        match self.node() {
            SchemaNode::Leaf(l) => l.name.to_string(),
            SchemaNode::Mapping(m) => {
                let keys: Vec<&str> = m.fields().iter().map(|f| f.key.as_str()).collect();
                format!("{{{}}}", keys.join(", "))
            }
            SchemaNode::All(parts) => {
                format!("All({})", parts.iter().map(Schema::describe).collect::<Vec<_>>().join(", "))
            }
            SchemaNode::Any(parts) => {
                format!("Any({})", parts.iter().map(Schema::describe).collect::<Vec<_>>().join(", "))
            }
            SchemaNode::Typed(t) => format!("typed_schema[{}]", t.key),
            SchemaNode::List(l) => format!("[{}]", l.item.describe()),
            SchemaNode::Templatable(inner) => format!("templatable({})", inner.describe()),
            SchemaNode::MaybeSimple { inner, key } => format!("maybe_simple({key}, {})", inner.describe()),
            SchemaNode::Id { ty, declare: true } => format!("declare_id({ty})"),
            SchemaNode::Id { ty, declare: false } => format!("use_id({ty})"),
            SchemaNode::Lambda { returning } => {
                if *returning { "returning_lambda".into() } else { "lambda".into() }
            }
            SchemaNode::OneOf(o) => format!("one_of({} values)", o.values.len()),
            SchemaNode::Registry(r) => format!("registry({})", r.registry),
            SchemaNode::Automation(_) => "automation".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::ConfigPath;
    use serde_json::json;

    fn cv(v: serde_json::Value) -> ConfigValue {
        ConfigValue::from_json(&v)
    }

    fn with_ctx<R>(f: impl FnOnce(&ValidationContext<'_>) -> R) -> R {
        let registries = RegistrySet::default();
        let loaded = BTreeSet::new();
        let target = Target::default();
        f(&ValidationContext::new(&registries, &loaded, &target))
    }

    #[test]
    fn typed_schema_dispatches_and_rejects_foreign_keys() {
        let mean = Schema::mapping([Field::required("sources", ensure_list(leaf::string()))]);
        let kalman = Schema::mapping([
            Field::required("sources", ensure_list(leaf::string())),
            Field::required("process_std_dev", leaf::float_()),
        ]);
        let schema = typed_schema("type", [("mean", mean), ("kalman", kalman)], None);
        with_ctx(|ctx| {
            let ok = schema.validate(&cv(json!({"type": "mean", "sources": ["a"]})), ctx).unwrap();
            assert_eq!(ok.get("type").and_then(|v| v.as_str()), Some("mean"));

            let err = schema
                .validate(&cv(json!({"type": "mean", "sources": ["a"], "process_std_dev": 0.1})), ctx)
                .unwrap_err();
            let errors = err.errors();
            assert_eq!(errors.len(), 1);
            assert_eq!(errors[0].message, "extra keys not allowed");
            assert_eq!(errors[0].path, ConfigPath::key("process_std_dev"));
        });
    }

    #[test]
    fn typed_schema_requires_discriminator_without_default() {
        let schema = typed_schema("type", [("a", Schema::mapping([]))], None);
        with_ctx(|ctx| {
            let err = schema.validate(&cv(json!({})), ctx).unwrap_err();
            assert_eq!(err.errors()[0].message, "type not specified!");
        });
        let defaulted = typed_schema("type", [("a", Schema::mapping([]))], Some("a"));
        with_ctx(|ctx| {
            let ok = defaulted.validate(&cv(json!({})), ctx).unwrap();
            assert_eq!(ok.get("type").and_then(|v| v.as_str()), Some("a"));
        });
    }

    #[test]
    fn any_reports_the_deepest_failure() {
        let shallow = leaf::string();
        let deep = Schema::mapping([Field::required("a", Schema::mapping([Field::required("b", leaf::int_())]))]);
        let schema = any([shallow, deep]);
        with_ctx(|ctx| {
            let err = schema.validate(&cv(json!({"a": {"b": "nope"}})), ctx).unwrap_err();
            assert_eq!(err.depth(), 2);
            assert_eq!(err.errors()[0].path.to_string(), "a.b");
        });
    }

    #[test]
    fn ensure_list_wraps_and_indexes() {
        let schema = ensure_list(leaf::int_());
        with_ctx(|ctx| {
            assert_eq!(schema.validate(&cv(json!(3)), ctx).unwrap(), cv(json!([3])));
            assert_eq!(schema.validate(&ConfigValue::Null, ctx).unwrap(), cv(json!([])));
            assert_eq!(schema.validate(&cv(json!({})), ctx).unwrap(), cv(json!([])));
            let err = schema.validate(&cv(json!([1, "x", 3, "y"])), ctx).unwrap_err();
            let paths: Vec<String> = err.errors().iter().map(|e| e.path.to_string()).collect();
            assert_eq!(paths, ["[1]", "[3]"]);
        });
    }

    #[test]
    fn maybe_simple_value_wraps_scalars() {
        let schema = maybe_simple_value(
            Schema::mapping([
                Field::required("format", leaf::string()),
                Field::optional("tag", leaf::string()).with_default("main"),
            ]),
            "format",
        );
        with_ctx(|ctx| {
            let v = schema.validate(&cv(json!("hi")), ctx).unwrap();
            assert_eq!(v.get("format").and_then(|x| x.as_str()), Some("hi"));
            assert_eq!(v.get("tag").and_then(|x| x.as_str()), Some("main"));
        });
    }

    #[test]
    fn templatable_accepts_lambdas_or_inner() {
        let schema = templatable(leaf::float_());
        with_ctx(|ctx| {
            assert!(schema.validate(&cv(json!(1.5)), ctx).is_ok());
            assert!(schema.validate(&cv(json!({"!lambda": "return 1.0;"})), ctx).is_ok());
            assert!(schema.validate(&cv(json!({"!lambda": "1.0"})), ctx).is_err());
            assert!(schema.validate(&cv(json!("abc")), ctx).is_err());
        });
    }

    #[test]
    fn one_of_suggests_close_matches() {
        let schema = one_of(["mean", "median", "kalman"], OneOfOptions::lower());
        with_ctx(|ctx| {
            assert_eq!(schema.validate(&cv(json!("MEAN")), ctx).unwrap(), cv(json!("mean")));
            let err = schema.validate(&cv(json!("kalmann")), ctx).unwrap_err();
            assert_eq!(err.errors()[0].message, "Unknown value 'kalmann', did you mean 'kalman'?");
            let err = schema.validate(&cv(json!("zzz")), ctx).unwrap_err();
            assert!(err.errors()[0].message.contains("valid options are 'mean', 'median', 'kalman'"));
        });
    }

    #[test]
    fn enum_canonicalizes_to_cpp_spelling() {
        let schema = enum_(
            [("MEASUREMENT", "sensor::STATE_CLASS_MEASUREMENT".to_string())],
            OneOfOptions::upper(),
        );
        with_ctx(|ctx| {
            let v = schema.validate(&cv(json!("measurement")), ctx).unwrap();
            assert_eq!(v.as_enum().map(|e| e.cpp.as_str()), Some("sensor::STATE_CLASS_MEASUREMENT"));
        });
    }

    #[test]
    fn extend_looks_through_all() {
        let base = Schema::mapping([Field::required("a", leaf::int_())])
            .with_validators([leaf::has_at_least_one_key(&["a"])]);
        let extended = base.extend_fields([Field::optional("b", leaf::int_())]);
        assert_eq!(extended.fields().map(|f| f.len()), Some(2));
        assert!(matches!(extended.node(), SchemaNode::All(parts) if parts.len() == 2));
    }

    #[test]
    fn introspection_exposes_structure() {
        let schema = typed_schema("type", [("x", Schema::mapping([])), ("y", Schema::mapping([]))], None);
        let names: Vec<Option<&str>> = schema.branches().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, [Some("x"), Some("y")]);
        let wrapped = templatable(leaf::int_());
        assert_eq!(wrapped.inner().map(Schema::describe).as_deref(), Some("int"));
        assert_eq!(registry_list("action").describe(), "registry(action)");
    }
}
