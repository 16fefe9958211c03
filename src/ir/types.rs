//! C++ type tags and namespaces.
//!
//! A [`TypeRef`] remembers its base chain, which is all the ID system needs to
//! decide whether a `use_id(Sensor)` may point at a `TemplateSensor`.
use std::fmt;
use std::sync::Arc;

use once_cell::sync::Lazy;

use super::expr::{Expression, MemberOp, TemplateArguments};
use super::stmt::Statement;

#[derive(Clone)]
pub struct TypeRef(Arc<TypeInfo>);

struct TypeInfo {
    name: String,
    bases: Vec<TypeRef>,
}

impl TypeRef {
    pub fn new(name: impl Into<String>, bases: &[TypeRef]) -> Self {
        Self(Arc::new(TypeInfo { name: name.into(), bases: bases.to_vec() }))
    }
    pub fn name(&self) -> &str {
        &self.0.name
    }
    pub fn bases(&self) -> &[TypeRef] {
        &self.0.bases
    }
    /// True when `self` is `other` or has it somewhere in its base chain.
    pub fn inherits_from(&self, other: &TypeRef) -> bool {
        self == other || self.0.bases.iter().any(|b| b.inherits_from(other))
    }
    /// `Foo` + `<float>` = `Foo<float>`, a subtype of `Foo`.
    pub fn template(&self, args: &TemplateArguments) -> TypeRef {
        TypeRef::new(format!("{}{}", self.name(), args), std::slice::from_ref(self))
    }
    pub fn expr(&self) -> Expression {
        Expression::Type(self.clone())
    }
    /// `new Foo(args...)`
    pub fn new_instance(&self, args: Vec<Expression>) -> Expression {
        Expression::New { ty: Box::new(self.expr()), args }
    }
    /// Static member or enumerator, `Foo::NAME`.
    pub fn scoped(&self, name: &str) -> Expression {
        Expression::Member { base: Box::new(self.expr()), op: MemberOp::Scope, name: name.to_string() }
    }
}

impl PartialEq for TypeRef {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || self.0.name == other.0.name
    }
}

impl fmt::Debug for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeRef({})", self.0.name)
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.name)
    }
}

/// A C++ namespace. The empty namespace is the global one; `esphome` is
/// imported with `using namespace`, so it renders as global too.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace {
    path: String,
    using: String,
}

impl Namespace {
    pub fn global() -> Self {
        Self { path: String::new(), using: String::new() }
    }
    /// The framework namespace: emitted unqualified, imported by `using`.
    pub fn framework(name: &str) -> Self {
        Self { path: String::new(), using: name.to_string() }
    }
    pub fn namespace(&self, name: &str) -> Namespace {
        let path = if self.path.is_empty() { name.to_string() } else { format!("{}::{name}", self.path) };
        let using = if self.using.is_empty() { name.to_string() } else { format!("{}::{name}", self.using) };
        Namespace { path, using }
    }
    pub fn class(&self, name: &str, bases: &[TypeRef]) -> TypeRef {
        TypeRef::new(self.qualify(name), bases)
    }
    /// Free symbol inside the namespace (function, enumerator, macro).
    pub fn member(&self, name: &str) -> Expression {
        Expression::Raw(self.qualify(name))
    }
    pub fn path(&self) -> &str {
        &self.path
    }
    pub fn using_statement(&self) -> Statement {
        Statement::GlobalUsing(self.using.clone())
    }
    fn qualify(&self, name: &str) -> String {
        if self.path.is_empty() { name.to_string() } else { format!("{}::{name}", self.path) }
    }
}

// ---------------------------- Well-known types ---------------------------- //

pub static ESPHOME_NS: Lazy<Namespace> = Lazy::new(|| Namespace::framework("esphome"));

pub static VOID: Lazy<TypeRef> = Lazy::new(|| TypeRef::new("void", &[]));
pub static BOOL: Lazy<TypeRef> = Lazy::new(|| TypeRef::new("bool", &[]));
pub static FLOAT: Lazy<TypeRef> = Lazy::new(|| TypeRef::new("float", &[]));
pub static UINT8: Lazy<TypeRef> = Lazy::new(|| TypeRef::new("uint8_t", &[]));
pub static UINT32: Lazy<TypeRef> = Lazy::new(|| TypeRef::new("uint32_t", &[]));
pub static INT32: Lazy<TypeRef> = Lazy::new(|| TypeRef::new("int32_t", &[]));
pub static STD_STRING: Lazy<TypeRef> = Lazy::new(|| TypeRef::new("std::string", &[]));
pub static OPTIONAL: Lazy<TypeRef> = Lazy::new(|| ESPHOME_NS.class("optional", &[]));

pub static APPLICATION: Lazy<TypeRef> = Lazy::new(|| ESPHOME_NS.class("Application", &[]));
pub static COMPONENT: Lazy<TypeRef> = Lazy::new(|| ESPHOME_NS.class("Component", &[]));
pub static POLLING_COMPONENT: Lazy<TypeRef> =
    Lazy::new(|| ESPHOME_NS.class("PollingComponent", &[COMPONENT.clone()]));
pub static ENTITY_BASE: Lazy<TypeRef> = Lazy::new(|| ESPHOME_NS.class("EntityBase", &[]));
pub static GPIO_PIN: Lazy<TypeRef> = Lazy::new(|| ESPHOME_NS.class("GPIOPin", &[]));
pub static INTERNAL_GPIO_PIN: Lazy<TypeRef> =
    Lazy::new(|| ESPHOME_NS.class("InternalGPIOPin", &[GPIO_PIN.clone()]));

pub static TRIGGER: Lazy<TypeRef> = Lazy::new(|| ESPHOME_NS.class("Trigger", &[]));
pub static ACTION: Lazy<TypeRef> = Lazy::new(|| ESPHOME_NS.class("Action", &[]));
pub static CONDITION: Lazy<TypeRef> = Lazy::new(|| ESPHOME_NS.class("Condition", &[]));
pub static AUTOMATION: Lazy<TypeRef> = Lazy::new(|| ESPHOME_NS.class("Automation", &[]));

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inherits_through_the_base_chain() {
        let ns = ESPHOME_NS.namespace("template_");
        let sensor = ESPHOME_NS.namespace("sensor").class("Sensor", &[ENTITY_BASE.clone()]);
        let tmpl = ns.class("TemplateSensor", &[sensor.clone(), POLLING_COMPONENT.clone()]);
        assert!(tmpl.inherits_from(&sensor));
        assert!(tmpl.inherits_from(&COMPONENT));
        assert!(tmpl.inherits_from(&ENTITY_BASE));
        assert!(!sensor.inherits_from(&tmpl));
        assert_eq!(tmpl.name(), "template_::TemplateSensor");
    }

    #[test]
    fn template_instantiation_is_a_subtype() {
        let args = TemplateArguments(vec![FLOAT.expr()]);
        let inst = AUTOMATION.template(&args);
        assert_eq!(inst.name(), "Automation<float>");
        assert!(inst.inherits_from(&AUTOMATION));
    }

    #[test]
    fn framework_namespace_is_unqualified_but_imported() {
        let ns = ESPHOME_NS.namespace("sensor");
        assert_eq!(ns.path(), "sensor");
        assert_eq!(ns.using_statement().to_string(), "using namespace esphome::sensor;");
        assert_eq!(ESPHOME_NS.using_statement().to_string(), "using namespace esphome;");
    }
}
