use std::fmt;

use super::indent_all_but_first_and_last;
use super::types::TypeRef;
use crate::value::ConfigValue;

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Str(String),
    Int(i64),
    HexInt(i64),
    Float(f64),
    Bool(bool),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberOp {
    Dot,
    Arrow,
    Scope,
}

impl MemberOp {
    fn as_str(self) -> &'static str {
        match self {
            MemberOp::Dot => ".",
            MemberOp::Arrow => "->",
            MemberOp::Scope => "::",
        }
    }
}

/// Handle to a declared variable; pointers get `->` member access.
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub name: String,
    pub ty: TypeRef,
    pub pointer: bool,
}

/// `<a, b>`; renders as `<>` when empty.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TemplateArguments(pub Vec<Expression>);

impl TemplateArguments {
    pub fn of_types<'a>(types: impl IntoIterator<Item = &'a TypeRef>) -> Self {
        Self(types.into_iter().map(|t| t.expr()).collect())
    }
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LambdaExpression {
    pub capture: String,
    pub params: Vec<(TypeRef, String)>,
    pub body: String,
    pub return_type: Option<TypeRef>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Literal(Literal),
    Raw(String),
    Type(TypeRef),
    Variable(Variable),
    Call { callee: Box<Expression>, args: Vec<Expression> },
    TemplateInstantiation { base: Box<Expression>, args: TemplateArguments },
    Member { base: Box<Expression>, op: MemberOp, name: String },
    New { ty: Box<Expression>, args: Vec<Expression> },
    Array(Vec<Expression>),
    Struct { ty: Box<Expression>, fields: Vec<(String, Expression)> },
    Lambda(Box<LambdaExpression>),
}

/// The global `App` object.
pub fn app() -> Expression {
    Expression::Raw("App".to_string())
}

impl Expression {
    pub fn raw(text: impl Into<String>) -> Self {
        Expression::Raw(text.into())
    }
    pub fn string(s: impl Into<String>) -> Self {
        Expression::Literal(Literal::Str(s.into()))
    }
    pub fn int(i: i64) -> Self {
        Expression::Literal(Literal::Int(i))
    }
    pub fn float(f: f64) -> Self {
        Expression::Literal(Literal::Float(f))
    }
    pub fn bool(b: bool) -> Self {
        Expression::Literal(Literal::Bool(b))
    }

    /// `self(args...)`
    pub fn call(self, args: Vec<Expression>) -> Self {
        Expression::Call { callee: Box::new(self), args }
    }
    /// `self.name(args...)`, `self->name(...)` or `Type::name(...)`.
    pub fn method(&self, name: &str, args: Vec<Expression>) -> Self {
        self.member(name).call(args)
    }
    pub fn member(&self, name: &str) -> Self {
        Expression::Member { base: Box::new(self.clone()), op: self.member_op(), name: name.to_string() }
    }
    pub fn template(self, args: TemplateArguments) -> Self {
        Expression::TemplateInstantiation { base: Box::new(self), args }
    }
    pub fn as_variable(&self) -> Option<&Variable> {
        match self {
            Expression::Variable(v) => Some(v),
            _ => None,
        }
    }
    fn member_op(&self) -> MemberOp {
        match self {
            Expression::Variable(v) if v.pointer => MemberOp::Arrow,
            Expression::Type(_) => MemberOp::Scope,
            _ => MemberOp::Dot,
        }
    }

    /// Lifts a validated scalar into a literal. IDs and lambdas have to go
    /// through the code generator instead, they need suspension.
    pub fn from_config(value: &ConfigValue) -> Result<Self, String> {
        Ok(match value {
            ConfigValue::Bool(b) => Expression::bool(*b),
            ConfigValue::Int(i) => Expression::int(*i),
            ConfigValue::Float(f) => Expression::float(f.0),
            ConfigValue::Str(s) => Expression::string(s.clone()),
            ConfigValue::Time(t) => Expression::int(t.in_unit() as i64),
            ConfigValue::Enum(e) => Expression::Raw(e.cpp.clone()),
            ConfigValue::Seq(items) => {
                Expression::Array(items.iter().map(Expression::from_config).collect::<Result<_, _>>()?)
            }
            other => return Err(format!("{} value '{}' is not an expression", other.kind(), other.display_scalar())),
        })
    }
}

impl From<Literal> for Expression {
    fn from(value: Literal) -> Self {
        Expression::Literal(value)
    }
}

impl From<Variable> for Expression {
    fn from(value: Variable) -> Self {
        Expression::Variable(value)
    }
}

// ------------------------------- Rendering -------------------------------- //

/// Quotes `s` as a C++ string literal; non-printable bytes become octal escapes.
pub fn cpp_string_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for byte in s.bytes() {
        match byte {
            b'\\' | b'"' => {
                out.push('\\');
                out.push(byte as char);
            }
            0x20..=0x7e => out.push(byte as char),
            _ => out.push_str(&format!("\\{byte:03o}")),
        }
    }
    out.push('"');
    out
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Str(s) => f.write_str(&cpp_string_escape(s)),
            Literal::Int(i) => {
                let suffix = if *i > 4_294_967_295 {
                    "ULL"
                } else if *i > 2_147_483_647 {
                    "UL"
                } else if *i < -2_147_483_648 {
                    "LL"
                } else {
                    ""
                };
                write!(f, "{i}{suffix}")
            }
            Literal::HexInt(i) if *i < 0 => write!(f, "-0x{:02X}", i.unsigned_abs()),
            Literal::HexInt(i) => write!(f, "0x{i:02X}"),
            Literal::Float(x) if x.is_nan() => f.write_str("NAN"),
            Literal::Float(x) => write!(f, "{x:.6}f"),
            Literal::Bool(b) => write!(f, "{b}"),
        }
    }
}

impl fmt::Display for TemplateArguments {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}>", join(&self.0))
    }
}

impl fmt::Display for LambdaExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params = self
            .params
            .iter()
            .map(|(ty, name)| format!("{ty} {name}"))
            .collect::<Vec<_>>()
            .join(", ");
        let mut cpp = format!("[{}]({params})", self.capture);
        if let Some(ret) = &self.return_type {
            cpp.push_str(&format!(" -> {ret}"));
        }
        cpp.push_str(&format!(" {{\n{}\n}}", self.body));
        f.write_str(&indent_all_but_first_and_last(&cpp))
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Literal(lit) => write!(f, "{lit}"),
            Expression::Raw(text) => f.write_str(text),
            Expression::Type(ty) => write!(f, "{ty}"),
            Expression::Variable(v) => f.write_str(&v.name),
            Expression::Call { callee, args } => write!(f, "{callee}({})", join(args)),
            Expression::TemplateInstantiation { base, args } => write!(f, "{base}{args}"),
            Expression::Member { base, op, name } => write!(f, "{base}{}{name}", op.as_str()),
            Expression::New { ty, args } => write!(f, "new {ty}({})", join(args)),
            Expression::Array(items) => write!(f, "{{{}}}", join(items)),
            Expression::Struct { ty, fields } => {
                writeln!(f, "{ty}{{")?;
                for (key, value) in fields {
                    writeln!(f, "  .{key} = {value},")?;
                }
                f.write_str("}")
            }
            Expression::Lambda(lambda) => write!(f, "{lambda}"),
        }
    }
}

fn join(items: &[Expression]) -> String {
    items.iter().map(|e| e.to_string()).collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::types::{FLOAT, VOID};

    #[test]
    fn int_literals_pick_the_narrowest_suffix() {
        assert_eq!(Expression::int(5).to_string(), "5");
        assert_eq!(Expression::int(2_147_483_648).to_string(), "2147483648UL");
        assert_eq!(Expression::int(4_294_967_296).to_string(), "4294967296ULL");
        assert_eq!(Expression::int(-2_147_483_649).to_string(), "-2147483649LL");
        assert_eq!(Expression::int(-2_147_483_648).to_string(), "-2147483648");
    }

    #[test]
    fn float_and_hex_literals() {
        assert_eq!(Expression::float(1.5).to_string(), "1.500000f");
        assert_eq!(Expression::Literal(Literal::HexInt(0x20)).to_string(), "0x20");
        assert_eq!(Expression::Literal(Literal::HexInt(10)).to_string(), "0x0A");
    }

    #[test]
    fn strings_are_escaped() {
        assert_eq!(Expression::string("a\"b\\c").to_string(), r#""a\"b\\c""#);
        assert_eq!(Expression::string("line\n").to_string(), r#""line\012""#);
    }

    #[test]
    fn method_calls_follow_pointer_semantics() {
        let var = Expression::Variable(Variable { name: "s".into(), ty: FLOAT.clone(), pointer: true });
        assert_eq!(var.method("set_name", vec![Expression::string("T")]).to_string(), "s->set_name(\"T\")");
        let ty = crate::ir::types::ESPHOME_NS.class("Foo", &[]);
        assert_eq!(ty.expr().method("bar", vec![]).to_string(), "Foo::bar()");
        assert_eq!(ty.new_instance(vec![Expression::int(1)]).to_string(), "new Foo(1)");
    }

    #[test]
    fn lambda_renders_with_indented_body() {
        let lambda = LambdaExpression {
            capture: "=".into(),
            params: vec![(FLOAT.clone(), "x".into())],
            body: "return x;".into(),
            return_type: Some(VOID.clone()),
        };
        assert_eq!(lambda.to_string(), "[=](float x) -> void {\n  return x;\n}");
    }

    #[test]
    fn config_scalars_lift_into_literals() {
        use crate::value::TimePeriod;
        let t = ConfigValue::Time(TimePeriod::from_millis(500));
        assert_eq!(Expression::from_config(&t).unwrap().to_string(), "500");
        let seq = ConfigValue::Seq(vec![ConfigValue::Int(1), ConfigValue::Bool(true)]);
        assert_eq!(Expression::from_config(&seq).unwrap().to_string(), "{1, true}");
        assert!(Expression::from_config(&ConfigValue::map()).is_err());
    }
}
