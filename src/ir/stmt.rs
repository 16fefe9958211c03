use std::fmt;

use serde::Serialize;

use super::expr::Expression;
use super::types::TypeRef;

/// One entry of the statement stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// `expr;`
    Expression(Expression),
    Raw(String),
    /// Global `Type *id;` plus `id = init;` in `setup()`.
    PVariableDecl { id: String, ty: TypeRef, init: Expression },
    LineComment(String),
    /// `using namespace ns;`
    GlobalUsing(String),
}

impl Statement {
    /// Declaration hoisted above `setup()`, if the statement needs one.
    pub fn global_declaration(&self) -> Option<String> {
        match self {
            Statement::PVariableDecl { id, ty, .. } => Some(format!("{ty} *{id};")),
            _ => None,
        }
    }
}

impl From<Expression> for Statement {
    fn from(value: Expression) -> Self {
        Statement::Expression(value)
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Statement::Expression(expr) => write!(f, "{expr};"),
            Statement::Raw(text) => f.write_str(text),
            Statement::PVariableDecl { id, init, .. } => write!(f, "{id} = {init};"),
            Statement::LineComment(text) => {
                let lines: Vec<String> = text.lines().map(|l| format!("// {l}")).collect();
                f.write_str(&lines.join("\n"))
            }
            Statement::GlobalUsing(ns) => write!(f, "using namespace {ns};"),
        }
    }
}

/// Preprocessor define, emitted both as `-D` flag and into `defines.h`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Define {
    pub name: String,
    pub value: Option<String>,
}

impl Define {
    pub fn new(name: impl Into<String>, value: Option<String>) -> Self {
        Self { name: name.into(), value }
    }
    pub fn as_build_flag(&self) -> String {
        match &self.value {
            Some(value) => format!("-D{}={value}", self.name),
            None => format!("-D{}", self.name),
        }
    }
    pub fn as_macro(&self) -> String {
        match &self.value {
            Some(value) => format!("#define {} {value}", self.name),
            None => format!("#define {}", self.name),
        }
    }
}

/// PlatformIO library dependency, `name@version`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Library {
    pub name: String,
    pub version: Option<String>,
}

impl Library {
    pub fn new(name: impl Into<String>, version: Option<String>) -> Self {
        Self { name: name.into(), version }
    }
    /// `"ArduinoJson@6.18.5"` or a bare name.
    pub fn parse(spec: &str) -> Self {
        match spec.split_once('@') {
            Some((name, version)) => Self::new(name.trim(), Some(version.trim().to_string())),
            None => Self::new(spec.trim(), None),
        }
    }
    pub fn as_lib_dep(&self) -> String {
        match &self.version {
            Some(version) => format!("{}@{version}", self.name),
            None => self.name.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::types::FLOAT;

    #[test]
    fn pvariable_splits_into_global_and_setup_parts() {
        let stmt = Statement::PVariableDecl {
            id: "t".into(),
            ty: FLOAT.clone(),
            init: Expression::raw("new float()"),
        };
        assert_eq!(stmt.global_declaration().as_deref(), Some("float *t;"));
        assert_eq!(stmt.to_string(), "t = new float();");
    }

    #[test]
    fn defines_render_both_ways() {
        let plain = Define::new("USE_SENSOR", None);
        let valued = Define::new("ESPHOME_LOG_LEVEL", Some("ESPHOME_LOG_LEVEL_DEBUG".into()));
        assert_eq!(plain.as_build_flag(), "-DUSE_SENSOR");
        assert_eq!(valued.as_macro(), "#define ESPHOME_LOG_LEVEL ESPHOME_LOG_LEVEL_DEBUG");
    }

    #[test]
    fn library_specs_parse() {
        assert_eq!(Library::parse("FastLED@3.3.2").as_lib_dep(), "FastLED@3.3.2");
        assert_eq!(Library::parse("Wire").version, None);
    }
}
