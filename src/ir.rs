//! Typed representation of the generated C++.
//!
//! Generators never build C++ text by hand: they compose [`Expression`]s and
//! push [`Statement`]s into the statement stream. Rendering (`Display`) is the
//! only place that knows about C++ spelling.
pub mod expr;
pub mod stmt;
pub mod types;

pub use expr::{Expression, LambdaExpression, Literal, MemberOp, TemplateArguments, Variable, app};
pub use stmt::{Define, Library, Statement};
pub use types::{Namespace, TypeRef};

/// `(type, name)` parameter list of an automation, e.g. `[(float, "x")]`.
pub type AutomationArgs = Vec<(TypeRef, String)>;

/// Indents every line but the first and the last by two spaces.
pub fn indent_all_but_first_and_last(text: &str) -> String {
    let lines: Vec<&str> = text.split('\n').collect();
    if lines.len() <= 2 {
        return text.to_string();
    }
    let last = lines.len() - 1;
    lines
        .iter()
        .enumerate()
        .map(|(i, line)| {
            if i == 0 || i == last || line.is_empty() {
                line.to_string()
            } else {
                format!("  {line}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Indents every non-empty line by `width` spaces.
pub fn indent(text: &str, width: usize) -> String {
    let pad = " ".repeat(width);
    text.split('\n')
        .map(|line| if line.is_empty() { String::new() } else { format!("{pad}{line}") })
        .collect::<Vec<_>>()
        .join("\n")
}
