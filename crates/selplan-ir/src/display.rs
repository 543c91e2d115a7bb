//! Plan printing: a compact single-line form (`Display`) and an indented form
//! for humans (`pretty`).

use crate::expr::{Expr, Param};
use std::fmt::{self, Write};

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn write_args(f: &mut impl Write, args: &[Expr]) -> fmt::Result {
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{arg}")?;
    }
    Ok(())
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Param(param) => write!(f, "{param}"),
            Expr::Constant { value, .. } => write!(f, "{value}"),
            Expr::Null { .. } => f.write_str("null"),
            Expr::ServiceRef { service } => write!(f, "@{service}"),
            Expr::Member { target, name, .. } => write!(f, "{target}.{name}"),
            Expr::Condition {
                test,
                if_true,
                if_false,
            } => write!(f, "({test} ? {if_true} : {if_false})"),
            Expr::Equal { lhs, rhs } => write!(f, "{lhs} == {rhs}"),
            Expr::Builtin { function, args } => {
                write!(f, "{}(", function.name())?;
                write_args(f, args)?;
                f.write_str(")")
            }
            Expr::Invoke {
                receiver,
                method,
                args,
                ..
            } => {
                write!(f, "{receiver}.{method}(")?;
                write_args(f, args)?;
                f.write_str(")")
            }
            Expr::Lambda { param, body } => write!(f, "|{param}| {body}"),
            Expr::New { shape, fields } => {
                write!(f, "new {} {{", shape.name)?;
                for (i, (name, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, " {name}: {value}")?;
                }
                f.write_str(" }")
            }
            Expr::Select {
                source,
                param,
                body,
            } => write!(f, "{source}.select(|{param}| {body})"),
            Expr::Let { param, value, body } => write!(f, "let {param} = {value} in {body}"),
        }
    }
}

/// Multi-line rendering: constructions, binders and projections are broken
/// over indented lines, everything else prints inline.
pub fn pretty(expr: &Expr) -> String {
    let mut out = String::new();
    // Writing into a String cannot fail.
    let _ = Pretty { out: &mut out }.expr(expr, 0);
    out
}

struct Pretty<'a> {
    out: &'a mut String,
}

impl Pretty<'_> {
    fn indent(&mut self, depth: usize) {
        for _ in 0..depth {
            self.out.push_str("  ");
        }
    }

    fn expr(&mut self, expr: &Expr, depth: usize) -> fmt::Result {
        match expr {
            Expr::New { shape, fields } => {
                writeln!(self.out, "new {} {{", shape.name)?;
                for (name, value) in fields {
                    self.indent(depth + 1);
                    write!(self.out, "{name}: ")?;
                    self.expr(value, depth + 1)?;
                    self.out.push('\n');
                }
                self.indent(depth);
                self.out.push('}');
                Ok(())
            }
            Expr::Let { param, value, body } => {
                writeln!(self.out, "let {param} = {value} in")?;
                self.indent(depth);
                self.expr(body, depth)
            }
            Expr::Condition {
                test,
                if_true,
                if_false,
            } => {
                write!(self.out, "{test} ? ")?;
                self.expr(if_true, depth)?;
                self.out.push_str(" : ");
                self.expr(if_false, depth)
            }
            Expr::Select {
                source,
                param,
                body,
            } => {
                write!(self.out, "{source}.select(|{param}| ")?;
                self.expr(body, depth)?;
                self.out.push(')');
                Ok(())
            }
            other => write!(self.out, "{other}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ScalarType, Type};

    #[test]
    fn compact_form_reads_like_an_expression() {
        let p = Param::fresh("p", Type::entity("Person").non_null());
        let name = Expr::member(p.expr(), "name", Type::scalar(ScalarType::String));
        let record = Expr::new_record("person", vec![("name".to_string(), name)]);
        assert_eq!(record.to_string(), "new person { name: p.name }");
    }

    #[test]
    fn pretty_breaks_constructions_over_lines() {
        let p = Param::fresh("p", Type::entity("Person").non_null());
        let record = Expr::new_record(
            "person",
            vec![
                (
                    "id".to_string(),
                    Expr::member(p.expr(), "id", Type::scalar(ScalarType::Id)),
                ),
                (
                    "name".to_string(),
                    Expr::member(p.expr(), "name", Type::scalar(ScalarType::String)),
                ),
            ],
        );
        assert_eq!(pretty(&record), "new person {\n  id: p.id\n  name: p.name\n}");
    }
}
