//! Context rewriting.
//!
//! Substitution over [`Expr`] trees, by:
//! - exact identity (`replace`, `replace_param`, `replace_all`),
//! - static type (`replace_by_type`, `replace_params_by_type`),
//! - field name (`member_by_name`).
//!
//! Rewriting keeps static types coherent: a member access whose target
//! becomes a record exposing that member takes the record's member type,
//! constructions recompute their shape, and `Select`/`Let` binders are
//! re-typed when their source changes type.

use crate::expr::{Builtin, Expr, Param};
use crate::types::Type;

// ============================================================================
// Public API
// ============================================================================

/// Replace every sub-expression structurally equal to `target`.
pub fn replace(expr: &Expr, target: &Expr, replacement: &Expr) -> Expr {
    replace_all(expr, &[(target.clone(), replacement.clone())])
}

pub fn replace_param(expr: &Expr, param: &Param, replacement: &Expr) -> Expr {
    replace(expr, &param.expr(), replacement)
}

/// Apply several identity replacements in one traversal; the first matching
/// pair wins at each node.
pub fn replace_all(expr: &Expr, pairs: &[(Expr, Expr)]) -> Expr {
    if pairs.is_empty() {
        return expr.clone();
    }
    Rewriter::new(Identity { pairs }).rewrite(expr).0
}

/// Replace the minimal free sub-expressions whose type has the same shape as
/// `target` (nullability ignored).
///
/// Literals never qualify, and neither does a sub-expression mentioning a
/// parameter bound inside `expr` (lambda, select or let binder).
pub fn replace_by_type(expr: &Expr, target: &Type, replacement: &Expr) -> Expr {
    Rewriter::new(ByType {
        target,
        replacement,
    })
    .rewrite(expr)
    .0
}

/// Like [`replace_by_type`], restricted to free parameter references.
pub fn replace_params_by_type(expr: &Expr, target: &Type, replacement: &Expr) -> Expr {
    Rewriter::new(ParamsByType {
        target,
        replacement,
    })
    .rewrite(expr)
    .0
}

/// Field-name match: `context.name` when `context` is a record exposing `name`.
pub fn member_by_name(context: &Expr, name: &str) -> Option<Expr> {
    Expr::record_member(context, name)
}

// ============================================================================
// Rules
// ============================================================================

trait Rule {
    /// Tried before descending; a hit stops the traversal below this node.
    fn pre(&mut self, _expr: &Expr, _bound: &[Param]) -> Option<Expr> {
        None
    }

    /// Tried after descending, only when no descendant was rewritten.
    fn post(&mut self, _expr: &Expr, _bound: &[Param]) -> Option<Expr> {
        None
    }
}

struct Identity<'a> {
    pairs: &'a [(Expr, Expr)],
}

impl Rule for Identity<'_> {
    fn pre(&mut self, expr: &Expr, _bound: &[Param]) -> Option<Expr> {
        self.pairs
            .iter()
            .find(|(target, _)| target == expr)
            .map(|(_, replacement)| replacement.clone())
    }
}

struct ByType<'a> {
    target: &'a Type,
    replacement: &'a Expr,
}

impl Rule for ByType<'_> {
    fn post(&mut self, expr: &Expr, bound: &[Param]) -> Option<Expr> {
        // An existing occurrence of the replacement counts as a match so that
        // its ancestors are not minimal.
        if expr == self.replacement {
            return Some(expr.clone());
        }
        if matches!(expr, Expr::Null { .. } | Expr::Constant { .. }) {
            return None;
        }
        if !expr.ty().same_shape(self.target) {
            return None;
        }
        if bound.iter().any(|param| expr.mentions(param)) {
            return None;
        }
        Some(self.replacement.clone())
    }
}

struct ParamsByType<'a> {
    target: &'a Type,
    replacement: &'a Expr,
}

impl Rule for ParamsByType<'_> {
    fn pre(&mut self, expr: &Expr, bound: &[Param]) -> Option<Expr> {
        match expr {
            Expr::Param(param)
                if expr != self.replacement
                    && param.ty().same_shape(self.target)
                    && !bound.contains(param) =>
            {
                Some(self.replacement.clone())
            }
            _ => None,
        }
    }
}

// ============================================================================
// Traversal
// ============================================================================

struct Rewriter<R> {
    rule: R,
    bound: Vec<Param>,
}

impl<R: Rule> Rewriter<R> {
    fn new(rule: R) -> Self {
        Self {
            rule,
            bound: Vec::new(),
        }
    }

    /// Returns the rewritten expression and whether anything changed.
    fn rewrite(&mut self, expr: &Expr) -> (Expr, bool) {
        if let Some(replacement) = self.rule.pre(expr, &self.bound) {
            return (replacement, true);
        }
        let (rebuilt, changed) = self.descend(expr);
        if !changed {
            if let Some(replacement) = self.rule.post(expr, &self.bound) {
                return (replacement, true);
            }
        }
        (rebuilt, changed)
    }

    fn rewrite_boxed(&mut self, expr: &Expr, changed: &mut bool) -> Expr {
        let (out, c) = self.rewrite(expr);
        *changed |= c;
        out
    }

    fn rewrite_list(&mut self, exprs: &[Expr], changed: &mut bool) -> Vec<Expr> {
        exprs
            .iter()
            .map(|expr| self.rewrite_boxed(expr, changed))
            .collect()
    }

    fn descend(&mut self, expr: &Expr) -> (Expr, bool) {
        let mut changed = false;
        let out = match expr {
            Expr::Param(_) | Expr::Constant { .. } | Expr::Null { .. } | Expr::ServiceRef { .. } => {
                expr.clone()
            }
            Expr::Member { target, name, ty } => {
                let target = self.rewrite_boxed(target, &mut changed);
                let ty = target.ty().member(name).cloned().unwrap_or_else(|| ty.clone());
                Expr::member(target, name.clone(), ty)
            }
            Expr::Condition {
                test,
                if_true,
                if_false,
            } => Expr::condition(
                self.rewrite_boxed(test, &mut changed),
                self.rewrite_boxed(if_true, &mut changed),
                self.rewrite_boxed(if_false, &mut changed),
            ),
            Expr::Equal { lhs, rhs } => Expr::equal(
                self.rewrite_boxed(lhs, &mut changed),
                self.rewrite_boxed(rhs, &mut changed),
            ),
            Expr::Builtin { function, args } => {
                let args = self.rewrite_list(args, &mut changed);
                Expr::builtin(*function, retype_key_lambda(*function, args))
            }
            Expr::Invoke {
                receiver,
                method,
                args,
                ty,
            } => Expr::invoke(
                self.rewrite_boxed(receiver, &mut changed),
                method.clone(),
                self.rewrite_list(args, &mut changed),
                ty.clone(),
            ),
            Expr::Lambda { param, body } => {
                let body = self.rewrite_bound(param, body, &mut changed);
                Expr::lambda(param.clone(), body)
            }
            Expr::New { shape, fields } => {
                let fields = fields
                    .iter()
                    .map(|(name, value)| (name.clone(), self.rewrite_boxed(value, &mut changed)))
                    .collect();
                Expr::new_record(shape.name.clone(), fields)
            }
            Expr::Select {
                source,
                param,
                body,
            } => {
                let source = self.rewrite_boxed(source, &mut changed);
                let body = self.rewrite_bound(param, body, &mut changed);
                let element = source.ty().element().cloned();
                let (param, body) = retype_binder(param, element, body);
                Expr::select(source, param, body)
            }
            Expr::Let { param, value, body } => {
                let value = self.rewrite_boxed(value, &mut changed);
                let body = self.rewrite_bound(param, body, &mut changed);
                let (param, body) = retype_binder(param, Some(value.ty()), body);
                Expr::let_in(param, value, body)
            }
        };
        (out, changed)
    }

    fn rewrite_bound(&mut self, param: &Param, body: &Expr, changed: &mut bool) -> Expr {
        self.bound.push(param.clone());
        let body = self.rewrite_boxed(body, changed);
        self.bound.pop();
        body
    }
}

/// Give a binder a fresh parameter of `ty` when its value changed type.
fn retype_binder(param: &Param, ty: Option<Type>, body: Expr) -> (Param, Expr) {
    match ty {
        Some(ty) if &ty != param.ty() => {
            let fresh = Param::fresh(param.name(), ty);
            let body = replace_param(&body, param, &fresh.expr());
            (fresh, body)
        }
        _ => (param.clone(), body),
    }
}

/// Sort keys are lambdas over the list element; keep them typed after the list
/// itself was re-pointed.
fn retype_key_lambda(function: Builtin, mut args: Vec<Expr>) -> Vec<Expr> {
    if !matches!(function, Builtin::OrderBy(_) | Builtin::ThenBy(_)) || args.len() != 2 {
        return args;
    }
    let element = args[0].ty().element().cloned();
    if let Expr::Lambda { param, body } = &args[1] {
        let (param, body) = retype_binder(param, element, body.as_ref().clone());
        args[1] = Expr::lambda(param, body);
    }
    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ScalarType;

    fn string() -> Type {
        Type::scalar(ScalarType::String)
    }

    #[test]
    fn replace_is_identity_based() {
        let a = Param::fresh("a", Type::entity("Person").non_null());
        let b = Param::fresh("b", Type::entity("Person").non_null());
        let expr = Expr::equal(
            Expr::member(a.expr(), "name", string()),
            Expr::member(b.expr(), "name", string()),
        );
        let ctx = Param::fresh("ctx", Type::entity("Person").non_null());
        let out = replace_param(&expr, &a, &ctx.expr());
        assert!(out.mentions(&ctx));
        assert!(out.mentions(&b));
        assert!(!out.mentions(&a));
    }

    #[test]
    fn member_types_follow_record_targets() {
        let p = Param::fresh("p", Type::entity("Person").non_null());
        let access = Expr::member(p.expr(), "age", Type::json());
        let record = Expr::new_record(
            "person",
            vec![(
                "age".to_string(),
                Expr::constant(serde_json::json!(3), Type::scalar(ScalarType::Int).non_null()),
            )],
        );
        let out = replace_param(&access, &p, &record);
        assert_eq!(out.ty(), Type::scalar(ScalarType::Int).non_null());
    }

    #[test]
    fn by_type_skips_select_bound_parameters() {
        let person = Type::entity("Person").non_null();
        let root = Param::fresh("root", person.clone());
        let friend = Param::fresh("f", person.clone());
        let friends = Expr::member(root.expr(), "friends", Type::list(person.clone()));
        let expr = Expr::select(
            friends,
            friend.clone(),
            Expr::new_record(
                "friends",
                vec![(
                    "name".to_string(),
                    Expr::member(friend.expr(), "name", string()),
                )],
            ),
        );
        let wrap = Param::fresh("wrap", person.clone());
        let out = replace_by_type(&expr, &person, &wrap.expr());
        assert!(out.mentions(&wrap));
        assert!(!out.mentions(&root));
        assert!(out.mentions(&friend));
    }

    #[test]
    fn by_type_does_not_climb_above_an_existing_replacement() {
        let person = Type::entity("Person").non_null();
        let wrap = Param::fresh("wrap", person.clone());
        let related = Expr::member(wrap.expr(), "related", Type::entity("Person"));
        let expr = Expr::member(related.clone(), "name", string());
        let out = replace_by_type(&expr, &person, &wrap.expr());
        assert_eq!(out, expr);
    }

    #[test]
    fn params_by_type_only_touches_parameters() {
        let person = Type::entity("Person").non_null();
        let old = Param::fresh("old", person.clone());
        let wrap = Param::fresh("wrap", person.clone());
        let expr = Expr::member(
            Expr::member(old.expr(), "manager", Type::entity("Person")),
            "name",
            string(),
        );
        let out = replace_params_by_type(&expr, &person, &wrap.expr());
        let expected = Expr::member(
            Expr::member(wrap.expr(), "manager", Type::entity("Person")),
            "name",
            string(),
        );
        assert_eq!(out, expected);
    }

    #[test]
    fn select_binder_is_retyped_when_source_becomes_records() {
        let person = Type::entity("Person").non_null();
        let root = Param::fresh("root", Type::entity("Query").non_null());
        let p = Param::fresh("p", person.clone());
        let people = Expr::member(root.expr(), "people", Type::list(person));
        let expr = Expr::select(
            people.clone(),
            p.clone(),
            Expr::member(p.expr(), "name", string()),
        );
        let item = Expr::new_record(
            "people",
            vec![(
                "name".to_string(),
                Expr::constant(serde_json::json!("x"), string().non_null()),
            )],
        );
        let materialized = Param::fresh("m", Type::list(item.ty()).non_null());
        let out = replace(&expr, &people, &materialized.expr());
        let Expr::Select { param, body, .. } = &out else {
            panic!("expected select");
        };
        assert!(param.ty().as_record().is_some());
        assert_eq!(body.ty(), string().non_null());
    }
}
