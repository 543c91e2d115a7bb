//! Expression tree for compiled plans.
//!
//! A plan is an ordinary expression over one root parameter. The node set is
//! intentionally small: member access, conditional, equality, builtin and
//! service invocation, lambdas, record construction, list projection and a
//! single-evaluation binder (`Let`).

use crate::types::{RecordShape, ScalarType, ServiceId, Type};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ParamId(u64);

impl ParamId {
    pub const fn raw(self) -> u64 {
        self.0
    }
}

static NEXT_PARAM_ID: AtomicU64 = AtomicU64::new(1);

/// A bound variable. Identity is the `ParamId`; the name is for display only.
#[derive(Debug, Clone, Serialize)]
pub struct Param {
    id: ParamId,
    name: String,
    ty: Type,
}

impl Param {
    pub fn fresh(name: impl Into<String>, ty: Type) -> Self {
        Self {
            id: ParamId(NEXT_PARAM_ID.fetch_add(1, Ordering::Relaxed)),
            name: name.into(),
            ty,
        }
    }

    pub fn id(&self) -> ParamId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ty(&self) -> &Type {
        &self.ty
    }

    pub fn expr(&self) -> Expr {
        Expr::Param(self.clone())
    }
}

impl PartialEq for Param {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Param {}

impl Hash for Param {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SortDirection {
    #[serde(rename = "ASC")]
    Ascending,
    #[serde(rename = "DESC")]
    Descending,
}

impl SortDirection {
    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "ASC" | "asc" => Some(Self::Ascending),
            "DESC" | "desc" => Some(Self::Descending),
            _ => None,
        }
    }
}

/// Pure list functions understood by every executor.
///
/// `OrderBy`/`ThenBy` take `(list, lambda)`; `Skip`/`Take` take `(list, count)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "fn", content = "direction", rename_all = "snake_case")]
pub enum Builtin {
    Skip,
    Take,
    OrderBy(SortDirection),
    ThenBy(SortDirection),
    Count,
}

impl Builtin {
    pub fn name(self) -> &'static str {
        match self {
            Self::Skip => "skip",
            Self::Take => "take",
            Self::OrderBy(SortDirection::Ascending) => "order_by",
            Self::OrderBy(SortDirection::Descending) => "order_by_desc",
            Self::ThenBy(SortDirection::Ascending) => "then_by",
            Self::ThenBy(SortDirection::Descending) => "then_by_desc",
            Self::Count => "count",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Expr {
    Param(Param),
    Constant {
        value: Value,
        ty: Type,
    },
    Null {
        ty: Type,
    },
    /// Placeholder for a service instance; bound to a parameter before execution.
    ServiceRef {
        service: ServiceId,
    },
    Member {
        target: Box<Expr>,
        name: String,
        ty: Type,
    },
    Condition {
        test: Box<Expr>,
        if_true: Box<Expr>,
        if_false: Box<Expr>,
    },
    Equal {
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Builtin {
        function: Builtin,
        args: Vec<Expr>,
    },
    /// Method call on a service receiver.
    Invoke {
        receiver: Box<Expr>,
        method: String,
        args: Vec<Expr>,
        ty: Type,
    },
    Lambda {
        param: Param,
        body: Box<Expr>,
    },
    New {
        shape: Arc<RecordShape>,
        fields: Vec<(String, Expr)>,
    },
    Select {
        source: Box<Expr>,
        param: Param,
        body: Box<Expr>,
    },
    /// Evaluate `value` exactly once, bind it to `param`, then evaluate `body`.
    Let {
        param: Param,
        value: Box<Expr>,
        body: Box<Expr>,
    },
}

impl Expr {
    pub fn constant(value: Value, ty: Type) -> Self {
        Self::Constant { value, ty }
    }

    pub fn null(ty: Type) -> Self {
        Self::Null { ty: ty.or_null() }
    }

    pub fn service(service: ServiceId) -> Self {
        Self::ServiceRef { service }
    }

    pub fn member(target: Expr, name: impl Into<String>, ty: Type) -> Self {
        Self::Member {
            target: Box::new(target),
            name: name.into(),
            ty,
        }
    }

    /// Member access when `target` is a record exposing `name`.
    pub fn record_member(target: &Expr, name: &str) -> Option<Self> {
        let ty = target.ty().member(name)?.clone();
        Some(Self::member(target.clone(), name, ty))
    }

    pub fn condition(test: Expr, if_true: Expr, if_false: Expr) -> Self {
        Self::Condition {
            test: Box::new(test),
            if_true: Box::new(if_true),
            if_false: Box::new(if_false),
        }
    }

    pub fn equal(lhs: Expr, rhs: Expr) -> Self {
        Self::Equal {
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn is_null(expr: Expr) -> Self {
        let ty = expr.ty();
        Self::equal(expr, Self::null(ty))
    }

    /// `guard == null ? null : build`
    pub fn null_guarded(guard: Expr, build: Expr) -> Self {
        let ty = build.ty();
        Self::condition(Self::is_null(guard), Self::null(ty), build)
    }

    pub fn builtin(function: Builtin, args: Vec<Expr>) -> Self {
        Self::Builtin { function, args }
    }

    pub fn invoke(receiver: Expr, method: impl Into<String>, args: Vec<Expr>, ty: Type) -> Self {
        Self::Invoke {
            receiver: Box::new(receiver),
            method: method.into(),
            args,
            ty,
        }
    }

    pub fn lambda(param: Param, body: Expr) -> Self {
        Self::Lambda {
            param,
            body: Box::new(body),
        }
    }

    pub fn new_record(name: impl Into<String>, fields: Vec<(String, Expr)>) -> Self {
        let shape = RecordShape {
            name: name.into(),
            fields: fields
                .iter()
                .map(|(field, expr)| (field.clone(), expr.ty()))
                .collect(),
        };
        Self::New {
            shape: Arc::new(shape),
            fields,
        }
    }

    pub fn select(source: Expr, param: Param, body: Expr) -> Self {
        Self::Select {
            source: Box::new(source),
            param,
            body: Box::new(body),
        }
    }

    pub fn let_in(param: Param, value: Expr, body: Expr) -> Self {
        Self::Let {
            param,
            value: Box::new(value),
            body: Box::new(body),
        }
    }

    pub fn ty(&self) -> Type {
        match self {
            Self::Param(param) => param.ty().clone(),
            Self::Constant { ty, .. } | Self::Null { ty } => ty.clone(),
            Self::ServiceRef { service } => Type::service(service.clone()),
            Self::Member { ty, .. } | Self::Invoke { ty, .. } => ty.clone(),
            Self::Condition {
                if_true, if_false, ..
            } => match (if_true.as_ref(), if_false.as_ref()) {
                (Self::Null { .. }, other) | (other, Self::Null { .. }) => other.ty().or_null(),
                (a, b) => {
                    let mut ty = a.ty();
                    ty.nullable |= b.ty().nullable;
                    ty
                }
            },
            Self::Equal { .. } => Type::boolean(),
            Self::Builtin { function, args } => match function {
                Builtin::Count => Type::scalar(ScalarType::Int).non_null(),
                _ => args.first().map(Self::ty).unwrap_or_else(Type::json),
            },
            Self::Lambda { body, .. } | Self::Let { body, .. } => body.ty(),
            Self::New { shape, .. } => Type::record(shape.clone()),
            Self::Select { body, .. } => Type::list(body.ty()).non_null(),
        }
    }

    pub fn is_construction(&self) -> bool {
        matches!(self, Self::New { .. })
    }

    /// Direct sub-expressions in evaluation order.
    pub fn children(&self) -> Vec<&Expr> {
        match self {
            Self::Param(_) | Self::Constant { .. } | Self::Null { .. } | Self::ServiceRef { .. } => {
                vec![]
            }
            Self::Member { target, .. } => vec![target],
            Self::Condition {
                test,
                if_true,
                if_false,
            } => vec![test, if_true, if_false],
            Self::Equal { lhs, rhs } => vec![lhs, rhs],
            Self::Builtin { args, .. } => args.iter().collect(),
            Self::Invoke { receiver, args, .. } => {
                std::iter::once(receiver.as_ref()).chain(args.iter()).collect()
            }
            Self::Lambda { body, .. } => vec![body],
            Self::New { fields, .. } => fields.iter().map(|(_, expr)| expr).collect(),
            Self::Select { source, body, .. } => vec![source, body],
            Self::Let { value, body, .. } => vec![value, body],
        }
    }

    /// Pre-order traversal.
    pub fn walk<'e>(&'e self, f: &mut impl FnMut(&'e Expr)) {
        f(self);
        for child in self.children() {
            child.walk(f);
        }
    }

    pub fn count_where(&self, pred: impl Fn(&Expr) -> bool) -> usize {
        let mut count = 0;
        self.walk(&mut |expr| {
            if pred(expr) {
                count += 1;
            }
        });
        count
    }

    pub fn contains(&self, target: &Expr) -> bool {
        self.count_where(|expr| expr == target) > 0
    }

    pub fn mentions(&self, param: &Param) -> bool {
        self.count_where(|expr| matches!(expr, Self::Param(p) if p == param)) > 0
    }

    /// Distinct services referenced through `ServiceRef`, in first-seen order.
    pub fn services(&self) -> Vec<ServiceId> {
        let mut out: Vec<ServiceId> = Vec::new();
        self.walk(&mut |expr| {
            if let Self::ServiceRef { service } = expr {
                if !out.contains(service) {
                    out.push(service.clone());
                }
            }
        });
        out
    }
}
