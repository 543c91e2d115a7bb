//! # selplan-ir
//!
//! Neutral expression IR used by the selection compiler:
//! - [`types`]: static types (scalars, schema entities, plan-built records, lists)
//! - [`expr`]: the expression tree and its builders
//! - [`rewrite`]: context rewriting (identity, type and name directed)
//! - [`display`]: plan printing

pub mod display;
pub mod expr;
pub mod rewrite;
pub mod types;

pub use display::pretty;
pub use expr::{Builtin, Expr, Param, ParamId, SortDirection};
pub use rewrite::{
    member_by_name, replace, replace_all, replace_by_type, replace_param, replace_params_by_type,
};
pub use types::{RecordShape, ScalarType, ServiceId, Type, TypeKind};
