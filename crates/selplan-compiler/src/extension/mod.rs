//! Field extensions.
//!
//! An extension layers a query feature (sorting, paging, filtering) onto any
//! field without the node compiler knowing about it. A field's extensions run
//! in registration order at three hook points, each hook receiving the
//! previous extension's output:
//! - `pre_selection`: the base expression (and, for lists, the element
//!   parameter) before children are compiled;
//! - `selection`: the base expression and the compiled selection set right
//!   before the result object is built;
//! - `scalar_expression`: the resolved expression of a scalar field.

mod paging;
mod sort;

pub use paging::OffsetPagingExtension;
pub use sort::SortExtension;

use crate::error::{CompileError, FieldPath};
use crate::schema::{ArgumentDef, FieldDef, Schema};
use indexmap::IndexMap;
use selplan_ir::{Expr, Param};
use serde_json::{Map, Value};
use std::fmt;

/// Compiled children of a node, keyed by output name in selection order.
pub type SelectionSet = IndexMap<String, Expr>;

pub struct ExtensionContext<'a> {
    pub schema: &'a Schema,
    pub field: &'a FieldDef,
    /// Resolved and validated arguments of the node.
    pub arguments: &'a Map<String, Value>,
    pub path: &'a FieldPath,
    /// The base expression reads a value already materialized by the
    /// service-free pass.
    pub materialized: bool,
    pub service_pass: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExtensionError {
    #[error("{0}")]
    Argument(String),

    #[error("{0}")]
    Other(String),
}

pub trait FieldExtension: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// Arguments this extension adds to the field it is attached to.
    fn arguments(&self) -> Vec<ArgumentDef> {
        vec![]
    }

    fn pre_selection(
        &self,
        _ctx: &ExtensionContext<'_>,
        base: Expr,
        param: Option<Param>,
    ) -> Result<(Expr, Option<Param>), ExtensionError> {
        Ok((base, param))
    }

    fn selection(
        &self,
        _ctx: &ExtensionContext<'_>,
        base: Expr,
        selection: SelectionSet,
        param: Option<Param>,
    ) -> Result<(Expr, SelectionSet, Option<Param>), ExtensionError> {
        Ok((base, selection, param))
    }

    fn scalar_expression(
        &self,
        _ctx: &ExtensionContext<'_>,
        expr: Expr,
    ) -> Result<Expr, ExtensionError> {
        Ok(expr)
    }
}

// ============================================================================
// Chain folds
// ============================================================================

fn lift(ctx: &ExtensionContext<'_>, extension: &dyn FieldExtension, error: ExtensionError) -> CompileError {
    match error {
        ExtensionError::Argument(message) => CompileError::argument(ctx.path, message),
        ExtensionError::Other(message) => {
            CompileError::extension(ctx.path, extension.name(), message)
        }
    }
}

pub(crate) fn pre_selection(
    ctx: &ExtensionContext<'_>,
    base: Expr,
    param: Option<Param>,
) -> Result<(Expr, Option<Param>), CompileError> {
    ctx.field
        .extensions
        .iter()
        .try_fold((base, param), |(base, param), extension| {
            extension
                .pre_selection(ctx, base, param)
                .map_err(|e| lift(ctx, extension.as_ref(), e))
        })
}

pub(crate) fn selection(
    ctx: &ExtensionContext<'_>,
    base: Expr,
    selection: SelectionSet,
    param: Option<Param>,
) -> Result<(Expr, SelectionSet, Option<Param>), CompileError> {
    ctx.field.extensions.iter().try_fold(
        (base, selection, param),
        |(base, selection, param), extension| {
            extension
                .selection(ctx, base, selection, param)
                .map_err(|e| lift(ctx, extension.as_ref(), e))
        },
    )
}

pub(crate) fn scalar_expression(ctx: &ExtensionContext<'_>, expr: Expr) -> Result<Expr, CompileError> {
    ctx.field
        .extensions
        .iter()
        .try_fold(expr, |expr, extension| {
            extension
                .scalar_expression(ctx, expr)
                .map_err(|e| lift(ctx, extension.as_ref(), e))
        })
}
