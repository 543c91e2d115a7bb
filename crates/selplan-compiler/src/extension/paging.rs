use super::{ExtensionContext, ExtensionError, FieldExtension};
use crate::schema::{ArgumentDef, InputType};
use selplan_ir::{Builtin, Expr, Param, ScalarType, Type};
use serde_json::{json, Value};

/// `skip`/`take` paging over a list field.
#[derive(Debug, Clone, Copy, Default)]
pub struct OffsetPagingExtension {
    pub default_take: Option<u64>,
    pub max_take: Option<u64>,
}

impl OffsetPagingExtension {
    pub fn new(default_take: Option<u64>, max_take: Option<u64>) -> Self {
        Self {
            default_take,
            max_take,
        }
    }
}

fn count_argument(ctx: &ExtensionContext<'_>, name: &str) -> Result<Option<u64>, ExtensionError> {
    match ctx.arguments.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value.as_u64().map(Some).ok_or_else(|| {
            ExtensionError::Argument(format!(
                "Argument '{name}' must be a non-negative integer, got {value}"
            ))
        }),
    }
}

impl FieldExtension for OffsetPagingExtension {
    fn name(&self) -> &str {
        "offset_paging"
    }

    fn arguments(&self) -> Vec<ArgumentDef> {
        vec![
            ArgumentDef::new("skip", InputType::scalar(ScalarType::Int))
                .with_description("Number of items to skip"),
            ArgumentDef::new("take", InputType::scalar(ScalarType::Int))
                .with_description("Maximum number of items to return"),
        ]
    }

    fn pre_selection(
        &self,
        ctx: &ExtensionContext<'_>,
        base: Expr,
        param: Option<Param>,
    ) -> Result<(Expr, Option<Param>), ExtensionError> {
        // Already sliced by the pass that materialized it.
        if ctx.materialized {
            return Ok((base, param));
        }
        let skip = count_argument(ctx, "skip")?;
        let take = count_argument(ctx, "take")?
            .or(self.default_take)
            .or(self.max_take);
        if let (Some(take), Some(max)) = (take, self.max_take) {
            if take > max {
                return Err(ExtensionError::Argument(format!(
                    "Requested take {take} exceeds the maximum of {max} for field '{}'",
                    ctx.field.name
                )));
            }
        }

        let count = |n: u64| Expr::constant(json!(n), Type::scalar(ScalarType::Int).non_null());
        let mut list = base;
        if let Some(skip) = skip.filter(|n| *n > 0) {
            list = Expr::builtin(Builtin::Skip, vec![list, count(skip)]);
        }
        if let Some(take) = take {
            list = Expr::builtin(Builtin::Take, vec![list, count(take)]);
        }
        Ok((list, param))
    }
}
