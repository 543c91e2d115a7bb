use super::{ExtensionContext, ExtensionError, FieldExtension};
use crate::schema::{ArgumentDef, InputType};
use selplan_ir::{replace_param, Builtin, Expr, Param, ScalarType, SortDirection};
use serde_json::Value;

/// Orders a list field by one or more element fields.
///
/// Argument `sort` takes `{ "name": "ASC" }` or a list of such objects; keys
/// apply in the order given.
#[derive(Debug, Clone, Default)]
pub struct SortExtension {
    default: Vec<(String, SortDirection)>,
}

impl SortExtension {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ordering used when the request does not pass `sort`.
    pub fn with_default(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.default.push((field.into(), direction));
        self
    }

    fn keys(&self, value: Option<&Value>) -> Result<Vec<(String, SortDirection)>, ExtensionError> {
        let Some(value) = value.filter(|value| !value.is_null()) else {
            return Ok(self.default.clone());
        };
        let entries: Vec<&Value> = match value {
            Value::Array(items) => items.iter().collect(),
            single => vec![single],
        };
        let mut keys = Vec::new();
        for entry in entries {
            let Value::Object(fields) = entry else {
                return Err(ExtensionError::Argument(format!(
                    "Argument 'sort' expects objects like {{\"field\": \"ASC\"}}, got {entry}"
                )));
            };
            for (field, direction) in fields {
                let direction = direction
                    .as_str()
                    .and_then(SortDirection::parse)
                    .ok_or_else(|| {
                        ExtensionError::Argument(format!(
                            "Sort direction for '{field}' must be ASC or DESC, got {direction}"
                        ))
                    })?;
                keys.push((field.clone(), direction));
            }
        }
        Ok(keys)
    }
}

impl FieldExtension for SortExtension {
    fn name(&self) -> &str {
        "sort"
    }

    fn arguments(&self) -> Vec<ArgumentDef> {
        vec![ArgumentDef::new("sort", InputType::scalar(ScalarType::Json))
            .with_description("Sort keys, e.g. [{\"name\": \"ASC\"}]")]
    }

    fn pre_selection(
        &self,
        ctx: &ExtensionContext<'_>,
        base: Expr,
        param: Option<Param>,
    ) -> Result<(Expr, Option<Param>), ExtensionError> {
        // Already ordered by the pass that materialized it.
        if ctx.materialized {
            return Ok((base, param));
        }
        let keys = self.keys(ctx.arguments.get("sort"))?;
        if keys.is_empty() {
            return Ok((base, param));
        }

        let base_ty = base.ty();
        let element = base_ty
            .element()
            .ok_or_else(|| ExtensionError::Other(format!("Cannot sort non-list field '{}'", ctx.field.name)))?;
        let entity = element.entity_name().ok_or_else(|| {
            ExtensionError::Other(format!("Cannot sort list of {element}"))
        })?;

        let mut list = base;
        for (i, (key, direction)) in keys.into_iter().enumerate() {
            let key_field = ctx
                .schema
                .field(entity, &key)
                .filter(|field| !field.has_services() && field.argument_param.is_none())
                .ok_or_else(|| {
                    ExtensionError::Argument(format!("Field '{key}' cannot be used to sort {entity}"))
                })?;
            let item = Param::fresh(entity.to_ascii_lowercase(), element.clone());
            let key_expr = replace_param(&key_field.resolve, &key_field.param, &item.expr());
            let function = if i == 0 {
                Builtin::OrderBy(direction)
            } else {
                Builtin::ThenBy(direction)
            };
            list = Expr::builtin(function, vec![list, Expr::lambda(item, key_expr)]);
        }
        Ok((list, param))
    }
}
