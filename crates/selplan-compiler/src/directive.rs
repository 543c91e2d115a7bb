//! Directive processors.
//!
//! A directive may prune a node during expansion (`process_field`) or rewrite
//! or prune the node's resolved expression (`process_expression`). Returning
//! `None` removes the node from the compiled selection entirely.

use crate::selection::NodeId;
use indexmap::IndexMap;
use selplan_ir::Expr;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DirectiveLocation {
    Field,
    FragmentSpread,
    InlineFragment,
}

impl fmt::Display for DirectiveLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Field => "FIELD",
            Self::FragmentSpread => "FRAGMENT_SPREAD",
            Self::InlineFragment => "INLINE_FRAGMENT",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DirectiveError {
    #[error("{0}")]
    Argument(String),
}

pub trait DirectiveProcessor: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    fn locations(&self) -> &[DirectiveLocation];

    fn process_field(
        &self,
        node: NodeId,
        _args: &Map<String, Value>,
    ) -> Result<Option<NodeId>, DirectiveError> {
        Ok(Some(node))
    }

    fn process_expression(
        &self,
        expr: Expr,
        _args: &Map<String, Value>,
    ) -> Result<Option<Expr>, DirectiveError> {
        Ok(Some(expr))
    }
}

const CONDITIONAL_LOCATIONS: &[DirectiveLocation] = &[
    DirectiveLocation::Field,
    DirectiveLocation::FragmentSpread,
    DirectiveLocation::InlineFragment,
];

fn condition(directive: &str, args: &Map<String, Value>) -> Result<bool, DirectiveError> {
    args.get("if").and_then(Value::as_bool).ok_or_else(|| {
        DirectiveError::Argument(format!(
            "Argument 'if' is required for @{directive} directive"
        ))
    })
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IncludeDirective;

impl DirectiveProcessor for IncludeDirective {
    fn name(&self) -> &str {
        "include"
    }

    fn description(&self) -> &str {
        "Directs the executor to include this field or fragment only when the `if` argument is true."
    }

    fn locations(&self) -> &[DirectiveLocation] {
        CONDITIONAL_LOCATIONS
    }

    fn process_field(
        &self,
        node: NodeId,
        args: &Map<String, Value>,
    ) -> Result<Option<NodeId>, DirectiveError> {
        Ok(condition(self.name(), args)?.then_some(node))
    }

    fn process_expression(
        &self,
        expr: Expr,
        args: &Map<String, Value>,
    ) -> Result<Option<Expr>, DirectiveError> {
        Ok(condition(self.name(), args)?.then_some(expr))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SkipDirective;

impl DirectiveProcessor for SkipDirective {
    fn name(&self) -> &str {
        "skip"
    }

    fn description(&self) -> &str {
        "Directs the executor to skip this field or fragment when the `if` argument is true."
    }

    fn locations(&self) -> &[DirectiveLocation] {
        CONDITIONAL_LOCATIONS
    }

    fn process_field(
        &self,
        node: NodeId,
        args: &Map<String, Value>,
    ) -> Result<Option<NodeId>, DirectiveError> {
        Ok((!condition(self.name(), args)?).then_some(node))
    }

    fn process_expression(
        &self,
        expr: Expr,
        args: &Map<String, Value>,
    ) -> Result<Option<Expr>, DirectiveError> {
        Ok((!condition(self.name(), args)?).then_some(expr))
    }
}

#[derive(Debug, Clone, Default)]
pub struct DirectiveRegistry {
    processors: IndexMap<String, Arc<dyn DirectiveProcessor>>,
}

impl DirectiveRegistry {
    pub fn with_builtins() -> Self {
        let mut registry = Self::default();
        registry.register(Arc::new(IncludeDirective));
        registry.register(Arc::new(SkipDirective));
        registry
    }

    /// Registers (or replaces) a processor under its own name.
    pub fn register(&mut self, processor: Arc<dyn DirectiveProcessor>) {
        self.processors
            .insert(processor.name().to_string(), processor);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn DirectiveProcessor>> {
        self.processors.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn DirectiveProcessor>> {
        self.processors.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use selplan_ir::{ScalarType, Type};
    use serde_json::json;

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn include_keeps_only_when_true() {
        let node = NodeId::from_raw(3);
        assert_eq!(
            IncludeDirective.process_field(node, &args(json!({ "if": true }))),
            Ok(Some(node))
        );
        assert_eq!(
            IncludeDirective.process_field(node, &args(json!({ "if": false }))),
            Ok(None)
        );
    }

    #[test]
    fn skip_prunes_when_true() {
        let node = NodeId::from_raw(0);
        assert_eq!(
            SkipDirective.process_field(node, &args(json!({ "if": true }))),
            Ok(None)
        );
    }

    #[test]
    fn missing_condition_is_an_argument_error() {
        let err = IncludeDirective.process_field(NodeId::from_raw(0), &Map::new());
        assert_eq!(
            err,
            Err(DirectiveError::Argument(
                "Argument 'if' is required for @include directive".to_string()
            ))
        );
    }

    #[test]
    fn expression_hook_follows_the_same_condition() {
        let expr = Expr::constant(json!("Ada"), Type::scalar(ScalarType::String));
        assert_eq!(
            IncludeDirective.process_expression(expr.clone(), &args(json!({ "if": true }))),
            Ok(Some(expr.clone()))
        );
        assert_eq!(
            IncludeDirective.process_expression(expr.clone(), &args(json!({ "if": false }))),
            Ok(None)
        );
        assert_eq!(
            SkipDirective.process_expression(expr.clone(), &args(json!({ "if": true }))),
            Ok(None)
        );
        assert_eq!(
            SkipDirective.process_expression(expr, &Map::new()),
            Err(DirectiveError::Argument(
                "Argument 'if' is required for @skip directive".to_string()
            ))
        );
    }
}
