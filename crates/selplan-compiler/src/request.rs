//! Serde form of a selection request and its conversion to a [`SelectionTree`].
//!
//! This is the already-parsed shape a front-end hands over; there is no text
//! syntax here.
//!
//! ```json
//! {
//!   "operation": "query",
//!   "selections": [
//!     { "field": "people", "arguments": { "filter": "$status" }, "selections": [
//!       { "field": "name" },
//!       { "spread": "PersonDetails", "directives": [{ "name": "include", "arguments": { "if": "$full" } }] }
//!     ]}
//!   ],
//!   "fragments": [{ "name": "PersonDetails", "on": "Person", "selections": [{ "field": "email" }] }]
//! }
//! ```

use crate::error::{CompileError, FieldPath};
use crate::schema::Schema;
use crate::selection::{
    ArgumentValue, DirectiveInvocation, NodeId, NodeKind, OperationKind, SelectionNode,
    SelectionTree,
};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestConfig {
    pub operation: OperationKind,
    pub selections: Vec<SelectionConfig>,
    pub fragments: Vec<FragmentConfig>,
}

/// One entry of a selection set: a field (`field`), a named fragment spread
/// (`spread`) or an inline fragment (neither).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionConfig {
    pub field: Option<String>,
    pub alias: Option<String>,
    pub spread: Option<String>,
    /// Type condition of an inline fragment.
    pub on: Option<String>,
    pub arguments: IndexMap<String, Value>,
    pub directives: Vec<DirectiveConfig>,
    pub selections: Vec<SelectionConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FragmentConfig {
    pub name: String,
    pub on: String,
    #[serde(default)]
    pub selections: Vec<SelectionConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectiveConfig {
    pub name: String,
    #[serde(default)]
    pub arguments: IndexMap<String, Value>,
}

enum Attach<'a> {
    Root,
    Child(NodeId),
    Fragment(&'a str),
}

impl RequestConfig {
    pub fn build(&self, schema: &Schema) -> Result<SelectionTree, CompileError> {
        let root_type = schema.root_type(self.operation).ok_or_else(|| {
            CompileError::schema(
                &FieldPath::default(),
                format!("Schema does not define a {:?} type", self.operation),
            )
        })?;

        let mut tree = SelectionTree::new(self.operation);
        for fragment in &self.fragments {
            if schema.object(&fragment.on).is_none() {
                return Err(CompileError::schema(
                    &FieldPath::default(),
                    format!(
                        "Fragment '{}' is declared on unknown type '{}'",
                        fragment.name, fragment.on
                    ),
                ));
            }
            tree.add_fragment(&fragment.name, &fragment.on);
        }
        for fragment in &self.fragments {
            let path = FieldPath::root(format!("...{}", fragment.name));
            for selection in &fragment.selections {
                add_selection(
                    schema,
                    &mut tree,
                    Attach::Fragment(&fragment.name),
                    &fragment.on,
                    selection,
                    &path,
                )?;
            }
        }
        for selection in &self.selections {
            add_selection(
                schema,
                &mut tree,
                Attach::Root,
                root_type,
                selection,
                &FieldPath::default(),
            )?;
        }
        Ok(tree)
    }
}

fn add_selection(
    schema: &Schema,
    tree: &mut SelectionTree,
    attach: Attach<'_>,
    owner: &str,
    selection: &SelectionConfig,
    parent_path: &FieldPath,
) -> Result<(), CompileError> {
    let (node, child_owner, path) = match (&selection.field, &selection.spread) {
        (Some(name), _) => {
            let field = schema.field(owner, name).ok_or_else(|| {
                CompileError::schema(
                    &parent_path.child(name),
                    format!("Field '{name}' not found on type '{owner}'"),
                )
            })?;
            let mut node = SelectionNode::field(field.clone());
            if let Some(alias) = &selection.alias {
                node = node.alias(alias);
            }
            let path = parent_path.child(&node.name);
            let child_owner = field.entity().map(str::to_string);
            match (&node.kind, selection.selections.is_empty()) {
                (NodeKind::Scalar, false) => {
                    return Err(CompileError::schema(
                        &path,
                        format!("Field '{name}' of type {} has no subfields", field.ty),
                    ))
                }
                (NodeKind::ObjectProjection | NodeKind::ListSelection, true) => {
                    return Err(CompileError::schema(
                        &path,
                        format!(
                            "Field '{name}' of type {} must have a selection of subfields",
                            field.ty
                        ),
                    ))
                }
                _ => {}
            }
            (node, child_owner, path)
        }
        (None, Some(fragment)) => (
            SelectionNode::fragment_spread(fragment),
            None,
            parent_path.clone(),
        ),
        (None, None) => {
            let on = selection.on.clone().unwrap_or_else(|| owner.to_string());
            if schema.object(&on).is_none() {
                return Err(CompileError::schema(
                    parent_path,
                    format!("Inline fragment on unknown type '{on}'"),
                ));
            }
            if on != owner {
                return Err(CompileError::schema(
                    parent_path,
                    format!("Inline fragment on '{on}' cannot be used on type '{owner}'"),
                ));
            }
            (SelectionNode::inline_fragment(), Some(on), parent_path.clone())
        }
    };

    let mut node = node;
    for (name, value) in &selection.arguments {
        node = node.argument(name, ArgumentValue::from_json(value.clone()));
    }
    for directive in &selection.directives {
        let invocation = directive.arguments.iter().fold(
            DirectiveInvocation::new(&directive.name),
            |invocation, (name, value)| {
                invocation.with_argument(name, ArgumentValue::from_json(value.clone()))
            },
        );
        node = node.directive(invocation);
    }

    let id = match attach {
        Attach::Root => tree.add_root(node),
        Attach::Child(parent) => tree.add_child(parent, node),
        Attach::Fragment(fragment) => tree.add_fragment_child(fragment, node).ok_or_else(|| {
            CompileError::schema(parent_path, format!("Fragment '{fragment}' not found"))
        })?,
    };

    if let Some(child_owner) = child_owner {
        for child in &selection.selections {
            add_selection(schema, tree, Attach::Child(id), &child_owner, child, &path)?;
        }
    }
    Ok(())
}
