//! Selection tree arena.
//!
//! Nodes live in a `Vec` owned by the [`SelectionTree`]; parent links are
//! plain indices and never own anything. Children are appended only by the
//! tree builder; compilation reads the tree and never mutates it.

use crate::schema::{selects_list, FieldDef};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeId(usize);

impl NodeId {
    pub const fn from_raw(index: usize) -> Self {
        Self(index)
    }

    pub const fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    #[default]
    Query,
    Mutation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Scalar,
    ObjectProjection,
    ListSelection,
    /// Spread of a named fragment.
    FragmentSpread(String),
    InlineFragment,
}

impl NodeKind {
    pub fn for_field(field: &FieldDef) -> Self {
        if selects_list(&field.ty) {
            Self::ListSelection
        } else if field.entity().is_some() {
            Self::ObjectProjection
        } else {
            Self::Scalar
        }
    }

    pub fn is_fragment(&self) -> bool {
        matches!(self, Self::FragmentSpread(_) | Self::InlineFragment)
    }
}

/// Inline argument value, before variables are resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgumentValue {
    Literal(Value),
    Variable(String),
    List(Vec<ArgumentValue>),
    Object(IndexMap<String, ArgumentValue>),
}

impl ArgumentValue {
    /// Strings of the form `$name` are variable references.
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::String(text) if text.len() > 1 && text.starts_with('$') => {
                Self::Variable(text[1..].to_string())
            }
            Value::Array(items) => Self::List(items.into_iter().map(Self::from_json).collect()),
            Value::Object(map) => Self::Object(
                map.into_iter()
                    .map(|(key, value)| (key, Self::from_json(value)))
                    .collect(),
            ),
            other => Self::Literal(other),
        }
    }
}

pub type Arguments = IndexMap<String, ArgumentValue>;

#[derive(Debug, Clone, PartialEq)]
pub struct DirectiveInvocation {
    pub name: String,
    pub arguments: Arguments,
}

impl DirectiveInvocation {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arguments: Arguments::new(),
        }
    }

    pub fn with_argument(mut self, name: impl Into<String>, value: ArgumentValue) -> Self {
        self.arguments.insert(name.into(), value);
        self
    }
}

#[derive(Debug, Clone)]
pub struct SelectionNode {
    /// Output key (alias or field name).
    pub name: String,
    pub field: Option<Arc<FieldDef>>,
    pub kind: NodeKind,
    pub children: Vec<NodeId>,
    pub parent: Option<NodeId>,
    pub arguments: Arguments,
    pub directives: Vec<DirectiveInvocation>,
}

impl SelectionNode {
    pub fn field(field: Arc<FieldDef>) -> Self {
        Self {
            name: field.name.clone(),
            kind: NodeKind::for_field(&field),
            field: Some(field),
            children: vec![],
            parent: None,
            arguments: Arguments::new(),
            directives: vec![],
        }
    }

    pub fn fragment_spread(fragment: impl Into<String>) -> Self {
        let fragment = fragment.into();
        Self {
            name: format!("...{fragment}"),
            kind: NodeKind::FragmentSpread(fragment),
            field: None,
            children: vec![],
            parent: None,
            arguments: Arguments::new(),
            directives: vec![],
        }
    }

    pub fn inline_fragment() -> Self {
        Self {
            name: "...".to_string(),
            kind: NodeKind::InlineFragment,
            field: None,
            children: vec![],
            parent: None,
            arguments: Arguments::new(),
            directives: vec![],
        }
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.name = alias.into();
        self
    }

    pub fn argument(mut self, name: impl Into<String>, value: ArgumentValue) -> Self {
        self.arguments.insert(name.into(), value);
        self
    }

    pub fn directive(mut self, directive: DirectiveInvocation) -> Self {
        self.directives.push(directive);
        self
    }
}

#[derive(Debug, Clone)]
pub struct FragmentDef {
    pub name: String,
    /// Type condition.
    pub on: String,
    pub children: Vec<NodeId>,
}

#[derive(Debug, Clone, Default)]
pub struct SelectionTree {
    kind: OperationKind,
    nodes: Vec<SelectionNode>,
    roots: Vec<NodeId>,
    fragments: IndexMap<String, FragmentDef>,
}

impl SelectionTree {
    pub fn new(kind: OperationKind) -> Self {
        Self {
            kind,
            ..Self::default()
        }
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    fn push(&mut self, mut node: SelectionNode, parent: Option<NodeId>) -> NodeId {
        let id = NodeId(self.nodes.len());
        node.parent = parent;
        node.children.clear();
        self.nodes.push(node);
        id
    }

    pub fn add_root(&mut self, node: SelectionNode) -> NodeId {
        let id = self.push(node, None);
        self.roots.push(id);
        id
    }

    pub fn add_child(&mut self, parent: NodeId, node: SelectionNode) -> NodeId {
        let id = self.push(node, Some(parent));
        self.nodes[parent.0].children.push(id);
        id
    }

    /// Declares a named fragment; redeclaring keeps the existing selections.
    pub fn add_fragment(&mut self, name: impl Into<String>, on: impl Into<String>) {
        let name = name.into();
        self.fragments
            .entry(name.clone())
            .or_insert_with(|| FragmentDef {
                name,
                on: on.into(),
                children: vec![],
            });
    }

    /// Appends a top-level selection of a declared fragment.
    pub fn add_fragment_child(&mut self, fragment: &str, node: SelectionNode) -> Option<NodeId> {
        if !self.fragments.contains_key(fragment) {
            return None;
        }
        let id = self.push(node, None);
        if let Some(def) = self.fragments.get_mut(fragment) {
            def.children.push(id);
        }
        Some(id)
    }

    pub fn node(&self, id: NodeId) -> &SelectionNode {
        &self.nodes[id.0]
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    pub fn fragment(&self, name: &str) -> Option<&FragmentDef> {
        self.fragments.get(name)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Parent links from `id` upwards, nearest first.
    pub fn ancestors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(self.node(id).parent, move |current| {
            self.node(*current).parent
        })
    }

    /// Whether `id` or anything selected below it (through fragments too)
    /// is backed by a service.
    pub fn has_any_services(&self, id: NodeId) -> bool {
        let mut seen_fragments = HashSet::new();
        self.subtree_has_services(id, &mut seen_fragments)
    }

    /// Whether anything selected below `id` is backed by a service.
    pub fn has_service_descendants(&self, id: NodeId) -> bool {
        let mut seen_fragments = HashSet::new();
        self.node(id)
            .children
            .iter()
            .any(|child| self.subtree_has_services(*child, &mut seen_fragments))
    }

    fn subtree_has_services<'a>(&'a self, id: NodeId, seen: &mut HashSet<&'a str>) -> bool {
        let node = self.node(id);
        if node.field.as_ref().is_some_and(|field| field.has_services()) {
            return true;
        }
        let fragment_children = match &node.kind {
            NodeKind::FragmentSpread(name) => {
                if !seen.insert(name.as_str()) {
                    return false;
                }
                self.fragment(name)
                    .map(|def| def.children.as_slice())
                    .unwrap_or_default()
            }
            _ => &[],
        };
        node.children
            .iter()
            .chain(fragment_children)
            .any(|child| self.subtree_has_services(*child, seen))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn dollar_strings_are_variables() {
        let value = ArgumentValue::from_json(json!({ "filter": "$status", "ids": [1, "$id"] }));
        let ArgumentValue::Object(map) = value else {
            panic!("expected object");
        };
        assert_eq!(
            map.get("filter"),
            Some(&ArgumentValue::Variable("status".to_string()))
        );
        assert_eq!(
            map.get("ids"),
            Some(&ArgumentValue::List(vec![
                ArgumentValue::Literal(json!(1)),
                ArgumentValue::Variable("id".to_string()),
            ]))
        );
        assert_eq!(
            ArgumentValue::from_json(json!("$")),
            ArgumentValue::Literal(json!("$"))
        );
    }

    #[test]
    fn parent_links_are_indices() {
        let mut tree = SelectionTree::new(OperationKind::Query);
        let root = tree.add_root(SelectionNode::inline_fragment());
        let child = tree.add_child(root, SelectionNode::inline_fragment());
        let grandchild = tree.add_child(child, SelectionNode::inline_fragment());
        assert_eq!(tree.ancestors(grandchild).collect::<Vec<_>>(), vec![child, root]);
        assert_eq!(tree.node(root).children, vec![child]);
    }
}
