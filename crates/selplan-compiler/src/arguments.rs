//! Argument resolution and validation.
//!
//! Resolution merges a node's inline arguments with those of the nearest
//! ancestor selecting the field named by `use_arguments_from`. The node's own
//! value wins when both define a key. Inline arguments are never mutated;
//! every call builds a new map.

use crate::error::{CompileError, FieldPath};
use crate::schema::{FieldDef, InputType, InputTypeKind, Schema};
use crate::selection::{ArgumentValue, Arguments, NodeId, SelectionTree};
use selplan_ir::ScalarType;
use serde_json::{Map, Value};

pub struct ArgumentResolver<'a> {
    tree: &'a SelectionTree,
    variables: &'a Map<String, Value>,
}

impl<'a> ArgumentResolver<'a> {
    pub fn new(tree: &'a SelectionTree, variables: &'a Map<String, Value>) -> Self {
        Self { tree, variables }
    }

    /// Inline arguments of `node` merged with inherited ones.
    ///
    /// `lineage` lists the compile-time ancestors of `node`, outermost first.
    pub fn merged(&self, node: NodeId, lineage: &[NodeId]) -> Arguments {
        let selection = self.tree.node(node);
        let mut merged = selection.arguments.clone();
        let Some(source) = selection
            .field
            .as_ref()
            .and_then(|field| field.use_arguments_from)
        else {
            return merged;
        };

        for (depth, ancestor) in lineage.iter().enumerate().rev() {
            let matches_source = self
                .tree
                .node(*ancestor)
                .field
                .as_ref()
                .is_some_and(|field| field.id == source);
            if matches_source {
                let inherited = self.merged(*ancestor, &lineage[..depth]);
                for (name, value) in inherited {
                    merged.entry(name).or_insert(value);
                }
                break;
            }
        }
        merged
    }

    /// Merged arguments with variables substituted.
    pub fn resolve(&self, node: NodeId, lineage: &[NodeId]) -> Map<String, Value> {
        self.resolve_arguments(&self.merged(node, lineage))
    }

    pub fn resolve_arguments(&self, arguments: &Arguments) -> Map<String, Value> {
        arguments
            .iter()
            .map(|(name, value)| (name.clone(), self.resolve_value(value)))
            .collect()
    }

    /// Missing variables resolve to null.
    pub fn resolve_value(&self, value: &ArgumentValue) -> Value {
        match value {
            ArgumentValue::Literal(value) => value.clone(),
            ArgumentValue::Variable(name) => self.variables.get(name).cloned().unwrap_or(Value::Null),
            ArgumentValue::List(items) => {
                Value::Array(items.iter().map(|item| self.resolve_value(item)).collect())
            }
            ArgumentValue::Object(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(name, value)| (name.clone(), self.resolve_value(value)))
                    .collect(),
            ),
        }
    }
}

// ============================================================================
// Validation
// ============================================================================

/// Check resolved values against the field's declared arguments (plus those
/// of the field it inherits from), filling in defaults.
pub fn validate_arguments(
    schema: &Schema,
    field: &FieldDef,
    values: Map<String, Value>,
    path: &FieldPath,
) -> Result<Map<String, Value>, CompileError> {
    let mut defs = field.arguments.clone();
    if let Some(source) = field
        .use_arguments_from
        .and_then(|id| schema.field_by_id(id))
    {
        for (name, def) in &source.arguments {
            defs.entry(name.clone()).or_insert_with(|| def.clone());
        }
    }

    for name in values.keys() {
        if !defs.contains_key(name) {
            return Err(CompileError::argument(
                path,
                format!("No argument '{name}' found on field '{}'", field.name),
            ));
        }
    }

    let mut out = values;
    for (name, def) in &defs {
        let provided = out.get(name).filter(|value| !value.is_null()).cloned();
        let value = match (provided, &def.default) {
            (Some(value), _) => value,
            (None, Some(default)) => default.clone(),
            (None, None) if !def.ty.nullable => {
                return Err(CompileError::argument(
                    path,
                    format!(
                        "Field '{}' requires argument '{name}' of type {}",
                        field.name, def.ty
                    ),
                ))
            }
            (None, None) => continue,
        };
        let value = check_value(schema, name, &def.ty, value, path)?;
        out.insert(name.clone(), value);
    }
    Ok(out)
}

fn check_value(
    schema: &Schema,
    argument: &str,
    ty: &InputType,
    value: Value,
    path: &FieldPath,
) -> Result<Value, CompileError> {
    let mismatch = |value: &Value| {
        CompileError::argument(
            path,
            format!("Argument '{argument}' expected {ty} but got {value}"),
        )
    };

    if value.is_null() {
        return if ty.nullable {
            Ok(value)
        } else {
            Err(mismatch(&value))
        };
    }

    match &ty.kind {
        InputTypeKind::Scalar(scalar) => {
            let ok = match scalar {
                ScalarType::Boolean => value.is_boolean(),
                ScalarType::Int => value.is_i64() || value.is_u64(),
                ScalarType::Float => value.is_number(),
                ScalarType::String => value.is_string(),
                ScalarType::Id => value.is_string() || value.is_i64() || value.is_u64(),
                ScalarType::Json => true,
            };
            if ok {
                Ok(value)
            } else {
                Err(mismatch(&value))
            }
        }
        InputTypeKind::Enum(name) => {
            let known = schema
                .enum_def(name)
                .zip(value.as_str())
                .is_some_and(|(def, text)| def.values.iter().any(|v| v == text));
            if known {
                Ok(value)
            } else {
                Err(mismatch(&value))
            }
        }
        InputTypeKind::List(element) => {
            // A single value is accepted where a list is expected.
            let items = match value {
                Value::Array(items) => items,
                single => vec![single],
            };
            items
                .into_iter()
                .map(|item| check_value(schema, argument, element, item, path))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array)
        }
        InputTypeKind::Object(name) => {
            let Some(input) = schema.input(name) else {
                return Err(CompileError::schema(path, format!("Unknown input type '{name}'")));
            };
            let fields = match value {
                Value::Object(fields) => fields,
                other => return Err(mismatch(&other)),
            };
            if input.one_of {
                let set = fields.values().filter(|value| !value.is_null()).count();
                if set != 1 {
                    return Err(CompileError::input_shape(
                        path,
                        format!(
                            "Exactly one field must be specified for argument {argument} of type {}.",
                            input.name
                        ),
                    ));
                }
            }
            let mut checked = Map::new();
            for (key, value) in fields {
                let Some(field_ty) = input.fields.get(&key) else {
                    return Err(CompileError::argument(
                        path,
                        format!("Field '{key}' is not defined on input type '{}'", input.name),
                    ));
                };
                let value = check_value(schema, argument, field_ty, value, path)?;
                checked.insert(key, value);
            }
            for (key, field_ty) in &input.fields {
                if !field_ty.nullable && !checked.contains_key(key) {
                    return Err(CompileError::argument(
                        path,
                        format!(
                            "Input type '{}' requires field '{key}' of type {field_ty}",
                            input.name
                        ),
                    ));
                }
            }
            Ok(Value::Object(checked))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ArgumentDef, FieldSpec, InputObjectDef};
    use crate::selection::{OperationKind, SelectionNode};
    use indexmap::IndexMap;
    use selplan_ir::Type;
    use serde_json::json;

    fn schema() -> Schema {
        let mut builder = Schema::builder("Query");
        builder
            .add_type("Query")
            .and_then(|b| b.add_type("Person"))
            .expect("types register");
        let mut lookup = IndexMap::new();
        lookup.insert("id".to_string(), InputType::scalar(ScalarType::Id));
        lookup.insert("email".to_string(), InputType::scalar(ScalarType::String));
        builder
            .add_input_type(InputObjectDef {
                name: "PersonLookup".to_string(),
                fields: lookup,
                one_of: true,
            })
            .expect("input type registers");
        builder
            .add_field(
                "Query",
                FieldSpec::new("people", Type::list(Type::entity("Person").non_null()))
                    .argument(ArgumentDef::new("status", InputType::scalar(ScalarType::String)))
                    .argument(ArgumentDef::new("limit", InputType::scalar(ScalarType::Int))),
            )
            .expect("field registers");
        builder
            .add_field(
                "Query",
                FieldSpec::new("person", Type::entity("Person")).argument(ArgumentDef::new(
                    "by",
                    InputType::object("PersonLookup").non_null(),
                )),
            )
            .expect("field registers");
        builder
            .add_field(
                "Person",
                FieldSpec::new("friends", Type::list(Type::entity("Person").non_null()))
                    .inherit_arguments("Query", "people"),
            )
            .expect("field registers");
        builder
            .add_field(
                "Person",
                FieldSpec::new("name", Type::scalar(ScalarType::String)).argument(
                    ArgumentDef::new("format", InputType::scalar(ScalarType::String))
                        .with_default(json!("full")),
                ),
            )
            .expect("field registers");
        builder.build().expect("schema builds")
    }

    fn field(schema: &Schema, owner: &str, name: &str) -> std::sync::Arc<FieldDef> {
        schema.field(owner, name).cloned().expect("field exists")
    }

    #[test]
    fn own_values_win_over_inherited_ones() {
        let schema = schema();
        let mut tree = SelectionTree::new(OperationKind::Query);
        let people = tree.add_root(
            SelectionNode::field(field(&schema, "Query", "people"))
                .argument("status", ArgumentValue::Literal(json!("active")))
                .argument("limit", ArgumentValue::Variable("limit".to_string())),
        );
        let friends = tree.add_child(
            people,
            SelectionNode::field(field(&schema, "Person", "friends"))
                .argument("status", ArgumentValue::Literal(json!("away"))),
        );

        let mut variables = Map::new();
        variables.insert("limit".to_string(), json!(5));
        let resolver = ArgumentResolver::new(&tree, &variables);
        let resolved = resolver.resolve(friends, &[people]);
        assert_eq!(resolved.get("status"), Some(&json!("away")));
        assert_eq!(resolved.get("limit"), Some(&json!(5)));

        // Inline arguments are untouched.
        assert_eq!(tree.node(friends).arguments.len(), 1);
    }

    #[test]
    fn missing_variables_resolve_to_null() {
        let tree = SelectionTree::new(OperationKind::Query);
        let variables = Map::new();
        let resolver = ArgumentResolver::new(&tree, &variables);
        assert_eq!(
            resolver.resolve_value(&ArgumentValue::Variable("nope".to_string())),
            Value::Null
        );
    }

    #[test]
    fn undeclared_arguments_are_rejected() {
        let schema = schema();
        let name = field(&schema, "Person", "name");
        let mut values = Map::new();
        values.insert("style".to_string(), json!("short"));
        let err = validate_arguments(&schema, &name, values, &FieldPath::root("name")).err();
        assert_eq!(
            err.map(|e| e.message().to_string()),
            Some("No argument 'style' found on field 'name'".to_string())
        );
    }

    #[test]
    fn defaults_fill_missing_arguments() {
        let schema = schema();
        let name = field(&schema, "Person", "name");
        let values = validate_arguments(&schema, &name, Map::new(), &FieldPath::root("name"))
            .expect("valid");
        assert_eq!(values.get("format"), Some(&json!("full")));
    }

    #[test]
    fn one_of_inputs_need_exactly_one_field() {
        let schema = schema();
        let person = field(&schema, "Query", "person");
        let path = FieldPath::root("person");

        let mut values = Map::new();
        values.insert("by".to_string(), json!({ "id": "1", "email": "a@b.c" }));
        let err = validate_arguments(&schema, &person, values, &path).err();
        assert_eq!(
            err.as_ref().map(CompileError::message),
            Some("Exactly one field must be specified for argument by of type PersonLookup.")
        );

        let mut values = Map::new();
        values.insert("by".to_string(), json!({ "email": "a@b.c" }));
        assert!(validate_arguments(&schema, &person, values, &path).is_ok());

        let err = validate_arguments(&schema, &person, Map::new(), &path).err();
        assert_eq!(
            err.map(|e| e.message().to_string()),
            Some("Field 'person' requires argument 'by' of type PersonLookup!".to_string())
        );
    }
}
