//! Declarative schema description, loaded from JSON.
//!
//! ```json
//! {
//!   "query": "Query",
//!   "types": {
//!     "Query": { "fields": { "people": { "type": "[Person!]!", "sort": {} } } },
//!     "Person": {
//!       "fields": {
//!         "id": "ID!",
//!         "name": "String",
//!         "rating": {
//!           "type": "Float",
//!           "service": { "name": "ratings", "method": "score", "args": ["id", "$args.scale"] },
//!           "arguments": { "scale": { "type": "Int", "default": 10 } }
//!         }
//!       }
//!     }
//!   }
//! }
//! ```
//!
//! Type references use GraphQL notation. Service arguments starting with
//! `$args.` read a field argument, other strings are member paths off the
//! owner, and any other JSON value is passed as a constant.

use super::{
    ArgumentDef, EnumDef, FieldSpec, InputObjectDef, InputType, Resolve, Schema, ServiceArg,
};
use crate::error::SchemaError;
use crate::extension::{OffsetPagingExtension, SortExtension};
use indexmap::IndexMap;
use selplan_ir::{ScalarType, SortDirection, Type};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchemaConfig {
    pub query: String,
    pub mutation: Option<String>,
    pub types: IndexMap<String, TypeConfig>,
    pub inputs: IndexMap<String, InputConfig>,
    pub enums: IndexMap<String, Vec<String>>,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            query: "Query".to_string(),
            mutation: None,
            types: IndexMap::new(),
            inputs: IndexMap::new(),
            enums: IndexMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TypeConfig {
    pub description: Option<String>,
    pub fields: IndexMap<String, FieldConfig>,
}

/// Either a bare type reference or a full field description.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum FieldConfig {
    Short(String),
    Full(Box<FieldDetail>),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldDetail {
    #[serde(rename = "type")]
    pub ty: String,
    /// Dotted member path off the owner (defaults to the field name).
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub service: Option<ServiceConfig>,
    #[serde(default)]
    pub constant: Option<Value>,
    #[serde(default)]
    pub arguments: IndexMap<String, ArgumentConfig>,
    /// `Type.field` whose arguments this field inherits.
    #[serde(default)]
    pub use_arguments_from: Option<String>,
    #[serde(default)]
    pub sort: Option<SortConfig>,
    #[serde(default)]
    pub paging: Option<PagingConfig>,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceConfig {
    pub name: String,
    pub method: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArgumentConfig {
    #[serde(rename = "type")]
    pub ty: String,
    #[serde(default)]
    pub default: Option<Value>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InputConfig {
    pub one_of: bool,
    pub fields: IndexMap<String, String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SortConfig {
    pub default: IndexMap<String, SortDirection>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PagingConfig {
    pub default_take: Option<u64>,
    pub max_take: Option<u64>,
}

impl SchemaConfig {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn build(&self) -> Result<Schema, SchemaError> {
        let mut builder = Schema::builder(self.query.clone());
        if let Some(mutation) = &self.mutation {
            builder = builder.with_mutation_type(mutation.clone());
        }

        for (name, values) in &self.enums {
            builder.add_enum(EnumDef {
                name: name.clone(),
                values: values.clone(),
            })?;
        }
        for (name, input) in &self.inputs {
            let fields = input
                .fields
                .iter()
                .map(|(field, ty)| Ok((field.clone(), self.parse_input_type(ty)?)))
                .collect::<Result<IndexMap<_, _>, SchemaError>>()?;
            builder.add_input_type(InputObjectDef {
                name: name.clone(),
                fields,
                one_of: input.one_of,
            })?;
        }
        for (name, ty) in &self.types {
            builder.add_type_described(name.clone(), ty.description.clone())?;
        }
        for (owner, ty) in &self.types {
            for (name, field) in &ty.fields {
                let spec = self.field_spec(owner, name, field)?;
                builder.add_field(owner, spec)?;
            }
        }
        builder.build()
    }

    fn field_spec(
        &self,
        owner: &str,
        name: &str,
        config: &FieldConfig,
    ) -> Result<FieldSpec, SchemaError> {
        let detail = match config {
            FieldConfig::Short(ty) => return Ok(FieldSpec::new(name, parse_type(ty)?)),
            FieldConfig::Full(detail) => detail,
        };
        let invalid = |message: &str| SchemaError::InvalidField {
            owner: owner.to_string(),
            field: name.to_string(),
            message: message.to_string(),
        };

        let mut spec = FieldSpec::new(name, parse_type(&detail.ty)?);
        let sources = [
            detail.path.is_some(),
            detail.service.is_some(),
            detail.constant.is_some(),
        ];
        if sources.iter().filter(|set| **set).count() > 1 {
            return Err(invalid("only one of path, service or constant may be set"));
        }
        if let Some(path) = &detail.path {
            let segments: Vec<&str> = path.split('.').collect();
            if segments.iter().any(|segment| segment.is_empty()) {
                return Err(invalid("path segments must not be empty"));
            }
            spec = spec.path(&segments);
        }
        if let Some(service) = &detail.service {
            let args = service.args.iter().map(service_arg).collect();
            spec = spec.service(service.name.clone(), service.method.clone(), args);
        }
        if let Some(value) = &detail.constant {
            spec = spec.resolve(Resolve::Constant(value.clone()));
        }

        for (argument, config) in &detail.arguments {
            let mut def = ArgumentDef::new(argument.clone(), self.parse_input_type(&config.ty)?);
            if let Some(default) = &config.default {
                def = def.with_default(default.clone());
            }
            if let Some(description) = &config.description {
                def = def.with_description(description.clone());
            }
            spec = spec.argument(def);
        }
        if let Some(source) = &detail.use_arguments_from {
            let (source_owner, source_field) = source
                .split_once('.')
                .ok_or_else(|| invalid("use_arguments_from must name 'Type.field'"))?;
            spec = spec.inherit_arguments(source_owner, source_field);
        }
        if let Some(sort) = &detail.sort {
            let extension = sort
                .default
                .iter()
                .fold(SortExtension::new(), |extension, (key, direction)| {
                    extension.with_default(key.clone(), *direction)
                });
            spec = spec.extension(Arc::new(extension));
        }
        if let Some(paging) = detail.paging {
            spec = spec.extension(Arc::new(OffsetPagingExtension::new(
                paging.default_take,
                paging.max_take,
            )));
        }
        for role in &detail.roles {
            spec = spec.role(role.clone());
        }
        if let Some(description) = &detail.description {
            spec = spec.description(description.clone());
        }
        Ok(spec)
    }

    fn parse_input_type(&self, text: &str) -> Result<InputType, SchemaError> {
        let (inner, non_null) = split_non_null(text)?;
        let ty = if let Some(element) = list_element(inner) {
            InputType::list(self.parse_input_type(element)?)
        } else if let Some(scalar) = ScalarType::from_name(inner) {
            InputType::scalar(scalar)
        } else if self.enums.contains_key(inner) {
            InputType::enumeration(inner)
        } else {
            check_name(inner, text)?;
            InputType::object(inner)
        };
        Ok(if non_null { ty.non_null() } else { ty })
    }
}

/// Parse a GraphQL type reference such as `[Person!]!`.
pub fn parse_type(text: &str) -> Result<Type, SchemaError> {
    let (inner, non_null) = split_non_null(text)?;
    let ty = if let Some(element) = list_element(inner) {
        Type::list(parse_type(element)?)
    } else if let Some(scalar) = ScalarType::from_name(inner) {
        Type::scalar(scalar)
    } else {
        check_name(inner, text)?;
        Type::entity(inner)
    };
    Ok(if non_null { ty.non_null() } else { ty })
}

fn split_non_null(text: &str) -> Result<(&str, bool), SchemaError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(SchemaError::InvalidTypeRef(text.to_string()));
    }
    Ok(match text.strip_suffix('!') {
        Some(inner) => (inner.trim(), true),
        None => (text, false),
    })
}

fn list_element(text: &str) -> Option<&str> {
    text.strip_prefix('[')?.strip_suffix(']')
}

fn check_name(name: &str, text: &str) -> Result<(), SchemaError> {
    let valid = name
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(SchemaError::InvalidTypeRef(text.to_string()))
    }
}

fn service_arg(value: &Value) -> ServiceArg {
    match value {
        Value::String(text) => match text.strip_prefix("$args.") {
            Some(argument) => ServiceArg::Argument(argument.to_string()),
            None => ServiceArg::Member(text.split('.').map(str::to_string).collect()),
        },
        other => ServiceArg::Constant(other.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::InputTypeKind;
    use serde_json::json;

    #[test]
    fn type_refs_follow_graphql_notation() {
        let ty = parse_type("[Person!]!").expect("parses");
        assert!(!ty.nullable);
        assert_eq!(
            ty.element().and_then(Type::entity_name),
            Some("Person")
        );
        assert_eq!(parse_type("Int").ok(), Some(Type::scalar(ScalarType::Int)));
        assert!(matches!(
            parse_type("[Person"),
            Err(SchemaError::InvalidTypeRef(_))
        ));
        assert!(matches!(parse_type("!"), Err(SchemaError::InvalidTypeRef(_))));
    }

    #[test]
    fn builds_services_arguments_and_extensions() {
        let config: SchemaConfig = serde_json::from_value(json!({
            "types": {
                "Query": {
                    "fields": {
                        "people": {
                            "type": "[Person!]!",
                            "sort": { "default": { "name": "ASC" } },
                            "paging": { "max_take": 50 }
                        }
                    }
                },
                "Person": {
                    "fields": {
                        "id": "ID!",
                        "name": "String",
                        "rating": {
                            "type": "Float",
                            "service": { "name": "ratings", "method": "score", "args": ["id", "$args.scale", 2] },
                            "arguments": { "scale": { "type": "Int", "default": 10 } }
                        }
                    }
                }
            }
        }))
        .expect("config parses");
        let schema = config.build().expect("schema builds");

        let people = schema.field("Query", "people").expect("people");
        assert_eq!(people.extensions.len(), 2);
        let argument_names: Vec<&str> = people.arguments.keys().map(String::as_str).collect();
        assert_eq!(argument_names, vec!["sort", "skip", "take"]);

        let rating = schema.field("Person", "rating").expect("rating");
        assert!(rating.has_services());
        assert_eq!(rating.extracted.len(), 1);
        assert_eq!(
            rating.arguments.get("scale").and_then(|arg| arg.default.clone()),
            Some(json!(10))
        );
    }

    #[test]
    fn enum_arguments_resolve_to_enum_inputs() {
        let config: SchemaConfig = serde_json::from_value(json!({
            "enums": { "Unit": ["METRIC", "IMPERIAL"] },
            "types": {
                "Query": {
                    "fields": {
                        "distance": {
                            "type": "Float",
                            "arguments": { "unit": { "type": "Unit!" } }
                        }
                    }
                }
            }
        }))
        .expect("config parses");
        let schema = config.build().expect("schema builds");
        let unit = schema
            .field("Query", "distance")
            .and_then(|field| field.arguments.get("unit"))
            .expect("unit argument");
        assert_eq!(unit.ty.kind, InputTypeKind::Enum("Unit".to_string()));
        assert!(unit.is_required());
    }

    #[test]
    fn conflicting_resolve_sources_are_rejected() {
        let config: SchemaConfig = serde_json::from_value(json!({
            "types": {
                "Query": {
                    "fields": {
                        "answer": { "type": "Int", "path": "a.b", "constant": 42 }
                    }
                }
            }
        }))
        .expect("config parses");
        assert!(matches!(
            config.build(),
            Err(SchemaError::InvalidField { field, .. }) if field == "answer"
        ));
    }
}
