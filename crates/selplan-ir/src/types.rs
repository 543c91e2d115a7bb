//! Static types carried by every expression.
//!
//! The compiler needs just enough typing to:
//! - decide whether a base expression admits null (null-guard insertion),
//! - find sub-expressions by type (`replace_by_type`),
//! - look up members on records materialized by the service-free pass.
//!
//! Entity members are owned by the schema and are not visible here; only
//! records (shapes built by `Expr::New`) expose their members.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalarType {
    Boolean,
    Int,
    Float,
    String,
    Id,
    /// Untyped JSON value (argument records, extracted values of unknown type).
    Json,
}

impl ScalarType {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "Boolean" => Some(Self::Boolean),
            "Int" => Some(Self::Int),
            "Float" => Some(Self::Float),
            "String" => Some(Self::String),
            "ID" => Some(Self::Id),
            "JSON" => Some(Self::Json),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Boolean => "Boolean",
            Self::Int => "Int",
            Self::Float => "Float",
            Self::String => "String",
            Self::Id => "ID",
            Self::Json => "JSON",
        }
    }
}

/// Name of an external service capability (resolved by the host at execution time).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceId(String);

impl ServiceId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Shape of an object built by the plan itself (`Expr::New`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordShape {
    pub name: String,
    pub fields: Vec<(String, Type)>,
}

impl RecordShape {
    pub fn field(&self, name: &str) -> Option<&Type> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, ty)| ty)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "of", rename_all = "snake_case")]
pub enum TypeKind {
    Scalar(ScalarType),
    Entity(String),
    Record(Arc<RecordShape>),
    List(Box<Type>),
    Service(ServiceId),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Type {
    pub kind: TypeKind,
    pub nullable: bool,
}

impl Type {
    pub fn scalar(scalar: ScalarType) -> Self {
        Self {
            kind: TypeKind::Scalar(scalar),
            nullable: true,
        }
    }

    pub fn entity(name: impl Into<String>) -> Self {
        Self {
            kind: TypeKind::Entity(name.into()),
            nullable: true,
        }
    }

    /// Records built by the plan are never null themselves.
    pub fn record(shape: Arc<RecordShape>) -> Self {
        Self {
            kind: TypeKind::Record(shape),
            nullable: false,
        }
    }

    pub fn list(element: Type) -> Self {
        Self {
            kind: TypeKind::List(Box::new(element)),
            nullable: true,
        }
    }

    pub fn service(id: ServiceId) -> Self {
        Self {
            kind: TypeKind::Service(id),
            nullable: false,
        }
    }

    pub fn boolean() -> Self {
        Self::scalar(ScalarType::Boolean).non_null()
    }

    pub fn json() -> Self {
        Self::scalar(ScalarType::Json)
    }

    pub fn non_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn or_null(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn is_list(&self) -> bool {
        matches!(self.kind, TypeKind::List(_))
    }

    pub fn element(&self) -> Option<&Type> {
        match &self.kind {
            TypeKind::List(element) => Some(element),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&RecordShape> {
        match &self.kind {
            TypeKind::Record(shape) => Some(shape),
            _ => None,
        }
    }

    /// Member type when this is a record that exposes `name`.
    pub fn member(&self, name: &str) -> Option<&Type> {
        self.as_record().and_then(|shape| shape.field(name))
    }

    /// Innermost named entity (`[Person!]` → `Person`).
    pub fn entity_name(&self) -> Option<&str> {
        match &self.kind {
            TypeKind::Entity(name) => Some(name),
            TypeKind::List(element) => element.entity_name(),
            _ => None,
        }
    }

    /// Structural equality ignoring nullability at every level.
    pub fn same_shape(&self, other: &Type) -> bool {
        match (&self.kind, &other.kind) {
            (TypeKind::List(a), TypeKind::List(b)) => a.same_shape(b),
            (TypeKind::Record(a), TypeKind::Record(b)) => {
                a.name == b.name
                    && a.fields.len() == b.fields.len()
                    && a
                        .fields
                        .iter()
                        .zip(&b.fields)
                        .all(|((na, ta), (nb, tb))| na == nb && ta.same_shape(tb))
            }
            (a, b) => a == b,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            TypeKind::Scalar(scalar) => f.write_str(scalar.name())?,
            TypeKind::Entity(name) => f.write_str(name)?,
            TypeKind::Record(shape) => {
                write!(f, "{} {{", shape.name)?;
                for (i, (name, ty)) in shape.fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, " {name}: {ty}")?;
                }
                f.write_str(" }")?;
            }
            TypeKind::List(element) => write!(f, "[{element}]")?,
            TypeKind::Service(id) => write!(f, "@{id}")?,
        }
        if !self.nullable && !matches!(self.kind, TypeKind::Record(_) | TypeKind::Service(_)) {
            f.write_str("!")?;
        }
        Ok(())
    }
}
