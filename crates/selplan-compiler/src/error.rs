// ============================================================================
// Errors
// ============================================================================
//
// - `CompileError`: raised while compiling one selection; always carries the
//   output path of the offending field.
// - `FieldError`: a `CompileError` collected against a root field.
// - `SchemaError`: raised while building a schema.
// - `ExecuteError`: raised by the reference executor.

use crate::service::ServiceError;
use serde::Serialize;
use std::fmt;

/// Output-key path from the root field down to a node (`people.manager.name`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct FieldPath(Vec<String>);

impl FieldPath {
    pub fn root(name: impl Into<String>) -> Self {
        Self(vec![name.into()])
    }

    pub fn child(&self, name: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(name.into());
        Self(segments)
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("<operation>");
        }
        f.write_str(&self.0.join("."))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    Argument,
    SchemaCompile,
    InputShape,
    Extension,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Argument => "argument error",
            Self::SchemaCompile => "schema error",
            Self::InputShape => "input shape error",
            Self::Extension => "extension error",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompileError {
    /// A field or directive argument is missing, undeclared or malformed.
    #[error("{path}: {message}")]
    Argument { path: FieldPath, message: String },

    /// A field, fragment, type, directive or service cannot be resolved.
    #[error("{path}: {message}")]
    SchemaCompile { path: FieldPath, message: String },

    /// A OneOf input object received zero or several fields.
    #[error("{path}: {message}")]
    InputShape { path: FieldPath, message: String },

    #[error("{path}: extension '{extension}' failed: {message}")]
    Extension {
        path: FieldPath,
        extension: String,
        message: String,
    },
}

impl CompileError {
    pub fn argument(path: &FieldPath, message: impl Into<String>) -> Self {
        Self::Argument {
            path: path.clone(),
            message: message.into(),
        }
    }

    pub fn schema(path: &FieldPath, message: impl Into<String>) -> Self {
        Self::SchemaCompile {
            path: path.clone(),
            message: message.into(),
        }
    }

    pub fn input_shape(path: &FieldPath, message: impl Into<String>) -> Self {
        Self::InputShape {
            path: path.clone(),
            message: message.into(),
        }
    }

    pub fn extension(
        path: &FieldPath,
        extension: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Extension {
            path: path.clone(),
            extension: extension.into(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Argument { .. } => ErrorKind::Argument,
            Self::SchemaCompile { .. } => ErrorKind::SchemaCompile,
            Self::InputShape { .. } => ErrorKind::InputShape,
            Self::Extension { .. } => ErrorKind::Extension,
        }
    }

    pub fn path(&self) -> &FieldPath {
        match self {
            Self::Argument { path, .. }
            | Self::SchemaCompile { path, .. }
            | Self::InputShape { path, .. }
            | Self::Extension { path, .. } => path,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Argument { message, .. }
            | Self::SchemaCompile { message, .. }
            | Self::InputShape { message, .. }
            | Self::Extension { message, .. } => message,
        }
    }

    /// Schema resolution failures abort the whole operation; everything else
    /// is collected against its root field.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::SchemaCompile { .. })
    }
}

/// A compile error collected against one root field of an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub path: FieldPath,
    pub kind: ErrorKind,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, error: &CompileError) -> Self {
        Self {
            field: field.into(),
            path: error.path().clone(),
            kind: error.kind(),
            message: error.message().to_string(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}: {}", self.kind, self.path, self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    #[error("Duplicate type '{0}'")]
    DuplicateType(String),

    #[error("Duplicate field '{field}' on type '{owner}'")]
    DuplicateField { owner: String, field: String },

    #[error("Unknown type '{name}' referenced by {context}")]
    UnknownType { name: String, context: String },

    #[error("Unknown field '{owner}.{field}' referenced by {context}")]
    UnknownField {
        owner: String,
        field: String,
        context: String,
    },

    #[error("Invalid type reference '{0}'")]
    InvalidTypeRef(String),

    #[error("Invalid field '{owner}.{field}': {message}")]
    InvalidField {
        owner: String,
        field: String,
        message: String,
    },

    #[error("{0} is a OneOf type but all its fields are not nullable. OneOf input types require all the field to be nullable.")]
    OneOfNotNullable(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ExecuteError {
    #[error("Unbound parameter '{0}'")]
    UnboundParameter(String),

    #[error("Service '{0}' is not available")]
    UnknownService(String),

    #[error("Service '{service}' failed in '{method}': {source}")]
    Service {
        service: String,
        method: String,
        #[source]
        source: ServiceError,
    },

    #[error("Type error: {0}")]
    Type(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_render_with_dots() {
        let path = FieldPath::root("people").child("manager").child("name");
        assert_eq!(path.to_string(), "people.manager.name");
        assert_eq!(FieldPath::default().to_string(), "<operation>");
    }

    #[test]
    fn field_errors_keep_kind_and_path() {
        let path = FieldPath::root("createUser");
        let error = CompileError::input_shape(&path, "Exactly one field must be specified");
        let collected = FieldError::new("createUser", &error);
        assert_eq!(collected.kind, ErrorKind::InputShape);
        assert_eq!(collected.path, path);
        assert!(!error.is_fatal());
    }
}
