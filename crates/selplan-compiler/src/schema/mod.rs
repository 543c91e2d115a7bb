//! Read-only schema registry.
//!
//! A [`Schema`] owns object types and their field descriptors, input object
//! and enum types, the root operation type names and the directive registry.
//! It is built once with [`SchemaBuilder`] and then shared (`Arc<Schema>`)
//! across any number of concurrent compiles.
//!
//! Every field carries a resolve expression over its owner's field
//! parameter. Fields backed by a service additionally record:
//! - the distinct services they reference,
//! - the service-independent member chains of their resolve expression
//!   ("extracted fields"), materialized by the service-free pass under a
//!   synthesized name and re-read by the service pass.

pub mod config;

use crate::directive::{DirectiveProcessor, DirectiveRegistry};
use crate::error::SchemaError;
use crate::extension::FieldExtension;
use crate::selection::OperationKind;
use indexmap::IndexMap;
use selplan_ir::{Expr, Param, ScalarType, ServiceId, Type, TypeKind};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

// ============================================================================
// Input types and argument definitions
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "of", rename_all = "snake_case")]
pub enum InputTypeKind {
    Scalar(ScalarType),
    Enum(String),
    Object(String),
    List(Box<InputType>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InputType {
    pub kind: InputTypeKind,
    pub nullable: bool,
}

impl InputType {
    pub fn scalar(scalar: ScalarType) -> Self {
        Self {
            kind: InputTypeKind::Scalar(scalar),
            nullable: true,
        }
    }

    pub fn enumeration(name: impl Into<String>) -> Self {
        Self {
            kind: InputTypeKind::Enum(name.into()),
            nullable: true,
        }
    }

    pub fn object(name: impl Into<String>) -> Self {
        Self {
            kind: InputTypeKind::Object(name.into()),
            nullable: true,
        }
    }

    pub fn list(element: InputType) -> Self {
        Self {
            kind: InputTypeKind::List(Box::new(element)),
            nullable: true,
        }
    }

    pub fn non_null(mut self) -> Self {
        self.nullable = false;
        self
    }
}

impl fmt::Display for InputType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            InputTypeKind::Scalar(scalar) => f.write_str(scalar.name())?,
            InputTypeKind::Enum(name) | InputTypeKind::Object(name) => f.write_str(name)?,
            InputTypeKind::List(element) => write!(f, "[{element}]")?,
        }
        if !self.nullable {
            f.write_str("!")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArgumentDef {
    pub name: String,
    pub ty: InputType,
    pub default: Option<Value>,
    pub description: Option<String>,
}

impl ArgumentDef {
    pub fn new(name: impl Into<String>, ty: InputType) -> Self {
        Self {
            name: name.into(),
            ty,
            default: None,
            description: None,
        }
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Non-null without a default.
    pub fn is_required(&self) -> bool {
        !self.ty.nullable && self.default.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InputObjectDef {
    pub name: String,
    pub fields: IndexMap<String, InputType>,
    /// Exactly one field must be set.
    pub one_of: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnumDef {
    pub name: String,
    pub values: Vec<String>,
}

// ============================================================================
// Fields
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct FieldId(u32);

impl FieldId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// A service-independent sub-expression of a service field.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedField {
    /// Name the value is materialized under by the service-free pass.
    pub name: String,
    /// Expression over the owning field's parameter.
    pub expr: Expr,
}

#[derive(Debug)]
pub struct FieldDef {
    pub id: FieldId,
    pub name: String,
    pub owner: String,
    pub ty: Type,
    /// Stands for the owner value inside `resolve`.
    pub param: Param,
    pub resolve: Expr,
    pub services: Vec<ServiceId>,
    pub extracted: Vec<ExtractedField>,
    pub arguments: IndexMap<String, ArgumentDef>,
    /// Stands for the resolved argument record inside `resolve`, when used.
    pub argument_param: Option<Param>,
    /// Inherit arguments from the nearest ancestor selecting this field.
    pub use_arguments_from: Option<FieldId>,
    pub extensions: Vec<Arc<dyn FieldExtension>>,
    pub roles: Vec<String>,
    pub description: Option<String>,
}

impl FieldDef {
    pub fn has_services(&self) -> bool {
        !self.services.is_empty()
    }

    /// Schema entity this field selects into, if any.
    pub fn entity(&self) -> Option<&str> {
        self.ty.entity_name()
    }
}

/// Where a field's value comes from.
#[derive(Debug, Clone)]
pub enum Resolve {
    /// Member chain off the owner value.
    Member(Vec<String>),
    /// Method call on a service.
    Service {
        service: ServiceId,
        method: String,
        args: Vec<ServiceArg>,
    },
    Constant(Value),
    /// Arbitrary expression over [`SchemaBuilder::field_param`] and
    /// [`SchemaBuilder::args_param`].
    Expr(Expr),
}

#[derive(Debug, Clone)]
pub enum ServiceArg {
    /// Member chain off the owner value.
    Member(Vec<String>),
    /// A resolved field argument.
    Argument(String),
    Constant(Value),
}

#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: String,
    pub ty: Type,
    pub resolve: Resolve,
    pub arguments: Vec<ArgumentDef>,
    /// `(owner type, field name)` of the field whose arguments are inherited.
    pub use_arguments_from: Option<(String, String)>,
    pub extensions: Vec<Arc<dyn FieldExtension>>,
    pub roles: Vec<String>,
    pub description: Option<String>,
}

impl FieldSpec {
    /// A field resolved by the owner member of the same name.
    pub fn new(name: impl Into<String>, ty: Type) -> Self {
        let name = name.into();
        Self {
            resolve: Resolve::Member(vec![name.clone()]),
            name,
            ty,
            arguments: vec![],
            use_arguments_from: None,
            extensions: vec![],
            roles: vec![],
            description: None,
        }
    }

    pub fn path(mut self, path: &[&str]) -> Self {
        self.resolve = Resolve::Member(path.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn resolve(mut self, resolve: Resolve) -> Self {
        self.resolve = resolve;
        self
    }

    pub fn service(
        mut self,
        service: impl Into<String>,
        method: impl Into<String>,
        args: Vec<ServiceArg>,
    ) -> Self {
        self.resolve = Resolve::Service {
            service: ServiceId::new(service),
            method: method.into(),
            args,
        };
        self
    }

    pub fn argument(mut self, argument: ArgumentDef) -> Self {
        self.arguments.push(argument);
        self
    }

    pub fn inherit_arguments(mut self, owner: impl Into<String>, field: impl Into<String>) -> Self {
        self.use_arguments_from = Some((owner.into(), field.into()));
        self
    }

    pub fn extension(mut self, extension: Arc<dyn FieldExtension>) -> Self {
        self.extensions.push(extension);
        self
    }

    pub fn role(mut self, role: impl Into<String>) -> Self {
        self.roles.push(role.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

// ============================================================================
// Schema
// ============================================================================

#[derive(Debug)]
pub struct ObjectTypeDef {
    pub name: String,
    pub fields: IndexMap<String, Arc<FieldDef>>,
    pub description: Option<String>,
}

#[derive(Debug)]
pub struct Schema {
    types: IndexMap<String, ObjectTypeDef>,
    inputs: IndexMap<String, InputObjectDef>,
    enums: IndexMap<String, EnumDef>,
    fields: Vec<Arc<FieldDef>>,
    query: String,
    mutation: Option<String>,
    directives: DirectiveRegistry,
}

impl Schema {
    pub fn builder(query: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder::new(query)
    }

    pub fn query_type(&self) -> &str {
        &self.query
    }

    pub fn mutation_type(&self) -> Option<&str> {
        self.mutation.as_deref()
    }

    pub fn root_type(&self, kind: OperationKind) -> Option<&str> {
        match kind {
            OperationKind::Query => Some(self.query_type()),
            OperationKind::Mutation => self.mutation_type(),
        }
    }

    pub fn object(&self, name: &str) -> Option<&ObjectTypeDef> {
        self.types.get(name)
    }

    pub fn objects(&self) -> impl Iterator<Item = &ObjectTypeDef> {
        self.types.values()
    }

    pub fn field(&self, owner: &str, name: &str) -> Option<&Arc<FieldDef>> {
        self.types.get(owner)?.fields.get(name)
    }

    pub fn field_by_id(&self, id: FieldId) -> Option<&Arc<FieldDef>> {
        self.fields.get(id.index())
    }

    pub fn input(&self, name: &str) -> Option<&InputObjectDef> {
        self.inputs.get(name)
    }

    pub fn enum_def(&self, name: &str) -> Option<&EnumDef> {
        self.enums.get(name)
    }

    pub fn directives(&self) -> &DirectiveRegistry {
        &self.directives
    }
}

// ============================================================================
// Builder
// ============================================================================

struct PendingField {
    def: FieldDef,
    inherit: Option<(String, String)>,
}

pub struct SchemaBuilder {
    query: String,
    mutation: Option<String>,
    types: IndexMap<String, Option<String>>,
    fields: Vec<PendingField>,
    by_owner: HashMap<(String, String), FieldId>,
    params: HashMap<String, Param>,
    args_param: Param,
    inputs: IndexMap<String, InputObjectDef>,
    enums: IndexMap<String, EnumDef>,
    directives: DirectiveRegistry,
}

impl SchemaBuilder {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            mutation: None,
            types: IndexMap::new(),
            fields: Vec::new(),
            by_owner: HashMap::new(),
            params: HashMap::new(),
            args_param: Param::fresh("args", Type::json().non_null()),
            inputs: IndexMap::new(),
            enums: IndexMap::new(),
            directives: DirectiveRegistry::with_builtins(),
        }
    }

    pub fn with_mutation_type(mut self, name: impl Into<String>) -> Self {
        self.mutation = Some(name.into());
        self
    }

    pub fn add_type(&mut self, name: impl Into<String>) -> Result<&mut Self, SchemaError> {
        self.add_type_described(name, None)
    }

    pub fn add_type_described(
        &mut self,
        name: impl Into<String>,
        description: Option<String>,
    ) -> Result<&mut Self, SchemaError> {
        let name = name.into();
        if self.types.contains_key(&name) {
            return Err(SchemaError::DuplicateType(name));
        }
        self.types.insert(name, description);
        Ok(self)
    }

    /// The parameter standing for a value of `owner` inside field resolves.
    pub fn field_param(&mut self, owner: &str) -> Param {
        self.params
            .entry(owner.to_string())
            .or_insert_with(|| {
                Param::fresh(owner.to_ascii_lowercase(), Type::entity(owner).non_null())
            })
            .clone()
    }

    /// The parameter standing for a field's resolved argument record.
    pub fn args_param(&self) -> Param {
        self.args_param.clone()
    }

    pub fn add_field(&mut self, owner: &str, spec: FieldSpec) -> Result<FieldId, SchemaError> {
        if !self.types.contains_key(owner) {
            return Err(SchemaError::UnknownType {
                name: owner.to_string(),
                context: format!("field '{}'", spec.name),
            });
        }
        let key = (owner.to_string(), spec.name.clone());
        if self.by_owner.contains_key(&key) {
            return Err(SchemaError::DuplicateField {
                owner: owner.to_string(),
                field: spec.name,
            });
        }

        let param = self.field_param(owner);
        let resolve = self.resolve_expr(&param, &spec);
        let services = resolve.services();
        let extracted = if services.is_empty() {
            vec![]
        } else {
            extract_fields(&spec.name, &resolve, &param)
        };

        let mut arguments: IndexMap<String, ArgumentDef> = IndexMap::new();
        for argument in spec.arguments {
            arguments.insert(argument.name.clone(), argument);
        }
        for extension in &spec.extensions {
            for argument in extension.arguments() {
                arguments.entry(argument.name.clone()).or_insert(argument);
            }
        }

        let argument_param = resolve
            .mentions(&self.args_param)
            .then(|| self.args_param.clone());

        let id = FieldId(self.fields.len() as u32);
        self.fields.push(PendingField {
            def: FieldDef {
                id,
                name: spec.name,
                owner: owner.to_string(),
                ty: spec.ty,
                param,
                resolve,
                services,
                extracted,
                arguments,
                argument_param,
                use_arguments_from: None,
                extensions: spec.extensions,
                roles: spec.roles,
                description: spec.description,
            },
            inherit: spec.use_arguments_from,
        });
        self.by_owner.insert(key, id);
        Ok(id)
    }

    pub fn add_input_type(&mut self, input: InputObjectDef) -> Result<&mut Self, SchemaError> {
        if input.one_of && input.fields.values().any(|ty| !ty.nullable) {
            return Err(SchemaError::OneOfNotNullable(input.name));
        }
        if self.inputs.contains_key(&input.name) {
            return Err(SchemaError::DuplicateType(input.name));
        }
        self.inputs.insert(input.name.clone(), input);
        Ok(self)
    }

    pub fn add_enum(&mut self, def: EnumDef) -> Result<&mut Self, SchemaError> {
        if self.enums.contains_key(&def.name) {
            return Err(SchemaError::DuplicateType(def.name));
        }
        self.enums.insert(def.name.clone(), def);
        Ok(self)
    }

    pub fn register_directive(&mut self, directive: Arc<dyn DirectiveProcessor>) -> &mut Self {
        self.directives.register(directive);
        self
    }

    pub fn build(self) -> Result<Schema, SchemaError> {
        for root in std::iter::once(&self.query).chain(self.mutation.iter()) {
            if !self.types.contains_key(root) {
                return Err(SchemaError::UnknownType {
                    name: root.clone(),
                    context: "the schema root".to_string(),
                });
            }
        }

        let mut fields = Vec::with_capacity(self.fields.len());
        for pending in self.fields {
            let mut def = pending.def;
            let context = format!("field '{}.{}'", def.owner, def.name);
            if let Some(entity) = def.ty.entity_name() {
                if !self.types.contains_key(entity) {
                    return Err(SchemaError::UnknownType {
                        name: entity.to_string(),
                        context,
                    });
                }
            }
            for argument in def.arguments.values() {
                check_input_type(&argument.ty, &self.inputs, &self.enums, &context)?;
            }
            if let Some((owner, field)) = pending.inherit {
                let source = self
                    .by_owner
                    .get(&(owner.clone(), field.clone()))
                    .copied()
                    .ok_or(SchemaError::UnknownField {
                        owner,
                        field,
                        context,
                    })?;
                def.use_arguments_from = Some(source);
            }
            fields.push(Arc::new(def));
        }
        for input in self.inputs.values() {
            let context = format!("input type '{}'", input.name);
            for ty in input.fields.values() {
                check_input_type(ty, &self.inputs, &self.enums, &context)?;
            }
        }

        let mut types: IndexMap<String, ObjectTypeDef> = self
            .types
            .into_iter()
            .map(|(name, description)| {
                let def = ObjectTypeDef {
                    name: name.clone(),
                    fields: IndexMap::new(),
                    description,
                };
                (name, def)
            })
            .collect();
        for field in &fields {
            if let Some(owner) = types.get_mut(&field.owner) {
                owner.fields.insert(field.name.clone(), field.clone());
            }
        }

        Ok(Schema {
            types,
            inputs: self.inputs,
            enums: self.enums,
            fields,
            query: self.query,
            mutation: self.mutation,
            directives: self.directives,
        })
    }

    fn resolve_expr(&self, param: &Param, spec: &FieldSpec) -> Expr {
        match &spec.resolve {
            Resolve::Member(path) => member_chain(param.expr(), path, spec.ty.clone()),
            Resolve::Constant(value) => Expr::constant(value.clone(), spec.ty.clone()),
            Resolve::Expr(expr) => expr.clone(),
            Resolve::Service {
                service,
                method,
                args,
            } => {
                let args = args
                    .iter()
                    .map(|arg| match arg {
                        ServiceArg::Member(path) => member_chain(param.expr(), path, Type::json()),
                        ServiceArg::Argument(name) => {
                            Expr::member(self.args_param.expr(), name.clone(), Type::json())
                        }
                        ServiceArg::Constant(value) => Expr::constant(value.clone(), Type::json()),
                    })
                    .collect();
                Expr::invoke(
                    Expr::service(service.clone()),
                    method.clone(),
                    args,
                    spec.ty.clone(),
                )
            }
        }
    }
}

/// `root.a.b.c`, typing the last step as `ty` and intermediate steps as JSON.
fn member_chain(root: Expr, path: &[String], ty: Type) -> Expr {
    let last = path.len().saturating_sub(1);
    path.iter().enumerate().fold(root, |target, (i, name)| {
        let step_ty = if i == last { ty.clone() } else { Type::json() };
        Expr::member(target, name.clone(), step_ty)
    })
}

/// Maximal member chains rooted at `param`, each under `__{field}_{path}`.
fn extract_fields(field: &str, resolve: &Expr, param: &Param) -> Vec<ExtractedField> {
    fn chain(expr: &Expr, param: &Param, path: &mut Vec<String>) -> bool {
        match expr {
            Expr::Param(p) => p == param,
            Expr::Member { target, name, .. } => {
                if chain(target, param, path) {
                    path.push(name.clone());
                    true
                } else {
                    false
                }
            }
            _ => false,
        }
    }

    fn visit(expr: &Expr, field: &str, param: &Param, out: &mut Vec<ExtractedField>) {
        let mut path = Vec::new();
        if matches!(expr, Expr::Member { .. }) && chain(expr, param, &mut path) {
            let name = format!("__{}_{}", field, path.join("_"));
            if !out.iter().any(|extracted| extracted.name == name) {
                out.push(ExtractedField {
                    name,
                    expr: expr.clone(),
                });
            }
            return;
        }
        for child in expr.children() {
            visit(child, field, param, out);
        }
    }

    let mut out = Vec::new();
    visit(resolve, field, param, &mut out);
    out
}

fn check_input_type(
    ty: &InputType,
    inputs: &IndexMap<String, InputObjectDef>,
    enums: &IndexMap<String, EnumDef>,
    context: &str,
) -> Result<(), SchemaError> {
    match &ty.kind {
        InputTypeKind::Scalar(_) => Ok(()),
        InputTypeKind::Enum(name) if enums.contains_key(name) => Ok(()),
        InputTypeKind::Object(name) if inputs.contains_key(name) => Ok(()),
        InputTypeKind::Enum(name) | InputTypeKind::Object(name) => Err(SchemaError::UnknownType {
            name: name.clone(),
            context: context.to_string(),
        }),
        InputTypeKind::List(element) => check_input_type(element, inputs, enums, context),
    }
}

/// Lists of entities compile as list selections.
pub(crate) fn selects_list(ty: &Type) -> bool {
    matches!(&ty.kind, TypeKind::List(element) if element.entity_name().is_some())
}
