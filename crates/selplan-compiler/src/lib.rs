//! # selplan-compiler
//!
//! Compiles a GraphQL-style selection tree into executable [`selplan_ir`]
//! expression plans.
//!
//! Key pieces:
//! 1. **Schema**: field descriptors with resolve expressions, services and
//!    extracted service-independent sub-expressions
//! 2. **Two-pass compilation**: a service-free shape pass followed by a
//!    service pass rewritten onto the materialized shape
//! 3. **Single evaluation**: service-backed objects are bound once and
//!    null-tested once before their fields are read
//! 4. **Directives and extensions**: `@include`/`@skip`, sorting and paging
//!    hooked into every field without the compiler knowing about them
//!
//! ## Module Organization
//!
//! - `schema`: schema registry, builder and JSON configuration
//! - `selection` / `request`: selection tree arena and its JSON request form
//! - `arguments`: argument inheritance, variables and validation
//! - `operation`: the per-root-field compile driver
//! - `execute`: reference executor over JSON data

pub mod arguments;
pub mod auth;
mod compile;
pub mod context;
pub mod directive;
pub mod error;
pub mod execute;
pub mod extension;
pub mod operation;
pub mod request;
pub mod schema;
pub mod selection;
pub mod service;

pub use arguments::{validate_arguments, ArgumentResolver};
pub use auth::{AllowAll, FieldAuthorizer, RoleAuthorizer};
pub use context::{Binding, CompileContext};
pub use directive::{
    DirectiveError, DirectiveLocation, DirectiveProcessor, DirectiveRegistry, IncludeDirective,
    SkipDirective,
};
pub use error::{CompileError, ErrorKind, ExecuteError, FieldError, FieldPath, SchemaError};
pub use execute::Executor;
pub use extension::{
    ExtensionContext, ExtensionError, FieldExtension, OffsetPagingExtension, SelectionSet,
    SortExtension,
};
pub use operation::{
    CompileOptions, CompiledField, CompiledOperation, CompiledPlan, OperationCompiler,
};
pub use request::RequestConfig;
pub use schema::config::SchemaConfig;
pub use schema::{
    ArgumentDef, FieldDef, FieldId, FieldSpec, InputObjectDef, InputType, Resolve, Schema,
    SchemaBuilder, ServiceArg,
};
pub use selection::{
    ArgumentValue, DirectiveInvocation, NodeId, NodeKind, OperationKind, SelectionNode,
    SelectionTree,
};
pub use service::{Service, ServiceError, ServiceProvider, ServiceRegistry};
