//! Operation-level compile driver.
//!
//! Each root field compiles independently. With
//! `execute_service_fields_separately` set, a root field whose subtree selects
//! service-backed fields compiles twice:
//! 1. a shape pass over the data root that leaves services out and
//!    materializes the values service fields depend on;
//! 2. a service pass whose root is a parameter standing for the shape pass
//!    result.
//!
//! Argument, input-shape and extension errors are collected per root field;
//! schema compile errors abort the whole operation.

use crate::auth::{AllowAll, FieldAuthorizer};
use crate::compile::{Frame, NodeCompiler, Pass};
use crate::context::{Binding, CompileContext};
use crate::error::{CompileError, FieldError, FieldPath};
use crate::schema::Schema;
use crate::selection::{NodeId, OperationKind, SelectionTree};
use crate::service::ServiceProvider;
use selplan_ir::{Expr, Param, ServiceId, Type};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileOptions {
    /// Split service-backed selections into a second pass.
    pub execute_service_fields_separately: bool,
    /// Deepest selection nesting accepted below a root field.
    pub max_depth: usize,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            execute_service_fields_separately: true,
            max_depth: 64,
        }
    }
}

/// One executable pass: `body` evaluated with `root` bound to its input and
/// every binding parameter bound to its value or service.
#[derive(Debug, Clone, Serialize)]
pub struct CompiledPlan {
    pub root: Param,
    pub body: Expr,
    pub bindings: Vec<(Param, Binding)>,
    pub services: Vec<ServiceId>,
}

impl CompiledPlan {
    pub fn result_type(&self) -> Type {
        self.body.ty()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CompiledField {
    pub name: String,
    /// Absent when the field has nothing to compute without services.
    pub shape_pass: Option<CompiledPlan>,
    /// Present only when the field's subtree uses services.
    pub service_pass: Option<CompiledPlan>,
}

impl CompiledField {
    /// The plan whose result is the field's final value.
    pub fn final_plan(&self) -> Option<&CompiledPlan> {
        self.service_pass.as_ref().or(self.shape_pass.as_ref())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CompiledOperation {
    pub kind: OperationKind,
    pub fields: Vec<CompiledField>,
    pub errors: Vec<FieldError>,
}

impl CompiledOperation {
    pub fn field(&self, name: &str) -> Option<&CompiledField> {
        self.fields.iter().find(|field| field.name == name)
    }

    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

static ALLOW_ALL: AllowAll = AllowAll;

pub struct OperationCompiler<'a> {
    schema: &'a Schema,
    options: CompileOptions,
    authorizer: &'a dyn FieldAuthorizer,
    services: Option<&'a dyn ServiceProvider>,
}

impl<'a> OperationCompiler<'a> {
    pub fn new(schema: &'a Schema) -> Self {
        Self {
            schema,
            options: CompileOptions::default(),
            authorizer: &ALLOW_ALL,
            services: None,
        }
    }

    pub fn with_options(mut self, options: CompileOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_authorizer(mut self, authorizer: &'a dyn FieldAuthorizer) -> Self {
        self.authorizer = authorizer;
        self
    }

    /// Check referenced services against `services` while compiling.
    pub fn with_service_provider(mut self, services: &'a dyn ServiceProvider) -> Self {
        self.services = Some(services);
        self
    }

    pub fn options(&self) -> &CompileOptions {
        &self.options
    }

    pub fn compile(
        &self,
        tree: &SelectionTree,
        variables: &Map<String, Value>,
    ) -> Result<CompiledOperation, CompileError> {
        let kind = tree.kind();
        let root_type = self.schema.root_type(kind).ok_or_else(|| {
            CompileError::schema(
                &FieldPath::default(),
                format!("Schema has no root type for {kind:?} operations"),
            )
        })?;

        let compiler = NodeCompiler::new(
            self.schema,
            tree,
            variables,
            self.authorizer,
            self.services,
            &self.options,
        );
        let mut fields: Vec<CompiledField> = Vec::with_capacity(tree.roots().len());
        let mut errors = Vec::new();
        for &selected in tree.roots() {
            let roots = match compiler.expand_root(selected) {
                Ok(roots) => roots,
                Err(error) => {
                    collect(&tree.node(selected).name, error, &mut errors)?;
                    continue;
                }
            };
            for root in roots {
                let name = tree.node(root).name.clone();
                if fields.iter().any(|field| field.name == name) {
                    continue;
                }
                match self.compile_root_field(&compiler, tree, root, root_type) {
                    Ok(field) => fields.push(field),
                    Err(error) => collect(&name, error, &mut errors)?,
                }
            }
        }

        info!(
            fields = fields.len(),
            errors = errors.len(),
            "compiled operation"
        );
        Ok(CompiledOperation {
            kind,
            fields,
            errors,
        })
    }

    fn compile_root_field(
        &self,
        compiler: &NodeCompiler<'_>,
        tree: &SelectionTree,
        root: NodeId,
        root_type: &str,
    ) -> Result<CompiledField, CompileError> {
        let name = tree.node(root).name.clone();
        let data = Param::fresh("data", Type::entity(root_type).non_null());

        if !self.options.execute_service_fields_separately {
            let plan = compile_pass(compiler, root, &data, Frame::new(Pass::WithServices, false))?;
            return Ok(CompiledField {
                name,
                shape_pass: plan,
                service_pass: None,
            });
        }

        let shape_pass = compile_pass(compiler, root, &data, Frame::new(Pass::ShapeOnly, false))?;
        if !tree.has_any_services(root) {
            debug!(field = %name, "no services selected, single pass");
            return Ok(CompiledField {
                name,
                shape_pass,
                service_pass: None,
            });
        }

        let service_pass = match &shape_pass {
            Some(plan) => {
                let materialized = Param::fresh(&name, plan.result_type());
                compile_pass(compiler, root, &materialized, Frame::new(Pass::WithServices, true))?
            }
            None => compile_pass(compiler, root, &data, Frame::new(Pass::WithServices, false))?,
        };
        debug!(field = %name, shape = shape_pass.is_some(), "compiled service pass");
        Ok(CompiledField {
            name,
            shape_pass,
            service_pass,
        })
    }
}

fn collect(field: &str, error: CompileError, errors: &mut Vec<FieldError>) -> Result<(), CompileError> {
    if error.is_fatal() {
        return Err(error);
    }
    warn!(field = %field, error = %error, "root field failed to compile");
    errors.push(FieldError::new(field, &error));
    Ok(())
}

fn compile_pass(
    compiler: &NodeCompiler<'_>,
    node: NodeId,
    root: &Param,
    frame: Frame,
) -> Result<Option<CompiledPlan>, CompileError> {
    let mut ctx = CompileContext::new();
    let Some(body) = compiler.compile_root(node, &root.expr(), frame, &mut ctx)? else {
        return Ok(None);
    };
    let (bindings, services) = ctx.into_parts();
    Ok(Some(CompiledPlan {
        root: root.clone(),
        body,
        bindings,
        services,
    }))
}
