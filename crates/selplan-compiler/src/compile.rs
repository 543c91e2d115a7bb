//! Per-node compilation.
//!
//! One phase-tagged recursion serves both passes:
//! - `Pass::ShapeOnly` skips service-backed fields and surfaces their
//!   extracted sub-expressions instead;
//! - `Pass::WithServices` compiles everything, rewriting node contexts onto the
//!   shape-pass result when `context_changed` is set.
//!
//! Expansion (directives, authorization, fragments) happens right before a
//! node's children are compiled. Pruned nodes and nodes with nothing to
//! contribute in the current pass compile to `None`.

use crate::arguments::{validate_arguments, ArgumentResolver};
use crate::auth::FieldAuthorizer;
use crate::context::CompileContext;
use crate::directive::DirectiveLocation;
use crate::error::{CompileError, FieldPath};
use crate::extension::{self, ExtensionContext, SelectionSet};
use crate::operation::CompileOptions;
use crate::schema::{FieldDef, Schema};
use crate::selection::{NodeId, NodeKind, SelectionTree};
use crate::service::ServiceProvider;
use selplan_ir::{
    member_by_name, replace_all, replace_param, replace_params_by_type, Expr, Param,
};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Pass {
    ShapeOnly,
    WithServices,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Frame {
    pass: Pass,
    /// Contexts point at the materialized shape-pass result.
    context_changed: bool,
    /// Zero for root fields.
    depth: usize,
}

impl Frame {
    pub(crate) fn new(pass: Pass, context_changed: bool) -> Self {
        Self {
            pass,
            context_changed,
            depth: 0,
        }
    }

    fn deeper(self) -> Self {
        Self {
            depth: self.depth + 1,
            ..self
        }
    }

    fn is_root(self) -> bool {
        self.depth == 0
    }

    fn shape_only(self) -> bool {
        self.pass == Pass::ShapeOnly
    }
}

/// What an expanded child contributes to its parent's selection.
enum Expansion {
    Node(NodeId),
    /// A service field's extracted sub-expression, surfaced in the shape pass.
    Extracted { field: Arc<FieldDef>, index: usize },
}

/// The node being compiled.
struct Site<'s> {
    id: NodeId,
    name: &'s str,
    field: &'s FieldDef,
    context: &'s Expr,
    lineage: &'s [NodeId],
    path: &'s FieldPath,
}

struct Base {
    expr: Expr,
    /// Read straight off the shape-pass result.
    materialized: bool,
    arguments: Map<String, Value>,
}

pub(crate) struct NodeCompiler<'a> {
    schema: &'a Schema,
    tree: &'a SelectionTree,
    arguments: ArgumentResolver<'a>,
    authorizer: &'a dyn FieldAuthorizer,
    services: Option<&'a dyn ServiceProvider>,
    options: &'a CompileOptions,
}

impl<'a> NodeCompiler<'a> {
    pub(crate) fn new(
        schema: &'a Schema,
        tree: &'a SelectionTree,
        variables: &'a Map<String, Value>,
        authorizer: &'a dyn FieldAuthorizer,
        services: Option<&'a dyn ServiceProvider>,
        options: &'a CompileOptions,
    ) -> Self {
        Self {
            schema,
            tree,
            arguments: ArgumentResolver::new(tree, variables),
            authorizer,
            services,
            options,
        }
    }

    // ========================================================================
    // Expansion
    // ========================================================================

    /// Root fields `root` stands for once directives, authorization and
    /// fragments are applied.
    pub(crate) fn expand_root(&self, root: NodeId) -> Result<Vec<NodeId>, CompileError> {
        let frame = Frame::new(Pass::WithServices, false);
        let expansions = self.expand(&[root], &FieldPath::default(), frame, &mut Vec::new())?;
        Ok(expansions
            .into_iter()
            .filter_map(|expansion| match expansion {
                Expansion::Node(id) => Some(id),
                Expansion::Extracted { .. } => None,
            })
            .collect())
    }

    fn expand(
        &self,
        children: &[NodeId],
        path: &FieldPath,
        frame: Frame,
        fragments: &mut Vec<String>,
    ) -> Result<Vec<Expansion>, CompileError> {
        let mut out = Vec::new();
        for &child in children {
            let node = self.tree.node(child);
            let node_path = if node.kind.is_fragment() {
                path.clone()
            } else {
                path.child(&node.name)
            };
            let Some(id) = self.apply_directives(child, &node_path)? else {
                debug!(path = %node_path, node = %node.name, "pruned by directive");
                continue;
            };

            let node = self.tree.node(id);
            match &node.kind {
                NodeKind::FragmentSpread(name) => {
                    let fragment = self.tree.fragment(name).ok_or_else(|| {
                        CompileError::schema(&node_path, format!("Fragment '{name}' not found"))
                    })?;
                    if fragments.contains(name) {
                        return Err(CompileError::schema(
                            &node_path,
                            format!("Fragment '{name}' spreads itself"),
                        ));
                    }
                    fragments.push(name.clone());
                    let expanded = self.expand(&fragment.children, path, frame, fragments);
                    fragments.pop();
                    out.extend(expanded?);
                }
                NodeKind::InlineFragment => {
                    out.extend(self.expand(&node.children, path, frame, fragments)?);
                }
                NodeKind::Scalar | NodeKind::ObjectProjection | NodeKind::ListSelection => {
                    let Some(field) = &node.field else {
                        return Err(CompileError::schema(
                            &node_path,
                            format!("Selection '{}' has no field", node.name),
                        ));
                    };
                    if !self.authorizer.is_authorized(field) {
                        debug!(path = %node_path, "pruned by authorizer");
                        continue;
                    }
                    out.extend(expand_from_services(id, field, frame));
                }
            }
        }
        Ok(out)
    }

    fn apply_directives(&self, id: NodeId, path: &FieldPath) -> Result<Option<NodeId>, CompileError> {
        let node = self.tree.node(id);
        let location = match node.kind {
            NodeKind::FragmentSpread(_) => DirectiveLocation::FragmentSpread,
            NodeKind::InlineFragment => DirectiveLocation::InlineFragment,
            _ => DirectiveLocation::Field,
        };

        let mut current = id;
        for invocation in &node.directives {
            let processor = self.schema.directives().get(&invocation.name).ok_or_else(|| {
                CompileError::schema(path, format!("Unknown directive '@{}'", invocation.name))
            })?;
            if !processor.locations().contains(&location) {
                return Err(CompileError::schema(
                    path,
                    format!("Directive '@{}' is not allowed on {location}", invocation.name),
                ));
            }
            let args = self.arguments.resolve_arguments(&invocation.arguments);
            match processor
                .process_field(current, &args)
                .map_err(|e| CompileError::argument(path, e.to_string()))?
            {
                Some(next) => current = next,
                None => return Ok(None),
            }
        }
        Ok(Some(current))
    }

    // ========================================================================
    // Compilation
    // ========================================================================

    pub(crate) fn compile_root(
        &self,
        node: NodeId,
        root: &Expr,
        frame: Frame,
        ctx: &mut CompileContext,
    ) -> Result<Option<Expr>, CompileError> {
        let path = FieldPath::root(&self.tree.node(node).name);
        self.compile_node(node, root, &[], &path, frame, ctx)
    }

    fn compile_node(
        &self,
        id: NodeId,
        context: &Expr,
        lineage: &[NodeId],
        path: &FieldPath,
        frame: Frame,
        ctx: &mut CompileContext,
    ) -> Result<Option<Expr>, CompileError> {
        if frame.depth > self.options.max_depth {
            return Err(CompileError::schema(
                path,
                format!("Selection exceeds the maximum depth of {}", self.options.max_depth),
            ));
        }
        let node = self.tree.node(id);
        let Some(field) = node.field.as_deref() else {
            return Err(CompileError::schema(
                path,
                format!("Selection '{}' has no field", node.name),
            ));
        };
        trace!(path = %path, kind = ?node.kind, pass = ?frame.pass, "compiling node");

        let site = Site {
            id,
            name: &node.name,
            field,
            context,
            lineage,
            path,
        };
        match node.kind {
            NodeKind::Scalar => self.compile_scalar(&site, frame, ctx),
            NodeKind::ObjectProjection => self.compile_object(&site, frame, ctx),
            NodeKind::ListSelection => self.compile_list(&site, frame, ctx),
            NodeKind::FragmentSpread(_) | NodeKind::InlineFragment => Err(CompileError::schema(
                path,
                "Fragments are expanded before compilation",
            )),
        }
    }

    fn compile_selection(
        &self,
        parent: &Site<'_>,
        context: &Expr,
        frame: Frame,
        ctx: &mut CompileContext,
    ) -> Result<SelectionSet, CompileError> {
        let children = &self.tree.node(parent.id).children;
        let expansions = self.expand(children, parent.path, frame, &mut Vec::new())?;
        let lineage = [parent.lineage, &[parent.id]].concat();

        let mut selection = SelectionSet::new();
        for expansion in expansions {
            match expansion {
                Expansion::Node(id) => {
                    let name = &self.tree.node(id).name;
                    // First occurrence of an output name wins.
                    if selection.contains_key(name) {
                        continue;
                    }
                    let path = parent.path.child(name);
                    if let Some(expr) = self.compile_node(id, context, &lineage, &path, frame, ctx)? {
                        selection.insert(name.clone(), expr);
                    }
                }
                Expansion::Extracted { field, index } => {
                    let extracted = &field.extracted[index];
                    if !selection.contains_key(&extracted.name) {
                        let expr = replace_param(&extracted.expr, &field.param, context);
                        selection.insert(extracted.name.clone(), expr);
                    }
                }
            }
        }
        Ok(selection)
    }

    fn compile_scalar(
        &self,
        site: &Site<'_>,
        frame: Frame,
        ctx: &mut CompileContext,
    ) -> Result<Option<Expr>, CompileError> {
        if frame.shape_only() && site.field.has_services() {
            return Ok(None);
        }
        let Some(base) = self.resolve_base(site, frame, ctx)? else {
            return Ok(None);
        };
        let ext = self.extension_context(site, &base, frame);
        let expr = extension::scalar_expression(&ext, base.expr.clone())?;
        self.bind_services(expr, site.path, ctx).map(Some)
    }

    fn compile_object(
        &self,
        site: &Site<'_>,
        frame: Frame,
        ctx: &mut CompileContext,
    ) -> Result<Option<Expr>, CompileError> {
        if frame.shape_only() && site.field.has_services() {
            return Ok(None);
        }
        let Some(base) = self.resolve_base(site, frame, ctx)? else {
            return Ok(None);
        };
        let ext = self.extension_context(site, &base, frame);
        let (base_expr, _) = extension::pre_selection(&ext, base.expr.clone(), None)?;

        let selection = self.compile_selection(site, &base_expr, frame.deeper(), ctx)?;
        if selection.is_empty() {
            if self.carries_for_service_pass(site, frame) {
                debug!(path = %site.path, "object kept raw for the service pass");
                return Ok(Some(base_expr));
            }
            trace!(path = %site.path, "empty selection contributes nothing");
            return Ok(None);
        }

        let needs_wrap = (frame.pass == Pass::WithServices && !base_expr.services().is_empty())
            || (frame.is_root() && base_expr.is_construction());
        if needs_wrap {
            return self
                .wrap_with_null_check(site, &ext, base_expr, selection, frame, ctx)
                .map(Some);
        }

        let (base_expr, selection, _) = extension::selection(&ext, base_expr, selection, None)?;
        let built = Expr::new_record(site.name, selection.into_iter().collect());
        if base_expr.ty().nullable && !base_expr.is_construction() {
            Ok(Some(Expr::null_guarded(base_expr, built)))
        } else {
            Ok(Some(built))
        }
    }

    fn compile_list(
        &self,
        site: &Site<'_>,
        frame: Frame,
        ctx: &mut CompileContext,
    ) -> Result<Option<Expr>, CompileError> {
        if frame.shape_only() && site.field.has_services() {
            return Ok(None);
        }
        let Some(base) = self.resolve_base(site, frame, ctx)? else {
            return Ok(None);
        };
        let base_ty = base.expr.ty();
        let Some(element) = base_ty.element() else {
            return Err(CompileError::schema(
                site.path,
                format!("Field '{}' of type {base_ty} is not a list", site.field.name),
            ));
        };

        let item = Param::fresh(site.name, element.clone());
        let ext = self.extension_context(site, &base, frame);
        let (list, changed) = extension::pre_selection(&ext, base.expr.clone(), Some(item.clone()))?;
        let item = changed.unwrap_or(item);

        let selection = self.compile_selection(site, &item.expr(), frame.deeper(), ctx)?;
        if selection.is_empty() {
            if self.carries_for_service_pass(site, frame) {
                debug!(path = %site.path, "list kept raw for the service pass");
                return Ok(Some(list));
            }
            trace!(path = %site.path, "empty selection contributes nothing");
            return Ok(None);
        }
        let (list, selection, changed) =
            extension::selection(&ext, list, selection, Some(item.clone()))?;
        let item = changed.unwrap_or(item);
        let body = Expr::new_record(site.name, selection.into_iter().collect());

        if frame.pass == Pass::WithServices && !list.services().is_empty() {
            let updated = self.bind_services(list, site.path, ctx)?;
            if !updated.ty().nullable {
                return Ok(Some(Expr::select(updated, item, body)));
            }
            let wrap = Param::fresh(site.name, updated.ty());
            let guarded = Expr::null_guarded(wrap.expr(), Expr::select(wrap.expr(), item, body));
            return Ok(Some(Expr::let_in(wrap, updated, guarded)));
        }

        let select = Expr::select(list, item, body);
        if base.expr.ty().nullable {
            Ok(Some(Expr::null_guarded(base.expr, select)))
        } else {
            Ok(Some(select))
        }
    }

    // ========================================================================
    // Base expressions and context replacement
    // ========================================================================

    fn resolve_base(
        &self,
        site: &Site<'_>,
        frame: Frame,
        ctx: &mut CompileContext,
    ) -> Result<Option<Base>, CompileError> {
        let values = self.arguments.resolve(site.id, site.lineage);
        let arguments = validate_arguments(self.schema, site.field, values, site.path)?;

        let (mut expr, materialized) = if frame.context_changed {
            self.replace_context(site, frame)
        } else {
            (
                replace_param(&site.field.resolve, &site.field.param, site.context),
                false,
            )
        };

        if let Some(args_param) = &site.field.argument_param {
            if expr.mentions(args_param) {
                let bound = Param::fresh("args", args_param.ty().clone());
                ctx.add_constant(bound.clone(), Value::Object(arguments.clone()));
                expr = replace_param(&expr, args_param, &bound.expr());
            }
        }

        for invocation in &self.tree.node(site.id).directives {
            let Some(processor) = self.schema.directives().get(&invocation.name) else {
                continue;
            };
            let args = self.arguments.resolve_arguments(&invocation.arguments);
            match processor
                .process_expression(expr, &args)
                .map_err(|e| CompileError::argument(site.path, e.to_string()))?
            {
                Some(next) => expr = next,
                None => {
                    debug!(path = %site.path, directive = %invocation.name, "expression pruned");
                    return Ok(None);
                }
            }
        }

        Ok(Some(Base {
            expr,
            materialized,
            arguments,
        }))
    }

    /// Re-point a node's base expression at `site.context`, trying in order:
    /// wholesale replacement at the root, a member of the same name, extracted
    /// sub-expressions, then the field parameter.
    fn replace_context(&self, site: &Site<'_>, frame: Frame) -> (Expr, bool) {
        if frame.is_root() {
            return (site.context.clone(), true);
        }
        if let Some(member) = member_by_name(site.context, site.name) {
            return (member, true);
        }

        let mut expr = site.field.resolve.clone();
        if self.tree.has_any_services(site.id) {
            let pairs: Vec<(Expr, Expr)> = site
                .field
                .extracted
                .iter()
                .filter_map(|extracted| {
                    member_by_name(site.context, &extracted.name)
                        .map(|member| (extracted.expr.clone(), member))
                })
                .collect();
            expr = replace_all(&expr, &pairs);
        }
        (replace_param(&expr, &site.field.param, site.context), false)
    }

    /// A nested node whose selected children all resolve in the service pass
    /// still has to hand its raw value to that pass.
    fn carries_for_service_pass(&self, site: &Site<'_>, frame: Frame) -> bool {
        frame.shape_only() && !frame.is_root() && self.tree.has_service_descendants(site.id)
    }

    // ========================================================================
    // Services
    // ========================================================================

    fn bind_services(
        &self,
        expr: Expr,
        path: &FieldPath,
        ctx: &mut CompileContext,
    ) -> Result<Expr, CompileError> {
        let services = expr.services();
        if services.is_empty() {
            return Ok(expr);
        }
        if let Some(provider) = self.services {
            if let Some(missing) = services.iter().find(|service| !provider.contains(service)) {
                return Err(CompileError::schema(
                    path,
                    format!("Service '{missing}' is not registered"),
                ));
            }
        }
        ctx.add_services(&services);
        Ok(ctx.bind_services(&expr))
    }

    /// Evaluate `base` once into a fresh parameter and gate every selection
    /// entry on a single null test of it.
    fn wrap_with_null_check(
        &self,
        site: &Site<'_>,
        ext: &ExtensionContext<'_>,
        base: Expr,
        selection: SelectionSet,
        frame: Frame,
        ctx: &mut CompileContext,
    ) -> Result<Expr, CompileError> {
        let services = base.services();
        let updated = self.bind_services(base.clone(), site.path, ctx)?;
        let wrap = Param::fresh(site.name, updated.ty());
        let target = base.ty();
        // Children may already carry the base with its services bound.
        let pairs = [(base, wrap.expr()), (updated.clone(), wrap.expr())];

        let selection: SelectionSet = selection
            .into_iter()
            .map(|(name, expr)| {
                let expr = replace_all(&expr, &pairs);
                let expr = if frame.context_changed {
                    replace_params_by_type(&expr, &target, &wrap.expr())
                } else {
                    expr
                };
                (name, expr)
            })
            .collect();
        let (_, selection, _) = extension::selection(ext, wrap.expr(), selection, None)?;

        debug!(path = %site.path, services = ?services, "single-evaluation null guard");
        let body = Expr::null_guarded(
            wrap.expr(),
            Expr::new_record(site.name, selection.into_iter().collect()),
        );
        Ok(Expr::let_in(wrap, updated, body))
    }

    fn extension_context<'s>(
        &'s self,
        site: &'s Site<'_>,
        base: &'s Base,
        frame: Frame,
    ) -> ExtensionContext<'s> {
        ExtensionContext {
            schema: self.schema,
            field: site.field,
            arguments: &base.arguments,
            path: site.path,
            materialized: base.materialized,
            service_pass: frame.pass == Pass::WithServices,
        }
    }
}

/// What a field contributes to the current pass: in the shape pass a service
/// field contributes its extracted sub-expressions (or nothing); otherwise the
/// node itself.
fn expand_from_services(id: NodeId, field: &Arc<FieldDef>, frame: Frame) -> Vec<Expansion> {
    if frame.shape_only() && field.has_services() {
        if field.extracted.is_empty() {
            trace!(field = %field.name, "service field contributes nothing to the shape pass");
        }
        return (0..field.extracted.len())
            .map(|index| Expansion::Extracted {
                field: field.clone(),
                index,
            })
            .collect();
    }
    vec![Expansion::Node(id)]
}
