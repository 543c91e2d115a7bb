//! Per-compile accumulator state.
//!
//! One [`CompileContext`] is created for each compile pass of a root field
//! and threaded through the recursion by `&mut`. Both collections only grow.

use indexmap::{IndexMap, IndexSet};
use selplan_ir::{Expr, Param, ParamId, ServiceId, Type};
use serde::Serialize;
use serde_json::Value;

/// Runtime value bound to a plan parameter.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "binding", content = "value", rename_all = "snake_case")]
pub enum Binding {
    Value(Value),
    Service(ServiceId),
}

#[derive(Debug, Default)]
pub struct CompileContext {
    constants: IndexMap<ParamId, (Param, Binding)>,
    services: IndexSet<ServiceId>,
    service_params: IndexMap<ServiceId, Param>,
}

impl CompileContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_constant(&mut self, param: Param, value: Value) {
        self.constants
            .insert(param.id(), (param, Binding::Value(value)));
    }

    pub fn add_services<'s>(&mut self, services: impl IntoIterator<Item = &'s ServiceId>) {
        for service in services {
            self.services.insert(service.clone());
        }
    }

    pub fn services(&self) -> impl Iterator<Item = &ServiceId> {
        self.services.iter()
    }

    pub fn constants(&self) -> impl Iterator<Item = &(Param, Binding)> {
        self.constants.values()
    }

    /// The parameter standing for `service` in this plan (one per service).
    pub fn service_param(&mut self, service: &ServiceId) -> Param {
        if let Some(param) = self.service_params.get(service) {
            return param.clone();
        }
        let param = Param::fresh(service.as_str(), Type::service(service.clone()));
        self.constants.insert(
            param.id(),
            (param.clone(), Binding::Service(service.clone())),
        );
        self.service_params.insert(service.clone(), param.clone());
        self.services.insert(service.clone());
        param
    }

    /// Replace every service reference in `expr` by its bound parameter.
    pub fn bind_services(&mut self, expr: &Expr) -> Expr {
        let pairs: Vec<(Expr, Expr)> = expr
            .services()
            .into_iter()
            .map(|service| {
                let param = self.service_param(&service);
                (Expr::service(service), param.expr())
            })
            .collect();
        selplan_ir::replace_all(expr, &pairs)
    }

    pub fn into_parts(self) -> (Vec<(Param, Binding)>, Vec<ServiceId>) {
        (
            self.constants.into_values().collect(),
            self.services.into_iter().collect(),
        )
    }
}
