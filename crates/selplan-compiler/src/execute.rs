//! Reference executor for compiled plans over JSON data.
//!
//! Evaluation is strict and left to right. `Let` evaluates its value exactly
//! once, which is what the single-evaluation guarantee of service wrappers
//! rests on. Reading a member of `null` yields `null`.

use crate::context::Binding;
use crate::error::ExecuteError;
use crate::operation::{CompiledField, CompiledOperation, CompiledPlan};
use crate::service::{Service, ServiceProvider};
use selplan_ir::{Builtin, Expr, Param, ParamId, ServiceId, SortDirection};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use tracing::{debug, trace};

enum Slot<'s> {
    Value(Value),
    Service(ServiceId, &'s dyn Service),
}

#[derive(Default)]
struct Env<'s> {
    slots: Vec<(ParamId, Slot<'s>)>,
}

impl<'s> Env<'s> {
    fn push(&mut self, param: &Param, slot: Slot<'s>) {
        self.slots.push((param.id(), slot));
    }

    fn pop(&mut self) {
        self.slots.pop();
    }

    fn get(&self, param: &Param) -> Result<&Slot<'s>, ExecuteError> {
        self.slots
            .iter()
            .rev()
            .find(|(id, _)| *id == param.id())
            .map(|(_, slot)| slot)
            .ok_or_else(|| ExecuteError::UnboundParameter(param.name().to_string()))
    }
}

pub struct Executor<'a> {
    services: &'a dyn ServiceProvider,
}

impl<'a> Executor<'a> {
    pub fn new(services: &'a dyn ServiceProvider) -> Self {
        Self { services }
    }

    /// Evaluate one plan with its root bound to `input`.
    pub fn execute_plan(&self, plan: &CompiledPlan, input: &Value) -> Result<Value, ExecuteError> {
        let mut env = Env::default();
        env.push(&plan.root, Slot::Value(input.clone()));
        for (param, binding) in &plan.bindings {
            let slot = match binding {
                Binding::Value(value) => Slot::Value(value.clone()),
                Binding::Service(id) => Slot::Service(id.clone(), self.service(id)?),
            };
            env.push(param, slot);
        }
        self.eval(&plan.body, &mut env)
    }

    /// Run a root field's passes in order; `None` when nothing was compiled.
    pub fn execute_field(
        &self,
        field: &CompiledField,
        data: &Value,
    ) -> Result<Option<Value>, ExecuteError> {
        let shaped = match &field.shape_pass {
            Some(plan) => Some(self.execute_plan(plan, data)?),
            None => None,
        };
        let Some(plan) = &field.service_pass else {
            return Ok(shaped);
        };
        match shaped {
            Some(Value::Null) => {
                debug!(field = %field.name, "shape pass produced null, skipping service pass");
                Ok(Some(Value::Null))
            }
            Some(materialized) => self.execute_plan(plan, &materialized).map(Some),
            None => self.execute_plan(plan, data).map(Some),
        }
    }

    /// Result object keyed by root field name, in operation order.
    pub fn execute_operation(
        &self,
        operation: &CompiledOperation,
        data: &Value,
    ) -> Result<Value, ExecuteError> {
        let mut out = Map::new();
        for field in &operation.fields {
            if let Some(value) = self.execute_field(field, data)? {
                out.insert(field.name.clone(), value);
            }
        }
        Ok(Value::Object(out))
    }

    fn service(&self, id: &ServiceId) -> Result<&'a dyn Service, ExecuteError> {
        self.services
            .resolve(id)
            .ok_or_else(|| ExecuteError::UnknownService(id.to_string()))
    }

    fn eval(&self, expr: &Expr, env: &mut Env<'a>) -> Result<Value, ExecuteError> {
        match expr {
            Expr::Param(param) => match env.get(param)? {
                Slot::Value(value) => Ok(value.clone()),
                Slot::Service(id, _) => Err(ExecuteError::Type(format!(
                    "service '{id}' used as a value"
                ))),
            },
            Expr::Constant { value, .. } => Ok(value.clone()),
            Expr::Null { .. } => Ok(Value::Null),
            Expr::ServiceRef { service } => Err(ExecuteError::Type(format!(
                "service '{service}' used as a value"
            ))),
            Expr::Member { target, name, .. } => match self.eval(target, env)? {
                Value::Null => Ok(Value::Null),
                Value::Object(mut fields) => Ok(fields.remove(name).unwrap_or(Value::Null)),
                other => Err(ExecuteError::Type(format!(
                    "cannot read '{name}' from {other}"
                ))),
            },
            Expr::Condition {
                test,
                if_true,
                if_false,
            } => match self.eval(test, env)? {
                Value::Bool(true) => self.eval(if_true, env),
                Value::Bool(false) => self.eval(if_false, env),
                other => Err(ExecuteError::Type(format!(
                    "condition evaluated to {other}"
                ))),
            },
            Expr::Equal { lhs, rhs } => {
                let lhs = self.eval(lhs, env)?;
                let rhs = self.eval(rhs, env)?;
                Ok(Value::Bool(lhs == rhs))
            }
            Expr::Builtin { function, args } => self.eval_builtin(expr, *function, args, env),
            Expr::Invoke {
                receiver,
                method,
                args,
                ..
            } => {
                let (id, service) = self.receiver(receiver, env)?;
                let args = args
                    .iter()
                    .map(|arg| self.eval(arg, env))
                    .collect::<Result<Vec<_>, _>>()?;
                trace!(service = %id, method = %method, "invoking service");
                service
                    .invoke(method, &args)
                    .map_err(|source| ExecuteError::Service {
                        service: id.to_string(),
                        method: method.clone(),
                        source,
                    })
            }
            Expr::Lambda { .. } => Err(ExecuteError::Type(
                "lambda evaluated outside of a list function".to_string(),
            )),
            Expr::New { fields, .. } => {
                let mut out = Map::new();
                for (name, field) in fields {
                    out.insert(name.clone(), self.eval(field, env)?);
                }
                Ok(Value::Object(out))
            }
            Expr::Select {
                source,
                param,
                body,
            } => match self.eval(source, env)? {
                Value::Null => Ok(Value::Null),
                Value::Array(items) => items
                    .into_iter()
                    .map(|item| self.bind(param, item, body, env))
                    .collect::<Result<Vec<_>, _>>()
                    .map(Value::Array),
                other => Err(ExecuteError::Type(format!("cannot select over {other}"))),
            },
            Expr::Let { param, value, body } => {
                let value = self.eval(value, env)?;
                self.bind(param, value, body, env)
            }
        }
    }

    fn bind(
        &self,
        param: &Param,
        value: Value,
        body: &Expr,
        env: &mut Env<'a>,
    ) -> Result<Value, ExecuteError> {
        env.push(param, Slot::Value(value));
        let result = self.eval(body, env);
        env.pop();
        result
    }

    fn receiver(
        &self,
        receiver: &Expr,
        env: &Env<'a>,
    ) -> Result<(ServiceId, &'a dyn Service), ExecuteError> {
        match receiver {
            Expr::ServiceRef { service } => Ok((service.clone(), self.service(service)?)),
            Expr::Param(param) => match env.get(param)? {
                Slot::Service(id, service) => Ok((id.clone(), *service)),
                Slot::Value(_) => Err(ExecuteError::Type(format!(
                    "'{param}' is not a service"
                ))),
            },
            other => Err(ExecuteError::Type(format!(
                "cannot invoke a method on {other}"
            ))),
        }
    }

    // ========================================================================
    // List functions
    // ========================================================================

    fn eval_builtin(
        &self,
        expr: &Expr,
        function: Builtin,
        args: &[Expr],
        env: &mut Env<'a>,
    ) -> Result<Value, ExecuteError> {
        if let Builtin::OrderBy(_) | Builtin::ThenBy(_) = function {
            return self.eval_sort(expr, env);
        }
        let Some(source) = args.first() else {
            return Err(ExecuteError::Type(format!("{} without a list", function.name())));
        };
        let items = match self.eval(source, env)? {
            Value::Null if function == Builtin::Count => return Ok(Value::from(0)),
            Value::Null => return Ok(Value::Null),
            Value::Array(items) => items,
            other => {
                return Err(ExecuteError::Type(format!(
                    "{} over non-list {other}",
                    function.name()
                )))
            }
        };

        match function {
            Builtin::Count => Ok(Value::from(items.len())),
            Builtin::Skip | Builtin::Take => {
                let count = match args.get(1) {
                    Some(arg) => self.eval(arg, env)?,
                    None => Value::Null,
                };
                let count = count.as_u64().ok_or_else(|| {
                    ExecuteError::Type(format!("{} count must be an integer", function.name()))
                })? as usize;
                let sliced = if function == Builtin::Skip {
                    items.into_iter().skip(count).collect()
                } else {
                    items.into_iter().take(count).collect()
                };
                Ok(Value::Array(sliced))
            }
            Builtin::OrderBy(_) | Builtin::ThenBy(_) => self.eval_sort(expr, env),
        }
    }

    /// A chain of `ThenBy` over `OrderBy` runs as one stable multi-key sort.
    fn eval_sort(&self, expr: &Expr, env: &mut Env<'a>) -> Result<Value, ExecuteError> {
        let mut keys: Vec<(&Expr, SortDirection)> = Vec::new();
        let mut current = expr;
        while let Expr::Builtin {
            function: function @ (Builtin::OrderBy(_) | Builtin::ThenBy(_)),
            args,
        } = current
        {
            let (Some(source), Some(key)) = (args.first(), args.get(1)) else {
                return Err(ExecuteError::Type(format!(
                    "{} expects a list and a key",
                    function.name()
                )));
            };
            let direction = match function {
                Builtin::OrderBy(direction) | Builtin::ThenBy(direction) => *direction,
                _ => SortDirection::Ascending,
            };
            keys.push((key, direction));
            current = source;
            if matches!(function, Builtin::OrderBy(_)) {
                break;
            }
        }
        keys.reverse();

        let items = match self.eval(current, env)? {
            Value::Null => return Ok(Value::Null),
            Value::Array(items) => items,
            other => return Err(ExecuteError::Type(format!("cannot sort {other}"))),
        };

        let mut keyed = Vec::with_capacity(items.len());
        for item in items {
            let mut values = Vec::with_capacity(keys.len());
            for (key, _) in &keys {
                values.push(self.apply(key, item.clone(), env)?);
            }
            keyed.push((values, item));
        }
        keyed.sort_by(|(a, _), (b, _)| {
            keys.iter()
                .zip(a.iter().zip(b.iter()))
                .map(|((_, direction), (a, b))| match direction {
                    SortDirection::Ascending => compare_values(a, b),
                    SortDirection::Descending => compare_values(b, a),
                })
                .find(|ordering| ordering.is_ne())
                .unwrap_or(Ordering::Equal)
        });
        Ok(Value::Array(keyed.into_iter().map(|(_, item)| item).collect()))
    }

    fn apply(&self, lambda: &Expr, item: Value, env: &mut Env<'a>) -> Result<Value, ExecuteError> {
        match lambda {
            Expr::Lambda { param, body } => self.bind(param, item, body, env),
            other => Err(ExecuteError::Type(format!("expected a key lambda, got {other}"))),
        }
    }
}

/// null < booleans < numbers < strings < lists < objects.
fn compare_values(a: &Value, b: &Value) -> Ordering {
    fn rank(value: &Value) -> u8 {
        match value {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }
    match (a, b) {
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        (Value::Number(a), Value::Number(b)) => a
            .as_f64()
            .zip(b.as_f64())
            .and_then(|(a, b)| a.partial_cmp(&b))
            .unwrap_or(Ordering::Equal),
        (Value::String(a), Value::String(b)) => a.cmp(b),
        _ => rank(a).cmp(&rank(b)),
    }
}
