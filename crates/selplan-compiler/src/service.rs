//! External service capabilities.
//!
//! The compiler only needs to know which services exist; invocation happens
//! in the executor.

use indexmap::IndexMap;
use selplan_ir::ServiceId;
use serde_json::Value;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
    #[error("Unknown method '{0}'")]
    UnknownMethod(String),

    #[error("{0}")]
    Failed(String),
}

pub trait Service: Send + Sync {
    fn invoke(&self, method: &str, args: &[Value]) -> Result<Value, ServiceError>;
}

impl<F> Service for F
where
    F: Fn(&str, &[Value]) -> Result<Value, ServiceError> + Send + Sync,
{
    fn invoke(&self, method: &str, args: &[Value]) -> Result<Value, ServiceError> {
        self(method, args)
    }
}

/// Lookup of services by declared id.
pub trait ServiceProvider {
    fn resolve(&self, id: &ServiceId) -> Option<&dyn Service>;

    fn contains(&self, id: &ServiceId) -> bool {
        self.resolve(id).is_some()
    }
}

#[derive(Default, Clone)]
pub struct ServiceRegistry {
    services: IndexMap<ServiceId, Arc<dyn Service>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, id: impl Into<String>, service: Arc<dyn Service>) {
        self.services.insert(ServiceId::new(id), service);
    }

    pub fn with(mut self, id: impl Into<String>, service: Arc<dyn Service>) -> Self {
        self.register(id, service);
        self
    }

    pub fn ids(&self) -> impl Iterator<Item = &ServiceId> {
        self.services.keys()
    }
}

impl ServiceProvider for ServiceRegistry {
    fn resolve(&self, id: &ServiceId) -> Option<&dyn Service> {
        self.services.get(id).map(|service| service.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn closures_are_services() {
        let registry = ServiceRegistry::new().with(
            "echo",
            Arc::new(|method: &str, args: &[Value]| -> Result<Value, ServiceError> {
                Ok(json!({ "method": method, "args": args }))
            }),
        );
        let echo = registry.resolve(&ServiceId::new("echo"));
        let Some(echo) = echo else {
            panic!("echo must be registered");
        };
        assert_eq!(
            echo.invoke("ping", &[json!(1)]).ok(),
            Some(json!({ "method": "ping", "args": [1] }))
        );
        assert!(!registry.contains(&ServiceId::new("missing")));
    }
}
