//! Canned service responses loaded from JSON.
//!
//! ```json
//! {
//!   "directory": {
//!     "find": [
//!       { "args": ["1"], "result": { "id": "1", "name": "Ada" } },
//!       { "args": [null], "result": null }
//!     ]
//!   }
//! }
//! ```
//!
//! A call with no matching entry fails, naming the method and arguments.

use indexmap::IndexMap;
use selplan_compiler::{Service, ServiceError, ServiceRegistry};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::trace;

#[derive(Debug, Deserialize)]
struct Response {
    #[serde(default)]
    args: Vec<Value>,
    #[serde(default)]
    result: Value,
}

type FixtureFile = IndexMap<String, IndexMap<String, Vec<Response>>>;

/// One service answering from a table keyed by method and serialized args.
#[derive(Debug, Default)]
pub struct FixtureService {
    name: String,
    responses: HashMap<(String, String), Value>,
}

impl FixtureService {
    fn key(args: &[Value]) -> String {
        Value::Array(args.to_vec()).to_string()
    }
}

impl Service for FixtureService {
    fn invoke(&self, method: &str, args: &[Value]) -> Result<Value, ServiceError> {
        let key = Self::key(args);
        trace!(service = %self.name, method, args = %key, "fixture call");
        self.responses
            .get(&(method.to_string(), key.clone()))
            .cloned()
            .ok_or_else(|| ServiceError::Failed(format!("no fixture for {method}{key}")))
    }
}

pub fn registry_from_json(text: &str) -> Result<ServiceRegistry, serde_json::Error> {
    let file: FixtureFile = serde_json::from_str(text)?;
    let mut registry = ServiceRegistry::new();
    for (name, methods) in file {
        let mut service = FixtureService {
            name: name.clone(),
            responses: HashMap::new(),
        };
        for (method, responses) in methods {
            for response in responses {
                service
                    .responses
                    .insert((method.clone(), FixtureService::key(&response.args)), response.result);
            }
        }
        registry.register(name, Arc::new(service));
    }
    Ok(registry)
}
