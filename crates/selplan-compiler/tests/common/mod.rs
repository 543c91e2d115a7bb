//! Shared schema, data and recording services for the compiler tests.

#![allow(dead_code)]

use selplan_compiler::{
    CompileOptions, CompiledOperation, CompileError, Executor, OperationCompiler, RequestConfig,
    Schema, SchemaConfig, Service, ServiceError, ServiceRegistry,
};
use serde_json::{json, Map, Value};
use std::sync::{Arc, Mutex};

pub const SCHEMA: &str = r#"{
  "query": "Query",
  "enums": { "Team": ["core", "tools"] },
  "inputs": {
    "PersonLookup": { "one_of": true, "fields": { "id": "ID", "name": "String" } }
  },
  "types": {
    "Query": {
      "fields": {
        "people": {
          "type": "[Person!]!",
          "sort": {},
          "paging": { "max_take": 50 },
          "arguments": { "team": { "type": "Team" } }
        },
        "me": { "type": "Person", "path": "viewer" },
        "person": {
          "type": "Person",
          "service": { "name": "directory", "method": "find", "args": ["$args.id"] },
          "arguments": { "id": { "type": "ID!" } }
        },
        "lookup": {
          "type": "Person",
          "service": { "name": "directory", "method": "lookup", "args": ["$args.by"] },
          "arguments": { "by": { "type": "PersonLookup!" } }
        }
      }
    },
    "Person": {
      "fields": {
        "id": "ID!",
        "name": "String",
        "team": "String",
        "buddy": { "type": "Person", "path": "buddy" },
        "salary": { "type": "Int", "roles": ["hr"] },
        "manager": {
          "type": "Person",
          "service": { "name": "directory", "method": "find", "args": ["manager_id"] }
        },
        "rating": {
          "type": "Int",
          "service": { "name": "ratings", "method": "score", "args": ["id", "$args.scale"] },
          "arguments": { "scale": { "type": "Int", "default": 10 } }
        },
        "profile": {
          "type": "Profile",
          "service": { "name": "profiles", "method": "get", "args": ["id"] }
        },
        "colleagues": {
          "type": "[Person!]",
          "service": { "name": "directory", "method": "team", "args": ["$args.team"] },
          "use_arguments_from": "Query.people"
        }
      }
    },
    "Profile": {
      "fields": { "bio": "String", "followers": "Int" }
    }
  }
}"#;

pub fn schema() -> Schema {
    SchemaConfig::from_json(SCHEMA)
        .expect("schema config parses")
        .build()
        .expect("schema builds")
}

fn people() -> Vec<Value> {
    vec![
        json!({ "id": "1", "name": "Ada", "team": "core", "manager_id": "3", "salary": 100 }),
        json!({ "id": "2", "name": "Grace", "team": "tools", "manager_id": "3", "salary": 120 }),
        json!({ "id": "3", "name": "Linus", "team": "core", "salary": 150 }),
    ]
}

pub fn data() -> Value {
    let mut viewer = people()[1].clone();
    viewer["buddy"] = people()[0].clone();
    json!({ "people": people(), "viewer": viewer })
}

fn numeric_id(value: Option<&Value>) -> Option<i64> {
    value.and_then(Value::as_str).and_then(|id| id.parse().ok())
}

/// Directory, ratings and profile services that record every call.
#[derive(Clone, Default)]
pub struct Fixture {
    calls: Arc<Mutex<Vec<String>>>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self, name: &str) -> usize {
        self.calls
            .lock()
            .expect("call log")
            .iter()
            .filter(|call| call.as_str() == name)
            .count()
    }

    fn record(&self, service: &str, method: &str) {
        self.calls
            .lock()
            .expect("call log")
            .push(format!("{service}.{method}"));
    }

    fn service(
        &self,
        name: &'static str,
        handler: fn(&str, &[Value]) -> Result<Value, ServiceError>,
    ) -> Arc<dyn Service> {
        let fixture = self.clone();
        Arc::new(move |method: &str, args: &[Value]| {
            fixture.record(name, method);
            handler(method, args)
        })
    }

    pub fn registry(&self) -> ServiceRegistry {
        ServiceRegistry::new()
            .with("directory", self.service("directory", directory))
            .with("ratings", self.service("ratings", ratings))
            .with("profiles", self.service("profiles", profiles))
    }
}

fn find_by(key: &str, value: &Value) -> Value {
    people()
        .into_iter()
        .find(|person| person.get(key) == Some(value))
        .unwrap_or(Value::Null)
}

fn directory(method: &str, args: &[Value]) -> Result<Value, ServiceError> {
    let arg = args.first().cloned().unwrap_or(Value::Null);
    match method {
        "find" => Ok(find_by("id", &arg)),
        "lookup" => Ok(match (arg.get("id"), arg.get("name")) {
            (Some(id), _) if !id.is_null() => find_by("id", id),
            (_, Some(name)) => find_by("name", name),
            _ => Value::Null,
        }),
        "team" => Ok(Value::Array(
            people()
                .into_iter()
                .filter(|person| arg.is_null() || person.get("team") == Some(&arg))
                .collect(),
        )),
        other => Err(ServiceError::UnknownMethod(other.to_string())),
    }
}

fn ratings(method: &str, args: &[Value]) -> Result<Value, ServiceError> {
    if method != "score" {
        return Err(ServiceError::UnknownMethod(method.to_string()));
    }
    let id = numeric_id(args.first())
        .ok_or_else(|| ServiceError::Failed("score needs an id".to_string()))?;
    let scale = args.get(1).and_then(Value::as_i64).unwrap_or(1);
    Ok(json!(id * scale))
}

fn profiles(method: &str, args: &[Value]) -> Result<Value, ServiceError> {
    if method != "get" {
        return Err(ServiceError::UnknownMethod(method.to_string()));
    }
    Ok(match numeric_id(args.first()) {
        Some(id) if id < 3 => json!({ "bio": format!("bio of {id}"), "followers": id * 100 }),
        _ => Value::Null,
    })
}

pub fn request(value: Value) -> RequestConfig {
    serde_json::from_value(value).expect("request parses")
}

pub fn compile_with(
    schema: &Schema,
    request: &RequestConfig,
    variables: Value,
    options: CompileOptions,
) -> Result<CompiledOperation, CompileError> {
    let tree = request.build(schema)?;
    let variables: Map<String, Value> = match variables {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    OperationCompiler::new(schema)
        .with_options(options)
        .compile(&tree, &variables)
}

pub fn compile(schema: &Schema, request: &RequestConfig) -> CompiledOperation {
    compile_with(schema, request, json!({}), CompileOptions::default()).expect("compiles")
}

pub fn run(operation: &CompiledOperation, fixture: &Fixture) -> Value {
    let registry = fixture.registry();
    Executor::new(&registry)
        .execute_operation(operation, &data())
        .expect("executes")
}

pub fn single_pass() -> CompileOptions {
    CompileOptions {
        execute_service_fields_separately: false,
        ..CompileOptions::default()
    }
}
