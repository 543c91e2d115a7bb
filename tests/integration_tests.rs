//! Integration tests for the complete selplan pipeline
//!
//! These tests verify end-to-end functionality across crates:
//! - Schema config → Schema → Request → Selection tree
//! - Selection tree → Two-pass plans → Executor
//!
//! Run with: cargo test --test integration_tests

use selplan_compiler::{
    CompileOptions, ErrorKind, Executor, OperationCompiler, OperationKind, RequestConfig,
    SchemaConfig, Service, ServiceError, ServiceRegistry,
};
use serde_json::{json, Map, Value};
use std::fs;
use std::sync::{Arc, Mutex};
use tempfile::tempdir;

const LIBRARY: &str = r#"{
  "query": "Query",
  "mutation": "Mutation",
  "types": {
    "Query": { "fields": {
      "books": { "type": "[Book!]!", "sort": {}, "paging": { "default_take": 10, "max_take": 20 } }
    }},
    "Mutation": { "fields": {
      "borrow": {
        "type": "Book",
        "service": { "name": "loans", "method": "borrow", "args": ["$args.isbn"] },
        "arguments": { "isbn": { "type": "String!" } }
      }
    }},
    "Book": { "fields": {
      "isbn": "String!",
      "title": "String",
      "author": { "type": "Author", "service": { "name": "authors", "method": "get", "args": ["author_id"] } }
    }},
    "Author": { "fields": { "name": "String", "born": "Int" } }
  }
}"#;

fn data() -> Value {
    json!({ "books": [
        { "isbn": "b1", "title": "Dune", "author_id": "herbert" },
        { "isbn": "b2", "title": "Emma", "author_id": "austen" },
        { "isbn": "b3", "title": "Anathem", "author_id": "stephenson" }
    ]})
}

fn registry(calls: Arc<Mutex<Vec<String>>>) -> ServiceRegistry {
    let authors = {
        let calls = calls.clone();
        move |method: &str, args: &[Value]| -> Result<Value, ServiceError> {
            calls.lock().expect("call log").push(format!("authors.{method}"));
            match args.first().and_then(Value::as_str) {
                Some("herbert") => Ok(json!({ "name": "Frank Herbert", "born": 1920 })),
                Some("austen") => Ok(json!({ "name": "Jane Austen", "born": 1775 })),
                _ => Ok(Value::Null),
            }
        }
    };
    let loans = move |method: &str, args: &[Value]| -> Result<Value, ServiceError> {
        calls.lock().expect("call log").push(format!("loans.{method}"));
        let isbn = args.first().cloned().unwrap_or(Value::Null);
        Ok(json!({ "isbn": isbn, "title": "Dune", "author_id": "herbert" }))
    };
    ServiceRegistry::new()
        .with("authors", Arc::new(authors) as Arc<dyn Service>)
        .with("loans", Arc::new(loans) as Arc<dyn Service>)
}

fn request(value: Value) -> RequestConfig {
    serde_json::from_value(value).expect("request parses")
}

// ============================================================================
// Config files → plans → results
// ============================================================================

#[test]
fn test_pipeline_from_config_files() {
    let dir = tempdir().expect("tempdir");
    let schema_path = dir.path().join("schema.json");
    fs::write(&schema_path, LIBRARY).expect("write schema");

    let text = fs::read_to_string(&schema_path).expect("read schema");
    let schema = SchemaConfig::from_json(&text)
        .expect("config parses")
        .build()
        .expect("schema builds");

    let tree = request(json!({
        "selections": [{ "field": "books", "arguments": { "sort": { "title": "ASC" } }, "selections": [
            { "field": "title" },
            { "field": "author", "selections": [{ "field": "name" }] }
        ]}]
    }))
    .build(&schema)
    .expect("tree builds");

    let calls = Arc::new(Mutex::new(Vec::new()));
    let registry = registry(calls.clone());
    let operation = OperationCompiler::new(&schema)
        .with_service_provider(&registry)
        .compile(&tree, &Map::new())
        .expect("compiles");
    assert!(operation.is_ok(), "errors: {:?}", operation.errors);

    let result = Executor::new(&registry)
        .execute_operation(&operation, &data())
        .expect("executes");
    assert_eq!(
        result,
        json!({ "books": [
            { "title": "Anathem", "author": null },
            { "title": "Dune", "author": { "name": "Frank Herbert" } },
            { "title": "Emma", "author": { "name": "Jane Austen" } }
        ]})
    );
    assert_eq!(calls.lock().expect("call log").len(), 3);
}

#[test]
fn test_default_take_limits_lists() {
    let schema = SchemaConfig::from_json(LIBRARY)
        .expect("config parses")
        .build()
        .expect("schema builds");
    let tree = request(json!({
        "selections": [{ "field": "books", "arguments": { "skip": 1 }, "selections": [{ "field": "isbn" }] }]
    }))
    .build(&schema)
    .expect("tree builds");

    let operation = OperationCompiler::new(&schema)
        .compile(&tree, &Map::new())
        .expect("compiles");
    let registry = ServiceRegistry::new();
    let result = Executor::new(&registry)
        .execute_operation(&operation, &data())
        .expect("executes");
    assert_eq!(result, json!({ "books": [{ "isbn": "b2" }, { "isbn": "b3" }] }));
}

// ============================================================================
// Operations
// ============================================================================

#[test]
fn test_mutations_compile_against_the_mutation_root() {
    let schema = SchemaConfig::from_json(LIBRARY)
        .expect("config parses")
        .build()
        .expect("schema builds");
    let tree = request(json!({
        "operation": "mutation",
        "selections": [{ "field": "borrow", "arguments": { "isbn": "b1" }, "selections": [
            { "field": "isbn" },
            { "field": "author", "selections": [{ "field": "born" }] }
        ]}]
    }))
    .build(&schema)
    .expect("tree builds");
    assert_eq!(tree.kind(), OperationKind::Mutation);

    let calls = Arc::new(Mutex::new(Vec::new()));
    let registry = registry(calls.clone());
    let operation = OperationCompiler::new(&schema)
        .compile(&tree, &Map::new())
        .expect("compiles");
    let result = Executor::new(&registry)
        .execute_operation(&operation, &json!({}))
        .expect("executes");
    assert_eq!(
        result,
        json!({ "borrow": { "isbn": "b1", "author": { "born": 1920 } } })
    );
    assert_eq!(
        *calls.lock().expect("call log"),
        vec!["loans.borrow".to_string(), "authors.get".to_string()]
    );
}

#[test]
fn test_depth_limit_aborts_compilation() {
    let schema = SchemaConfig::from_json(LIBRARY)
        .expect("config parses")
        .build()
        .expect("schema builds");
    let tree = request(json!({
        "selections": [{ "field": "books", "selections": [
            { "field": "author", "selections": [{ "field": "name" }] }
        ]}]
    }))
    .build(&schema)
    .expect("tree builds");

    let err = OperationCompiler::new(&schema)
        .with_options(CompileOptions {
            max_depth: 1,
            ..CompileOptions::default()
        })
        .compile(&tree, &Map::new())
        .err()
        .expect("fails");
    assert_eq!(err.kind(), ErrorKind::SchemaCompile);
    assert_eq!(err.message(), "Selection exceeds the maximum depth of 1");
    assert_eq!(err.path().to_string(), "books.author.name");
}

#[test]
fn test_compiled_operations_serialize() {
    let schema = SchemaConfig::from_json(LIBRARY)
        .expect("config parses")
        .build()
        .expect("schema builds");
    let tree = request(json!({
        "selections": [{ "field": "books", "selections": [
            { "field": "author", "selections": [{ "field": "name" }] }
        ]}]
    }))
    .build(&schema)
    .expect("tree builds");
    let operation = OperationCompiler::new(&schema)
        .compile(&tree, &Map::new())
        .expect("compiles");

    let value = serde_json::to_value(&operation).expect("serializes");
    assert_eq!(value["kind"], json!("query"));
    assert_eq!(value["fields"][0]["name"], json!("books"));
    assert_eq!(value["fields"][0]["service_pass"]["services"], json!(["authors"]));
}
