mod common;

use common::{compile, compile_with, request, run, schema, single_pass, Fixture};
use proptest::prelude::*;
use selplan_compiler::CompileOptions;
use selplan_ir::Expr;
use serde_json::{json, Value};

fn invokes(expr: &Expr) -> usize {
    expr.count_where(|e| matches!(e, Expr::Invoke { .. }))
}

// ============================================================================
// Pass structure
// ============================================================================

#[test]
fn shape_pass_leaves_services_out() {
    let schema = schema();
    let op = compile(
        &schema,
        &request(json!({
            "selections": [{ "field": "people", "selections": [
                { "field": "name" },
                { "field": "manager", "selections": [{ "field": "name" }] }
            ]}]
        })),
    );
    assert!(op.is_ok(), "errors: {:?}", op.errors);

    let people = op.field("people").expect("people compiled");
    let shape = people.shape_pass.as_ref().expect("shape pass");
    assert!(shape.services.is_empty());
    assert_eq!(invokes(&shape.body), 0);

    // The manager id is materialized for the service pass.
    let shape_ty = shape.result_type();
    let element = shape_ty.element().expect("list result");
    assert!(element.member("name").is_some());
    assert!(element.member("__manager_manager_id").is_some());
    assert!(element.member("manager").is_none());

    let services = people.service_pass.as_ref().expect("service pass");
    assert_eq!(
        services.services.iter().map(|s| s.as_str()).collect::<Vec<_>>(),
        vec!["directory"]
    );
    assert_eq!(services.root.ty(), &shape_ty);
}

#[test]
fn service_free_fields_compile_once() {
    let schema = schema();
    let op = compile(
        &schema,
        &request(json!({
            "selections": [{ "field": "people", "selections": [{ "field": "id" }, { "field": "team" }] }]
        })),
    );
    let people = op.field("people").expect("people compiled");
    assert!(people.shape_pass.is_some());
    assert!(people.service_pass.is_none());
}

#[test]
fn root_service_fields_skip_the_shape_pass() {
    let schema = schema();
    let op = compile(
        &schema,
        &request(json!({
            "selections": [{ "field": "person", "arguments": { "id": "2" }, "selections": [{ "field": "name" }] }]
        })),
    );
    let person = op.field("person").expect("person compiled");
    assert!(person.shape_pass.is_none());
    assert!(person.service_pass.is_some());

    let fixture = Fixture::new();
    assert_eq!(run(&op, &fixture), json!({ "person": { "name": "Grace" } }));
}

#[test]
fn service_results_are_read_from_the_materialized_shape() {
    let schema = schema();
    let op = compile(
        &schema,
        &request(json!({
            "selections": [{ "field": "me", "selections": [
                { "field": "name" },
                { "field": "rating" },
                { "field": "manager", "selections": [{ "field": "name" }] }
            ]}]
        })),
    );
    let fixture = Fixture::new();
    assert_eq!(
        run(&op, &fixture),
        json!({ "me": { "name": "Grace", "rating": 20, "manager": { "name": "Linus" } } })
    );
}

#[test]
fn service_lists_without_extractions_compile_in_the_service_pass() {
    let schema = schema();
    let op = compile(
        &schema,
        &request(json!({
            "selections": [{ "field": "people", "arguments": { "team": "tools" }, "selections": [
                { "field": "colleagues", "selections": [{ "field": "name" }] }
            ]}]
        })),
    );
    let people = op.field("people").expect("people compiled");
    assert!(people.shape_pass.is_none());

    let fixture = Fixture::new();
    let grace_only = json!({ "colleagues": [{ "name": "Grace" }] });
    assert_eq!(
        run(&op, &fixture),
        json!({ "people": [grace_only.clone(), grace_only.clone(), grace_only] })
    );
}

#[test]
fn plain_objects_over_service_only_children_reach_the_service_pass() {
    let schema = schema();
    let req = request(json!({
        "selections": [{ "field": "me", "selections": [
            { "field": "name" },
            { "field": "buddy", "selections": [
                { "field": "colleagues", "selections": [{ "field": "name" }] }
            ]}
        ]}]
    }));
    let op = compile(&schema, &req);
    assert!(op.is_ok(), "errors: {:?}", op.errors);

    let me = op.field("me").expect("me compiled");
    let shape_ty = me.shape_pass.as_ref().expect("shape pass").result_type();
    assert!(shape_ty.member("buddy").is_some());

    let expected = json!({ "me": {
        "name": "Grace",
        "buddy": { "colleagues": [{ "name": "Ada" }, { "name": "Grace" }, { "name": "Linus" }] }
    }});
    let fixture = Fixture::new();
    assert_eq!(run(&op, &fixture), expected);
    assert_eq!(fixture.calls("directory.team"), 1);

    let single = compile_with(&schema, &req, json!({}), single_pass()).expect("compiles");
    assert_eq!(run(&single, &Fixture::new()), expected);
}

#[test]
fn children_aliased_like_their_root_read_their_own_value() {
    let schema = schema();
    let req = request(json!({
        "selections": [{ "field": "me", "selections": [
            { "field": "name", "alias": "me" },
            { "field": "rating" }
        ]}]
    }));
    let expected = json!({ "me": { "me": "Grace", "rating": 20 } });

    let split = compile(&schema, &req);
    assert!(split.is_ok(), "errors: {:?}", split.errors);
    assert_eq!(run(&split, &Fixture::new()), expected);

    let single = compile_with(&schema, &req, json!({}), single_pass()).expect("compiles");
    assert_eq!(run(&single, &Fixture::new()), expected);
}

// ============================================================================
// Equivalence with single-pass compilation
// ============================================================================

fn person_selection(name: &str) -> Value {
    match name {
        "manager" => json!({ "field": "manager", "selections": [{ "field": "name" }, { "field": "id" }] }),
        "profile" => json!({ "field": "profile", "selections": [{ "field": "bio" }, { "field": "followers" }] }),
        "rating" => json!({ "field": "rating", "arguments": { "scale": 3 } }),
        other => json!({ "field": other }),
    }
}

const PERSON_FIELDS: [&str; 6] = ["id", "name", "team", "manager", "rating", "profile"];

fn selection_order() -> impl Strategy<Value = Vec<&'static str>> {
    (Just(PERSON_FIELDS.to_vec()).prop_shuffle(), 1..=PERSON_FIELDS.len())
        .prop_map(|(fields, len)| fields.into_iter().take(len).collect())
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 64, failure_persistence: None, ..ProptestConfig::default() })]

    #[test]
    fn two_pass_matches_single_pass(fields in selection_order(), root_is_list in any::<bool>()) {
        let schema = schema();
        let children: Vec<Value> = fields.iter().map(|name| person_selection(name)).collect();
        let root = if root_is_list { "people" } else { "me" };
        let req = request(json!({ "selections": [{ "field": root, "selections": children }] }));

        let split = compile_with(&schema, &req, json!({}), CompileOptions::default()).expect("compiles");
        let single = compile_with(&schema, &req, json!({}), single_pass()).expect("compiles");
        prop_assert!(split.is_ok());
        prop_assert!(single.is_ok());

        let split_result = run(&split, &Fixture::new());
        let single_result = run(&single, &Fixture::new());
        prop_assert_eq!(&split_result, &single_result);

        // Output keys follow selection order.
        let first = if root_is_list { &split_result[root][0] } else { &split_result[root] };
        let keys: Vec<&str> = first
            .as_object()
            .map(|object| object.keys().map(String::as_str).collect())
            .unwrap_or_default();
        prop_assert_eq!(keys, fields);
    }
}
