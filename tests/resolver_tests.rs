//! Integration tests for the resolver factory
//!
//! Every test builds a dynamic schema over the SQLite fixture and runs real
//! GraphQL queries through it.

mod common;

use std::sync::Arc;

use async_graphql::Value;
use async_graphql::dynamic::{InputValue, Object, Schema, TypeRef};
use graphql_orm::graphql::{
    AttributeFieldsOptions, RequestContext, ResolverOptions, TargetSpec, TypeCache, TypeMapper,
    attribute_fields, default_args, default_list_args, resolver,
};
use graphql_orm::orm::{
    Association, AttributeDef, AttributeType, FilterValue, Instance, Model, SqliteModel, WhereKey,
};
use graphql_orm::Error;
use pretty_assertions::assert_eq;
use serde_json::json;

use common::{Fixture, fixture, object_types, run, run_with, schema_builder};

fn schema(fixture: &Fixture, task_options: ResolverOptions) -> Schema {
    let mut cache = TypeCache::new();
    let (task, user, enums) = object_types(fixture, &mut cache);
    assert!(enums.is_empty());

    let user_tasks: Arc<dyn Association> = fixture.user_tasks.clone();
    let user = user.field(
        resolver(TargetSpec::association(user_tasks), task_options)
            .unwrap()
            .into_field_with_args("tasks", TypeRef::named_nn_list_nn("Task"), default_list_args()),
    );

    let users: Arc<dyn Model> = fixture.users.clone();
    let query = Object::new("Query")
        .field(
            resolver(TargetSpec::model(users.clone()), ResolverOptions::default())
                .unwrap()
                .into_field_with_args("users", TypeRef::named_nn_list_nn("User"), default_list_args()),
        )
        .field(
            resolver(TargetSpec::model(users.clone()), ResolverOptions::default())
                .unwrap()
                .into_field_with_args(
                    "user",
                    TypeRef::named("User"),
                    default_args(users.as_ref(), &TypeMapper::new()).unwrap(),
                ),
        );

    schema_builder(query, vec![task, user]).finish().unwrap()
}

// ============================================================================
// Model targets
// ============================================================================

#[tokio::test]
async fn test_list_defaults_to_primary_key_order() {
    let fixture = fixture().await;
    let schema = schema(&fixture, ResolverOptions::default());

    let data = run(&schema, "{ users { id name } }").await;
    assert_eq!(
        data,
        json!({ "users": [{ "id": 1, "name": "A" }, { "id": 2, "name": "B" }] })
    );
}

#[tokio::test]
async fn test_where_operators() {
    let fixture = fixture().await;
    let schema = schema(&fixture, ResolverOptions::default());

    let data = run(&schema, r#"{ users(where: { name: { like: "B%" } }) { id } }"#).await;
    assert_eq!(data, json!({ "users": [{ "id": 2 }] }));

    let data = run(
        &schema,
        r#"{ users(where: { or: [{ id: 1 }, { name: { in: ["B"] } }] }, order: "reverse:id") { id } }"#,
    )
    .await;
    assert_eq!(data, json!({ "users": [{ "id": 2 }, { "id": 1 }] }));
}

#[tokio::test]
async fn test_limit_offset_and_variables() {
    let fixture = fixture().await;
    let schema = schema(&fixture, ResolverOptions::default());

    let request = async_graphql::Request::new(
        "query Page($limit: Int, $offset: Int) { users(limit: $limit, offset: $offset) { id } }",
    )
    .variables(async_graphql::Variables::from_json(json!({ "limit": 1, "offset": 1 })));
    let response = schema.execute(RequestContext::new().attach(request)).await;
    assert!(response.errors.is_empty(), "{:?}", response.errors);
    assert_eq!(
        response.data.into_json().unwrap(),
        json!({ "users": [{ "id": 2 }] })
    );
}

#[tokio::test]
async fn test_single_by_primary_key() {
    let fixture = fixture().await;
    let schema = schema(&fixture, ResolverOptions::default());

    let data = run(&schema, "{ user(id: 2) { name } missing: user(id: 9) { name } }").await;
    assert_eq!(data, json!({ "user": { "name": "B" }, "missing": null }));
}

#[tokio::test]
async fn test_unknown_filter_attribute_is_a_field_error() {
    let fixture = fixture().await;
    let schema = schema(&fixture, ResolverOptions::default());

    let errors = common::errors(&schema, r#"{ users(where: { nickname: "x" }) { id } }"#).await;
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("nickname"), "{}", errors[0]);
}

// ============================================================================
// Association targets
// ============================================================================

#[tokio::test]
async fn test_association_list() {
    let fixture = fixture().await;
    let schema = schema(&fixture, ResolverOptions::default());

    let data = run(
        &schema,
        r#"{ users { id tasks(where: { completed: true }) { id } } }"#,
    )
    .await;
    assert_eq!(
        data,
        json!({ "users": [
            { "id": 1, "tasks": [{ "id": 1 }, { "id": 3 }, { "id": 5 }] },
            { "id": 2, "tasks": [{ "id": 7 }, { "id": 9 }] },
        ] })
    );
}

#[tokio::test]
async fn test_batched_association_matches_unbatched() {
    let fixture = fixture().await;
    let schema = schema(&fixture, ResolverOptions::default());
    let query = r#"{ users { id tasks(order: "reverse:priority") { id } } }"#;

    let plain = run(&schema, query).await;
    let batched = run_with(&schema, RequestContext::new().with_batching(), query).await;
    assert_eq!(plain, batched);
    assert_eq!(
        batched["users"][1]["tasks"],
        json!([{ "id": 9 }, { "id": 8 }, { "id": 7 }, { "id": 6 }])
    );
}

#[tokio::test]
async fn test_paginated_association_is_not_batched() {
    let fixture = fixture().await;
    let schema = schema(&fixture, ResolverOptions::default());

    let data = run_with(
        &schema,
        RequestContext::new().with_batching(),
        "{ users { tasks(limit: 2, offset: 1) { id } } }",
    )
    .await;
    assert_eq!(
        data,
        json!({ "users": [
            { "tasks": [{ "id": 2 }, { "id": 3 }] },
            { "tasks": [{ "id": 7 }, { "id": 8 }] },
        ] })
    );
}

// ============================================================================
// Hooks
// ============================================================================

#[tokio::test]
async fn test_before_hook_sees_context_and_adds_filters() {
    let fixture = fixture().await;
    let options = ResolverOptions::default().before(|mut options, params| async move {
        if let Some(async_graphql::Value::Number(max)) = params.context.values.get("maxPriority") {
            options.merge_where(FilterValue::from_pairs([(
                WhereKey::field("priority"),
                FilterValue::from_pairs([(
                    WhereKey::Op(graphql_orm::orm::Op::Lte),
                    FilterValue::Scalar(async_graphql::Value::Number(max.clone())),
                )]),
            )]));
        }
        Ok(options)
    });
    let schema = schema(&fixture, options);

    let data = run_with(
        &schema,
        RequestContext::new().value("maxPriority", 2),
        "{ user(id: 1) { tasks { id } } }",
    )
    .await;
    assert_eq!(data, json!({ "user": { "tasks": [{ "id": 1 }, { "id": 2 }] } }));
}

#[tokio::test]
async fn test_after_hook_replaces_result() {
    let fixture = fixture().await;
    let options = ResolverOptions::default().after(|resolved, _| async move {
        let rows: Vec<Instance> = resolved
            .as_list()
            .map(|rows| rows.iter().filter(|t| t.value_string("title").as_deref() == Some("a")).cloned().collect())
            .unwrap_or_default();
        Ok(graphql_orm::graphql::Resolved::List(rows))
    });
    let schema = schema(&fixture, options);

    let data = run(&schema, "{ user(id: 2) { tasks { id title } } }").await;
    assert_eq!(
        data,
        json!({ "user": { "tasks": [{ "id": 6, "title": "a" }, { "id": 9, "title": "a" }] } })
    );
}

#[tokio::test]
async fn test_hook_errors_become_field_errors() {
    let fixture = fixture().await;
    let options = ResolverOptions::default().before(|_, _| async move {
        Err::<graphql_orm::orm::FindOptions, _>(Error::from(anyhow::anyhow!("tasks are private")))
    });
    let schema = schema(&fixture, options);

    let response = schema
        .execute(RequestContext::new().attach(async_graphql::Request::new(
            "{ users { id tasks { id } } }",
        )))
        .await;
    assert!(!response.errors.is_empty());
    assert!(response.errors.iter().all(|e| e.message == "tasks are private"));
}

#[test]
fn test_include_option_is_a_configuration_error() {
    let options = ResolverOptions {
        include: Some(vec!["tasks".into()]),
        ..Default::default()
    };
    let target = TargetSpec::dynamic(|_| Err(graphql_orm::error::config_error("unused")));
    let error = resolver(target, options).unwrap_err();
    assert!(error.is_configuration());
}

// ============================================================================
// Enum attributes
// ============================================================================

#[tokio::test]
async fn test_enum_arguments_match_stored_values() {
    let fixture = fixture().await;
    let tickets = Arc::new(
        SqliteModel::new(
            fixture.pool.clone(),
            "Ticket",
            "tickets",
            vec![
                AttributeDef::new("id", AttributeType::Integer).primary_key(),
                AttributeDef::new(
                    "status",
                    AttributeType::Enum(vec!["in progress".into(), "done".into()]),
                )
                .not_null(),
            ],
        )
        .unwrap(),
    );
    tickets.sync().await.unwrap();
    for (id, status) in [(1, "in progress"), (2, "done"), (3, "in progress")] {
        tickets
            .create(common::row(&[("id", Value::from(id)), ("status", Value::from(status))]))
            .await
            .unwrap();
    }

    let mut cache = TypeCache::new();
    let (ticket, enums) = attribute_fields(tickets.as_ref(), &AttributeFieldsOptions::default(), &mut cache)
        .unwrap()
        .apply(Object::new("Ticket"));
    let model: Arc<dyn Model> = tickets.clone();
    let query = Object::new("Query").field(
        resolver(TargetSpec::model(model), ResolverOptions::default())
            .unwrap()
            .into_field_with_args("tickets", TypeRef::named_nn_list_nn("Ticket"), default_list_args())
            .argument(InputValue::new("status", TypeRef::named("TicketStatusEnumType"))),
    );
    let schema = enums
        .into_iter()
        .fold(common::schema_builder(query, vec![ticket]), |builder, ty| builder.register(ty))
        .finish()
        .unwrap();

    let data = run(&schema, "{ tickets(status: inProgress) { id status } }").await;
    assert_eq!(
        data,
        json!({ "tickets": [
            { "id": 1, "status": "inProgress" },
            { "id": 3, "status": "inProgress" },
        ] })
    );

    let data = run(&schema, r#"{ tickets(where: { status: { in: ["done"] } }) { id } }"#).await;
    assert_eq!(data, json!({ "tickets": [{ "id": 2 }] }));

    let data = run(&schema, r#"{ tickets(where: { status: { ne: "inProgress" } }) { id } }"#).await;
    assert_eq!(data, json!({ "tickets": [{ "id": 2 }] }));
}
