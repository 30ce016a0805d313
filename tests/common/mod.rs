//! Shared fixtures: users and tasks in an in-memory SQLite database.

#![allow(dead_code)]

use std::sync::Arc;

use async_graphql::Value;
use async_graphql::dynamic::{Object, Schema, SchemaBuilder};
use async_graphql::Request;
use graphql_orm::graphql::{
    AttributeFieldsOptions, RequestContext, TypeCache, attribute_fields, date_scalar, json_scalar,
};
use graphql_orm::orm::{AttributeDef, AttributeType, SqliteAssociation, SqliteModel};
use indexmap::IndexMap;
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;
use tracing_subscriber::EnvFilter;

/// Titles of tasks 1 to 9
pub const TITLES: [&str; 9] = ["b", "a", "b", "a", "c", "a", "b", "c", "a"];

pub struct Fixture {
    pub pool: SqlitePool,
    pub users: Arc<SqliteModel>,
    pub tasks: Arc<SqliteModel>,
    pub user_tasks: Arc<SqliteAssociation>,
}

/// Two users (`A`, `B`) and nine tasks; tasks 1-5 belong to user 1, 6-9 to
/// user 2, odd tasks are completed and a task's priority equals its id.
pub async fn fixture() -> Fixture {
    init_tracing();
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();

    let users = Arc::new(
        SqliteModel::new(
            pool.clone(),
            "User",
            "users",
            vec![
                AttributeDef::new("id", AttributeType::Integer).primary_key(),
                AttributeDef::new("name", AttributeType::String).not_null(),
            ],
        )
        .unwrap(),
    );
    let tasks = Arc::new(
        SqliteModel::new(
            pool.clone(),
            "Task",
            "tasks",
            vec![
                AttributeDef::new("id", AttributeType::Integer).primary_key(),
                AttributeDef::new("title", AttributeType::String).not_null(),
                AttributeDef::new("user_id", AttributeType::Integer),
                AttributeDef::new("completed", AttributeType::Boolean).not_null(),
                AttributeDef::new("priority", AttributeType::Integer).not_null(),
            ],
        )
        .unwrap(),
    );
    users.sync().await.unwrap();
    tasks.sync().await.unwrap();

    for (id, name) in [(1, "A"), (2, "B")] {
        users
            .create(row(&[("id", Value::from(id)), ("name", Value::from(name))]))
            .await
            .unwrap();
    }
    for (i, title) in TITLES.iter().enumerate() {
        let id = i as i64 + 1;
        tasks
            .create(row(&[
                ("id", Value::from(id)),
                ("title", Value::from(*title)),
                ("user_id", Value::from(if id <= 5 { 1 } else { 2 })),
                ("completed", Value::from(id % 2 == 1)),
                ("priority", Value::from(id)),
            ]))
            .await
            .unwrap();
    }

    let user_tasks = Arc::new(SqliteAssociation::has_many(
        "tasks",
        users.clone(),
        tasks.clone(),
        "user_id",
    ));

    Fixture {
        pool,
        users,
        tasks,
        user_tasks,
    }
}

/// Log to the test output; `RUST_LOG=graphql_orm=debug` shows generated SQL
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn row(pairs: &[(&str, Value)]) -> IndexMap<String, Value> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

/// `Task` and `User` objects with their attribute fields, plus the scalars
pub fn object_types(fixture: &Fixture, cache: &mut TypeCache) -> (Object, Object, Vec<async_graphql::dynamic::Enum>) {
    let options = AttributeFieldsOptions::default();
    let (task, mut enums) = attribute_fields(fixture.tasks.as_ref(), &options, cache)
        .unwrap()
        .apply(Object::new("Task"));
    let (user, user_enums) = attribute_fields(fixture.users.as_ref(), &options, cache)
        .unwrap()
        .apply(Object::new("User"));
    enums.extend(user_enums);
    (task, user, enums)
}

pub fn schema_builder(query: Object, objects: Vec<Object>) -> SchemaBuilder {
    let builder = Schema::build("Query", None, None)
        .register(json_scalar())
        .register(date_scalar())
        .register(query);
    objects
        .into_iter()
        .fold(builder, |builder, object| builder.register(object))
}

/// Execute a query and return its data, failing on any error
pub async fn run(schema: &Schema, query: &str) -> serde_json::Value {
    run_with(schema, RequestContext::new(), query).await
}

pub async fn run_with(schema: &Schema, context: RequestContext, query: &str) -> serde_json::Value {
    let response = schema.execute(context.attach(Request::new(query))).await;
    assert!(response.errors.is_empty(), "{:?}", response.errors);
    response.data.into_json().unwrap()
}

/// Execute a query and return its error messages
pub async fn errors(schema: &Schema, query: &str) -> Vec<String> {
    let response = schema
        .execute(RequestContext::new().attach(Request::new(query)))
        .await;
    response.errors.into_iter().map(|e| e.message).collect()
}
