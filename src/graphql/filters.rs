//! Operator translation for `where` arguments
//!
//! GraphQL names cannot start with `$`, so clients spell operators without
//! the sigil (`{ name: { like: "A%" } }`). Translation rewrites every
//! allow-listed key to the ORM's operator, at any depth, including inside
//! arrays. Other keys are kept as attribute names.
//!
//! Variables are already bound when a resolver sees its arguments, so the
//! translated tree holds plain values; deferred references only come from hooks.

use async_graphql::Value;

use crate::orm::{FilterValue, Op, WhereKey};

/// Look up an allow-listed operator by its GraphQL-safe name
pub fn operator_from_name(name: &str) -> Option<Op> {
    Op::ALL.into_iter().find(|op| op.name() == name)
}

/// Return a copy of `filter` with every allow-listed key turned into an operator.
pub fn replace_where_operators(filter: &FilterValue) -> FilterValue {
    match filter {
        FilterValue::Object(map) => FilterValue::Object(
            map.iter()
                .map(|(key, value)| (translate_key(key), replace_where_operators(value)))
                .collect(),
        ),
        FilterValue::Array(items) => {
            FilterValue::Array(items.iter().map(replace_where_operators).collect())
        }
        other => other.clone(),
    }
}

fn translate_key(key: &WhereKey) -> WhereKey {
    match key {
        WhereKey::Field(name) => match operator_from_name(name) {
            Some(op) => WhereKey::Op(op),
            None => key.clone(),
        },
        WhereKey::Op(_) => key.clone(),
    }
}

/// Build a translated filter straight from a `where` argument value
pub fn where_from_value(value: &Value) -> FilterValue {
    replace_where_operators(&FilterValue::from_value(value.clone()))
}
