//! Filter trees passed to the ORM as the `where` part of [FindOptions](super::FindOptions).
//!
//! A filter is a recursive union of scalars, objects, arrays and deferred
//! variable references. Object keys are either model attribute names or ORM
//! operators, so attributes and operators can interleave at any depth:
//!
//! ```text
//! { name: { like: "A%" }, or: [ { id: 1 }, { id: { gt: 5 } } ] }
//! ```

use async_graphql::{Value, Variables};
use indexmap::IndexMap;
use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};

/// ORM operator tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    And,
    Or,
    Gt,
    Gte,
    Lt,
    Lte,
    Ne,
    Eq,
    In,
    NotIn,
    Like,
    NotLike,
    ILike,
    NotILike,
    Between,
    NotBetween,
    Overlap,
    Contains,
    Contained,
    Any,
    /// Marks the value as a reference to another column rather than a literal
    Col,
}

impl Op {
    pub const ALL: [Op; 21] = [
        Op::And,
        Op::Or,
        Op::Gt,
        Op::Gte,
        Op::Lt,
        Op::Lte,
        Op::Ne,
        Op::Eq,
        Op::In,
        Op::NotIn,
        Op::Like,
        Op::NotLike,
        Op::ILike,
        Op::NotILike,
        Op::Between,
        Op::NotBetween,
        Op::Overlap,
        Op::Contains,
        Op::Contained,
        Op::Any,
        Op::Col,
    ];

    /// The sigil-free name clients use for this operator in GraphQL input.
    pub fn name(&self) -> &'static str {
        match self {
            Op::And => "and",
            Op::Or => "or",
            Op::Gt => "gt",
            Op::Gte => "gte",
            Op::Lt => "lt",
            Op::Lte => "lte",
            Op::Ne => "ne",
            Op::Eq => "eq",
            Op::In => "in",
            Op::NotIn => "notIn",
            Op::Like => "like",
            Op::NotLike => "notLike",
            Op::ILike => "iLike",
            Op::NotILike => "notILike",
            Op::Between => "between",
            Op::NotBetween => "notBetween",
            Op::Overlap => "overlap",
            Op::Contains => "contains",
            Op::Contained => "contained",
            Op::Any => "any",
            Op::Col => "col",
        }
    }

    /// The token the ORM uses internally, e.g. `$gt`.
    pub fn token(&self) -> String {
        format!("${}", self.name())
    }
}

/// Key of a filter object: either an operator or a plain attribute name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum WhereKey {
    Op(Op),
    Field(String),
}

impl WhereKey {
    pub fn field(name: impl Into<String>) -> Self {
        WhereKey::Field(name.into())
    }
}

impl std::fmt::Display for WhereKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WhereKey::Op(op) => f.write_str(&op.token()),
            WhereKey::Field(name) => f.write_str(name),
        }
    }
}

/// A node of a filter tree.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    /// Any non-composite value (null, number, string, boolean, enum)
    Scalar(Value),
    Object(IndexMap<WhereKey, FilterValue>),
    Array(Vec<FilterValue>),
    /// A value to be read from the bound query variables before the query runs
    Deferred(String),
}

impl Default for FilterValue {
    fn default() -> Self {
        FilterValue::Object(IndexMap::new())
    }
}

impl FilterValue {
    /// An empty filter object
    pub fn object() -> Self {
        Self::default()
    }

    /// Build an object node from `(key, value)` pairs
    pub fn from_pairs(pairs: impl IntoIterator<Item = (WhereKey, FilterValue)>) -> Self {
        FilterValue::Object(pairs.into_iter().collect())
    }

    pub fn as_object(&self) -> Option<&IndexMap<WhereKey, FilterValue>> {
        match self {
            FilterValue::Object(map) => Some(map),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            FilterValue::Object(map) => map.is_empty(),
            FilterValue::Array(items) => items.is_empty(),
            _ => false,
        }
    }

    /// Set `key` on an object node, turning a non-object node into an object first.
    pub fn insert(&mut self, key: WhereKey, value: FilterValue) {
        if !matches!(self, FilterValue::Object(_)) {
            *self = FilterValue::object();
        }
        if let FilterValue::Object(map) = self {
            map.insert(key, value);
        }
    }

    /// Merge `other` into this node. Object keys of `other` overwrite ours;
    /// any other combination is replaced by `other` outright.
    pub fn merge(self, other: FilterValue) -> FilterValue {
        match (self, other) {
            (FilterValue::Object(mut ours), FilterValue::Object(theirs)) => {
                for (key, value) in theirs {
                    ours.insert(key, value);
                }
                FilterValue::Object(ours)
            }
            (_, other) => other,
        }
    }

    /// Whether any node of the tree is still a deferred variable reference.
    pub fn has_deferred(&self) -> bool {
        match self {
            FilterValue::Deferred(_) => true,
            FilterValue::Object(map) => map.values().any(FilterValue::has_deferred),
            FilterValue::Array(items) => items.iter().any(FilterValue::has_deferred),
            FilterValue::Scalar(_) => false,
        }
    }

    /// Replace every deferred reference with the bound variable value.
    ///
    /// Unbound variables resolve to `null`, as they would in GraphQL.
    pub fn resolve_deferred(&mut self, variables: &Variables) {
        match self {
            FilterValue::Deferred(name) => {
                let value = variables
                    .get(name.as_str())
                    .cloned()
                    .unwrap_or(Value::Null);
                *self = FilterValue::from_value(value);
            }
            FilterValue::Object(map) => {
                for value in map.values_mut() {
                    value.resolve_deferred(variables);
                }
            }
            FilterValue::Array(items) => {
                for item in items {
                    item.resolve_deferred(variables);
                }
            }
            FilterValue::Scalar(_) => {}
        }
    }

    /// Convert a GraphQL value into a filter tree. Object keys stay plain
    /// field keys; operator translation is a separate step.
    pub fn from_value(value: Value) -> FilterValue {
        match value {
            Value::Object(map) => FilterValue::Object(
                map.into_iter()
                    .map(|(key, value)| (WhereKey::Field(key.to_string()), Self::from_value(value)))
                    .collect(),
            ),
            Value::List(items) => {
                FilterValue::Array(items.into_iter().map(Self::from_value).collect())
            }
            scalar => FilterValue::Scalar(scalar),
        }
    }

    /// If this node is `{ $col: "name" }`, the referenced column name.
    pub fn column_ref(&self) -> Option<&str> {
        let map = self.as_object()?;
        if map.len() != 1 {
            return None;
        }
        match map.get(&WhereKey::Op(Op::Col)) {
            Some(FilterValue::Scalar(Value::String(name))) => Some(name),
            _ => None,
        }
    }
}

impl From<Value> for FilterValue {
    fn from(value: Value) -> Self {
        FilterValue::from_value(value)
    }
}

impl Serialize for WhereKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl Serialize for FilterValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            FilterValue::Scalar(value) => value.serialize(serializer),
            FilterValue::Object(map) => {
                let mut out = serializer.serialize_map(Some(map.len()))?;
                for (key, value) in map {
                    out.serialize_entry(key, value)?;
                }
                out.end()
            }
            FilterValue::Array(items) => {
                let mut out = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    out.serialize_element(item)?;
                }
                out.end()
            }
            FilterValue::Deferred(name) => serializer.collect_str(&format_args!("${name}")),
        }
    }
}
