use async_graphql::Value;
use indexmap::IndexMap;

use super::FULL_COUNT;

/// Eagerly loaded association data attached to an instance.
#[derive(Debug, Clone, PartialEq)]
pub enum Included {
    One(Option<Box<Instance>>),
    Many(Vec<Instance>),
}

impl Included {
    pub fn into_vec(self) -> Vec<Instance> {
        match self {
            Included::One(one) => one.map(|i| vec![*i]).unwrap_or_default(),
            Included::Many(many) => many,
        }
    }
}

/// One row returned by the ORM.
#[derive(Debug, Clone, PartialEq)]
pub struct Instance {
    /// Name of the model the row belongs to
    pub model: String,
    pub values: IndexMap<String, Value>,
    pub included: IndexMap<String, Included>,
}

impl Instance {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            values: IndexMap::new(),
            included: IndexMap::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn with_included(mut self, name: impl Into<String>, included: Included) -> Self {
        self.included.insert(name.into(), included);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Eager-loaded data for the named association, if an upstream loader attached it
    pub fn included(&self, name: &str) -> Option<&Included> {
        self.included.get(name)
    }

    /// The window count selected next to this row, if any
    pub fn full_count(&self) -> Option<i64> {
        match self.values.get(FULL_COUNT)? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Render a value as a plain string (used for cursors and global ids)
    pub fn value_string(&self, key: &str) -> Option<String> {
        value_to_string(self.values.get(key)?)
    }
}

/// Plain string form of a scalar value
pub fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Boolean(b) => Some(b.to_string()),
        Value::Enum(e) => Some(e.to_string()),
        other => Some(other.to_string()),
    }
}
