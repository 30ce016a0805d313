//! Core traits of the ORM seam
//!
//! The GraphQL layer never talks to a database directly. Everything it needs
//! from the ORM is expressed here: model metadata (attributes, primary key,
//! dialect) plus the find/count operations, and association accessors.

use std::fmt;
use std::sync::Arc;

use async_graphql::Value;
use async_trait::async_trait;

use super::{FindOptions, Instance};
use crate::error::Result;

/// ORM attribute type descriptor.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeType {
    String,
    Text,
    Char,
    Uuid,
    Integer,
    BigInt,
    Float,
    Real,
    Double,
    Decimal,
    Boolean,
    /// Timestamp with time
    Date,
    /// Calendar date without time
    DateOnly,
    Time,
    /// Enumerated string values
    Enum(Vec<String>),
    Array(Box<AttributeType>),
    Json,
    Jsonb,
    /// Computed attribute, optionally typed
    Virtual(Option<Box<AttributeType>>),
    Blob,
    Geometry,
}

impl AttributeType {
    /// SQLite storage class for this type
    pub fn sql_type(&self) -> &'static str {
        match self {
            AttributeType::Integer | AttributeType::BigInt | AttributeType::Boolean => "INTEGER",
            AttributeType::Float | AttributeType::Real | AttributeType::Double => "REAL",
            AttributeType::Blob => "BLOB",
            _ => "TEXT",
        }
    }

    /// Short name used in error messages
    pub fn name(&self) -> String {
        match self {
            AttributeType::Enum(_) => "ENUM".to_string(),
            AttributeType::Array(inner) => format!("ARRAY({})", inner.name()),
            AttributeType::Virtual(Some(inner)) => format!("VIRTUAL({})", inner.name()),
            AttributeType::Virtual(None) => "VIRTUAL".to_string(),
            other => format!("{other:?}").to_uppercase(),
        }
    }
}

/// Attribute (column) definition of a model.
#[derive(Debug, Clone)]
pub struct AttributeDef {
    pub name: String,
    pub ty: AttributeType,
    pub allow_null: bool,
    pub primary_key: bool,
    /// Column comment, optionally exposed as the GraphQL field description
    pub comment: Option<String>,
}

impl AttributeDef {
    pub fn new(name: impl Into<String>, ty: AttributeType) -> Self {
        Self {
            name: name.into(),
            ty,
            allow_null: true,
            primary_key: false,
            comment: None,
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.allow_null = false;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.allow_null = false;
        self
    }

    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    /// Whether the attribute is backed by a real column
    pub fn is_stored(&self) -> bool {
        !matches!(self.ty, AttributeType::Virtual(_))
    }

    /// Generate the column definition SQL
    pub fn to_sql(&self) -> String {
        let mut sql = format!("{} {}", quote(&self.name), self.ty.sql_type());

        if self.primary_key {
            sql.push_str(" PRIMARY KEY");
        }

        if !self.allow_null && !self.primary_key {
            sql.push_str(" NOT NULL");
        }

        sql
    }
}

/// Quote an identifier
pub fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// SQL dialect of the database behind a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Sqlite,
    Postgres,
    Mysql,
    Mssql,
}

impl Dialect {
    /// Whether `COUNT(*) OVER()` can be selected next to the page rows
    pub fn supports_window_count(&self) -> bool {
        !matches!(self, Dialect::Mysql)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Dialect::Sqlite => "sqlite",
            Dialect::Postgres => "postgres",
            Dialect::Mysql => "mysql",
            Dialect::Mssql => "mssql",
        }
    }
}

/// A queryable model.
#[async_trait]
pub trait Model: Send + Sync + fmt::Debug {
    /// Model name, also used as the default GraphQL type name
    fn name(&self) -> &str;

    /// Primary key attribute name
    fn primary_key(&self) -> &str;

    fn attributes(&self) -> &[AttributeDef];

    fn dialect(&self) -> Dialect;

    fn attribute(&self, name: &str) -> Option<&AttributeDef> {
        self.attributes().iter().find(|a| a.name == name)
    }

    fn attribute_names(&self) -> Vec<String> {
        self.attributes().iter().map(|a| a.name.clone()).collect()
    }

    async fn find_all(&self, options: &FindOptions) -> Result<Vec<Instance>>;

    async fn find_one(&self, options: &FindOptions) -> Result<Option<Instance>>;

    /// Count rows matching the options' `where` (limit, offset and order ignored)
    async fn count(&self, options: &FindOptions) -> Result<i64>;
}

/// Relationship cardinality.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssociationKind {
    BelongsTo,
    HasOne,
    HasMany,
    BelongsToMany,
}

impl AssociationKind {
    pub fn is_single(&self) -> bool {
        matches!(self, AssociationKind::BelongsTo | AssociationKind::HasOne)
    }
}

/// A declared relationship from a source model to a target model.
#[async_trait]
pub trait Association: Send + Sync + fmt::Debug {
    fn kind(&self) -> AssociationKind;

    /// Accessor name, also the key eager-loaded data is stored under
    fn as_name(&self) -> &str;

    /// Stable identifier, unique per source model and accessor
    fn id(&self) -> String;

    fn target(&self) -> Arc<dyn Model>;

    fn is_single(&self) -> bool {
        self.kind().is_single()
    }

    /// Value on the source instance that identifies its related rows
    fn join_value(&self, source: &Instance) -> Option<Value>;

    /// Fetch the related rows of one source instance
    async fn get(&self, source: &Instance, options: &FindOptions) -> Result<Vec<Instance>>;

    /// Count the related rows of one source instance
    async fn count(&self, source: &Instance, options: &FindOptions) -> Result<i64>;

    /// Fetch the related rows of many source instances at once, each row
    /// tagged with the join value it belongs to.
    ///
    /// Limit and offset apply to the whole batch, so callers only batch
    /// unpaginated requests.
    async fn get_by_join_values(
        &self,
        join_values: &[Value],
        options: &FindOptions,
    ) -> Result<Vec<(Value, Instance)>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribute_to_sql() {
        let id = AttributeDef::new("id", AttributeType::Integer).primary_key();
        assert_eq!(id.to_sql(), "\"id\" INTEGER PRIMARY KEY");

        let name = AttributeDef::new("name", AttributeType::String).not_null();
        assert_eq!(name.to_sql(), "\"name\" TEXT NOT NULL");

        let done = AttributeDef::new("done", AttributeType::Boolean);
        assert_eq!(done.to_sql(), "\"done\" INTEGER");
    }

    #[test]
    fn test_column_names_are_escaped() {
        let odd = AttributeDef::new("say \"hi\"", AttributeType::Text);
        assert_eq!(odd.to_sql(), "\"say \"\"hi\"\"\" TEXT");
    }

    #[test]
    fn test_type_names() {
        assert_eq!(AttributeType::BigInt.name(), "BIGINT");
        assert_eq!(
            AttributeType::Array(Box::new(AttributeType::Integer)).name(),
            "ARRAY(INTEGER)"
        );
    }

    #[test]
    fn test_window_support() {
        assert!(Dialect::Sqlite.supports_window_count());
        assert!(Dialect::Postgres.supports_window_count());
        assert!(!Dialect::Mysql.supports_window_count());
    }
}
