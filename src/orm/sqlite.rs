//! SQLite implementation of the ORM traits
//!
//! Models are described at runtime by a table name and a list of
//! [AttributeDef]s. Rows come back as [Instance]s whose values are decoded
//! from the SQLite storage class and then coerced by the attribute type
//! (INTEGER to Boolean, JSON text to objects, and so on).
//!
//! # Example
//!
//! ```rust,ignore
//! let users = Arc::new(SqliteModel::new(pool.clone(), "User", "users", vec![
//!     AttributeDef::new("id", AttributeType::Integer).primary_key(),
//!     AttributeDef::new("name", AttributeType::String).not_null(),
//! ])?);
//! users.sync().await?;
//!
//! let tasks_of_user = Arc::new(SqliteAssociation::has_many("tasks", users.clone(), tasks, "user_id"));
//! ```

use std::sync::Arc;

use async_graphql::{Number, Value};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use indexmap::IndexMap;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool, TypeInfo, ValueRef};

use super::builder::{JOIN_COLUMN, JoinSpec, QueryBuilder, SqlValue, Statement};
use super::{
    Association, AssociationKind, AttributeDef, AttributeType, Dialect, FindOptions, Instance,
    Model, quote,
};
use crate::error::{Result, config_error};

/// A model backed by one SQLite table.
#[derive(Debug)]
pub struct SqliteModel {
    pool: SqlitePool,
    name: String,
    table: String,
    primary_key: String,
    attributes: Vec<AttributeDef>,
}

impl SqliteModel {
    /// Describe a model. Exactly one attribute must be the primary key.
    pub fn new(
        pool: SqlitePool,
        name: impl Into<String>,
        table: impl Into<String>,
        attributes: Vec<AttributeDef>,
    ) -> Result<Self> {
        let name = name.into();
        let mut keys = attributes.iter().filter(|a| a.primary_key);
        let primary_key = match (keys.next(), keys.next()) {
            (Some(pk), None) => pk.name.clone(),
            (None, _) => return Err(config_error(format!("model {name} has no primary key"))),
            (Some(_), Some(_)) => {
                return Err(config_error(format!(
                    "model {name} has a composite primary key"
                )));
            }
        };

        Ok(Self {
            pool,
            name,
            table: table.into(),
            primary_key,
            attributes,
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Generate CREATE TABLE IF NOT EXISTS SQL
    pub fn create_table_sql(&self) -> String {
        let column_defs: Vec<String> = self
            .attributes
            .iter()
            .filter(|a| a.is_stored())
            .map(AttributeDef::to_sql)
            .collect();

        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n  {}\n)",
            quote(&self.table),
            column_defs.join(",\n  ")
        )
    }

    /// Create the table if it does not exist yet
    pub async fn sync(&self) -> Result<()> {
        let sql = self.create_table_sql();
        tracing::debug!(model = %self.name, sql = %sql, "Syncing table");
        sqlx::query(&sql).execute(&self.pool).await?;
        Ok(())
    }

    /// Insert a row and return it as stored
    pub async fn create(&self, values: IndexMap<String, Value>) -> Result<Instance> {
        let mut columns = Vec::with_capacity(values.len());
        let mut binds = Vec::with_capacity(values.len());
        for (key, value) in &values {
            let attr = self.attribute(key).ok_or_else(|| crate::Error::UnknownAttribute {
                model: self.name.clone(),
                attribute: key.clone(),
            })?;
            if !attr.is_stored() {
                continue;
            }
            columns.push(quote(key));
            binds.push(SqlValue::from_value(value));
        }

        let placeholders = vec!["?"; columns.len()].join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({}) RETURNING *",
            quote(&self.table),
            columns.join(", "),
            placeholders
        );
        let stmt = Statement { sql, values: binds };
        let row = self.fetch_rows(&stmt).await?;
        let row = row
            .first()
            .ok_or_else(|| crate::Error::Database(sqlx::Error::RowNotFound))?;
        Ok(self.decode_row(row)?.0)
    }

    /// Run a SELECT, returning each row with its join value when a join was requested.
    pub(crate) async fn select(
        &self,
        options: &FindOptions,
        join: Option<&JoinSpec>,
    ) -> Result<Vec<(Instance, Option<Value>)>> {
        let stmt = QueryBuilder::new(self, &self.table).select(options, join)?;
        let rows = self.fetch_rows(&stmt).await?;
        rows.iter().map(|row| self.decode_row(row)).collect()
    }

    pub(crate) async fn count_with(
        &self,
        options: &FindOptions,
        join: Option<&JoinSpec>,
    ) -> Result<i64> {
        let stmt = QueryBuilder::new(self, &self.table).count(options, join)?;
        let rows = self.fetch_rows(&stmt).await?;
        match rows.first() {
            Some(row) => Ok(row.try_get::<i64, _>(0)?),
            None => Ok(0),
        }
    }

    async fn fetch_rows(&self, stmt: &Statement) -> Result<Vec<SqliteRow>> {
        tracing::debug!(model = %self.name, sql = %stmt.sql, "Executing entity query");

        let mut query = sqlx::query(&stmt.sql);
        for value in &stmt.values {
            query = value.bind_to_query(query);
        }
        Ok(query.fetch_all(&self.pool).await?)
    }

    fn decode_row(&self, row: &SqliteRow) -> Result<(Instance, Option<Value>)> {
        let mut instance = Instance::new(&self.name);
        let mut join = None;

        for (i, column) in row.columns().iter().enumerate() {
            let name = sqlx::Column::name(column);
            let value = decode_column(row, i)?;
            if name == JOIN_COLUMN {
                join = Some(value);
                continue;
            }
            let value = match self.attribute(name) {
                Some(attr) => coerce(&attr.ty, value),
                None => value,
            };
            instance.values.insert(name.to_string(), value);
        }

        Ok((instance, join))
    }
}

/// Decode a column by its storage class
fn decode_column(row: &SqliteRow, index: usize) -> Result<Value> {
    let raw = row.try_get_raw(index)?;
    if raw.is_null() {
        return Ok(Value::Null);
    }
    let storage = raw.type_info().name().to_string();
    let value = match storage.as_str() {
        "INTEGER" | "BOOLEAN" => Value::from(row.try_get_unchecked::<i64, _>(index)?),
        "REAL" | "NUMERIC" => float(row.try_get_unchecked::<f64, _>(index)?),
        "BLOB" => Value::String(STANDARD.encode(row.try_get_unchecked::<Vec<u8>, _>(index)?)),
        _ => Value::String(row.try_get_unchecked::<String, _>(index)?),
    };
    Ok(value)
}

/// Coerce a decoded value to the attribute's type
fn coerce(ty: &AttributeType, value: Value) -> Value {
    match (ty, value) {
        (AttributeType::Boolean, Value::Number(n)) => Value::Boolean(n.as_i64() != Some(0)),
        (
            AttributeType::Float | AttributeType::Real | AttributeType::Double,
            Value::Number(n),
        ) => float(n.as_f64().unwrap_or_default()),
        (
            AttributeType::Json | AttributeType::Jsonb | AttributeType::Array(_),
            Value::String(raw),
        ) => serde_json::from_str::<serde_json::Value>(&raw)
            .ok()
            .and_then(|json| Value::from_json(json).ok())
            .unwrap_or(Value::String(raw)),
        (AttributeType::Virtual(Some(inner)), value) => coerce(inner, value),
        (_, value) => value,
    }
}

fn float(f: f64) -> Value {
    Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
}

#[async_trait]
impl Model for SqliteModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn primary_key(&self) -> &str {
        &self.primary_key
    }

    fn attributes(&self) -> &[AttributeDef] {
        &self.attributes
    }

    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    async fn find_all(&self, options: &FindOptions) -> Result<Vec<Instance>> {
        let rows = self.select(options, None).await?;
        Ok(rows.into_iter().map(|(instance, _)| instance).collect())
    }

    async fn find_one(&self, options: &FindOptions) -> Result<Option<Instance>> {
        let mut options = options.clone();
        options.limit = Some(1);
        Ok(self.find_all(&options).await?.into_iter().next())
    }

    async fn count(&self, options: &FindOptions) -> Result<i64> {
        self.count_with(options, None).await
    }
}

/// Join table of a many-to-many association
#[derive(Debug, Clone)]
struct Through {
    table: String,
    /// Join-table column referencing the source primary key
    source_key: String,
    /// Join-table column referencing the target primary key
    target_key: String,
}

/// An association between two [SqliteModel]s.
#[derive(Debug)]
pub struct SqliteAssociation {
    kind: AssociationKind,
    as_name: String,
    source: String,
    target: Arc<SqliteModel>,
    /// Attribute read from the source instance
    source_attribute: String,
    /// Target column matched against the source attribute
    target_column: String,
    through: Option<Through>,
}

impl SqliteAssociation {
    /// The source holds `foreign_key` referencing the target's primary key
    pub fn belongs_to(
        as_name: impl Into<String>,
        source: Arc<SqliteModel>,
        target: Arc<SqliteModel>,
        foreign_key: impl Into<String>,
    ) -> Self {
        let target_column = target.primary_key.clone();
        Self {
            kind: AssociationKind::BelongsTo,
            as_name: as_name.into(),
            source: source.name.clone(),
            target,
            source_attribute: foreign_key.into(),
            target_column,
            through: None,
        }
    }

    /// The target holds `foreign_key` referencing the source's primary key; one row
    pub fn has_one(
        as_name: impl Into<String>,
        source: Arc<SqliteModel>,
        target: Arc<SqliteModel>,
        foreign_key: impl Into<String>,
    ) -> Self {
        Self {
            kind: AssociationKind::HasOne,
            ..Self::has_many(as_name, source, target, foreign_key)
        }
    }

    /// The target holds `foreign_key` referencing the source's primary key
    pub fn has_many(
        as_name: impl Into<String>,
        source: Arc<SqliteModel>,
        target: Arc<SqliteModel>,
        foreign_key: impl Into<String>,
    ) -> Self {
        Self {
            kind: AssociationKind::HasMany,
            as_name: as_name.into(),
            source: source.name.clone(),
            target,
            source_attribute: source.primary_key.clone(),
            target_column: foreign_key.into(),
            through: None,
        }
    }

    /// Source and target are linked through rows of `through_table`
    pub fn belongs_to_many(
        as_name: impl Into<String>,
        source: Arc<SqliteModel>,
        target: Arc<SqliteModel>,
        through_table: impl Into<String>,
        source_key: impl Into<String>,
        target_key: impl Into<String>,
    ) -> Self {
        let target_column = target.primary_key.clone();
        Self {
            kind: AssociationKind::BelongsToMany,
            as_name: as_name.into(),
            source: source.name.clone(),
            target,
            source_attribute: source.primary_key.clone(),
            target_column,
            through: Some(Through {
                table: through_table.into(),
                source_key: source_key.into(),
                target_key: target_key.into(),
            }),
        }
    }

    fn join_spec(&self, values: Vec<Value>) -> JoinSpec {
        match &self.through {
            Some(through) => JoinSpec::Through {
                table: through.table.clone(),
                source_key: through.source_key.clone(),
                target_key: through.target_key.clone(),
                values,
            },
            None => JoinSpec::Column {
                column: self.target_column.clone(),
                values,
            },
        }
    }
}

#[async_trait]
impl Association for SqliteAssociation {
    fn kind(&self) -> AssociationKind {
        self.kind
    }

    fn as_name(&self) -> &str {
        &self.as_name
    }

    fn id(&self) -> String {
        format!("{}.{}", self.source, self.as_name)
    }

    fn target(&self) -> Arc<dyn Model> {
        self.target.clone()
    }

    fn join_value(&self, source: &Instance) -> Option<Value> {
        match source.get(&self.source_attribute) {
            None | Some(Value::Null) => None,
            Some(value) => Some(value.clone()),
        }
    }

    async fn get(&self, source: &Instance, options: &FindOptions) -> Result<Vec<Instance>> {
        let Some(join) = self.join_value(source) else {
            return Ok(Vec::new());
        };
        let rows = self.get_by_join_values(&[join], options).await?;
        Ok(rows.into_iter().map(|(_, instance)| instance).collect())
    }

    async fn count(&self, source: &Instance, options: &FindOptions) -> Result<i64> {
        let Some(join) = self.join_value(source) else {
            return Ok(0);
        };
        let spec = self.join_spec(vec![join]);
        self.target.count_with(options, Some(&spec)).await
    }

    async fn get_by_join_values(
        &self,
        join_values: &[Value],
        options: &FindOptions,
    ) -> Result<Vec<(Value, Instance)>> {
        let spec = self.join_spec(join_values.to_vec());
        let rows = self.target.select(options, Some(&spec)).await?;
        Ok(rows
            .into_iter()
            .map(|(instance, join)| (join.unwrap_or(Value::Null), instance))
            .collect())
    }
}
