//! SQL query builder for the SQLite backend
//!
//! Compiles [FindOptions] into parameterized SQL. Every column reference is
//! checked against the model's attributes before it is quoted into the SQL
//! text, and every literal is bound as a parameter, so neither attribute
//! names nor values coming from a GraphQL request can inject SQL.
//!
//! Generated statements alias the model table as `t` and, for many-to-many
//! joins, the join table as `j`:
//!
//! ```text
//! SELECT t."id", t."name", COUNT(*) OVER() AS "full_count"
//! FROM "tasks" AS t
//! WHERE t."name" LIKE ?
//! ORDER BY t."name" ASC, t."id" ASC
//! LIMIT 3 OFFSET 3
//! ```

use async_graphql::Value;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use super::{Attribute, FULL_COUNT, FilterValue, FindOptions, Model, Op, WhereKey, quote};
use crate::error::{Error, Result, invalid_filter};

/// Column the join value of a batched association query is selected under
pub const JOIN_COLUMN: &str = "__join";

/// Represents a SQL value that can be bound to a query.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Null,
}

impl SqlValue {
    /// Convert a GraphQL value into a bindable value. Lists and objects are
    /// stored as JSON text.
    pub fn from_value(value: &Value) -> SqlValue {
        match value {
            Value::Null => SqlValue::Null,
            Value::Boolean(b) => SqlValue::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => SqlValue::Int(i),
                None => SqlValue::Float(n.as_f64().unwrap_or_default()),
            },
            Value::String(s) => SqlValue::String(s.clone()),
            Value::Enum(e) => SqlValue::String(e.to_string()),
            Value::Binary(bytes) => SqlValue::String(STANDARD.encode(bytes)),
            other => SqlValue::String(serde_json::to_string(other).unwrap_or_default()),
        }
    }

    /// Bind this value to a sqlx query
    pub fn bind_to_query<'q>(
        &'q self,
        query: sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    ) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
        match self {
            SqlValue::String(s) => query.bind(s.as_str()),
            SqlValue::Int(i) => query.bind(*i),
            SqlValue::Float(f) => query.bind(*f),
            SqlValue::Bool(b) => query.bind(if *b { 1i32 } else { 0i32 }),
            SqlValue::Null => query.bind(None::<String>),
        }
    }
}

/// Restricts a query to the rows related to one or more source instances.
#[derive(Debug, Clone)]
pub enum JoinSpec {
    /// `t.column IN (values)`
    Column { column: String, values: Vec<Value> },
    /// Rows linked through a join table:
    /// `INNER JOIN through AS j ON j.target_key = t.target_pk WHERE j.source_key IN (values)`
    Through {
        table: String,
        source_key: String,
        target_key: String,
        values: Vec<Value>,
    },
}

impl JoinSpec {
    fn values(&self) -> &[Value] {
        match self {
            JoinSpec::Column { values, .. } | JoinSpec::Through { values, .. } => values,
        }
    }

    fn select_expr(&self) -> String {
        match self {
            JoinSpec::Column { column, .. } => format!("t.{}", quote(column)),
            JoinSpec::Through { source_key, .. } => format!("j.{}", quote(source_key)),
        }
    }
}

/// A compiled statement and its bind values
#[derive(Debug, Clone)]
pub struct Statement {
    pub sql: String,
    pub values: Vec<SqlValue>,
}

/// Builds SELECT and COUNT statements for one model table.
pub struct QueryBuilder<'a> {
    model: &'a dyn Model,
    table: &'a str,
    values: Vec<SqlValue>,
}

impl<'a> QueryBuilder<'a> {
    pub fn new(model: &'a dyn Model, table: &'a str) -> Self {
        Self {
            model,
            table,
            values: Vec::new(),
        }
    }

    /// Build a SELECT statement.
    pub fn select(mut self, options: &FindOptions, join: Option<&JoinSpec>) -> Result<Statement> {
        let mut columns = Vec::new();
        if options.attributes.is_empty() {
            for attr in self.model.attributes().iter().filter(|a| a.is_stored()) {
                columns.push(format!("t.{}", quote(&attr.name)));
            }
        } else {
            for attr in &options.attributes {
                match attr {
                    Attribute::Column(name) => {
                        let def = self.attribute(name)?;
                        if def.is_stored() {
                            columns.push(format!("t.{}", quote(name)));
                        }
                    }
                    Attribute::FullCount => {
                        columns.push(format!("COUNT(*) OVER() AS {}", quote(FULL_COUNT)));
                    }
                }
            }
        }
        if let Some(join) = join {
            columns.push(format!("{} AS {}", join.select_expr(), quote(JOIN_COLUMN)));
        }

        let mut sql = format!(
            "SELECT {} FROM {} AS t",
            columns.join(", "),
            quote(self.table)
        );
        self.push_from_and_where(&mut sql, options, join)?;

        if !options.order.is_empty() {
            let mut terms = Vec::with_capacity(options.order.len());
            for item in &options.order {
                self.attribute(&item.column)?;
                terms.push(format!("t.{} {}", quote(&item.column), item.direction.to_sql()));
            }
            sql.push_str(" ORDER BY ");
            sql.push_str(&terms.join(", "));
        }

        match (options.limit, options.offset) {
            (Some(limit), Some(offset)) if offset > 0 => {
                sql.push_str(&format!(" LIMIT {limit} OFFSET {offset}"))
            }
            (Some(limit), _) => sql.push_str(&format!(" LIMIT {limit}")),
            (None, Some(offset)) if offset > 0 => {
                sql.push_str(&format!(" LIMIT -1 OFFSET {offset}"))
            }
            _ => {}
        }

        Ok(Statement {
            sql,
            values: self.values,
        })
    }

    /// Build a COUNT statement. Limit, offset and order are ignored.
    pub fn count(mut self, options: &FindOptions, join: Option<&JoinSpec>) -> Result<Statement> {
        let mut sql = format!("SELECT COUNT(*) FROM {} AS t", quote(self.table));
        self.push_from_and_where(&mut sql, options, join)?;
        Ok(Statement {
            sql,
            values: self.values,
        })
    }

    fn push_from_and_where(
        &mut self,
        sql: &mut String,
        options: &FindOptions,
        join: Option<&JoinSpec>,
    ) -> Result<()> {
        let mut conditions = Vec::new();

        if let Some(join) = join {
            if let JoinSpec::Through {
                table, target_key, ..
            } = join
            {
                sql.push_str(&format!(
                    " INNER JOIN {} AS j ON j.{} = t.{}",
                    quote(table),
                    quote(target_key),
                    quote(self.model.primary_key())
                ));
            }
            conditions.push(self.in_list(&join.select_expr(), join.values(), false));
        }

        if let Some(filter) = &options.r#where {
            if !filter.is_empty() {
                conditions.push(self.compile_node(filter, None)?);
            }
        }

        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }
        Ok(())
    }

    fn attribute(&self, name: &str) -> Result<&'a super::AttributeDef> {
        self.model
            .attribute(name)
            .ok_or_else(|| Error::UnknownAttribute {
                model: self.model.name().to_string(),
                attribute: name.to_string(),
            })
    }

    fn column(&self, name: &str) -> Result<String> {
        self.attribute(name)?;
        Ok(format!("t.{}", quote(name)))
    }

    fn bind(&mut self, value: &Value) -> &'static str {
        self.values.push(SqlValue::from_value(value));
        "?"
    }

    fn in_list(&mut self, expr: &str, items: &[Value], negate: bool) -> String {
        if items.is_empty() {
            return if negate { "1 = 1" } else { "0 = 1" }.to_string();
        }
        let placeholders: Vec<&str> = items.iter().map(|v| self.bind(v)).collect();
        let op = if negate { "NOT IN" } else { "IN" };
        format!("{expr} {op} ({})", placeholders.join(", "))
    }

    /// Compile an object (or array) node. `column` is the attribute the node
    /// applies to when it sits below a field key.
    fn compile_node(&mut self, node: &FilterValue, column: Option<&str>) -> Result<String> {
        match node {
            FilterValue::Object(map) => {
                let mut parts = Vec::with_capacity(map.len());
                for (key, value) in map {
                    parts.push(match key {
                        WhereKey::Field(name) => self.compile_field(name, value)?,
                        WhereKey::Op(Op::And) => self.compile_group(value, " AND ", column)?,
                        WhereKey::Op(Op::Or) => self.compile_group(value, " OR ", column)?,
                        WhereKey::Op(op) => match column {
                            Some(column) => self.compile_operator(column, *op, value)?,
                            None => {
                                return Err(invalid_filter(format!(
                                    "operator `{}` must be applied to an attribute",
                                    op.name()
                                )));
                            }
                        },
                    });
                }
                Ok(join_parts(parts, " AND ", "1 = 1"))
            }
            FilterValue::Array(_) => self.compile_group(node, " AND ", column),
            FilterValue::Scalar(_) => Err(invalid_filter("expected an object")),
            FilterValue::Deferred(name) => Err(unresolved(name)),
        }
    }

    fn compile_group(
        &mut self,
        group: &FilterValue,
        joiner: &str,
        column: Option<&str>,
    ) -> Result<String> {
        let empty = if joiner == " OR " { "0 = 1" } else { "1 = 1" };
        let mut parts = Vec::new();
        match group {
            FilterValue::Array(items) => {
                for item in items {
                    parts.push(self.compile_node(item, column)?);
                }
            }
            FilterValue::Object(map) => {
                for (key, value) in map {
                    let single = FilterValue::from_pairs([(key.clone(), value.clone())]);
                    parts.push(self.compile_node(&single, column)?);
                }
            }
            FilterValue::Deferred(name) => return Err(unresolved(name)),
            FilterValue::Scalar(_) => {
                return Err(invalid_filter("logical operators expect a list or object"));
            }
        }
        Ok(join_parts(parts, joiner, empty))
    }

    fn compile_field(&mut self, name: &str, value: &FilterValue) -> Result<String> {
        let column = self.column(name)?;
        match value {
            FilterValue::Scalar(Value::Null) => Ok(format!("{column} IS NULL")),
            FilterValue::Scalar(v) => Ok(format!("{column} = {}", self.bind(v))),
            FilterValue::Array(items) => {
                let items = scalars(items)?;
                Ok(self.in_list(&column, &items, false))
            }
            FilterValue::Object(_) => match value.column_ref() {
                Some(other) => Ok(format!("{column} = {}", self.column(other)?)),
                None => self.compile_node(value, Some(name)),
            },
            FilterValue::Deferred(name) => Err(unresolved(name)),
        }
    }

    fn compile_operator(&mut self, name: &str, op: Op, value: &FilterValue) -> Result<String> {
        let column = self.column(name)?;
        let sql = match op {
            Op::Eq if is_null(value) => format!("{column} IS NULL"),
            Op::Ne if is_null(value) => format!("{column} IS NOT NULL"),
            Op::Eq | Op::Col => format!("{column} = {}", self.operand(value)?),
            Op::Ne => format!("{column} <> {}", self.operand(value)?),
            Op::Gt => format!("{column} > {}", self.operand(value)?),
            Op::Gte => format!("{column} >= {}", self.operand(value)?),
            Op::Lt => format!("{column} < {}", self.operand(value)?),
            Op::Lte => format!("{column} <= {}", self.operand(value)?),
            // SQLite LIKE is already case-insensitive for ASCII
            Op::Like | Op::ILike => format!("{column} LIKE {}", self.operand(value)?),
            Op::NotLike | Op::NotILike => format!("{column} NOT LIKE {}", self.operand(value)?),
            Op::In | Op::NotIn => {
                let FilterValue::Array(items) = value else {
                    return Err(invalid_filter(format!("`{}` expects a list", op.name())));
                };
                let items = scalars(items)?;
                self.in_list(&column, &items, op == Op::NotIn)
            }
            Op::Between | Op::NotBetween => {
                let bounds = match value {
                    FilterValue::Array(items) if items.len() == 2 => scalars(items)?,
                    _ => {
                        return Err(invalid_filter(format!(
                            "`{}` expects a list of two values",
                            op.name()
                        )));
                    }
                };
                let not = if op == Op::NotBetween { "NOT " } else { "" };
                let (low, high) = (self.bind(&bounds[0]), self.bind(&bounds[1]));
                format!("{column} {not}BETWEEN {low} AND {high}")
            }
            Op::Overlap | Op::Contains | Op::Contained | Op::Any => {
                return Err(Error::UnsupportedOperator {
                    operator: op.name(),
                    dialect: self.model.dialect().name(),
                });
            }
            Op::And | Op::Or => {
                let joiner = if op == Op::Or { " OR " } else { " AND " };
                self.compile_group(value, joiner, Some(name))?
            }
        };
        Ok(sql)
    }

    /// Right-hand side of a comparison: a bound literal or a column reference
    fn operand(&mut self, value: &FilterValue) -> Result<String> {
        match value {
            FilterValue::Scalar(v) => Ok(self.bind(v).to_string()),
            FilterValue::Object(_) => match value.column_ref() {
                Some(other) => self.column(other),
                None => Err(invalid_filter("expected a value or column reference")),
            },
            FilterValue::Array(_) => Err(invalid_filter("unexpected list")),
            FilterValue::Deferred(name) => Err(unresolved(name)),
        }
    }
}

fn join_parts(parts: Vec<String>, joiner: &str, empty: &str) -> String {
    match parts.len() {
        0 => empty.to_string(),
        1 => parts.into_iter().next().unwrap_or_default(),
        _ => format!("({})", parts.join(joiner)),
    }
}

fn is_null(value: &FilterValue) -> bool {
    matches!(value, FilterValue::Scalar(Value::Null))
}

fn scalars(items: &[FilterValue]) -> Result<Vec<Value>> {
    items
        .iter()
        .map(|item| match item {
            FilterValue::Scalar(v) => Ok(v.clone()),
            FilterValue::Deferred(name) => Err(unresolved(name)),
            _ => Err(invalid_filter("expected a list of values")),
        })
        .collect()
}

fn unresolved(name: &str) -> Error {
    invalid_filter(format!("variable `${name}` was never resolved"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orm::{AttributeDef, AttributeType, Dialect, Instance, OrderItem};
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    #[derive(Debug)]
    struct Tasks(Vec<AttributeDef>);

    #[async_trait]
    impl Model for Tasks {
        fn name(&self) -> &str {
            "Task"
        }
        fn primary_key(&self) -> &str {
            "id"
        }
        fn attributes(&self) -> &[AttributeDef] {
            &self.0
        }
        fn dialect(&self) -> Dialect {
            Dialect::Sqlite
        }
        async fn find_all(&self, _: &FindOptions) -> Result<Vec<Instance>> {
            Ok(vec![])
        }
        async fn find_one(&self, _: &FindOptions) -> Result<Option<Instance>> {
            Ok(None)
        }
        async fn count(&self, _: &FindOptions) -> Result<i64> {
            Ok(0)
        }
    }

    fn tasks() -> Tasks {
        Tasks(vec![
            AttributeDef::new("id", AttributeType::Integer).primary_key(),
            AttributeDef::new("name", AttributeType::String),
            AttributeDef::new("score", AttributeType::Float),
        ])
    }

    fn field(name: &str, value: FilterValue) -> FilterValue {
        FilterValue::from_pairs([(WhereKey::field(name), value)])
    }

    fn op(op: Op, value: FilterValue) -> FilterValue {
        FilterValue::from_pairs([(WhereKey::Op(op), value)])
    }

    fn scalar(value: impl Into<Value>) -> FilterValue {
        FilterValue::Scalar(value.into())
    }

    #[test]
    fn test_select_with_window_count() {
        let model = tasks();
        let options = FindOptions {
            r#where: Some(field("name", op(Op::Like, scalar("A%")))),
            limit: Some(3),
            offset: Some(3),
            order: vec![OrderItem::asc("name"), OrderItem::asc("id")],
            attributes: vec![
                Attribute::Column("id".into()),
                Attribute::Column("name".into()),
                Attribute::FullCount,
            ],
            ..Default::default()
        };
        let stmt = QueryBuilder::new(&model, "tasks")
            .select(&options, None)
            .unwrap();
        assert_eq!(
            stmt.sql,
            "SELECT t.\"id\", t.\"name\", COUNT(*) OVER() AS \"full_count\" FROM \"tasks\" AS t \
             WHERE t.\"name\" LIKE ? ORDER BY t.\"name\" ASC, t.\"id\" ASC LIMIT 3 OFFSET 3"
        );
        assert_eq!(stmt.values, vec![SqlValue::String("A%".into())]);
    }

    #[test]
    fn test_or_and_in() {
        let model = tasks();
        let filter = op(
            Op::Or,
            FilterValue::Array(vec![
                field("id", FilterValue::Array(vec![scalar(1), scalar(2)])),
                field("score", op(Op::Gt, scalar(5))),
            ]),
        );
        let options = FindOptions {
            r#where: Some(filter),
            ..Default::default()
        };
        let stmt = QueryBuilder::new(&model, "tasks").count(&options, None).unwrap();
        assert_eq!(
            stmt.sql,
            "SELECT COUNT(*) FROM \"tasks\" AS t WHERE (t.\"id\" IN (?, ?) OR t.\"score\" > ?)"
        );
        assert_eq!(stmt.values.len(), 3);
    }

    #[test]
    fn test_null_and_empty_in() {
        let model = tasks();
        let filter = FilterValue::from_pairs([
            (WhereKey::field("name"), scalar(Value::Null)),
            (WhereKey::field("id"), op(Op::NotIn, FilterValue::Array(vec![]))),
        ]);
        let options = FindOptions {
            r#where: Some(filter),
            ..Default::default()
        };
        let stmt = QueryBuilder::new(&model, "tasks").count(&options, None).unwrap();
        assert!(stmt.sql.ends_with("WHERE (t.\"name\" IS NULL AND 1 = 1)"));
        assert!(stmt.values.is_empty());
    }

    #[test]
    fn test_between_and_column_ref() {
        let model = tasks();
        let filter = FilterValue::from_pairs([
            (
                WhereKey::field("score"),
                op(Op::Between, FilterValue::Array(vec![scalar(1), scalar(2)])),
            ),
            (
                WhereKey::field("id"),
                op(Op::Ne, op(Op::Col, scalar("score"))),
            ),
        ]);
        let options = FindOptions {
            r#where: Some(filter),
            ..Default::default()
        };
        let stmt = QueryBuilder::new(&model, "tasks").count(&options, None).unwrap();
        assert!(
            stmt.sql
                .ends_with("(t.\"score\" BETWEEN ? AND ? AND t.\"id\" <> t.\"score\")")
        );
    }

    #[test]
    fn test_rejects_unknown_attribute() {
        let model = tasks();
        let options = FindOptions {
            r#where: Some(field("name; DROP TABLE tasks", scalar(1))),
            ..Default::default()
        };
        let result = QueryBuilder::new(&model, "tasks").select(&options, None);
        assert_matches!(result, Err(Error::UnknownAttribute { .. }));
    }

    #[test]
    fn test_rejects_array_operators() {
        let model = tasks();
        let options = FindOptions {
            r#where: Some(field("name", op(Op::Overlap, FilterValue::Array(vec![])))),
            ..Default::default()
        };
        let result = QueryBuilder::new(&model, "tasks").select(&options, None);
        assert_matches!(
            result,
            Err(Error::UnsupportedOperator {
                operator: "overlap",
                dialect: "sqlite"
            })
        );
    }

    #[test]
    fn test_offset_without_limit() {
        let model = tasks();
        let options = FindOptions {
            offset: Some(4),
            ..Default::default()
        };
        let stmt = QueryBuilder::new(&model, "tasks").select(&options, None).unwrap();
        assert!(stmt.sql.ends_with("LIMIT -1 OFFSET 4"));
    }

    #[test]
    fn test_through_join() {
        let model = tasks();
        let join = JoinSpec::Through {
            table: "task_tags".into(),
            source_key: "tag_id".into(),
            target_key: "task_id".into(),
            values: vec![Value::from(7)],
        };
        let stmt = QueryBuilder::new(&model, "tasks")
            .select(&FindOptions::default(), Some(&join))
            .unwrap();
        assert_eq!(
            stmt.sql,
            "SELECT t.\"id\", t.\"name\", t.\"score\", j.\"tag_id\" AS \"__join\" FROM \"tasks\" AS t \
             INNER JOIN \"task_tags\" AS j ON j.\"task_id\" = t.\"id\" WHERE j.\"tag_id\" IN (?)"
        );
    }
}
