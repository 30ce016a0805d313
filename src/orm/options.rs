//! Query descriptors handed to the ORM.

use async_graphql::Value;
use indexmap::IndexMap;
use serde::Serialize;

use super::FilterValue;

/// Sort direction for ORDER BY clauses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    /// Convert to SQL order string
    pub fn to_sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }

    pub fn reverse(&self) -> Self {
        match self {
            SortDirection::Asc => SortDirection::Desc,
            SortDirection::Desc => SortDirection::Asc,
        }
    }

    /// Parse `ASC`/`DESC` in any case
    pub fn parse(raw: &str) -> Option<Self> {
        if raw.eq_ignore_ascii_case("asc") {
            Some(SortDirection::Asc)
        } else if raw.eq_ignore_ascii_case("desc") {
            Some(SortDirection::Desc)
        } else {
            None
        }
    }
}

/// One ORDER BY term.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct OrderItem {
    pub column: String,
    pub direction: SortDirection,
}

impl OrderItem {
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: SortDirection::Desc,
        }
    }

    pub fn reversed(&self) -> Self {
        Self {
            column: self.column.clone(),
            direction: self.direction.reverse(),
        }
    }
}

/// A selected attribute.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum Attribute {
    Column(String),
    /// `COUNT(*) OVER()` selected as `full_count`
    FullCount,
}

/// Name the window count is selected under
pub const FULL_COUNT: &str = "full_count";

/// The ORM-bound query descriptor.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FindOptions {
    pub r#where: Option<FilterValue>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub order: Vec<OrderItem>,
    pub attributes: Vec<Attribute>,
    /// Keys copied in from the request context
    pub extra: IndexMap<String, Value>,
}

impl FindOptions {
    /// AND a filter into `where`, keeping existing keys unless overwritten.
    pub fn merge_where(&mut self, filter: FilterValue) {
        self.r#where = Some(match self.r#where.take() {
            Some(current) => current.merge(filter),
            None => filter,
        });
    }

    pub fn has_full_count(&self) -> bool {
        self.attributes.contains(&Attribute::FullCount)
    }

    /// Drop repeated attributes, keeping first occurrence order
    pub fn dedup_attributes(&mut self) {
        let mut seen = indexmap::IndexSet::new();
        self.attributes.retain(|attr| seen.insert(attr.clone()));
    }

    /// Set every column of `names` as the selected attributes
    pub fn select_all(&mut self, names: impl IntoIterator<Item = String>) {
        self.attributes = names.into_iter().map(Attribute::Column).collect();
    }

    /// Stable serialized form, used to group identical requests
    pub fn fingerprint(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}
