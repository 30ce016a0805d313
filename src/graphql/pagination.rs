//! Cursor-based pagination types
//!
//! Implements the Relay connection model: cursors, edges, page info and the
//! array adapter that slices an already fetched list by `first`, `after`,
//! `last` and `before`.
//!
//! A cursor encodes the primary key of its node and the node's position in
//! the canonical ordering of the query that produced it:
//!
//! ```text
//! base64("arrayconnection$" + id + "$" + index)
//! ```

use std::sync::Arc;

use async_graphql::Value;
use async_graphql::dynamic::{Field, FieldFuture, FieldValue, Object, TypeRef};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use indexmap::IndexMap;

use super::args::parse_int;
use super::context::ResolveParams;
use crate::error::{Error, Result, invalid_argument};
use crate::orm::{FilterValue, Instance};

pub const CURSOR_PREFIX: &str = "arrayconnection$";
pub const CURSOR_SEPARATOR: char = '$';

/// Suffix every generated connection type name ends with
pub const CONNECTION_SUFFIX: &str = "Connection";

pub const PAGE_INFO: &str = "PageInfo";

// ============================================================================
// Cursors
// ============================================================================

/// A decoded cursor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor {
    pub id: String,
    pub index: i64,
}

/// Encode a cursor string
pub fn encode_cursor(cursor: &Cursor) -> String {
    BASE64.encode(format!(
        "{CURSOR_PREFIX}{}{CURSOR_SEPARATOR}{}",
        cursor.id, cursor.index
    ))
}

/// Decode a cursor string. Ids may contain the separator; the index is
/// always after the last one and must be a non-negative position below
/// `i64::MAX`.
pub fn decode_cursor(cursor: &str) -> Result<Cursor> {
    let invalid = || Error::InvalidCursor(cursor.to_string());

    let decoded = BASE64.decode(cursor).map_err(|_| invalid())?;
    let decoded = String::from_utf8(decoded).map_err(|_| invalid())?;
    let rest = decoded.strip_prefix(CURSOR_PREFIX).ok_or_else(invalid)?;
    let (id, index) = rest.rsplit_once(CURSOR_SEPARATOR).ok_or_else(invalid)?;
    let index = index
        .parse::<i64>()
        .ok()
        .filter(|index| (0..i64::MAX).contains(index))
        .ok_or_else(invalid)?;

    Ok(Cursor {
        id: id.to_string(),
        index,
    })
}

// ============================================================================
// Connection
// ============================================================================

/// Information about pagination in a connection
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageInfo {
    pub start_cursor: Option<String>,
    pub end_cursor: Option<String>,
    pub has_next_page: bool,
    pub has_previous_page: bool,
}

/// An edge in a connection
#[derive(Debug, Clone)]
pub struct Edge {
    pub cursor: String,
    pub node: Instance,
    /// The parent instance the connection hangs off
    pub source: Option<Instance>,
}

/// A resolved connection.
///
/// A connection whose rows were not requested carries no edges and no
/// count; connection-level fields can still use `source`, `args` and `where`.
#[derive(Debug, Clone, Default)]
pub struct Connection {
    pub edges: Vec<Edge>,
    pub page_info: PageInfo,
    pub source: Option<Instance>,
    pub args: IndexMap<String, Value>,
    pub r#where: FilterValue,
    pub full_count: Option<i64>,
    pub(crate) params: Option<Arc<ResolveParams>>,
}

impl Connection {
    /// The parameters of the resolver call that produced this connection
    pub fn params(&self) -> Option<&ResolveParams> {
        self.params.as_deref()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Instance> {
        self.edges.iter().map(|edge| &edge.node)
    }
}

/// Build the edges and page info of a page whose first row sits at
/// `start` in the canonical ordering of `full_count` rows.
pub(crate) fn page(
    rows: Vec<Instance>,
    start: i64,
    full_count: i64,
    primary_key: &str,
    source: Option<&Instance>,
) -> (Vec<Edge>, PageInfo) {
    let count = rows.len() as i64;
    let edges: Vec<Edge> = rows
        .into_iter()
        .enumerate()
        .map(|(i, node)| Edge {
            cursor: encode_cursor(&Cursor {
                id: node.value_string(primary_key).unwrap_or_default(),
                index: start + i as i64,
            }),
            node,
            source: source.cloned(),
        })
        .collect();

    let page_info = PageInfo {
        start_cursor: edges.first().map(|e| e.cursor.clone()),
        end_cursor: edges.last().map(|e| e.cursor.clone()),
        has_next_page: start + count < full_count,
        has_previous_page: start > 0,
    };
    (edges, page_info)
}

/// Slice an in-memory list by the Relay arguments `first`, `after`, `last`
/// and `before`.
///
/// `hasNextPage` is only reported when paginating forward and
/// `hasPreviousPage` only when paginating backward.
pub fn connection_from_array(
    rows: Vec<Instance>,
    args: &IndexMap<String, Value>,
    primary_key: &str,
    source: Option<&Instance>,
) -> Result<Connection> {
    let length = rows.len() as i64;
    let after = cursor_arg(args, "after")?;
    let before = cursor_arg(args, "before")?;
    let first = count_arg(args, "first")?;
    let last = count_arg(args, "last")?;

    let before_offset = before.as_ref().map(|c| c.index).unwrap_or(length);
    let after_offset = after.as_ref().map(|c| c.index).unwrap_or(-1);

    let mut start = after_offset.max(-1).saturating_add(1);
    let mut end = before_offset.min(length);
    if let Some(first) = first {
        end = end.min(start.saturating_add(first));
    }
    if let Some(last) = last {
        start = start.max(end - last);
    }
    let (start, end) = (start.clamp(0, length), end.clamp(0, length));
    let end = end.max(start);

    let lower_bound = if after.is_some() { after_offset.saturating_add(1) } else { 0 };
    let upper_bound = if before.is_some() { before_offset } else { length };

    let slice: Vec<Instance> = rows
        .into_iter()
        .skip(start as usize)
        .take((end - start) as usize)
        .collect();
    let (edges, mut page_info) = page(slice, start, length, primary_key, source);
    page_info.has_previous_page = last.is_some() && start > lower_bound;
    page_info.has_next_page = first.is_some() && end < upper_bound;

    Ok(Connection {
        edges,
        page_info,
        source: source.cloned(),
        args: args.clone(),
        full_count: Some(length),
        ..Default::default()
    })
}

/// A cursor argument, if present and non-null
pub(crate) fn cursor_arg(args: &IndexMap<String, Value>, name: &str) -> Result<Option<Cursor>> {
    match args.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => decode_cursor(s).map(Some),
        Some(_) => Err(invalid_argument(name, "expected a cursor string")),
    }
}

/// A non-negative page size argument, if present and non-null
pub(crate) fn count_arg(args: &IndexMap<String, Value>, name: &str) -> Result<Option<i64>> {
    match args.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => {
            let count = parse_int(name, value)?;
            if count < 0 {
                return Err(invalid_argument(name, "must be non-negative"));
            }
            Ok(Some(count))
        }
    }
}

// ============================================================================
// Schema types
// ============================================================================

/// The shared `PageInfo` object type
pub fn page_info_type() -> Object {
    fn field(
        name: &str,
        ty: TypeRef,
        get: impl Fn(&PageInfo) -> Value + Send + Sync + 'static,
    ) -> Field {
        Field::new(name, ty, move |ctx| {
            let value = ctx
                .parent_value
                .try_downcast_ref::<PageInfo>()
                .map(|info| get(info));
            FieldFuture::new(async move {
                match value? {
                    Value::Null => Ok(None),
                    value => Ok(Some(FieldValue::value(value))),
                }
            })
        })
    }

    let optional = |cursor: &Option<String>| cursor.clone().map(Value::String).unwrap_or(Value::Null);

    Object::new(PAGE_INFO)
        .description("Information about pagination in a connection.")
        .field(field(
            "hasNextPage",
            TypeRef::named_nn(TypeRef::BOOLEAN),
            |info| Value::Boolean(info.has_next_page),
        ))
        .field(field(
            "hasPreviousPage",
            TypeRef::named_nn(TypeRef::BOOLEAN),
            |info| Value::Boolean(info.has_previous_page),
        ))
        .field(field("startCursor", TypeRef::named(TypeRef::STRING), move |info| {
            optional(&info.start_cursor)
        }))
        .field(field("endCursor", TypeRef::named(TypeRef::STRING), move |info| {
            optional(&info.end_cursor)
        }))
}
