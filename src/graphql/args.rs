//! GraphQL arguments to ORM find options.

use async_graphql::Value;
use async_graphql::dynamic::{InputValue, TypeRef};
use indexmap::IndexMap;

use super::filters::where_from_value;
use super::scalars::JSON;
use super::type_mapper::{EnumValue, TypeMapper};
use crate::error::{Result, invalid_argument};
use crate::orm::{FilterValue, FindOptions, Model, OrderItem, SortDirection, WhereKey};

const WHERE_DESCRIPTION: &str =
    "A filter object; attribute names and operators such as `gt` or `like` may nest";

/// Prefix of an `order` string that sorts descending
pub const REVERSE_PREFIX: &str = "reverse:";

/// Translate resolved arguments into [FindOptions].
///
/// Arguments named like a model attribute become equality filters. `limit`,
/// `offset` and `order` are applied when truthy, and `where` is translated
/// and merged over the attribute filters.
pub fn args_to_find_options(
    args: &IndexMap<String, Value>,
    attributes: &[String],
) -> Result<FindOptions> {
    let mut options = FindOptions::default();
    let mut filter = IndexMap::new();

    for (key, value) in args {
        if attributes.iter().any(|a| a == key) {
            filter.insert(WhereKey::field(key.clone()), FilterValue::from_value(value.clone()));
        }
    }

    if let Some(limit) = truthy(args.get("limit")) {
        options.limit = Some(parse_bound("limit", limit)?);
    }

    // `offset: 0` is skipped like any other falsy value, which is harmless
    if let Some(offset) = truthy(args.get("offset")) {
        options.offset = Some(parse_bound("offset", offset)?);
    }

    if let Some(order) = truthy(args.get("order")) {
        options.order = parse_order(order)?;
    }

    let mut filter = FilterValue::Object(filter);
    match args.get("where") {
        None | Some(Value::Null) => {}
        Some(value @ Value::Object(_)) => filter = filter.merge(where_from_value(value)),
        Some(_) => return Err(invalid_argument("where", "expected an object")),
    }
    if !filter.is_empty() {
        options.r#where = Some(filter);
    }

    Ok(options)
}

/// Replace GraphQL enum names in `filter` with the values the ORM stores.
///
/// Applies below every enum attribute key, operators included. Strings are
/// only replaced when they name a value and are not themselves a raw value.
pub fn enum_names_to_raw(filter: &mut FilterValue, model: &dyn Model, mapper: &TypeMapper) {
    let enums: IndexMap<&str, Vec<EnumValue>> = model
        .attributes()
        .iter()
        .filter_map(|attr| {
            let mapped = mapper.map(&attr.ty).ok()?;
            Some((attr.name.as_str(), mapped.enum_values()?.to_vec()))
        })
        .collect();
    if !enums.is_empty() {
        remap_enums(filter, &enums, None);
    }
}

fn remap_enums(filter: &mut FilterValue, enums: &IndexMap<&str, Vec<EnumValue>>, current: Option<&[EnumValue]>) {
    match filter {
        FilterValue::Scalar(value) => {
            if let Some(values) = current {
                if let Some(raw) = raw_enum_value(value, values) {
                    *value = Value::String(raw);
                }
            }
        }
        FilterValue::Array(items) => {
            for item in items {
                remap_enums(item, enums, current);
            }
        }
        FilterValue::Object(map) => {
            for (key, value) in map.iter_mut() {
                let next = match key {
                    WhereKey::Field(name) => enums.get(name.as_str()).map(Vec::as_slice),
                    WhereKey::Op(_) => current,
                };
                remap_enums(value, enums, next);
            }
        }
        FilterValue::Deferred(_) => {}
    }
}

fn raw_enum_value(value: &Value, values: &[EnumValue]) -> Option<String> {
    let name = match value {
        Value::Enum(name) => name.as_str(),
        Value::String(s) if !values.iter().any(|v| &v.raw == s) => s.as_str(),
        _ => return None,
    };
    values.iter().find(|v| v.name == name).map(|v| v.raw.clone())
}

fn truthy(value: Option<&Value>) -> Option<&Value> {
    let value = value?;
    let is_truthy = match value {
        Value::Null => false,
        Value::Boolean(b) => *b,
        Value::Number(n) => n.as_f64() != Some(0.0),
        Value::String(s) => !s.is_empty(),
        _ => true,
    };
    is_truthy.then_some(value)
}

/// A non-negative `limit` or `offset`
fn parse_bound(name: &str, value: &Value) -> Result<i64> {
    let parsed = parse_int(name, value)?;
    if parsed < 0 {
        return Err(invalid_argument(name, "must be non-negative"));
    }
    Ok(parsed)
}

/// Integers, truncated floats and numeric strings
pub(crate) fn parse_int(name: &str, value: &Value) -> Result<i64> {
    let parsed = match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .ok()
            .or_else(|| s.trim().parse::<f64>().ok().map(|f| f.trunc() as i64)),
        _ => None,
    };
    parsed.ok_or_else(|| invalid_argument(name, format!("expected an integer, got {value}")))
}

/// Parse an `order` argument.
///
/// Accepts a column name (`"name"`, `"reverse:name"`), or a list of column
/// names and `[column, direction]` pairs.
pub fn parse_order(value: &Value) -> Result<Vec<OrderItem>> {
    match value {
        Value::String(_) | Value::Enum(_) => Ok(vec![parse_order_term(value)?]),
        Value::List(items) => items.iter().map(parse_order_term).collect(),
        _ => Err(invalid_argument("order", "expected a string or list")),
    }
}

fn parse_order_term(value: &Value) -> Result<OrderItem> {
    match value {
        Value::String(s) => Ok(order_from_str(s)),
        Value::Enum(e) => Ok(order_from_str(e.as_str())),
        Value::List(pair) => match pair.as_slice() {
            [Value::String(column)] => Ok(OrderItem::asc(column.clone())),
            [Value::String(column), direction] => {
                let direction = match direction {
                    Value::String(d) => SortDirection::parse(d),
                    Value::Enum(d) => SortDirection::parse(d.as_str()),
                    _ => None,
                }
                .ok_or_else(|| invalid_argument("order", format!("bad direction {direction}")))?;
                Ok(OrderItem {
                    column: column.clone(),
                    direction,
                })
            }
            _ => Err(invalid_argument("order", "expected [column, direction]")),
        },
        other => Err(invalid_argument("order", format!("unexpected term {other}"))),
    }
}

fn order_from_str(raw: &str) -> OrderItem {
    match raw.strip_prefix(REVERSE_PREFIX) {
        Some(column) => OrderItem::desc(column),
        None => OrderItem::asc(raw),
    }
}

/// Arguments for fetching one instance: the primary key and `where`.
pub fn default_args(model: &dyn Model, mapper: &TypeMapper) -> Result<Vec<InputValue>> {
    let pk = model.primary_key();
    let ty = match model.attribute(pk) {
        Some(attr) => mapper.map(&attr.ty)?.type_ref(pk),
        None => TypeRef::named(TypeRef::INT),
    };
    Ok(vec![
        InputValue::new(pk, ty),
        InputValue::new("where", TypeRef::named(JSON)).description(WHERE_DESCRIPTION),
    ])
}

/// Arguments for fetching a list: `limit`, `order`, `where` and `offset`.
pub fn default_list_args() -> Vec<InputValue> {
    vec![
        InputValue::new("limit", TypeRef::named(TypeRef::INT)),
        InputValue::new("order", TypeRef::named(TypeRef::STRING)),
        InputValue::new("where", TypeRef::named(JSON)).description(WHERE_DESCRIPTION),
        InputValue::new("offset", TypeRef::named(TypeRef::INT)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::orm::{AttributeDef, AttributeType, Dialect, Instance, Op};
    use assert_matches::assert_matches;
    use async_graphql::{Name, value};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    fn args(value: Value) -> IndexMap<String, Value> {
        match value {
            Value::Object(map) => map.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
            _ => panic!("expected object"),
        }
    }

    fn attrs() -> Vec<String> {
        vec!["id".into(), "name".into()]
    }

    #[test]
    fn test_empty_args() {
        let options = args_to_find_options(&IndexMap::new(), &attrs()).unwrap();
        assert_eq!(options, FindOptions::default());
    }

    #[test]
    fn test_where_like() {
        let options =
            args_to_find_options(&args(value!({ "where": { "name": { "like": "A%" } } })), &attrs())
                .unwrap();
        let expected = FilterValue::from_pairs([(
            WhereKey::field("name"),
            FilterValue::from_pairs([(WhereKey::Op(Op::Like), FilterValue::Scalar(Value::from("A%")))]),
        )]);
        assert_eq!(options.r#where, Some(expected));
    }

    #[test]
    fn test_attribute_args_become_equality() {
        let options = args_to_find_options(
            &args(value!({ "id": 3, "other": 4, "where": { "id": { "gt": 1 }, "name": "A" } })),
            &attrs(),
        )
        .unwrap();
        let filter = options.r#where.unwrap();
        let map = filter.as_object().unwrap();
        assert_eq!(map.len(), 2);
        // `where` wins over the attribute argument
        assert_eq!(
            map[&WhereKey::field("id")],
            FilterValue::from_pairs([(WhereKey::Op(Op::Gt), FilterValue::Scalar(Value::from(1)))])
        );
    }

    #[test]
    fn test_limit_offset_order() {
        let options = args_to_find_options(
            &args(value!({ "limit": "10", "offset": 2.7, "order": "reverse:name" })),
            &attrs(),
        )
        .unwrap();
        assert_eq!(options.limit, Some(10));
        assert_eq!(options.offset, Some(2));
        assert_eq!(options.order, vec![OrderItem::desc("name")]);
    }

    #[test]
    fn test_falsy_values_are_skipped() {
        let options = args_to_find_options(
            &args(value!({ "limit": 0, "offset": 0, "order": "" })),
            &attrs(),
        )
        .unwrap();
        assert_eq!(options.limit, None);
        assert_eq!(options.offset, None);
        assert!(options.order.is_empty());
    }

    #[test]
    fn test_structured_order() {
        let order = parse_order(&value!([["name", "DESC"], "id"])).unwrap();
        assert_eq!(order, vec![OrderItem::desc("name"), OrderItem::asc("id")]);
        assert!(parse_order(&value!([["name", "UP"]])).is_err());
    }

    #[test]
    fn test_bad_limit() {
        let result = args_to_find_options(&args(value!({ "limit": "ten" })), &attrs());
        assert_matches!(result, Err(Error::InvalidArgument { name, .. }) if name == "limit");
    }

    #[derive(Debug)]
    struct Ticket(Vec<AttributeDef>);

    #[async_trait]
    impl Model for Ticket {
        fn name(&self) -> &str {
            "Ticket"
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

    fn ticket() -> Ticket {
        Ticket(vec![
            AttributeDef::new("id", AttributeType::Integer).primary_key(),
            AttributeDef::new(
                "status",
                AttributeType::Enum(vec!["in progress".into(), "done".into()]),
            ),
            AttributeDef::new("note", AttributeType::String),
        ])
    }

    #[test]
    fn test_enum_names_become_raw_values() {
        let model = ticket();
        let mut input = args(value!({
            "where": { "or": [{ "status": { "in": ["inProgress", "done"] } }, { "note": "inProgress" }] },
        }));
        input.insert("status".into(), Value::Enum(Name::new("inProgress")));
        let mut options = args_to_find_options(&input, &model.attribute_names()).unwrap();
        let filter = options.r#where.as_mut().unwrap();
        enum_names_to_raw(filter, &model, &TypeMapper::new());

        let map = filter.as_object().unwrap();
        assert_eq!(
            map[&WhereKey::field("status")],
            FilterValue::Scalar(Value::from("in progress"))
        );
        let FilterValue::Array(branches) = &map[&WhereKey::Op(Op::Or)] else {
            panic!("expected or branches");
        };
        assert_eq!(
            branches[0],
            FilterValue::from_pairs([(
                WhereKey::field("status"),
                FilterValue::from_pairs([(
                    WhereKey::Op(Op::In),
                    FilterValue::Array(vec![
                        FilterValue::Scalar(Value::from("in progress")),
                        FilterValue::Scalar(Value::from("done")),
                    ]),
                )]),
            )])
        );
        // not an enum attribute
        assert_eq!(
            branches[1],
            FilterValue::from_pairs([(WhereKey::field("note"), FilterValue::Scalar(Value::from("inProgress")))])
        );
    }

    #[test]
    fn test_negative_limit_and_offset() {
        let result = args_to_find_options(&args(value!({ "limit": -1 })), &attrs());
        assert_matches!(result, Err(Error::InvalidArgument { name, .. }) if name == "limit");

        let result = args_to_find_options(&args(value!({ "limit": 2, "offset": "-3" })), &attrs());
        assert_matches!(result, Err(Error::InvalidArgument { name, .. }) if name == "offset");
    }
}
