//! Relay connections over models and associations
//!
//! [ConnectionConfig::build] produces the `{Name}Connection` and
//! `{Name}Edge` object types, an optional ordering enum, the connection
//! arguments and a resolver. The resolver translates the Relay arguments
//! into offset/limit queries:
//!
//! - `after` starts the page at the cursor's index plus one, `before` ends it
//!   at the cursor's index
//! - `first` takes from the start of that window, `last` from its end
//! - `last` without `before` runs the query in inverted order and reverses
//!   the rows again, so edges always come back in canonical order
//! - rows are ordered by `orderBy` (default: primary key ascending) with a
//!   primary-key tie-break
//!
//! The total count comes from `COUNT(*) OVER()` on the page query when the
//! dialect supports it, and from a second count query otherwise. When only
//! connection-level fields such as `totalCount` are selected, no rows are
//! fetched at all.

use std::sync::Arc;

use async_graphql::Value;
use async_graphql::dynamic::{
    Enum, EnumItem, Field, FieldFuture, FieldValue, InputValue, Object, SchemaBuilder, Type,
    TypeRef,
};
use async_trait::async_trait;
use indexmap::IndexMap;

use super::args::{args_to_find_options, enum_names_to_raw};
use super::attribute_fields::TypeCache;
use super::context::ResolveParams;
use super::pagination::{
    CONNECTION_SUFFIX, Connection, Cursor, Edge, PAGE_INFO, count_arg, cursor_arg, encode_cursor,
    page, page_info_type,
};
use super::resolver::{
    AfterHook, BeforeHook, Resolve, Resolved, Resolver, ResolverKind, ResolverOptions, Target,
    TargetSpec, after_hook, before_hook, copy_context_options, resolver,
};
use super::type_mapper::TypeMapper;
use crate::config::Config;
use crate::error::{Error, Result, config_error, invalid_argument};
use crate::orm::{Attribute, FULL_COUNT, FilterValue, FindOptions, Instance, Model, OrderItem, WhereKey};

/// Arguments the connection consumes itself; everything else goes through `where_fn`
pub const RESERVED_ARGS: [&str; 5] = ["first", "last", "before", "after", "orderBy"];

/// Maps a non-reserved argument to the filter it contributes
pub type WhereFn = Arc<dyn Fn(&str, &Value) -> FilterValue + Send + Sync>;

/// The `orderBy` enum of a connection.
#[derive(Debug, Clone)]
pub struct OrderByEnum {
    pub name: String,
    pub values: IndexMap<String, Vec<OrderItem>>,
}

impl OrderByEnum {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            values: IndexMap::new(),
        }
    }

    pub fn value(mut self, name: impl Into<String>, order: impl IntoIterator<Item = OrderItem>) -> Self {
        self.values.insert(name.into(), order.into_iter().collect());
        self
    }

    fn to_enum(&self) -> Enum {
        self.values
            .keys()
            .fold(Enum::new(&self.name), |ty, name| ty.item(EnumItem::new(name)))
    }
}

/// Everything needed to build one connection.
pub struct ConnectionConfig {
    /// Prefix of the generated type names
    pub name: String,
    /// GraphQL type of the nodes
    pub node_type: String,
    pub target: TargetSpec,
    pub order_by: Option<OrderByEnum>,
    pub before: Option<BeforeHook>,
    pub after: Option<AfterHook>,
    /// Extra fields on the connection type; their parent value is a [Connection]
    pub connection_fields: Vec<Field>,
    /// Extra fields on the edge type; their parent value is an [Edge]
    pub edge_fields: Vec<Field>,
    pub where_fn: Option<WhereFn>,
    pub window_count: bool,
    pub context_to_options: IndexMap<String, String>,
    pub type_mapper: TypeMapper,
}

impl ConnectionConfig {
    pub fn new(
        name: impl Into<String>,
        node_type: impl Into<String>,
        target: impl Into<TargetSpec>,
    ) -> Self {
        Self {
            name: name.into(),
            node_type: node_type.into(),
            target: target.into(),
            order_by: None,
            before: None,
            after: None,
            connection_fields: Vec::new(),
            edge_fields: Vec::new(),
            where_fn: None,
            window_count: true,
            context_to_options: IndexMap::new(),
            type_mapper: TypeMapper::new(),
        }
    }

    /// Apply window-count and context settings from `config`
    pub fn config(mut self, config: &Config) -> Self {
        self.window_count = config.window_count;
        self.context_to_options = config.context_to_options.clone();
        self
    }

    /// The mapper the node type's attribute fields were generated with
    pub fn type_mapper(mut self, mapper: TypeMapper) -> Self {
        self.type_mapper = mapper;
        self
    }

    pub fn order_by(mut self, order_by: OrderByEnum) -> Self {
        self.order_by = Some(order_by);
        self
    }

    pub fn before<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(FindOptions, Arc<ResolveParams>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<FindOptions>> + Send + 'static,
    {
        self.before = Some(before_hook(f));
        self
    }

    pub fn after<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Resolved, Arc<ResolveParams>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Resolved>> + Send + 'static,
    {
        self.after = Some(after_hook(f));
        self
    }

    pub fn connection_field(mut self, field: Field) -> Self {
        self.connection_fields.push(field);
        self
    }

    pub fn edge_field(mut self, field: Field) -> Self {
        self.edge_fields.push(field);
        self
    }

    pub fn where_fn(mut self, f: impl Fn(&str, &Value) -> FilterValue + Send + Sync + 'static) -> Self {
        self.where_fn = Some(Arc::new(f));
        self
    }

    pub fn connection_type_name(&self) -> String {
        format!("{}{CONNECTION_SUFFIX}", self.name)
    }

    pub fn edge_type_name(&self) -> String {
        format!("{}Edge", self.name)
    }

    /// Build the connection types and resolver.
    ///
    /// Fails if the connection or edge type name was already generated.
    pub fn build(self, cache: &mut TypeCache) -> Result<ConnectionDescriptor> {
        let connection_name = self.connection_type_name();
        let edge_name = self.edge_type_name();
        for name in [&connection_name, &edge_name] {
            if !cache.claim(name.clone()) {
                return Err(config_error(format!("type {name} is already defined")));
            }
        }

        let mut types: Vec<Type> = Vec::new();
        if cache.claim(PAGE_INFO) {
            types.push(page_info_type().into());
        }
        if let Some(order_by) = &self.order_by {
            if cache.claim(order_by.name.clone()) {
                types.push(order_by.to_enum().into());
            }
        }

        let engine = Arc::new(ConnectionEngine {
            target: self.target.clone(),
            order_by: self.order_by.clone(),
            before: self.before.clone(),
            after: self.after.clone(),
            where_fn: self.where_fn.clone(),
            window_count: self.window_count,
            context_to_options: self.context_to_options.clone(),
            type_mapper: self.type_mapper.clone(),
        });

        let inner = resolver(self.target.clone(), engine.inner_options())?;
        let outer = Resolver::new(
            ResolverKind::Proxy(Arc::new(inner.clone())),
            Arc::new(ConnectionResolver {
                engine: engine.clone(),
                inner,
            }),
        );

        let edge_type = self.edge_fields.into_iter().fold(
            edge_type(&edge_name, &self.node_type),
            |ty, field| ty.field(field),
        );
        let connection_type = self.connection_fields.into_iter().fold(
            connection_type(&connection_name, &edge_name, engine.clone()),
            |ty, field| ty.field(field),
        );

        Ok(ConnectionDescriptor {
            connection_name,
            order_by_name: self.order_by.map(|o| o.name),
            connection_type,
            edge_type,
            types,
            resolver: outer,
        })
    }
}

/// The built connection.
pub struct ConnectionDescriptor {
    connection_name: String,
    order_by_name: Option<String>,
    pub connection_type: Object,
    pub edge_type: Object,
    /// Shared types generated for the first time by this connection
    pub types: Vec<Type>,
    pub resolver: Resolver,
}

impl ConnectionDescriptor {
    pub fn connection_type_name(&self) -> &str {
        &self.connection_name
    }

    /// `first`, `after`, `last`, `before` and `orderBy` when an ordering enum exists
    pub fn connection_args(&self) -> Vec<InputValue> {
        let mut args = vec![
            InputValue::new("first", TypeRef::named(TypeRef::INT)),
            InputValue::new("after", TypeRef::named(TypeRef::STRING)),
            InputValue::new("last", TypeRef::named(TypeRef::INT)),
            InputValue::new("before", TypeRef::named(TypeRef::STRING)),
        ];
        if let Some(name) = &self.order_by_name {
            args.push(InputValue::new("orderBy", TypeRef::named(name.clone())));
        }
        args
    }

    /// A field returning this connection, with the connection arguments
    pub fn field(&self, name: impl Into<String>) -> Field {
        self.resolver.clone().into_field_with_args(
            name,
            TypeRef::named_nn(self.connection_name.clone()),
            self.connection_args(),
        )
    }

    /// Build the edge of `node` at `index` in the canonical ordering
    pub fn resolve_edge(
        &self,
        model: &dyn Model,
        node: Instance,
        index: i64,
        source: Option<Instance>,
    ) -> Edge {
        resolve_edge(model, node, index, source)
    }

    /// Register the generated types with a schema
    pub fn register(self, builder: SchemaBuilder) -> SchemaBuilder {
        let builder = builder.register(self.connection_type).register(self.edge_type);
        self.types
            .into_iter()
            .fold(builder, |builder, ty| builder.register(ty))
    }
}

impl std::fmt::Debug for ConnectionDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionDescriptor")
            .field("connection", &self.connection_name)
            .field("order_by", &self.order_by_name)
            .finish()
    }
}

pub fn resolve_edge(model: &dyn Model, node: Instance, index: i64, source: Option<Instance>) -> Edge {
    let cursor = encode_cursor(&Cursor {
        id: node.value_string(model.primary_key()).unwrap_or_default(),
        index,
    });
    Edge {
        cursor,
        node,
        source,
    }
}

// ============================================================================
// Schema types
// ============================================================================

fn edge_type(name: &str, node_type: &str) -> Object {
    Object::new(name)
        .description("An edge in a connection.")
        .field(Field::new("cursor", TypeRef::named_nn(TypeRef::STRING), |ctx| {
            FieldFuture::new(async move {
                let edge = ctx.parent_value.try_downcast_ref::<Edge>()?;
                Ok(Some(FieldValue::value(edge.cursor.clone())))
            })
        }))
        .field(Field::new("node", TypeRef::named(node_type), |ctx| {
            FieldFuture::new(async move {
                let edge = ctx.parent_value.try_downcast_ref::<Edge>()?;
                Ok(Some(FieldValue::borrowed_any(&edge.node)))
            })
        }))
}

fn connection_type(name: &str, edge_name: &str, engine: Arc<ConnectionEngine>) -> Object {
    Object::new(name)
        .description("A connection to a list of items.")
        .field(Field::new("pageInfo", TypeRef::named_nn(PAGE_INFO), |ctx| {
            FieldFuture::new(async move {
                let connection = ctx.parent_value.try_downcast_ref::<Connection>()?;
                Ok(Some(FieldValue::borrowed_any(&connection.page_info)))
            })
        }))
        .field(Field::new("edges", TypeRef::named_list(edge_name), |ctx| {
            FieldFuture::new(async move {
                let connection = ctx.parent_value.try_downcast_ref::<Connection>()?;
                Ok(Some(FieldValue::list(
                    connection.edges.iter().map(|edge| FieldValue::borrowed_any(edge)),
                )))
            })
        }))
        .field(Field::new("totalCount", TypeRef::named(TypeRef::INT), move |ctx| {
            let engine = engine.clone();
            FieldFuture::new(async move {
                let connection = ctx.parent_value.try_downcast_ref::<Connection>()?;
                let count = match connection.full_count {
                    Some(count) => count,
                    None => {
                        let params = connection
                            .params
                            .clone()
                            .ok_or_else(|| config_error("connection was not produced by a resolver"))?;
                        engine.count(&params).await?
                    }
                };
                Ok(Some(FieldValue::value(count)))
            })
        }))
}

// ============================================================================
// Pagination
// ============================================================================

/// Where the requested page sits in the canonical ordering.
#[derive(Debug, Clone, PartialEq)]
struct PagePlan {
    /// First position the page may contain (`after` + 1)
    lower: i64,
    offset: i64,
    limit: Option<i64>,
    /// Query in inverted order and reverse the rows afterwards
    reversed: bool,
}

impl PagePlan {
    fn from_args(args: &IndexMap<String, Value>) -> Result<Self> {
        let first = count_arg(args, "first")?;
        let last = count_arg(args, "last")?;
        let lower = cursor_arg(args, "after")?.map(|c| c.index.saturating_add(1)).unwrap_or(0).max(0);
        let upper = cursor_arg(args, "before")?.map(|c| c.index);

        let end = match (first, upper) {
            (Some(first), Some(upper)) => Some(lower.saturating_add(first).min(upper)),
            (Some(first), None) => Some(lower.saturating_add(first)),
            (None, Some(upper)) => Some(upper),
            (None, None) => None,
        }
        .map(|end| end.max(lower));

        let plan = match (last, end) {
            (Some(last), Some(end)) => {
                let start = (end - last).max(lower);
                PagePlan {
                    lower,
                    offset: start,
                    limit: Some(end - start),
                    reversed: false,
                }
            }
            (Some(last), None) => PagePlan {
                lower,
                offset: 0,
                limit: Some(last),
                reversed: true,
            },
            (None, end) => PagePlan {
                lower,
                offset: lower,
                limit: end.map(|end| end - lower),
                reversed: false,
            },
        };
        Ok(plan)
    }

    /// Apply the plan to rows already in canonical order. Returns the page
    /// and the position of its first row.
    fn slice(&self, rows: Vec<Instance>) -> (Vec<Instance>, i64) {
        let length = rows.len() as i64;
        let (start, end) = match (self.reversed, self.limit) {
            (true, Some(limit)) => ((length - limit).max(self.lower), length),
            (_, limit) => {
                let end = limit.map_or(length, |limit| self.offset.saturating_add(limit));
                (self.offset, end.min(length))
            }
        };
        let start = start.clamp(0, length);
        let end = end.max(start);
        let page = rows
            .into_iter()
            .skip(start as usize)
            .take((end - start) as usize)
            .collect();
        (page, start)
    }
}

/// Rows an upstream loader attached to the source for this association
fn eager_rows(target: &Target, params: &ResolveParams) -> Option<Vec<Instance>> {
    let Target::Association(association) = target else {
        return None;
    };
    params
        .source
        .as_ref()?
        .included(association.as_name())
        .map(|included| included.clone().into_vec())
}

struct ConnectionEngine {
    target: TargetSpec,
    order_by: Option<OrderByEnum>,
    before: Option<BeforeHook>,
    after: Option<AfterHook>,
    where_fn: Option<WhereFn>,
    window_count: bool,
    context_to_options: IndexMap<String, String>,
    type_mapper: TypeMapper,
}

impl ConnectionEngine {
    /// Options of the inner list resolver: the engine's own hooks wrap the user's
    fn inner_options(self: &Arc<Self>) -> ResolverOptions {
        let before_engine = self.clone();
        let after_engine = self.clone();
        ResolverOptions {
            before: Some(before_hook(move |find, params| {
                let engine = before_engine.clone();
                async move { engine.before_page(find, params).await }
            })),
            after: Some(after_hook(move |resolved, params| {
                let engine = after_engine.clone();
                async move { engine.after_page(resolved, params).await }
            })),
            list: true,
            handle_connection: false,
            include: None,
            context_to_options: self.context_to_options.clone(),
            type_mapper: self.type_mapper.clone(),
        }
    }

    /// Requested ordering with a primary-key tie-break
    fn ordering(&self, args: &IndexMap<String, Value>, primary_key: &str) -> Result<Vec<OrderItem>> {
        let requested = match args.get("orderBy") {
            None | Some(Value::Null) => None,
            Some(Value::Enum(name)) => Some(name.as_str()),
            Some(Value::String(name)) => Some(name.as_str()),
            Some(other) => {
                return Err(invalid_argument("orderBy", format!("unexpected value {other}")));
            }
        };
        let mut order = match (requested, &self.order_by) {
            (None, _) => Vec::new(),
            (Some(name), Some(order_by)) => order_by
                .values
                .get(name)
                .cloned()
                .ok_or_else(|| invalid_argument("orderBy", format!("unknown ordering {name}")))?,
            (Some(_), None) => return Err(invalid_argument("orderBy", "connection has no orderings")),
        };
        if !order.iter().any(|item| item.column == primary_key) {
            order.push(OrderItem::asc(primary_key));
        }
        Ok(order)
    }

    /// Filter contributed by the non-reserved arguments
    fn args_where(&self, args: &IndexMap<String, Value>) -> FilterValue {
        args.iter()
            .filter(|(key, value)| !RESERVED_ARGS.contains(&key.as_str()) && **value != Value::Null)
            .fold(FilterValue::object(), |filter, (key, value)| {
                let fragment = match &self.where_fn {
                    Some(f) => f(key, value),
                    None => FilterValue::from_pairs([(
                        WhereKey::field(key.clone()),
                        FilterValue::from_value(value.clone()),
                    )]),
                };
                filter.merge(fragment)
            })
    }

    async fn before_page(&self, mut find: FindOptions, params: Arc<ResolveParams>) -> Result<FindOptions> {
        let model = self.target.resolve(&params)?.model();
        let plan = PagePlan::from_args(&params.args)?;
        let order = self.ordering(&params.args, model.primary_key())?;

        find.order = if plan.reversed {
            order.iter().map(OrderItem::reversed).collect()
        } else {
            order
        };
        find.offset = Some(plan.offset).filter(|offset| *offset > 0);
        find.limit = plan.limit;

        if find.limit.is_some()
            && self.window_count
            && model.dialect().supports_window_count()
            && !find.has_full_count()
        {
            find.attributes.push(Attribute::FullCount);
        }

        let filter = self.args_where(&params.args);
        if !filter.is_empty() {
            find.merge_where(filter);
        }
        if let Some(filter) = find.r#where.as_mut() {
            enum_names_to_raw(filter, model.as_ref(), &self.type_mapper);
        }

        tracing::trace!(plan = ?plan, "Connection page");
        match &self.before {
            Some(before) => before(find, params).await,
            None => Ok(find),
        }
    }

    async fn after_page(&self, resolved: Resolved, params: Arc<ResolveParams>) -> Result<Resolved> {
        let Resolved::List(mut rows) = resolved else {
            return Ok(resolved);
        };
        let target = self.target.resolve(&params)?;
        let model = target.model();
        let plan = PagePlan::from_args(&params.args)?;

        if let Some(eager) = eager_rows(&target, &params) {
            tracing::debug!(plan = ?plan, "Paging eager-loaded rows in memory");
            let full_count = eager.len() as i64;
            let (rows, start) = plan.slice(eager);
            return self.finish_page(rows, start, full_count, model.as_ref(), params).await;
        }

        let full_count = match rows.first().and_then(Instance::full_count) {
            Some(count) => count,
            None if plan.limit.is_some() => self.count(&params).await?,
            None => plan.offset.saturating_add(rows.len() as i64),
        };
        for row in &mut rows {
            row.values.shift_remove(FULL_COUNT);
        }

        let start = if plan.reversed {
            rows.reverse();
            let start = full_count - rows.len() as i64;
            if start < plan.lower {
                let overlap = (plan.lower - start).min(rows.len() as i64);
                rows.drain(..overlap as usize);
                plan.lower
            } else {
                start
            }
        } else {
            plan.offset
        };

        self.finish_page(rows, start, full_count, model.as_ref(), params).await
    }

    async fn finish_page(
        &self,
        rows: Vec<Instance>,
        start: i64,
        full_count: i64,
        model: &dyn Model,
        params: Arc<ResolveParams>,
    ) -> Result<Resolved> {
        let (edges, page_info) = page(
            rows,
            start,
            full_count,
            model.primary_key(),
            params.source.as_ref(),
        );
        let connection = Connection {
            edges,
            page_info,
            source: params.source.clone(),
            args: params.args.clone(),
            r#where: self.args_where(&params.args),
            full_count: Some(full_count),
            params: Some(params.clone()),
        };

        let resolved = Resolved::Connection(Box::new(connection));
        match &self.after {
            Some(after) => after(resolved, params).await,
            None => Ok(resolved),
        }
    }

    /// Count every row of the connection, ignoring pagination
    async fn count(&self, params: &Arc<ResolveParams>) -> Result<i64> {
        let target = self.target.resolve(params)?;
        if let Some(eager) = eager_rows(&target, params) {
            return Ok(eager.len() as i64);
        }
        let model = target.model();

        let mut find = args_to_find_options(&params.args, &model.attribute_names())?;
        let filter = self.args_where(&params.args);
        if !filter.is_empty() {
            find.merge_where(filter);
        }
        if let Some(filter) = find.r#where.as_mut() {
            enum_names_to_raw(filter, model.as_ref(), &self.type_mapper);
        }
        copy_context_options(&mut find, &self.context_to_options, &params.context);
        if let Some(before) = &self.before {
            find = before(find, params.clone()).await?;
        }
        if let Some(filter) = find.r#where.as_mut() {
            filter.resolve_deferred(&params.info.variables);
        }
        find.limit = None;
        find.offset = None;
        find.order.clear();
        find.attributes.clear();

        tracing::debug!(model = %model.name(), "Counting connection rows");
        match target {
            Target::Model(model) => model.count(&find).await,
            Target::Association(association) => {
                let source = params
                    .source
                    .as_ref()
                    .ok_or_else(|| Error::MissingSource(association.id()))?;
                association.count(source, &find).await
            }
        }
    }
}

/// Outer connection resolver: fetches rows only when they are selected.
struct ConnectionResolver {
    engine: Arc<ConnectionEngine>,
    inner: Resolver,
}

#[async_trait]
impl Resolve for ConnectionResolver {
    async fn resolve(&self, params: Arc<ResolveParams>) -> Result<Resolved> {
        let selection = &params.info.selection;
        if selection.requests("edges") || selection.requests("pageInfo") {
            return self.inner.resolve(params).await;
        }

        tracing::debug!(field = %params.info.field_name, "Rows not selected, skipping page query");
        let connection = Connection {
            source: params.source.clone(),
            args: params.args.clone(),
            r#where: self.engine.args_where(&params.args),
            params: Some(params.clone()),
            ..Default::default()
        };
        Ok(Resolved::Connection(Box::new(connection)))
    }
}
