//! Resolver factory
//!
//! [resolver] turns a model or association into a field resolver. Each call
//! builds [FindOptions] from the field arguments, runs the `before` hook,
//! fetches through the ORM (or reuses eager-loaded data) and hands the
//! result to the `after` hook.
//!
//! ```rust,ignore
//! let tasks = resolver(
//!     TargetSpec::association(user_tasks),
//!     ResolverOptions::from_config(&config).before(|mut options, _params| async move {
//!         options.limit = Some(50);
//!         Ok(options)
//!     }),
//! )?;
//! object.field(tasks.into_field("tasks", TypeRef::named_nn_list_nn("Task")).arguments(default_list_args()));
//! ```

use std::future::Future;
use std::sync::Arc;

use async_graphql::Value;
use async_graphql::dynamic::{Field, FieldFuture, FieldValue, InputValue, TypeRef};
use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use indexmap::IndexMap;

use super::args::{args_to_find_options, enum_names_to_raw};
use super::context::{RequestContext, ResolveParams};
use super::loaders::AssociationKey;
use super::pagination::{Connection, connection_from_array};
use super::type_mapper::TypeMapper;
use crate::config::Config;
use crate::error::{Error, Result, config_error};
use crate::orm::{Association, FindOptions, Instance, Model, OrderItem};

// ============================================================================
// Targets
// ============================================================================

/// What a resolver fetches.
#[derive(Debug, Clone)]
pub enum Target {
    Model(Arc<dyn Model>),
    Association(Arc<dyn Association>),
}

impl Target {
    /// The model rows are fetched from
    pub fn model(&self) -> Arc<dyn Model> {
        match self {
            Target::Model(model) => model.clone(),
            Target::Association(association) => association.target(),
        }
    }
}

pub type TargetFn = Arc<dyn Fn(&ResolveParams) -> Result<Target> + Send + Sync>;

/// A target fixed at schema-build time, or picked per call.
#[derive(Clone)]
pub enum TargetSpec {
    Fixed(Target),
    Dynamic(TargetFn),
}

impl TargetSpec {
    pub fn model(model: Arc<dyn Model>) -> Self {
        TargetSpec::Fixed(Target::Model(model))
    }

    pub fn association(association: Arc<dyn Association>) -> Self {
        TargetSpec::Fixed(Target::Association(association))
    }

    /// Pick the target from the parent, arguments and context of each call
    pub fn dynamic(f: impl Fn(&ResolveParams) -> Result<Target> + Send + Sync + 'static) -> Self {
        TargetSpec::Dynamic(Arc::new(f))
    }

    pub fn resolve(&self, params: &ResolveParams) -> Result<Target> {
        match self {
            TargetSpec::Fixed(target) => Ok(target.clone()),
            TargetSpec::Dynamic(f) => f(params),
        }
    }
}

impl From<Target> for TargetSpec {
    fn from(target: Target) -> Self {
        TargetSpec::Fixed(target)
    }
}

impl std::fmt::Debug for TargetSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TargetSpec::Fixed(target) => f.debug_tuple("Fixed").field(target).finish(),
            TargetSpec::Dynamic(_) => f.write_str("Dynamic"),
        }
    }
}

// ============================================================================
// Results and hooks
// ============================================================================

/// The value a resolver produced.
#[derive(Debug, Clone)]
pub enum Resolved {
    Null,
    Instance(Instance),
    List(Vec<Instance>),
    Connection(Box<Connection>),
    /// A plain value, usually produced by an `after` hook
    Value(Value),
}

impl Resolved {
    pub fn into_field_value<'a>(self) -> Option<FieldValue<'a>> {
        match self {
            Resolved::Null => None,
            Resolved::Instance(instance) => Some(FieldValue::owned_any(instance)),
            Resolved::List(rows) => Some(FieldValue::list(
                rows.into_iter().map(FieldValue::owned_any),
            )),
            Resolved::Connection(connection) => Some(FieldValue::owned_any(*connection)),
            Resolved::Value(value) => Some(FieldValue::value(value)),
        }
    }

    pub fn as_list(&self) -> Option<&[Instance]> {
        match self {
            Resolved::List(rows) => Some(rows),
            _ => None,
        }
    }
}

pub type BeforeHook =
    Arc<dyn Fn(FindOptions, Arc<ResolveParams>) -> BoxFuture<'static, Result<FindOptions>> + Send + Sync>;

pub type AfterHook =
    Arc<dyn Fn(Resolved, Arc<ResolveParams>) -> BoxFuture<'static, Result<Resolved>> + Send + Sync>;

pub fn before_hook<F, Fut>(f: F) -> BeforeHook
where
    F: Fn(FindOptions, Arc<ResolveParams>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<FindOptions>> + Send + 'static,
{
    Arc::new(move |options, params| f(options, params).boxed())
}

pub fn after_hook<F, Fut>(f: F) -> AfterHook
where
    F: Fn(Resolved, Arc<ResolveParams>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Resolved>> + Send + 'static,
{
    Arc::new(move |resolved, params| f(resolved, params).boxed())
}

// ============================================================================
// Options
// ============================================================================

/// Options of [resolver].
#[derive(Clone)]
pub struct ResolverOptions {
    pub before: Option<BeforeHook>,
    pub after: Option<AfterHook>,
    /// Always fetch a list, whatever the return type says
    pub list: bool,
    /// Wrap connection return types through the array adapter
    pub handle_connection: bool,
    /// Eager includes are not supported; setting this fails construction
    pub include: Option<Vec<String>>,
    /// Request-context keys copied into `FindOptions::extra`
    pub context_to_options: IndexMap<String, String>,
    /// Maps enum names in filters back to stored values
    pub type_mapper: TypeMapper,
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self {
            before: None,
            after: None,
            list: false,
            handle_connection: true,
            include: None,
            context_to_options: IndexMap::new(),
            type_mapper: TypeMapper::new(),
        }
    }
}

impl ResolverOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            context_to_options: config.context_to_options.clone(),
            ..Default::default()
        }
    }

    pub fn before<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(FindOptions, Arc<ResolveParams>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<FindOptions>> + Send + 'static,
    {
        self.before = Some(before_hook(f));
        self
    }

    pub fn after<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Resolved, Arc<ResolveParams>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Resolved>> + Send + 'static,
    {
        self.after = Some(after_hook(f));
        self
    }

    pub fn list(mut self, list: bool) -> Self {
        self.list = list;
        self
    }

    pub fn handle_connection(mut self, handle: bool) -> Self {
        self.handle_connection = handle;
        self
    }

    /// The mapper the object's attribute fields were generated with
    pub fn type_mapper(mut self, mapper: TypeMapper) -> Self {
        self.type_mapper = mapper;
        self
    }
}

impl std::fmt::Debug for ResolverOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolverOptions")
            .field("before", &self.before.is_some())
            .field("after", &self.after.is_some())
            .field("list", &self.list)
            .field("handle_connection", &self.handle_connection)
            .field("context_to_options", &self.context_to_options)
            .field("type_mapper", &self.type_mapper)
            .finish()
    }
}

// ============================================================================
// Resolver
// ============================================================================

#[async_trait]
pub trait Resolve: Send + Sync {
    async fn resolve(&self, params: Arc<ResolveParams>) -> Result<Resolved>;
}

/// How a resolver relates to other resolvers.
#[derive(Clone)]
pub enum ResolverKind {
    Plain,
    /// Wraps an inner resolver that does the fetching
    Proxy(Arc<Resolver>),
    /// Returns its source unchanged
    Passthrough,
}

/// A field resolver together with its introspectable kind.
#[derive(Clone)]
pub struct Resolver {
    kind: ResolverKind,
    handler: Arc<dyn Resolve>,
}

impl Resolver {
    pub(crate) fn new(kind: ResolverKind, handler: Arc<dyn Resolve>) -> Self {
        Self { kind, handler }
    }

    /// A resolver returning the parent instance
    pub fn passthrough() -> Self {
        Self::new(ResolverKind::Passthrough, Arc::new(Passthrough))
    }

    pub fn kind(&self) -> &ResolverKind {
        &self.kind
    }

    /// The resolver a proxy wraps
    pub fn inner(&self) -> Option<&Resolver> {
        match &self.kind {
            ResolverKind::Proxy(inner) => Some(inner),
            _ => None,
        }
    }

    pub fn is_passthrough(&self) -> bool {
        matches!(self.kind, ResolverKind::Passthrough)
    }

    pub async fn resolve(&self, params: Arc<ResolveParams>) -> Result<Resolved> {
        self.handler.resolve(params).await
    }

    /// Build a dynamic-schema field backed by this resolver
    pub fn into_field(self, name: impl Into<String>, ty: impl Into<TypeRef>) -> Field {
        let ty = ty.into();
        let return_type = ty.clone();
        let resolver = Arc::new(self);
        Field::new(name, ty, move |ctx| {
            let resolver = resolver.clone();
            let return_type = return_type.clone();
            FieldFuture::new(async move {
                let params = ResolveParams::from_context(&ctx, &return_type)?;
                let resolved = resolver.resolve(Arc::new(params)).await?;
                Ok(resolved.into_field_value())
            })
        })
    }

    /// Like [Resolver::into_field], with arguments attached
    pub fn into_field_with_args(
        self,
        name: impl Into<String>,
        ty: impl Into<TypeRef>,
        args: impl IntoIterator<Item = InputValue>,
    ) -> Field {
        args.into_iter()
            .fold(self.into_field(name, ty), |field, arg| field.argument(arg))
    }
}

impl std::fmt::Debug for Resolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match &self.kind {
            ResolverKind::Plain => "Plain",
            ResolverKind::Proxy(_) => "Proxy",
            ResolverKind::Passthrough => "Passthrough",
        };
        f.debug_struct("Resolver").field("kind", &kind).finish()
    }
}

struct Passthrough;

#[async_trait]
impl Resolve for Passthrough {
    async fn resolve(&self, params: Arc<ResolveParams>) -> Result<Resolved> {
        Ok(params
            .source
            .clone()
            .map(Resolved::Instance)
            .unwrap_or(Resolved::Null))
    }
}

/// Build a resolver that fetches `target`.
///
/// Fails with a configuration error when `options.include` is set.
pub fn resolver(target: impl Into<TargetSpec>, options: ResolverOptions) -> Result<Resolver> {
    if options.include.is_some() {
        return Err(config_error(
            "include is not supported by resolver, use a batching loader instead",
        ));
    }
    Ok(Resolver::new(
        ResolverKind::Plain,
        Arc::new(FindResolver {
            target: target.into(),
            options,
        }),
    ))
}

struct FindResolver {
    target: TargetSpec,
    options: ResolverOptions,
}

#[async_trait]
impl Resolve for FindResolver {
    async fn resolve(&self, params: Arc<ResolveParams>) -> Result<Resolved> {
        let target = self.target.resolve(&params)?;
        let model = target.model();
        let info = &params.info;

        let is_connection = self.options.handle_connection && info.is_connection();
        let list = self.options.list || info.is_list() || is_connection;

        let mut find = args_to_find_options(&params.args, &model.attribute_names())?;
        if let Some(filter) = find.r#where.as_mut() {
            enum_names_to_raw(filter, model.as_ref(), &self.options.type_mapper);
        }
        find.select_all(stored_attributes(model.as_ref()));
        copy_context_options(&mut find, &self.options.context_to_options, &params.context);

        if let Some(before) = &self.options.before {
            find = before(find, params.clone()).await?;
        }
        if let Some(filter) = find.r#where.as_mut() {
            filter.resolve_deferred(&info.variables);
        }
        if list && find.order.is_empty() {
            find.order.push(OrderItem::asc(model.primary_key()));
        }
        find.dedup_attributes();

        tracing::debug!(
            field = %info.field_name,
            node_type = info.node_type_name(),
            list,
            connection = is_connection,
            "Resolving {}",
            model.name()
        );
        tracing::trace!(options = ?find, "Find options");

        let resolved = match &target {
            Target::Association(association) => {
                resolve_association(association, &find, &params, list, is_connection).await?
            }
            Target::Model(model) => {
                resolve_model(model.as_ref(), &find, &params, list, is_connection).await?
            }
        };

        match &self.options.after {
            Some(after) => after(resolved, params).await,
            None => Ok(resolved),
        }
    }
}

async fn resolve_association(
    association: &Arc<dyn Association>,
    find: &FindOptions,
    params: &Arc<ResolveParams>,
    list: bool,
    is_connection: bool,
) -> Result<Resolved> {
    let source = params
        .source
        .as_ref()
        .ok_or_else(|| Error::MissingSource(association.id()))?;

    let rows = match source.included(association.as_name()) {
        Some(included) => {
            tracing::debug!(association = %association.id(), "Reusing eager-loaded rows");
            included.clone().into_vec()
        }
        None => fetch_association(association, source, find, &params.context).await?,
    };

    if is_connection {
        let pk = association.target().primary_key().to_string();
        let connection = array_connection(rows, &pk, find, params)?;
        return Ok(Resolved::Connection(Box::new(connection)));
    }
    Ok(rows_to_resolved(rows, list))
}

/// Fetch through the request's batch loader when one is installed and the
/// request is unpaginated.
async fn fetch_association(
    association: &Arc<dyn Association>,
    source: &Instance,
    find: &FindOptions,
    context: &RequestContext,
) -> Result<Vec<Instance>> {
    let batchable = find.limit.is_none() && find.offset.is_none();
    if let (true, Some(loader), Some(join)) = (
        batchable,
        context.association_loader.as_ref(),
        association.join_value(source),
    ) {
        let key = AssociationKey::new(association.clone(), join, Arc::new(find.clone()));
        let rows = loader.load_one(key).await.map_err(Error::Batch)?;
        return Ok(rows.unwrap_or_default());
    }
    association.get(source, find).await
}

async fn resolve_model(
    model: &dyn Model,
    find: &FindOptions,
    params: &Arc<ResolveParams>,
    list: bool,
    is_connection: bool,
) -> Result<Resolved> {
    if is_connection {
        let rows = model.find_all(find).await?;
        let connection = array_connection(rows, model.primary_key(), find, params)?;
        return Ok(Resolved::Connection(Box::new(connection)));
    }
    if list {
        return Ok(Resolved::List(model.find_all(find).await?));
    }
    Ok(model
        .find_one(find)
        .await?
        .map(Resolved::Instance)
        .unwrap_or(Resolved::Null))
}

fn array_connection(
    rows: Vec<Instance>,
    primary_key: &str,
    find: &FindOptions,
    params: &Arc<ResolveParams>,
) -> Result<Connection> {
    let mut connection = connection_from_array(rows, &params.args, primary_key, params.source.as_ref())?;
    connection.r#where = find.r#where.clone().unwrap_or_default();
    connection.params = Some(params.clone());
    Ok(connection)
}

fn rows_to_resolved(rows: Vec<Instance>, list: bool) -> Resolved {
    if list {
        Resolved::List(rows)
    } else {
        rows.into_iter()
            .next()
            .map(Resolved::Instance)
            .unwrap_or(Resolved::Null)
    }
}

pub(crate) fn stored_attributes(model: &dyn Model) -> Vec<String> {
    model
        .attributes()
        .iter()
        .filter(|attr| attr.is_stored())
        .map(|attr| attr.name.clone())
        .collect()
}

pub(crate) fn copy_context_options(
    find: &mut FindOptions,
    mapping: &IndexMap<String, String>,
    context: &RequestContext,
) {
    for (context_key, option_key) in mapping {
        if let Some(value) = context.values.get(context_key) {
            find.extra.insert(option_key.clone(), value.clone());
        }
    }
}
