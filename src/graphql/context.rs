//! Request-scoped context and the parameters handed to resolvers and hooks.

use std::sync::Arc;

use async_graphql::dataloader::DataLoader;
use async_graphql::dynamic::{ResolverContext, TypeRef};
use async_graphql::{Request, Value, Variables};
use indexmap::IndexMap;

use super::loaders::AssociationLoader;
use super::pagination::CONNECTION_SUFFIX;
use super::simplify::SimplifiedSelection;
use crate::error::Result;
use crate::orm::Instance;

/// Per-request state, attached to the async-graphql request as data.
#[derive(Default)]
pub struct RequestContext {
    /// Caller-supplied values, copied into find options through `context_to_options`
    pub values: IndexMap<String, Value>,
    /// Variables bound to the request, used to resolve deferred filter values
    pub variables: Variables,
    pub association_loader: Option<Arc<DataLoader<AssociationLoader>>>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn value(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn with_association_loader(mut self, loader: Arc<DataLoader<AssociationLoader>>) -> Self {
        self.association_loader = Some(loader);
        self
    }

    /// Install a fresh association loader on the tokio runtime
    pub fn with_batching(self) -> Self {
        self.with_association_loader(Arc::new(DataLoader::new(AssociationLoader, tokio::spawn)))
    }

    /// Attach this context to a request, capturing its variables.
    pub fn attach(mut self, request: Request) -> Request {
        self.variables = request.variables.clone();
        request.data(Arc::new(self))
    }
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("values", &self.values)
            .field("batching", &self.association_loader.is_some())
            .finish()
    }
}

/// Execution metadata of the field being resolved.
#[derive(Debug, Clone)]
pub struct ResolveInfo {
    pub field_name: String,
    pub return_type: TypeRef,
    pub selection: SimplifiedSelection,
    pub variables: Variables,
}

impl ResolveInfo {
    pub fn new(field_name: impl Into<String>, return_type: TypeRef) -> Self {
        Self {
            field_name: field_name.into(),
            return_type,
            selection: SimplifiedSelection::default(),
            variables: Variables::default(),
        }
    }

    /// Whether the return type is a list, looking through a non-null wrapper
    pub fn is_list(&self) -> bool {
        match &self.return_type {
            TypeRef::List(_) => true,
            TypeRef::NonNull(inner) => matches!(**inner, TypeRef::List(_)),
            TypeRef::Named(_) => false,
        }
    }

    /// Name of the innermost named type
    pub fn type_name(&self) -> &str {
        named_type(&self.return_type)
    }

    /// Whether the return type is a cursor connection
    pub fn is_connection(&self) -> bool {
        !self.is_list() && self.type_name().ends_with(CONNECTION_SUFFIX)
    }

    /// The node type of a connection return type, or the named type otherwise
    pub fn node_type_name(&self) -> &str {
        let name = self.type_name();
        if self.is_connection() {
            name.strip_suffix(CONNECTION_SUFFIX).unwrap_or(name)
        } else {
            name
        }
    }
}

fn named_type(ty: &TypeRef) -> &str {
    match ty {
        TypeRef::Named(name) => name,
        TypeRef::NonNull(inner) | TypeRef::List(inner) => named_type(inner),
    }
}

/// Everything a resolver invocation receives: `(source, args, context, info)`.
#[derive(Debug, Clone)]
pub struct ResolveParams {
    /// The parent instance, when the parent value is one
    pub source: Option<Instance>,
    pub args: IndexMap<String, Value>,
    pub context: Arc<RequestContext>,
    pub info: ResolveInfo,
}

impl ResolveParams {
    pub fn new(info: ResolveInfo) -> Self {
        Self {
            source: None,
            args: IndexMap::new(),
            context: Arc::new(RequestContext::default()),
            info,
        }
    }

    /// Collect the parameters of a dynamic-schema field invocation.
    pub fn from_context(ctx: &ResolverContext<'_>, return_type: &TypeRef) -> Result<Self> {
        let source = ctx.parent_value.try_downcast_ref::<Instance>().ok().cloned();

        let args = ctx
            .args
            .as_index_map()
            .iter()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect();

        let context = ctx
            .data_opt::<Arc<RequestContext>>()
            .cloned()
            .unwrap_or_default();

        let field = ctx.field();
        let info = ResolveInfo {
            field_name: field.name().to_string(),
            return_type: return_type.clone(),
            selection: SimplifiedSelection::from_selection_field(field)?,
            variables: context.variables.clone(),
        };
        tracing::trace!(field = %info.field_name, selection = ?info.selection, "Resolving field");

        Ok(Self {
            source,
            args,
            context,
            info,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_detection() {
        let info = ResolveInfo::new("users", TypeRef::named_nn_list_nn("User"));
        assert!(info.is_list());
        assert_eq!(info.type_name(), "User");

        let info = ResolveInfo::new("user", TypeRef::named("User"));
        assert!(!info.is_list());
    }

    #[test]
    fn test_connection_detection() {
        let info = ResolveInfo::new("tasks", TypeRef::named_nn("UserTaskConnection"));
        assert!(info.is_connection());
        assert_eq!(info.node_type_name(), "UserTask");

        let info = ResolveInfo::new("tasks", TypeRef::named_list("UserTaskConnection"));
        assert!(!info.is_connection());
        assert_eq!(info.node_type_name(), "UserTaskConnection");
    }
}
