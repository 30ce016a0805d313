//! GraphQL side of the adapter
//!
//! Builds async-graphql dynamic schema pieces from ORM models and resolves
//! them through the ORM traits:
//!
//! - `attribute_fields` / `type_mapper` / `scalars`: object fields from attributes
//! - `args` / `filters`: field arguments to [crate::orm::FindOptions]
//! - `resolver`: field resolvers over models and associations
//! - `connection` / `pagination`: Relay connections and cursors
//! - `node`: the `Node` interface and global ids
//! - `loaders`: batching of association lookups
//! - `simplify`: merged selection trees

pub mod args;
pub mod attribute_fields;
pub mod connection;
pub mod context;
pub mod filters;
pub mod loaders;
pub mod node;
pub mod pagination;
pub mod resolver;
pub mod scalars;
pub mod simplify;
pub mod type_mapper;

pub use args::{args_to_find_options, default_args, default_list_args};
pub use attribute_fields::{AttributeFields, AttributeFieldsOptions, TypeCache, attribute_fields};
pub use connection::{ConnectionConfig, ConnectionDescriptor, OrderByEnum, resolve_edge};
pub use context::{RequestContext, ResolveInfo, ResolveParams};
pub use filters::replace_where_operators;
pub use loaders::{AssociationKey, AssociationLoader};
pub use node::{NodeRegistry, from_global_id, to_global_id};
pub use pagination::{Connection, Cursor, Edge, PageInfo, connection_from_array, decode_cursor, encode_cursor};
pub use resolver::{Resolved, Resolver, ResolverOptions, Target, TargetSpec, resolver};
pub use scalars::{date_scalar, json_scalar};
pub use simplify::{SimplifiedSelection, simplify_operation};
pub use type_mapper::{MappedType, TypeMapper};
