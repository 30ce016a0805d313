//! graphql-orm - GraphQL schemas and resolvers from ORM model metadata
//!
//! Models and associations are described through the [orm::Model] and
//! [orm::Association] traits. From them this crate derives async-graphql
//! dynamic schema fields, translates field arguments into
//! [orm::FindOptions], and resolves lists, single rows and Relay
//! connections, batching association lookups per request.
//!
//! ```rust,ignore
//! let config = Config::from_env()?;
//! let mut cache = TypeCache::new();
//!
//! let (task, enums) = attribute_fields(tasks.as_ref(), &Default::default(), &mut cache)?
//!     .apply(Object::new("Task"));
//! let user_tasks = ConnectionConfig::new("UserTask", "Task", TargetSpec::association(user_tasks))
//!     .config(&config)
//!     .build(&mut cache)?;
//! let user = Object::new("User").field(user_tasks.field("tasks"));
//!
//! let query = Object::new("Query").field(
//!     resolver(TargetSpec::model(users), ResolverOptions::from_config(&config))?
//!         .into_field_with_args("users", TypeRef::named_nn_list_nn("User"), default_list_args()),
//! );
//! ```

pub mod config;
pub mod error;
pub mod graphql;
pub mod orm;

pub use config::Config;
pub use error::{Error, Result};
