//! ORM seam
//!
//! Traits describing models and associations, the query descriptor passed
//! to them, and a SQLite implementation.

mod filter;
mod instance;
mod options;
mod traits;

#[cfg(feature = "sqlite")]
pub mod builder;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use filter::*;
pub use instance::*;
pub use options::*;
pub use traits::*;

#[cfg(feature = "sqlite")]
pub use sqlite::{SqliteAssociation, SqliteModel};
