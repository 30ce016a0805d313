//! DataLoader for batching association queries
//!
//! When a list of parents each resolve the same association, every parent's
//! resolver asks for its related rows separately. Routed through the loader,
//! those calls collapse into one query per (association, options) pair:
//!
//! 1. Each resolver calls `loader.load_one(AssociationKey::new(...))`
//! 2. DataLoader collects the keys issued within the same request tick
//! 3. Keys are grouped by association and find-options fingerprint, and each
//!    group runs one `get_by_join_values` query: `... WHERE fk IN (...)`
//! 4. Rows are handed back to the resolver whose join value they carry
//!
//! Paginated requests (limit or offset) are never batched, since the page
//! would apply to the whole batch rather than to each parent.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use async_graphql::Value;
use async_graphql::dataloader::Loader;
use indexmap::IndexMap;

use crate::error::Error;
use crate::orm::{Association, FindOptions, Instance, value_to_string};

// ============================================================================
// Association Key
// ============================================================================

/// Identifies one parent's request for one association.
#[derive(Clone)]
pub struct AssociationKey {
    pub association: Arc<dyn Association>,
    pub join: Value,
    pub options: Arc<FindOptions>,
    association_id: String,
    join_repr: String,
    fingerprint: String,
}

impl AssociationKey {
    pub fn new(association: Arc<dyn Association>, join: Value, options: Arc<FindOptions>) -> Self {
        Self {
            association_id: association.id(),
            join_repr: value_to_string(&join).unwrap_or_default(),
            fingerprint: options.fingerprint(),
            association,
            join,
            options,
        }
    }

    fn group(&self) -> (&str, &str) {
        (&self.association_id, &self.fingerprint)
    }
}

impl PartialEq for AssociationKey {
    fn eq(&self, other: &Self) -> bool {
        self.association_id == other.association_id
            && self.join_repr == other.join_repr
            && self.fingerprint == other.fingerprint
    }
}

impl Eq for AssociationKey {}

impl Hash for AssociationKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.association_id.hash(state);
        self.join_repr.hash(state);
        self.fingerprint.hash(state);
    }
}

impl std::fmt::Debug for AssociationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssociationKey")
            .field("association", &self.association_id)
            .field("join", &self.join_repr)
            .finish()
    }
}

// ============================================================================
// Association Loader
// ============================================================================

/// Batches association accessor calls within one request.
///
/// # Example
///
/// ```ignore
/// let loader = DataLoader::new(AssociationLoader, tokio::spawn);
/// let request = RequestContext::new()
///     .with_association_loader(Arc::new(loader))
///     .attach(Request::new(query));
/// ```
#[derive(Debug, Default, Clone, Copy)]
pub struct AssociationLoader;

impl Loader<AssociationKey> for AssociationLoader {
    type Value = Vec<Instance>;
    type Error = Arc<Error>;

    async fn load(
        &self,
        keys: &[AssociationKey],
    ) -> Result<HashMap<AssociationKey, Self::Value>, Self::Error> {
        let mut groups: IndexMap<(&str, &str), Vec<&AssociationKey>> = IndexMap::new();
        for key in keys {
            groups.entry(key.group()).or_default().push(key);
        }

        let mut results = HashMap::with_capacity(keys.len());
        for ((association_id, _), group) in groups {
            let first = group[0];
            tracing::debug!(
                association = association_id,
                parent_count = group.len(),
                "Batch loading association for {} parents",
                group.len()
            );

            let joins: Vec<Value> = group.iter().map(|key| key.join.clone()).collect();
            let rows = first
                .association
                .get_by_join_values(&joins, &first.options)
                .await
                .map_err(Arc::new)?;

            let mut grouped: HashMap<String, Vec<Instance>> = HashMap::new();
            for (join, instance) in rows {
                if let Some(repr) = value_to_string(&join) {
                    grouped.entry(repr).or_default().push(instance);
                }
            }

            for key in group {
                let rows = grouped.get(&key.join_repr).cloned().unwrap_or_default();
                results.insert(key.clone(), rows);
            }
        }

        Ok(results)
    }
}
