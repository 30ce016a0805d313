//! Relay `Node` interface and global object identification.

use std::sync::Arc;

use async_graphql::Value;
use async_graphql::dynamic::{
    Field, FieldFuture, FieldValue, InputValue, Interface, InterfaceField, TypeRef,
};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use indexmap::IndexMap;

use crate::error::{Error, Result, config_error};
use crate::orm::{AttributeType, FilterValue, FindOptions, Instance, Model, WhereKey};

pub const NODE: &str = "Node";

/// Encode a type name and id as a global id
pub fn to_global_id(type_name: &str, id: &str) -> String {
    BASE64.encode(format!("{type_name}:{id}"))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalId {
    pub type_name: String,
    pub id: String,
}

/// Decode a global id produced by [to_global_id]
pub fn from_global_id(global_id: &str) -> Result<GlobalId> {
    let invalid = || Error::InvalidGlobalId(global_id.to_string());

    let decoded = BASE64.decode(global_id).map_err(|_| invalid())?;
    let decoded = String::from_utf8(decoded).map_err(|_| invalid())?;
    let (type_name, id) = decoded.split_once(':').ok_or_else(invalid)?;
    if type_name.is_empty() {
        return Err(invalid());
    }

    Ok(GlobalId {
        type_name: type_name.to_string(),
        id: id.to_string(),
    })
}

/// GraphQL types that implement `Node`, and the models behind them.
#[derive(Debug, Default)]
pub struct NodeRegistry {
    types: IndexMap<String, Arc<dyn Model>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, type_name: impl Into<String>, model: Arc<dyn Model>) -> Self {
        self.types.insert(type_name.into(), model);
        self
    }

    pub fn model(&self, type_name: &str) -> Option<&Arc<dyn Model>> {
        self.types.get(type_name)
    }

    /// The GraphQL type of an instance. Exactly one registered type must use its model.
    pub fn resolve_type(&self, instance: &Instance) -> Result<&str> {
        let mut matches = self
            .types
            .iter()
            .filter(|(_, model)| model.name() == instance.model)
            .map(|(name, _)| name.as_str());

        match (matches.next(), matches.next()) {
            (Some(name), None) => Ok(name),
            (None, _) => Err(config_error(format!(
                "no node type registered for model {}",
                instance.model
            ))),
            (Some(_), Some(_)) => Err(config_error(format!(
                "several node types registered for model {}",
                instance.model
            ))),
        }
    }

    /// Fetch the instance a global id points at
    pub async fn get_node(&self, global_id: &str) -> Result<Option<(String, Instance)>> {
        let GlobalId { type_name, id } = from_global_id(global_id)?;
        let model = self
            .model(&type_name)
            .ok_or_else(|| Error::InvalidGlobalId(global_id.to_string()))?;

        let pk = model.primary_key();
        let id = match model.attribute(pk).map(|attr| &attr.ty) {
            Some(AttributeType::Integer | AttributeType::BigInt) => id
                .parse::<i64>()
                .map(Value::from)
                .map_err(|_| Error::InvalidGlobalId(global_id.to_string()))?,
            _ => Value::String(id),
        };
        let options = FindOptions {
            r#where: Some(FilterValue::from_pairs([(
                WhereKey::field(pk),
                FilterValue::Scalar(id),
            )])),
            ..Default::default()
        };

        tracing::debug!(node_type = %type_name, "Fetching node");
        Ok(model
            .find_one(&options)
            .await?
            .map(|instance| (type_name, instance)))
    }

    /// The `Node` interface; implementing objects also call `.implement(NODE)`
    pub fn node_interface(&self) -> Interface {
        Interface::new(NODE)
            .description("An object with an ID")
            .field(InterfaceField::new("id", TypeRef::named_nn(TypeRef::ID)))
    }

    /// The root `node(id: ID!)` field
    pub fn node_field(self: &Arc<Self>) -> Field {
        let registry = self.clone();
        Field::new("node", TypeRef::named(NODE), move |ctx| {
            let registry = registry.clone();
            FieldFuture::new(async move {
                let id = ctx.args.try_get("id")?.string()?.to_string();
                Ok(registry
                    .get_node(&id)
                    .await?
                    .map(|(type_name, instance)| FieldValue::owned_any(instance).with_type(type_name)))
            })
        })
        .argument(InputValue::new("id", TypeRef::named_nn(TypeRef::ID)))
    }
}
