//! ORM attribute types to GraphQL types.
//!
//! Custom mappings are passed in explicitly when the mapper is built, and
//! consulted before the built-in table.

use std::fmt;
use std::sync::Arc;

use async_graphql::dynamic::TypeRef;

use super::scalars::{DATE, JSON};
use crate::error::{Error, Result};
use crate::orm::AttributeType;

/// One value of a synthesized enum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumValue {
    /// GraphQL-safe name
    pub name: String,
    /// Value as stored by the ORM
    pub raw: String,
}

/// The GraphQL shape of an attribute type.
#[derive(Debug, Clone, PartialEq)]
pub enum MappedType {
    Named(String),
    /// An enum that still needs a type name
    Enum(Vec<EnumValue>),
    List(Box<MappedType>),
}

impl MappedType {
    pub fn named(name: impl Into<String>) -> Self {
        MappedType::Named(name.into())
    }

    /// Nullable type reference; `enum_name` names a synthesized enum.
    pub fn type_ref(&self, enum_name: &str) -> TypeRef {
        match self {
            MappedType::Named(name) => TypeRef::named(name.clone()),
            MappedType::Enum(_) => TypeRef::named(enum_name.to_string()),
            MappedType::List(inner) => TypeRef::List(Box::new(inner.type_ref(enum_name))),
        }
    }

    /// The enum values, if this is (a list of) a synthesized enum
    pub fn enum_values(&self) -> Option<&[EnumValue]> {
        match self {
            MappedType::Enum(values) => Some(values),
            MappedType::List(inner) => inner.enum_values(),
            MappedType::Named(_) => None,
        }
    }
}

pub type CustomMapper = Arc<dyn Fn(&AttributeType) -> Option<MappedType> + Send + Sync>;

/// Maps attribute types to GraphQL types.
#[derive(Clone, Default)]
pub struct TypeMapper {
    custom: Option<CustomMapper>,
}

impl fmt::Debug for TypeMapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeMapper")
            .field("custom", &self.custom.is_some())
            .finish()
    }
}

impl TypeMapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `mapper` first; it returns `None` to fall back to the built-in mapping.
    pub fn with_custom(
        mapper: impl Fn(&AttributeType) -> Option<MappedType> + Send + Sync + 'static,
    ) -> Self {
        Self {
            custom: Some(Arc::new(mapper)),
        }
    }

    pub fn map(&self, ty: &AttributeType) -> Result<MappedType> {
        if let Some(custom) = &self.custom {
            if let Some(mapped) = custom(ty) {
                return Ok(mapped);
            }
        }

        let mapped = match ty {
            AttributeType::Boolean => MappedType::named(TypeRef::BOOLEAN),
            AttributeType::Integer => MappedType::named(TypeRef::INT),
            // BIGINT and DECIMAL can exceed what Int and Float represent exactly
            AttributeType::BigInt
            | AttributeType::Decimal
            | AttributeType::String
            | AttributeType::Text
            | AttributeType::Char
            | AttributeType::Uuid
            | AttributeType::Time
            | AttributeType::DateOnly => MappedType::named(TypeRef::STRING),
            AttributeType::Float | AttributeType::Real | AttributeType::Double => {
                MappedType::named(TypeRef::FLOAT)
            }
            AttributeType::Date => MappedType::named(DATE),
            AttributeType::Json | AttributeType::Jsonb => MappedType::named(JSON),
            AttributeType::Enum(values) => MappedType::Enum(
                values
                    .iter()
                    .map(|raw| EnumValue {
                        name: sanitize_enum_value(raw),
                        raw: raw.clone(),
                    })
                    .collect(),
            ),
            AttributeType::Array(inner) => MappedType::List(Box::new(self.map(inner)?)),
            AttributeType::Virtual(Some(inner)) => self.map(inner)?,
            AttributeType::Virtual(None) => MappedType::named(TypeRef::STRING),
            AttributeType::Blob | AttributeType::Geometry => {
                return Err(Error::UnmappableType(ty.name()));
            }
        };
        Ok(mapped)
    }
}

/// Turn a stored enum value into a valid GraphQL enum value name.
///
/// `"in progress"` becomes `inProgress`, `"1st"` becomes `_1st`.
pub fn sanitize_enum_value(raw: &str) -> String {
    let words: Vec<&str> = raw
        .trim()
        .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .filter(|w| !w.is_empty())
        .collect();

    let mut name = String::new();
    for (i, word) in words.iter().enumerate() {
        if i == 0 {
            name.push_str(word);
        } else {
            let mut chars = word.chars();
            if let Some(first) = chars.next() {
                name.push(first.to_ascii_uppercase());
                name.push_str(chars.as_str());
            }
        }
    }

    if name.is_empty() {
        return "_".to_string();
    }
    if name.starts_with(|c: char| c.is_ascii_digit()) {
        name.insert(0, '_');
    }
    name
}
