//! GraphQL fields generated from model attributes.

use std::collections::HashSet;

use async_graphql::dynamic::{Enum, EnumItem, Field, FieldFuture, FieldValue, Object, TypeRef};
use async_graphql::{Name, Value};
use convert_case::{Case, Casing};
use indexmap::IndexMap;

use super::node::to_global_id;
use super::type_mapper::{EnumValue, TypeMapper};
use crate::error::Result;
use crate::orm::{Instance, Model};

/// Names of the types generated so far during schema construction.
///
/// Owned by the caller and passed to every generator, so a type shared by
/// several fields or connections is only emitted once.
#[derive(Debug, Default)]
pub struct TypeCache {
    names: HashSet<String>,
}

impl TypeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `name`; returns `false` if it was already taken
    pub fn claim(&mut self, name: impl Into<String>) -> bool {
        self.names.insert(name.into())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }
}

#[derive(Debug, Clone, Default)]
pub struct AttributeFieldsOptions {
    /// Attributes to leave out
    pub exclude: Vec<String>,
    /// Only generate fields for these attributes
    pub only: Option<Vec<String>>,
    /// Add a global `id: ID!` field derived from the primary key
    pub global_id: bool,
    /// Field names to use instead of attribute names
    pub map: IndexMap<String, String>,
    pub comment_to_description: bool,
    /// Make every field nullable
    pub allow_null: bool,
    pub type_mapper: TypeMapper,
}

impl AttributeFieldsOptions {
    fn includes(&self, attribute: &str) -> bool {
        if self.exclude.iter().any(|e| e == attribute) {
            return false;
        }
        match &self.only {
            Some(only) => only.iter().any(|o| o == attribute),
            None => true,
        }
    }
}

#[derive(Debug, Clone)]
enum FieldSource {
    Attribute {
        name: String,
        /// Raw to sanitized enum values, when the attribute is an enum
        enum_values: Option<Vec<EnumValue>>,
    },
    GlobalId {
        type_name: String,
        primary_key: String,
    },
}

/// One generated field.
#[derive(Debug, Clone)]
pub struct AttributeField {
    pub name: String,
    pub ty: TypeRef,
    pub description: Option<String>,
    source: FieldSource,
}

impl AttributeField {
    pub fn into_field(self) -> Field {
        let source = self.source;
        let mut field = Field::new(self.name, self.ty, move |ctx| {
            let source = source.clone();
            FieldFuture::new(async move {
                let instance = ctx.parent_value.try_downcast_ref::<Instance>()?;
                Ok(field_value(instance, &source).map(FieldValue::value))
            })
        });
        if let Some(description) = self.description {
            field = field.description(description);
        }
        field
    }
}

fn field_value(instance: &Instance, source: &FieldSource) -> Option<Value> {
    match source {
        FieldSource::Attribute { name, enum_values } => {
            let value = instance.get(name)?.clone();
            match enum_values {
                Some(values) => Some(to_enum(value, values)),
                None => match value {
                    Value::Null => None,
                    value => Some(value),
                },
            }
        }
        FieldSource::GlobalId {
            type_name,
            primary_key,
        } => instance
            .value_string(primary_key)
            .map(|id| Value::String(to_global_id(type_name, &id))),
    }
}

fn to_enum(value: Value, values: &[EnumValue]) -> Value {
    match value {
        Value::String(raw) => values
            .iter()
            .find(|v| v.raw == raw)
            .map(|v| Value::Enum(Name::new(&v.name)))
            .unwrap_or(Value::Null),
        Value::List(items) => Value::List(items.into_iter().map(|v| to_enum(v, values)).collect()),
        other => other,
    }
}

/// The generated fields, plus enum types that still need registering.
#[derive(Debug, Default)]
pub struct AttributeFields {
    pub fields: IndexMap<String, AttributeField>,
    pub types: Vec<Enum>,
}

impl AttributeFields {
    /// Add every field to `object`
    pub fn apply(self, object: Object) -> (Object, Vec<Enum>) {
        let object = self
            .fields
            .into_values()
            .fold(object, |object, field| object.field(field.into_field()));
        (object, self.types)
    }
}

/// Generate one field per model attribute.
///
/// Enum attributes get an enum type named `{Model}{Attribute}EnumType`;
/// `cache` ensures each is returned for registration only once.
pub fn attribute_fields(
    model: &dyn Model,
    options: &AttributeFieldsOptions,
    cache: &mut TypeCache,
) -> Result<AttributeFields> {
    let mut result = AttributeFields::default();

    for attribute in model.attributes() {
        if !options.includes(&attribute.name) {
            continue;
        }

        let mapped = options.type_mapper.map(&attribute.ty)?;
        let enum_name = format!(
            "{}{}EnumType",
            model.name(),
            attribute.name.to_case(Case::Pascal)
        );
        let enum_values = mapped.enum_values().map(<[EnumValue]>::to_vec);
        if let Some(values) = &enum_values {
            if cache.claim(enum_name.clone()) {
                let ty = values
                    .iter()
                    .fold(Enum::new(&enum_name), |ty, value| ty.item(EnumItem::new(&value.name)));
                result.types.push(ty);
            }
        }

        let mut ty = mapped.type_ref(&enum_name);
        if !attribute.allow_null && !options.allow_null {
            ty = TypeRef::NonNull(Box::new(ty));
        }

        let name = options
            .map
            .get(&attribute.name)
            .cloned()
            .unwrap_or_else(|| attribute.name.clone());
        let description = attribute
            .comment
            .clone()
            .filter(|_| options.comment_to_description);

        result.fields.insert(
            name.clone(),
            AttributeField {
                name,
                ty,
                description,
                source: FieldSource::Attribute {
                    name: attribute.name.clone(),
                    enum_values,
                },
            },
        );
    }

    if options.global_id {
        result.fields.insert(
            "id".to_string(),
            AttributeField {
                name: "id".to_string(),
                ty: TypeRef::named_nn(TypeRef::ID),
                description: Some("The globally unique ID of this object".to_string()),
                source: FieldSource::GlobalId {
                    type_name: model.name().to_string(),
                    primary_key: model.primary_key().to_string(),
                },
            },
        );
    }

    Ok(result)
}
