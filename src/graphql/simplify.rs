//! Selection simplifier
//!
//! Collapses a GraphQL selection set into a tree keyed by response key
//! (the alias when one was given, otherwise the field name). Fragment
//! spreads and inline fragments are merged into the level they appear at,
//! and a field selected more than once is merged into a single entry.
//!
//! ```graphql
//! { users { id ...more  u: name } }  fragment more on User { id tasks { title } }
//! ```
//!
//! simplifies to
//!
//! ```text
//! users
//! ├── id
//! ├── tasks
//! │   └── title
//! └── u  (key: name)
//! ```

use std::collections::HashMap;
use std::convert::Infallible;

use async_graphql::context::SelectionField;
use async_graphql::parser::Positioned;
use async_graphql::parser::types::{
    DocumentOperations, ExecutableDocument, Field, FragmentDefinition, OperationDefinition,
    Selection, SelectionSet,
};
use async_graphql::{Name, Value, Variables};
use indexmap::IndexMap;
use indexmap::map::Entry;

use crate::error::{Error, Result};

/// A merged selection tree.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SimplifiedSelection {
    /// Child selections keyed by response key
    pub fields: IndexMap<String, SimplifiedSelection>,
    pub args: IndexMap<String, Value>,
    /// The real field name, set only when the field was aliased
    pub key: Option<String>,
}

impl SimplifiedSelection {
    /// Merge another occurrence of the same response key into this one.
    ///
    /// Child fields are unioned recursively; arguments of `other` win.
    pub fn merge(&mut self, other: SimplifiedSelection) {
        for (name, value) in other.args {
            self.args.insert(name, value);
        }
        for (response_key, child) in other.fields {
            self.insert(response_key, child);
        }
        if other.key.is_some() {
            self.key = other.key;
        }
    }

    /// Add a child, merging into an existing entry with the same response key
    pub fn insert(&mut self, response_key: String, child: SimplifiedSelection) {
        match self.fields.entry(response_key) {
            Entry::Occupied(mut existing) => existing.get_mut().merge(child),
            Entry::Vacant(slot) => {
                slot.insert(child);
            }
        }
    }

    /// Whether a child with the given real field name is selected, under any alias
    pub fn requests(&self, field_name: &str) -> bool {
        self.fields
            .iter()
            .any(|(response_key, child)| child.key.as_deref().unwrap_or(response_key) == field_name)
    }

    pub fn is_leaf(&self) -> bool {
        self.fields.is_empty()
    }

    /// Simplify a field as async-graphql presents it at resolve time.
    ///
    /// Fragments are already inlined and variables already bound there.
    pub fn from_selection_field(field: SelectionField<'_>) -> Result<Self> {
        let mut selection = SimplifiedSelection {
            key: field.alias().map(|_| field.name().to_string()),
            ..Default::default()
        };
        let arguments = field
            .arguments()
            .map_err(|err| Error::Selection(err.message))?;
        for (name, value) in arguments {
            selection.args.insert(name.to_string(), value);
        }
        for child in field.selection_set() {
            let response_key = child.alias().unwrap_or(child.name()).to_string();
            selection.insert(response_key, Self::from_selection_field(child)?);
        }
        Ok(selection)
    }
}

/// Fragment definitions and bound variables of one request.
pub struct SimplifyContext<'a> {
    fragments: &'a HashMap<Name, Positioned<FragmentDefinition>>,
    variables: Variables,
    visiting: Vec<Name>,
}

impl<'a> SimplifyContext<'a> {
    pub fn new(document: &'a ExecutableDocument, variables: Variables) -> Self {
        Self {
            fragments: &document.fragments,
            variables,
            visiting: Vec::new(),
        }
    }

    pub fn variables(&self) -> &Variables {
        &self.variables
    }
}

/// Simplify a single field node, including its arguments and sub-selections.
pub fn simplify_field(field: &Field, ctx: &mut SimplifyContext<'_>) -> Result<SimplifiedSelection> {
    let mut selection = SimplifiedSelection {
        key: field.alias.as_ref().map(|_| field.name.node.to_string()),
        ..Default::default()
    };
    let variables = &ctx.variables;
    for (name, value) in &field.arguments {
        let value = value.node.clone().into_const_with(|var| {
            Ok::<_, Infallible>(variables.get(&var).cloned().unwrap_or(Value::Null))
        });
        let value = match value {
            Ok(value) => value,
            Err(never) => match never {},
        };
        selection.args.insert(name.node.to_string(), value);
    }
    simplify_into(&field.selection_set.node, ctx, &mut selection)?;
    Ok(selection)
}

/// Simplify a selection set into a selection holding only `fields`.
pub fn simplify_selection_set(
    set: &SelectionSet,
    ctx: &mut SimplifyContext<'_>,
) -> Result<SimplifiedSelection> {
    let mut selection = SimplifiedSelection::default();
    simplify_into(set, ctx, &mut selection)?;
    Ok(selection)
}

fn simplify_into(
    set: &SelectionSet,
    ctx: &mut SimplifyContext<'_>,
    parent: &mut SimplifiedSelection,
) -> Result<()> {
    for item in &set.items {
        match &item.node {
            Selection::Field(field) => {
                let response_key = field.node.response_key().node.to_string();
                let child = simplify_field(&field.node, ctx)?;
                parent.insert(response_key, child);
            }
            Selection::InlineFragment(fragment) => {
                simplify_into(&fragment.node.selection_set.node, ctx, parent)?;
            }
            Selection::FragmentSpread(spread) => {
                let name = &spread.node.fragment_name.node;
                let fragments = ctx.fragments;
                let definition = fragments
                    .get(name)
                    .ok_or_else(|| Error::Selection(format!("unknown fragment `{name}`")))?;
                if ctx.visiting.contains(name) {
                    return Err(Error::Selection(format!(
                        "fragment `{name}` spreads itself"
                    )));
                }
                ctx.visiting.push(name.clone());
                let result = simplify_into(&definition.node.selection_set.node, ctx, parent);
                ctx.visiting.pop();
                result?;
            }
        }
    }
    Ok(())
}

/// Simplify the root selection of an operation in a parsed document.
///
/// Variables missing from `variables` take the operation's declared defaults.
pub fn simplify_operation(
    document: &ExecutableDocument,
    operation_name: Option<&str>,
    variables: Variables,
) -> Result<SimplifiedSelection> {
    let operation = find_operation(document, operation_name)?;

    let mut variables = variables;
    for definition in &operation.variable_definitions {
        let name = &definition.node.name.node;
        if variables.get(name).is_none() {
            if let Some(default) = &definition.node.default_value {
                variables.insert(name.clone(), default.node.clone());
            }
        }
    }

    let mut ctx = SimplifyContext::new(document, variables);
    let selection = simplify_selection_set(&operation.selection_set.node, &mut ctx)?;
    tracing::trace!(?selection, "Simplified operation selection");
    Ok(selection)
}

fn find_operation<'d>(
    document: &'d ExecutableDocument,
    operation_name: Option<&str>,
) -> Result<&'d OperationDefinition> {
    match (&document.operations, operation_name) {
        (DocumentOperations::Single(op), _) => Ok(&op.node),
        (DocumentOperations::Multiple(ops), Some(name)) => ops
            .get(name)
            .map(|op| &op.node)
            .ok_or_else(|| Error::Selection(format!("unknown operation `{name}`"))),
        (DocumentOperations::Multiple(ops), None) if ops.len() == 1 => ops
            .values()
            .next()
            .map(|op| &op.node)
            .ok_or_else(|| Error::Selection("document has no operation".into())),
        (DocumentOperations::Multiple(_), None) => Err(Error::Selection(
            "an operation name is required when the document has several".into(),
        )),
    }
}
