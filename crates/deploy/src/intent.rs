//! Deployment intents and constructor argument references.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{artifact::ForgeArtifact, error::DeployError};

/// A property of another deployment in the same batch that can be referenced.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum DerivedField {
    /// The deterministic address of the referenced deployment.
    Address,
}

/// A constructor argument, either a literal or a reference to another deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ConstructorArg {
    /// A literal value, ABI-encoded as-is.
    Value { value: Value },
    /// Substituted with `field` of deployment `id` once it is resolved.
    Reference { id: String, field: DerivedField },
}

impl ConstructorArg {
    /// Parse a raw argument from a batch document.
    ///
    /// A string of the exact form `{{<id>.<field>}}` is a reference, everything
    /// else is a literal. A reference to an unknown field is rejected.
    pub fn parse(raw: Value) -> Result<Self, DeployError> {
        let Some(reference) = raw.as_str().and_then(split_reference) else {
            return Ok(Self::Value { value: raw });
        };

        let (id, field) = reference;
        let field = field.parse::<DerivedField>().map_err(|_| {
            DeployError::invalid_input(format!(
                "Invalid reference target '{}' in {}",
                field, raw
            ))
        })?;

        Ok(Self::Reference {
            id: id.to_string(),
            field,
        })
    }
}

/// Split `{{id.field}}` into `(id, field)`.
///
/// The id may not contain a dot, the field may not contain a closing brace.
fn split_reference(s: &str) -> Option<(&str, &str)> {
    let inner = s.strip_prefix("{{")?.strip_suffix("}}")?;
    let (id, field) = inner.split_once('.')?;

    if id.is_empty() || field.is_empty() || field.contains('}') {
        return None;
    }

    Some((id, field))
}

/// What the user asked to deploy.
#[derive(Debug, Clone)]
pub struct DeploymentIntent {
    /// Unique within a batch.
    pub id: String,
    /// Salt string as given by the user.
    pub salt: String,
    /// Ordered constructor arguments.
    pub constructor_args: Vec<ConstructorArg>,
    /// Bytecode and ABI used to build the init code.
    pub artifact: Arc<ForgeArtifact>,
}

impl DeploymentIntent {
    pub fn new(id: impl Into<String>, salt: impl Into<String>, artifact: Arc<ForgeArtifact>) -> Self {
        Self {
            id: id.into(),
            salt: salt.into(),
            constructor_args: Vec::new(),
            artifact,
        }
    }

    /// Append a constructor argument.
    pub fn arg(mut self, arg: ConstructorArg) -> Self {
        self.constructor_args.push(arg);
        self
    }

    /// Append a literal constructor argument.
    pub fn value(self, value: impl Into<Value>) -> Self {
        self.arg(ConstructorArg::Value {
            value: value.into(),
        })
    }

    /// Append a reference to another deployment's address.
    pub fn address_of(self, id: impl Into<String>) -> Self {
        self.arg(ConstructorArg::Reference {
            id: id.into(),
            field: DerivedField::Address,
        })
    }
}
