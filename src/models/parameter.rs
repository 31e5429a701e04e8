//! Command parameter models.

use crate::models::{DbValue, ProviderKind};
use serde::{Deserialize, Serialize};

/// Direction of a command parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterDirection {
    #[default]
    Input,
    Output,
    InputOutput,
    ReturnValue,
}

impl ParameterDirection {
    /// Whether the parameter carries a value into the command.
    pub fn is_input(&self) -> bool {
        matches!(self, Self::Input | Self::InputOutput)
    }
}

/// A family-tagged command parameter.
///
/// `value` is `None` while unset. `Some(DbValue::Null)` is an explicit
/// database null; the two are kept apart because binding normalizes unset
/// input-output parameters to the null marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    provider: ProviderKind,
    name: String,
    direction: ParameterDirection,
    value: Option<DbValue>,
}

impl Parameter {
    /// Create an unconfigured parameter of the given family.
    ///
    /// Prefer `ProviderFactory::create_parameter`, which validates the provider.
    pub(crate) fn new(provider: ProviderKind) -> Self {
        Self {
            provider,
            name: String::new(),
            direction: ParameterDirection::Input,
            value: None,
        }
    }

    /// Set the parameter name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the parameter direction.
    pub fn with_direction(mut self, direction: ParameterDirection) -> Self {
        self.direction = direction;
        self
    }

    /// Set the parameter value.
    pub fn with_value(mut self, value: impl Into<DbValue>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn provider(&self) -> ProviderKind {
        self.provider
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn direction(&self) -> ParameterDirection {
        self.direction
    }

    /// The assigned value, or `None` if unset.
    pub fn value(&self) -> Option<&DbValue> {
        self.value.as_ref()
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn set_direction(&mut self, direction: ParameterDirection) {
        self.direction = direction;
    }

    pub fn set_value(&mut self, value: Option<DbValue>) {
        self.value = value;
    }

    /// Check if no value has been assigned.
    pub fn is_unset(&self) -> bool {
        self.value.is_none()
    }
}
