use serde::de::{self, Deserializer, Unexpected};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PackageError {
    #[error("Package {0} must not be empty")]
    EmptyField(&'static str),
}

/// Graph node identity: a package as named by one registry.
///
/// Equality and hashing cover all three fields, so the same package under
/// two different conditions produces two distinct nodes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Package {
    #[serde(deserialize_with = "non_empty")]
    pub name: String,
    #[serde(deserialize_with = "non_empty")]
    pub source: String, // e.g., "pypi", "memory"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

impl Package {
    /// Builds a package without checking its fields. See [`Package::try_new`].
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
            condition: None,
        }
    }

    /// Builds a package, rejecting an empty name or source.
    pub fn try_new(name: impl Into<String>, source: impl Into<String>) -> Result<Self, PackageError> {
        let package = Self::new(name, source);
        package.validate()?;
        Ok(package)
    }

    pub fn validate(&self) -> Result<(), PackageError> {
        if self.name.is_empty() {
            return Err(PackageError::EmptyField("name"));
        }
        if self.source.is_empty() {
            return Err(PackageError::EmptyField("source"));
        }
        Ok(())
    }

    /// Returns a copy of this package gated by `condition`.
    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    pub fn is_conditional(&self) -> bool {
        self.condition.is_some()
    }
}

impl fmt::Display for Package {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.name, self.source)?;
        if let Some(condition) = &self.condition {
            write!(f, "[{condition}]")?;
        }
        Ok(())
    }
}

/// Deserializes a string field that must carry at least one character.
pub(crate) fn non_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = String::deserialize(deserializer)?;
    if value.is_empty() {
        return Err(de::Error::invalid_value(Unexpected::Str(&value), &"a non-empty string"));
    }
    Ok(value)
}

/// Annotation attached to a graph node whose expansion did not go to plan.
///
/// Nodes without a status are either fully expanded or plain leaves. The
/// ordering is by severity: a node's status only ever moves up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    /// Children could not be fetched, or the depth limit cut expansion short.
    Incomplete,
    /// No provider could normalize the package.
    Invalid,
}

impl NodeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Incomplete => "incomplete",
            Self::Invalid => "invalid",
        }
    }

    /// Combines an existing status with a new one, never downgrading.
    pub fn escalate(current: Option<Self>, new: Self) -> Option<Self> {
        Some(current.map_or(new, |status| status.max(new)))
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How many more levels the crawler may descend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DepthBudget {
    #[default]
    Unbounded,
    Remaining(u32),
}

impl DepthBudget {
    /// Budget left for the next level down.
    pub fn descend(self) -> Self {
        match self {
            Self::Unbounded => Self::Unbounded,
            Self::Remaining(n) => Self::Remaining(n.saturating_sub(1)),
        }
    }

    pub fn is_exhausted(self) -> bool {
        matches!(self, Self::Remaining(0))
    }
}

impl From<Option<u32>> for DepthBudget {
    fn from(max_depth: Option<u32>) -> Self {
        max_depth.map_or(Self::Unbounded, Self::Remaining)
    }
}
