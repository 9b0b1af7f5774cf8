//! Validated names for projects, experiments and sets.
//!
//! A valid name is 3 to 50 characters long and contains only letters, digits,
//! hyphens, underscores, periods or colons. Names are compared case-sensitively.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::value_object::ValueObject;

const MIN_LEN: usize = 3;
const MAX_LEN: usize = 50;

/// Name of a project (unique within the system).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProjectName(String);

/// Name of an experiment (unique within its project).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ExperimentName(String);

/// Name of a resolvable set of ground-truth/inference pairs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SetName(String);

/// Check a raw name against the naming rules.
pub fn validate_name(kind: &str, raw: &str) -> Result<(), DomainError> {
    let len = raw.chars().count();
    if !(MIN_LEN..=MAX_LEN).contains(&len) {
        return Err(DomainError::validation(format!(
            "{kind} must be between {MIN_LEN} and {MAX_LEN} characters (got {len})"
        )));
    }

    if let Some(bad) = raw
        .chars()
        .find(|c| !(c.is_alphanumeric() || matches!(c, '-' | '_' | '.' | ':')))
    {
        return Err(DomainError::validation(format!(
            "{kind} must contain only letters, digits, hyphens, underscores, periods, or colons (found {bad:?})"
        )));
    }

    Ok(())
}

macro_rules! impl_name_newtype {
    ($t:ty, $kind:literal) => {
        impl $t {
            pub fn new(raw: impl Into<String>) -> Result<Self, DomainError> {
                let raw = raw.into();
                validate_name($kind, &raw)?;
                Ok(Self(raw))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl ValueObject for $t {}

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $t {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $t {
            type Error = DomainError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$t> for String {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }
    };
}

impl_name_newtype!(ProjectName, "project name");
impl_name_newtype!(ExperimentName, "experiment name");
impl_name_newtype!(SetName, "set name");
