// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

//! Chain identifiers: `primary` or `primary|secondary`.
//!
//! The composite form lets one signature authenticate against the base chain (`primary`)
//! while naming the destination chain (`secondary`) the payload is sequenced for.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::consts::{CHAIN_ID_SEPARATOR, MAX_CHAIN_ID_COMPONENT_LEN};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("malformed chain identifier {value:?}: {reason}")]
pub struct MalformedChainId {
    pub value: String,
    pub reason: &'static str,
}

impl MalformedChainId {
    fn new(value: &str, reason: &'static str) -> Self {
        Self {
            value: value.to_string(),
            reason,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChainId {
    raw: String,
    // Byte offset of the separator when composite.
    separator_at: Option<usize>,
}

impl ChainId {
    /// Builds `primary|secondary`, or plain `primary` when `secondary` is empty so that
    /// ordinary transactions sign over exactly the base-chain identifier.
    pub fn compose(primary: &str, secondary: &str) -> Result<Self, MalformedChainId> {
        validate_component(primary, primary)?;
        if secondary.is_empty() {
            return Ok(Self {
                raw: primary.to_string(),
                separator_at: None,
            });
        }

        let raw = format!("{primary}{CHAIN_ID_SEPARATOR}{secondary}");
        validate_component(secondary, &raw)?;
        Ok(Self {
            raw,
            separator_at: Some(primary.len()),
        })
    }

    pub fn parse(value: &str) -> Result<Self, MalformedChainId> {
        let mut parts = value.split(CHAIN_ID_SEPARATOR);
        let primary = parts.next().unwrap_or_default();
        let secondary = parts.next();
        if parts.next().is_some() {
            return Err(MalformedChainId::new(value, "more than one separator"));
        }

        validate_component(primary, value)?;
        match secondary {
            None => Ok(Self {
                raw: value.to_string(),
                separator_at: None,
            }),
            Some(secondary) => {
                validate_component(secondary, value)?;
                Ok(Self {
                    raw: value.to_string(),
                    separator_at: Some(primary.len()),
                })
            }
        }
    }

    /// Returns `(primary, secondary, is_composite)`; `secondary` is empty for simple ids.
    pub fn decompose(&self) -> (&str, &str, bool) {
        match self.separator_at {
            Some(at) => (
                &self.raw[..at],
                &self.raw[at + CHAIN_ID_SEPARATOR.len()..],
                true,
            ),
            None => (self.raw.as_str(), "", false),
        }
    }

    pub fn primary(&self) -> &str {
        self.decompose().0
    }

    pub fn secondary(&self) -> Option<&str> {
        let (_, secondary, composite) = self.decompose();
        composite.then_some(secondary)
    }

    pub fn is_composite(&self) -> bool {
        self.separator_at.is_some()
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

/// Free-function form of [`ChainId::compose`].
pub fn compose(primary: &str, secondary: &str) -> Result<ChainId, MalformedChainId> {
    ChainId::compose(primary, secondary)
}

/// Parses `value` and returns its owned `(primary, secondary, is_composite)` parts.
pub fn decompose(value: &str) -> Result<(String, String, bool), MalformedChainId> {
    let chain_id = ChainId::parse(value)?;
    let (primary, secondary, composite) = chain_id.decompose();
    Ok((primary.to_string(), secondary.to_string(), composite))
}

fn validate_component(component: &str, whole: &str) -> Result<(), MalformedChainId> {
    if component.is_empty() {
        return Err(MalformedChainId::new(whole, "empty component"));
    }
    if component.contains(CHAIN_ID_SEPARATOR) {
        return Err(MalformedChainId::new(whole, "component contains the separator"));
    }
    if component.len() > MAX_CHAIN_ID_COMPONENT_LEN {
        return Err(MalformedChainId::new(whole, "component too long"));
    }
    if !component
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'))
    {
        return Err(MalformedChainId::new(whole, "illegal character"));
    }
    Ok(())
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for ChainId {
    type Err = MalformedChainId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ChainId {
    type Error = MalformedChainId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ChainId> for String {
    fn from(value: ChainId) -> Self {
        value.raw
    }
}
