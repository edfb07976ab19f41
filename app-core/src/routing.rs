// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

//! Execution routing: decides per transaction whether embedded messages run against
//! base-chain state or are only charged and ordered for a destination chain.
//!
//! The decision is a pure function of the declared identifier and the base chain's own
//! identifier, so every replica and every destination-chain observer classifies a
//! transaction the same way.

use thiserror::Error;

use crate::chain_id::ChainId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Addressed to the base chain: handlers run.
    Simple,
    /// Sequenced for `destination`: fee charged, handlers skipped.
    Routed { destination: String },
}

impl Route {
    pub fn is_routed(&self) -> bool {
        matches!(self, Self::Routed { .. })
    }

    pub fn destination(&self) -> Option<&str> {
        match self {
            Self::Simple => None,
            Self::Routed { destination } => Some(destination),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("chain mismatch: expected {expected}, got {got}")]
pub struct ChainMismatch {
    pub expected: String,
    pub got: String,
}

pub fn route_tx(base_chain_id: &ChainId, declared: &ChainId) -> Result<Route, ChainMismatch> {
    let (primary, secondary, composite) = declared.decompose();
    if primary != base_chain_id.primary() {
        return Err(ChainMismatch {
            expected: base_chain_id.primary().to_string(),
            got: primary.to_string(),
        });
    }
    if composite {
        return Ok(Route::Routed {
            destination: secondary.to_string(),
        });
    }
    Ok(Route::Simple)
}

#[cfg(test)]
mod tests {
    use super::{ChainMismatch, Route, route_tx};
    use crate::chain_id::ChainId;

    fn id(value: &str) -> ChainId {
        ChainId::parse(value).expect("valid chain id")
    }

    #[test]
    fn simple_identifier_executes() {
        assert_eq!(route_tx(&id("metro"), &id("metro")), Ok(Route::Simple));
    }

    #[test]
    fn composite_identifier_is_routed_to_its_secondary() {
        let route = route_tx(&id("metro"), &id("metro|taco")).expect("routed");
        assert!(route.is_routed());
        assert_eq!(route.destination(), Some("taco"));
    }

    #[test]
    fn foreign_primary_is_rejected() {
        for declared in ["other", "other|metro", "metro2|taco"] {
            assert_eq!(
                route_tx(&id("metro"), &id(declared)),
                Err(ChainMismatch {
                    expected: "metro".to_string(),
                    got: id(declared).primary().to_string(),
                })
            );
        }
    }
}
