// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use alloy_primitives::{Address, hex};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use thiserror::Error;

const ADDRESS_LEN: usize = 20;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid address {value:?}: {reason}")]
pub struct InvalidAddress {
    pub value: String,
    pub reason: String,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid public key: {0}")]
pub struct InvalidPublicKey(pub String);

/// Parses the textual (`0x`-prefixed hex) account address.
pub fn parse_address(value: &str) -> Result<Address, InvalidAddress> {
    let invalid = |reason: String| InvalidAddress {
        value: value.to_string(),
        reason,
    };
    if !value.starts_with("0x") {
        return Err(invalid("address must start with 0x".to_string()));
    }
    let bytes = hex::decode(value).map_err(|err| invalid(format!("invalid hex: {err}")))?;
    if bytes.len() != ADDRESS_LEN {
        return Err(invalid(format!(
            "address must be {ADDRESS_LEN} bytes, got {}",
            bytes.len()
        )));
    }
    Ok(Address::from_slice(&bytes))
}

/// Derives the account address from a SEC1-encoded (compressed or not) secp256k1 key.
pub fn address_from_public_key(public_key: &[u8]) -> Result<Address, InvalidPublicKey> {
    let key = k256::PublicKey::from_sec1_bytes(public_key)
        .map_err(|err| InvalidPublicKey(err.to_string()))?;
    let uncompressed = key.to_encoded_point(false);
    Ok(Address::from_raw_public_key(&uncompressed.as_bytes()[1..]))
}
