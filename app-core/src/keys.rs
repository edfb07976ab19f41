// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

//! In-memory key custody: named secp256k1 keys that sign prehashed sign docs.

use std::collections::BTreeMap;
use std::fmt;

use alloy_primitives::{Address, B256, Bytes, Signature, hex, keccak256};
use k256::ecdsa::SigningKey;
use k256::ecdsa::signature::hazmat::PrehashSigner;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyringError {
    #[error("unknown key {0:?}")]
    UnknownKey(String),
    #[error("invalid key {name:?}: {reason}")]
    InvalidKey { name: String, reason: String },
    #[error("signing with {name:?} failed: {reason}")]
    Signing { name: String, reason: String },
}

#[derive(Clone, Default)]
pub struct Keyring {
    keys: BTreeMap<String, SigningKey>,
}

impl fmt::Debug for Keyring {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keyring")
            .field("keys", &self.keys.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Keyring {
    pub fn insert(&mut self, name: impl Into<String>, key: SigningKey) -> Address {
        let address = address_of(&key);
        self.keys.insert(name.into(), key);
        address
    }

    /// Imports a 32-byte secret given as hex (with or without `0x`).
    pub fn import_hex(&mut self, name: &str, secret: &str) -> Result<Address, KeyringError> {
        let invalid = |reason: String| KeyringError::InvalidKey {
            name: name.to_string(),
            reason,
        };
        let bytes = hex::decode(secret).map_err(|err| invalid(err.to_string()))?;
        let key = SigningKey::from_slice(&bytes).map_err(|err| invalid(err.to_string()))?;
        Ok(self.insert(name, key))
    }

    /// Deterministic key for `name`. Test networks and the dev genesis use it so that
    /// every process derives the same funded accounts.
    pub fn derive(&mut self, name: &str) -> Result<Address, KeyringError> {
        let seed = keccak256(format!("metro-keyring:{name}"));
        let key = SigningKey::from_slice(seed.as_slice()).map_err(|err| {
            KeyringError::InvalidKey {
                name: name.to_string(),
                reason: err.to_string(),
            }
        })?;
        Ok(self.insert(name, key))
    }

    pub fn address(&self, name: &str) -> Result<Address, KeyringError> {
        self.key(name).map(address_of)
    }

    /// Compressed SEC1 public key.
    pub fn public_key(&self, name: &str) -> Result<Bytes, KeyringError> {
        let key = self.key(name)?;
        let point = key.verifying_key().to_encoded_point(true);
        Ok(Bytes::copy_from_slice(point.as_bytes()))
    }

    /// Signs `prehash` and returns the 65-byte recoverable signature.
    pub fn sign(&self, name: &str, prehash: &B256) -> Result<Signature, KeyringError> {
        let key = self.key(name)?;
        let signing_error = |reason: String| KeyringError::Signing {
            name: name.to_string(),
            reason,
        };
        let k256_sig: k256::ecdsa::Signature = key
            .sign_prehash(prehash.as_slice())
            .map_err(|err| signing_error(err.to_string()))?;

        let signer = address_of(key);
        [false, true]
            .into_iter()
            .map(|parity| Signature::from_signature_and_parity(k256_sig, parity))
            .find(|candidate| {
                candidate
                    .recover_address_from_prehash(prehash)
                    .is_ok_and(|value| value == signer)
            })
            .ok_or_else(|| signing_error("no recoverable parity".to_string()))
    }

    fn key(&self, name: &str) -> Result<&SigningKey, KeyringError> {
        self.keys
            .get(name)
            .ok_or_else(|| KeyringError::UnknownKey(name.to_string()))
    }
}

fn address_of(key: &SigningKey) -> Address {
    let verifying = key.verifying_key().to_encoded_point(false);
    Address::from_raw_public_key(&verifying.as_bytes()[1..])
}
