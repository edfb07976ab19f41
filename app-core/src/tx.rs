// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

//! Transaction envelope helpers: sign bytes, hashing, signer recovery.

use alloy_primitives::{Address, B256, Signature, SignatureError, keccak256};
use alloy_sol_types::{Eip712Domain, SolStruct, SolValue};
use thiserror::Error;

use crate::address::{InvalidAddress, parse_address};
use crate::chain_id::{ChainId, MalformedChainId};
use crate::consts::{SIGNING_DOMAIN_NAME, SIGNING_DOMAIN_VERSION};
use crate::msg::{Msg, MsgError, signer_set};
use crate::wire::{AuthInfo, SignDoc, Tx, TxBody};

pub const SIGNATURE_LEN: usize = 65;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TxError {
    #[error("signature must be {SIGNATURE_LEN} bytes, got {0}")]
    SignatureLength(usize),
    #[error("invalid signature: {0}")]
    MalformedSignature(String),
    #[error("cannot recover signer: {0}")]
    Recovery(String),
}

/// Fixed domain for sign docs. The chain identifier is part of the signed body, not the
/// domain, so composite identifiers are covered verbatim.
pub fn signing_domain() -> Eip712Domain {
    Eip712Domain {
        name: Some(SIGNING_DOMAIN_NAME.into()),
        version: Some(SIGNING_DOMAIN_VERSION.into()),
        chain_id: None,
        verifying_contract: None,
        salt: None,
    }
}

/// Bytes a single signer signs: the EIP-712 hash of its sign doc.
pub fn sign_doc_hash(body: &TxBody, auth_info: &AuthInfo, account_number: u64) -> B256 {
    let doc = SignDoc {
        body: body.clone(),
        auth_info: auth_info.clone(),
        account_number,
    };
    doc.eip712_signing_hash(&signing_domain())
}

/// Recovers the address that produced a 65-byte `r || s || v` signature over `prehash`.
pub fn recover_signer(signature: &[u8], prehash: &B256) -> Result<Address, TxError> {
    if signature.len() != SIGNATURE_LEN {
        return Err(TxError::SignatureLength(signature.len()));
    }
    let signature = Signature::from_raw(signature).map_err(|err| match err {
        SignatureError::FromBytes(_) => TxError::SignatureLength(signature.len()),
        other => TxError::MalformedSignature(other.to_string()),
    })?;
    signature
        .recover_address_from_prehash(prehash)
        .map_err(|err| TxError::Recovery(err.to_string()))
}

impl Tx {
    pub fn hash(&self) -> B256 {
        keccak256(SolValue::abi_encode(self))
    }

    pub fn encoded_len(&self) -> usize {
        SolValue::abi_encode(self).len()
    }

    pub fn messages(&self) -> Result<Vec<Msg>, MsgError> {
        self.body.messages.iter().map(Msg::from_any).collect()
    }

    /// The identifier this transaction authenticates against.
    pub fn declared_chain_id(&self) -> Result<ChainId, MalformedChainId> {
        ChainId::parse(&self.body.chain_id)
    }

    pub fn signers(&self) -> Result<Vec<Address>, MsgError> {
        let msgs = self.messages()?;
        Ok(signer_set(&msgs)?)
    }

    /// Explicit payer, or the first signer when none is set.
    pub fn fee_payer(&self, signers: &[Address]) -> Result<Option<Address>, InvalidAddress> {
        if self.auth_info.fee.payer.is_empty() {
            return Ok(signers.first().copied());
        }
        parse_address(&self.auth_info.fee.payer).map(Some)
    }
}
