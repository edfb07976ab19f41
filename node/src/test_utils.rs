// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use alloy_primitives::U256;
use app_core::chain_id::ChainId;
use app_core::consts::native_coin;
use app_core::genesis::{ChainParams, Genesis};
use app_core::keys::Keyring;
use app_core::msg::Msg;
use app_core::tx::sign_doc_hash;
use app_core::{AuthInfo, Fee, SignerInfo, Tx, TxBody};
use tempfile::TempDir;

pub(crate) struct Fixture {
    _dir: TempDir,
    pub path: String,
    pub keyring: Keyring,
    pub genesis: Genesis,
}

/// A fresh database path plus a genesis funding a derived `alice` key.
pub(crate) fn fixture(name: &str) -> Fixture {
    let dir = tempfile::Builder::new()
        .prefix(&format!("metro-{name}-"))
        .tempdir()
        .expect("create temp dir");
    let path = dir.path().join("node.sqlite").to_string_lossy().into_owned();
    let mut keyring = Keyring::default();
    let alice = keyring.derive("alice").expect("derive alice");
    let chain_id = ChainId::parse("metro").expect("chain id");
    let genesis = Genesis::new(chain_id, ChainParams::default())
        .with_account(alice, vec![native_coin(U256::from(1_000_000_000_u64))]);
    Fixture {
        _dir: dir,
        path,
        keyring,
        genesis,
    }
}

/// Signs a single-message tx from `alice` (account number 0).
pub(crate) fn signed_tx(keyring: &Keyring, chain_id: &str, sequence: u64, msg: Msg) -> Tx {
    let body = TxBody {
        messages: vec![msg.to_any()],
        memo: String::new(),
        timeout_height: 0,
        chain_id: chain_id.to_string(),
    };
    let auth_info = AuthInfo {
        signer_infos: vec![SignerInfo {
            public_key: keyring.public_key("alice").expect("public key"),
            sequence,
        }],
        fee: Fee {
            amount: vec![native_coin(U256::from(1_000_u64))],
            gas_limit: 200_000,
            payer: String::new(),
        },
    };
    let hash = sign_doc_hash(&body, &auth_info, 0);
    let signature = keyring.sign("alice", &hash).expect("sign");
    Tx {
        body,
        auth_info,
        signatures: vec![signature.as_bytes().to_vec().into()],
    }
}
