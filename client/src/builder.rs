// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

//! Signed transaction construction.
//!
//! A [`Signer`] owns one key, the identifiers it may declare and the cached account state
//! of that key. Envelope settings come from a [`TxBuilder`] assembled out of functional
//! options; the `routed` flag of [`Signer::build_signed_tx`] alone decides whether the
//! declared identifier is `base` or `base|destination`.

use alloy_primitives::{Address, U256};
use app_core::chain_id::ChainId;
use app_core::consts::native_coin;
use app_core::keys::Keyring;
use app_core::msg::{Msg, signer_set};
use app_core::tx::sign_doc_hash;
use app_core::{AuthInfo, Coin, Fee, SignerInfo, Tx, TxBody};
use tracing::debug;

use crate::account::AccountState;
use crate::error::BuilderError;
use crate::rpc::AccountQuerier;

pub const DEFAULT_FEE_AMOUNT: u64 = 2_000;
pub const DEFAULT_GAS_LIMIT: u64 = 200_000;

#[derive(Debug, Clone, PartialEq)]
pub struct TxBuilderOptions {
    pub fee_amount: Vec<Coin>,
    // Empty on the wire when unset: the first signer pays.
    pub fee_payer: Option<Address>,
    pub gas_limit: u64,
    pub gas_adjustment: f64,
    pub memo: String,
    // Zero disables the timeout.
    pub timeout_height: u64,
}

impl Default for TxBuilderOptions {
    fn default() -> Self {
        Self {
            fee_amount: vec![native_coin(U256::from(DEFAULT_FEE_AMOUNT))],
            fee_payer: None,
            gas_limit: DEFAULT_GAS_LIMIT,
            gas_adjustment: 1.0,
            memo: String::new(),
            timeout_height: 0,
        }
    }
}

pub type TxBuilderOption = Box<dyn FnOnce(&mut TxBuilderOptions) + Send>;

pub fn set_fee_amount(amount: Vec<Coin>) -> TxBuilderOption {
    Box::new(move |options| options.fee_amount = amount)
}

pub fn set_fee_payer(payer: Address) -> TxBuilderOption {
    Box::new(move |options| options.fee_payer = Some(payer))
}

pub fn set_gas_limit(gas_limit: u64) -> TxBuilderOption {
    Box::new(move |options| options.gas_limit = gas_limit)
}

/// Multiplies the gas limit, rounding up.
pub fn set_gas_adjustment(adjustment: f64) -> TxBuilderOption {
    Box::new(move |options| options.gas_adjustment = adjustment)
}

pub fn set_memo(memo: impl Into<String>) -> TxBuilderOption {
    let memo = memo.into();
    Box::new(move |options| options.memo = memo)
}

pub fn set_timeout_height(height: u64) -> TxBuilderOption {
    Box::new(move |options| options.timeout_height = height)
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TxBuilder {
    options: TxBuilderOptions,
}

impl TxBuilder {
    /// Applies `options` in order over the defaults; later options win.
    pub fn new(options: impl IntoIterator<Item = TxBuilderOption>) -> Self {
        let mut resolved = TxBuilderOptions::default();
        for option in options {
            option(&mut resolved);
        }
        Self { options: resolved }
    }

    pub fn options(&self) -> &TxBuilderOptions {
        &self.options
    }

    /// Gas limit placed in the fee, after adjustment.
    pub fn gas_limit(&self) -> Result<u64, BuilderError> {
        let adjustment = self.options.gas_adjustment;
        if !adjustment.is_finite() || adjustment <= 0.0 {
            return Err(BuilderError::InvalidGasAdjustment(adjustment));
        }
        let adjusted = (self.options.gas_limit as f64 * adjustment).ceil();
        if adjusted >= u64::MAX as f64 {
            return Ok(u64::MAX);
        }
        Ok(adjusted as u64)
    }

    fn envelope(
        &self,
        msgs: &[Msg],
        chain_id: &ChainId,
        signer_info: SignerInfo,
    ) -> Result<(TxBody, AuthInfo), BuilderError> {
        let body = TxBody {
            messages: msgs.iter().map(Msg::to_any).collect(),
            memo: self.options.memo.clone(),
            timeout_height: self.options.timeout_height,
            chain_id: chain_id.to_string(),
        };
        let auth_info = AuthInfo {
            signer_infos: vec![signer_info],
            fee: Fee {
                amount: self.options.fee_amount.clone(),
                gas_limit: self.gas_limit()?,
                payer: self
                    .options
                    .fee_payer
                    .map(|payer| payer.to_string())
                    .unwrap_or_default(),
            },
        };
        Ok((body, auth_info))
    }
}

/// One signing session: a named key, the identifiers it declares and its account cache.
pub struct Signer<Q> {
    keyring: Keyring,
    key_name: String,
    base_chain_id: ChainId,
    routed_chain_id: Option<ChainId>,
    account: AccountState,
    querier: Q,
}

impl<Q: AccountQuerier> Signer<Q> {
    /// `destination` may be empty when the signer never sends routed transactions.
    pub fn new(
        keyring: Keyring,
        key_name: &str,
        base_chain_id: &str,
        destination: &str,
        querier: Q,
    ) -> Result<Self, BuilderError> {
        let address = keyring
            .address(key_name)
            .map_err(BuilderError::UnknownSigner)?;
        let base = ChainId::compose(base_chain_id, "")?;
        let routed_chain_id = if destination.is_empty() {
            None
        } else {
            Some(ChainId::compose(base_chain_id, destination)?)
        };
        Ok(Self {
            keyring,
            key_name: key_name.to_string(),
            base_chain_id: base,
            routed_chain_id,
            account: AccountState::new(address),
            querier,
        })
    }

    pub fn address(&self) -> Address {
        self.account.address()
    }

    pub fn account(&self) -> &AccountState {
        &self.account
    }

    pub fn querier(&self) -> &Q {
        &self.querier
    }

    /// Identifier a transaction built with `routed` declares.
    pub fn chain_id(&self, routed: bool) -> Result<&ChainId, BuilderError> {
        if routed {
            self.routed_chain_id
                .as_ref()
                .ok_or(BuilderError::NoSecondaryChainId)
        } else {
            Ok(&self.base_chain_id)
        }
    }

    pub fn new_tx_builder(
        &self,
        options: impl IntoIterator<Item = TxBuilderOption>,
    ) -> TxBuilder {
        TxBuilder::new(options)
    }

    /// Re-reads account number and sequence from the chain.
    pub async fn update_account(&mut self) -> Result<(u64, u64), BuilderError> {
        self.account.refresh(&self.querier).await
    }

    /// Signs `msgs` with the next cached sequence. The cache is refreshed on first use
    /// and advanced only when a transaction is returned.
    pub async fn build_signed_tx(
        &mut self,
        builder: &TxBuilder,
        routed: bool,
        msgs: Vec<Msg>,
    ) -> Result<Tx, BuilderError> {
        if msgs.is_empty() {
            return Err(BuilderError::NoMessages);
        }
        for msg in &msgs {
            msg.validate_basic()?;
        }
        let signers = signer_set(&msgs)?;
        if signers.as_slice() != [self.address()] {
            return Err(BuilderError::SignerMismatch {
                expected: self.address(),
                got: signers,
            });
        }
        if let Some(payer) = builder.options().fee_payer
            && !signers.contains(&payer)
        {
            return Err(BuilderError::FeePayerNotSigner { payer, signers });
        }
        let chain_id = self.chain_id(routed)?.clone();
        if !self.account.is_refreshed() {
            self.update_account().await?;
        }

        let public_key = self
            .keyring
            .public_key(&self.key_name)
            .map_err(BuilderError::UnknownSigner)?;
        let sequence = self.account.peek_sequence();
        let (body, auth_info) = builder.envelope(
            &msgs,
            &chain_id,
            SignerInfo {
                public_key,
                sequence,
            },
        )?;
        let sign_bytes = sign_doc_hash(&body, &auth_info, self.account.account_number());
        let signature = self
            .keyring
            .sign(&self.key_name, &sign_bytes)
            .map_err(BuilderError::Signing)?;

        self.account.next_sequence();
        let tx = Tx {
            body,
            auth_info,
            signatures: vec![signature.as_bytes().to_vec().into()],
        };
        debug!(
            signer = %self.address(),
            %chain_id,
            sequence,
            tx_hash = %tx.hash(),
            "tx signed"
        );
        Ok(tx)
    }
}

#[cfg(test)]
mod tests {
    use super::{
        Signer, TxBuilder, set_fee_amount, set_fee_payer, set_gas_adjustment, set_gas_limit,
        set_memo, set_timeout_height,
    };
    use crate::error::{BuilderError, ClientError};
    use crate::test_utils::StaticQuerier;
    use alloy_primitives::{Address, U256};
    use app_core::consts::native_coin;
    use app_core::keys::{Keyring, KeyringError};
    use app_core::msg::{Msg, MsgSend, SequencerMsg};
    use app_core::tx::{recover_signer, sign_doc_hash};

    fn keyring() -> (Keyring, Address) {
        let mut keyring = Keyring::default();
        let alice = keyring.derive("alice").expect("derive alice");
        (keyring, alice)
    }

    fn signer(querier: StaticQuerier) -> (Signer<StaticQuerier>, Address) {
        let (keyring, alice) = keyring();
        let signer = Signer::new(keyring, "alice", "metro", "taco", querier).expect("signer");
        (signer, alice)
    }

    fn post(from: Address, data: &[u8]) -> Msg {
        SequencerMsg::new(b"taco".to_vec(), data.to_vec(), from).into()
    }

    #[test]
    fn options_apply_in_order_over_defaults() {
        let payer = Address::repeat_byte(0x33);
        let builder = TxBuilder::new([
            set_gas_limit(100_000),
            set_gas_adjustment(1.5),
            set_memo("first"),
            set_memo("second"),
            set_fee_amount(vec![native_coin(U256::from(7_u64))]),
            set_fee_payer(payer),
            set_timeout_height(42),
        ]);
        let options = builder.options();
        assert_eq!(options.memo, "second");
        assert_eq!(options.fee_payer, Some(payer));
        assert_eq!(options.timeout_height, 42);
        assert_eq!(options.fee_amount, vec![native_coin(U256::from(7_u64))]);
        assert_eq!(builder.gas_limit().expect("gas"), 150_000);

        let rounded = TxBuilder::new([set_gas_limit(3), set_gas_adjustment(1.1)]);
        assert_eq!(rounded.gas_limit().expect("gas"), 4);

        let invalid = TxBuilder::new([set_gas_adjustment(0.0)]);
        assert!(matches!(
            invalid.gas_limit(),
            Err(BuilderError::InvalidGasAdjustment(_))
        ));
    }

    #[tokio::test]
    async fn consecutive_builds_use_increasing_sequences_until_refresh() {
        let (_, alice) = keyring();
        let (mut signer, _) = signer(StaticQuerier::with_account(alice, 3, 5));
        let builder = signer.new_tx_builder([]);

        let first = signer
            .build_signed_tx(&builder, true, vec![post(alice, b"one")])
            .await
            .expect("first tx");
        let second = signer
            .build_signed_tx(&builder, true, vec![post(alice, b"two")])
            .await
            .expect("second tx");
        assert_eq!(first.auth_info.signer_infos[0].sequence, 5);
        assert_eq!(second.auth_info.signer_infos[0].sequence, 6);
        // Refreshed lazily, once.
        assert_eq!(signer.querier().queries(), 1);

        signer.querier().set_sequence(6);
        assert_eq!(signer.update_account().await.expect("refresh"), (3, 6));
        let third = signer
            .build_signed_tx(&builder, false, vec![post(alice, b"three")])
            .await
            .expect("third tx");
        assert_eq!(third.auth_info.signer_infos[0].sequence, 6);
    }

    #[tokio::test]
    async fn routed_flag_selects_the_declared_identifier_and_sign_bytes() {
        let (_, alice) = keyring();
        let (mut signer, _) = signer(StaticQuerier::with_account(alice, 3, 0));
        let builder = signer.new_tx_builder([set_memo("hi")]);

        let routed = signer
            .build_signed_tx(&builder, true, vec![post(alice, b"payload")])
            .await
            .expect("routed tx");
        let simple = signer
            .build_signed_tx(&builder, false, vec![post(alice, b"payload")])
            .await
            .expect("simple tx");
        assert_eq!(routed.body.chain_id, "metro|taco");
        assert_eq!(simple.body.chain_id, "metro");
        assert_eq!(routed.body.memo, "hi");

        for tx in [&routed, &simple] {
            let prehash = sign_doc_hash(&tx.body, &tx.auth_info, 3);
            let recovered = recover_signer(&tx.signatures[0], &prehash).expect("recover");
            assert_eq!(recovered, alice);
        }
    }

    #[tokio::test]
    async fn construction_failures_do_not_consume_a_sequence() {
        let (_, alice) = keyring();
        let (mut signer, _) = signer(StaticQuerier::with_account(alice, 0, 0));
        let builder = signer.new_tx_builder([]);

        let bad_originator: Msg = SequencerMsg {
            chain_id: b"taco".to_vec().into(),
            data: Vec::new().into(),
            from_address: "not-an-address".to_string(),
        }
        .into();
        let err = signer
            .build_signed_tx(&builder, true, vec![bad_originator])
            .await
            .expect_err("malformed originator");
        assert!(matches!(err, BuilderError::InvalidAddress(_)));

        let bob = Address::repeat_byte(0x44);
        let err = signer
            .build_signed_tx(
                &builder,
                false,
                vec![MsgSend::new(bob, alice, vec![native_coin(U256::from(1_u64))]).into()],
            )
            .await
            .expect_err("foreign signer");
        assert!(matches!(err, BuilderError::SignerMismatch { expected, .. } if expected == alice));

        let err = signer
            .build_signed_tx(&builder, false, Vec::new())
            .await
            .expect_err("empty tx");
        assert!(matches!(err, BuilderError::NoMessages));

        let foreign_payer = signer.new_tx_builder([set_fee_payer(bob)]);
        let err = signer
            .build_signed_tx(&foreign_payer, false, vec![post(alice, b"pay")])
            .await
            .expect_err("payer outside the signer set");
        assert!(matches!(
            &err,
            BuilderError::FeePayerNotSigner { payer, signers }
                if *payer == bob && signers.as_slice() == [alice]
        ));
        assert_eq!(signer.querier().queries(), 0, "rejected before any round trip");

        let tx = signer
            .build_signed_tx(&builder, false, vec![post(alice, b"ok")])
            .await
            .expect("valid tx");
        assert_eq!(tx.auth_info.signer_infos[0].sequence, 0);
    }

    #[tokio::test]
    async fn signer_errors_surface_before_submission() {
        let (keyring, alice) = keyring();
        let err = Signer::new(keyring.clone(), "mallory", "metro", "", StaticQuerier::empty())
            .err()
            .expect("unknown key");
        assert!(matches!(
            err,
            BuilderError::UnknownSigner(KeyringError::UnknownKey(name)) if name == "mallory"
        ));

        let err = Signer::new(keyring.clone(), "alice", "metro", "ta|co", StaticQuerier::empty())
            .err()
            .expect("separator in destination");
        assert!(matches!(err, BuilderError::MalformedChainIdentifier(_)));

        let mut simple_only =
            Signer::new(keyring.clone(), "alice", "metro", "", StaticQuerier::empty())
                .expect("signer");
        let builder = simple_only.new_tx_builder([]);
        let err = simple_only
            .build_signed_tx(&builder, true, vec![post(alice, b"x")])
            .await
            .expect_err("no destination");
        assert!(matches!(err, BuilderError::NoSecondaryChainId));

        let mut offline =
            Signer::new(keyring, "alice", "metro", "", StaticQuerier::failing()).expect("signer");
        let err = offline
            .build_signed_tx(&builder, false, vec![post(alice, b"x")])
            .await
            .expect_err("node down");
        assert!(matches!(
            err,
            BuilderError::SignerUnavailable(ClientError::Timeout(_))
        ));
    }
}
