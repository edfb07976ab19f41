// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use std::collections::{BTreeMap, HashMap};

use alloy_primitives::{Address, Bytes, U256};

use crate::address::{address_from_public_key, parse_address};
use crate::application::{
    AccountInfo, AppError, Application, DeliveredTx, GasMeter, InvalidReason, ResultCode,
    TxResult, VerifiedTx,
};
use crate::chain_id::ChainId;
use crate::genesis::{ChainParams, Genesis, GenesisError};
use crate::msg::{Msg, MsgError, amount_of};
use crate::routing::{Route, route_tx};
use crate::tx::{recover_signer, sign_doc_hash};
use crate::wire::{Coin, MsgSend, Tx};

#[derive(Debug, Clone)]
struct Account {
    number: u64,
    sequence: u64,
    public_key: Option<Bytes>,
}

type Balances = BTreeMap<Address, BTreeMap<String, U256>>;

/// Base-chain state: accounts, multi-denomination balances and collected fees.
#[derive(Debug)]
pub struct BankApp {
    chain_id: ChainId,
    params: ChainParams,
    accounts: HashMap<Address, Account>,
    balances: Balances,
    next_account_number: u64,
    collected_fees: U256,
    executed_tx_count: u64,
}

impl BankApp {
    pub fn from_genesis(genesis: &Genesis) -> Result<Self, GenesisError> {
        genesis.validate()?;
        let mut app = Self {
            chain_id: genesis.chain_id.clone(),
            params: genesis.params.clone(),
            accounts: HashMap::new(),
            balances: BTreeMap::new(),
            next_account_number: 0,
            collected_fees: U256::ZERO,
            executed_tx_count: 0,
        };
        for account in &genesis.accounts {
            app.ensure_account(account.address);
            let balances = app.balances.entry(account.address).or_default();
            for coin in &account.coins {
                balances.insert(coin.denom.clone(), coin.amount);
            }
        }
        Ok(app)
    }

    pub fn params(&self) -> &ChainParams {
        &self.params
    }

    pub fn collected_fees(&self) -> U256 {
        self.collected_fees
    }

    fn ensure_account(&mut self, address: Address) {
        if self.accounts.contains_key(&address) {
            return;
        }
        let number = self.next_account_number;
        self.next_account_number += 1;
        self.accounts.insert(
            address,
            Account {
                number,
                sequence: 0,
                public_key: None,
            },
        );
    }

    fn balance_of(&self, address: &Address, denom: &str) -> U256 {
        self.balances
            .get(address)
            .and_then(|balances| balances.get(denom))
            .copied()
            .unwrap_or(U256::ZERO)
    }

    fn set_balance(&mut self, address: Address, denom: &str, amount: U256) {
        let balances = self.balances.entry(address).or_default();
        if amount.is_zero() {
            balances.remove(denom);
        } else {
            balances.insert(denom.to_string(), amount);
        }
    }

    fn check_fee(&self, tx: &Tx) -> Result<U256, InvalidReason> {
        let fee = &tx.auth_info.fee;
        if let Some(coin) = fee
            .amount
            .iter()
            .find(|coin| coin.denom != self.params.bond_denom)
        {
            return Err(InvalidReason::InvalidFee(format!(
                "fee must be paid in {}, got {}",
                self.params.bond_denom, coin.denom
            )));
        }
        let amount = amount_of(&fee.amount, &self.params.bond_denom);
        if amount < self.params.min_fee {
            return Err(InvalidReason::InvalidFee(format!(
                "fee {amount} below minimum {}",
                self.params.min_fee
            )));
        }
        Ok(amount)
    }

    fn check_signatures(&self, tx: &Tx, signers: &[Address]) -> Result<(), InvalidReason> {
        let signer_infos = &tx.auth_info.signer_infos;
        if signer_infos.len() != signers.len() || tx.signatures.len() != signers.len() {
            return Err(InvalidReason::SignerCount {
                signers: signers.len(),
                signer_infos: signer_infos.len(),
                signatures: tx.signatures.len(),
            });
        }

        for ((signer, info), signature) in signers.iter().zip(signer_infos).zip(&tx.signatures) {
            let account = self
                .accounts
                .get(signer)
                .ok_or(InvalidReason::UnknownAccount(*signer))?;
            if info.sequence != account.sequence {
                return Err(InvalidReason::InvalidSequence {
                    signer: *signer,
                    expected: account.sequence,
                    got: info.sequence,
                });
            }

            let invalid = |reason: String| InvalidReason::InvalidSignature {
                signer: *signer,
                reason,
            };
            let key_address =
                address_from_public_key(&info.public_key).map_err(|err| invalid(err.to_string()))?;
            if key_address != *signer {
                return Err(invalid("public key does not match signer".to_string()));
            }
            if let Some(known) = &account.public_key
                && *known != info.public_key
            {
                return Err(invalid("public key differs from the recorded one".to_string()));
            }

            let prehash = sign_doc_hash(&tx.body, &tx.auth_info, account.number);
            let recovered =
                recover_signer(signature, &prehash).map_err(|err| invalid(err.to_string()))?;
            if recovered != *signer {
                return Err(invalid(format!("signature recovers {recovered}")));
            }
        }
        Ok(())
    }

    fn ante_gas(&self, tx: &Tx, signers: usize) -> Result<GasMeter, InvalidReason> {
        let mut meter = GasMeter::new(tx.auth_info.fee.gas_limit);
        let size = u64::try_from(tx.encoded_len()).unwrap_or(u64::MAX);
        meter
            .consume(
                self.params.tx_size_cost_per_byte.saturating_mul(size),
                "tx size",
            )
            .map_err(InvalidReason::OutOfGas)?;
        let signers = u64::try_from(signers).unwrap_or(u64::MAX);
        meter
            .consume(
                self.params.sig_verify_cost.saturating_mul(signers),
                "signature verification",
            )
            .map_err(InvalidReason::OutOfGas)?;
        Ok(meter)
    }

    /// Runs handlers on a staged copy of the touched balances. Nothing is written unless
    /// every message succeeds.
    fn run_msgs(&mut self, msgs: &[Msg], meter: &mut GasMeter) -> Result<(), (ResultCode, String)> {
        let mut staged = Staged::new(&self.balances);
        for msg in msgs {
            match msg {
                Msg::Send(send) => {
                    meter
                        .consume(self.params.send_msg_cost, "send")
                        .map_err(|err| (ResultCode::OutOfGas, err.to_string()))?;
                    staged.send(send)?;
                }
                Msg::Sequencer(seq) => {
                    let len = u64::try_from(seq.data.len()).unwrap_or(u64::MAX);
                    meter
                        .consume(
                            self.params.sequencer_msg_cost_per_byte.saturating_mul(len),
                            "sequencer message",
                        )
                        .map_err(|err| (ResultCode::OutOfGas, err.to_string()))?;
                }
            }
        }

        let (writes, credited) = staged.into_parts();
        for ((address, denom), amount) in writes {
            self.set_balance(address, &denom, amount);
        }
        for address in credited {
            self.ensure_account(address);
        }
        Ok(())
    }
}

/// Pending balance writes layered over committed balances.
struct Staged<'a> {
    base: &'a Balances,
    writes: BTreeMap<(Address, String), U256>,
    // Recipients in first-credit order, so new account numbers stay deterministic.
    credited: Vec<Address>,
}

impl<'a> Staged<'a> {
    fn new(base: &'a Balances) -> Self {
        Self {
            base,
            writes: BTreeMap::new(),
            credited: Vec::new(),
        }
    }

    fn balance(&self, address: Address, denom: &str) -> U256 {
        if let Some(amount) = self.writes.get(&(address, denom.to_string())) {
            return *amount;
        }
        self.base
            .get(&address)
            .and_then(|balances| balances.get(denom))
            .copied()
            .unwrap_or(U256::ZERO)
    }

    fn send(&mut self, msg: &MsgSend) -> Result<(), (ResultCode, String)> {
        let invalid = |err: MsgError| (ResultCode::InvalidMessage, err.to_string());
        let from = parse_address(&msg.from_address).map_err(|err| invalid(err.into()))?;
        let to = parse_address(&msg.to_address).map_err(|err| invalid(err.into()))?;
        for Coin { denom, amount } in &msg.amount {
            let available = self.balance(from, denom);
            if available < *amount {
                return Err((
                    ResultCode::InsufficientFunds,
                    format!("insufficient funds: {available}{denom} < {amount}{denom}"),
                ));
            }
            self.writes
                .insert((from, denom.clone()), available - *amount);

            let credited = self
                .balance(to, denom)
                .checked_add(*amount)
                .ok_or_else(|| (ResultCode::InvalidMessage, "balance overflow".to_string()))?;
            self.writes.insert((to, denom.clone()), credited);
        }
        if !self.credited.contains(&to) {
            self.credited.push(to);
        }
        Ok(())
    }

    fn into_parts(self) -> (BTreeMap<(Address, String), U256>, Vec<Address>) {
        (self.writes, self.credited)
    }
}

impl Application for BankApp {
    fn chain_id(&self) -> &ChainId {
        &self.chain_id
    }

    fn account(&self, address: Address) -> Option<AccountInfo> {
        let account = self.accounts.get(&address)?;
        let balances = self
            .balances
            .get(&address)
            .map(|balances| {
                balances
                    .iter()
                    .map(|(denom, amount)| Coin::new(denom.clone(), *amount))
                    .collect()
            })
            .unwrap_or_default();
        Some(AccountInfo {
            address,
            account_number: account.number,
            sequence: account.sequence,
            public_key: account.public_key.clone(),
            balances,
        })
    }

    fn balance(&self, address: Address, denom: &str) -> U256 {
        self.balance_of(&address, denom)
    }

    fn check_tx(&self, tx: &Tx, height: u64) -> Result<VerifiedTx, InvalidReason> {
        if tx.body.messages.is_empty() {
            return Err(InvalidReason::EmptyTx);
        }
        let msgs = tx.messages().map_err(|err| match err {
            MsgError::InvalidAddress(err) => InvalidReason::InvalidAddress(err),
            other => InvalidReason::Decode(other.to_string()),
        })?;
        for msg in &msgs {
            msg.validate_basic().map_err(|err| match err {
                MsgError::InvalidAddress(err) => InvalidReason::InvalidAddress(err),
                other => InvalidReason::InvalidMessage(other.to_string()),
            })?;
        }
        let signers = crate::msg::signer_set(&msgs).map_err(InvalidReason::InvalidAddress)?;

        let memo_len = tx.body.memo.chars().count();
        if memo_len > self.params.max_memo_characters {
            return Err(InvalidReason::MemoTooLong {
                max: self.params.max_memo_characters,
                got: memo_len,
            });
        }
        let timeout_height = tx.body.timeout_height;
        if timeout_height != 0 && height > timeout_height {
            return Err(InvalidReason::TimedOut {
                timeout_height,
                height,
            });
        }

        let declared_chain_id = tx
            .declared_chain_id()
            .map_err(InvalidReason::MalformedChainId)?;
        let route = route_tx(&self.chain_id, &declared_chain_id)
            .map_err(InvalidReason::ChainMismatch)?;

        let fee = self.check_fee(tx)?;
        let payer = tx
            .fee_payer(&signers)
            .map_err(InvalidReason::InvalidAddress)?
            .ok_or(InvalidReason::EmptyTx)?;
        if !signers.contains(&payer) {
            return Err(InvalidReason::FeePayerNotSigner(payer));
        }

        self.check_signatures(tx, &signers)?;
        let meter = self.ante_gas(tx, signers.len())?;

        let available = self.balance_of(&payer, &self.params.bond_denom);
        if available < fee {
            return Err(InvalidReason::InsufficientFee {
                required: fee,
                available,
            });
        }

        Ok(VerifiedTx {
            tx: tx.clone(),
            hash: tx.hash(),
            msgs,
            signers,
            payer,
            fee,
            declared_chain_id,
            route,
            ante_gas: meter.consumed(),
        })
    }

    fn deliver_tx(&mut self, tx: VerifiedTx) -> Result<DeliveredTx, AppError> {
        let gas_wanted = tx.tx.auth_info.fee.gas_limit;
        let mut meter = GasMeter::new(gas_wanted);
        meter
            .consume(tx.ante_gas, "ante")
            .map_err(|err| AppError::Internal {
                reason: format!("verified tx exceeds its gas limit: {err}"),
            })?;

        let denom = self.params.bond_denom.clone();
        let balance = self.balance_of(&tx.payer, &denom);
        if balance < tx.fee {
            return Err(AppError::Internal {
                reason: "verified tx cannot pay its fee".to_string(),
            });
        }
        self.set_balance(tx.payer, &denom, balance - tx.fee);
        self.collected_fees = self.collected_fees.saturating_add(tx.fee);

        for (signer, info) in tx.signers.iter().zip(&tx.tx.auth_info.signer_infos) {
            let account = self
                .accounts
                .get_mut(signer)
                .ok_or_else(|| AppError::Internal {
                    reason: format!("verified signer {signer} has no account"),
                })?;
            account.sequence += 1;
            if account.public_key.is_none() {
                account.public_key = Some(info.public_key.clone());
            }
        }
        self.executed_tx_count = self.executed_tx_count.saturating_add(1);

        let (code, log) = match &tx.route {
            Route::Routed { destination } => (ResultCode::Ok, format!("sequenced for {destination}")),
            Route::Simple => match self.run_msgs(&tx.msgs, &mut meter) {
                Ok(()) => (ResultCode::Ok, String::new()),
                Err((code, log)) => (code, log),
            },
        };

        Ok(DeliveredTx {
            hash: tx.hash,
            msgs: tx.msgs,
            declared_chain_id: tx.declared_chain_id,
            route: tx.route,
            result: TxResult {
                code,
                log,
                gas_wanted,
                gas_used: meter.consumed(),
            },
            tx: tx.tx,
        })
    }

    fn executed_tx_count(&self) -> u64 {
        self.executed_tx_count
    }
}

#[cfg(test)]
mod tests {
    use super::BankApp;
    use crate::application::{AppError, Application, ExecutionOutcome, InvalidReason, ResultCode};
    use crate::chain_id::ChainId;
    use crate::consts::{BOND_DENOM, native_coin};
    use crate::genesis::{ChainParams, Genesis};
    use crate::keys::Keyring;
    use crate::msg::Msg;
    use crate::tx::sign_doc_hash;
    use crate::wire::{AuthInfo, Fee, MsgSend, SequencerMsg, SignerInfo, Tx, TxBody};
    use alloy_primitives::{Address, U256};

    const FEE: u64 = 100;
    const GAS_LIMIT: u64 = 200_000;
    const TRANSFER: u64 = 1_000;
    const FUNDS: u64 = 1_000_000;

    struct Harness {
        app: BankApp,
        keyring: Keyring,
        alice: Address,
        bob: Address,
    }

    fn harness() -> Harness {
        let mut keyring = Keyring::default();
        let alice = keyring.derive("alice").expect("derive alice");
        let bob = keyring.derive("bob").expect("derive bob");
        let genesis = Genesis::new(
            ChainId::parse("metro").expect("chain id"),
            ChainParams::default(),
        )
        .with_account(alice, vec![native_coin(U256::from(FUNDS))])
        .with_account(bob, vec![native_coin(U256::from(FUNDS))]);
        Harness {
            app: BankApp::from_genesis(&genesis).expect("build app"),
            keyring,
            alice,
            bob,
        }
    }

    fn signed_tx(h: &Harness, key: &str, chain_id: &str, msgs: &[Msg], gas_limit: u64) -> Tx {
        let address = h.keyring.address(key).expect("address");
        let account = h.app.account(address).expect("signer account");
        let body = TxBody {
            messages: msgs.iter().map(Msg::to_any).collect(),
            memo: String::new(),
            timeout_height: 0,
            chain_id: chain_id.to_string(),
        };
        let auth_info = AuthInfo {
            signer_infos: vec![SignerInfo {
                public_key: h.keyring.public_key(key).expect("public key"),
                sequence: account.sequence,
            }],
            fee: Fee {
                amount: vec![native_coin(U256::from(FEE))],
                gas_limit,
                payer: String::new(),
            },
        };
        let prehash = sign_doc_hash(&body, &auth_info, account.account_number);
        let signature = h.keyring.sign(key, &prehash).expect("sign");
        Tx {
            body,
            auth_info,
            signatures: vec![signature.as_bytes().to_vec().into()],
        }
    }

    fn transfer(h: &Harness, amount: u64) -> Msg {
        Msg::from(MsgSend::new(
            h.alice,
            h.bob,
            vec![native_coin(U256::from(amount))],
        ))
    }

    fn balance(h: &Harness, address: Address) -> U256 {
        h.app.balance(address, BOND_DENOM)
    }

    #[test]
    fn simple_transfer_applies_amount_and_fee() {
        let mut h = harness();
        let tx = signed_tx(&h, "alice", "metro", &[transfer(&h, TRANSFER)], GAS_LIMIT);
        let outcome = h.app.check_and_deliver_tx(&tx, 1).expect("deliver");

        let ExecutionOutcome::Included(delivered) = outcome else {
            panic!("expected inclusion, got {outcome:?}");
        };
        assert_eq!(delivered.result.code, ResultCode::Ok);
        assert!(!delivered.route.is_routed());
        assert_eq!(
            balance(&h, h.alice),
            U256::from(FUNDS - TRANSFER - FEE)
        );
        assert_eq!(balance(&h, h.bob), U256::from(FUNDS + TRANSFER));
        assert_eq!(h.app.account(h.alice).expect("alice").sequence, 1);
        assert_eq!(h.app.collected_fees(), U256::from(FEE));
    }

    #[test]
    fn routed_transfer_only_charges_the_fee() {
        let mut h = harness();
        let tx = signed_tx(&h, "alice", "metro|taco", &[transfer(&h, TRANSFER)], GAS_LIMIT);
        let outcome = h.app.check_and_deliver_tx(&tx, 1).expect("deliver");

        let ExecutionOutcome::Included(delivered) = outcome else {
            panic!("expected inclusion, got {outcome:?}");
        };
        assert_eq!(delivered.result.code, ResultCode::Ok);
        assert_eq!(delivered.route.destination(), Some("taco"));

        let spent = U256::from(FUNDS) - balance(&h, h.alice);
        assert!(spent < U256::from(TRANSFER));
        assert!(spent >= h.app.params().min_fee);
        assert_eq!(balance(&h, h.bob), U256::from(FUNDS));
        assert_eq!(h.app.account(h.alice).expect("alice").sequence, 1);
    }

    #[test]
    fn foreign_chain_is_rejected_without_charge() {
        let mut h = harness();
        let tx = signed_tx(&h, "alice", "other|metro", &[transfer(&h, TRANSFER)], GAS_LIMIT);
        let outcome = h.app.check_and_deliver_tx(&tx, 1).expect("deliver");

        let ExecutionOutcome::Invalid(reason) = outcome else {
            panic!("expected rejection, got {outcome:?}");
        };
        assert_eq!(reason.code(), "CHAIN_MISMATCH");
        assert_eq!(balance(&h, h.alice), U256::from(FUNDS));
        assert_eq!(h.app.account(h.alice).expect("alice").sequence, 0);
        assert_eq!(h.app.executed_tx_count(), 0);
    }

    #[test]
    fn failed_handler_keeps_fee_and_sequence_charged() {
        let mut h = harness();
        let tx = signed_tx(&h, "alice", "metro", &[transfer(&h, FUNDS * 2)], GAS_LIMIT);
        let outcome = h.app.check_and_deliver_tx(&tx, 1).expect("deliver");

        let ExecutionOutcome::Included(delivered) = outcome else {
            panic!("expected inclusion, got {outcome:?}");
        };
        assert_eq!(delivered.result.code, ResultCode::InsufficientFunds);
        assert_eq!(balance(&h, h.alice), U256::from(FUNDS - FEE));
        assert_eq!(balance(&h, h.bob), U256::from(FUNDS));
        assert_eq!(h.app.account(h.alice).expect("alice").sequence, 1);
    }

    #[test]
    fn handler_gas_overrun_reports_out_of_gas() {
        let mut h = harness();
        let sample = signed_tx(&h, "alice", "metro", &[transfer(&h, TRANSFER)], GAS_LIMIT);
        let ante = h.app.check_tx(&sample, 1).expect("check").ante_gas;

        // Enough for the ante costs, not for the send handler.
        let tx = signed_tx(&h, "alice", "metro", &[transfer(&h, TRANSFER)], ante + 1);
        let outcome = h.app.check_and_deliver_tx(&tx, 1).expect("deliver");
        let ExecutionOutcome::Included(delivered) = outcome else {
            panic!("expected inclusion, got {outcome:?}");
        };
        assert_eq!(delivered.result.code, ResultCode::OutOfGas);
        assert_eq!(delivered.result.gas_used, ante + 1);
        assert_eq!(balance(&h, h.bob), U256::from(FUNDS));

        // The same limit is enough when routed: no handler gas is metered.
        let routed = signed_tx(&h, "alice", "metro|taco", &[transfer(&h, TRANSFER)], ante + 1);
        let outcome = h.app.check_and_deliver_tx(&routed, 1).expect("deliver");
        let ExecutionOutcome::Included(delivered) = outcome else {
            panic!("expected inclusion, got {outcome:?}");
        };
        assert_eq!(delivered.result.code, ResultCode::Ok);
    }

    #[test]
    fn ante_gas_overrun_is_rejected() {
        let mut h = harness();
        let tx = signed_tx(&h, "alice", "metro", &[transfer(&h, TRANSFER)], 10);
        let outcome = h.app.check_and_deliver_tx(&tx, 1).expect("deliver");
        assert!(matches!(
            outcome,
            ExecutionOutcome::Invalid(InvalidReason::OutOfGas(_))
        ));
        assert_eq!(balance(&h, h.alice), U256::from(FUNDS));
    }

    #[test]
    fn delivering_a_tx_over_its_gas_limit_fails_before_charging() {
        let mut h = harness();
        let tx = signed_tx(&h, "alice", "metro", &[transfer(&h, TRANSFER)], GAS_LIMIT);
        let mut verified = h.app.check_tx(&tx, 1).expect("check");
        verified.ante_gas = GAS_LIMIT + 1;

        let err = h.app.deliver_tx(verified).expect_err("ante gas over limit");
        assert!(matches!(err, AppError::Internal { .. }));
        assert_eq!(balance(&h, h.alice), U256::from(FUNDS));
        assert_eq!(h.app.account(h.alice).expect("alice").sequence, 0);
        assert_eq!(h.app.executed_tx_count(), 0);
    }

    #[test]
    fn replayed_sequence_is_rejected() {
        let mut h = harness();
        let tx = signed_tx(&h, "alice", "metro|taco", &[transfer(&h, TRANSFER)], GAS_LIMIT);
        assert!(h.app.check_and_deliver_tx(&tx, 1).expect("first").is_included());

        let outcome = h.app.check_and_deliver_tx(&tx, 1).expect("replay");
        assert!(matches!(
            outcome,
            ExecutionOutcome::Invalid(InvalidReason::InvalidSequence {
                expected: 1,
                got: 0,
                ..
            })
        ));
    }

    #[test]
    fn wrong_signer_is_rejected() {
        let mut h = harness();
        // Bob signs a message whose originator is alice.
        let tx = signed_tx(&h, "bob", "metro", &[transfer(&h, TRANSFER)], GAS_LIMIT);
        let outcome = h.app.check_and_deliver_tx(&tx, 1).expect("deliver");
        assert!(matches!(
            outcome,
            ExecutionOutcome::Invalid(InvalidReason::InvalidSignature { .. })
        ));
    }

    #[test]
    fn sequencer_message_with_bad_originator_is_rejected() {
        let mut h = harness();
        let msg = Msg::from(SequencerMsg {
            chain_id: b"taco".to_vec().into(),
            data: b"payload".to_vec().into(),
            from_address: "bogus".to_string(),
        });
        let tx = signed_tx(&h, "alice", "metro|taco", &[msg], GAS_LIMIT);
        let outcome = h.app.check_and_deliver_tx(&tx, 1).expect("deliver");
        assert!(matches!(
            outcome,
            ExecutionOutcome::Invalid(InvalidReason::InvalidAddress(_))
        ));
    }

    #[test]
    fn transfer_to_new_address_opens_an_account() {
        let mut h = harness();
        let carol = Address::repeat_byte(0xc0);
        let msg = Msg::from(MsgSend::new(
            h.alice,
            carol,
            vec![native_coin(U256::from(TRANSFER))],
        ));
        let tx = signed_tx(&h, "alice", "metro", &[msg], GAS_LIMIT);
        assert!(h.app.check_and_deliver_tx(&tx, 1).expect("deliver").is_included());

        let account = h.app.account(carol).expect("carol account");
        assert_eq!(account.account_number, 2);
        assert_eq!(account.balances, vec![native_coin(U256::from(TRANSFER))]);
    }

    #[test]
    fn expired_timeout_height_is_rejected() {
        let mut h = harness();
        let mut tx = signed_tx(&h, "alice", "metro", &[transfer(&h, TRANSFER)], GAS_LIMIT);
        tx.body.timeout_height = 3;
        let outcome = h.app.check_and_deliver_tx(&tx, 4).expect("deliver");
        assert!(matches!(
            outcome,
            ExecutionOutcome::Invalid(InvalidReason::TimedOut { .. })
        ));
    }
}
