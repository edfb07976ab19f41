// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use alloy_primitives::{Address, Bytes};
use app_core::application::AccountInfo;
use tracing::debug;

use crate::error::BuilderError;
use crate::rpc::AccountQuerier;

/// Cached account number and sequence of one signer on one base chain.
///
/// The sequence advances locally after every built transaction, whether or not it is
/// later committed; only [`AccountState::refresh`] reads it back from the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountState {
    address: Address,
    account_number: u64,
    sequence: u64,
    public_key: Option<Bytes>,
    refreshed: bool,
}

impl AccountState {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            account_number: 0,
            sequence: 0,
            public_key: None,
            refreshed: false,
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn account_number(&self) -> u64 {
        self.account_number
    }

    /// Key registered on chain, set after the signer's first included transaction.
    pub fn public_key(&self) -> Option<&Bytes> {
        self.public_key.as_ref()
    }

    pub fn is_refreshed(&self) -> bool {
        self.refreshed
    }

    /// One round trip to the node, no retry. Returns `(account_number, sequence)`.
    pub async fn refresh<Q: AccountQuerier>(
        &mut self,
        querier: &Q,
    ) -> Result<(u64, u64), BuilderError> {
        let info = querier
            .query_account(self.address)
            .await
            .map_err(BuilderError::SignerUnavailable)?
            .ok_or(BuilderError::AccountNotFound(self.address))?;
        self.apply(&info);
        debug!(
            address = %self.address,
            account_number = self.account_number,
            sequence = self.sequence,
            "account refreshed"
        );
        Ok((self.account_number, self.sequence))
    }

    pub fn apply(&mut self, info: &AccountInfo) {
        self.account_number = info.account_number;
        self.sequence = info.sequence;
        self.public_key = info.public_key.clone();
        self.refreshed = true;
    }

    /// Sequence the next built transaction will carry.
    pub fn peek_sequence(&self) -> u64 {
        self.sequence
    }

    /// Returns the cached sequence and advances it.
    pub fn next_sequence(&mut self) -> u64 {
        let sequence = self.sequence;
        self.sequence = self.sequence.saturating_add(1);
        sequence
    }
}

#[cfg(test)]
mod tests {
    use super::AccountState;
    use crate::error::{BuilderError, ClientError};
    use crate::test_utils::StaticQuerier;
    use alloy_primitives::Address;

    #[tokio::test]
    async fn refresh_loads_chain_values_and_next_sequence_counts_up() {
        let address = Address::repeat_byte(0x11);
        let querier = StaticQuerier::with_account(address, 4, 9);
        let mut state = AccountState::new(address);
        assert!(!state.is_refreshed());

        assert_eq!(state.refresh(&querier).await.expect("refresh"), (4, 9));
        assert!(state.is_refreshed());
        assert_eq!(state.next_sequence(), 9);
        assert_eq!(state.next_sequence(), 10);
        assert_eq!(state.peek_sequence(), 11);
        assert_eq!(querier.queries(), 1);

        // A refresh discards locally advanced values.
        assert_eq!(state.refresh(&querier).await.expect("refresh again"), (4, 9));
        assert_eq!(state.peek_sequence(), 9);
    }

    #[tokio::test]
    async fn refresh_reports_missing_accounts_and_unreachable_nodes() {
        let address = Address::repeat_byte(0x22);
        let mut state = AccountState::new(address);

        let err = state
            .refresh(&StaticQuerier::empty())
            .await
            .expect_err("unknown account");
        assert!(matches!(err, BuilderError::AccountNotFound(found) if found == address));

        let err = state
            .refresh(&StaticQuerier::failing())
            .await
            .expect_err("node down");
        assert!(matches!(
            err,
            BuilderError::SignerUnavailable(ClientError::Timeout(_))
        ));
        assert!(!state.is_refreshed());
    }
}
