// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use alloy_primitives::Address;
use app_core::application::AccountInfo;

use crate::error::ClientError;
use crate::rpc::AccountQuerier;

/// Answers account queries from memory and counts them.
pub(crate) struct StaticQuerier {
    account: Mutex<Option<AccountInfo>>,
    fail: bool,
    queries: AtomicUsize,
}

impl StaticQuerier {
    pub fn with_account(address: Address, account_number: u64, sequence: u64) -> Self {
        Self {
            account: Mutex::new(Some(AccountInfo {
                address,
                account_number,
                sequence,
                public_key: None,
                balances: Vec::new(),
            })),
            fail: false,
            queries: AtomicUsize::new(0),
        }
    }

    pub fn empty() -> Self {
        Self {
            account: Mutex::new(None),
            fail: false,
            queries: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::empty()
        }
    }

    pub fn set_sequence(&self, sequence: u64) {
        if let Some(account) = self.account.lock().expect("querier mutex poisoned").as_mut() {
            account.sequence = sequence;
        }
    }

    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::Relaxed)
    }
}

impl AccountQuerier for StaticQuerier {
    async fn query_account(&self, address: Address) -> Result<Option<AccountInfo>, ClientError> {
        self.queries.fetch_add(1, Ordering::Relaxed);
        if self.fail {
            return Err(ClientError::Timeout("account query".to_string()));
        }
        let account = self.account.lock().expect("querier mutex poisoned").clone();
        Ok(account.filter(|info| info.address == address))
    }
}
