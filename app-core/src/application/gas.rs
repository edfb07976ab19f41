// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutOfGas {
    pub limit: u64,
    pub required: u64,
    pub descriptor: &'static str,
}

impl fmt::Display for OutOfGas {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "out of gas in {}: limit {}, required {}",
            self.descriptor, self.limit, self.required
        )
    }
}

/// Tracks gas consumed against a transaction's declared limit.
#[derive(Debug, Clone, Copy)]
pub struct GasMeter {
    limit: u64,
    consumed: u64,
}

impl GasMeter {
    pub fn new(limit: u64) -> Self {
        Self { limit, consumed: 0 }
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    /// On failure the meter is left saturated at its limit.
    pub fn consume(&mut self, amount: u64, descriptor: &'static str) -> Result<(), OutOfGas> {
        let required = self.consumed.saturating_add(amount);
        if required > self.limit {
            self.consumed = self.limit;
            return Err(OutOfGas {
                limit: self.limit,
                required,
                descriptor,
            });
        }
        self.consumed = required;
        Ok(())
    }
}
