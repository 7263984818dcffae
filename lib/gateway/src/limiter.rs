// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Two-phase rate limiter.
//!
//! [`InMemoryRateLimiter::allow`] is the cheap, optimistic admission gate: a
//! key with +1 balance may go on to consume thousands of tokens.
//! [`InMemoryRateLimiter::consume`] charges the actual cost afterwards and is
//! allowed to overdraw the balance, so mid-stream quota trips never need a
//! refund.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::GatewayError;

/// In-memory token ledger keyed by API key. Balances are signed; a negative
/// balance simply fails the next admission check.
pub struct InMemoryRateLimiter {
    balances: RwLock<HashMap<String, i64>>,
}

impl InMemoryRateLimiter {
    pub fn new() -> Self {
        Self {
            balances: RwLock::new(HashMap::new()),
        }
    }

    /// Add tokens to a key's balance, creating the key if needed.
    pub fn grant(&self, api_key: impl Into<String>, tokens: i64) {
        let mut balances = self
            .balances
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *balances.entry(api_key.into()).or_insert(0) += tokens;
    }

    /// Current balance, `None` for unknown keys. Test and ops visibility.
    pub fn balance(&self, api_key: &str) -> Option<i64> {
        self.balances
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(api_key)
            .copied()
    }

    /// Pre-flight admission: the key must exist and hold a strictly positive
    /// balance.
    pub fn allow(&self, api_key: &str) -> Result<bool, GatewayError> {
        let balances = self
            .balances
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(balances.get(api_key).is_some_and(|balance| *balance > 0))
    }

    /// Post-flight charge. Overdraft is permitted; the balance may go
    /// negative.
    pub fn consume(&self, api_key: &str, tokens: i64) -> Result<(), GatewayError> {
        let mut balances = self
            .balances
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let balance = balances.entry(api_key.to_string()).or_insert(0);
        *balance -= tokens;
        if *balance < 0 {
            tracing::debug!(api_key, balance = *balance, "ledger overdrawn");
        }
        Ok(())
    }
}

impl Default for InMemoryRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
