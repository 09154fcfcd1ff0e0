//! Port trait for live account-state queries.
//!
//! Account reconciliation needs the current on-chain state of every account
//! a block touched. The response shape is an explicit schema validated at
//! the adapter boundary rather than an untyped storage value.

use async_trait::async_trait;

use crate::error::ChainResult;

/// On-chain state of one account, as returned by `System.Account` storage.
///
/// Balance fields routinely exceed 64-bit range and are carried as `u128`
/// (the chain's `Balance` type).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AccountState {
    /// Transaction nonce.
    pub nonce: u64,
    /// Free balance.
    pub free: u128,
    /// Reserved balance.
    pub reserved: u128,
    /// Miscellaneous frozen balance.
    pub misc_frozen: u128,
    /// Fee-frozen balance.
    pub fee_frozen: u128,
}

/// Port trait for fetching live account state.
///
/// A failed fetch is fatal for the block whose reconciliation requested it:
/// the caller must not persist partial account data, and the block will be
/// retried from scratch. Retry/timeout policy belongs to the implementation,
/// not to this interface.
#[async_trait]
pub trait AccountStateQuery: Send + Sync {
    /// Fetch the current state of `address`.
    ///
    /// An account that does not exist on chain yet is reported with default
    /// (all-zero) state, not as an error.
    async fn account_state(&self, address: &str) -> ChainResult<AccountState>;
}
