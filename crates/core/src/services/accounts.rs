//! Account reconciliation.
//!
//! A block's derived records reference accounts (signers, transfer parties);
//! reconciliation brings the local account table in line with on-chain state
//! for exactly those accounts. Lookups run concurrently but the outcome is
//! deterministic: results are merged in the order the accounts were first
//! touched.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt, TryStreamExt};
use tracing::debug;

use crate::error::{IndexerError, IndexerResult};
use crate::models::{Account, AccountId};
use crate::ports::{AccountState, AccountStateQuery, Repositories};

/// Concurrent on-chain account lookups per block.
const MAX_CONCURRENT_LOOKUPS: usize = 8;

/// Accounts referenced by a block's records, in first-touch order.
///
/// Each account carries an optional creator: the counterparty that caused
/// the account to be referenced (the sender of an incoming transfer). Only
/// the first touch's creator is kept.
#[derive(Debug, Default)]
pub struct TouchedAccounts {
    ordered: Vec<(AccountId, Option<AccountId>)>,
    seen: HashSet<AccountId>,
}

impl TouchedAccounts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a reference to `id`. Re-touching an already-seen account is a
    /// no-op, including its creator annotation.
    pub fn touch(&mut self, id: &str, created_by: Option<&str>) {
        if self.seen.insert(id.to_string()) {
            self.ordered
                .push((id.to_string(), created_by.map(str::to_string)));
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(AccountId, Option<AccountId>)> {
        self.ordered.iter()
    }
}

/// Accounts to persist after reconciling a block.
#[derive(Debug, Default)]
pub struct ReconcileOutcome {
    /// Accounts seen for the first time, in touch order.
    pub created: Vec<Account>,
    /// Known accounts whose live state changed, in touch order.
    pub updated: Vec<Account>,
}

/// Reconcile every touched account against on-chain state.
///
/// Unknown accounts become new records stamped with the block's timestamp
/// and their creator annotation. Known accounts are re-fetched and staged
/// for update only if some live field actually changed. A failed state
/// lookup aborts the block.
pub async fn reconcile_accounts<R, Q>(
    repositories: &Arc<R>,
    query: &Arc<Q>,
    touched: &TouchedAccounts,
    block_timestamp: Option<DateTime<Utc>>,
) -> IndexerResult<ReconcileOutcome>
where
    R: Repositories + ?Sized,
    Q: AccountStateQuery + ?Sized,
{
    if touched.is_empty() {
        return Ok(ReconcileOutcome::default());
    }

    // Lookups are driven from an owned snapshot of the touch list; closures
    // over borrowed entries produce futures the compiler cannot prove general
    // enough when the composed indexer future is spawned.
    let entries: Vec<(AccountId, Option<AccountId>)> = touched.iter().cloned().collect();

    // buffered() polls lookups concurrently but yields in input order, so
    // the outcome vectors are independent of completion timing.
    let fetched: Vec<(AccountId, Option<AccountId>, Option<Account>, AccountState)> =
        stream::iter(entries.into_iter().map(|(id, created_by)| {
            let repositories = Arc::clone(repositories);
            let query = Arc::clone(query);
            async move {
                let existing = repositories.accounts().get_account(&id).await?;
                let state = query.account_state(&id).await?;
                Ok::<_, IndexerError>((id, created_by, existing, state))
            }
        }))
        .buffered(MAX_CONCURRENT_LOOKUPS)
        .try_collect()
        .await?;

    let mut outcome = ReconcileOutcome::default();
    for (id, created_by, existing, state) in fetched {
        match existing {
            None => {
                debug!(account = %id, "creating account");
                outcome.created.push(Account {
                    id,
                    nonce: state.nonce,
                    free_balance: state.free,
                    reserved_balance: state.reserved,
                    misc_frozen_balance: state.misc_frozen,
                    fee_frozen_balance: state.fee_frozen,
                    created_at: block_timestamp,
                    created_by,
                });
            }
            Some(mut account) => {
                let changed = account.nonce != state.nonce
                    || account.free_balance != state.free
                    || account.reserved_balance != state.reserved
                    || account.misc_frozen_balance != state.misc_frozen
                    || account.fee_frozen_balance != state.fee_frozen;
                if changed {
                    debug!(account = %account.id, "account state changed");
                    account.nonce = state.nonce;
                    account.free_balance = state.free;
                    account.reserved_balance = state.reserved;
                    account.misc_frozen_balance = state.misc_frozen;
                    account.fee_frozen_balance = state.fee_frozen;
                    outcome.updated.push(account);
                }
            }
        }
    }

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ChainError;
    use crate::testing::{MemoryAccountStateQuery, MemoryRepositories};

    fn state(nonce: u64, free: u128) -> AccountState {
        AccountState {
            nonce,
            free,
            ..AccountState::default()
        }
    }

    #[test]
    fn touch_keeps_first_creator() {
        let mut touched = TouchedAccounts::new();
        touched.touch("bob", Some("alice"));
        touched.touch("bob", Some("charlie"));
        touched.touch("bob", None);

        let entries: Vec<_> = touched.iter().collect();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].1.as_deref(), Some("alice"));
    }

    #[test]
    fn touch_preserves_first_touch_order() {
        let mut touched = TouchedAccounts::new();
        touched.touch("charlie", None);
        touched.touch("alice", None);
        touched.touch("charlie", Some("alice"));
        touched.touch("bob", None);

        let ids: Vec<_> = touched.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, ["charlie", "alice", "bob"]);
    }

    #[tokio::test]
    async fn unknown_accounts_are_created_with_creator() {
        let repositories = Arc::new(MemoryRepositories::new());
        let query = Arc::new(MemoryAccountStateQuery::new());
        query.set_state("bob", state(0, 500)).await;

        let mut touched = TouchedAccounts::new();
        touched.touch("bob", Some("alice"));

        let outcome = reconcile_accounts(&repositories, &query, &touched, None)
            .await
            .unwrap();
        assert_eq!(outcome.created.len(), 1);
        assert!(outcome.updated.is_empty());
        assert_eq!(outcome.created[0].id, "bob");
        assert_eq!(outcome.created[0].free_balance, 500);
        assert_eq!(outcome.created[0].created_by.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn unchanged_accounts_are_not_staged() {
        let repositories = Arc::new(MemoryRepositories::new());
        let query = Arc::new(MemoryAccountStateQuery::new());
        query.set_state("alice", state(3, 100)).await;
        repositories
            .seed_account(Account {
                id: "alice".to_string(),
                nonce: 3,
                free_balance: 100,
                reserved_balance: 0,
                misc_frozen_balance: 0,
                fee_frozen_balance: 0,
                created_at: None,
                created_by: None,
            })
            .await;

        let mut touched = TouchedAccounts::new();
        touched.touch("alice", None);

        let outcome = reconcile_accounts(&repositories, &query, &touched, None)
            .await
            .unwrap();
        assert!(outcome.created.is_empty());
        assert!(outcome.updated.is_empty());
    }

    #[tokio::test]
    async fn changed_accounts_are_staged_for_update() {
        let repositories = Arc::new(MemoryRepositories::new());
        let query = Arc::new(MemoryAccountStateQuery::new());
        query.set_state("alice", state(4, 90)).await;
        repositories
            .seed_account(Account {
                id: "alice".to_string(),
                nonce: 3,
                free_balance: 100,
                reserved_balance: 0,
                misc_frozen_balance: 0,
                fee_frozen_balance: 0,
                created_at: None,
                created_by: None,
            })
            .await;

        let mut touched = TouchedAccounts::new();
        touched.touch("alice", None);

        let outcome = reconcile_accounts(&repositories, &query, &touched, None)
            .await
            .unwrap();
        assert!(outcome.created.is_empty());
        assert_eq!(outcome.updated.len(), 1);
        assert_eq!(outcome.updated[0].nonce, 4);
        assert_eq!(outcome.updated[0].free_balance, 90);
    }

    #[tokio::test]
    async fn lookup_failure_aborts_reconciliation() {
        let repositories = Arc::new(MemoryRepositories::new());
        let query = Arc::new(MemoryAccountStateQuery::new());
        query
            .fail_for(
                "alice",
                ChainError::AccountStateError {
                    address: "alice".to_string(),
                    message: "rpc timeout".to_string(),
                },
            )
            .await;

        let mut touched = TouchedAccounts::new();
        touched.touch("alice", None);

        let err = reconcile_accounts(&repositories, &query, &touched, None)
            .await
            .unwrap_err();
        assert!(matches!(err, IndexerError::Chain(_)));
    }

    // The reconciliation future must stay spawnable; the binary runs the
    // whole indexer inside tokio::spawn.
    #[tokio::test]
    async fn reconciliation_runs_inside_spawned_task() {
        let repositories = Arc::new(MemoryRepositories::new());
        let query = Arc::new(MemoryAccountStateQuery::new());
        query.set_state("bob", state(0, 500)).await;

        let handle = tokio::spawn(async move {
            let mut touched = TouchedAccounts::new();
            touched.touch("bob", Some("alice"));
            reconcile_accounts(&repositories, &query, &touched, None).await
        });

        let outcome = handle.await.unwrap().unwrap();
        assert_eq!(outcome.created.len(), 1);
        assert_eq!(outcome.created[0].id, "bob");
    }
}
