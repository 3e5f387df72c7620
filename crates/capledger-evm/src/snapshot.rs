//! Chain-checked historical snapshots.
//!
//! [`capledger_core::LedgerService::historical_balances`] can only seed the
//! backward reconstruction from the local projection, which cannot expose an
//! event the indexer never saw. This helper supplies the chain's own answers
//! instead: per-holder `balanceOf`, `totalSupply`, and the contract's
//! fixed-point split multiplier. A missed transfer then surfaces as a
//! reconciliation failure rather than passing silently.

use std::sync::Arc;

use alloy_primitives::U256;

use capledger_core::error::LedgerError;
use capledger_core::service::LedgerService;
use capledger_core::store::EventStore;
use capledger_core::types::BalanceMap;

use crate::client::TokenChainClient;

/// Snapshot at `block`, with the backward path anchored to chain truth.
///
/// The projection supplies the candidate holder set; the chain supplies
/// every number. `totalSupply` must equal the sum of the tracked holders'
/// balances — a shortfall means the ledger is missing a holder entirely,
/// which per-holder reads alone could never reveal.
pub async fn verified_snapshot<C: TokenChainClient>(
    client: &C,
    store: Arc<dyn EventStore>,
    block: u64,
) -> Result<BalanceMap, LedgerError> {
    let mut current = BalanceMap::new();
    let mut sum = U256::ZERO;
    for row in store.balances().await? {
        let value = client.read_balance(row.address.as_str()).await?;
        if !value.is_zero() {
            sum = sum
                .checked_add(value)
                .ok_or_else(|| LedgerError::integrity("holder balance sum overflow"))?;
            current.insert(row.address, value);
        }
    }

    let total = client.read_total_supply().await?;
    if total != sum {
        return Err(LedgerError::integrity(format!(
            "chain total supply {total} != sum of tracked holder balances {sum}; \
             a holder is missing from the ledger"
        )));
    }

    let multiplier_fp = client.read_split_multiplier().await?;
    LedgerService::new(store)
        .historical_balances_from(block, &current, multiplier_fp)
        .await
}

// ─── Tests ───────────────────────────────────────────────────────────────────
