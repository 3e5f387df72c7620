//! Cap table and split-adjusted transaction views.

use alloy_primitives::U256;
use serde::{Deserialize, Serialize};

use crate::actions::ActionLedger;
use crate::error::LedgerError;
use crate::types::{Address, BalanceMap, TransferEvent};
use crate::units;

/// One holder's row in the cap table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapTableEntry {
    pub address: Address,
    /// Effective balance, decimal string.
    pub balance: String,
    /// Ownership in basis points (10000 = 100.00%).
    pub percentage_bps: u64,
}

impl CapTableEntry {
    /// Render the percentage with two decimal digits, e.g. `"70.00"`.
    pub fn percent(&self) -> String {
        format!("{}.{:02}", self.percentage_bps / 100, self.percentage_bps % 100)
    }
}

/// Snapshot of all holders and their share of total supply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapTable {
    /// Sum of all positive balances, decimal string.
    pub total_shares: String,
    pub holders: usize,
    /// Sorted by balance descending; ties break on address for determinism.
    pub entries: Vec<CapTableEntry>,
}

/// Build a cap table from a positive-balance snapshot.
///
/// A zero total yields zero percentages for every entry rather than a
/// division error.
pub fn build_cap_table(balances: &BalanceMap) -> Result<CapTable, LedgerError> {
    let mut total = U256::ZERO;
    for value in balances.values() {
        total = total
            .checked_add(*value)
            .ok_or_else(|| LedgerError::integrity("total supply overflow"))?;
    }

    let mut entries: Vec<(Address, U256)> =
        balances.iter().map(|(a, v)| (a.clone(), *v)).collect();
    // BTreeMap iteration is address-ascending, so the stable sort leaves
    // equal balances in deterministic address order.
    entries.sort_by(|a, b| b.1.cmp(&a.1));

    let entries = entries
        .into_iter()
        .map(|(address, balance)| {
            let bps = if total.is_zero() {
                0
            } else {
                let scaled = balance
                    .checked_mul(U256::from(10_000))
                    .ok_or_else(|| LedgerError::integrity("percentage overflow"))?;
                // ≤ 10000 by construction, always fits.
                (scaled / total).to::<u64>()
            };
            Ok(CapTableEntry {
                address,
                balance: balance.to_string(),
                percentage_bps: bps,
            })
        })
        .collect::<Result<Vec<_>, LedgerError>>()?;

    Ok(CapTable {
        total_shares: total.to_string(),
        holders: entries.len(),
        entries,
    })
}

/// A historic transfer presented in today's post-split units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustedTransaction {
    pub hash: String,
    pub from: Address,
    pub to: Address,
    /// The value the contract emitted at the time, decimal string.
    pub raw_amount: String,
    /// `raw_amount` scaled by every split that happened after the transfer.
    pub adjusted_amount: String,
    /// The integer multiplier that was applied.
    pub multiplier: String,
    pub block: u64,
    pub timestamp: i64,
}

/// Express a stored transfer in today's split-adjusted units.
pub fn adjust_transaction(
    tx: &TransferEvent,
    ledger: &ActionLedger,
) -> Result<AdjustedTransaction, LedgerError> {
    let multiplier = ledger.cumulative_multiplier_after(tx.block)?;
    let adjusted = units::checked_mul(tx.amount, multiplier)?;
    Ok(AdjustedTransaction {
        hash: tx.tx_hash.clone(),
        from: tx.from.clone(),
        to: tx.to.clone(),
        raw_amount: tx.amount.to_string(),
        adjusted_amount: adjusted.to_string(),
        multiplier: multiplier.to_string(),
        block: tx.block,
        timestamp: tx.timestamp,
    })
}

// ─── Tests ───────────────────────────────────────────────────────────────────
