//! Historical reconstruction — point-in-time balance snapshots derived two
//! independent ways.
//!
//! Unit convention: stored raw amounts are pre-split units across the whole
//! history, and a snapshot "as of block B" is expressed in the on-chain units
//! current at block B (what `balanceOf` would have returned then). Forward
//! replay therefore scales its raw result up by the splits at blocks ≤ B;
//! backward reversal de-scales its current-unit result by the splits at
//! blocks > B. Under this convention the two paths are equal on complete
//! histories, and divergence signals a missed event or indexing gap.

use std::collections::BTreeMap;

use alloy_primitives::{I256, U256};

use crate::actions::ActionLedger;
use crate::error::LedgerError;
use crate::types::{Address, BalanceMap, TransferEvent, TransferKind};
use crate::units;

/// Replay all transfers with block ≤ `target` from genesis.
///
/// Applies the projector's credit/debit rules over signed balances, then
/// scales the result into block-`target` units. Non-positive entries are
/// dropped from the output.
pub fn forward_replay(
    events: &[TransferEvent],
    target: u64,
    ledger: &ActionLedger,
) -> Result<BalanceMap, LedgerError> {
    let mut ordered: Vec<&TransferEvent> =
        events.iter().filter(|e| e.block <= target).collect();
    ordered.sort_by(|a, b| (a.block, a.timestamp).cmp(&(b.block, b.timestamp)));

    let mut raw: BTreeMap<Address, I256> = BTreeMap::new();
    for event in ordered {
        let amount = units::to_signed(event.amount)?;
        match event.kind() {
            TransferKind::Mint => credit(&mut raw, &event.to, amount)?,
            TransferKind::Burn => credit(&mut raw, &event.from, -amount)?,
            TransferKind::Transfer => {
                credit(&mut raw, &event.from, -amount)?;
                credit(&mut raw, &event.to, amount)?;
            }
        }
    }

    let scale = units::to_signed(ledger.cumulative_multiplier_up_to(target)?)?;
    let mut snapshot = BalanceMap::new();
    for (address, balance) in raw {
        let scaled = balance.checked_mul(scale).ok_or_else(|| {
            LedgerError::integrity(format!("replay overflow for {address}"))
        })?;
        if let Some(value) = units::positive(scaled) {
            snapshot.insert(address, value);
        }
    }
    Ok(snapshot)
}

/// Reconstruct the block-`target` snapshot by undoing every later transfer,
/// starting from authoritative current balances.
///
/// `current` holds effective (post-split) balances; `multiplier_fp` is the
/// contract's cumulative split multiplier in [`units::MULTIPLIER_BASE`]
/// fixed-point. Each reversed raw amount is first scaled into current units,
/// and the finished map is de-scaled into block-`target` units. That final
/// division must be exact: a remainder means the event set is incomplete.
pub fn backward_reversal(
    current: &BalanceMap,
    events: &[TransferEvent],
    multiplier_fp: U256,
    ledger: &ActionLedger,
    target: u64,
) -> Result<BalanceMap, LedgerError> {
    let mut balances: BTreeMap<Address, I256> = BTreeMap::new();
    for (address, value) in current {
        balances.insert(address.clone(), units::to_signed(*value)?);
    }

    let mut ordered: Vec<&TransferEvent> =
        events.iter().filter(|e| e.block > target).collect();
    ordered.sort_by(|a, b| (b.block, b.timestamp).cmp(&(a.block, a.timestamp)));

    for event in ordered {
        let adjusted = units::to_signed(units::scale_fixed_point(event.amount, multiplier_fp)?)?;
        match event.kind() {
            // A burn removed from the sender; undo by crediting them back.
            TransferKind::Burn => credit(&mut balances, &event.from, adjusted)?,
            // A mint credited the recipient; undo by debiting them.
            TransferKind::Mint => credit(&mut balances, &event.to, -adjusted)?,
            TransferKind::Transfer => {
                credit(&mut balances, &event.from, adjusted)?;
                credit(&mut balances, &event.to, -adjusted)?;
            }
        }
    }

    let divisor = units::to_signed(ledger.cumulative_multiplier_after(target)?)?;
    let mut snapshot = BalanceMap::new();
    for (address, balance) in balances {
        let descaled = if divisor == I256::ONE {
            balance
        } else {
            if !(balance % divisor).is_zero() {
                return Err(LedgerError::integrity(format!(
                    "balance {balance} for {address} not divisible by split factor {divisor}; \
                     event history is incomplete"
                )));
            }
            balance / divisor
        };
        if let Some(value) = units::positive(descaled) {
            snapshot.insert(address, value);
        }
    }
    Ok(snapshot)
}

/// Cross-validate the two reconstruction paths.
///
/// They encode the same fact two ways; any difference is surfaced as a
/// data-integrity error rather than silently reconciled.
pub fn reconcile(forward: BalanceMap, backward: BalanceMap) -> Result<BalanceMap, LedgerError> {
    if forward == backward {
        return Ok(forward);
    }
    let divergent = forward
        .iter()
        .find(|(addr, value)| backward.get(*addr) != Some(value))
        .map(|(addr, _)| addr.clone())
        .or_else(|| {
            backward
                .keys()
                .find(|addr| !forward.contains_key(*addr))
                .cloned()
        });
    Err(LedgerError::integrity(format!(
        "forward and backward reconstruction disagree{}",
        divergent
            .map(|a| format!(" (first divergent holder: {a})"))
            .unwrap_or_default()
    )))
}

fn credit(
    balances: &mut BTreeMap<Address, I256>,
    address: &Address,
    delta: I256,
) -> Result<(), LedgerError> {
    let entry = balances.entry(address.clone()).or_insert(I256::ZERO);
    *entry = entry.checked_add(delta).ok_or_else(|| {
        LedgerError::integrity(format!("balance overflow for {address}"))
    })?;
    Ok(())
}

// ─── Tests ───────────────────────────────────────────────────────────────────
