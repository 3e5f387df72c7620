//! Corporate-action ledger — ordered multiplier-changing events and their
//! cumulative products over block ranges.

use alloy_primitives::U256;

use crate::error::LedgerError;
use crate::types::{ActionKind, CorporateAction};
use crate::units;

/// Block-ordered view over the recorded corporate actions.
///
/// Splits compose multiplicatively in block order; multiple splits at the
/// same block compose in insertion (event-emission) order. Renames carry no
/// numeric effect and are ignored by the multiplier math.
#[derive(Debug, Clone, Default)]
pub struct ActionLedger {
    actions: Vec<CorporateAction>,
}

impl ActionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a store snapshot. The input is stably re-ordered by block,
    /// preserving append order within a block.
    pub fn from_actions(mut actions: Vec<CorporateAction>) -> Self {
        actions.sort_by_key(|a| a.block);
        Self { actions }
    }

    /// Append an action in event-emission order.
    pub fn push(&mut self, action: CorporateAction) {
        self.actions.push(action);
    }

    pub fn actions(&self) -> &[CorporateAction] {
        &self.actions
    }

    fn product<F>(&self, keep: F) -> Result<U256, LedgerError>
    where
        F: Fn(&CorporateAction) -> bool,
    {
        let mut acc = U256::from(1);
        for action in &self.actions {
            if let ActionKind::Split { multiplier } = &action.kind {
                if keep(action) {
                    acc = units::checked_mul(acc, *multiplier)?;
                }
            }
        }
        Ok(acc)
    }

    /// Product of every split multiplier recorded, 1 if none.
    pub fn cumulative_multiplier(&self) -> Result<U256, LedgerError> {
        self.product(|_| true)
    }

    /// Product of split multipliers at blocks strictly greater than `block`.
    ///
    /// Answers "how much would a raw amount at `block` have grown by today."
    pub fn cumulative_multiplier_after(&self, block: u64) -> Result<U256, LedgerError> {
        self.product(|a| a.block > block)
    }

    /// Product of split multipliers at blocks ≤ `block` — the unit scale in
    /// force at that point in history.
    pub fn cumulative_multiplier_up_to(&self, block: u64) -> Result<U256, LedgerError> {
        self.product(|a| a.block <= block)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
