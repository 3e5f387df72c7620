//! Query service — the operations exposed to the route layer.
//!
//! Validates inputs at the boundary, then answers from the projection, the
//! raw event log, or the dual-path historical reconstructor. Owns the
//! projector for the write-side operations that mirror on-chain corporate
//! actions.

use std::sync::Arc;

use alloy_primitives::U256;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::actions::ActionLedger;
use crate::captable::{self, AdjustedTransaction, CapTable};
use crate::error::LedgerError;
use crate::projector::Projector;
use crate::reconstruct;
use crate::store::EventStore;
use crate::types::{Address, AllowlistEntry, BalanceMap, TokenEvent};
use crate::units;

/// A current-balance answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentBalance {
    pub address: Address,
    /// Projection row as stored — signed decimal string. A negative value
    /// here is itself a signal worth surfacing, not something to hide.
    pub balance: String,
    pub timestamp: i64,
}

/// A historical-balance answer, expressed in the units current at `block`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoricalBalance {
    pub address: Address,
    pub balance: String,
    pub block: u64,
}

/// Read/record operations over one token's ledger.
pub struct LedgerService {
    store: Arc<dyn EventStore>,
    projector: Projector,
}

impl LedgerService {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self {
            projector: Projector::new(store.clone()),
            store,
        }
    }

    pub fn projector(&self) -> &Projector {
        &self.projector
    }

    // ─── Balances ────────────────────────────────────────────────────────────

    pub async fn current_balance(&self, address: &str) -> Result<CurrentBalance, LedgerError> {
        let address = Address::parse(address)?;
        let row = self
            .store
            .balance(&address)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("no balance row for {address}")))?;
        Ok(CurrentBalance {
            address: row.address,
            balance: row.balance.to_string(),
            timestamp: row.timestamp,
        })
    }

    /// Positive-balance snapshot at `block`, computed by **both**
    /// reconstruction strategies and cross-checked before answering.
    ///
    /// Seeds the backward path from the local projection, so this detects
    /// internal corruption but not a missed event — the projection and the
    /// event log would be missing it together. When a chain connection is
    /// available, prefer [`Self::historical_balances_from`] with
    /// chain-authoritative inputs.
    pub async fn historical_balances(&self, block: u64) -> Result<BalanceMap, LedgerError> {
        let current = self.positive_balances().await?;
        let ledger = ActionLedger::from_actions(self.store.actions().await?);
        let multiplier_fp =
            units::checked_mul(ledger.cumulative_multiplier()?, units::MULTIPLIER_BASE)?;
        self.historical_balances_from(block, &current, multiplier_fp)
            .await
    }

    /// Snapshot at `block` cross-checked against externally supplied truth:
    /// `current` holds effective balances as the chain reports them and
    /// `multiplier_fp` the contract's cumulative split multiplier
    /// (fixed-point, base [`units::MULTIPLIER_BASE`]).
    ///
    /// Forward replay sees only the local event log; backward reversal
    /// starts from `current`. An event the indexer missed makes the two
    /// disagree and surfaces as an `Integrity` error here.
    pub async fn historical_balances_from(
        &self,
        block: u64,
        current: &BalanceMap,
        multiplier_fp: U256,
    ) -> Result<BalanceMap, LedgerError> {
        let events = self.store.transfers_up_to(u64::MAX).await?;
        let ledger = ActionLedger::from_actions(self.store.actions().await?);

        let forward = reconstruct::forward_replay(&events, block, &ledger)?;
        let backward =
            reconstruct::backward_reversal(current, &events, multiplier_fp, &ledger, block)?;

        debug!(block, holders = forward.len(), "historical snapshot reconciled");
        reconstruct::reconcile(forward, backward)
    }

    pub async fn historical_balance(
        &self,
        address: &str,
        block: u64,
    ) -> Result<HistoricalBalance, LedgerError> {
        let address = Address::parse(address)?;
        let snapshot = self.historical_balances(block).await?;
        let balance = snapshot.get(&address).copied().unwrap_or(U256::ZERO);
        Ok(HistoricalBalance {
            address,
            balance: balance.to_string(),
            block,
        })
    }

    // ─── Cap table / transactions ────────────────────────────────────────────

    /// Cap table for the current projection, or for a past block when given.
    pub async fn cap_table(&self, block: Option<u64>) -> Result<CapTable, LedgerError> {
        let balances = match block {
            Some(block) => self.historical_balances(block).await?,
            None => self.positive_balances().await?,
        };
        captable::build_cap_table(&balances)
    }

    /// Split-adjusted transaction list, newest first, optionally filtered to
    /// transfers touching one address.
    pub async fn transactions(
        &self,
        address: Option<&str>,
    ) -> Result<Vec<AdjustedTransaction>, LedgerError> {
        let transfers = match address {
            Some(raw) => {
                let address = Address::parse(raw)?;
                self.store.transfers_for(&address).await?
            }
            None => self.store.all_transfers().await?,
        };
        let ledger = ActionLedger::from_actions(self.store.actions().await?);
        transfers
            .iter()
            .map(|tx| captable::adjust_transaction(tx, &ledger))
            .collect()
    }

    // ─── Corporate actions ───────────────────────────────────────────────────

    /// Record a stock split mirroring the on-chain event, rescaling the
    /// projection in the process.
    pub async fn record_split(
        &self,
        multiplier: u64,
        block: u64,
        timestamp: i64,
    ) -> Result<(), LedgerError> {
        if multiplier <= 1 {
            return Err(LedgerError::InvalidInput(
                "multiplier must be an integer greater than 1".into(),
            ));
        }
        self.projector
            .apply(&TokenEvent::StockSplit {
                multiplier: U256::from(multiplier),
                block,
                timestamp,
                source: None,
            })
            .await?;
        Ok(())
    }

    /// Record a name/symbol change mirroring the on-chain event.
    pub async fn record_rename(
        &self,
        new_name: &str,
        new_symbol: &str,
        block: u64,
        timestamp: i64,
    ) -> Result<(), LedgerError> {
        let new_name = new_name.trim();
        let new_symbol = new_symbol.trim();
        if new_name.is_empty() {
            return Err(LedgerError::InvalidInput("new name cannot be empty".into()));
        }
        if new_symbol.is_empty() || new_symbol.chars().count() > 11 {
            return Err(LedgerError::InvalidInput(
                "new symbol must be between 1 and 11 characters".into(),
            ));
        }

        // The chain event carries the outgoing identity; off-chain the best
        // source for it is the last recorded rename.
        let (old_name, old_symbol) = self
            .store
            .actions()
            .await?
            .iter()
            .rev()
            .find_map(|a| match &a.kind {
                crate::types::ActionKind::Rename {
                    new_name,
                    new_symbol,
                    ..
                } => Some((new_name.clone(), new_symbol.clone())),
                _ => None,
            })
            .unwrap_or_default();

        self.projector
            .apply(&TokenEvent::SymbolChanged {
                old_name,
                new_name: new_name.to_string(),
                old_symbol,
                new_symbol: new_symbol.to_string(),
                block,
                timestamp,
                source: None,
            })
            .await?;
        Ok(())
    }

    // ─── Allowlist ───────────────────────────────────────────────────────────

    pub async fn allowlist_status(
        &self,
        address: &str,
    ) -> Result<Option<AllowlistEntry>, LedgerError> {
        let address = Address::parse(address)?;
        self.store.allowlist_status(&address).await
    }

    pub async fn allowlisted(&self) -> Result<Vec<AllowlistEntry>, LedgerError> {
        self.store.allowlisted().await
    }

    // ─── Helpers ─────────────────────────────────────────────────────────────

    async fn positive_balances(&self) -> Result<BalanceMap, LedgerError> {
        let mut map = BalanceMap::new();
        for row in self.store.balances().await? {
            if let Some(value) = units::positive(row.balance) {
                map.insert(row.address, value);
            }
        }
        Ok(map)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
