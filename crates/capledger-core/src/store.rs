//! Event store contract — append-only persistence for transfers, corporate
//! actions, allowlist entries, the balance projection, and the indexer
//! cursor.
//!
//! The trait lives in core; backends are `MemoryStore` (below, for tests and
//! ephemeral use) and the SQLite backend in `capledger-storage`.

use async_trait::async_trait;

use crate::error::LedgerError;
use crate::types::{Address, AllowlistEntry, BalanceRecord, CorporateAction, TransferEvent};

/// Durable storage for the ledger.
///
/// All writes must be durable before the call returns (no ack-before-persist).
/// The projector is the only writer of balance rows; everything else reads.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Insert a transfer iff its transaction hash is not already present,
    /// writing the supplied post-event balance rows in the same transaction.
    ///
    /// Returns `false` (and writes nothing) on duplicate delivery — a no-op,
    /// not an error, so re-indexing overlap is always safe.
    async fn record_transfer(
        &self,
        event: &TransferEvent,
        balances: &[BalanceRecord],
    ) -> Result<bool, LedgerError>;

    /// Append a corporate action, applying any rebalanced rows (split) in the
    /// same transaction.
    ///
    /// When the action carries a [`crate::types::ActionSource`] that is
    /// already recorded, nothing is written and `false` is returned — the
    /// split/rename analogue of the transfer hash dedup, so chunk replay
    /// cannot re-scale balances. Actions without a source (admin-recorded)
    /// always append; they are never deduplicated by content.
    async fn record_action(
        &self,
        action: &CorporateAction,
        balances: &[BalanceRecord],
    ) -> Result<bool, LedgerError>;

    /// Replace any prior allowlist entry for the address.
    async fn upsert_allowlist(&self, entry: &AllowlistEntry) -> Result<(), LedgerError>;

    async fn allowlist_status(
        &self,
        address: &Address,
    ) -> Result<Option<AllowlistEntry>, LedgerError>;

    /// All currently approved addresses, most recently updated first.
    async fn allowlisted(&self) -> Result<Vec<AllowlistEntry>, LedgerError>;

    async fn balance(&self, address: &Address) -> Result<Option<BalanceRecord>, LedgerError>;

    /// Every projection row, including zero and negative balances.
    async fn balances(&self) -> Result<Vec<BalanceRecord>, LedgerError>;

    /// Transfers with block ≤ `block`, ascending (block, timestamp).
    async fn transfers_up_to(&self, block: u64) -> Result<Vec<TransferEvent>, LedgerError>;

    /// Transfers with block > `block`, descending (block, timestamp).
    async fn transfers_after(&self, block: u64) -> Result<Vec<TransferEvent>, LedgerError>;

    /// All transfers, descending (block, timestamp).
    async fn all_transfers(&self) -> Result<Vec<TransferEvent>, LedgerError>;

    /// Transfers touching `address` as sender or recipient, descending.
    async fn transfers_for(&self, address: &Address) -> Result<Vec<TransferEvent>, LedgerError>;

    /// Corporate actions in block-ascending order; ties within a block keep
    /// insertion order.
    async fn actions(&self) -> Result<Vec<CorporateAction>, LedgerError>;

    /// Last block number fully processed, if any.
    async fn cursor(&self) -> Result<Option<u64>, LedgerError>;

    /// Persist indexer progress. The cursor is monotone: a lower value than
    /// the stored one is ignored.
    async fn set_cursor(&self, block: u64) -> Result<(), LedgerError>;
}

// ─── In-memory store ─────────────────────────────────────────────────────────

use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Default)]
struct MemoryInner {
    transfers: HashMap<String, TransferEvent>,
    actions: Vec<CorporateAction>,
    allowlist: HashMap<Address, AllowlistEntry>,
    balances: HashMap<Address, BalanceRecord>,
    cursor: Option<u64>,
    next_action_id: i64,
}

/// In-memory event store for tests and ephemeral deployments.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryInner> {
        // Mutex poisoning only happens if a writer panicked mid-update;
        // tests want the panic, not a hung lock.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl EventStore for MemoryStore {
    async fn record_transfer(
        &self,
        event: &TransferEvent,
        balances: &[BalanceRecord],
    ) -> Result<bool, LedgerError> {
        let mut inner = self.lock();
        if inner.transfers.contains_key(&event.tx_hash) {
            return Ok(false);
        }
        inner.transfers.insert(event.tx_hash.clone(), event.clone());
        for row in balances {
            inner.balances.insert(row.address.clone(), row.clone());
        }
        Ok(true)
    }

    async fn record_action(
        &self,
        action: &CorporateAction,
        balances: &[BalanceRecord],
    ) -> Result<bool, LedgerError> {
        let mut inner = self.lock();
        if let Some(source) = &action.source {
            if inner
                .actions
                .iter()
                .any(|a| a.source.as_ref() == Some(source))
            {
                return Ok(false);
            }
        }
        let id = inner.next_action_id;
        inner.next_action_id += 1;
        let mut stored = action.clone();
        stored.id = Some(id);
        inner.actions.push(stored);
        for row in balances {
            inner.balances.insert(row.address.clone(), row.clone());
        }
        Ok(true)
    }

    async fn upsert_allowlist(&self, entry: &AllowlistEntry) -> Result<(), LedgerError> {
        self.lock()
            .allowlist
            .insert(entry.address.clone(), entry.clone());
        Ok(())
    }

    async fn allowlist_status(
        &self,
        address: &Address,
    ) -> Result<Option<AllowlistEntry>, LedgerError> {
        Ok(self.lock().allowlist.get(address).cloned())
    }

    async fn allowlisted(&self) -> Result<Vec<AllowlistEntry>, LedgerError> {
        let mut entries: Vec<_> = self
            .lock()
            .allowlist
            .values()
            .filter(|e| e.approved)
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(entries)
    }

    async fn balance(&self, address: &Address) -> Result<Option<BalanceRecord>, LedgerError> {
        Ok(self.lock().balances.get(address).cloned())
    }

    async fn balances(&self) -> Result<Vec<BalanceRecord>, LedgerError> {
        let mut rows: Vec<_> = self.lock().balances.values().cloned().collect();
        rows.sort_by(|a, b| b.balance.cmp(&a.balance).then(a.address.cmp(&b.address)));
        Ok(rows)
    }

    async fn transfers_up_to(&self, block: u64) -> Result<Vec<TransferEvent>, LedgerError> {
        let mut txs: Vec<_> = self
            .lock()
            .transfers
            .values()
            .filter(|t| t.block <= block)
            .cloned()
            .collect();
        txs.sort_by(|a, b| (a.block, a.timestamp).cmp(&(b.block, b.timestamp)));
        Ok(txs)
    }

    async fn transfers_after(&self, block: u64) -> Result<Vec<TransferEvent>, LedgerError> {
        let mut txs: Vec<_> = self
            .lock()
            .transfers
            .values()
            .filter(|t| t.block > block)
            .cloned()
            .collect();
        txs.sort_by(|a, b| (b.block, b.timestamp).cmp(&(a.block, a.timestamp)));
        Ok(txs)
    }

    async fn all_transfers(&self) -> Result<Vec<TransferEvent>, LedgerError> {
        let mut txs: Vec<_> = self.lock().transfers.values().cloned().collect();
        txs.sort_by(|a, b| (b.block, b.timestamp).cmp(&(a.block, a.timestamp)));
        Ok(txs)
    }

    async fn transfers_for(&self, address: &Address) -> Result<Vec<TransferEvent>, LedgerError> {
        let mut txs: Vec<_> = self
            .lock()
            .transfers
            .values()
            .filter(|t| &t.from == address || &t.to == address)
            .cloned()
            .collect();
        txs.sort_by(|a, b| (b.block, b.timestamp).cmp(&(a.block, a.timestamp)));
        Ok(txs)
    }

    async fn actions(&self) -> Result<Vec<CorporateAction>, LedgerError> {
        let mut actions = self.lock().actions.clone();
        // Stable by block; same-block actions keep append order.
        actions.sort_by_key(|a| a.block);
        Ok(actions)
    }

    async fn cursor(&self) -> Result<Option<u64>, LedgerError> {
        Ok(self.lock().cursor)
    }

    async fn set_cursor(&self, block: u64) -> Result<(), LedgerError> {
        let mut inner = self.lock();
        inner.cursor = Some(inner.cursor.map_or(block, |c| c.max(block)));
        Ok(())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
