//! Ledger projector — the single writer of the balance projection.
//!
//! Converts each incoming [`TokenEvent`] into balance deltas and hands the
//! event plus the affected rows to the store as one atomic write, so the
//! append log and the projection never diverge. Replay of an already-seen
//! transfer is a guaranteed no-op via the store's insert-if-absent.

use std::sync::Arc;

use alloy_primitives::I256;
use tracing::{debug, info};

use crate::error::LedgerError;
use crate::store::EventStore;
use crate::types::{
    ActionKind, Address, AllowlistEntry, BalanceRecord, CorporateAction, TokenEvent, TransferEvent,
    TransferKind,
};
use crate::units;

/// Applies decoded chain events to the stored projection.
///
/// Logically serial: events for a block range must be applied in ascending
/// (block, log index) order by a single caller.
pub struct Projector {
    store: Arc<dyn EventStore>,
}

impl Projector {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn EventStore> {
        &self.store
    }

    /// Apply one event. Returns `true` if it changed state (`false` for a
    /// deduplicated transfer or replayed chain-sourced action).
    pub async fn apply(&self, event: &TokenEvent) -> Result<bool, LedgerError> {
        match event {
            TokenEvent::Transfer(transfer) => self.apply_transfer(transfer).await,
            TokenEvent::StockSplit {
                multiplier,
                block,
                timestamp,
                source,
            } => {
                self.apply_split(*multiplier, *block, *timestamp, source.clone())
                    .await
            }
            TokenEvent::SymbolChanged {
                old_name,
                new_name,
                old_symbol,
                new_symbol,
                block,
                timestamp,
                source,
            } => {
                let action = CorporateAction {
                    id: None,
                    kind: ActionKind::Rename {
                        old_name: old_name.clone(),
                        new_name: new_name.clone(),
                        old_symbol: old_symbol.clone(),
                        new_symbol: new_symbol.clone(),
                    },
                    block: *block,
                    timestamp: *timestamp,
                    source: source.clone(),
                };
                let inserted = self.store.record_action(&action, &[]).await?;
                if inserted {
                    info!(old_symbol, new_symbol, block, "rename recorded");
                } else {
                    debug!(block, "duplicate rename skipped");
                }
                Ok(inserted)
            }
            TokenEvent::AllowlistUpdated {
                account,
                approved,
                block,
                timestamp,
            } => {
                self.store
                    .upsert_allowlist(&AllowlistEntry {
                        address: account.clone(),
                        approved: *approved,
                        timestamp: *timestamp,
                    })
                    .await?;
                debug!(account = %account, approved, block, "allowlist updated");
                Ok(true)
            }
        }
    }

    async fn apply_transfer(&self, transfer: &TransferEvent) -> Result<bool, LedgerError> {
        let amount = units::to_signed(transfer.amount)?;
        let mut rows: Vec<BalanceRecord> = Vec::with_capacity(2);

        // Balances stay signed here: a debit past zero indicates a missed or
        // out-of-order event and must survive until later credits repair it.
        match transfer.kind() {
            TransferKind::Mint => {
                rows.push(self.shifted(&transfer.to, amount, transfer.timestamp).await?);
            }
            TransferKind::Burn => {
                rows.push(
                    self.shifted(&transfer.from, -amount, transfer.timestamp)
                        .await?,
                );
            }
            TransferKind::Transfer => {
                rows.push(
                    self.shifted(&transfer.from, -amount, transfer.timestamp)
                        .await?,
                );
                rows.push(self.shifted(&transfer.to, amount, transfer.timestamp).await?);
            }
        }

        let inserted = self.store.record_transfer(transfer, &rows).await?;
        if inserted {
            debug!(
                tx = %transfer.tx_hash,
                from = %transfer.from,
                to = %transfer.to,
                amount = %transfer.amount,
                block = transfer.block,
                "transfer projected"
            );
        } else {
            debug!(tx = %transfer.tx_hash, "duplicate transfer skipped");
        }
        Ok(inserted)
    }

    /// A split retroactively reinterprets every balance; it is not a
    /// transfer and must not create one. Rebalanced rows are computed
    /// optimistically; on a replayed source the store discards them with the
    /// duplicate insert.
    async fn apply_split(
        &self,
        multiplier: alloy_primitives::U256,
        block: u64,
        timestamp: i64,
        source: Option<crate::types::ActionSource>,
    ) -> Result<bool, LedgerError> {
        let factor = units::to_signed(multiplier)?;
        let mut rebalanced = Vec::new();
        for row in self.store.balances().await? {
            let scaled = row.balance.checked_mul(factor).ok_or_else(|| {
                LedgerError::integrity(format!(
                    "split overflow for {}: {} * {}",
                    row.address, row.balance, multiplier
                ))
            })?;
            rebalanced.push(BalanceRecord {
                address: row.address,
                balance: scaled,
                timestamp,
            });
        }

        let action = CorporateAction {
            id: None,
            kind: ActionKind::Split { multiplier },
            block,
            timestamp,
            source,
        };
        let inserted = self.store.record_action(&action, &rebalanced).await?;
        if inserted {
            info!(%multiplier, block, holders = rebalanced.len(), "stock split applied");
        } else {
            debug!(%multiplier, block, "duplicate stock split skipped");
        }
        Ok(inserted)
    }

    async fn shifted(
        &self,
        address: &Address,
        delta: I256,
        timestamp: i64,
    ) -> Result<BalanceRecord, LedgerError> {
        let current = self
            .store
            .balance(address)
            .await?
            .map(|r| r.balance)
            .unwrap_or(I256::ZERO);
        let balance = current.checked_add(delta).ok_or_else(|| {
            LedgerError::integrity(format!("balance overflow for {address}: {current} + {delta}"))
        })?;
        Ok(BalanceRecord {
            address: address.clone(),
            balance,
            timestamp,
        })
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use alloy_primitives::U256;

    fn addr(n: u8) -> Address {
        Address::parse(&format!("0x{:040x}", n)).unwrap()
    }

    fn transfer(hash: &str, from: Address, to: Address, amount: u64, block: u64) -> TokenEvent {
        TokenEvent::Transfer(TransferEvent {
            tx_hash: hash.into(),
            from,
            to,
            amount: U256::from(amount),
            block,
            timestamp: block as i64,
        })
    }

    fn projector() -> Projector {
        Projector::new(Arc::new(MemoryStore::new()))
    }

    async fn balance_of(p: &Projector, a: &Address) -> I256 {
        p.store()
            .balance(a)
            .await
            .unwrap()
            .map(|r| r.balance)
            .unwrap_or(I256::ZERO)
    }

    #[tokio::test]
    async fn mint_transfer_burn_flow() {
        let p = projector();
        let (a, b) = (addr(1), addr(2));

        p.apply(&transfer("0x1", Address::zero(), a.clone(), 10_000, 10))
            .await
            .unwrap();
        p.apply(&transfer("0x2", a.clone(), b.clone(), 3_000, 20))
            .await
            .unwrap();
        p.apply(&transfer("0x3", b.clone(), Address::zero(), 1_000, 25))
            .await
            .unwrap();

        assert_eq!(balance_of(&p, &a).await, I256::try_from(7_000i64).unwrap());
        assert_eq!(balance_of(&p, &b).await, I256::try_from(2_000i64).unwrap());
    }

    #[tokio::test]
    async fn burn_creates_no_zero_address_row() {
        let p = projector();
        let a = addr(1);
        p.apply(&transfer("0x1", Address::zero(), a.clone(), 500, 10))
            .await
            .unwrap();
        p.apply(&transfer("0x2", a.clone(), Address::zero(), 200, 20))
            .await
            .unwrap();

        assert!(p.store().balance(&Address::zero()).await.unwrap().is_none());
        assert_eq!(balance_of(&p, &a).await, I256::try_from(300i64).unwrap());
    }

    #[tokio::test]
    async fn duplicate_event_is_not_double_credited() {
        let p = projector();
        let a = addr(1);
        let mint = transfer("0x1", Address::zero(), a.clone(), 1_000, 10);

        assert!(p.apply(&mint).await.unwrap());
        assert!(!p.apply(&mint).await.unwrap());
        assert_eq!(balance_of(&p, &a).await, I256::try_from(1_000i64).unwrap());
    }

    #[tokio::test]
    async fn out_of_order_debit_goes_negative_not_clamped() {
        let p = projector();
        let (a, b) = (addr(1), addr(2));

        // Debit arrives before the credit that funds it.
        p.apply(&transfer("0x2", a.clone(), b.clone(), 400, 20))
            .await
            .unwrap();
        assert_eq!(balance_of(&p, &a).await, I256::try_from(-400i64).unwrap());

        p.apply(&transfer("0x1", Address::zero(), a.clone(), 1_000, 10))
            .await
            .unwrap();
        assert_eq!(balance_of(&p, &a).await, I256::try_from(600i64).unwrap());
        assert_eq!(balance_of(&p, &b).await, I256::try_from(400i64).unwrap());
    }

    #[tokio::test]
    async fn split_scales_every_balance_in_place() {
        let p = projector();
        let (a, b) = (addr(1), addr(2));
        p.apply(&transfer("0x1", Address::zero(), a.clone(), 10_000, 10))
            .await
            .unwrap();
        p.apply(&transfer("0x2", a.clone(), b.clone(), 3_000, 20))
            .await
            .unwrap();

        p.apply(&TokenEvent::StockSplit {
            multiplier: U256::from(7),
            block: 30,
            timestamp: 30,
            source: None,
        })
        .await
        .unwrap();

        assert_eq!(balance_of(&p, &a).await, I256::try_from(49_000i64).unwrap());
        assert_eq!(balance_of(&p, &b).await, I256::try_from(21_000i64).unwrap());

        // Recorded as a corporate action, never as a transfer.
        assert_eq!(p.store().all_transfers().await.unwrap().len(), 2);
        assert_eq!(p.store().actions().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn rename_has_no_numeric_effect() {
        let p = projector();
        let a = addr(1);
        p.apply(&transfer("0x1", Address::zero(), a.clone(), 777, 10))
            .await
            .unwrap();
        p.apply(&TokenEvent::SymbolChanged {
            old_name: "Acme Equity".into(),
            new_name: "Acme Holdings".into(),
            old_symbol: "ACME".into(),
            new_symbol: "ACMH".into(),
            block: 20,
            timestamp: 20,
            source: None,
        })
        .await
        .unwrap();

        assert_eq!(balance_of(&p, &a).await, I256::try_from(777i64).unwrap());
        assert_eq!(p.store().actions().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn replayed_split_event_applies_once() {
        let p = projector();
        let a = addr(1);
        p.apply(&transfer("0x1", Address::zero(), a.clone(), 1_000, 10))
            .await
            .unwrap();

        // Same chain event delivered twice, as a replayed chunk would.
        let split = TokenEvent::StockSplit {
            multiplier: U256::from(2),
            block: 20,
            timestamp: 20,
            source: Some(crate::types::ActionSource {
                tx_hash: "0xsplit".into(),
                log_index: 0,
            }),
        };
        assert!(p.apply(&split).await.unwrap());
        assert!(!p.apply(&split).await.unwrap());

        assert_eq!(balance_of(&p, &a).await, I256::try_from(2_000i64).unwrap());
        assert_eq!(p.store().actions().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn replayed_rename_event_records_once() {
        let p = projector();
        let rename = TokenEvent::SymbolChanged {
            old_name: "Acme Equity".into(),
            new_name: "Acme Holdings".into(),
            old_symbol: "ACME".into(),
            new_symbol: "ACMH".into(),
            block: 20,
            timestamp: 20,
            source: Some(crate::types::ActionSource {
                tx_hash: "0xrename".into(),
                log_index: 1,
            }),
        };
        assert!(p.apply(&rename).await.unwrap());
        assert!(!p.apply(&rename).await.unwrap());
        assert_eq!(p.store().actions().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn allowlist_event_upserts() {
        let p = projector();
        let a = addr(9);
        p.apply(&TokenEvent::AllowlistUpdated {
            account: a.clone(),
            approved: true,
            block: 5,
            timestamp: 5,
        })
        .await
        .unwrap();

        let entry = p.store().allowlist_status(&a).await.unwrap().unwrap();
        assert!(entry.approved);
    }
}
