//! SQLite event store.
//!
//! Persists transfers, corporate actions, allowlist entries, the balance
//! projection, and the indexer cursor to a single SQLite file. Uses `sqlx`
//! with WAL mode so cap-table reads can run alongside the projector.
//!
//! Amounts are stored as decimal strings (signed for balances), addresses
//! lower-cased; the transfer insert and its balance rows commit in one
//! transaction so the log and the projection never diverge.

use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use capledger_core::error::LedgerError;
use capledger_core::store::EventStore;
use capledger_core::types::{
    ActionKind, ActionSource, Address, AllowlistEntry, BalanceRecord, CorporateAction,
    TransferEvent,
};
use capledger_core::units;

/// SQLite-backed event store.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./ledger.db"`) or a full SQLite
    /// URL (`"sqlite:./ledger.db?mode=rwc"`).
    pub async fn open(path: &str) -> Result<Self, LedgerError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };

        let pool = SqlitePool::connect(&url)
            .await
            .map_err(|e| LedgerError::Storage(e.to_string()))?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Open an in-memory SQLite database.
    ///
    /// All data is lost when the pool is dropped. Ideal for tests. Pinned to
    /// a single connection: each `sqlite::memory:` connection would otherwise
    /// get its own empty database.
    pub async fn in_memory() -> Result<Self, LedgerError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| LedgerError::Storage(e.to_string()))?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Create tables and enable WAL mode.
    async fn init_schema(&self) -> Result<(), LedgerError> {
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await
            .map_err(|e| LedgerError::Storage(e.to_string()))?;

        let statements = [
            "CREATE TABLE IF NOT EXISTS transfers (
                hash         TEXT    PRIMARY KEY,
                from_addr    TEXT    NOT NULL,
                to_addr      TEXT    NOT NULL,
                amount       TEXT    NOT NULL,
                block_number INTEGER NOT NULL,
                timestamp    INTEGER NOT NULL
            );",
            "CREATE INDEX IF NOT EXISTS idx_transfers_from ON transfers (from_addr);",
            "CREATE INDEX IF NOT EXISTS idx_transfers_to ON transfers (to_addr);",
            "CREATE INDEX IF NOT EXISTS idx_transfers_block ON transfers (block_number);",
            "CREATE TABLE IF NOT EXISTS corporate_actions (
                id           INTEGER PRIMARY KEY AUTOINCREMENT,
                kind         TEXT    NOT NULL,
                payload      TEXT    NOT NULL,
                block_number INTEGER NOT NULL,
                timestamp    INTEGER NOT NULL,
                source_tx    TEXT,
                source_log   INTEGER
            );",
            "CREATE INDEX IF NOT EXISTS idx_actions_block ON corporate_actions (block_number);",
            // NULL source pairs (admin actions) never collide; chain-sourced
            // actions dedup on their emitting log.
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_actions_source
                ON corporate_actions (source_tx, source_log);",
            "CREATE TABLE IF NOT EXISTS allowlist (
                address   TEXT    PRIMARY KEY,
                approved  INTEGER NOT NULL,
                timestamp INTEGER NOT NULL
            );",
            "CREATE TABLE IF NOT EXISTS balances (
                address   TEXT    PRIMARY KEY,
                balance   TEXT    NOT NULL,
                timestamp INTEGER NOT NULL
            );",
            "CREATE TABLE IF NOT EXISTS indexer_state (
                id                 INTEGER PRIMARY KEY CHECK (id = 1),
                last_indexed_block INTEGER NOT NULL,
                updated_at         INTEGER NOT NULL
            );",
        ];
        for sql in statements {
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .map_err(|e| LedgerError::Storage(e.to_string()))?;
        }
        Ok(())
    }

    fn transfer_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<TransferEvent, LedgerError> {
        Ok(TransferEvent {
            tx_hash: row.get("hash"),
            from: Address::parse(row.get::<String, _>("from_addr").as_str())?,
            to: Address::parse(row.get::<String, _>("to_addr").as_str())?,
            amount: units::parse_amount(row.get::<String, _>("amount").as_str())?,
            block: row.get::<i64, _>("block_number") as u64,
            timestamp: row.get("timestamp"),
        })
    }

    async fn transfers_where(
        &self,
        sql: &str,
        bind_block: Option<i64>,
        bind_addr: Option<&str>,
    ) -> Result<Vec<TransferEvent>, LedgerError> {
        let mut query = sqlx::query(sql);
        if let Some(block) = bind_block {
            query = query.bind(block);
        }
        if let Some(addr) = bind_addr {
            query = query.bind(addr.to_string()).bind(addr.to_string());
        }
        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| LedgerError::Storage(e.to_string()))?;
        rows.iter().map(Self::transfer_from_row).collect()
    }
}

#[async_trait]
impl EventStore for SqliteStore {
    async fn record_transfer(
        &self,
        event: &TransferEvent,
        balances: &[BalanceRecord],
    ) -> Result<bool, LedgerError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| LedgerError::Storage(e.to_string()))?;

        let result = sqlx::query(
            "INSERT OR IGNORE INTO transfers
             (hash, from_addr, to_addr, amount, block_number, timestamp)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&event.tx_hash)
        .bind(event.from.as_str())
        .bind(event.to.as_str())
        .bind(event.amount.to_string())
        .bind(event.block as i64)
        .bind(event.timestamp)
        .execute(&mut *tx)
        .await
        .map_err(|e| LedgerError::Storage(e.to_string()))?;

        if result.rows_affected() == 0 {
            // Duplicate delivery: drop the balance rows with the insert.
            tx.rollback()
                .await
                .map_err(|e| LedgerError::Storage(e.to_string()))?;
            debug!(hash = %event.tx_hash, "duplicate transfer ignored");
            return Ok(false);
        }

        for row in balances {
            sqlx::query(
                "INSERT INTO balances (address, balance, timestamp)
                 VALUES (?, ?, ?)
                 ON CONFLICT(address) DO UPDATE SET
                   balance = excluded.balance,
                   timestamp = excluded.timestamp",
            )
            .bind(row.address.as_str())
            .bind(row.balance.to_string())
            .bind(row.timestamp)
            .execute(&mut *tx)
            .await
            .map_err(|e| LedgerError::Storage(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| LedgerError::Storage(e.to_string()))?;
        debug!(hash = %event.tx_hash, block = event.block, "transfer stored");
        Ok(true)
    }

    async fn record_action(
        &self,
        action: &CorporateAction,
        balances: &[BalanceRecord],
    ) -> Result<bool, LedgerError> {
        let kind = match &action.kind {
            ActionKind::Split { .. } => "split",
            ActionKind::Rename { .. } => "rename",
        };
        let payload = serde_json::to_string(&action.kind)
            .map_err(|e| LedgerError::Storage(e.to_string()))?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| LedgerError::Storage(e.to_string()))?;

        let result = sqlx::query(
            "INSERT OR IGNORE INTO corporate_actions
             (kind, payload, block_number, timestamp, source_tx, source_log)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(kind)
        .bind(&payload)
        .bind(action.block as i64)
        .bind(action.timestamp)
        .bind(action.source.as_ref().map(|s| s.tx_hash.clone()))
        .bind(action.source.as_ref().map(|s| s.log_index as i64))
        .execute(&mut *tx)
        .await
        .map_err(|e| LedgerError::Storage(e.to_string()))?;

        if result.rows_affected() == 0 {
            // Replayed chain source: drop the rebalanced rows with the insert.
            tx.rollback()
                .await
                .map_err(|e| LedgerError::Storage(e.to_string()))?;
            debug!(kind, block = action.block, "duplicate corporate action ignored");
            return Ok(false);
        }

        for row in balances {
            sqlx::query(
                "INSERT INTO balances (address, balance, timestamp)
                 VALUES (?, ?, ?)
                 ON CONFLICT(address) DO UPDATE SET
                   balance = excluded.balance,
                   timestamp = excluded.timestamp",
            )
            .bind(row.address.as_str())
            .bind(row.balance.to_string())
            .bind(row.timestamp)
            .execute(&mut *tx)
            .await
            .map_err(|e| LedgerError::Storage(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| LedgerError::Storage(e.to_string()))?;
        debug!(kind, block = action.block, rows = balances.len(), "corporate action stored");
        Ok(true)
    }

    async fn upsert_allowlist(&self, entry: &AllowlistEntry) -> Result<(), LedgerError> {
        sqlx::query(
            "INSERT INTO allowlist (address, approved, timestamp)
             VALUES (?, ?, ?)
             ON CONFLICT(address) DO UPDATE SET
               approved = excluded.approved,
               timestamp = excluded.timestamp",
        )
        .bind(entry.address.as_str())
        .bind(entry.approved as i64)
        .bind(entry.timestamp)
        .execute(&self.pool)
        .await
        .map_err(|e| LedgerError::Storage(e.to_string()))?;
        Ok(())
    }

    async fn allowlist_status(
        &self,
        address: &Address,
    ) -> Result<Option<AllowlistEntry>, LedgerError> {
        let row = sqlx::query(
            "SELECT address, approved, timestamp FROM allowlist WHERE address = ?",
        )
        .bind(address.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| LedgerError::Storage(e.to_string()))?;

        row.map(|r| {
            Ok(AllowlistEntry {
                address: Address::parse(r.get::<String, _>("address").as_str())?,
                approved: r.get::<i64, _>("approved") != 0,
                timestamp: r.get("timestamp"),
            })
        })
        .transpose()
    }

    async fn allowlisted(&self) -> Result<Vec<AllowlistEntry>, LedgerError> {
        let rows = sqlx::query(
            "SELECT address, approved, timestamp FROM allowlist
             WHERE approved = 1 ORDER BY timestamp DESC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| LedgerError::Storage(e.to_string()))?;

        rows.iter()
            .map(|r| {
                Ok(AllowlistEntry {
                    address: Address::parse(r.get::<String, _>("address").as_str())?,
                    approved: true,
                    timestamp: r.get("timestamp"),
                })
            })
            .collect()
    }

    async fn balance(&self, address: &Address) -> Result<Option<BalanceRecord>, LedgerError> {
        let row = sqlx::query(
            "SELECT address, balance, timestamp FROM balances WHERE address = ?",
        )
        .bind(address.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| LedgerError::Storage(e.to_string()))?;

        row.map(|r| {
            Ok(BalanceRecord {
                address: Address::parse(r.get::<String, _>("address").as_str())?,
                balance: units::parse_balance(r.get::<String, _>("balance").as_str())?,
                timestamp: r.get("timestamp"),
            })
        })
        .transpose()
    }

    async fn balances(&self) -> Result<Vec<BalanceRecord>, LedgerError> {
        let rows = sqlx::query("SELECT address, balance, timestamp FROM balances")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| LedgerError::Storage(e.to_string()))?;

        let mut records = rows
            .iter()
            .map(|r| {
                Ok(BalanceRecord {
                    address: Address::parse(r.get::<String, _>("address").as_str())?,
                    balance: units::parse_balance(r.get::<String, _>("balance").as_str())?,
                    timestamp: r.get("timestamp"),
                })
            })
            .collect::<Result<Vec<_>, LedgerError>>()?;
        // Decimal strings cannot be ordered correctly by SQL; sort here.
        records.sort_by(|a, b| b.balance.cmp(&a.balance).then(a.address.cmp(&b.address)));
        Ok(records)
    }

    async fn transfers_up_to(&self, block: u64) -> Result<Vec<TransferEvent>, LedgerError> {
        self.transfers_where(
            "SELECT hash, from_addr, to_addr, amount, block_number, timestamp
             FROM transfers WHERE block_number <= ?
             ORDER BY block_number ASC, timestamp ASC",
            Some(block.min(i64::MAX as u64) as i64),
            None,
        )
        .await
    }

    async fn transfers_after(&self, block: u64) -> Result<Vec<TransferEvent>, LedgerError> {
        self.transfers_where(
            "SELECT hash, from_addr, to_addr, amount, block_number, timestamp
             FROM transfers WHERE block_number > ?
             ORDER BY block_number DESC, timestamp DESC",
            Some(block.min(i64::MAX as u64) as i64),
            None,
        )
        .await
    }

    async fn all_transfers(&self) -> Result<Vec<TransferEvent>, LedgerError> {
        self.transfers_where(
            "SELECT hash, from_addr, to_addr, amount, block_number, timestamp
             FROM transfers
             ORDER BY block_number DESC, timestamp DESC",
            None,
            None,
        )
        .await
    }

    async fn transfers_for(&self, address: &Address) -> Result<Vec<TransferEvent>, LedgerError> {
        self.transfers_where(
            "SELECT hash, from_addr, to_addr, amount, block_number, timestamp
             FROM transfers WHERE from_addr = ? OR to_addr = ?
             ORDER BY block_number DESC, timestamp DESC",
            None,
            Some(address.as_str()),
        )
        .await
    }

    async fn actions(&self) -> Result<Vec<CorporateAction>, LedgerError> {
        let rows = sqlx::query(
            "SELECT id, payload, block_number, timestamp, source_tx, source_log
             FROM corporate_actions
             ORDER BY block_number ASC, id ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| LedgerError::Storage(e.to_string()))?;

        rows.iter()
            .map(|r| {
                let kind: ActionKind =
                    serde_json::from_str(r.get::<String, _>("payload").as_str())
                        .map_err(|e| LedgerError::Storage(e.to_string()))?;
                let source = match (
                    r.get::<Option<String>, _>("source_tx"),
                    r.get::<Option<i64>, _>("source_log"),
                ) {
                    (Some(tx_hash), Some(log_index)) => Some(ActionSource {
                        tx_hash,
                        log_index: log_index as u32,
                    }),
                    _ => None,
                };
                Ok(CorporateAction {
                    id: Some(r.get("id")),
                    kind,
                    block: r.get::<i64, _>("block_number") as u64,
                    timestamp: r.get("timestamp"),
                    source,
                })
            })
            .collect()
    }

    async fn cursor(&self) -> Result<Option<u64>, LedgerError> {
        let row = sqlx::query("SELECT last_indexed_block FROM indexer_state WHERE id = 1")
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| LedgerError::Storage(e.to_string()))?;
        Ok(row.map(|r| r.get::<i64, _>("last_indexed_block") as u64))
    }

    async fn set_cursor(&self, block: u64) -> Result<(), LedgerError> {
        sqlx::query(
            "INSERT INTO indexer_state (id, last_indexed_block, updated_at)
             VALUES (1, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
               last_indexed_block = MAX(last_indexed_block, excluded.last_indexed_block),
               updated_at = excluded.updated_at",
        )
        .bind(block as i64)
        .bind(chrono::Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(|e| LedgerError::Storage(e.to_string()))?;
        debug!(block, "cursor saved");
        Ok(())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
