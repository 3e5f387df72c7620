//! The ingestion loop — replays token-contract logs into the ledger.
//!
//! Resume-from-cursor, chunked catch-up, then steady-state polling:
//!
//! ```text
//! cursor? ──none──▶ pin cursor at current head (fresh deployments do not
//!    │              backfill the token's whole history)
//!    └──some──▶ for each chunk of ≤ blocks_per_query blocks up to head:
//!                   fetch logs → sort (block, log index) → project → advance cursor
//!               then poll every poll_interval_ms
//! ```
//!
//! The cursor only advances after every event in a chunk is projected, so a
//! crash mid-chunk replays the chunk; duplicate transfers are no-ops in the
//! store. Shutdown is observed between chunks, never mid-chunk.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use capledger_core::error::LedgerError;
use capledger_core::projector::Projector;
use capledger_core::store::EventStore;

use crate::client::{RawLog, TokenChainClient};
use crate::decode;

/// Tuning knobs for the ingestion loop.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Maximum block span per `eth_getLogs` call.
    pub blocks_per_query: u64,
    /// Steady-state poll interval once caught up.
    pub poll_interval_ms: u64,
    /// Retries for transient RPC failures before giving up.
    pub max_retries: u32,
    /// Backoff between retries, linear in the attempt number.
    pub retry_backoff_ms: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            blocks_per_query: 1_000,
            poll_interval_ms: 5_000,
            max_retries: 5,
            retry_backoff_ms: 500,
        }
    }
}

/// Drives a [`TokenChainClient`] into the projector.
pub struct Ingestor<C> {
    client: C,
    store: Arc<dyn EventStore>,
    projector: Projector,
    config: IngestConfig,
}

impl<C: TokenChainClient> Ingestor<C> {
    pub fn new(client: C, store: Arc<dyn EventStore>, config: IngestConfig) -> Self {
        Self {
            client,
            projector: Projector::new(store.clone()),
            store,
            config,
        }
    }

    /// Run until the shutdown channel flips to `true` or a fatal error.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), LedgerError> {
        let poll = Duration::from_millis(self.config.poll_interval_ms);
        loop {
            if *shutdown.borrow() {
                info!("ingestor stopping");
                return Ok(());
            }

            self.catch_up(&shutdown).await?;

            tokio::select! {
                _ = tokio::time::sleep(poll) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("ingestor stopping");
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Ingest everything between the cursor and the current head, advancing
    /// the cursor chunk by chunk. Returns the last committed block.
    pub async fn catch_up(
        &self,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<u64, LedgerError> {
        let head = self.head_with_retry().await?;

        let mut last = match self.store.cursor().await? {
            Some(block) => block,
            None => {
                // First run: start at the head rather than replaying the
                // token's entire on-chain history.
                self.store.set_cursor(head).await?;
                info!(head, "no cursor found, starting at current head");
                return Ok(head);
            }
        };

        while last < head {
            if *shutdown.borrow() {
                return Ok(last);
            }
            let from = last + 1;
            let to = (from + self.config.blocks_per_query - 1).min(head);
            self.ingest_range(from, to).await?;
            last = to;
        }
        Ok(last)
    }

    async fn ingest_range(&self, from: u64, to: u64) -> Result<(), LedgerError> {
        let logs = self.logs_with_retry(from, to).await?;

        // Validate ordering keys up front; a malformed log aborts the range
        // before anything is projected.
        let mut ordered = Vec::with_capacity(logs.len());
        for log in logs {
            if log.is_removed() {
                continue;
            }
            let key = (log.block_number_u64()?, log.log_index_u32()?);
            ordered.push((key, log));
        }
        ordered.sort_by_key(|(key, _)| *key);

        let timestamp = chrono::Utc::now().timestamp_millis();
        let total = ordered.len();
        let mut applied = 0usize;
        for (_, log) in &ordered {
            if let Some(event) = decode::decode_log(log, timestamp)? {
                if self.projector.apply(&event).await? {
                    applied += 1;
                }
            }
        }

        self.store.set_cursor(to).await?;
        info!(from, to, logs = total, applied, "range ingested");
        Ok(())
    }

    async fn head_with_retry(&self) -> Result<u64, LedgerError> {
        let mut attempt = 0u32;
        loop {
            match self.client.block_number().await {
                Ok(head) => return Ok(head),
                Err(e) if e.is_transient() && attempt < self.config.max_retries => {
                    attempt += 1;
                    warn!(attempt, error = %e, "head fetch failed, retrying");
                    self.backoff(attempt).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn logs_with_retry(&self, from: u64, to: u64) -> Result<Vec<RawLog>, LedgerError> {
        let mut attempt = 0u32;
        loop {
            match self.client.get_logs(from, to).await {
                Ok(logs) => return Ok(logs),
                Err(e) if e.is_transient() && attempt < self.config.max_retries => {
                    attempt += 1;
                    warn!(from, to, attempt, error = %e, "log fetch failed, retrying");
                    self.backoff(attempt).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn backoff(&self, attempt: u32) {
        let delay = self.config.retry_backoff_ms * attempt as u64;
        debug!(delay_ms = delay, "backing off");
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use alloy_primitives::U256;
    use alloy_sol_types::SolEvent;
    use async_trait::async_trait;

    use capledger_core::store::MemoryStore;
    use capledger_core::types::Address;

    use crate::decode::{StockSplit, Transfer};

    struct ScriptedChain {
        head: u64,
        logs: Vec<RawLog>,
        // Errors served before the first successful get_logs answer.
        failures: Mutex<u32>,
        calls: Mutex<Vec<(u64, u64)>>,
    }

    #[async_trait]
    impl TokenChainClient for ScriptedChain {
        async fn block_number(&self) -> Result<u64, LedgerError> {
            Ok(self.head)
        }

        async fn get_logs(&self, from: u64, to: u64) -> Result<Vec<RawLog>, LedgerError> {
            let mut failures = self.failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(LedgerError::Rpc("flaky".into()));
            }
            drop(failures);
            self.calls.lock().unwrap().push((from, to));
            Ok(self
                .logs
                .iter()
                .filter(|l| (from..=to).contains(&l.block_number_u64().unwrap()))
                .cloned()
                .collect())
        }

        async fn read_balance(&self, _address: &str) -> Result<U256, LedgerError> {
            Ok(U256::ZERO)
        }

        async fn read_total_supply(&self) -> Result<U256, LedgerError> {
            Ok(U256::ZERO)
        }

        async fn read_split_multiplier(&self) -> Result<U256, LedgerError> {
            Ok(U256::from_limbs([1_000_000_000_000_000_000, 0, 0, 0]))
        }
    }

    fn split_log(hash: &str, multiplier: u64, block: u64, index: u32) -> RawLog {
        RawLog {
            address: "0xcccccccccccccccccccccccccccccccccccccccc".into(),
            topics: vec![format!("{:?}", StockSplit::SIGNATURE_HASH)],
            data: format!("0x{:064x}", multiplier),
            block_number: format!("0x{block:x}"),
            tx_hash: hash.into(),
            log_index: format!("0x{index:x}"),
            removed: None,
        }
    }

    fn transfer_log(hash: &str, from: u8, to: u8, amount: u64, block: u64, index: u32) -> RawLog {
        RawLog {
            address: "0xcccccccccccccccccccccccccccccccccccccccc".into(),
            topics: vec![
                format!("{:?}", Transfer::SIGNATURE_HASH),
                format!("0x{from:064x}"),
                format!("0x{to:064x}"),
            ],
            data: format!("0x{:064x}", amount),
            block_number: format!("0x{block:x}"),
            tx_hash: hash.into(),
            log_index: format!("0x{index:x}"),
            removed: None,
        }
    }

    fn config() -> IngestConfig {
        IngestConfig {
            blocks_per_query: 10,
            poll_interval_ms: 1,
            max_retries: 3,
            retry_backoff_ms: 0,
        }
    }

    fn addr(n: u8) -> Address {
        Address::parse(&format!("0x{n:040x}")).unwrap()
    }

    #[tokio::test]
    async fn first_run_pins_cursor_at_head() {
        let store = Arc::new(MemoryStore::new());
        let chain = ScriptedChain {
            head: 500,
            logs: vec![transfer_log("0x1", 0, 1, 100, 400, 0)],
            failures: Mutex::new(0),
            calls: Mutex::new(Vec::new()),
        };
        let ingestor = Ingestor::new(chain, store.clone(), config());

        let (_tx, rx) = watch::channel(false);
        assert_eq!(ingestor.catch_up(&rx).await.unwrap(), 500);
        assert_eq!(store.cursor().await.unwrap(), Some(500));
        // No history replayed on a fresh deployment.
        assert!(store.all_transfers().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn resumes_in_chunks_and_projects_in_order() {
        let store = Arc::new(MemoryStore::new());
        store.set_cursor(0).await.unwrap();

        // Same-block logs arrive shuffled; log index must win.
        let chain = ScriptedChain {
            head: 25,
            logs: vec![
                transfer_log("0x2", 1, 2, 300, 20, 1),
                transfer_log("0x1", 0, 1, 1_000, 20, 0),
            ],
            failures: Mutex::new(0),
            calls: Mutex::new(Vec::new()),
        };
        let ingestor = Ingestor::new(chain, store.clone(), config());

        let (_tx, rx) = watch::channel(false);
        assert_eq!(ingestor.catch_up(&rx).await.unwrap(), 25);
        assert_eq!(store.cursor().await.unwrap(), Some(25));

        // blocks_per_query = 10 → three ranges.
        {
            let ingested = store.all_transfers().await.unwrap();
            assert_eq!(ingested.len(), 2);
        }

        // Mint applied before the spend: no negative dip survives.
        let b1 = store.balance(&addr(1)).await.unwrap().unwrap();
        assert_eq!(b1.balance.to_string(), "700");
        let b2 = store.balance(&addr(2)).await.unwrap().unwrap();
        assert_eq!(b2.balance.to_string(), "300");
    }

    #[tokio::test]
    async fn ranges_are_chunked() {
        let store = Arc::new(MemoryStore::new());
        store.set_cursor(0).await.unwrap();
        let chain = ScriptedChain {
            head: 25,
            logs: vec![],
            failures: Mutex::new(0),
            calls: Mutex::new(Vec::new()),
        };
        let ingestor = Ingestor::new(chain, store.clone(), config());

        let (_tx, rx) = watch::channel(false);
        ingestor.catch_up(&rx).await.unwrap();
        assert_eq!(
            *ingestor.client.calls.lock().unwrap(),
            vec![(1, 10), (11, 20), (21, 25)]
        );
    }

    #[tokio::test]
    async fn transient_rpc_errors_are_retried() {
        let store = Arc::new(MemoryStore::new());
        store.set_cursor(0).await.unwrap();
        let chain = ScriptedChain {
            head: 5,
            logs: vec![transfer_log("0x1", 0, 1, 100, 3, 0)],
            failures: Mutex::new(2),
            calls: Mutex::new(Vec::new()),
        };
        let ingestor = Ingestor::new(chain, store.clone(), config());

        let (_tx, rx) = watch::channel(false);
        assert_eq!(ingestor.catch_up(&rx).await.unwrap(), 5);
        assert_eq!(store.all_transfers().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn retries_exhausted_surface_the_error() {
        let store = Arc::new(MemoryStore::new());
        store.set_cursor(0).await.unwrap();
        let chain = ScriptedChain {
            head: 5,
            logs: vec![],
            failures: Mutex::new(10),
            calls: Mutex::new(Vec::new()),
        };
        let ingestor = Ingestor::new(chain, store.clone(), config());

        let (_tx, rx) = watch::channel(false);
        let err = ingestor.catch_up(&rx).await.unwrap_err();
        assert!(matches!(err, LedgerError::Rpc(_)));
        // Cursor untouched by the failed range.
        assert_eq!(store.cursor().await.unwrap(), Some(0));
    }

    #[tokio::test]
    async fn shutdown_between_chunks_keeps_cursor_committed() {
        let store = Arc::new(MemoryStore::new());
        store.set_cursor(0).await.unwrap();
        let chain = ScriptedChain {
            head: 25,
            logs: vec![],
            failures: Mutex::new(0),
            calls: Mutex::new(Vec::new()),
        };
        let ingestor = Ingestor::new(chain, store.clone(), config());

        let (tx, rx) = watch::channel(true);
        let last = ingestor.catch_up(&rx).await.unwrap();
        drop(tx);
        // Stopped before the first chunk; cursor is whatever was committed.
        assert_eq!(last, 0);
        assert_eq!(store.cursor().await.unwrap(), Some(0));
    }

    // Serves every stored log for any requested range, like a provider whose
    // answers overlap across chunk boundaries.
    struct OverlappingChain {
        head: u64,
        logs: Vec<RawLog>,
    }

    #[async_trait]
    impl TokenChainClient for OverlappingChain {
        async fn block_number(&self) -> Result<u64, LedgerError> {
            Ok(self.head)
        }

        async fn get_logs(&self, _from: u64, _to: u64) -> Result<Vec<RawLog>, LedgerError> {
            Ok(self.logs.clone())
        }

        async fn read_balance(&self, _address: &str) -> Result<U256, LedgerError> {
            Ok(U256::ZERO)
        }

        async fn read_total_supply(&self) -> Result<U256, LedgerError> {
            Ok(U256::ZERO)
        }

        async fn read_split_multiplier(&self) -> Result<U256, LedgerError> {
            Ok(U256::from_limbs([1_000_000_000_000_000_000, 0, 0, 0]))
        }
    }

    #[tokio::test]
    async fn redelivered_split_log_applies_once() {
        let store = Arc::new(MemoryStore::new());
        store.set_cursor(0).await.unwrap();

        // head 25 with blocks_per_query 10: three ranges, each re-serving
        // the same mint and split logs.
        let chain = OverlappingChain {
            head: 25,
            logs: vec![
                transfer_log("0x1", 0, 1, 1_000, 3, 0),
                split_log("0x2", 2, 5, 0),
            ],
        };
        let ingestor = Ingestor::new(chain, store.clone(), config());

        let (_tx, rx) = watch::channel(false);
        assert_eq!(ingestor.catch_up(&rx).await.unwrap(), 25);

        // One mint, one split, balances scaled exactly once.
        assert_eq!(store.all_transfers().await.unwrap().len(), 1);
        assert_eq!(store.actions().await.unwrap().len(), 1);
        let b = store.balance(&addr(1)).await.unwrap().unwrap();
        assert_eq!(b.balance.to_string(), "2000");
    }

    #[tokio::test]
    async fn replaying_a_chunk_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        store.set_cursor(0).await.unwrap();
        let chain = ScriptedChain {
            head: 25,
            logs: vec![transfer_log("0x1", 0, 1, 1_000, 5, 0)],
            failures: Mutex::new(0),
            calls: Mutex::new(Vec::new()),
        };
        let ingestor = Ingestor::new(chain, store.clone(), config());

        let (_tx, rx) = watch::channel(false);
        ingestor.catch_up(&rx).await.unwrap();
        // Simulate a crash that lost the cursor but not the data.
        store.set_cursor(0).await.unwrap(); // ignored: cursor is monotone
        ingestor.catch_up(&rx).await.unwrap();

        let b = store.balance(&addr(1)).await.unwrap().unwrap();
        assert_eq!(b.balance.to_string(), "1000");
    }
}
