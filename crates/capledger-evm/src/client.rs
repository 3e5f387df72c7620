//! Chain client contract and the raw log model.
//!
//! `eth_getLogs` responses arrive with hex-string fields; `RawLog` mirrors
//! that shape and offers typed accessors. The `TokenChainClient` trait is the
//! only seam between the ledger and a JSON-RPC provider, so tests can drive
//! the ingestor with a scripted chain.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use alloy_primitives::U256;

use capledger_core::error::LedgerError;

/// A raw EVM log as returned by `eth_getLogs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawLog {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    #[serde(rename = "blockNumber")]
    pub block_number: String,
    #[serde(rename = "transactionHash")]
    pub tx_hash: String,
    #[serde(rename = "logIndex")]
    pub log_index: String,
    pub removed: Option<bool>,
}

impl RawLog {
    pub fn block_number_u64(&self) -> Result<u64, LedgerError> {
        parse_hex_u64(&self.block_number)
    }

    pub fn log_index_u32(&self) -> Result<u32, LedgerError> {
        parse_hex_u64(&self.log_index).map(|v| v as u32)
    }

    /// `true` if the provider retracted this log in a reorg.
    pub fn is_removed(&self) -> bool {
        self.removed.unwrap_or(false)
    }
}

/// JSON-RPC access to the token contract's chain.
#[async_trait]
pub trait TokenChainClient: Send + Sync {
    /// Current chain head block number.
    async fn block_number(&self) -> Result<u64, LedgerError>;

    /// All token-contract logs in `[from, to]` inclusive.
    async fn get_logs(&self, from: u64, to: u64) -> Result<Vec<RawLog>, LedgerError>;

    /// On-chain balance of `address`, in current on-chain units.
    async fn read_balance(&self, address: &str) -> Result<U256, LedgerError>;

    /// On-chain total supply, in current on-chain units.
    async fn read_total_supply(&self) -> Result<U256, LedgerError>;

    /// The contract's cumulative split multiplier, fixed-point base 1e18.
    async fn read_split_multiplier(&self) -> Result<U256, LedgerError>;
}

/// Parse a hex-encoded quantity (with or without `0x`) to u64.
///
/// Malformed input is an error, not zero: a log with a bogus block number
/// must never silently project at block 0.
pub fn parse_hex_u64(s: &str) -> Result<u64, LedgerError> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    u64::from_str_radix(digits, 16)
        .map_err(|_| LedgerError::InvalidInput(format!("malformed hex quantity: {s}")))
}
