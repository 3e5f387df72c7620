//! capledger-evm — token-contract log ingestion.
//!
//! Bridges a JSON-RPC provider to `capledger-core`: a chain-client seam
//! ([`client::TokenChainClient`]), ABI decoding of the contract's four event
//! shapes ([`decode`]), the cursor-resuming ingestion loop
//! ([`ingest::Ingestor`]), and chain-checked historical snapshots
//! ([`snapshot::verified_snapshot`]).

pub mod client;
pub mod decode;
pub mod ingest;
pub mod snapshot;

pub use client::{RawLog, TokenChainClient};
pub use ingest::{IngestConfig, Ingestor};
pub use snapshot::verified_snapshot;
