//! ABI decoding of token-contract logs into ledger events.
//!
//! The contract emits four event shapes; anything else in the log stream is
//! skipped with a debug log rather than rejected, so unrelated contract
//! events never stall ingestion.

use alloy_primitives::{hex, B256};
use alloy_sol_types::{sol, SolEvent};
use tracing::debug;

use capledger_core::error::LedgerError;
use capledger_core::types::{ActionSource, Address, TokenEvent, TransferEvent};

use crate::client::RawLog;

sol! {
    event Transfer(address indexed from, address indexed to, uint256 value);
    event AllowlistUpdated(address indexed account, bool approved);
    event StockSplit(uint256 multiplier);
    event SymbolChanged(string oldName, string newName, string oldSymbol, string newSymbol);
}

/// Decode one raw log. `Ok(None)` means the topic is not one of ours.
///
/// `timestamp` is the arrival time stamped onto the event; logs carry no
/// timestamp of their own and the block header fetch is not worth a round
/// trip per log.
pub fn decode_log(log: &RawLog, timestamp: i64) -> Result<Option<TokenEvent>, LedgerError> {
    let Some(first) = log.topics.first() else {
        return Ok(None);
    };
    let topic0: B256 = first
        .parse()
        .map_err(|_| LedgerError::InvalidInput(format!("malformed topic {first}")))?;

    let topics = log
        .topics
        .iter()
        .map(|t| {
            t.parse::<B256>()
                .map_err(|_| LedgerError::InvalidInput(format!("malformed topic {t}")))
        })
        .collect::<Result<Vec<_>, _>>()?;
    let data = hex::decode(&log.data)
        .map_err(|_| LedgerError::InvalidInput(format!("malformed log data in {}", log.tx_hash)))?;
    let block = log.block_number_u64()?;
    let source = ActionSource {
        tx_hash: log.tx_hash.clone(),
        log_index: log.log_index_u32()?,
    };

    let event = if topic0 == Transfer::SIGNATURE_HASH {
        let ev = Transfer::decode_raw_log(topics, &data, true)
            .map_err(|e| LedgerError::InvalidInput(format!("transfer log: {e}")))?;
        Some(TokenEvent::Transfer(TransferEvent {
            tx_hash: log.tx_hash.clone(),
            from: to_ledger_address(&ev.from)?,
            to: to_ledger_address(&ev.to)?,
            amount: ev.value,
            block,
            timestamp,
        }))
    } else if topic0 == AllowlistUpdated::SIGNATURE_HASH {
        let ev = AllowlistUpdated::decode_raw_log(topics, &data, true)
            .map_err(|e| LedgerError::InvalidInput(format!("allowlist log: {e}")))?;
        Some(TokenEvent::AllowlistUpdated {
            account: to_ledger_address(&ev.account)?,
            approved: ev.approved,
            block,
            timestamp,
        })
    } else if topic0 == StockSplit::SIGNATURE_HASH {
        let ev = StockSplit::decode_raw_log(topics, &data, true)
            .map_err(|e| LedgerError::InvalidInput(format!("split log: {e}")))?;
        Some(TokenEvent::StockSplit {
            multiplier: ev.multiplier,
            block,
            timestamp,
            source: Some(source),
        })
    } else if topic0 == SymbolChanged::SIGNATURE_HASH {
        let ev = SymbolChanged::decode_raw_log(topics, &data, true)
            .map_err(|e| LedgerError::InvalidInput(format!("rename log: {e}")))?;
        Some(TokenEvent::SymbolChanged {
            old_name: ev.oldName,
            new_name: ev.newName,
            old_symbol: ev.oldSymbol,
            new_symbol: ev.newSymbol,
            block,
            timestamp,
            source: Some(source),
        })
    } else {
        debug!(topic = %first, tx = %log.tx_hash, "unrecognized log topic skipped");
        None
    };

    Ok(event)
}

fn to_ledger_address(raw: &alloy_primitives::Address) -> Result<Address, LedgerError> {
    Address::parse(&format!("0x{}", hex::encode(raw.as_slice())))
}
