//! Shared types for the equity-token ledger.

use std::collections::BTreeMap;
use std::fmt;

use alloy_primitives::{I256, U256};
use serde::{Deserialize, Serialize};

use crate::error::LedgerError;

// ─── Address ─────────────────────────────────────────────────────────────────

/// A case-normalized (lower-cased) 20-byte account address, `0x…` hex.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    /// The zero address. Mints transfer from it, burns transfer to it.
    pub const ZERO: &'static str = "0x0000000000000000000000000000000000000000";

    /// Parse and normalize an address, rejecting anything that is not
    /// `0x` + 40 hex digits.
    pub fn parse(raw: &str) -> Result<Self, LedgerError> {
        let lower = raw.to_ascii_lowercase();
        let hex = lower
            .strip_prefix("0x")
            .ok_or_else(|| LedgerError::InvalidInput(format!("address missing 0x prefix: {raw}")))?;
        if hex.len() != 40 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(LedgerError::InvalidInput(format!(
                "malformed address: {raw}"
            )));
        }
        Ok(Self(lower))
    }

    /// The zero address as a value.
    pub fn zero() -> Self {
        Self(Self::ZERO.to_string())
    }

    pub fn is_zero(&self) -> bool {
        self.0 == Self::ZERO
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ─── Transfer events ─────────────────────────────────────────────────────────

/// Classification of a transfer by its endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    /// Sender is the zero address: supply enters circulation.
    Mint,
    /// Recipient is the zero address: supply leaves circulation.
    Burn,
    /// Ordinary account-to-account movement.
    Transfer,
}

/// An immutable transfer event as emitted on-chain.
///
/// `amount` is always the raw value the contract emitted at that block,
/// in pre-split units; it is never mutated after insertion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferEvent {
    /// Transaction hash — the unique, idempotency-bearing key.
    pub tx_hash: String,
    pub from: Address,
    pub to: Address,
    /// Raw on-chain amount, pre-split units.
    pub amount: U256,
    pub block: u64,
    /// Arrival timestamp, milliseconds since epoch.
    pub timestamp: i64,
}

impl TransferEvent {
    pub fn kind(&self) -> TransferKind {
        if self.from.is_zero() {
            TransferKind::Mint
        } else if self.to.is_zero() {
            TransferKind::Burn
        } else {
            TransferKind::Transfer
        }
    }
}

// ─── Corporate actions ───────────────────────────────────────────────────────

/// Kind-specific corporate-action payload.
///
/// Modelled as a tagged variant so the split and rename shapes are statically
/// distinguished rather than sharing a loosely-typed blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionKind {
    /// Multiplicative split: every holder's balance scales by `multiplier`.
    Split { multiplier: U256 },
    /// Name/symbol change. No numeric effect on balances.
    Rename {
        old_name: String,
        new_name: String,
        old_symbol: String,
        new_symbol: String,
    },
}

impl ActionKind {
    /// The split multiplier, if this action is a split.
    pub fn split_multiplier(&self) -> Option<U256> {
        match self {
            Self::Split { multiplier } => Some(*multiplier),
            Self::Rename { .. } => None,
        }
    }
}

/// The emitting log of a chain-sourced corporate action.
///
/// Transfers carry their transaction hash as the idempotency key; actions
/// need the log index too, since one transaction can emit several.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionSource {
    pub tx_hash: String,
    pub log_index: u32,
}

/// An immutable corporate action, ordered by block number; ties within a
/// block keep insertion (event-emission) order via the append id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorporateAction {
    /// Store-assigned append id (`None` until persisted).
    pub id: Option<i64>,
    pub kind: ActionKind,
    pub block: u64,
    pub timestamp: i64,
    /// Emitting log, for chain-sourced actions. Re-delivery of the same
    /// source is a store-level no-op; admin-recorded actions (`None`) always
    /// append.
    #[serde(default)]
    pub source: Option<ActionSource>,
}

// ─── Allowlist ───────────────────────────────────────────────────────────────

/// Compliance-gate entry: latest event for an address wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowlistEntry {
    pub address: Address,
    pub approved: bool,
    pub timestamp: i64,
}

// ─── Balances ────────────────────────────────────────────────────────────────

/// A projection row. Signed: a debit may transiently drive a balance
/// negative when events arrive out of order, and clamping here would corrupt
/// later arithmetic. Non-positive rows are filtered at presentation time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceRecord {
    pub address: Address,
    pub balance: I256,
    pub timestamp: i64,
}

/// A positive-balance snapshot: address → effective balance.
pub type BalanceMap = BTreeMap<Address, U256>;

// ─── Decoded chain events ────────────────────────────────────────────────────

/// A decoded on-chain event relevant to the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenEvent {
    Transfer(TransferEvent),
    AllowlistUpdated {
        account: Address,
        approved: bool,
        block: u64,
        timestamp: i64,
    },
    StockSplit {
        multiplier: U256,
        block: u64,
        timestamp: i64,
        /// Emitting log when decoded from the chain; `None` for
        /// admin-recorded mirrors.
        source: Option<ActionSource>,
    },
    SymbolChanged {
        old_name: String,
        new_name: String,
        old_symbol: String,
        new_symbol: String,
        block: u64,
        timestamp: i64,
        source: Option<ActionSource>,
    },
}

impl TokenEvent {
    /// Block the event was emitted in.
    pub fn block(&self) -> u64 {
        match self {
            Self::Transfer(t) => t.block,
            Self::AllowlistUpdated { block, .. }
            | Self::StockSplit { block, .. }
            | Self::SymbolChanged { block, .. } => *block,
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_parse_normalizes_case() {
        let a = Address::parse("0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48").unwrap();
        assert_eq!(a.as_str(), "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48");
    }

    #[test]
    fn address_parse_rejects_malformed() {
        assert!(Address::parse("a0b86991").is_err()); // no prefix
        assert!(Address::parse("0x1234").is_err()); // too short
        assert!(Address::parse("0xzz0000000000000000000000000000000000zz00").is_err());
    }

    #[test]
    fn zero_address_detection() {
        assert!(Address::zero().is_zero());
        assert!(Address::parse(Address::ZERO).unwrap().is_zero());
    }

    #[test]
    fn transfer_kind_classification() {
        let mint = TransferEvent {
            tx_hash: "0x01".into(),
            from: Address::zero(),
            to: Address::parse("0x1111111111111111111111111111111111111111").unwrap(),
            amount: U256::from(100),
            block: 1,
            timestamp: 0,
        };
        assert_eq!(mint.kind(), TransferKind::Mint);

        let burn = TransferEvent {
            from: mint.to.clone(),
            to: Address::zero(),
            ..mint.clone()
        };
        assert_eq!(burn.kind(), TransferKind::Burn);

        let plain = TransferEvent {
            from: mint.to.clone(),
            to: Address::parse("0x2222222222222222222222222222222222222222").unwrap(),
            ..mint.clone()
        };
        assert_eq!(plain.kind(), TransferKind::Transfer);
    }

    #[test]
    fn action_kind_tagged_roundtrip() {
        let split = ActionKind::Split {
            multiplier: U256::from(7),
        };
        let json = serde_json::to_string(&split).unwrap();
        assert!(json.contains("\"kind\":\"split\""));
        let back: ActionKind = serde_json::from_str(&json).unwrap();
        assert_eq!(back, split);

        let rename = ActionKind::Rename {
            old_name: "Acme Equity".into(),
            new_name: "Acme Holdings".into(),
            old_symbol: "ACME".into(),
            new_symbol: "ACMH".into(),
        };
        let json = serde_json::to_string(&rename).unwrap();
        assert!(json.contains("\"kind\":\"rename\""));
        assert_eq!(serde_json::from_str::<ActionKind>(&json).unwrap(), rename);
    }

    #[test]
    fn split_multiplier_accessor() {
        let split = ActionKind::Split {
            multiplier: U256::from(2),
        };
        assert_eq!(split.split_multiplier(), Some(U256::from(2)));
        let rename = ActionKind::Rename {
            old_name: String::new(),
            new_name: String::new(),
            old_symbol: String::new(),
            new_symbol: String::new(),
        };
        assert_eq!(rename.split_multiplier(), None);
    }
}
