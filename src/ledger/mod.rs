// src/ledger/mod.rs — Credit ledger types and idempotency keys
//
// The ledger is append-only; an owner's balance is always the signed sum of
// committed transactions. Every mutation goes through the store's atomic
// insert — nothing else is allowed to read-modify-write a balance.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::infra::errors::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxnType {
    Usage,
    Refund,
    Grant,
    Adjustment,
}

impl TxnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxnType::Usage => "usage",
            TxnType::Refund => "refund",
            TxnType::Grant => "grant",
            TxnType::Adjustment => "adjustment",
        }
    }

    pub fn parse(s: &str) -> Result<Self, EngineError> {
        match s {
            "usage" => Ok(TxnType::Usage),
            "refund" => Ok(TxnType::Refund),
            "grant" => Ok(TxnType::Grant),
            "adjustment" => Ok(TxnType::Adjustment),
            other => Err(EngineError::Config(format!(
                "unknown transaction type '{other}'"
            ))),
        }
    }
}

/// One committed ledger row.
#[derive(Debug, Clone, Serialize)]
pub struct LedgerTransaction {
    pub id: String,
    pub owner_id: String,
    pub seconds_delta: i64,
    pub txn_type: TxnType,
    pub description: String,
    pub idempotency_key: String,
    pub created_at: DateTime<Utc>,
}

/// Idempotency key for a live segment: the session plus the resume instant
/// identifies the segment logically, so a client retry maps to the same key.
pub fn segment_key(session_id: &str, resumed_at: DateTime<Utc>) -> String {
    format!("{session_id}:{}", resumed_at.timestamp_millis())
}

/// Idempotency key for the reaper's reconciling debit. Stable across sweeps,
/// so a session swept twice is never double-charged.
pub fn zombie_key(session_id: &str) -> String {
    format!("{session_id}:zombie-cleanup")
}
