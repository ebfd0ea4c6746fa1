// Persistence sink for relay outcomes

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::band::SignalPrice;
use crate::error::RelayerError;

/// Outcome of a relay attempt, persisted once per broadcast.
///
/// Keyed by (tunnel_id, sequence, chain_name) so a retried relay upserts the
/// existing row instead of duplicating it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub tx_hash: String,
    pub tunnel_id: u64,
    pub sequence: u64,
    pub chain_name: String,
    pub chain_type: String,
    pub source_address: String,
    pub status: TransactionStatus,
    pub signal_values: Vec<SignalPrice>,
    pub fee: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Success,
    Failed,
}

/// Durability sink consumed by chain providers. Store failures must never
/// block relaying; providers log and alert instead of propagating.
#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Idempotent upsert keyed by (tunnel_id, sequence, chain_name)
    async fn add_or_update_transaction(
        &self,
        record: TransactionRecord,
    ) -> Result<(), RelayerError>;

    async fn get_transaction(
        &self,
        tunnel_id: u64,
        sequence: u64,
        chain_name: &str,
    ) -> Result<Option<TransactionRecord>, RelayerError>;
}

type RecordKey = (u64, u64, String);

/// In-process store, used in tests and single-node deployments
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<RecordKey, TransactionRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }
}

#[async_trait]
impl TransactionStore for MemoryStore {
    async fn add_or_update_transaction(
        &self,
        record: TransactionRecord,
    ) -> Result<(), RelayerError> {
        let key = (
            record.tunnel_id,
            record.sequence,
            record.chain_name.clone(),
        );
        self.records.lock().await.insert(key, record);
        Ok(())
    }

    async fn get_transaction(
        &self,
        tunnel_id: u64,
        sequence: u64,
        chain_name: &str,
    ) -> Result<Option<TransactionRecord>, RelayerError> {
        let key = (tunnel_id, sequence, chain_name.to_string());
        Ok(self.records.lock().await.get(&key).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(tunnel_id: u64, sequence: u64, tx_hash: &str) -> TransactionRecord {
        TransactionRecord {
            tx_hash: tx_hash.to_string(),
            tunnel_id,
            sequence,
            chain_name: "evm-testnet".to_string(),
            chain_type: "evm".to_string(),
            source_address: "0xrelayer".to_string(),
            status: TransactionStatus::Success,
            signal_values: vec![],
            fee: Some(21_000),
        }
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent_per_key() {
        let store = MemoryStore::new();
        store
            .add_or_update_transaction(record(1, 1, "0xaaa"))
            .await
            .unwrap();
        store
            .add_or_update_transaction(record(1, 1, "0xbbb"))
            .await
            .unwrap();

        assert_eq!(store.len().await, 1);
        let stored = store
            .get_transaction(1, 1, "evm-testnet")
            .await
            .unwrap()
            .unwrap();
        // latest attempt wins
        assert_eq!(stored.tx_hash, "0xbbb");
    }

    #[tokio::test]
    async fn test_distinct_keys_store_separately() {
        let store = MemoryStore::new();
        store
            .add_or_update_transaction(record(1, 1, "0xaaa"))
            .await
            .unwrap();
        store
            .add_or_update_transaction(record(1, 2, "0xbbb"))
            .await
            .unwrap();
        store
            .add_or_update_transaction(record(2, 1, "0xccc"))
            .await
            .unwrap();
        assert_eq!(store.len().await, 3);
        assert!(store
            .get_transaction(2, 2, "evm-testnet")
            .await
            .unwrap()
            .is_none());
    }
}
