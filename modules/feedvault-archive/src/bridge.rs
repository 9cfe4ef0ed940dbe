// StorageBridge: the three task verbs plus the byte transfer, behind one trait
// so the upload and deal logic can run against an in-memory network in tests.

use std::collections::HashMap;

use async_trait::async_trait;
use feedvault_common::DealHints;
use serde_json::Value;
use storacha_client::{StorachaClient, StoreAddOutcome};

use crate::error::Result;

#[async_trait]
pub trait StorageBridge: Send + Sync {
    /// Announce a CAR shard by CID and size.
    async fn store_add(&self, car: &str, size: u64) -> Result<StoreAddOutcome>;

    /// Transfer CAR bytes to an allocation handed out by `store_add`.
    async fn put_car(&self, url: &str, headers: &HashMap<String, String>, bytes: &[u8])
        -> Result<()>;

    /// Register the shard list for a content root.
    async fn upload_add(&self, root: &str, shards: &[String]) -> Result<()>;

    /// Request a storage deal; returns the raw receipt list.
    async fn deal_add(&self, root: &str, car: &str, hints: &DealHints) -> Result<Value>;
}

#[async_trait]
impl StorageBridge for StorachaClient {
    async fn store_add(&self, car: &str, size: u64) -> Result<StoreAddOutcome> {
        Ok(StorachaClient::store_add(self, car, size).await?)
    }

    async fn put_car(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
        bytes: &[u8],
    ) -> Result<()> {
        Ok(StorachaClient::put_car(self, url, headers, bytes.to_vec()).await?)
    }

    async fn upload_add(&self, root: &str, shards: &[String]) -> Result<()> {
        Ok(StorachaClient::upload_add(self, root, shards).await?)
    }

    async fn deal_add(&self, root: &str, car: &str, hints: &DealHints) -> Result<Value> {
        Ok(StorachaClient::deal_add(self, root, car, hints.miner.as_deref(), hints.duration).await?)
    }
}
