// Archive: the public entry point for the archival phase.
// Callers hand over finalized artifact bytes; the archive packs them, makes
// sure the network holds them and asks for a storage deal.

use std::sync::Arc;
use std::time::Duration;

use feedvault_common::{Bundle, Deal, DealHints};
use storacha_client::StorachaClient;
use tracing::info;

use crate::bridge::StorageBridge;
use crate::car::pack;
use crate::deal::DealBroker;
use crate::error::Result;
use crate::upload::{StoreAck, Uploader};

/// Everything the archival phase produced for one artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveReceipt {
    pub bundle: Bundle,
    pub ack: StoreAck,
    pub deal: Deal,
}

pub struct Archive {
    uploader: Uploader,
    broker: DealBroker,
}

impl Archive {
    pub fn new(bridge: Arc<dyn StorageBridge>) -> Self {
        Self {
            uploader: Uploader::new(bridge.clone()),
            broker: DealBroker::new(bridge),
        }
    }

    /// Archive backed by the Storacha HTTP bridge.
    pub fn storacha(client: StorachaClient) -> Self {
        Self::new(Arc::new(client))
    }

    pub fn with_upload_retry(mut self, max_attempts: u32, retry_base: Duration) -> Self {
        self.uploader = self.uploader.with_retry(max_attempts, retry_base);
        self
    }

    /// Pack, store and open a deal for `bytes`. Safe to call again with the
    /// same bytes after a failure at any step.
    pub async fn store(&self, bytes: &[u8], hints: &DealHints) -> Result<ArchiveReceipt> {
        let packed = pack(bytes);
        info!(
            root = %packed.bundle.root,
            car = %packed.bundle.car,
            size = packed.bundle.size,
            "Artifact packed"
        );

        let ack = self.uploader.ensure_stored(&packed).await?;
        let deal = self.broker.request_deal(&packed.bundle, hints).await?;

        Ok(ArchiveReceipt {
            bundle: packed.bundle,
            ack,
            deal,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryBridge;

    #[tokio::test]
    async fn store_runs_upload_then_deal() {
        let bridge = Arc::new(MemoryBridge::new());
        let archive = Archive::new(bridge.clone()).with_upload_retry(1, Duration::ZERO);

        let receipt = archive
            .store(b"Name,Handle\nAda,@ada\n", &DealHints::default())
            .await
            .unwrap();

        assert_eq!(receipt.ack.root, receipt.bundle.root);
        assert_eq!(receipt.deal.root, receipt.bundle.root);
        assert_eq!(receipt.deal.deal_id, 42);
        assert_eq!(bridge.transfers(), 1);
        assert_eq!(bridge.deal_requests().len(), 1);
    }

    #[tokio::test]
    async fn re_archiving_same_bytes_transfers_once() {
        let bridge = Arc::new(MemoryBridge::new());
        let archive = Archive::new(bridge.clone());

        let first = archive.store(b"rows", &DealHints::default()).await.unwrap();
        let second = archive.store(b"rows", &DealHints::default()).await.unwrap();

        assert_eq!(first.bundle, second.bundle);
        assert!(!second.ack.transferred);
        assert_eq!(bridge.transfers(), 1);
    }
}
