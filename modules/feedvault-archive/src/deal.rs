use std::sync::Arc;

use feedvault_common::{Bundle, Deal, DealHints, UNASSIGNED_DEAL_ID};
use serde_json::Value;
use tracing::{info, warn};

use crate::bridge::StorageBridge;
use crate::error::Result;

pub struct DealBroker {
    bridge: Arc<dyn StorageBridge>,
}

impl DealBroker {
    pub fn new(bridge: Arc<dyn StorageBridge>) -> Self {
        Self { bridge }
    }

    /// Ask the network for a storage deal on an already stored bundle.
    ///
    /// Network errors propagate. A receipt without a usable deal id is not an
    /// error: the deal comes back with [`UNASSIGNED_DEAL_ID`].
    pub async fn request_deal(&self, bundle: &Bundle, hints: &DealHints) -> Result<Deal> {
        info!(
            root = %bundle.root,
            car = %bundle.car,
            miner = hints.miner.as_deref().unwrap_or("-"),
            duration = hints.duration.unwrap_or_default(),
            "Requesting storage deal"
        );

        let receipts = self.bridge.deal_add(&bundle.root, &bundle.car, hints).await?;
        let deal_id = match parse_deal_id(&receipts) {
            Some(id) => {
                info!(deal_id = id, root = %bundle.root, "Deal assigned");
                id
            }
            None => {
                warn!(root = %bundle.root, "No deal id in response, recording as unassigned");
                UNASSIGNED_DEAL_ID
            }
        };

        Ok(Deal {
            root: bundle.root.clone(),
            car: bundle.car.clone(),
            deal_id,
            miner: hints.miner.clone(),
            duration: hints.duration,
        })
    }
}

/// Deal id from a `deal/add` receipt list. Looks at `out.dealId` and
/// `out.ok.dealId`; accepts a JSON number or a numeric string.
pub fn parse_deal_id(receipts: &Value) -> Option<u64> {
    let out = receipts.get(0)?.get("p")?.get("out")?;
    [out.get("dealId"), out.get("ok").and_then(|ok| ok.get("dealId"))]
        .into_iter()
        .flatten()
        .find_map(|v| match v {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryBridge;
    use serde_json::json;

    fn bundle() -> Bundle {
        Bundle {
            root: "bafkreiroot".to_string(),
            car: "bagcar".to_string(),
            size: 120,
        }
    }

    #[test]
    fn deal_id_from_ok_branch() {
        let receipts = json!([{ "p": { "out": { "ok": { "dealId": 1234 } } } }]);
        assert_eq!(parse_deal_id(&receipts), Some(1234));
    }

    #[test]
    fn deal_id_from_out_directly_as_string() {
        let receipts = json!([{ "p": { "out": { "dealId": "77" } } }]);
        assert_eq!(parse_deal_id(&receipts), Some(77));
    }

    #[test]
    fn unparsable_deal_id_is_none() {
        assert_eq!(parse_deal_id(&json!([{ "p": { "out": { "ok": { "dealId": "soon" } } } }])), None);
        assert_eq!(parse_deal_id(&json!([{ "p": { "out": { "ok": {} } } }])), None);
        assert_eq!(parse_deal_id(&json!({})), None);
    }

    #[tokio::test]
    async fn request_deal_carries_hints() {
        let bridge = Arc::new(MemoryBridge::new());
        let broker = DealBroker::new(bridge.clone());
        let hints = DealHints {
            miner: Some("f01234".to_string()),
            duration: Some(518_400),
        };

        let deal = broker.request_deal(&bundle(), &hints).await.unwrap();

        assert_eq!(deal.deal_id, 42);
        assert!(deal.is_assigned());
        assert_eq!(deal.miner.as_deref(), Some("f01234"));
        assert_eq!(deal.duration, Some(518_400));
        assert_eq!(bridge.deal_requests(), vec![("bafkreiroot".to_string(), "bagcar".to_string())]);
    }

    #[tokio::test]
    async fn missing_deal_id_falls_back_to_sentinel() {
        let bridge = Arc::new(
            MemoryBridge::new().deal_response(json!([{ "p": { "out": { "ok": { "status": "queued" } } } }])),
        );
        let deal = DealBroker::new(bridge)
            .request_deal(&bundle(), &DealHints::default())
            .await
            .unwrap();

        assert_eq!(deal.deal_id, UNASSIGNED_DEAL_ID);
        assert!(!deal.is_assigned());
    }
}
