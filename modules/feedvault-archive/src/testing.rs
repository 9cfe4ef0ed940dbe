// In-memory stand-ins for the storage network and the pinning service.
//
// - MemoryBridge (StorageBridge): stateful shard store with injectable PUT
//   and deal failures and a configurable deal receipt
// - FixedMediaArchiver (MediaArchiver): deterministic gateway URLs, can fail

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use feedvault_common::DealHints;
use serde_json::{json, Value};
use storacha_client::{StorachaError, StoreAddOutcome};

use crate::bridge::StorageBridge;
use crate::car::raw_cid;
use crate::error::{ArchiveError, Result};
use crate::media::{gateway_url, MediaArchiver};

// ---------------------------------------------------------------------------
// MemoryBridge
// ---------------------------------------------------------------------------

const UPLOAD_URL_PREFIX: &str = "memory://upload/";

#[derive(Default)]
struct BridgeState {
    stored: HashSet<String>,
    transfers: usize,
    announcements: Vec<String>,
    failing_puts: u32,
    failing_deals: u32,
    registrations: Vec<(String, Vec<String>)>,
    deal_requests: Vec<(String, String)>,
}

pub struct MemoryBridge {
    state: Mutex<BridgeState>,
    deal_response: Value,
}

impl Default for MemoryBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBridge {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BridgeState::default()),
            deal_response: json!([{ "p": { "out": { "ok": { "dealId": 42 } } } }]),
        }
    }

    /// Fail the next `n` CAR transfers with a network error.
    pub fn failing_puts(self, n: u32) -> Self {
        self.state.lock().unwrap().failing_puts = n;
        self
    }

    /// Fail the next `n` deal requests with a task error.
    pub fn failing_deals(self, n: u32) -> Self {
        self.state.lock().unwrap().failing_deals = n;
        self
    }

    pub fn deal_response(mut self, receipts: Value) -> Self {
        self.deal_response = receipts;
        self
    }

    pub fn transfers(&self) -> usize {
        self.state.lock().unwrap().transfers
    }

    /// CAR CIDs passed to `store_add`, in call order.
    pub fn announcements(&self) -> Vec<String> {
        self.state.lock().unwrap().announcements.clone()
    }

    pub fn is_stored(&self, car: &str) -> bool {
        self.state.lock().unwrap().stored.contains(car)
    }

    pub fn registrations(&self) -> Vec<(String, Vec<String>)> {
        self.state.lock().unwrap().registrations.clone()
    }

    pub fn deal_requests(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().deal_requests.clone()
    }
}

#[async_trait]
impl StorageBridge for MemoryBridge {
    async fn store_add(&self, car: &str, _size: u64) -> Result<StoreAddOutcome> {
        let mut state = self.state.lock().unwrap();
        state.announcements.push(car.to_string());
        if state.stored.contains(car) {
            return Ok(StoreAddOutcome::Done);
        }
        Ok(StoreAddOutcome::Upload {
            url: format!("{UPLOAD_URL_PREFIX}{car}"),
            headers: HashMap::from([("content-type".to_string(), "application/vnd.ipld.car".to_string())]),
        })
    }

    async fn put_car(&self, url: &str, _headers: &HashMap<String, String>, bytes: &[u8]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.failing_puts > 0 {
            state.failing_puts -= 1;
            return Err(ArchiveError::Storage(StorachaError::Network(
                "connection reset".to_string(),
            )));
        }
        if bytes.is_empty() {
            return Err(ArchiveError::Storage(StorachaError::Api {
                status: 400,
                message: "empty body".to_string(),
            }));
        }
        let car = url.trim_start_matches(UPLOAD_URL_PREFIX).to_string();
        state.stored.insert(car);
        state.transfers += 1;
        Ok(())
    }

    async fn upload_add(&self, root: &str, shards: &[String]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(missing) = shards.iter().find(|s| !state.stored.contains(*s)) {
            return Err(ArchiveError::Storage(StorachaError::Task {
                ability: "upload/add".to_string(),
                message: format!("shard {missing} not stored"),
            }));
        }
        state.registrations.push((root.to_string(), shards.to_vec()));
        Ok(())
    }

    async fn deal_add(&self, root: &str, car: &str, _hints: &DealHints) -> Result<Value> {
        let mut state = self.state.lock().unwrap();
        state.deal_requests.push((root.to_string(), car.to_string()));
        if state.failing_deals > 0 {
            state.failing_deals -= 1;
            return Err(ArchiveError::Storage(StorachaError::Task {
                ability: "deal/add".to_string(),
                message: "aggregator unavailable".to_string(),
            }));
        }
        Ok(self.deal_response.clone())
    }
}

// ---------------------------------------------------------------------------
// FixedMediaArchiver
// ---------------------------------------------------------------------------

/// Returns a gateway URL derived from the PNG bytes, or fails every call.
pub struct FixedMediaArchiver {
    fail: bool,
    pinned: Mutex<Vec<String>>,
}

impl FixedMediaArchiver {
    pub fn new() -> Self {
        Self {
            fail: false,
            pinned: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            pinned: Mutex::new(Vec::new()),
        }
    }

    /// File names pinned so far, in call order.
    pub fn pinned(&self) -> Vec<String> {
        self.pinned.lock().unwrap().clone()
    }
}

impl Default for FixedMediaArchiver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaArchiver for FixedMediaArchiver {
    async fn archive(&self, file_name: &str, png: Vec<u8>) -> Result<String> {
        if self.fail {
            return Err(ArchiveError::Pinning("pinning service unavailable".to_string()));
        }
        self.pinned.lock().unwrap().push(file_name.to_string());
        Ok(gateway_url(&raw_cid(&png).to_string()))
    }
}
