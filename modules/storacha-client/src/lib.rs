pub mod error;
pub mod types;

pub use error::{Result, StorachaError};
pub use types::{first_out, task_ok, Link, StoreAddOutcome};

use std::collections::HashMap;
use std::time::Duration;

use reqwest::header::CONTENT_LENGTH;
use serde::Serialize;
use serde_json::Value;
use types::{DealAddArgs, StoreAddArgs, TaskRequest, UploadAddArgs};

pub const DEFAULT_BRIDGE_URL: &str = "https://up.storacha.network/bridge";

/// Client for the Storacha HTTP bridge. Every task is keyed by content
/// identifiers, so each call is safe to repeat verbatim.
pub struct StorachaClient {
    client: reqwest::Client,
    bridge_url: String,
    space_did: String,
    x_auth_secret: String,
    authorization: String,
}

impl StorachaClient {
    pub fn new(
        bridge_url: &str,
        space_did: &str,
        x_auth_secret: &str,
        authorization: &str,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()?;

        Ok(Self {
            client,
            bridge_url: bridge_url.to_string(),
            space_did: space_did.to_string(),
            x_auth_secret: x_auth_secret.to_string(),
            authorization: authorization.to_string(),
        })
    }

    pub fn space_did(&self) -> &str {
        &self.space_did
    }

    /// Invoke one ability against the configured space. Returns the raw
    /// receipt list.
    async fn invoke<A: Serialize>(&self, ability: &str, args: &A) -> Result<Value> {
        let body = TaskRequest {
            tasks: vec![(
                ability.to_string(),
                self.space_did.clone(),
                serde_json::to_value(args)?,
            )],
        };

        let resp = self
            .client
            .post(&self.bridge_url)
            .header("X-Auth-Secret", &self.x_auth_secret)
            .header("Authorization", &self.authorization)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(StorachaError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let receipts: Value = resp.json().await?;
        tracing::debug!(ability, "Bridge task completed");
        Ok(receipts)
    }

    /// Announce a CAR shard. The network answers with an upload target for a
    /// new allocation, or `done` when the shard is already stored.
    pub async fn store_add(&self, car: &str, size: u64) -> Result<StoreAddOutcome> {
        let args = StoreAddArgs {
            link: Link::new(car),
            size,
        };
        let receipts = self.invoke("store/add", &args).await?;
        let out = first_out("store/add", &receipts)?;
        StoreAddOutcome::from_out(&out)
    }

    /// PUT CAR bytes to the upload URL handed out by `store/add`.
    pub async fn put_car(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
        bytes: Vec<u8>,
    ) -> Result<()> {
        let mut req = self.client.put(url);
        for (name, value) in headers {
            // reqwest derives the length from the body
            if name.eq_ignore_ascii_case(CONTENT_LENGTH.as_str()) {
                continue;
            }
            req = req.header(name.as_str(), value.as_str());
        }

        let resp = req.body(bytes).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(StorachaError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(())
    }

    /// Register an upload: the content root and the CAR shards that carry it.
    pub async fn upload_add(&self, root: &str, shards: &[String]) -> Result<()> {
        let args = UploadAddArgs {
            root: Link::new(root),
            shards: shards.iter().map(|s| Link::new(s)).collect(),
        };
        let receipts = self.invoke("upload/add", &args).await?;
        let out = first_out("upload/add", &receipts)?;
        task_ok("upload/add", &out)?;
        Ok(())
    }

    /// Request a storage deal. The raw receipt list is returned because the
    /// deal id is not reliably present.
    pub async fn deal_add(
        &self,
        root: &str,
        car: &str,
        miner: Option<&str>,
        duration: Option<u64>,
    ) -> Result<Value> {
        let args = DealAddArgs {
            root: Link::new(root),
            car: Link::new(car),
            miner: miner.map(String::from),
            duration,
        };
        self.invoke("deal/add", &args).await
    }
}
