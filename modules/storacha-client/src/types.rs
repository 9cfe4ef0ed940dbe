use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, StorachaError};

/// IPLD link in DAG-JSON form: `{"/": "<cid>"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    #[serde(rename = "/")]
    pub cid: String,
}

impl Link {
    pub fn new(cid: &str) -> Self {
        Self {
            cid: cid.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct StoreAddArgs {
    pub link: Link,
    pub size: u64,
}

#[derive(Debug, Serialize)]
pub(crate) struct UploadAddArgs {
    pub root: Link,
    pub shards: Vec<Link>,
}

#[derive(Debug, Serialize)]
pub(crate) struct DealAddArgs {
    pub root: Link,
    pub car: Link,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub miner: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
}

/// Bridge request body: a list of `[ability, space DID, args]` triples.
#[derive(Debug, Serialize)]
pub(crate) struct TaskRequest {
    pub tasks: Vec<(String, String, Value)>,
}

/// What the network said about a `store/add` announcement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreAddOutcome {
    /// New allocation: PUT the CAR bytes to `url` with `headers`.
    Upload {
        url: String,
        headers: HashMap<String, String>,
    },
    /// The shard is already stored; no transfer needed.
    Done,
}

impl StoreAddOutcome {
    /// Interpret the `out` of a `store/add` receipt. Anything other than an
    /// upload URL or `status: "done"` is an error.
    pub fn from_out(out: &Value) -> Result<Self> {
        let ok = task_ok("store/add", out)?;

        if let Some(url) = ok.get("url").and_then(Value::as_str) {
            let headers = ok
                .get("headers")
                .and_then(Value::as_object)
                .map(|h| {
                    h.iter()
                        .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                        .collect()
                })
                .unwrap_or_default();
            return Ok(StoreAddOutcome::Upload {
                url: url.to_string(),
                headers,
            });
        }

        if ok.get("status").and_then(Value::as_str) == Some("done") {
            return Ok(StoreAddOutcome::Done);
        }

        Err(StorachaError::UnexpectedResponse {
            ability: "store/add".to_string(),
            body: ok.to_string(),
        })
    }
}

/// Pull `p.out` out of the first receipt in a bridge response.
pub fn first_out(ability: &str, receipts: &Value) -> Result<Value> {
    receipts
        .get(0)
        .and_then(|r| r.get("p"))
        .and_then(|p| p.get("out"))
        .cloned()
        .ok_or_else(|| StorachaError::UnexpectedResponse {
            ability: ability.to_string(),
            body: receipts.to_string(),
        })
}

/// The `ok` branch of a receipt `out`, or a task error carrying its message.
pub fn task_ok<'a>(ability: &str, out: &'a Value) -> Result<&'a Value> {
    if let Some(error) = out.get("error") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .map(String::from)
            .unwrap_or_else(|| error.to_string());
        return Err(StorachaError::Task {
            ability: ability.to_string(),
            message,
        });
    }
    out.get("ok").ok_or_else(|| StorachaError::UnexpectedResponse {
        ability: ability.to_string(),
        body: out.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn store_add_with_url_is_upload() {
        let out = json!({
            "ok": {
                "status": "upload",
                "url": "https://bucket.example/put",
                "headers": { "x-amz-checksum-sha256": "abc", "content-length": "12" }
            }
        });
        match StoreAddOutcome::from_out(&out).unwrap() {
            StoreAddOutcome::Upload { url, headers } => {
                assert_eq!(url, "https://bucket.example/put");
                assert_eq!(headers.get("x-amz-checksum-sha256").unwrap(), "abc");
            }
            other => panic!("expected upload, got {other:?}"),
        }
    }

    #[test]
    fn store_add_done_skips_transfer() {
        let out = json!({ "ok": { "status": "done", "allocated": 0 } });
        assert_eq!(StoreAddOutcome::from_out(&out).unwrap(), StoreAddOutcome::Done);
    }

    #[test]
    fn store_add_other_shape_is_error() {
        let out = json!({ "ok": { "status": "pending" } });
        assert!(matches!(
            StoreAddOutcome::from_out(&out),
            Err(StorachaError::UnexpectedResponse { .. })
        ));
    }

    #[test]
    fn task_error_carries_message() {
        let out = json!({ "error": { "name": "InsufficientStorage", "message": "space full" } });
        let err = StoreAddOutcome::from_out(&out).unwrap_err();
        assert_eq!(err.to_string(), "store/add failed: space full");
    }

    #[test]
    fn first_out_reads_receipt() {
        let receipts = json!([{ "p": { "out": { "ok": {} } } }]);
        assert_eq!(first_out("upload/add", &receipts).unwrap(), json!({ "ok": {} }));
        assert!(first_out("upload/add", &json!([])).is_err());
    }

    #[test]
    fn deal_args_omit_missing_hints() {
        let args = DealAddArgs {
            root: Link::new("bafyroot"),
            car: Link::new("bagcar"),
            miner: None,
            duration: Some(518400),
        };
        assert_eq!(
            serde_json::to_value(&args).unwrap(),
            json!({ "root": { "/": "bafyroot" }, "car": { "/": "bagcar" }, "duration": 518400 })
        );
    }
}
