// External ledgers the pipeline reports to: a price reference for subjects,
// a dataset registry for archived artifacts and a score oracle.
//
// The on-chain contracts are reached through these traits only. The local
// implementations here read a feeds snapshot and keep an append-only JSONL
// journal, so a run works end to end without a chain connection.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use feedvault_common::DatasetListing;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

#[async_trait]
pub trait PriceReference: Send + Sync {
    /// Current price of `symbol`, None when the feed is unknown.
    async fn price(&self, symbol: &str) -> Result<Option<f64>>;
}

#[async_trait]
pub trait ChainRegistrar: Send + Sync {
    async fn is_registered(&self, cid: &str) -> Result<bool>;
    /// Register a dataset and return the transaction reference.
    async fn register(&self, listing: &DatasetListing) -> Result<String>;
    async fn list(&self) -> Result<Vec<DatasetListing>>;
}

#[async_trait]
pub trait OraclePusher: Send + Sync {
    /// Publish a 0-100 composite score for `subject`. Returns the tx reference.
    async fn push(&self, subject: &str, score: u8) -> Result<String>;
}

// ---------------------------------------------------------------------------
// SnapshotPrices
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct FeedRow {
    symbol: String,
    price: f64,
    decimals: i32,
}

/// Prices from a feeds snapshot CSV (`index,symbol,price,decimals,timestamp`).
/// The last row for a symbol wins.
pub struct SnapshotPrices {
    path: PathBuf,
}

impl SnapshotPrices {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn parse(bytes: &[u8]) -> Result<HashMap<String, f64>> {
        let mut reader = csv::Reader::from_reader(bytes);
        let mut prices = HashMap::new();
        for row in reader.deserialize::<FeedRow>() {
            let row = row.context("Malformed feeds snapshot row")?;
            let scaled = row.price / 10f64.powi(row.decimals);
            prices.insert(row.symbol, scaled);
        }
        Ok(prices)
    }
}

#[async_trait]
impl PriceReference for SnapshotPrices {
    async fn price(&self, symbol: &str) -> Result<Option<f64>> {
        let bytes = tokio::fs::read(&self.path)
            .await
            .with_context(|| format!("Failed to read feeds snapshot {}", self.path.display()))?;
        let prices = Self::parse(&bytes)?;
        let price = prices.get(symbol).copied();
        debug!(symbol, ?price, "Price lookup");
        Ok(price)
    }
}

// ---------------------------------------------------------------------------
// JournalLedger
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
struct DatasetEntry {
    tx: String,
    registered_at: chrono::DateTime<Utc>,
    #[serde(flatten)]
    listing: DatasetListingWire,
}

/// Serialized form of a listing. The price is kept as a decimal string since
/// wei amounts overflow JSON numbers.
#[derive(Debug, Serialize, Deserialize)]
struct DatasetListingWire {
    cid: String,
    size: u64,
    deal_id: u64,
    title: String,
    description: String,
    price: String,
    preview: String,
}

impl From<&DatasetListing> for DatasetListingWire {
    fn from(l: &DatasetListing) -> Self {
        Self {
            cid: l.cid.clone(),
            size: l.size,
            deal_id: l.deal_id,
            title: l.title.clone(),
            description: l.description.clone(),
            price: l.price.to_string(),
            preview: l.preview.clone(),
        }
    }
}

impl TryFrom<DatasetListingWire> for DatasetListing {
    type Error = anyhow::Error;

    fn try_from(w: DatasetListingWire) -> Result<Self> {
        Ok(Self {
            price: w
                .price
                .parse()
                .with_context(|| format!("Invalid price '{}' for {}", w.price, w.cid))?,
            cid: w.cid,
            size: w.size,
            deal_id: w.deal_id,
            title: w.title,
            description: w.description,
            preview: w.preview,
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct OracleEntry {
    tx: String,
    pushed_at: chrono::DateTime<Utc>,
    subject: String,
    score: u8,
}

/// Append-only JSONL journal standing in for the registry and oracle
/// contracts: `<dir>/datasets.jsonl` and `<dir>/oracle.jsonl`.
pub struct JournalLedger {
    dir: PathBuf,
    lock: Mutex<()>,
}

impl JournalLedger {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            lock: Mutex::new(()),
        }
    }

    fn datasets_path(&self) -> PathBuf {
        self.dir.join("datasets.jsonl")
    }

    fn oracle_path(&self) -> PathBuf {
        self.dir.join("oracle.jsonl")
    }

    async fn append_line<T: Serialize>(&self, path: &Path, entry: &T) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .with_context(|| format!("Failed to open {}", path.display()))?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }

    async fn read_datasets(&self) -> Result<Vec<DatasetListing>> {
        let path = self.datasets_path();
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()))
            }
        };
        text.lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                let entry: DatasetEntry = serde_json::from_str(line)
                    .with_context(|| format!("Corrupt journal line in {}", path.display()))?;
                DatasetListing::try_from(entry.listing)
            })
            .collect()
    }

    fn tx_ref() -> String {
        format!("journal:{}", Uuid::new_v4())
    }
}

#[async_trait]
impl ChainRegistrar for JournalLedger {
    async fn is_registered(&self, cid: &str) -> Result<bool> {
        let _guard = self.lock.lock().await;
        Ok(self.read_datasets().await?.iter().any(|d| d.cid == cid))
    }

    async fn register(&self, listing: &DatasetListing) -> Result<String> {
        let _guard = self.lock.lock().await;
        let tx = Self::tx_ref();
        let entry = DatasetEntry {
            tx: tx.clone(),
            registered_at: Utc::now(),
            listing: listing.into(),
        };
        self.append_line(&self.datasets_path(), &entry).await?;
        info!(cid = %listing.cid, deal_id = listing.deal_id, tx = %tx, "Dataset registered");
        Ok(tx)
    }

    async fn list(&self) -> Result<Vec<DatasetListing>> {
        let _guard = self.lock.lock().await;
        self.read_datasets().await
    }
}

#[async_trait]
impl OraclePusher for JournalLedger {
    async fn push(&self, subject: &str, score: u8) -> Result<String> {
        let _guard = self.lock.lock().await;
        let tx = Self::tx_ref();
        let entry = OracleEntry {
            tx: tx.clone(),
            pushed_at: Utc::now(),
            subject: subject.to_string(),
            score,
        };
        self.append_line(&self.oracle_path(), &entry).await?;
        info!(subject, score, tx = %tx, "Score pushed");
        Ok(tx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listing(cid: &str) -> DatasetListing {
        DatasetListing {
            cid: cid.to_string(),
            size: 512,
            deal_id: 7,
            title: "Flare tweets".to_string(),
            description: "Latest #flare posts".to_string(),
            price: 1_000_000_000_000_000_000_000,
            preview: "preview.png".to_string(),
        }
    }

    #[tokio::test]
    async fn snapshot_scales_by_decimals_and_last_row_wins() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feeds.csv");
        tokio::fs::write(
            &path,
            "index,symbol,price,decimals,timestamp\n\
             0,testBTC,6500000,2,1700000000\n\
             1,C2FLR,1800,5,1700000000\n\
             2,testBTC,6600000,2,1700000060\n",
        )
        .await
        .unwrap();

        let prices = SnapshotPrices::new(&path);
        assert_eq!(prices.price("testBTC").await.unwrap(), Some(66000.0));
        assert_eq!(prices.price("C2FLR").await.unwrap(), Some(0.018));
        assert_eq!(prices.price("testXRP").await.unwrap(), None);
    }

    #[tokio::test]
    async fn missing_snapshot_is_an_error() {
        let prices = SnapshotPrices::new("/nonexistent/feeds.csv");
        assert!(prices.price("testBTC").await.is_err());
    }

    #[tokio::test]
    async fn journal_registers_and_lists() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = JournalLedger::new(dir.path().join("ledger"));

        assert!(!ledger.is_registered("bafyA").await.unwrap());
        let tx = ledger.register(&listing("bafyA")).await.unwrap();
        assert!(tx.starts_with("journal:"));
        assert!(ledger.is_registered("bafyA").await.unwrap());
        assert!(!ledger.is_registered("bafyB").await.unwrap());

        let listed = ledger.list().await.unwrap();
        assert_eq!(listed, vec![listing("bafyA")]);
    }

    #[tokio::test]
    async fn journal_records_oracle_pushes() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = JournalLedger::new(dir.path());

        ledger.push("testBTC", 40).await.unwrap();
        ledger.push("C2FLR", 100).await.unwrap();

        let text = tokio::fs::read_to_string(dir.path().join("oracle.jsonl"))
            .await
            .unwrap();
        let entries: Vec<OracleEntry> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].subject, "testBTC");
        assert_eq!(entries[1].score, 100);
    }
}
