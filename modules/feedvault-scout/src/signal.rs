// Score aggregation: per-subject composite signal from one run's artifact.
//
// Each row is attributed to a subject by the classifier, then per subject:
//   score    = floor(100 * mean(row scores)), clamped to 0..=100
//   strength = row count * total followers (non-numeric followers count as 0)
//   price    = looked up once per subject per run
// One line per subject per run is appended to `<data_dir>/scores/<SUBJECT>.csv`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use anyhow::{Context, Result};
use chrono::Utc;
use feedvault_common::ScoreAggregate;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::artifact::ArtifactRow;
use crate::classify::SubjectClassifier;
use crate::ledger::PriceReference;

const SCORE_LOG_HEADER: [&str; 4] = ["timestamp", "score", "price", "strength"];

/// Truncating 0-100 composite of per-record scores in [0, 1]. Empty is 0.
pub fn composite_score(scores: &[f64]) -> u8 {
    if scores.is_empty() {
        return 0;
    }
    let mean = scores.iter().sum::<f64>() / scores.len() as f64;
    // the epsilon keeps means like 0.4 from landing on 39.999...
    let scaled = (mean * 100.0 + 1e-9).floor();
    scaled.clamp(0.0, 100.0) as u8
}

/// `count * sum(followers)`, saturating.
pub fn strength(followers: &[u64]) -> u64 {
    let total = followers
        .iter()
        .fold(0u64, |acc, f| acc.saturating_add(*f));
    (followers.len() as u64).saturating_mul(total)
}

/// Serializes score log appends across every aggregator in the process.
fn append_lock() -> &'static Mutex<()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
}

pub struct ScoreAggregator {
    classifier: Arc<dyn SubjectClassifier>,
    prices: Arc<dyn PriceReference>,
    log_dir: PathBuf,
}

impl ScoreAggregator {
    pub fn new(
        classifier: Arc<dyn SubjectClassifier>,
        prices: Arc<dyn PriceReference>,
        data_dir: &Path,
    ) -> Self {
        Self {
            classifier,
            prices,
            log_dir: data_dir.join("scores"),
        }
    }

    pub fn log_path(&self, subject: &str) -> PathBuf {
        self.log_dir.join(format!("{subject}.csv"))
    }

    /// Group rows by subject and build one aggregate per subject that has a
    /// price. Rows go to the classifier in chunks of its batch size, in
    /// artifact order. Rows without a subject are dropped; subjects without a
    /// price are skipped with a warning.
    pub async fn aggregate(&self, rows: &[ArtifactRow]) -> Vec<ScoreAggregate> {
        let mut groups: BTreeMap<String, Vec<&ArtifactRow>> = BTreeMap::new();
        let mut unclassified = 0usize;
        for chunk in rows.chunks(self.classifier.batch_size().max(1)) {
            let texts: Vec<String> = chunk.iter().map(|r| r.content.clone()).collect();
            match self.classifier.classify(&texts).await {
                Ok(Some(subject)) => groups.entry(subject).or_default().extend(chunk),
                Ok(None) => unclassified += chunk.len(),
                Err(e) => {
                    warn!(
                        first_post_id = %chunk[0].post_id(),
                        rows = chunk.len(),
                        error = %e,
                        "Subject classification failed"
                    );
                    unclassified += chunk.len();
                }
            }
        }
        if unclassified > 0 {
            info!(unclassified, "Rows without a subject left out of aggregation");
        }

        let timestamp = Utc::now();
        let mut aggregates = Vec::with_capacity(groups.len());
        for (subject, group) in groups {
            let price = match self.prices.price(&subject).await {
                Ok(Some(price)) => price,
                Ok(None) => {
                    warn!(subject = %subject, "No price for subject, skipping");
                    continue;
                }
                Err(e) => {
                    warn!(subject = %subject, error = %e, "Price lookup failed, skipping");
                    continue;
                }
            };
            let scores: Vec<f64> = group.iter().map(|r| r.deletion_likelihood).collect();
            let followers: Vec<u64> = group.iter().map(|r| r.follower_count()).collect();
            let aggregate = ScoreAggregate {
                subject,
                timestamp,
                score: composite_score(&scores),
                price,
                strength: strength(&followers),
                record_count: group.len(),
            };
            info!(
                subject = %aggregate.subject,
                score = aggregate.score,
                price = aggregate.price,
                strength = aggregate.strength,
                records = aggregate.record_count,
                "Subject aggregated"
            );
            aggregates.push(aggregate);
        }
        aggregates
    }

    /// Append one line to the subject's log, writing the header only when the
    /// log is created.
    pub async fn append(&self, aggregate: &ScoreAggregate) -> Result<PathBuf> {
        let _guard = append_lock().lock().await;
        let path = self.log_path(&aggregate.subject);
        tokio::fs::create_dir_all(&self.log_dir)
            .await
            .with_context(|| format!("Failed to create {}", self.log_dir.display()))?;
        let exists = tokio::fs::try_exists(&path).await.unwrap_or(false);

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(Vec::new());
        if !exists {
            writer.write_record(SCORE_LOG_HEADER)?;
        }
        writer.write_record([
            aggregate.timestamp.to_rfc3339(),
            aggregate.score.to_string(),
            aggregate.price.to_string(),
            aggregate.strength.to_string(),
        ])?;
        let bytes = writer
            .into_inner()
            .map_err(|e| anyhow::anyhow!("Failed to flush CSV: {}", e.error()))?;

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("Failed to open score log {}", path.display()))?;
        file.write_all(&bytes).await?;
        file.flush().await?;
        Ok(path)
    }
}
