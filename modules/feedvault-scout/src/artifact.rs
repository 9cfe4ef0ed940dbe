// Session artifact: the CSV form of a finished session, one row per record
// in collection order, each with its deletion-likelihood score.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use feedvault_common::Record;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::scoring::{score_or_neutral, ContentScorer};
use crate::session::Session;

/// Column order of the artifact. Never reorder: downstream readers rely on it.
pub const COLUMNS: [&str; 18] = [
    "Name",
    "Handle",
    "Timestamp",
    "Verified",
    "Content",
    "Comments",
    "Retweets",
    "Likes",
    "Analytics",
    "Tags",
    "Mentions",
    "Profile Image",
    "Tweet Link",
    "Tweet ID",
    "Followers",
    "Media",
    "IPFS Screenshot",
    "Deletion Likelihood",
];

const POST_ID_PREFIX: &str = "tweet_id:";
const LIST_SEPARATOR: &str = ", ";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRow {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Handle")]
    pub handle: String,
    #[serde(rename = "Timestamp")]
    pub timestamp: String,
    #[serde(rename = "Verified")]
    pub verified: bool,
    #[serde(rename = "Content")]
    pub content: String,
    #[serde(rename = "Comments")]
    pub comments: u64,
    #[serde(rename = "Retweets")]
    pub retweets: u64,
    #[serde(rename = "Likes")]
    pub likes: u64,
    #[serde(rename = "Analytics")]
    pub analytics: u64,
    #[serde(rename = "Tags")]
    pub tags: String,
    #[serde(rename = "Mentions")]
    pub mentions: String,
    #[serde(rename = "Profile Image")]
    pub profile_image: String,
    #[serde(rename = "Tweet Link")]
    pub tweet_link: String,
    #[serde(rename = "Tweet ID")]
    pub tweet_id: String,
    /// Raw follower text; may be empty or non-numeric.
    #[serde(rename = "Followers")]
    pub followers: String,
    #[serde(rename = "Media")]
    pub media: String,
    #[serde(rename = "IPFS Screenshot")]
    pub ipfs_screenshot: String,
    #[serde(rename = "Deletion Likelihood")]
    pub deletion_likelihood: f64,
}

impl ArtifactRow {
    pub fn from_record(record: &Record, deletion_likelihood: f64) -> Self {
        Self {
            name: record.name.clone(),
            handle: record.handle.clone(),
            timestamp: record.timestamp.clone(),
            verified: record.verified,
            content: record.content.clone(),
            comments: record.replies,
            retweets: record.reposts,
            likes: record.likes,
            analytics: record.views,
            tags: record.tags.join(LIST_SEPARATOR),
            mentions: record.mentions.join(LIST_SEPARATOR),
            profile_image: record.profile_image.clone(),
            tweet_link: record.permalink.clone(),
            tweet_id: format!("{POST_ID_PREFIX}{}", record.post_id),
            followers: record.followers.clone().unwrap_or_default(),
            media: record.media.join(LIST_SEPARATOR),
            ipfs_screenshot: record.media_pointer.clone(),
            deletion_likelihood,
        }
    }

    /// Post id without the column prefix.
    pub fn post_id(&self) -> &str {
        self.tweet_id
            .strip_prefix(POST_ID_PREFIX)
            .unwrap_or(&self.tweet_id)
    }

    /// Follower count as a number; missing or non-numeric counts as zero.
    pub fn follower_count(&self) -> u64 {
        self.followers.trim().parse().unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    pub rows: Vec<ArtifactRow>,
    pub created_at: DateTime<Local>,
}

impl Artifact {
    pub fn new(rows: Vec<ArtifactRow>) -> Self {
        Self {
            rows,
            created_at: Local::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// `<YYYY-MM-DD_HH-MM-SS>_tweets_1-<n>.csv`
    pub fn file_name(&self) -> String {
        format!(
            "{}_tweets_1-{}.csv",
            self.created_at.format("%Y-%m-%d_%H-%M-%S"),
            self.rows.len()
        )
    }

    /// Where this artifact lives under a data directory.
    pub fn default_path(&self, data_dir: &Path) -> PathBuf {
        data_dir.join("tweets").join(self.file_name())
    }

    /// UTF-8 CSV with a header row, even when there are no rows.
    pub fn to_csv_bytes(&self) -> Result<Vec<u8>> {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(Vec::new());
        writer.write_record(COLUMNS)?;
        for row in &self.rows {
            writer.serialize(row)?;
        }
        writer
            .into_inner()
            .map_err(|e| anyhow::anyhow!("Failed to flush CSV: {}", e.error()))
    }

    /// Write the artifact once. Refuses to overwrite an existing file.
    pub async fn write_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let bytes = self.to_csv_bytes()?;
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .await
            .with_context(|| format!("Failed to create artifact {}", path.display()))?;
        tokio::io::AsyncWriteExt::write_all(&mut file, &bytes).await?;
        tokio::io::AsyncWriteExt::flush(&mut file).await?;
        info!(path = %path.display(), rows = self.rows.len(), "Artifact saved");
        Ok(())
    }

    pub fn from_csv_bytes(bytes: &[u8]) -> Result<Self> {
        let mut reader = csv::Reader::from_reader(bytes);
        let rows = reader
            .deserialize()
            .collect::<std::result::Result<Vec<ArtifactRow>, _>>()
            .context("Failed to parse artifact rows")?;
        Ok(Self::new(rows))
    }

    pub async fn read_from(path: &Path) -> Result<Self> {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read artifact {}", path.display()))?;
        Self::from_csv_bytes(&bytes)
    }
}

/// Turns a finished session into its artifact.
pub struct SessionAggregator {
    scorer: Arc<dyn ContentScorer>,
}

impl SessionAggregator {
    pub fn new(scorer: Arc<dyn ContentScorer>) -> Self {
        Self { scorer }
    }

    /// One row per record, same order, scored one at a time. A failed score
    /// becomes 0.0 and never drops the row.
    pub async fn finalize(&self, session: &Session) -> Artifact {
        info!(records = session.len(), "Scoring records for deletion likelihood");
        let mut rows = Vec::with_capacity(session.len());
        for record in session.records() {
            let result = score_or_neutral(self.scorer.as_ref(), &record.content).await;
            debug!(post_id = %record.post_id, score = result.score, rationale = %result.rationale, "Record scored");
            rows.push(ArtifactRow::from_record(record, result.score));
        }
        Artifact::new(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{record, FixedScorer};
    use feedvault_common::{RecordBound, SessionTarget};

    fn session(ids: &[&str]) -> Session {
        let mut session = Session::new(SessionTarget::Home, RecordBound::Unbounded);
        for id in ids {
            session.push(record(id));
        }
        session
    }

    #[test]
    fn header_matches_column_layout() {
        let bytes = Artifact::new(Vec::new()).to_csv_bytes().unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert_eq!(
            text.trim_end(),
            "Name,Handle,Timestamp,Verified,Content,Comments,Retweets,Likes,Analytics,Tags,\
             Mentions,Profile Image,Tweet Link,Tweet ID,Followers,Media,IPFS Screenshot,Deletion Likelihood"
        );
    }

    #[test]
    fn row_formats_post_id_and_lists() {
        let mut r = record("20");
        r.tags = vec!["#flr".into(), "#xrp".into()];
        r.followers = Some("1.2K".into());
        let row = ArtifactRow::from_record(&r, 0.25);

        assert_eq!(row.tweet_id, "tweet_id:20");
        assert_eq!(row.post_id(), "20");
        assert_eq!(row.tags, "#flr, #xrp");
        assert_eq!(row.followers, "1.2K");
        assert_eq!(row.follower_count(), 0);
    }

    #[test]
    fn csv_reads_back() {
        let artifact = Artifact::new(vec![
            ArtifactRow::from_record(&record("a"), 0.1),
            ArtifactRow::from_record(&record("b"), 0.0),
        ]);
        let parsed = Artifact::from_csv_bytes(&artifact.to_csv_bytes().unwrap()).unwrap();
        assert_eq!(parsed.rows, artifact.rows);
    }

    #[test]
    fn file_name_counts_rows() {
        let artifact = Artifact::new(vec![ArtifactRow::from_record(&record("a"), 0.1)]);
        let name = artifact.file_name();
        assert!(name.ends_with("_tweets_1-1.csv"), "{name}");
        assert_eq!(name.len(), "2025-01-01_00-00-00_tweets_1-1.csv".len());
    }

    #[tokio::test]
    async fn finalize_keeps_order_and_degrades_failed_scores() {
        let scorer = Arc::new(FixedScorer::new(0.5).on("post a", 0.9).failing_on("post b"));
        let aggregator = SessionAggregator::new(scorer);
        let artifact = aggregator.finalize(&session(&["a", "b", "c"])).await;

        let handles: Vec<_> = artifact.rows.iter().map(|r| r.handle.as_str()).collect();
        assert_eq!(handles, vec!["@a", "@b", "@c"]);
        let scores: Vec<_> = artifact.rows.iter().map(|r| r.deletion_likelihood).collect();
        assert_eq!(scores, vec![0.9, 0.0, 0.5]);
    }

    #[tokio::test]
    async fn artifact_is_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = Artifact::new(vec![ArtifactRow::from_record(&record("a"), 0.1)]);
        let path = artifact.default_path(dir.path());

        artifact.write_to(&path).await.unwrap();
        assert!(artifact.write_to(&path).await.is_err());

        let read = Artifact::read_from(&path).await.unwrap();
        assert_eq!(read.rows, artifact.rows);
    }
}
