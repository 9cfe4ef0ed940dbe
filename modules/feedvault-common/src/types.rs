use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Fingerprint
// ---------------------------------------------------------------------------

/// Session-scoped identity of one feed element, as reported by the driver.
/// Two fingerprints from different sessions are never comparable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Session target
// ---------------------------------------------------------------------------

/// Which ordering of a searchable feed to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FeedTab {
    #[default]
    Latest,
    Top,
}

impl fmt::Display for FeedTab {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeedTab::Latest => write!(f, "Latest"),
            FeedTab::Top => write!(f, "Top"),
        }
    }
}

/// The feed a scraping session reads from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionTarget {
    Profile { username: String },
    Hashtag { tag: String, tab: FeedTab },
    Query { query: String, tab: FeedTab },
    Bookmarks,
    Home,
}

impl SessionTarget {
    pub fn profile(username: &str) -> Self {
        SessionTarget::Profile {
            username: username.trim_start_matches('@').to_string(),
        }
    }

    /// Hashtag target. A leading `#` is stripped.
    pub fn hashtag(tag: &str, tab: FeedTab) -> Self {
        SessionTarget::Hashtag {
            tag: tag.replace('#', ""),
            tab,
        }
    }

    pub fn query(query: &str, tab: FeedTab) -> Self {
        SessionTarget::Query {
            query: query.to_string(),
            tab,
        }
    }
}

impl fmt::Display for SessionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionTarget::Profile { username } => write!(f, "@{username}"),
            SessionTarget::Hashtag { tag, tab } => write!(f, "{tab} posts from #{tag}"),
            SessionTarget::Query { query, tab } => write!(f, "{tab} posts from '{query}' search"),
            SessionTarget::Bookmarks => write!(f, "bookmarks"),
            SessionTarget::Home => write!(f, "home"),
        }
    }
}

/// Upper bound on the number of records a session may collect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordBound {
    Limit(usize),
    Unbounded,
}

impl RecordBound {
    pub fn is_reached(&self, count: usize) -> bool {
        match self {
            RecordBound::Limit(max) => count >= *max,
            RecordBound::Unbounded => false,
        }
    }

    pub fn limit(&self) -> Option<usize> {
        match self {
            RecordBound::Limit(max) => Some(*max),
            RecordBound::Unbounded => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Record
// ---------------------------------------------------------------------------

/// One extracted feed item. Built once by the extractor, then only the
/// media pointer is attached before it is appended to a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub fingerprint: Fingerprint,
    pub name: String,
    pub handle: String,
    pub timestamp: String,
    pub verified: bool,
    pub content: String,
    pub replies: u64,
    pub reposts: u64,
    pub likes: u64,
    pub views: u64,
    pub tags: Vec<String>,
    pub mentions: Vec<String>,
    pub profile_image: String,
    pub permalink: String,
    pub post_id: String,
    /// Follower count exactly as shown on the page. Not guaranteed numeric.
    pub followers: Option<String>,
    pub media: Vec<String>,
    /// Gateway URL of the pinned screenshot, empty when pinning failed.
    pub media_pointer: String,
}

impl Record {
    /// Follower count as a number. Missing or non-numeric values count as zero.
    pub fn follower_count(&self) -> u64 {
        self.followers
            .as_deref()
            .and_then(|f| f.trim().parse::<u64>().ok())
            .unwrap_or(0)
    }

    pub fn with_media_pointer(mut self, pointer: impl Into<String>) -> Self {
        self.media_pointer = pointer.into();
        self
    }
}

// ---------------------------------------------------------------------------
// Archive types
// ---------------------------------------------------------------------------

/// Content-addressed archive unit derived from an artifact's bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Bundle {
    /// CID of the artifact content itself.
    pub root: String,
    /// CID of the CAR blob that carries the content.
    pub car: String,
    /// Byte size of the CAR blob.
    pub size: u64,
}

/// Optional placement hints for a storage deal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DealHints {
    pub miner: Option<String>,
    pub duration: Option<u64>,
}

/// Deal id used when the network does not hand back a parsable one.
pub const UNASSIGNED_DEAL_ID: u64 = 0;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deal {
    pub root: String,
    pub car: String,
    pub deal_id: u64,
    pub miner: Option<String>,
    pub duration: Option<u64>,
}

impl Deal {
    pub fn is_assigned(&self) -> bool {
        self.deal_id != UNASSIGNED_DEAL_ID
    }
}

// ---------------------------------------------------------------------------
// Score aggregates
// ---------------------------------------------------------------------------

/// Composite signal for one subject in one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreAggregate {
    pub subject: String,
    pub timestamp: DateTime<Utc>,
    /// Integer 0-100, truncated from the mean per-record score.
    pub score: u8,
    pub price: f64,
    pub strength: u64,
    pub record_count: usize,
}

// ---------------------------------------------------------------------------
// Dataset registry
// ---------------------------------------------------------------------------

/// What gets written to the dataset registry for one archived artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetListing {
    pub cid: String,
    pub size: u64,
    pub deal_id: u64,
    pub title: String,
    pub description: String,
    /// Access fee in wei.
    pub price: u128,
    pub preview: String,
}

impl DatasetListing {
    pub fn gateway_urls(&self) -> [String; 2] {
        [
            format!("https://{}.ipfs.w3s.link", self.cid),
            format!("https://gateway.pinata.cloud/ipfs/{}", self.cid),
        ]
    }
}
