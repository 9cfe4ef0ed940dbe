// Test mocks for the feedvault pipeline.
//
// One mock per trait boundary of the scout crate:
// - ScriptedDriver (FeedDriver): batches of element ids, scripted failures
// - FixedScorer (ContentScorer): per-text scores, failures by marker
// - FixedClassifier (SubjectClassifier): fixed symbol or none
// - FixedPrices (PriceReference): HashMap symbol -> price
// - MemoryLedger (ChainRegistrar + OraclePusher): in-memory registry
//
// Storage and pinning mocks live in `feedvault_archive::testing`.
// Plus `record()` for building Records in tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use anyhow::{bail, Result};
use async_trait::async_trait;
use feedvault_common::{DatasetListing, Fingerprint, Record, SessionTarget};

use crate::cancel::Cancel;
use crate::classify::SubjectClassifier;
use crate::driver::{DriverError, DriverResult, Extraction, FeedDriver};
use crate::ledger::{ChainRegistrar, OraclePusher, PriceReference};
use crate::scoring::{ContentScorer, ScoreResult};

// ---------------------------------------------------------------------------
// Record helper
// ---------------------------------------------------------------------------

/// A plausible record whose fingerprint, post id and name are `id`.
pub fn record(id: &str) -> Record {
    Record {
        fingerprint: Fingerprint::new(id),
        name: id.to_string(),
        handle: format!("@{id}"),
        timestamp: "2025-03-01T12:00:00.000Z".to_string(),
        verified: false,
        content: format!("post {id}"),
        replies: 1,
        reposts: 2,
        likes: 3,
        views: 40,
        tags: Vec::new(),
        mentions: Vec::new(),
        profile_image: format!("https://pbs.example/{id}.jpg"),
        permalink: format!("https://x.com/{id}/status/{id}"),
        post_id: id.to_string(),
        followers: None,
        media: Vec::new(),
        media_pointer: String::new(),
    }
}

// ---------------------------------------------------------------------------
// ScriptedDriver
// ---------------------------------------------------------------------------

#[derive(Default)]
struct DriverState {
    batches: VecDeque<Vec<String>>,
    scans: usize,
    extracted: Vec<String>,
    refreshes: usize,
    retry_presses: usize,
    blocked_checks_left: usize,
    navigated: Vec<SessionTarget>,
}

/// Feed driver that replays a fixed list of scans. Elements are plain ids;
/// after the last scripted batch every scan is empty (or fails, with
/// `then_fail`).
#[derive(Default)]
pub struct ScriptedDriver {
    state: Mutex<DriverState>,
    ads: HashSet<String>,
    invalid: HashSet<String>,
    stale: HashSet<String>,
    followers: HashMap<String, String>,
    contents: HashMap<String, String>,
    fail_after_batches: Option<String>,
    cancel_at_scan: Option<(usize, Cancel)>,
}

impl ScriptedDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batch(self, ids: &[&str]) -> Self {
        self.state
            .lock()
            .unwrap()
            .batches
            .push_back(ids.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn advertisement(mut self, id: &str) -> Self {
        self.ads.insert(id.to_string());
        self
    }

    pub fn invalid(mut self, id: &str) -> Self {
        self.invalid.insert(id.to_string());
        self
    }

    /// Extraction of `id` fails with a stale-element error.
    pub fn stale(mut self, id: &str) -> Self {
        self.stale.insert(id.to_string());
        self
    }

    pub fn followers(mut self, id: &str, followers: &str) -> Self {
        self.followers.insert(id.to_string(), followers.to_string());
        self
    }

    pub fn content(mut self, id: &str, content: &str) -> Self {
        self.contents.insert(id.to_string(), content.to_string());
        self
    }

    /// Show the retry prompt for the next `checks` checks.
    pub fn blocked_for(self, checks: usize) -> Self {
        self.state.lock().unwrap().blocked_checks_left = checks;
        self
    }

    /// Once scripted batches run out, scans fail unrecoverably.
    pub fn then_fail(mut self, message: &str) -> Self {
        self.fail_after_batches = Some(message.to_string());
        self
    }

    /// Trigger `cancel` during scan number `scan` (1-based).
    pub fn cancel_at_scan(mut self, scan: usize, cancel: Cancel) -> Self {
        self.cancel_at_scan = Some((scan, cancel));
        self
    }

    /// Element ids passed to `extract`, in call order.
    pub fn extracted(&self) -> Vec<String> {
        self.state.lock().unwrap().extracted.clone()
    }

    pub fn refreshes(&self) -> usize {
        self.state.lock().unwrap().refreshes
    }

    pub fn retry_presses(&self) -> usize {
        self.state.lock().unwrap().retry_presses
    }

    pub fn navigated(&self) -> Vec<SessionTarget> {
        self.state.lock().unwrap().navigated.clone()
    }
}

#[async_trait]
impl FeedDriver for ScriptedDriver {
    type Element = String;

    async fn navigate(&self, target: &SessionTarget) -> DriverResult<()> {
        self.state.lock().unwrap().navigated.push(target.clone());
        Ok(())
    }

    async fn dismiss_cookie_banner(&self) -> DriverResult<()> {
        Err(DriverError::Transient("no cookie banner".to_string()))
    }

    async fn visible_elements(&self, window: usize) -> DriverResult<Vec<String>> {
        let mut state = self.state.lock().unwrap();
        state.scans += 1;
        if let Some((scan, cancel)) = &self.cancel_at_scan {
            if *scan == state.scans {
                cancel.cancel();
            }
        }
        match state.batches.pop_front() {
            Some(batch) => {
                let start = batch.len().saturating_sub(window);
                Ok(batch[start..].to_vec())
            }
            None => match &self.fail_after_batches {
                Some(message) => Err(DriverError::Unrecoverable(message.clone())),
                None => Ok(Vec::new()),
            },
        }
    }

    fn fingerprint(&self, element: &String) -> Fingerprint {
        Fingerprint::new(element.as_str())
    }

    async fn scroll_into_view(&self, _element: &String) -> DriverResult<()> {
        Ok(())
    }

    async fn extract(&self, element: &String, _poster_details: bool) -> DriverResult<Extraction> {
        self.state.lock().unwrap().extracted.push(element.clone());
        if self.stale.contains(element) {
            return Err(DriverError::Transient(format!("stale element {element}")));
        }
        if self.ads.contains(element) {
            return Ok(Extraction::Advertisement);
        }
        if self.invalid.contains(element) {
            return Ok(Extraction::Invalid("missing handle".to_string()));
        }
        let mut post = record(element);
        post.followers = self.followers.get(element).cloned();
        if let Some(content) = self.contents.get(element) {
            post.content = content.clone();
        }
        Ok(Extraction::Post(post))
    }

    async fn screenshot(&self, element: &String) -> DriverResult<Vec<u8>> {
        Ok(format!("png:{element}").into_bytes())
    }

    async fn retry_prompt_visible(&self) -> DriverResult<bool> {
        let mut state = self.state.lock().unwrap();
        if state.blocked_checks_left > 0 {
            state.blocked_checks_left -= 1;
            return Ok(true);
        }
        Ok(false)
    }

    async fn press_retry(&self) -> DriverResult<()> {
        self.state.lock().unwrap().retry_presses += 1;
        Ok(())
    }

    async fn refresh(&self) -> DriverResult<()> {
        self.state.lock().unwrap().refreshes += 1;
        Ok(())
    }

    async fn prune_hidden(&self) -> DriverResult<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FixedScorer
// ---------------------------------------------------------------------------

/// Scores by exact text; unknown text gets `default`. Texts containing
/// `fail_marker` return an error.
pub struct FixedScorer {
    scores: HashMap<String, f64>,
    default: f64,
    fail_marker: Option<String>,
    calls: Mutex<usize>,
}

impl FixedScorer {
    pub fn new(default: f64) -> Self {
        Self {
            scores: HashMap::new(),
            default,
            fail_marker: None,
            calls: Mutex::new(0),
        }
    }

    pub fn on(mut self, text: &str, score: f64) -> Self {
        self.scores.insert(text.to_string(), score);
        self
    }

    pub fn failing_on(mut self, marker: &str) -> Self {
        self.fail_marker = Some(marker.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl ContentScorer for FixedScorer {
    async fn score(&self, text: &str) -> Result<ScoreResult> {
        *self.calls.lock().unwrap() += 1;
        if let Some(marker) = &self.fail_marker {
            if text.contains(marker.as_str()) {
                bail!("scoring service unavailable");
            }
        }
        let score = self.scores.get(text).copied().unwrap_or(self.default);
        Ok(ScoreResult {
            score,
            rationale: format!("Score: {score}"),
        })
    }
}

// ---------------------------------------------------------------------------
// FixedClassifier
// ---------------------------------------------------------------------------

pub struct FixedClassifier {
    subject: Option<String>,
    batch_size: usize,
    calls: Mutex<Vec<usize>>,
}

impl FixedClassifier {
    pub fn new(subject: &str) -> Self {
        Self {
            subject: Some(subject.to_string()),
            batch_size: 1,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn none() -> Self {
        Self {
            subject: None,
            batch_size: 1,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn batched(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Number of texts passed to each call, in call order.
    pub fn calls(&self) -> Vec<usize> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl SubjectClassifier for FixedClassifier {
    async fn classify(&self, texts: &[String]) -> Result<Option<String>> {
        self.calls.lock().unwrap().push(texts.len());
        Ok(self.subject.clone())
    }

    fn batch_size(&self) -> usize {
        self.batch_size
    }
}

// ---------------------------------------------------------------------------
// FixedPrices
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FixedPrices {
    prices: HashMap<String, f64>,
}

impl FixedPrices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, symbol: &str, price: f64) -> Self {
        self.prices.insert(symbol.to_string(), price);
        self
    }
}

#[async_trait]
impl PriceReference for FixedPrices {
    async fn price(&self, symbol: &str) -> Result<Option<f64>> {
        Ok(self.prices.get(symbol).copied())
    }
}

// ---------------------------------------------------------------------------
// MemoryLedger
// ---------------------------------------------------------------------------

/// In-memory dataset registry and oracle.
#[derive(Default)]
pub struct MemoryLedger {
    datasets: Mutex<Vec<DatasetListing>>,
    pushes: Mutex<Vec<(String, u8)>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn datasets(&self) -> Vec<DatasetListing> {
        self.datasets.lock().unwrap().clone()
    }

    pub fn pushes(&self) -> Vec<(String, u8)> {
        self.pushes.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChainRegistrar for MemoryLedger {
    async fn is_registered(&self, cid: &str) -> Result<bool> {
        Ok(self.datasets.lock().unwrap().iter().any(|d| d.cid == cid))
    }

    async fn register(&self, listing: &DatasetListing) -> Result<String> {
        let mut datasets = self.datasets.lock().unwrap();
        datasets.push(listing.clone());
        Ok(format!("memory:{}", datasets.len()))
    }

    async fn list(&self) -> Result<Vec<DatasetListing>> {
        Ok(self.datasets())
    }
}

#[async_trait]
impl OraclePusher for MemoryLedger {
    async fn push(&self, subject: &str, score: u8) -> Result<String> {
        let mut pushes = self.pushes.lock().unwrap();
        pushes.push((subject.to_string(), score));
        Ok(format!("memory-push:{}", pushes.len()))
    }
}
