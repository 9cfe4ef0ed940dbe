// Scroll/collect state machine.
//
// Navigating -> Scanning -> Extracting -> (Idle -> Refreshing)? -> back to
// Scanning, until the bound is reached, the feed is exhausted, the run is
// cancelled or the browser breaks. Each pass through the loop is one
// `step`, which reports a StepOutcome instead of erroring out; only
// `Fatal` carries an error, and even then the records collected so far are
// returned with the report.

use std::sync::Arc;

use anyhow::anyhow;
use feedvault_archive::MediaArchiver;
use feedvault_common::Record;
use tracing::{debug, error, info, warn};
use typed_builder::TypedBuilder;

use crate::backoff::{BackoffPolicy, BlockedAction, IdleAction, Ladder, TransientAction};
use crate::cancel::Cancel;
use crate::driver::{DriverError, Extraction, FeedDriver};
use crate::session::{CollectState, Session, Termination};
use crate::stats::SessionStats;

/// Tunables of the collect loop that are not part of the backoff policy.
#[derive(Debug, Clone, TypedBuilder)]
pub struct CollectOptions {
    /// How many of the most recent feed elements each scan looks at.
    #[builder(default = 15)]
    pub window: usize,
    /// Look up poster details (follower count) while extracting.
    #[builder(default)]
    pub poster_details: bool,
}

impl Default for CollectOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Result of one pass through the loop.
#[derive(Debug)]
pub enum StepOutcome {
    Continue,
    Exhausted,
    BoundReached,
    Interrupted,
    Fatal(anyhow::Error),
}

#[derive(Debug)]
pub struct CollectReport {
    pub session: Session,
    pub termination: Termination,
}

impl CollectReport {
    pub fn records(&self) -> &[Record] {
        self.session.records()
    }

    pub fn stats(&self) -> &SessionStats {
        &self.session.stats
    }
}

pub struct Collector<D: FeedDriver> {
    driver: Arc<D>,
    media: Option<Arc<dyn MediaArchiver>>,
    policy: BackoffPolicy,
    options: CollectOptions,
    cancel: Cancel,
}

impl<D: FeedDriver> Collector<D> {
    pub fn new(driver: Arc<D>, cancel: Cancel) -> Self {
        Self {
            driver,
            media: None,
            policy: BackoffPolicy::default(),
            options: CollectOptions::default(),
            cancel,
        }
    }

    pub fn with_policy(mut self, policy: BackoffPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_options(mut self, options: CollectOptions) -> Self {
        self.options = options;
        self
    }

    /// Pin a screenshot of every collected element through `media`.
    pub fn with_media(mut self, media: Arc<dyn MediaArchiver>) -> Self {
        self.media = Some(media);
        self
    }

    /// Run the session to termination.
    pub async fn run(&self, mut session: Session) -> CollectReport {
        info!(
            target = %session.target,
            limit = ?session.bound.limit(),
            window = self.options.window,
            "Starting collection"
        );

        let mut ladder = Ladder::new(self.policy.clone());
        let mut outcome = if session.is_full() {
            StepOutcome::BoundReached
        } else {
            self.navigate(&mut session).await
        };
        let termination = loop {
            match outcome {
                StepOutcome::Continue => {
                    outcome = self.step(&mut session, &mut ladder).await;
                }
                StepOutcome::BoundReached => break Termination::BoundReached,
                StepOutcome::Exhausted => {
                    info!(collected = session.len(), "No more records to collect");
                    break Termination::Exhausted;
                }
                StepOutcome::Interrupted => {
                    warn!(collected = session.len(), "Collection interrupted");
                    break Termination::Interrupted;
                }
                StepOutcome::Fatal(e) => {
                    error!(collected = session.len(), error = %e, "Collection failed");
                    break Termination::Failed(e.to_string());
                }
            }
        };

        session.set_state(CollectState::Terminated(termination.clone()));
        info!(
            collected = session.len(),
            termination = %termination,
            batches = session.stats.batches,
            "Collection finished"
        );

        CollectReport {
            session,
            termination,
        }
    }

    async fn navigate(&self, session: &mut Session) -> StepOutcome {
        session.set_state(CollectState::Navigating);
        match self.cancel.run(self.driver.navigate(&session.target)).await {
            None => return StepOutcome::Interrupted,
            Some(Err(e)) => return StepOutcome::Fatal(anyhow!("navigation failed: {e}")),
            Some(Ok(())) => {}
        }
        if !self.cancel.sleep(self.policy.settle_delay).await {
            return StepOutcome::Interrupted;
        }
        if let Err(e) = self.driver.dismiss_cookie_banner().await {
            debug!(error = %e, "No cookie banner dismissed");
        }
        StepOutcome::Continue
    }

    /// One scan of the feed plus extraction of everything new in it.
    pub async fn step(&self, session: &mut Session, ladder: &mut Ladder) -> StepOutcome {
        if self.cancel.is_cancelled() {
            return StepOutcome::Interrupted;
        }
        if session.is_full() {
            return StepOutcome::BoundReached;
        }

        session.set_state(CollectState::Scanning);
        if let Err(e) = self.driver.prune_hidden().await {
            debug!(error = %e, "Hidden card pruning failed");
        }

        let elements = match self
            .cancel
            .run(self.driver.visible_elements(self.options.window))
            .await
        {
            None => return StepOutcome::Interrupted,
            Some(Ok(elements)) => elements,
            Some(Err(DriverError::Transient(msg))) => {
                session.stats.transient_errors += 1;
                match ladder.on_transient() {
                    TransientAction::Retry(wait) => {
                        warn!(error = %msg, "Feed scan hit a transient error, retrying");
                        if !self.cancel.sleep(wait).await {
                            return StepOutcome::Interrupted;
                        }
                        return StepOutcome::Continue;
                    }
                    TransientAction::TreatAsEmpty => Vec::new(),
                }
            }
            Some(Err(e)) => return StepOutcome::Fatal(anyhow!("feed scan failed: {e}")),
        };
        session.stats.batches += 1;

        session.set_state(CollectState::Extracting);
        let mut added = 0usize;
        for element in elements {
            if self.cancel.is_cancelled() {
                return StepOutcome::Interrupted;
            }

            let fingerprint = self.driver.fingerprint(&element);
            if !session.claim(&fingerprint) {
                continue;
            }

            if !self.options.poster_details {
                if let Err(e) = self.driver.scroll_into_view(&element).await {
                    debug!(fingerprint = %fingerprint, error = %e, "Scroll into view failed");
                }
            }

            let record = match self
                .cancel
                .run(self.driver.extract(&element, self.options.poster_details))
                .await
            {
                None => return StepOutcome::Interrupted,
                Some(Ok(Extraction::Post(record))) => record,
                Some(Ok(Extraction::Advertisement)) => {
                    session.stats.advertisements += 1;
                    continue;
                }
                Some(Ok(Extraction::Invalid(reason))) => {
                    session.stats.skipped += 1;
                    debug!(fingerprint = %fingerprint, reason = %reason, "Skipping invalid element");
                    continue;
                }
                Some(Err(DriverError::Transient(msg))) => {
                    session.stats.skipped += 1;
                    debug!(fingerprint = %fingerprint, error = %msg, "Element vanished during extraction");
                    continue;
                }
                Some(Err(e)) => return StepOutcome::Fatal(anyhow!("extraction failed: {e}")),
            };

            let record = self.attach_media(session, &element, record).await;
            added += 1;
            let full = session.push(record);
            info!(
                collected = session.len(),
                limit = ?session.bound.limit(),
                "Record collected"
            );
            if full {
                return StepOutcome::BoundReached;
            }
        }

        if added > 0 {
            ladder.on_new_records();
            return StepOutcome::Continue;
        }
        self.on_empty_batch(session, ladder).await
    }

    async fn on_empty_batch(&self, session: &mut Session, ladder: &mut Ladder) -> StepOutcome {
        session.set_state(CollectState::Idle);
        session.stats.empty_batches += 1;

        loop {
            match self.cancel.run(self.driver.retry_prompt_visible()).await {
                None => return StepOutcome::Interrupted,
                Some(Ok(true)) => match ladder.on_blocked() {
                    BlockedAction::WaitThenRetry(wait) => {
                        session.stats.blocked_waits += 1;
                        warn!(
                            attempt = ladder.blocked_retries(),
                            max_attempts = ladder.policy().max_blocked_retries,
                            wait_secs = wait.as_secs(),
                            "Feed asks to retry, waiting"
                        );
                        if !self.cancel.sleep(wait).await {
                            return StepOutcome::Interrupted;
                        }
                        if let Err(e) = self.driver.press_retry().await {
                            warn!(error = %e, "Pressing retry failed");
                        }
                        if !self.cancel.sleep(ladder.policy().after_retry_wait).await {
                            return StepOutcome::Interrupted;
                        }
                    }
                    BlockedAction::FallThrough => break,
                },
                Some(Ok(false)) => {
                    ladder.on_unblocked();
                    break;
                }
                Some(Err(e)) => {
                    debug!(error = %e, "Retry prompt check failed");
                    ladder.on_unblocked();
                    break;
                }
            }
        }

        match ladder.on_empty_batch() {
            IdleAction::Wait(wait) => {
                debug!(empty_batches = ladder.empty_batches(), "Empty batch");
                if !self.cancel.sleep(wait).await {
                    return StepOutcome::Interrupted;
                }
                StepOutcome::Continue
            }
            IdleAction::Refresh => {
                session.set_state(CollectState::Refreshing);
                session.stats.refreshes += 1;
                info!(
                    refresh = ladder.refreshes(),
                    max_refresh = ladder.policy().max_refresh,
                    "Feed idle, refreshing"
                );
                match self.cancel.run(self.driver.refresh()).await {
                    None => return StepOutcome::Interrupted,
                    Some(Err(DriverError::Transient(msg))) => {
                        warn!(error = %msg, "Refresh hit a transient error");
                    }
                    Some(Err(e)) => return StepOutcome::Fatal(anyhow!("refresh failed: {e}")),
                    Some(Ok(())) => {}
                }
                if !self.cancel.sleep(ladder.policy().settle_delay).await {
                    return StepOutcome::Interrupted;
                }
                StepOutcome::Continue
            }
            IdleAction::GiveUp => StepOutcome::Exhausted,
        }
    }

    /// Best effort: any failure leaves the media pointer empty.
    async fn attach_media(&self, session: &mut Session, element: &D::Element, record: Record) -> Record {
        let Some(media) = &self.media else {
            return record;
        };

        let png = match self.cancel.run(self.driver.screenshot(element)).await {
            Some(Ok(png)) => png,
            Some(Err(e)) => {
                session.stats.media_failed += 1;
                warn!(post_id = %record.post_id, error = %e, "Screenshot failed");
                return record;
            }
            None => return record,
        };

        let file_name = format!("{}.png", screenshot_stem(&record));
        match self.cancel.run(media.archive(&file_name, png)).await {
            Some(Ok(pointer)) => {
                session.stats.media_pinned += 1;
                debug!(post_id = %record.post_id, pointer = %pointer, "Screenshot pinned");
                record.with_media_pointer(pointer)
            }
            Some(Err(e)) => {
                session.stats.media_failed += 1;
                warn!(post_id = %record.post_id, error = %e, "Screenshot pinning failed");
                record
            }
            None => record,
        }
    }
}

fn screenshot_stem(record: &Record) -> String {
    if record.post_id.is_empty() {
        format!("element_{}", record.fingerprint)
    } else {
        format!("tweet_{}", record.post_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{record, ScriptedDriver};
    use feedvault_archive::testing::FixedMediaArchiver;
    use feedvault_common::{RecordBound, SessionTarget};

    fn collector(driver: ScriptedDriver) -> (Arc<ScriptedDriver>, Collector<ScriptedDriver>) {
        let driver = Arc::new(driver);
        let collector =
            Collector::new(driver.clone(), Cancel::new()).with_policy(BackoffPolicy::immediate());
        (driver, collector)
    }

    fn handles(records: &[Record]) -> Vec<String> {
        records.iter().map(|r| r.handle.clone()).collect()
    }

    #[tokio::test]
    async fn duplicates_are_collected_once() {
        let (_, collector) = collector(
            ScriptedDriver::new()
                .batch(&["a", "b", "a"])
                .batch(&["b", "c", "a"]),
        );
        let report = collector
            .run(Session::new(SessionTarget::Home, RecordBound::Unbounded))
            .await;

        assert_eq!(handles(report.records()), vec!["@a", "@b", "@c"]);
        assert_eq!(report.termination, Termination::Exhausted);
        assert_eq!(report.stats().duplicates, 3);
    }

    #[tokio::test]
    async fn fingerprints_do_not_carry_over_between_sessions() {
        let (_, first) = collector(ScriptedDriver::new().batch(&["a", "b"]));
        let (_, second) = collector(ScriptedDriver::new().batch(&["b", "a"]));

        let first = first
            .run(Session::new(SessionTarget::Home, RecordBound::Unbounded))
            .await;
        let second = second
            .run(Session::new(SessionTarget::Home, RecordBound::Unbounded))
            .await;

        assert_eq!(handles(first.records()), vec!["@a", "@b"]);
        assert_eq!(handles(second.records()), vec!["@b", "@a"]);
        assert_eq!(second.stats().duplicates, 0);
    }

    #[tokio::test]
    async fn bound_stops_mid_batch() {
        let (driver, collector) = collector(ScriptedDriver::new().batch(&["a", "b", "c", "d"]));
        let report = collector
            .run(Session::new(SessionTarget::Home, RecordBound::Limit(2)))
            .await;

        assert_eq!(report.records().len(), 2);
        assert_eq!(report.termination, Termination::BoundReached);
        assert_eq!(driver.extracted(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn zero_bound_collects_nothing() {
        let (driver, collector) = collector(ScriptedDriver::new().batch(&["a", "b"]));
        let report = collector
            .run(Session::new(SessionTarget::Home, RecordBound::Limit(0)))
            .await;

        assert!(report.records().is_empty());
        assert_eq!(report.termination, Termination::BoundReached);
        assert!(driver.extracted().is_empty());
        assert!(driver.navigated().is_empty());
    }

    #[tokio::test]
    async fn step_on_a_full_session_claims_nothing() {
        let (driver, collector) = collector(ScriptedDriver::new().batch(&["a", "b"]));
        let mut session = Session::new(SessionTarget::Home, RecordBound::Limit(1));
        session.push(record("x"));
        let mut ladder = Ladder::new(BackoffPolicy::immediate());

        let outcome = collector.step(&mut session, &mut ladder).await;

        assert!(matches!(outcome, StepOutcome::BoundReached));
        assert_eq!(session.len(), 1);
        assert_eq!(session.stats.duplicates, 0);
        assert!(driver.extracted().is_empty());
    }

    #[tokio::test]
    async fn idle_feed_terminates_after_refreshes() {
        let (driver, collector) = collector(ScriptedDriver::new());
        let report = collector
            .run(Session::new(SessionTarget::Home, RecordBound::Limit(10)))
            .await;

        assert_eq!(report.termination, Termination::Exhausted);
        assert!(report.termination.is_success());
        assert_eq!(driver.refreshes(), 3);
        assert_eq!(report.stats().empty_batches, 9);
        assert!(matches!(
            report.session.state(),
            CollectState::Terminated(Termination::Exhausted)
        ));
    }

    #[tokio::test]
    async fn ads_and_invalid_elements_are_skipped() {
        let (_, collector) = collector(
            ScriptedDriver::new()
                .batch(&["a", "ad", "bad", "b"])
                .advertisement("ad")
                .invalid("bad"),
        );
        let report = collector
            .run(Session::new(SessionTarget::Home, RecordBound::Unbounded))
            .await;

        assert_eq!(handles(report.records()), vec!["@a", "@b"]);
        assert_eq!(report.stats().advertisements, 1);
        assert_eq!(report.stats().skipped, 1);
    }

    #[tokio::test]
    async fn failed_extraction_is_never_retried() {
        let (driver, collector) = collector(
            ScriptedDriver::new()
                .batch(&["a", "flaky"])
                .batch(&["flaky", "b"])
                .stale("flaky"),
        );
        let report = collector
            .run(Session::new(SessionTarget::Home, RecordBound::Unbounded))
            .await;

        assert_eq!(handles(report.records()), vec!["@a", "@b"]);
        assert_eq!(driver.extracted().iter().filter(|f| *f == "flaky").count(), 1);
    }

    #[tokio::test]
    async fn retry_prompt_is_pressed_before_idling() {
        let (driver, collector) = collector(ScriptedDriver::new().blocked_for(2));
        let report = collector
            .run(Session::new(SessionTarget::Home, RecordBound::Limit(1)))
            .await;

        assert_eq!(driver.retry_presses(), 2);
        assert_eq!(report.stats().blocked_waits, 2);
        assert_eq!(report.termination, Termination::Exhausted);
    }

    #[tokio::test]
    async fn cancelled_session_keeps_collected_records() {
        let cancel = Cancel::new();
        let driver = Arc::new(
            ScriptedDriver::new()
                .batch(&["a", "b"])
                .batch(&["c", "d"])
                .cancel_at_scan(2, cancel.clone()),
        );
        let collector =
            Collector::new(driver.clone(), cancel).with_policy(BackoffPolicy::immediate());
        let report = collector
            .run(Session::new(SessionTarget::Home, RecordBound::Unbounded))
            .await;

        assert_eq!(report.termination, Termination::Interrupted);
        assert_eq!(handles(report.records()), vec!["@a", "@b"]);
    }

    #[tokio::test]
    async fn broken_browser_is_fatal_but_keeps_records() {
        let (_, collector) = collector(ScriptedDriver::new().batch(&["a"]).then_fail("session deleted"));
        let report = collector
            .run(Session::new(SessionTarget::Home, RecordBound::Unbounded))
            .await;

        assert!(matches!(report.termination, Termination::Failed(ref m) if m.contains("session deleted")));
        assert_eq!(report.records().len(), 1);
    }

    #[tokio::test]
    async fn media_pointer_attached_when_pinning_works() {
        let driver = Arc::new(ScriptedDriver::new().batch(&["a"]));
        let media = Arc::new(FixedMediaArchiver::new());
        let collector = Collector::new(driver, Cancel::new())
            .with_policy(BackoffPolicy::immediate())
            .with_media(media.clone());
        let report = collector
            .run(Session::new(SessionTarget::Home, RecordBound::Limit(1)))
            .await;

        let pointer = &report.records()[0].media_pointer;
        assert!(pointer.starts_with("https://gateway.pinata.cloud/ipfs/"));
        assert_eq!(media.pinned(), vec!["tweet_a.png"]);
    }

    #[tokio::test]
    async fn media_failure_leaves_pointer_empty() {
        let driver = Arc::new(ScriptedDriver::new().batch(&["a"]));
        let collector = Collector::new(driver, Cancel::new())
            .with_policy(BackoffPolicy::immediate())
            .with_media(Arc::new(FixedMediaArchiver::failing()));
        let report = collector
            .run(Session::new(SessionTarget::Home, RecordBound::Limit(1)))
            .await;

        assert_eq!(report.records()[0].media_pointer, "");
        assert_eq!(report.stats().media_failed, 1);
    }

    #[test]
    fn screenshot_stem_prefers_post_id() {
        let r = record("x");
        assert_eq!(screenshot_stem(&r), "tweet_x");
    }
}
