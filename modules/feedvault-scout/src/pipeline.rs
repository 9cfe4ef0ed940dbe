// Pipeline orchestration: scrape -> finalize -> archive -> register ->
// aggregate -> push.
//
// All collaborators live in one PipelineContext built once per process and
// handed to the Pipeline. Phases run sequentially; archival network calls go
// through the run's Cancel so an interrupt aborts them cleanly.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use feedvault_archive::{
    parse_cid, Archive, ArchiveReceipt, MediaArchiver, PinataArchiver, Retrieved, Retriever,
};
use feedvault_common::{Config, DatasetListing, DealHints, FeedvaultError, ScoreAggregate};
use storacha_client::{StorachaClient, DEFAULT_BRIDGE_URL};
use tracing::{info, warn};
use typed_builder::TypedBuilder;

use crate::artifact::{Artifact, SessionAggregator};
use crate::backoff::BackoffPolicy;
use crate::cancel::Cancel;
use crate::classify::{KeywordClassifier, LlmClassifier, SubjectClassifier};
use crate::collector::{CollectOptions, CollectReport, Collector};
use crate::driver::FeedDriver;
use crate::ledger::{ChainRegistrar, JournalLedger, OraclePusher, PriceReference, SnapshotPrices};
use crate::llm::OpenAiChat;
use crate::scoring::{ContentScorer, OpenAiScorer};
use crate::session::Session;
use crate::signal::ScoreAggregator;

/// Which subject classifier a context is built with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassifierKind {
    Llm,
    Keyword,
}

/// Shared collaborators for every phase of a run.
#[derive(Clone, TypedBuilder)]
pub struct PipelineContext {
    pub data_dir: PathBuf,
    #[builder(default)]
    pub cancel: Cancel,
    /// Required by `scrape`; other phases run without it.
    #[builder(default, setter(strip_option))]
    pub scorer: Option<Arc<dyn ContentScorer>>,
    pub classifier: Arc<dyn SubjectClassifier>,
    pub prices: Arc<dyn PriceReference>,
    #[builder(default)]
    pub media: Option<Arc<dyn MediaArchiver>>,
    #[builder(default)]
    pub archive: Option<Arc<Archive>>,
    #[builder(default)]
    pub registrar: Option<Arc<dyn ChainRegistrar>>,
    #[builder(default)]
    pub oracle: Option<Arc<dyn OraclePusher>>,
    #[builder(default)]
    pub retriever: Retriever,
    #[builder(default)]
    pub policy: BackoffPolicy,
    #[builder(default)]
    pub collect: CollectOptions,
}

impl PipelineContext {
    /// Production context: feeds-snapshot prices, the journal ledger, and
    /// OpenAI, Pinata and Storacha when their credentials are set.
    ///
    /// Without an explicit classifier the LLM one is used when an OpenAI key
    /// is configured and the keyword one otherwise.
    pub fn from_config(
        config: &Config,
        cancel: Cancel,
        classifier: Option<ClassifierKind>,
        collect: CollectOptions,
    ) -> Result<Self> {
        let chat = config
            .openai_api_key
            .as_deref()
            .map(|key| OpenAiChat::new(key, config.openai_model.clone()));

        let classifier: Arc<dyn SubjectClassifier> = match (classifier, &chat) {
            (Some(ClassifierKind::Llm) | None, Some(chat)) => Arc::new(LlmClassifier::new(
                chat.clone(),
                config.subject_symbols.clone(),
            )),
            (Some(ClassifierKind::Llm), None) => {
                return Err(FeedvaultError::Config(
                    "OPEN_AI_API_KEY is required for the LLM classifier".to_string(),
                )
                .into())
            }
            (Some(ClassifierKind::Keyword) | None, _) => {
                Arc::new(KeywordClassifier::new(&config.subject_symbols)?)
            }
        };

        let scorer = chat.map(|chat| Arc::new(OpenAiScorer::new(chat)) as Arc<dyn ContentScorer>);

        let media = config
            .pinata_jwt
            .as_deref()
            .map(|jwt| Arc::new(PinataArchiver::new(jwt)) as Arc<dyn MediaArchiver>);

        let archive = match &config.bridge {
            Some(creds) => {
                let bridge_url = config.bridge_url.as_deref().unwrap_or(DEFAULT_BRIDGE_URL);
                let client = StorachaClient::new(
                    bridge_url,
                    &creds.space_did,
                    &creds.x_auth_secret,
                    &creds.authorization,
                )?;
                Some(Arc::new(Archive::storacha(client)))
            }
            None => None,
        };

        let ledger = Arc::new(JournalLedger::new(config.data_dir.join("ledger")));

        Ok(Self {
            data_dir: config.data_dir.clone(),
            cancel,
            scorer,
            classifier,
            prices: Arc::new(SnapshotPrices::new(config.feeds_snapshot_path.clone())),
            media,
            archive,
            registrar: Some(ledger.clone() as Arc<dyn ChainRegistrar>),
            oracle: Some(ledger as Arc<dyn OraclePusher>),
            retriever: Retriever::new(),
            policy: BackoffPolicy::default(),
            collect,
        })
    }
}

/// Registry metadata for an archived artifact.
#[derive(Debug, Clone, Default)]
pub struct DatasetMeta {
    pub title: String,
    pub description: String,
    /// Access fee in wei.
    pub price: u128,
    pub preview: String,
    pub hints: DealHints,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registration {
    Registered { tx: String },
    AlreadyRegistered,
    /// No registrar configured.
    Skipped,
}

#[derive(Debug)]
pub struct ScrapeOutcome {
    pub report: CollectReport,
    pub artifact: Artifact,
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ArchiveOutcome {
    pub receipt: ArchiveReceipt,
    pub listing: DatasetListing,
    pub registration: Registration,
}

#[derive(Debug)]
pub struct RunOutcome {
    pub scrape: ScrapeOutcome,
    pub archive: Option<ArchiveOutcome>,
    pub aggregates: Vec<ScoreAggregate>,
}

pub struct Pipeline {
    ctx: PipelineContext,
}

impl Pipeline {
    pub fn new(ctx: PipelineContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &PipelineContext {
        &self.ctx
    }

    /// The content scorer, or a config error when none is configured.
    pub fn require_scorer(&self) -> Result<Arc<dyn ContentScorer>> {
        let scorer = self.ctx.scorer.clone().ok_or_else(|| {
            FeedvaultError::Config("OPEN_AI_API_KEY is required for scoring".to_string())
        })?;
        Ok(scorer)
    }

    /// Collect one session and write its artifact. The artifact is written
    /// for every termination, including interrupts and fatal driver errors.
    pub async fn scrape<D: FeedDriver>(
        &self,
        driver: Arc<D>,
        session: Session,
    ) -> Result<ScrapeOutcome> {
        let scorer = self.require_scorer()?;

        let mut collector = Collector::new(driver, self.ctx.cancel.clone())
            .with_policy(self.ctx.policy.clone())
            .with_options(self.ctx.collect.clone());
        if let Some(media) = &self.ctx.media {
            collector = collector.with_media(media.clone());
        }

        let report = collector.run(session).await;
        let artifact = SessionAggregator::new(scorer)
            .finalize(&report.session)
            .await;
        let path = artifact.default_path(&self.ctx.data_dir);
        artifact.write_to(&path).await?;

        Ok(ScrapeOutcome {
            report,
            artifact,
            path,
        })
    }

    /// Pack, upload, open a deal and register the dataset. Re-running with the
    /// same bytes after a failure is safe.
    pub async fn archive(&self, bytes: &[u8], meta: &DatasetMeta) -> Result<ArchiveOutcome> {
        let archive = self
            .ctx
            .archive
            .as_ref()
            .ok_or_else(|| FeedvaultError::Config("Storage bridge is not configured".to_string()))?;

        let receipt = match self.ctx.cancel.run(archive.store(bytes, &meta.hints)).await {
            Some(result) => result.context("Archival failed")?,
            None => bail!("Archival interrupted"),
        };
        info!(
            root = %receipt.bundle.root,
            transferred = receipt.ack.transferred,
            deal_id = receipt.deal.deal_id,
            "Artifact archived"
        );

        let listing = DatasetListing {
            cid: receipt.bundle.root.clone(),
            size: receipt.bundle.size,
            deal_id: receipt.deal.deal_id,
            title: meta.title.clone(),
            description: meta.description.clone(),
            price: meta.price,
            preview: meta.preview.clone(),
        };
        let registration = self.register(&listing).await?;

        Ok(ArchiveOutcome {
            receipt,
            listing,
            registration,
        })
    }

    async fn register(&self, listing: &DatasetListing) -> Result<Registration> {
        let Some(registrar) = &self.ctx.registrar else {
            return Ok(Registration::Skipped);
        };
        let registered = match self.ctx.cancel.run(registrar.is_registered(&listing.cid)).await {
            Some(result) => result.context("Registry lookup failed")?,
            None => bail!("Registration interrupted"),
        };
        if registered {
            info!(cid = %listing.cid, "Dataset already registered");
            return Ok(Registration::AlreadyRegistered);
        }
        let tx = match self.ctx.cancel.run(registrar.register(listing)).await {
            Some(result) => result.context("Dataset registration failed")?,
            None => bail!("Registration interrupted"),
        };
        Ok(Registration::Registered { tx })
    }

    /// Aggregate per-subject scores, append them to the score logs and push
    /// them to the oracle. Push failures are logged and do not fail the run.
    pub async fn aggregate(&self, artifact: &Artifact) -> Result<Vec<ScoreAggregate>> {
        let aggregator = ScoreAggregator::new(
            self.ctx.classifier.clone(),
            self.ctx.prices.clone(),
            &self.ctx.data_dir,
        );
        let aggregates = aggregator.aggregate(&artifact.rows).await;
        for aggregate in &aggregates {
            aggregator.append(aggregate).await?;
            if let Some(oracle) = &self.ctx.oracle {
                if let Err(e) = oracle.push(&aggregate.subject, aggregate.score).await {
                    warn!(subject = %aggregate.subject, error = %e, "Oracle push failed");
                }
            }
        }
        Ok(aggregates)
    }

    /// Scrape, then archive and aggregate when the session ended normally.
    pub async fn run<D: FeedDriver>(
        &self,
        driver: Arc<D>,
        session: Session,
        meta: &DatasetMeta,
    ) -> Result<RunOutcome> {
        let scrape = self.scrape(driver, session).await?;
        let termination = &scrape.report.termination;

        if !termination.is_success() || self.ctx.cancel.is_cancelled() {
            warn!(termination = %termination, "Session did not finish normally, skipping archival");
            return Ok(RunOutcome {
                scrape,
                archive: None,
                aggregates: Vec::new(),
            });
        }
        if scrape.artifact.is_empty() {
            info!("Nothing collected, skipping archival");
            return Ok(RunOutcome {
                scrape,
                archive: None,
                aggregates: Vec::new(),
            });
        }

        let archive = if self.ctx.archive.is_some() {
            let bytes = scrape.artifact.to_csv_bytes()?;
            let outcome = self.archive(&bytes, meta).await.with_context(|| {
                format!("Artifact kept at {}", scrape.path.display())
            })?;
            Some(outcome)
        } else {
            warn!("Storage bridge not configured, skipping archival");
            None
        };
        let aggregates = self.aggregate(&scrape.artifact).await?;

        Ok(RunOutcome {
            scrape,
            archive,
            aggregates,
        })
    }

    /// Download an archived dataset to `<data_dir>/downloads/<cid>.csv`.
    pub async fn retrieve(&self, cid: &str) -> Result<Retrieved> {
        let cid = parse_cid(cid)?;
        let dir = self.ctx.data_dir.join("downloads");
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        let dest = dir.join(format!("{cid}.csv"));

        match self.ctx.cancel.run(self.ctx.retriever.retrieve_to(&cid, &dest)).await {
            Some(result) => Ok(result?),
            None => bail!("Retrieval interrupted"),
        }
    }

    /// Datasets known to the registry.
    pub async fn datasets(&self) -> Result<Vec<DatasetListing>> {
        match &self.ctx.registrar {
            Some(registrar) => registrar.list().await,
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FixedClassifier, FixedPrices, FixedScorer, MemoryLedger, ScriptedDriver};
    use feedvault_archive::testing::MemoryBridge;
    use feedvault_common::{RecordBound, SessionTarget};

    fn context(dir: &std::path::Path, bridge: Arc<MemoryBridge>, ledger: Arc<MemoryLedger>) -> PipelineContext {
        PipelineContext::builder()
            .data_dir(dir.to_path_buf())
            .scorer(Arc::new(FixedScorer::new(0.5)))
            .classifier(Arc::new(FixedClassifier::new("testBTC")))
            .prices(Arc::new(FixedPrices::new().with("testBTC", 66000.0)))
            .archive(Some(Arc::new(Archive::new(bridge))))
            .registrar(Some(ledger.clone() as Arc<dyn ChainRegistrar>))
            .oracle(Some(ledger as Arc<dyn OraclePusher>))
            .policy(BackoffPolicy::immediate())
            .build()
    }

    fn meta() -> DatasetMeta {
        DatasetMeta {
            title: "BTC tweets".to_string(),
            description: "Latest $BTC posts".to_string(),
            price: 10,
            preview: String::new(),
            hints: DealHints::default(),
        }
    }

    #[tokio::test]
    async fn archiving_twice_registers_once() {
        let dir = tempfile::tempdir().unwrap();
        let bridge = Arc::new(MemoryBridge::new());
        let ledger = Arc::new(MemoryLedger::new());
        let pipeline = Pipeline::new(context(dir.path(), bridge.clone(), ledger.clone()));

        let first = pipeline.archive(b"a,b\n1,2\n", &meta()).await.unwrap();
        let second = pipeline.archive(b"a,b\n1,2\n", &meta()).await.unwrap();

        assert!(matches!(first.registration, Registration::Registered { .. }));
        assert_eq!(second.registration, Registration::AlreadyRegistered);
        assert_eq!(bridge.transfers(), 1);
        assert_eq!(ledger.datasets().len(), 1);
        assert_eq!(ledger.datasets()[0].cid, first.receipt.bundle.root);
        assert_eq!(first.listing.deal_id, first.receipt.deal.deal_id);
    }

    #[tokio::test]
    async fn archive_without_bridge_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = PipelineContext::builder()
            .data_dir(dir.path().to_path_buf())
            .scorer(Arc::new(FixedScorer::new(0.5)))
            .classifier(Arc::new(FixedClassifier::none()))
            .prices(Arc::new(FixedPrices::new()))
            .build();
        let err = Pipeline::new(ctx).archive(b"x", &meta()).await.unwrap_err();
        assert!(err.to_string().contains("not configured"), "{err}");
    }

    #[tokio::test]
    async fn cancelled_archive_does_not_touch_the_network() {
        let dir = tempfile::tempdir().unwrap();
        let bridge = Arc::new(MemoryBridge::new());
        let ledger = Arc::new(MemoryLedger::new());
        let ctx = context(dir.path(), bridge.clone(), ledger.clone());
        ctx.cancel.cancel();

        let err = Pipeline::new(ctx).archive(b"x", &meta()).await.unwrap_err();
        assert!(err.to_string().contains("interrupted"), "{err}");
        assert_eq!(bridge.transfers(), 0);
        assert!(ledger.datasets().is_empty());
    }

    #[tokio::test]
    async fn scrape_without_scorer_fails_before_touching_the_browser() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = PipelineContext::builder()
            .data_dir(dir.path().to_path_buf())
            .classifier(Arc::new(FixedClassifier::none()))
            .prices(Arc::new(FixedPrices::new()))
            .build();
        let pipeline = Pipeline::new(ctx);
        let driver = Arc::new(ScriptedDriver::new().batch(&["a"]));

        assert!(pipeline.require_scorer().is_err());
        let err = pipeline
            .scrape(driver.clone(), Session::new(SessionTarget::Home, RecordBound::Limit(1)))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("OPEN_AI_API_KEY"), "{err}");
        assert!(driver.navigated().is_empty());
    }

    #[tokio::test]
    async fn deal_failure_after_upload_leaves_no_registration() {
        let dir = tempfile::tempdir().unwrap();
        let bridge = Arc::new(MemoryBridge::new().failing_deals(1));
        let ledger = Arc::new(MemoryLedger::new());
        let pipeline = Pipeline::new(context(dir.path(), bridge.clone(), ledger.clone()));
        let bytes = b"Name,Handle\nAda,@ada\n";

        let err = pipeline.archive(bytes, &meta()).await.unwrap_err();
        assert!(format!("{err:#}").contains("deal/add"), "{err:#}");
        assert_eq!(bridge.announcements().len(), 1);
        assert_eq!(bridge.transfers(), 1);
        assert!(ledger.datasets().is_empty());

        // the retry announces the same CAR and skips the transfer
        let retry = pipeline.archive(bytes, &meta()).await.unwrap();
        let announced = bridge.announcements();
        assert_eq!(announced.len(), 2);
        assert_eq!(announced[0], announced[1]);
        assert_eq!(announced[1], retry.receipt.bundle.car);
        assert!(!retry.receipt.ack.transferred);
        assert_eq!(bridge.transfers(), 1);
        assert_eq!(ledger.datasets().len(), 1);
    }

    #[tokio::test]
    async fn cancelled_retrieval_makes_no_request() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = PipelineContext::builder()
            .data_dir(dir.path().to_path_buf())
            .classifier(Arc::new(FixedClassifier::none()))
            .prices(Arc::new(FixedPrices::new()))
            .retriever(
                Retriever::new()
                    .with_gateways(vec!["http://127.0.0.1:9/ipfs/{cid}".to_string()])
                    .with_local_node(false),
            )
            .build();
        ctx.cancel.cancel();
        let root = feedvault_archive::pack(b"rows").bundle.root;

        let err = Pipeline::new(ctx).retrieve(&root).await.unwrap_err();
        assert!(err.to_string().contains("interrupted"), "{err}");
        assert!(!dir.path().join("downloads").join(format!("{root}.csv")).exists());
    }

    #[tokio::test]
    async fn retrieval_rejects_malformed_cids() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = PipelineContext::builder()
            .data_dir(dir.path().to_path_buf())
            .classifier(Arc::new(FixedClassifier::none()))
            .prices(Arc::new(FixedPrices::new()))
            .build();
        let err = Pipeline::new(ctx).retrieve("not-a-cid").await.unwrap_err();
        assert!(err.to_string().contains("Invalid content identifier"), "{err}");
    }

    #[tokio::test]
    async fn failed_session_skips_archival_but_keeps_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let bridge = Arc::new(MemoryBridge::new());
        let ledger = Arc::new(MemoryLedger::new());
        let pipeline = Pipeline::new(context(dir.path(), bridge.clone(), ledger.clone()));
        let driver = Arc::new(ScriptedDriver::new().batch(&["a"]).then_fail("browser closed"));

        let outcome = pipeline
            .run(driver, Session::new(SessionTarget::Home, RecordBound::Limit(5)), &meta())
            .await
            .unwrap();

        assert!(!outcome.scrape.report.termination.is_success());
        assert_eq!(outcome.scrape.artifact.len(), 1);
        assert!(outcome.scrape.path.exists());
        assert!(outcome.archive.is_none());
        assert_eq!(bridge.transfers(), 0);
        assert!(ledger.pushes().is_empty());
    }
}
