use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::builder::TypedValueParser;
use clap::{ArgGroup, Args, Parser, Subcommand, ValueEnum};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use feedvault_archive::RetrievalSource;
use feedvault_common::{Config, DealHints, FeedTab, RecordBound, SessionTarget};
use feedvault_scout::artifact::Artifact;
use feedvault_scout::pipeline::{ArchiveOutcome, ClassifierKind, Registration};
use feedvault_scout::twitter::TwitterDriver;
use feedvault_scout::{Cancel, CollectOptions, DatasetMeta, Pipeline, PipelineContext, Session};

#[derive(Parser)]
#[command(name = "feedvault")]
#[command(about = "Scrape social feeds into archived, scored datasets")]
#[command(version)]
struct Cli {
    /// Subject classifier for score aggregation (default: llm when an OpenAI key is set)
    #[arg(long, value_enum, global = true)]
    classifier: Option<Classifier>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Classifier {
    Llm,
    Keyword,
}

impl From<Classifier> for ClassifierKind {
    fn from(c: Classifier) -> Self {
        match c {
            Classifier::Llm => ClassifierKind::Llm,
            Classifier::Keyword => ClassifierKind::Keyword,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Collect one session and write its artifact
    Scrape {
        #[command(flatten)]
        target: TargetArgs,
    },

    /// Archive an existing artifact: pack, upload, deal, register
    Archive {
        /// Artifact CSV to archive
        artifact: PathBuf,

        #[command(flatten)]
        dataset: DatasetArgs,
    },

    /// Aggregate subject scores from an existing artifact
    Aggregate {
        /// Artifact CSV to aggregate
        artifact: PathBuf,
    },

    /// Scrape, archive and aggregate in one go
    Run {
        #[command(flatten)]
        target: TargetArgs,

        #[command(flatten)]
        dataset: DatasetArgs,
    },

    /// List registered datasets
    Datasets,

    /// Download an archived dataset by CID into <data_dir>/downloads
    Retrieve {
        /// Root CID of the dataset
        cid: String,
    },
}

#[derive(Args, Clone)]
#[command(group(ArgGroup::new("feed").args(["username", "hashtag", "query", "bookmarks"])))]
struct TargetArgs {
    /// Profile to scrape
    #[arg(short, long)]
    username: Option<String>,

    /// Hashtag to scrape
    #[arg(short = 'H', long)]
    hashtag: Option<String>,

    /// Search query to scrape
    #[arg(short, long)]
    query: Option<String>,

    /// Scrape bookmarks
    #[arg(long)]
    bookmarks: bool,

    /// Latest tab for hashtag/query (default)
    #[arg(long, conflicts_with = "top")]
    latest: bool,

    /// Top tab for hashtag/query
    #[arg(long)]
    top: bool,

    /// Number of tweets to collect
    #[arg(
        short,
        long,
        default_value_t = 5,
        value_parser = clap::value_parser!(u64).range(1..).map(|n| n as usize)
    )]
    tweets: usize,

    /// Collect until the feed runs dry
    #[arg(long)]
    no_tweets_limit: bool,

    /// Look up poster follower counts
    #[arg(long)]
    poster_details: bool,

    /// Stop the session after this many seconds
    #[arg(long, env = "SESSION_TIMEOUT_SECS")]
    timeout_secs: Option<u64>,
}

impl TargetArgs {
    fn tab(&self) -> FeedTab {
        if self.top {
            FeedTab::Top
        } else {
            FeedTab::Latest
        }
    }

    fn session_target(&self) -> SessionTarget {
        if let Some(username) = &self.username {
            SessionTarget::profile(username)
        } else if let Some(tag) = &self.hashtag {
            SessionTarget::hashtag(tag, self.tab())
        } else if let Some(query) = &self.query {
            SessionTarget::query(query, self.tab())
        } else if self.bookmarks {
            SessionTarget::Bookmarks
        } else {
            SessionTarget::Home
        }
    }

    fn bound(&self) -> RecordBound {
        if self.no_tweets_limit {
            RecordBound::Unbounded
        } else {
            RecordBound::Limit(self.tweets)
        }
    }

    fn session(&self) -> Session {
        Session::new(self.session_target(), self.bound())
    }

    fn collect_options(&self) -> CollectOptions {
        CollectOptions::builder()
            .poster_details(self.poster_details)
            .build()
    }
}

#[derive(Args, Clone)]
struct DatasetArgs {
    /// Dataset title in the registry
    #[arg(long, default_value = "Tweets")]
    title: String,

    /// Dataset description in the registry
    #[arg(long, default_value = "")]
    description: String,

    /// Access fee in wei
    #[arg(long, default_value_t = 0)]
    price: u128,

    /// Preview link or text
    #[arg(long, default_value = "")]
    preview: String,

    /// Preferred storage provider for the deal
    #[arg(long)]
    miner: Option<String>,

    /// Deal duration in epochs
    #[arg(long)]
    duration: Option<u64>,
}

impl From<&DatasetArgs> for DatasetMeta {
    fn from(args: &DatasetArgs) -> Self {
        DatasetMeta {
            title: args.title.clone(),
            description: args.description.clone(),
            price: args.price,
            preview: args.preview.clone(),
            hints: DealHints {
                miner: args.miner.clone(),
                duration: args.duration,
            },
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("feedvault=info,storacha_client=info"));
    if std::env::var("LOG_FORMAT").is_ok_and(|format| format == "json") {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %format!("{e:#}"), "feedvault failed");
            eprintln!("Error: {:#}", e);
            ExitCode::from(1)
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = Config::from_env()?;
    config.log_redacted();

    let cancel = Cancel::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping");
            interrupt.cancel();
        }
    });

    let classifier = cli.classifier.map(ClassifierKind::from);

    match cli.command {
        Commands::Scrape { target } => {
            config.require_openai_key()?;
            let pipeline = build_pipeline(&config, &cancel, classifier, target.collect_options())?;
            let _timeout = target
                .timeout_secs
                .map(|secs| cancel.cancel_after(Duration::from_secs(secs)));

            let driver = Arc::new(
                TwitterDriver::launch(&config)
                    .await
                    .context("Failed to start browser session")?,
            );
            let outcome = pipeline.scrape(driver.clone(), target.session()).await;
            quit_driver(&driver).await;
            let outcome = outcome?;

            print!("{}", outcome.report.stats());
            println!("Artifact: {}", outcome.path.display());
            Ok(exit_code(outcome.report.termination.is_success()))
        }
        Commands::Archive { artifact, dataset } => {
            config.require_bridge()?;
            let pipeline = build_pipeline(&config, &cancel, classifier, CollectOptions::default())?;
            let bytes = tokio::fs::read(&artifact)
                .await
                .with_context(|| format!("Failed to read artifact {}", artifact.display()))?;
            let outcome = pipeline.archive(&bytes, &DatasetMeta::from(&dataset)).await?;
            print_archive(&outcome);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Aggregate { artifact } => {
            let pipeline = build_pipeline(&config, &cancel, classifier, CollectOptions::default())?;
            let artifact = Artifact::read_from(&artifact).await?;
            let aggregates = pipeline.aggregate(&artifact).await?;
            print_aggregates(&aggregates);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Run { target, dataset } => {
            config.require_openai_key()?;
            let pipeline = build_pipeline(&config, &cancel, classifier, target.collect_options())?;
            let _timeout = target
                .timeout_secs
                .map(|secs| cancel.cancel_after(Duration::from_secs(secs)));

            let driver = Arc::new(
                TwitterDriver::launch(&config)
                    .await
                    .context("Failed to start browser session")?,
            );
            let outcome = pipeline
                .run(driver.clone(), target.session(), &DatasetMeta::from(&dataset))
                .await;
            quit_driver(&driver).await;
            let outcome = outcome?;

            print!("{}", outcome.scrape.report.stats());
            println!("Artifact: {}", outcome.scrape.path.display());
            if let Some(archive) = &outcome.archive {
                print_archive(archive);
            }
            print_aggregates(&outcome.aggregates);
            Ok(exit_code(outcome.scrape.report.termination.is_success()))
        }
        Commands::Datasets => {
            let pipeline = build_pipeline(&config, &cancel, classifier, CollectOptions::default())?;
            let datasets = pipeline.datasets().await?;
            if datasets.is_empty() {
                println!("No datasets registered");
            }
            for listing in datasets {
                println!("{} ({} bytes, deal {})", listing.title, listing.size, listing.deal_id);
                println!("  CID: {}", listing.cid);
                for url in listing.gateway_urls() {
                    println!("  {url}");
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Retrieve { cid } => {
            let pipeline = build_pipeline(&config, &cancel, classifier, CollectOptions::default())?;
            let retrieved = pipeline.retrieve(&cid).await?;
            let source = match &retrieved.source {
                RetrievalSource::Gateway(url) => url.as_str(),
                RetrievalSource::LocalNode => "local IPFS node",
            };
            println!("Saved {} ({} bytes) from {}", retrieved.path.display(), retrieved.size, source);
            if !retrieved.verified {
                println!("Warning: content does not repack to {}", retrieved.cid);
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn build_pipeline(
    config: &Config,
    cancel: &Cancel,
    classifier: Option<ClassifierKind>,
    collect: CollectOptions,
) -> Result<Pipeline> {
    let ctx = PipelineContext::from_config(config, cancel.clone(), classifier, collect)?;
    Ok(Pipeline::new(ctx))
}

async fn quit_driver(driver: &TwitterDriver) {
    if let Err(e) = driver.quit().await {
        warn!(error = %e, "Failed to close browser session");
    }
}

fn exit_code(success: bool) -> ExitCode {
    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    }
}

fn print_archive(outcome: &ArchiveOutcome) {
    println!("\n=== Archive ===");
    println!("Root CID:  {}", outcome.receipt.bundle.root);
    println!("CAR CID:   {}", outcome.receipt.bundle.car);
    println!("Size:      {} bytes", outcome.receipt.bundle.size);
    println!(
        "Upload:    {}",
        if outcome.receipt.ack.transferred {
            "transferred"
        } else {
            "already stored"
        }
    );
    println!("Deal ID:   {}", outcome.receipt.deal.deal_id);
    match &outcome.registration {
        Registration::Registered { tx } => println!("Registry:  registered ({tx})"),
        Registration::AlreadyRegistered => println!("Registry:  already registered"),
        Registration::Skipped => println!("Registry:  skipped"),
    }
    for url in outcome.listing.gateway_urls() {
        println!("Gateway:   {url}");
    }
    info!(root = %outcome.receipt.bundle.root, "Archive complete");
}

fn print_aggregates(aggregates: &[feedvault_common::ScoreAggregate]) {
    if aggregates.is_empty() {
        println!("\nNo subject scores this run");
        return;
    }
    println!("\n=== Subject Scores ===");
    for agg in aggregates {
        println!(
            "{:<10} score {:>3}  price {}  strength {}  ({} records)",
            agg.subject, agg.score, agg.price, agg.strength, agg.record_count
        );
    }
}
