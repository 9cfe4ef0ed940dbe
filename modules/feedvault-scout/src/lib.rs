pub mod artifact;
pub mod backoff;
pub mod cancel;
pub mod classify;
pub mod collector;
pub mod dedup;
pub mod driver;
pub mod ledger;
pub mod llm;
pub mod pipeline;
pub mod scoring;
pub mod session;
pub mod signal;
pub mod stats;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod twitter;

pub use cancel::Cancel;
pub use collector::{CollectOptions, CollectReport, Collector, StepOutcome};
pub use pipeline::{DatasetMeta, Pipeline, PipelineContext};
pub use session::{Session, Termination};
