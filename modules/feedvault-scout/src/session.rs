use chrono::{DateTime, Utc};
use feedvault_common::{Fingerprint, Record, RecordBound, SessionTarget};

use crate::dedup::DedupStore;
use crate::stats::SessionStats;

/// Why a session stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    BoundReached,
    /// The feed stopped producing new records.
    Exhausted,
    /// Timeout or operator interrupt.
    Interrupted,
    /// The browser session broke.
    Failed(String),
}

impl Termination {
    /// Everything except a broken environment is a normal end of session.
    pub fn is_success(&self) -> bool {
        !matches!(self, Termination::Failed(_))
    }
}

impl std::fmt::Display for Termination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Termination::BoundReached => write!(f, "bound reached"),
            Termination::Exhausted => write!(f, "feed exhausted"),
            Termination::Interrupted => write!(f, "interrupted"),
            Termination::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectState {
    Navigating,
    Scanning,
    Extracting,
    Idle,
    Refreshing,
    Terminated(Termination),
}

/// One scraping session: where it reads, how much it may collect, and what
/// it has collected so far. Records keep first-observed order.
#[derive(Debug, Clone)]
pub struct Session {
    pub target: SessionTarget,
    pub bound: RecordBound,
    pub started_at: DateTime<Utc>,
    pub stats: SessionStats,
    dedup: DedupStore,
    records: Vec<Record>,
    state: CollectState,
}

impl Session {
    pub fn new(target: SessionTarget, bound: RecordBound) -> Self {
        Self {
            target,
            bound,
            started_at: Utc::now(),
            stats: SessionStats::new(bound),
            dedup: DedupStore::new(),
            records: Vec::new(),
            state: CollectState::Navigating,
        }
    }

    pub fn state(&self) -> &CollectState {
        &self.state
    }

    pub(crate) fn set_state(&mut self, state: CollectState) {
        self.state = state;
    }

    pub fn termination(&self) -> Option<&Termination> {
        match &self.state {
            CollectState::Terminated(t) => Some(t),
            _ => None,
        }
    }

    /// Claim a fingerprint. False if it was seen before in this session.
    pub fn claim(&mut self, fingerprint: &Fingerprint) -> bool {
        if self.dedup.seen(fingerprint) {
            self.stats.duplicates += 1;
            return false;
        }
        self.dedup.mark(fingerprint.clone())
    }

    /// Append a record. Returns true once the bound is reached.
    pub fn push(&mut self, record: Record) -> bool {
        self.records.push(record);
        self.stats.collected = self.records.len();
        self.bound.is_reached(self.records.len())
    }

    pub fn is_full(&self) -> bool {
        self.bound.is_reached(self.records.len())
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
