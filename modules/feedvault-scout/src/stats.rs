use feedvault_common::RecordBound;

/// Counters from one collect session.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SessionStats {
    pub batches: u32,
    pub collected: usize,
    pub duplicates: u32,
    pub advertisements: u32,
    pub skipped: u32,
    pub transient_errors: u32,
    pub empty_batches: u32,
    pub refreshes: u32,
    pub blocked_waits: u32,
    pub media_pinned: u32,
    pub media_failed: u32,
    /// Bound the session ran under, for the completion line.
    pub limit: Option<usize>,
}

impl SessionStats {
    pub fn new(bound: RecordBound) -> Self {
        Self {
            limit: bound.limit(),
            ..Self::default()
        }
    }

    /// Complete means the bound was met, or there was no bound to meet.
    pub fn is_complete(&self) -> bool {
        match self.limit {
            Some(limit) => self.collected >= limit,
            None => true,
        }
    }
}

impl std::fmt::Display for SessionStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_complete() {
            writeln!(f, "\n=== Scraping Complete ===")?;
        } else {
            writeln!(f, "\n=== Scraping Incomplete ===")?;
        }
        if let Some(limit) = self.limit {
            writeln!(f, "Records:          {} out of {}", self.collected, limit)?;
        } else {
            writeln!(f, "Records:          {}", self.collected)?;
        }
        writeln!(f, "Batches scanned:  {}", self.batches)?;
        writeln!(f, "Duplicates:       {}", self.duplicates)?;
        writeln!(f, "Ads skipped:      {}", self.advertisements)?;
        writeln!(f, "Extraction skips: {}", self.skipped)?;
        writeln!(f, "Transient errors: {}", self.transient_errors)?;
        writeln!(f, "Empty batches:    {}", self.empty_batches)?;
        writeln!(f, "Refreshes:        {}", self.refreshes)?;
        writeln!(f, "Retry waits:      {}", self.blocked_waits)?;
        if self.media_pinned + self.media_failed > 0 {
            writeln!(
                f,
                "Screenshots:      {} pinned, {} failed",
                self.media_pinned, self.media_failed
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounded_summary_reports_progress() {
        let mut stats = SessionStats::new(RecordBound::Limit(50));
        stats.collected = 12;
        let text = stats.to_string();
        assert!(text.contains("Scraping Incomplete"));
        assert!(text.contains("12 out of 50"));
    }

    #[test]
    fn unbounded_session_is_complete() {
        let stats = SessionStats::new(RecordBound::Unbounded);
        assert!(stats.is_complete());
        assert!(!stats.to_string().contains("out of"));
    }
}
