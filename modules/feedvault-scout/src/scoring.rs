use anyhow::Result;
use async_trait::async_trait;
use tracing::warn;

use crate::llm::OpenAiChat;

/// Rationale attached to rows whose content is empty.
pub const EMPTY_CONTENT_RATIONALE: &str = "No content provided.";

const DELETION_SYSTEM_PROMPT: &str = "You are an AI tweet analyzer. Your job is to analyze the tweet content and output \
a likelihood score between 0 and 1 for the tweet being deleted based on its controversial nature. \
Provide your answer as 'Score: <number>' followed by any analysis notes.";

#[derive(Debug, Clone, PartialEq)]
pub struct ScoreResult {
    /// Deletion likelihood in [0, 1].
    pub score: f64,
    pub rationale: String,
}

impl ScoreResult {
    pub fn neutral(rationale: impl Into<String>) -> Self {
        Self {
            score: 0.0,
            rationale: rationale.into(),
        }
    }
}

#[async_trait]
pub trait ContentScorer: Send + Sync {
    async fn score(&self, text: &str) -> Result<ScoreResult>;
}

/// Score `text`, degrading to 0.0 on empty input, scorer failure or a value
/// outside [0, 1]. Never fails.
pub async fn score_or_neutral(scorer: &dyn ContentScorer, text: &str) -> ScoreResult {
    if text.trim().is_empty() {
        return ScoreResult::neutral(EMPTY_CONTENT_RATIONALE);
    }
    match scorer.score(text).await {
        Ok(result) if (0.0..=1.0).contains(&result.score) => result,
        Ok(result) => {
            warn!(score = result.score, "Score out of range, using 0.0");
            ScoreResult::neutral(result.rationale)
        }
        Err(e) => {
            warn!(error = %e, "Scoring failed, using 0.0");
            ScoreResult::neutral(format!("Scoring failed: {e}"))
        }
    }
}

/// First whitespace-separated token that reads as a number in [0, 1].
pub fn parse_score(output: &str) -> Option<f64> {
    output
        .split_whitespace()
        .map(|token| token.trim_end_matches([',', ';', '.']))
        .filter_map(|token| token.parse::<f64>().ok())
        .find(|value| (0.0..=1.0).contains(value))
}

/// Deletion-likelihood scorer backed by an OpenAI chat model.
pub struct OpenAiScorer {
    chat: OpenAiChat,
}

impl OpenAiScorer {
    pub fn new(chat: OpenAiChat) -> Self {
        Self { chat }
    }
}

#[async_trait]
impl ContentScorer for OpenAiScorer {
    async fn score(&self, text: &str) -> Result<ScoreResult> {
        let prompt = format!(
            "Analyze this tweet and output a deletion likelihood score (0 to 1) \
             for it being deleted due to controversy. Tweet: {text}"
        );
        let output = self.chat.complete(DELETION_SYSTEM_PROMPT, &prompt).await?;
        let score = parse_score(&output).unwrap_or(0.0);
        Ok(ScoreResult {
            score,
            rationale: output,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FixedScorer;

    #[test]
    fn parse_score_takes_first_in_range_token() {
        assert_eq!(parse_score("Score: 0.35 mild controversy"), Some(0.35));
        assert_eq!(parse_score("Score: 7 out of 10, so 0.7."), Some(0.7));
        assert_eq!(parse_score("Score: 1"), Some(1.0));
        assert_eq!(parse_score("no idea"), None);
        assert_eq!(parse_score("NaN inf -0.5 2"), None);
    }

    #[tokio::test]
    async fn empty_content_is_neutral_without_calling_scorer() {
        let scorer = FixedScorer::new(0.9);
        let result = score_or_neutral(&scorer, "   ").await;
        assert_eq!(result.score, 0.0);
        assert_eq!(result.rationale, EMPTY_CONTENT_RATIONALE);
        assert_eq!(scorer.calls(), 0);
    }

    #[tokio::test]
    async fn failures_and_out_of_range_degrade_to_zero() {
        let scorer = FixedScorer::new(0.5).on("too hot", 1.7).failing_on("boom");
        assert_eq!(score_or_neutral(&scorer, "boom").await.score, 0.0);
        assert_eq!(score_or_neutral(&scorer, "too hot").await.score, 0.0);
        assert_eq!(score_or_neutral(&scorer, "fine").await.score, 0.5);
    }

    #[tokio::test]
    async fn nan_score_degrades_to_zero() {
        let scorer = FixedScorer::new(f64::NAN);
        assert_eq!(score_or_neutral(&scorer, "text").await.score, 0.0);
    }
}
