// Subject classification: which tracked symbol a batch of posts is about.
//
// KeywordClassifier counts cashtags and well-known asset names and needs no
// network. LlmClassifier asks a chat model to pick one symbol out of the
// configured set and rejects anything else it answers.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, warn};

use crate::llm::OpenAiChat;

/// Posts joined into one LLM prompt at most.
const MAX_TEXTS_PER_PROMPT: usize = 20;

#[async_trait]
pub trait SubjectClassifier: Send + Sync {
    /// The symbol `texts` refer to, or None when no tracked symbol fits.
    async fn classify(&self, texts: &[String]) -> Result<Option<String>>;

    /// How many texts one `classify` call takes. Every text in a call is
    /// attributed to the same subject.
    fn batch_size(&self) -> usize {
        1
    }
}

// ---------------------------------------------------------------------------
// KeywordClassifier
// ---------------------------------------------------------------------------

/// Asset names that commonly stand in for a ticker.
const ASSET_NAMES: &[(&str, &str)] = &[
    ("flare", "FLR"),
    ("ripple", "XRP"),
    ("litecoin", "LTC"),
    ("stellar", "XLM"),
    ("dogecoin", "DOGE"),
    ("cardano", "ADA"),
    ("algorand", "ALGO"),
    ("bitcoin", "BTC"),
    ("ethereum", "ETH"),
    ("ether", "ETH"),
    ("filecoin", "FIL"),
    ("arbitrum", "ARB"),
    ("avalanche", "AVAX"),
    ("binance", "BNB"),
    ("polygon", "POL"),
    ("solana", "SOL"),
    ("tether", "USDT"),
];

pub struct KeywordClassifier {
    /// Ticker (upper case) -> configured symbol.
    tickers: HashMap<String, String>,
    /// Symbols in configured order, used to break ties.
    order: Vec<String>,
    word: Regex,
}

impl KeywordClassifier {
    pub fn new(symbols: &[String]) -> Result<Self> {
        let tickers = symbols
            .iter()
            .map(|symbol| (ticker_of(symbol), symbol.clone()))
            .collect();
        Ok(Self {
            tickers,
            order: symbols.to_vec(),
            word: Regex::new(r"\$?[A-Za-z][A-Za-z0-9]+")?,
        })
    }

    fn symbol_for_word(&self, word: &str) -> Option<&String> {
        let bare = word.trim_start_matches('$');
        let upper = bare.to_ascii_uppercase();
        // plain words only count when written as a ticker or a known asset name
        let is_cashtag = word.starts_with('$');
        let is_ticker_case = bare == upper;
        if is_cashtag || is_ticker_case {
            if let Some(symbol) = self.tickers.get(&upper) {
                return Some(symbol);
            }
        }
        let lower = bare.to_ascii_lowercase();
        ASSET_NAMES
            .iter()
            .find(|(name, _)| *name == lower)
            .and_then(|(_, ticker)| self.tickers.get(*ticker))
    }
}

#[async_trait]
impl SubjectClassifier for KeywordClassifier {
    async fn classify(&self, texts: &[String]) -> Result<Option<String>> {
        let mut counts: HashMap<&String, usize> = HashMap::new();
        for text in texts {
            for m in self.word.find_iter(text) {
                if let Some(symbol) = self.symbol_for_word(m.as_str()) {
                    *counts.entry(symbol).or_default() += 1;
                }
            }
        }

        let best = self
            .order
            .iter()
            .filter_map(|symbol| counts.get(symbol).map(|n| (symbol, *n)))
            .fold(None::<(&String, usize)>, |best, (symbol, n)| match best {
                Some((_, top)) if top >= n => best,
                _ => Some((symbol, n)),
            });
        Ok(best.map(|(symbol, _)| symbol.clone()))
    }
}

/// Bare ticker of a configured symbol: `testBTC` -> `BTC`, `C2FLR` -> `FLR`.
fn ticker_of(symbol: &str) -> String {
    let bare = symbol
        .strip_prefix("test")
        .or_else(|| symbol.strip_prefix("C2"))
        .unwrap_or(symbol);
    bare.to_ascii_uppercase()
}

// ---------------------------------------------------------------------------
// LlmClassifier
// ---------------------------------------------------------------------------

pub struct LlmClassifier {
    chat: OpenAiChat,
    symbols: Vec<String>,
}

impl LlmClassifier {
    pub fn new(chat: OpenAiChat, symbols: Vec<String>) -> Self {
        Self { chat, symbols }
    }

    fn system_prompt(&self) -> String {
        format!(
            "You are an AI that reads a batch of tweet texts and tells me, in a single token, \
             which cryptocurrency they are referring to. Valid outputs are exactly one of: {}.\n\n\
             Respond with exactly the one symbol, no punctuation.",
            self.symbols.join(", ")
        )
    }

    /// Accept the answer only if it names a configured symbol.
    fn accept(&self, answer: &str) -> Option<String> {
        let token = answer
            .split_whitespace()
            .next()?
            .trim_matches(|c: char| !c.is_ascii_alphanumeric());
        self.symbols
            .iter()
            .find(|s| s.eq_ignore_ascii_case(token))
            .cloned()
    }
}

#[async_trait]
impl SubjectClassifier for LlmClassifier {
    async fn classify(&self, texts: &[String]) -> Result<Option<String>> {
        if texts.is_empty() {
            return Ok(None);
        }
        let joined = texts
            .iter()
            .take(MAX_TEXTS_PER_PROMPT)
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("\n\n---\n\n");
        let answer = self
            .chat
            .complete(&self.system_prompt(), &format!("Tweets:\n{joined}"))
            .await?;

        let subject = self.accept(&answer);
        match &subject {
            Some(symbol) => debug!(symbol = %symbol, "Subject classified"),
            None => warn!(answer = %answer.trim(), "Classifier answered outside the symbol set"),
        }
        Ok(subject)
    }

    fn batch_size(&self) -> usize {
        MAX_TEXTS_PER_PROMPT
    }
}
