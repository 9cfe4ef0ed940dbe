use std::env;
use std::path::PathBuf;

use tracing::info;

use crate::error::FeedvaultError;

/// Symbols the subject classifier may assign. Matches the feeds published by
/// the price consumer contract.
pub const DEFAULT_SUBJECT_SYMBOLS: &[&str] = &[
    "C2FLR", "testXRP", "testLTC", "testXLM", "testDOGE", "testADA", "testALGO", "testBTC",
    "testETH", "testFIL", "testARB", "testAVAX", "testBNB", "testMATIC", "testSOL", "testUSDC",
    "testUSDT", "testXDC", "testPOL",
];

/// Auth material for the storage bridge.
#[derive(Debug, Clone)]
pub struct BridgeCredentials {
    pub space_did: String,
    pub x_auth_secret: String,
    pub authorization: String,
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Browser automation
    pub webdriver_url: String,
    pub browser: String,
    pub headless: bool,
    pub browser_profile: Option<String>,
    pub proxy: Option<String>,

    // Storage network
    /// Bridge endpoint override; the client's default is used when unset.
    pub bridge_url: Option<String>,
    pub bridge: Option<BridgeCredentials>,

    // Media pinning
    pub pinata_jwt: Option<String>,

    // Scoring / classification
    pub openai_api_key: Option<String>,
    pub openai_model: String,
    pub subject_symbols: Vec<String>,

    // Local persistence
    pub data_dir: PathBuf,
    pub feeds_snapshot_path: PathBuf,
}

impl Config {
    /// Load configuration from environment variables. Nothing here is required
    /// up front; commands check what they need with the `require_*` methods.
    pub fn from_env() -> Result<Self, FeedvaultError> {
        let headless = match env::var("HEADLESS") {
            Ok(v) => parse_flag("HEADLESS", &v)?,
            Err(_) => true,
        };

        let bridge = match (
            optional_env("W3UP_SPACE_DID"),
            optional_env("W3UP_XAUTH"),
            optional_env("W3UP_AUTH"),
        ) {
            (Some(space_did), Some(x_auth_secret), Some(authorization)) => {
                Some(BridgeCredentials {
                    space_did,
                    x_auth_secret,
                    authorization,
                })
            }
            (None, None, None) => None,
            _ => {
                return Err(FeedvaultError::Config(
                    "W3UP_SPACE_DID, W3UP_XAUTH and W3UP_AUTH must be set together".to_string(),
                ))
            }
        };

        let subject_symbols = optional_env("SUBJECT_SYMBOLS")
            .map(|s| {
                s.split(',')
                    .map(|sym| sym.trim().to_string())
                    .filter(|sym| !sym.is_empty())
                    .collect()
            })
            .unwrap_or_else(|| DEFAULT_SUBJECT_SYMBOLS.iter().map(|s| s.to_string()).collect());

        Ok(Self {
            webdriver_url: env::var("WEBDRIVER_URL")
                .unwrap_or_else(|_| "http://localhost:4444".to_string()),
            browser: env::var("BROWSER").unwrap_or_else(|_| "firefox".to_string()),
            headless,
            browser_profile: optional_env("BROWSER_PROFILE"),
            proxy: optional_env("PROXY"),
            bridge_url: optional_env("BRIDGE_URL"),
            bridge,
            pinata_jwt: optional_env("PINATA_JWT"),
            openai_api_key: optional_env("OPEN_AI_API_KEY"),
            openai_model: env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4".to_string()),
            subject_symbols,
            data_dir: PathBuf::from(env::var("DATA_DIR").unwrap_or_else(|_| "data".to_string())),
            feeds_snapshot_path: PathBuf::from(
                env::var("FEEDS_SNAPSHOT_PATH")
                    .unwrap_or_else(|_| "feeds-snapshot.csv".to_string()),
            ),
        })
    }

    /// Storage bridge credentials, or a config error naming what is missing.
    pub fn require_bridge(&self) -> Result<&BridgeCredentials, FeedvaultError> {
        self.bridge.as_ref().ok_or_else(|| {
            FeedvaultError::Config(
                "Missing one of W3UP_SPACE_DID, W3UP_XAUTH or W3UP_AUTH".to_string(),
            )
        })
    }

    /// OpenAI key, required by anything that scores content.
    pub fn require_openai_key(&self) -> Result<&str, FeedvaultError> {
        self.openai_api_key.as_deref().ok_or_else(|| {
            FeedvaultError::Config("OPEN_AI_API_KEY is required for scoring".to_string())
        })
    }

    /// Log which optional integrations are configured, without secret values.
    pub fn log_redacted(&self) {
        info!(
            webdriver_url = %self.webdriver_url,
            browser = %self.browser,
            headless = self.headless,
            browser_profile = self.browser_profile.is_some(),
            proxy = self.proxy.is_some(),
            bridge_url = self.bridge_url.as_deref().unwrap_or("default"),
            bridge_credentials = self.bridge.is_some(),
            pinata = self.pinata_jwt.is_some(),
            openai = self.openai_api_key.is_some(),
            openai_model = %self.openai_model,
            symbols = self.subject_symbols.len(),
            data_dir = %self.data_dir.display(),
            "Configuration loaded"
        );
    }
}

fn optional_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_flag(key: &str, value: &str) -> Result<bool, FeedvaultError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "yes" | "y" | "true" | "1" => Ok(true),
        "no" | "n" | "false" | "0" => Ok(false),
        other => Err(FeedvaultError::Config(format!(
            "{key} must be yes/no, got '{other}'"
        ))),
    }
}
