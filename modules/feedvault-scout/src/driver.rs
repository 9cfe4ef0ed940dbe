// FeedDriver: the narrow capability surface the collect loop needs from a
// browser. The Twitter/X adapter implements it over WebDriver; tests use
// ScriptedDriver from `testing`.

use async_trait::async_trait;
use feedvault_common::{Fingerprint, Record, SessionTarget};
use webdriver_client::WebDriverError;

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    /// The page moved under us (stale or momentarily missing element).
    #[error("transient driver error: {0}")]
    Transient(String),

    /// The browser session is unusable.
    #[error("driver failure: {0}")]
    Unrecoverable(String),
}

impl DriverError {
    pub fn is_transient(&self) -> bool {
        matches!(self, DriverError::Transient(_))
    }
}

impl From<WebDriverError> for DriverError {
    fn from(err: WebDriverError) -> Self {
        if err.is_transient() {
            DriverError::Transient(err.to_string())
        } else {
            DriverError::Unrecoverable(err.to_string())
        }
    }
}

pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// What extracting one element produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    Post(Record),
    /// Promoted content; skipped without counting as a failure.
    Advertisement,
    /// Missing required fields or otherwise unusable.
    Invalid(String),
}

#[async_trait]
pub trait FeedDriver: Send + Sync {
    /// Handle to one feed element, valid for the current page only.
    type Element: Clone + Send + Sync;

    /// Load the feed for `target`.
    async fn navigate(&self, target: &SessionTarget) -> DriverResult<()>;

    /// Close a cookie consent banner if one is shown.
    async fn dismiss_cookie_banner(&self) -> DriverResult<()>;

    /// The most recent `window` feed elements currently in the DOM.
    async fn visible_elements(&self, window: usize) -> DriverResult<Vec<Self::Element>>;

    /// Session-scoped identity of an element.
    fn fingerprint(&self, element: &Self::Element) -> Fingerprint;

    async fn scroll_into_view(&self, element: &Self::Element) -> DriverResult<()>;

    async fn extract(&self, element: &Self::Element, poster_details: bool)
        -> DriverResult<Extraction>;

    /// PNG screenshot of one element.
    async fn screenshot(&self, element: &Self::Element) -> DriverResult<Vec<u8>>;

    /// Whether the feed is showing its "something went wrong, retry" prompt.
    async fn retry_prompt_visible(&self) -> DriverResult<bool>;

    async fn press_retry(&self) -> DriverResult<()>;

    async fn refresh(&self) -> DriverResult<()>;

    /// Drop hidden or disabled cards from the DOM to keep scans cheap.
    async fn prune_hidden(&self) -> DriverResult<()>;
}
