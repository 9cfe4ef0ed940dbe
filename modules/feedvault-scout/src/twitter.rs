// Twitter/X adapter: FeedDriver over a WebDriver session.
//
// The browser is expected to carry an already authenticated profile. All
// per-card reads happen in a single script call so a card that goes stale
// mid-read fails once instead of leaving a half-filled record.

use std::time::Duration;

use async_trait::async_trait;
use feedvault_common::{Config, FeedTab, Fingerprint, Record, SessionTarget};
use serde::Deserialize;
use tracing::{debug, info};
use webdriver_client::{BrowserOptions, ElementRef, WebDriverClient};

use crate::driver::{DriverError, DriverResult, Extraction, FeedDriver};

pub const TWITTER_BASE_URL: &str = "https://twitter.com";

const TWEET_XPATH: &str = r#"//article[@data-testid="tweet" and not(@disabled)]"#;
const HIDDEN_TWEET_XPATH: &str = r#"//article[@data-testid="tweet" and @disabled]"#;
const RETRY_XPATH: &str = "//span[text()='Retry']/../../..";
const COOKIE_XPATH: &str = "//span[text()='Refuse non-essential cookies']/../../..";

const USER_AGENT: &str = "Mozilla/5.0 (Linux; Android 11; SM-G998B) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/109.0.5414.87 Mobile Safari/537.36";

const SCROLL_SCRIPT: &str = "arguments[0].scrollIntoView();";
const REMOVE_CARD_SCRIPT: &str = "arguments[0].parentNode.parentNode.parentNode.remove();";

const EXTRACT_SCRIPT: &str = r#"
const card = arguments[0];
const q = (sel) => card.querySelector(sel);
const all = (sel) => Array.from(card.querySelectorAll(sel));
const text = (sel) => { const el = q(sel); return el ? el.innerText.trim() : ""; };
const user = q('[data-testid="User-Name"]');
const spans = user ? Array.from(user.querySelectorAll('span')).map(s => s.innerText.trim()) : [];
const handle = spans.find(s => s.startsWith('@')) || null;
const time = q('time');
const link = time && time.closest('a') ? time.closest('a').href : null;
const socialContext = text('[data-testid="socialContext"]');
const isAd = all('span').some(s => s.innerText.trim() === 'Ad' || s.innerText.trim() === 'Promoted');
const avatar = q('[data-testid="Tweet-User-Avatar"] img');
return {
  name: spans.length ? spans[0] : null,
  handle: handle,
  timestamp: time ? time.getAttribute('datetime') : null,
  verified: !!q('[data-testid="icon-verified"]'),
  content: text('[data-testid="tweetText"]'),
  replies: text('[data-testid="reply"]'),
  reposts: text('[data-testid="retweet"]'),
  likes: text('[data-testid="like"]'),
  views: text('a[href*="/analytics"]'),
  tags: all('[data-testid="tweetText"] a[href*="src=hashtag_click"]').map(a => a.innerText.trim()),
  mentions: all('[data-testid="tweetText"] a').map(a => a.innerText.trim()).filter(t => t.startsWith('@')),
  profileImage: avatar ? avatar.src : "",
  permalink: link,
  isAd: isAd && !socialContext,
  media: all('[data-testid="tweetPhoto"] img').map(img => img.src),
};
"#;

const HOVER_SCRIPT: &str = r#"
const avatar = arguments[0].querySelector('[data-testid="Tweet-User-Avatar"]');
if (avatar) { avatar.dispatchEvent(new MouseEvent('mouseover', { bubbles: true })); }
"#;

const FOLLOWERS_SCRIPT: &str = r#"
const card = document.querySelector('[data-testid="HoverCard"]');
if (!card) { return null; }
const link = card.querySelector('a[href$="/verified_followers"], a[href$="/followers"]');
if (!link) { return null; }
const span = link.querySelector('span');
return span ? span.innerText.trim() : link.innerText.trim();
"#;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCard {
    name: Option<String>,
    handle: Option<String>,
    timestamp: Option<String>,
    #[serde(default)]
    verified: bool,
    #[serde(default)]
    content: String,
    #[serde(default)]
    replies: String,
    #[serde(default)]
    reposts: String,
    #[serde(default)]
    likes: String,
    #[serde(default)]
    views: String,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    mentions: Vec<String>,
    #[serde(default)]
    profile_image: String,
    permalink: Option<String>,
    #[serde(default)]
    is_ad: bool,
    #[serde(default)]
    media: Vec<String>,
}

impl RawCard {
    fn into_extraction(self, fingerprint: Fingerprint, followers: Option<String>) -> Extraction {
        if self.is_ad {
            return Extraction::Advertisement;
        }
        let Some(handle) = self.handle.filter(|h| !h.is_empty()) else {
            return Extraction::Invalid("missing handle".to_string());
        };
        let Some(timestamp) = self.timestamp.filter(|t| !t.is_empty()) else {
            return Extraction::Invalid("missing timestamp".to_string());
        };
        let permalink = self.permalink.unwrap_or_default();

        Extraction::Post(Record {
            fingerprint,
            name: self.name.unwrap_or_default(),
            handle,
            timestamp,
            verified: self.verified,
            content: self.content,
            replies: parse_count(&self.replies),
            reposts: parse_count(&self.reposts),
            likes: parse_count(&self.likes),
            views: parse_count(&self.views),
            tags: self.tags,
            mentions: self.mentions,
            profile_image: self.profile_image,
            post_id: post_id_from_permalink(&permalink),
            permalink,
            followers,
            media: self.media,
            media_pointer: String::new(),
        })
    }
}

pub struct TwitterDriver {
    client: WebDriverClient,
    base_url: String,
    hover_delay: Duration,
}

impl TwitterDriver {
    pub fn new(client: WebDriverClient) -> Self {
        Self {
            client,
            base_url: TWITTER_BASE_URL.to_string(),
            hover_delay: Duration::from_millis(1500),
        }
    }

    /// Start a browser session using the WebDriver endpoint and profile from
    /// config.
    pub async fn launch(config: &Config) -> DriverResult<Self> {
        let mut options = BrowserOptions::new(&config.browser)
            .headless(config.headless)
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--ignore-certificate-errors")
            .arg("--disable-gpu")
            .arg("--disable-notifications")
            .arg("--disable-popup-blocking")
            .arg(format!("--user-agent={USER_AGENT}"));
        if let Some(proxy) = &config.proxy {
            options = options.arg(format!("--proxy-server={proxy}"));
        }
        if let Some(profile) = &config.browser_profile {
            options = match config.browser.as_str() {
                "chrome" | "chromium" => options.arg(format!("--user-data-dir={profile}")),
                _ => options.arg("-profile").arg(profile.clone()),
            };
        }

        let client = WebDriverClient::connect(&config.webdriver_url, &options).await?;
        info!(session_id = client.session_id(), "Browser ready");
        Ok(Self::new(client))
    }

    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    pub async fn quit(&self) -> DriverResult<()> {
        Ok(self.client.quit().await?)
    }

    async fn poster_followers(&self, card: &ElementRef) -> Option<String> {
        self.client
            .execute(HOVER_SCRIPT, vec![card.to_arg()])
            .await
            .ok()?;
        tokio::time::sleep(self.hover_delay).await;
        let value = self.client.execute(FOLLOWERS_SCRIPT, Vec::new()).await.ok()?;
        value.as_str().map(String::from).filter(|s| !s.is_empty())
    }
}

#[async_trait]
impl FeedDriver for TwitterDriver {
    type Element = ElementRef;

    async fn navigate(&self, target: &SessionTarget) -> DriverResult<()> {
        let url = target_url(&self.base_url, target)?;
        info!(target = %target, url = %url, "Navigating");
        Ok(self.client.navigate(&url).await?)
    }

    async fn dismiss_cookie_banner(&self) -> DriverResult<()> {
        if let Some(button) = self.client.find_elements(COOKIE_XPATH).await?.first() {
            self.client.click(button).await?;
            debug!("Cookie banner dismissed");
        }
        Ok(())
    }

    async fn visible_elements(&self, window: usize) -> DriverResult<Vec<ElementRef>> {
        let mut cards = self.client.find_elements(TWEET_XPATH).await?;
        let start = cards.len().saturating_sub(window);
        Ok(cards.split_off(start))
    }

    fn fingerprint(&self, element: &ElementRef) -> Fingerprint {
        Fingerprint::new(element.id())
    }

    async fn scroll_into_view(&self, element: &ElementRef) -> DriverResult<()> {
        self.client
            .execute(SCROLL_SCRIPT, vec![element.to_arg()])
            .await?;
        Ok(())
    }

    async fn extract(&self, element: &ElementRef, poster_details: bool) -> DriverResult<Extraction> {
        let value = self
            .client
            .execute(EXTRACT_SCRIPT, vec![element.to_arg()])
            .await?;
        let raw: RawCard = serde_json::from_value(value)
            .map_err(|e| DriverError::Transient(format!("unreadable card: {e}")))?;

        let followers = if poster_details && !raw.is_ad {
            self.poster_followers(element).await
        } else {
            None
        };
        Ok(raw.into_extraction(self.fingerprint(element), followers))
    }

    async fn screenshot(&self, element: &ElementRef) -> DriverResult<Vec<u8>> {
        Ok(self.client.element_screenshot(element).await?)
    }

    async fn retry_prompt_visible(&self) -> DriverResult<bool> {
        Ok(!self.client.find_elements(RETRY_XPATH).await?.is_empty())
    }

    async fn press_retry(&self) -> DriverResult<()> {
        if let Some(button) = self.client.find_elements(RETRY_XPATH).await?.first() {
            self.client.click(button).await?;
        }
        Ok(())
    }

    async fn refresh(&self) -> DriverResult<()> {
        Ok(self.client.refresh().await?)
    }

    async fn prune_hidden(&self) -> DriverResult<()> {
        let hidden = self.client.find_elements(HIDDEN_TWEET_XPATH).await?;
        // keep the first and the last two; the feed re-renders those
        if hidden.len() > 3 {
            for card in &hidden[1..hidden.len() - 2] {
                self.client
                    .execute(REMOVE_CARD_SCRIPT, vec![card.to_arg()])
                    .await?;
            }
        }
        Ok(())
    }
}

/// Feed URL for a session target.
pub fn target_url(base_url: &str, target: &SessionTarget) -> DriverResult<String> {
    let url = match target {
        SessionTarget::Home => format!("{base_url}/home"),
        SessionTarget::Bookmarks => format!("{base_url}/i/bookmarks"),
        SessionTarget::Profile { username } => format!("{base_url}/{username}"),
        SessionTarget::Hashtag { tag, tab } => {
            let mut url = format!("{base_url}/hashtag/{tag}?src=hashtag_click");
            if *tab == FeedTab::Latest {
                url.push_str("&f=live");
            }
            url
        }
        SessionTarget::Query { query, tab } => {
            let mut url = reqwest::Url::parse_with_params(
                &format!("{base_url}/search"),
                &[("q", query.as_str()), ("src", "typed_query")],
            )
            .map_err(|e| DriverError::Unrecoverable(format!("bad search url: {e}")))?;
            if *tab == FeedTab::Latest {
                url.query_pairs_mut().append_pair("f", "live");
            }
            url.to_string()
        }
    };
    Ok(url)
}

/// Engagement counter as shown on a card: "", "12", "1,204", "3.4K", "2M".
pub fn parse_count(raw: &str) -> u64 {
    let cleaned: String = raw.trim().chars().filter(|c| *c != ',').collect();
    if cleaned.is_empty() {
        return 0;
    }
    let (number, multiplier) = match cleaned.chars().last() {
        Some('K') | Some('k') => (&cleaned[..cleaned.len() - 1], 1_000.0),
        Some('M') | Some('m') => (&cleaned[..cleaned.len() - 1], 1_000_000.0),
        Some('B') | Some('b') => (&cleaned[..cleaned.len() - 1], 1_000_000_000.0),
        _ => (cleaned.as_str(), 1.0),
    };
    number
        .trim()
        .parse::<f64>()
        .map(|n| (n * multiplier).round() as u64)
        .unwrap_or(0)
}

fn post_id_from_permalink(permalink: &str) -> String {
    permalink
        .split("/status/")
        .nth(1)
        .and_then(|rest| rest.split(['/', '?']).next())
        .unwrap_or_default()
        .to_string()
}
