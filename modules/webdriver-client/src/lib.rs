pub mod error;

pub use error::{Result, WebDriverError};

use std::time::Duration;

use base64::Engine;
use reqwest::Method;
use serde_json::{json, Map, Value};

/// Key under which W3C WebDriver serializes element references.
pub const ELEMENT_KEY: &str = "element-6066-11e4-a52f-4ae735ab73a3";

/// Opaque handle to an element in the remote browser. Only valid for the
/// session that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementRef(String);

impl ElementRef {
    pub fn id(&self) -> &str {
        &self.0
    }

    /// Wire form used when passing the element as a script argument.
    pub fn to_arg(&self) -> Value {
        let mut map = Map::new();
        map.insert(ELEMENT_KEY.to_string(), Value::String(self.0.clone()));
        Value::Object(map)
    }

    fn from_value(value: &Value) -> Result<Self> {
        value
            .get(ELEMENT_KEY)
            .and_then(Value::as_str)
            .map(|id| ElementRef(id.to_string()))
            .ok_or_else(|| WebDriverError::Protocol(format!("not an element reference: {value}")))
    }
}

/// Browser launch options sent as capabilities when the session is created.
#[derive(Debug, Clone)]
pub struct BrowserOptions {
    pub browser: String,
    pub headless: bool,
    pub args: Vec<String>,
}

impl BrowserOptions {
    pub fn new(browser: &str) -> Self {
        Self {
            browser: browser.to_string(),
            headless: true,
            args: Vec::new(),
        }
    }

    pub fn headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    fn capabilities(&self) -> Value {
        let mut args = self.args.clone();
        if self.headless {
            args.push("--headless".to_string());
        }
        let options_key = match self.browser.as_str() {
            "chrome" | "chromium" => "goog:chromeOptions",
            _ => "moz:firefoxOptions",
        };

        let mut always_match = Map::new();
        always_match.insert("browserName".to_string(), Value::String(self.browser.clone()));
        always_match.insert(options_key.to_string(), json!({ "args": args }));

        json!({ "capabilities": { "alwaysMatch": Value::Object(always_match) } })
    }
}

pub struct WebDriverClient {
    client: reqwest::Client,
    base_url: String,
    session_id: String,
}

impl WebDriverClient {
    /// Open a new browser session on a WebDriver endpoint (geckodriver,
    /// chromedriver, Selenium grid).
    pub async fn connect(base_url: &str, options: &BrowserOptions) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        let base_url = base_url.trim_end_matches('/').to_string();

        let resp = client
            .post(format!("{base_url}/session"))
            .json(&options.capabilities())
            .send()
            .await?;
        let value = read_value(resp).await?;

        let session_id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| WebDriverError::Protocol(format!("missing sessionId: {value}")))?
            .to_string();

        tracing::info!(session_id = %session_id, browser = %options.browser, "WebDriver session created");

        Ok(Self {
            client,
            base_url,
            session_id,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    async fn call(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value> {
        let url = format!("{}/session/{}{}", self.base_url, self.session_id, path);
        let mut req = self.client.request(method, &url);
        if let Some(body) = body {
            req = req.json(&body);
        }
        let resp = req.send().await?;
        read_value(resp).await
    }

    pub async fn navigate(&self, url: &str) -> Result<()> {
        self.call(Method::POST, "/url", Some(json!({ "url": url })))
            .await?;
        Ok(())
    }

    pub async fn refresh(&self) -> Result<()> {
        self.call(Method::POST, "/refresh", Some(json!({}))).await?;
        Ok(())
    }

    /// All elements matching an XPath expression, in document order.
    pub async fn find_elements(&self, xpath: &str) -> Result<Vec<ElementRef>> {
        let value = self
            .call(
                Method::POST,
                "/elements",
                Some(json!({ "using": "xpath", "value": xpath })),
            )
            .await?;
        parse_elements(&value)
    }

    pub async fn click(&self, element: &ElementRef) -> Result<()> {
        let path = format!("/element/{}/click", element.id());
        self.call(Method::POST, &path, Some(json!({}))).await?;
        Ok(())
    }

    /// Run a synchronous script in the page and return its result.
    pub async fn execute(&self, script: &str, args: Vec<Value>) -> Result<Value> {
        self.call(
            Method::POST,
            "/execute/sync",
            Some(json!({ "script": script, "args": args })),
        )
        .await
    }

    /// PNG screenshot of a single element.
    pub async fn element_screenshot(&self, element: &ElementRef) -> Result<Vec<u8>> {
        let path = format!("/element/{}/screenshot", element.id());
        let value = self.call(Method::GET, &path, None).await?;
        let encoded = value
            .as_str()
            .ok_or_else(|| WebDriverError::Protocol("screenshot is not a string".to_string()))?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| WebDriverError::Protocol(format!("invalid screenshot encoding: {e}")))
    }

    /// End the browser session.
    pub async fn quit(&self) -> Result<()> {
        let url = format!("{}/session/{}", self.base_url, self.session_id);
        let resp = self.client.delete(&url).send().await?;
        read_value(resp).await?;
        tracing::info!(session_id = %self.session_id, "WebDriver session closed");
        Ok(())
    }
}

/// Unwrap the `value` field of a WebDriver response, turning error payloads
/// into typed errors.
async fn read_value(resp: reqwest::Response) -> Result<Value> {
    let status = resp.status();
    let text = resp.text().await?;
    let body: Value = serde_json::from_str(&text).map_err(|_| WebDriverError::Api {
        status: status.as_u16(),
        error: "unparsable response".to_string(),
        message: text.clone(),
    })?;
    unwrap_value(status.as_u16(), body)
}

fn unwrap_value(status: u16, mut body: Value) -> Result<Value> {
    let value = body.get_mut("value").map(Value::take).unwrap_or(Value::Null);
    if (200..300).contains(&status) {
        return Ok(value);
    }
    let error = value
        .get("error")
        .and_then(Value::as_str)
        .unwrap_or("unknown error")
        .to_string();
    let message = value
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    Err(WebDriverError::from_wire(status, error, message))
}

fn parse_elements(value: &Value) -> Result<Vec<ElementRef>> {
    value
        .as_array()
        .ok_or_else(|| WebDriverError::Protocol(format!("expected element list: {value}")))?
        .iter()
        .map(ElementRef::from_value)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_element_list() {
        let value = json!([
            { ELEMENT_KEY: "a-1" },
            { ELEMENT_KEY: "a-2" },
        ]);
        let elements = parse_elements(&value).unwrap();
        assert_eq!(elements.len(), 2);
        assert_eq!(elements[0].id(), "a-1");
        assert_eq!(elements[1].to_arg(), json!({ ELEMENT_KEY: "a-2" }));
    }

    #[test]
    fn rejects_non_element_entries() {
        let value = json!([{ "foo": "bar" }]);
        assert!(matches!(
            parse_elements(&value),
            Err(WebDriverError::Protocol(_))
        ));
    }

    #[test]
    fn stale_element_maps_to_transient_error() {
        let body = json!({
            "value": {
                "error": "stale element reference",
                "message": "element is not attached to the page document"
            }
        });
        let err = unwrap_value(404, body).unwrap_err();
        assert!(matches!(err, WebDriverError::StaleElement(_)));
        assert!(err.is_transient());
    }

    #[test]
    fn unknown_error_is_not_transient() {
        let body = json!({ "value": { "error": "invalid session id", "message": "gone" } });
        let err = unwrap_value(404, body).unwrap_err();
        assert!(!err.is_transient());
        assert!(matches!(err, WebDriverError::Api { status: 404, .. }));
    }

    #[test]
    fn success_returns_inner_value() {
        let body = json!({ "value": { "sessionId": "abc" } });
        let value = unwrap_value(200, body).unwrap();
        assert_eq!(value["sessionId"], "abc");
    }

    #[test]
    fn headless_flag_lands_in_firefox_args() {
        let caps = BrowserOptions::new("firefox")
            .arg("--no-sandbox")
            .headless(true)
            .capabilities();
        let args = &caps["capabilities"]["alwaysMatch"]["moz:firefoxOptions"]["args"];
        assert_eq!(args, &json!(["--no-sandbox", "--headless"]));
    }
}
