pub mod cookies;

use crate::config::BrowserConfig;
use crate::error::ScrapeError;
use fantoccini::elements::Element;
use fantoccini::{Client, ClientBuilder, Locator};
use serde_json::json;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// One WebDriver-backed browser session bound to a persistent Chrome
/// profile directory.
pub struct BrowserSession {
    client: Client,
}

impl BrowserSession {
    pub async fn connect(
        config: &BrowserConfig,
        user_data_dir: &Path,
    ) -> Result<Self, ScrapeError> {
        let mut args = vec![format!("--user-data-dir={}", user_data_dir.display())];
        if config.headless {
            args.push("--headless=new".to_string());
            args.push("--disable-gpu".to_string());
        }

        let mut caps = serde_json::map::Map::new();
        caps.insert("goog:chromeOptions".to_string(), json!({ "args": args }));

        debug!("Connecting to WebDriver at {}", config.webdriver_url);
        let client = ClientBuilder::native()
            .capabilities(caps)
            .connect(&config.webdriver_url)
            .await?;
        Ok(BrowserSession { client })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Tears the session down. Failures are logged, never raised, so a
    /// close error cannot mask an earlier failure.
    pub async fn close(self) {
        if let Err(err) = self.client.close().await {
            warn!("Browser session teardown failed: {err}");
        }
    }
}

/// Returns the first element matching `css`, if any. Absence is not an
/// error here; callers decide what a missing element means.
pub async fn find_optional(client: &Client, css: &str) -> Result<Option<Element>, ScrapeError> {
    let mut found = client.find_all(Locator::Css(css)).await?;
    if found.is_empty() {
        Ok(None)
    } else {
        Ok(Some(found.remove(0)))
    }
}

/// Polls until an element matching `css` appears, or the timeout elapses.
pub async fn wait_for(
    client: &Client,
    css: &str,
    timeout: Duration,
) -> Result<Option<Element>, ScrapeError> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(element) = find_optional(client, css).await? {
            return Ok(Some(element));
        }
        if Instant::now() >= deadline {
            return Ok(None);
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Like [`wait_for`], but a timeout is a hard failure naming the missing
/// structure.
pub async fn wait_for_required(
    client: &Client,
    css: &str,
    timeout: Duration,
) -> Result<Element, ScrapeError> {
    wait_for(client, css, timeout)
        .await?
        .ok_or_else(|| ScrapeError::MissingStructure(css.to_string()))
}

/// Polls until no element matches `css` anymore, or the timeout elapses.
/// Used to wait out loading placeholders.
pub async fn wait_until_gone(
    client: &Client,
    css: &str,
    timeout: Duration,
) -> Result<(), ScrapeError> {
    let deadline = Instant::now() + timeout;
    loop {
        if find_optional(client, css).await?.is_none() {
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(ScrapeError::MissingStructure(format!(
                "element {css} did not disappear"
            )));
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Polls until the current URL contains `needle`, or the timeout elapses.
pub async fn wait_for_url_contains(
    client: &Client,
    needle: &str,
    timeout: Duration,
) -> Result<(), ScrapeError> {
    let deadline = Instant::now() + timeout;
    loop {
        if client.current_url().await?.as_str().contains(needle) {
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(ScrapeError::Session(format!(
                "navigation to a URL containing {needle} timed out"
            )));
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Fills a form field, replacing any existing content.
pub async fn fill(element: &Element, text: &str) -> Result<(), ScrapeError> {
    element.clear().await?;
    element.send_keys(text).await?;
    Ok(())
}
