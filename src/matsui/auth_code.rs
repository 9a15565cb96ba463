//! Retrieves the SMS login code from a Google Messages conversation.

use crate::browser::{self, BrowserSession};
use crate::config::{AuthCodeConfig, BrowserConfig};
use crate::error::ScrapeError;
use chrono::{Duration as ChronoDuration, Local, NaiveDateTime};
use fantoccini::{Client, Locator};
use regex::Regex;
use std::sync::OnceLock;
use std::time::{Duration, Instant};
use tracing::{info, warn};

const MESSAGE_SELECTOR: &str = "mws-text-message-part";
const CONTENT_SELECTOR: &str = "mws-message-part-content";
const RENDER_TIMEOUT: Duration = Duration::from_secs(30);

/// Codes older than this are stale leftovers from an earlier login and
/// must not be reused.
const CODE_VALIDITY_MINUTES: i64 = 3;

fn code_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"認証番号：(\d{6})").unwrap())
}

fn timestamp_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(\d{4}年\d{1,2}月\d{1,2}日 \d{1,2}:\d{1,2}) に受信しました。").unwrap()
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct AuthenticationCode {
    pub code: String,
    pub received_at: NaiveDateTime,
}

/// Scans message labels newest-to-oldest for a fresh authentication code.
/// A matching code older than [`CODE_VALIDITY_MINUTES`] is rejected even
/// when no fresher one exists.
fn find_code(labels: &[String], now: NaiveDateTime) -> Option<AuthenticationCode> {
    for label in labels.iter().rev() {
        let Some(captures) = code_regex().captures(label) else {
            continue;
        };
        let Some(received_at) = timestamp_regex()
            .captures(label)
            .and_then(|c| parse_timestamp(c.get(1)?.as_str()))
        else {
            continue;
        };

        if now.signed_duration_since(received_at)
            < ChronoDuration::minutes(CODE_VALIDITY_MINUTES)
        {
            return Some(AuthenticationCode {
                code: captures[1].to_string(),
                received_at,
            });
        }
    }
    None
}

fn parse_timestamp(text: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(text, "%Y年%m月%d日 %H:%M").ok()
}

/// Delay before retry `attempt` (1-based): `base * 2^(attempt-1)`,
/// saturating since the attempt count comes from user configuration.
fn backoff_delay(base_secs: u64, attempt: u32) -> Duration {
    let factor = 1u64
        .checked_shl(attempt.saturating_sub(1))
        .unwrap_or(u64::MAX);
    Duration::from_secs(base_secs.saturating_mul(factor))
}

/// Polls the code-delivery inbox in its own browser session.
pub struct AuthCodeRetriever {
    config: AuthCodeConfig,
    browser: BrowserConfig,
}

impl AuthCodeRetriever {
    pub fn new(config: AuthCodeConfig, browser: BrowserConfig) -> Self {
        AuthCodeRetriever { config, browser }
    }

    /// Fetches a fresh authentication code, retrying timed-out attempts
    /// with exponential backoff up to the configured attempt count.
    /// Non-timeout failures abort immediately.
    pub async fn fetch(&self) -> Result<AuthenticationCode, ScrapeError> {
        for attempt in 1..=self.config.max_attempts {
            match self.poll_once().await {
                Ok(code) => return Ok(code),
                Err(ScrapeError::AuthCodeTimeout) if attempt < self.config.max_attempts => {
                    let delay = backoff_delay(self.config.backoff_base_secs, attempt);
                    warn!(
                        "Authentication code attempt {attempt}/{} timed out, retrying in {}s",
                        self.config.max_attempts,
                        delay.as_secs()
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
        Err(ScrapeError::AuthCodeTimeout)
    }

    /// One full attempt: open a session, poll until found or timed out.
    /// The session is torn down on every exit path.
    async fn poll_once(&self) -> Result<AuthenticationCode, ScrapeError> {
        let session = BrowserSession::connect(&self.browser, &self.config.user_data_dir).await?;
        let result = self.poll_messages(session.client()).await;
        session.close().await;
        result
    }

    async fn poll_messages(&self, client: &Client) -> Result<AuthenticationCode, ScrapeError> {
        client.goto(&self.config.conversation_url).await?;
        browser::wait_for_required(client, CONTENT_SELECTOR, RENDER_TIMEOUT).await?;

        let deadline = Instant::now() + Duration::from_secs(self.config.poll_timeout_secs);
        loop {
            let labels = self.message_labels(client).await?;
            if let Some(code) = find_code(&labels, Local::now().naive_local()) {
                info!("Found authentication code received at {}", code.received_at);
                return Ok(code);
            }

            if Instant::now() >= deadline {
                return Err(ScrapeError::AuthCodeTimeout);
            }
            info!(
                "Authentication code not received yet, checking again in {}s",
                self.config.poll_interval_secs
            );
            tokio::time::sleep(Duration::from_secs(self.config.poll_interval_secs)).await;
        }
    }

    async fn message_labels(&self, client: &Client) -> Result<Vec<String>, ScrapeError> {
        let mut labels = Vec::new();
        for message in client.find_all(Locator::Css(MESSAGE_SELECTOR)).await? {
            if let Some(label) = message.attr("aria-label").await? {
                labels.push(label);
            }
        }
        Ok(labels)
    }
}
