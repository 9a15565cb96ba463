pub mod auth_code;
pub mod fund;
pub mod pages;
pub mod strategy;
pub mod usstock;

use crate::browser::cookies::{CookieStore, StoredCookie};
use crate::browser::BrowserSession;
use crate::config::{AppConfig, BrowserConfig, MatsuiConfig, StrategyKind};
use crate::error::ScrapeError;
use async_trait::async_trait;
use auth_code::AuthCodeRetriever;
use fantoccini::Client;
use std::sync::Arc;
use tracing::{debug, info, warn};

use strategy::{create_strategy, AssetScrapingStrategy, Snapshot};

/// Dependencies shared by all strategies: credentials, the cookie cache
/// and the two-factor code retriever. Passed explicitly at construction
/// instead of living in globals.
pub struct ScrapeContext {
    matsui: MatsuiConfig,
    pub cookies: CookieStore,
    pub auth_codes: AuthCodeRetriever,
}

impl ScrapeContext {
    pub fn from_config(config: &AppConfig) -> Self {
        ScrapeContext {
            matsui: config.matsui.clone(),
            cookies: CookieStore::new(&config.matsui.user_data_dir),
            auth_codes: AuthCodeRetriever::new(
                config.auth_code.clone(),
                config.browser.clone(),
            ),
        }
    }

    pub fn credentials(&self) -> Result<&MatsuiConfig, ScrapeError> {
        if self.matsui.login_id.is_empty() || self.matsui.password.is_empty() {
            return Err(ScrapeError::MissingCredentials);
        }
        Ok(&self.matsui)
    }
}

/// Best-effort cookie backup; a failure here never masks the caller's
/// more significant error.
pub async fn backup_cookies(client: &Client, store: &CookieStore) {
    match client.get_all_cookies().await {
        Ok(cookies) => {
            let stored: Vec<StoredCookie> =
                cookies.iter().map(StoredCookie::from_cookie).collect();
            store.save(&stored);
        }
        Err(err) => warn!("Could not read cookies for backup: {err}"),
    }
}

/// WebDriver only accepts cookies for the current document's domain, so
/// each cookie is restored from a page on its own site. Cookies without
/// a recorded domain fall back to the fund site.
fn restore_origin(cookie: &StoredCookie) -> String {
    match &cookie.domain {
        Some(domain) => format!("https://{}/", domain.trim_start_matches('.')),
        None => pages::fund_home(),
    }
}

fn group_by_origin(stored: &[StoredCookie]) -> Vec<(String, Vec<&StoredCookie>)> {
    let mut groups: Vec<(String, Vec<&StoredCookie>)> = Vec::new();
    for cookie in stored {
        let origin = restore_origin(cookie);
        match groups.iter_mut().find(|(existing, _)| *existing == origin) {
            Some((_, cookies)) => cookies.push(cookie),
            None => groups.push((origin, vec![cookie])),
        }
    }
    groups
}

/// Diagnostic snapshot of the current page, taken when a strategy fails.
pub struct PageCapture {
    pub url: String,
    pub screenshot: Option<Vec<u8>>,
    pub html: Option<String>,
}

/// Seam between the synchronizer and the browser-driving orchestrator,
/// mockable in tests.
#[async_trait]
pub trait ValuationScraper: Send {
    async fn initialize(&mut self) -> Result<(), ScrapeError>;
    fn install_strategy(&mut self, kind: StrategyKind);
    async fn authenticate(&mut self) -> Result<(), ScrapeError>;
    async fn scrape(&mut self) -> Result<Snapshot, ScrapeError>;
    /// Best-effort diagnostic capture of the current page state.
    async fn capture_page(&self) -> Option<PageCapture>;
    async fn close(&mut self);
}

/// Owns exactly one browser session and mediates calls to whichever
/// strategy is currently installed. Adds no retry logic of its own.
pub struct SessionOrchestrator {
    browser: BrowserConfig,
    context: Arc<ScrapeContext>,
    session: Option<BrowserSession>,
    strategy: Option<Box<dyn AssetScrapingStrategy>>,
}

impl SessionOrchestrator {
    pub fn new(browser: BrowserConfig, context: Arc<ScrapeContext>) -> Self {
        SessionOrchestrator {
            browser,
            context,
            session: None,
            strategy: None,
        }
    }

    fn client(&self) -> Result<&Client, ScrapeError> {
        self.session
            .as_ref()
            .map(BrowserSession::client)
            .ok_or_else(|| ScrapeError::Session("browser session not initialized".to_string()))
    }

    fn strategy(&self) -> Result<&dyn AssetScrapingStrategy, ScrapeError> {
        self.strategy
            .as_deref()
            .ok_or_else(|| ScrapeError::Session("no strategy installed".to_string()))
    }

    /// Restores saved cookies into the fresh session. Parse or restore
    /// failures are logged and the run continues without cookies.
    async fn restore_cookies(&self) -> Result<(), ScrapeError> {
        let stored = self.context.cookies.load();
        if stored.is_empty() {
            return Ok(());
        }

        let client = self.client()?;
        let mut restored = 0usize;
        for (origin, cookies) in group_by_origin(&stored) {
            client.goto(&origin).await?;
            for cookie in cookies {
                match client.add_cookie(cookie.to_cookie()).await {
                    Ok(()) => restored += 1,
                    Err(err) => debug!("Skipped cookie {}: {err}", cookie.name),
                }
            }
        }
        info!("Restored {restored}/{} saved cookies", stored.len());
        Ok(())
    }
}

#[async_trait]
impl ValuationScraper for SessionOrchestrator {
    async fn initialize(&mut self) -> Result<(), ScrapeError> {
        let session =
            BrowserSession::connect(&self.browser, &self.context.matsui.user_data_dir).await?;
        self.session = Some(session);

        if let Err(err) = self.restore_cookies().await {
            warn!("Cookie restore failed, continuing without saved cookies: {err}");
        }
        Ok(())
    }

    fn install_strategy(&mut self, kind: StrategyKind) {
        self.strategy = Some(create_strategy(kind, Arc::clone(&self.context)));
    }

    async fn authenticate(&mut self) -> Result<(), ScrapeError> {
        let client = self.client()?;
        let strategy = self.strategy()?;

        if strategy.is_session_valid(client).await? {
            info!("Existing session is still valid");
            return Ok(());
        }

        info!("Session is invalid, logging in");
        strategy.login(client).await
    }

    async fn scrape(&mut self) -> Result<Snapshot, ScrapeError> {
        let client = self.client()?;
        let strategy = self.strategy()?;

        strategy.prepare_target_page(client).await?;
        strategy.scrape_assets(client).await
    }

    async fn capture_page(&self) -> Option<PageCapture> {
        let client = self.client().ok()?;
        let url = match client.current_url().await {
            Ok(url) => url.to_string(),
            Err(_) => "N/A".to_string(),
        };
        Some(PageCapture {
            url,
            screenshot: client.screenshot().await.ok(),
            html: client.source().await.ok(),
        })
    }

    async fn close(&mut self) {
        if let Some(session) = self.session.take() {
            backup_cookies(session.client(), &self.context.cookies).await;
            session.close().await;
            info!("Browser session closed");
        }
        self.strategy = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cookie(name: &str, domain: Option<&str>) -> StoredCookie {
        StoredCookie {
            name: name.to_string(),
            value: "v".to_string(),
            domain: domain.map(str::to_string),
            path: Some("/".to_string()),
            secure: true,
            http_only: true,
        }
    }

    #[test]
    fn cookies_are_restored_per_site() {
        let stored = vec![
            cookie("fund-session", Some(".fund.matsui.co.jp")),
            cookie("trade-session", Some("trade.matsui.co.jp")),
            cookie("fund-pref", Some(".fund.matsui.co.jp")),
        ];

        let groups = group_by_origin(&stored);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, "https://fund.matsui.co.jp/");
        assert_eq!(groups[0].1.len(), 2);
        assert_eq!(groups[1].0, "https://trade.matsui.co.jp/");
        assert_eq!(groups[1].1[0].name, "trade-session");
    }

    #[test]
    fn domainless_cookies_fall_back_to_the_fund_site() {
        let stored = [cookie("session", None)];
        let groups = group_by_origin(&stored);
        assert_eq!(groups[0].0, pages::fund_home());
    }
}
