//! Scraping strategy for the US stock trading site, which lives behind
//! the member site and opens in a separate window.

use crate::browser::{self, fill};
use crate::config::StrategyKind;
use crate::error::ScrapeError;
use async_trait::async_trait;
use fantoccini::{Client, Locator};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use super::pages;
use super::strategy::{AssetScrapingStrategy, Snapshot, UsStockSummary};
use super::ScrapeContext;

const SUMMARY_CONTAINER: &str = ".total-summary";
const SUMMARY_ITEMS: &str = ".total-summary .total-summary-item";
const PROFIT_TITLE: &str = "株式評価損益合計";
const AMOUNT_TITLE: &str = "株式時価総額合計";

/// Where the post-submit redirect has landed.
#[derive(Debug, PartialEq)]
enum PostLoginPage {
    Maintenance,
    Pending,
    Settled,
}

fn classify_post_login(url: &str) -> PostLoginPage {
    if url.contains(pages::trade_maintenance_fragment()) {
        PostLoginPage::Maintenance
    } else if url.contains("/mgap/login") {
        PostLoginPage::Pending
    } else {
        PostLoginPage::Settled
    }
}

pub struct UsStockStrategy {
    context: Arc<ScrapeContext>,
}

impl UsStockStrategy {
    pub fn new(context: Arc<ScrapeContext>) -> Self {
        UsStockStrategy { context }
    }

    /// Waits for a second window to open after the launch click and
    /// switches to it.
    async fn switch_to_new_window(&self, client: &Client) -> Result<(), ScrapeError> {
        let deadline = Instant::now() + Duration::from_secs(15);
        loop {
            let mut windows = client.windows().await?;
            if windows.len() > 1 {
                if let Some(handle) = windows.pop() {
                    client.switch_to_window(handle).await?;
                    return Ok(());
                }
            }
            if Instant::now() >= deadline {
                return Err(ScrapeError::Session(
                    "the US stock site window did not open".to_string(),
                ));
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
    }

    fn strip_units(raw: &str) -> String {
        raw.replace('円', "").replace('%', "")
    }
}

#[async_trait]
impl AssetScrapingStrategy for UsStockStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::UsStock
    }

    async fn is_session_valid(&self, client: &Client) -> Result<bool, ScrapeError> {
        match client.goto(&pages::member_home()).await {
            Ok(()) => {}
            Err(err) => {
                warn!("Session probe failed, treating session as invalid: {err}");
                return Ok(false);
            }
        }
        let url = client.current_url().await?;
        if url.as_str().contains(pages::trade_maintenance_fragment()) {
            return Err(ScrapeError::Maintenance);
        }
        Ok(!url.as_str().contains("/login"))
    }

    async fn login(&self, client: &Client) -> Result<(), ScrapeError> {
        let credentials = self.context.credentials()?;

        client.goto(&pages::member_login()).await?;
        let login_id =
            browser::wait_for_required(client, "#login-id", Duration::from_secs(10)).await?;
        fill(&login_id, &credentials.login_id).await?;
        let password =
            browser::wait_for_required(client, "#login-password", Duration::from_secs(10)).await?;
        fill(&password, &credentials.password).await?;

        client
            .find(Locator::XPath("//button[contains(., 'ログイン')]"))
            .await?
            .click()
            .await?;
        info!("Submitted the login form");

        // The click returns before the navigation it triggers settles;
        // poll until the URL leaves the login page so a maintenance
        // redirect still in flight is not misread as a missing code
        // input.
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            match classify_post_login(client.current_url().await?.as_str()) {
                PostLoginPage::Maintenance => return Err(ScrapeError::Maintenance),
                PostLoginPage::Settled => break,
                PostLoginPage::Pending => {}
            }
            if Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        }

        let code = self.context.auth_codes.fetch().await?;
        let code_input =
            browser::wait_for_required(client, "input[name='auth-number']", Duration::from_secs(10))
                .await?;
        fill(&code_input, &code.code).await?;
        info!("Entered the authentication code");

        browser::wait_for_required(client, "#auth-btn", Duration::from_secs(10))
            .await?
            .click()
            .await?;
        browser::wait_for_url_contains(client, "/member", Duration::from_secs(10)).await?;
        info!("Authenticated against the member site");

        super::backup_cookies(client, &self.context.cookies).await;
        Ok(())
    }

    async fn prepare_target_page(&self, client: &Client) -> Result<(), ScrapeError> {
        browser::wait_for_required(
            client,
            "[data-page='us-stock-trade-top']",
            Duration::from_secs(10),
        )
        .await?
        .click()
        .await?;

        let launch =
            browser::wait_for_required(client, ".us-stock-trade > div", Duration::from_secs(10))
                .await?;
        launch.click().await?;
        self.switch_to_new_window(client).await?;
        info!("Launched the US stock site");

        // A customer notice interstitial shows up occasionally; defer it.
        if client.current_url().await?.as_str().contains("/notify") {
            client
                .find(Locator::XPath(
                    "//div[contains(@class, 'btn')][contains(., 'あとで確認')]",
                ))
                .await?
                .click()
                .await?;
            info!("Dismissed the customer notice");
            browser::wait_for_url_contains(client, "/home", Duration::from_secs(10)).await?;
        }

        client.goto(&pages::us_stock_position()).await?;
        browser::wait_for_required(client, SUMMARY_CONTAINER, Duration::from_secs(30)).await?;

        // Switch the summary to yen so totals are comparable with the
        // ledger currency.
        client
            .find(Locator::XPath(
                "//div[contains(@class, 'control-row')][contains(., '円')]//button[contains(@class, 'btn')][contains(., '円')]",
            ))
            .await?
            .click()
            .await?;

        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            let mut in_yen = false;
            for price in client
                .find_all(Locator::Css(".total-summary .total-price"))
                .await?
            {
                if price.text().await?.contains('円') {
                    in_yen = true;
                    break;
                }
            }
            if in_yen {
                break;
            }
            if Instant::now() >= deadline {
                return Err(ScrapeError::MissingStructure(
                    "summary did not switch to yen".to_string(),
                ));
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
        info!("Switched the summary display to yen");
        Ok(())
    }

    async fn scrape_assets(&self, client: &Client) -> Result<Snapshot, ScrapeError> {
        let mut total_amount = None;
        let mut daily_change = None;
        let mut total_profit = None;
        let mut total_profit_rate = None;

        for item in client.find_all(Locator::Css(SUMMARY_ITEMS)).await? {
            let Some(title) = item
                .find_all(Locator::Css(".title > div"))
                .await?
                .into_iter()
                .next()
            else {
                continue;
            };
            let title_text = title.text().await?;

            let mut prices = Vec::new();
            for price in item.find_all(Locator::Css(".price-cell .total-price")).await? {
                prices.push(price.text().await?);
            }
            if prices.len() < 2 {
                continue;
            }

            let parse = |raw: &str| crate::numeric::parse_number(&Self::strip_units(raw));
            if title_text.contains(PROFIT_TITLE) {
                total_profit = parse(&prices[0]);
                total_profit_rate = parse(&prices[1]);
            } else if title_text.contains(AMOUNT_TITLE) {
                total_amount = parse(&prices[0]);
                daily_change = parse(&prices[1]);
            }
        }

        match (total_amount, daily_change, total_profit, total_profit_rate) {
            (Some(total_amount), Some(daily_change), Some(total_profit), Some(total_profit_rate)) => {
                Ok(Snapshot::UsStock(UsStockSummary {
                    total_amount,
                    daily_change,
                    total_profit,
                    total_profit_rate,
                }))
            }
            _ => Err(ScrapeError::MissingStructure(
                "US stock valuation summary".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maintenance_redirect_is_classified_even_mid_flight() {
        assert_eq!(
            classify_post_login("https://trade.matsui.co.jp/mgap/mente"),
            PostLoginPage::Maintenance
        );
    }

    #[test]
    fn login_url_means_the_redirect_has_not_settled() {
        assert_eq!(
            classify_post_login("https://trade.matsui.co.jp/mgap/login"),
            PostLoginPage::Pending
        );
    }

    #[test]
    fn any_other_url_means_the_redirect_settled() {
        assert_eq!(
            classify_post_login("https://trade.matsui.co.jp/mgap/member/index"),
            PostLoginPage::Settled
        );
    }
}
