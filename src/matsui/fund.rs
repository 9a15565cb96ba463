//! Scraping strategy for the fund (robo-advisor) site.

use crate::browser::{self, fill};
use crate::config::StrategyKind;
use crate::error::ScrapeError;
use async_trait::async_trait;
use fantoccini::elements::Element;
use fantoccini::{Client, Locator};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::pages;
use super::strategy::{AssetScrapingStrategy, FundPosition, PositionItem, Snapshot};
use super::ScrapeContext;

const ERROR_MODAL: &str = ".modal-container.dialog.error";
const HOLDINGS_CONTAINER: &str = "#currentPortfolioInquiry";
const EMPTY_MARKER: &str = "#currentPortfolioInquiry .noRecord";
const HOLDINGS_ROWS: &str =
    "//div[@id='currentPortfolioInquiry']//h4[contains(., '全保有銘柄')]/following-sibling::table[1]//tr";
const TOTAL_ROW_LABEL: &str = "合計";

pub struct FundStrategy {
    context: Arc<ScrapeContext>,
}

impl FundStrategy {
    pub fn new(context: Arc<ScrapeContext>) -> Self {
        FundStrategy { context }
    }

    async fn probe_session(&self, client: &Client) -> Result<bool, ScrapeError> {
        client.goto(&pages::fund_home()).await?;
        let url = client.current_url().await?;
        if url.as_str().starts_with(&pages::fund_maintenance()) {
            return Err(ScrapeError::Maintenance);
        }

        // A live session renders the home page without the error modal.
        let modal = browser::wait_for(client, ERROR_MODAL, Duration::from_secs(10)).await?;
        Ok(modal.is_none())
    }

    async fn parse_row(&self, row: &Element) -> Result<Vec<String>, ScrapeError> {
        let mut cells = Vec::new();
        for cell in row.find_all(Locator::Css("th, td")).await? {
            cells.push(cell.text().await?.trim().to_string());
        }
        Ok(cells)
    }

    fn item_from(cells: &[String]) -> PositionItem {
        let parse = |index: usize| {
            cells
                .get(index)
                .and_then(|raw| crate::numeric::parse_number(raw))
        };
        PositionItem {
            market_value: parse(1),
            profit: parse(2),
            profit_rate: parse(3),
        }
    }
}

#[async_trait]
impl AssetScrapingStrategy for FundStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Fund
    }

    async fn is_session_valid(&self, client: &Client) -> Result<bool, ScrapeError> {
        match self.probe_session(client).await {
            Ok(valid) => Ok(valid),
            Err(ScrapeError::Maintenance) => Err(ScrapeError::Maintenance),
            Err(err) => {
                warn!("Session probe failed, treating session as invalid: {err}");
                Ok(false)
            }
        }
    }

    async fn login(&self, client: &Client) -> Result<(), ScrapeError> {
        let credentials = self.context.credentials()?;

        client.goto(&pages::fund_login()).await?;
        if client
            .current_url()
            .await?
            .as_str()
            .starts_with(&pages::fund_maintenance())
        {
            return Err(ScrapeError::Maintenance);
        }

        let login_id =
            browser::wait_for_required(client, "input[name='loginId']", Duration::from_secs(10))
                .await?;
        fill(&login_id, &credentials.login_id).await?;
        let password =
            browser::wait_for_required(client, "input[name='password']", Duration::from_secs(10))
                .await?;
        fill(&password, &credentials.password).await?;

        client
            .find(Locator::XPath("//button[contains(., 'ログイン')]"))
            .await?
            .click()
            .await?;
        info!("Submitted the login form");

        let code = self.context.auth_codes.fetch().await?;
        let code_input = browser::wait_for_required(
            client,
            ".inputAuthNumArea input[type='text']",
            Duration::from_secs(10),
        )
        .await?;
        fill(&code_input, &code.code).await?;
        info!("Entered the authentication code");

        // Entering the code sometimes navigates on its own; give it a
        // moment, then click the confirmation only if it is still there.
        tokio::time::sleep(Duration::from_secs(1)).await;
        let confirm = client
            .find_all(Locator::XPath("//button[contains(., '認証する')]"))
            .await?
            .into_iter()
            .next();
        match confirm {
            Some(button) => {
                button.click().await?;
                info!("No automatic navigation, clicked the confirmation button");
            }
            None => info!("Code entry navigated automatically"),
        }

        super::backup_cookies(client, &self.context.cookies).await;
        Ok(())
    }

    async fn prepare_target_page(&self, client: &Client) -> Result<(), ScrapeError> {
        client.goto(&pages::fund_position()).await?;
        browser::wait_for_required(client, HOLDINGS_CONTAINER, Duration::from_secs(30)).await?;
        // The empty-state marker stays visible until the balances load.
        browser::wait_until_gone(client, EMPTY_MARKER, Duration::from_secs(30)).await?;
        Ok(())
    }

    async fn scrape_assets(&self, client: &Client) -> Result<Snapshot, ScrapeError> {
        let rows = client.find_all(Locator::XPath(HOLDINGS_ROWS)).await?;
        let mut parsed = Vec::with_capacity(rows.len());
        for row in &rows {
            parsed.push(self.parse_row(row).await?);
        }

        // First row is the header; the last body row must be the total.
        let body = parsed.get(1..).unwrap_or_default();
        let total_cells = body
            .last()
            .filter(|cells| cells.first().map(String::as_str) == Some(TOTAL_ROW_LABEL))
            .ok_or_else(|| ScrapeError::MissingStructure("holdings total row".to_string()))?;

        let mut details = HashMap::new();
        for cells in &body[..body.len() - 1] {
            let Some(name) = cells.first() else {
                continue;
            };
            details.insert(name.clone(), Self::item_from(cells));
        }

        Ok(Snapshot::Fund(FundPosition {
            details,
            total: Self::item_from(total_cells),
        }))
    }
}
