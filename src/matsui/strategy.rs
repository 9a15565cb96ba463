use crate::config::{ProductConfig, StrategyKind};
use crate::error::ScrapeError;
use async_trait::async_trait;
use fantoccini::Client;
use std::collections::HashMap;
use std::sync::Arc;

use super::fund::FundStrategy;
use super::usstock::UsStockStrategy;
use super::ScrapeContext;

/// One row of the fund holdings table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PositionItem {
    /// Market value in yen. `None` means the cell did not parse, which is
    /// distinct from a zero valuation.
    pub market_value: Option<f64>,
    pub profit: Option<f64>,
    pub profit_rate: Option<f64>,
}

/// Per-holding breakdown scraped from the fund site, keyed by the
/// sub-account name shown on the page.
#[derive(Debug, Clone, PartialEq)]
pub struct FundPosition {
    pub details: HashMap<String, PositionItem>,
    pub total: PositionItem,
}

/// Flat summary scraped from the US stock site.
#[derive(Debug, Clone, PartialEq)]
pub struct UsStockSummary {
    pub total_amount: f64,
    pub daily_change: f64,
    pub total_profit: f64,
    pub total_profit_rate: f64,
}

/// Result of one strategy invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum Snapshot {
    Fund(FundPosition),
    UsStock(UsStockSummary),
}

impl Snapshot {
    /// Extracts the valuation for one configured account. The lookup rule
    /// is strategy-specific: funds are looked up by sub-account name in
    /// the breakdown, US stock reads the flat total.
    pub fn amount_for(&self, product: &ProductConfig) -> Result<f64, ScrapeError> {
        match (self, product.kind) {
            (Snapshot::Fund(position), StrategyKind::Fund) => position
                .details
                .get(&product.account_name)
                .and_then(|item| item.market_value)
                .ok_or_else(|| {
                    ScrapeError::MissingStructure(format!(
                        "no market value for account {}",
                        product.account_name
                    ))
                }),
            (Snapshot::UsStock(summary), StrategyKind::UsStock) => Ok(summary.total_amount),
            _ => Err(ScrapeError::MissingStructure(format!(
                "snapshot does not match strategy {}",
                product.kind
            ))),
        }
    }
}

/// Capability contract implemented once per financial product.
#[async_trait]
pub trait AssetScrapingStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// Probes a known authenticated page. Raises [`ScrapeError::Maintenance`]
    /// on a maintenance redirect instead of reporting the session invalid,
    /// so a maintenance window never triggers a login attempt.
    async fn is_session_valid(&self, client: &Client) -> Result<bool, ScrapeError>;

    async fn login(&self, client: &Client) -> Result<(), ScrapeError>;

    /// Strategy-specific navigation before scraping. The default is a
    /// no-op; strategies that need a secondary site override it.
    async fn prepare_target_page(&self, _client: &Client) -> Result<(), ScrapeError> {
        Ok(())
    }

    async fn scrape_assets(&self, client: &Client) -> Result<Snapshot, ScrapeError>;
}

/// Resolves a configured strategy tag to its implementation. Adding a
/// product means adding one variant here, not touching the orchestrator.
pub fn create_strategy(
    kind: StrategyKind,
    context: Arc<ScrapeContext>,
) -> Box<dyn AssetScrapingStrategy> {
    match kind {
        StrategyKind::Fund => Box::new(FundStrategy::new(context)),
        StrategyKind::UsStock => Box::new(UsStockStrategy::new(context)),
    }
}
