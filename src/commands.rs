use crate::config::AppConfig;
use crate::matsui::{ScrapeContext, SessionOrchestrator};
use crate::sync::capture::ErrorCapture;
use crate::sync::repository::TotalAmountRepository;
use crate::sync::{SyncOptions, SyncService};
use crate::zaim::{self, MoneyQuery, ZaimClient};
use anyhow::Result;
use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Attribute, Cell, ContentArrangement, Table};
use std::sync::Arc;
use tracing::info;

fn load_config(config_path: Option<&str>) -> Result<AppConfig> {
    match config_path {
        Some(path) => AppConfig::load_from_path(path),
        None => AppConfig::load(),
    }
}

fn styled_table(headers: Vec<&str>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(
            headers
                .into_iter()
                .map(|h| Cell::new(h).add_attribute(Attribute::Bold))
                .collect::<Vec<_>>(),
        );
    table
}

/// Full sync run: scrape the brokerage, diff against the recorded totals
/// and post the per-account deltas to the ledger.
pub async fn sync(config_path: Option<&str>, dry_run: bool) -> Result<()> {
    let config = load_config(config_path)?;
    info!(
        "Asset sync starting with {} enabled accounts",
        config.enabled_accounts().len()
    );

    let context = Arc::new(ScrapeContext::from_config(&config));
    let scraper = SessionOrchestrator::new(config.browser.clone(), context);
    let ledger = ZaimClient::new(&config.zaim)?;
    let repository = TotalAmountRepository::new(&config.sync.total_amount_file);
    let capture = config.error_log_dir.as_ref().map(|dir| ErrorCapture::new(dir));

    let mut service = SyncService::new(scraper, ledger, repository, capture);
    service
        .sync(&config.accounts, &SyncOptions { dry_run })
        .await
}

pub async fn accounts(config_path: Option<&str>, name: Option<&str>, all: bool) -> Result<()> {
    let config = load_config(config_path)?;
    let client = ZaimClient::new(&config.zaim)?;
    let accounts = client.get_accounts(name, !all).await?;

    let mut table = styled_table(vec!["ID", "Name", "Active"]);
    for account in &accounts {
        table.add_row(vec![
            Cell::new(account.id),
            Cell::new(&account.name),
            Cell::new(if account.active == 1 { "yes" } else { "no" }),
        ]);
    }
    println!("{table}");
    Ok(())
}

pub async fn categories(config_path: Option<&str>, mode: Option<&str>) -> Result<()> {
    let config = load_config(config_path)?;
    let client = ZaimClient::new(&config.zaim)?;
    let categories = client.get_categories(mode).await?;

    let mut table = styled_table(vec!["ID", "Name", "Mode"]);
    for category in &categories {
        table.add_row(vec![
            Cell::new(category.id),
            Cell::new(&category.name),
            Cell::new(&category.mode),
        ]);
    }
    println!("{table}");
    Ok(())
}

pub async fn money(config_path: Option<&str>, query: MoneyQuery) -> Result<()> {
    let config = load_config(config_path)?;
    let client = ZaimClient::new(&config.zaim)?;
    let records = client.get_money(&query).await?;

    let mut table = styled_table(vec!["ID", "Date", "Mode", "Amount", "To account", "Comment"]);
    for record in &records {
        table.add_row(vec![
            Cell::new(record.id),
            Cell::new(&record.date),
            Cell::new(&record.mode),
            Cell::new(record.amount),
            Cell::new(
                record
                    .to_account_id
                    .map(|id| id.to_string())
                    .unwrap_or_default(),
            ),
            Cell::new(record.comment.as_deref().unwrap_or_default()),
        ]);
    }
    println!("{table}");
    Ok(())
}

/// Interactive OAuth authorization, writes the obtained access token to
/// the configured token file.
pub async fn authorize(config_path: Option<&str>) -> Result<()> {
    let config = load_config(config_path)?;
    zaim::oauth::authorize(&config.zaim).await
}
