pub mod capture;
pub mod repository;

use crate::config::{AccountConfig, StrategyKind};
use crate::matsui::ValuationScraper;
use crate::zaim::{IncomeEntry, LedgerPoster};
use anyhow::{anyhow, bail, Result};
use capture::ErrorCapture;
use chrono::Local;
use repository::{LastTotalAmount, TotalAmountRepository};
use std::collections::HashMap;
use tracing::info;

const SYNC_COMMENT: &str = "自動同期";

#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    /// Log what would be posted without touching the ledger or the
    /// total-amount file.
    pub dry_run: bool,
}

/// Drives one sync run: scrape each distinct strategy once, compute the
/// per-account delta against the last recorded total, post it, and
/// persist the updated totals in a single write at the end.
pub struct SyncService<S: ValuationScraper, L: LedgerPoster> {
    scraper: S,
    ledger: L,
    repository: TotalAmountRepository,
    capture: Option<ErrorCapture>,
}

impl<S: ValuationScraper, L: LedgerPoster> SyncService<S, L> {
    pub fn new(
        scraper: S,
        ledger: L,
        repository: TotalAmountRepository,
        capture: Option<ErrorCapture>,
    ) -> Self {
        SyncService {
            scraper,
            ledger,
            repository,
            capture,
        }
    }

    pub async fn sync(&mut self, accounts: &[AccountConfig], options: &SyncOptions) -> Result<()> {
        let enabled: Vec<&AccountConfig> = accounts.iter().filter(|a| a.enabled).collect();
        if enabled.is_empty() {
            bail!("No enabled accounts configured");
        }

        self.scraper.initialize().await?;
        let result = self.run(&enabled, options).await;
        // Teardown runs on every path so a close failure can never mask
        // the sync outcome.
        self.scraper.close().await;
        result
    }

    async fn run(&mut self, enabled: &[&AccountConfig], options: &SyncOptions) -> Result<()> {
        // Accounts sharing a strategy share one scrape.
        let mut kinds: Vec<StrategyKind> = Vec::new();
        for account in enabled {
            if !kinds.contains(&account.matsui.kind) {
                kinds.push(account.matsui.kind);
            }
        }

        info!("Fetching asset valuations");
        let mut snapshots = HashMap::new();
        for kind in kinds {
            info!("Running strategy {kind}");
            self.scraper.install_strategy(kind);
            let outcome = match self.scraper.authenticate().await {
                Ok(()) => self.scraper.scrape().await,
                Err(err) => Err(err),
            };
            match outcome {
                Ok(snapshot) => {
                    info!("Strategy {kind} completed");
                    snapshots.insert(kind, snapshot);
                }
                Err(err) => {
                    if let Some(capture) = &self.capture {
                        let page = self.scraper.capture_page().await;
                        capture.capture(kind, &err.to_string(), page.as_ref());
                    }
                    return Err(err.into());
                }
            }
        }

        let mut totals = self.repository.load()?;
        info!("Loaded {} recorded totals", totals.len());

        for account in enabled {
            let snapshot = snapshots
                .get(&account.matsui.kind)
                .ok_or_else(|| anyhow!("No snapshot for strategy {}", account.matsui.kind))?;
            let current = snapshot.amount_for(&account.matsui)?.round() as i64;
            self.process_account(account, current, &mut totals, options.dry_run)
                .await?;
        }

        if options.dry_run {
            info!("Dry run, skipping the total amount save");
        } else {
            self.repository.save(&totals)?;
            info!("Total amounts updated");
        }
        Ok(())
    }

    async fn process_account(
        &self,
        account: &AccountConfig,
        current: i64,
        totals: &mut Vec<LastTotalAmount>,
        dry_run: bool,
    ) -> Result<()> {
        let index = match totals
            .iter()
            .position(|item| item.account_id == account.zaim.account_id)
        {
            Some(index) => index,
            None => {
                info!(
                    "{}: no recorded total yet, starting from a 0 baseline",
                    account.name
                );
                totals.push(LastTotalAmount {
                    account_id: account.zaim.account_id,
                    amount: 0,
                    updated_at: Local::now().to_rfc3339(),
                });
                totals.len() - 1
            }
        };

        let delta = current - totals[index].amount;
        info!("{}: delta to record is {delta} yen", account.name);

        if dry_run {
            info!("Dry run, skipping the ledger posting");
            return Ok(());
        }

        self.ledger
            .register_income(&IncomeEntry {
                category_id: account.zaim.category_id,
                amount: delta,
                date: Local::now().date_naive(),
                to_account_id: account.zaim.account_id,
                comment: SYNC_COMMENT.to_string(),
            })
            .await?;
        info!("{}: posted to the ledger", account.name);

        totals[index].amount = current;
        totals[index].updated_at = Local::now().to_rfc3339();
        Ok(())
    }
}
