use crate::config::StrategyKind;
use crate::matsui::PageCapture;
use anyhow::Result;
use chrono::Local;
use serde_json::json;
use std::fs;
use std::path::PathBuf;
use tracing::{info, warn};

/// Best-effort diagnostic sink for strategy failures. Every capture goes
/// into its own timestamped directory; capture failures are logged and
/// swallowed so they never replace the original error.
pub struct ErrorCapture {
    base_dir: PathBuf,
}

impl ErrorCapture {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        ErrorCapture {
            base_dir: base_dir.into(),
        }
    }

    pub fn capture(&self, strategy: StrategyKind, error: &str, page: Option<&PageCapture>) {
        match self.try_capture(strategy, error, page) {
            Ok(dir) => info!("Saved error context to {}", dir.display()),
            Err(err) => warn!("Error context capture failed: {err:#}"),
        }
    }

    fn try_capture(
        &self,
        strategy: StrategyKind,
        error: &str,
        page: Option<&PageCapture>,
    ) -> Result<PathBuf> {
        let now = Local::now();
        let dir = self.base_dir.join(now.format("%Y%m%d-%H%M%S").to_string());
        fs::create_dir_all(&dir)?;

        let metadata = json!({
            "timestamp": now.to_rfc3339(),
            "url": page.map(|p| p.url.as_str()).unwrap_or("N/A"),
            "strategyType": strategy.to_string(),
            "error": { "message": error },
        });
        fs::write(
            dir.join("metadata.json"),
            serde_json::to_string_pretty(&metadata)?,
        )?;

        if let Some(page) = page {
            if let Some(screenshot) = &page.screenshot {
                fs::write(dir.join("screenshot.png"), screenshot)?;
            }
            if let Some(html) = &page.html {
                fs::write(dir.join("page.html"), html)?;
            }
        }
        Ok(dir)
    }
}
