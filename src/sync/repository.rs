use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use tracing::info;

/// Last synced cumulative valuation for one ledger account.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LastTotalAmount {
    pub account_id: i64,
    pub amount: i64,
    pub updated_at: String,
}

/// Durable store for the per-account totals, a single JSON list read and
/// written wholesale so the file stays internally consistent.
pub struct TotalAmountRepository {
    file_path: PathBuf,
}

impl TotalAmountRepository {
    pub fn new(file_path: impl Into<PathBuf>) -> Self {
        TotalAmountRepository {
            file_path: file_path.into(),
        }
    }

    /// Loads all records. A missing file is an empty list; an empty or
    /// `null` body is an error.
    pub fn load(&self) -> Result<Vec<LastTotalAmount>> {
        if !self.file_path.exists() {
            info!("No total amount file yet at {}", self.file_path.display());
            return Ok(Vec::new());
        }

        let data = fs::read_to_string(&self.file_path)
            .with_context(|| format!("Failed to read {}", self.file_path.display()))?;
        let value: serde_json::Value = serde_json::from_str(&data)
            .with_context(|| format!("Failed to parse {}", self.file_path.display()))?;
        if value.is_null() {
            bail!("Total amount file content is empty: {}", self.file_path.display());
        }
        serde_json::from_value(value)
            .with_context(|| format!("Unexpected record shape in {}", self.file_path.display()))
    }

    /// Persists the full list in one write.
    pub fn save(&self, records: &[LastTotalAmount]) -> Result<()> {
        let json = serde_json::to_string_pretty(records)?;
        fs::write(&self.file_path, json)
            .with_context(|| format!("Failed to write {}", self.file_path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn record(account_id: i64, amount: i64) -> LastTotalAmount {
        LastTotalAmount {
            account_id,
            amount,
            updated_at: "2025-01-01T00:00:00+09:00".to_string(),
        }
    }

    #[test]
    fn missing_file_is_an_empty_list() {
        let dir = tempdir().unwrap();
        let repo = TotalAmountRepository::new(dir.path().join("totals.json"));
        assert!(repo.load().unwrap().is_empty());
    }

    #[test]
    fn round_trips_records() {
        let dir = tempdir().unwrap();
        let repo = TotalAmountRepository::new(dir.path().join("totals.json"));
        let records = vec![record(100, 1_000_000), record(101, 500_000)];

        repo.save(&records).unwrap();
        assert_eq!(repo.load().unwrap(), records);
    }

    #[test]
    fn persisted_fields_are_camel_case() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("totals.json");
        let repo = TotalAmountRepository::new(&path);
        repo.save(&[record(100, 42)]).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"accountId\""));
        assert!(raw.contains("\"updatedAt\""));
    }

    #[test]
    fn null_body_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("totals.json");
        std::fs::write(&path, "null").unwrap();

        let err = TotalAmountRepository::new(&path).load().unwrap_err();
        assert!(err.to_string().contains("content is empty"));
    }

    #[test]
    fn malformed_body_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("totals.json");
        std::fs::write(&path, "{ not json").unwrap();

        assert!(TotalAmountRepository::new(&path).load().is_err());
    }
}
