use crate::config::ZaimConfig;
use crate::error::LedgerError;
use async_trait::async_trait;
use chrono::{Local, Months, NaiveDate};
use serde::Deserialize;
use tracing::{debug, warn};

use super::oauth::{OAuthCredentials, OAuthSigner};

/// The API rejects larger pages; anything above is clamped.
const MAX_PAGE_SIZE: u32 = 100;
/// Entries older than this cannot be registered.
const ENTRY_DATE_WINDOW_MONTHS: u32 = 3;

#[derive(Debug, Clone, Deserialize)]
pub struct ZaimAccount {
    pub id: i64,
    pub name: String,
    pub sort: i64,
    pub active: i64,
    #[serde(default)]
    pub website_id: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ZaimCategory {
    pub id: i64,
    pub name: String,
    pub mode: String,
    pub sort: i64,
    pub active: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MoneyRecord {
    pub id: i64,
    pub date: String,
    pub mode: String,
    pub amount: i64,
    #[serde(default)]
    pub category_id: Option<i64>,
    #[serde(default)]
    pub genre_id: Option<i64>,
    #[serde(default)]
    pub from_account_id: Option<i64>,
    #[serde(default)]
    pub to_account_id: Option<i64>,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Deserialize)]
struct AccountListResponse {
    accounts: Vec<ZaimAccount>,
}

#[derive(Deserialize)]
struct CategoryListResponse {
    categories: Vec<ZaimCategory>,
}

#[derive(Deserialize)]
struct MoneyListResponse {
    money: Vec<MoneyRecord>,
}

/// Filters for the money history listing.
#[derive(Debug, Default, Clone)]
pub struct MoneyQuery {
    pub mode: Option<String>,
    pub category_id: Option<i64>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub limit: Option<u32>,
    pub page: Option<u32>,
    /// Exact-match filter on the destination account, applied client-side.
    pub to_account_id: Option<i64>,
}

/// One income posting.
#[derive(Debug, Clone, PartialEq)]
pub struct IncomeEntry {
    pub category_id: i64,
    pub amount: i64,
    pub date: NaiveDate,
    pub to_account_id: i64,
    pub comment: String,
}

/// Posting seam used by the synchronizer, mockable in tests.
#[async_trait]
pub trait LedgerPoster: Send + Sync {
    async fn register_income(&self, entry: &IncomeEntry) -> Result<(), LedgerError>;
}

pub struct ZaimClient {
    base_url: String,
    signer: OAuthSigner,
    http: reqwest::Client,
}

impl ZaimClient {
    pub fn new(config: &ZaimConfig) -> Result<Self, LedgerError> {
        let credentials = OAuthCredentials::load(config)?;
        Ok(Self::with_credentials(&config.api_base_url, credentials))
    }

    pub fn with_credentials(base_url: &str, credentials: OAuthCredentials) -> Self {
        ZaimClient {
            base_url: base_url.trim_end_matches('/').to_string(),
            signer: OAuthSigner::new(credentials),
            http: reqwest::Client::new(),
        }
    }

    /// Sends one signed request. Query parameters are both rendered into
    /// the URL and folded into the OAuth signature.
    async fn send(
        &self,
        method: &str,
        path: &str,
        params: &[(String, String)],
    ) -> Result<String, LedgerError> {
        let url = format!("{}{}", self.base_url, path);
        let full_url = if params.is_empty() {
            url.clone()
        } else {
            let query = params
                .iter()
                .map(|(k, v)| {
                    format!("{}={}", urlencoding::encode(k), urlencoding::encode(v))
                })
                .collect::<Vec<_>>()
                .join("&");
            format!("{url}?{query}")
        };
        let auth_header = self.signer.authorization_header(method, &url, params);
        debug!("{method} {full_url}");

        let request = match method {
            "POST" => self.http.post(&full_url),
            _ => self.http.get(&full_url),
        };
        let response = request
            .header("Authorization", auth_header)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(LedgerError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }

    /// Lists ledger accounts, optionally filtered to active ones and by
    /// a name substring, sorted by the user's ordering.
    pub async fn get_accounts(
        &self,
        name: Option<&str>,
        active_only: bool,
    ) -> Result<Vec<ZaimAccount>, LedgerError> {
        let params = vec![("mapping".to_string(), "1".to_string())];
        let body = self.send("GET", "/v2/home/account", &params).await?;
        let parsed: AccountListResponse = serde_json::from_str(&body)
            .map_err(|err| LedgerError::Api {
                status: 200,
                body: format!("unexpected account response: {err}"),
            })?;

        let mut accounts: Vec<ZaimAccount> = parsed
            .accounts
            .into_iter()
            .filter(|account| !active_only || account.active == 1)
            .filter(|account| name.is_none_or(|n| account.name.contains(n)))
            .collect();
        accounts.sort_by_key(|account| account.sort);
        Ok(accounts)
    }

    pub async fn get_categories(
        &self,
        mode: Option<&str>,
    ) -> Result<Vec<ZaimCategory>, LedgerError> {
        let params = vec![("mapping".to_string(), "1".to_string())];
        let body = self.send("GET", "/v2/home/category", &params).await?;
        let parsed: CategoryListResponse = serde_json::from_str(&body)
            .map_err(|err| LedgerError::Api {
                status: 200,
                body: format!("unexpected category response: {err}"),
            })?;

        let mut categories: Vec<ZaimCategory> = parsed
            .categories
            .into_iter()
            .filter(|category| mode.is_none_or(|m| category.mode == m))
            .collect();
        categories.sort_by_key(|category| category.sort);
        Ok(categories)
    }

    /// Lists money history, one page at a time.
    pub async fn get_money(&self, query: &MoneyQuery) -> Result<Vec<MoneyRecord>, LedgerError> {
        let mut params = vec![("mapping".to_string(), "1".to_string())];
        if let Some(mode) = &query.mode {
            params.push(("mode".to_string(), mode.clone()));
        }
        if let Some(category_id) = query.category_id {
            params.push(("category_id".to_string(), category_id.to_string()));
        }
        if let Some(start_date) = query.start_date {
            params.push(("start_date".to_string(), start_date.format("%Y-%m-%d").to_string()));
        }
        if let Some(end_date) = query.end_date {
            params.push(("end_date".to_string(), end_date.format("%Y-%m-%d").to_string()));
        }
        if let Some(limit) = query.limit {
            let limit = if limit > MAX_PAGE_SIZE {
                warn!("Page size {limit} exceeds the API maximum, clamping to {MAX_PAGE_SIZE}");
                MAX_PAGE_SIZE
            } else {
                limit
            };
            params.push(("limit".to_string(), limit.to_string()));
        }
        if let Some(page) = query.page {
            params.push(("page".to_string(), page.to_string()));
        }

        let body = self.send("GET", "/v2/home/money", &params).await?;
        let parsed: MoneyListResponse = serde_json::from_str(&body)
            .map_err(|err| LedgerError::Api {
                status: 200,
                body: format!("unexpected money response: {err}"),
            })?;

        Ok(parsed
            .money
            .into_iter()
            .filter(|record| {
                query
                    .to_account_id
                    .is_none_or(|id| record.to_account_id == Some(id))
            })
            .collect())
    }

    fn validate_entry_date(date: NaiveDate) -> Result<(), LedgerError> {
        let today = Local::now().date_naive();
        let earliest = today
            .checked_sub_months(Months::new(ENTRY_DATE_WINDOW_MONTHS))
            .unwrap_or(today);
        if date > today || date < earliest {
            return Err(LedgerError::InvalidDate(format!(
                "{date} is outside the accepted window {earliest}..={today}"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerPoster for ZaimClient {
    /// Posts one income entry. No automatic retry: posting is not
    /// idempotent, and a blind retry could double-book the delta.
    async fn register_income(&self, entry: &IncomeEntry) -> Result<(), LedgerError> {
        Self::validate_entry_date(entry.date)?;

        let params = vec![
            ("mapping".to_string(), "1".to_string()),
            ("category_id".to_string(), entry.category_id.to_string()),
            ("amount".to_string(), entry.amount.to_string()),
            ("date".to_string(), entry.date.format("%Y-%m-%d").to_string()),
            ("to_account_id".to_string(), entry.to_account_id.to_string()),
            ("comment".to_string(), entry.comment.clone()),
        ];
        self.send("POST", "/v2/home/money/income", &params).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> ZaimClient {
        ZaimClient::with_credentials(&server.uri(), OAuthCredentials::new("ck", "cs"))
    }

    #[tokio::test]
    async fn accounts_are_filtered_and_sorted() {
        let mock_server = MockServer::start().await;
        let response = r#"{
            "accounts": [
                {"id": 3, "name": "証券口座", "sort": 2, "active": 1},
                {"id": 1, "name": "銀行", "sort": 1, "active": 1},
                {"id": 2, "name": "古い口座", "sort": 3, "active": -1}
            ],
            "requested": 1
        }"#;
        Mock::given(method("GET"))
            .and(path("/v2/home/account"))
            .and(query_param("mapping", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_string(response))
            .mount(&mock_server)
            .await;

        let accounts = client_for(&mock_server).get_accounts(None, true).await.unwrap();
        assert_eq!(accounts.len(), 2);
        assert_eq!(accounts[0].id, 1);
        assert_eq!(accounts[1].id, 3);

        let named = client_for(&mock_server)
            .get_accounts(Some("証券"), true)
            .await
            .unwrap();
        assert_eq!(named.len(), 1);
        assert_eq!(named[0].id, 3);
    }

    #[tokio::test]
    async fn categories_are_filtered_by_mode() {
        let mock_server = MockServer::start().await;
        let response = r#"{
            "categories": [
                {"id": 1, "name": "給与", "mode": "income", "sort": 2, "active": 1},
                {"id": 2, "name": "食費", "mode": "payment", "sort": 1, "active": 1}
            ]
        }"#;
        Mock::given(method("GET"))
            .and(path("/v2/home/category"))
            .respond_with(ResponseTemplate::new(200).set_body_string(response))
            .mount(&mock_server)
            .await;

        let categories = client_for(&mock_server)
            .get_categories(Some("income"))
            .await
            .unwrap();
        assert_eq!(categories.len(), 1);
        assert_eq!(categories[0].name, "給与");
    }

    #[tokio::test]
    async fn over_limit_page_size_is_clamped_to_100() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/home/money"))
            .and(query_param("limit", "100"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(r#"{"money": []}"#),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let query = MoneyQuery {
            limit: Some(500),
            ..Default::default()
        };
        let records = client_for(&mock_server).get_money(&query).await.unwrap();
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn money_filters_destination_account_exactly() {
        let mock_server = MockServer::start().await;
        let response = r#"{
            "money": [
                {"id": 1, "date": "2025-08-01", "mode": "income", "amount": 100, "to_account_id": 10},
                {"id": 2, "date": "2025-08-02", "mode": "income", "amount": 200, "to_account_id": 11}
            ]
        }"#;
        Mock::given(method("GET"))
            .and(path("/v2/home/money"))
            .respond_with(ResponseTemplate::new(200).set_body_string(response))
            .mount(&mock_server)
            .await;

        let query = MoneyQuery {
            to_account_id: Some(11),
            ..Default::default()
        };
        let records = client_for(&mock_server).get_money(&query).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, 2);
    }

    #[tokio::test]
    async fn register_income_posts_signed_request() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/home/money/income"))
            .and(query_param("amount", "250000"))
            .and(query_param("category_id", "200"))
            .and(query_param("to_account_id", "100"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(r#"{"money": {"id": 1}}"#),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let entry = IncomeEntry {
            category_id: 200,
            amount: 250_000,
            date: Local::now().date_naive(),
            to_account_id: 100,
            comment: "自動同期".to_string(),
        };
        client_for(&mock_server).register_income(&entry).await.unwrap();
    }

    #[tokio::test]
    async fn register_income_rejects_dates_outside_the_window() {
        let mock_server = MockServer::start().await;
        let entry = IncomeEntry {
            category_id: 200,
            amount: 1,
            date: Local::now()
                .date_naive()
                .checked_sub_months(Months::new(6))
                .unwrap(),
            to_account_id: 100,
            comment: String::new(),
        };
        let err = client_for(&mock_server)
            .register_income(&entry)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidDate(_)));
    }

    #[tokio::test]
    async fn api_errors_surface_status_and_body() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/home/account"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid signature"))
            .mount(&mock_server)
            .await;

        let err = client_for(&mock_server)
            .get_accounts(None, true)
            .await
            .unwrap_err();
        match err {
            LedgerError::Api { status, body } => {
                assert_eq!(status, 401);
                assert_eq!(body, "invalid signature");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
