use thiserror::Error;

/// Failures raised while driving the brokerage site. The synchronizer
/// needs these distinguishable: a maintenance window must not look like
/// an invalid session, and a missing page structure must fail loudly
/// instead of reading as a zero valuation.
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("the site is under maintenance")]
    Maintenance,

    #[error("brokerage credentials are not configured")]
    MissingCredentials,

    #[error("expected page structure is missing: {0}")]
    MissingStructure(String),

    #[error("timed out waiting for an authentication code")]
    AuthCodeTimeout,

    #[error("authentication code retrieval failed: {0}")]
    AuthCode(String),

    #[error("browser session error: {0}")]
    Session(String),
}

impl From<fantoccini::error::CmdError> for ScrapeError {
    fn from(err: fantoccini::error::CmdError) -> Self {
        ScrapeError::Session(err.to_string())
    }
}

impl From<fantoccini::error::NewSessionError> for ScrapeError {
    fn from(err: fantoccini::error::NewSessionError) -> Self {
        ScrapeError::Session(err.to_string())
    }
}

/// Failures raised by the ledger API client.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger API returned HTTP {status}: {body}")]
    Api { status: u16, body: String },

    #[error("access token unavailable: {0}")]
    Token(String),

    #[error("invalid entry date: {0}")]
    InvalidDate(String),

    #[error("ledger request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scrape_errors_render_their_context() {
        let err = ScrapeError::MissingStructure("holdings total row".to_string());
        assert_eq!(
            err.to_string(),
            "expected page structure is missing: holdings total row"
        );
        assert_eq!(
            ScrapeError::Maintenance.to_string(),
            "the site is under maintenance"
        );
    }

    #[test]
    fn ledger_api_error_carries_status_and_body() {
        let err = LedgerError::Api {
            status: 401,
            body: "invalid signature".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "ledger API returned HTTP 401: invalid signature"
        );
    }
}
