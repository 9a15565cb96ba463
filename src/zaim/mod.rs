pub mod client;
pub mod oauth;

pub use client::{IncomeEntry, LedgerPoster, MoneyQuery, ZaimClient};
pub use oauth::{AccessToken, OAuthCredentials, OAuthSigner};
