//! OAuth 1.0a request signing (HMAC-SHA1) for the Zaim API, plus the
//! one-time interactive authorization flow that mints the access token.

use crate::config::ZaimConfig;
use crate::error::LedgerError;
use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use hmac::{Hmac, Mac};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use std::cmp::Ordering;
use std::fs;

type HmacSha1 = Hmac<Sha1>;

const SIGNATURE_METHOD: &str = "HMAC-SHA1";
const OAUTH_VERSION: &str = "1.0";

/// Persisted access token, stored as JSON next to the config.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct AccessToken {
    pub oauth_token: String,
    pub oauth_token_secret: String,
}

#[derive(Debug, Clone)]
pub struct OAuthCredentials {
    pub consumer_key: String,
    pub consumer_secret: String,
    pub token: Option<AccessToken>,
}

impl OAuthCredentials {
    pub fn new(consumer_key: &str, consumer_secret: &str) -> Self {
        OAuthCredentials {
            consumer_key: consumer_key.to_string(),
            consumer_secret: consumer_secret.to_string(),
            token: None,
        }
    }

    pub fn with_token(mut self, token: AccessToken) -> Self {
        self.token = Some(token);
        self
    }

    /// Loads consumer and token credentials from the configuration and
    /// the persisted access-token file.
    pub fn load(config: &ZaimConfig) -> Result<Self, LedgerError> {
        let data = fs::read_to_string(&config.access_token_file).map_err(|err| {
            LedgerError::Token(format!(
                "could not read {} ({err}); run `assetsync zaim authorize` first",
                config.access_token_file.display()
            ))
        })?;
        let token: AccessToken = serde_json::from_str(&data)
            .map_err(|err| LedgerError::Token(format!("invalid access token file: {err}")))?;
        if token.oauth_token.is_empty() || token.oauth_token_secret.is_empty() {
            return Err(LedgerError::Token(
                "access token file is incomplete; run `assetsync zaim authorize`".to_string(),
            ));
        }
        Ok(OAuthCredentials::new(&config.consumer_key, &config.consumer_secret).with_token(token))
    }
}

/// Compares keys with natural ordering: runs of digits compare by
/// numeric value instead of lexically.
pub(crate) fn natural_cmp(a: &str, b: &str) -> Ordering {
    let (abytes, bbytes) = (a.as_bytes(), b.as_bytes());
    let (mut i, mut j) = (0, 0);
    while i < abytes.len() && j < bbytes.len() {
        if abytes[i].is_ascii_digit() && bbytes[j].is_ascii_digit() {
            let start_a = i;
            while i < abytes.len() && abytes[i].is_ascii_digit() {
                i += 1;
            }
            let start_b = j;
            while j < bbytes.len() && bbytes[j].is_ascii_digit() {
                j += 1;
            }
            let digits_a = a[start_a..i].trim_start_matches('0');
            let digits_b = b[start_b..j].trim_start_matches('0');
            let ord = digits_a
                .len()
                .cmp(&digits_b.len())
                .then_with(|| digits_a.cmp(digits_b));
            if ord != Ordering::Equal {
                return ord;
            }
        } else {
            let ord = abytes[i].cmp(&bbytes[j]);
            if ord != Ordering::Equal {
                return ord;
            }
            i += 1;
            j += 1;
        }
    }
    (abytes.len() - i).cmp(&(bbytes.len() - j))
}

/// RFC 3986 percent-encoding, the only encoding OAuth 1.0a accepts.
fn encode(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}

fn nonce() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}

/// Stateless signer over a set of held credentials. Signature output is
/// bit-for-bit reproducible given identical nonce and timestamp.
pub struct OAuthSigner {
    credentials: OAuthCredentials,
}

impl OAuthSigner {
    pub fn new(credentials: OAuthCredentials) -> Self {
        OAuthSigner { credentials }
    }

    /// Builds the `Authorization` header for one request.
    pub fn authorization_header(
        &self,
        method: &str,
        url: &str,
        params: &[(String, String)],
    ) -> String {
        self.header_with(method, url, params, &nonce(), Utc::now().timestamp())
    }

    /// Deterministic variant used by [`Self::authorization_header`] and
    /// pinned down in tests with fixed nonce/timestamp inputs.
    pub(crate) fn header_with(
        &self,
        method: &str,
        url: &str,
        params: &[(String, String)],
        nonce: &str,
        timestamp: i64,
    ) -> String {
        let timestamp = timestamp.to_string();
        let mut oauth_params: Vec<(String, String)> = vec![
            (
                "oauth_consumer_key".to_string(),
                self.credentials.consumer_key.clone(),
            ),
            ("oauth_nonce".to_string(), nonce.to_string()),
            (
                "oauth_signature_method".to_string(),
                SIGNATURE_METHOD.to_string(),
            ),
            ("oauth_timestamp".to_string(), timestamp),
            ("oauth_version".to_string(), OAUTH_VERSION.to_string()),
        ];
        if let Some(token) = &self.credentials.token {
            oauth_params.push(("oauth_token".to_string(), token.oauth_token.clone()));
        }

        let mut all_params: Vec<(String, String)> = oauth_params.clone();
        all_params.extend(params.iter().cloned());
        all_params.sort_by(|a, b| natural_cmp(&a.0, &b.0));

        let canonical = all_params
            .iter()
            .map(|(k, v)| format!("{}={}", encode(k), encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        let base_url = url.split('?').next().unwrap_or(url);
        let base_string = format!(
            "{}&{}&{}",
            method.to_uppercase(),
            encode(base_url),
            encode(&canonical)
        );

        let token_secret = self
            .credentials
            .token
            .as_ref()
            .map(|t| t.oauth_token_secret.as_str())
            .unwrap_or("");
        let signing_key = format!(
            "{}&{}",
            encode(&self.credentials.consumer_secret),
            encode(token_secret)
        );

        let mut mac =
            HmacSha1::new_from_slice(signing_key.as_bytes()).expect("HMAC accepts any key length");
        mac.update(base_string.as_bytes());
        let signature = BASE64.encode(mac.finalize().into_bytes());

        // Only oauth_* parameters belong in the header.
        oauth_params.push(("oauth_signature".to_string(), signature));
        oauth_params.sort_by(|a, b| natural_cmp(&a.0, &b.0));
        let rendered = oauth_params
            .iter()
            .map(|(k, v)| format!("{}=\"{}\"", encode(k), encode(v)))
            .collect::<Vec<_>>()
            .join(", ");
        format!("OAuth {rendered}")
    }
}

/// Parses a `key=value&key=value` token response body.
fn parse_form_body(body: &str) -> std::collections::HashMap<String, String> {
    body.split('&')
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            Some((
                urlencoding::decode(key).ok()?.into_owned(),
                urlencoding::decode(value).ok()?.into_owned(),
            ))
        })
        .collect()
}

async fn token_request(
    http: &reqwest::Client,
    signer: &OAuthSigner,
    url: &str,
    extra: (&str, &str),
) -> Result<AccessToken> {
    let params = vec![(extra.0.to_string(), extra.1.to_string())];
    let header = signer.authorization_header("POST", url, &params);
    let body = format!("{}={}", encode(extra.0), encode(extra.1));

    let response = http
        .post(url)
        .header("Authorization", header)
        .header("Content-Type", "application/x-www-form-urlencoded")
        .body(body)
        .send()
        .await?;
    let status = response.status();
    let text = response.text().await?;
    if !status.is_success() {
        anyhow::bail!("token request failed: HTTP {status}: {text}");
    }

    let fields = parse_form_body(&text);
    let token = AccessToken {
        oauth_token: fields.get("oauth_token").cloned().unwrap_or_default(),
        oauth_token_secret: fields
            .get("oauth_token_secret")
            .cloned()
            .unwrap_or_default(),
    };
    if token.oauth_token.is_empty() || token.oauth_token_secret.is_empty() {
        anyhow::bail!("token response is missing oauth_token fields");
    }
    Ok(token)
}

/// Interactive one-time flow: request token, user authorization in the
/// browser, verifier exchange, and access-token persistence.
pub async fn authorize(config: &ZaimConfig) -> Result<()> {
    let http = reqwest::Client::new();
    let consumer = OAuthCredentials::new(&config.consumer_key, &config.consumer_secret);

    let request_url = format!("{}/v2/auth/request", config.api_base_url);
    let request_token = token_request(
        &http,
        &OAuthSigner::new(consumer.clone()),
        &request_url,
        ("oauth_callback", "oob"),
    )
    .await
    .context("Failed to obtain a request token")?;

    println!(
        "Open the following URL and authorize the application:\n{}/users/auth?oauth_token={}",
        config.auth_base_url, request_token.oauth_token
    );
    print!("Enter the verifier code shown after authorization: ");
    use std::io::Write;
    std::io::stdout().flush()?;
    let mut verifier = String::new();
    std::io::stdin().read_line(&mut verifier)?;
    let verifier = verifier.trim();
    if verifier.is_empty() {
        anyhow::bail!("No verifier code entered");
    }

    let access_url = format!("{}/v2/auth/access", config.api_base_url);
    let access_token = token_request(
        &http,
        &OAuthSigner::new(consumer.with_token(request_token)),
        &access_url,
        ("oauth_verifier", verifier),
    )
    .await
    .context("Failed to exchange the verifier for an access token")?;

    fs::write(
        &config.access_token_file,
        serde_json::to_string_pretty(&access_token)?,
    )
    .with_context(|| {
        format!(
            "Failed to write access token to {}",
            config.access_token_file.display()
        )
    })?;
    println!(
        "Access token saved to {}",
        config.access_token_file.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer_with_token() -> OAuthSigner {
        OAuthSigner::new(OAuthCredentials::new("ck", "cs").with_token(AccessToken {
            oauth_token: "tk".to_string(),
            oauth_token_secret: "ts".to_string(),
        }))
    }

    fn money_params() -> Vec<(String, String)> {
        vec![
            ("mapping".to_string(), "1".to_string()),
            ("mode".to_string(), "income".to_string()),
            ("limit".to_string(), "10".to_string()),
        ]
    }

    #[test]
    fn signature_matches_reference_value() {
        let header = signer_with_token().header_with(
            "GET",
            "https://api.zaim.net/v2/home/money",
            &money_params(),
            "abcdef0123456789",
            1_700_000_000,
        );
        // Reference value computed independently for this fixed tuple.
        assert!(header.contains("oauth_signature=\"MK87DLD%2FBS1Z9JyxXjRCat68SBs%3D\""));
    }

    #[test]
    fn signature_without_token_matches_reference_value() {
        let signer = OAuthSigner::new(OAuthCredentials::new("ck", "cs"));
        let header = signer.header_with(
            "GET",
            "https://api.zaim.net/v2/home/money",
            &money_params(),
            "abcdef0123456789",
            1_700_000_000,
        );
        assert!(header.contains("oauth_signature=\"MWVFRi2zz5H6lnhMakf0%2BG56PJs%3D\""));
        assert!(!header.contains("oauth_token="));
    }

    #[test]
    fn signing_is_deterministic() {
        let signer = signer_with_token();
        let first = signer.header_with(
            "POST",
            "https://api.zaim.net/v2/home/money/income",
            &money_params(),
            "nonce",
            1_700_000_000,
        );
        let second = signer.header_with(
            "POST",
            "https://api.zaim.net/v2/home/money/income",
            &money_params(),
            "nonce",
            1_700_000_000,
        );
        assert_eq!(first, second);
    }

    #[test]
    fn header_contains_only_oauth_parameters() {
        let header = signer_with_token().header_with(
            "GET",
            "https://api.zaim.net/v2/home/money",
            &money_params(),
            "n",
            1,
        );
        assert!(header.starts_with("OAuth "));
        assert!(header.contains("oauth_consumer_key=\"ck\""));
        assert!(header.contains("oauth_token=\"tk\""));
        assert!(header.contains("oauth_version=\"1.0\""));
        assert!(!header.contains("mapping="));
        assert!(!header.contains("limit="));
    }

    #[test]
    fn query_string_in_url_does_not_change_the_base() {
        let signer = signer_with_token();
        let bare = signer.header_with(
            "GET",
            "https://api.zaim.net/v2/home/money",
            &money_params(),
            "n",
            1,
        );
        let with_query = signer.header_with(
            "GET",
            "https://api.zaim.net/v2/home/money?mapping=1&mode=income&limit=10",
            &money_params(),
            "n",
            1,
        );
        assert_eq!(bare, with_query);
    }

    #[test]
    fn natural_ordering_compares_digit_runs_by_value() {
        assert_eq!(natural_cmp("a2", "a10"), Ordering::Less);
        assert_eq!(natural_cmp("a10", "a2"), Ordering::Greater);
        assert_eq!(natural_cmp("a10", "a10"), Ordering::Equal);
        assert_eq!(natural_cmp("a02", "a2"), Ordering::Equal);
        assert_eq!(natural_cmp("a", "b"), Ordering::Less);
        assert_eq!(natural_cmp("a", "ab"), Ordering::Less);
        assert_eq!(natural_cmp("item9", "item10"), Ordering::Less);
    }

    #[test]
    fn parses_token_response_bodies() {
        let fields = parse_form_body("oauth_token=abc&oauth_token_secret=def&extra=1");
        assert_eq!(fields.get("oauth_token").map(String::as_str), Some("abc"));
        assert_eq!(
            fields.get("oauth_token_secret").map(String::as_str),
            Some("def")
        );
    }
}
