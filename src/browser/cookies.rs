use anyhow::{Context, Result};
use fantoccini::cookies::Cookie;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// One persisted cookie record. Only the attributes the site needs to
/// recognise the session survive the round trip.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct StoredCookie {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub http_only: bool,
}

impl StoredCookie {
    pub fn from_cookie(cookie: &Cookie<'_>) -> Self {
        StoredCookie {
            name: cookie.name().to_string(),
            value: cookie.value().to_string(),
            domain: cookie.domain().map(str::to_string),
            path: cookie.path().map(str::to_string),
            secure: cookie.secure().unwrap_or(false),
            http_only: cookie.http_only().unwrap_or(false),
        }
    }

    pub fn to_cookie(&self) -> Cookie<'static> {
        let mut cookie = Cookie::new(self.name.clone(), self.value.clone());
        if let Some(domain) = &self.domain {
            cookie.set_domain(domain.clone());
        }
        if let Some(path) = &self.path {
            cookie.set_path(path.clone());
        }
        cookie.set_secure(self.secure);
        cookie.set_http_only(self.http_only);
        cookie
    }
}

/// Per-site cookie cache living next to the browser profile. Absence or
/// corruption is a cache miss, never an error.
pub struct CookieStore {
    file_path: PathBuf,
}

impl CookieStore {
    pub fn new(user_data_dir: &Path) -> Self {
        CookieStore {
            file_path: user_data_dir.join("cookies.json"),
        }
    }

    /// Returns the saved cookies, or an empty list when the file is
    /// missing or unreadable.
    pub fn load(&self) -> Vec<StoredCookie> {
        match self.try_load() {
            Ok(cookies) => cookies,
            Err(err) => {
                debug!("No usable cookie file at {}: {err:#}", self.file_path.display());
                Vec::new()
            }
        }
    }

    fn try_load(&self) -> Result<Vec<StoredCookie>> {
        let data = fs::read_to_string(&self.file_path)
            .with_context(|| format!("Failed to read {}", self.file_path.display()))?;
        serde_json::from_str(&data)
            .with_context(|| format!("Failed to parse {}", self.file_path.display()))
    }

    /// Best-effort save; a failure here must never mask the caller's error.
    pub fn save(&self, cookies: &[StoredCookie]) {
        let result = serde_json::to_string_pretty(cookies)
            .map_err(anyhow::Error::from)
            .and_then(|json| fs::write(&self.file_path, json).map_err(anyhow::Error::from));
        match result {
            Ok(()) => debug!("Saved {} cookies to {}", cookies.len(), self.file_path.display()),
            Err(err) => warn!("Cookie backup failed: {err:#}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample() -> Vec<StoredCookie> {
        vec![StoredCookie {
            name: "session".to_string(),
            value: "abc123".to_string(),
            domain: Some(".example.co.jp".to_string()),
            path: Some("/".to_string()),
            secure: true,
            http_only: true,
        }]
    }

    #[test]
    fn round_trips_cookies() {
        let dir = tempdir().unwrap();
        let store = CookieStore::new(dir.path());

        store.save(&sample());
        assert_eq!(store.load(), sample());
    }

    #[test]
    fn missing_file_is_a_cache_miss() {
        let dir = tempdir().unwrap();
        let store = CookieStore::new(dir.path());
        assert!(store.load().is_empty());
    }

    #[test]
    fn corrupt_file_is_a_cache_miss() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("cookies.json"), "{ not json").unwrap();

        let store = CookieStore::new(dir.path());
        assert!(store.load().is_empty());
    }

    #[test]
    fn converts_to_webdriver_cookie() {
        let stored = &sample()[0];
        let cookie = stored.to_cookie();
        assert_eq!(cookie.name(), "session");
        assert_eq!(cookie.value(), "abc123");
        assert_eq!(cookie.domain(), Some(".example.co.jp"));
        assert_eq!(StoredCookie::from_cookie(&cookie), *stored);
    }
}
