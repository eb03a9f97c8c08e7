//! OAuth 2.0 authorization-code flow for the external task service.
//!
//! Token lifecycle:
//! - Tokens are cached as JSON under the user config dir with `0o600`
//!   permissions on Unix.
//! - A cached access token is used until ~60 s before expiry.
//! - An expired token is refreshed with the refresh grant; if that fails,
//!   the interactive code grant runs via a local loopback callback on the
//!   configured redirect URI.

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use base64::Engine as _;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use ha_domain::config::TasksConfig;
use ha_domain::error::{Error, Result};

/// Refresh when fewer than this many seconds remain on the access token.
const REFRESH_SKEW_SECS: i64 = 60;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Token types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Cached token set. `Debug` is manually implemented to redact secrets.
#[derive(Clone, Serialize, Deserialize)]
pub struct CachedTokens {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Unix timestamp (seconds) when the access token expires.
    pub expires_at: i64,
}

impl std::fmt::Debug for CachedTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedTokens")
            .field("access_token", &"[REDACTED]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl CachedTokens {
    /// Whether the access token is still usable (with skew margin).
    pub fn is_valid(&self, now_unix: i64) -> bool {
        now_unix + REFRESH_SKEW_SECS < self.expires_at
    }
}

/// Response from the token endpoint (initial grant and refresh).
#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Token cache file
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// File-based cache under `<config dir>/hearthagent/task_token.json`.
pub struct TokenCache {
    path: PathBuf,
}

impl TokenCache {
    pub fn default_path() -> Result<PathBuf> {
        let config = dirs::config_dir().ok_or_else(|| {
            Error::Auth("unable to determine config directory for token cache".into())
        })?;
        Ok(config.join("hearthagent").join("task_token.json"))
    }

    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Load cached tokens, with a shared lock against concurrent writers.
    pub fn load(&self) -> Result<Option<CachedTokens>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let file = std::fs::File::open(&self.path)?;
        fs2::FileExt::lock_shared(&file)
            .map_err(|e| Error::Auth(format!("token cache lock failed: {e}")))?;
        let raw = std::io::read_to_string(&file)?;
        fs2::FileExt::unlock(&file)
            .map_err(|e| Error::Auth(format!("token cache unlock failed: {e}")))?;
        let tokens = serde_json::from_str(&raw)
            .map_err(|e| Error::Auth(format!("corrupt token cache: {e}")))?;
        Ok(Some(tokens))
    }

    /// Write tokens with `0o600` from the start and an exclusive lock.
    pub fn save(&self, tokens: &CachedTokens) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(tokens)?;

        #[cfg(unix)]
        let file = {
            use std::os::unix::fs::OpenOptionsExt;
            std::fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(0o600)
                .open(&self.path)?
        };
        #[cfg(not(unix))]
        let file = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.path)?;

        fs2::FileExt::lock_exclusive(&file)
            .map_err(|e| Error::Auth(format!("token cache lock failed: {e}")))?;
        use std::io::Write;
        let mut writer = std::io::BufWriter::new(file);
        writer.write_all(json.as_bytes())?;
        // Lock released on drop.
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// OAuthSession
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Owns the token lifecycle for the task-service HTTP client.
pub struct OAuthSession {
    auth_base_url: String,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    scopes: String,
    cache: TokenCache,
    http: reqwest::Client,
    tokens: parking_lot::Mutex<Option<CachedTokens>>,
}

impl OAuthSession {
    pub fn from_config(cfg: &TasksConfig) -> Result<Self> {
        let client_id = std::env::var(&cfg.client_id_env)
            .map_err(|_| Error::Auth(format!("env var '{}' not set", cfg.client_id_env)))?;
        let client_secret = std::env::var(&cfg.client_secret_env)
            .map_err(|_| Error::Auth(format!("env var '{}' not set", cfg.client_secret_env)))?;
        let cache = TokenCache::new(TokenCache::default_path()?);
        let tokens = cache.load().unwrap_or_default();

        Ok(Self {
            auth_base_url: cfg.auth_base_url.trim_end_matches('/').to_string(),
            client_id,
            client_secret,
            redirect_uri: cfg.redirect_uri.clone(),
            scopes: cfg.scopes.clone(),
            cache,
            http: reqwest::Client::new(),
            tokens: parking_lot::Mutex::new(tokens),
        })
    }

    fn basic_auth_header(&self) -> String {
        let raw = format!("{}:{}", self.client_id, self.client_secret);
        format!(
            "Basic {}",
            base64::engine::general_purpose::STANDARD.encode(raw)
        )
    }

    /// A valid bearer token: cached, refreshed, or interactively acquired.
    pub async fn access_token(&self) -> Result<String> {
        let cached = self.tokens.lock().clone();
        if let Some(tokens) = &cached {
            if tokens.is_valid(now_unix()) {
                return Ok(tokens.access_token.clone());
            }
            if let Some(refresh) = tokens.refresh_token.clone() {
                match self.refresh(&refresh).await {
                    Ok(tokens) => return Ok(tokens.access_token),
                    Err(e) => {
                        tracing::warn!(error = %e, "token refresh failed, falling back to interactive auth");
                    }
                }
            }
        }
        let tokens = self.interactive_grant().await?;
        Ok(tokens.access_token)
    }

    /// Force a refresh (used once after an HTTP 401).
    pub async fn refresh_access_token(&self) -> Result<String> {
        let refresh = self
            .tokens
            .lock()
            .as_ref()
            .and_then(|t| t.refresh_token.clone());
        match refresh {
            Some(refresh) => self.refresh(&refresh).await.map(|t| t.access_token),
            None => self.interactive_grant().await.map(|t| t.access_token),
        }
    }

    async fn refresh(&self, refresh_token: &str) -> Result<CachedTokens> {
        let url = format!("{}/oauth/token", self.auth_base_url);
        let resp = self
            .http
            .post(&url)
            .header("Authorization", self.basic_auth_header())
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("redirect_uri", self.redirect_uri.as_str()),
                ("scope", self.scopes.as_str()),
            ])
            .send()
            .await
            .map_err(|e| Error::Auth(format!("refresh request failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            return Err(Error::Auth(format!("refresh returned HTTP {status}")));
        }
        let token: TokenResponse = resp
            .json()
            .await
            .map_err(|e| Error::Auth(format!("parsing refresh response: {e}")))?;
        // The server may omit the refresh token on rotation; keep the old one.
        Ok(self.store(token, Some(refresh_token.to_string())))
    }

    /// Interactive code grant: open the authorize URL, catch the redirect on
    /// a local loopback listener, exchange the code.
    async fn interactive_grant(&self) -> Result<CachedTokens> {
        let auth_url = format!(
            "{}/oauth/authorize?scope={}&client_id={}&state=state&redirect_uri={}&response_type=code",
            self.auth_base_url,
            urlencode(&self.scopes),
            urlencode(&self.client_id),
            urlencode(&self.redirect_uri),
        );
        tracing::info!(url = %auth_url, "interactive auth required — open this URL in a browser");
        println!("Authorize HearthAgent by visiting:\n  {auth_url}");

        let code = self.wait_for_callback().await?;

        let url = format!("{}/oauth/token", self.auth_base_url);
        let resp = self
            .http
            .post(&url)
            .header("Authorization", self.basic_auth_header())
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code.as_str()),
                ("redirect_uri", self.redirect_uri.as_str()),
                ("scope", self.scopes.as_str()),
            ])
            .send()
            .await
            .map_err(|e| Error::Auth(format!("code exchange failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            return Err(Error::Auth(format!("code exchange returned HTTP {status}")));
        }
        let token: TokenResponse = resp
            .json()
            .await
            .map_err(|e| Error::Auth(format!("parsing token response: {e}")))?;
        Ok(self.store(token, None))
    }

    /// Serve exactly one request on the redirect URI's host:port and pull the
    /// `code` query parameter out of it.
    async fn wait_for_callback(&self) -> Result<String> {
        let (host, port, path) = parse_redirect_uri(&self.redirect_uri)?;
        let listener = TcpListener::bind((host.as_str(), port))
            .await
            .map_err(|e| Error::Auth(format!("binding loopback {host}:{port}: {e}")))?;

        loop {
            let (mut stream, _) = listener
                .accept()
                .await
                .map_err(|e| Error::Auth(format!("loopback accept: {e}")))?;
            let mut buf = vec![0u8; 4096];
            let n = stream.read(&mut buf).await.unwrap_or(0);
            let request = String::from_utf8_lossy(&buf[..n]);

            let Some(code) = extract_code(&request, &path) else {
                let _ = stream
                    .write_all(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n")
                    .await;
                continue;
            };
            let body = "Auth received. You can close this tab.";
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\n\r\n{}",
                body.len(),
                body
            );
            let _ = stream.write_all(response.as_bytes()).await;
            return Ok(code);
        }
    }

    fn store(&self, token: TokenResponse, fallback_refresh: Option<String>) -> CachedTokens {
        let expires_in = token.expires_in.unwrap_or(3600) as i64;
        let tokens = CachedTokens {
            access_token: token.access_token,
            refresh_token: token.refresh_token.or(fallback_refresh),
            expires_at: now_unix() + (expires_in - REFRESH_SKEW_SECS).max(0),
        };
        if let Err(e) = self.cache.save(&tokens) {
            tracing::warn!(error = %e, "failed to persist token cache");
        }
        *self.tokens.lock() = Some(tokens.clone());
        tokens
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Minimal percent-encoding for query components.
fn urlencode(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            other => out.push_str(&format!("%{other:02X}")),
        }
    }
    out
}

/// Split a redirect URI into (host, port, path).
fn parse_redirect_uri(uri: &str) -> Result<(String, u16, String)> {
    let rest = uri
        .strip_prefix("http://")
        .ok_or_else(|| Error::Config(format!("redirect URI must be http://: {uri}")))?;
    let (authority, path) = match rest.split_once('/') {
        Some((a, p)) => (a, format!("/{p}")),
        None => (rest, "/".to_string()),
    };
    let (host, port) = match authority.split_once(':') {
        Some((h, p)) => (
            h.to_string(),
            p.parse::<u16>()
                .map_err(|_| Error::Config(format!("bad redirect port in {uri}")))?,
        ),
        None => (authority.to_string(), 80),
    };
    Ok((host, port, path))
}

/// Pull the `code` query parameter out of an HTTP request line hitting `path`.
fn extract_code(request: &str, path: &str) -> Option<String> {
    let request_line = request.lines().next()?;
    let target = request_line.split_whitespace().nth(1)?;
    let (req_path, query) = target.split_once('?')?;
    if req_path != path {
        return None;
    }
    for pair in query.split('&') {
        if let Some((key, value)) = pair.split_once('=') {
            if key == "code" && !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    None
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cached_tokens_validity_window() {
        let tokens = CachedTokens {
            access_token: "a".into(),
            refresh_token: None,
            expires_at: 1_000,
        };
        assert!(tokens.is_valid(0));
        assert!(!tokens.is_valid(1_000 - REFRESH_SKEW_SECS));
        assert!(!tokens.is_valid(2_000));
    }

    #[test]
    fn debug_redacts_secrets() {
        let tokens = CachedTokens {
            access_token: "super-secret".into(),
            refresh_token: Some("also-secret".into()),
            expires_at: 42,
        };
        let rendered = format!("{tokens:?}");
        assert!(!rendered.contains("super-secret"));
        assert!(!rendered.contains("also-secret"));
        assert!(rendered.contains("REDACTED"));
    }

    #[test]
    fn token_cache_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TokenCache::new(dir.path().join("token.json"));
        assert!(cache.load().unwrap().is_none());

        let tokens = CachedTokens {
            access_token: "abc".into(),
            refresh_token: Some("def".into()),
            expires_at: 99,
        };
        cache.save(&tokens).unwrap();
        let loaded = cache.load().unwrap().unwrap();
        assert_eq!(loaded.access_token, "abc");
        assert_eq!(loaded.refresh_token.as_deref(), Some("def"));
        assert_eq!(loaded.expires_at, 99);
    }

    #[cfg(unix)]
    #[test]
    fn token_cache_file_mode_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.json");
        let cache = TokenCache::new(path.clone());
        cache
            .save(&CachedTokens {
                access_token: "x".into(),
                refresh_token: None,
                expires_at: 0,
            })
            .unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn parse_redirect_uri_variants() {
        let (host, port, path) = parse_redirect_uri("http://localhost:8080/callback").unwrap();
        assert_eq!((host.as_str(), port, path.as_str()), ("localhost", 8080, "/callback"));

        let (host, port, path) = parse_redirect_uri("http://127.0.0.1/cb").unwrap();
        assert_eq!((host.as_str(), port, path.as_str()), ("127.0.0.1", 80, "/cb"));

        assert!(parse_redirect_uri("https://example.com/cb").is_err());
    }

    #[test]
    fn extract_code_from_callback_request() {
        let request = "GET /callback?state=state&code=abc123 HTTP/1.1\r\nHost: localhost\r\n\r\n";
        assert_eq!(extract_code(request, "/callback").as_deref(), Some("abc123"));
    }

    #[test]
    fn extract_code_rejects_other_paths() {
        let request = "GET /favicon.ico?code=nope HTTP/1.1\r\n\r\n";
        assert!(extract_code(request, "/callback").is_none());
    }

    #[test]
    fn urlencode_escapes_reserved() {
        assert_eq!(urlencode("tasks:read tasks:write"), "tasks%3Aread%20tasks%3Awrite");
        assert_eq!(urlencode("plain-safe_1.2~"), "plain-safe_1.2~");
    }
}
