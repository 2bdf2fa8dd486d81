//! Bearer token management for cloud backends
//!
//! [`AuthSession`] hands out access tokens, refreshing them shortly before they
//! expire. A refresh is always tried first; a full login with the configured
//! credentials is the fallback. Tokens can be persisted to disk so restarts do
//! not need a new login.

use crate::clock::Clock;
use crate::error::Result;
use crate::logging::{StructuredLogger, get_logger};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

/// OAuth token pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
}

impl Token {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Whether the token lapses within `margin`
    pub fn expires_within(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        now + margin >= self.expires_at
    }
}

/// Account login
#[derive(Clone)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"***")
            .finish()
    }
}

/// Login and refresh endpoints of an identity provider
#[async_trait::async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn authenticate(&self, credentials: &Credentials) -> Result<Token>;

    async fn refresh(&self, token: &Token) -> Result<Token>;
}

/// Token file on disk
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Load the stored token, `None` when no file exists yet
    pub fn load(&self) -> Result<Option<Token>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&self.path)?;
        Ok(Some(serde_json::from_str(&contents)?))
    }

    pub fn save(&self, token: &Token) -> Result<()> {
        let contents = serde_json::to_string_pretty(token)?;
        std::fs::write(&self.path, contents)?;
        Ok(())
    }
}

/// Shared login state for one account
pub struct AuthSession {
    provider: Arc<dyn IdentityProvider>,
    credentials: Credentials,
    clock: Arc<dyn Clock>,
    refresh_margin: Duration,
    token: Mutex<Option<Token>>,
    store: Option<TokenStore>,
    logger: StructuredLogger,
}

impl AuthSession {
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        credentials: Credentials,
        clock: Arc<dyn Clock>,
        refresh_margin: Duration,
    ) -> Self {
        Self {
            provider,
            credentials,
            clock,
            refresh_margin,
            token: Mutex::new(None),
            store: None,
            logger: get_logger("auth"),
        }
    }

    /// Persist tokens to `store`, starting from the token it already holds
    pub fn with_store(mut self, store: TokenStore) -> Self {
        match store.load() {
            Ok(Some(token)) => {
                self.logger.info("Loaded stored token");
                self.token = Mutex::new(Some(token));
            }
            Ok(None) => {}
            Err(e) => self
                .logger
                .warn(&format!("Ignoring unreadable token file: {}", e)),
        }
        self.store = Some(store);
        self
    }

    /// A currently valid access token
    pub async fn bearer(&self) -> Result<String> {
        let mut token = self.token.lock().await;
        let now = self.clock.now();
        if let Some(current) = token.as_ref()
            && !current.expires_within(now, self.refresh_margin)
        {
            return Ok(current.access_token.clone());
        }

        let fresh = self.obtain(token.as_ref()).await?;
        let access = fresh.access_token.clone();
        self.persist(&fresh);
        *token = Some(fresh);
        Ok(access)
    }

    /// Replace the token after the server rejected it
    pub async fn renew(&self) -> Result<()> {
        let mut token = self.token.lock().await;
        let fresh = self.obtain(token.as_ref()).await?;
        self.persist(&fresh);
        *token = Some(fresh);
        Ok(())
    }

    /// No token, or the token has lapsed. While a login is in flight the
    /// session counts as live.
    pub fn is_expired(&self) -> bool {
        let now = self.clock.now();
        self.token
            .try_lock()
            .is_ok_and(|token| token.as_ref().is_none_or(|t| t.is_expired(now)))
    }

    async fn obtain(&self, current: Option<&Token>) -> Result<Token> {
        if let Some(current) = current
            && current.refresh_token.is_some()
        {
            match self.provider.refresh(current).await {
                Ok(token) => {
                    self.logger.debug("Token refreshed");
                    return Ok(token);
                }
                Err(e) => self
                    .logger
                    .warn(&format!("Token refresh failed, logging in again: {}", e)),
            }
        }

        let token = self.provider.authenticate(&self.credentials).await?;
        self.logger
            .info(&format!("Logged in as {}", self.credentials.user));
        Ok(token)
    }

    fn persist(&self, token: &Token) {
        if let Some(store) = &self.store
            && let Err(e) = store.save(token)
        {
            self.logger.warn(&format!("Failed to store token: {}", e));
        }
    }
}
