use crate::error::Error;
use async_trait::async_trait;
use std::sync::Arc;

/// Supplies the two credentials every submission needs: a bearer access
/// token and a single-use human-verification challenge token. Access tokens
/// expire, so callers fetch one per request instead of caching; challenge
/// tokens are burned by the remote on first use and must be freshly minted
/// for every retry attempt.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn access_token(&self) -> Result<String, Error>;

    async fn challenge_token(&self) -> Result<String, Error>;
}

pub type SharedTokenProvider = Arc<dyn TokenProvider>;

/// Reads both tokens from the environment on every call. Good enough for the
/// CLI, where an external helper keeps the variables fresh.
pub struct EnvTokenProvider {
    access_var: String,
    challenge_var: String,
}

impl EnvTokenProvider {
    pub fn new(access_var: impl Into<String>, challenge_var: impl Into<String>) -> Self {
        Self {
            access_var: access_var.into(),
            challenge_var: challenge_var.into(),
        }
    }
}

impl Default for EnvTokenProvider {
    fn default() -> Self {
        Self::new("FLOWSTITCH_ACCESS_TOKEN", "FLOWSTITCH_CHALLENGE_TOKEN")
    }
}

#[async_trait]
impl TokenProvider for EnvTokenProvider {
    async fn access_token(&self) -> Result<String, Error> {
        std::env::var(&self.access_var)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| Error::Token(format!("{} is not set", self.access_var)))
    }

    async fn challenge_token(&self) -> Result<String, Error> {
        std::env::var(&self.challenge_var)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| Error::Token(format!("{} is not set", self.challenge_var)))
    }
}

/// Fixed tokens, for tests.
pub struct StaticTokenProvider {
    pub access: String,
    pub challenge: String,
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn access_token(&self) -> Result<String, Error> {
        Ok(self.access.clone())
    }

    async fn challenge_token(&self) -> Result<String, Error> {
        Ok(self.challenge.clone())
    }
}
