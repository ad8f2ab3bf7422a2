//! Authentication collaborator.
//!
//! The service expects a short-lived bearer token in the first frame of
//! every connection. The engine asks the provider for a fresh token per
//! handshake attempt and never caches one across attempts.

use anyhow::Result;
use async_trait::async_trait;

/// Supplies a short-lived bearer token on demand.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn fresh_token(&self) -> Result<String>;
}

/// A [`TokenProvider`] that hands out a fixed token.
///
/// Suitable for development setups and tests; production wires in the real
/// identity service here.
#[derive(Debug, Clone)]
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn fresh_token(&self) -> Result<String> {
        Ok(self.token.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_provider_returns_token() {
        let provider = StaticTokenProvider::new("abc123");
        assert_eq!(provider.fresh_token().await.unwrap(), "abc123");
    }
}
