//! Access-token lookup for nodes that call OAuth-protected services.

use async_trait::async_trait;

use crate::{Result, TrigflowError, common::MemCache};

#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Return a currently valid access token for `owner_id` at `provider_id`.
    async fn get_valid_access_token(
        &self,
        owner_id: &str,
        provider_id: &str,
    ) -> Result<String>;
}

/// Provider backed by a fixed token table.
pub struct StaticCredentials {
    tokens: MemCache<String, String>,
}

impl Default for StaticCredentials {
    fn default() -> Self {
        Self::new()
    }
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self {
            tokens: MemCache::new(1024),
        }
    }

    pub fn with_token(
        self,
        owner_id: &str,
        provider_id: &str,
        token: &str,
    ) -> Self {
        self.tokens.set(key(owner_id, provider_id), token.to_string());
        self
    }
}

fn key(
    owner_id: &str,
    provider_id: &str,
) -> String {
    format!("{owner_id}:{provider_id}")
}

#[async_trait]
impl CredentialProvider for StaticCredentials {
    async fn get_valid_access_token(
        &self,
        owner_id: &str,
        provider_id: &str,
    ) -> Result<String> {
        self.tokens.get(&key(owner_id, provider_id)).ok_or(TrigflowError::Credential(format!("OAuth tokens not found for provider: {provider_id}")))
    }
}
