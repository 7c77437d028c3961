//! GitHub token resolution
//!
//! A missing token is not an error: the batched refresh is simply skipped.

use async_trait::async_trait;

/// Where a GitHub token comes from
#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// Resolve a token, `None` when unavailable. Whitespace-only counts as unavailable.
    async fn token(&self) -> Option<String>;
}

fn non_empty(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// A fixed token, or none at all
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials(Option<String>);

impl StaticCredentials {
    pub fn new(token: impl Into<String>) -> Self {
        Self(Some(token.into()))
    }

    pub fn none() -> Self {
        Self(None)
    }
}

#[async_trait]
impl CredentialSource for StaticCredentials {
    async fn token(&self) -> Option<String> {
        self.0.as_deref().and_then(non_empty)
    }
}

/// Token read from an environment variable
#[derive(Debug, Clone)]
pub struct EnvCredentials {
    var: String,
}

impl EnvCredentials {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

#[async_trait]
impl CredentialSource for EnvCredentials {
    async fn token(&self) -> Option<String> {
        std::env::var(&self.var).ok().as_deref().and_then(non_empty)
    }
}

/// Token from `gh auth token`
#[derive(Debug, Clone, Default)]
pub struct GhCliCredentials;

#[async_trait]
impl CredentialSource for GhCliCredentials {
    async fn token(&self) -> Option<String> {
        let output = tokio::process::Command::new("gh")
            .args(["auth", "token"])
            .output()
            .await;
        match output {
            Ok(out) if out.status.success() => non_empty(&String::from_utf8_lossy(&out.stdout)),
            Ok(out) => {
                tracing::debug!(status = %out.status, "gh auth token failed");
                None
            }
            Err(e) => {
                tracing::debug!(error = %e, "gh not available");
                None
            }
        }
    }
}

/// First source that yields a token wins
pub struct ChainedCredentials {
    sources: Vec<Box<dyn CredentialSource>>,
}

impl ChainedCredentials {
    pub fn new() -> Self {
        Self { sources: Vec::new() }
    }

    pub fn with(mut self, source: impl CredentialSource + 'static) -> Self {
        self.sources.push(Box::new(source));
        self
    }
}

impl Default for ChainedCredentials {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CredentialSource for ChainedCredentials {
    async fn token(&self) -> Option<String> {
        for source in &self.sources {
            if let Some(token) = source.token().await {
                return Some(token);
            }
        }
        None
    }
}
