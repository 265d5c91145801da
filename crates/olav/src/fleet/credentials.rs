//! Just-in-time credential resolution.
//!
//! Credential material is fetched at connect time from a provider keyed by
//! the device's `credentials_ref` and is never persisted by the core.

use crate::error::{OlavError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;

#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: Option<String>,
    pub private_key: Option<String>,
}

// Manual Debug so secret material never reaches a log line.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field(
                "private_key",
                &self.private_key.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn lookup(&self, reference: &str) -> Result<Credentials>;
}

/// Fixed in-memory map, used by tests and simple lab setups.
#[derive(Default)]
pub struct StaticCredentials {
    entries: HashMap<String, Credentials>,
}

impl StaticCredentials {
    pub fn with(mut self, reference: &str, creds: Credentials) -> Self {
        self.entries.insert(reference.to_string(), creds);
        self
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentials {
    async fn lookup(&self, reference: &str) -> Result<Credentials> {
        self.entries
            .get(reference)
            .cloned()
            .ok_or_else(|| OlavError::not_found(format!("credential reference '{reference}'")))
    }
}

/// Resolves `ref` from `OLAV_CRED_<REF>_USERNAME` / `_PASSWORD` /
/// `_PRIVATE_KEY` environment variables at lookup time.
pub struct EnvCredentialProvider;

#[async_trait]
impl CredentialProvider for EnvCredentialProvider {
    async fn lookup(&self, reference: &str) -> Result<Credentials> {
        let prefix = format!(
            "OLAV_CRED_{}",
            reference.to_ascii_uppercase().replace('-', "_")
        );
        let username = std::env::var(format!("{prefix}_USERNAME")).map_err(|_| {
            OlavError::not_found(format!("credential reference '{reference}' ({prefix}_USERNAME)"))
        })?;
        Ok(Credentials {
            username,
            password: std::env::var(format!("{prefix}_PASSWORD")).ok(),
            private_key: std::env::var(format!("{prefix}_PRIVATE_KEY")).ok(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_lookup() {
        let provider = StaticCredentials::default().with(
            "lab",
            Credentials {
                username: "ops".into(),
                password: Some("secret".into()),
                private_key: None,
            },
        );
        let creds = provider.lookup("lab").await.unwrap();
        assert_eq!(creds.username, "ops");
        assert!(provider.lookup("prod").await.is_err());
    }

    #[test]
    fn debug_redacts_secrets() {
        let creds = Credentials {
            username: "ops".into(),
            password: Some("hunter2".into()),
            private_key: None,
        };
        let rendered = format!("{creds:?}");
        assert!(rendered.contains("ops"));
        assert!(!rendered.contains("hunter2"));
    }
}
