//! Pools: named remote targets on the broker.

use serde::{Deserialize, Serialize};

/// Authentication mode used when talking to a pool's backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthType {
    /// Shared export/import token issued by the broker.
    Standard,
    /// HTTP basic authentication.
    BasicAuth,
}

/// A pool: one named replication target on the central broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pool {
    /// Pool machine name, shared across all participating sites.
    pub id: String,
    /// Human readable label.
    pub label: String,
    /// Base URL of the broker backend for this pool.
    pub backend_url: String,
    /// Identifier of this site, unique within the pool.
    pub site_id: String,
    /// Authentication mode.
    pub authentication: AuthType,
}

impl Pool {
    /// Creates a new pool.
    pub fn new(
        id: impl Into<String>,
        backend_url: impl Into<String>,
        site_id: impl Into<String>,
    ) -> Self {
        let id = id.into();
        Self {
            label: id.clone(),
            id,
            backend_url: backend_url.into(),
            site_id: site_id.into(),
            authentication: AuthType::Standard,
        }
    }

    /// Sets the label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Sets the authentication mode.
    pub fn with_authentication(mut self, auth: AuthType) -> Self {
        self.authentication = auth;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_defaults() {
        let pool = Pool::new("main", "https://broker.example.com/api", "site-a");
        assert_eq!(pool.id, "main");
        assert_eq!(pool.label, "main");
        assert_eq!(pool.authentication, AuthType::Standard);
    }

    #[test]
    fn pool_builder() {
        let pool = Pool::new("main", "https://broker.example.com/api", "site-a")
            .with_label("Main content pool")
            .with_authentication(AuthType::BasicAuth);
        assert_eq!(pool.label, "Main content pool");
        assert_eq!(pool.authentication, AuthType::BasicAuth);
    }
}
