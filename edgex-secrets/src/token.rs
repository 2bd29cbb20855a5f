//! Session token record as written by the secret-store setup service and
//! returned by token renewal.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{CredentialError, Result};

/// Renewal interval used when the record carries no lease duration.
pub const DEFAULT_SESSION_RENEWAL: Duration = Duration::from_secs(1800);

/// Session token and the metadata needed to keep it alive.
///
/// The token itself may sit in several places depending on who wrote the
/// record; see [`token`](Self::token).
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SessionTokenRecord {
    #[serde(default)]
    client_token: Option<String>,
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    auth: Option<AuthBlock>,
    #[serde(default, rename = "Auth")]
    legacy_auth: Option<LegacyAuthBlock>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
struct AuthBlock {
    #[serde(default)]
    client_token: Option<String>,
    #[serde(default)]
    entity_id: Option<String>,
    #[serde(default)]
    lease_duration: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
struct LegacyAuthBlock {
    #[serde(default, rename = "Token")]
    token: Option<String>,
}

impl SessionTokenRecord {
    /// Parse a record from JSON bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| CredentialError::TokenFormat(e.to_string()))
    }

    /// Read and parse a token file.
    pub async fn read_from(path: &Path) -> Result<Self> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| CredentialError::TokenFile {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
        Self::from_slice(&bytes)
    }

    /// The session token: `client_token`, then `token`, then
    /// `auth.client_token`, then `Auth.Token`; the first non-empty one wins.
    pub fn token(&self) -> Option<&str> {
        [
            self.client_token.as_deref(),
            self.token.as_deref(),
            self.auth.as_ref().and_then(|auth| auth.client_token.as_deref()),
            self.legacy_auth.as_ref().and_then(|auth| auth.token.as_deref()),
        ]
        .into_iter()
        .flatten()
        .find(|token| !token.is_empty())
    }

    /// Entity the token was issued to; required for regeneration.
    pub fn entity_id(&self) -> Option<&str> {
        self.auth
            .as_ref()
            .and_then(|auth| auth.entity_id.as_deref())
            .filter(|id| !id.is_empty())
    }

    /// Lease duration in seconds, if known and non-zero.
    pub fn lease_duration(&self) -> Option<u64> {
        self.auth
            .as_ref()
            .and_then(|auth| auth.lease_duration)
            .filter(|lease| *lease > 0)
    }

    /// How long to wait before renewing: half the lease, at least one second.
    pub fn renewal_interval(&self) -> Duration {
        self.lease_duration()
            .map_or(DEFAULT_SESSION_RENEWAL, |lease| {
                Duration::from_secs((lease / 2).max(1))
            })
    }
}
