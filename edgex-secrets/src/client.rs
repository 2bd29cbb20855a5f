//! Thin HTTP client for the secret-store endpoints the bridge uses.

use edgex_bus::BusCredentials;
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::config::SecretStoreConfig;
use crate::error::{CredentialError, Result};
use crate::token::SessionTokenRecord;

/// Header carrying the session token.
pub const TOKEN_HEADER: &str = "X-Vault-Token";

const LOOKUP_SELF: &str = "/auth/token/lookup-self";
const RENEW_SELF: &str = "/auth/token/renew-self";

/// Requested extension on renewal.
const RENEW_INCREMENT: &str = "1h";

#[derive(Deserialize)]
struct DataEnvelope<T> {
    data: T,
}

#[derive(Deserialize)]
struct IdentityTokenData {
    token: String,
}

/// Secret-store HTTP client.
///
/// Every request carries the session token in [`TOKEN_HEADER`] and is bounded
/// by the configured request timeout.
#[derive(Debug, Clone)]
pub struct SecretStoreClient {
    http: reqwest::Client,
    api_url: String,
    setup_url: String,
    service_key: String,
}

impl SecretStoreClient {
    pub fn new(config: &SecretStoreConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| CredentialError::Http(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            api_url: config.api_url(),
            setup_url: config.setup_url.trim_end_matches('/').to_string(),
            service_key: config.service_key.clone(),
        })
    }

    /// Check that the session token is valid.
    pub async fn lookup_self(&self, token: &str) -> Result<()> {
        let response = self
            .http
            .get(self.url(LOOKUP_SELF))
            .header(TOKEN_HEADER, token)
            .send()
            .await
            .map_err(transport_error)?;

        check_status(LOOKUP_SELF, response).await.map(drop)
    }

    /// Extend the session token. The response replaces the whole record.
    pub async fn renew_self(&self, token: &str) -> Result<SessionTokenRecord> {
        let response = self
            .http
            .post(self.url(RENEW_SELF))
            .header(TOKEN_HEADER, token)
            .json(&serde_json::json!({ "increment": RENEW_INCREMENT }))
            .send()
            .await
            .map_err(transport_error)?;

        decode(RENEW_SELF, check_status(RENEW_SELF, response).await?).await
    }

    /// Issue a fresh identity token for this service.
    pub async fn identity_token(&self, token: &str) -> Result<String> {
        let endpoint = format!("/identity/oidc/token/{}", self.service_key);
        let response = self
            .http
            .get(self.url(&endpoint))
            .header(TOKEN_HEADER, token)
            .send()
            .await
            .map_err(transport_error)?;

        let envelope: DataEnvelope<IdentityTokenData> =
            decode(&endpoint, check_status(&endpoint, response).await?).await?;
        Ok(envelope.data.token)
    }

    /// Fetch the message-bus credentials stored for this service.
    pub async fn message_bus_credentials(&self, token: &str) -> Result<BusCredentials> {
        let endpoint = format!("/secret/edgex/{}/message-bus", self.service_key);
        let response = self
            .http
            .get(self.url(&endpoint))
            .header(TOKEN_HEADER, token)
            .send()
            .await
            .map_err(transport_error)?;

        let envelope: DataEnvelope<BusCredentials> =
            decode(&endpoint, check_status(&endpoint, response).await?).await?;
        Ok(envelope.data)
    }

    /// Ask the setup service to write a new session token for `entity_id`.
    ///
    /// The new token is not returned; it lands in the token file.
    pub async fn regenerate_token(&self, entity_id: &str) -> Result<()> {
        let url = format!("{}/api/v3/token/entityId/{}", self.setup_url, entity_id);
        let response = self.http.put(&url).send().await.map_err(transport_error)?;

        check_status(&url, response).await.map(drop)
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.api_url, endpoint)
    }
}

fn transport_error(e: reqwest::Error) -> CredentialError {
    CredentialError::Http(e.to_string())
}

async fn check_status(endpoint: &str, response: Response) -> Result<Response> {
    match response.status() {
        StatusCode::FORBIDDEN => Err(CredentialError::AccessDenied {
            endpoint: endpoint.to_string(),
        }),
        status if status.is_success() => Ok(response),
        status => {
            tracing::debug!(
                "Secret store body for {}: {}",
                endpoint,
                response.text().await.unwrap_or_default()
            );
            Err(CredentialError::UnexpectedStatus {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
            })
        }
    }
}

async fn decode<T: DeserializeOwned>(endpoint: &str, response: Response) -> Result<T> {
    let bytes = response.bytes().await.map_err(transport_error)?;
    serde_json::from_slice(&bytes).map_err(|e| CredentialError::MalformedResponse {
        endpoint: endpoint.to_string(),
        reason: e.to_string(),
    })
}
