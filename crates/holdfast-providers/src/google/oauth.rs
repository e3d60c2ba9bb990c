//! OAuth 2.0 token refresh for Google APIs.
//!
//! Consent is collected outside the orchestrator; this client only
//! exchanges a refresh token for a new access token.

use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{AdapterError, AdapterResult};

use super::config::GoogleConfig;
use super::config::OAuthCredentials;

/// OAuth client for Google's token endpoint.
#[derive(Debug)]
pub struct OAuthClient {
    credentials: OAuthCredentials,
    token_url: String,
    http_client: reqwest::Client,
}

impl OAuthClient {
    /// Creates a new OAuth client from the adapter configuration.
    pub fn new(config: &GoogleConfig) -> AdapterResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.as_str())
            .build()
            .map_err(|e| {
                AdapterError::configuration(format!("failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            credentials: config.credentials.clone(),
            token_url: config.token_url.clone(),
            http_client,
        })
    }

    /// Refreshes an expired access token using the refresh token.
    ///
    /// Returns the new access token and its lifetime in seconds. A rejected
    /// refresh token (revoked consent) is reported as an authentication
    /// error; transport failures keep their retryable code.
    pub async fn refresh_token(&self, refresh_token: &str) -> AdapterResult<(String, Option<i64>)> {
        let params = [
            ("client_id", self.credentials.client_id.as_str()),
            ("client_secret", self.credentials.client_secret.as_str()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ];

        let response = self
            .http_client
            .post(&self.token_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| {
                AdapterError::network(format!("token refresh request failed: {}", e)).with_source(e)
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            AdapterError::network(format!("failed to read response: {}", e)).with_source(e)
        })?;

        if status.is_server_error() {
            return Err(AdapterError::server(format!(
                "token endpoint error ({}): {}",
                status, body
            )));
        }

        if !status.is_success() {
            let reason = serde_json::from_str::<TokenErrorResponse>(&body)
                .map(|e| e.error)
                .unwrap_or_else(|_| status.to_string());
            debug!(%status, reason = %reason, "token refresh rejected");
            return Err(AdapterError::authentication(format!(
                "token refresh failed: {}",
                reason
            )));
        }

        let token_response: TokenResponse = serde_json::from_str(&body).map_err(|e| {
            AdapterError::invalid_response(format!("invalid token response: {}", e))
        })?;

        info!("refreshed Google access token");
        Ok((token_response.access_token, token_response.expires_in))
    }
}

/// Successful response from the token endpoint.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// Error response from the token endpoint.
#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(server: &MockServer) -> GoogleConfig {
        GoogleConfig::new(OAuthCredentials::new(
            "test-client.apps.googleusercontent.com",
            "test-secret",
        ))
        .with_token_url(format!("{}/token", server.uri()))
    }

    #[tokio::test]
    async fn refresh_returns_new_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "fresh",
                "expires_in": 3599,
                "token_type": "Bearer"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = OAuthClient::new(&config(&server)).unwrap();
        let (token, expires_in) = client.refresh_token("refresh").await.unwrap();
        assert_eq!(token, "fresh");
        assert_eq!(expires_in, Some(3599));
    }

    #[tokio::test]
    async fn revoked_refresh_token_is_authentication_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": "invalid_grant",
                "error_description": "Token has been expired or revoked."
            })))
            .mount(&server)
            .await;

        let client = OAuthClient::new(&config(&server)).unwrap();
        let err = client.refresh_token("refresh").await.unwrap_err();
        assert!(err.is_authentication());
        assert!(err.message().contains("invalid_grant"));
    }

    #[tokio::test]
    async fn token_endpoint_outage_is_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = OAuthClient::new(&config(&server)).unwrap();
        let err = client.refresh_token("refresh").await.unwrap_err();
        assert!(err.is_retryable());
        assert!(!err.is_authentication());
    }
}
