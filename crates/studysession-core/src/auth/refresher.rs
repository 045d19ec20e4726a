use std::sync::Arc;

use tracing::{debug, warn};

use crate::api::{ApiError, ApiRequest, ApiTransport};
use crate::models::{RefreshRequest, RefreshResponse};

pub const REFRESH_PATH: &str = "/auth/refresh";

/// Exchanges a refresh credential for a new access credential.
///
/// One attempt per call. Retrying and serializing concurrent refreshes are the
/// session manager's job.
#[derive(Clone)]
pub struct TokenRefresher {
    transport: Arc<dyn ApiTransport>,
}

impl TokenRefresher {
    pub fn new(transport: Arc<dyn ApiTransport>) -> Self {
        Self { transport }
    }

    /// Returns `RefreshDenied` for any answer other than a usable token, and
    /// `Network` when the server could not be reached.
    pub async fn refresh(&self, refresh_token: &str) -> Result<RefreshResponse, ApiError> {
        let body = RefreshRequest {
            refresh_token: refresh_token.to_string(),
        };
        let request = ApiRequest::post_json(REFRESH_PATH, &body)?;

        let response = self.transport.send(&request, None).await?;
        if !response.is_success() {
            let message = ApiError::message_from_body(&response.body);
            warn!(status = response.status, "Refresh rejected");
            return Err(ApiError::RefreshDenied(if message.is_empty() {
                format!("refresh rejected with status {}", response.status)
            } else {
                message
            }));
        }

        let renewed: RefreshResponse = response
            .json()
            .map_err(|e| ApiError::RefreshDenied(format!("unusable refresh response: {}", e)))?;
        if renewed.access_token.is_empty() {
            return Err(ApiError::RefreshDenied("refresh returned an empty token".to_string()));
        }

        debug!(rotated = renewed.refresh_token.is_some(), "Access token renewed");
        Ok(renewed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ApiResponse;
    use crate::testing::ScriptedTransport;

    #[tokio::test]
    async fn test_refresh_success_sends_refresh_token_without_bearer() {
        let transport = ScriptedTransport::new();
        transport.respond(REFRESH_PATH, ApiResponse::new(200, r#"{"access_token": "T2"}"#));
        let refresher = TokenRefresher::new(transport.clone());

        let renewed = refresher.refresh("R1").await.unwrap();
        assert_eq!(renewed.access_token, "T2");

        let sent = transport.sent_to(REFRESH_PATH);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].bearer, None);
        assert_eq!(sent[0].body, Some(serde_json::json!({"refresh_token": "R1"})));
    }

    #[tokio::test]
    async fn test_refresh_rejection_is_denied() {
        let transport = ScriptedTransport::new();
        transport.respond(REFRESH_PATH, ApiResponse::new(401, r#"{"error": "Token expired"}"#));
        let refresher = TokenRefresher::new(transport.clone());

        assert_eq!(
            refresher.refresh("R1").await.unwrap_err(),
            ApiError::RefreshDenied("Token expired".to_string())
        );
    }

    #[tokio::test]
    async fn test_refresh_malformed_body_is_denied() {
        let transport = ScriptedTransport::new();
        transport.respond(REFRESH_PATH, ApiResponse::new(200, r#"{"token": "T2"}"#));
        let refresher = TokenRefresher::new(transport.clone());

        assert!(matches!(
            refresher.refresh("R1").await,
            Err(ApiError::RefreshDenied(_))
        ));
    }

    #[tokio::test]
    async fn test_refresh_transport_failure_is_network_error() {
        let transport = ScriptedTransport::new();
        transport.fail(REFRESH_PATH, "connection refused");
        let refresher = TokenRefresher::new(transport.clone());

        assert_eq!(
            refresher.refresh("R1").await.unwrap_err(),
            ApiError::Network("connection refused".to_string())
        );
        // No retry on its own
        assert_eq!(transport.sent_to(REFRESH_PATH).len(), 1);
    }
}
