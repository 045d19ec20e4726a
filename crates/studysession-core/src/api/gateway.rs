use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::auth::SessionManager;
use crate::notify::Notice;

use super::{ApiError, ApiRequest, ApiResponse};

const NOT_SIGNED_IN_MESSAGE: &str = "Please log in to continue.";

/// An outbound call and whether it has already been replayed after a refresh.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingRequest {
    pub request: ApiRequest,
    pub has_been_retried: bool,
}

impl PendingRequest {
    pub fn new(request: ApiRequest) -> Self {
        Self {
            request,
            has_been_retried: false,
        }
    }
}

/// Sends business calls with the current access token and recovers from expiry.
///
/// A 401 triggers one token refresh and one replay of the same request. A second
/// 401, or a failed refresh, ends the session and is returned to the caller.
/// Clone is cheap; every clone drives the same session.
#[derive(Clone)]
pub struct RequestGateway {
    session: Arc<SessionManager>,
}

impl RequestGateway {
    pub fn new(session: Arc<SessionManager>) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    /// Send a request and return the successful response.
    pub async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        let outcome = self.run(PendingRequest::new(request)).await;
        if let Err(ref e) = outcome {
            self.report(e);
        }
        outcome
    }

    /// Send a request and decode the successful JSON body.
    pub async fn execute_json<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, ApiError> {
        let outcome = match self.run(PendingRequest::new(request)).await {
            Ok(response) => response.json(),
            Err(e) => Err(e),
        };
        if let Err(ref e) = outcome {
            self.report(e);
        }
        outcome
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.execute_json(ApiRequest::get(path)).await
    }

    pub async fn post<T: DeserializeOwned>(&self, path: &str, body: Value) -> Result<T, ApiError> {
        self.execute_json(ApiRequest::post(path, body)).await
    }

    async fn run(&self, mut pending: PendingRequest) -> Result<ApiResponse, ApiError> {
        loop {
            let token = self.session.access_token();
            let response = self
                .session
                .transport()
                .send(&pending.request, token.as_deref())
                .await?;

            if response.status != 401 {
                return response.error_for_status();
            }

            // Nothing to renew: the caller was never signed in
            if token.is_none() && !self.session.can_refresh() {
                debug!(path = %pending.request.path, "Unauthorized without a session");
                let message = ApiError::message_from_body(&response.body);
                return Err(ApiError::NotAuthenticated(if message.is_empty() {
                    NOT_SIGNED_IN_MESSAGE.to_string()
                } else {
                    message
                }));
            }

            if pending.has_been_retried {
                warn!(path = %pending.request.path, "Still unauthorized after refresh");
                self.session.force_logout("request rejected after token refresh");
                return Err(ApiError::AuthorizationExpired);
            }

            debug!(path = %pending.request.path, "Unauthorized, renewing access token");
            // Teardown on failure happens inside the session manager
            self.session.renew_access_token(token.as_deref()).await?;
            pending.has_been_retried = true;
        }
    }

    fn report(&self, err: &ApiError) {
        // Session-ending failures were already announced by the teardown
        if err.ends_session() {
            return;
        }
        if let Some(message) = err.user_message() {
            self.session.notifier().notify(Notice::error(message));
        }
    }
}
