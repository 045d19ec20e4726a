//! Business endpoints of the study backend.
//!
//! Payloads are returned as plain JSON; this crate only moves them.

use serde_json::{json, Value};

use crate::models::{Profile, ProfileResponse};

use super::{ApiError, RequestGateway};

pub const PROFILE_PATH: &str = "/users/profile";
pub const MY_DOCUMENTS_PATH: &str = "/documents/my-documents";
pub const SUMMARY_PATH: &str = "/summary/generate";
pub const QUIZ_PATH: &str = "/quiz/generate";
pub const QUIZ_TEST_PATH: &str = "/quiz/test";
pub const CHAT_PATH: &str = "/chat/message";
pub const STUDY_STATS_PATH: &str = "/study/stats";

/// Summary length used when the caller has no preference
pub const DEFAULT_SUMMARY_LENGTH: &str = "medium";

impl RequestGateway {
    pub async fn fetch_profile(&self) -> Result<Profile, ApiError> {
        let response: ProfileResponse = self.get(PROFILE_PATH).await?;
        Ok(response.user)
    }

    pub async fn my_documents(&self) -> Result<Value, ApiError> {
        self.get(MY_DOCUMENTS_PATH).await
    }

    pub async fn generate_summary(
        &self,
        document_id: Option<&str>,
        text: &str,
        length: Option<&str>,
    ) -> Result<Value, ApiError> {
        let body = json!({
            "document_id": document_id,
            "text": text,
            "length": length.unwrap_or(DEFAULT_SUMMARY_LENGTH),
        });
        self.post(SUMMARY_PATH, body).await
    }

    pub async fn generate_quiz(&self, text: &str) -> Result<Value, ApiError> {
        self.post(QUIZ_PATH, json!({ "text": text })).await
    }

    pub async fn generate_quiz_from_document(&self, document_id: &str) -> Result<Value, ApiError> {
        self.post(QUIZ_PATH, json!({ "document_id": document_id })).await
    }

    pub async fn quiz_test(&self) -> Result<Value, ApiError> {
        self.get(QUIZ_TEST_PATH).await
    }

    pub async fn send_chat_message(
        &self,
        message: &str,
        document_id: Option<&str>,
    ) -> Result<Value, ApiError> {
        let body = json!({ "message": message, "document_id": document_id });
        self.post(CHAT_PATH, body).await
    }

    pub async fn study_stats(&self) -> Result<Value, ApiError> {
        self.get(STUDY_STATS_PATH).await
    }
}
