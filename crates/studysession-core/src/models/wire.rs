use serde::{Deserialize, Serialize};

use super::Profile;

#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub user: Profile,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RefreshResponse {
    pub access_token: String,
    /// Present when the server rotates refresh tokens
    #[serde(default)]
    pub refresh_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProfileResponse {
    pub user: Profile,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessageResponse {
    #[serde(default)]
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_login_response() {
        let json = r#"{"access_token": "T1", "refresh_token": "R1", "user": {"name": "A"}, "message": "Login successful!"}"#;
        let resp: LoginResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.access_token, "T1");
        assert_eq!(resp.refresh_token.as_deref(), Some("R1"));
        assert_eq!(resp.user.name.as_deref(), Some("A"));
    }

    #[test]
    fn test_parse_refresh_response_without_rotation() {
        let resp: RefreshResponse = serde_json::from_str(r#"{"access_token": "T2"}"#).unwrap();
        assert_eq!(resp.access_token, "T2");
        assert!(resp.refresh_token.is_none());
    }
}
