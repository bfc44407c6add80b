use crate::application::auth_service::IssuedToken;
use crate::domain::query::Filter;
use crate::domain::user::UserInfo;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ======================= AUTH =======================

#[derive(Debug, Deserialize)]
pub struct SignUpRequest {
    pub email: String,
    pub password: String,
    pub nickname: String,
}

#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub access_token: String,
    pub expires_in: i64,
    #[serde(rename = "token_type")]
    pub token_type: String, // "Bearer"
    pub user: UserInfo,
}

impl From<IssuedToken> for AuthResponse {
    fn from(issued: IssuedToken) -> Self {
        Self {
            access_token: issued.access_token,
            expires_in: issued.expires_in,
            token_type: "Bearer".to_string(),
            user: issued.user,
        }
    }
}

// ======================= REST =======================

#[derive(Debug, Deserialize)]
pub struct InsertRequest {
    pub records: Vec<Value>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateRequest {
    pub patch: Value,
    #[serde(default)]
    pub filters: Vec<Filter>,
}

#[derive(Debug, Deserialize)]
pub struct FiltersRequest {
    #[serde(default)]
    pub filters: Vec<Filter>,
}

#[derive(Debug, Serialize)]
pub struct RowsResponse {
    pub rows: Vec<Value>,
}

#[derive(Debug, Serialize)]
pub struct CountResponse {
    pub count: i64,
}

// ======================= STORAGE =======================

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub path: String,
    pub public_url: String,
}
