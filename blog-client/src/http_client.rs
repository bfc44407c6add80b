use crate::error::BlogClientError;
use crate::model::{AuthUser, ProfileSeed, Session};
use crate::query::{Collection, Filter, Query};
use crate::{AuthApi, DataService, StorageApi};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, instrument};

#[derive(Clone)]
pub struct BlogClientHttp {
    client: Arc<Client>,
    base_url: String,
    session: Arc<RwLock<Option<Session>>>,
}

#[derive(Debug, Deserialize)]
struct RowsResponse {
    rows: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct CountResponse {
    count: u64,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    public_url: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct AuthResponse {
    pub access_token: String,
    pub expires_in: i64,
    #[serde(rename = "token_type")]
    pub token_type: String, // "Bearer"
    pub user: AuthUser,
}

impl From<AuthResponse> for Session {
    fn from(auth: AuthResponse) -> Self {
        Session {
            access_token: auth.access_token,
            token_type: auth.token_type,
            expires_at: Utc::now() + Duration::seconds(auth.expires_in),
            user: auth.user,
        }
    }
}

impl BlogClientHttp {
    pub fn connect(endpoint: &str) -> Result<Self, BlogClientError> {
        let base_url = endpoint.trim_end_matches('/').to_string();
        Ok(Self {
            client: Arc::new(Client::builder().build()?),
            base_url,
            session: Arc::new(RwLock::new(None)),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api{}", self.base_url, path)
    }

    async fn authorized(&self, req: RequestBuilder) -> RequestBuilder {
        match self.session.read().await.as_ref() {
            Some(session) if !session.access_token.is_empty() => {
                req.bearer_auth(&session.access_token)
            }
            _ => req,
        }
    }

    async fn send(&self, req: RequestBuilder) -> Result<Response, BlogClientError> {
        let resp = self.authorized(req).await.send().await?;
        if resp.status().is_success() {
            Ok(resp)
        } else {
            Err(BlogClientError::from_http_response(resp).await)
        }
    }

    async fn rows(&self, req: RequestBuilder) -> Result<Vec<Value>, BlogClientError> {
        let body: RowsResponse = self.send(req).await?.json().await?;
        Ok(body.rows)
    }

    async fn store_session(&self, auth: AuthResponse) -> Session {
        let session = Session::from(auth);
        *self.session.write().await = Some(session.clone());
        session
    }
}

#[async_trait]
impl DataService for BlogClientHttp {
    #[instrument(skip(self, query), fields(collection = %query.collection))]
    async fn select(&self, query: &Query) -> Result<Vec<Value>, BlogClientError> {
        let req = self
            .client
            .post(self.url(&format!("/rest/{}/select", query.collection)))
            .json(query);
        let rows = self.rows(req).await?;
        debug!(rows = rows.len(), "select completed");
        Ok(rows)
    }

    #[instrument(skip(self, records))]
    async fn insert(
        &self,
        collection: Collection,
        records: Vec<Value>,
    ) -> Result<Vec<Value>, BlogClientError> {
        let req = self
            .client
            .post(self.url(&format!("/rest/{collection}")))
            .json(&json!({ "records": records }));
        self.rows(req).await
    }

    #[instrument(skip(self, patch, filters))]
    async fn update(
        &self,
        collection: Collection,
        patch: Value,
        filters: Vec<Filter>,
    ) -> Result<Vec<Value>, BlogClientError> {
        let req = self
            .client
            .patch(self.url(&format!("/rest/{collection}")))
            .json(&json!({ "patch": patch, "filters": filters }));
        self.rows(req).await
    }

    #[instrument(skip(self, filters))]
    async fn delete(
        &self,
        collection: Collection,
        filters: Vec<Filter>,
    ) -> Result<Vec<Value>, BlogClientError> {
        let req = self
            .client
            .delete(self.url(&format!("/rest/{collection}")))
            .json(&json!({ "filters": filters }));
        self.rows(req).await
    }

    async fn count(
        &self,
        collection: Collection,
        filters: Vec<Filter>,
    ) -> Result<u64, BlogClientError> {
        let req = self
            .client
            .post(self.url(&format!("/rest/{collection}/count")))
            .json(&json!({ "filters": filters }));
        let body: CountResponse = self.send(req).await?.json().await?;
        Ok(body.count)
    }
}

#[async_trait]
impl AuthApi for BlogClientHttp {
    #[instrument(skip(self, password, seed))]
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        seed: ProfileSeed,
    ) -> Result<Session, BlogClientError> {
        let req = self.client.post(self.url("/auth/signup")).json(&json!({
            "email": email,
            "password": password,
            "nickname": seed.nickname,
        }));
        let auth: AuthResponse = self.send(req).await?.json().await?;
        Ok(self.store_session(auth).await)
    }

    #[instrument(skip(self, password))]
    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, BlogClientError> {
        let req = self.client.post(self.url("/auth/token")).json(&json!({
            "email": email,
            "password": password,
        }));
        let auth: AuthResponse = self.send(req).await?.json().await?;
        Ok(self.store_session(auth).await)
    }

    async fn sign_out(&self) -> Result<(), BlogClientError> {
        // Tokens are stateless; forgetting it is all signing out takes.
        *self.session.write().await = None;
        Ok(())
    }

    async fn get_session(&self) -> Option<Session> {
        self.session.read().await.clone()
    }

    async fn refresh_session(&self) -> Result<Session, BlogClientError> {
        if self.session.read().await.is_none() {
            return Err(BlogClientError::Unauthorized);
        }
        let req = self.client.get(self.url("/auth/user"));
        let auth: AuthResponse = self.send(req).await?.json().await?;
        Ok(self.store_session(auth).await)
    }

    async fn set_session(&self, session: Option<Session>) {
        *self.session.write().await = session;
    }
}

#[async_trait]
impl StorageApi for BlogClientHttp {
    #[instrument(skip(self, bytes), fields(size = bytes.len()))]
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, BlogClientError> {
        let req = self
            .client
            .post(self.url(&format!("/storage/{bucket}/{path}")))
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(bytes);
        let body: UploadResponse = self.send(req).await?.json().await?;
        Ok(body.public_url)
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        self.url(&format!("/storage/public/{bucket}/{path}"))
    }
}
