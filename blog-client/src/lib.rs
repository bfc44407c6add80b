use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

pub mod comments;
pub mod error;
pub mod feed;
pub mod http_client;
pub mod likes;
#[cfg(any(test, feature = "memory"))]
pub mod memory;
pub mod model;
pub mod pager;
pub mod posts;
pub mod profile;
pub mod query;
pub mod search;
pub mod session;
pub mod slug;
pub mod stats;
pub mod store;
pub mod validation;

pub use error::BlogClientError;
pub use http_client::BlogClientHttp;
pub use model::{
    AuthUser, AuthorSummary, Comment, CommentView, Post, PostView, Profile, ProfileSeed, Session,
};
pub use query::{Collection, Filter, Order, Query, Range};

/// Row-level access to the remote collections.
///
/// Rows travel as JSON objects; callers decode them into typed records
/// with [`decode_rows`].
#[async_trait]
pub trait DataService: Send + Sync {
    async fn select(&self, query: &Query) -> Result<Vec<Value>, BlogClientError>;
    async fn insert(
        &self,
        collection: Collection,
        records: Vec<Value>,
    ) -> Result<Vec<Value>, BlogClientError>;
    async fn update(
        &self,
        collection: Collection,
        patch: Value,
        filters: Vec<Filter>,
    ) -> Result<Vec<Value>, BlogClientError>;
    async fn delete(
        &self,
        collection: Collection,
        filters: Vec<Filter>,
    ) -> Result<Vec<Value>, BlogClientError>;
    async fn count(
        &self,
        collection: Collection,
        filters: Vec<Filter>,
    ) -> Result<u64, BlogClientError>;
}

#[async_trait]
pub trait AuthApi: Send + Sync {
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        seed: ProfileSeed,
    ) -> Result<Session, BlogClientError>;
    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, BlogClientError>;
    async fn sign_out(&self) -> Result<(), BlogClientError>;
    /// The session the transport currently authenticates with, if any.
    async fn get_session(&self) -> Option<Session>;
    /// Re-validates the current token and returns a fresh session.
    async fn refresh_session(&self) -> Result<Session, BlogClientError>;
    /// Installs a previously persisted session without a round trip.
    async fn set_session(&self, session: Option<Session>);
}

#[async_trait]
pub trait StorageApi: Send + Sync {
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, BlogClientError>;
    fn public_url(&self, bucket: &str, path: &str) -> String;
}

pub fn decode_rows<T: DeserializeOwned>(rows: Vec<Value>) -> Result<Vec<T>, BlogClientError> {
    rows.into_iter()
        .map(|row| serde_json::from_value(row).map_err(BlogClientError::from))
        .collect()
}

pub fn decode_one<T: DeserializeOwned>(rows: Vec<Value>) -> Result<T, BlogClientError> {
    let row = rows.into_iter().next().ok_or(BlogClientError::NotFound)?;
    serde_json::from_value(row).map_err(BlogClientError::from)
}

pub fn encode<T: serde::Serialize>(record: &T) -> Result<Value, BlogClientError> {
    serde_json::to_value(record).map_err(BlogClientError::from)
}
