pub mod auth;
pub mod health;
pub mod rest;
pub mod storage;

use crate::application::auth_service::AuthService;
use crate::application::data_service::DataService;
use crate::data::collection_repository::PostgresCollectionRepository;
use crate::data::user_repository::PostgresUserRepository;
use actix_web::{HttpMessage, HttpRequest};

pub type AppAuthService = AuthService<PostgresUserRepository>;
pub type AppDataService = DataService<PostgresCollectionRepository>;

fn request_id(req: &HttpRequest) -> String {
    req.extensions()
        .get::<crate::presentation::middleware::RequestId>()
        .map(|rid| rid.0.clone())
        .unwrap_or_else(|| "unknown".into())
}
