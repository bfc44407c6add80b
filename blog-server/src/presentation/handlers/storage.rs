use crate::application::storage_service::StorageService;
use crate::domain::error::DomainError;
use crate::infrastructure::security::JwtKeys;
use crate::presentation::dto::UploadResponse;
use crate::presentation::handlers::request_id;
use crate::presentation::middleware::JwtAuthMiddleware;
use crate::presentation::utils::AuthenticatedUser;
use actix_web::{HttpRequest, HttpResponse, Scope, http::header, web};
use tracing::info;

pub fn scope(keys: JwtKeys) -> Scope {
    // The public route must be registered first: its path also matches the upload pattern.
    web::scope("/storage")
        .route("/public/{bucket}/{tail:.*}", web::get().to(download))
        .service(
            web::resource("/{bucket}/{tail:.*}")
                .wrap(JwtAuthMiddleware::required(keys))
                .route(web::post().to(upload)),
        )
}

async fn upload(
    req: HttpRequest,
    user: AuthenticatedUser,
    storage: web::Data<StorageService>,
    path: web::Path<(String, String)>,
    body: web::Bytes,
) -> Result<HttpResponse, DomainError> {
    let (bucket, object) = path.into_inner();
    let public_url = storage.upload(user.id, &bucket, &object, &body).await?;

    info!(request_id = %request_id(&req), %bucket, path = %object, "object uploaded");

    Ok(HttpResponse::Created().json(UploadResponse {
        path: object,
        public_url,
    }))
}

async fn download(
    storage: web::Data<StorageService>,
    path: web::Path<(String, String)>,
) -> Result<HttpResponse, DomainError> {
    let (bucket, object) = path.into_inner();
    let stored = storage.read(&bucket, &object).await?;
    Ok(HttpResponse::Ok()
        .insert_header((header::CONTENT_TYPE, stored.content_type))
        .insert_header((header::CACHE_CONTROL, "public, max-age=3600"))
        .body(stored.bytes))
}
