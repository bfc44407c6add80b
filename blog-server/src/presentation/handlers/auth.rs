use crate::domain::error::DomainError;
use crate::infrastructure::security::JwtKeys;
use crate::presentation::dto::{AuthResponse, SignUpRequest, TokenRequest};
use crate::presentation::handlers::{AppAuthService, request_id};
use crate::presentation::middleware::JwtAuthMiddleware;
use crate::presentation::utils::AuthenticatedUser;
use actix_web::{HttpRequest, HttpResponse, Responder, Scope, web};
use tracing::info;

pub fn scope(keys: JwtKeys) -> Scope {
    web::scope("/auth")
        .route("/signup", web::post().to(sign_up))
        .route("/token", web::post().to(token))
        .service(
            web::resource("/user")
                .wrap(JwtAuthMiddleware::required(keys))
                .route(web::get().to(current_user)),
        )
}

async fn sign_up(
    req: HttpRequest,
    service: web::Data<AppAuthService>,
    payload: web::Json<SignUpRequest>,
) -> Result<impl Responder, DomainError> {
    let payload = payload.into_inner();
    let issued = service
        .sign_up(&payload.email, &payload.password, &payload.nickname)
        .await?;

    info!(request_id = %request_id(&req), user_id = %issued.user.id, "user registered");

    Ok(HttpResponse::Created().json(AuthResponse::from(issued)))
}

async fn token(
    req: HttpRequest,
    service: web::Data<AppAuthService>,
    payload: web::Json<TokenRequest>,
) -> Result<impl Responder, DomainError> {
    let issued = service.login(&payload.email, &payload.password).await?;

    info!(request_id = %request_id(&req), user_id = %issued.user.id, "token issued");

    Ok(HttpResponse::Ok().json(AuthResponse::from(issued)))
}

/// Returns the caller with a fresh token.
async fn current_user(
    user: AuthenticatedUser,
    service: web::Data<AppAuthService>,
) -> Result<impl Responder, DomainError> {
    let issued = service.refresh(user.id).await?;
    Ok(HttpResponse::Ok().json(AuthResponse::from(issued)))
}
