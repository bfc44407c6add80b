use std::future::{Ready, ready};
use std::task::{Context, Poll};
use std::time::Instant;

use crate::domain::error::DomainError;
use crate::infrastructure::security::JwtKeys;
use crate::presentation::utils::{AuthenticatedUser, BearerToken, extract_user_from_header};
use actix_service::{Service, Transform};
use actix_web::dev::{ServiceRequest, ServiceResponse};
use actix_web::http::StatusCode;
use actix_web::http::header::{AUTHORIZATION, HeaderName, HeaderValue};
use actix_web::{Error, HttpMessage};
use futures_util::future::LocalBoxFuture;
use tracing::{debug, info, warn};
use uuid::Uuid;

static REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");
static TIMING_HEADER: HeaderName = HeaderName::from_static("server-timing");

#[derive(Clone)]
pub struct RequestId(pub String);

/// Gives every request an id (the client's `x-request-id` or a fresh one),
/// echoes it back with a `server-timing` header and logs one line per
/// request, including requests rejected by inner middleware.
pub struct RequestLogMiddleware;

impl<S, B> Transform<S, ServiceRequest> for RequestLogMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = RequestLogService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RequestLogService { service }))
    }
}

pub struct RequestLogService<S> {
    service: S,
}

impl<S, B> Service<ServiceRequest> for RequestLogService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.service.poll_ready(cx)
    }

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let start = Instant::now();
        let request_id = req
            .headers()
            .get(&REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(str::to_owned)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        req.extensions_mut().insert(RequestId(request_id.clone()));
        let method = req.method().clone();
        let path = req.path().to_owned();

        let fut = self.service.call(req);

        Box::pin(async move {
            let result = fut.await;
            let duration_ms = start.elapsed().as_millis() as u64;

            let mut res = match result {
                Ok(res) => res,
                Err(err) => {
                    let status = err.as_response_error().status_code();
                    log_request(&request_id, "-", &method, &path, status, duration_ms);
                    return Err(err);
                }
            };

            let user = res
                .request()
                .extensions()
                .get::<AuthenticatedUser>()
                .map(|u| u.id.to_string());
            log_request(
                &request_id,
                user.as_deref().unwrap_or("-"),
                &method,
                &path,
                res.status(),
                duration_ms,
            );

            let headers = res.response_mut().headers_mut();
            if let Ok(value) = HeaderValue::from_str(&request_id) {
                headers.insert(REQUEST_ID_HEADER.clone(), value);
            }
            if let Ok(value) = HeaderValue::from_str(&format!("app;dur={duration_ms}")) {
                headers.insert(TIMING_HEADER.clone(), value);
            }
            Ok(res)
        })
    }
}

fn log_request(
    request_id: &str,
    user: &str,
    method: &actix_web::http::Method,
    path: &str,
    status: StatusCode,
    duration_ms: u64,
) {
    let status_code = status.as_u16();
    if status.is_server_error() {
        warn!(request_id, user, %method, path, status = status_code, duration_ms, "request failed");
    } else {
        info!(request_id, user, %method, path, status = status_code, duration_ms, "request completed");
    }
}

/// Verifies bearer tokens and stores the caller as [`AuthenticatedUser`].
/// A present but invalid token is always rejected; a missing one only
/// when the middleware is `required`.
pub struct JwtAuthMiddleware {
    keys: JwtKeys,
    required: bool,
}

impl JwtAuthMiddleware {
    pub fn required(keys: JwtKeys) -> Self {
        Self {
            keys,
            required: true,
        }
    }

    pub fn optional(keys: JwtKeys) -> Self {
        Self {
            keys,
            required: false,
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for JwtAuthMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = JwtAuthService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(JwtAuthService {
            service,
            keys: self.keys.clone(),
            required: self.required,
        }))
    }
}

pub struct JwtAuthService<S> {
    service: S,
    keys: JwtKeys,
    required: bool,
}

impl<S, B> Service<ServiceRequest> for JwtAuthService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.service.poll_ready(cx)
    }

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let header = req
            .headers()
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok());

        let accepted = match extract_user_from_header(header, &self.keys) {
            BearerToken::Valid(id) => {
                req.extensions_mut().insert(AuthenticatedUser { id });
                true
            }
            BearerToken::Missing => !self.required,
            BearerToken::Invalid => {
                debug!(path = %req.path(), "rejected bearer token");
                false
            }
        };
        let fut = accepted.then(|| self.service.call(req));

        Box::pin(async move {
            match fut {
                Some(fut) => fut.await,
                None => Err(DomainError::Unauthorized.into()),
            }
        })
    }
}
