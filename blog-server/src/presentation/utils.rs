use actix_web::dev::Payload;
use actix_web::{Error, FromRequest, HttpMessage, HttpRequest, error::ErrorUnauthorized};
use futures_util::future::{Ready, ready};
use uuid::Uuid;

use crate::infrastructure::security::JwtKeys;

/// A caller whose bearer token verified.
#[derive(Debug, Clone, Copy)]
pub struct AuthenticatedUser {
    pub id: Uuid,
}

impl FromRequest for AuthenticatedUser {
    type Error = Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        match req.extensions().get::<AuthenticatedUser>() {
            Some(user) => ready(Ok(*user)),
            None => ready(Err(ErrorUnauthorized("missing authenticated user"))),
        }
    }
}

/// The caller, if one signed in. Anonymous requests still get through.
#[derive(Debug, Clone, Copy)]
pub struct OptionalUser(pub Option<Uuid>);

impl FromRequest for OptionalUser {
    type Error = Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        let user = req.extensions().get::<AuthenticatedUser>().map(|u| u.id);
        ready(Ok(OptionalUser(user)))
    }
}

/// Outcome of reading the `Authorization` header.
#[derive(Debug, PartialEq, Eq)]
pub enum BearerToken {
    Missing,
    Valid(Uuid),
    Invalid,
}

pub fn extract_user_from_header(header: Option<&str>, keys: &JwtKeys) -> BearerToken {
    let Some(header) = header else {
        return BearerToken::Missing;
    };
    match header.strip_prefix("Bearer ").and_then(|t| keys.subject(t.trim())) {
        Some(id) => BearerToken::Valid(id),
        None => BearerToken::Invalid,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_bearer_header() {
        let keys = JwtKeys::new("secret".into(), 60);
        let id = Uuid::new_v4();
        let token = keys.generate_token(id).unwrap();
        assert_eq!(
            extract_user_from_header(Some(&format!("Bearer {token}")), &keys),
            BearerToken::Valid(id)
        );
        assert_eq!(extract_user_from_header(None, &keys), BearerToken::Missing);
        assert_eq!(
            extract_user_from_header(Some(&token), &keys),
            BearerToken::Invalid
        );
        assert_eq!(
            extract_user_from_header(Some("Bearer nope"), &keys),
            BearerToken::Invalid
        );
    }
}
