use std::sync::Arc;

use tracing::{info, instrument};
use uuid::Uuid;

use crate::data::user_repository::UserRepository;
use crate::domain::{
    error::DomainError,
    user::{User, UserInfo},
};
use crate::infrastructure::security::{JwtKeys, hash_password, verify_password};

const PASSWORD_MIN_CHARS: usize = 6;
const NICKNAME_CHARS: std::ops::RangeInclusive<usize> = 2..=20;

/// A freshly issued access token and the account it belongs to.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub access_token: String,
    pub expires_in: i64,
    pub user: UserInfo,
}

#[derive(Clone)]
pub struct AuthService<R: UserRepository + 'static> {
    repo: Arc<R>,
    keys: JwtKeys,
}

impl<R> AuthService<R>
where
    R: UserRepository + 'static,
{
    pub fn new(repo: Arc<R>, keys: JwtKeys) -> Self {
        Self { repo, keys }
    }

    pub fn keys(&self) -> &JwtKeys {
        &self.keys
    }

    pub async fn get_user(&self, id: Uuid) -> Result<User, DomainError> {
        self.repo
            .find_by_id(id)
            .await?
            .ok_or(DomainError::UserNotFound(id))
    }

    #[instrument(skip(self, password))]
    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        nickname: &str,
    ) -> Result<IssuedToken, DomainError> {
        let email = normalize_email(email)?;
        if password.chars().count() < PASSWORD_MIN_CHARS {
            return Err(DomainError::BadRequest(format!(
                "password must be at least {PASSWORD_MIN_CHARS} characters"
            )));
        }
        let nickname = nickname.trim();
        if !NICKNAME_CHARS.contains(&nickname.chars().count()) {
            return Err(DomainError::BadRequest(
                "nickname must be 2 to 20 characters".into(),
            ));
        }

        let hash =
            hash_password(password).map_err(|err| DomainError::Internal(err.to_string()))?;
        let user = self.repo.create(User::new(email, hash), nickname).await?;
        info!(user_id = %user.id, "user signed up");
        self.issue(&user)
    }

    #[instrument(skip(self, password))]
    pub async fn login(&self, email: &str, password: &str) -> Result<IssuedToken, DomainError> {
        let user = self
            .repo
            .find_by_email(&email.trim().to_lowercase())
            .await?
            .ok_or(DomainError::Unauthorized)?;

        let valid = verify_password(password, &user.password_hash)
            .map_err(|_| DomainError::Unauthorized)?;
        if !valid {
            return Err(DomainError::Unauthorized);
        }

        info!(user_id = %user.id, "user logged in");
        self.issue(&user)
    }

    /// Issues a new token for an already authenticated caller.
    #[instrument(skip(self))]
    pub async fn refresh(&self, user_id: Uuid) -> Result<IssuedToken, DomainError> {
        let user = self
            .repo
            .find_by_id(user_id)
            .await?
            .ok_or(DomainError::Unauthorized)?;
        self.issue(&user)
    }

    fn issue(&self, user: &User) -> Result<IssuedToken, DomainError> {
        let access_token = self
            .keys
            .generate_token(user.id)
            .map_err(|err| DomainError::Internal(err.to_string()))?;
        Ok(IssuedToken {
            access_token,
            expires_in: self.keys.ttl_secs(),
            user: UserInfo::from(user),
        })
    }
}

fn normalize_email(email: &str) -> Result<String, DomainError> {
    let email = email.trim().to_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(email),
        _ => Err(DomainError::BadRequest("invalid email address".into())),
    }
}
