//! Password handling, session bookkeeping and the per-endpoint capability
//! check.

use std::marker::PhantomData;

use actix_identity::{Identity, IdentityExt};
use actix_session::SessionExt;
use actix_web::{dev::Payload, web::Data, FromRequest, HttpMessage, HttpRequest};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use futures::future::LocalBoxFuture;

use crate::{
    db,
    errors::AppError,
    models::{Role, User},
    AppState,
};

const ROLE_KEY: &str = "role";
const MIN_PASSWORD_LEN: usize = 8;
const MAX_PASSWORD_LEN: usize = 128;

pub fn hash_password(password: &str) -> Result<String, AppError> {
    Argon2::default()
        .hash_password(password.as_bytes(), &SaltString::generate(&mut OsRng))
        .map(|hash| hash.to_string())
        .map_err(|e| {
            log::error!("Failed to hash password: {}", e);
            AppError::PasswordError(e.to_string())
        })
}

pub fn verify_password(provided: &str, stored_hash: &str) -> bool {
    match PasswordHash::new(stored_hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(provided.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            log::warn!("Stored password hash is unreadable: {}", e);
            false
        }
    }
}

pub fn validate_password(password: &str) -> Result<(), AppError> {
    let len = password.chars().count();
    if len < MIN_PASSWORD_LEN {
        return Err(AppError::validation(format!(
            "Password must be at least {} characters long",
            MIN_PASSWORD_LEN
        )));
    }
    if len > MAX_PASSWORD_LEN {
        return Err(AppError::validation(format!(
            "Password must be at most {} characters long",
            MAX_PASSWORD_LEN
        )));
    }
    if !password.chars().any(|c| c.is_ascii_digit()) || !password.chars().any(char::is_alphabetic)
    {
        return Err(AppError::validation(
            "Password must contain at least one number and one letter",
        ));
    }
    Ok(())
}

/// Trims and lowercases an email address, rejecting obviously malformed ones.
pub fn normalize_email(email: &str) -> Result<String, AppError> {
    let email = email.trim().to_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(email),
        _ => Err(AppError::validation("Invalid email address")),
    }
}

/// Logs the user in: the identity carries the user id, the session caches
/// the role, which never changes for a user.
pub fn start_session(request: &HttpRequest, user: &User) -> Result<(), AppError> {
    Identity::login(&request.extensions(), user.id.to_string())
        .map_err(|e| AppError::IdentityError(e.to_string()))?;
    request
        .get_session()
        .insert(ROLE_KEY, user.role)
        .map_err(|e| AppError::IdentityError(e.to_string()))?;
    Ok(())
}

/// A set of roles allowed to call an endpoint.
pub trait Capability {
    const NAME: &'static str;
    fn permits(role: Role) -> bool;
}

#[derive(Debug)]
pub struct Resident;
#[derive(Debug)]
pub struct Operator;
#[derive(Debug)]
pub struct Administrator;
#[derive(Debug)]
pub struct AnyRole;

impl Capability for Resident {
    const NAME: &'static str = "Resident";
    fn permits(role: Role) -> bool {
        role == Role::User
    }
}

impl Capability for Operator {
    const NAME: &'static str = "TPS";
    fn permits(role: Role) -> bool {
        role == Role::Tps
    }
}

impl Capability for Administrator {
    const NAME: &'static str = "Admin";
    fn permits(role: Role) -> bool {
        role == Role::Admin
    }
}

impl Capability for AnyRole {
    const NAME: &'static str = "Authenticated";
    fn permits(_: Role) -> bool {
        true
    }
}

/// Extractor proving the caller is logged in with a role allowed by `C`.
#[derive(Debug)]
pub struct Authorized<C> {
    pub user_id: i64,
    pub role: Role,
    _capability: PhantomData<C>,
}

impl<C: Capability> Authorized<C> {
    /// The user id and role recorded in the session cookie.
    fn session_user(req: &HttpRequest) -> Result<(i64, Role), AppError> {
        let identity = req
            .get_identity()
            .map_err(|_| AppError::unauthorized("Login required"))?;
        let user_id = identity
            .id()
            .ok()
            .and_then(|id| id.parse::<i64>().ok())
            .ok_or_else(|| AppError::unauthorized("Invalid session"))?;
        let role = req
            .get_session()
            .get::<Role>(ROLE_KEY)
            .map_err(|e| AppError::IdentityError(e.to_string()))?
            .ok_or_else(|| AppError::unauthorized("Invalid session"))?;
        Ok((user_id, role))
    }

    fn grant(user_id: i64, role: Role) -> Result<Self, AppError> {
        if !C::permits(role) {
            log::warn!(
                "User {} with role {} denied {} endpoint",
                user_id,
                role.as_str(),
                C::NAME
            );
            return Err(AppError::forbidden(format!("{} access required", C::NAME)));
        }

        Ok(Self {
            user_id,
            role,
            _capability: PhantomData,
        })
    }
}

/// Cookies outlive accounts, so the user row is looked up on every request.
impl<C: Capability + 'static> FromRequest for Authorized<C> {
    type Error = AppError;
    type Future = LocalBoxFuture<'static, Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        let session = Self::session_user(req);
        let state = req.app_data::<Data<AppState>>().cloned();

        Box::pin(async move {
            let (user_id, role) = session?;
            let state = state
                .ok_or_else(|| AppError::IdentityError("application state is not registered".into()))?;
            if !db::users::user_exists(&state, user_id).await? {
                log::warn!("Rejected session of deleted user {}", user_id);
                return Err(AppError::unauthorized("Account no longer exists"));
            }
            Self::grant(user_id, role)
        })
    }
}
