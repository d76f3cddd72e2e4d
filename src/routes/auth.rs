use actix_identity::Identity;
use actix_web::{
    get, post, put,
    web::{self, Data, Json},
    HttpRequest, Responder,
};
use serde::{Deserialize, Serialize};

use crate::{
    auth::{self, AnyRole, Authorized},
    db::{
        self,
        users::{NewUser, ResidentProfileInput, UserUpdate},
    },
    errors::AppError,
    models::{ResidentProfile, Role, TpsProfile, User},
    response, AppState,
};

#[derive(Debug, Deserialize)]
pub struct Register {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub phone: String,
    pub password: String,
    pub password2: String,
}

#[derive(Debug, Deserialize)]
pub struct Login {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct ChangePassword {
    pub old_password: String,
    pub password: String,
    pub password2: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub payment_handle: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct Me {
    #[serde(flatten)]
    pub user: User,
    pub resident_profile: Option<ResidentProfile>,
    pub tps_profile: Option<TpsProfile>,
    pub unread_notifications: i64,
}

/// Self-registration always creates a resident account.
pub async fn register_resident(state: &AppState, form: Register) -> Result<User, AppError> {
    if form.name.trim().is_empty() || form.email.trim().is_empty() || form.password.is_empty() {
        return Err(AppError::validation("Name, email and password are required"));
    }
    if form.password != form.password2 {
        return Err(AppError::validation("Passwords do not match"));
    }
    auth::validate_password(&form.password)?;
    let email = auth::normalize_email(&form.email)?;

    db::users::create_user(
        state,
        NewUser {
            name: form.name.trim().to_string(),
            email,
            phone: form.phone.trim().to_string(),
            password: form.password,
            role: Role::User,
            tps: None,
        },
    )
    .await
}

pub async fn change_password(
    state: &AppState,
    user_id: i64,
    form: ChangePassword,
) -> Result<(), AppError> {
    if form.password != form.password2 {
        return Err(AppError::validation("Passwords do not match"));
    }
    auth::validate_password(&form.password)?;
    let user = db::users::get_user_by_id(state, user_id).await?;
    if !auth::verify_password(&form.old_password, &user.pwd_hash) {
        log::warn!("Old password verification failed for user ID: {}", user.id);
        return Err(AppError::unauthorized("Old password is incorrect"));
    }
    db::users::update_user(
        state,
        user.id,
        UserUpdate {
            password: Some(form.password),
            ..UserUpdate::default()
        },
    )
    .await?;
    log::info!("Password changed successfully for user ID: {}", user.id);
    Ok(())
}

async fn load_me(state: &AppState, user: User) -> Result<Me, AppError> {
    let resident_profile = match user.role {
        Role::User => db::users::get_resident_profile(state, user.id).await?,
        _ => None,
    };
    let tps_profile = match user.role {
        Role::Tps => db::users::get_tps_profile(state, user.id).await?,
        _ => None,
    };
    let unread_notifications = db::notifications::unread_count(state, user.id).await?;
    Ok(Me {
        user,
        resident_profile,
        tps_profile,
        unread_notifications,
    })
}

#[post("/api/auth/register")]
pub async fn register_api(
    Json(form): Json<Register>,
    state: Data<AppState>,
    request: HttpRequest,
) -> Result<impl Responder, AppError> {
    let user = register_resident(&state, form).await?;
    auth::start_session(&request, &user)?;
    Ok(response::created(user, "User registered successfully"))
}

#[post("/api/auth/login")]
pub async fn login_api(
    Json(form): Json<Login>,
    state: Data<AppState>,
    request: HttpRequest,
) -> Result<impl Responder, AppError> {
    if form.email.trim().is_empty() || form.password.is_empty() {
        return Err(AppError::validation("All fields are required"));
    }
    let user = db::users::authenticate(&state, &form.email, &form.password).await?;
    auth::start_session(&request, &user)?;
    Ok(response::ok_with(user, "Login successful"))
}

#[post("/api/auth/logout")]
pub async fn logout_api(identity: Option<Identity>) -> impl Responder {
    if let Some(identity) = identity {
        identity.logout();
    }
    response::ok_with((), "Logged out")
}

#[get("/api/auth/me")]
pub async fn me_api(
    auth: Authorized<AnyRole>,
    state: Data<AppState>,
) -> Result<impl Responder, AppError> {
    let user = db::users::get_user_by_id(&state, auth.user_id).await?;
    Ok(response::ok(load_me(&state, user).await?))
}

#[get("/api/profile")]
pub async fn get_profile(
    auth: Authorized<AnyRole>,
    state: Data<AppState>,
) -> Result<impl Responder, AppError> {
    let user = db::users::get_user_by_id(&state, auth.user_id).await?;
    Ok(response::ok(load_me(&state, user).await?))
}

#[put("/api/profile")]
pub async fn update_profile(
    auth: Authorized<AnyRole>,
    state: Data<AppState>,
    Json(update): Json<ProfileUpdate>,
) -> Result<impl Responder, AppError> {
    if update.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
        return Err(AppError::validation("Name cannot be empty"));
    }
    let resident_fields = update.address.is_some()
        || update.latitude.is_some()
        || update.longitude.is_some()
        || update.payment_handle.is_some();
    if resident_fields && auth.role != Role::User {
        return Err(AppError::validation(
            "Address and payment details belong to resident accounts",
        ));
    }
    db::tps::check_coordinate_pair(update.latitude, update.longitude)?;

    let user = db::users::update_user(
        &state,
        auth.user_id,
        UserUpdate {
            name: update.name.map(|n| n.trim().to_string()),
            phone: update.phone.map(|p| p.trim().to_string()),
            ..UserUpdate::default()
        },
    )
    .await?;

    if resident_fields {
        let current = db::users::get_resident_profile(&state, user.id).await?;
        let latitude = update
            .latitude
            .or_else(|| current.as_ref().and_then(|p| p.latitude));
        let longitude = update
            .longitude
            .or_else(|| current.as_ref().and_then(|p| p.longitude));
        let input = ResidentProfileInput {
            address: update
                .address
                .or_else(|| current.as_ref().map(|p| p.address.clone()))
                .unwrap_or_default(),
            latitude,
            longitude,
            payment_handle: update
                .payment_handle
                .or_else(|| current.and_then(|p| p.payment_handle)),
        };
        db::users::upsert_resident_profile(&state, user.id, input).await?;
    }

    Ok(response::ok_with(load_me(&state, user).await?, "Profile updated"))
}

#[post("/api/profile/password")]
pub async fn change_password_api(
    auth: Authorized<AnyRole>,
    state: Data<AppState>,
    Json(form): Json<ChangePassword>,
) -> Result<impl Responder, AppError> {
    change_password(&state, auth.user_id, form).await?;
    Ok(response::ok_with((), "Password changed"))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(register_api)
        .service(login_api)
        .service(logout_api)
        .service(me_api)
        .service(get_profile)
        .service(update_profile)
        .service(change_password_api);
}
