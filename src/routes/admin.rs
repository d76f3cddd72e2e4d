use actix_web::{
    delete, get, post, put,
    web::{self, Bytes, Data, Json, Path, Query},
    Responder,
};
use serde::Deserialize;

use crate::{
    auth::{self, Administrator, Authorized},
    db::{
        self,
        tps::LocationInput,
        users::{NewTpsProfile, NewUser, UserUpdate},
    },
    errors::AppError,
    import,
    models::Role,
    response, AppState,
};

#[derive(Debug, Deserialize)]
pub struct RoleFilter {
    pub role: Option<Role>,
}

#[derive(Debug, Deserialize)]
pub struct CreateUser {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub phone: String,
    pub password: String,
    pub role: Role,
    pub tps_location_id: Option<i64>,
    pub capacity: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct EditUser {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub password: Option<String>,
    pub role: Option<Role>,
}

#[get("/api/admin/users")]
pub async fn list_users(
    _auth: Authorized<Administrator>,
    state: Data<AppState>,
    Query(filter): Query<RoleFilter>,
) -> Result<impl Responder, AppError> {
    Ok(response::ok(
        db::users::get_all_users(&state, filter.role).await?,
    ))
}

#[post("/api/admin/users")]
pub async fn create_user(
    _auth: Authorized<Administrator>,
    state: Data<AppState>,
    Json(form): Json<CreateUser>,
) -> Result<impl Responder, AppError> {
    if form.name.trim().is_empty() {
        return Err(AppError::validation("Name is required"));
    }
    let email = auth::normalize_email(&form.email)?;
    auth::validate_password(&form.password)?;

    let tps = match (form.role, form.tps_location_id) {
        (Role::Tps, Some(location_id)) => {
            let location = db::tps::get_location(&state, location_id).await?;
            Some(NewTpsProfile {
                location_id: Some(location.id),
                tps_name: location.name,
                address: location.address,
                latitude: Some(location.latitude),
                longitude: Some(location.longitude),
                operating_hours: location.operating_hours,
                capacity: form.capacity,
            })
        }
        (Role::Tps, None) => Some(NewTpsProfile {
            tps_name: form.name.trim().to_string(),
            capacity: form.capacity,
            ..NewTpsProfile::default()
        }),
        (_, Some(_)) => {
            return Err(AppError::validation(
                "Only TPS users can be linked to a TPS location",
            ))
        }
        (_, None) => None,
    };

    let user = db::users::create_user(
        &state,
        NewUser {
            name: form.name.trim().to_string(),
            email,
            phone: form.phone.trim().to_string(),
            password: form.password,
            role: form.role,
            tps,
        },
    )
    .await?;
    Ok(response::created(user, "User created"))
}

/// Role is fixed at creation: an edit naming a different role is rejected
/// as a whole.
#[put("/api/admin/users/{id}")]
pub async fn edit_user(
    _auth: Authorized<Administrator>,
    state: Data<AppState>,
    id: Path<i64>,
    Json(form): Json<EditUser>,
) -> Result<impl Responder, AppError> {
    let id = id.into_inner();
    let current = db::users::get_user_by_id(&state, id).await?;
    if form.role.is_some_and(|role| role != current.role) {
        return Err(AppError::validation("User role cannot be changed"));
    }
    if form.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
        return Err(AppError::validation("Name cannot be empty"));
    }
    let email = form
        .email
        .as_deref()
        .map(auth::normalize_email)
        .transpose()?;
    if let Some(password) = &form.password {
        auth::validate_password(password)?;
    }

    let user = db::users::update_user(
        &state,
        id,
        UserUpdate {
            name: form.name.map(|n| n.trim().to_string()),
            email,
            phone: form.phone.map(|p| p.trim().to_string()),
            password: form.password,
        },
    )
    .await?;
    Ok(response::ok_with(user, "User updated"))
}

#[delete("/api/admin/users/{id}")]
pub async fn delete_user(
    auth: Authorized<Administrator>,
    state: Data<AppState>,
    id: Path<i64>,
) -> Result<impl Responder, AppError> {
    let id = id.into_inner();
    if id == auth.user_id {
        return Err(AppError::validation("You cannot delete your own account"));
    }
    db::users::delete_user(&state, id).await?;
    Ok(response::ok_with((), "User deleted"))
}

#[post("/api/admin/users/import")]
pub async fn import_users(
    _auth: Authorized<Administrator>,
    state: Data<AppState>,
    body: Bytes,
) -> Result<impl Responder, AppError> {
    let report = import::import_users(&state, &body).await?;
    let message = format!(
        "{} user(s) imported, {} row(s) rejected",
        report.created.len(),
        report.errors.len()
    );
    Ok(response::ok_with(report, message))
}

#[get("/api/admin/users/template")]
pub async fn users_template(_auth: Authorized<Administrator>) -> Result<impl Responder, AppError> {
    Ok(response::csv_attachment(
        "template-import-users.csv",
        import::user_template()?,
    ))
}

#[get("/api/admin/users/export")]
pub async fn export_users(
    _auth: Authorized<Administrator>,
    state: Data<AppState>,
) -> Result<impl Responder, AppError> {
    let users = db::users::get_users_for_export(&state).await?;
    Ok(response::csv_attachment(
        "users.csv",
        import::export_users(&users)?,
    ))
}

#[post("/api/admin/tps-locations")]
pub async fn create_location(
    _auth: Authorized<Administrator>,
    state: Data<AppState>,
    Json(input): Json<LocationInput>,
) -> Result<impl Responder, AppError> {
    let location = db::tps::create_location(&state, input).await?;
    Ok(response::created(location, "TPS location created"))
}

#[put("/api/admin/tps-locations/{id}")]
pub async fn update_location(
    _auth: Authorized<Administrator>,
    state: Data<AppState>,
    id: Path<i64>,
    Json(input): Json<LocationInput>,
) -> Result<impl Responder, AppError> {
    let location = db::tps::update_location(&state, id.into_inner(), input).await?;
    Ok(response::ok_with(location, "TPS location updated"))
}

#[delete("/api/admin/tps-locations/{id}")]
pub async fn delete_location(
    _auth: Authorized<Administrator>,
    state: Data<AppState>,
    id: Path<i64>,
) -> Result<impl Responder, AppError> {
    db::tps::delete_location(&state, id.into_inner()).await?;
    Ok(response::ok_with((), "TPS location deleted"))
}

#[post("/api/admin/tps-locations/import")]
pub async fn import_locations(
    _auth: Authorized<Administrator>,
    state: Data<AppState>,
    body: Bytes,
) -> Result<impl Responder, AppError> {
    let report = import::import_locations(&state, &body).await?;
    let message = format!(
        "{} location(s) imported, {} row(s) rejected",
        report.created.len(),
        report.errors.len()
    );
    Ok(response::ok_with(report, message))
}

#[get("/api/admin/tps-locations/template")]
pub async fn locations_template(
    _auth: Authorized<Administrator>,
) -> Result<impl Responder, AppError> {
    Ok(response::csv_attachment(
        "template-import-tps.csv",
        import::location_template()?,
    ))
}

#[get("/api/admin/tps-locations/export")]
pub async fn export_locations(
    _auth: Authorized<Administrator>,
    state: Data<AppState>,
) -> Result<impl Responder, AppError> {
    let locations = db::tps::list_locations(&state).await?;
    Ok(response::csv_attachment(
        "tps-locations.csv",
        import::export_locations(&locations)?,
    ))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    // fixed paths before the {id} resources
    cfg.service(users_template)
        .service(export_users)
        .service(import_users)
        .service(list_users)
        .service(create_user)
        .service(edit_user)
        .service(delete_user)
        .service(locations_template)
        .service(export_locations)
        .service(import_locations)
        .service(create_location)
        .service(update_location)
        .service(delete_location);
}
