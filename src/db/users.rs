use chrono::Utc;
use serde::Deserialize;

use crate::{
    auth::{hash_password, verify_password},
    db::is_unique_violation,
    errors::AppError,
    models::{ResidentProfile, Role, TpsProfile, User},
    AppState,
};

#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub password: String,
    pub role: Role,
    pub tps: Option<NewTpsProfile>,
}

#[derive(Debug, Clone, Default)]
pub struct NewTpsProfile {
    pub location_id: Option<i64>,
    pub tps_name: String,
    pub address: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub operating_hours: String,
    pub capacity: Option<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct UserUpdate {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResidentProfileInput {
    #[serde(default)]
    pub address: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub payment_handle: Option<String>,
}

fn duplicate_email(e: sqlx::Error) -> AppError {
    if is_unique_violation(&e) {
        AppError::validation("Email is already registered")
    } else {
        AppError::DatabaseError(e)
    }
}

pub async fn get_all_users(state: &AppState, role: Option<Role>) -> Result<Vec<User>, AppError> {
    let users = match role {
        Some(role) => {
            sqlx::query_as::<_, User>("SELECT * FROM users WHERE role = ? ORDER BY id")
                .bind(role)
                .fetch_all(&state.db_pool)
                .await?
        }
        None => {
            sqlx::query_as::<_, User>("SELECT * FROM users ORDER BY id")
                .fetch_all(&state.db_pool)
                .await?
        }
    };
    Ok(users)
}

pub async fn get_user_by_id(state: &AppState, id: i64) -> Result<User, AppError> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
        .bind(id)
        .fetch_one(&state.db_pool)
        .await
        .map_err(AppError::or_not_found("User"))
}

/// One user as written to the export file, which mirrors the import columns
/// minus the password.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserExport {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub role: Role,
    pub tps_name: Option<String>,
    pub capacity: Option<f64>,
}

pub async fn get_users_for_export(state: &AppState) -> Result<Vec<UserExport>, AppError> {
    let users = sqlx::query_as::<_, UserExport>(
        "SELECT u.name, u.email, u.phone, u.role, p.tps_name, p.capacity FROM users u LEFT JOIN tps_profiles p ON p.user_id = u.id ORDER BY u.id",
    )
    .fetch_all(&state.db_pool)
    .await?;
    Ok(users)
}

pub async fn user_exists(state: &AppState, id: i64) -> Result<bool, AppError> {
    let (exists,): (bool,) = sqlx::query_as("SELECT EXISTS(SELECT 1 FROM users WHERE id = ?)")
        .bind(id)
        .fetch_one(&state.db_pool)
        .await?;
    Ok(exists)
}

pub async fn find_user_by_email(state: &AppState, email: &str) -> Result<Option<User>, AppError> {
    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = ?")
        .bind(email)
        .fetch_optional(&state.db_pool)
        .await?;
    Ok(user)
}

/// Resolves login credentials to a user. Unknown emails and wrong passwords
/// produce the same error.
pub async fn authenticate(state: &AppState, email: &str, password: &str) -> Result<User, AppError> {
    let email = email.trim().to_lowercase();
    match find_user_by_email(state, &email).await? {
        Some(user) if verify_password(password, &user.pwd_hash) => {
            log::info!("User {} logged in", user.id);
            Ok(user)
        }
        _ => {
            log::warn!("Failed login attempt for {}", email);
            Err(AppError::unauthorized("Invalid credentials"))
        }
    }
}

/// Inserts the user and the profile row matching its role in one transaction.
pub async fn create_user(state: &AppState, new: NewUser) -> Result<User, AppError> {
    let pwd_hash = hash_password(&new.password)?;
    let now = Utc::now();
    let mut tx = state.db_pool.begin().await?;

    let user = sqlx::query_as::<_, User>(
        "INSERT INTO users (name, email, phone, pwd_hash, role, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?) RETURNING *",
    )
    .bind(&new.name)
    .bind(&new.email)
    .bind(&new.phone)
    .bind(pwd_hash)
    .bind(new.role)
    .bind(now)
    .bind(now)
    .fetch_one(&mut *tx)
    .await
    .map_err(duplicate_email)?;

    match new.role {
        Role::Tps => {
            let profile = new.tps.unwrap_or_else(|| NewTpsProfile {
                tps_name: new.name.clone(),
                ..NewTpsProfile::default()
            });
            sqlx::query(
                "INSERT INTO tps_profiles (user_id, location_id, tps_name, address, latitude, longitude, operating_hours, capacity, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(user.id)
            .bind(profile.location_id)
            .bind(profile.tps_name)
            .bind(profile.address)
            .bind(profile.latitude)
            .bind(profile.longitude)
            .bind(profile.operating_hours)
            .bind(profile.capacity)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }
        Role::User => {
            sqlx::query("INSERT INTO resident_profiles (user_id, updated_at) VALUES (?, ?)")
                .bind(user.id)
                .bind(now)
                .execute(&mut *tx)
                .await?;
        }
        Role::Admin => {}
    }

    tx.commit().await?;
    log::info!("User created: {} ({})", user.id, user.role.as_str());
    Ok(user)
}

pub async fn update_user(state: &AppState, id: i64, update: UserUpdate) -> Result<User, AppError> {
    // Bind parameters follow the order the SET clauses are appended in.
    let mut query = String::from("UPDATE users SET updated_at = ?");
    let updated_at = Utc::now();

    if update.name.is_some() {
        query.push_str(", name = ?");
    }
    if update.email.is_some() {
        query.push_str(", email = ?");
    }
    if update.phone.is_some() {
        query.push_str(", phone = ?");
    }
    let pwd_hash = match &update.password {
        Some(password) => {
            query.push_str(", pwd_hash = ?");
            Some(hash_password(password)?)
        }
        None => None,
    };
    query.push_str(" WHERE id = ? RETURNING *");

    let mut q = sqlx::query_as::<_, User>(&query).bind(updated_at);
    if let Some(name) = &update.name {
        q = q.bind(name);
    }
    if let Some(email) = &update.email {
        q = q.bind(email);
    }
    if let Some(phone) = &update.phone {
        q = q.bind(phone);
    }
    if let Some(pwd_hash) = &pwd_hash {
        q = q.bind(pwd_hash);
    }
    q = q.bind(id);

    let user = q
        .fetch_one(&state.db_pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => AppError::NotFound("User"),
            other => duplicate_email(other),
        })?;

    log::info!("User updated: {}", user.id);
    Ok(user)
}

/// Users that appear on pickups or transactions keep their history and
/// cannot be deleted.
pub async fn delete_user(state: &AppState, id: i64) -> Result<(), AppError> {
    let (history,): (i64,) = sqlx::query_as(
        "SELECT (SELECT COUNT(*) FROM pickup_requests WHERE requester_id = ?1 OR tps_id = ?1) + (SELECT COUNT(*) FROM transactions WHERE user_id = ?1 OR tps_id = ?1)",
    )
    .bind(id)
    .fetch_one(&state.db_pool)
    .await?;
    if history > 0 {
        return Err(AppError::validation(
            "User has pickup history and cannot be deleted",
        ));
    }

    let result = sqlx::query("DELETE FROM users WHERE id = ?")
        .bind(id)
        .execute(&state.db_pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("User"));
    }
    log::info!("User with id {} deleted", id);
    Ok(())
}

pub async fn get_resident_profile(
    state: &AppState,
    user_id: i64,
) -> Result<Option<ResidentProfile>, AppError> {
    let profile =
        sqlx::query_as::<_, ResidentProfile>("SELECT * FROM resident_profiles WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&state.db_pool)
            .await?;
    Ok(profile)
}

pub async fn upsert_resident_profile(
    state: &AppState,
    user_id: i64,
    input: ResidentProfileInput,
) -> Result<ResidentProfile, AppError> {
    let profile = sqlx::query_as::<_, ResidentProfile>(
        "INSERT INTO resident_profiles (user_id, address, latitude, longitude, payment_handle, updated_at) VALUES (?, ?, ?, ?, ?, ?)
         ON CONFLICT(user_id) DO UPDATE SET address = excluded.address, latitude = excluded.latitude, longitude = excluded.longitude, payment_handle = excluded.payment_handle, updated_at = excluded.updated_at
         RETURNING *",
    )
    .bind(user_id)
    .bind(input.address)
    .bind(input.latitude)
    .bind(input.longitude)
    .bind(input.payment_handle)
    .bind(Utc::now())
    .fetch_one(&state.db_pool)
    .await?;
    Ok(profile)
}

pub async fn get_tps_profile(state: &AppState, user_id: i64) -> Result<Option<TpsProfile>, AppError> {
    let profile = sqlx::query_as::<_, TpsProfile>("SELECT * FROM tps_profiles WHERE user_id = ?")
        .bind(user_id)
        .fetch_optional(&state.db_pool)
        .await?;
    Ok(profile)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connect_in_memory;

    fn resident(email: &str) -> NewUser {
        NewUser {
            name: "Siti".into(),
            email: email.into(),
            phone: "0812".into(),
            password: "sampah123".into(),
            role: Role::User,
            tps: None,
        }
    }

    #[actix_web::test]
    async fn create_and_authenticate() {
        let state = AppState {
            db_pool: connect_in_memory().await,
        };
        let user = create_user(&state, resident("siti@example.com")).await.unwrap();
        assert_eq!(user.role, Role::User);
        assert!(get_resident_profile(&state, user.id).await.unwrap().is_some());

        let logged_in = authenticate(&state, "SITI@example.com", "sampah123")
            .await
            .unwrap();
        assert_eq!(logged_in.id, user.id);
        assert!(matches!(
            authenticate(&state, "siti@example.com", "wrong-pass1").await,
            Err(AppError::Unauthorized(_))
        ));
    }

    #[actix_web::test]
    async fn duplicate_email_is_a_validation_error() {
        let state = AppState {
            db_pool: connect_in_memory().await,
        };
        create_user(&state, resident("dup@example.com")).await.unwrap();
        let err = create_user(&state, resident("dup@example.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[actix_web::test]
    async fn tps_users_get_a_default_profile() {
        let state = AppState {
            db_pool: connect_in_memory().await,
        };
        let mut new = resident("tps@example.com");
        new.role = Role::Tps;
        new.name = "TPS Melati".into();
        let user = create_user(&state, new).await.unwrap();
        let profile = get_tps_profile(&state, user.id).await.unwrap().unwrap();
        assert_eq!(profile.tps_name, "TPS Melati");
        assert!(get_resident_profile(&state, user.id).await.unwrap().is_none());
    }

    #[actix_web::test]
    async fn partial_update_keeps_other_fields() {
        let state = AppState {
            db_pool: connect_in_memory().await,
        };
        let user = create_user(&state, resident("upd@example.com")).await.unwrap();
        let updated = update_user(
            &state,
            user.id,
            UserUpdate {
                phone: Some("0899".into()),
                ..UserUpdate::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(updated.phone, "0899");
        assert_eq!(updated.name, "Siti");
        assert_eq!(updated.pwd_hash, user.pwd_hash);

        assert!(matches!(
            update_user(&state, 999, UserUpdate::default()).await,
            Err(AppError::NotFound("User"))
        ));
    }
}
