use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::{
    db::is_unique_violation,
    errors::AppError,
    models::{TpsLocation, TpsPrice, TpsProfile},
    pricing::valid_coordinates,
    AppState,
};

#[derive(Debug, Clone, Deserialize)]
pub struct LocationInput {
    pub name: String,
    #[serde(default)]
    pub district: String,
    #[serde(default)]
    pub address: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub operating_hours: String,
    #[serde(default)]
    pub phone: String,
}

impl LocationInput {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.name.trim().is_empty() {
            return Err(AppError::validation("TPS name is required"));
        }
        if !valid_coordinates(self.latitude, self.longitude) {
            return Err(AppError::validation("Latitude or longitude is out of range"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TpsProfileInput {
    pub tps_name: String,
    pub location_id: Option<i64>,
    #[serde(default)]
    pub address: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    #[serde(default)]
    pub operating_hours: String,
    pub capacity: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PriceInput {
    pub category: String,
    pub price_per_kg: f64,
}

/// A TPS account as listed to residents.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Operator {
    pub id: i64,
    pub name: String,
    pub phone: String,
    pub tps_name: Option<String>,
    pub address: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub operating_hours: Option<String>,
    pub capacity: Option<f64>,
    pub location_id: Option<i64>,
}

fn duplicate_location(e: sqlx::Error) -> AppError {
    if is_unique_violation(&e) {
        AppError::validation("A TPS location with this name already exists")
    } else {
        AppError::or_not_found("TPS location")(e)
    }
}

pub async fn list_locations(state: &AppState) -> Result<Vec<TpsLocation>, AppError> {
    let locations = sqlx::query_as::<_, TpsLocation>("SELECT * FROM tps_locations ORDER BY name")
        .fetch_all(&state.db_pool)
        .await?;
    Ok(locations)
}

pub async fn get_location(state: &AppState, id: i64) -> Result<TpsLocation, AppError> {
    sqlx::query_as::<_, TpsLocation>("SELECT * FROM tps_locations WHERE id = ?")
        .bind(id)
        .fetch_one(&state.db_pool)
        .await
        .map_err(AppError::or_not_found("TPS location"))
}

pub async fn find_location_by_name(
    state: &AppState,
    name: &str,
) -> Result<Option<TpsLocation>, AppError> {
    let location =
        sqlx::query_as::<_, TpsLocation>("SELECT * FROM tps_locations WHERE lower(name) = lower(?)")
            .bind(name.trim())
            .fetch_optional(&state.db_pool)
            .await?;
    Ok(location)
}

pub async fn create_location(state: &AppState, input: LocationInput) -> Result<TpsLocation, AppError> {
    input.validate()?;
    let now = Utc::now();
    let location = sqlx::query_as::<_, TpsLocation>(
        "INSERT INTO tps_locations (name, district, address, latitude, longitude, operating_hours, phone, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING *",
    )
    .bind(input.name.trim())
    .bind(input.district)
    .bind(input.address)
    .bind(input.latitude)
    .bind(input.longitude)
    .bind(input.operating_hours)
    .bind(input.phone)
    .bind(now)
    .bind(now)
    .fetch_one(&state.db_pool)
    .await
    .map_err(duplicate_location)?;
    log::info!("TPS location created: {} ({})", location.name, location.id);
    Ok(location)
}

pub async fn update_location(
    state: &AppState,
    id: i64,
    input: LocationInput,
) -> Result<TpsLocation, AppError> {
    input.validate()?;
    let location = sqlx::query_as::<_, TpsLocation>(
        "UPDATE tps_locations SET name = ?, district = ?, address = ?, latitude = ?, longitude = ?, operating_hours = ?, phone = ?, updated_at = ? WHERE id = ? RETURNING *",
    )
    .bind(input.name.trim())
    .bind(input.district)
    .bind(input.address)
    .bind(input.latitude)
    .bind(input.longitude)
    .bind(input.operating_hours)
    .bind(input.phone)
    .bind(Utc::now())
    .bind(id)
    .fetch_one(&state.db_pool)
    .await
    .map_err(duplicate_location)?;
    log::info!("TPS location updated: {}", location.id);
    Ok(location)
}

pub async fn delete_location(state: &AppState, id: i64) -> Result<(), AppError> {
    let result = sqlx::query("DELETE FROM tps_locations WHERE id = ?")
        .bind(id)
        .execute(&state.db_pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("TPS location"));
    }
    log::info!("TPS location with id {} deleted", id);
    Ok(())
}

/// Optional coordinates are set or left out as a pair.
pub fn check_coordinate_pair(latitude: Option<f64>, longitude: Option<f64>) -> Result<(), AppError> {
    match (latitude, longitude) {
        (Some(lat), Some(lon)) if !valid_coordinates(lat, lon) => {
            Err(AppError::validation("Latitude or longitude is out of range"))
        }
        (Some(_), None) | (None, Some(_)) => Err(AppError::validation(
            "Latitude and longitude must be given together",
        )),
        _ => Ok(()),
    }
}

pub async fn upsert_tps_profile(
    state: &AppState,
    user_id: i64,
    input: TpsProfileInput,
) -> Result<TpsProfile, AppError> {
    if input.tps_name.trim().is_empty() {
        return Err(AppError::validation("TPS name is required"));
    }
    check_coordinate_pair(input.latitude, input.longitude)?;
    if input.capacity.is_some_and(|c| c < 0.0) {
        return Err(AppError::validation("Capacity cannot be negative"));
    }
    if let Some(location_id) = input.location_id {
        get_location(state, location_id).await?;
    }

    let profile = sqlx::query_as::<_, TpsProfile>(
        "INSERT INTO tps_profiles (user_id, location_id, tps_name, address, latitude, longitude, operating_hours, capacity, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(user_id) DO UPDATE SET location_id = excluded.location_id, tps_name = excluded.tps_name, address = excluded.address, latitude = excluded.latitude, longitude = excluded.longitude, operating_hours = excluded.operating_hours, capacity = excluded.capacity, updated_at = excluded.updated_at
         RETURNING *",
    )
    .bind(user_id)
    .bind(input.location_id)
    .bind(input.tps_name.trim())
    .bind(input.address)
    .bind(input.latitude)
    .bind(input.longitude)
    .bind(input.operating_hours)
    .bind(input.capacity)
    .bind(Utc::now())
    .fetch_one(&state.db_pool)
    .await?;
    log::info!("TPS profile updated for user {}", user_id);
    Ok(profile)
}

pub async fn list_operators(state: &AppState) -> Result<Vec<Operator>, AppError> {
    let operators = sqlx::query_as::<_, Operator>(
        "SELECT u.id, u.name, u.phone, p.tps_name, p.address, p.latitude, p.longitude, p.operating_hours, p.capacity, p.location_id
         FROM users u LEFT JOIN tps_profiles p ON p.user_id = u.id
         WHERE u.role = 'TPS' ORDER BY u.id",
    )
    .fetch_all(&state.db_pool)
    .await?;
    Ok(operators)
}

pub async fn get_operator(state: &AppState, id: i64) -> Result<Operator, AppError> {
    sqlx::query_as::<_, Operator>(
        "SELECT u.id, u.name, u.phone, p.tps_name, p.address, p.latitude, p.longitude, p.operating_hours, p.capacity, p.location_id
         FROM users u LEFT JOIN tps_profiles p ON p.user_id = u.id
         WHERE u.role = 'TPS' AND u.id = ?",
    )
    .bind(id)
    .fetch_one(&state.db_pool)
    .await
    .map_err(AppError::or_not_found("TPS"))
}

pub async fn list_prices(state: &AppState, tps_id: i64) -> Result<Vec<TpsPrice>, AppError> {
    let prices =
        sqlx::query_as::<_, TpsPrice>("SELECT * FROM tps_prices WHERE tps_id = ? ORDER BY category")
            .bind(tps_id)
            .fetch_all(&state.db_pool)
            .await?;
    Ok(prices)
}

/// Replaces the whole price list of a TPS.
pub async fn replace_prices(
    state: &AppState,
    tps_id: i64,
    entries: Vec<PriceInput>,
) -> Result<Vec<TpsPrice>, AppError> {
    for entry in &entries {
        if entry.category.trim().is_empty() {
            return Err(AppError::validation("Waste category is required"));
        }
        if !entry.price_per_kg.is_finite() || entry.price_per_kg < 0.0 {
            return Err(AppError::validation(format!(
                "Price for '{}' must be a non-negative number",
                entry.category.trim()
            )));
        }
    }

    let now = Utc::now();
    let mut tx = state.db_pool.begin().await?;
    sqlx::query("DELETE FROM tps_prices WHERE tps_id = ?")
        .bind(tps_id)
        .execute(&mut *tx)
        .await?;
    for entry in &entries {
        sqlx::query(
            "INSERT INTO tps_prices (tps_id, category, price_per_kg, updated_at) VALUES (?, ?, ?, ?)",
        )
        .bind(tps_id)
        .bind(entry.category.trim())
        .bind(entry.price_per_kg)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AppError::validation(format!(
                    "Waste category '{}' is listed twice",
                    entry.category.trim()
                ))
            } else {
                AppError::DatabaseError(e)
            }
        })?;
    }
    tx.commit().await?;
    log::info!("Price list of TPS {} replaced ({} entries)", tps_id, entries.len());

    list_prices(state, tps_id).await
}
