use chrono::{DateTime, Utc};
use serde::Deserialize;
use sqlx::SqliteConnection;

use crate::{
    db::{begin_write, is_unique_violation, notifications::notify, tps, Viewer},
    errors::AppError,
    lifecycle::{self, PickupStatus, Weighing},
    models::{PickupDetail, PickupKind, PickupRequest, TpsPrice, TpsProfile, Transaction, WasteItem},
    pricing::{distance_modifier, valid_coordinates},
    AppState,
};

#[derive(Debug, Clone, Deserialize)]
pub struct NewWasteItem {
    pub category: String,
    pub estimated_weight: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewPickup {
    #[serde(default)]
    pub kind: PickupKind,
    pub tps_id: Option<i64>,
    pub address: String,
    pub latitude: f64,
    pub longitude: f64,
    pub scheduled_at: DateTime<Utc>,
    pub notes: Option<String>,
    pub items: Vec<NewWasteItem>,
}

impl NewPickup {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.address.trim().is_empty() {
            return Err(AppError::validation("Address is required"));
        }
        if !valid_coordinates(self.latitude, self.longitude) {
            return Err(AppError::validation("Latitude or longitude is out of range"));
        }
        if self.items.is_empty() {
            return Err(AppError::validation("At least one waste item is required"));
        }
        for item in &self.items {
            if item.category.trim().is_empty() {
                return Err(AppError::validation("Waste category is required"));
            }
            if !item.estimated_weight.is_finite() || item.estimated_weight <= 0.0 {
                return Err(AppError::validation(format!(
                    "Estimated weight of '{}' must be greater than zero",
                    item.category.trim()
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusUpdate {
    pub status: PickupStatus,
    #[serde(default)]
    pub items: Vec<Weighing>,
}

/// Residents see their own pickups, a TPS sees its assigned pickups plus the
/// open pool of unassigned pending ones, admins see everything.
pub fn visible_to(pickup: &PickupRequest, viewer: Viewer) -> bool {
    match viewer {
        Viewer::Resident(id) => pickup.requester_id == id,
        Viewer::Operator(id) => match pickup.tps_id {
            Some(tps_id) => tps_id == id,
            None => pickup.status == PickupStatus::Pending,
        },
        Viewer::Admin => true,
    }
}

async fn fetch_pickup(conn: &mut SqliteConnection, id: i64) -> Result<PickupRequest, AppError> {
    sqlx::query_as::<_, PickupRequest>("SELECT * FROM pickup_requests WHERE id = ?")
        .bind(id)
        .fetch_one(conn)
        .await
        .map_err(AppError::or_not_found("Pickup"))
}

async fn fetch_items(conn: &mut SqliteConnection, pickup_id: i64) -> Result<Vec<WasteItem>, sqlx::Error> {
    sqlx::query_as::<_, WasteItem>("SELECT * FROM waste_items WHERE pickup_id = ? ORDER BY id")
        .bind(pickup_id)
        .fetch_all(conn)
        .await
}

pub async fn get_pickup_detail(state: &AppState, id: i64) -> Result<PickupDetail, AppError> {
    let mut conn = state.db_pool.acquire().await?;
    let pickup = fetch_pickup(&mut conn, id).await?;
    let items = fetch_items(&mut conn, id).await?;
    let transaction =
        sqlx::query_as::<_, Transaction>("SELECT * FROM transactions WHERE pickup_id = ?")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;
    Ok(PickupDetail {
        pickup,
        items,
        transaction,
    })
}

pub async fn list_pickups(
    state: &AppState,
    viewer: Viewer,
    status: Option<PickupStatus>,
) -> Result<Vec<PickupRequest>, AppError> {
    let mut query = String::from("SELECT * FROM pickup_requests WHERE 1 = 1");
    let owner = match viewer {
        Viewer::Resident(id) => {
            query.push_str(" AND requester_id = ?");
            Some(id)
        }
        Viewer::Operator(id) => {
            query.push_str(" AND (tps_id = ? OR (tps_id IS NULL AND status = 'PENDING'))");
            Some(id)
        }
        Viewer::Admin => None,
    };
    if status.is_some() {
        query.push_str(" AND status = ?");
    }
    query.push_str(" ORDER BY created_at DESC, id DESC");

    let mut q = sqlx::query_as::<_, PickupRequest>(&query);
    if let Some(owner) = owner {
        q = q.bind(owner);
    }
    if let Some(status) = status {
        q = q.bind(status);
    }
    Ok(q.fetch_all(&state.db_pool).await?)
}

/// Creates the pickup and its waste items atomically.
pub async fn create_pickup(
    state: &AppState,
    requester_id: i64,
    new: NewPickup,
) -> Result<PickupDetail, AppError> {
    new.validate()?;
    if let Some(tps_id) = new.tps_id {
        tps::get_operator(state, tps_id)
            .await
            .map_err(|e| match e {
                AppError::NotFound(_) => AppError::validation("Selected TPS does not exist"),
                other => other,
            })?;
    }

    let now = Utc::now();
    let mut tx = state.db_pool.begin().await?;
    let pickup = sqlx::query_as::<_, PickupRequest>(
        "INSERT INTO pickup_requests (requester_id, tps_id, kind, address, latitude, longitude, scheduled_at, notes, status, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING *",
    )
    .bind(requester_id)
    .bind(new.tps_id)
    .bind(new.kind)
    .bind(new.address.trim())
    .bind(new.latitude)
    .bind(new.longitude)
    .bind(new.scheduled_at)
    .bind(new.notes)
    .bind(PickupStatus::Pending)
    .bind(now)
    .bind(now)
    .fetch_one(&mut *tx)
    .await?;

    for item in &new.items {
        sqlx::query("INSERT INTO waste_items (pickup_id, category, estimated_weight) VALUES (?, ?, ?)")
            .bind(pickup.id)
            .bind(item.category.trim())
            .bind(item.estimated_weight)
            .execute(&mut *tx)
            .await?;
    }

    if let Some(tps_id) = pickup.tps_id {
        notify(
            &mut tx,
            tps_id,
            "New pickup request",
            &format!("Pickup #{} is waiting for your confirmation", pickup.id),
        )
        .await?;
    }

    tx.commit().await?;
    log::info!("Pickup {} created by user {}", pickup.id, requester_id);
    get_pickup_detail(state, pickup.id).await
}

/// Hard-deletes a pending pickup on behalf of the resident who created it.
pub async fn cancel_pickup(state: &AppState, requester_id: i64, id: i64) -> Result<(), AppError> {
    let mut tx = begin_write(&state.db_pool).await?;
    let pickup = fetch_pickup(&mut tx, id).await?;
    if pickup.requester_id != requester_id {
        return Err(AppError::forbidden("Only the requester can cancel this pickup"));
    }
    lifecycle::check_resident_cancel(pickup.status)?;

    sqlx::query("DELETE FROM waste_items WHERE pickup_id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    let result = sqlx::query("DELETE FROM pickup_requests WHERE id = ? AND status = ?")
        .bind(id)
        .bind(PickupStatus::Pending)
        .execute(&mut *tx)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::Conflict(
            "Pickup changed while it was being cancelled".to_string(),
        ));
    }

    if let Some(tps_id) = pickup.tps_id {
        notify(
            &mut tx,
            tps_id,
            "Pickup cancelled",
            &format!("Pickup #{} was cancelled by the resident", id),
        )
        .await?;
    }

    tx.commit().await?;
    log::info!("Pickup {} cancelled by user {}", id, requester_id);
    Ok(())
}

/// Moves a pickup to the requested status on behalf of a TPS. Completing a
/// pickup settles its waste items and records the transaction in the same
/// database transaction.
pub async fn transition_pickup(
    state: &AppState,
    operator_id: i64,
    id: i64,
    update: StatusUpdate,
) -> Result<PickupDetail, AppError> {
    let mut tx = begin_write(&state.db_pool).await?;
    let pickup = fetch_pickup(&mut tx, id).await?;
    lifecycle::check_operator(pickup.tps_id, operator_id, update.status)?;
    lifecycle::check_transition(pickup.status, update.status)?;

    let settlement = if update.status == PickupStatus::Completed {
        let items = fetch_items(&mut tx, id).await?;
        let prices =
            sqlx::query_as::<_, TpsPrice>("SELECT * FROM tps_prices WHERE tps_id = ?")
                .bind(operator_id)
                .fetch_all(&mut *tx)
                .await?;
        let profile =
            sqlx::query_as::<_, TpsProfile>("SELECT * FROM tps_profiles WHERE user_id = ?")
                .bind(operator_id)
                .fetch_optional(&mut *tx)
                .await?;
        let modifier = match profile.and_then(|p| p.latitude.zip(p.longitude)) {
            Some((lat, lon)) => {
                distance_modifier(pickup.latitude, pickup.longitude, lat, lon).modifier
            }
            None => 1.0,
        };
        let settlement = lifecycle::settle(&items, &update.items, |category| {
            prices
                .iter()
                .find(|p| p.category.eq_ignore_ascii_case(category))
                .map(|p| p.price_per_kg * modifier)
        })?;
        Some(settlement)
    } else if !update.items.is_empty() {
        return Err(lifecycle::LifecycleError::UnexpectedWeighings.into());
    } else {
        None
    };

    let now = Utc::now();
    let result = sqlx::query(
        "UPDATE pickup_requests SET status = ?, tps_id = COALESCE(tps_id, ?), updated_at = ? WHERE id = ? AND status = ?",
    )
    .bind(update.status)
    .bind(operator_id)
    .bind(now)
    .bind(id)
    .bind(pickup.status)
    .execute(&mut *tx)
    .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::Conflict(
            "Pickup status changed concurrently, reload and retry".to_string(),
        ));
    }

    if let Some(settlement) = settlement {
        for item in &settlement.items {
            sqlx::query(
                "UPDATE waste_items SET actual_weight = ?, price = ? WHERE id = ? AND pickup_id = ?",
            )
            .bind(item.actual_weight)
            .bind(item.price)
            .bind(item.item_id)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        }
        sqlx::query(
            "INSERT INTO transactions (pickup_id, user_id, tps_id, total_weight, total_price, is_paid, created_at) VALUES (?, ?, ?, ?, ?, 0, ?)",
        )
        .bind(id)
        .bind(pickup.requester_id)
        .bind(operator_id)
        .bind(settlement.total_weight)
        .bind(settlement.total_price)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AppError::Conflict("Pickup already has a transaction".to_string())
            } else {
                AppError::DatabaseError(e)
            }
        })?;
        log::info!(
            "Pickup {} settled: {} kg, total {}",
            id,
            settlement.total_weight,
            settlement.total_price
        );
    }

    notify(
        &mut tx,
        pickup.requester_id,
        &format!("Pickup #{}", id),
        &format!("Your pickup request {}", update.status.describe()),
    )
    .await?;

    tx.commit().await?;
    log::info!(
        "Pickup {} moved from {} to {} by TPS {}",
        id,
        pickup.status,
        update.status,
        operator_id
    );
    get_pickup_detail(state, id).await
}
