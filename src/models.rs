use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    User,
    Tps,
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "USER",
            Role::Tps => "TPS",
            Role::Admin => "ADMIN",
        }
    }

    /// Case-insensitive parse used by forms and CSV import.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "USER" => Some(Role::User),
            "TPS" => Some(Role::Tps),
            "ADMIN" => Some(Role::Admin),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PickupKind {
    Pickup,
    DropOff,
}

impl Default for PickupKind {
    fn default() -> Self {
        PickupKind::Pickup
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, FromRow)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub phone: String,
    #[serde(skip_serializing)]
    pub pwd_hash: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Deserialize, Serialize, Debug, Clone, FromRow)]
pub struct TpsLocation {
    pub id: i64,
    pub name: String,
    pub district: String,
    pub address: String,
    pub latitude: f64,
    pub longitude: f64,
    pub operating_hours: String,
    pub phone: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Deserialize, Serialize, Debug, Clone, FromRow)]
pub struct TpsProfile {
    pub user_id: i64,
    pub location_id: Option<i64>,
    pub tps_name: String,
    pub address: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub operating_hours: String,
    pub capacity: Option<f64>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Deserialize, Serialize, Debug, Clone, FromRow)]
pub struct ResidentProfile {
    pub user_id: i64,
    pub address: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub payment_handle: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Deserialize, Serialize, Debug, Clone, FromRow)]
pub struct TpsPrice {
    pub id: i64,
    pub tps_id: i64,
    pub category: String,
    pub price_per_kg: f64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Deserialize, Serialize, Debug, Clone, FromRow)]
pub struct PickupRequest {
    pub id: i64,
    pub requester_id: i64,
    pub tps_id: Option<i64>,
    pub kind: PickupKind,
    pub address: String,
    pub latitude: f64,
    pub longitude: f64,
    pub scheduled_at: DateTime<Utc>,
    pub notes: Option<String>,
    pub status: crate::lifecycle::PickupStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, FromRow)]
pub struct WasteItem {
    pub id: i64,
    pub pickup_id: i64,
    pub category: String,
    pub estimated_weight: f64,
    pub actual_weight: Option<f64>,
    pub price: Option<f64>,
}

#[derive(Deserialize, Serialize, Debug, Clone, FromRow)]
pub struct Transaction {
    pub id: i64,
    pub pickup_id: i64,
    pub user_id: i64,
    pub tps_id: i64,
    pub total_weight: f64,
    pub total_price: f64,
    pub is_paid: bool,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Deserialize, Serialize, Debug, Clone, FromRow)]
pub struct Notification {
    pub id: i64,
    pub user_id: i64,
    pub title: String,
    pub message: String,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

/// A pickup together with its waste items and, once completed, its transaction.
#[derive(Serialize, Debug, Clone)]
pub struct PickupDetail {
    #[serde(flatten)]
    pub pickup: PickupRequest,
    pub items: Vec<WasteItem>,
    pub transaction: Option<Transaction>,
}
