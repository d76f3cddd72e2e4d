use chrono::Utc;
use serde::Serialize;
use sqlx::SqliteConnection;

use crate::{errors::AppError, models::Notification, AppState};

#[derive(Debug, Serialize)]
pub struct Inbox {
    pub unread: i64,
    pub items: Vec<Notification>,
}

/// Runs on the caller's connection so lifecycle events and their
/// notifications commit together.
pub async fn notify(
    conn: &mut SqliteConnection,
    user_id: i64,
    title: &str,
    message: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO notifications (user_id, title, message, is_read, created_at) VALUES (?, ?, ?, 0, ?)",
    )
    .bind(user_id)
    .bind(title)
    .bind(message)
    .bind(Utc::now())
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn inbox(state: &AppState, user_id: i64) -> Result<Inbox, AppError> {
    let items = sqlx::query_as::<_, Notification>(
        "SELECT * FROM notifications WHERE user_id = ? ORDER BY created_at DESC, id DESC LIMIT 50",
    )
    .bind(user_id)
    .fetch_all(&state.db_pool)
    .await?;
    let unread = unread_count(state, user_id).await?;
    Ok(Inbox { unread, items })
}

pub async fn unread_count(state: &AppState, user_id: i64) -> Result<i64, AppError> {
    let (unread,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM notifications WHERE user_id = ? AND is_read = 0")
            .bind(user_id)
            .fetch_one(&state.db_pool)
            .await?;
    Ok(unread)
}

pub async fn mark_read(state: &AppState, user_id: i64, id: i64) -> Result<(), AppError> {
    let result = sqlx::query("UPDATE notifications SET is_read = 1 WHERE id = ? AND user_id = ?")
        .bind(id)
        .bind(user_id)
        .execute(&state.db_pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Notification"));
    }
    Ok(())
}

pub async fn mark_all_read(state: &AppState, user_id: i64) -> Result<u64, AppError> {
    let result = sqlx::query("UPDATE notifications SET is_read = 1 WHERE user_id = ? AND is_read = 0")
        .bind(user_id)
        .execute(&state.db_pool)
        .await?;
    Ok(result.rows_affected())
}
