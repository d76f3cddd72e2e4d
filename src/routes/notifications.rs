use actix_web::{
    get, post,
    web::{self, Data, Path},
    Responder,
};
use serde_json::json;

use crate::{
    auth::{AnyRole, Authorized},
    db::notifications,
    errors::AppError,
    response, AppState,
};

#[get("/api/notifications")]
pub async fn inbox(
    auth: Authorized<AnyRole>,
    state: Data<AppState>,
) -> Result<impl Responder, AppError> {
    Ok(response::ok(notifications::inbox(&state, auth.user_id).await?))
}

#[post("/api/notifications/read-all")]
pub async fn mark_all_read(
    auth: Authorized<AnyRole>,
    state: Data<AppState>,
) -> Result<impl Responder, AppError> {
    let updated = notifications::mark_all_read(&state, auth.user_id).await?;
    Ok(response::ok(json!({ "updated": updated })))
}

#[post("/api/notifications/{id}/read")]
pub async fn mark_read(
    auth: Authorized<AnyRole>,
    state: Data<AppState>,
    id: Path<i64>,
) -> Result<impl Responder, AppError> {
    notifications::mark_read(&state, auth.user_id, id.into_inner()).await?;
    let unread = notifications::unread_count(&state, auth.user_id).await?;
    Ok(response::ok(json!({ "unread": unread })))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(inbox).service(mark_all_read).service(mark_read);
}
