use actix_web::{
    delete, get, patch, post,
    web::{self, Data, Json, Path, Query},
    Responder,
};
use serde::Deserialize;

use crate::{
    auth::{AnyRole, Authorized, Operator, Resident},
    db::{
        pickups::{self, NewPickup, StatusUpdate},
        Viewer,
    },
    errors::AppError,
    lifecycle::PickupStatus,
    response, AppState,
};

#[derive(Debug, Deserialize)]
pub struct PickupFilter {
    pub status: Option<PickupStatus>,
}

#[get("/api/pickups")]
pub async fn list_pickups(
    auth: Authorized<AnyRole>,
    state: Data<AppState>,
    Query(filter): Query<PickupFilter>,
) -> Result<impl Responder, AppError> {
    let viewer = Viewer::new(auth.user_id, auth.role);
    let pickups = pickups::list_pickups(&state, viewer, filter.status).await?;
    Ok(response::ok(pickups))
}

#[post("/api/pickups")]
pub async fn create_pickup(
    auth: Authorized<Resident>,
    state: Data<AppState>,
    Json(new): Json<NewPickup>,
) -> Result<impl Responder, AppError> {
    let detail = pickups::create_pickup(&state, auth.user_id, new).await?;
    Ok(response::created(detail, "Pickup request created"))
}

#[get("/api/pickups/{id}")]
pub async fn get_pickup(
    auth: Authorized<AnyRole>,
    state: Data<AppState>,
    id: Path<i64>,
) -> Result<impl Responder, AppError> {
    let detail = pickups::get_pickup_detail(&state, id.into_inner()).await?;
    if !pickups::visible_to(&detail.pickup, Viewer::new(auth.user_id, auth.role)) {
        return Err(AppError::forbidden("You cannot view this pickup"));
    }
    Ok(response::ok(detail))
}

#[patch("/api/pickups/{id}")]
pub async fn update_pickup_status(
    auth: Authorized<Operator>,
    state: Data<AppState>,
    id: Path<i64>,
    Json(update): Json<StatusUpdate>,
) -> Result<impl Responder, AppError> {
    let target = update.status;
    let detail = pickups::transition_pickup(&state, auth.user_id, id.into_inner(), update).await?;
    Ok(response::ok_with(
        detail,
        format!("Pickup status changed to {}", target),
    ))
}

#[delete("/api/pickups/{id}")]
pub async fn cancel_pickup(
    auth: Authorized<Resident>,
    state: Data<AppState>,
    id: Path<i64>,
) -> Result<impl Responder, AppError> {
    pickups::cancel_pickup(&state, auth.user_id, id.into_inner()).await?;
    Ok(response::ok_with((), "Pickup request cancelled"))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(list_pickups)
        .service(create_pickup)
        .service(get_pickup)
        .service(update_pickup_status)
        .service(cancel_pickup);
}
