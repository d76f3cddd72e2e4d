use actix_web::{
    get, post,
    web::{self, Data, Path},
    Responder,
};

use crate::{
    auth::{AnyRole, Authorized, Resident},
    db::{transactions, Viewer},
    errors::AppError,
    response, AppState,
};

#[get("/api/transactions")]
pub async fn list_transactions(
    auth: Authorized<AnyRole>,
    state: Data<AppState>,
) -> Result<impl Responder, AppError> {
    let viewer = Viewer::new(auth.user_id, auth.role);
    Ok(response::ok(
        transactions::list_transactions(&state, viewer).await?,
    ))
}

#[get("/api/transactions/{id}")]
pub async fn get_transaction(
    auth: Authorized<AnyRole>,
    state: Data<AppState>,
    id: Path<i64>,
) -> Result<impl Responder, AppError> {
    let transaction = transactions::get_transaction(&state, id.into_inner()).await?;
    if !transactions::visible_to(&transaction, Viewer::new(auth.user_id, auth.role)) {
        return Err(AppError::forbidden("You cannot view this transaction"));
    }
    Ok(response::ok(transaction))
}

#[post("/api/transactions/{id}/confirm-payment")]
pub async fn confirm_payment(
    auth: Authorized<Resident>,
    state: Data<AppState>,
    id: Path<i64>,
) -> Result<impl Responder, AppError> {
    let transaction = transactions::confirm_payment(&state, auth.user_id, id.into_inner()).await?;
    Ok(response::ok_with(transaction, "Payment confirmed"))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(list_transactions)
        .service(get_transaction)
        .service(confirm_payment);
}
