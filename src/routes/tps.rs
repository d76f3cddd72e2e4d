use actix_web::{
    get, put,
    web::{self, Data, Json, Path, Query},
    Responder,
};
use serde::{Deserialize, Serialize};

use crate::{
    auth::{AnyRole, Authorized, Operator},
    db::{
        self,
        tps::{Operator as OperatorRow, PriceInput, TpsProfileInput},
    },
    errors::AppError,
    pricing::{self, DistanceModifier},
    response, AppState,
};

#[derive(Debug, Deserialize)]
pub struct Coordinates {
    pub lat: Option<f64>,
    pub lon: Option<f64>,
}

impl Coordinates {
    fn point(&self) -> Result<Option<(f64, f64)>, AppError> {
        match (self.lat, self.lon) {
            (Some(lat), Some(lon)) if pricing::valid_coordinates(lat, lon) => Ok(Some((lat, lon))),
            (None, None) => Ok(None),
            _ => Err(AppError::validation(
                "lat and lon must both be given and in range",
            )),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct OperatorListing {
    #[serde(flatten)]
    pub operator: OperatorRow,
    pub distance: Option<DistanceModifier>,
}

fn distance_to(operator: &OperatorRow, point: Option<(f64, f64)>) -> Option<DistanceModifier> {
    let (lat, lon) = point?;
    let (tps_lat, tps_lon) = operator.latitude.zip(operator.longitude)?;
    Some(pricing::distance_modifier(lat, lon, tps_lat, tps_lon))
}

#[get("/api/tps")]
pub async fn list_operators(
    _auth: Authorized<AnyRole>,
    state: Data<AppState>,
    Query(coords): Query<Coordinates>,
) -> Result<impl Responder, AppError> {
    let point = coords.point()?;
    let mut listings = db::tps::list_operators(&state)
        .await?
        .into_iter()
        .map(|operator| OperatorListing {
            distance: distance_to(&operator, point),
            operator,
        })
        .collect::<Vec<_>>();
    if point.is_some() {
        // nearest first, operators without coordinates last
        listings.sort_by(|a, b| {
            let key = |l: &OperatorListing| l.distance.map(|d| d.distance_km).unwrap_or(f64::MAX);
            key(a).total_cmp(&key(b))
        });
    }
    Ok(response::ok(listings))
}

#[get("/api/tps/{id}/prices")]
pub async fn quote_prices(
    _auth: Authorized<AnyRole>,
    state: Data<AppState>,
    id: Path<i64>,
    Query(coords): Query<Coordinates>,
) -> Result<impl Responder, AppError> {
    let point = coords.point()?;
    let operator = db::tps::get_operator(&state, id.into_inner()).await?;
    let prices = db::tps::list_prices(&state, operator.id).await?;
    Ok(response::ok(pricing::quote(
        &prices,
        distance_to(&operator, point),
    )))
}

#[get("/api/tps/profile")]
pub async fn get_own_profile(
    auth: Authorized<Operator>,
    state: Data<AppState>,
) -> Result<impl Responder, AppError> {
    let profile = db::users::get_tps_profile(&state, auth.user_id)
        .await?
        .ok_or(AppError::NotFound("TPS profile"))?;
    Ok(response::ok(profile))
}

#[put("/api/tps/profile")]
pub async fn update_own_profile(
    auth: Authorized<Operator>,
    state: Data<AppState>,
    Json(input): Json<TpsProfileInput>,
) -> Result<impl Responder, AppError> {
    let profile = db::tps::upsert_tps_profile(&state, auth.user_id, input).await?;
    Ok(response::ok_with(profile, "TPS profile updated"))
}

#[get("/api/tps/prices")]
pub async fn get_own_prices(
    auth: Authorized<Operator>,
    state: Data<AppState>,
) -> Result<impl Responder, AppError> {
    Ok(response::ok(db::tps::list_prices(&state, auth.user_id).await?))
}

#[put("/api/tps/prices")]
pub async fn replace_own_prices(
    auth: Authorized<Operator>,
    state: Data<AppState>,
    Json(entries): Json<Vec<PriceInput>>,
) -> Result<impl Responder, AppError> {
    let prices = db::tps::replace_prices(&state, auth.user_id, entries).await?;
    Ok(response::ok_with(prices, "Price list updated"))
}

#[get("/api/tps-locations")]
pub async fn list_locations(state: Data<AppState>) -> Result<impl Responder, AppError> {
    Ok(response::ok(db::tps::list_locations(&state).await?))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(get_own_profile)
        .service(update_own_profile)
        .service(get_own_prices)
        .service(replace_own_prices)
        .service(list_operators)
        .service(quote_prices)
        .service(list_locations);
}
