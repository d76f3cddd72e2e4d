use serde::Serialize;

use crate::models::TpsPrice;

const EARTH_RADIUS_KM: f64 = 6371.0;

/// Upper bound (inclusive, km), modifier and label of each discount tier.
const TIERS: [(f64, f64, &str); 4] = [
    (1.0, 1.00, "<= 1 km"),
    (3.0, 0.95, "1-3 km"),
    (5.0, 0.90, "3-5 km"),
    (10.0, 0.85, "5-10 km"),
];
const FAR_MODIFIER: f64 = 0.80;
const FAR_LABEL: &str = "> 10 km";

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DistanceModifier {
    pub distance_km: f64,
    pub modifier: f64,
    pub label: &'static str,
}

/// Great-circle distance in kilometres between two WGS84 coordinates.
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_KM * c
}

pub fn modifier_for_distance(distance_km: f64) -> DistanceModifier {
    let (modifier, label) = TIERS
        .iter()
        .find(|(limit, _, _)| distance_km <= *limit)
        .map(|(_, modifier, label)| (*modifier, *label))
        .unwrap_or((FAR_MODIFIER, FAR_LABEL));
    DistanceModifier {
        distance_km,
        modifier,
        label,
    }
}

pub fn distance_modifier(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> DistanceModifier {
    modifier_for_distance(haversine_km(lat1, lon1, lat2, lon2))
}

#[derive(Debug, Clone, Serialize)]
pub struct QuotedPrice {
    pub category: String,
    pub base_price: f64,
    pub price: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PriceQuote {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance: Option<DistanceModifier>,
    pub prices: Vec<QuotedPrice>,
}

/// Applies the distance tier to every entry of a price list. Without a
/// distance the base prices are returned unchanged.
pub fn quote(prices: &[TpsPrice], distance: Option<DistanceModifier>) -> PriceQuote {
    let modifier = distance.map(|d| d.modifier).unwrap_or(1.0);
    PriceQuote {
        distance,
        prices: prices
            .iter()
            .map(|p| QuotedPrice {
                category: p.category.clone(),
                base_price: p.price_per_kg,
                price: p.price_per_kg * modifier,
            })
            .collect(),
    }
}

pub fn valid_coordinates(latitude: f64, longitude: f64) -> bool {
    (-90.0..=90.0).contains(&latitude) && (-180.0..=180.0).contains(&longitude)
}
