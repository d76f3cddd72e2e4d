//! Pickup request lifecycle: the status state machine and the settlement
//! computed when a TPS completes a pickup.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::WasteItem;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PickupStatus {
    Pending,
    Accepted,
    OnTheWay,
    PickedUp,
    Completed,
    Cancelled,
}

impl PickupStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PickupStatus::Pending => "PENDING",
            PickupStatus::Accepted => "ACCEPTED",
            PickupStatus::OnTheWay => "ON_THE_WAY",
            PickupStatus::PickedUp => "PICKED_UP",
            PickupStatus::Completed => "COMPLETED",
            PickupStatus::Cancelled => "CANCELLED",
        }
    }

    /// Forward adjacency table. Terminal states have no successors.
    pub fn allowed_targets(self) -> &'static [PickupStatus] {
        match self {
            PickupStatus::Pending => &[PickupStatus::Accepted, PickupStatus::Cancelled],
            PickupStatus::Accepted => &[PickupStatus::OnTheWay, PickupStatus::Cancelled],
            PickupStatus::OnTheWay => &[PickupStatus::PickedUp],
            PickupStatus::PickedUp => &[PickupStatus::Completed],
            PickupStatus::Completed | PickupStatus::Cancelled => &[],
        }
    }

    pub fn can_transition_to(self, target: PickupStatus) -> bool {
        self.allowed_targets().contains(&target)
    }

    pub fn is_terminal(self) -> bool {
        self.allowed_targets().is_empty()
    }

    /// Human readable text used in notifications.
    pub fn describe(self) -> &'static str {
        match self {
            PickupStatus::Pending => "is waiting for a TPS",
            PickupStatus::Accepted => "was accepted",
            PickupStatus::OnTheWay => "is on the way",
            PickupStatus::PickedUp => "was picked up",
            PickupStatus::Completed => "was completed",
            PickupStatus::Cancelled => "was cancelled",
        }
    }
}

impl fmt::Display for PickupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum LifecycleError {
    #[error("cannot change pickup status from {from} to {to}")]
    InvalidTransition {
        from: PickupStatus,
        to: PickupStatus,
    },
    #[error("only pending pickups can be cancelled (current status: {0})")]
    NotCancellable(PickupStatus),
    #[error("pickup is assigned to another TPS")]
    AssignedElsewhere,
    #[error("an unassigned pickup can only be accepted")]
    NotAssigned,
    #[error("waste item weighings are only accepted when completing a pickup")]
    UnexpectedWeighings,
    #[error("waste item {0} does not belong to this pickup")]
    UnknownItem(i64),
    #[error("waste item {0} was weighed more than once")]
    DuplicateWeighing(i64),
    #[error("waste item {0} has not been weighed")]
    MissingWeighing(i64),
    #[error("waste item {0} has a negative or invalid weight or price")]
    InvalidMeasurement(i64),
    #[error("no price given for waste item {item} and the TPS has no price for '{category}'")]
    MissingPrice { item: i64, category: String },
}

impl LifecycleError {
    /// Authorization failures map to 403, everything else is a bad request.
    pub fn is_forbidden(&self) -> bool {
        matches!(
            self,
            LifecycleError::AssignedElsewhere | LifecycleError::NotAssigned
        )
    }
}

pub fn check_transition(from: PickupStatus, to: PickupStatus) -> Result<(), LifecycleError> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(LifecycleError::InvalidTransition { from, to })
    }
}

/// A TPS may act on pickups assigned to it; unassigned pickups are an open
/// pool that any TPS can accept.
pub fn check_operator(
    assigned: Option<i64>,
    operator_id: i64,
    target: PickupStatus,
) -> Result<(), LifecycleError> {
    match assigned {
        Some(tps_id) if tps_id == operator_id => Ok(()),
        Some(_) => Err(LifecycleError::AssignedElsewhere),
        None if target == PickupStatus::Accepted => Ok(()),
        None => Err(LifecycleError::NotAssigned),
    }
}

pub fn check_resident_cancel(status: PickupStatus) -> Result<(), LifecycleError> {
    if status == PickupStatus::Pending {
        Ok(())
    } else {
        Err(LifecycleError::NotCancellable(status))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Weighing {
    pub item_id: i64,
    pub actual_weight: f64,
    #[serde(default)]
    pub price: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SettledItem {
    pub item_id: i64,
    pub actual_weight: f64,
    pub price: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Settlement {
    pub items: Vec<SettledItem>,
    pub total_weight: f64,
    pub total_price: f64,
}

/// Matches every waste item with exactly one weighing and totals the result.
/// `fallback_price` supplies a per-kg price for items weighed without one.
pub fn settle<F>(
    items: &[WasteItem],
    weighings: &[Weighing],
    fallback_price: F,
) -> Result<Settlement, LifecycleError>
where
    F: Fn(&str) -> Option<f64>,
{
    let mut by_item: HashMap<i64, &Weighing> = HashMap::with_capacity(weighings.len());
    for weighing in weighings {
        if !items.iter().any(|item| item.id == weighing.item_id) {
            return Err(LifecycleError::UnknownItem(weighing.item_id));
        }
        if by_item.insert(weighing.item_id, weighing).is_some() {
            return Err(LifecycleError::DuplicateWeighing(weighing.item_id));
        }
    }

    let mut settled = Vec::with_capacity(items.len());
    for item in items {
        let weighing = by_item
            .get(&item.id)
            .ok_or(LifecycleError::MissingWeighing(item.id))?;
        let price = match weighing.price {
            Some(price) => price,
            None => fallback_price(&item.category).ok_or_else(|| LifecycleError::MissingPrice {
                item: item.id,
                category: item.category.clone(),
            })?,
        };
        if !weighing.actual_weight.is_finite()
            || weighing.actual_weight < 0.0
            || !price.is_finite()
            || price < 0.0
        {
            return Err(LifecycleError::InvalidMeasurement(item.id));
        }
        settled.push(SettledItem {
            item_id: item.id,
            actual_weight: weighing.actual_weight,
            price,
        });
    }

    let total_weight = settled.iter().map(|s| s.actual_weight).sum();
    let total_price = settled.iter().map(|s| s.actual_weight * s.price).sum();
    Ok(Settlement {
        items: settled,
        total_weight,
        total_price,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: i64, category: &str) -> WasteItem {
        WasteItem {
            id,
            pickup_id: 1,
            category: category.to_string(),
            estimated_weight: 1.0,
            actual_weight: None,
            price: None,
        }
    }

    fn weigh(item_id: i64, actual_weight: f64, price: Option<f64>) -> Weighing {
        Weighing {
            item_id,
            actual_weight,
            price,
        }
    }

    #[test]
    fn forward_path_is_allowed() {
        use PickupStatus::*;
        for (from, to) in [
            (Pending, Accepted),
            (Accepted, OnTheWay),
            (OnTheWay, PickedUp),
            (PickedUp, Completed),
            (Pending, Cancelled),
            (Accepted, Cancelled),
        ] {
            assert!(check_transition(from, to).is_ok(), "{from} -> {to}");
        }
    }

    #[test]
    fn backward_skipping_and_terminal_moves_are_rejected() {
        use PickupStatus::*;
        for (from, to) in [
            (Accepted, Pending),
            (PickedUp, OnTheWay),
            (Pending, Completed),
            (Pending, PickedUp),
            (OnTheWay, Cancelled),
            (PickedUp, Cancelled),
            (Completed, Cancelled),
            (Cancelled, Pending),
            (Accepted, Accepted),
        ] {
            assert_eq!(
                check_transition(from, to),
                Err(LifecycleError::InvalidTransition { from, to })
            );
        }
        assert!(Completed.is_terminal());
        assert!(Cancelled.is_terminal());
        assert!(!PickedUp.is_terminal());
    }

    #[test]
    fn operator_rules() {
        assert!(check_operator(Some(3), 3, PickupStatus::OnTheWay).is_ok());
        assert_eq!(
            check_operator(Some(3), 4, PickupStatus::OnTheWay),
            Err(LifecycleError::AssignedElsewhere)
        );
        assert!(check_operator(None, 4, PickupStatus::Accepted).is_ok());
        let err = check_operator(None, 4, PickupStatus::Cancelled).unwrap_err();
        assert!(err.is_forbidden());
    }

    #[test]
    fn only_pending_pickups_can_be_cancelled_by_resident() {
        assert!(check_resident_cancel(PickupStatus::Pending).is_ok());
        assert_eq!(
            check_resident_cancel(PickupStatus::Accepted),
            Err(LifecycleError::NotCancellable(PickupStatus::Accepted))
        );
    }

    #[test]
    fn settlement_totals_weight_times_price() {
        let items = vec![item(1, "plastic"), item(2, "paper")];
        let weighings = vec![weigh(1, 2.5, Some(2000.0)), weigh(2, 4.0, Some(1500.0))];
        let settlement = settle(&items, &weighings, |_| None).expect("settles");
        assert_eq!(settlement.total_weight, 6.5);
        assert_eq!(settlement.total_price, 2.5 * 2000.0 + 4.0 * 1500.0);
        assert_eq!(settlement.items.len(), 2);
    }

    #[test]
    fn settlement_falls_back_to_price_list() {
        let items = vec![item(1, "plastic"), item(2, "metal")];
        let weighings = vec![weigh(1, 2.0, None), weigh(2, 1.0, Some(5000.0))];
        let settlement = settle(&items, &weighings, |category| {
            (category == "plastic").then_some(1000.0)
        })
        .expect("settles");
        assert_eq!(settlement.items[0].price, 1000.0);
        assert_eq!(settlement.total_price, 7000.0);

        let err = settle(&items, &[weigh(1, 2.0, None), weigh(2, 1.0, None)], |c| {
            (c == "plastic").then_some(1000.0)
        })
        .unwrap_err();
        assert_eq!(
            err,
            LifecycleError::MissingPrice {
                item: 2,
                category: "metal".into()
            }
        );
    }

    #[test]
    fn settlement_requires_each_item_exactly_once() {
        let items = vec![item(1, "plastic"), item(2, "paper")];
        assert_eq!(
            settle(&items, &[weigh(1, 1.0, Some(1.0))], |_| None),
            Err(LifecycleError::MissingWeighing(2))
        );
        assert_eq!(
            settle(
                &items,
                &[weigh(1, 1.0, Some(1.0)), weigh(1, 1.0, Some(1.0))],
                |_| None
            ),
            Err(LifecycleError::DuplicateWeighing(1))
        );
        assert_eq!(
            settle(&items, &[weigh(9, 1.0, Some(1.0))], |_| None),
            Err(LifecycleError::UnknownItem(9))
        );
        assert_eq!(
            settle(
                &items,
                &[weigh(1, -1.0, Some(1.0)), weigh(2, 1.0, Some(1.0))],
                |_| None
            ),
            Err(LifecycleError::InvalidMeasurement(1))
        );
    }
}
