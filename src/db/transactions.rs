use chrono::Utc;

use crate::{
    db::{begin_write, notifications::notify, Viewer},
    errors::AppError,
    models::Transaction,
    AppState,
};

pub async fn list_transactions(state: &AppState, viewer: Viewer) -> Result<Vec<Transaction>, AppError> {
    let transactions = match viewer {
        Viewer::Resident(id) => {
            sqlx::query_as::<_, Transaction>(
                "SELECT * FROM transactions WHERE user_id = ? ORDER BY created_at DESC, id DESC",
            )
            .bind(id)
            .fetch_all(&state.db_pool)
            .await?
        }
        Viewer::Operator(id) => {
            sqlx::query_as::<_, Transaction>(
                "SELECT * FROM transactions WHERE tps_id = ? ORDER BY created_at DESC, id DESC",
            )
            .bind(id)
            .fetch_all(&state.db_pool)
            .await?
        }
        Viewer::Admin => {
            sqlx::query_as::<_, Transaction>(
                "SELECT * FROM transactions ORDER BY created_at DESC, id DESC",
            )
            .fetch_all(&state.db_pool)
            .await?
        }
    };
    Ok(transactions)
}

pub async fn get_transaction(state: &AppState, id: i64) -> Result<Transaction, AppError> {
    sqlx::query_as::<_, Transaction>("SELECT * FROM transactions WHERE id = ?")
        .bind(id)
        .fetch_one(&state.db_pool)
        .await
        .map_err(AppError::or_not_found("Transaction"))
}

pub fn visible_to(transaction: &Transaction, viewer: Viewer) -> bool {
    match viewer {
        Viewer::Resident(id) => transaction.user_id == id,
        Viewer::Operator(id) => transaction.tps_id == id,
        Viewer::Admin => true,
    }
}

/// The resident acknowledges receiving payment. Confirming an already paid
/// transaction returns it unchanged.
pub async fn confirm_payment(
    state: &AppState,
    resident_id: i64,
    id: i64,
) -> Result<Transaction, AppError> {
    let mut tx = begin_write(&state.db_pool).await?;
    let transaction = sqlx::query_as::<_, Transaction>("SELECT * FROM transactions WHERE id = ?")
        .bind(id)
        .fetch_one(&mut *tx)
        .await
        .map_err(AppError::or_not_found("Transaction"))?;
    if transaction.user_id != resident_id {
        return Err(AppError::forbidden(
            "Only the resident of this transaction can confirm payment",
        ));
    }
    if transaction.is_paid {
        log::info!("Transaction {} already marked as paid", id);
        return Ok(transaction);
    }

    let updated = sqlx::query_as::<_, Transaction>(
        "UPDATE transactions SET is_paid = 1, paid_at = ? WHERE id = ? AND is_paid = 0 RETURNING *",
    )
    .bind(Utc::now())
    .bind(id)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| match e {
        sqlx::Error::RowNotFound => {
            AppError::Conflict("Transaction was confirmed concurrently".to_string())
        }
        other => AppError::DatabaseError(other),
    })?;

    notify(
        &mut tx,
        updated.tps_id,
        "Payment confirmed",
        &format!("The resident confirmed payment for pickup #{}", updated.pickup_id),
    )
    .await?;
    tx.commit().await?;
    log::info!("Transaction {} marked as paid by user {}", id, resident_id);
    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db::{
            connect_in_memory,
            pickups::{
                create_pickup, tests::sample_pickup, tests::user_with_role, transition_pickup,
                StatusUpdate,
            },
        },
        lifecycle::{PickupStatus, Weighing},
        models::Role,
    };

    async fn completed_transaction(state: &AppState) -> (i64, i64, Transaction) {
        let resident = user_with_role(state, "warga@example.com", Role::User).await;
        let operator = user_with_role(state, "tps@example.com", Role::Tps).await;
        let created = create_pickup(state, resident, sample_pickup(Some(operator)))
            .await
            .unwrap();
        for next in [
            PickupStatus::Accepted,
            PickupStatus::OnTheWay,
            PickupStatus::PickedUp,
        ] {
            transition_pickup(
                state,
                operator,
                created.pickup.id,
                StatusUpdate {
                    status: next,
                    items: Vec::new(),
                },
            )
            .await
            .unwrap();
        }
        let items = created
            .items
            .iter()
            .map(|i| Weighing {
                item_id: i.id,
                actual_weight: 1.0,
                price: Some(1000.0),
            })
            .collect();
        let done = transition_pickup(
            state,
            operator,
            created.pickup.id,
            StatusUpdate {
                status: PickupStatus::Completed,
                items,
            },
        )
        .await
        .unwrap();
        (resident, operator, done.transaction.unwrap())
    }

    #[actix_web::test]
    async fn confirming_twice_is_a_no_op() {
        let state = AppState {
            db_pool: connect_in_memory().await,
        };
        let (resident, _, transaction) = completed_transaction(&state).await;

        let first = confirm_payment(&state, resident, transaction.id).await.unwrap();
        assert!(first.is_paid);
        let paid_at = first.paid_at.expect("paid_at recorded");

        let second = confirm_payment(&state, resident, transaction.id).await.unwrap();
        assert!(second.is_paid);
        assert_eq!(second.paid_at, Some(paid_at));
    }

    #[actix_web::test]
    async fn only_the_resident_confirms() {
        let state = AppState {
            db_pool: connect_in_memory().await,
        };
        let (_, operator, transaction) = completed_transaction(&state).await;
        assert!(matches!(
            confirm_payment(&state, operator, transaction.id).await,
            Err(AppError::Forbidden(_))
        ));
        assert!(!get_transaction(&state, transaction.id).await.unwrap().is_paid);
        assert!(matches!(
            confirm_payment(&state, operator, 9999).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[actix_web::test]
    async fn listing_is_scoped() {
        let state = AppState {
            db_pool: connect_in_memory().await,
        };
        let (resident, operator, _) = completed_transaction(&state).await;
        let stranger = user_with_role(&state, "lain@example.com", Role::User).await;
        assert_eq!(
            list_transactions(&state, Viewer::Resident(resident)).await.unwrap().len(),
            1
        );
        assert_eq!(
            list_transactions(&state, Viewer::Operator(operator)).await.unwrap().len(),
            1
        );
        assert!(list_transactions(&state, Viewer::Resident(stranger))
            .await
            .unwrap()
            .is_empty());
    }
}
