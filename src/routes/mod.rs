use actix_web::web;

use crate::errors::AppError;

pub mod admin;
pub mod auth;
pub mod notifications;
pub mod pages;
pub mod pickups;
pub mod tps;
pub mod transactions;

/// Upper bound for uploaded import files.
const MAX_UPLOAD_BYTES: usize = 5 * 1024 * 1024;

/// Registers every page and API route plus the extractor configs that turn
/// malformed input into `{ "error": ... }` 400 responses.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(
        web::JsonConfig::default()
            .error_handler(|err, _| AppError::validation(err.to_string()).into()),
    )
    .app_data(
        web::QueryConfig::default()
            .error_handler(|err, _| AppError::validation(err.to_string()).into()),
    )
    .app_data(
        web::PathConfig::default()
            .error_handler(|err, _| AppError::validation(err.to_string()).into()),
    )
    .app_data(
        web::FormConfig::default()
            .error_handler(|err, _| AppError::validation(err.to_string()).into()),
    )
    .app_data(web::PayloadConfig::new(MAX_UPLOAD_BYTES));

    cfg.configure(pages::configure)
        .configure(auth::configure)
        .configure(pickups::configure)
        .configure(transactions::configure)
        .configure(notifications::configure)
        .configure(tps::configure)
        .configure(admin::configure);
}

#[cfg(test)]
mod tests {
    use actix_identity::IdentityMiddleware;
    use actix_session::{storage::CookieSessionStore, SessionMiddleware};
    use actix_web::{
        body::MessageBody,
        cookie::{Cookie, Key},
        dev::ServiceResponse,
        http::{header, StatusCode},
        test,
        web::Data,
        App,
    };
    use serde_json::{json, Value};

    use super::configure;
    use crate::{
        db::{self, pickups::tests::user_with_role, tps::LocationInput},
        models::Role,
        AppState,
    };

    macro_rules! test_app {
        ($state:expr) => {
            test::init_service(
                App::new()
                    .wrap(IdentityMiddleware::default())
                    .wrap(
                        SessionMiddleware::builder(CookieSessionStore::default(), Key::generate())
                            .cookie_secure(false)
                            .build(),
                    )
                    .app_data(Data::new($state.clone()))
                    .configure(configure),
            )
            .await
        };
    }

    async fn state() -> AppState {
        AppState {
            db_pool: db::connect_in_memory().await,
        }
    }

    fn session_cookie<B>(resp: &ServiceResponse<B>) -> Cookie<'static> {
        resp.response()
            .cookies()
            .next()
            .expect("session cookie")
            .into_owned()
    }

    async fn error_of<B: MessageBody>(resp: ServiceResponse<B>) -> String {
        let body: Value = test::read_body_json(resp).await;
        body["error"].as_str().expect("error message").to_string()
    }

    macro_rules! login {
        ($app:expr, $email:expr) => {{
            let req = test::TestRequest::post()
                .uri("/api/auth/login")
                .set_json(json!({ "email": $email, "password": "password1" }))
                .to_request();
            let resp = test::call_service(&$app, req).await;
            assert_eq!(resp.status(), StatusCode::OK);
            session_cookie(&resp)
        }};
    }

    #[actix_web::test]
    async fn login_sets_a_session_used_by_me() {
        let state = state().await;
        user_with_role(&state, "warga@example.com", Role::User).await;
        let app = test_app!(state);

        let cookie = login!(app, "Warga@Example.com");
        let req = test::TestRequest::get()
            .uri("/api/auth/me")
            .cookie(cookie)
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["email"], "warga@example.com");
        assert_eq!(body["data"]["role"], "USER");
        assert!(body["data"].get("pwd_hash").is_none());
    }

    #[actix_web::test]
    async fn wrong_password_is_unauthorized() {
        let state = state().await;
        user_with_role(&state, "warga@example.com", Role::User).await;
        let app = test_app!(state);

        let req = test::TestRequest::post()
            .uri("/api/auth/login")
            .set_json(json!({ "email": "warga@example.com", "password": "password2" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(error_of(resp).await, "Invalid credentials");
    }

    #[actix_web::test]
    async fn endpoints_check_login_and_role() {
        let state = state().await;
        user_with_role(&state, "tps@example.com", Role::Tps).await;
        let app = test_app!(state);

        let req = test::TestRequest::get().uri("/api/pickups").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let cookie = login!(app, "tps@example.com");
        let req = test::TestRequest::post()
            .uri("/api/pickups")
            .cookie(cookie.clone())
            .set_json(json!({
                "address": "Jl. Melati 1",
                "latitude": -6.2,
                "longitude": 106.8,
                "scheduled_at": "2030-01-01T08:00:00Z",
                "items": [{ "category": "plastic", "estimated_weight": 1.0 }]
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        assert_eq!(error_of(resp).await, "Resident access required");

        let req = test::TestRequest::get()
            .uri("/api/admin/users")
            .cookie(cookie)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[actix_web::test]
    async fn malformed_input_is_a_json_bad_request() {
        let state = state().await;
        user_with_role(&state, "tps@example.com", Role::Tps).await;
        let app = test_app!(state);
        let cookie = login!(app, "tps@example.com");

        let req = test::TestRequest::patch()
            .uri("/api/pickups/1")
            .cookie(cookie.clone())
            .set_json(json!({ "status": "TELEPORTED" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(resp).await;
        assert!(body["error"].is_string());

        let req = test::TestRequest::get()
            .uri("/api/pickups/abc")
            .cookie(cookie)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn pickup_lifecycle_through_the_api() {
        let state = state().await;
        user_with_role(&state, "warga@example.com", Role::User).await;
        let tps_id = user_with_role(&state, "tps@example.com", Role::Tps).await;
        let app = test_app!(state);
        let resident = login!(app, "warga@example.com");
        let operator = login!(app, "tps@example.com");

        let req = test::TestRequest::post()
            .uri("/api/pickups")
            .cookie(resident.clone())
            .set_json(json!({
                "tps_id": tps_id,
                "address": "Jl. Melati 1",
                "latitude": -6.2,
                "longitude": 106.8,
                "scheduled_at": "2030-01-01T08:00:00Z",
                "items": [
                    { "category": "plastic", "estimated_weight": 2.0 },
                    { "category": "paper", "estimated_weight": 3.0 }
                ]
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let created: Value = test::read_body_json(resp).await;
        let pickup_id = created["data"]["id"].as_i64().expect("pickup id");
        assert_eq!(created["data"]["status"], "PENDING");
        let items = created["data"]["items"].as_array().expect("items").clone();

        // skipping ahead is rejected
        let req = test::TestRequest::patch()
            .uri(&format!("/api/pickups/{}", pickup_id))
            .cookie(operator.clone())
            .set_json(json!({ "status": "PICKED_UP" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        for status in ["ACCEPTED", "ON_THE_WAY", "PICKED_UP"] {
            let req = test::TestRequest::patch()
                .uri(&format!("/api/pickups/{}", pickup_id))
                .cookie(operator.clone())
                .set_json(json!({ "status": status }))
                .to_request();
            let body: Value = test::call_and_read_body_json(&app, req).await;
            assert_eq!(body["data"]["status"], status);
        }

        let weighings = items
            .iter()
            .map(|item| {
                let (weight, price) = match item["category"].as_str() {
                    Some("plastic") => (2.5, 1000.0),
                    _ => (3.0, 500.0),
                };
                json!({ "item_id": item["id"], "actual_weight": weight, "price": price })
            })
            .collect::<Vec<_>>();
        let req = test::TestRequest::patch()
            .uri(&format!("/api/pickups/{}", pickup_id))
            .cookie(operator.clone())
            .set_json(json!({ "status": "COMPLETED", "items": weighings }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let completed: Value = test::read_body_json(resp).await;
        let transaction = &completed["data"]["transaction"];
        assert_eq!(transaction["total_weight"], 5.5);
        assert_eq!(transaction["total_price"], 4000.0);
        assert_eq!(transaction["is_paid"], false);
        let transaction_id = transaction["id"].as_i64().expect("transaction id");

        // terminal
        let req = test::TestRequest::patch()
            .uri(&format!("/api/pickups/{}", pickup_id))
            .cookie(operator.clone())
            .set_json(json!({ "status": "CANCELLED" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let confirm = format!("/api/transactions/{}/confirm-payment", transaction_id);
        let req = test::TestRequest::post()
            .uri(&confirm)
            .cookie(operator)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);

        let req = test::TestRequest::post()
            .uri(&confirm)
            .cookie(resident.clone())
            .to_request();
        let first: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(first["data"]["is_paid"], true);

        let req = test::TestRequest::post()
            .uri(&confirm)
            .cookie(resident)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let second: Value = test::read_body_json(resp).await;
        assert_eq!(second["data"]["paid_at"], first["data"]["paid_at"]);
    }

    #[actix_web::test]
    async fn only_the_requester_can_cancel() {
        let state = state().await;
        let owner = user_with_role(&state, "warga@example.com", Role::User).await;
        user_with_role(&state, "tetangga@example.com", Role::User).await;
        let detail = db::pickups::create_pickup(
            &state,
            owner,
            db::pickups::tests::sample_pickup(None),
        )
        .await
        .expect("pickup");
        let app = test_app!(state);

        let neighbour = login!(app, "tetangga@example.com");
        let req = test::TestRequest::delete()
            .uri(&format!("/api/pickups/{}", detail.pickup.id))
            .cookie(neighbour)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);

        let owner = login!(app, "warga@example.com");
        let req = test::TestRequest::delete()
            .uri(&format!("/api/pickups/{}", detail.pickup.id))
            .cookie(owner.clone())
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let req = test::TestRequest::get()
            .uri(&format!("/api/pickups/{}", detail.pickup.id))
            .cookie(owner)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn admin_cannot_change_a_role() {
        let state = state().await;
        user_with_role(&state, "admin@example.com", Role::Admin).await;
        let resident = user_with_role(&state, "warga@example.com", Role::User).await;
        let app = test_app!(state);
        let admin = login!(app, "admin@example.com");

        let req = test::TestRequest::put()
            .uri(&format!("/api/admin/users/{}", resident))
            .cookie(admin.clone())
            .set_json(json!({ "role": "TPS" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(error_of(resp).await, "User role cannot be changed");

        let req = test::TestRequest::put()
            .uri(&format!("/api/admin/users/{}", resident))
            .cookie(admin)
            .set_json(json!({ "role": "USER", "name": "Bu Sari" }))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["name"], "Bu Sari");
        assert_eq!(body["data"]["role"], "USER");
    }

    #[actix_web::test]
    async fn user_import_reports_rows_it_could_not_create() {
        let state = state().await;
        user_with_role(&state, "admin@example.com", Role::Admin).await;
        db::tps::create_location(
            &state,
            LocationInput {
                name: "TPS Kenanga".into(),
                district: "Menteng".into(),
                address: "Jl. Kenanga 5".into(),
                latitude: -6.19,
                longitude: 106.83,
                operating_hours: "07:00-16:00".into(),
                phone: String::new(),
            },
        )
        .await
        .expect("location");
        let app = test_app!(state);
        let admin = login!(app, "admin@example.com");

        let csv = "name,email,phone,password,role,tpsName\n\
                   Sari,sari@example.com,0811,password1,USER,\n\
                   Kenanga,kenanga@example.com,0812,password1,TPS,TPS Kenanga\n\
                   Ghost,ghost@example.com,0813,password1,TPS,TPS Hantu\n";
        let req = test::TestRequest::post()
            .uri("/api/admin/users/import")
            .cookie(admin)
            .insert_header((header::CONTENT_TYPE, "text/csv"))
            .set_payload(csv)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["data"]["created"].as_array().map(Vec::len), Some(2));
        let errors = body["data"]["errors"].as_array().expect("errors");
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0]["row"], 4);
        assert_eq!(errors[0]["error"], "TPS location 'TPS Hantu' does not exist");
    }

    #[actix_web::test]
    async fn dashboard_redirects_anonymous_visitors() {
        let state = state().await;
        let app = test_app!(state);

        let req = test::TestRequest::get().uri("/dashboard").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);
        assert_eq!(
            resp.headers().get(header::LOCATION).and_then(|v| v.to_str().ok()),
            Some("/login")
        );
    }

    #[actix_web::test]
    async fn session_of_a_deleted_account_is_unauthorized() {
        let state = state().await;
        let resident = user_with_role(&state, "warga@example.com", Role::User).await;
        let app = test_app!(state);
        let cookie = login!(app, "warga@example.com");

        db::users::delete_user(&state, resident).await.expect("deleted");

        let req = test::TestRequest::post()
            .uri("/api/pickups")
            .cookie(cookie.clone())
            .set_json(json!({
                "address": "Jl. Melati 1",
                "latitude": -6.2,
                "longitude": 106.8,
                "scheduled_at": "2030-01-01T08:00:00Z",
                "items": [{ "category": "plastic", "estimated_weight": 1.0 }]
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(error_of(resp).await, "Account no longer exists");

        let req = test::TestRequest::get()
            .uri("/dashboard")
            .cookie(cookie)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    }

    #[actix_web::test]
    async fn profile_coordinates_come_in_pairs() {
        let state = state().await;
        user_with_role(&state, "warga@example.com", Role::User).await;
        let app = test_app!(state);
        let cookie = login!(app, "warga@example.com");

        for partial in [json!({ "latitude": -6.2 }), json!({ "longitude": 106.8 })] {
            let req = test::TestRequest::put()
                .uri("/api/profile")
                .cookie(cookie.clone())
                .set_json(partial)
                .to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
            assert_eq!(
                error_of(resp).await,
                "Latitude and longitude must be given together"
            );
        }

        let req = test::TestRequest::put()
            .uri("/api/profile")
            .cookie(cookie)
            .set_json(json!({ "latitude": -6.2, "longitude": 106.8 }))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["resident_profile"]["latitude"], -6.2);
    }
}
