//! HTTP surface tests: authentication, the error envelope, tenant
//! isolation, and the admin queue endpoints, all over the in-memory
//! backends.

use actix_web::{test, web, App};
use chrono::Utc;
use serde_json::{json, Value};

use freerange_api::bootstrap::{build_state, AppState};
use freerange_api::middleware::{ApiKeyAuth, RateLimitMiddleware};
use freerange_api::routes;
use freerange_core::config::Config;
use freerange_core::{Application, Preferences, User};
use freerange_store::{ApplicationRepository, UserRepository};

async fn state_with_tenant() -> (AppState, Application) {
    let state = build_state(Config::default()).await.expect("state");

    let mut app = Application::new("acme", "secret-key");
    app.settings.rate_limit = 0;
    state.repos.applications.create(&app).await.unwrap();

    let now = Utc::now();
    let user = User {
        user_id: "u1".to_string(),
        app_id: app.app_id.clone(),
        external_user_id: None,
        email: Some("u1@example.com".to_string()),
        phone: None,
        timezone: None,
        language: None,
        webhook_url: None,
        devices: Vec::new(),
        preferences: Preferences::default(),
        created_at: now,
        updated_at: now,
    };
    state.repos.users.create(&user).await.unwrap();

    (state, app)
}

macro_rules! test_app {
    ($state:expr) => {
        test::init_service(
            App::new()
                .app_data(web::Data::new($state.clone()))
                .wrap(RateLimitMiddleware::new($state.limiter.clone()))
                .wrap(ApiKeyAuth::new($state.repos.applications.clone()))
                .configure(routes::init),
        )
        .await
    };
}

fn send_body() -> Value {
    json!({
        "user_id": "u1",
        "channel": "push",
        "priority": "normal",
        "title": "Hi",
        "body": "Hello"
    })
}

#[actix_web::test]
async fn missing_api_key_is_401() {
    let (state, _app) = state_with_tenant().await;
    let app = test_app!(state);

    let req = test::TestRequest::post()
        .uri("/v1/notifications")
        .set_json(send_body())
        .to_request();
    let resp = test::try_call_service(&app, req).await;
    let err = resp.expect_err("middleware rejects");
    let resp = err.error_response();
    assert_eq!(resp.status(), 401);
}

#[actix_web::test]
async fn wrong_api_key_is_invalid() {
    let (state, _app) = state_with_tenant().await;
    let app = test_app!(state);

    let req = test::TestRequest::post()
        .uri("/v1/notifications")
        .insert_header(("Authorization", "Bearer nope"))
        .set_json(send_body())
        .to_request();
    let err = test::try_call_service(&app, req).await.expect_err("rejects");
    assert_eq!(err.error_response().status(), 401);
}

#[actix_web::test]
async fn health_needs_no_auth() {
    let (state, _app) = state_with_tenant().await;
    let app = test_app!(state);

    let req = test::TestRequest::get().uri("/health").to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["status"], "ok");
}

#[actix_web::test]
async fn send_returns_202_and_get_round_trips() {
    let (state, _app) = state_with_tenant().await;
    let app = test_app!(state);

    let req = test::TestRequest::post()
        .uri("/v1/notifications")
        .insert_header(("Authorization", "Bearer secret-key"))
        .set_json(send_body())
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 202);
    let created: Value = test::read_body_json(resp).await;
    let id = created["notification_id"].as_str().expect("id").to_string();
    assert_eq!(created["status"], "queued");

    let req = test::TestRequest::get()
        .uri(&format!("/v1/notifications/{}", id))
        .insert_header(("Authorization", "Bearer secret-key"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let fetched: Value = test::read_body_json(resp).await;
    assert_eq!(fetched["notification_id"], json!(id));
    assert_eq!(fetched["content"]["title"], "Hi");
}

#[actix_web::test]
async fn foreign_tenant_reads_as_not_found() {
    let (state, _app) = state_with_tenant().await;

    let other = Application::new("other", "other-key");
    state.repos.applications.create(&other).await.unwrap();

    let app = test_app!(state);

    let req = test::TestRequest::post()
        .uri("/v1/notifications")
        .insert_header(("Authorization", "Bearer secret-key"))
        .set_json(send_body())
        .to_request();
    let created: Value = test::read_body_json(test::call_service(&app, req).await).await;
    let id = created["notification_id"].as_str().unwrap().to_string();

    let req = test::TestRequest::get()
        .uri(&format!("/v1/notifications/{}", id))
        .insert_header(("Authorization", "Bearer other-key"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}

#[actix_web::test]
async fn validation_error_envelope() {
    let (state, _app) = state_with_tenant().await;
    let app = test_app!(state);

    let req = test::TestRequest::post()
        .uri("/v1/notifications")
        .insert_header(("Authorization", "Bearer secret-key"))
        .set_json(json!({
            "user_id": "  ",
            "channel": "push",
            "title": "Hi"
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
}

#[actix_web::test]
async fn dnd_rejection_is_403_with_code() {
    let (state, _app) = state_with_tenant().await;
    let mut user = state.repos.users.get_by_id("u1").await.unwrap();
    user.preferences.dnd = true;
    state.repos.users.update(&user).await.unwrap();

    let app = test_app!(state);

    let req = test::TestRequest::post()
        .uri("/v1/notifications")
        .insert_header(("Authorization", "Bearer secret-key"))
        .set_json(send_body())
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 403);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"]["code"], "DND_ENABLED");
}

#[actix_web::test]
async fn per_app_rate_limit_trips_429() {
    let (state, mut app_entity) = state_with_tenant().await;
    app_entity.settings.rate_limit = 2;
    state.repos.applications.update(&app_entity).await.unwrap();

    let app = test_app!(state);

    for _ in 0..2 {
        let req = test::TestRequest::get()
            .uri("/v1/notifications?page=1")
            .insert_header(("Authorization", "Bearer secret-key"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());
    }
    let req = test::TestRequest::get()
        .uri("/v1/notifications?page=1")
        .insert_header(("Authorization", "Bearer secret-key"))
        .to_request();
    let err = test::try_call_service(&app, req).await.expect_err("limited");
    assert_eq!(err.error_response().status(), 429);
}

#[actix_web::test]
async fn cancel_conflict_is_409() {
    let (state, _app) = state_with_tenant().await;
    let app = test_app!(state);

    let req = test::TestRequest::post()
        .uri("/v1/notifications")
        .insert_header(("Authorization", "Bearer secret-key"))
        .set_json(send_body())
        .to_request();
    let created: Value = test::read_body_json(test::call_service(&app, req).await).await;
    let id = created["notification_id"].as_str().unwrap().to_string();

    let req = test::TestRequest::delete()
        .uri(&format!("/v1/notifications/{}", id))
        .insert_header(("Authorization", "Bearer secret-key"))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 200);

    let req = test::TestRequest::delete()
        .uri(&format!("/v1/notifications/{}", id))
        .insert_header(("Authorization", "Bearer secret-key"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 409);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"]["code"], "INVALID_STATUS_TRANSITION");
}

#[actix_web::test]
async fn admin_queue_stats_report_depth() {
    let (state, _app) = state_with_tenant().await;
    let app = test_app!(state);

    let req = test::TestRequest::post()
        .uri("/v1/notifications")
        .insert_header(("Authorization", "Bearer secret-key"))
        .set_json(send_body())
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 202);

    let req = test::TestRequest::get()
        .uri("/v1/admin/queues/stats")
        .insert_header(("Authorization", "Bearer secret-key"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["by_priority"]["normal"], 1);
    assert_eq!(body["dead_letter"], 0);
}

#[actix_web::test]
async fn sse_without_identity_is_401() {
    let (state, _app) = state_with_tenant().await;
    let app = test_app!(state);

    let req = test::TestRequest::get().uri("/v1/sse").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 401);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");
}
