use actix_web::cookie::{time::Duration, Cookie};
use actix_web::{test, web, App};
use inventory::csrf::{CSRF_COOKIE, CSRF_HEADER};
use inventory::session::{LOGIN_VIEW, SESSION_COOKIE};
use inventory::{routes, AppState, ProcessConfig};
use std::collections::HashMap;
use std::sync::Arc;

// Must run inside the test runtime: the storage pool spawns its maintenance task.
fn state() -> AppState {
    let env = HashMap::from([
        ("APP_ENV", "development"),
        ("SECRET_KEY", "test-secret-must-be-32-bytes-long!!"),
        ("REDIS_URL", "memory://"),
    ]);
    AppState::build(Arc::new(ProcessConfig::from_source(&env).unwrap())).unwrap()
}

macro_rules! app {
    ($state:expr) => {
        test::init_service(
            App::new()
                .wrap($state.csrf.clone())
                .app_data(web::Data::new($state.clone()))
                .configure(routes::config),
        )
        .await
    };
}

#[actix_web::test]
async fn me_requires_session_and_points_to_login() {
    let state = state();
    let app = app!(state);
    let req = test::TestRequest::get().uri("/api/auth/me").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 401);
    assert_eq!(resp.headers().get("location").unwrap(), LOGIN_VIEW);
}

#[actix_web::test]
async fn me_reports_session_from_cookie() {
    let state = state();
    let app = app!(state);
    let token = state.sessions.issue("42").expect("token");
    let req = test::TestRequest::get()
        .uri("/api/auth/me")
        .cookie(state.sessions.cookie(token))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let v: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(v["subject"], "42");
    assert!(v["session_id"].as_str().is_some_and(|s| !s.is_empty()));
}

#[actix_web::test]
async fn forged_session_cookie_is_rejected() {
    let state = state();
    let app = app!(state);
    let req = test::TestRequest::get()
        .uri("/api/auth/me")
        .cookie(Cookie::new(SESSION_COOKIE, "not.a.token"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 401);
}

#[actix_web::test]
async fn logout_without_csrf_token_is_forbidden() {
    let state = state();
    let app = app!(state);
    let req = test::TestRequest::post().uri("/auth/logout").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 403);

    // header present but not matching the cookie
    let token = state.csrf.issue();
    let req = test::TestRequest::post()
        .uri("/auth/logout")
        .insert_header((CSRF_HEADER, token))
        .cookie(Cookie::new(CSRF_COOKIE, state.csrf.issue()))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 403);
}

#[actix_web::test]
async fn logout_with_issued_csrf_token_clears_session() {
    let state = state();
    let app = app!(state);

    let req = test::TestRequest::get().uri("/api/auth/csrf").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let cookie = resp
        .response()
        .cookies()
        .find(|c| c.name() == CSRF_COOKIE)
        .map(|c| c.value().to_string())
        .expect("csrf cookie");
    let v: serde_json::Value = test::read_body_json(resp).await;
    let token = v["csrf_token"].as_str().unwrap().to_string();
    assert_eq!(token, cookie);
    assert!(state.csrf.verify(&token));

    let req = test::TestRequest::post()
        .uri("/auth/logout")
        .insert_header((CSRF_HEADER, token.clone()))
        .cookie(Cookie::new(CSRF_COOKIE, token))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 204);
    let session = resp
        .response()
        .cookies()
        .find(|c| c.name() == SESSION_COOKIE)
        .expect("session removal cookie");
    assert_eq!(session.value(), "");
    assert_eq!(session.max_age(), Some(Duration::ZERO));
    assert_eq!(session.http_only(), Some(true));
}
