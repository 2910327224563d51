use actix_web::{web, HttpResponse};
use serde::Serialize;
use utoipa::ToSchema;

use crate::container::AppState;
use crate::error::ApiError;
use crate::session::Auth;

/// A handler group mounted under a fixed prefix.
#[derive(Clone, Copy)]
pub struct RouteGroup {
    pub name: &'static str,
    pub prefix: &'static str,
    configure: fn(&mut web::ServiceConfig),
}

pub const ROUTE_GROUPS: [RouteGroup; 6] = [
    RouteGroup { name: "auth", prefix: "/auth", configure: auth_views },
    RouteGroup { name: "auth_api", prefix: "/api/auth", configure: auth_api },
    RouteGroup { name: "clients", prefix: "/api/clients", configure: resource_group },
    RouteGroup { name: "networks", prefix: "/api/networks", configure: resource_group },
    RouteGroup { name: "projects", prefix: "/api/projects", configure: resource_group },
    RouteGroup { name: "users", prefix: "/api/users", configure: resource_group },
];

/// Name and prefix of the group serving the current request.
#[derive(Clone, Copy, Debug)]
pub struct GroupInfo {
    pub name: &'static str,
    pub prefix: &'static str,
}

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health));
    for group in ROUTE_GROUPS {
        cfg.service(
            web::scope(group.prefix)
                .app_data(web::Data::new(GroupInfo { name: group.name, prefix: group.prefix }))
                .configure(group.configure),
        );
    }
}

fn auth_views(cfg: &mut web::ServiceConfig) {
    cfg.route("/login", web::get().to(login_view))
        .route("/logout", web::post().to(logout));
}

fn auth_api(cfg: &mut web::ServiceConfig) {
    cfg.route("/csrf", web::get().to(csrf_token))
        .route("/me", web::get().to(auth_me));
}

fn resource_group(cfg: &mut web::ServiceConfig) {
    cfg.route("", web::get().to(group_index));
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CsrfTokenResponse {
    pub csrf_token: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SessionResponse {
    pub subject: String,
    pub session_id: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct GroupResponse {
    pub group: String,
    pub prefix: String,
}

#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Service is up", body = HealthResponse))
)]
pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(HealthResponse { status: "ok".into() })
}

/// Login view: hands out a CSRF token so the credential form can post.
pub async fn login_view(data: web::Data<AppState>) -> HttpResponse {
    issue_csrf(&data)
}

pub async fn logout(data: web::Data<AppState>) -> HttpResponse {
    HttpResponse::NoContent().cookie(data.sessions.logout_cookie()).finish()
}

#[utoipa::path(
    get,
    path = "/api/auth/csrf",
    responses((status = 200, description = "Fresh CSRF token, also set as the csrf_token cookie", body = CsrfTokenResponse))
)]
pub async fn csrf_token(data: web::Data<AppState>) -> HttpResponse {
    issue_csrf(&data)
}

fn issue_csrf(data: &AppState) -> HttpResponse {
    let token = data.csrf.issue();
    HttpResponse::Ok()
        .cookie(data.csrf.cookie(token.clone()))
        .json(CsrfTokenResponse { csrf_token: token })
}

#[utoipa::path(
    get,
    path = "/api/auth/me",
    responses(
        (status = 200, description = "Current session", body = SessionResponse),
        (status = 401, description = "No valid session")
    )
)]
pub async fn auth_me(auth: Auth) -> Result<HttpResponse, ApiError> {
    Ok(HttpResponse::Ok().json(SessionResponse { subject: auth.0.sub, session_id: auth.0.sid }))
}

pub async fn group_index(_auth: Auth, group: web::Data<GroupInfo>) -> Result<HttpResponse, ApiError> {
    Ok(HttpResponse::Ok().json(GroupResponse {
        group: group.name.to_string(),
        prefix: group.prefix.to_string(),
    }))
}
