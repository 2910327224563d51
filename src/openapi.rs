use crate::routes::{CsrfTokenResponse, GroupResponse, HealthResponse, SessionResponse};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::routes::health,
        crate::routes::csrf_token,
        crate::routes::auth_me,
    ),
    components(schemas(HealthResponse, CsrfTokenResponse, SessionResponse, GroupResponse)),
    tags(
        (name = "auth", description = "Session and CSRF endpoints"),
    )
)]
pub struct ApiDoc;
