use actix_cors::Cors;
use actix_web::{middleware::Compress, web, App, HttpServer};
use std::sync::Arc;
use tracing::{error, info, Level};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::EnvFilter;
use utoipa::OpenApi; // bring trait into scope for ApiDoc::openapi()
use utoipa_swagger_ui::SwaggerUi;

use inventory::openapi::ApiDoc;
use inventory::rate_limit::RateLimit;
use inventory::{load_config, routes, AppState};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load .env automatically only in debug builds; production takes its
    // environment from the service manager / container runtime.
    if cfg!(debug_assertions) {
        let _ = dotenv::dotenv();
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    info!("Bootstrapping inventory server");

    // Misconfiguration is fatal: never start listening without valid secrets.
    let config = match load_config() {
        Ok(cfg) => Arc::new(cfg),
        Err(e) => {
            error!("refusing to start: {e}");
            return Err(e.into());
        }
    };
    let state = AppState::build(config.clone()).map_err(|e| {
        error!("refusing to start: {e}");
        e
    })?;
    info!(storage = %state.storage.backend(), "collaborators initialised");

    let openapi = ApiDoc::openapi();
    let development = !config.environment.is_production();

    let server = HttpServer::new(move || {
        let cors = if development {
            // local frontend dev servers
            Cors::default()
                .allowed_origin("http://localhost:5173")
                .allowed_origin("http://127.0.0.1:5173")
                .allowed_origin("http://localhost:3000")
                .allowed_origin("http://127.0.0.1:3000")
                .allow_any_header()
                .allowed_methods(["GET", "POST", "PUT", "PATCH", "DELETE", "OPTIONS"])
                .supports_credentials()
                .max_age(3600)
        } else {
            Cors::default()
        };

        App::new()
            .wrap(state.csrf.clone())
            .wrap(RateLimit(state.rate_limiter.clone()))
            // outside the rejecting middlewares so 403/429 responses carry the headers too
            .wrap(state.headers.clone())
            .wrap(cors)
            .wrap(Compress::default())
            .wrap(TracingLogger::default())
            .app_data(web::Data::new(state.clone()))
            .configure(routes::config)
            .service(SwaggerUi::new("/docs").url("/docs/openapi.json", openapi.clone()))
    })
    .bind(config.bind_address.as_str())?;

    info!("Listening on http://{}", config.bind_address);

    server.run().await?;
    Ok(())
}
