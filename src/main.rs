// Cinder Weather API v0.1
use axum::Router;
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

mod config;
mod db;
mod errors;
mod helpers;
mod routes;
mod services;

use config::{AppConfig, LogFormat};
use db::{PgPointStore, PointStore};
use routes::points::{AppState, CACHE_HEADER, RUN_ID_HEADER};
use routes::progress::ProgressState;
use services::extraction::ExtractionInvoker;
use services::pipeline::PointPipeline;
use services::progress::ProgressRegistry;

/// Maximum number of connections in the database pool.
const DB_POOL_MAX_CONNECTIONS: u32 = 10;
/// Minimum number of connections kept alive in the database pool.
const DB_POOL_MIN_CONNECTIONS: u32 = 2;
/// How long finished progress runs remain readable.
const PROGRESS_RETENTION: Duration = Duration::from_secs(60 * 60);

/// OpenAPI document for the Cinder Weather API.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Cinder Weather API",
        version = "0.1.0",
        description = "Point forecast data for a coordinate. Answers from the point store \
            and, when a coordinate has never been ingested, runs the model extraction \
            program, imports its output and answers from the fresh data. Regeneration \
            progress is streamed over server-sent events.",
    ),
    tags(
        (name = "Health", description = "Service health check"),
        (name = "Points", description = "Point forecast retrieval"),
        (name = "Progress", description = "Extraction pipeline progress"),
    ),
    paths(
        routes::health::health_check,
        routes::points::get_points,
        routes::points::get_latest_point,
        routes::points::list_coordinates,
        routes::progress::stream_progress,
        routes::progress::stream_run_progress,
        routes::progress::get_run_progress,
    ),
    components(
        schemas(
            routes::health::HealthResponse,
            routes::points::PointResponse,
            routes::points::CoordinateResponse,
            services::progress::RunProgress,
            services::extraction::TaskState,
            errors::ErrorResponse,
        )
    )
)]
struct ApiDoc;

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "cinder_weather_api=debug,tower_http=debug".into());
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

#[tokio::main]
async fn main() {
    let config = AppConfig::from_env();
    init_tracing(config.log_format);

    // Set up database connection pool
    let pool = PgPoolOptions::new()
        .max_connections(DB_POOL_MAX_CONNECTIONS)
        .min_connections(DB_POOL_MIN_CONNECTIONS)
        .connect(&config.database_url)
        .await
        .expect("Failed to connect to database");

    // Run migrations
    sqlx::migrate!()
        .run(&pool)
        .await
        .expect("Failed to run database migrations");

    tracing::info!("Database migrations completed");

    let store: Arc<dyn PointStore> = Arc::new(PgPointStore::new(pool));
    let data_dirs = config.data_dir_candidates();

    // Import extraction output already on disk
    if config.import_on_startup {
        let imported = match &config.import_path {
            Some(path) => services::importer::import_path(store.as_ref(), path).await,
            None => services::importer::import_from_candidates(store.as_ref(), &data_dirs).await,
        };
        match imported {
            Ok(summary) => tracing::info!(
                "Startup import: {} of {} files imported, {} points inserted",
                summary.files_imported,
                summary.files_seen,
                summary.rows_inserted
            ),
            Err(e) => tracing::error!("Startup import failed: {}", e),
        }
    }

    let invoker = ExtractionInvoker::new(
        config.extraction_interpreter.clone(),
        config.extraction_script.clone(),
        config.extraction_timeout,
    )
    .with_output_dir(
        services::importer::resolve_data_dir(&data_dirs)
            .await
            .unwrap_or_else(|_| config.data_dir.clone()),
    );
    tracing::info!(
        "Extraction program: {} {}",
        config.extraction_interpreter,
        invoker.script().display()
    );

    let registry = ProgressRegistry::new(PROGRESS_RETENTION);
    let pipeline = PointPipeline::new(
        store.clone(),
        Arc::new(invoker),
        registry.clone(),
        data_dirs,
    );

    let app_state = AppState {
        store,
        pipeline,
        max_forecast_hour: config.max_forecast_hour,
    };
    let progress_state = ProgressState {
        registry,
        interval: config.progress_interval,
    };

    // CORS: read-only API, restrict methods to GET; expose pipeline headers
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([axum::http::Method::GET])
        .allow_headers(Any)
        .expose_headers([RUN_ID_HEADER, CACHE_HEADER].map(|name| {
            name.parse::<axum::http::HeaderName>()
                .expect("static header names are valid")
        }));

    let app = Router::new()
        .merge(routes::router(app_state, progress_state))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("API server listening on {}", addr);
    tracing::info!(
        "Swagger UI available at http://localhost:{}/swagger-ui/",
        config.port
    );

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind TCP listener");
    axum::serve(listener, app)
        .await
        .expect("Server terminated unexpectedly");
}
