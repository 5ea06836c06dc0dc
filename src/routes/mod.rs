pub mod health;
pub mod points;
pub mod progress;

use axum::{routing::get, Router};

use points::AppState;
use progress::ProgressState;

/// All API routes, each group with its own state.
pub fn router(app_state: AppState, progress_state: ProgressState) -> Router {
    let health_routes = Router::new()
        .route("/api/health", get(health::health_check))
        .with_state(app_state.store.clone());

    let point_routes = Router::new()
        .route("/api/data", get(points::get_points))
        .route("/api/data/latest", get(points::get_latest_point))
        .route("/api/data/coordinates", get(points::list_coordinates))
        .with_state(app_state);

    let progress_routes = Router::new()
        .route("/progress", get(progress::stream_progress))
        .route("/progress/:run_id", get(progress::stream_run_progress))
        .route("/api/progress/:run_id", get(progress::get_run_progress))
        .with_state(progress_state);

    Router::new()
        .merge(health_routes)
        .merge(point_routes)
        .merge(progress_routes)
}
