pub mod handlers;
pub mod metrics;
pub mod websocket;

use axum::{
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::db::Database;
use crate::learning::LearningService;
use handlers::AppState;
use metrics::MetricsMiddleware;

pub fn create_app(db: Database, learning: LearningService) -> Router {
    let state = Arc::new(AppState {
        db: Arc::new(db),
        learning,
    });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ws", get(websocket::websocket_handler))
        .route("/api/detections", get(handlers::list_detections))
        .route("/api/detections/confirm", post(handlers::confirm_labels))
        .route("/api/detections/:id", get(handlers::get_detection))
        .route("/api/detections/:id/image", get(handlers::get_detection_image))
        .route("/api/categories", get(handlers::list_categories))
        .route("/api/categories", post(handlers::add_category))
        .route("/api/categories/:id", put(handlers::rename_category))
        .route("/api/learning", get(handlers::learning_status))
        .route("/api/learning/start", post(handlers::start_learning))
        .route("/api/learning/cancel", post(handlers::cancel_learning))
        .route("/api/learning/runs", get(handlers::list_learning_runs))
        .route("/api/stats", get(handlers::get_stats))
        .route("/metrics", get(metrics::metrics_handler))
        .layer(MetricsMiddleware::new())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
