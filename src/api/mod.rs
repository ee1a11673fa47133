//! JSON over HTTP in front of the [`Engine`](crate::engine::Engine).

pub mod error;
pub mod handlers;
pub mod model;

use std::time::Instant;

use axum::Router;
use axum::extract::{MatchedPath, Request};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

use crate::observability::{HTTP_REQUEST_DURATION_SECONDS, HTTP_REQUESTS_TOTAL};

pub use handlers::AppState;

fn booking_routes() -> Router<AppState> {
    Router::new()
        .route("/studio-config/", get(handlers::show_config).patch(handlers::update_config))
        .route("/studio-status/", get(handlers::studio_status))
        .route("/daily-schedule/", get(handlers::daily_schedule))
        .route("/check-availability/", get(handlers::check_availability))
        .route("/packages/", get(handlers::list_packages))
        .route("/packages/:id/", get(handlers::show_package).put(handlers::save_package))
        .route("/packages/:id/slots/", get(handlers::package_slots))
        .route("/bookings/", post(handlers::create_booking))
        .route("/quick-booking/", post(handlers::quick_booking))
        .route("/bookings/history/", get(handlers::booking_history))
        .route("/bookings/upcoming/", get(handlers::upcoming_bookings))
        .route("/bookings/:id/", get(handlers::show_booking))
        .route("/bookings/:id/reschedule/", post(handlers::reschedule_booking))
        .route("/bookings/:id/cancel/", post(handlers::cancel_booking))
        .route("/bookings/:id/payment/", post(handlers::record_payment))
        .route("/bookings/:id/assign-wheels/", post(handlers::assign_wheels))
        .route("/bookings/:id/check-in/", post(handlers::check_in))
        .route("/bookings/:id/check-out/", post(handlers::check_out))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .nest("/api/booking", booking_routes())
        .route_layer(middleware::from_fn(track_metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn track_metrics(req: Request, next: Next) -> Response {
    let started = Instant::now();
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| "unmatched".to_owned());
    let method = req.method().to_string();

    let response = next.run(req).await;

    let status = response.status().as_u16().to_string();
    metrics::counter!(HTTP_REQUESTS_TOTAL, "method" => method.clone(), "route" => route.clone(), "status" => status)
        .increment(1);
    metrics::histogram!(HTTP_REQUEST_DURATION_SECONDS, "method" => method, "route" => route)
        .record(started.elapsed().as_secs_f64());
    response
}
