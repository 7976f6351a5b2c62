pub mod rate_limit;
pub mod request_id;

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use crate::stats::services::StatsService;

/// Counts the request as in flight for as long as the inner service runs.
pub async fn track_requests(
    State(stats): State<Arc<StatsService>>,
    req: Request,
    next: Next,
) -> Response {
    let _in_flight = stats.begin_request();
    next.run(req).await
}
