use std::{any::Any, future::IntoFuture, net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderValue},
    middleware::{from_fn, from_fn_with_state},
    response::{IntoResponse, Response},
    Router,
};
use tokio::sync::Notify;
use tower_http::{
    catch_panic::CatchPanicLayer,
    compression::CompressionLayer,
    cors::{AllowOrigin, Any as CorsAny, CorsLayer},
    set_header::SetResponseHeaderLayer,
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::AppConfig;
use crate::error::ApiError;
use crate::middleware::{
    rate_limit::limit_by_ip,
    request_id::{assign_request_id, RequestId},
    track_requests,
};
use crate::routes::{echo, health};
use crate::state::AppState;
use crate::{stats, users};

pub fn build_app(state: AppState) -> Router {
    let api = Router::new()
        .merge(users::router())
        .merge(stats::router())
        .merge(echo::echo_routes())
        .layer(from_fn_with_state(state.clone(), limit_by_ip));

    let routes = Router::new()
        .nest("/api/v1", api)
        .merge(health::health_routes());
    with_middleware(routes, state)
}

fn with_middleware(routes: Router<AppState>, state: AppState) -> Router {
    routes
        .with_state(state.clone())
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(DefaultBodyLimit::max(state.config.body_limit_bytes))
        .layer(from_fn_with_state(state.stats.clone(), track_requests))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::REFERRER_POLICY,
            HeaderValue::from_static("no-referrer"),
        ))
        .layer(CompressionLayer::new())
        .layer(cors_layer(&state.config))
        .layer(TimeoutLayer::new(state.config.request_timeout))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    let method = req.method().clone();
                    let uri = req.uri().clone();
                    let request_id = req
                        .extensions()
                        .get::<RequestId>()
                        .map(|r| r.0.clone())
                        .unwrap_or_default();
                    tracing::info_span!(
                        "http_request",
                        %method,
                        uri = %uri,
                        %request_id,
                        status = tracing::field::Empty
                    )
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     latency: Duration,
                     span: &tracing::Span| {
                        let status = res.status();
                        span.record("status", tracing::field::display(status));
                        let latency_ms = latency.as_millis() as u64;
                        if status.is_server_error() {
                            tracing::error!(%status, latency_ms, "response");
                        } else if status.is_client_error() {
                            tracing::warn!(%status, latency_ms, "response");
                        } else {
                            tracing::info!(%status, latency_ms, "response");
                        }
                    },
                ),
        )
        // outermost, so the trace span can see the id
        .layer(from_fn(assign_request_id))
}

/// Turns a handler panic into the usual 500 envelope.
fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else if let Some(msg) = panic.downcast_ref::<&str>() {
        msg.to_string()
    } else {
        "unknown panic payload".to_string()
    };
    ApiError::Internal(format!("handler panicked: {detail}")).into_response()
}

fn cors_layer(config: &AppConfig) -> CorsLayer {
    if config.allows_any_origin() {
        if config.is_production() {
            tracing::warn!("CORS allows all origins in production; consider restricting CORS_ALLOWED_ORIGINS");
        }
        return CorsLayer::permissive();
    }

    let origins: Vec<HeaderValue> = config
        .cors_allowed_origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!(origin = %o, error = %e, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(CorsAny)
        .allow_headers(CorsAny)
        .max_age(Duration::from_secs(300))
}

pub async fn serve(app: Router, addr: SocketAddr, drain_timeout: Duration) -> anyhow::Result<()> {
    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;

    let draining = Arc::new(Notify::new());
    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown({
        let draining = Arc::clone(&draining);
        async move {
            shutdown_signal().await;
            draining.notify_one();
        }
    })
    .into_future();

    run_with_drain_limit(server, &draining, drain_timeout).await?;
    tracing::info!("server stopped");
    Ok(())
}

/// Drives `server` to completion, giving up `limit` after `draining` fires.
async fn run_with_drain_limit<F>(server: F, draining: &Notify, limit: Duration) -> std::io::Result<()>
where
    F: std::future::Future<Output = std::io::Result<()>>,
{
    tokio::pin!(server);
    tokio::select! {
        res = &mut server => res,
        _ = draining.notified() => match tokio::time::timeout(limit, &mut server).await {
            Ok(res) => res,
            Err(_) => {
                tracing::warn!(
                    timeout_secs = limit.as_secs_f64(),
                    "drain timed out, dropping open connections"
                );
                Ok(())
            }
        },
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("shutdown signal received, draining connections");
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        extract::ConnectInfo,
        http::{Request, StatusCode},
        routing::get as route_get,
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::users::repo::UserDirectory;

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn json_body(res: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_and_root_are_served() {
        let app = build_app(AppState::fake());
        let res = app.clone().oneshot(get("/healthz")).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);

        let res = app.oneshot(get("/")).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(json_body(res).await["status"], "healthy");
    }

    #[tokio::test]
    async fn responses_carry_request_id_and_security_headers() {
        let app = build_app(AppState::fake());
        let req = Request::builder()
            .uri("/api/v1/ping")
            .header("x-request-id", "client-abc")
            .body(Body::empty())
            .unwrap();
        let res = app.clone().oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.headers()["x-request-id"], "client-abc");
        assert_eq!(res.headers()["x-content-type-options"], "nosniff");
        assert_eq!(res.headers()["x-frame-options"], "DENY");
        assert_eq!(res.headers()["referrer-policy"], "no-referrer");

        let res = app.oneshot(get("/api/v1/ping")).await.unwrap();
        assert_eq!(res.headers()["x-request-id"].len(), 32);
    }

    #[tokio::test]
    async fn users_are_mounted_under_api_v1() {
        let state = AppState::fake();
        let app = build_app(state.clone());
        let req = Request::builder()
            .method("POST")
            .uri("/api/v1/users")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json!({"email": "a@x.com", "name": "Alice"}).to_string()))
            .unwrap();
        let res = app.clone().oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::CREATED);
        assert_eq!(state.users.count(), 1);

        let res = app.oneshot(get("/api/v1/stats/api")).await.unwrap();
        let stats = json_body(res).await;
        assert_eq!(stats["users_total"], 1);
        assert_eq!(stats["user_operations"]["create.success"], 1);
        assert_eq!(stats["total_requests"], 2);
        assert_eq!(stats["active_connections"], 1);
    }

    #[tokio::test]
    async fn oversized_bodies_are_rejected() {
        let mut config = AppConfig::default();
        config.rate_limit.enabled = false;
        config.body_limit_bytes = 64;
        let app = build_app(AppState::from_parts(config, UserDirectory::new()));
        let req = Request::builder()
            .method("POST")
            .uri("/api/v1/echo")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json!({"message": "x".repeat(200)}).to_string()))
            .unwrap();
        let res = app.oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn api_is_rate_limited_per_client_but_probes_are_not() {
        let mut config = AppConfig::default();
        config.rate_limit.requests = 2;
        config.rate_limit.period_secs = 60;
        config.seed_demo_users = false;
        let app = build_app(AppState::from_parts(config, UserDirectory::new()));

        let from = |ip: [u8; 4], uri: &str| {
            let mut req = get(uri);
            req.extensions_mut()
                .insert(ConnectInfo(SocketAddr::from((ip, 40000))));
            req
        };

        for _ in 0..2 {
            let res = app.clone().oneshot(from([10, 0, 0, 1], "/api/v1/ping")).await.unwrap();
            assert_eq!(res.status(), StatusCode::OK);
        }
        let res = app.clone().oneshot(from([10, 0, 0, 1], "/api/v1/ping")).await.unwrap();
        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
        let body = json_body(res).await;
        assert_eq!(body["error"], "rate_limited");
        assert!(body["retry_after"].as_u64().unwrap() >= 1);

        let res = app.clone().oneshot(from([10, 0, 0, 2], "/api/v1/ping")).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);

        let res = app.oneshot(from([10, 0, 0, 1], "/healthz")).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn clients_behind_a_proxy_get_their_own_buckets() {
        let mut config = AppConfig::default();
        config.rate_limit.requests = 1;
        config.seed_demo_users = false;
        let app = build_app(AppState::from_parts(config, UserDirectory::new()));

        let via_proxy = |client: &str| {
            let mut req = Request::builder()
                .uri("/api/v1/ping")
                .header("x-forwarded-for", client)
                .body(Body::empty())
                .unwrap();
            req.extensions_mut()
                .insert(ConnectInfo(SocketAddr::from(([10, 0, 0, 9], 40000))));
            req
        };

        let res = app.clone().oneshot(via_proxy("1.1.1.1")).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let res = app.clone().oneshot(via_proxy("2.2.2.2")).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let res = app.oneshot(via_proxy("1.1.1.1")).await.unwrap();
        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn handler_panics_become_internal_errors() {
        async fn boom() -> &'static str {
            panic!("boom")
        }

        let state = AppState::fake();
        let app = with_middleware(Router::new().route("/boom", route_get(boom)), state.clone());
        let res = app.oneshot(get("/boom")).await.unwrap();

        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(res.headers()["x-content-type-options"], "nosniff");
        assert!(res.headers().contains_key("x-request-id"));
        let body = json_body(res).await;
        assert_eq!(body["error"], "internal_error");
        assert_eq!(body["message"], "Internal server error");
        assert_eq!(state.stats.active_requests(), 0);
    }

    #[tokio::test]
    async fn slow_requests_are_cut_off() {
        async fn slow() -> &'static str {
            tokio::time::sleep(Duration::from_secs(5)).await;
            "late"
        }

        let mut config = AppConfig::default();
        config.rate_limit.enabled = false;
        config.seed_demo_users = false;
        config.request_timeout = Duration::from_millis(50);
        let state = AppState::from_parts(config, UserDirectory::new());
        let app = with_middleware(Router::new().route("/slow", route_get(slow)), state.clone());

        let res = app.oneshot(get("/slow")).await.unwrap();
        assert_eq!(res.status(), StatusCode::REQUEST_TIMEOUT);
        assert!(res.headers().contains_key("x-request-id"));
        assert_eq!(state.stats.active_requests(), 0);
    }

    #[tokio::test]
    async fn responses_are_gzipped_when_accepted() {
        let app = build_app(AppState::fake());
        let req = Request::builder()
            .uri("/")
            .header(header::ACCEPT_ENCODING, "gzip")
            .body(Body::empty())
            .unwrap();
        let res = app.clone().oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.headers()[header::CONTENT_ENCODING], "gzip");

        let res = app.oneshot(get("/")).await.unwrap();
        assert!(res.headers().get(header::CONTENT_ENCODING).is_none());
    }

    #[tokio::test]
    async fn drain_stops_waiting_after_limit() {
        let draining = Notify::new();
        draining.notify_one();
        let stuck = std::future::pending::<std::io::Result<()>>();
        let res = run_with_drain_limit(stuck, &draining, Duration::from_millis(20)).await;
        assert!(res.is_ok());
    }

    #[tokio::test]
    async fn server_errors_pass_through_the_drain() {
        let draining = Notify::new();
        let failing = async { Err(std::io::Error::new(std::io::ErrorKind::Other, "listener lost")) };
        let res = run_with_drain_limit(failing, &draining, Duration::from_secs(1)).await;
        assert_eq!(res.unwrap_err().to_string(), "listener lost");
    }
}
