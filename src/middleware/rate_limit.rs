use std::{
    collections::HashMap,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    time::{Duration, Instant},
};

use axum::{
    extract::{ConnectInfo, Request, State},
    http::HeaderMap,
    middleware::Next,
    response::{IntoResponse, Response},
};
use parking_lot::Mutex;
use tracing::warn;

use crate::{error::ApiError, state::AppState};

/// Buckets are swept for expired windows once the map grows past this.
const SWEEP_THRESHOLD: usize = 10_000;

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u32,
    resets_at: Instant,
}

/// Fixed-window request counter per client address.
#[derive(Debug)]
pub struct RateLimiter {
    limit: u32,
    period: Duration,
    buckets: Mutex<HashMap<IpAddr, Window>>,
}

impl RateLimiter {
    pub fn new(limit: u32, period: Duration) -> Self {
        Self {
            limit,
            period,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// `Err` carries how long the caller has to wait.
    pub fn check(&self, client: IpAddr) -> Result<(), Duration> {
        self.check_at(client, Instant::now())
    }

    fn check_at(&self, client: IpAddr, now: Instant) -> Result<(), Duration> {
        let mut buckets = self.buckets.lock();
        if buckets.len() > SWEEP_THRESHOLD {
            buckets.retain(|_, w| w.resets_at > now);
        }

        let window = buckets.entry(client).or_insert(Window {
            count: 0,
            resets_at: now + self.period,
        });
        if now >= window.resets_at {
            *window = Window {
                count: 0,
                resets_at: now + self.period,
            };
        }
        window.count = window.count.saturating_add(1);

        if window.count > self.limit {
            Err(window.resets_at.saturating_duration_since(now))
        } else {
            Ok(())
        }
    }
}

/// Address a reverse proxy reported for the client, if any.
fn forwarded_ip(headers: &HeaderMap) -> Option<IpAddr> {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

    ["true-client-ip", "x-real-ip"]
        .into_iter()
        .filter_map(header)
        .chain(header("x-forwarded-for").and_then(|v| v.split(',').next()))
        .find_map(|v| v.trim().parse().ok())
}

fn client_ip(req: &Request, trust_proxy_headers: bool) -> IpAddr {
    trust_proxy_headers
        .then(|| forwarded_ip(req.headers()))
        .flatten()
        .or_else(|| {
            req.extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip())
        })
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}

pub async fn limit_by_ip(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let Some(limiter) = state.rate_limiter.as_deref() else {
        return next.run(req).await;
    };

    let ip = client_ip(&req, state.config.rate_limit.trust_proxy_headers);
    match limiter.check(ip) {
        Ok(()) => next.run(req).await,
        Err(wait) => {
            warn!(client = %ip, retry_after_ms = wait.as_millis() as u64, "rate limit exceeded");
            let retry_after = wait.as_secs_f64().ceil().max(1.0) as u64;
            ApiError::RateLimited { retry_after }.into_response()
        }
    }
}
