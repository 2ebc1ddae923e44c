//! HTTP middleware for the partner API client.

use http::Extensions;
use reqwest::{Request, Response};
use reqwest_middleware::{Middleware, Next};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

use crate::utils::fmt_duration;

/// Requests slower than this are logged at warn.
const SLOW_REQUEST: Duration = Duration::from_secs(5);

/// Logs each request's method, path, status and latency. Query strings are left out.
pub struct RequestLogMiddleware;

#[async_trait::async_trait]
impl Middleware for RequestLogMiddleware {
    async fn handle(
        &self,
        req: Request,
        extensions: &mut Extensions,
        next: Next<'_>,
    ) -> reqwest_middleware::Result<Response> {
        let method = req.method().to_string();
        let path = req.url().path().to_owned();
        trace!(method = %method, path = %path, "Partner API request");

        let start = Instant::now();
        let response = next.run(req, extensions).await;
        let elapsed = start.elapsed();

        match &response {
            Ok(resp) => {
                let status = resp.status().as_u16();
                if elapsed > SLOW_REQUEST {
                    warn!(method = %method, path = %path, status, duration = fmt_duration(elapsed), "Slow partner API response");
                } else {
                    debug!(method = %method, path = %path, status, duration = fmt_duration(elapsed), "Partner API response");
                }
            }
            Err(e) => {
                warn!(method = %method, path = %path, error = %e, duration = fmt_duration(elapsed), "Partner API request failed");
            }
        }

        response
    }
}
