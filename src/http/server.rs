//! HTTP server setup and proxy pipeline.
//!
//! # Responsibilities
//! - Create the Axum router with the catch-all proxy handler
//! - Wire up middleware (tracing, request ID, concurrency limit, timeout)
//! - Forward requests to the configured upstream
//! - Pass upstream HTML responses through the rewriter
//! - Apply hot-reloaded configuration to new requests
//!
//! # Design Decisions
//! - Request bodies stream through; only HTML response bodies are buffered
//! - No retries: an upstream failure maps straight to 502
//! - The live config snapshot is swapped atomically; in-flight requests
//!   finish under the snapshot they started with

use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use axum::{
    body::Body,
    extract::State,
    http::{
        header,
        uri::{Authority, Scheme},
        HeaderValue, Request, StatusCode, Uri,
    },
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tower::limit::GlobalConcurrencyLimitLayer;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::config::{validate_config, ConfigError, GatewayConfig, ValidationError};
use crate::http::request::{RequestIdExt, RequestIdLayer};
use crate::http::rewrite;
use crate::observability::metrics;

/// Live view of the configuration, swapped atomically on reload.
pub struct SharedState {
    pub config: GatewayConfig,
    pub upstream: Authority,
}

impl SharedState {
    /// Validate a configuration and resolve the upstream authority.
    pub fn from_config(config: GatewayConfig) -> Result<Self, ConfigError> {
        validate_config(&config).map_err(ConfigError::Validation)?;

        let upstream = config.upstream.address.parse::<Authority>().map_err(|e| {
            ConfigError::Validation(vec![ValidationError::new("upstream.address", e.to_string())])
        })?;

        Ok(Self { config, upstream })
    }
}

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub inner: Arc<ArcSwap<SharedState>>,
    pub client: Client<HttpConnector, Body>,
}

/// HTTP server for the gateway.
pub struct HttpServer {
    router: Router,
    state: AppState,
}

impl HttpServer {
    /// Create a new HTTP server with the given configuration.
    pub fn new(config: GatewayConfig) -> Result<Self, ConfigError> {
        let shared = SharedState::from_config(config)?;

        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(Duration::from_secs(
            shared.config.timeouts.connect_secs,
        )));
        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(shared.config.timeouts.pool_idle_secs))
            .build(connector);

        let request_timeout = Duration::from_secs(shared.config.timeouts.request_secs);
        let max_in_flight = shared.config.listener.max_in_flight;

        let state = AppState {
            inner: Arc::new(ArcSwap::from_pointee(shared)),
            client,
        };

        let router = Self::build_router(request_timeout, max_in_flight, state.clone());
        Ok(Self { router, state })
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(request_timeout: Duration, max_in_flight: usize, state: AppState) -> Router {
        Router::new()
            .route("/{*path}", any(proxy_handler))
            .route("/", any(proxy_handler))
            .with_state(state)
            .layer(TimeoutLayer::new(request_timeout))
            .layer(GlobalConcurrencyLimitLayer::new(max_in_flight))
            .layer(RequestIdLayer)
            .layer(TraceLayer::new_for_http())
    }

    /// Run the server on the given listener until shutdown is triggered.
    ///
    /// Configurations arriving on `config_updates` are applied to new
    /// requests via an atomic swap; listener and observability settings
    /// require a restart.
    pub async fn run(
        self,
        listener: TcpListener,
        mut config_updates: mpsc::UnboundedReceiver<GatewayConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "Gateway listening");

        let live = self.state.inner.clone();
        tokio::spawn(async move {
            while let Some(new_config) = config_updates.recv().await {
                match SharedState::from_config(new_config) {
                    Ok(state) => {
                        live.store(Arc::new(state));
                        tracing::info!(
                            "Configuration reloaded; upstream and rewrite settings now live, \
                             listener and observability changes need a restart"
                        );
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Rejected config update; keeping current configuration");
                    }
                }
            }
        });

        let app = self.router.into_make_service();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received, draining connections");
            })
            .await?;

        tracing::info!("Gateway stopped");
        Ok(())
    }
}

/// Catch-all proxy handler.
/// Re-targets the request at the upstream, forwards it, and rewrites HTML replies.
async fn proxy_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let start = Instant::now();
    let request_id = request
        .request_id()
        .map(|id| id.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let method = request.method().to_string();

    let snapshot = state.inner.load_full();

    // Point the request at the upstream; method, headers, and body (including
    // the x-request-id set by the layer) are forwarded as-is.
    let (mut parts, body) = request.into_parts();

    // The rewriter reads plain text; ask the upstream not to compress.
    if snapshot.config.rewrite.enabled {
        parts
            .headers
            .insert(header::ACCEPT_ENCODING, HeaderValue::from_static("identity"));
    }

    let mut uri_parts = parts.uri.clone().into_parts();
    uri_parts.scheme = Some(Scheme::HTTP);
    uri_parts.authority = Some(snapshot.upstream.clone());
    parts.uri = match Uri::from_parts(uri_parts) {
        Ok(uri) => uri,
        Err(e) => {
            tracing::error!(request_id = %request_id, error = %e, "Failed to build upstream URI");
            metrics::record_request(&method, 502, start);
            return (StatusCode::BAD_GATEWAY, "Invalid upstream URI").into_response();
        }
    };

    tracing::debug!(
        request_id = %request_id,
        method = %parts.method,
        uri = %parts.uri,
        "Forwarding to upstream"
    );

    let upstream_response = match state.client.request(Request::from_parts(parts, body)).await {
        Ok(response) => response.map(Body::new),
        Err(e) => {
            tracing::error!(request_id = %request_id, error = %e, "Upstream request failed");
            metrics::record_request(&method, 502, start);
            return (StatusCode::BAD_GATEWAY, "Upstream request failed").into_response();
        }
    };

    if !snapshot.config.rewrite.enabled {
        metrics::record_request(&method, upstream_response.status().as_u16(), start);
        return upstream_response.into_response();
    }

    match rewrite::rewrite(upstream_response).await {
        Ok((response, outcome)) => {
            tracing::debug!(
                request_id = %request_id,
                outcome = outcome.as_label(),
                "Response rewrite complete"
            );
            metrics::record_request(&method, response.status().as_u16(), start);
            metrics::record_rewrite(outcome.as_label());
            response.into_response()
        }
        Err(e) => {
            // The upstream body is already consumed; the response cannot be replayed.
            tracing::error!(request_id = %request_id, error = %e, "Failed to rewrite upstream response");
            metrics::record_request(&method, 502, start);
            (StatusCode::BAD_GATEWAY, "Failed to read upstream response").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_state_resolves_upstream() {
        let state = SharedState::from_config(GatewayConfig::default()).unwrap();
        assert_eq!(state.upstream.as_str(), "127.0.0.1:3000");
    }

    #[test]
    fn shared_state_rejects_invalid_config() {
        let mut config = GatewayConfig::default();
        config.upstream.address = "not a host".into();
        assert!(SharedState::from_config(config).is_err());
    }
}
