//! The operator's HTTP server, exposing healthchecks & Prometheus metrics.

use std::sync::Arc;

use anyhow::Result;
use axum::http::{header::HeaderName, HeaderMap, HeaderValue, StatusCode};
use axum::{extract::Extension, routing::get, AddExtensionLayer, Router};
use futures::prelude::*;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::Config;

/// The HTTP server.
pub struct HttpServer {
    /// The application's runtime config.
    config: Arc<Config>,
    /// The handle used to render the global Prometheus recorder.
    metrics: PrometheusHandle,
    /// A channel used for triggering graceful shutdown.
    shutdown_tx: broadcast::Sender<()>,
}

impl HttpServer {
    /// Create a new instance.
    pub fn new(config: Arc<Config>, metrics: PrometheusHandle, shutdown_tx: broadcast::Sender<()>) -> Self {
        Self { config, metrics, shutdown_tx }
    }

    pub fn spawn(self) -> JoinHandle<Result<()>> {
        tokio::spawn(self.run())
    }

    async fn run(self) -> Result<()> {
        let app = router(self.metrics);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let server = axum::Server::try_bind(&([0, 0, 0, 0], self.config.http_port).into())?
            .serve(app.into_make_service())
            .with_graceful_shutdown(async move {
                let _res = shutdown_rx.recv().await;
            });
        tracing::info!("http server is listening at 0.0.0.0:{}", self.config.http_port);

        if let Err(err) = server.map_err(anyhow::Error::from).await {
            tracing::error!(error = ?err, "error from http server, shutting down");
            let _res = self.shutdown_tx.send(());
            return Err(err);
        }
        tracing::debug!("http server shutdown");
        Ok(())
    }
}

/// Build the server's router.
fn router(metrics: PrometheusHandle) -> Router {
    Router::new()
        .route("/health", get(|| async { StatusCode::OK }))
        .route("/metrics", get(prometheus_scrape))
        .layer(AddExtensionLayer::new(metrics))
}

/// Handle Prometheus metrics scraping.
async fn prometheus_scrape(Extension(state): Extension<PrometheusHandle>) -> (StatusCode, HeaderMap, String) {
    let mut headers = HeaderMap::new();
    headers.insert(HeaderName::from_static("content-type"), HeaderValue::from_static("text/plain; version=0.0.4"));
    (StatusCode::OK, headers, state.render())
}
