use crate::api::routes;
use crate::config::{CorsConfig, ServerConfig};
use crate::vault::VaultCollection;
use anyhow::Result;
use axum::{
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method},
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub struct ApiServer {
    collection: Arc<VaultCollection>,
    config: ServerConfig,
    metrics: Option<PrometheusHandle>,
}

impl ApiServer {
    pub fn new(collection: Arc<VaultCollection>) -> Self {
        Self::with_config(collection, ServerConfig::default())
    }

    pub fn with_config(collection: Arc<VaultCollection>, config: ServerConfig) -> Self {
        Self {
            collection,
            config,
            metrics: None,
        }
    }

    /// Serve Prometheus text at GET /metrics from this recorder handle.
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Build CORS layer from configuration
    fn build_cors_layer(cors_config: &CorsConfig) -> CorsLayer {
        if !cors_config.enabled {
            return CorsLayer::new();
        }

        let origins: Vec<HeaderValue> = cors_config
            .origins
            .iter()
            .filter(|o| o.as_str() != "*")
            .filter_map(|o| o.parse().ok())
            .collect();

        let has_wildcard = cors_config.origins.iter().any(|o| o == "*");

        let cors = if has_wildcard {
            CorsLayer::new().allow_origin(tower_http::cors::Any)
        } else if origins.is_empty() {
            CorsLayer::new()
        } else {
            CorsLayer::new().allow_origin(origins)
        };

        cors.allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(tower_http::cors::Any)
        .expose_headers([axum::http::header::LOCATION])
    }

    pub fn router(&self) -> Router {
        let vault_routes = Router::new()
            .route(routes::VAULTS_PATH, post(routes::create_data_vault))
            .route(
                "/encrypted-data-vaults/:vault_id",
                get(routes::get_data_vault_configuration),
            )
            .route(
                "/encrypted-data-vaults/:vault_id/documents",
                post(routes::create_document),
            )
            .route(
                "/encrypted-data-vaults/:vault_id/documents/:doc_id",
                get(routes::read_document)
                    .put(routes::update_document)
                    .delete(routes::delete_document),
            )
            .route(
                "/encrypted-data-vaults/:vault_id/batch",
                post(routes::batch),
            )
            .route(
                "/encrypted-data-vaults/:vault_id/queries",
                post(routes::query_vault),
            )
            .route("/health", get(routes::health))
            .with_state(self.collection.clone());

        let mut router = Router::new().merge(vault_routes);

        if let Some(handle) = &self.metrics {
            let metrics_routes = Router::new()
                .route("/metrics", get(routes::metrics))
                .with_state(handle.clone());
            router = router.merge(metrics_routes);
        }

        router
            .layer(DefaultBodyLimit::max(self.config.max_body_size))
            .layer(Self::build_cors_layer(&self.config.cors))
            .layer(TraceLayer::new_for_http())
    }

    pub async fn serve(self) -> Result<()> {
        let addr = self.config.bind_addr.clone();
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        tracing::info!("Server listening on {}", addr);

        axum::serve(listener, self.router()).await?;

        Ok(())
    }
}
