//! Application startup and lifecycle management.

use crate::config::QuotingConfig;
use crate::handlers;
use crate::services::{
    get_metrics, init_metrics, ChallengeService, Clock, ConversionService, Database,
    DocumentRenderer, LogDispatcher, NoopRenderer, NotificationDispatcher, SequenceAllocator,
    SmtpDispatcher, SystemClock,
};
use axum::{
    extract::State,
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use service_core::error::AppError;
use service_core::middleware::metrics::metrics_middleware;
use service_core::middleware::tracing::request_id_middleware;
use std::future::{Future, IntoFuture};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: QuotingConfig,
    pub db: Arc<Database>,
    pub allocator: SequenceAllocator,
    pub challenges: Arc<ChallengeService>,
    pub conversion: Arc<ConversionService>,
    pub dispatcher: Arc<dyn NotificationDispatcher>,
    pub renderer: Arc<dyn DocumentRenderer>,
    pub clock: Arc<dyn Clock>,
}

/// Health check endpoint for liveness probes.
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.db.health_check().await {
        Ok(_) => (
            StatusCode::OK,
            Json(json!({
                "status": "ok",
                "service": "quoting-service",
                "version": env!("CARGO_PKG_VERSION")
            })),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "Health check failed - database unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unhealthy",
                    "service": "quoting-service",
                    "error": e.to_string()
                })),
            )
        }
    }
}

/// Readiness check endpoint.
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.db.health_check().await {
        Ok(_) => StatusCode::OK,
        Err(e) => {
            tracing::warn!(error = %e, "Readiness check failed");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

/// Metrics endpoint for Prometheus scraping.
async fn metrics_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        get_metrics(),
    )
}

/// Build the HTTP router for the given state. Exposed so the tests can mount
/// the exact production routes.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/quotes", post(handlers::quote::create_quote))
        .route("/quotes/:id", get(handlers::quote::get_quote))
        .route("/quotes/:id/items", post(handlers::quote::add_quote_item))
        .route("/quotes/:id/send", post(handlers::quote::send_quote))
        .route(
            "/quotes/:id/challenge",
            post(handlers::challenge::issue_challenge),
        )
        .route(
            "/challenges/verify",
            post(handlers::challenge::verify_challenge),
        )
        .route("/quotes/:id/convert", post(handlers::quote::convert_quote))
        .route("/invoices/:id", get(handlers::quote::get_invoice))
        .route(
            "/public/quotes/:access_token",
            get(handlers::quote::get_public_quote),
        )
        .route("/totals/compute", post(handlers::totals::compute))
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    state: AppState,
}

impl Application {
    /// Build the application with the given configuration.
    pub async fn build(config: QuotingConfig) -> Result<Self, AppError> {
        let dispatcher: Arc<dyn NotificationDispatcher> = match &config.smtp {
            Some(smtp) => Arc::new(SmtpDispatcher::new(smtp)?),
            None => {
                tracing::warn!("No SMTP configured; using the log-only dispatcher");
                Arc::new(LogDispatcher)
            }
        };

        Self::build_with(
            config,
            dispatcher,
            Arc::new(NoopRenderer),
            Arc::new(SystemClock),
            true,
        )
        .await
    }

    /// Build with explicit collaborators. The test harness uses this to
    /// inject a recording dispatcher and a manually-driven clock, and to
    /// skip migrations it has already applied.
    pub async fn build_with(
        config: QuotingConfig,
        dispatcher: Arc<dyn NotificationDispatcher>,
        renderer: Arc<dyn DocumentRenderer>,
        clock: Arc<dyn Clock>,
        run_migrations: bool,
    ) -> Result<Self, AppError> {
        init_metrics();

        let db = Database::new(
            &config.database.url,
            config.database.max_connections,
            config.database.min_connections,
        )
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to connect to PostgreSQL");
            e
        })?;

        if run_migrations {
            db.run_migrations().await.map_err(|e| {
                tracing::error!(error = %e, "Failed to run migrations");
                e
            })?;
        }

        let db = Arc::new(db);

        let allocator = SequenceAllocator::new(config.engine.sequence_lock_timeout_ms);
        let challenges = Arc::new(ChallengeService::new(
            db.as_ref().clone(),
            clock.clone(),
            config.engine.challenge_ttl_minutes,
            config.engine.challenge_max_attempts,
        ));
        let conversion = Arc::new(ConversionService::new(
            db.as_ref().clone(),
            allocator.clone(),
            config.engine.invoice_prefix.clone(),
            clock.clone(),
            config.engine.invoice_due_days,
        ));

        let state = AppState {
            config: config.clone(),
            db,
            allocator,
            challenges,
            conversion,
            dispatcher,
            renderer,
            clock,
        };

        let addr = config.common.bind_address();
        let listener = TcpListener::bind(&addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %addr, "Failed to bind HTTP listener");
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!(port = port, "Quoting service listener bound");

        Ok(Self {
            port,
            listener,
            state,
        })
    }

    /// Get the port the server is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Get a reference to the database.
    pub fn db(&self) -> &Database {
        &self.state.db
    }

    /// Run the application until `shutdown` resolves, then drain in-flight
    /// requests for up to the configured grace period before closing.
    pub async fn run_until_stopped<S>(self, shutdown: S) -> std::io::Result<()>
    where
        S: Future<Output = ()> + Send + 'static,
    {
        let grace = Duration::from_secs(self.state.config.common.shutdown_grace_seconds);
        let router = router(self.state);
        tracing::info!(port = self.port, "Starting HTTP server");

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        let server = axum::serve(self.listener, router)
            .with_graceful_shutdown(async move {
                shutdown.await;
                let _ = shutdown_tx.send(());
            })
            .into_future();
        tokio::pin!(server);

        tokio::select! {
            result = &mut server => result,
            _ = async {
                let _ = shutdown_rx.await;
                tokio::time::sleep(grace).await;
            } => {
                tracing::warn!(
                    grace_seconds = grace.as_secs(),
                    "Shutdown grace period elapsed with requests still in flight"
                );
                Ok(())
            }
        }
    }
}
