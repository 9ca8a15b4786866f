//! # magicpixa: credit-metered generative photo editing
//!
//! `magicpixa` is the backend for an AI photo-editing product. Clients send a photo and pick a
//! feature (enhancement, colorization, age shift, celebrity selfies, room restyling, captions);
//! the server turns the choice into a prompt, calls a hosted generative model, stores the result and
//! charges the user's credit balance.
//!
//! ## Overview
//!
//! Signed-in users pay with credits. Every job reserves its cost before the model is called, and
//! the hold is only turned into a charge once the result has been stored and handed back, so a
//! failed or abandoned job never costs anything. Anonymous visitors get a small free quota tied to
//! a signed device token instead.
//!
//! ### Request Flow
//!
//! A request to `POST /api/v1/jobs` is authenticated either by the trusted user header set by the
//! auth proxy in front of the server, or by an `x-device-token`. The [`orchestrator`] then:
//!
//! 1. Resolves the feature's price and retry budget and renders its prompt ([`prompts`])
//! 2. Reserves credits in the ledger ([`store`]), or consumes one unit of anonymous quota
//! 3. Calls the model through the [`gateway`]
//! 4. Uploads generated media to the [`object_store`] and records the artifact
//! 5. Commits the reservation, or releases it if anything went wrong
//!
//! Jobs may carry an `Idempotency-Key` header; repeating a key replays the original result without
//! charging again.
//!
//! ### Core Components
//!
//! The **API layer** ([`api`]) exposes the REST surface under `/api/v1`, documented at `/docs`.
//!
//! The **authentication layer** ([`auth`]) resolves users from proxy headers, creating accounts on
//! first sight, and verifies anonymous device tokens. Permissions are role based.
//!
//! The **store** ([`store`]) owns users, the credit ledger, reservations, artifacts, device quotas
//! and payment orders. It runs on PostgreSQL ([`db`]) in production and in memory for development.
//!
//! **Background services** currently consist of the [`reconciler`], which settles reservations
//! left behind by interrupted jobs.
//!
//! ## Quick Start
//!
//! ```no_run
//! use clap::Parser;
//! use magicpixa::{Application, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = magicpixa::config::Args::parse();
//!     let config = Config::load(&args)?;
//!
//!     magicpixa::telemetry::init_telemetry(config.enable_otel_export)?;
//!
//!     let app = Application::new(config).await?;
//!     app.serve(async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     })
//!     .await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! See the [`config`] module for configuration options.
pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod errors;
pub mod gateway;
pub mod object_store;
mod openapi;
pub mod orchestrator;
pub mod payment_providers;
pub mod prompts;
pub mod reconciler;
pub mod store;
pub mod telemetry;
pub mod types;

#[cfg(test)]
pub mod test_utils;

use crate::{
    api::models::users::Role,
    auth::device::DeviceTokens,
    config::{CorsOrigin, ObjectStorageConfig},
    db::models::users::UserCreateDBRequest,
    gateway::ModelGateway,
    object_store::ObjectStore,
    openapi::ApiDoc,
    orchestrator::Orchestrator,
    payment_providers::PaymentProvider,
    prompts::PromptRenderer,
    reconciler::Reconciler,
    store::Store,
};
use axum::{
    Json, Router,
    extract::DefaultBodyLimit,
    http::{self, HeaderValue},
    routing::{get, post},
};
use axum_prometheus::PrometheusMetricLayer;
use bon::Builder;
pub use config::Config;
use sqlx::PgPool;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    services::ServeDir,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, debug, info, instrument};
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

pub use types::{ArtifactId, DeviceId, UserId};

/// Extra room on top of the image limit for base64 expansion and the JSON envelope
const JOB_BODY_OVERHEAD: usize = 64 * 1024;

/// Application state shared across all request handlers.
///
/// Everything here is cheap to clone: the store, gateway and object store are trait objects
/// behind `Arc`s, so the in-memory and PostgreSQL backends are interchangeable.
///
/// # Example
///
/// ```ignore
/// let state = AppState::builder()
///     .config(config)
///     .store(store)
///     .orchestrator(Arc::new(orchestrator))
///     .object_store(object_store)
///     .device_tokens(device_tokens)
///     .build();
/// ```
#[derive(Clone, Builder)]
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn Store>,
    pub orchestrator: Arc<Orchestrator>,
    pub object_store: Arc<dyn ObjectStore>,
    pub device_tokens: DeviceTokens,
    pub payment_provider: Option<Arc<dyn PaymentProvider>>,
}

/// Get the magicpixa database migrator
pub fn migrator() -> sqlx::migrate::Migrator {
    sqlx::migrate!("./migrations")
}

/// Wire the configured backends into an [`AppState`].
///
/// Shared by [`Application::new`] and the test helpers so both build the orchestrator the same way.
pub(crate) fn assemble_state(
    config: Config,
    store: Arc<dyn Store>,
    gateway: Arc<dyn ModelGateway>,
    object_store: Arc<dyn ObjectStore>,
) -> anyhow::Result<AppState> {
    let secret_key = config
        .secret_key
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("secret_key is required to sign device tokens"))?;
    let device_tokens = DeviceTokens::new(secret_key)?;

    let payment_provider = config.payment.as_ref().map(payment_providers::create_provider).transpose()?;

    let orchestrator = Orchestrator::builder()
        .store(store.clone())
        .gateway(gateway)
        .object_store(object_store.clone())
        .prompts(PromptRenderer::new(&config.prompts)?)
        .features(config.features.clone())
        .credits(config.credits.clone())
        .limits(config.limits.clone())
        .build();

    Ok(AppState::builder()
        .config(config)
        .store(store)
        .orchestrator(Arc::new(orchestrator))
        .object_store(object_store)
        .device_tokens(device_tokens)
        .maybe_payment_provider(payment_provider)
        .build())
}

/// Create the initial platform manager account, or promote it if it already exists.
///
/// Idempotent; called on every startup so there is always an administrator.
#[instrument(skip_all)]
pub async fn create_initial_admin_user(email: &str, config: &Config, store: &dyn Store) -> anyhow::Result<UserId> {
    let user = store
        .get_or_create_user(&UserCreateDBRequest {
            email: email.to_string(),
            display_name: None,
            plan: config.credits.default_plan.clone(),
            roles: vec![Role::PlatformManager],
            is_admin: true,
            signup_bonus: config.credits.signup_bonus,
        })
        .await?;

    if !user.is_admin || !user.roles.contains(&Role::PlatformManager) {
        let mut roles = user.roles.clone();
        if !roles.contains(&Role::PlatformManager) {
            roles.push(Role::PlatformManager);
        }
        store.set_roles(user.id, &roles, true).await?;
    }

    Ok(user.id)
}

fn create_cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    let cors_config = &config.auth.security.cors;

    // tower-http rejects `*` inside an origin list
    let allow_origin = if cors_config.allowed_origins.iter().any(|o| matches!(o, CorsOrigin::Wildcard)) {
        AllowOrigin::any()
    } else {
        let mut origins = Vec::new();
        for origin in &cors_config.allowed_origins {
            if let CorsOrigin::Url(url) = origin {
                origins.push(url.as_str().trim_end_matches('/').parse::<HeaderValue>()?);
            }
        }
        AllowOrigin::list(origins)
    };

    let mut cors = CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([http::Method::GET, http::Method::POST, http::Method::OPTIONS])
        .allow_headers([
            http::header::CONTENT_TYPE,
            http::HeaderName::from_static(auth::device::DEVICE_TOKEN_HEADER),
            http::HeaderName::from_static(api::handlers::jobs::IDEMPOTENCY_KEY_HEADER),
        ])
        .allow_credentials(cors_config.allow_credentials)
        .expose_headers(vec![http::header::LOCATION]);

    if let Some(max_age) = cors_config.max_age {
        cors = cors.max_age(std::time::Duration::from_secs(max_age));
    }

    Ok(cors)
}

/// Build the main application router with all endpoints and middleware.
///
/// - `/healthz`: liveness
/// - `/api/v1/*`: the REST API
/// - `/media/*`: generated media when stored on the local filesystem
/// - `/docs`: interactive API reference
/// - `/internal/metrics`: Prometheus scrape endpoint, when enabled
#[instrument(skip_all)]
pub fn build_router(state: &AppState) -> anyhow::Result<Router> {
    let limits = &state.config.limits;
    let job_body_limit = limits.max_image_bytes.saturating_mul(4) / 3 + JOB_BODY_OVERHEAD;
    let upload_body_limit = limits.max_upload_bytes + JOB_BODY_OVERHEAD;

    let api_routes = Router::new()
        .route("/features", get(api::handlers::features::list_features))
        .route("/devices", post(api::handlers::devices::register_device))
        .route("/quota", get(api::handlers::devices::get_quota))
        .route(
            "/jobs",
            post(api::handlers::jobs::create_job).layer(DefaultBodyLimit::max(job_body_limit)),
        )
        .route(
            "/uploads",
            post(api::handlers::uploads::upload_photo).layer(DefaultBodyLimit::max(upload_body_limit)),
        )
        .route("/users/current", get(api::handlers::users::get_current_user))
        .route(
            "/transactions",
            get(api::handlers::transactions::list_transactions).post(api::handlers::transactions::create_transaction),
        )
        .route("/artifacts", get(api::handlers::artifacts::list_artifacts))
        .route("/artifacts/{artifact_id}", get(api::handlers::artifacts::get_artifact))
        .route("/payments/orders", post(api::handlers::payments::create_payment_order))
        .with_state(state.clone());

    let mut router = Router::new()
        .route("/healthz", get(|| async { "OK" }))
        .route("/api-docs/openapi.json", get(|| async { Json(ApiDoc::openapi()) }))
        .nest("/api/v1", api_routes)
        .merge(Scalar::with_url("/docs", ApiDoc::openapi()));

    // Locally stored media is served by the API itself; S3 objects are public URLs
    if let ObjectStorageConfig::Local(local) = &state.config.object_storage {
        router = router.nest_service("/media", ServeDir::new(&local.path));
    }

    let cors_layer = create_cors_layer(&state.config)?;
    router = router.layer(cors_layer);

    if state.config.enable_metrics {
        let (prometheus_layer, metric_handle) = PrometheusMetricLayer::pair();
        router = router
            .route("/internal/metrics", get(|| async move { metric_handle.render() }))
            .layer(prometheus_layer);
    }

    let router = router.layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_request(DefaultOnRequest::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    );

    Ok(router)
}

/// Container for background services and their lifecycle management.
///
/// When dropped, the `drop_guard` cancels the shutdown token, signalling every task to stop.
pub struct BackgroundServices {
    background_tasks: Vec<tokio::task::JoinHandle<()>>,
    shutdown_token: tokio_util::sync::CancellationToken,
    // Pub so that we can disarm it if we want to
    pub drop_guard: Option<tokio_util::sync::DropGuard>,
}

impl BackgroundServices {
    /// Gracefully shutdown all background tasks
    pub async fn shutdown(self) {
        self.shutdown_token.cancel();

        for handle in self.background_tasks {
            let _ = handle.await;
        }
    }
}

fn setup_background_services(
    store: Arc<dyn Store>,
    config: &Config,
    shutdown_token: tokio_util::sync::CancellationToken,
) -> BackgroundServices {
    let drop_guard = shutdown_token.clone().drop_guard();
    let mut background_tasks = Vec::new();

    if config.reconciler.enabled {
        let reconciler = Reconciler::new(store, &config.reconciler, config.credits.reservation_ttl);
        background_tasks.push(tokio::spawn(reconciler::run_reconciler(
            reconciler,
            config.reconciler.interval,
            shutdown_token.clone(),
        )));
    } else {
        info!("Reservation reconciler disabled");
    }

    BackgroundServices {
        background_tasks,
        shutdown_token,
        drop_guard: Some(drop_guard),
    }
}

/// Main application struct that owns all resources.
///
/// 1. **Create**: [`Application::new`] connects the store, builds the backends and starts
///    background services
/// 2. **Serve**: [`Application::serve`] binds to a TCP port and starts handling requests
/// 3. **Shutdown**: When the shutdown signal is received, stops background services and closes
///    the database pool
pub struct Application {
    router: Router,
    config: Config,
    pool: Option<PgPool>,
    bg_services: BackgroundServices,
}

impl Application {
    /// Create a new application instance with all resources initialized
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        debug!("Starting magicpixa with configuration: {:#?}", config);

        let (store, pool) = store::create_store(&config.database).await?;
        let gateway = gateway::create_gateway(&config.gateway)?;
        let object_store = object_store::create_object_store(&config.object_storage).await?;

        let admin_id = create_initial_admin_user(&config.admin_email, &config, store.as_ref()).await?;
        info!(admin_id = %admin_id, email = %config.admin_email, "Initial admin user ready");

        let shutdown_token = tokio_util::sync::CancellationToken::new();
        let bg_services = setup_background_services(store.clone(), &config, shutdown_token);

        let app_state = assemble_state(config.clone(), store, gateway, object_store)?;
        let router = build_router(&app_state)?;

        Ok(Self {
            router,
            config,
            pool,
            bg_services,
        })
    }

    /// Convert application into a test server (for tests)
    #[cfg(test)]
    pub fn into_test_server(self) -> (axum_test::TestServer, BackgroundServices) {
        let server = axum_test::TestServer::new(self.router).expect("Failed to create test server");
        (server, self.bg_services)
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!(
            "Magicpixa listening on http://{}, available at http://localhost:{}",
            bind_addr, self.config.port
        );

        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await?;

        self.bg_services.shutdown().await;

        if let Some(pool) = self.pool {
            info!("Closing database connections...");
            pool.close().await;
        }

        info!("Shutting down telemetry...");
        telemetry::shutdown_telemetry();

        Ok(())
    }
}
