//! Test utilities shared by the unit and handler tests.

use std::collections::VecDeque;
use std::sync::{Arc, Once};

use async_trait::async_trait;
use axum_test::TestServer;
use parking_lot::Mutex;
use url::Url;

use crate::{
    AppState,
    config::{Config, DatabaseConfig, GatewayConfig, LocalStorageConfig, ObjectStorageConfig},
    gateway::{GatewayError, GenerationOutput, GenerationRequest, ModelGateway, dummy::DummyGateway},
    object_store::create_object_store,
    store::{InMemoryStore, Store},
};

/// A 1x1 PNG header, enough for anything that only checks the mime type and size.
pub fn png_data_uri() -> String {
    "data:image/png;base64,iVBORw0KGgo=".to_string()
}

/// Install the rustls crypto provider used by reqwest clients in tests.
pub fn install_crypto_provider() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    });
}

pub fn create_test_config() -> Config {
    // Local media lands in a per-process temp directory
    let media_dir = std::env::temp_dir().join(format!("magicpixa-test-media-{}", std::process::id()));

    let mut config = Config {
        database: DatabaseConfig::Memory,
        secret_key: Some("test-secret-key".to_string()),
        gateway: GatewayConfig::Dummy,
        object_storage: ObjectStorageConfig::Local(LocalStorageConfig {
            path: media_dir,
            public_base_url: Url::parse("http://localhost:3001/media").expect("valid url"),
        }),
        payment: None,
        enable_metrics: false,
        enable_otel_export: false,
        ..Default::default()
    };
    config.reconciler.enabled = false;
    config
}

/// Build state on the in-memory store with the dummy gateway.
pub async fn create_test_state(config: Config) -> AppState {
    create_test_state_with_gateway(config, Arc::new(DummyGateway)).await
}

pub async fn create_test_state_with_gateway(config: Config, gateway: Arc<dyn ModelGateway>) -> AppState {
    install_crypto_provider();
    let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
    let object_store = create_object_store(&config.object_storage)
        .await
        .expect("Failed to create object store");

    crate::assemble_state(config, store, gateway, object_store).expect("Failed to assemble state")
}

pub fn test_server(state: AppState) -> TestServer {
    let router = crate::build_router(&state).expect("Failed to build router");
    TestServer::new(router).expect("Failed to create test server")
}

pub async fn create_test_app(config: Config) -> TestServer {
    test_server(create_test_state(config).await)
}

pub async fn create_test_app_with_gateway(config: Config, gateway: Arc<dyn ModelGateway>) -> TestServer {
    test_server(create_test_state_with_gateway(config, gateway).await)
}

/// Gateway that replays a fixed script of results, then falls back to echoing like
/// [`DummyGateway`]. Records every request it receives.
#[derive(Default)]
pub struct ScriptedGateway {
    script: Mutex<VecDeque<Result<GenerationOutput, GatewayError>>>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedGateway {
    pub fn new(script: Vec<Result<GenerationOutput, GatewayError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// No script; every call echoes.
    pub fn echo() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl ModelGateway for ScriptedGateway {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationOutput, GatewayError> {
        self.requests.lock().push(request.clone());
        let next = self.script.lock().pop_front();
        match next {
            Some(result) => result,
            None => DummyGateway.generate(request).await,
        }
    }
}
