//! Eleven HSM Service HTTP Server

use std::{net::SocketAddr, sync::Arc};
use tracing::{error, info, warn};

use axum::{
    Router,
    http::{HeaderValue, header},
    routing::{get, post},
};
use eleven::{InMemoryKeyStore, KeyLifecycleService, KeyStoreGateway, SigningService};
use tower_http::{set_header::SetResponseHeaderLayer, trace::TraceLayer};

use crate::{
    config::{KeyStoreBackend, ServiceConfig},
    handlers::{self, AppState},
    pkcs11::{HsmError, Pkcs11KeyStore},
};

/// Create and configure the Axum router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health
        .route("/health", get(handlers::health))
        // Key lifecycle
        .route("/generateKey", post(handlers::generate_key))
        .route("/deleteKey", post(handlers::delete_key))
        .route("/jwks", post(handlers::jwks))
        // Signatures
        .route("/sign", post(handlers::sign))
        .route("/verifySignature", post(handlers::verify_signature))
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store, no-cache"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::PRAGMA,
            HeaderValue::from_static("no-cache"),
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Open the configured key store
pub fn open_key_store(config: &ServiceConfig) -> Result<Arc<dyn KeyStoreGateway>, HsmError> {
    match &config.backend {
        KeyStoreBackend::Pkcs11 {
            library_path,
            slot_index,
            pin,
        } => {
            info!("Initializing PKCS#11 module from {}", library_path);
            let store = Pkcs11KeyStore::new(library_path, *slot_index, pin, config.rsa_key_bits)?;
            info!("PKCS#11 token initialized successfully");
            Ok(Arc::new(store))
        }
        KeyStoreBackend::Memory => {
            warn!("Using in-memory key store, keys will not survive a restart");
            Ok(Arc::new(InMemoryKeyStore::with_rsa_bits(config.rsa_key_bits)))
        }
    }
}

/// Wire the services around a key store
pub fn app_state(gateway: Arc<dyn KeyStoreGateway>, config: &ServiceConfig) -> Arc<AppState> {
    Arc::new(AppState {
        keys: KeyLifecycleService::new(gateway.clone()),
        signing: SigningService::with_policy(gateway, config.signing_input_policy),
        subject_name: config.subject_name.clone(),
    })
}

/// Run the HTTP server
pub async fn run(
    listener: tokio::net::TcpListener,
    config: ServiceConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let gateway =
        open_key_store(&config).map_err(|e| format!("Failed to initialize key store: {}", e))?;
    let app = create_router(app_state(gateway, &config));

    info!(
        policy = %config.signing_input_policy,
        "Eleven HSM service listening on {}",
        listener
            .local_addr()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], 0)))
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Wait for SIGTERM or SIGINT signal
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C signal"),
            Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
                info!("Received SIGTERM signal");
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Starting graceful shutdown...");
}
