//! Server assembly: router construction, TLS binding, graceful shutdown.

use crate::api;
use crate::auth::AuthManager;
use crate::config::{Environment, ServerConfig};
use crate::headers::security_headers;
use crate::rate_limit::RateLimiter;
use crate::state::AppState;
use crate::tls::{self, TlsError};
use crate::token_store::{StoreError, TokenStore};
use crate::ws;
use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{delete, get, post},
    Router,
};
use scribe_engine::EngineAdapter;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Tls(#[from] TlsError),
    #[error("invalid bind address: {0}")]
    BindAddr(#[from] std::net::AddrParseError),
    #[error("server I/O: {0}")]
    Io(#[from] std::io::Error),
}

/// Build the full application router over shared state.
pub fn router(state: AppState) -> Router {
    let environment = state.environment;
    Router::new()
        .route("/api/auth/login", post(api::login))
        .route(
            "/api/auth/tokens",
            get(api::list_tokens).post(api::create_token),
        )
        .route("/api/auth/tokens/{token_id}", delete(api::revoke_token))
        .route("/api/transcribe/file", post(api::transcribe_file))
        .route("/api/status", get(api::server_status))
        .route("/ws", get(ws::websocket_handler))
        .fallback(api::static_assets)
        .layer(DefaultBodyLimit::max(api::MAX_UPLOAD_SIZE))
        .layer(middleware::from_fn_with_state(environment, security_headers))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

/// The remote transcription server: one TLS listener carrying the HTTPS
/// API, the static UI, and the `/ws` streaming endpoint.
pub struct Server {
    state: AppState,
    config: Arc<ServerConfig>,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("host", &self.config.host)
            .field("port", &self.config.port)
            .finish()
    }
}

impl Server {
    /// Construct the server. Initialization order: token store, auth
    /// manager, rate limiter, engine (lazy, may be absent). When the store
    /// was just created or migrated, the second return value is the fresh
    /// admin token plaintext - show it to the operator once.
    pub fn new(
        config: ServerConfig,
        engine: Option<Arc<EngineAdapter>>,
    ) -> Result<(Server, Option<String>), ServerError> {
        let (store, bootstrap_token) = TokenStore::open(config.token_store_path())?;
        let auth = Arc::new(AuthManager::new(store));
        let limiter = Arc::new(RateLimiter::default());
        let tls_enabled = config.tls.enabled;
        let config = Arc::new(config);
        let state = AppState::new(
            auth,
            limiter,
            engine,
            config.clone(),
            Environment::from_env(),
            tls_enabled,
        );
        Ok((Server { state, config }, bootstrap_token))
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn router(&self) -> Router {
        router(self.state.clone())
    }

    /// Bind and serve until a termination signal arrives. TLS material is
    /// resolved (and self-signed material generated) here; a missing
    /// certificate with auto-generation disabled aborts startup.
    pub async fn run(self) -> Result<(), ServerError> {
        let material = tls::resolve_material(&self.config.tls, &self.config.data_dir)?;
        let ip: IpAddr = self.config.host.parse()?;
        let addr = SocketAddr::new(ip, self.config.port);

        let handle = axum_server::Handle::new();
        tokio::spawn(shutdown_on_signal(handle.clone()));

        let app = self
            .router()
            .into_make_service_with_connect_info::<SocketAddr>();

        match material {
            Some(material) => {
                info!(%addr, "starting server with TLS");
                info!("  Web UI:    https://{addr}");
                info!("  WebSocket: wss://{addr}/ws");
                let rustls_config = material.into_rustls_config().await?;
                axum_server::bind_rustls(addr, rustls_config)
                    .handle(handle)
                    .serve(app)
                    .await?;
            }
            None => {
                info!(%addr, "starting server without TLS");
                axum_server::bind(addr).handle(handle).serve(app).await?;
            }
        }
        info!("server stopped");
        Ok(())
    }
}

async fn shutdown_on_signal(handle: axum_server::Handle<SocketAddr>) {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("termination signal received, shutting down");
    handle.graceful_shutdown(Some(std::time::Duration::from_secs(10)));
}
