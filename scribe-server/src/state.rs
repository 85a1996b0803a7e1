use crate::auth::AuthManager;
use crate::config::{Environment, ServerConfig};
use crate::rate_limit::RateLimiter;
use scribe_engine::EngineAdapter;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared server state handed to every handler.
///
/// The session lock lives in the auth manager; `transcribing` is the
/// process-wide flag shared by streaming sessions and one-shot file
/// uploads, so the two can never run concurrently.
#[derive(Clone)]
pub struct AppState {
    pub auth: Arc<AuthManager>,
    pub limiter: Arc<RateLimiter>,
    pub engine: Option<Arc<EngineAdapter>>,
    pub config: Arc<ServerConfig>,
    pub environment: Environment,
    pub tls_enabled: bool,
    transcribing: Arc<AtomicBool>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("tls_enabled", &self.tls_enabled)
            .field("transcribing", &self.is_transcribing())
            .finish()
    }
}

impl AppState {
    pub fn new(
        auth: Arc<AuthManager>,
        limiter: Arc<RateLimiter>,
        engine: Option<Arc<EngineAdapter>>,
        config: Arc<ServerConfig>,
        environment: Environment,
        tls_enabled: bool,
    ) -> Self {
        AppState {
            auth,
            limiter,
            engine,
            config,
            environment,
            tls_enabled,
            transcribing: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_transcribing(&self) -> bool {
        self.transcribing.load(Ordering::SeqCst)
    }

    pub fn set_transcribing(&self, value: bool) {
        self.transcribing.store(value, Ordering::SeqCst);
    }

    /// Claim the transcribing flag; `false` when someone else holds it.
    pub fn try_claim_transcribing(&self) -> bool {
        self.transcribing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}
