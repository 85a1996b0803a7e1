//! Remote transcription server.
//!
//! A single TLS listener carries the HTTPS API (login, token
//! administration, one-shot file transcription, static UI) and the `/ws`
//! streaming endpoint. Authentication is token-based against a persistent
//! hashed store, and at most one streaming session is active at a time.
//!
//! The transcription backend is pluggable: embedders hand the server an
//! [`scribe_engine::EngineAdapter`] built over their [`scribe_engine::ModelLoader`].

pub mod api;
pub mod auth;
pub mod config;
pub mod headers;
pub mod logging;
pub mod magic;
pub mod rate_limit;
pub mod server;
pub mod state;
pub mod static_files;
pub mod tls;
pub mod token_store;
pub mod ws;

#[cfg(test)]
pub(crate) mod test_support;

pub use auth::{AuthManager, AuthSession};
pub use config::{Environment, ServerConfig};
pub use rate_limit::RateLimiter;
pub use server::{router, Server, ServerError};
pub use state::AppState;
pub use token_store::{hash_token, StoreError, StoredToken, TokenStore};
