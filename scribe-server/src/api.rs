//! HTTPS API handlers: login, token administration, one-shot file
//! transcription, status, and the static asset fallback.

use crate::magic;
use crate::state::AppState;
use crate::static_files;
use axum::{
    extract::{ConnectInfo, FromRequestParts, Multipart, Path, State},
    http::{header, request::Parts, HeaderMap, StatusCode, Uri},
    response::{IntoResponse, Json, Response},
};
use scribe_engine::EngineAdapter;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::{error, info, warn};

/// Multipart uploads are capped at 500 MiB.
pub const MAX_UPLOAD_SIZE: usize = 500 * 1024 * 1024;

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

/// Peer address for rate limiting; "unknown" when the transport did not
/// record one.
#[derive(Debug, Clone, Copy)]
pub struct ClientAddr(pub Option<SocketAddr>);

impl ClientAddr {
    fn ip(&self) -> String {
        self.0
            .map(|addr| addr.ip().to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }
}

impl<S: Send + Sync> FromRequestParts<S> for ClientAddr {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(ClientAddr(
            parts
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| *addr),
        ))
    }
}

fn internal_error() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "Internal server error" })),
    )
        .into_response()
}

/// `POST /api/auth/login` - validate a token, with per-IP rate limiting.
pub async fn login(
    State(state): State<AppState>,
    client_addr: ClientAddr,
    body: String,
) -> Response {
    let ip = client_addr.ip();

    let (blocked, retry_after) = state.limiter.is_blocked(&ip);
    if blocked {
        let retry_after = retry_after.unwrap_or(0);
        warn!(ip = %ip, "rate limited login attempt");
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({
                "success": false,
                "message": format!("Too many failed attempts. Try again in {retry_after} seconds."),
                "retry_after": retry_after,
            })),
        )
            .into_response();
    }

    let Ok(payload) = serde_json::from_str::<Value>(&body) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "success": false, "message": "Invalid JSON" })),
        )
            .into_response();
    };
    let token = payload.get("token").and_then(Value::as_str).unwrap_or("");

    match state.auth.validate(token) {
        Ok(Some(stored)) => {
            state.limiter.record(&ip, true);
            Json(json!({
                "success": true,
                "user": {
                    "name": stored.client_name,
                    "is_admin": stored.is_admin,
                    "created_at": stored.created_at,
                    "expires_at": stored.expires_at,
                },
            }))
            .into_response()
        }
        Ok(None) => {
            state.limiter.record(&ip, false);
            let remaining = state.limiter.remaining_attempts(&ip);
            warn!(ip = %ip, remaining, "failed login attempt");
            (
                StatusCode::UNAUTHORIZED,
                Json(json!({
                    "success": false,
                    "message": "Invalid, revoked, or expired token",
                    "remaining_attempts": remaining,
                })),
            )
                .into_response()
        }
        Err(err) => {
            error!(error = %err, "token store failure during login");
            internal_error()
        }
    }
}

/// Admin gate shared by the token endpoints.
fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<(), Response> {
    let Some(token) = bearer_token(headers) else {
        return Err((
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "Unauthorized" })),
        )
            .into_response());
    };
    match state.auth.is_admin(token) {
        Ok(true) => Ok(()),
        Ok(false) => Err((
            StatusCode::FORBIDDEN,
            Json(json!({ "error": "Admin required" })),
        )
            .into_response()),
        Err(err) => {
            error!(error = %err, "token store failure during admin check");
            Err(internal_error())
        }
    }
}

/// `GET /api/auth/tokens` - list tokens with masked hashes (admin only).
pub async fn list_tokens(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(response) = require_admin(&state, &headers) {
        return response;
    }
    match state.auth.list_tokens() {
        Ok(tokens) => Json(json!({
            "tokens": tokens
                .iter()
                .map(|t| {
                    json!({
                        "token_id": t.token_id,
                        "token": t.masked(),
                        "client_name": t.client_name,
                        "created_at": t.created_at,
                        "expires_at": t.expires_at,
                        "is_admin": t.is_admin,
                        "is_revoked": t.is_revoked,
                        "is_expired": t.is_expired(),
                    })
                })
                .collect::<Vec<_>>(),
        }))
        .into_response(),
        Err(err) => {
            error!(error = %err, "token store failure listing tokens");
            internal_error()
        }
    }
}

/// `POST /api/auth/tokens` - mint a token; the plaintext appears only in
/// this response (admin only).
pub async fn create_token(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Response {
    if let Err(response) = require_admin(&state, &headers) {
        return response;
    }
    let Ok(payload) = serde_json::from_str::<Value>(&body) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Invalid JSON" })),
        )
            .into_response();
    };

    let client_name = payload
        .get("client_name")
        .and_then(Value::as_str)
        .unwrap_or("unnamed");
    let is_admin = payload
        .get("is_admin")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let expiry_days = payload.get("expiry_days").and_then(Value::as_i64);

    match state.auth.store().generate(client_name, is_admin, expiry_days) {
        Ok((stored, plaintext)) => Json(json!({
            "success": true,
            "message": "Save this token now! It will only be shown once.",
            "token": {
                "token_id": stored.token_id,
                "token": plaintext,
                "client_name": stored.client_name,
                "created_at": stored.created_at,
                "expires_at": stored.expires_at,
                "is_admin": stored.is_admin,
            },
        }))
        .into_response(),
        Err(err) => {
            error!(error = %err, "token store failure generating token");
            internal_error()
        }
    }
}

/// `DELETE /api/auth/tokens/{token_id}` - revoke by non-secret id (admin
/// only). The active session's own token cannot be revoked.
pub async fn revoke_token(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(token_id): Path<String>,
) -> Response {
    if let Err(response) = require_admin(&state, &headers) {
        return response;
    }
    match state.auth.revoke_by_id(&token_id) {
        Ok(true) => Json(json!({ "success": true })).into_response(),
        Ok(false) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "Token not found or is active session" })),
        )
            .into_response(),
        Err(err) => {
            error!(error = %err, "token store failure revoking token");
            internal_error()
        }
    }
}

/// `POST /api/transcribe/file` - upload an audio file and transcribe it
/// synchronously. Guarded by a process-wide flag: one at a time.
pub async fn transcribe_file(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Response {
    let Some(token) = bearer_token(&headers) else {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "Unauthorized" })),
        )
            .into_response();
    };
    match state.auth.validate(token) {
        Ok(Some(_)) => {}
        Ok(None) => {
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": "Invalid token" })),
            )
                .into_response()
        }
        Err(err) => {
            error!(error = %err, "token store failure during upload auth");
            return internal_error();
        }
    }

    let Some(engine) = state.engine.clone() else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "Transcription not available" })),
        )
            .into_response();
    };

    if !state.try_claim_transcribing() {
        return (
            StatusCode::CONFLICT,
            Json(json!({ "error": "Another transcription is in progress" })),
        )
            .into_response();
    }
    let response = spool_and_transcribe(engine, multipart).await;
    state.set_transcribing(false);
    response
}

async fn spool_and_transcribe(engine: Arc<EngineAdapter>, mut multipart: Multipart) -> Response {
    let mut spooled: Option<tempfile::NamedTempFile> = None;
    let mut language: Option<String> = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(err) => {
                warn!(error = %err, "malformed multipart upload");
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({ "error": "Malformed upload" })),
                )
                    .into_response();
            }
        };

        let field_name = field.name().map(str::to_string);
        match field_name.as_deref() {
            Some("file") => {
                let mut field = field;
                let first = match field.chunk().await {
                    Ok(Some(chunk)) => chunk,
                    Ok(None) => {
                        return (
                            StatusCode::BAD_REQUEST,
                            Json(json!({ "error": "Empty file" })),
                        )
                            .into_response()
                    }
                    Err(err) => {
                        warn!(error = %err, "upload read failed");
                        return (
                            StatusCode::BAD_REQUEST,
                            Json(json!({ "error": "Malformed upload" })),
                        )
                            .into_response();
                    }
                };

                // Sniff before anything touches disk.
                let header = &first[..first.len().min(12)];
                if !magic::is_audio_header(header) {
                    warn!(header = %hex::encode(&header[..header.len().min(8)]),
                        "upload rejected: not a known audio container");
                    return (
                        StatusCode::BAD_REQUEST,
                        Json(json!({ "error": "Invalid audio file format" })),
                    )
                        .into_response();
                }

                let tmp = match tempfile::NamedTempFile::new() {
                    Ok(tmp) => tmp,
                    Err(err) => {
                        error!(error = %err, "cannot create spool file");
                        return internal_error();
                    }
                };
                let std_handle = match tmp.reopen() {
                    Ok(handle) => handle,
                    Err(err) => {
                        error!(error = %err, "cannot reopen spool file");
                        return internal_error();
                    }
                };
                let mut file = tokio::fs::File::from_std(std_handle);
                if file.write_all(&first).await.is_err() {
                    return internal_error();
                }
                loop {
                    match field.chunk().await {
                        Ok(Some(chunk)) => {
                            if file.write_all(&chunk).await.is_err() {
                                return internal_error();
                            }
                        }
                        Ok(None) => break,
                        Err(err) => {
                            warn!(error = %err, "upload read failed mid-stream");
                            return (
                                StatusCode::BAD_REQUEST,
                                Json(json!({ "error": "Malformed upload" })),
                            )
                                .into_response();
                        }
                    }
                }
                if file.flush().await.is_err() {
                    return internal_error();
                }
                spooled = Some(tmp);
            }
            Some("language") => {
                language = field.text().await.ok();
            }
            _ => {}
        }
    }

    // The temp file unlinks when `spooled` drops, success or not.
    let Some(tmp) = spooled else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "No file uploaded" })),
        )
            .into_response();
    };

    match engine
        .transcribe_file(tmp.path().to_path_buf(), language)
        .await
    {
        Ok(result) => {
            info!(words = result.words.len(), "file transcription complete");
            Json(json!({
                "success": true,
                "text": result.text,
                "segments": result.words,
                "duration": result.duration,
                "language": result.language,
            }))
            .into_response()
        }
        Err(err) => {
            error!(error = %err, "file transcription failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "error": "Transcription failed" })),
            )
                .into_response()
        }
    }
}

/// `GET /api/status` - unauthenticated server snapshot.
pub async fn server_status(State(state): State<AppState>, headers: HeaderMap) -> Json<Value> {
    let scheme = if state.tls_enabled { "wss" } else { "ws" };
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(|h| h.split(':').next().unwrap_or(h))
        .unwrap_or("localhost");
    let port = state.config.port;

    Json(json!({
        "running": true,
        "transcribing": state.is_transcribing(),
        "active_user": state.auth.active_client_name(),
        "https_port": port,
        "wss_url": format!("{scheme}://{host}:{port}/ws"),
    }))
}

/// Fallback route: static assets with SPA routing.
pub async fn static_assets(State(state): State<AppState>, uri: Uri) -> Response {
    let Some(assets_dir) = &state.config.assets_dir else {
        return (StatusCode::NOT_FOUND, "Not Found").into_response();
    };
    let requested = uri.path().trim_start_matches('/');
    static_files::serve(assets_dir, requested).await
}
