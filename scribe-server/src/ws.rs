//! The streaming WebSocket session.
//!
//! One receive loop per connection dispatches on message kind: text frames
//! are control messages, binary frames are audio. The session state machine
//! (idle -> recording -> finalizing) lives in [`SessionHandler`]; the
//! socket is abstracted behind [`SessionSocket`] so the machine can be
//! driven without a network in tests.

use crate::state::AppState;
use crate::token_store::StoredToken;
use async_trait::async_trait;
use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        State,
    },
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use scribe_core::{realtime_message, AudioChunk, ControlMessage, MessageType, SAMPLE_RATE};
use scribe_engine::TranscribeOptions;
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Events a session cares about. Ping/pong and close bookkeeping stay in
/// the transport adapter.
#[derive(Debug, Clone, PartialEq)]
pub enum SocketEvent {
    Text(String),
    Binary(Vec<u8>),
}

/// The peer went away; any pending result is discarded.
#[derive(Debug)]
pub struct SocketClosed;

#[async_trait]
pub trait SessionSocket: Send {
    /// Next event, or `None` once the connection is closed.
    async fn next_event(&mut self) -> Option<SocketEvent>;
    async fn send_message(&mut self, msg: &ControlMessage) -> Result<(), SocketClosed>;
}

#[async_trait]
impl SessionSocket for WebSocket {
    async fn next_event(&mut self) -> Option<SocketEvent> {
        loop {
            match self.recv().await {
                None | Some(Err(_)) | Some(Ok(WsMessage::Close(_))) => return None,
                Some(Ok(WsMessage::Text(text))) => return Some(SocketEvent::Text(text.to_string())),
                Some(Ok(WsMessage::Binary(data))) => {
                    return Some(SocketEvent::Binary(data.to_vec()))
                }
                // Ping/pong are answered by the transport.
                Some(Ok(_)) => continue,
            }
        }
    }

    async fn send_message(&mut self, msg: &ControlMessage) -> Result<(), SocketClosed> {
        let json = msg.to_json().map_err(|_| SocketClosed)?;
        self.send(WsMessage::Text(json.into()))
            .await
            .map_err(|_| SocketClosed)
    }
}

/// Origin allowlist for the WebSocket upgrade (CSWSH protection).
///
/// A missing `Origin` is allowed - non-browser clients do not send one.
/// Browsers must come from this host, localhost, loopback, or a mesh-VPN
/// address (hosts beginning with `100.`), with or without the port.
pub fn is_valid_origin(
    origin: Option<&str>,
    request_host: Option<&str>,
    port: u16,
    tls_enabled: bool,
) -> bool {
    let Some(origin) = origin else {
        return true;
    };

    let host = request_host
        .map(|h| h.split(':').next().unwrap_or(h))
        .unwrap_or("localhost");
    let scheme = if tls_enabled { "https" } else { "http" };

    let mut allowed = vec![
        format!("{scheme}://{host}:{port}"),
        format!("{scheme}://{host}"),
        format!("{scheme}://localhost:{port}"),
        format!("{scheme}://localhost"),
        format!("{scheme}://127.0.0.1:{port}"),
        format!("{scheme}://127.0.0.1"),
    ];
    if host.starts_with("100.") {
        allowed.push(format!("{scheme}://{host}:{port}"));
        allowed.push(format!("{scheme}://{host}"));
    }

    allowed.iter().any(|a| a == origin)
}

/// `GET /ws` - upgrade after origin validation.
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Response {
    let origin = headers.get(header::ORIGIN).and_then(|v| v.to_str().ok());
    let host = headers.get(header::HOST).and_then(|v| v.to_str().ok());
    if !is_valid_origin(origin, host, state.config.port, state.tls_enabled) {
        warn!(origin = origin.unwrap_or(""), "websocket rejected: invalid origin");
        return (StatusCode::FORBIDDEN, "Origin not allowed").into_response();
    }
    ws.on_upgrade(move |socket| run_session(socket, state))
}

/// Per-session configuration, set by `start` and adjustable via `config`.
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    pub language: Option<String>,
    pub enable_realtime: bool,
    pub word_timestamps: bool,
}

impl SessionConfig {
    fn from_start(data: &Value) -> SessionConfig {
        SessionConfig {
            language: data
                .get("language")
                .and_then(Value::as_str)
                .map(str::to_string),
            enable_realtime: data
                .get("enable_realtime")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            word_timestamps: data
                .get("word_timestamps")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        }
    }

    fn to_json(&self) -> Value {
        json!({
            "language": self.language,
            "enable_realtime": self.enable_realtime,
            "word_timestamps": self.word_timestamps,
        })
    }
}

/// Post-auth session state machine.
#[derive(Debug)]
pub struct SessionHandler {
    state: AppState,
    client: StoredToken,
    session_config: SessionConfig,
    recording: bool,
    accumulator: Vec<f32>,
}

impl SessionHandler {
    pub fn new(state: AppState, client: StoredToken) -> Self {
        SessionHandler {
            state,
            client,
            session_config: SessionConfig::default(),
            recording: false,
            accumulator: Vec::new(),
        }
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    /// Handle one control frame; returns the replies to send, in order.
    pub async fn handle_text(&mut self, text: &str) -> Vec<ControlMessage> {
        let msg = match ControlMessage::from_json(text) {
            Ok(msg) => msg,
            Err(err) => {
                warn!(error = %err, "bad control frame");
                return vec![ControlMessage::error(&err.to_string(), err.code())];
            }
        };
        debug!(kind = %msg.kind, "control message");

        match msg.kind {
            MessageType::Ping => vec![ControlMessage::pong()],
            MessageType::Start => vec![self.handle_start(&msg.data)],
            MessageType::Stop => vec![self.handle_stop().await],
            MessageType::Config => vec![self.handle_config(&msg.data)],
            other => vec![ControlMessage::error(
                &format!("Unknown message type: {other}"),
                "unknown_type",
            )],
        }
    }

    fn handle_start(&mut self, data: &Value) -> ControlMessage {
        if self.recording || !self.state.try_claim_transcribing() {
            return ControlMessage::error("Transcription already in progress", "already_started");
        }

        self.session_config = SessionConfig::from_start(data);
        self.recording = true;
        self.accumulator.clear();
        info!(
            client = %self.client.client_name,
            language = self.session_config.language.as_deref().unwrap_or("auto"),
            realtime = self.session_config.enable_realtime,
            "recording session started"
        );
        ControlMessage::session_started(self.session_config.to_json())
    }

    async fn handle_stop(&mut self) -> ControlMessage {
        if !self.recording {
            return ControlMessage::error("No active recording session", "not_started");
        }
        self.recording = false;
        self.state.set_transcribing(false);

        let samples = std::mem::take(&mut self.accumulator);
        info!(
            seconds = samples.len() as f64 / SAMPLE_RATE as f64,
            "finalizing transcription"
        );

        if samples.is_empty() {
            return ControlMessage::session_stopped("No audio received");
        }

        let Some(engine) = self.state.engine.clone() else {
            return ControlMessage::new(
                MessageType::SessionStopped,
                json!({
                    "message": "Recording stopped (no transcriber)",
                    "duration": samples.len() as f64 / SAMPLE_RATE as f64,
                }),
            );
        };

        let options = TranscribeOptions {
            language: self.session_config.language.clone(),
            word_timestamps: self.session_config.word_timestamps,
        };
        match engine.transcribe(samples, options).await {
            Ok(result) => result.to_final_message(),
            Err(err) => {
                // Generic message on the wire; detail stays in the log.
                error!(error = %err, "final transcription failed");
                ControlMessage::error("Transcription failed", "transcription_error")
            }
        }
    }

    /// `config` is only meaningful while recording; the session
    /// configuration outside a recording comes from the next `start`.
    fn handle_config(&mut self, data: &Value) -> ControlMessage {
        if !self.recording {
            return ControlMessage::error("No active recording session", "not_started");
        }
        if let Some(requested) = data.get("language").and_then(Value::as_str) {
            if Some(requested) != self.session_config.language.as_deref() {
                return ControlMessage::error(
                    "Cannot change language during recording",
                    "config_locked",
                );
            }
        }

        if let Some(enable) = data.get("enable_realtime").and_then(Value::as_bool) {
            self.session_config.enable_realtime = enable;
        }
        if let Some(words) = data.get("word_timestamps").and_then(Value::as_bool) {
            self.session_config.word_timestamps = words;
        }
        ControlMessage::status(json!({
            "config_updated": true,
            "config": self.session_config.to_json(),
        }))
    }

    /// Handle one binary audio frame. Decode failures are logged and the
    /// frame skipped; the stream continues.
    pub fn handle_binary(&mut self, data: &[u8]) -> Option<ControlMessage> {
        if !self.recording {
            debug!("audio frame outside recording session, ignoring");
            return None;
        }

        let samples = match AudioChunk::from_bytes(data).and_then(|c| c.to_target_samples()) {
            Ok(samples) => samples,
            Err(err) => {
                warn!(error = %err, frame_len = data.len(), "skipping undecodable audio frame");
                return None;
            }
        };
        self.accumulator.extend_from_slice(&samples);

        if self.session_config.enable_realtime {
            if let Some(engine) = &self.state.engine {
                if let Some(partial) = engine.preview(&samples) {
                    return Some(realtime_message(&partial));
                }
            }
        }
        None
    }

    /// Connection teardown: drop any recording in progress.
    pub fn teardown(&mut self) {
        if self.recording {
            self.recording = false;
            self.state.set_transcribing(false);
        }
        self.accumulator.clear();
    }
}

/// Drive one authenticated session over a socket.
///
/// The first frame must be an `auth` control message within the configured
/// deadline; every pre-auth failure closes the connection. After `auth_ok`
/// the loop runs until disconnect, which releases the single-session lock
/// and discards any in-flight result.
pub async fn run_session<S: SessionSocket>(mut socket: S, state: AppState) {
    let connection_id = Uuid::new_v4();
    info!(%connection_id, "websocket connection established");

    let Some(stored) = authenticate(&mut socket, &state, connection_id).await else {
        return;
    };

    let mut handler = SessionHandler::new(state.clone(), stored.clone());
    loop {
        match socket.next_event().await {
            None => break,
            Some(SocketEvent::Text(text)) => {
                let replies = handler.handle_text(&text).await;
                let mut closed = false;
                for reply in &replies {
                    if socket.send_message(reply).await.is_err() {
                        // Peer is gone; the result is discarded.
                        closed = true;
                        break;
                    }
                }
                if closed {
                    break;
                }
            }
            Some(SocketEvent::Binary(data)) => {
                if let Some(reply) = handler.handle_binary(&data) {
                    if socket.send_message(&reply).await.is_err() {
                        break;
                    }
                }
            }
        }
    }

    handler.teardown();
    state.auth.release(&stored.token);
    info!(%connection_id, client = %stored.client_name, "websocket session closed");
}

async fn authenticate<S: SessionSocket>(
    socket: &mut S,
    state: &AppState,
    connection_id: Uuid,
) -> Option<StoredToken> {
    let first = match tokio::time::timeout(state.config.auth_timeout(), socket.next_event()).await
    {
        Err(_) => {
            warn!(%connection_id, "authentication timeout");
            let _ = socket
                .send_message(&ControlMessage::auth_fail("Authentication timeout"))
                .await;
            return None;
        }
        Ok(None) => return None,
        Ok(Some(event)) => event,
    };

    let SocketEvent::Text(text) = first else {
        let _ = socket
            .send_message(&ControlMessage::auth_fail("Expected authentication message"))
            .await;
        return None;
    };

    let msg = match ControlMessage::from_json(&text) {
        Ok(msg) if msg.kind == MessageType::Auth => msg,
        _ => {
            let _ = socket
                .send_message(&ControlMessage::auth_fail("Expected authentication message"))
                .await;
            return None;
        }
    };

    let plaintext = msg.data_str("token").unwrap_or("");
    let stored = match state.auth.validate(plaintext) {
        Ok(Some(stored)) => stored,
        Ok(None) => {
            warn!(%connection_id, "token validation failed");
            let _ = socket
                .send_message(&ControlMessage::auth_fail("Invalid, revoked, or expired token"))
                .await;
            return None;
        }
        Err(err) => {
            error!(%connection_id, error = %err, "token store failure during auth");
            let _ = socket
                .send_message(&ControlMessage::auth_fail("Invalid, revoked, or expired token"))
                .await;
            return None;
        }
    };

    if !state.auth.acquire(&stored) {
        let active = state.auth.active_client_name().unwrap_or_default();
        warn!(%connection_id, denied = %stored.client_name, active = %active, "session busy");
        let _ = socket
            .send_message(&ControlMessage::session_busy(&active))
            .await;
        return None;
    }

    if socket
        .send_message(&ControlMessage::auth_ok(
            &stored.client_name,
            stored.is_admin,
        ))
        .await
        .is_err()
    {
        state.auth.release(&stored.token);
        return None;
    }
    info!(%connection_id, client = %stored.client_name, "websocket authenticated");
    Some(stored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{app_state, echo_engine, failing_engine};
    use scribe_core::pcm_from_samples;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tempfile::tempdir;

    #[derive(Debug)]
    enum Step {
        Text(String),
        Binary(Vec<u8>),
        Wait(Duration),
    }

    struct ScriptedSocket {
        steps: VecDeque<Step>,
        sent: Arc<Mutex<Vec<ControlMessage>>>,
    }

    impl ScriptedSocket {
        fn new(steps: Vec<Step>) -> (Self, Arc<Mutex<Vec<ControlMessage>>>) {
            let sent = Arc::new(Mutex::new(Vec::new()));
            (
                ScriptedSocket {
                    steps: steps.into(),
                    sent: sent.clone(),
                },
                sent,
            )
        }
    }

    #[async_trait]
    impl SessionSocket for ScriptedSocket {
        async fn next_event(&mut self) -> Option<SocketEvent> {
            loop {
                match self.steps.pop_front() {
                    None => return None,
                    Some(Step::Wait(duration)) => tokio::time::sleep(duration).await,
                    Some(Step::Text(text)) => return Some(SocketEvent::Text(text)),
                    Some(Step::Binary(data)) => return Some(SocketEvent::Binary(data)),
                }
            }
        }

        async fn send_message(&mut self, msg: &ControlMessage) -> Result<(), SocketClosed> {
            self.sent.lock().map_err(|_| SocketClosed)?.push(msg.clone());
            Ok(())
        }
    }

    fn auth_step(token: &str) -> Step {
        Step::Text(ControlMessage::auth(token).to_json().unwrap())
    }

    fn text_step(msg: ControlMessage) -> Step {
        Step::Text(msg.to_json().unwrap())
    }

    fn audio_step(samples: &[f32], sample_rate: u32, sequence: u64) -> Step {
        let chunk = AudioChunk::new(pcm_from_samples(samples), sample_rate, 0, sequence);
        Step::Binary(chunk.to_bytes().unwrap().to_vec())
    }

    fn tone(samples: usize) -> Vec<f32> {
        (0..samples)
            .map(|i| (2.0 * std::f32::consts::PI * 440.0 * i as f32 / 16_000.0).sin() * 0.3)
            .collect()
    }

    fn kinds(sent: &Arc<Mutex<Vec<ControlMessage>>>) -> Vec<MessageType> {
        sent.lock().unwrap().iter().map(|m| m.kind).collect()
    }

    #[tokio::test]
    async fn test_auth_then_disconnect_releases_lock() {
        let dir = tempdir().unwrap();
        let state = app_state(&dir, None);
        let (_, token) = state.auth.store().generate("alice", false, None).unwrap();

        let (socket, sent) = ScriptedSocket::new(vec![auth_step(&token)]);
        run_session(socket, state.clone()).await;

        assert_eq!(kinds(&sent), vec![MessageType::AuthOk]);
        assert!(!state.auth.is_session_active());
    }

    #[tokio::test]
    async fn test_invalid_token_gets_auth_fail() {
        let dir = tempdir().unwrap();
        let state = app_state(&dir, None);

        let (socket, sent) = ScriptedSocket::new(vec![auth_step("bogus")]);
        run_session(socket, state).await;

        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, MessageType::AuthFail);
        assert_eq!(
            sent[0].data_str("message"),
            Some("Invalid, revoked, or expired token")
        );
    }

    #[tokio::test]
    async fn test_first_message_must_be_auth() {
        let dir = tempdir().unwrap();
        let state = app_state(&dir, None);

        let (socket, sent) = ScriptedSocket::new(vec![text_step(ControlMessage::ping())]);
        run_session(socket, state).await;
        assert_eq!(kinds(&sent), vec![MessageType::AuthFail]);
    }

    #[tokio::test]
    async fn test_second_client_gets_session_busy() {
        let dir = tempdir().unwrap();
        let state = app_state(&dir, None);
        let (stored_a, _) = state.auth.store().generate("alice", false, None).unwrap();
        let (_, token_b) = state.auth.store().generate("bob", false, None).unwrap();

        assert!(state.auth.acquire(&stored_a));

        let (socket, sent) = ScriptedSocket::new(vec![auth_step(&token_b)]);
        run_session(socket, state.clone()).await;

        let messages = sent.lock().unwrap().clone();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].kind, MessageType::SessionBusy);
        assert_eq!(messages[0].data_str("active_client"), Some("alice"));
        // Alice still holds the lock.
        assert!(state.auth.is_session_active());

        // After alice disconnects, bob gets in.
        state.auth.release(&stored_a.token);
        let (socket, sent) = ScriptedSocket::new(vec![auth_step(&token_b)]);
        run_session(socket, state).await;
        assert_eq!(kinds(&sent), vec![MessageType::AuthOk]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_just_inside_deadline_succeeds() {
        let dir = tempdir().unwrap();
        let state = app_state(&dir, None);
        let (_, token) = state.auth.store().generate("alice", false, None).unwrap();

        let (socket, sent) = ScriptedSocket::new(vec![
            Step::Wait(Duration::from_millis(9_999)),
            auth_step(&token),
        ]);
        run_session(socket, state).await;
        assert_eq!(kinds(&sent), vec![MessageType::AuthOk]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_past_deadline_is_rejected() {
        let dir = tempdir().unwrap();
        let state = app_state(&dir, None);
        let (_, token) = state.auth.store().generate("alice", false, None).unwrap();

        let (socket, sent) = ScriptedSocket::new(vec![
            Step::Wait(Duration::from_millis(10_001)),
            auth_step(&token),
        ]);
        run_session(socket, state.clone()).await;

        let messages = sent.lock().unwrap().clone();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].kind, MessageType::AuthFail);
        assert_eq!(messages[0].data_str("message"), Some("Authentication timeout"));
        assert!(!state.auth.is_session_active());
    }

    #[tokio::test]
    async fn test_streaming_session_emits_exactly_one_final() {
        let dir = tempdir().unwrap();
        let state = app_state(&dir, Some(echo_engine()));
        let (_, token) = state.auth.store().generate("alice", false, None).unwrap();

        // 3 seconds of 16 kHz mono as 75 chunks of 40 ms.
        let mut steps = vec![
            auth_step(&token),
            text_step(ControlMessage::start(Some("en"), false, true)),
        ];
        let chunk = tone(scribe_core::CHUNK_SAMPLES);
        for seq in 0..75 {
            steps.push(audio_step(&chunk, SAMPLE_RATE, seq));
        }
        steps.push(text_step(ControlMessage::stop()));

        let (socket, sent) = ScriptedSocket::new(steps);
        run_session(socket, state.clone()).await;

        let messages = sent.lock().unwrap().clone();
        let finals: Vec<_> = messages
            .iter()
            .filter(|m| m.kind == MessageType::Final)
            .collect();
        assert_eq!(finals.len(), 1);

        let final_msg = finals[0];
        let duration = final_msg.data["duration"].as_f64().unwrap();
        assert!((duration - 3.0).abs() < 0.05, "duration was {duration}");
        assert_eq!(final_msg.data["is_final"], true);

        let words = final_msg.data["words"].as_array().unwrap();
        let starts: Vec<f64> = words
            .iter()
            .map(|w| w["start"].as_f64().unwrap())
            .collect();
        assert!(starts.windows(2).all(|pair| pair[0] <= pair[1]));

        // Final is the last session-scoped message.
        assert_eq!(messages.last().unwrap().kind, MessageType::Final);
        assert!(!state.is_transcribing());
        assert!(!state.auth.is_session_active());
    }

    #[tokio::test]
    async fn test_realtime_previews_precede_final() {
        let dir = tempdir().unwrap();
        let engine = echo_engine();
        engine.load().await.unwrap();
        let state = app_state(&dir, Some(engine));
        let (_, token) = state.auth.store().generate("alice", false, None).unwrap();

        let chunk = tone(scribe_core::CHUNK_SAMPLES);
        let steps = vec![
            auth_step(&token),
            text_step(ControlMessage::start(None, true, false)),
            audio_step(&chunk, SAMPLE_RATE, 0),
            audio_step(&chunk, SAMPLE_RATE, 1),
            text_step(ControlMessage::stop()),
        ];
        let (socket, sent) = ScriptedSocket::new(steps);
        run_session(socket, state).await;

        let sequence = kinds(&sent);
        let final_pos = sequence
            .iter()
            .position(|k| *k == MessageType::Final)
            .unwrap();
        let realtime_positions: Vec<_> = sequence
            .iter()
            .enumerate()
            .filter(|(_, k)| **k == MessageType::Realtime)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(realtime_positions.len(), 2);
        assert!(realtime_positions.iter().all(|p| *p < final_pos));
        assert!(!sequence[final_pos + 1..].contains(&MessageType::Realtime));
    }

    #[tokio::test]
    async fn test_stop_without_start_errors_but_keeps_connection() {
        let dir = tempdir().unwrap();
        let state = app_state(&dir, None);
        let (_, token) = state.auth.store().generate("alice", false, None).unwrap();

        let steps = vec![
            auth_step(&token),
            text_step(ControlMessage::stop()),
            text_step(ControlMessage::ping()),
        ];
        let (socket, sent) = ScriptedSocket::new(steps);
        run_session(socket, state).await;

        let messages = sent.lock().unwrap().clone();
        assert_eq!(messages[1].kind, MessageType::Error);
        assert_eq!(messages[1].data_str("code"), Some("not_started"));
        // The error did not terminate the connection.
        assert_eq!(messages[2].kind, MessageType::Pong);
    }

    #[tokio::test]
    async fn test_double_start_errors() {
        let dir = tempdir().unwrap();
        let state = app_state(&dir, None);
        let (_, token) = state.auth.store().generate("alice", false, None).unwrap();

        let steps = vec![
            auth_step(&token),
            text_step(ControlMessage::start(None, false, false)),
            text_step(ControlMessage::start(None, false, false)),
        ];
        let (socket, sent) = ScriptedSocket::new(steps);
        run_session(socket, state).await;

        let messages = sent.lock().unwrap().clone();
        assert_eq!(messages[1].kind, MessageType::SessionStarted);
        assert_eq!(messages[2].kind, MessageType::Error);
        assert_eq!(messages[2].data_str("code"), Some("already_started"));
    }

    #[tokio::test]
    async fn test_stop_with_no_audio_sends_session_stopped() {
        let dir = tempdir().unwrap();
        let state = app_state(&dir, Some(echo_engine()));
        let (_, token) = state.auth.store().generate("alice", false, None).unwrap();

        let steps = vec![
            auth_step(&token),
            text_step(ControlMessage::start(None, false, false)),
            text_step(ControlMessage::stop()),
        ];
        let (socket, sent) = ScriptedSocket::new(steps);
        run_session(socket, state).await;

        let messages = sent.lock().unwrap().clone();
        assert_eq!(messages[2].kind, MessageType::SessionStopped);
        assert_eq!(messages[2].data_str("message"), Some("No audio received"));
    }

    #[tokio::test]
    async fn test_bad_audio_frame_is_skipped() {
        let dir = tempdir().unwrap();
        let state = app_state(&dir, Some(echo_engine()));
        let (_, token) = state.auth.store().generate("alice", false, None).unwrap();

        let chunk = tone(scribe_core::CHUNK_SAMPLES);
        let steps = vec![
            auth_step(&token),
            text_step(ControlMessage::start(None, false, false)),
            audio_step(&chunk, SAMPLE_RATE, 0),
            Step::Binary(vec![0xFF, 0xFF]), // undecodable
            audio_step(&chunk, SAMPLE_RATE, 1),
            text_step(ControlMessage::stop()),
        ];
        let (socket, sent) = ScriptedSocket::new(steps);
        run_session(socket, state).await;

        let messages = sent.lock().unwrap().clone();
        let final_msg = messages
            .iter()
            .find(|m| m.kind == MessageType::Final)
            .unwrap();
        // Two good chunks survived the bad one.
        let duration = final_msg.data["duration"].as_f64().unwrap();
        assert!((duration - 0.08).abs() < 0.005, "duration was {duration}");
    }

    #[tokio::test]
    async fn test_unknown_type_yields_error_code() {
        let dir = tempdir().unwrap();
        let state = app_state(&dir, None);
        let (_, token) = state.auth.store().generate("alice", false, None).unwrap();

        let steps = vec![
            auth_step(&token),
            Step::Text(r#"{"type": "warble", "data": {}}"#.to_string()),
        ];
        let (socket, sent) = ScriptedSocket::new(steps);
        run_session(socket, state).await;

        let messages = sent.lock().unwrap().clone();
        assert_eq!(messages[1].kind, MessageType::Error);
        assert_eq!(messages[1].data_str("code"), Some("unknown_type"));
    }

    #[tokio::test]
    async fn test_language_change_locked_while_recording() {
        let dir = tempdir().unwrap();
        let state = app_state(&dir, None);
        let (_, token) = state.auth.store().generate("alice", false, None).unwrap();

        let steps = vec![
            auth_step(&token),
            text_step(ControlMessage::start(Some("en"), false, false)),
            Step::Text(
                ControlMessage::new(MessageType::Config, json!({ "language": "el" }))
                    .to_json()
                    .unwrap(),
            ),
            Step::Text(
                ControlMessage::new(MessageType::Config, json!({ "enable_realtime": true }))
                    .to_json()
                    .unwrap(),
            ),
        ];
        let (socket, sent) = ScriptedSocket::new(steps);
        run_session(socket, state).await;

        let messages = sent.lock().unwrap().clone();
        assert_eq!(messages[2].kind, MessageType::Error);
        assert_eq!(messages[2].data_str("code"), Some("config_locked"));
        // Non-language keys still merge mid-session.
        assert_eq!(messages[3].kind, MessageType::Status);
        assert_eq!(messages[3].data["config"]["enable_realtime"], true);
    }

    #[tokio::test]
    async fn test_config_while_idle_errors() {
        let dir = tempdir().unwrap();
        let state = app_state(&dir, None);
        let (_, token) = state.auth.store().generate("alice", false, None).unwrap();

        let steps = vec![
            auth_step(&token),
            Step::Text(
                ControlMessage::new(MessageType::Config, json!({ "enable_realtime": true }))
                    .to_json()
                    .unwrap(),
            ),
            text_step(ControlMessage::ping()),
        ];
        let (socket, sent) = ScriptedSocket::new(steps);
        run_session(socket, state).await;

        let messages = sent.lock().unwrap().clone();
        assert_eq!(messages[1].kind, MessageType::Error);
        assert_eq!(messages[1].data_str("code"), Some("not_started"));
        // The rejection did not terminate the connection.
        assert_eq!(messages[2].kind, MessageType::Pong);
    }

    #[tokio::test]
    async fn test_engine_failure_sends_generic_error() {
        let dir = tempdir().unwrap();
        let state = app_state(&dir, Some(failing_engine()));
        let (_, token) = state.auth.store().generate("alice", false, None).unwrap();

        let chunk = tone(scribe_core::CHUNK_SAMPLES);
        let steps = vec![
            auth_step(&token),
            text_step(ControlMessage::start(None, false, false)),
            audio_step(&chunk, SAMPLE_RATE, 0),
            text_step(ControlMessage::stop()),
        ];
        let (socket, sent) = ScriptedSocket::new(steps);
        run_session(socket, state).await;

        let messages = sent.lock().unwrap().clone();
        let error = messages.last().unwrap();
        assert_eq!(error.kind, MessageType::Error);
        assert_eq!(error.data_str("code"), Some("transcription_error"));
        assert_eq!(error.data_str("message"), Some("Transcription failed"));
    }

    #[tokio::test]
    async fn test_audio_outside_recording_is_ignored() {
        let dir = tempdir().unwrap();
        let state = app_state(&dir, Some(echo_engine()));
        let (_, token) = state.auth.store().generate("alice", false, None).unwrap();

        let chunk = tone(scribe_core::CHUNK_SAMPLES);
        let steps = vec![auth_step(&token), audio_step(&chunk, SAMPLE_RATE, 0)];
        let (socket, sent) = ScriptedSocket::new(steps);
        run_session(socket, state).await;

        assert_eq!(kinds(&sent), vec![MessageType::AuthOk]);
    }

    #[tokio::test]
    async fn test_resampled_stream_lands_at_target_rate() {
        let dir = tempdir().unwrap();
        let state = app_state(&dir, Some(echo_engine()));
        let (_, token) = state.auth.store().generate("alice", false, None).unwrap();

        // One second of 44.1 kHz audio should finalize to ~1 second.
        let chunk: Vec<f32> = (0..44_100)
            .map(|i| (2.0 * std::f32::consts::PI * 440.0 * i as f32 / 44_100.0).sin() * 0.3)
            .collect();
        let steps = vec![
            auth_step(&token),
            text_step(ControlMessage::start(None, false, false)),
            audio_step(&chunk, 44_100, 0),
            text_step(ControlMessage::stop()),
        ];
        let (socket, sent) = ScriptedSocket::new(steps);
        run_session(socket, state).await;

        let messages = sent.lock().unwrap().clone();
        let final_msg = messages
            .iter()
            .find(|m| m.kind == MessageType::Final)
            .unwrap();
        let duration = final_msg.data["duration"].as_f64().unwrap();
        assert!((duration - 1.0).abs() < 0.06, "duration was {duration}");
    }

    #[test]
    fn test_origin_validation() {
        // Same host, with and without port.
        assert!(is_valid_origin(
            Some("https://myhost:8443"),
            Some("myhost:8443"),
            8443,
            true
        ));
        assert!(is_valid_origin(
            Some("https://myhost"),
            Some("myhost:8443"),
            8443,
            true
        ));
        // Localhost and loopback.
        assert!(is_valid_origin(
            Some("https://localhost:8443"),
            Some("myhost"),
            8443,
            true
        ));
        assert!(is_valid_origin(
            Some("https://127.0.0.1"),
            Some("myhost"),
            8443,
            true
        ));
        // Mesh-VPN range.
        assert!(is_valid_origin(
            Some("https://100.64.1.2:8443"),
            Some("100.64.1.2:8443"),
            8443,
            true
        ));
        // Missing origin: non-browser client.
        assert!(is_valid_origin(None, Some("myhost"), 8443, true));
        // Cross-site.
        assert!(!is_valid_origin(
            Some("https://evil.example"),
            Some("myhost"),
            8443,
            true
        ));
        // Scheme must match the listener.
        assert!(!is_valid_origin(
            Some("http://myhost:8443"),
            Some("myhost:8443"),
            8443,
            true
        ));
    }
}
