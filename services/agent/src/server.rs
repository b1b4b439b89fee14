//! WebSocket transport. One connection carries one session.
//!
//! Inbound binary frames are PCM16 little-endian mono audio, inbound text
//! frames are control messages. Outbound text frames carry transcript JSON
//! and outbound binary frames carry synthesized PCM16 audio.

use std::future::Future;
use std::sync::Arc;

use axum::{
    Router,
    extract::{
        Query, State,
        rejection::QueryRejection,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
    routing::get,
};
use futures_util::{SinkExt, StreamExt};
use meditation_audio_utils::audio::ToBinary;
use meditation_audio_utils::frames::FrameSlicer;
use meditation_core::{
    AudioSink, Capabilities, Pacing, PlaybackQueue, SessionConfig, VoiceActivity, start_session,
};
use meditation_types::{AudioChunk, OutboundMessage, SessionParams};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tracing::{Instrument, info};

const OUTBOUND_CAPACITY: usize = 64;
const PLAYBACK_CAPACITY: usize = 16;

/// Supplies the providers each new session runs on.
pub trait CapabilityProvider: Send + Sync {
    /// Capabilities for one session, with audio going to `sink`.
    fn capabilities(&self, sink: Arc<dyn AudioSink>) -> Capabilities;

    /// A fresh voice-activity model. Each session owns its own.
    fn voice_activity(&self) -> Box<dyn VoiceActivity>;
}

#[derive(Clone)]
pub struct AppState {
    provider: Arc<dyn CapabilityProvider>,
    session: SessionConfig,
    input_sample_rate: u32,
    pacing: Pacing,
}

impl AppState {
    pub fn new(
        provider: Arc<dyn CapabilityProvider>,
        session: SessionConfig,
        input_sample_rate: u32,
    ) -> Self {
        Self {
            provider,
            session,
            input_sample_rate,
            pacing: Pacing::RealTime,
        }
    }

    pub fn with_pacing(mut self, pacing: Pacing) -> Self {
        self.pacing = pacing;
        self
    }
}

#[derive(Debug, Deserialize)]
struct ConnectQuery {
    metadata: Option<String>,
}

pub fn router(state: AppState) -> Router {
    // Browser clients connect from a separate origin.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .layer(cors)
        .with_state(state)
}

/// Serves the router on `listener` until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    info!("Listening on {}", listener.local_addr()?);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

async fn health() -> &'static str {
    "ok"
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    query: Result<Query<ConnectQuery>, QueryRejection>,
    State(state): State<AppState>,
) -> Response {
    let params = session_params(query);
    info!("WebSocket upgrade request received");
    ws.on_upgrade(move |socket| handle_socket(socket, state, params))
}

/// Session parameters from the connect query. A query that does not parse
/// starts the session with defaults.
fn session_params(query: Result<Query<ConnectQuery>, QueryRejection>) -> SessionParams {
    match query {
        Ok(Query(query)) => {
            SessionParams::from_metadata(query.metadata.as_deref().unwrap_or_default())
        }
        Err(e) => {
            tracing::warn!("Ignoring malformed connect query: {}", e);
            SessionParams::default()
        }
    }
}

async fn handle_socket(socket: WebSocket, state: AppState, params: SessionParams) {
    let (mut sink, mut stream) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<OutboundMessage>(OUTBOUND_CAPACITY);
    let (audio_tx, mut audio_rx) = mpsc::channel::<AudioChunk>(PLAYBACK_CAPACITY);

    let playback_cancel = CancellationToken::new();
    let (playback, playback_task) = PlaybackQueue::spawn(audio_tx, state.pacing, playback_cancel.clone());
    let capabilities = state.provider.capabilities(Arc::new(playback));
    let session = start_session(
        params,
        capabilities,
        state.provider.voice_activity(),
        state.session.clone(),
        outbound_tx,
    );
    let span = tracing::info_span!("connection", session = %session.id());
    info!(parent: &span, "WebSocket connection established");

    let writer = tokio::spawn(
        async move {
            loop {
                let message = tokio::select! {
                    Some(outbound) = outbound_rx.recv() => match outbound.to_json() {
                        Ok(json) => Message::Text(json.into()),
                        Err(e) => {
                            tracing::warn!("Failed to encode outbound message: {}", e);
                            continue;
                        }
                    },
                    Some(chunk) = audio_rx.recv() => Message::Binary(chunk.samples().to_binary().into()),
                    else => break,
                };
                if sink.send(message).await.is_err() {
                    // Client disconnected.
                    break;
                }
            }
            sink.close().await.ok();
        }
        .instrument(span.clone()),
    );

    let audio = session.audio_sender();
    let control = session.control_sender();
    let mut frames = FrameSlicer::new(state.input_sample_rate);
    async {
        'read: while let Some(message) = stream.next().await {
            match message {
                Ok(Message::Binary(bytes)) => {
                    for frame in frames.push_bytes(&bytes) {
                        if audio.send(frame).await.is_err() {
                            break 'read;
                        }
                    }
                }
                Ok(Message::Text(text)) => {
                    if control.send(text.as_str().as_bytes().to_vec()).await.is_err() {
                        break;
                    }
                }
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!("WebSocket error: {}", e);
                    break;
                }
            }
        }
    }
    .instrument(span.clone())
    .await;
    drop(audio);
    drop(control);

    let report = session.close().await;
    playback_cancel.cancel();
    if let Err(e) = playback_task.await {
        tracing::error!(parent: &span, "Playback task failed: {}", e);
    }
    if let Err(e) = writer.await {
        tracing::error!(parent: &span, "Writer task failed: {}", e);
    }

    match serde_json::to_string(&report) {
        Ok(report) => info!(parent: &span, report = %report, "WebSocket connection closed"),
        Err(_) => info!(parent: &span, "WebSocket connection closed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_query_metadata_is_optional() {
        let query: ConnectQuery = serde_json::from_str("{}").unwrap();
        assert!(query.metadata.is_none());

        let query: ConnectQuery =
            serde_json::from_str(r#"{"metadata":"{\"preferredVoice\":\"sage\"}"}"#).unwrap();
        let params = SessionParams::from_metadata(query.metadata.as_deref().unwrap_or_default());
        assert_eq!(params.preferred_voice(), "sage");
    }

    #[test]
    fn malformed_query_falls_back_to_defaults() {
        let uri = "/ws?metadata=%7B%7D&metadata=oops".parse().unwrap();
        let query = Query::<ConnectQuery>::try_from_uri(&uri);
        assert!(query.is_err());
        assert_eq!(session_params(query), SessionParams::default());

        let uri = "/ws?metadata=%7B%22preferredVoice%22%3A%22sage%22%7D".parse().unwrap();
        let params = session_params(Query::<ConnectQuery>::try_from_uri(&uri));
        assert_eq!(params.preferred_voice(), "sage");
    }
}
