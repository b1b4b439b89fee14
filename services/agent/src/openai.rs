//! OpenAI-backed speech and reasoning capabilities.
//!
//! Transcription uploads each turn as a WAV file, reasoning streams chat
//! completions over server-sent events, and synthesis requests raw PCM speech
//! one sentence at a time.

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use futures::StreamExt;
use futures::stream::{self, BoxStream, Stream};
use meditation_audio_utils::audio::{Pcm16Reassembler, encode_wav};
use meditation_core::{
    AudioSink, AudioStream, Capabilities, ChatMessage, FrameStream, Prompt, ProviderError,
    Reasoner, ReasoningRequest, Role, SpeechDelivery, SpeechSynthesizer, SpeechToText, TextStream,
    VoiceActivity,
};
use meditation_types::AudioChunk;
use meditation_types::audio::SYNTHESIS_SAMPLE_RATE;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::chunker::sentences;
use crate::config::Config;
use crate::server::CapabilityProvider;
use crate::vad::EnergyVad;

/// Shared HTTP plumbing for the OpenAI endpoints.
#[derive(Clone)]
pub struct OpenAiClient {
    http: Client,
    base_url: String,
    api_key: SecretString,
}

impl OpenAiClient {
    pub fn new(base_url: &str, api_key: SecretString) -> anyhow::Result<Self> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.http
            .post(format!("{}{}", self.base_url, path))
            .bearer_auth(self.api_key.expose_secret())
    }
}

/// Sends the request and turns transport failures and error statuses into
/// provider errors of the given kind.
async fn send(
    request: RequestBuilder,
    kind: fn(String) -> ProviderError,
) -> Result<Response, ProviderError> {
    let response = request
        .send()
        .await
        .map_err(|e| ProviderError::Network(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(kind(format!("HTTP {}: {}", status, body.trim())));
    }
    Ok(response)
}

// --- Transcription ---

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
}

pub struct OpenAiTranscriber {
    client: OpenAiClient,
    model: String,
}

impl OpenAiTranscriber {
    pub fn new(client: OpenAiClient, model: &str) -> Self {
        Self {
            client,
            model: model.to_string(),
        }
    }
}

impl SpeechToText for OpenAiTranscriber {
    fn transcribe(&self, audio: FrameStream, locale: &str) -> TextStream {
        let client = self.client.clone();
        let model = self.model.clone();
        let locale = locale.to_string();

        stream::once(async move {
            let frames: Vec<_> = audio.collect().await;
            let Some(sample_rate) = frames.first().map(|f| f.sample_rate()) else {
                return Ok(String::new());
            };
            let samples: Vec<i16> = frames.into_iter().flat_map(|f| f.into_samples()).collect();
            tracing::debug!(samples = samples.len(), sample_rate, "Uploading turn audio");

            let wav = encode_wav(&samples, sample_rate)
                .map_err(|e| ProviderError::Transcription(e.to_string()))?;
            let file = Part::bytes(wav)
                .file_name("turn.wav")
                .mime_str("audio/wav")
                .map_err(|e| ProviderError::Transcription(e.to_string()))?;
            let mut form = Form::new().part("file", file).text("model", model);
            if !locale.is_empty() {
                form = form.text("language", locale);
            }

            let response = send(
                client.post("/audio/transcriptions").multipart(form),
                ProviderError::Transcription,
            )
            .await?;
            let body: TranscriptionResponse = response
                .json()
                .await
                .map_err(|e| ProviderError::Transcription(e.to_string()))?;
            Ok(body.text)
        })
        .boxed()
    }
}

// --- Reasoning ---

#[derive(Debug, Serialize, PartialEq)]
struct ChatCompletionRequest {
    model: String,
    temperature: f32,
    stream: bool,
    messages: Vec<WireMessage>,
}

#[derive(Debug, Serialize, PartialEq)]
struct WireMessage {
    role: &'static str,
    content: String,
}

impl WireMessage {
    fn new(role: &'static str, content: &str) -> Self {
        Self {
            role,
            content: content.to_string(),
        }
    }
}

impl From<&ChatMessage> for WireMessage {
    fn from(message: &ChatMessage) -> Self {
        let role = match message.role {
            Role::User => "user",
            Role::Assistant => "assistant",
        };
        Self::new(role, &message.text)
    }
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

pub struct OpenAiReasoner {
    client: OpenAiClient,
    model: String,
    temperature: f32,
}

impl OpenAiReasoner {
    pub fn new(client: OpenAiClient, model: &str, temperature: f32) -> Self {
        Self {
            client,
            model: model.to_string(),
            temperature,
        }
    }

    fn body(&self, request: &ReasoningRequest) -> ChatCompletionRequest {
        let mut messages = Vec::with_capacity(request.history.len() + 2);
        messages.push(WireMessage::new("system", &request.instructions));
        messages.extend(request.history.iter().map(WireMessage::from));
        messages.push(match &request.prompt {
            Prompt::User(text) => WireMessage::new("user", text),
            Prompt::Instruction(text) => WireMessage::new("system", text),
        });

        ChatCompletionRequest {
            model: self.model.clone(),
            temperature: self.temperature,
            stream: true,
            messages,
        }
    }
}

impl Reasoner for OpenAiReasoner {
    fn generate(&self, request: ReasoningRequest) -> TextStream {
        let body = self.body(&request);
        let request = self.client.post("/chat/completions").json(&body);

        stream::once(send(request, ProviderError::Reasoning))
            .map(|response| match response {
                Ok(response) => content_deltas(response.bytes_stream()),
                Err(e) => stream::iter([Err::<String, _>(e)]).boxed(),
            })
            .flatten()
            .boxed()
    }
}

/// One decoded server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    Data(String),
    Done,
}

/// Splits a server-sent event byte stream into `data:` payloads.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds bytes and returns the events of every line they completed.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(bytes);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\n', '\r']);

            let Some(data) = line.strip_prefix("data:") else {
                // Comments, event names and blank separators.
                continue;
            };
            let data = data.trim_start();
            if data == "[DONE]" {
                events.push(SseEvent::Done);
            } else if !data.is_empty() {
                events.push(SseEvent::Data(data.to_string()));
            }
        }
        events
    }
}

/// Reads the content deltas out of a streaming chat completion.
pub fn content_deltas<S, B, E>(bytes: S) -> TextStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    let state = (bytes.boxed(), SseDecoder::new(), false);
    stream::unfold(state, |(mut bytes, mut decoder, done)| async move {
        if done {
            return None;
        }
        let (items, done) = match bytes.next().await {
            None => (Vec::new(), true),
            Some(Err(e)) => (vec![Err(ProviderError::Network(e.to_string()))], true),
            Some(Ok(chunk)) => decode_events(decoder.push(chunk.as_ref())),
        };
        Some((stream::iter(items), (bytes, decoder, done)))
    })
    .flatten()
    .boxed()
}

fn decode_events(events: Vec<SseEvent>) -> (Vec<Result<String, ProviderError>>, bool) {
    let mut items = Vec::new();
    for event in events {
        let data = match event {
            SseEvent::Done => return (items, true),
            SseEvent::Data(data) => data,
        };
        match serde_json::from_str::<ChatChunk>(&data) {
            Ok(ChatChunk {
                error: Some(error), ..
            }) => {
                items.push(Err(ProviderError::Reasoning(error.message)));
                return (items, true);
            }
            Ok(chunk) => items.extend(
                chunk
                    .choices
                    .into_iter()
                    .filter_map(|choice| choice.delta.content)
                    .filter(|content| !content.is_empty())
                    .map(Ok),
            ),
            Err(e) => tracing::warn!("Skipping undecodable completion chunk: {}", e),
        }
    }
    (items, false)
}

// --- Synthesis ---

#[derive(Debug, Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    voice: &'a str,
    input: &'a str,
    instructions: &'a str,
    speed: f32,
    response_format: &'static str,
}

pub struct OpenAiSynthesizer {
    client: OpenAiClient,
    model: String,
}

impl OpenAiSynthesizer {
    pub fn new(client: OpenAiClient, model: &str) -> Self {
        Self {
            client,
            model: model.to_string(),
        }
    }
}

impl SpeechSynthesizer for OpenAiSynthesizer {
    fn synthesize(&self, text: BoxStream<'static, String>, delivery: &SpeechDelivery) -> AudioStream {
        let client = self.client.clone();
        let model = self.model.clone();
        let delivery = delivery.clone();

        sentences(text)
            .map(move |sentence| {
                let body = SpeechRequest {
                    model: &model,
                    voice: &delivery.voice,
                    input: &sentence,
                    instructions: &delivery.instructions,
                    speed: delivery.speed,
                    response_format: "pcm",
                };
                tracing::debug!(chars = sentence.len(), "Synthesizing sentence");
                let request = client.post("/audio/speech").json(&body);

                stream::once(send(request, ProviderError::Synthesis))
                    .map(|response| match response {
                        Ok(response) => pcm_chunks(response.bytes_stream(), SYNTHESIS_SAMPLE_RATE),
                        Err(e) => stream::iter([Err::<AudioChunk, _>(e)]).boxed(),
                    })
                    .flatten()
            })
            .flatten()
            .boxed()
    }
}

/// Turns a raw PCM16 byte stream into audio chunks, one per network read.
pub fn pcm_chunks<S, B, E>(bytes: S, sample_rate: u32) -> AudioStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    let state = (bytes.boxed(), Pcm16Reassembler::new(), false);
    stream::unfold(state, move |(mut bytes, mut pcm, done)| async move {
        if done {
            return None;
        }
        loop {
            match bytes.next().await {
                None => {
                    if pcm.has_pending() {
                        tracing::debug!("Dropping half a sample at the end of speech");
                    }
                    return None;
                }
                Some(Err(e)) => {
                    let error = ProviderError::Synthesis(e.to_string());
                    return Some((Err(error), (bytes, pcm, true)));
                }
                Some(Ok(chunk)) => {
                    let samples = pcm.push(chunk.as_ref());
                    if !samples.is_empty() {
                        let chunk = AudioChunk::new(sample_rate, samples);
                        return Some((Ok(chunk), (bytes, pcm, false)));
                    }
                }
            }
        }
    })
    .boxed()
}

// --- Provider ---

/// Builds the OpenAI-backed capabilities for each session.
pub struct OpenAiProvider {
    transcriber: Arc<OpenAiTranscriber>,
    reasoner: Arc<OpenAiReasoner>,
    synthesizer: Arc<OpenAiSynthesizer>,
}

impl OpenAiProvider {
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let client = OpenAiClient::new(&config.openai_base_url, config.openai_api_key.clone())?;
        tracing::info!(
            stt = %config.stt_model,
            llm = %config.llm_model,
            tts = %config.tts_model,
            "OpenAI provider ready"
        );
        Ok(Self {
            transcriber: Arc::new(OpenAiTranscriber::new(client.clone(), &config.stt_model)),
            reasoner: Arc::new(OpenAiReasoner::new(
                client.clone(),
                &config.llm_model,
                config.llm_temperature,
            )),
            synthesizer: Arc::new(OpenAiSynthesizer::new(client, &config.tts_model)),
        })
    }
}

impl CapabilityProvider for OpenAiProvider {
    fn capabilities(&self, sink: Arc<dyn AudioSink>) -> Capabilities {
        Capabilities {
            transcriber: self.transcriber.clone(),
            reasoner: self.reasoner.clone(),
            synthesizer: self.synthesizer.clone(),
            sink,
        }
    }

    fn voice_activity(&self) -> Box<dyn VoiceActivity> {
        Box::new(EnergyVad::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn byte_stream(parts: Vec<&'static str>) -> impl Stream<Item = Result<Vec<u8>, String>> {
        stream::iter(parts.into_iter().map(|p| Ok(p.as_bytes().to_vec())))
    }

    #[test]
    fn sse_decoder_handles_split_lines() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: {\"a\"").is_empty());
        assert_eq!(
            decoder.push(b":1}\r\n\r\n: keep-alive\ndata: [DONE]\n"),
            vec![SseEvent::Data("{\"a\":1}".to_string()), SseEvent::Done]
        );
    }

    #[test]
    fn sse_decoder_keeps_multibyte_characters_split_across_reads() {
        let mut decoder = SseDecoder::new();
        let line = "data: ruhig 🌿\n".as_bytes();
        let (head, tail) = line.split_at(line.len() - 3);
        assert!(decoder.push(head).is_empty());
        assert_eq!(
            decoder.push(tail),
            vec![SseEvent::Data("ruhig 🌿".to_string())]
        );
    }

    #[tokio::test]
    async fn content_deltas_yields_text_until_done() {
        let bytes = byte_stream(vec![
            "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"Breathe \"}}]}\n\ndata: {\"choi",
            "ces\":[{\"delta\":{\"content\":\"in.\"}}]}\n\n",
            "data: [DONE]\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"ignored\"}}]}\n\n",
        ]);

        let deltas: Vec<_> = content_deltas(bytes).collect().await;

        assert_eq!(
            deltas,
            vec![Ok("Breathe ".to_string()), Ok("in.".to_string())]
        );
    }

    #[tokio::test]
    async fn content_deltas_surfaces_api_errors() {
        let bytes = byte_stream(vec![
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n",
            "data: {\"error\":{\"message\":\"rate limited\"}}\n",
        ]);

        let deltas: Vec<_> = content_deltas(bytes).collect().await;

        assert_eq!(
            deltas,
            vec![
                Ok("Hi".to_string()),
                Err(ProviderError::Reasoning("rate limited".to_string()))
            ]
        );
    }

    #[tokio::test]
    async fn content_deltas_maps_transport_errors() {
        let bytes = stream::iter(vec![Err::<Vec<u8>, _>("reset by peer".to_string())]);

        let deltas: Vec<_> = content_deltas(bytes).collect().await;

        assert!(matches!(deltas.as_slice(), [Err(ProviderError::Network(_))]));
    }

    #[tokio::test]
    async fn pcm_chunks_reassembles_split_samples() {
        let bytes = stream::iter(vec![
            Ok::<_, String>(vec![0x01, 0x00, 0x02]),
            Ok(vec![0x00]),
            Ok(vec![]),
            Ok(vec![0xFF, 0xFF]),
        ]);

        let chunks: Vec<_> = pcm_chunks(bytes, 24_000).collect().await;
        let samples: Vec<Vec<i16>> = chunks
            .into_iter()
            .map(|c| c.unwrap().samples().to_vec())
            .collect();

        assert_eq!(samples, vec![vec![1], vec![2], vec![-1]]);
    }

    #[test]
    fn chat_body_orders_instructions_history_and_prompt() {
        let client =
            OpenAiClient::new("http://localhost/v1/", SecretString::from("k".to_string())).unwrap();
        let reasoner = OpenAiReasoner::new(client, "gpt-test", 0.4);
        let request = ReasoningRequest {
            instructions: "Be calm.".to_string(),
            history: vec![ChatMessage::user("Hello"), ChatMessage::assistant("Welcome.")],
            prompt: Prompt::Instruction("Begin guiding the breathing exercise now.".to_string()),
        };

        let body = reasoner.body(&request);

        assert!(body.stream);
        assert_eq!(body.model, "gpt-test");
        let roles: Vec<_> = body.messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec!["system", "user", "assistant", "system"]);
        assert_eq!(
            body.messages[3].content,
            "Begin guiding the breathing exercise now."
        );
    }
}
