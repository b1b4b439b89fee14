use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use meditation_types::ControlMessage;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::events::CommandRequest;
use crate::instructions;

/// Decodes inbound control payloads into command requests for the session.
///
/// Payloads that do not decode, or that name an unknown command, are dropped
/// without surfacing anything to the client.
pub struct ControlListener {
    inbound: mpsc::Receiver<Vec<u8>>,
    commands: mpsc::Sender<CommandRequest>,
    dropped: Arc<AtomicU64>,
}

impl ControlListener {
    pub fn new(inbound: mpsc::Receiver<Vec<u8>>, commands: mpsc::Sender<CommandRequest>) -> Self {
        Self {
            inbound,
            commands,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Count of payloads dropped so far.
    pub fn dropped_counter(&self) -> Arc<AtomicU64> {
        self.dropped.clone()
    }

    pub fn translate(payload: &[u8]) -> Option<CommandRequest> {
        let Some(message) = ControlMessage::decode(payload) else {
            tracing::trace!(len = payload.len(), "Dropping undecodable control message");
            return None;
        };
        let Some(command) = message.command() else {
            tracing::debug!(command = message.command_name(), "Ignoring unknown control command");
            return None;
        };
        Some(CommandRequest {
            command,
            instructions: instructions::for_command(command),
        })
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        loop {
            let payload = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                payload = self.inbound.recv() => match payload {
                    Some(payload) => payload,
                    None => break,
                },
            };

            let Some(request) = Self::translate(&payload) else {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                continue;
            };

            tracing::info!(command = request.command.name(), "Control command received");
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                sent = self.commands.send(request) => {
                    if sent.is_err() {
                        break;
                    }
                }
            }
        }
        tracing::debug!("Control listener stopped");
    }
}
