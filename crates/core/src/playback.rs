use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use meditation_types::AudioChunk;
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::capability::AudioSink;
use crate::error::ProviderError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pacing {
    /// Release each chunk only after the previous one has had time to play,
    /// so that clearing the queue silences the assistant promptly.
    RealTime,
    /// Release chunks as fast as the output accepts them.
    Immediate,
}

struct Shared {
    queue: Mutex<VecDeque<AudioChunk>>,
    notify: Notify,
    running: AtomicBool,
}

/// Synthesized audio waiting to be sent to the client.
#[derive(Clone)]
pub struct PlaybackQueue {
    shared: Arc<Shared>,
}

impl PlaybackQueue {
    /// Starts the task that drains the queue into `output`.
    pub fn spawn(
        output: mpsc::Sender<AudioChunk>,
        pacing: Pacing,
        cancel: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            running: AtomicBool::new(true),
        });
        let task = tokio::spawn(pump(shared.clone(), output, pacing, cancel));
        (Self { shared }, task)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<AudioChunk>> {
        self.shared
            .queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl AudioSink for PlaybackQueue {
    async fn enqueue(&self, chunk: AudioChunk) -> Result<(), ProviderError> {
        if !self.shared.running.load(Ordering::Acquire) {
            return Err(ProviderError::Playback("playback output closed".to_string()));
        }
        self.lock().push_back(chunk);
        self.shared.notify.notify_one();
        Ok(())
    }

    async fn clear(&self) {
        let dropped = {
            let mut queue = self.lock();
            let dropped = queue.len();
            queue.clear();
            dropped
        };
        if dropped > 0 {
            tracing::debug!(chunks = dropped, "Cleared queued playback");
        }
    }
}

async fn pump(
    shared: Arc<Shared>,
    output: mpsc::Sender<AudioChunk>,
    pacing: Pacing,
    cancel: CancellationToken,
) {
    loop {
        let next = shared
            .queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();

        let Some(chunk) = next else {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = shared.notify.notified() => continue,
            }
        };

        let playtime = chunk.duration();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            sent = output.send(chunk) => {
                if sent.is_err() {
                    break;
                }
            }
        }

        if pacing == Pacing::RealTime {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(playtime) => {}
            }
        }
    }
    shared.running.store(false, Ordering::Release);
    tracing::debug!("Playback stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn chunk(value: i16) -> AudioChunk {
        AudioChunk::new(24_000, vec![value; 240])
    }

    #[tokio::test]
    async fn forwards_chunks_in_order() {
        let (tx, mut rx) = mpsc::channel(8);
        let (queue, _task) = PlaybackQueue::spawn(tx, Pacing::Immediate, CancellationToken::new());

        for i in 0..3 {
            queue.enqueue(chunk(i)).await.unwrap();
        }
        for i in 0..3 {
            assert_eq!(rx.recv().await.unwrap().samples()[0], i);
        }
    }

    #[tokio::test]
    async fn clear_drops_pending_chunks() {
        let (tx, mut rx) = mpsc::channel(1);
        let (queue, _task) = PlaybackQueue::spawn(tx, Pacing::Immediate, CancellationToken::new());

        for i in 0..4 {
            queue.enqueue(chunk(i)).await.unwrap();
        }
        // Chunk 0 fills the channel and the pump holds chunk 1.
        while queue.len() > 2 {
            tokio::task::yield_now().await;
        }
        queue.clear().await;
        assert!(queue.is_empty());

        assert_eq!(rx.recv().await.unwrap().samples()[0], 0);
        assert_eq!(rx.recv().await.unwrap().samples()[0], 1);
        assert!(
            tokio::time::timeout(Duration::from_millis(50), rx.recv())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn enqueue_fails_once_output_is_gone() {
        let (tx, rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let (queue, task) = PlaybackQueue::spawn(tx, Pacing::RealTime, cancel.clone());

        drop(rx);
        cancel.cancel();
        task.await.unwrap();

        assert!(matches!(
            queue.enqueue(chunk(1)).await,
            Err(ProviderError::Playback(_))
        ));
    }
}
