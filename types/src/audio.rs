use std::time::Duration;

/// Default sample rate of inbound user audio (PCM16, mono).
pub const DEFAULT_INPUT_SAMPLE_RATE: u32 = 24_000;

/// Sample rate of synthesized speech (PCM16, mono).
pub const SYNTHESIS_SAMPLE_RATE: u32 = 24_000;

fn samples_duration(len: usize, sample_rate: u32) -> Duration {
    if sample_rate == 0 {
        return Duration::ZERO;
    }
    Duration::from_nanos(len as u64 * 1_000_000_000 / sample_rate as u64)
}

/// A timestamped chunk of raw user audio.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    /// Offset of the first sample from the start of the stream.
    timestamp: Duration,
    sample_rate: u32,
    samples: Vec<i16>,
}

impl AudioFrame {
    pub fn new(timestamp: Duration, sample_rate: u32, samples: Vec<i16>) -> Self {
        Self {
            timestamp,
            sample_rate,
            samples,
        }
    }

    pub fn timestamp(&self) -> Duration {
        self.timestamp
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn into_samples(self) -> Vec<i16> {
        self.samples
    }

    /// Playback length of this frame.
    pub fn duration(&self) -> Duration {
        samples_duration(self.samples.len(), self.sample_rate)
    }

    /// Stream offset just past the last sample.
    pub fn end(&self) -> Duration {
        self.timestamp + self.duration()
    }
}

/// A chunk of synthesized speech queued for playback.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    sample_rate: u32,
    samples: Vec<i16>,
}

impl AudioChunk {
    pub fn new(sample_rate: u32, samples: Vec<i16>) -> Self {
        Self {
            sample_rate,
            samples,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration(&self) -> Duration {
        samples_duration(self.samples.len(), self.sample_rate)
    }
}
