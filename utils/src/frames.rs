use std::time::Duration;

use meditation_types::AudioFrame;

use crate::audio::Pcm16Reassembler;

pub const DEFAULT_FRAME_MS: u32 = 20;

/// Cuts an inbound PCM16 byte stream into fixed-length, timestamped frames.
///
/// Samples short of a full frame wait for the next push; a trailing partial
/// frame is never emitted.
#[derive(Debug)]
pub struct FrameSlicer {
    sample_rate: u32,
    frame_len: usize,
    pending: Vec<i16>,
    emitted: u64,
    bytes: Pcm16Reassembler,
}

impl FrameSlicer {
    pub fn new(sample_rate: u32) -> Self {
        Self::with_frame_ms(sample_rate, DEFAULT_FRAME_MS)
    }

    pub fn with_frame_ms(sample_rate: u32, frame_ms: u32) -> Self {
        let frame_len = ((sample_rate as u64 * frame_ms as u64) / 1000).max(1) as usize;
        Self {
            sample_rate,
            frame_len,
            pending: Vec::with_capacity(frame_len),
            emitted: 0,
            bytes: Pcm16Reassembler::new(),
        }
    }

    pub fn frame_len(&self) -> usize {
        self.frame_len
    }

    /// Appends raw bytes and returns every complete frame now available.
    pub fn push_bytes(&mut self, bytes: &[u8]) -> Vec<AudioFrame> {
        let samples = self.bytes.push(bytes);
        self.push_samples(&samples)
    }

    pub fn push_samples(&mut self, samples: &[i16]) -> Vec<AudioFrame> {
        self.pending.extend_from_slice(samples);

        let mut frames = Vec::new();
        while self.pending.len() >= self.frame_len {
            let rest = self.pending.split_off(self.frame_len);
            let samples = std::mem::replace(&mut self.pending, rest);
            frames.push(self.frame(samples));
        }
        frames
    }

    fn frame(&mut self, samples: Vec<i16>) -> AudioFrame {
        let timestamp =
            Duration::from_nanos(self.emitted * 1_000_000_000 / self.sample_rate.max(1) as u64);
        self.emitted += samples.len() as u64;
        AudioFrame::new(timestamp, self.sample_rate, samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::ToBinary;

    #[test]
    fn slices_into_timestamped_frames() {
        let mut slicer = FrameSlicer::new(16_000);
        assert_eq!(slicer.frame_len(), 320);

        let bytes = vec![1i16; 800].as_slice().to_binary();
        let frames = slicer.push_bytes(&bytes);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].timestamp(), Duration::ZERO);
        assert_eq!(frames[1].timestamp(), Duration::from_millis(20));

        // The 160 leftover samples complete the next frame.
        let frames = slicer.push_bytes(&vec![2i16; 160].as_slice().to_binary());
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].timestamp(), Duration::from_millis(40));
        assert_eq!(frames[0].samples()[..160], [1; 160]);
        assert_eq!(frames[0].samples()[160..], [2; 160]);
    }

    #[test]
    fn odd_byte_boundaries_do_not_shift_samples() {
        let mut slicer = FrameSlicer::with_frame_ms(1_000, 2);
        let bytes = [5i16, 6, 7, 8].as_slice().to_binary();

        let mut frames = slicer.push_bytes(&bytes[..3]);
        frames.extend(slicer.push_bytes(&bytes[3..]));

        let samples: Vec<i16> = frames.into_iter().flat_map(AudioFrame::into_samples).collect();
        assert_eq!(samples, vec![5, 6, 7, 8]);
    }
}
