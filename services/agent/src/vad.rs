//! Energy based voice activity detection.
//!
//! Each frame's RMS level in dBFS is mapped through a logistic curve to a
//! speech probability. Quiet rooms score near zero, normal speech near one.

use meditation_audio_utils::audio::rms;
use meditation_core::{DetectorError, VoiceActivity};
use meditation_types::AudioFrame;

/// Configuration for the energy detector.
#[derive(Debug, Clone, PartialEq)]
pub struct EnergyVadConfig {
    /// Level in dBFS that maps to a probability of 0.5.
    pub midpoint_dbfs: f32,
    /// dB over which the probability moves from ~0.27 to ~0.73.
    pub scale_db: f32,
    /// Floor applied to silent frames so the logarithm stays finite.
    pub floor_dbfs: f32,
}

impl Default for EnergyVadConfig {
    fn default() -> Self {
        Self {
            midpoint_dbfs: -40.0,
            scale_db: 3.0,
            floor_dbfs: -96.0,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EnergyVad {
    config: EnergyVadConfig,
}

impl EnergyVad {
    pub fn new(config: EnergyVadConfig) -> Self {
        Self { config }
    }

    /// RMS level of the samples in dBFS, clamped to the configured floor.
    pub fn level_dbfs(&self, samples: &[i16]) -> f32 {
        let level = rms(samples);
        if level <= 0.0 {
            return self.config.floor_dbfs;
        }
        (20.0 * level.log10()).max(self.config.floor_dbfs)
    }
}

impl VoiceActivity for EnergyVad {
    fn evaluate(&mut self, frame: &AudioFrame) -> Result<f32, DetectorError> {
        if frame.samples().is_empty() {
            return Err(DetectorError("empty audio frame".to_string()));
        }
        if self.config.scale_db <= 0.0 {
            return Err(DetectorError(format!(
                "invalid energy scale: {} dB",
                self.config.scale_db
            )));
        }

        let level = self.level_dbfs(frame.samples());
        let x = (level - self.config.midpoint_dbfs) / self.config.scale_db;
        let probability = 1.0 / (1.0 + (-x).exp());
        tracing::trace!(level_dbfs = level, probability, "Scored frame");
        Ok(probability)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn frame(samples: Vec<i16>) -> AudioFrame {
        AudioFrame::new(Duration::ZERO, 16_000, samples)
    }

    fn tone(amplitude: i16) -> Vec<i16> {
        (0..320)
            .map(|i| if i % 2 == 0 { amplitude } else { -amplitude })
            .collect()
    }

    #[test]
    fn silence_scores_near_zero() {
        let mut vad = EnergyVad::default();
        let p = vad.evaluate(&frame(vec![0; 320])).unwrap();
        assert!(p < 0.01, "got {p}");
    }

    #[test]
    fn speech_level_scores_near_one() {
        let mut vad = EnergyVad::default();
        // About -10 dBFS.
        let p = vad.evaluate(&frame(tone(10_000))).unwrap();
        assert!(p > 0.99, "got {p}");
    }

    #[test]
    fn midpoint_scores_one_half() {
        let mut vad = EnergyVad::default();
        // A square wave's RMS equals its amplitude: 0.01 full scale is -40 dBFS.
        let p = vad.evaluate(&frame(tone(328))).unwrap();
        assert!((p - 0.5).abs() < 0.05, "got {p}");
    }

    #[test]
    fn louder_frames_score_higher() {
        let mut vad = EnergyVad::default();
        let quiet = vad.evaluate(&frame(tone(200))).unwrap();
        let loud = vad.evaluate(&frame(tone(800))).unwrap();
        assert!(loud > quiet);
    }

    #[test]
    fn empty_frame_is_an_error() {
        let mut vad = EnergyVad::default();
        assert!(vad.evaluate(&frame(Vec::new())).is_err());
    }

    #[test]
    fn level_is_clamped_to_the_floor() {
        let vad = EnergyVad::default();
        assert_eq!(vad.level_dbfs(&[0; 10]), -96.0);
        assert!((vad.level_dbfs(&tone(i16::MAX)) - 0.0).abs() < 0.01);
    }
}
