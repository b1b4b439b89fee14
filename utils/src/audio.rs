use std::io::Cursor;

/// Root mean square of the samples, normalized to [0, 1].
pub fn rms(pcm16: &[i16]) -> f32 {
    if pcm16.is_empty() {
        return 0.0;
    }
    let sum: f64 = pcm16
        .iter()
        .map(|&s| {
            let v = s as f64 / 32768.0;
            v * v
        })
        .sum();
    (sum / pcm16.len() as f64).sqrt() as f32
}

/// A trait for converting audio sample types to a binary representation (Vec<u8>).
pub trait ToBinary {
    fn to_binary(&self) -> Vec<u8>;
}

impl ToBinary for [i16] {
    fn to_binary(&self) -> Vec<u8> {
        self.iter().flat_map(|&sample| sample.to_le_bytes()).collect()
    }
}

/// Encodes mono PCM16 samples as an in-memory WAV file.
pub fn encode_wav(pcm16: &[i16], sample_rate: u32) -> anyhow::Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut wav = Vec::new();
    {
        let mut writer = hound::WavWriter::new(Cursor::new(&mut wav), spec)?;
        for &sample in pcm16 {
            writer.write_sample(sample)?;
        }
        writer.finalize()?;
    }
    Ok(wav)
}

/// Reassembles PCM16 samples from a byte stream whose chunk boundaries may
/// split a sample in half.
#[derive(Debug, Default)]
pub struct Pcm16Reassembler {
    carry: Option<u8>,
}

impl Pcm16Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) -> Vec<i16> {
        let mut rest = bytes;
        let mut samples = Vec::with_capacity(bytes.len() / 2 + 1);

        if let Some(low) = self.carry.take() {
            match rest.split_first() {
                Some((&high, tail)) => {
                    samples.push(i16::from_le_bytes([low, high]));
                    rest = tail;
                }
                None => {
                    self.carry = Some(low);
                    return samples;
                }
            }
        }

        let mut chunks = rest.chunks_exact(2);
        samples.extend(chunks.by_ref().map(|c| i16::from_le_bytes([c[0], c[1]])));
        if let [odd] = chunks.remainder() {
            self.carry = Some(*odd);
        }
        samples
    }

    /// True when half a sample is still waiting for its second byte.
    pub fn has_pending(&self) -> bool {
        self.carry.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_little_endian_bytes() {
        let bytes = [1i16, -1, 256].as_slice().to_binary();
        assert_eq!(bytes, vec![0x01, 0x00, 0xFF, 0xFF, 0x00, 0x01]);
    }

    #[test]
    fn rms_of_silence_and_full_scale() {
        assert_eq!(rms(&[]), 0.0);
        assert_eq!(rms(&[0; 100]), 0.0);
        assert!((rms(&[i16::MIN; 10]) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn wav_header_matches_input() {
        let wav = encode_wav(&[0, 100, -100, 0], 16_000).unwrap();
        let reader = hound::WavReader::new(Cursor::new(wav)).unwrap();
        assert_eq!(reader.spec().sample_rate, 16_000);
        assert_eq!(reader.spec().channels, 1);
        assert_eq!(reader.len(), 4);
    }

    #[test]
    fn reassembler_handles_split_samples() {
        let bytes = [300i16, -2, 7].as_slice().to_binary();
        let mut reassembler = Pcm16Reassembler::new();

        let mut out = reassembler.push(&bytes[..1]);
        assert!(out.is_empty());
        assert!(reassembler.has_pending());
        out.extend(reassembler.push(&bytes[1..4]));
        out.extend(reassembler.push(&[]));
        out.extend(reassembler.push(&bytes[4..]));

        assert_eq!(out, vec![300, -2, 7]);
        assert!(!reassembler.has_pending());
    }
}
