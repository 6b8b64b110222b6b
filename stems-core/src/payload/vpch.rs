//! `vpch`: little-endian f32 vocal pitch samples at a fixed sample rate
//! (25 Hz per spec.md §4.4; the rate itself is carried separately in
//! `Song.vocal_pitch.sample_rate_hz`, not inside the byte stream).

/// A decoded pitch stream: samples in MIDI-cents, sampled at `sample_rate_hz`.
#[derive(Debug, Clone, PartialEq)]
pub struct VpchSamples {
    pub sample_rate_hz: u16,
    pub values: Vec<f32>,
}

pub fn encode_vpch(values: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() * 4);
    for v in values {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

pub fn decode_vpch(sample_rate_hz: u16, bytes: &[u8]) -> VpchSamples {
    let values = bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    VpchSamples { sample_rate_hz, values }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_pitch_samples() {
        let values = vec![60.0_f32, 60.5, 61.25, -1.0];
        let bytes = encode_vpch(&values);
        let decoded = decode_vpch(25, &bytes);
        assert_eq!(decoded.values, values);
        assert_eq!(decoded.sample_rate_hz, 25);
    }

    #[test]
    fn ignores_a_trailing_partial_sample() {
        let mut bytes = encode_vpch(&[1.0, 2.0]);
        bytes.push(0xFF);
        let decoded = decode_vpch(25, &bytes);
        assert_eq!(decoded.values, vec![1.0, 2.0]);
    }
}
