//! `kons`: little-endian f64 onset timestamps, in absolute seconds.

pub fn encode_kons(onsets: &[f64]) -> Vec<u8> {
    let mut out = Vec::with_capacity(onsets.len() * 8);
    for t in onsets {
        out.extend_from_slice(&t.to_le_bytes());
    }
    out
}

pub fn decode_kons(bytes: &[u8]) -> Vec<f64> {
    bytes
        .chunks_exact(8)
        .map(|c| f64::from_le_bytes(c.try_into().unwrap()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_onset_timestamps() {
        let onsets = vec![0.0, 1.234_567, 59.999_999];
        let bytes = encode_kons(&onsets);
        assert_eq!(decode_kons(&bytes), onsets);
    }
}
