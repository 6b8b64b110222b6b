//! Sample-table decoding: combine `stsz`/`stsc`/`stco`/`co64` into a flat
//! list of (absolute file offset, size) per sample, in sample order.
//!
//! Used by the loader to pull subtitle-track bytes out of `mdat` and by
//! the validator to spot-check that chunk offsets land on real sample
//! boundaries.

use super::BoxNode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleRange {
    pub offset: u64,
    pub size: u64,
}

/// Decode the full per-sample (offset, size) list for one `stbl` subtree.
/// Returns `None` if any required table is missing or malformed; callers
/// treat that as "no samples" rather than a hard error, since a track with
/// an empty/absent sample table is legal (e.g. a freshly created mdat-less
/// stub during testing).
pub fn sample_ranges(stbl: &BoxNode) -> Option<Vec<SampleRange>> {
    let stsz = stbl.find_child("stsz")?.leaf_data()?;
    let stsc = stbl.find_child("stsc")?.leaf_data()?;
    let chunk_offsets = read_chunk_offsets(stbl)?;

    let sizes = read_stsz(stsz)?;
    let stsc_entries = read_stsc(stsc)?;

    let samples_per_chunk = expand_samples_per_chunk(&stsc_entries, chunk_offsets.len());

    let mut ranges = Vec::with_capacity(sizes.len());
    let mut sample_index = 0usize;
    for (chunk_index, &chunk_offset) in chunk_offsets.iter().enumerate() {
        let count = samples_per_chunk.get(chunk_index).copied().unwrap_or(0) as usize;
        let mut cursor = chunk_offset;
        for _ in 0..count {
            if sample_index >= sizes.len() {
                break;
            }
            let size = sizes[sample_index] as u64;
            ranges.push(SampleRange { offset: cursor, size });
            cursor += size;
            sample_index += 1;
        }
    }
    Some(ranges)
}

/// Read a track's duration in seconds from its `mdia/mdhd`, handling both
/// the 32-bit (version 0) and 64-bit (version 1) field widths.
pub fn track_duration_sec(trak: &BoxNode) -> Option<f64> {
    let mdhd = trak.find_path("mdia/mdhd")?.leaf_data()?;
    if mdhd.is_empty() {
        return None;
    }
    let (timescale, duration) = if mdhd[0] == 1 {
        if mdhd.len() < 32 {
            return None;
        }
        let timescale = u32::from_be_bytes(mdhd[20..24].try_into().ok()?);
        let duration = u64::from_be_bytes(mdhd[24..32].try_into().ok()?);
        (timescale, duration)
    } else {
        if mdhd.len() < 24 {
            return None;
        }
        let timescale = u32::from_be_bytes(mdhd[12..16].try_into().ok()?);
        let duration = u32::from_be_bytes(mdhd[16..20].try_into().ok()?) as u64;
        (timescale, duration)
    };
    if timescale == 0 {
        return None;
    }
    Some(duration as f64 / timescale as f64)
}

pub fn read_chunk_offsets(stbl: &BoxNode) -> Option<Vec<u64>> {
    if let Some(stco) = stbl.find_child("stco") {
        let data = stco.leaf_data()?;
        if data.len() < 8 {
            return None;
        }
        let count = u32::from_be_bytes(data[4..8].try_into().ok()?) as usize;
        let mut out = Vec::with_capacity(count);
        for i in 0..count {
            let start = 8 + i * 4;
            if start + 4 > data.len() {
                break;
            }
            out.push(u32::from_be_bytes(data[start..start + 4].try_into().ok()?) as u64);
        }
        return Some(out);
    }
    if let Some(co64) = stbl.find_child("co64") {
        let data = co64.leaf_data()?;
        if data.len() < 8 {
            return None;
        }
        let count = u32::from_be_bytes(data[4..8].try_into().ok()?) as usize;
        let mut out = Vec::with_capacity(count);
        for i in 0..count {
            let start = 8 + i * 8;
            if start + 8 > data.len() {
                break;
            }
            out.push(u64::from_be_bytes(data[start..start + 8].try_into().ok()?));
        }
        return Some(out);
    }
    None
}

fn read_stsz(data: &[u8]) -> Option<Vec<u32>> {
    if data.len() < 12 {
        return None;
    }
    let sample_size = u32::from_be_bytes(data[4..8].try_into().ok()?);
    let sample_count = u32::from_be_bytes(data[8..12].try_into().ok()?) as usize;
    if sample_size != 0 {
        return Some(vec![sample_size; sample_count]);
    }
    let mut out = Vec::with_capacity(sample_count);
    for i in 0..sample_count {
        let start = 12 + i * 4;
        if start + 4 > data.len() {
            break;
        }
        out.push(u32::from_be_bytes(data[start..start + 4].try_into().ok()?));
    }
    Some(out)
}

struct StscEntry {
    first_chunk: u32,
    samples_per_chunk: u32,
}

fn read_stsc(data: &[u8]) -> Option<Vec<StscEntry>> {
    if data.len() < 8 {
        return None;
    }
    let entry_count = u32::from_be_bytes(data[4..8].try_into().ok()?) as usize;
    let mut out = Vec::with_capacity(entry_count);
    for i in 0..entry_count {
        let start = 8 + i * 12;
        if start + 12 > data.len() {
            break;
        }
        let first_chunk = u32::from_be_bytes(data[start..start + 4].try_into().ok()?);
        let samples_per_chunk = u32::from_be_bytes(data[start + 4..start + 8].try_into().ok()?);
        out.push(StscEntry { first_chunk, samples_per_chunk });
    }
    Some(out)
}

fn expand_samples_per_chunk(entries: &[StscEntry], chunk_count: usize) -> Vec<u32> {
    let mut out = vec![0u32; chunk_count];
    for (i, entry) in entries.iter().enumerate() {
        let start_chunk = entry.first_chunk.saturating_sub(1) as usize;
        let end_chunk = entries
            .get(i + 1)
            .map(|next| next.first_chunk.saturating_sub(1) as usize)
            .unwrap_or(chunk_count);
        for slot in out.iter_mut().take(end_chunk.min(chunk_count)).skip(start_chunk) {
            *slot = entry.samples_per_chunk;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boxtree::{string_to_fourcc, BoxPayload};

    fn leaf(box_type: &str, data: Vec<u8>) -> BoxNode {
        BoxNode {
            box_type: string_to_fourcc(box_type),
            offset: 0,
            total_size: 8 + data.len() as u64,
            header_size: 8,
            payload: BoxPayload::Leaf(data),
        }
    }

    fn stbl_with(sizes: &[u32], chunk_offsets: &[u32], samples_per_chunk: u32) -> BoxNode {
        let mut stsz = vec![0u8; 4];
        stsz.extend_from_slice(&0u32.to_be_bytes());
        stsz.extend_from_slice(&(sizes.len() as u32).to_be_bytes());
        for s in sizes {
            stsz.extend_from_slice(&s.to_be_bytes());
        }

        let mut stsc = vec![0u8; 4];
        stsc.extend_from_slice(&1u32.to_be_bytes());
        stsc.extend_from_slice(&1u32.to_be_bytes());
        stsc.extend_from_slice(&samples_per_chunk.to_be_bytes());
        stsc.extend_from_slice(&1u32.to_be_bytes());

        let mut stco = vec![0u8; 4];
        stco.extend_from_slice(&(chunk_offsets.len() as u32).to_be_bytes());
        for o in chunk_offsets {
            stco.extend_from_slice(&o.to_be_bytes());
        }

        BoxNode {
            box_type: string_to_fourcc("stbl"),
            offset: 0,
            total_size: 0,
            header_size: 8,
            payload: BoxPayload::Container {
                preamble: Vec::new(),
                children: vec![leaf("stsz", stsz), leaf("stsc", stsc), leaf("stco", stco)],
            },
        }
    }

    #[test]
    fn computes_sample_ranges_for_one_sample_per_chunk() {
        let stbl = stbl_with(&[10, 20, 30], &[100, 200, 300], 1);
        let ranges = sample_ranges(&stbl).unwrap();
        assert_eq!(
            ranges,
            vec![
                SampleRange { offset: 100, size: 10 },
                SampleRange { offset: 200, size: 20 },
                SampleRange { offset: 300, size: 30 },
            ]
        );
    }

    #[test]
    fn computes_sample_ranges_for_multiple_samples_per_chunk() {
        let stbl = stbl_with(&[5, 5, 5, 5], &[1000, 2000], 2);
        let ranges = sample_ranges(&stbl).unwrap();
        assert_eq!(
            ranges,
            vec![
                SampleRange { offset: 1000, size: 5 },
                SampleRange { offset: 1005, size: 5 },
                SampleRange { offset: 2000, size: 5 },
                SampleRange { offset: 2005, size: 5 },
            ]
        );
    }
}
