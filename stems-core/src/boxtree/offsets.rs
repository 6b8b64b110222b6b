//! C3: chunk-offset rewriter.
//!
//! Walks every `trak/mdia/minf/stbl` subtree under a `moov` node and
//! applies a signed delta to `stco`/`co64` entries at or beyond a
//! threshold absolute file offset, upgrading `stco` to `co64` in place
//! when an entry would otherwise overflow 32 bits.

use super::{string_to_fourcc, BoxNode, BoxPayload};

/// Summary of what an offset rewrite pass changed, so callers (C9) can
/// decide whether another fixed-point iteration is needed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OffsetRewrite {
    pub entries_rewritten: u64,
    pub tables_upgraded_to_co64: u64,
    /// Extra bytes the `moov` subtree grew by due to `stco` → `co64`
    /// upgrades (4 bytes per entry in every upgraded table).
    pub extra_growth: i64,
}

/// Apply `delta` to every `stco`/`co64` entry `>= threshold` found under
/// `moov`. Returns a summary including any additional size growth caused
/// by 32-to-64-bit table upgrades.
///
/// A table upgrade itself grows `moov`, which means every offset at or
/// beyond `threshold` (including ones in tracks unrelated to the upgraded
/// table) must shift by that extra growth too. This function resolves
/// that fixed point with a mutation-free dry run first — walking every
/// `stco` table to see whether it would overflow under the
/// currently-accumulated delta, and folding in its growth — before
/// applying the single, final, stable delta in one real mutating pass.
pub fn rewrite_chunk_offsets(moov: &mut BoxNode, delta: i64, threshold: u64) -> OffsetRewrite {
    let mut final_delta = delta;
    let mut total_growth = 0i64;

    loop {
        let mut grown_this_pass = 0i64;
        for trak in moov.children().iter().filter(|c| c.type_str() == "trak") {
            if let Some(growth) = trak_stco_growth_if_upgraded(trak, final_delta, threshold) {
                grown_this_pass += growth;
            }
        }
        if grown_this_pass == 0 {
            break;
        }
        final_delta += grown_this_pass;
        total_growth += grown_this_pass;
    }

    let mut summary = OffsetRewrite::default();
    summary.extra_growth = total_growth;
    for trak in moov.children_mut().iter_mut().filter(|c| c.type_str() == "trak") {
        rewrite_trak(trak, final_delta, threshold, &mut summary);
    }
    summary
}

fn trak_stco_growth_if_upgraded(trak: &BoxNode, delta: i64, threshold: u64) -> Option<i64> {
    let stco = trak.find_child("mdia")?.find_child("minf")?.find_child("stbl")?.find_child("stco")?;
    if stbl_needs_upgrade(stco, delta, threshold) {
        let data = stco.leaf_data()?;
        let count = u32::from_be_bytes(data[4..8].try_into().ok()?) as i64;
        Some(count * 4)
    } else {
        None
    }
}

fn rewrite_trak(trak: &mut BoxNode, delta: i64, threshold: u64, summary: &mut OffsetRewrite) {
    let Some(mdia) = trak.find_child_mut("mdia") else { return };
    let Some(minf) = mdia.find_child_mut("minf") else { return };
    let Some(stbl) = minf.find_child_mut("stbl") else { return };

    if let Some(stco) = stbl.find_child("stco") {
        let upgrade = stbl_needs_upgrade(stco, delta, threshold);
        let stco = stbl.find_child_mut("stco").expect("checked above");
        rewrite_stco_in_place(stco, delta, threshold, summary, upgrade);
    }
    if let Some(co64) = stbl.find_child_mut("co64") {
        rewrite_co64_in_place(co64, delta, threshold, summary);
    }
}

fn stbl_needs_upgrade(stco: &BoxNode, delta: i64, threshold: u64) -> bool {
    let Some(data) = stco.leaf_data() else { return false };
    if data.len() < 8 {
        return false;
    }
    let count = u32::from_be_bytes(data[4..8].try_into().unwrap()) as usize;
    for i in 0..count {
        let start = 8 + i * 4;
        if start + 4 > data.len() {
            break;
        }
        let offset = u32::from_be_bytes(data[start..start + 4].try_into().unwrap()) as u64;
        if offset >= threshold {
            let shifted = offset as i64 + delta;
            if shifted > u32::MAX as i64 {
                return true;
            }
        }
    }
    false
}

fn rewrite_stco_in_place(
    stco: &mut BoxNode,
    delta: i64,
    threshold: u64,
    summary: &mut OffsetRewrite,
    upgrade: bool,
) {
    let BoxPayload::Leaf(data) = &mut stco.payload else { return };
    if data.len() < 8 {
        return;
    }
    let count = u32::from_be_bytes(data[4..8].try_into().unwrap()) as usize;

    if upgrade {
        let mut new_entries: Vec<u64> = Vec::with_capacity(count);
        for i in 0..count {
            let start = 8 + i * 4;
            if start + 4 > data.len() {
                break;
            }
            let offset = u32::from_be_bytes(data[start..start + 4].try_into().unwrap()) as u64;
            let new_offset = if offset >= threshold {
                summary.entries_rewritten += 1;
                (offset as i64 + delta) as u64
            } else {
                offset
            };
            new_entries.push(new_offset);
        }
        let mut new_data = Vec::with_capacity(8 + new_entries.len() * 8);
        new_data.extend_from_slice(&data[0..4]);
        new_data.extend_from_slice(&(new_entries.len() as u32).to_be_bytes());
        for entry in &new_entries {
            new_data.extend_from_slice(&entry.to_be_bytes());
        }
        stco.box_type = string_to_fourcc("co64");
        stco.payload = BoxPayload::Leaf(new_data);
        summary.tables_upgraded_to_co64 += 1;
        summary.extra_growth += new_entries.len() as i64 * 4;
        return;
    }

    for i in 0..count {
        let start = 8 + i * 4;
        if start + 4 > data.len() {
            break;
        }
        let offset = u32::from_be_bytes(data[start..start + 4].try_into().unwrap());
        if offset as u64 >= threshold {
            let new_offset = (offset as i64 + delta) as u32;
            data[start..start + 4].copy_from_slice(&new_offset.to_be_bytes());
            summary.entries_rewritten += 1;
        }
    }
}

fn rewrite_co64_in_place(co64: &mut BoxNode, delta: i64, threshold: u64, summary: &mut OffsetRewrite) {
    let BoxPayload::Leaf(data) = &mut co64.payload else { return };
    if data.len() < 8 {
        return;
    }
    let count = u32::from_be_bytes(data[4..8].try_into().unwrap()) as usize;
    for i in 0..count {
        let start = 8 + i * 8;
        if start + 8 > data.len() {
            break;
        }
        let offset = u64::from_be_bytes(data[start..start + 8].try_into().unwrap());
        if offset >= threshold {
            let new_offset = (offset as i64 + delta) as u64;
            data[start..start + 8].copy_from_slice(&new_offset.to_be_bytes());
            summary.entries_rewritten += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boxtree::{BoxNode, BoxPayload};

    fn stco_box(offsets: &[u32]) -> BoxNode {
        let mut data = Vec::new();
        data.extend_from_slice(&[0, 0, 0, 0]);
        data.extend_from_slice(&(offsets.len() as u32).to_be_bytes());
        for o in offsets {
            data.extend_from_slice(&o.to_be_bytes());
        }
        BoxNode {
            box_type: string_to_fourcc("stco"),
            offset: 0,
            total_size: 8 + data.len() as u64,
            header_size: 8,
            payload: BoxPayload::Leaf(data),
        }
    }

    fn wrap(box_type: &str, child: BoxNode) -> BoxNode {
        BoxNode {
            box_type: string_to_fourcc(box_type),
            offset: 0,
            total_size: 0,
            header_size: 8,
            payload: BoxPayload::Container {
                preamble: Vec::new(),
                children: vec![child],
            },
        }
    }

    fn build_moov_with_stco(offsets: &[u32]) -> BoxNode {
        let stbl = wrap("stbl", stco_box(offsets));
        let minf = wrap("minf", stbl);
        let mdia = wrap("mdia", minf);
        let trak = wrap("trak", mdia);
        wrap("moov", trak)
    }

    fn stco_entries(moov: &BoxNode) -> Vec<u32> {
        let stbl = moov
            .find_path("trak/mdia/minf/stbl")
            .expect("stbl present");
        let table = stbl
            .find_child("stco")
            .or_else(|| stbl.find_child("co64"))
            .expect("offset table present");
        let data = table.leaf_data().unwrap();
        let count = u32::from_be_bytes(data[4..8].try_into().unwrap()) as usize;
        (0..count)
            .map(|i| u32::from_be_bytes(data[8 + i * 4..12 + i * 4].try_into().unwrap()))
            .collect()
    }

    #[test]
    fn shifts_entries_at_or_above_threshold() {
        let mut moov = build_moov_with_stco(&[100, 5000, 20000]);
        let summary = rewrite_chunk_offsets(&mut moov, 9847, 4096);
        assert_eq!(summary.entries_rewritten, 2);
        assert_eq!(summary.tables_upgraded_to_co64, 0);
        assert_eq!(stco_entries(&moov), vec![100, 5000 + 9847, 20000 + 9847]);
    }

    #[test]
    fn leaves_entries_below_threshold_untouched() {
        let mut moov = build_moov_with_stco(&[10, 20, 30]);
        let summary = rewrite_chunk_offsets(&mut moov, 1000, 4096);
        assert_eq!(summary.entries_rewritten, 0);
        assert_eq!(stco_entries(&moov), vec![10, 20, 30]);
    }

    #[test]
    fn upgrades_to_co64_on_overflow() {
        let near_max = (u32::MAX - 10) as u32;
        let mut moov = build_moov_with_stco(&[near_max]);
        let summary = rewrite_chunk_offsets(&mut moov, 1000, 0);
        assert_eq!(summary.tables_upgraded_to_co64, 1);
        assert_eq!(summary.extra_growth, 4);

        let stbl = moov.find_path("trak/mdia/minf/stbl").unwrap();
        assert!(stbl.find_child("stco").is_none());
        let co64 = stbl.find_child("co64").unwrap();
        let data = co64.leaf_data().unwrap();
        let value = u64::from_be_bytes(data[8..16].try_into().unwrap());
        assert_eq!(value, near_max as u64 + 1000);
    }
}
