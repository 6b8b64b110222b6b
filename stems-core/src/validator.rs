//! C11: post-write validation.
//!
//! Runs immediately after a save publishes, on the exact bytes just
//! written. A failure here triggers the `.bak` restore in [`crate::save`].

use crate::boxtree::{self, read_chunk_offsets, sample_ranges, ParseOptions};
use crate::delay::DelayCompensator;
use crate::error::{Error, Result};
use crate::freeform::FreeformItem;
use crate::loader::extract_subtitle_text;
use crate::payload::KaidPayload;
use crate::song::Song;
use crate::webvtt;

const MAX_SAMPLED_CHUNKS: usize = 16;

pub fn validate(new_bytes: &[u8], original_bytes: &[u8], song: &Song) -> Result<()> {
    let top_level = boxtree::parse(new_bytes, ParseOptions::default())?;
    let moov = top_level
        .iter()
        .find(|n| n.type_str() == "moov")
        .ok_or_else(|| Error::MalformedBox { at: 0, reason: "no moov box after save".to_string() })?;

    let ilst = moov
        .find_path("udta/meta/ilst")
        .ok_or_else(|| Error::MalformedBox { at: 0, reason: "ilst missing after save".to_string() })?;

    let kaid_item = ilst
        .children()
        .iter()
        .filter(|c| c.type_str() == "----")
        .filter_map(FreeformItem::decode)
        .find(|item| item.namespace == "com.stems" && item.name == "kaid")
        .ok_or(Error::MissingKaraokePayload)?;

    let decoded = KaidPayload::from_json_bytes(&kaid_item.value)?;

    if decoded.lines.len() != song.lines.len() {
        return Err(Error::MalformedBox {
            at: 0,
            reason: format!(
                "kaid line count mismatch after save: wrote {}, decoded {}",
                song.lines.len(),
                decoded.lines.len()
            ),
        });
    }
    if let (Some(expected_first), Some(decoded_first)) = (song.lines.first(), decoded.lines.first()) {
        if (expected_first.start_sec - decoded_first.start_sec).abs() > 1e-3 {
            return Err(Error::MalformedBox { at: 0, reason: "first line start drifted after save".to_string() });
        }
    }
    if let (Some(expected_last), Some(decoded_last)) = (song.lines.last(), decoded.lines.last()) {
        if (expected_last.end_sec - decoded_last.end_sec).abs() > 1e-3 {
            return Err(Error::MalformedBox { at: 0, reason: "last line end drifted after save".to_string() });
        }
    }

    validate_chunk_offsets(moov, new_bytes, original_bytes)?;

    let non_mixdown_count = song
        .audio
        .sources
        .iter()
        .filter(|s| s.role != crate::payload::Role::Mixdown)
        .count();
    let stem = moov
        .find_path("udta/stem")
        .ok_or_else(|| Error::MalformedBox { at: 0, reason: "stem box missing after save".to_string() })?;
    let stem_json: serde_json::Value = serde_json::from_slice(stem.leaf_data().unwrap_or(&[]))?;
    let stem_count = stem_json
        .get("stems")
        .and_then(|v| v.as_array())
        .map(|a| a.len())
        .unwrap_or(0);
    if stem_count != non_mixdown_count {
        return Err(Error::MalformedBox {
            at: 0,
            reason: format!(
                "stem box lists {stem_count} stems, expected {non_mixdown_count} (audio.sources minus mixdown)"
            ),
        });
    }

    if let Some(vtt_text) = extract_subtitle_text(new_bytes, moov) {
        let delay = DelayCompensator::new(song.audio.encoder_delay_samples, 44_100);
        let (decoded_lines, _warnings) = webvtt::decode(&vtt_text, &delay);
        if decoded_lines.len() != song.lines.len() {
            return Err(Error::MalformedBox {
                at: 0,
                reason: format!(
                    "subtitle track line count mismatch after save: wrote {}, decoded {}",
                    song.lines.len(),
                    decoded_lines.len()
                ),
            });
        }
    }

    Ok(())
}

/// Every audio track must retain at least one chunk-offset entry, and a
/// bounded sample of chunks (spread across tracks) must still point at
/// bytes identical to what they pointed at before the save — the `mdat`
/// region is never touched by C9, so this should hold exactly for every
/// chunk, not just the sampled ones; the 16-chunk cap keeps validation
/// itself cheap on large files.
fn validate_chunk_offsets(moov: &crate::boxtree::BoxNode, new_bytes: &[u8], original_bytes: &[u8]) -> Result<()> {
    let mut sampled = 0usize;
    for trak in moov.children().iter().filter(|c| c.type_str() == "trak") {
        let Some(stbl) = trak.find_path("mdia/minf/stbl") else { continue };
        let is_audio = trak
            .find_path("mdia/minf/stbl/stsd")
            .map(|stsd| stsd_is_audio(stsd))
            .unwrap_or(false);

        let offsets = read_chunk_offsets(stbl);
        if is_audio {
            let has_entries = offsets.as_ref().map(|o| !o.is_empty()).unwrap_or(false);
            if !has_entries {
                return Err(Error::ChunkOffsetMismatch { track: 0, chunk_index: 0 });
            }
        }

        let Some(ranges) = sample_ranges(stbl) else { continue };
        for (chunk_index, range) in ranges.iter().enumerate() {
            if sampled >= MAX_SAMPLED_CHUNKS {
                return Ok(());
            }
            let offset = range.offset as usize;
            let sig_len = 8.min(range.size as usize);
            if offset + sig_len > new_bytes.len() {
                return Err(Error::ChunkOffsetMismatch { track: 0, chunk_index: chunk_index as u32 });
            }
            let new_sig = &new_bytes[offset..offset + sig_len];

            // The byte content of any given chunk is unmoved by a save
            // (only moov shifts); locate it in the original file at its
            // pre-save offset, shifted back by however much moov grew.
            let shift = new_bytes.len() as i64 - original_bytes.len() as i64;
            let original_offset = (offset as i64 - shift).max(0) as usize;
            if original_offset + sig_len > original_bytes.len() {
                continue;
            }
            let original_sig = &original_bytes[original_offset..original_offset + sig_len];
            if new_sig != original_sig {
                return Err(Error::ChunkOffsetMismatch { track: 0, chunk_index: chunk_index as u32 });
            }
            sampled += 1;
        }
    }
    Ok(())
}

fn stsd_is_audio(stsd: &crate::boxtree::BoxNode) -> bool {
    stsd.children().iter().any(|entry| {
        matches!(entry.type_str().as_str(), "mp4a" | "alac" | "ac-3" | "ec-3")
    })
}
