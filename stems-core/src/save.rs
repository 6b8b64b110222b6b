//! C9: writer façade. `save(song, path)` performs the minimal structural
//! edit to an existing M4A and persists it atomically.

use std::io::Write;
use std::path::Path;

use crate::boxtree::{self, rewrite_chunk_offsets, serialize, string_to_fourcc, BoxNode, BoxPayload, ParseOptions};
use crate::delay::DelayCompensator;
use crate::error::{Error, Result};
use crate::freeform::{upsert_freeform, FreeformItem};
use crate::loader::is_subtitle_trak;
use crate::payload::{default_stem_profile, encode_kons, encode_vpch};
use crate::song::Song;
use crate::validator;
use crate::webvtt;

/// Operation `save(song, path)`:
/// 1. read the existing file (the writer edits, it does not create),
/// 2. compute new `kaid`/`vpch`/`kons` bytes and subtitle-track samples
///    from `song`,
/// 3. locate or synthesize `moov/udta/meta(mdir hdlr)/ilst`, upsert the
///    three freeform items plus `moov/udta/stem`, and rebuild the
///    `mov_text` subtitle track's sample table in place,
/// 4. recompute `moov`'s size and the resulting delta,
/// 5. fix up chunk offsets for that delta,
/// 6. splice the new `moov` bytes into the original file bytes, then append
///    the rebuilt subtitle samples after the untouched `mdat`,
/// 7. publish atomically via a `.tmp` + rename,
/// 8. validate, restoring from `.bak` on failure.
pub fn save(song: &Song, path: &Path) -> Result<()> {
    let _span = tracing::info_span!("save", path = %path.display()).entered();

    let original = std::fs::read(path)?;
    let top_level = boxtree::parse(&original, ParseOptions::default())?;

    let moov_index = top_level
        .iter()
        .position(|n| n.type_str() == "moov")
        .ok_or_else(|| Error::MalformedBox { at: 0, reason: "no moov box found".to_string() })?;

    let old_moov = &top_level[moov_index];
    let old_moov_start = old_moov.offset;
    let old_moov_end = old_moov.offset + old_moov.total_size;

    let track_duration_sec = old_moov
        .children()
        .iter()
        .filter(|c| c.type_str() == "trak")
        .filter_map(boxtree::track_duration_sec)
        .fold(None, |acc: Option<f64>, d| Some(acc.map_or(d, |a: f64| a.max(d))));
    song.to_kaid().validate(track_duration_sec)?;

    let mut new_moov = old_moov.clone();
    let subtitle_samples = apply_payload_edits(&mut new_moov, song)?;
    new_moov.recompute_sizes();

    let delta = new_moov.total_size as i64 - old_moov.total_size as i64;
    if delta != 0 {
        tracing::debug!(delta, "moov size changed, rewriting chunk offsets");
        rewrite_chunk_offsets(&mut new_moov, delta, old_moov_end);
        // Upgrades may have grown moov further; one more size pass settles it.
        new_moov.recompute_sizes();
    }

    if !subtitle_samples.is_empty() {
        let true_delta = new_moov.total_size as i64 - old_moov.total_size as i64;
        let base_offset = (original.len() as i64 + true_delta) as u64;
        patch_subtitle_offsets(&mut new_moov, base_offset, &subtitle_samples)?;
    }

    let mut new_bytes = Vec::with_capacity(original.len());
    new_bytes.extend_from_slice(&original[0..old_moov_start as usize]);
    new_bytes.extend_from_slice(&serialize(std::slice::from_ref(&new_moov)));
    new_bytes.extend_from_slice(&original[old_moov_end as usize..]);
    for sample in &subtitle_samples {
        new_bytes.extend_from_slice(sample);
    }

    let tmp_path = tmp_path_for(path);
    let bak_path = bak_path_for(path);

    {
        let mut tmp_file = std::fs::File::create(&tmp_path)?;
        tmp_file.write_all(&new_bytes)?;
        tmp_file.sync_all()?;
    }

    std::fs::copy(path, &bak_path)?;
    std::fs::rename(&tmp_path, path)?;

    match validator::validate(&new_bytes, &original, song) {
        Ok(()) => {
            let _ = std::fs::remove_file(&bak_path);
            Ok(())
        }
        Err(validation_err) => {
            let restored = std::fs::copy(&bak_path, path).is_ok();
            let _ = std::fs::remove_file(&bak_path);
            Err(Error::PostWriteValidationFailed {
                detail: validation_err.to_string(),
                restored,
            })
        }
    }
}

fn tmp_path_for(path: &Path) -> std::path::PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(".tmp");
    os.into()
}

fn bak_path_for(path: &Path) -> std::path::PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(".bak");
    os.into()
}

/// Upserts the three freeform items plus the `stem` box, and rebuilds the
/// subtitle track's sample table in place with placeholder (zero) chunk
/// offsets. Returns the new subtitle sample blobs (2-byte length-prefixed
/// cue text, one per sample) in the order they must be appended to the
/// file; the caller patches their real offsets once the final byte layout
/// is known. Empty if the file has no subtitle track.
fn apply_payload_edits(moov: &mut BoxNode, song: &Song) -> Result<Vec<Vec<u8>>> {
    let ilst = locate_or_build_ilst(moov);

    let kaid_json = String::from_utf8(song.to_kaid().to_json_bytes()?)
        .expect("serde_json output is always valid UTF-8");
    upsert_freeform(ilst, FreeformItem::utf8("com.stems", "kaid", &kaid_json));

    if let Some(pitch) = &song.vocal_pitch {
        let bytes = encode_vpch(&pitch.values);
        upsert_freeform(ilst, FreeformItem::binary("com.stems", "vpch", bytes));
    }
    if let Some(onsets) = &song.onsets {
        let bytes = encode_kons(onsets);
        upsert_freeform(ilst, FreeformItem::binary("com.stems", "kons", bytes));
    }

    let non_mixdown_roles: Vec<_> = song
        .audio
        .sources
        .iter()
        .filter(|s| s.role != crate::payload::Role::Mixdown)
        .map(|s| s.role.clone())
        .collect();
    let stem_profile = default_stem_profile(&non_mixdown_roles);
    let stem_json = serde_json::to_vec(&stem_profile)?;
    upsert_stem_box(moov, stem_json);

    let samples = build_subtitle_samples(song);
    if let Some(trak) = find_subtitle_trak_mut(moov) {
        rebuild_subtitle_sample_tables(trak, &samples)?;
        Ok(samples)
    } else {
        Ok(Vec::new())
    }
}

/// Encode `song.lines` as WebVTT and split it back into one `mov_text`
/// sample per cue, each length-prefixed the way the loader expects.
fn build_subtitle_samples(song: &Song) -> Vec<Vec<u8>> {
    let delay = DelayCompensator::new(song.audio.encoder_delay_samples, 44_100);
    let vtt = webvtt::encode(&song.lines, &delay);
    let body = vtt.strip_prefix("WEBVTT\n\n").unwrap_or(vtt.as_str());
    body.split("\n\n")
        .map(str::trim)
        .filter(|block| !block.is_empty())
        .map(|block| {
            let mut sample = Vec::with_capacity(2 + block.len());
            sample.extend_from_slice(&(block.len() as u16).to_be_bytes());
            sample.extend_from_slice(block.as_bytes());
            sample
        })
        .collect()
}

fn find_subtitle_trak_mut(moov: &mut BoxNode) -> Option<&mut BoxNode> {
    moov.children_mut()
        .iter_mut()
        .find(|c| c.type_str() == "trak" && is_subtitle_trak(c))
}

/// Replace `stsz`/`stsc`/`stco` under the subtitle track's `stbl` with a
/// fresh one-sample-per-chunk table sized for `samples`. Offsets are left
/// at zero; [`patch_subtitle_offsets`] fills in the real values once the
/// post-splice file layout is known. `stts` is left untouched: cue display
/// timing lives in the WebVTT cue text itself, not the sample durations.
fn rebuild_subtitle_sample_tables(trak: &mut BoxNode, samples: &[Vec<u8>]) -> Result<()> {
    let stbl = trak
        .find_child_mut("mdia")
        .and_then(|m| m.find_child_mut("minf"))
        .and_then(|m| m.find_child_mut("stbl"))
        .ok_or_else(|| Error::MalformedBox { at: 0, reason: "subtitle trak has no stbl".to_string() })?;

    let count = samples.len() as u32;

    let mut stsz = vec![0u8; 4];
    stsz.extend_from_slice(&0u32.to_be_bytes()); // sample_size = 0 (table follows)
    stsz.extend_from_slice(&count.to_be_bytes());
    for sample in samples {
        stsz.extend_from_slice(&(sample.len() as u32).to_be_bytes());
    }

    let mut stsc = vec![0u8; 4];
    stsc.extend_from_slice(&1u32.to_be_bytes()); // entry_count
    stsc.extend_from_slice(&1u32.to_be_bytes()); // first_chunk
    stsc.extend_from_slice(&1u32.to_be_bytes()); // samples_per_chunk
    stsc.extend_from_slice(&1u32.to_be_bytes()); // sample_description_index

    let mut stco = vec![0u8; 4];
    stco.extend_from_slice(&count.to_be_bytes());
    stco.resize(stco.len() + 4 * count as usize, 0);

    replace_or_insert_leaf(stbl, "stsz", stsz);
    replace_or_insert_leaf(stbl, "stsc", stsc);
    replace_or_insert_leaf(stbl, "stco", stco);
    stbl.children_mut().retain(|c| c.type_str() != "co64");

    Ok(())
}

fn replace_or_insert_leaf(container: &mut BoxNode, box_type: &str, data: Vec<u8>) {
    if let Some(existing) = container.find_child_mut(box_type) {
        existing.payload = BoxPayload::Leaf(data);
    } else {
        container.children_mut().push(BoxNode {
            box_type: string_to_fourcc(box_type),
            offset: 0,
            total_size: 0,
            header_size: 8,
            payload: BoxPayload::Leaf(data),
        });
    }
}

/// Fill in the subtitle track's `stco` with the real offsets of `samples`
/// as they will be appended after the rest of the file, starting at
/// `base_offset`. One chunk per sample, in order.
fn patch_subtitle_offsets(moov: &mut BoxNode, base_offset: u64, samples: &[Vec<u8>]) -> Result<()> {
    let trak = find_subtitle_trak_mut(moov)
        .ok_or_else(|| Error::MalformedBox { at: 0, reason: "subtitle trak vanished mid-save".to_string() })?;
    let stco = trak
        .find_child_mut("mdia")
        .and_then(|m| m.find_child_mut("minf"))
        .and_then(|m| m.find_child_mut("stbl"))
        .and_then(|s| s.find_child_mut("stco"))
        .ok_or_else(|| Error::MalformedBox { at: 0, reason: "subtitle trak has no stco".to_string() })?;
    let BoxPayload::Leaf(data) = &mut stco.payload else {
        return Err(Error::MalformedBox { at: 0, reason: "stco is not a leaf".to_string() });
    };

    let mut cursor = base_offset;
    for (i, sample) in samples.iter().enumerate() {
        if cursor > u32::MAX as u64 {
            return Err(Error::SubtitleOffsetOverflow { offset: cursor });
        }
        let pos = 8 + i * 4;
        data[pos..pos + 4].copy_from_slice(&(cursor as u32).to_be_bytes());
        cursor += sample.len() as u64;
    }
    Ok(())
}

fn locate_or_build_ilst(moov: &mut BoxNode) -> &mut BoxNode {
    if moov.find_child("udta").is_none() {
        moov.children_mut().push(container_box("udta", Vec::new(), Vec::new()));
    }
    let udta = moov.find_child_mut("udta").unwrap();

    if udta.find_child("meta").is_none() {
        let hdlr = build_mdir_hdlr();
        udta.children_mut().push(container_box("meta", vec![0u8; 4], vec![hdlr]));
    }
    let meta = udta.find_child_mut("meta").unwrap();

    if meta.find_child("ilst").is_none() {
        meta.children_mut().push(container_box("ilst", Vec::new(), Vec::new()));
    }
    meta.find_child_mut("ilst").unwrap()
}

fn upsert_stem_box(moov: &mut BoxNode, stem_json: Vec<u8>) {
    if moov.find_child("udta").is_none() {
        moov.children_mut().push(container_box("udta", Vec::new(), Vec::new()));
    }
    let udta = moov.find_child_mut("udta").unwrap();
    if let Some(existing) = udta.find_child_mut("stem") {
        existing.payload = BoxPayload::Leaf(stem_json);
    } else {
        udta.children_mut().push(BoxNode {
            box_type: string_to_fourcc("stem"),
            offset: 0,
            total_size: 0,
            header_size: 8,
            payload: BoxPayload::Leaf(stem_json),
        });
    }
}

fn build_mdir_hdlr() -> BoxNode {
    let mut data = vec![0u8; 8]; // version/flags + pre_defined
    data.extend_from_slice(b"mdir");
    data.extend_from_slice(&[0u8; 12]); // reserved
    data.push(0); // empty component name
    BoxNode {
        box_type: string_to_fourcc("hdlr"),
        offset: 0,
        total_size: 0,
        header_size: 8,
        payload: BoxPayload::Leaf(data),
    }
}

fn container_box(box_type: &str, preamble: Vec<u8>, children: Vec<BoxNode>) -> BoxNode {
    BoxNode {
        box_type: string_to_fourcc(box_type),
        offset: 0,
        total_size: 0,
        header_size: 8,
        payload: BoxPayload::Container { preamble, children },
    }
}
