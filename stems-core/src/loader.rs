//! C8: loader façade. `load(path) -> Song`.

use std::path::Path;

use crate::boxtree::{self, sample_ranges, BoxNode, ParseOptions};
use crate::delay::DelayCompensator;
use crate::error::{Error, Result};
use crate::freeform::{decode_itunes_data, FreeformItem, ItunesValue};
use crate::kai_legacy;
use crate::payload::{decode_kons, decode_vpch, KaidPayload};
use crate::song::{ItunesMetadata, Song};
use crate::webvtt;

/// Open a file and produce a unified `Song`. Dispatches on extension:
/// `.kai` (legacy zip, read-only migration), `.stem.m4a`/`.m4a`/`.mp4`
/// (this system's native format), or a `.cdg` pair, which this build
/// defers and reports as unsupported.
pub fn load(path: &Path) -> Result<Song> {
    let _span = tracing::info_span!("load", path = %path.display()).entered();
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();

    if file_name.ends_with(".kai") {
        tracing::debug!("dispatching to legacy .kai loader");
        return kai_legacy::load(path);
    }
    if file_name.ends_with(".cdg") {
        return Err(Error::UnsupportedFormat { extension: "cdg".to_string() });
    }
    if file_name.ends_with(".m4a") || file_name.ends_with(".mp4") {
        let bytes = std::fs::read(path)?;
        let is_stem_file = file_name.ends_with(".stem.m4a");
        tracing::debug!(is_stem_file, bytes = bytes.len(), "parsing M4A box tree");
        return load_m4a(&bytes, is_stem_file);
    }

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_string();
    Err(Error::UnsupportedFormat { extension })
}

fn load_m4a(bytes: &[u8], is_stem_file: bool) -> Result<Song> {
    let top_level = boxtree::parse(bytes, ParseOptions::default())?;
    let moov = top_level
        .iter()
        .find(|n| n.type_str() == "moov")
        .ok_or_else(|| Error::MalformedBox { at: 0, reason: "no moov box found".to_string() })?;

    let ilst = moov.find_path("udta/meta/ilst");

    let kaid_item = ilst.and_then(|ilst| find_freeform(ilst, "com.stems", "kaid"));
    let vpch_item = ilst.and_then(|ilst| find_freeform(ilst, "com.stems", "vpch"));
    let kons_item = ilst.and_then(|ilst| find_freeform(ilst, "com.stems", "kons"));

    let kaid_payload = match kaid_item {
        Some(item) => Some(KaidPayload::from_json_bytes(&item.value)?),
        None if is_stem_file => return Err(Error::MissingKaraokePayload),
        None => None,
    };

    let had_kaid = kaid_payload.is_some();
    let mut song = match kaid_payload {
        Some(payload) => Song::from_kaid(payload),
        None => Song::from_kaid(empty_kaid()),
    };

    if let Some(item) = vpch_item {
        song.vocal_pitch = Some(decode_vpch(25, &item.value));
    }
    if let Some(item) = kons_item {
        song.onsets = Some(decode_kons(&item.value));
    }

    song.itunes_metadata = decode_itunes_metadata(ilst);

    // `kaid` is the canonical line source; the `mov_text` subtitle track
    // is only consulted when no `kaid` payload is present at all, so a
    // generic karaoke-subtitled MP4 without the proprietary atom still
    // loads something useful.
    if !had_kaid {
        tracing::debug!("no kaid payload, falling back to mov_text subtitle track");
        let delay = DelayCompensator::new(song.audio.encoder_delay_samples, 44100);
        if let Some(vtt_text) = extract_subtitle_text(bytes, moov) {
            let (lines, warnings) = webvtt::decode(&vtt_text, &delay);
            if !warnings.is_empty() {
                tracing::warn!(count = warnings.len(), "malformed cues dropped while decoding subtitle track");
            }
            if !lines.is_empty() {
                song.lines = lines;
            }
        }
    }

    Ok(song)
}

fn empty_kaid() -> KaidPayload {
    use crate::payload::{AudioDescriptor, Profile, TimingInfo, TimingReference};
    KaidPayload::new(
        AudioDescriptor {
            profile: Profile::Stems4,
            encoder_delay_samples: 0,
            sources: Vec::new(),
            presets: Vec::new(),
        },
        TimingInfo { reference: TimingReference::AlignedToVocals, offset_sec: 0.0 },
        Vec::new(),
        Vec::new(),
    )
}

fn find_freeform(ilst: &BoxNode, namespace: &str, name: &str) -> Option<FreeformItem> {
    ilst.children()
        .iter()
        .filter(|c| c.type_str() == "----")
        .filter_map(FreeformItem::decode)
        .find(|item| item.namespace == namespace && item.name == name)
}

fn decode_itunes_metadata(ilst: Option<&BoxNode>) -> ItunesMetadata {
    let mut meta = ItunesMetadata::default();
    let Some(ilst) = ilst else { return meta };

    let text_tag = |tag: &str| -> Option<String> {
        let node = ilst.find_child(tag)?;
        let data = node.find_child("data")?.leaf_data()?;
        match decode_itunes_data(tag, data)? {
            ItunesValue::Text(s) => Some(s),
            _ => None,
        }
    };

    meta.title = text_tag("\u{00a9}nam");
    meta.artist = text_tag("\u{00a9}ART");
    meta.album = text_tag("\u{00a9}alb");
    meta.year = text_tag("\u{00a9}day");
    meta.genre = text_tag("\u{00a9}gen");

    if let Some(node) = ilst.find_child("covr") {
        if let Some(data) = node.find_child("data").and_then(|d| d.leaf_data()) {
            meta.cover_art = match decode_itunes_data("covr", data) {
                Some(ItunesValue::Jpeg(bytes)) | Some(ItunesValue::Png(bytes)) => Some(bytes),
                _ => None,
            };
        }
    }

    meta
}

/// `true` if `trak`'s `mdia/hdlr` declares a text/subtitle handler
/// (`text` or `sbtl`). Shared with [`crate::save`], which rebuilds this
/// track's sample table on every save, and [`crate::validator`], which
/// checks the rebuilt track decodes back to the saved lines.
pub(crate) fn is_subtitle_trak(trak: &BoxNode) -> bool {
    let Some(hdlr) = trak.find_path("mdia/hdlr") else { return false };
    let Some(data) = hdlr.leaf_data() else { return false };
    matches!(handler_type_of(data).as_deref(), Some("text") | Some("sbtl"))
}

/// Locate the subtitle (`mov_text`) track and concatenate its sample bytes
/// into a single WebVTT document. Each sample in a `mov_text` track is one
/// cue's worth of plain-text payload length-prefixed by a 2-byte size; this
/// loader reassembles those back into cue blocks separated by blank lines,
/// mirroring the shape `webvtt::encode` produces.
pub(crate) fn extract_subtitle_text(file_bytes: &[u8], moov: &BoxNode) -> Option<String> {
    for trak in moov.children().iter().filter(|c| c.type_str() == "trak") {
        if !is_subtitle_trak(trak) {
            continue;
        }
        let stbl = trak.find_path("mdia/minf/stbl")?;
        let ranges = sample_ranges(stbl)?;

        let mut out = String::from("WEBVTT\n\n");
        for range in ranges {
            let start = range.offset as usize;
            let end = start + range.size as usize;
            if end > file_bytes.len() || start + 2 > end {
                continue;
            }
            let text_len = u16::from_be_bytes([file_bytes[start], file_bytes[start + 1]]) as usize;
            let text_start = start + 2;
            let text_end = (text_start + text_len).min(end);
            if let Ok(cue_block) = std::str::from_utf8(&file_bytes[text_start..text_end]) {
                out.push_str(cue_block.trim());
                out.push_str("\n\n");
            }
        }
        return Some(out);
    }
    None
}

fn handler_type_of(hdlr_data: &[u8]) -> Option<String> {
    if hdlr_data.len() < 12 {
        return None;
    }
    std::str::from_utf8(&hdlr_data[8..12]).ok().map(str::to_string)
}
