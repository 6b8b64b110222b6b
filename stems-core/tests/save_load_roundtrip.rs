//! End-to-end coverage of the load -> mutate -> save -> load cycle against
//! a synthetic single-track M4A, including the chunk-offset fixup that a
//! `moov` size change forces.

use stems_core::boxtree::{self, string_to_fourcc, BoxNode, BoxPayload, ParseOptions};
use stems_core::payload::{AudioDescriptor, LyricLine, Profile, Role, Singer, Source, TimingInfo, TimingReference, Word};
use stems_core::song::{ItunesMetadata, Song};
use stems_core::Error;

fn leaf(box_type: &str, data: Vec<u8>) -> BoxNode {
    BoxNode {
        box_type: string_to_fourcc(box_type),
        offset: 0,
        total_size: 0,
        header_size: 8,
        payload: BoxPayload::Leaf(data),
    }
}

fn container(box_type: &str, preamble: Vec<u8>, children: Vec<BoxNode>) -> BoxNode {
    BoxNode {
        box_type: string_to_fourcc(box_type),
        offset: 0,
        total_size: 0,
        header_size: 8,
        payload: BoxPayload::Container { preamble, children },
    }
}

fn stsd_audio() -> BoxNode {
    // one bare `mp4a` sample entry; only its fourcc matters to the validator
    let mp4a = leaf("mp4a", vec![0u8; 28]);
    let mut stsd = container("stsd", vec![0u8; 4], vec![mp4a]);
    if let BoxPayload::Container { preamble, .. } = &mut stsd.payload {
        preamble.extend_from_slice(&1u32.to_be_bytes()); // entry_count = 1
    }
    stsd
}

fn stsz(sizes: &[u32]) -> BoxNode {
    let mut data = vec![0u8; 4];
    data.extend_from_slice(&0u32.to_be_bytes()); // sample_size = 0 (table follows)
    data.extend_from_slice(&(sizes.len() as u32).to_be_bytes());
    for s in sizes {
        data.extend_from_slice(&s.to_be_bytes());
    }
    leaf("stsz", data)
}

fn stsc_one_chunk(samples_per_chunk: u32) -> BoxNode {
    let mut data = vec![0u8; 4];
    data.extend_from_slice(&1u32.to_be_bytes());
    data.extend_from_slice(&1u32.to_be_bytes()); // first_chunk
    data.extend_from_slice(&samples_per_chunk.to_be_bytes());
    data.extend_from_slice(&1u32.to_be_bytes()); // sample_description_index
    leaf("stsc", data)
}

fn stco(offsets: &[u32]) -> BoxNode {
    let mut data = vec![0u8; 4];
    data.extend_from_slice(&(offsets.len() as u32).to_be_bytes());
    for o in offsets {
        data.extend_from_slice(&o.to_be_bytes());
    }
    leaf("stco", data)
}

/// One audio track with a single chunk of `chunk_bytes.len()` bytes, with
/// its `stco` entry left at 0 (patched in by the caller once the final
/// layout is known).
fn audio_trak(chunk_bytes_len: u32) -> BoxNode {
    let stbl = container(
        "stbl",
        Vec::new(),
        vec![stsd_audio(), stsz(&[chunk_bytes_len]), stsc_one_chunk(1), stco(&[0])],
    );
    let minf = container("minf", Vec::new(), vec![stbl]);
    let mut hdlr_data = vec![0u8; 8];
    hdlr_data.extend_from_slice(b"soun");
    hdlr_data.extend_from_slice(&[0u8; 12]);
    hdlr_data.push(0);
    let mdia = container("mdia", Vec::new(), vec![leaf("hdlr", hdlr_data), minf]);
    container("trak", Vec::new(), vec![mdia])
}

/// Build a minimal but structurally valid `ftyp + moov + mdat` file, with
/// `moov`'s single `stco` entry pointing at the real `mdat` payload start.
fn build_synthetic_m4a(chunk_bytes: &[u8]) -> Vec<u8> {
    let ftyp = leaf("ftyp", {
        let mut v = b"M4A \0\0\x02\0".to_vec(); // major_brand, minor_version
        v.extend_from_slice(b"M4A "); // one compatible brand
        v
    });
    let trak = audio_trak(chunk_bytes.len() as u32);
    let moov = container("moov", Vec::new(), vec![trak]);

    // First pass: serialize with a placeholder stco offset of 0 to learn
    // where mdat's payload will actually start.
    let probe = boxtree::serialize(&[ftyp.clone(), moov.clone()]);
    let mdat_payload_start = probe.len() as u32 + 8; // + mdat header

    let mut final_moov = moov;
    patch_stco(&mut final_moov, mdat_payload_start);

    let mut mdat = leaf("mdat", chunk_bytes.to_vec());
    mdat.box_type = string_to_fourcc("mdat");

    boxtree::serialize(&[ftyp, final_moov, mdat])
}

fn patch_stco(moov: &mut BoxNode, offset: u32) {
    let stbl = moov
        .find_child_mut("trak")
        .unwrap()
        .find_child_mut("mdia")
        .unwrap()
        .find_child_mut("minf")
        .unwrap()
        .find_child_mut("stbl")
        .unwrap();
    let stco = stbl.find_child_mut("stco").unwrap();
    if let BoxPayload::Leaf(data) = &mut stco.payload {
        data[8..12].copy_from_slice(&offset.to_be_bytes());
    }
}

fn sample_song() -> Song {
    Song {
        audio: AudioDescriptor {
            profile: Profile::Stems4,
            encoder_delay_samples: 1105,
            sources: vec![Source { track: 0, id: "mix".into(), role: Role::Mixdown }],
            presets: Vec::new(),
        },
        timing: TimingInfo { reference: TimingReference::AlignedToVocals, offset_sec: 0.0 },
        singers: vec![Singer { id: "A".into(), name: "Alice".into(), guide_track: 0 }],
        lines: vec![LyricLine {
            singer_id: "A".into(),
            start_sec: 12.345,
            end_sec: 15.678,
            text: "hi".into(),
            disabled: false,
            words: vec![Word { start_sec: 0.0, end_sec: 0.3 }],
        }],
        vocal_pitch: None,
        onsets: None,
        itunes_metadata: ItunesMetadata::default(),
        extra: serde_json::Map::new(),
    }
}

#[test]
fn save_then_load_round_trips_lines_and_preserves_audio_bytes() {
    let chunk = vec![0xAAu8; 64];
    let file_bytes = build_synthetic_m4a(&chunk);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("song.stem.m4a");
    std::fs::write(&path, &file_bytes).unwrap();

    let song = sample_song();
    stems_core::save(&song, &path).unwrap();

    let reloaded = stems_core::load(&path).unwrap();
    assert_eq!(reloaded.lines.len(), 1);
    assert!((reloaded.lines[0].start_sec - 12.345).abs() < 1e-4);
    assert!((reloaded.lines[0].end_sec - 15.678).abs() < 1e-4);
    assert_eq!(reloaded.lines[0].text, "hi");

    // the mdat payload itself must be untouched by the save
    let saved_bytes = std::fs::read(&path).unwrap();
    assert!(saved_bytes.windows(chunk.len()).any(|w| w == chunk.as_slice()));
}

#[test]
fn save_is_idempotent_under_repeated_edits() {
    let chunk = vec![0x42u8; 32];
    let file_bytes = build_synthetic_m4a(&chunk);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("song.stem.m4a");
    std::fs::write(&path, &file_bytes).unwrap();

    let song = sample_song();
    stems_core::save(&song, &path).unwrap();
    let first_load = stems_core::load(&path).unwrap();

    stems_core::save(&first_load, &path).unwrap();
    let second_load = stems_core::load(&path).unwrap();

    assert_eq!(first_load.lines, second_load.lines);
    assert_eq!(first_load.audio, second_load.audio);
}

#[test]
fn save_rejects_overlapping_lines_for_the_same_singer_and_leaves_file_untouched() {
    let chunk = vec![0x11u8; 16];
    let file_bytes = build_synthetic_m4a(&chunk);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("song.stem.m4a");
    std::fs::write(&path, &file_bytes).unwrap();

    let mut song = sample_song();
    let mut overlapping = song.lines[0].clone();
    overlapping.start_sec += 0.1;
    overlapping.end_sec += 0.1;
    song.lines.push(overlapping);

    let err = stems_core::save(&song, &path).unwrap_err();
    assert!(matches!(err, Error::OverlappingLines { .. }));

    let untouched = std::fs::read(&path).unwrap();
    assert_eq!(untouched, file_bytes);
}

#[test]
fn load_on_a_dot_stem_m4a_with_no_kaid_atom_reports_missing_payload() {
    let chunk = vec![0x99u8; 8];
    let file_bytes = build_synthetic_m4a(&chunk);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("song.stem.m4a");
    std::fs::write(&path, &file_bytes).unwrap();

    let err = stems_core::load(&path).unwrap_err();
    assert!(matches!(err, Error::MissingKaraokePayload));
}

#[test]
fn load_on_a_plain_m4a_with_no_kaid_atom_defaults_to_empty_lines() {
    let chunk = vec![0x77u8; 8];
    let file_bytes = build_synthetic_m4a(&chunk);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("plain.m4a");
    std::fs::write(&path, &file_bytes).unwrap();

    let song = stems_core::load(&path).unwrap();
    assert!(song.lines.is_empty());
}

#[test]
fn unsupported_extension_is_reported_without_touching_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("song.cdg");
    std::fs::write(&path, b"not actually parsed").unwrap();

    let err = stems_core::load(&path).unwrap_err();
    assert!(matches!(err, Error::UnsupportedFormat { .. }));
}
