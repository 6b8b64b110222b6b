//! Read-only migration from the legacy `.kai` zip container.
//!
//! `.kai` predates the `kaid` atom: it is a plain ZIP archive holding a
//! `song.json` document (an older, flatter schema) plus an optional cover
//! image. This build never writes `.kai` — only `.stem.m4a` — so this
//! module is read-only by design (open question resolved in DESIGN.md).

use std::io::Read;
use std::path::Path;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::payload::{AudioDescriptor, LyricLine, Profile, Singer, Source, TimingInfo, TimingReference, Word};
use crate::song::{ItunesMetadata, Song};

#[derive(Debug, Deserialize)]
struct LegacySong {
    title: Option<String>,
    artist: Option<String>,
    album: Option<String>,
    year: Option<String>,
    genre: Option<String>,
    #[serde(default)]
    profile: Option<String>,
    #[serde(default)]
    encoder_delay_samples: Option<u32>,
    #[serde(default)]
    sources: Vec<LegacySource>,
    #[serde(default)]
    singers: Vec<LegacySinger>,
    #[serde(default)]
    lines: Vec<LegacyLine>,
}

#[derive(Debug, Deserialize)]
struct LegacySource {
    track: u32,
    id: String,
    role: String,
}

#[derive(Debug, Deserialize)]
struct LegacySinger {
    id: String,
    name: String,
    #[serde(default)]
    guide_track: u32,
}

#[derive(Debug, Deserialize)]
struct LegacyLine {
    singer_id: String,
    start: f64,
    end: f64,
    text: String,
    #[serde(default)]
    words: Vec<(f64, f64)>,
}

pub fn load(path: &Path) -> Result<Song> {
    let file = std::fs::File::open(path)?;
    let mut archive = zip::ZipArchive::new(file).map_err(|e| Error::KaiArchive(e.to_string()))?;

    let mut song_json = String::new();
    archive
        .by_name("song.json")
        .map_err(|e| Error::KaiArchive(format!("missing song.json: {e}")))?
        .read_to_string(&mut song_json)
        .map_err(Error::Io)?;

    let legacy: LegacySong = serde_json::from_str(&song_json)?;

    let cover_art = ["cover.jpg", "cover.png"]
        .iter()
        .find_map(|name| {
            let mut entry = archive.by_name(name).ok()?;
            let mut bytes = Vec::new();
            entry.read_to_end(&mut bytes).ok()?;
            Some(bytes)
        });

    let profile = legacy
        .profile
        .map(|s| Profile::parse(&s))
        .unwrap_or(Profile::Stems4);

    let sources = legacy
        .sources
        .into_iter()
        .map(|s| Source { track: s.track, id: s.id, role: crate::payload::Role::parse(&s.role) })
        .collect();

    let singers = legacy
        .singers
        .into_iter()
        .map(|s| Singer { id: s.id, name: s.name, guide_track: s.guide_track })
        .collect();

    let lines = legacy
        .lines
        .into_iter()
        .map(|l| LyricLine {
            singer_id: l.singer_id,
            start_sec: l.start,
            end_sec: l.end,
            text: l.text,
            disabled: false,
            words: l
                .words
                .into_iter()
                .map(|(start_sec, end_sec)| Word { start_sec, end_sec })
                .collect(),
        })
        .collect();

    Ok(Song {
        audio: AudioDescriptor {
            profile,
            encoder_delay_samples: legacy.encoder_delay_samples.unwrap_or(0),
            sources,
            presets: Vec::new(),
        },
        timing: TimingInfo { reference: TimingReference::AlignedToVocals, offset_sec: 0.0 },
        singers,
        lines,
        vocal_pitch: None,
        onsets: None,
        itunes_metadata: ItunesMetadata {
            title: legacy.title,
            artist: legacy.artist,
            album: legacy.album,
            year: legacy.year,
            genre: legacy.genre,
            cover_art,
        },
        extra: serde_json::Map::new(),
    })
}
