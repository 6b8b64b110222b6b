//! The core domain value: a fully-decoded karaoke stem file.

use serde_json::Map;

use crate::payload::{AudioDescriptor, KaidPayload, LyricLine, Singer, TimingInfo, VpchSamples};

#[derive(Debug, Clone, PartialEq)]
pub struct ItunesMetadata {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub year: Option<String>,
    pub genre: Option<String>,
    pub cover_art: Option<Vec<u8>>,
}

impl Default for ItunesMetadata {
    fn default() -> Self {
        Self {
            title: None,
            artist: None,
            album: None,
            year: None,
            genre: None,
            cover_art: None,
        }
    }
}

/// The unified in-memory value produced by the loader and consumed by the
/// writer. Box-tree and file-format detail never leaks past this type.
#[derive(Debug, Clone, PartialEq)]
pub struct Song {
    pub audio: AudioDescriptor,
    pub timing: TimingInfo,
    pub singers: Vec<Singer>,
    pub lines: Vec<LyricLine>,
    pub vocal_pitch: Option<VpchSamples>,
    pub onsets: Option<Vec<f64>>,
    pub itunes_metadata: ItunesMetadata,
    /// Unknown `kaid` top-level keys, preserved round-trip.
    pub extra: Map<String, serde_json::Value>,
}

impl Song {
    pub fn to_kaid(&self) -> KaidPayload {
        let mut payload = KaidPayload::new(
            self.audio.clone(),
            self.timing,
            self.singers.clone(),
            self.lines.clone(),
        );
        payload.extra = self.extra.clone();
        payload
    }

    pub fn from_kaid(payload: KaidPayload) -> Self {
        Self {
            audio: payload.audio,
            timing: payload.timing,
            singers: payload.singers,
            lines: payload.lines,
            vocal_pitch: None,
            onsets: None,
            itunes_metadata: ItunesMetadata::default(),
            extra: payload.extra,
        }
    }
}
