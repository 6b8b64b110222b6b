//! The `kaid` JSON schema: typed `Song` domain value plus serde mapping.

use serde::{Deserialize, Serialize};
use serde_json::Map;
use std::collections::BTreeMap;

use crate::error::{Error, Result};

const KAID_VERSION: &str = "1.0";

/// A role-tagged audio track. The closed set matches what the writer
/// understands; `Custom` lets a newer producer or a future profile round-trip
/// a role this build has never seen without losing it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Role {
    Mixdown,
    Drums,
    Bass,
    OtherInstrument,
    Vocals,
    Music,
    Custom(String),
}

impl Role {
    pub fn as_str(&self) -> &str {
        match self {
            Role::Mixdown => "mixdown",
            Role::Drums => "drums",
            Role::Bass => "bass",
            Role::OtherInstrument => "other",
            Role::Vocals => "vocals",
            Role::Music => "music",
            Role::Custom(s) => s,
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "mixdown" => Role::Mixdown,
            "drums" => Role::Drums,
            "bass" => Role::Bass,
            "other" => Role::OtherInstrument,
            "vocals" => Role::Vocals,
            "music" => Role::Music,
            other => Role::Custom(other.to_string()),
        }
    }
}

impl Serialize for Role {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Role {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Role::parse(&s))
    }
}

/// STEMS-2 (mixdown + music) or STEMS-4 (mixdown + drums + bass + other +
/// vocals); `Custom` preserves any profile name this build doesn't know.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Profile {
    Stems2,
    Stems4,
    Custom(String),
}

impl Profile {
    pub fn as_str(&self) -> &str {
        match self {
            Profile::Stems2 => "STEMS-2",
            Profile::Stems4 => "STEMS-4",
            Profile::Custom(s) => s,
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "STEMS-2" => Profile::Stems2,
            "STEMS-4" => Profile::Stems4,
            other => Profile::Custom(other.to_string()),
        }
    }

    /// Stem order fixed per profile, mixdown first (spec §4.10).
    pub fn role_order(&self) -> Vec<Role> {
        match self {
            Profile::Stems2 => vec![Role::Mixdown, Role::Music],
            Profile::Stems4 => vec![
                Role::Mixdown,
                Role::Drums,
                Role::Bass,
                Role::OtherInstrument,
                Role::Vocals,
            ],
            Profile::Custom(_) => vec![Role::Mixdown],
        }
    }
}

impl Serialize for Profile {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Profile {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Profile::parse(&s))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub track: u32,
    pub id: String,
    pub role: Role,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preset {
    pub id: String,
    /// role name -> dB level. `kaid`'s JSON key is the bare role string,
    /// not a nested object, hence the `BTreeMap` for stable key order.
    pub levels: BTreeMap<String, f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioDescriptor {
    pub profile: Profile,
    pub encoder_delay_samples: u32,
    pub sources: Vec<Source>,
    pub presets: Vec<Preset>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimingReference {
    AlignedToVocals,
    AlignedToMixdown,
}

impl TimingReference {
    fn as_str(&self) -> &str {
        match self {
            TimingReference::AlignedToVocals => "aligned_to_vocals",
            TimingReference::AlignedToMixdown => "aligned_to_mixdown",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "aligned_to_mixdown" => TimingReference::AlignedToMixdown,
            _ => TimingReference::AlignedToVocals,
        }
    }
}

impl Serialize for TimingReference {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for TimingReference {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(TimingReference::parse(&s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimingInfo {
    pub reference: TimingReference,
    pub offset_sec: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Singer {
    pub id: String,
    pub name: String,
    pub guide_track: u32,
}

/// Wire shape is the 2-element array `[start, end]`, matching `word_timing`'s
/// documented `[[w_start_rel, w_end_rel], …]` schema (and the tuple shape
/// [`crate::kai_legacy`] already uses for the legacy format).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Word {
    pub start_sec: f64,
    pub end_sec: f64,
}

impl Serialize for Word {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        use serde::ser::SerializeTuple;
        let mut tup = serializer.serialize_tuple(2)?;
        tup.serialize_element(&self.start_sec)?;
        tup.serialize_element(&self.end_sec)?;
        tup.end()
    }
}

impl<'de> Deserialize<'de> for Word {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let (start_sec, end_sec) = <(f64, f64)>::deserialize(deserializer)?;
        Ok(Word { start_sec, end_sec })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LyricLine {
    pub singer_id: String,
    #[serde(rename = "start")]
    pub start_sec: f64,
    #[serde(rename = "end")]
    pub end_sec: f64,
    pub text: String,
    #[serde(default)]
    pub disabled: bool,
    /// word boundaries relative to `start_sec`; wire key is `word_timing`.
    #[serde(rename = "word_timing")]
    pub words: Vec<Word>,
}

/// The fully-typed `kaid` JSON document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KaidPayload {
    pub stems_karaoke_version: String,
    pub audio: AudioDescriptor,
    pub timing: TimingInfo,
    pub singers: Vec<Singer>,
    pub lines: Vec<LyricLine>,
    /// Unknown top-level keys, preserved round-trip rather than rejected.
    #[serde(flatten)]
    pub extra: Map<String, serde_json::Value>,
}

impl KaidPayload {
    pub fn new(audio: AudioDescriptor, timing: TimingInfo, singers: Vec<Singer>, lines: Vec<LyricLine>) -> Self {
        Self {
            stems_karaoke_version: KAID_VERSION.to_string(),
            audio,
            timing,
            singers,
            lines,
            extra: Map::new(),
        }
    }

    /// Validate the invariants from the data model: word times lie within
    /// the line, line starts are monotone per singer, same-singer lines may
    /// not overlap, and (when `track_duration_sec` is known) no line runs
    /// past the end of the track it's attached to.
    pub fn validate(&self, track_duration_sec: Option<f64>) -> Result<()> {
        const DURATION_EPSILON: f64 = 1e-6;

        for (index, line) in self.lines.iter().enumerate() {
            if line.start_sec > line.end_sec {
                return Err(Error::NonMonotonicTiming {
                    singer_id: line.singer_id.clone(),
                    index,
                });
            }
            if let Some(duration) = track_duration_sec {
                if line.end_sec > duration + DURATION_EPSILON {
                    return Err(Error::TimestampBeyondDuration { index });
                }
            }
            for (word_index, word) in line.words.iter().enumerate() {
                let abs_start = line.start_sec + word.start_sec;
                let abs_end = line.start_sec + word.end_sec;
                if abs_start < line.start_sec || abs_end > line.end_sec || abs_start > abs_end {
                    return Err(Error::WordOutOfLine { line_index: index, word_index });
                }
            }
        }

        let mut last_by_singer: BTreeMap<&str, (usize, f64, f64)> = BTreeMap::new();
        for (index, line) in self.lines.iter().enumerate() {
            if let Some(&(prev_index, prev_start, prev_end)) = last_by_singer.get(line.singer_id.as_str()) {
                if line.start_sec < prev_start {
                    return Err(Error::NonMonotonicTiming {
                        singer_id: line.singer_id.clone(),
                        index,
                    });
                }
                if line.start_sec < prev_end {
                    return Err(Error::OverlappingLines {
                        singer_id: line.singer_id.clone(),
                        indices: (prev_index, index),
                    });
                }
            }
            last_by_singer.insert(&line.singer_id, (index, line.start_sec, line.end_sec));
        }

        Ok(())
    }

    pub fn to_json_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_payload() -> KaidPayload {
        let audio = AudioDescriptor {
            profile: Profile::Stems4,
            encoder_delay_samples: 1105,
            sources: vec![
                Source { track: 0, id: "mix".into(), role: Role::Mixdown },
                Source { track: 1, id: "voc".into(), role: Role::Vocals },
            ],
            presets: vec![],
        };
        let timing = TimingInfo { reference: TimingReference::AlignedToVocals, offset_sec: 0.0 };
        let singers = vec![Singer { id: "A".into(), name: "Alice".into(), guide_track: 1 }];
        let lines = vec![LyricLine {
            singer_id: "A".into(),
            start_sec: 12.345,
            end_sec: 15.678,
            text: "hi".into(),
            disabled: false,
            words: vec![Word { start_sec: 0.0, end_sec: 0.3 }],
        }];
        KaidPayload::new(audio, timing, singers, lines)
    }

    #[test]
    fn round_trips_through_json() {
        let payload = sample_payload();
        let bytes = payload.to_json_bytes().unwrap();
        let back = KaidPayload::from_json_bytes(&bytes).unwrap();
        assert_eq!(back, payload);
    }

    #[test]
    fn detects_overlapping_lines_for_same_singer() {
        let mut payload = sample_payload();
        let first = payload.lines[0].clone();
        let mut second = first.clone();
        second.start_sec = first.start_sec + 0.1;
        second.end_sec = first.end_sec + 0.1;
        payload.lines.push(second);
        let err = payload.validate(None).unwrap_err();
        assert!(matches!(err, Error::OverlappingLines { .. }));
    }

    #[test]
    fn allows_overlap_across_different_singers() {
        let mut payload = sample_payload();
        let mut second = payload.lines[0].clone();
        second.singer_id = "B".into();
        payload.lines.push(second);
        payload.validate(None).unwrap();
    }

    #[test]
    fn detects_line_beyond_track_duration() {
        let payload = sample_payload();
        let err = payload.validate(Some(10.0)).unwrap_err();
        assert!(matches!(err, Error::TimestampBeyondDuration { .. }));
    }

    #[test]
    fn allows_line_within_track_duration() {
        let payload = sample_payload();
        payload.validate(Some(20.0)).unwrap();
    }

    #[test]
    fn unknown_top_level_keys_round_trip() {
        let mut payload = sample_payload();
        payload.extra.insert("custom_tool_hint".to_string(), serde_json::json!("foo"));
        let bytes = payload.to_json_bytes().unwrap();
        let back = KaidPayload::from_json_bytes(&bytes).unwrap();
        assert_eq!(back.extra.get("custom_tool_hint").unwrap(), "foo");
    }

    #[test]
    fn role_round_trips_unknown_value() {
        let role = Role::parse("synth_pad");
        assert_eq!(role, Role::Custom("synth_pad".to_string()));
        assert_eq!(role.as_str(), "synth_pad");
    }
}
