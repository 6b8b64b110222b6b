//! C6: karaoke-enriched WebVTT codec.
//!
//! Cue grammar:
//! ```text
//! cue-payload := "<v" SP singer-id ">" word+
//! word        := "<" timestamp ">" text SP?
//! timestamp   := HH ":" MM ":" SS "." mmm
//! ```
//! The first word of a line has an implicit start at the cue's own
//! timing-line start and carries no `<T>` tag; every later word boundary
//! is an explicit tag marking when that word begins. The tag also closes
//! out the previous word's end. The cue's own end time (the WebVTT
//! `-->` value) closes the final word. All timestamps are wire time
//! (post encoder-delay); `decode`/`encode` apply C7 to translate to/from
//! the logical, delay-free times stored on [`crate::payload::LyricLine`].

use crate::delay::DelayCompensator;
use crate::payload::{LyricLine, Word};

#[derive(Debug, Clone, PartialEq)]
pub struct CueWarning {
    pub cue_index: usize,
    pub reason: String,
}

pub fn encode(lines: &[LyricLine], delay: &DelayCompensator) -> String {
    let mut out = String::from("WEBVTT\n\n");
    for line in lines {
        let wire_start = delay.to_wire(line.start_sec);
        let wire_end = delay.to_wire(line.end_sec);

        out.push_str(&format_timestamp(wire_start));
        out.push_str(" --> ");
        out.push_str(&format_timestamp(wire_end));
        if line.disabled {
            out.push_str(" c.backup");
        }
        out.push('\n');

        out.push_str("<v ");
        out.push_str(&line.singer_id);
        out.push('>');

        for (i, word) in line.words.iter().enumerate() {
            if i == 0 {
                out.push_str(&escape_cue_text(&word_text(&line.text, i, line.words.len())));
            } else {
                out.push(' ');
                let wire_word_start = delay.to_wire(line.start_sec + word.start_sec);
                out.push('<');
                out.push_str(&format_timestamp(wire_word_start));
                out.push('>');
                out.push_str(&escape_cue_text(&word_text(&line.text, i, line.words.len())));
            }
        }
        out.push_str("\n\n");
    }
    out
}

/// The reference implementation stores per-word spans but only one line
/// of display text; reconstruct the displayed token for word `i` by
/// splitting `text` on whitespace. A line whose `words` count doesn't
/// match its whitespace-split token count still encodes — the extra or
/// missing tokens simply show up on the first/last word.
fn word_text(text: &str, index: usize, word_count: usize) -> String {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    if tokens.is_empty() {
        return String::new();
    }
    if index + 1 == word_count {
        tokens[index.min(tokens.len() - 1)..].join(" ")
    } else if index < tokens.len() {
        tokens[index].to_string()
    } else {
        String::new()
    }
}

fn escape_cue_text(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

fn unescape_cue_text(text: &str) -> String {
    text.replace("&lt;", "<").replace("&gt;", ">").replace("&amp;", "&")
}

pub fn format_timestamp(total_sec: f64) -> String {
    let clamped = total_sec.max(0.0);
    let total_ms = (clamped * 1000.0).round() as u64;
    let ms = total_ms % 1000;
    let total_sec_whole = total_ms / 1000;
    let s = total_sec_whole % 60;
    let total_min = total_sec_whole / 60;
    let m = total_min % 60;
    let h = total_min / 60;
    format!("{h:02}:{m:02}:{s:02}.{ms:03}")
}

pub fn parse_timestamp(s: &str) -> Option<f64> {
    let (hms, ms_str) = s.split_once('.')?;
    let mut parts = hms.split(':');
    let h: f64 = parts.next()?.parse().ok()?;
    let m: f64 = parts.next()?.parse().ok()?;
    let sec: f64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    let ms: f64 = ms_str.parse().ok()?;
    Some(h * 3600.0 + m * 60.0 + sec + ms / 1000.0)
}

/// Decode a full WebVTT document. Malformed cues are dropped and reported
/// via the returned warning list rather than aborting the whole file.
pub fn decode(vtt: &str, delay: &DelayCompensator) -> (Vec<LyricLine>, Vec<CueWarning>) {
    let mut lines = Vec::new();
    let mut warnings = Vec::new();

    let body = vtt.strip_prefix("WEBVTT").unwrap_or(vtt);
    let blocks: Vec<&str> = body.split("\n\n").map(str::trim).filter(|b| !b.is_empty()).collect();

    for (cue_index, block) in blocks.iter().enumerate() {
        match decode_cue(block, delay) {
            Ok(line) => lines.push(line),
            Err(reason) => warnings.push(CueWarning { cue_index, reason }),
        }
    }

    (lines, warnings)
}

fn decode_cue(block: &str, delay: &DelayCompensator) -> Result<LyricLine, String> {
    let mut block_lines = block.lines();
    let timing_line = block_lines.next().ok_or("empty cue block")?;
    let payload_line: String = block_lines.collect::<Vec<_>>().join("\n");

    let (times, class) = timing_line
        .split_once(" --> ")
        .map(|(start, rest)| {
            if let Some((end, cls)) = rest.split_once(' ') {
                (format!("{start} --> {end}"), Some(cls.trim().to_string()))
            } else {
                (format!("{start} --> {rest}"), None)
            }
        })
        .ok_or("missing cue timing line")?;

    let (start_str, end_str) = times.split_once(" --> ").ok_or("malformed cue timing")?;
    let wire_start = parse_timestamp(start_str.trim()).ok_or("malformed start timestamp")?;
    let wire_end = parse_timestamp(end_str.trim()).ok_or("malformed end timestamp")?;
    let disabled = class.as_deref() == Some("c.backup");

    let rest = payload_line.strip_prefix("<v ").ok_or("missing voice tag")?;
    let (singer_id, body) = rest.split_once('>').ok_or("malformed voice tag")?;

    let mut word_starts_wire = vec![wire_start];
    let mut texts = Vec::new();
    let mut remaining = body;

    loop {
        if let Some(tag_start) = remaining.find('<') {
            let text_before = remaining[..tag_start].trim();
            texts.push(unescape_cue_text(text_before));
            let tag_end = remaining[tag_start..].find('>').ok_or("unterminated word timestamp tag")?;
            let ts_str = &remaining[tag_start + 1..tag_start + tag_end];
            let ts = parse_timestamp(ts_str).ok_or("malformed word timestamp")?;
            word_starts_wire.push(ts);
            remaining = &remaining[tag_start + tag_end + 1..];
        } else {
            texts.push(unescape_cue_text(remaining.trim()));
            break;
        }
    }

    if texts.len() != word_starts_wire.len() {
        return Err("word/timestamp count mismatch".to_string());
    }

    let line_start_logical = delay.to_logical(wire_start);
    let line_end_logical = delay.to_logical(wire_end);

    let mut words = Vec::with_capacity(texts.len());
    for i in 0..texts.len() {
        let this_start_logical = delay.to_logical(word_starts_wire[i]) - line_start_logical;
        let next_wire = if i + 1 < word_starts_wire.len() { word_starts_wire[i + 1] } else { wire_end };
        let this_end_logical = delay.to_logical(next_wire) - line_start_logical;
        words.push(Word { start_sec: this_start_logical, end_sec: this_end_logical });
    }

    Ok(LyricLine {
        singer_id: singer_id.to_string(),
        start_sec: line_start_logical,
        end_sec: line_end_logical,
        text: texts.join(" "),
        disabled,
        words,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_delay() -> DelayCompensator {
        DelayCompensator::new(0, 44100)
    }

    fn sample_line() -> LyricLine {
        LyricLine {
            singer_id: "A".to_string(),
            start_sec: 12.0,
            end_sec: 15.0,
            text: "hi there friend".to_string(),
            disabled: false,
            words: vec![
                Word { start_sec: 0.0, end_sec: 1.0 },
                Word { start_sec: 1.0, end_sec: 2.0 },
                Word { start_sec: 2.0, end_sec: 3.0 },
            ],
        }
    }

    #[test]
    fn encodes_voice_tag_and_first_word_without_timestamp() {
        let out = encode(std::slice::from_ref(&sample_line()), &no_delay());
        assert!(out.starts_with("WEBVTT\n\n"));
        assert!(out.contains("<v A>hi <00:00:13.000>there <00:00:14.000>friend"));
    }

    #[test]
    fn round_trips_exactly_with_no_delay() {
        let line = sample_line();
        let encoded = encode(std::slice::from_ref(&line), &no_delay());
        let (decoded, warnings) = decode(&encoded, &no_delay());
        assert!(warnings.is_empty());
        assert_eq!(decoded.len(), 1);
        assert!((decoded[0].start_sec - line.start_sec).abs() < 1e-6);
        assert!((decoded[0].end_sec - line.end_sec).abs() < 1e-6);
        assert_eq!(decoded[0].words.len(), line.words.len());
    }

    #[test]
    fn round_trips_with_nonzero_delay() {
        let comp = DelayCompensator::new(1105, 44100);
        let line = sample_line();
        let encoded = encode(std::slice::from_ref(&line), &comp);
        let (decoded, warnings) = decode(&encoded, &comp);
        assert!(warnings.is_empty());
        assert!((decoded[0].start_sec - line.start_sec).abs() < 1e-4);
    }

    #[test]
    fn marks_disabled_lines_with_c_backup() {
        let mut line = sample_line();
        line.disabled = true;
        let encoded = encode(std::slice::from_ref(&line), &no_delay());
        assert!(encoded.contains("c.backup"));
        let (decoded, _) = decode(&encoded, &no_delay());
        assert!(decoded[0].disabled);
    }

    #[test]
    fn drops_malformed_cue_without_aborting_whole_file() {
        let good = encode(std::slice::from_ref(&sample_line()), &no_delay());
        let combined = format!("{good}00:00:99 --> not-a-time\n<v X>oops\n\n");
        let (decoded, warnings) = decode(&combined, &no_delay());
        assert_eq!(decoded.len(), 1);
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn timestamp_formatting_round_trips() {
        let t = 3725.5;
        let formatted = format_timestamp(t);
        assert_eq!(formatted, "01:02:05.500");
        let parsed = parse_timestamp(&formatted).unwrap();
        assert!((parsed - t).abs() < 1e-3);
    }
}
