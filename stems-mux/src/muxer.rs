//! C10: drives the external audio-encoder subprocess that produces the
//! initial multi-track container, then hands the result to `stems_core`'s
//! writer façade (C9) for the `kaid`/`vpch`/`kons`/`stem` injection.
//!
//! The subprocess speaks a line-oriented protocol on stdout: lines prefixed
//! `PROGRESS:` carry a JSON [`crate::progress::ProgressEvent`], a line
//! prefixed `RESULT:` carries the terminal JSON outcome, and everything else
//! is forwarded to the `stems_mux::muxer::encoder_stdout` tracing target at
//! `debug` rather than discarded.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::broadcast;

use stems_core::delay::{DelayCompensator, AAC_44100_PRIMING_SAMPLES};
use stems_core::payload::{AudioDescriptor, Profile, Role, Singer, Source, TimingInfo, TimingReference};
use stems_core::song::{ItunesMetadata, Song};
use stems_core::{EngineConfig, Error, Result};

use crate::progress::{EncoderResult, MuxOutcome, ProgressEvent, CHANNEL_CAPACITY};

/// One `--stem role=path` pair from the CLI, in the order given (mixdown
/// must be first per the profile's fixed track order).
#[derive(Debug, Clone)]
pub struct StemInput {
    pub role: Role,
    pub path: PathBuf,
}

/// Everything `mux` needs to build the argv and, on success, the `Song`
/// handed to C9.
pub struct MuxRequest {
    pub stems: Vec<StemInput>,
    pub subtitle: PathBuf,
    pub meta: BTreeMap<String, String>,
    pub out: PathBuf,
    pub encoder_bin: PathBuf,
    pub config: EngineConfig,
}

/// Runs the encoder subprocess to completion, then applies the karaoke
/// payload via C9. Returns the broadcast receiver immediately so a caller
/// can subscribe before the encoder has produced its first `PROGRESS:`
/// line; the mux itself continues in the background task this spawns.
pub fn run_mux(request: MuxRequest) -> broadcast::Receiver<ProgressEvent> {
    let (tx, rx) = broadcast::channel(CHANNEL_CAPACITY);
    tokio::spawn(async move {
        let outcome = drive(&request, &tx).await;
        match outcome {
            Ok(()) => tracing::info!(out = %request.out.display(), "mux completed"),
            Err(e) => tracing::error!(error = %e, "mux failed"),
        }
    });
    rx
}

/// Same as [`run_mux`] but awaits completion directly, for the CLI's `mux`
/// subcommand where there is no embedding application to stream progress to
/// beyond stdout.
pub async fn run_mux_blocking(request: MuxRequest) -> Result<()> {
    let (tx, _rx) = broadcast::channel(CHANNEL_CAPACITY);
    drive(&request, &tx).await
}

async fn drive(request: &MuxRequest, tx: &broadcast::Sender<ProgressEvent>) -> Result<()> {
    let argv = build_argv(request);

    // Each invocation gets its own scratch directory under the configured
    // cache root (spec §6 "Filesystem layout"), both as the encoder's
    // working directory and so concurrent mux calls never collide on
    // scratch files. Removed on every exit path, success or failure.
    let operation_id = uuid::Uuid::new_v4().to_string();
    let scratch_dir = request.config.scratch_dir(&operation_id);
    std::fs::create_dir_all(&scratch_dir)?;

    tracing::info_span!("mux", out = %request.out.display(), scratch = %scratch_dir.display()).in_scope(|| {
        tracing::info!(stem_count = request.stems.len(), "invoking external encoder");
    });

    let spawn_result = Command::new(&request.encoder_bin)
        .args(&argv)
        .current_dir(&scratch_dir)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn();

    let mut child = match spawn_result {
        Ok(child) => child,
        Err(e) => {
            let _ = std::fs::remove_dir_all(&scratch_dir);
            return Err(Error::Io(e));
        }
    };

    let stdout = child
        .stdout
        .take()
        .expect("spawned with Stdio::piped() for stdout");
    let mut lines = BufReader::new(stdout).lines();

    let mut result: Option<EncoderResult> = None;
    while let Some(line) = lines.next_line().await? {
        if let Some(json) = line.strip_prefix("PROGRESS:") {
            match serde_json::from_str::<ProgressEvent>(json) {
                Ok(event) => {
                    let _ = tx.send(event);
                }
                Err(e) => tracing::warn!(error = %e, line, "malformed PROGRESS line from encoder"),
            }
        } else if let Some(json) = line.strip_prefix("RESULT:") {
            match serde_json::from_str::<EncoderResult>(json) {
                Ok(parsed) => result = Some(parsed),
                Err(e) => tracing::warn!(error = %e, line, "malformed RESULT line from encoder"),
            }
        } else {
            tracing::debug!(target: "stems_mux::muxer::encoder_stdout", "{line}");
        }
    }

    let status = child.wait().await?;
    let stderr_text = {
        let mut stderr = child.stderr.take();
        match stderr.take() {
            Some(mut pipe) => {
                let mut buf = Vec::new();
                tokio::io::AsyncReadExt::read_to_end(&mut pipe, &mut buf).await.ok();
                String::from_utf8_lossy(&buf).into_owned()
            }
            None => String::new(),
        }
    };

    let outcome = match (&result, status.success()) {
        (Some(r), true) if r.success => MuxOutcome::Succeeded,
        (Some(r), _) => MuxOutcome::Failed {
            stderr: r.error.clone().unwrap_or(stderr_text),
        },
        (None, _) => MuxOutcome::Failed { stderr: stderr_text },
    };

    let _ = std::fs::remove_dir_all(&scratch_dir);

    match outcome {
        MuxOutcome::Succeeded => {}
        MuxOutcome::Failed { stderr } => return Err(Error::ExternalEncoderFailed { stderr }),
    }

    let song = build_song(request)?;
    stems_core::save(&song, &request.out)
}

fn build_argv(request: &MuxRequest) -> Vec<String> {
    let mut argv = Vec::new();
    for stem in &request.stems {
        argv.push("--stem".to_string());
        argv.push(format!("{}={}", stem.role.as_str(), stem.path.display()));
    }
    argv.push("--subtitle".to_string());
    argv.push(request.subtitle.display().to_string());
    for (key, value) in &request.meta {
        argv.push("--meta".to_string());
        argv.push(format!("{key}={value}"));
    }
    argv.push("--out".to_string());
    argv.push(request.out.display().to_string());
    argv
}

/// Builds the `Song` handed to C9 after a successful mux: the lyric lines
/// come from the same subtitle file just muxed in (it is the only source
/// of timing data available to the CLI at this point), metadata from
/// `--meta`, and the stem roster from `--stem`.
fn build_song(request: &MuxRequest) -> Result<Song> {
    let delay = DelayCompensator::new(AAC_44100_PRIMING_SAMPLES, 44_100);

    let vtt_text = std::fs::read_to_string(&request.subtitle)?;
    let (lines, warnings) = stems_core::webvtt::decode(&vtt_text, &delay);
    for warning in &warnings {
        tracing::warn!(cue_index = warning.cue_index, reason = %warning.reason, "dropped malformed cue while building mux payload");
    }

    let non_mixdown_roles: Vec<Role> = request
        .stems
        .iter()
        .filter(|s| s.role != Role::Mixdown)
        .map(|s| s.role.clone())
        .collect();
    let profile = infer_profile(&non_mixdown_roles);

    let sources: Vec<Source> = request
        .stems
        .iter()
        .enumerate()
        .map(|(track, stem)| Source {
            track: track as u32,
            id: stem.role.as_str().to_string(),
            role: stem.role.clone(),
        })
        .collect();

    let mut singer_ids: Vec<String> = Vec::new();
    for line in &lines {
        if !singer_ids.contains(&line.singer_id) {
            singer_ids.push(line.singer_id.clone());
        }
    }
    let singers: Vec<Singer> = singer_ids
        .into_iter()
        .map(|id| Singer {
            name: id.clone(),
            id,
            guide_track: 0,
        })
        .collect();

    let audio = AudioDescriptor {
        profile,
        encoder_delay_samples: AAC_44100_PRIMING_SAMPLES,
        sources,
        presets: Vec::new(),
    };

    let timing = TimingInfo {
        reference: TimingReference::AlignedToVocals,
        offset_sec: 0.0,
    };

    let itunes_metadata = ItunesMetadata {
        title: request.meta.get("title").cloned(),
        artist: request.meta.get("artist").cloned(),
        album: request.meta.get("album").cloned(),
        year: request.meta.get("year").cloned(),
        genre: request.meta.get("genre").cloned(),
        cover_art: None,
    };

    let mut song = Song {
        audio,
        timing,
        singers,
        lines,
        vocal_pitch: None,
        onsets: None,
        itunes_metadata,
        extra: serde_json::Map::new(),
    };
    // No container exists yet at this point, so there's no track duration
    // to check against; `save`'s own validation call catches it once one does.
    song.to_kaid().validate(None)?;
    // `to_kaid` above is discarded; it only exists to validate before C9
    // repeats the same validation inside `save`. Keep `song` as the source
    // of truth rather than the round-tripped payload.
    let _ = &mut song;
    Ok(song)
}

fn infer_profile(non_mixdown_roles: &[Role]) -> Profile {
    let has = |role: &Role| non_mixdown_roles.contains(role);
    if non_mixdown_roles.len() == 1 && has(&Role::Music) {
        Profile::Stems2
    } else if non_mixdown_roles.len() == 4
        && has(&Role::Drums)
        && has(&Role::Bass)
        && has(&Role::OtherInstrument)
        && has(&Role::Vocals)
    {
        Profile::Stems4
    } else {
        Profile::Custom("custom".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_argv_in_the_pinned_order() {
        let request = MuxRequest {
            stems: vec![
                StemInput { role: Role::Mixdown, path: PathBuf::from("mix.wav") },
                StemInput { role: Role::Drums, path: PathBuf::from("drums.wav") },
            ],
            subtitle: PathBuf::from("cues.vtt"),
            meta: BTreeMap::from([("title".to_string(), "Song".to_string())]),
            out: PathBuf::from("out.stem.m4a"),
            encoder_bin: PathBuf::from("kai-encoder"),
            config: EngineConfig::with_overrides(None, None),
        };
        let argv = build_argv(&request);
        assert_eq!(
            argv,
            vec![
                "--stem", "mixdown=mix.wav",
                "--stem", "drums=drums.wav",
                "--subtitle", "cues.vtt",
                "--meta", "title=Song",
                "--out", "out.stem.m4a",
            ]
        );
    }

    #[test]
    fn infers_stems4_profile_from_roles() {
        let roles = vec![Role::Drums, Role::Bass, Role::OtherInstrument, Role::Vocals];
        assert!(matches!(infer_profile(&roles), Profile::Stems4));
    }

    #[test]
    fn infers_stems2_profile_from_roles() {
        let roles = vec![Role::Music];
        assert!(matches!(infer_profile(&roles), Profile::Stems2));
    }
}
