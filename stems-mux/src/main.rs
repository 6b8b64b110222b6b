//! # stems-mux
//!
//! Thin CLI around `stems-core`: `inspect`/`load`/`save` exercise the
//! library's blocking load/save path directly, `mux` drives the external
//! audio-encoder subprocess (C10) end to end and streams its progress to
//! stdout.

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod muxer;
mod progress;

use muxer::{MuxRequest, StemInput};
use stems_core::payload::Role;
use stems_core::EngineConfig;

#[derive(Parser, Debug)]
#[command(name = "stems-mux")]
#[command(about = "Inspect, load, save, and mux .stem.m4a karaoke containers")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the box tree and decoded kaid summary for a file
    Inspect {
        path: PathBuf,
    },
    /// Decode a file into a Song and print it as JSON
    Load {
        path: PathBuf,
    },
    /// Apply a lyric-line edit read from a JSON file and save in place
    Save {
        path: PathBuf,
        /// JSON file holding an array of LyricLine values
        #[arg(long)]
        lines: PathBuf,
    },
    /// Drive the external audio encoder to build a fresh .stem.m4a, then
    /// attach the karaoke payload
    Mux {
        /// One `role=path` pair per stem; mixdown must come first
        #[arg(long = "stem", value_parser = parse_stem)]
        stems: Vec<StemInput>,
        #[arg(long)]
        subtitle: PathBuf,
        /// One `key=value` pair per iTunes metadata field
        #[arg(long = "meta", value_parser = parse_meta)]
        meta: Vec<(String, String)>,
        #[arg(long)]
        out: PathBuf,
        #[arg(long, env = "KAI_ENCODER_BIN")]
        encoder_bin: Option<PathBuf>,
        /// Scratch root for this invocation; defaults to the OS cache dir
        #[arg(long, env = "KAI_CACHE_DIR")]
        cache_dir: Option<PathBuf>,
        /// TOML file providing lower-priority `[engine]` overrides
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn parse_stem(s: &str) -> std::result::Result<StemInput, String> {
    let (role, path) = s
        .split_once('=')
        .ok_or_else(|| format!("expected role=path, got '{s}'"))?;
    Ok(StemInput { role: Role::parse(role), path: PathBuf::from(path) })
}

fn parse_meta(s: &str) -> std::result::Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{s}'"))?;
    Ok((key.to_string(), value.to_string()))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stems_mux=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    let args = Args::parse();

    match args.command {
        Command::Inspect { path } => inspect(&path),
        Command::Load { path } => load(&path),
        Command::Save { path, lines } => save(&path, &lines),
        Command::Mux { stems, subtitle, meta, out, encoder_bin, cache_dir, config } => {
            let engine_config = resolve_engine_config(cache_dir, encoder_bin, config.as_deref());
            mux(stems, subtitle, meta, out, engine_config).await
        }
    }
}

/// Resolves [`EngineConfig`] with the CLI-flag/env-var tiers already
/// collapsed by clap's `env` attribute on each `Mux` field; only the TOML
/// tier beneath that and the compiled default remain to be layered in here.
fn resolve_engine_config(
    cache_dir: Option<PathBuf>,
    encoder_bin: Option<PathBuf>,
    config_path: Option<&std::path::Path>,
) -> EngineConfig {
    let default_config_path = dirs::config_dir().map(|d| d.join("stems-karaoke").join("config.toml"));
    let toml_path = config_path.map(PathBuf::from).or(default_config_path);
    let toml_overrides = toml_path
        .as_deref()
        .and_then(stems_core::config::load_toml_overrides);
    let (toml_cache_dir, toml_encoder_bin) = toml_overrides.unwrap_or((None, None));

    EngineConfig::with_overrides(
        cache_dir.or(toml_cache_dir),
        encoder_bin.or(toml_encoder_bin),
    )
}

fn inspect(path: &PathBuf) -> Result<()> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let top_level = stems_core::boxtree::parse(&bytes, stems_core::boxtree::ParseOptions::default())
        .context("parsing box tree")?;
    for node in &top_level {
        print_box(node, 0);
    }

    let song = stems_core::load(path)?;
    println!();
    println!("profile: {}", song.audio.profile.as_str());
    println!("sources: {}", song.audio.sources.len());
    println!("singers: {}", song.singers.len());
    println!("lines: {}", song.lines.len());
    Ok(())
}

fn print_box(node: &stems_core::boxtree::BoxNode, depth: usize) {
    println!(
        "{}{} offset={} size={}",
        "  ".repeat(depth),
        node.type_str(),
        node.offset,
        node.total_size
    );
    for child in node.children() {
        print_box(child, depth + 1);
    }
}

fn load(path: &PathBuf) -> Result<()> {
    let song = stems_core::load(path)?;
    println!("{}", serde_json::to_string_pretty(&song.to_kaid())?);
    Ok(())
}

fn save(path: &PathBuf, lines_path: &PathBuf) -> Result<()> {
    let mut song = stems_core::load(path)?;
    let lines_json = std::fs::read_to_string(lines_path)
        .with_context(|| format!("reading {}", lines_path.display()))?;
    song.lines = serde_json::from_str(&lines_json).context("parsing --lines JSON")?;
    stems_core::save(&song, path)?;
    info!(path = %path.display(), "saved");
    Ok(())
}

async fn mux(
    stems: Vec<StemInput>,
    subtitle: PathBuf,
    meta: Vec<(String, String)>,
    out: PathBuf,
    config: EngineConfig,
) -> Result<()> {
    let meta: BTreeMap<String, String> = meta.into_iter().collect();
    let encoder_bin = config.encoder_bin.clone();
    let request = MuxRequest { stems, subtitle, meta, out, encoder_bin, config };
    muxer::run_mux_blocking(request).await?;
    Ok(())
}
