//! Configuration resolution for the stem-karaoke engine
//!
//! No global state is required by this engine: every façade call takes
//! an explicit [`EngineConfig`] rather than reading from a process-wide
//! singleton.

use std::path::{Path, PathBuf};

/// Explicit context threaded through [`crate::save`] and [`crate::muxer`]
/// style call sites (the muxer itself lives in the `stems-mux` binary
/// crate, which constructs this the same way).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Scratch root; each save/mux uses `<cache_dir>/tmp/<uuid>/`
    pub cache_dir: PathBuf,
    /// Path to the external audio encoder binary
    pub encoder_bin: PathBuf,
}

impl EngineConfig {
    /// Resolve from environment, falling back to documented defaults.
    ///
    /// Priority: `KAI_CACHE_DIR` / `KAI_ENCODER_BIN` env vars, else an
    /// OS-appropriate default cache directory and a bare `kai-encoder` on
    /// `PATH`.
    pub fn from_env() -> Self {
        Self {
            cache_dir: resolve_cache_dir(std::env::var("KAI_CACHE_DIR").ok()),
            encoder_bin: resolve_encoder_bin(std::env::var("KAI_ENCODER_BIN").ok()),
        }
    }

    /// Build a config with explicit overrides, falling back to the same
    /// defaults as [`Self::from_env`] for anything left `None`.
    pub fn with_overrides(cache_dir: Option<PathBuf>, encoder_bin: Option<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.unwrap_or_else(|| resolve_cache_dir(None)),
            encoder_bin: encoder_bin.unwrap_or_else(|| resolve_encoder_bin(None)),
        }
    }

    /// Scratch directory for one save/mux operation.
    pub fn scratch_dir(&self, operation_id: &str) -> PathBuf {
        self.cache_dir.join("tmp").join(operation_id)
    }
}

fn resolve_cache_dir(env_value: Option<String>) -> PathBuf {
    if let Some(path) = env_value {
        return PathBuf::from(path);
    }
    default_cache_dir()
}

fn resolve_encoder_bin(env_value: Option<String>) -> PathBuf {
    if let Some(path) = env_value {
        return PathBuf::from(path);
    }
    PathBuf::from("kai-encoder")
}

/// OS-dependent default cache root, following the same per-platform
/// resolution shape used elsewhere in this codebase family.
fn default_cache_dir() -> PathBuf {
    if cfg!(target_os = "linux") {
        dirs::cache_dir()
            .map(|d| d.join("stems-karaoke"))
            .unwrap_or_else(|| PathBuf::from("/var/tmp/stems-karaoke"))
    } else if cfg!(target_os = "macos") {
        dirs::cache_dir()
            .map(|d| d.join("stems-karaoke"))
            .unwrap_or_else(|| PathBuf::from("/tmp/stems-karaoke"))
    } else if cfg!(target_os = "windows") {
        dirs::cache_dir()
            .map(|d| d.join("stems-karaoke"))
            .unwrap_or_else(|| PathBuf::from("C:\\Temp\\stems-karaoke"))
    } else {
        PathBuf::from("./stems-karaoke-cache")
    }
}

/// Load a `[engine]` table from a TOML config file, if present, as a
/// lower-priority source beneath env vars and explicit overrides. Silent on
/// a missing file; returns `None` for any key the file doesn't set.
pub fn load_toml_overrides(path: &Path) -> Option<(Option<PathBuf>, Option<PathBuf>)> {
    let contents = std::fs::read_to_string(path).ok()?;
    let value: toml::Value = toml::from_str(&contents).ok()?;
    let engine = value.get("engine")?;
    let cache_dir = engine
        .get("cache_dir")
        .and_then(|v| v.as_str())
        .map(PathBuf::from);
    let encoder_bin = engine
        .get("encoder_bin")
        .and_then(|v| v.as_str())
        .map(PathBuf::from);
    Some((cache_dir, encoder_bin))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_override_wins_over_default() {
        let cfg = EngineConfig::with_overrides(Some(PathBuf::from("/tmp/x")), None);
        assert_eq!(cfg.cache_dir, PathBuf::from("/tmp/x"));
    }

    #[test]
    fn scratch_dir_is_nested_under_cache_dir() {
        let cfg = EngineConfig::with_overrides(Some(PathBuf::from("/tmp/x")), None);
        assert_eq!(cfg.scratch_dir("abc"), PathBuf::from("/tmp/x/tmp/abc"));
    }
}
