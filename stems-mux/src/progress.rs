//! C15: typed progress events broadcast out of a running mux.
//!
//! The external encoder speaks a line-oriented protocol on stdout
//! (`PROGRESS:{json}` / `RESULT:{json}`, everything else is free-form log
//! chatter). This module turns that into a `tokio::sync::broadcast` stream
//! so an embedding application can forward it (to an SSE endpoint, a TUI
//! progress bar, whatever) without linking against any particular web
//! framework.

use serde::{Deserialize, Serialize};

/// One `PROGRESS:` line from the encoder, decoded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub stage: String,
    pub percent: f32,
    #[serde(default)]
    pub message: Option<String>,
}

/// Terminal state of a mux, derived from the encoder's `RESULT:` line (or
/// its absence).
#[derive(Debug, Clone)]
pub enum MuxOutcome {
    Succeeded,
    Failed { stderr: String },
}

/// Raw shape of the encoder's `RESULT:{json}` line.
#[derive(Debug, Deserialize)]
pub(crate) struct EncoderResult {
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
}

/// Capacity of the broadcast channel handed back from [`crate::muxer::run_mux`].
///
/// Sized generously relative to how often an encoder is expected to emit
/// progress lines; a slow subscriber lags rather than blocking the mux.
pub const CHANNEL_CAPACITY: usize = 256;
