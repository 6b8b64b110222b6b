//! Error taxonomy for the stem-karaoke engine

use thiserror::Error;

/// Result type used throughout `stems-core`
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced at the loader/writer façade boundary
///
/// Every variant carries enough context to rebuild a human-readable
/// message without the caller re-deriving it from a bare string.
#[derive(Error, Debug)]
pub enum Error {
    /// A box declared a size that runs past the bounds of its parent range
    #[error("malformed box at offset {at}: {reason}")]
    MalformedBox { at: u64, reason: String },

    /// Fewer than 8 bytes remained where a box header was expected
    #[error("truncated box header at offset {at}")]
    TruncatedBox { at: u64 },

    /// Strict-mode parse encountered a container-looking box it does not recognize
    #[error("unknown container box '{fourcc}' at offset {at}")]
    UnknownContainer { at: u64, fourcc: String },

    /// File extension is not one this loader knows how to open
    #[error("unsupported file format: .{extension}")]
    UnsupportedFormat { extension: String },

    /// A `.stem.m4a` file has no `kaid` freeform item
    #[error("missing karaoke payload (no kaid atom)")]
    MissingKaraokePayload,

    /// Two lines for the same singer overlap in time
    #[error("lines {} and {} for singer '{singer_id}' overlap", indices.0, indices.1)]
    OverlappingLines {
        singer_id: String,
        indices: (usize, usize),
    },

    /// A line's timing is not monotone relative to the previous line for that singer
    #[error("line {index} for singer '{singer_id}' is not monotone with its predecessor")]
    NonMonotonicTiming { singer_id: String, index: usize },

    /// A line or word timestamp lies beyond the track duration
    #[error("timestamp in line {index} lies beyond track duration")]
    TimestampBeyondDuration { index: usize },

    /// A word's timing falls outside its containing line
    #[error("word {word_index} of line {line_index} lies outside the line's span")]
    WordOutOfLine {
        line_index: usize,
        word_index: usize,
    },

    /// A chunk offset did not point at the expected chunk after a save
    #[error("chunk offset mismatch in track {track}, chunk {chunk_index}")]
    ChunkOffsetMismatch { track: u32, chunk_index: u32 },

    /// A rebuilt subtitle sample offset would not fit in `stco`'s 32-bit field
    #[error("subtitle sample offset {offset} exceeds the 32-bit stco range")]
    SubtitleOffsetOverflow { offset: u64 },

    /// Post-write validation (C11) failed
    #[error("post-write validation failed: {detail} (restore from .bak {})", if *restored { "succeeded" } else { "FAILED" })]
    PostWriteValidationFailed { detail: String, restored: bool },

    /// The external encoder subprocess exited non-zero or closed without a RESULT line
    #[error("external encoder failed: {stderr}")]
    ExternalEncoderFailed { stderr: String },

    /// A mux was cancelled while the encoder subprocess was running
    #[error("mux cancelled during encode")]
    CancelledDuringEncode,

    /// Underlying I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed or unreadable `.kai` zip archive during legacy migration
    #[error("legacy .kai archive error: {0}")]
    KaiArchive(String),

    /// `kaid` JSON failed to parse or serialize
    #[error("karaoke payload JSON error: {0}")]
    PayloadJson(#[from] serde_json::Error),
}
