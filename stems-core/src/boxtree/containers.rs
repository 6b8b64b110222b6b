//! Box-type classification: which FourCCs hold children vs. raw bytes.

/// True if `box_type` is known to contain child boxes rather than opaque
/// bytes. `meta` is a container too, but its children start 4 bytes into
/// its payload (version + flags) — callers must special-case that offset
/// themselves; this function only answers "does it have children".
pub fn is_container_type(box_type: &str) -> bool {
    if matches!(
        box_type,
        "moov" | "trak" | "edts" | "mdia" | "minf" | "dinf" | "stbl" | "mvex" | "moof" | "traf"
            | "mfra" | "meta" | "udta" | "tref" | "ilst" | "----" | "stsd"
    ) {
        return true;
    }
    // iTunes tag atoms are themselves small containers of a single `data`
    // child (plus, for `----`, `mean`/`name` children).
    box_type.starts_with('©')
        || matches!(
            box_type,
            "trkn" | "disk" | "tmpo" | "covr" | "aART" | "gnre" | "cpil" | "pgap"
        )
}
