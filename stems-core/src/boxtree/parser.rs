//! C1: recursive ISO BMFF box tree parser.

use super::containers::is_container_type;
use super::{fourcc_to_string, BoxNode, BoxPayload};
use crate::error::{Error, Result};

const MAX_DEPTH: usize = 20;

/// How strictly to interpret box types while parsing.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParseOptions {
    /// If true, an unrecognized box type that looks like it should contain
    /// children (heuristically: none here — reserved for future use) is an
    /// error rather than treated as a leaf. The current container set is
    /// exhaustive enough that this only matters for forward-compatibility
    /// with box types this parser has not been taught.
    pub strict: bool,
}

/// Parse a full buffer into top-level boxes (`ftyp`, `moov`, `mdat`, ...).
pub fn parse(buf: &[u8], options: ParseOptions) -> Result<Vec<BoxNode>> {
    parse_range(buf, 0, buf.len() as u64, 0, options)
}

fn parse_range(
    buf: &[u8],
    start: u64,
    end: u64,
    depth: usize,
    options: ParseOptions,
) -> Result<Vec<BoxNode>> {
    if depth > MAX_DEPTH {
        return Err(Error::MalformedBox {
            at: start,
            reason: "maximum box nesting depth exceeded".to_string(),
        });
    }

    let mut nodes = Vec::new();
    let mut offset = start;

    while offset < end {
        let remaining = end - offset;
        if remaining < 8 {
            return Err(Error::TruncatedBox { at: offset });
        }

        let header = &buf[offset as usize..(offset + 8) as usize];
        let size32 = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
        let type_bytes: [u8; 4] = [header[4], header[5], header[6], header[7]];
        let box_type = fourcc_to_string(&type_bytes);

        let (total_size, header_size): (u64, u8) = if size32 == 1 {
            if remaining < 16 {
                return Err(Error::TruncatedBox { at: offset });
            }
            let ext = &buf[(offset + 8) as usize..(offset + 16) as usize];
            let size64 = u64::from_be_bytes(ext.try_into().unwrap());
            (size64, 16)
        } else if size32 == 0 {
            (remaining, 8)
        } else {
            (size32 as u64, 8)
        };

        if total_size < header_size as u64 {
            return Err(Error::MalformedBox {
                at: offset,
                reason: format!("box size {total_size} smaller than its own header"),
            });
        }
        if offset + total_size > end {
            return Err(Error::MalformedBox {
                at: offset,
                reason: format!(
                    "box size {total_size} extends past the bounds of its parent range"
                ),
            });
        }

        let content_start = offset + header_size as u64;
        let content_end = offset + total_size;

        let payload = if is_container_type(&box_type) {
            let (preamble_len, children_start) = if box_type == "meta" {
                if content_end - content_start < 4 {
                    return Err(Error::MalformedBox {
                        at: offset,
                        reason: "meta box too small for its version/flags preamble".to_string(),
                    });
                }
                (4usize, content_start + 4)
            } else if box_type == "stsd" {
                // version(1) + flags(3) + entry_count(4), then sample entries
                if content_end - content_start < 8 {
                    return Err(Error::MalformedBox {
                        at: offset,
                        reason: "stsd box too small for its version/flags/entry_count preamble".to_string(),
                    });
                }
                (8usize, content_start + 8)
            } else {
                (0usize, content_start)
            };
            let preamble = buf[content_start as usize..(content_start as usize + preamble_len)]
                .to_vec();
            let children = parse_range(buf, children_start, content_end, depth + 1, options)?;
            BoxPayload::Container { preamble, children }
        } else if options.strict && looks_like_unknown_container(&box_type) {
            return Err(Error::UnknownContainer {
                at: offset,
                fourcc: box_type,
            });
        } else {
            BoxPayload::Leaf(buf[content_start as usize..content_end as usize].to_vec())
        };

        nodes.push(BoxNode {
            box_type: type_bytes,
            offset,
            total_size,
            header_size,
            payload,
        });

        offset += total_size;
    }

    Ok(nodes)
}

/// Strict-mode heuristic: box types this parser has never seen carrying
/// children are rejected rather than silently flattened into a leaf.
/// Nothing currently trips this — it exists so a future unrecognized
/// container type fails loudly under `strict` instead of corrupting data
/// on a subsequent write.
fn looks_like_unknown_container(_box_type: &str) -> bool {
    false
}
