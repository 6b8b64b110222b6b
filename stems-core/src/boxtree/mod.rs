//! ISO BMFF box-tree parsing, serialization, and chunk-offset fixup.

mod containers;
mod offsets;
mod parser;
mod samples;
mod writer;

pub use containers::is_container_type;
pub use offsets::{rewrite_chunk_offsets, OffsetRewrite};
pub use parser::{parse, ParseOptions};
pub use samples::{read_chunk_offsets, sample_ranges, track_duration_sec, SampleRange};
pub use writer::serialize;

/// One node of the parsed box tree.
///
/// `total_size` is the size as read from (or to be written to) the file,
/// including the header. For a container, it is kept in sync with its
/// children only at serialize time — while a tree is being mutated in
/// memory the stored value may be stale and must not be trusted.
#[derive(Debug, Clone)]
pub struct BoxNode {
    pub box_type: [u8; 4],
    pub offset: u64,
    pub total_size: u64,
    pub header_size: u8,
    pub payload: BoxPayload,
}

/// Either a node's children (container) or its raw bytes (leaf).
#[derive(Debug, Clone)]
pub enum BoxPayload {
    Container {
        /// Bytes preceding the first child, e.g. `meta`'s 4-byte version/flags.
        preamble: Vec<u8>,
        children: Vec<BoxNode>,
    },
    Leaf(Vec<u8>),
}

impl BoxNode {
    pub fn type_str(&self) -> String {
        fourcc_to_string(&self.box_type)
    }

    pub fn is_container(&self) -> bool {
        matches!(self.payload, BoxPayload::Container { .. })
    }

    pub fn children(&self) -> &[BoxNode] {
        match &self.payload {
            BoxPayload::Container { children, .. } => children,
            BoxPayload::Leaf(_) => &[],
        }
    }

    pub fn children_mut(&mut self) -> &mut Vec<BoxNode> {
        match &mut self.payload {
            BoxPayload::Container { children, .. } => children,
            BoxPayload::Leaf(_) => panic!("children_mut called on a leaf box"),
        }
    }

    pub fn find_child(&self, box_type: &str) -> Option<&BoxNode> {
        self.children().iter().find(|c| c.type_str() == box_type)
    }

    pub fn find_child_mut(&mut self, box_type: &str) -> Option<&mut BoxNode> {
        self.children_mut().iter_mut().find(|c| c.type_str() == box_type)
    }

    /// Descend a `/`-separated path of box types, e.g. `"udta/meta/ilst"`.
    pub fn find_path(&self, path: &str) -> Option<&BoxNode> {
        let mut node = self;
        for segment in path.split('/') {
            node = node.find_child(segment)?;
        }
        Some(node)
    }

    pub fn leaf_data(&self) -> Option<&[u8]> {
        match &self.payload {
            BoxPayload::Leaf(data) => Some(data),
            BoxPayload::Container { .. } => None,
        }
    }

    /// Recompute `total_size` bottom-up from children/leaf bytes, choosing
    /// 64-bit headers only where the 32-bit field would overflow.
    pub fn recompute_sizes(&mut self) {
        match &mut self.payload {
            BoxPayload::Container { preamble, children } => {
                for child in children.iter_mut() {
                    child.recompute_sizes();
                }
                let children_size: u64 = children.iter().map(|c| c.total_size).sum();
                let content_size = preamble.len() as u64 + children_size;
                let header_size = if content_size + 8 > u32::MAX as u64 { 16 } else { 8 };
                self.header_size = header_size;
                self.total_size = header_size as u64 + content_size;
            }
            BoxPayload::Leaf(data) => {
                let content_size = data.len() as u64;
                let header_size = if content_size + 8 > u32::MAX as u64 { 16 } else { 8 };
                self.header_size = header_size;
                self.total_size = header_size as u64 + content_size;
            }
        }
    }
}

pub fn fourcc_to_string(bytes: &[u8; 4]) -> String {
    bytes
        .iter()
        .map(|&b| if b == 0xA9 { '©' } else { b as char })
        .collect()
}

pub fn string_to_fourcc(s: &str) -> [u8; 4] {
    let mut out = [b' '; 4];
    let chars: Vec<char> = s.chars().collect();
    debug_assert!(chars.len() == 4, "fourcc must be exactly 4 characters: {s:?}");
    for (i, &c) in chars.iter().enumerate().take(4) {
        out[i] = if c == '©' { 0xA9 } else { c as u8 };
    }
    out
}
