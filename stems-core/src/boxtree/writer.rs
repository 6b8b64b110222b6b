//! C2: box tree serializer.

use super::{BoxNode, BoxPayload};

/// Serialize a full list of top-level boxes back to bytes.
///
/// Sizes are recomputed bottom-up from the tree shape rather than trusted
/// from `total_size` fields left over from parsing, so callers that mutate
/// a subtree in place don't also have to hand-patch every ancestor's size.
pub fn serialize(nodes: &[BoxNode]) -> Vec<u8> {
    let mut sized: Vec<BoxNode> = nodes.to_vec();
    for node in sized.iter_mut() {
        node.recompute_sizes();
    }
    let total: u64 = sized.iter().map(|n| n.total_size).sum();
    let mut out = Vec::with_capacity(total as usize);
    for node in &sized {
        write_node(node, &mut out);
    }
    out
}

fn write_node(node: &BoxNode, out: &mut Vec<u8>) {
    let use_extended = node.header_size == 16;
    if use_extended {
        out.extend_from_slice(&1u32.to_be_bytes());
        out.extend_from_slice(&node.box_type);
        out.extend_from_slice(&node.total_size.to_be_bytes());
    } else {
        out.extend_from_slice(&(node.total_size as u32).to_be_bytes());
        out.extend_from_slice(&node.box_type);
    }

    match &node.payload {
        BoxPayload::Leaf(data) => out.extend_from_slice(data),
        BoxPayload::Container { preamble, children } => {
            out.extend_from_slice(preamble);
            for child in children {
                write_node(child, out);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boxtree::parser::{parse, ParseOptions};

    #[test]
    fn round_trips_a_simple_leaf_box() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&12u32.to_be_bytes());
        bytes.extend_from_slice(b"free");
        bytes.extend_from_slice(&[0xAA, 0xBB, 0xCC, 0xDD]);

        let parsed = parse(&bytes, ParseOptions::default()).unwrap();
        let out = serialize(&parsed);
        assert_eq!(out, bytes);
    }

    #[test]
    fn round_trips_a_nested_container() {
        let mut inner = Vec::new();
        inner.extend_from_slice(&8u32.to_be_bytes());
        inner.extend_from_slice(b"mvhd");

        let mut moov = Vec::new();
        moov.extend_from_slice(&((8 + inner.len()) as u32).to_be_bytes());
        moov.extend_from_slice(b"moov");
        moov.extend_from_slice(&inner);

        let parsed = parse(&moov, ParseOptions::default()).unwrap();
        let out = serialize(&parsed);
        assert_eq!(out, moov);
    }
}
