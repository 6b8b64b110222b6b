//! C4: iTunes-style `----` freeform metadata atom codec, and the standard
//! iTunes tag atoms (`©nam`, `trkn`, `covr`, ...) that ride alongside them
//! in `moov/udta/meta/ilst`.

use crate::boxtree::{string_to_fourcc, BoxNode, BoxPayload};
use crate::error::{Error, Result};

/// One `----` freeform metadata item: `mean`/`name`/`data` triad.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreeformItem {
    pub namespace: String,
    pub name: String,
    pub type_code: u32,
    pub locale: u32,
    pub value: Vec<u8>,
}

impl FreeformItem {
    pub fn utf8(namespace: &str, name: &str, text: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
            type_code: 1,
            locale: 0,
            value: text.as_bytes().to_vec(),
        }
    }

    pub fn binary(namespace: &str, name: &str, value: Vec<u8>) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
            type_code: 0,
            locale: 0,
            value,
        }
    }

    pub fn identity(&self) -> (String, String) {
        (self.namespace.clone(), self.name.clone())
    }

    pub fn as_utf8(&self) -> Result<&str> {
        if self.type_code != 1 {
            return Err(Error::MalformedBox {
                at: 0,
                reason: format!(
                    "freeform item {}:{} is not UTF-8 (type_code={})",
                    self.namespace, self.name, self.type_code
                ),
            });
        }
        std::str::from_utf8(&self.value).map_err(|e| Error::MalformedBox {
            at: 0,
            reason: format!("freeform item {}:{} is not valid UTF-8: {e}", self.namespace, self.name),
        })
    }

    /// Build the `----` box tree for this item.
    pub fn encode(&self) -> BoxNode {
        let mean_data = {
            let mut v = vec![0u8; 4];
            v.extend_from_slice(self.namespace.as_bytes());
            v
        };
        let name_data = {
            let mut v = vec![0u8; 4];
            v.extend_from_slice(self.name.as_bytes());
            v
        };
        let data_data = {
            let mut v = Vec::with_capacity(8 + self.value.len());
            v.extend_from_slice(&self.type_code.to_be_bytes());
            v.extend_from_slice(&self.locale.to_be_bytes());
            v.extend_from_slice(&self.value);
            v
        };

        let leaf = |type_str: &str, data: Vec<u8>| BoxNode {
            box_type: string_to_fourcc(type_str),
            offset: 0,
            total_size: 0,
            header_size: 8,
            payload: BoxPayload::Leaf(data),
        };

        BoxNode {
            box_type: string_to_fourcc("----"),
            offset: 0,
            total_size: 0,
            header_size: 8,
            payload: BoxPayload::Container {
                preamble: Vec::new(),
                children: vec![
                    leaf("mean", mean_data),
                    leaf("name", name_data),
                    leaf("data", data_data),
                ],
            },
        }
    }

    /// Parse a `----` box back into a `FreeformItem`. Returns `None` if
    /// the box is missing any of the three required children or they're
    /// malformed — callers (the `ilst` decoder) drop and skip such items
    /// rather than aborting the whole load.
    pub fn decode(node: &BoxNode) -> Option<Self> {
        if node.type_str() != "----" {
            return None;
        }
        let mean = node.find_child("mean")?.leaf_data()?;
        let name = node.find_child("name")?.leaf_data()?;
        let data = node.find_child("data")?.leaf_data()?;

        if mean.len() < 4 || name.len() < 4 || data.len() < 8 {
            return None;
        }
        let namespace = std::str::from_utf8(&mean[4..]).ok()?.to_string();
        let item_name = std::str::from_utf8(&name[4..]).ok()?.to_string();
        let type_code = u32::from_be_bytes(data[0..4].try_into().ok()?);
        let locale = u32::from_be_bytes(data[4..8].try_into().ok()?);
        let value = data[8..].to_vec();

        Some(Self {
            namespace,
            name: item_name,
            type_code,
            locale,
            value,
        })
    }
}

/// Decode the `type_code`/`data` payload of a standard iTunes `data` atom
/// (0=implicit, 1=UTF-8, 2=UTF-16BE, 13=JPEG, 14=PNG, 21=signed int,
/// 22=unsigned int), used for `©nam`/`©ART`/`©alb`/`©day`/`©gen`/`covr`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItunesValue {
    Text(String),
    Jpeg(Vec<u8>),
    Png(Vec<u8>),
    SignedInt(i64),
    UnsignedInt(u64),
    TrackNumber { track: u16, total: u16 },
    Binary(Vec<u8>),
}

/// Encode a `data` atom's 8-byte header + payload for a given iTunes value.
pub fn encode_itunes_data(value: &ItunesValue) -> Vec<u8> {
    let (type_code, payload): (u32, Vec<u8>) = match value {
        ItunesValue::Text(s) => (1, s.as_bytes().to_vec()),
        ItunesValue::Jpeg(bytes) => (13, bytes.clone()),
        ItunesValue::Png(bytes) => (14, bytes.clone()),
        ItunesValue::SignedInt(n) => (21, n.to_be_bytes().to_vec()),
        ItunesValue::UnsignedInt(n) => (22, n.to_be_bytes().to_vec()),
        ItunesValue::TrackNumber { track, total } => {
            let mut v = vec![0u8, 0u8];
            v.extend_from_slice(&track.to_be_bytes());
            v.extend_from_slice(&total.to_be_bytes());
            v.extend_from_slice(&[0u8, 0u8]);
            (0, v)
        }
        ItunesValue::Binary(bytes) => (0, bytes.clone()),
    };
    let mut out = Vec::with_capacity(8 + payload.len());
    out.extend_from_slice(&type_code.to_be_bytes());
    out.extend_from_slice(&[0u8; 4]);
    out.extend_from_slice(&payload);
    out
}

/// Decode a `data` atom's raw bytes (including its 8-byte header) for a
/// given parent tag type, which disambiguates `trkn`'s packed-integer
/// layout from a generic implicit-type atom.
pub fn decode_itunes_data(parent_type: &str, data: &[u8]) -> Option<ItunesValue> {
    if data.len() < 8 {
        return None;
    }
    let type_code = u32::from_be_bytes(data[0..4].try_into().ok()?);
    let payload = &data[8..];

    if parent_type == "trkn" || parent_type == "disk" {
        if payload.len() >= 6 {
            let track = u16::from_be_bytes(payload[2..4].try_into().ok()?);
            let total = u16::from_be_bytes(payload[4..6].try_into().ok()?);
            return Some(ItunesValue::TrackNumber { track, total });
        }
        return Some(ItunesValue::Binary(payload.to_vec()));
    }

    match type_code {
        1 => Some(ItunesValue::Text(std::str::from_utf8(payload).ok()?.to_string())),
        2 => {
            let units: Vec<u16> = payload
                .chunks_exact(2)
                .map(|c| u16::from_be_bytes([c[0], c[1]]))
                .collect();
            Some(ItunesValue::Text(String::from_utf16(&units).ok()?))
        }
        13 => Some(ItunesValue::Jpeg(payload.to_vec())),
        14 => Some(ItunesValue::Png(payload.to_vec())),
        21 => {
            let mut buf = [0u8; 8];
            let n = payload.len().min(8);
            buf[8 - n..].copy_from_slice(&payload[..n]);
            Some(ItunesValue::SignedInt(i64::from_be_bytes(buf)))
        }
        22 => {
            let mut buf = [0u8; 8];
            let n = payload.len().min(8);
            buf[8 - n..].copy_from_slice(&payload[..n]);
            Some(ItunesValue::UnsignedInt(u64::from_be_bytes(buf)))
        }
        0 => Some(ItunesValue::Binary(payload.to_vec())),
        _ => Some(ItunesValue::Binary(payload.to_vec())),
    }
}

/// Build a standard iTunes tag atom (e.g. `©nam`) wrapping one `data` child.
pub fn encode_itunes_atom(tag: &str, value: &ItunesValue) -> BoxNode {
    let data = encode_itunes_data(value);
    BoxNode {
        box_type: string_to_fourcc(tag),
        offset: 0,
        total_size: 0,
        header_size: 8,
        payload: BoxPayload::Container {
            preamble: Vec::new(),
            children: vec![BoxNode {
                box_type: string_to_fourcc("data"),
                offset: 0,
                total_size: 0,
                header_size: 8,
                payload: BoxPayload::Leaf(data),
            }],
        },
    }
}

/// Replace (by identity) or append a freeform item inside an `ilst` box.
pub fn upsert_freeform(ilst: &mut BoxNode, item: FreeformItem) {
    let identity = item.identity();
    let children = ilst.children_mut();
    if let Some(existing) = children.iter_mut().find(|c| {
        c.type_str() == "----"
            && FreeformItem::decode(c).map(|d| d.identity()) == Some(identity.clone())
    }) {
        *existing = item.encode();
        return;
    }
    children.push(item.encode());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn freeform_round_trips_through_encode_decode() {
        let item = FreeformItem::utf8("com.stems", "kaid", "{}");
        let node = item.encode();
        let decoded = FreeformItem::decode(&node).unwrap();
        assert_eq!(decoded, item);
    }

    #[test]
    fn freeform_binary_preserves_unknown_pairs() {
        let item = FreeformItem::binary("com.example", "custom", vec![1, 2, 3, 4]);
        let node = item.encode();
        let decoded = FreeformItem::decode(&node).unwrap();
        assert_eq!(decoded, item);
    }

    #[test]
    fn trkn_decodes_packed_track_total() {
        let mut data = vec![0u8, 0, 0, 0]; // type_code = 0 (implicit)
        data.extend_from_slice(&[0, 0]);
        data.extend_from_slice(&3u16.to_be_bytes());
        data.extend_from_slice(&12u16.to_be_bytes());
        data.extend_from_slice(&[0, 0]);
        let value = decode_itunes_data("trkn", &data).unwrap();
        assert_eq!(value, ItunesValue::TrackNumber { track: 3, total: 12 });
    }

    #[test]
    fn text_tag_round_trips() {
        let value = ItunesValue::Text("Midnight City".to_string());
        let node = encode_itunes_atom("\u{00a9}nam", &value);
        let data_node = node.find_child("data").unwrap();
        let decoded = decode_itunes_data("\u{00a9}nam", data_node.leaf_data().unwrap()).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn upsert_replaces_existing_identity() {
        let mut ilst = BoxNode {
            box_type: string_to_fourcc("ilst"),
            offset: 0,
            total_size: 0,
            header_size: 8,
            payload: BoxPayload::Container {
                preamble: Vec::new(),
                children: vec![FreeformItem::utf8("com.stems", "kaid", "old").encode()],
            },
        };
        upsert_freeform(&mut ilst, FreeformItem::utf8("com.stems", "kaid", "new"));
        assert_eq!(ilst.children().len(), 1);
        let decoded = FreeformItem::decode(&ilst.children()[0]).unwrap();
        assert_eq!(decoded.value, b"new".to_vec());
    }
}
