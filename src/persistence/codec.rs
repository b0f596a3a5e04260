//! Snapshot encodings.
//!
//! Two forms share one wire tree. The text form is JSON and is what
//! collaborators embed in their own save data. The binary frame is what
//! [`FileHolder`](super::FileHolder) writes to disk:
//!
//! ```text
//! magic "DPS\0" | version u8 | body length u32 LE | MessagePack body | CRC32 u32 LE
//! ```

use crate::error::{DepotError, Result};
use crate::ledger::LedgerSnapshot;
use crate::records::Record;
use crate::types::{NamespaceId, Version};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Magic bytes opening a binary snapshot frame.
pub const FRAME_MAGIC: &[u8; 4] = b"DPS\0";

/// Current binary frame format version.
pub const FRAME_VERSION: u8 = 1;

const HEADER_LEN: usize = 4 + 1 + 4;
const TRAILER_LEN: usize = 4;

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotDoc {
    id: String,
    version: u64,
    #[serde(default)]
    records: Vec<RecordNode>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RecordNode {
    id: String,
    condition: f32,
    quality: i32,
    stack: u32,
    #[serde(default)]
    flags: Vec<bool>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    slots: Vec<i32>,
    #[serde(default)]
    children: Vec<RecordNode>,
}

impl From<&Record> for RecordNode {
    fn from(record: &Record) -> Self {
        Self {
            id: record.identifier.clone(),
            condition: record.condition,
            quality: record.quality,
            stack: record.stack_size(),
            flags: record.stolen_flags().to_vec(),
            tags: record.origin_tags().to_vec(),
            slots: record.slot_hints().to_vec(),
            children: record.contained.iter().map(RecordNode::from).collect(),
        }
    }
}

impl RecordNode {
    /// Rebuild a record from its per-unit lists. The `stack` attribute is
    /// only checked against them, never used to size anything.
    fn into_record(self) -> Result<Record> {
        let children = self
            .children
            .into_iter()
            .map(RecordNode::into_record)
            .collect::<Result<Vec<_>>>()?;

        if self.stack == 0 {
            return Err(DepotError::Decode(format!("record {:?} has an empty stack", self.id)));
        }
        let units = self.flags.len();
        if units != self.stack as usize {
            return Err(DepotError::Decode(format!(
                "record {:?} claims {} units but lists {}",
                self.id, self.stack, units
            )));
        }

        let identifier = self.id;
        Record::from_parts(
            identifier.clone(),
            self.condition,
            self.quality,
            self.flags,
            self.tags,
            self.slots,
            children,
        )
        .ok_or_else(|| {
            DepotError::Decode(format!("record {:?} has misaligned unit lists", identifier))
        })
    }
}

impl SnapshotDoc {
    fn from_snapshot(snapshot: &LedgerSnapshot) -> Self {
        Self {
            id: snapshot.namespace.as_str().to_string(),
            version: snapshot.version.0,
            records: snapshot.records.iter().map(RecordNode::from).collect(),
        }
    }

    fn into_snapshot(self, fallback: &NamespaceId) -> Result<LedgerSnapshot> {
        let namespace = if self.id.trim().is_empty() {
            fallback.clone()
        } else {
            NamespaceId::new(&self.id)
        };
        Ok(LedgerSnapshot {
            namespace,
            version: Version(self.version),
            records: self
                .records
                .into_iter()
                .map(RecordNode::into_record)
                .collect::<Result<Vec<_>>>()?,
        })
    }
}

// --- Text form ---

/// Encode a snapshot as JSON text.
pub fn encode_snapshot(snapshot: &LedgerSnapshot) -> Result<String> {
    Ok(serde_json::to_string(&SnapshotDoc::from_snapshot(snapshot))?)
}

/// Decode JSON text. Never fails: malformed input yields an empty snapshot
/// for `namespace`.
pub fn decode_snapshot(text: &str, namespace: &NamespaceId) -> LedgerSnapshot {
    let decoded = serde_json::from_str::<SnapshotDoc>(text)
        .map_err(DepotError::from)
        .and_then(|doc| doc.into_snapshot(namespace));
    match decoded {
        Ok(snapshot) => snapshot,
        Err(e) => {
            warn!(namespace = %namespace, error = %e, "undecodable snapshot, starting empty");
            LedgerSnapshot::empty(namespace.clone())
        }
    }
}

// --- Binary frame ---

/// Encode a snapshot into a checksummed binary frame.
pub fn encode_frame(snapshot: &LedgerSnapshot) -> Result<Vec<u8>> {
    let body = rmp_serde::to_vec_named(&SnapshotDoc::from_snapshot(snapshot))?;
    let len = u32::try_from(body.len())
        .map_err(|_| DepotError::Serialization("snapshot body exceeds 4 GiB".into()))?;

    let mut frame = Vec::with_capacity(HEADER_LEN + body.len() + TRAILER_LEN);
    frame.extend_from_slice(FRAME_MAGIC);
    frame.push(FRAME_VERSION);
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(&body);
    frame.extend_from_slice(&crc32fast::hash(&body).to_le_bytes());
    Ok(frame)
}

/// Decode a binary frame, verifying header and checksum.
pub fn decode_frame(bytes: &[u8], namespace: &NamespaceId) -> Result<LedgerSnapshot> {
    if bytes.len() < HEADER_LEN + TRAILER_LEN {
        return Err(DepotError::Decode(format!("frame too short: {} bytes", bytes.len())));
    }
    if &bytes[0..4] != FRAME_MAGIC {
        return Err(DepotError::Decode("invalid frame magic".into()));
    }
    if bytes[4] != FRAME_VERSION {
        return Err(DepotError::Decode(format!(
            "unsupported frame version: {}",
            bytes[4]
        )));
    }

    let len = u32::from_le_bytes([bytes[5], bytes[6], bytes[7], bytes[8]]) as usize;
    if bytes.len() != HEADER_LEN + len + TRAILER_LEN {
        return Err(DepotError::Decode(format!(
            "frame length mismatch: header says {} body bytes, found {}",
            len,
            bytes.len().saturating_sub(HEADER_LEN + TRAILER_LEN)
        )));
    }

    let body = &bytes[HEADER_LEN..HEADER_LEN + len];
    let trailer = &bytes[HEADER_LEN + len..];
    let expected = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
    let got = crc32fast::hash(body);
    if expected != got {
        return Err(DepotError::ChecksumMismatch { expected, got });
    }

    let doc: SnapshotDoc = rmp_serde::from_slice(body)?;
    doc.into_snapshot(namespace)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::UnitMeta;

    fn ns() -> NamespaceId {
        NamespaceId::new("vault")
    }

    fn sample() -> LedgerSnapshot {
        let bag = Record::new("bag", 1).with_children(vec![Record::new("nail", 4).with_condition(80.0)]);
        let bar = Record::new("bar", 2).with_quality(3).with_units(vec![
            UnitMeta::new(true, "raid", 4),
            UnitMeta::new(false, "", -1),
        ]);
        LedgerSnapshot {
            namespace: ns(),
            version: Version(7),
            records: vec![bar, bag],
        }
    }

    #[test]
    fn test_json_shape() {
        let text = encode_snapshot(&sample()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();

        assert_eq!(value["id"], "vault");
        assert_eq!(value["version"], 7);
        let bar = &value["records"][0];
        assert_eq!(bar["id"], "bar");
        assert_eq!(bar["stack"], 2);
        assert_eq!(bar["flags"], serde_json::json!([true, false]));
        assert_eq!(bar["tags"], serde_json::json!(["raid", ""]));
        assert_eq!(bar["slots"], serde_json::json!([4, -1]));
        assert_eq!(value["records"][1]["children"][0]["id"], "nail");
    }

    #[test]
    fn test_json_decode_restores_tree() {
        let snapshot = sample();
        let decoded = decode_snapshot(&encode_snapshot(&snapshot).unwrap(), &ns());
        assert_eq!(decoded, snapshot);
    }

    #[test]
    fn test_malformed_text_falls_back_to_empty() {
        let fallback = NamespaceId::new("Garage");
        for text in ["", "not json", "{\"id\":\"x\"}", "[1,2,3]"] {
            let decoded = decode_snapshot(text, &fallback);
            assert_eq!(decoded, LedgerSnapshot::empty(fallback.clone()), "input {:?}", text);
        }
    }

    #[test]
    fn test_blank_document_id_uses_fallback() {
        let text = r#"{"id":"  ","version":2,"records":[]}"#;
        let decoded = decode_snapshot(text, &ns());
        assert_eq!(decoded.namespace, ns());
        assert_eq!(decoded.version, Version(2));
    }

    #[test]
    fn test_misaligned_units_fall_back_to_empty() {
        let text = r#"{"id":"vault","version":1,"records":[
            {"id":"bar","condition":100.0,"quality":0,"stack":3,"flags":[true],"tags":[],"slots":[]}
        ]}"#;
        assert_eq!(decode_snapshot(text, &ns()), LedgerSnapshot::empty(ns()));
    }

    #[test]
    fn test_huge_claimed_stack_without_units_is_rejected() {
        let text = r#"{"id":"vault","version":1,"records":[
            {"id":"bar","condition":100.0,"quality":0,"stack":2147483647}
        ]}"#;
        let decoded = decode_snapshot(text, &ns());
        assert!(decoded.records.is_empty());
        assert_eq!(decoded.item_count(), 0);
    }

    #[test]
    fn test_zero_stack_is_rejected() {
        let text = r#"{"id":"vault","version":1,"records":[
            {"id":"bar","condition":100.0,"quality":0,"stack":0}
        ]}"#;
        assert_eq!(decode_snapshot(text, &ns()).item_count(), 0);

        let nested = r#"{"id":"vault","version":1,"records":[
            {"id":"bag","condition":100.0,"quality":0,"stack":1,
             "flags":[false],"tags":[""],"slots":[0],
             "children":[{"id":"nail","condition":100.0,"quality":0,"stack":0}]}
        ]}"#;
        assert_eq!(decode_snapshot(nested, &ns()).item_count(), 0);
    }

    #[test]
    fn test_misaligned_frame_body_is_a_decode_error() {
        let doc = SnapshotDoc {
            id: "vault".into(),
            version: 2,
            records: vec![RecordNode {
                id: "bar".into(),
                condition: 100.0,
                quality: 0,
                stack: u32::MAX,
                flags: Vec::new(),
                tags: Vec::new(),
                slots: Vec::new(),
                children: Vec::new(),
            }],
        };
        let body = rmp_serde::to_vec_named(&doc).unwrap();
        let mut frame = Vec::new();
        frame.extend_from_slice(FRAME_MAGIC);
        frame.push(FRAME_VERSION);
        frame.extend_from_slice(&(body.len() as u32).to_le_bytes());
        frame.extend_from_slice(&body);
        frame.extend_from_slice(&crc32fast::hash(&body).to_le_bytes());

        assert!(matches!(decode_frame(&frame, &ns()), Err(DepotError::Decode(_))));
    }

    #[test]
    fn test_frame_layout_and_decode() {
        let snapshot = sample();
        let frame = encode_frame(&snapshot).unwrap();

        assert_eq!(&frame[0..4], FRAME_MAGIC);
        assert_eq!(frame[4], FRAME_VERSION);
        let len = u32::from_le_bytes([frame[5], frame[6], frame[7], frame[8]]) as usize;
        assert_eq!(frame.len(), HEADER_LEN + len + TRAILER_LEN);

        assert_eq!(decode_frame(&frame, &ns()).unwrap(), snapshot);
    }

    #[test]
    fn test_frame_rejects_corruption() {
        let frame = encode_frame(&sample()).unwrap();

        let mut flipped = frame.clone();
        flipped[HEADER_LEN + 2] ^= 0xFF;
        assert!(matches!(
            decode_frame(&flipped, &ns()),
            Err(DepotError::ChecksumMismatch { .. })
        ));

        let mut bad_magic = frame.clone();
        bad_magic[0] = b'X';
        assert!(matches!(decode_frame(&bad_magic, &ns()), Err(DepotError::Decode(_))));

        let truncated = &frame[..frame.len() - 1];
        assert!(matches!(decode_frame(truncated, &ns()), Err(DepotError::Decode(_))));

        assert!(matches!(decode_frame(b"DPS", &ns()), Err(DepotError::Decode(_))));
    }
}
