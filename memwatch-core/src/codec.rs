//! Text wire format for diff batches.
//!
//! ```text
//! <chain name>\n<8 lowercase hex digits>\n
//! ```
//!
//! Records are concatenated with no batch delimiter.

use std::fmt::Write as _;

use crate::error::CodecError;
use crate::types::{ChainName, DiffBatch, DiffEntry};

/// Prefix on every data push over the duplex transport.
pub const CHANGED_TOKEN: &str = "CHANGED\n";

/// Prefix on every control reply over the duplex transport.
pub const ACK_TOKEN: &str = "ACK\n";

/// Largest payload carried by one datagram.
pub const MAX_DATAGRAM: usize = 64 * 1024;

/// Render `batch` as wire text. An empty batch renders as an empty string.
pub fn encode(batch: &[DiffEntry]) -> String {
    let mut out = String::new();
    for entry in batch {
        push_record(&mut out, entry);
    }
    out
}

/// Render `batch` as one or more payloads of at most `limit` bytes each.
///
/// Records are never split across payloads and keep their batch order.
/// Records that cannot fit in `limit` on their own are returned separately.
pub fn encode_chunks(batch: &[DiffEntry], limit: usize) -> (Vec<String>, Vec<&DiffEntry>) {
    let mut payloads = Vec::new();
    let mut oversized = Vec::new();
    let mut current = String::new();
    let mut record = String::new();
    for entry in batch {
        record.clear();
        push_record(&mut record, entry);
        if record.len() > limit {
            oversized.push(entry);
            continue;
        }
        if current.len() + record.len() > limit {
            payloads.push(std::mem::take(&mut current));
        }
        current.push_str(&record);
    }
    if !current.is_empty() {
        payloads.push(current);
    }
    (payloads, oversized)
}

fn push_record(out: &mut String, entry: &DiffEntry) {
    // Writing to a String cannot fail.
    let _ = write!(out, "{}\n{:08x}\n", entry.name, entry.value);
}

/// Parse wire text back into a batch.
///
/// Trailing NUL bytes are ignored so C-string framed datagrams decode too.
pub fn decode(payload: &[u8]) -> Result<DiffBatch, CodecError> {
    let end = payload
        .iter()
        .rposition(|&b| b != 0)
        .map(|i| i + 1)
        .unwrap_or(0);
    let text = std::str::from_utf8(&payload[..end]).map_err(|_| CodecError::NotUtf8)?;

    let mut batch = DiffBatch::new();
    let mut lines = text.split_terminator('\n');
    while let Some(name) = lines.next() {
        let Some(value) = lines.next() else {
            return Err(CodecError::MissingValue {
                name: name.to_string(),
            });
        };
        let parsed = u32::from_str_radix(value, 16).map_err(|_| CodecError::BadValue {
            name: name.to_string(),
            value: value.to_string(),
        })?;
        batch.push(DiffEntry {
            name: ChainName::from(name),
            value: parsed,
        });
    }
    Ok(batch)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_zero_padded_lowercase() {
        let batch = vec![DiffEntry::new("1000 4", 0x42), DiffEntry::new("2000", 0xABCDEF01)];
        assert_eq!(encode(&batch), "1000 4\n00000042\n2000\nabcdef01\n");
    }

    #[test]
    fn empty_batch_is_empty_payload() {
        assert_eq!(encode(&[]), "");
        assert_eq!(decode(b""), Ok(vec![]));
    }

    #[test]
    fn decode_preserves_order_and_names() {
        let batch = vec![
            DiffEntry::new("b 4", 1),
            DiffEntry::new("a", u32::MAX),
            DiffEntry::new("", 0),
        ];
        assert_eq!(decode(encode(&batch).as_bytes()), Ok(batch));
    }

    #[test]
    fn decode_ignores_trailing_nul() {
        assert_eq!(
            decode(b"10\n00000001\n\0"),
            Ok(vec![DiffEntry::new("10", 1)])
        );
    }

    #[test]
    fn decode_rejects_dangling_name() {
        assert_eq!(
            decode(b"10\n00000001\n20\n"),
            Err(CodecError::MissingValue {
                name: "20".to_string()
            })
        );
    }

    #[test]
    fn decode_rejects_non_hex_value() {
        assert!(matches!(
            decode(b"10\nzz\n"),
            Err(CodecError::BadValue { .. })
        ));
    }

    #[test]
    fn chunks_respect_limit_without_splitting_records() {
        // Each record is "nn\n" + 9 bytes = 12 bytes.
        let batch: Vec<DiffEntry> = (10..15).map(|i| DiffEntry::new(i.to_string().as_str(), i)).collect();
        let (payloads, oversized) = encode_chunks(&batch, 30);

        assert!(oversized.is_empty());
        assert_eq!(payloads.len(), 3);
        assert!(payloads.iter().all(|p| p.len() <= 30));
        assert_eq!(payloads.concat(), encode(&batch));

        let rejoined: DiffBatch = payloads
            .iter()
            .flat_map(|p| decode(p.as_bytes()).expect("decode"))
            .collect();
        assert_eq!(rejoined, batch);
    }

    #[test]
    fn record_larger_than_limit_is_set_aside() {
        let long = "x".repeat(64);
        let batch = vec![
            DiffEntry::new("a", 1),
            DiffEntry::new(long.as_str(), 2),
            DiffEntry::new("b", 3),
        ];
        let (payloads, oversized) = encode_chunks(&batch, 32);

        assert_eq!(payloads, vec!["a\n00000001\nb\n00000003\n".to_string()]);
        assert_eq!(oversized, vec![&batch[1]]);
    }

    #[test]
    fn empty_batch_has_no_chunks() {
        let (payloads, oversized) = encode_chunks(&[], MAX_DATAGRAM);
        assert!(payloads.is_empty());
        assert!(oversized.is_empty());
    }
}
