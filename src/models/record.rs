//! The stored unit: a file plus its access policy.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// A self-destructing object as persisted in the store.
///
/// The remaining lifetime is not part of the record; it is carried by the
/// store's native per-key expiry.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ObjectRecord {
    /// Sanitized display name used in `Content-Disposition`.
    pub file_name: String,

    /// Caller-supplied content type, opaque to the engine.
    pub mime_type: String,

    /// Raw file bytes.
    pub payload: Bytes,

    /// PHC-formatted hash, or empty when the object is unprotected.
    pub password_hash: String,

    /// Downloads left before the object self-destructs.
    pub downloads_remaining: u32,
}

impl ObjectRecord {
    pub fn is_protected(&self) -> bool {
        !self.password_hash.is_empty()
    }

    pub fn size(&self) -> usize {
        self.payload.len()
    }

    pub fn encode(&self) -> bincode::Result<Vec<u8>> {
        bincode::serialize(self)
    }

    /// Decode a stored record. The payload is a view into `raw`, not a copy.
    pub fn decode(raw: &Bytes) -> bincode::Result<Self> {
        let view: RecordView<'_> = bincode::deserialize(raw)?;
        Ok(Self {
            file_name: view.file_name,
            mime_type: view.mime_type,
            payload: raw.slice_ref(view.payload),
            password_hash: view.password_hash,
            downloads_remaining: view.downloads_remaining,
        })
    }
}

/// Borrowing twin of [`ObjectRecord`]; field order must match.
#[derive(Deserialize)]
struct RecordView<'a> {
    file_name: String,
    mime_type: String,
    #[serde(borrow)]
    payload: &'a [u8],
    password_hash: String,
    downloads_remaining: u32,
}

/// What a successful consume hands back to the caller.
#[derive(Clone, Debug)]
pub struct Download {
    pub id: String,
    pub payload: Bytes,
    pub mime_type: String,
    pub file_name: String,
    /// Downloads left after this one; zero means the object is gone.
    pub downloads_remaining: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoding_preserves_every_field() {
        let record = ObjectRecord {
            file_name: "report.pdf".into(),
            mime_type: "application/pdf".into(),
            payload: Bytes::from_static(b"%PDF-1.7"),
            password_hash: String::new(),
            downloads_remaining: 3,
        };
        let decoded = ObjectRecord::decode(&Bytes::from(record.encode().unwrap())).unwrap();
        assert_eq!(decoded, record);
        assert!(!decoded.is_protected());
    }

    #[test]
    fn decoded_payload_shares_the_raw_buffer() {
        let record = ObjectRecord {
            file_name: "big.bin".into(),
            mime_type: "application/octet-stream".into(),
            payload: Bytes::from(vec![7u8; 4096]),
            password_hash: String::new(),
            downloads_remaining: 2,
        };
        let raw = Bytes::from(record.encode().unwrap());
        let decoded = ObjectRecord::decode(&raw).unwrap();

        let start = raw.as_ptr() as usize;
        let payload = decoded.payload.as_ptr() as usize;
        assert!(payload >= start && payload + decoded.size() <= start + raw.len());
        assert_eq!(decoded.payload, record.payload);
    }

    #[test]
    fn empty_payload_decodes() {
        let record = ObjectRecord {
            file_name: "empty".into(),
            mime_type: String::new(),
            payload: Bytes::new(),
            password_hash: String::new(),
            downloads_remaining: 1,
        };
        let decoded = ObjectRecord::decode(&Bytes::from(record.encode().unwrap())).unwrap();
        assert!(decoded.payload.is_empty());
    }

    #[test]
    fn truncated_bytes_fail_to_decode() {
        let record = ObjectRecord {
            file_name: "a".into(),
            mime_type: "text/plain".into(),
            payload: Bytes::from_static(b"hello"),
            password_hash: "$argon2id$stub".into(),
            downloads_remaining: 1,
        };
        let raw = Bytes::from(record.encode().unwrap());
        assert!(ObjectRecord::decode(&raw.slice(..raw.len() / 2)).is_err());
    }
}
