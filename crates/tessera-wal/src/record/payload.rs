//! Data record payload.
//!
//! Insert, update, and delete records carry the target page, the key,
//! and the affected value bytes. `old_bytes` drives UNDO, `new_bytes`
//! drives REDO. Every variable-length field is length-prefixed so the
//! boundary between old and new image is always recoverable.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use tessera_common::types::{Lsn, PageId};

use crate::error::{WalError, WalResult};

/// Payload of an insert, update, or delete record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPayload {
    /// Target leaf page at the time the operation was logged.
    pub page_id: PageId,
    /// The affected key.
    pub key: Bytes,
    /// Pre-image for UNDO (delete and update records).
    pub old_bytes: Option<Bytes>,
    /// Post-image for REDO (insert and update records).
    pub new_bytes: Option<Bytes>,
}

impl DataPayload {
    /// Payload for an insert: REDO image only.
    #[must_use]
    pub fn insert(page_id: PageId, key: Bytes, new_bytes: Bytes) -> Self {
        Self {
            page_id,
            key,
            old_bytes: None,
            new_bytes: Some(new_bytes),
        }
    }

    /// Payload for a delete: UNDO image only.
    #[must_use]
    pub fn delete(page_id: PageId, key: Bytes, old_bytes: Bytes) -> Self {
        Self {
            page_id,
            key,
            old_bytes: Some(old_bytes),
            new_bytes: None,
        }
    }

    /// Payload for an update: both images.
    #[must_use]
    pub fn update(page_id: PageId, key: Bytes, old_bytes: Bytes, new_bytes: Bytes) -> Self {
        Self {
            page_id,
            key,
            old_bytes: Some(old_bytes),
            new_bytes: Some(new_bytes),
        }
    }

    /// Returns the serialized length in bytes.
    #[must_use]
    pub fn serialized_len(&self) -> usize {
        let mut len = 2 + 4 + self.key.len() + 1 + 1;
        if let Some(ref old) = self.old_bytes {
            len += 4 + old.len();
        }
        if let Some(ref new) = self.new_bytes {
            len += 4 + new.len();
        }
        len
    }

    /// Serializes the payload to bytes.
    #[must_use]
    pub fn serialize(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.serialized_len());
        buf.put_u16(self.page_id.as_u16());
        buf.put_u32(self.key.len() as u32);
        buf.put_slice(&self.key);

        match self.old_bytes {
            Some(ref old) => {
                buf.put_u8(1);
                buf.put_u32(old.len() as u32);
                buf.put_slice(old);
            }
            None => buf.put_u8(0),
        }
        match self.new_bytes {
            Some(ref new) => {
                buf.put_u8(1);
                buf.put_u32(new.len() as u32);
                buf.put_slice(new);
            }
            None => buf.put_u8(0),
        }

        buf.freeze()
    }

    /// Deserializes a payload; `lsn` is used for error context only.
    pub fn deserialize(lsn: Lsn, mut buf: &[u8]) -> WalResult<Self> {
        if buf.remaining() < 7 {
            return Err(WalError::malformed(lsn, "data payload truncated"));
        }
        let page_id = PageId::new(buf.get_u16());
        let key = Self::read_bytes(lsn, &mut buf, "key")?;

        let old_bytes = Self::read_optional(lsn, &mut buf, "old image")?;
        let new_bytes = Self::read_optional(lsn, &mut buf, "new image")?;

        Ok(Self {
            page_id,
            key,
            old_bytes,
            new_bytes,
        })
    }

    fn read_bytes(lsn: Lsn, buf: &mut &[u8], what: &str) -> WalResult<Bytes> {
        if buf.remaining() < 4 {
            return Err(WalError::malformed(lsn, format!("{what} length truncated")));
        }
        let len = buf.get_u32() as usize;
        if buf.remaining() < len {
            return Err(WalError::malformed(lsn, format!("{what} truncated")));
        }
        let bytes = Bytes::copy_from_slice(&buf[..len]);
        buf.advance(len);
        Ok(bytes)
    }

    fn read_optional(lsn: Lsn, buf: &mut &[u8], what: &str) -> WalResult<Option<Bytes>> {
        if buf.remaining() < 1 {
            return Err(WalError::malformed(lsn, format!("{what} flag truncated")));
        }
        match buf.get_u8() {
            0 => Ok(None),
            1 => Ok(Some(Self::read_bytes(lsn, buf, what)?)),
            other => Err(WalError::malformed(
                lsn,
                format!("bad {what} presence flag {other}"),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_roundtrip() {
        let payload = DataPayload::insert(
            PageId::new(3),
            Bytes::from("key"),
            Bytes::from("value"),
        );

        let bytes = payload.serialize();
        assert_eq!(bytes.len(), payload.serialized_len());
        let decoded = DataPayload::deserialize(Lsn::new(1), &bytes).unwrap();

        assert_eq!(decoded, payload);
        assert!(decoded.old_bytes.is_none());
    }

    #[test]
    fn test_update_preserves_old_new_boundary() {
        let payload = DataPayload::update(
            PageId::new(9),
            Bytes::from("k"),
            Bytes::from("old-value-bytes"),
            Bytes::from("new"),
        );

        let bytes = payload.serialize();
        let decoded = DataPayload::deserialize(Lsn::new(1), &bytes).unwrap();

        assert_eq!(decoded.old_bytes.as_deref(), Some(b"old-value-bytes".as_ref()));
        assert_eq!(decoded.new_bytes.as_deref(), Some(b"new".as_ref()));
    }

    #[test]
    fn test_delete_roundtrip() {
        let payload = DataPayload::delete(PageId::new(1), Bytes::from("k"), Bytes::from("old"));

        let bytes = payload.serialize();
        let decoded = DataPayload::deserialize(Lsn::new(1), &bytes).unwrap();

        assert_eq!(decoded, payload);
        assert!(decoded.new_bytes.is_none());
    }

    #[test]
    fn test_truncated_payload_rejected() {
        let payload = DataPayload::insert(PageId::new(1), Bytes::from("key"), Bytes::from("v"));
        let bytes = payload.serialize();

        assert!(DataPayload::deserialize(Lsn::new(1), &bytes[..bytes.len() - 1]).is_err());
        assert!(DataPayload::deserialize(Lsn::new(1), &bytes[..3]).is_err());
    }
}
