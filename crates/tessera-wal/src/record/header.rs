//! WAL record header.
//!
//! A fixed header precedes every record in the log:
//!
//! ```text
//! Offset  Size  Field
//! ------  ----  -----
//!   0       1   type
//!   1       1   flags
//!   2       2   reserved
//!   4       4   record_size (header + payload, bytes)
//!   8       8   txn_id
//!  16       8   lsn
//!  24       4   checksum (CRC32 of header + payload, excluding this field)
//!  28       8   ts (logical timestamp; the LSN echoed)
//!  36       4   padding
//! ```

use bytes::{Buf, BufMut};

use tessera_common::constants::WAL_RECORD_HEADER_SIZE;
use tessera_common::types::{Lsn, TxnId};

use super::{RecordFlags, RecordType};
use crate::error::{WalError, WalResult};

/// WAL record header (40 bytes on disk).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    /// Type of record.
    pub record_type: RecordType,
    /// Record flags.
    pub flags: RecordFlags,
    /// Total record size in bytes (header + payload).
    pub record_size: u32,
    /// Transaction that generated this record.
    pub txn_id: TxnId,
    /// Log sequence number of this record.
    pub lsn: Lsn,
    /// CRC32 of header + payload, excluding this field.
    pub checksum: u32,
    /// Logical timestamp; Tessera derives time from the LSN, so this
    /// echoes `lsn`.
    pub ts: u64,
}

impl RecordHeader {
    /// Size of the header in bytes.
    pub const SIZE: usize = WAL_RECORD_HEADER_SIZE;

    /// Creates a new record header.
    #[must_use]
    pub fn new(
        record_type: RecordType,
        flags: RecordFlags,
        txn_id: TxnId,
        lsn: Lsn,
        payload_length: usize,
    ) -> Self {
        Self {
            record_type,
            flags,
            record_size: (Self::SIZE + payload_length) as u32,
            txn_id,
            lsn,
            checksum: 0,
            ts: lsn.as_u64(),
        }
    }

    /// Returns the payload length in bytes.
    #[must_use]
    pub fn payload_length(&self) -> usize {
        (self.record_size as usize).saturating_sub(Self::SIZE)
    }

    /// Serializes the header into the buffer.
    pub fn serialize(&self, buf: &mut impl BufMut) {
        buf.put_u8(self.record_type.as_u8());
        buf.put_u8(self.flags.bits());
        buf.put_u16(0); // reserved
        buf.put_u32(self.record_size);
        buf.put_u64(self.txn_id.as_u64());
        buf.put_u64(self.lsn.as_u64());
        buf.put_u32(self.checksum);
        buf.put_u64(self.ts);
        buf.put_u32(0); // padding to 40 bytes
    }

    /// Deserializes a header from the buffer.
    pub fn deserialize(buf: &mut impl Buf) -> WalResult<Self> {
        if buf.remaining() < Self::SIZE {
            return Err(WalError::corrupted(
                Lsn::INVALID,
                format!("short header: {} bytes", buf.remaining()),
            ));
        }

        let record_type = RecordType::from_u8(buf.get_u8())?;
        let flags = RecordFlags::from_bits_truncate(buf.get_u8());
        let _reserved = buf.get_u16();
        let record_size = buf.get_u32();
        let txn_id = TxnId::new(buf.get_u64());
        let lsn = Lsn::new(buf.get_u64());
        let checksum = buf.get_u32();
        let ts = buf.get_u64();
        let _padding = buf.get_u32();

        if (record_size as usize) < Self::SIZE {
            return Err(WalError::corrupted(
                lsn,
                format!("record size {record_size} smaller than header"),
            ));
        }

        Ok(Self {
            record_type,
            flags,
            record_size,
            txn_id,
            lsn,
            checksum,
            ts,
        })
    }

    /// Computes the checksum over this header and the given payload,
    /// treating the checksum field as zero.
    #[must_use]
    pub fn compute_checksum(&self, payload: &[u8]) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&[self.record_type.as_u8(), self.flags.bits()]);
        hasher.update(&[0u8; 2]); // reserved
        hasher.update(&self.record_size.to_be_bytes());
        hasher.update(&self.txn_id.as_u64().to_be_bytes());
        hasher.update(&self.lsn.as_u64().to_be_bytes());
        hasher.update(&self.ts.to_be_bytes());
        hasher.update(payload);
        hasher.finalize()
    }

    /// Stamps the checksum for the given payload.
    pub fn set_checksum(&mut self, payload: &[u8]) {
        self.checksum = self.compute_checksum(payload);
    }

    /// Verifies the checksum against the payload.
    #[must_use]
    pub fn verify_checksum(&self, payload: &[u8]) -> bool {
        self.checksum == self.compute_checksum(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_size() {
        assert_eq!(RecordHeader::SIZE, 40);
        let header = RecordHeader::new(
            RecordType::Commit,
            RecordFlags::empty(),
            TxnId::new(1),
            Lsn::new(10),
            0,
        );
        let mut buf = Vec::new();
        header.serialize(&mut buf);
        assert_eq!(buf.len(), RecordHeader::SIZE);
    }

    #[test]
    fn test_header_roundtrip() {
        let header = RecordHeader::new(
            RecordType::Insert,
            RecordFlags::REDO | RecordFlags::UNDO,
            TxnId::new(42),
            Lsn::new(1000),
            256,
        );

        let mut buf = Vec::new();
        header.serialize(&mut buf);
        let decoded = RecordHeader::deserialize(&mut buf.as_slice()).unwrap();

        assert_eq!(decoded, header);
        assert_eq!(decoded.payload_length(), 256);
        assert_eq!(decoded.ts, 1000);
    }

    #[test]
    fn test_checksum() {
        let mut header = RecordHeader::new(
            RecordType::Insert,
            RecordFlags::REDO,
            TxnId::new(1),
            Lsn::new(5),
            10,
        );

        let payload = b"test data!";
        header.set_checksum(payload);

        assert!(header.verify_checksum(payload));
        assert!(!header.verify_checksum(b"wrong data"));
    }

    #[test]
    fn test_undersized_record_rejected() {
        let header = RecordHeader::new(
            RecordType::Commit,
            RecordFlags::empty(),
            TxnId::new(1),
            Lsn::new(1),
            0,
        );
        let mut buf = Vec::new();
        header.serialize(&mut buf);
        // Corrupt record_size down to something below the header size
        buf[4..8].copy_from_slice(&8u32.to_be_bytes());

        assert!(RecordHeader::deserialize(&mut buf.as_slice()).is_err());
    }
}
