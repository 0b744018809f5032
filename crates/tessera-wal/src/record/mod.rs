//! WAL record types and binary codec.

mod header;
mod payload;

pub use header::RecordHeader;
pub use payload::DataPayload;

use bytes::{Buf, Bytes, BytesMut};

use tessera_common::types::{Lsn, TxnId};

use crate::error::{WalError, WalResult};

/// Record type identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RecordType {
    /// Transaction begin.
    Begin = 1,
    /// Insert a new record.
    Insert = 2,
    /// Update an existing record.
    Update = 3,
    /// Delete a record.
    Delete = 4,
    /// Transaction commit.
    Commit = 5,
    /// Transaction abort.
    Abort = 6,
    /// Checkpoint marker.
    Checkpoint = 7,
}

impl RecordType {
    /// Converts the record type to a u8.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Creates a record type from a u8.
    pub fn from_u8(value: u8) -> WalResult<Self> {
        match value {
            1 => Ok(Self::Begin),
            2 => Ok(Self::Insert),
            3 => Ok(Self::Update),
            4 => Ok(Self::Delete),
            5 => Ok(Self::Commit),
            6 => Ok(Self::Abort),
            7 => Ok(Self::Checkpoint),
            _ => Err(WalError::UnknownRecordType { value }),
        }
    }

    /// Returns true for insert/update/delete records.
    #[must_use]
    pub const fn is_data_record(self) -> bool {
        matches!(self, Self::Insert | Self::Update | Self::Delete)
    }
}

bitflags::bitflags! {
    /// Flags for WAL records.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct RecordFlags: u8 {
        /// Record carries redo information.
        const REDO = 0b0000_0001;
        /// Record carries undo information.
        const UNDO = 0b0000_0010;
    }
}

/// WAL record payload variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalPayload {
    /// Control records carry no payload.
    None,
    /// Insert/update/delete payload.
    Data(DataPayload),
}

/// A complete WAL record: header plus typed payload.
#[derive(Debug, Clone)]
pub struct WalRecord {
    /// Record header.
    pub header: RecordHeader,
    /// Record payload.
    pub payload: WalPayload,
}

impl WalRecord {
    /// Creates a transaction-begin record.
    #[must_use]
    pub fn begin(lsn: Lsn, txn_id: TxnId) -> Self {
        Self::control(RecordType::Begin, lsn, txn_id)
    }

    /// Creates a commit record.
    #[must_use]
    pub fn commit(lsn: Lsn, txn_id: TxnId) -> Self {
        Self::control(RecordType::Commit, lsn, txn_id)
    }

    /// Creates an abort record.
    #[must_use]
    pub fn abort(lsn: Lsn, txn_id: TxnId) -> Self {
        Self::control(RecordType::Abort, lsn, txn_id)
    }

    /// Creates a checkpoint record.
    #[must_use]
    pub fn checkpoint(lsn: Lsn) -> Self {
        Self::control(RecordType::Checkpoint, lsn, TxnId::INVALID)
    }

    /// Creates an insert record.
    #[must_use]
    pub fn insert(lsn: Lsn, txn_id: TxnId, payload: DataPayload) -> Self {
        Self::data(RecordType::Insert, RecordFlags::REDO, lsn, txn_id, payload)
    }

    /// Creates an update record.
    #[must_use]
    pub fn update(lsn: Lsn, txn_id: TxnId, payload: DataPayload) -> Self {
        Self::data(
            RecordType::Update,
            RecordFlags::REDO | RecordFlags::UNDO,
            lsn,
            txn_id,
            payload,
        )
    }

    /// Creates a delete record.
    #[must_use]
    pub fn delete(lsn: Lsn, txn_id: TxnId, payload: DataPayload) -> Self {
        Self::data(RecordType::Delete, RecordFlags::UNDO, lsn, txn_id, payload)
    }

    fn control(record_type: RecordType, lsn: Lsn, txn_id: TxnId) -> Self {
        Self {
            header: RecordHeader::new(record_type, RecordFlags::empty(), txn_id, lsn, 0),
            payload: WalPayload::None,
        }
    }

    fn data(
        record_type: RecordType,
        flags: RecordFlags,
        lsn: Lsn,
        txn_id: TxnId,
        payload: DataPayload,
    ) -> Self {
        Self {
            header: RecordHeader::new(record_type, flags, txn_id, lsn, payload.serialized_len()),
            payload: WalPayload::Data(payload),
        }
    }

    /// Returns the LSN of this record.
    #[inline]
    #[must_use]
    pub fn lsn(&self) -> Lsn {
        self.header.lsn
    }

    /// Returns the transaction ID of this record.
    #[inline]
    #[must_use]
    pub fn txn_id(&self) -> TxnId {
        self.header.txn_id
    }

    /// Returns the record type.
    #[inline]
    #[must_use]
    pub fn record_type(&self) -> RecordType {
        self.header.record_type
    }

    /// Returns the data payload, if this is a data record.
    #[must_use]
    pub fn data_payload(&self) -> Option<&DataPayload> {
        match self.payload {
            WalPayload::Data(ref payload) => Some(payload),
            WalPayload::None => None,
        }
    }

    /// Serializes the record (header + payload) with its checksum.
    #[must_use]
    pub fn serialize(&self) -> Bytes {
        let payload_bytes = match self.payload {
            WalPayload::None => Bytes::new(),
            WalPayload::Data(ref payload) => payload.serialize(),
        };

        let mut header = self.header;
        header.record_size = (RecordHeader::SIZE + payload_bytes.len()) as u32;
        header.set_checksum(&payload_bytes);

        let mut buf = BytesMut::with_capacity(header.record_size as usize);
        header.serialize(&mut buf);
        buf.extend_from_slice(&payload_bytes);
        buf.freeze()
    }

    /// Deserializes a record, verifying its checksum.
    pub fn deserialize(buf: &mut &[u8]) -> WalResult<Self> {
        let header = RecordHeader::deserialize(buf)?;

        let payload_len = header.payload_length();
        if buf.remaining() < payload_len {
            return Err(WalError::corrupted(
                header.lsn,
                format!(
                    "payload truncated: {} of {payload_len} bytes",
                    buf.remaining()
                ),
            ));
        }
        let payload_bytes = &buf[..payload_len];

        if !header.verify_checksum(payload_bytes) {
            let computed = header.compute_checksum(payload_bytes);
            return Err(WalError::ChecksumMismatch {
                lsn: header.lsn,
                expected: header.checksum,
                computed,
            });
        }

        let payload = if header.record_type.is_data_record() {
            WalPayload::Data(DataPayload::deserialize(header.lsn, payload_bytes)?)
        } else if payload_len == 0 {
            WalPayload::None
        } else {
            return Err(WalError::malformed(
                header.lsn,
                format!(
                    "{:?} record carries {payload_len} unexpected payload bytes",
                    header.record_type
                ),
            ));
        };
        buf.advance(payload_len);

        Ok(Self { header, payload })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_common::types::PageId;

    #[test]
    fn test_record_type_roundtrip() {
        for rt in [
            RecordType::Begin,
            RecordType::Insert,
            RecordType::Update,
            RecordType::Delete,
            RecordType::Commit,
            RecordType::Abort,
            RecordType::Checkpoint,
        ] {
            assert_eq!(RecordType::from_u8(rt.as_u8()).unwrap(), rt);
        }
        assert!(RecordType::from_u8(0).is_err());
        assert!(RecordType::from_u8(255).is_err());
    }

    #[test]
    fn test_control_record_roundtrip() {
        let record = WalRecord::commit(Lsn::new(1000), TxnId::new(42));

        let bytes = record.serialize();
        let mut slice = bytes.as_ref();
        let decoded = WalRecord::deserialize(&mut slice).unwrap();

        assert_eq!(decoded.lsn(), Lsn::new(1000));
        assert_eq!(decoded.txn_id(), TxnId::new(42));
        assert_eq!(decoded.record_type(), RecordType::Commit);
        assert!(decoded.data_payload().is_none());
        assert!(slice.is_empty());
    }

    #[test]
    fn test_insert_record_roundtrip() {
        let payload = DataPayload::insert(
            PageId::new(100),
            Bytes::from("test_key"),
            Bytes::from("test_value"),
        );
        let record = WalRecord::insert(Lsn::new(2000), TxnId::new(1), payload.clone());

        let bytes = record.serialize();
        let decoded = WalRecord::deserialize(&mut bytes.as_ref()).unwrap();

        assert_eq!(decoded.record_type(), RecordType::Insert);
        assert_eq!(decoded.data_payload(), Some(&payload));
        assert!(decoded.header.flags.contains(RecordFlags::REDO));
    }

    #[test]
    fn test_checksum_detects_flipped_bit() {
        let record = WalRecord::delete(
            Lsn::new(5),
            TxnId::new(2),
            DataPayload::delete(PageId::new(1), Bytes::from("k"), Bytes::from("old")),
        );

        let mut bytes = record.serialize().to_vec();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;

        assert!(matches!(
            WalRecord::deserialize(&mut bytes.as_slice()),
            Err(WalError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_consecutive_records_parse() {
        let a = WalRecord::begin(Lsn::new(1), TxnId::new(1));
        let b = WalRecord::insert(
            Lsn::new(2),
            TxnId::new(1),
            DataPayload::insert(PageId::new(1), Bytes::from("k"), Bytes::from("v")),
        );

        let mut stream = a.serialize().to_vec();
        stream.extend_from_slice(&b.serialize());

        let mut slice = stream.as_slice();
        let first = WalRecord::deserialize(&mut slice).unwrap();
        let second = WalRecord::deserialize(&mut slice).unwrap();

        assert_eq!(first.record_type(), RecordType::Begin);
        assert_eq!(second.record_type(), RecordType::Insert);
        assert!(slice.is_empty());
    }
}
