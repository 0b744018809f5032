//! Canonical page encoding, checksums, and content hashing.
//!
//! A page has exactly one canonical byte encoding. The CRC32 checksum
//! covers the full encoding except the checksum field itself; the 64-bit
//! content hash covers only the logical content (page type, keys,
//! payloads or children, leaf chain), deliberately excluding the page ID
//! and status flags so that deduplication is never defeated by identity
//! or transient state.

use std::hash::Hasher;

use bytes::{Buf, BufMut};
use siphasher::sip::SipHasher13;

use tessera_common::constants::{PAGE_MAGIC, PAGE_SIZE};
use tessera_common::error::{EngineError, EngineResult};
use tessera_common::types::{Key, PageId};

use super::header::{PageFlags, PageHeader, PageType, PAGE_HEADER_SIZE};
use super::{Page, SlotEntry};

/// Offset of the checksum field within the encoded header.
const CHECKSUM_OFFSET: usize = 16;

/// Fixed SipHash keys for the content hash.
///
/// These must never change: content hashes are persisted in page file
/// names and the manifest.
const CONTENT_HASH_KEYS: (u64, u64) = (0x7465_7373_6572_6131, 0x7061_6765_6861_7368);

/// Computes the 64-bit content hash of a page.
///
/// Two pages with identical logical content produce the same hash
/// regardless of their page IDs or flags.
#[must_use]
pub fn content_hash(page: &Page) -> u64 {
    let mut hasher = SipHasher13::new_with_keys(CONTENT_HASH_KEYS.0, CONTENT_HASH_KEYS.1);

    hasher.write_u8(page.header.page_type.as_u8());
    for key in page.keys() {
        hasher.write_u16(key.len() as u16);
        hasher.write(key.as_bytes());
    }

    if page.is_leaf() {
        for slot in page.slots() {
            let payload = page.payload(slot);
            hasher.write_u32(payload.len() as u32);
            hasher.write(payload);
            hasher.write_u8(u8::from(slot.tombstone));
        }
        hasher.write_u16(page.header.next_leaf.as_u16());
    } else {
        for child in page.children() {
            hasher.write_u16(child.as_u16());
        }
    }

    hasher.finish()
}

/// Encodes a page into its canonical byte form.
///
/// The checksum and content hash fields in the result reflect whatever
/// the header currently holds; use [`seal`] to stamp both.
#[must_use]
pub fn encode(page: &Page) -> Vec<u8> {
    let mut buf = Vec::with_capacity(page.encoded_size());

    // Header (32 bytes)
    buf.put_u16(PAGE_MAGIC);
    buf.put_u8(page.header.page_type.as_u8());
    buf.put_u8(0); // reserved
    buf.put_u16(page.header.page_id.as_u16());
    buf.put_u16(page.header.slot_count);
    buf.put_u16(page.header.free_space_offset);
    buf.put_u16(page.header.free_space_size);
    buf.put_u16(page.header.flags.bits());
    buf.put_u16(page.header.next_leaf.as_u16());
    buf.put_u32(page.header.checksum);
    buf.put_u64(page.header.content_hash);
    buf.put_u32(0); // reserved
    debug_assert_eq!(buf.len(), PAGE_HEADER_SIZE);

    // Keys
    buf.put_u16(page.keys().len() as u16);
    for key in page.keys() {
        buf.put_u16(key.len() as u16);
        buf.put_slice(key.as_bytes());
    }

    if page.is_leaf() {
        for slot in page.slots() {
            buf.put_u16(slot.id);
            buf.put_u16(slot.offset);
            buf.put_u16(slot.length);
            buf.put_u8(u8::from(slot.tombstone));
            buf.put_u8(0); // reserved
        }
        buf.put_u32(page.arena().len() as u32);
        buf.put_slice(page.arena());
    } else {
        buf.put_u16(page.children().len() as u16);
        for child in page.children() {
            buf.put_u16(child.as_u16());
        }
    }

    buf
}

/// Stamps the content hash and checksum into the page header and returns
/// the sealed canonical encoding.
pub fn seal(page: &mut Page) -> Vec<u8> {
    page.header.content_hash = content_hash(page);
    page.header.checksum = 0;
    let mut bytes = encode(page);

    let checksum = checksum_of(&bytes);
    page.header.checksum = checksum;
    bytes[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 4].copy_from_slice(&checksum.to_be_bytes());
    bytes
}

/// Computes the CRC32 checksum of an encoding, treating the checksum
/// field as zero.
#[must_use]
pub fn checksum_of(bytes: &[u8]) -> u32 {
    debug_assert!(bytes.len() >= PAGE_HEADER_SIZE);
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&bytes[..CHECKSUM_OFFSET]);
    hasher.update(&[0u8; 4]);
    hasher.update(&bytes[CHECKSUM_OFFSET + 4..]);
    hasher.finalize()
}

/// Decodes a page from its canonical byte form, verifying the magic
/// bytes and checksum.
pub fn decode(bytes: &[u8]) -> EngineResult<Page> {
    if bytes.len() < PAGE_HEADER_SIZE {
        return Err(EngineError::corruption(format!(
            "page encoding truncated: {} bytes",
            bytes.len()
        )));
    }
    if bytes.len() > PAGE_SIZE {
        return Err(EngineError::corruption(format!(
            "page encoding oversized: {} bytes",
            bytes.len()
        )));
    }

    let mut buf = bytes;

    let magic = buf.get_u16();
    if magic != PAGE_MAGIC {
        return Err(EngineError::corruption(format!(
            "bad page magic: {magic:#06x}"
        )));
    }

    let page_type = PageType::from_u8(buf.get_u8())
        .ok_or_else(|| EngineError::corruption("unknown page type"))?;
    let _reserved = buf.get_u8();
    let page_id = PageId::new(buf.get_u16());
    let slot_count = buf.get_u16();
    let free_space_offset = buf.get_u16();
    let free_space_size = buf.get_u16();
    let flags = PageFlags::from_bits_truncate(buf.get_u16());
    let next_leaf = PageId::new(buf.get_u16());
    let checksum = buf.get_u32();
    let content_hash = buf.get_u64();
    let _reserved = buf.get_u32();

    let actual = checksum_of(bytes);
    if actual != checksum {
        return Err(EngineError::ChecksumMismatch {
            expected: checksum,
            actual,
        });
    }

    let key_count = buf.get_u16() as usize;
    let mut keys = Vec::with_capacity(key_count);
    for _ in 0..key_count {
        if buf.remaining() < 2 {
            return Err(EngineError::corruption("page key table truncated"));
        }
        let len = buf.get_u16() as usize;
        if buf.remaining() < len {
            return Err(EngineError::corruption("page key truncated"));
        }
        keys.push(Key::from_bytes(&buf[..len]));
        buf.advance(len);
    }

    let header = PageHeader {
        page_id,
        page_type,
        slot_count,
        free_space_offset,
        free_space_size,
        flags,
        next_leaf,
        checksum,
        content_hash,
    };

    if page_type == PageType::Leaf {
        if slot_count as usize != key_count {
            return Err(EngineError::corruption(format!(
                "leaf slot count {slot_count} does not match key count {key_count}"
            )));
        }
        let mut slots = Vec::with_capacity(slot_count as usize);
        for _ in 0..slot_count {
            if buf.remaining() < 8 {
                return Err(EngineError::corruption("slot directory truncated"));
            }
            let id = buf.get_u16();
            let offset = buf.get_u16();
            let length = buf.get_u16();
            let tombstone = buf.get_u8() != 0;
            let _reserved = buf.get_u8();
            slots.push(SlotEntry {
                id,
                offset,
                length,
                tombstone,
            });
        }
        if buf.remaining() < 4 {
            return Err(EngineError::corruption("arena length truncated"));
        }
        let arena_len = buf.get_u32() as usize;
        if buf.remaining() < arena_len {
            return Err(EngineError::corruption("arena truncated"));
        }
        let arena = buf[..arena_len].to_vec();

        for slot in &slots {
            if slot.offset as usize + slot.length as usize > arena.len() {
                return Err(EngineError::corruption("slot points past arena end"));
            }
        }

        Ok(Page::from_parts_leaf(header, keys, slots, arena))
    } else {
        if buf.remaining() < 2 {
            return Err(EngineError::corruption("child table truncated"));
        }
        let child_count = buf.get_u16() as usize;
        if child_count != key_count + 1 {
            return Err(EngineError::corruption(format!(
                "internal node has {key_count} keys but {child_count} children"
            )));
        }
        let mut children = Vec::with_capacity(child_count);
        for _ in 0..child_count {
            if buf.remaining() < 2 {
                return Err(EngineError::corruption("child table truncated"));
            }
            children.push(PageId::new(buf.get_u16()));
        }
        Ok(Page::from_parts_internal(header, keys, children))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_common::types::Value;

    #[test]
    fn test_leaf_roundtrip() {
        let mut page = Page::new_leaf();
        page.leaf_insert(&Key::from_bytes(b"apple"), Value::from_bytes(b"red").as_bytes())
            .unwrap();
        page.leaf_insert(
            &Key::from_bytes(b"banana"),
            Value::from_bytes(b"yellow").as_bytes(),
        )
        .unwrap();
        page.header.next_leaf = PageId::new(7);

        let bytes = seal(&mut page);
        let decoded = decode(&bytes).unwrap();

        assert!(decoded.is_leaf());
        assert_eq!(decoded.keys(), page.keys());
        assert_eq!(decoded.header.next_leaf, PageId::new(7));
        assert_eq!(
            decoded.leaf_find(&Key::from_bytes(b"banana")),
            Some(b"yellow".as_ref())
        );
    }

    #[test]
    fn test_tombstone_survives_roundtrip() {
        let mut page = Page::new_leaf();
        page.leaf_insert(&Key::from_bytes(b"keep"), b"v1").unwrap();
        page.leaf_insert(&Key::from_bytes(b"drop"), b"v2").unwrap();
        page.leaf_remove(&Key::from_bytes(b"drop"));

        let bytes = seal(&mut page);
        let decoded = decode(&bytes).unwrap();

        assert_eq!(decoded.key_count(), 2);
        assert_eq!(decoded.live_key_count(), 1);
        assert_eq!(decoded.tombstone_count(), 1);
        assert_eq!(decoded.leaf_find(&Key::from_bytes(b"drop")), None);
        assert_eq!(
            decoded.leaf_find(&Key::from_bytes(b"keep")),
            Some(b"v1".as_ref())
        );
    }

    #[test]
    fn test_content_hash_sees_tombstones() {
        let mut live = Page::new_leaf();
        live.leaf_insert(&Key::from_bytes(b"k"), b"v").unwrap();

        let mut dead = live.clone();
        dead.leaf_remove(&Key::from_bytes(b"k"));

        assert_ne!(content_hash(&live), content_hash(&dead));
    }

    #[test]
    fn test_internal_roundtrip() {
        let mut page = Page::new_internal(PageId::new(1));
        page.insert_separator(0, Key::from_bytes(b"m"), PageId::new(2));

        let bytes = seal(&mut page);
        let decoded = decode(&bytes).unwrap();

        assert!(!decoded.is_leaf());
        assert_eq!(decoded.children(), &[PageId::new(1), PageId::new(2)]);
        assert_eq!(decoded.keys().len(), 1);
    }

    #[test]
    fn test_checksum_detects_corruption() {
        let mut page = Page::new_leaf();
        page.leaf_insert(&Key::from_bytes(b"k"), b"v").unwrap();
        let mut bytes = seal(&mut page);

        // Flip a byte in the body
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;

        assert!(matches!(
            decode(&bytes),
            Err(EngineError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_content_hash_ignores_page_id_and_flags() {
        let mut a = Page::new_leaf();
        a.leaf_insert(&Key::from_bytes(b"k"), b"v").unwrap();
        let mut b = a.clone();
        b.header.page_id = PageId::new(99);
        b.header.flags.insert(PageFlags::DIRTY);

        assert_eq!(content_hash(&a), content_hash(&b));
    }

    #[test]
    fn test_content_hash_depends_on_content() {
        let mut a = Page::new_leaf();
        a.leaf_insert(&Key::from_bytes(b"k"), b"v1").unwrap();
        let mut b = Page::new_leaf();
        b.leaf_insert(&Key::from_bytes(b"k"), b"v2").unwrap();

        assert_ne!(content_hash(&a), content_hash(&b));
    }

    #[test]
    fn test_content_hash_depends_on_next_leaf() {
        let mut a = Page::new_leaf();
        a.leaf_insert(&Key::from_bytes(b"k"), b"v").unwrap();
        let mut b = a.clone();
        b.header.next_leaf = PageId::new(3);

        assert_ne!(content_hash(&a), content_hash(&b));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode(&[0u8; 4]).is_err());
        assert!(decode(&[0u8; PAGE_HEADER_SIZE + 8]).is_err());
    }
}
