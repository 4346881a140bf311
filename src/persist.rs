//! Persistent storage of the base and char list.
//!
//! The store is an opaque keyed blob container supplied by the embedder; one
//! database per font, two slots. On a schema version change the store drops
//! and recreates its slots empty, so stale layouts can never be misread. The
//! char list is persisted in the sparse bit set encoding, which stays small
//! even for tens of thousands of code points.

use read_fonts::collections::IntSet;

use crate::error::FontError;

/// Persistent schema version. Bump to invalidate previously stored data.
pub const SCHEMA_VERSION: u32 = 1;

/// The two persisted slots of a font's database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    /// The raw bytes of the (sanitized, possibly patched) base.
    Base,
    /// The serialized set of code points present in the base.
    CharList,
}

/// The database name for a font, namespaced away from other stores.
pub fn store_name(font_name: &str) -> String {
    format!("incrfonts/{font_name}")
}

/// Keyed blob storage, one database per font.
///
/// Implementations wrap whatever the platform provides (IndexedDB, a file,
/// an LRU service). All operations are driven from the font's single logical
/// task; implementations need not synchronize.
pub trait PersistentStore {
    /// Open (creating if needed) the database `name` at `version`.
    ///
    /// A version mismatch with existing data drops the slots and recreates
    /// them empty.
    fn open(&mut self, name: &str, version: u32) -> Result<(), FontError>;

    /// Read a slot. `Ok(None)` means the slot is empty.
    fn get(&mut self, slot: Slot) -> Result<Option<Vec<u8>>, FontError>;

    /// Atomically replace a slot's value.
    fn put(&mut self, slot: Slot, data: &[u8]) -> Result<(), FontError>;
}

/// Serialize a char list for the [`Slot::CharList`] slot.
pub fn encode_char_list(chars: &IntSet<u32>) -> Vec<u8> {
    chars.to_sparse_bit_set()
}

/// Decode a persisted char list blob.
pub fn decode_char_list(data: &[u8]) -> Result<IntSet<u32>, FontError> {
    IntSet::<u32>::from_sparse_bit_set(data)
        .map_err(|_| FontError::PersistIo("char list blob is not a valid sparse bit set"))
}

/// An in-memory [`PersistentStore`].
///
/// Backs tests and the `persist_data = false` configuration; data lives only
/// as long as the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    version: Option<u32>,
    base: Option<Vec<u8>>,
    char_list: Option<Vec<u8>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Default::default()
    }
}

impl PersistentStore for MemoryStore {
    fn open(&mut self, _name: &str, version: u32) -> Result<(), FontError> {
        if self.version != Some(version) {
            self.base = None;
            self.char_list = None;
            self.version = Some(version);
        }
        Ok(())
    }

    fn get(&mut self, slot: Slot) -> Result<Option<Vec<u8>>, FontError> {
        Ok(match slot {
            Slot::Base => self.base.clone(),
            Slot::CharList => self.char_list.clone(),
        })
    }

    fn put(&mut self, slot: Slot, data: &[u8]) -> Result<(), FontError> {
        match slot {
            Slot::Base => self.base = Some(data.to_vec()),
            Slot::CharList => self.char_list = Some(data.to_vec()),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn char_list_round_trips() {
        let mut chars = IntSet::<u32>::empty();
        chars.insert(0x61);
        chars.insert(0x62);
        chars.insert(0x2_0000);
        let decoded = decode_char_list(&encode_char_list(&chars)).unwrap();
        assert_eq!(
            decoded.iter().collect::<Vec<_>>(),
            vec![0x61, 0x62, 0x2_0000]
        );
    }

    #[test]
    fn empty_char_list_round_trips() {
        let chars = IntSet::<u32>::empty();
        let decoded = decode_char_list(&encode_char_list(&chars)).unwrap();
        assert!(decoded.is_empty());
    }

    #[test]
    fn memory_store_keeps_slots_across_same_version_opens() {
        let mut store = MemoryStore::new();
        store.open("incrfonts/test", SCHEMA_VERSION).unwrap();
        store.put(Slot::Base, &[1, 2, 3]).unwrap();
        store.open("incrfonts/test", SCHEMA_VERSION).unwrap();
        assert_eq!(store.get(Slot::Base).unwrap(), Some(vec![1, 2, 3]));
    }

    #[test]
    fn version_change_drops_slots() {
        let mut store = MemoryStore::new();
        store.open("incrfonts/test", 1).unwrap();
        store.put(Slot::Base, &[1]).unwrap();
        store.put(Slot::CharList, &[2]).unwrap();
        store.open("incrfonts/test", 2).unwrap();
        assert_eq!(store.get(Slot::Base).unwrap(), None);
        assert_eq!(store.get(Slot::CharList).unwrap(), None);
    }

    #[test]
    fn store_name_is_namespaced() {
        assert_eq!(store_name("NotoSansJP-Thin"), "incrfonts/NotoSansJP-Thin");
    }
}
