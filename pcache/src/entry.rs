//! Map entries and the insertion discipline of §4.3.4.
//!
//! An entry's data is either an owned copy made by
//! [`crate::library::PipelineLibrary::store`] (freed like any other Rust
//! value when the library is dropped) or a borrowed slice into the byte
//! range a caller deserialized the library from — the memory-mapped-file
//! use case depends on this never being silently copied. [`BlobRef`]
//! models the split: `Owned` holds an `Arc<[u8]>` so a blob can be handed
//! back to a caller after the library's lock is released without copying
//! or holding the lock open; `Borrowed` just carries the caller's
//! lifetime through. `is_new` mirrors the source field of the same name,
//! even though Rust's ownership system doesn't need it to decide what to
//! free.
//!
//! `Entry`/`BlobRef` themselves are agnostic to what's inside the blob.
//! For `pso_map` that's a self-checksummed [`crate::toc`]-adjacent
//! pipeline blob from `pcache_core::blob`; for `spirv_cache_map` and
//! `driver_cache_map` it's the internal deduplicated-blob container of
//! `pcache_core::dedup` (`{checksum:u32, data[]}`), verified by the
//! caller (`crate::library`) before the bytes ever reach `insert`.

use std::borrow::Cow;
use std::sync::Arc;

use pcache_core::error::Error;

#[derive(Debug, Clone)]
pub enum BlobRef<'a> {
    Borrowed(&'a [u8]),
    Owned(Arc<[u8]>),
}
impl<'a> BlobRef<'a> {
    pub fn as_slice(&self) -> &[u8] {
        match self {
            BlobRef::Borrowed(b) => b,
            BlobRef::Owned(a) => a,
        }
    }
    pub fn len(&self) -> usize {
        self.as_slice().len()
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
impl PartialEq for BlobRef<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.as_slice() == other.as_slice()
    }
}
impl Eq for BlobRef<'_> {}

#[derive(Debug, Clone)]
pub struct Entry<'a> {
    pub blob: BlobRef<'a>,
    pub is_new: bool,
}
impl<'a> Entry<'a> {
    pub fn owned(blob: Vec<u8>) -> Entry<'static> {
        Entry {
            blob: BlobRef::Owned(Arc::from(blob.into_boxed_slice())),
            is_new: true,
        }
    }
    pub fn borrowed(blob: &'a [u8]) -> Entry<'a> {
        Entry {
            blob: BlobRef::Borrowed(blob),
            is_new: false,
        }
    }
}

/// Key type for the name-keyed `pso_map`. Borrowed during deserialization,
/// owned after `store`.
pub type NameKey<'a> = Cow<'a, [u8]>;

#[derive(Debug, Default, Clone, Copy)]
pub struct Totals {
    pub name_table_size: usize,
    pub blob_size: usize,
}

fn align8(n: usize) -> usize {
    (n + 7) & !7
}

/// Inserts `entry` under `key`, applying the idempotent-reinsert rule: a
/// key that already maps to byte-identical `{blob, is_new}` is a no-op
/// success (the same dedup blob reloaded via multiple pipelines). A key
/// that maps to something else is rejected. This folds both "allocation
/// failed" and "conflicting re-insert" into a single failure, preserving
/// the source's behavior — see `DESIGN.md`.
pub fn insert<'a, K: std::hash::Hash + Eq>(
    map: &mut std::collections::HashMap<K, Entry<'a>>,
    key: K,
    entry: Entry<'a>,
    key_table_bytes: usize,
    totals: &mut Totals,
) -> Result<(), Error> {
    if let Some(existing) = map.get(&key) {
        if existing.blob == entry.blob && existing.is_new == entry.is_new {
            return Ok(());
        }
        return Err(Error::OutOfMemory);
    }
    totals.name_table_size += key_table_bytes;
    totals.blob_size += align8(entry.blob.len());
    map.insert(key, entry);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn fresh_key_bumps_totals() {
        let mut map: HashMap<u64, Entry> = HashMap::new();
        let mut totals = Totals::default();
        insert(&mut map, 1u64, Entry::owned(vec![1, 2, 3]), 8, &mut totals).unwrap();
        assert_eq!(totals.name_table_size, 8);
        assert_eq!(totals.blob_size, 8); // align8(3) == 8
    }

    #[test]
    fn identical_reinsert_is_idempotent_noop() {
        let mut map: HashMap<u64, Entry> = HashMap::new();
        let mut totals = Totals::default();
        insert(&mut map, 1u64, Entry::owned(vec![1, 2, 3]), 8, &mut totals).unwrap();
        let totals_after_first = totals;

        insert(&mut map, 1u64, Entry::owned(vec![1, 2, 3]), 8, &mut totals).unwrap();
        assert_eq!(totals.name_table_size, totals_after_first.name_table_size);
        assert_eq!(totals.blob_size, totals_after_first.blob_size);
    }

    #[test]
    fn conflicting_reinsert_is_rejected() {
        let mut map: HashMap<u64, Entry> = HashMap::new();
        let mut totals = Totals::default();
        insert(&mut map, 1u64, Entry::owned(vec![1, 2, 3]), 8, &mut totals).unwrap();
        assert_eq!(
            insert(&mut map, 1u64, Entry::owned(vec![9, 9, 9]), 8, &mut totals),
            Err(Error::OutOfMemory)
        );
    }

    #[test]
    fn borrowed_and_owned_with_same_bytes_differ_by_is_new() {
        // Entry::owned sets is_new = true, Entry::borrowed sets is_new =
        // false; the idempotent-reinsert check compares both blob bytes
        // and is_new (see DESIGN.md), so these don't collapse to a no-op
        // even though their bytes are equal.
        let mut map: HashMap<u64, Entry> = HashMap::new();
        let mut totals = Totals::default();
        insert(&mut map, 1u64, Entry::owned(vec![1, 2, 3]), 8, &mut totals).unwrap();
        let bytes = [1u8, 2, 3];
        assert_eq!(
            insert(&mut map, 1u64, Entry::borrowed(&bytes), 8, &mut totals),
            Err(Error::OutOfMemory)
        );
    }
}
