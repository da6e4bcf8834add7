//! String interner.
//!
//! Canonicalizes strings by content: interning equal byte sequences
//! returns handles to the same object, so interned strings can be compared
//! by pointer. The content hash is computed once per lookup and stored in
//! the object; the table buckets by that hash and falls back to a byte
//! comparison, so lookups never allocate a temporary string.
//!
//! The interner holds one reference count per canonical string; tearing it
//! down releases them, freeing any string no longer held elsewhere.

use crate::string::{content_hash, StringRef};
use ahash::AHashMap;

#[derive(Default)]
pub struct StringInterner {
    /// Hash-keyed buckets; collisions resolved by byte comparison.
    table: AHashMap<u64, Vec<StringRef>>,
}

impl StringInterner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the canonical string for `bytes`, creating it on first use.
    pub fn intern(&mut self, bytes: &[u8]) -> StringRef {
        let hash = content_hash(bytes);
        let bucket = self.table.entry(hash).or_default();
        for existing in bucket.iter() {
            if existing.as_bytes() == bytes {
                return existing.clone();
            }
        }
        let created = StringRef::with_hash(bytes, hash);
        bucket.push(created.clone());
        created
    }

    /// Number of distinct interned strings.
    pub fn len(&self) -> usize {
        self.table.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equal_contents_share_one_object() {
        let mut interner = StringInterner::new();
        let a = interner.intern(b"hello");
        let b = interner.intern(b"hello");
        assert!(StringRef::ptr_eq(&a, &b));
        assert_eq!(interner.len(), 1);
    }

    #[test]
    fn test_distinct_contents_get_distinct_objects() {
        let mut interner = StringInterner::new();
        let a = interner.intern(b"one");
        let b = interner.intern(b"two");
        assert!(!StringRef::ptr_eq(&a, &b));
        assert_eq!(interner.len(), 2);
    }

    #[test]
    fn test_interner_holds_one_count() {
        let mut interner = StringInterner::new();
        let a = interner.intern(b"counted");
        // One count in the interner, one in `a`.
        assert_eq!(a.header().refcount(), 2);
        let b = interner.intern(b"counted");
        assert_eq!(a.header().refcount(), 3);
        drop(b);
        assert_eq!(a.header().refcount(), 2);
    }

    #[test]
    fn test_teardown_releases_interned_strings() {
        let mut interner = StringInterner::new();
        let a = interner.intern(b"survivor");
        drop(interner);
        // The outstanding handle keeps the object alive.
        assert_eq!(a.header().refcount(), 1);
        assert_eq!(a.as_bytes(), b"survivor");
    }

    #[test]
    fn test_hash_computed_once_and_stored() {
        let mut interner = StringInterner::new();
        let a = interner.intern(b"hashed");
        assert_eq!(a.hash(), content_hash(b"hashed"));
    }
}
