//! The reference-counted string object.
//!
//! An `ObjString` is one heap block: the 16-byte object header, the
//! 64-bit content hash, the byte length, then the bytes themselves plus a
//! trailing NUL. [`StringRef`] is the owning handle; cloning increments the
//! reference count, dropping decrements it and frees the block at zero.
//!
//! The VM stores string references on its 32-bit operand stack as two
//! slots of raw pointer bits; [`StringRef::into_raw`] and
//! [`StringRef::from_raw`] transfer ownership of one count across that
//! boundary, and the `*_raw` helpers adjust counts for values that stay on
//! the stack.

use crate::object::{ObjHeader, ObjType};
use std::alloc::{self, Layout};
use std::borrow::Cow;
use std::hash::{BuildHasher, Hasher};
use std::mem;
use std::ptr::NonNull;

/// Content hash used for interning. Deterministic within a process.
pub fn content_hash(bytes: &[u8]) -> u64 {
    // Fixed seeds: the interner compares hashes computed at different
    // times, so the hasher must not be randomly keyed per instance.
    let state = ahash::RandomState::with_seeds(
        0x243F_6A88_85A3_08D3,
        0x1319_8A2E_0370_7344,
        0xA409_3822_299F_31D0,
        0x082E_FA98_EC4E_6C89,
    );
    let mut hasher = state.build_hasher();
    hasher.write(bytes);
    hasher.finish()
}

/// Header portion of a string object; the character bytes follow the
/// struct in the same allocation.
#[repr(C)]
pub struct ObjString {
    header: ObjHeader,
    hash: u64,
    len: u32,
}

impl ObjString {
    fn layout(len: u32) -> Layout {
        Layout::new::<ObjString>()
            .extend(Layout::array::<u8>(len as usize + 1).expect("string too large"))
            .expect("string too large")
            .0
            .pad_to_align()
    }
}

/// An owning handle to a reference-counted string object.
pub struct StringRef {
    ptr: NonNull<ObjString>,
}

impl StringRef {
    /// Allocates an uninitialized string block with refcount 1.
    fn allocate(len: u32) -> NonNull<ObjString> {
        let layout = ObjString::layout(len);
        // SAFETY: the layout is non-zero-sized (headers alone are 28+
        // bytes) and the block is initialized field by field below before
        // any read.
        unsafe {
            let raw = alloc::alloc(layout) as *mut ObjString;
            let Some(ptr) = NonNull::new(raw) else {
                alloc::handle_alloc_error(layout);
            };
            ptr.as_ptr().write(ObjString {
                header: ObjHeader::new(ObjType::String),
                hash: 0,
                len,
            });
            ptr
        }
    }

    unsafe fn chars_ptr(ptr: NonNull<ObjString>) -> *mut u8 {
        (ptr.as_ptr() as *mut u8).add(mem::size_of::<ObjString>())
    }

    /// Creates a new string with the given contents and a freshly
    /// computed content hash.
    pub fn new(bytes: &[u8]) -> StringRef {
        Self::with_hash(bytes, content_hash(bytes))
    }

    /// Creates a new string with a hash the caller already computed.
    pub fn with_hash(bytes: &[u8], hash: u64) -> StringRef {
        let len = u32::try_from(bytes.len()).expect("string too large");
        let ptr = Self::allocate(len);
        // SAFETY: `allocate` reserved len + 1 character bytes.
        unsafe {
            (*ptr.as_ptr()).hash = hash;
            let chars = Self::chars_ptr(ptr);
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), chars, bytes.len());
            *chars.add(bytes.len()) = 0;
        }
        StringRef { ptr }
    }

    /// Concatenates two strings into a fresh (uninterned) string.
    pub fn concat(a: &StringRef, b: &StringRef) -> StringRef {
        let mut bytes = Vec::with_capacity(a.len() + b.len());
        bytes.extend_from_slice(a.as_bytes());
        bytes.extend_from_slice(b.as_bytes());
        StringRef::new(&bytes)
    }

    pub fn header(&self) -> &ObjHeader {
        // SAFETY: the handle holds a reference count, so the block is live.
        unsafe { &(*self.ptr.as_ptr()).header }
    }

    pub fn hash(&self) -> u64 {
        unsafe { (*self.ptr.as_ptr()).hash }
    }

    pub fn len(&self) -> usize {
        unsafe { (*self.ptr.as_ptr()).len as usize }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        // SAFETY: `len` bytes were initialized at construction and never
        // change afterwards.
        unsafe { std::slice::from_raw_parts(Self::chars_ptr(self.ptr), self.len()) }
    }

    pub fn to_string_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.as_bytes())
    }

    /// True if both handles point at the same object.
    pub fn ptr_eq(a: &StringRef, b: &StringRef) -> bool {
        a.ptr == b.ptr
    }

    /// Transfers this handle's reference count into raw pointer bits for
    /// the operand stack.
    pub fn into_raw(self) -> u64 {
        let bits = self.ptr.as_ptr() as u64;
        mem::forget(self);
        bits
    }

    /// Reclaims ownership of one reference count from raw pointer bits.
    /// Returns `None` for a null reference.
    ///
    /// # Safety
    ///
    /// `bits` must be null or a pointer previously produced by
    /// [`StringRef::into_raw`] (or [`StringRef::incref_raw`]-adjusted
    /// copies of it) whose count covers this reclamation.
    pub unsafe fn from_raw(bits: u64) -> Option<StringRef> {
        NonNull::new(bits as *mut ObjString).map(|ptr| StringRef { ptr })
    }

    /// Increments the count behind raw pointer bits; a no-op for null.
    ///
    /// # Safety
    ///
    /// `bits` must be null or point at a live string object.
    pub unsafe fn incref_raw(bits: u64) {
        if let Some(ptr) = NonNull::new(bits as *mut ObjString) {
            (*ptr.as_ptr()).header.incref();
        }
    }

    /// Decrements the count behind raw pointer bits, freeing the object at
    /// zero; a no-op for null.
    ///
    /// # Safety
    ///
    /// `bits` must be null or point at a live string object with a count
    /// that covers this decrement.
    pub unsafe fn decref_raw(bits: u64) {
        if NonNull::new(bits as *mut ObjString).is_some() {
            drop(StringRef::from_raw(bits));
        }
    }
}

impl Clone for StringRef {
    fn clone(&self) -> Self {
        self.header().incref();
        StringRef { ptr: self.ptr }
    }
}

impl Drop for StringRef {
    fn drop(&mut self) {
        if self.header().decref() {
            let layout = ObjString::layout(self.len() as u32);
            // SAFETY: count reached zero; nobody else holds the block.
            unsafe { alloc::dealloc(self.ptr.as_ptr() as *mut u8, layout) };
        }
    }
}

impl PartialEq for StringRef {
    fn eq(&self, other: &Self) -> bool {
        StringRef::ptr_eq(self, other) || self.as_bytes() == other.as_bytes()
    }
}

impl Eq for StringRef {}

impl std::fmt::Debug for StringRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "StringRef({:?}, rc={})", self.to_string_lossy(), self.header().refcount())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_read() {
        let s = StringRef::new(b"hello");
        assert_eq!(s.as_bytes(), b"hello");
        assert_eq!(s.len(), 5);
        assert_eq!(s.hash(), content_hash(b"hello"));
        assert_eq!(s.header().refcount(), 1);
    }

    #[test]
    fn test_clone_and_drop_track_counts() {
        let s = StringRef::new(b"counted");
        let t = s.clone();
        assert_eq!(s.header().refcount(), 2);
        drop(t);
        assert_eq!(s.header().refcount(), 1);
    }

    #[test]
    fn test_concat() {
        let a = StringRef::new(b"foo");
        let b = StringRef::new(b"bar");
        let c = StringRef::concat(&a, &b);
        assert_eq!(c.as_bytes(), b"foobar");
        assert_eq!(c.header().refcount(), 1);
        assert_eq!(c.hash(), content_hash(b"foobar"));
    }

    #[test]
    fn test_raw_round_trip() {
        let s = StringRef::new(b"raw");
        let bits = s.clone().into_raw();
        assert_eq!(s.header().refcount(), 2);
        let back = unsafe { StringRef::from_raw(bits) }.unwrap();
        assert!(StringRef::ptr_eq(&s, &back));
        drop(back);
        assert_eq!(s.header().refcount(), 1);
    }

    #[test]
    fn test_null_raw_is_none() {
        assert!(unsafe { StringRef::from_raw(0) }.is_none());
        unsafe {
            StringRef::incref_raw(0);
            StringRef::decref_raw(0);
        }
    }

    #[test]
    fn test_raw_count_adjustment() {
        let s = StringRef::new(b"adjust");
        let bits = s.clone().into_raw();
        unsafe {
            StringRef::incref_raw(bits);
            assert_eq!(s.header().refcount(), 3);
            StringRef::decref_raw(bits);
            StringRef::decref_raw(bits);
        }
        assert_eq!(s.header().refcount(), 1);
    }

    #[test]
    fn test_empty_string() {
        let s = StringRef::new(b"");
        assert!(s.is_empty());
        assert_eq!(s.as_bytes(), b"");
    }

    #[test]
    fn test_content_equality() {
        let a = StringRef::new(b"same");
        let b = StringRef::new(b"same");
        assert!(!StringRef::ptr_eq(&a, &b));
        assert_eq!(a, b);
    }
}
