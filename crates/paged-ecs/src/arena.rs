//! Paged arena - fixed-size, zero-initialized memory pages.
//!
//! Pages never move once allocated, so a (page, offset) pair stays valid
//! for the lifetime of the arena. Allocation failure is reported, not
//! aborted on.

use std::{alloc::Layout, fmt, ptr::NonNull};

use tracing::trace;

use crate::error::{EcsError, EcsResult};

/// Size of every page, in bytes.
pub const PAGE_SIZE: usize = 64 * 1024;

/// Alignment of every page.
pub const PAGE_ALIGN: usize = 64;

/// A single zero-initialized page.
struct Page {
    data: NonNull<u8>,
}

// SAFETY: a page exclusively owns its allocation and holds plain bytes.
unsafe impl Send for Page {}
unsafe impl Sync for Page {}

impl Page {
    const fn layout() -> Layout {
        // SAFETY: PAGE_ALIGN is a power of two and PAGE_SIZE is a multiple of it
        unsafe { Layout::from_size_align_unchecked(PAGE_SIZE, PAGE_ALIGN) }
    }

    fn allocate() -> EcsResult<Self> {
        // SAFETY: layout is non-zero
        let ptr = unsafe { std::alloc::alloc_zeroed(Self::layout()) };
        let data = NonNull::new(ptr).ok_or(EcsError::OutOfMemory)?;
        Ok(Self { data })
    }
}

impl Drop for Page {
    fn drop(&mut self) {
        // SAFETY: data was allocated with this layout
        unsafe { std::alloc::dealloc(self.data.as_ptr(), Self::layout()) };
    }
}

/// Growable collection of fixed-size pages.
#[derive(Default)]
pub struct PagedArena {
    pages: Vec<Page>,
}

impl PagedArena {
    #[must_use]
    pub const fn new() -> Self {
        Self { pages: Vec::new() }
    }

    /// Allocate one more zeroed page and return its index.
    pub fn push_page(&mut self) -> EcsResult<usize> {
        self.pages.try_reserve(1).map_err(|_| EcsError::OutOfMemory)?;
        let page = Page::allocate()?;
        self.pages.push(page);
        trace!(pages = self.pages.len(), "allocated page");
        Ok(self.pages.len() - 1)
    }

    /// Number of allocated pages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Base pointer of a page.
    ///
    /// The pointer is valid for `PAGE_SIZE` bytes while the arena is alive.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    #[must_use]
    pub fn page_ptr(&self, index: usize) -> *mut u8 {
        self.pages[index].data.as_ptr()
    }

    /// Bytes of a page.
    #[must_use]
    pub fn page(&self, index: usize) -> &[u8] {
        // SAFETY: page is valid for PAGE_SIZE bytes and borrowed through &self
        unsafe { std::slice::from_raw_parts(self.page_ptr(index), PAGE_SIZE) }
    }

    /// Mutable bytes of a page.
    #[must_use]
    pub fn page_mut(&mut self, index: usize) -> &mut [u8] {
        // SAFETY: page is valid for PAGE_SIZE bytes and borrowed through &mut self
        unsafe { std::slice::from_raw_parts_mut(self.page_ptr(index), PAGE_SIZE) }
    }
}

impl fmt::Debug for PagedArena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PagedArena")
            .field("pages", &self.pages.len())
            .field("bytes", &(self.pages.len() * PAGE_SIZE))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pages_zeroed_and_aligned() {
        let mut arena = PagedArena::new();
        assert!(arena.is_empty());

        let idx = arena.push_page().unwrap();
        assert_eq!(idx, 0);
        assert_eq!(arena.len(), 1);
        assert_eq!(arena.page_ptr(0) as usize % PAGE_ALIGN, 0);
        assert!(arena.page(0).iter().all(|&b| b == 0));
    }

    #[test]
    fn test_pages_do_not_move() {
        let mut arena = PagedArena::new();
        arena.push_page().unwrap();
        arena.page_mut(0)[17] = 42;
        let first = arena.page_ptr(0);

        for _ in 0..8 {
            arena.push_page().unwrap();
        }

        assert_eq!(arena.page_ptr(0), first);
        assert_eq!(arena.page(0)[17], 42);
    }
}
