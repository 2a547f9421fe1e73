//! Paged structure-of-arrays table.
//!
//! Each page holds a small header followed by one densely packed run per
//! column:
//!
//! ```text
//! | live: u32 | version[0..columns]: u32 | pad | col 0 x cap | col 1 x cap | ...
//! ```
//!
//! Column 0 stores the owning entity index of each row; 0 marks an empty
//! slot. The per-page versions record the write-version of the last write
//! to each column on that page.

use std::fmt;

use smallvec::SmallVec;

use crate::{
    arena::{PAGE_SIZE, PagedArena},
    error::{EcsError, EcsResult},
};

/// Packed (page, slot) locator for a row within one table.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowCode(u32);

impl RowCode {
    /// Locator that addresses no row.
    pub const NONE: Self = Self(u32::MAX);

    const SLOT_BITS: u32 = 16;
    const SLOT_MASK: u32 = (1 << Self::SLOT_BITS) - 1;

    /// Number of addressable pages per table.
    pub const PAGE_LIMIT: usize = 1 << (u32::BITS - Self::SLOT_BITS);

    #[must_use]
    pub const fn new(page: usize, slot: usize) -> Self {
        debug_assert!(page < Self::PAGE_LIMIT, "page index out of range");
        debug_assert!(slot <= Self::SLOT_MASK as usize, "slot index out of range");
        Self(((page as u32) << Self::SLOT_BITS) | slot as u32)
    }

    #[must_use]
    pub const fn page(self) -> usize {
        (self.0 >> Self::SLOT_BITS) as usize
    }

    #[must_use]
    pub const fn slot(self) -> usize {
        (self.0 & Self::SLOT_MASK) as usize
    }

    #[must_use]
    pub const fn as_raw(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for RowCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Row({}:{})", self.page(), self.slot())
    }
}

/// Stride and in-page byte offset of one column.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ColumnLayout {
    pub size: usize,
    pub offset: usize,
}

/// Byte size of the entity-index column.
pub const ENTITY_COLUMN_SIZE: usize = size_of::<u32>();

/// Fixed-page columnar table.
pub struct PagedTable {
    arena: PagedArena,
    columns: SmallVec<[ColumnLayout; 8]>,
    page_capacity: usize,
    /// Rows handed out so far in the last page.
    tail: usize,
    /// Pages a row code can address.
    page_limit: usize,
}

impl PagedTable {
    /// Lay out a table for the given component sizes.
    ///
    /// Column 0 (entity index) is prepended automatically.
    pub fn new(sizes: &[usize]) -> EcsResult<Self> {
        let column_count = sizes.len() + 1;
        let header_size = Self::header_size(column_count);
        let stride: usize = ENTITY_COLUMN_SIZE + sizes.iter().sum::<usize>();
        let page_capacity = (PAGE_SIZE - header_size) / stride;
        if page_capacity == 0 {
            return Err(EcsError::InvalidArgument("row does not fit in a page"));
        }
        let page_capacity = page_capacity.min(RowCode::SLOT_MASK as usize);

        let mut columns = SmallVec::with_capacity(column_count);
        let mut offset = header_size;
        for size in std::iter::once(ENTITY_COLUMN_SIZE).chain(sizes.iter().copied()) {
            columns.push(ColumnLayout { size, offset });
            offset += size * page_capacity;
        }

        Ok(Self {
            arena: PagedArena::new(),
            columns,
            page_capacity,
            tail: 0,
            page_limit: RowCode::PAGE_LIMIT,
        })
    }

    const fn header_size(column_count: usize) -> usize {
        (size_of::<u32>() * (1 + column_count)).next_multiple_of(16)
    }

    /// Rows per page.
    #[must_use]
    pub const fn page_capacity(&self) -> usize {
        self.page_capacity
    }

    #[must_use]
    pub fn page_count(&self) -> usize {
        self.arena.len()
    }

    /// Number of table columns, including column 0.
    #[must_use]
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    #[must_use]
    pub fn column(&self, column: usize) -> ColumnLayout {
        self.columns[column]
    }

    /// Number of slots ever handed out on `page`.
    #[must_use]
    pub fn rows_in_page(&self, page: usize) -> usize {
        if page + 1 == self.arena.len() {
            self.tail
        } else {
            self.page_capacity
        }
    }

    /// Hand out a never-used slot, growing by one page when full.
    ///
    /// Fails with `OutOfMemory` once every addressable page is in use.
    pub fn push_row(&mut self) -> EcsResult<RowCode> {
        if self.arena.is_empty() || self.tail == self.page_capacity {
            if self.arena.len() >= self.page_limit {
                return Err(EcsError::OutOfMemory);
            }
            self.arena.push_page()?;
            self.tail = 0;
        }
        let code = RowCode::new(self.arena.len() - 1, self.tail);
        self.tail += 1;
        Ok(code)
    }

    // ---- page header -------------------------------------------------------

    fn header_word(&self, page: usize, word: usize) -> u32 {
        let bytes = &self.arena.page(page)[word * 4..word * 4 + 4];
        u32::from_ne_bytes(bytes.try_into().expect("4-byte header word"))
    }

    fn set_header_word(&mut self, page: usize, word: usize, value: u32) {
        self.arena.page_mut(page)[word * 4..word * 4 + 4].copy_from_slice(&value.to_ne_bytes());
    }

    /// Live rows on a page.
    #[must_use]
    pub fn live(&self, page: usize) -> u32 {
        self.header_word(page, 0)
    }

    pub fn inc_live(&mut self, page: usize) {
        let live = self.live(page);
        self.set_header_word(page, 0, live + 1);
    }

    pub fn dec_live(&mut self, page: usize) {
        let live = self.live(page);
        debug_assert!(live > 0, "live-row counter underflow");
        self.set_header_word(page, 0, live - 1);
    }

    /// Write-version of the last write to `column` on `page`.
    #[must_use]
    pub fn page_version(&self, page: usize, column: usize) -> u32 {
        self.header_word(page, 1 + column)
    }

    pub fn set_page_version(&mut self, page: usize, column: usize, version: u32) {
        self.set_header_word(page, 1 + column, version);
    }

    // ---- cells -------------------------------------------------------------

    /// Pointer to the first value of `column` on `page`.
    ///
    /// Valid for `page_capacity * size` bytes.
    #[must_use]
    pub fn column_ptr(&self, page: usize, column: usize) -> *mut u8 {
        let layout = self.columns[column];
        // SAFETY: offset + capacity * size lies within the page by construction
        unsafe { self.arena.page_ptr(page).add(layout.offset) }
    }

    /// Raw pointer to one cell.
    #[must_use]
    pub fn cell_ptr(&self, code: RowCode, column: usize) -> *mut u8 {
        debug_assert!(code.slot() < self.page_capacity);
        let size = self.columns[column].size;
        // SAFETY: slot < page_capacity keeps the cell inside the column run
        unsafe { self.column_ptr(code.page(), column).add(code.slot() * size) }
    }

    #[must_use]
    pub fn cell(&self, code: RowCode, column: usize) -> &[u8] {
        let size = self.columns[column].size;
        // SAFETY: cell is in bounds and borrowed through &self
        unsafe { std::slice::from_raw_parts(self.cell_ptr(code, column), size) }
    }

    #[must_use]
    pub fn cell_mut(&mut self, code: RowCode, column: usize) -> &mut [u8] {
        let size = self.columns[column].size;
        // SAFETY: cell is in bounds and borrowed through &mut self
        unsafe { std::slice::from_raw_parts_mut(self.cell_ptr(code, column), size) }
    }

    /// Entity index stored in column 0 (0 = empty slot).
    #[must_use]
    pub fn entity_at(&self, code: RowCode) -> u32 {
        u32::from_ne_bytes(self.cell(code, 0).try_into().expect("entity column is 4 bytes"))
    }

    pub fn set_entity_at(&mut self, code: RowCode, entity: u32) {
        self.cell_mut(code, 0).copy_from_slice(&entity.to_ne_bytes());
    }

    /// Zero every component column of a row.
    pub fn zero_row(&mut self, code: RowCode) {
        for column in 1..self.columns.len() {
            self.cell_mut(code, column).fill(0);
        }
    }
}

impl fmt::Debug for PagedTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PagedTable")
            .field("columns", &self.columns)
            .field("page_capacity", &self.page_capacity)
            .field("pages", &self.arena.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_code_packing() {
        let code = RowCode::new(3, 1234);
        assert_eq!(code.page(), 3);
        assert_eq!(code.slot(), 1234);
        assert_ne!(code, RowCode::NONE);
    }

    #[test]
    fn test_layout() {
        let table = PagedTable::new(&[4, 8]).unwrap();
        let header = 16;
        assert_eq!(table.page_capacity(), (PAGE_SIZE - header) / 16);
        assert_eq!(table.column_count(), 3);

        let cap = table.page_capacity();
        assert_eq!(table.column(0), ColumnLayout { size: 4, offset: header });
        assert_eq!(table.column(1), ColumnLayout { size: 4, offset: header + 4 * cap });
        assert_eq!(table.column(2), ColumnLayout { size: 8, offset: header + 8 * cap });
        assert!(table.column(2).offset + 8 * cap <= PAGE_SIZE);
    }

    #[test]
    fn test_oversized_row_rejected() {
        assert!(matches!(
            PagedTable::new(&[PAGE_SIZE]),
            Err(EcsError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_push_row_grows_pages() {
        let mut table = PagedTable::new(&[PAGE_SIZE / 4]).unwrap();
        let cap = table.page_capacity();
        assert!(cap >= 2);

        for i in 0..cap {
            let code = table.push_row().unwrap();
            assert_eq!(code, RowCode::new(0, i));
        }
        assert_eq!(table.page_count(), 1);

        let code = table.push_row().unwrap();
        assert_eq!(code, RowCode::new(1, 0));
        assert_eq!(table.page_count(), 2);
        assert_eq!(table.rows_in_page(0), cap);
        assert_eq!(table.rows_in_page(1), 1);
    }

    #[test]
    fn test_row_code_covers_every_page() {
        let last = RowCode::new(RowCode::PAGE_LIMIT - 1, 7);
        assert_eq!(last.page(), RowCode::PAGE_LIMIT - 1);
        assert_eq!(last.slot(), 7);
        assert_ne!(last, RowCode::NONE);
    }

    #[test]
    fn test_push_row_stops_at_page_limit() {
        let mut table = PagedTable::new(&[PAGE_SIZE / 2]).unwrap();
        assert_eq!(table.page_capacity(), 1);
        table.page_limit = 2;

        assert_eq!(table.push_row().unwrap(), RowCode::new(0, 0));
        assert_eq!(table.push_row().unwrap(), RowCode::new(1, 0));
        assert_eq!(table.push_row(), Err(EcsError::OutOfMemory));
        assert_eq!(table.page_count(), 2);
    }

    #[test]
    fn test_cells_and_header() {
        let mut table = PagedTable::new(&[4]).unwrap();
        let code = table.push_row().unwrap();

        table.set_entity_at(code, 9);
        table.cell_mut(code, 1).copy_from_slice(&7u32.to_ne_bytes());
        table.inc_live(0);
        table.set_page_version(0, 1, 5);

        assert_eq!(table.entity_at(code), 9);
        assert_eq!(table.cell(code, 1), &7u32.to_ne_bytes());
        assert_eq!(table.live(0), 1);
        assert_eq!(table.page_version(0, 1), 5);

        table.zero_row(code);
        assert_eq!(table.cell(code, 1), &[0; 4]);
        assert_eq!(table.entity_at(code), 9);
    }
}
