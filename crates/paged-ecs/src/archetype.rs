//! Archetype storage - paged tables of entities with identical component sets.
//!
//! Archetypes are created once per distinct (closed) component set and are
//! never destroyed. The registry keeps them in an append-only sequence,
//! which queries scan incrementally, plus a separately sorted index used
//! for deduplicating lookups.

use std::{cmp::Ordering, fmt};

use bitflags::bitflags;
use smallvec::SmallVec;
use tracing::{debug, trace};

use crate::{
    component::{ComponentId, ComponentRegistry},
    error::EcsResult,
    set::ComponentSet,
    table::{PagedTable, RowCode},
};

/// Stable index of an archetype in the registry.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArchetypeId(u32);

impl ArchetypeId {
    /// The empty archetype (no components).
    pub const EMPTY: Self = Self(0);

    /// Create an archetype ID from a raw value.
    #[must_use]
    pub const fn from_raw(id: u32) -> Self {
        Self(id)
    }

    /// Get the raw ID value.
    #[must_use]
    pub const fn as_raw(self) -> u32 {
        self.0
    }

    const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for ArchetypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ArchetypeId({})", self.0)
    }
}

bitflags! {
    /// Per-archetype summary of component lifecycle hooks.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct ArchetypeFlags: u8 {
        /// At least one component has an initializer.
        const HAS_INIT = 1 << 0;
        /// At least one component has a cleanup hook.
        const HAS_CLEANUP = 1 << 1;
    }
}

/// A table storing every entity with one exact component set.
///
/// Component column `i` (in set order) lives in table column `i + 1`;
/// table column 0 holds entity indices.
pub struct Archetype {
    id: ArchetypeId,
    components: ComponentSet,
    table: PagedTable,
    free_rows: Vec<RowCode>,
    flags: ArchetypeFlags,
    /// Write-version per component column.
    write_versions: SmallVec<[u32; 8]>,
    len: usize,
}

impl Archetype {
    /// Lay out an archetype for a closed component set.
    pub fn new(
        id: ArchetypeId,
        components: ComponentSet,
        registry: &ComponentRegistry,
    ) -> EcsResult<Self> {
        let mut flags = ArchetypeFlags::empty();
        let mut sizes: SmallVec<[usize; 8]> = SmallVec::with_capacity(components.len());
        for component in components.iter() {
            let info = registry.info(component);
            if info.on_init().is_some() {
                flags |= ArchetypeFlags::HAS_INIT;
            }
            if info.on_cleanup().is_some() {
                flags |= ArchetypeFlags::HAS_CLEANUP;
            }
            sizes.push(info.size());
        }
        let table = PagedTable::new(&sizes)?;

        Ok(Self {
            id,
            write_versions: SmallVec::from_elem(0, components.len()),
            components,
            table,
            free_rows: Vec::new(),
            flags,
            len: 0,
        })
    }

    /// Get the archetype ID.
    #[must_use]
    pub const fn id(&self) -> ArchetypeId {
        self.id
    }

    /// Get the component set of this archetype.
    #[must_use]
    pub const fn components(&self) -> &ComponentSet {
        &self.components
    }

    #[must_use]
    pub const fn flags(&self) -> ArchetypeFlags {
        self.flags
    }

    /// Check if this archetype contains a component.
    #[must_use]
    pub fn contains(&self, component: ComponentId) -> bool {
        self.components.contains(component)
    }

    /// Column index of a component within this archetype.
    #[must_use]
    pub fn column_index(&self, component: ComponentId) -> Option<usize> {
        self.components.order_of(component)
    }

    /// Number of live rows.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub const fn table(&self) -> &PagedTable {
        &self.table
    }

    #[must_use]
    pub fn page_count(&self) -> usize {
        self.table.page_count()
    }

    /// Take a row for `entity`, reusing freed rows before growing.
    ///
    /// The row's component columns are zeroed.
    pub fn allocate_code(&mut self, entity: u32) -> EcsResult<RowCode> {
        let code = match self.free_rows.pop() {
            Some(code) => code,
            None => self.table.push_row()?,
        };
        self.table.set_entity_at(code, entity);
        self.table.zero_row(code);
        self.table.inc_live(code.page());
        self.len += 1;
        Ok(code)
    }

    /// Release a row. The slot is marked empty but the page is not compacted.
    pub fn free_code(&mut self, code: RowCode) {
        debug_assert_ne!(self.table.entity_at(code), 0, "double free of {code:?}");
        self.table.set_entity_at(code, 0);
        self.table.dec_live(code.page());
        self.free_rows.push(code);
        self.len -= 1;
    }

    /// Entity index stored in a row (0 = empty).
    #[must_use]
    pub fn entity_at(&self, code: RowCode) -> u32 {
        self.table.entity_at(code)
    }

    /// Bytes of one component of one row.
    #[must_use]
    pub fn data(&self, code: RowCode, column: usize) -> &[u8] {
        self.table.cell(code, column + 1)
    }

    #[must_use]
    pub fn data_mut(&mut self, code: RowCode, column: usize) -> &mut [u8] {
        self.table.cell_mut(code, column + 1)
    }

    pub(crate) fn data_ptr(&self, code: RowCode, column: usize) -> *mut u8 {
        self.table.cell_ptr(code, column + 1)
    }

    pub(crate) fn column_ptr(&self, page: usize, column: usize) -> *mut u8 {
        self.table.column_ptr(page, column + 1)
    }

    pub(crate) fn column_size(&self, column: usize) -> usize {
        self.table.column(column + 1).size
    }

    /// Current write-version of a component column.
    #[must_use]
    pub fn write_version(&self, column: usize) -> u32 {
        self.write_versions[column]
    }

    /// Write-version of the last write to `column` on `page`.
    #[must_use]
    pub fn page_version(&self, page: usize, column: usize) -> u32 {
        self.table.page_version(page, column + 1)
    }

    /// Advance a column's write-version and return the new value.
    pub fn bump_version(&mut self, column: usize) -> u32 {
        let version = self.write_versions[column].wrapping_add(1);
        self.write_versions[column] = version;
        version
    }

    pub fn stamp_page(&mut self, page: usize, column: usize, version: u32) {
        self.table.set_page_version(page, column + 1, version);
    }

    /// Record a write to one column of one row.
    pub fn mark_written(&mut self, code: RowCode, column: usize) {
        let version = self.bump_version(column);
        self.stamp_page(code.page(), column, version);
    }

    /// Record a write to every column of the given rows.
    pub fn mark_rows_written(&mut self, codes: &[RowCode]) {
        for column in 0..self.components.len() {
            let version = self.bump_version(column);
            for code in codes {
                self.stamp_page(code.page(), column, version);
            }
        }
    }
}

impl fmt::Debug for Archetype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Archetype")
            .field("id", &self.id)
            .field("components", &self.components)
            .field("entity_count", &self.len)
            .field("pages", &self.table.page_count())
            .field("flags", &self.flags)
            .finish()
    }
}

/// Storage for all archetypes in a world.
pub struct ArchetypeRegistry {
    /// Append-only; an archetype's index is its id.
    archetypes: Vec<Archetype>,
    /// Ids ordered by component set, for lookup.
    sorted: Vec<ArchetypeId>,
}

impl Default for ArchetypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ArchetypeRegistry {
    /// Create storage holding only the empty archetype.
    #[must_use]
    pub fn new() -> Self {
        let empty = Archetype::new(
            ArchetypeId::EMPTY,
            ComponentSet::new(),
            &ComponentRegistry::new(),
        )
        .expect("the empty archetype always fits in a page");

        Self {
            archetypes: vec![empty],
            sorted: vec![ArchetypeId::EMPTY],
        }
    }

    fn search(&self, set: &ComponentSet) -> Result<usize, usize> {
        self.sorted
            .binary_search_by(|id| self.archetypes[id.index()].components.cmp(set))
    }

    /// Find or create the archetype for the closure of `set`.
    pub fn resolve(
        &mut self,
        mut set: ComponentSet,
        registry: &ComponentRegistry,
    ) -> EcsResult<ArchetypeId> {
        set.expand_required(registry);

        let pos = match self.search(&set) {
            Ok(pos) => return Ok(self.sorted[pos]),
            Err(pos) => pos,
        };

        let id = ArchetypeId(self.archetypes.len() as u32);
        let archetype = Archetype::new(id, set, registry)?;
        debug!(
            archetype = ?id,
            components = ?archetype.components,
            page_capacity = archetype.table.page_capacity(),
            "created archetype"
        );

        self.archetypes.push(archetype);
        self.sorted.insert(pos, id);
        Ok(id)
    }

    /// Find the archetype for an exact (already closed) set, if it exists.
    #[must_use]
    pub fn find(&self, set: &ComponentSet) -> Option<ArchetypeId> {
        self.search(set).ok().map(|pos| self.sorted[pos])
    }

    /// Get an archetype by ID.
    #[must_use]
    pub fn get(&self, id: ArchetypeId) -> Option<&Archetype> {
        self.archetypes.get(id.index())
    }

    /// Get a mutable archetype by ID.
    #[must_use]
    pub fn get_mut(&mut self, id: ArchetypeId) -> Option<&mut Archetype> {
        self.archetypes.get_mut(id.index())
    }

    /// Get the number of archetypes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.archetypes.len()
    }

    /// Check if storage is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        // Always has at least the empty archetype
        self.archetypes.len() <= 1
    }

    /// Iterate over all archetypes in creation order.
    pub fn iter(&self) -> impl Iterator<Item = &Archetype> {
        self.archetypes.iter()
    }

    /// Archetypes created at or after `start`, in creation order.
    pub fn iter_from(&self, start: usize) -> impl Iterator<Item = &Archetype> {
        self.archetypes.iter().skip(start)
    }

    /// Mutable access to two distinct archetypes.
    fn pair_mut(&mut self, a: ArchetypeId, b: ArchetypeId) -> (&mut Archetype, &mut Archetype) {
        let (a, b) = (a.index(), b.index());
        assert_ne!(a, b, "pair_mut needs two distinct archetypes");
        if a < b {
            let (lo, hi) = self.archetypes.split_at_mut(b);
            (&mut lo[a], &mut hi[0])
        } else {
            let (lo, hi) = self.archetypes.split_at_mut(a);
            (&mut hi[0], &mut lo[b])
        }
    }

    /// Move a row to another archetype, copying every shared column.
    ///
    /// Columns only in `from` are dropped; columns only in `to` are left
    /// zeroed. The old row is released. On error nothing has changed.
    pub fn migrate(
        &mut self,
        entity: u32,
        from: ArchetypeId,
        code: RowCode,
        to: ArchetypeId,
    ) -> EcsResult<RowCode> {
        let new_code = self.archetypes[to.index()].allocate_code(entity)?;
        self.move_row(from, code, to, new_code);
        Ok(new_code)
    }

    /// Second half of [`ArchetypeRegistry::migrate`]: copy shared columns into
    /// an already allocated row and release the old one.
    pub fn move_row(&mut self, from: ArchetypeId, code: RowCode, to: ArchetypeId, new_code: RowCode) {
        let (src, dst) = self.pair_mut(from, to);
        let shared = shared_columns(&src.components, &dst.components);
        for (i, j) in shared {
            dst.data_mut(new_code, j).copy_from_slice(src.data(code, i));
        }

        let entity = src.entity_at(code);
        src.free_code(code);
        trace!(entity, ?from, ?to, row = ?new_code, "migrated entity");
    }
}

/// Column pairs `(in a, in b)` for every component both sets contain.
fn shared_columns(a: &ComponentSet, b: &ComponentSet) -> SmallVec<[(usize, usize); 8]> {
    let (a, b) = (a.as_slice(), b.as_slice());
    let mut shared = SmallVec::new();
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            Ordering::Less => i += 1,
            Ordering::Greater => j += 1,
            Ordering::Equal => {
                shared.push((i, j));
                i += 1;
                j += 1;
            }
        }
    }
    shared
}

impl fmt::Debug for ArchetypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArchetypeRegistry")
            .field("archetype_count", &self.archetypes.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::ComponentDesc;

    fn registry() -> (ComponentRegistry, ComponentId, ComponentId, ComponentId) {
        let mut registry = ComponentRegistry::new();
        let a = registry.register(ComponentDesc::new("A", 4)).unwrap();
        let b = registry
            .register(ComponentDesc::new("B", 8).requires(&[a]))
            .unwrap();
        let c = registry
            .register(ComponentDesc::new("C", 2).on_cleanup(|_| {}))
            .unwrap();
        (registry, a, b, c)
    }

    #[test]
    fn test_resolve_deduplicates() {
        let (registry, a, b, c) = registry();
        let mut storage = ArchetypeRegistry::new();

        let arch1 = storage
            .resolve(ComponentSet::from_ids(&[a, c]), &registry)
            .unwrap();
        let arch2 = storage
            .resolve(ComponentSet::from_ids(&[c, a]), &registry)
            .unwrap();
        let arch3 = storage
            .resolve(ComponentSet::from_ids(&[b]), &registry)
            .unwrap();

        assert_eq!(arch1, arch2);
        assert_ne!(arch1, arch3);
        assert_eq!(storage.len(), 3);
    }

    #[test]
    fn test_resolve_closes_requirements() {
        let (registry, a, b, _) = registry();
        let mut storage = ArchetypeRegistry::new();

        let id = storage
            .resolve(ComponentSet::from_ids(&[b]), &registry)
            .unwrap();
        let arch = storage.get(id).unwrap();
        assert_eq!(arch.components(), &ComponentSet::from_ids(&[a, b]));

        // Resolving the closed set directly hits the same archetype.
        let again = storage
            .resolve(ComponentSet::from_ids(&[a, b]), &registry)
            .unwrap();
        assert_eq!(again, id);
    }

    #[test]
    fn test_sorted_index_stays_unique() {
        let (registry, a, b, c) = registry();
        let mut storage = ArchetypeRegistry::new();
        for ids in [&[c][..], &[a], &[a, c], &[b, c], &[a], &[c, b]] {
            storage
                .resolve(ComponentSet::from_ids(ids), &registry)
                .unwrap();
        }

        let sets: Vec<&ComponentSet> = storage
            .sorted
            .iter()
            .map(|id| storage.get(*id).unwrap().components())
            .collect();
        assert!(sets.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(sets.len(), storage.len());
        assert_eq!(storage.find(&ComponentSet::new()), Some(ArchetypeId::EMPTY));
    }

    #[test]
    fn test_flags() {
        let (registry, a, _, c) = registry();
        let mut storage = ArchetypeRegistry::new();
        let plain = storage
            .resolve(ComponentSet::from_ids(&[a]), &registry)
            .unwrap();
        let with_cleanup = storage
            .resolve(ComponentSet::from_ids(&[a, c]), &registry)
            .unwrap();

        assert!(storage.get(plain).unwrap().flags().is_empty());
        assert_eq!(
            storage.get(with_cleanup).unwrap().flags(),
            ArchetypeFlags::HAS_CLEANUP
        );
    }

    #[test]
    fn test_free_rows_reused() {
        let (registry, a, _, _) = registry();
        let mut storage = ArchetypeRegistry::new();
        let id = storage
            .resolve(ComponentSet::from_ids(&[a]), &registry)
            .unwrap();
        let arch = storage.get_mut(id).unwrap();

        let r1 = arch.allocate_code(1).unwrap();
        let r2 = arch.allocate_code(2).unwrap();
        arch.data_mut(r2, 0).copy_from_slice(&[9; 4]);
        arch.free_code(r2);
        assert_eq!(arch.entity_at(r2), 0);
        assert_eq!(arch.len(), 1);

        let r3 = arch.allocate_code(3).unwrap();
        assert_eq!(r3, r2);
        assert_ne!(r3, r1);
        assert_eq!(arch.data(r3, 0), &[0; 4]);
        assert_eq!(arch.table().live(0), 2);
        assert_eq!(arch.page_count(), 1);
    }

    #[test]
    fn test_migrate_copies_shared_columns() {
        let (registry, a, b, c) = registry();
        let mut storage = ArchetypeRegistry::new();
        let from = storage
            .resolve(ComponentSet::from_ids(&[a, c]), &registry)
            .unwrap();
        let to = storage
            .resolve(ComponentSet::from_ids(&[b]), &registry)
            .unwrap();

        let src = storage.get_mut(from).unwrap();
        let code = src.allocate_code(5).unwrap();
        src.data_mut(code, 0).copy_from_slice(&11u32.to_ne_bytes());
        src.data_mut(code, 1).copy_from_slice(&[1, 2]);

        let new_code = storage.migrate(5, from, code, to).unwrap();

        let dst = storage.get(to).unwrap();
        assert_eq!(dst.entity_at(new_code), 5);
        assert_eq!(dst.data(new_code, 0), &11u32.to_ne_bytes());
        assert_eq!(dst.data(new_code, 1), &[0; 8]);
        assert!(storage.get(from).unwrap().is_empty());
    }

    #[test]
    fn test_write_versions() {
        let (registry, a, _, c) = registry();
        let mut storage = ArchetypeRegistry::new();
        let id = storage
            .resolve(ComponentSet::from_ids(&[a, c]), &registry)
            .unwrap();
        let arch = storage.get_mut(id).unwrap();
        let code = arch.allocate_code(1).unwrap();

        arch.mark_written(code, 1);
        assert_eq!(arch.write_version(0), 0);
        assert_eq!(arch.write_version(1), 1);
        assert_eq!(arch.page_version(0, 1), 1);

        arch.mark_rows_written(&[code]);
        assert_eq!(arch.write_version(0), 1);
        assert_eq!(arch.write_version(1), 2);
        assert_eq!(arch.page_version(0, 0), 1);
    }
}
