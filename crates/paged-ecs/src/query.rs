//! Incremental queries with write-version change detection.
//!
//! A query declares the columns it writes and reads, plus filters. On each
//! execution it first scans archetypes created since its last run (the
//! registry is append-only, so a watermark suffices), then streams every
//! live row of every matching archetype to a callback.
//!
//! # Basic Usage
//!
//! ```ignore
//! let mut query = world.query()
//!     .write(position)
//!     .read(velocity)
//!     .without(frozen)
//!     .build()?;
//!
//! query.execute(&mut world, |row| {
//!     let vel: Velocity = row.get(1).unwrap();
//!     let mut pos: Position = row.get(0).unwrap();
//!     pos.x += vel.x;
//!     row.set(0, &pos);
//! })?;
//! ```
//!
//! # Change detection
//!
//! `modified(c)` restricts a query to archetypes and pages whose column `c`
//! was written since the query last looked. Detection is coarse: a touched
//! page is visited in full, including rows that did not change.
//!
//! # Reentrancy
//!
//! The callback only sees a [`QueryRow`]; the world stays mutably borrowed
//! for the whole execution, so structural changes must be buffered and
//! applied afterwards.

use std::{fmt, marker::PhantomData};

use hashbrown::HashMap;
use rustc_hash::FxBuildHasher;
use smallvec::SmallVec;
use tracing::debug;

use crate::{
    World,
    archetype::{Archetype, ArchetypeId, ArchetypeRegistry},
    component::{ComponentId, ComponentRegistry},
    entity::{Entity, EntityRegistry},
    error::{EcsError, EcsResult},
    layer::LayerId,
    set::ComponentSet,
    table::RowCode,
};

// ============================================================================
// Terms and filters
// ============================================================================

/// How a filter constrains matching.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterKind {
    /// A write/read term may be absent; its column is `None` when it is.
    Optional,
    /// Entity must NOT have the component.
    Exclude,
    /// Only visit archetypes/pages where the component was written since
    /// the last execution. Implies the component is present.
    Modified,
}

/// A filter on one component.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueryFilter {
    pub component: ComponentId,
    pub kind: FilterKind,
}

impl QueryFilter {
    #[must_use]
    pub const fn new(component: ComponentId, kind: FilterKind) -> Self {
        Self { component, kind }
    }
}

// ============================================================================
// QueryBuilder
// ============================================================================

/// Builder for a [`Query`].
pub struct QueryBuilder<'w> {
    world: &'w World,
    write: SmallVec<[ComponentId; 8]>,
    read: SmallVec<[ComponentId; 8]>,
    filters: SmallVec<[QueryFilter; 4]>,
}

impl<'w> QueryBuilder<'w> {
    /// Create a new query builder.
    pub fn new(world: &'w World) -> Self {
        Self {
            world,
            write: SmallVec::new(),
            read: SmallVec::new(),
            filters: SmallVec::new(),
        }
    }

    /// Add a column the callback may modify.
    #[must_use]
    pub fn write(mut self, component: ComponentId) -> Self {
        self.write.push(component);
        self
    }

    /// Add a read-only column.
    #[must_use]
    pub fn read(mut self, component: ComponentId) -> Self {
        self.read.push(component);
        self
    }

    /// Mark a write/read column as optional.
    #[must_use]
    pub fn optional(self, component: ComponentId) -> Self {
        self.filter(QueryFilter::new(component, FilterKind::Optional))
    }

    /// Exclude entities that have this component.
    #[must_use]
    pub fn without(self, component: ComponentId) -> Self {
        self.filter(QueryFilter::new(component, FilterKind::Exclude))
    }

    /// Only visit data whose component was written since the last run.
    #[must_use]
    pub fn modified(self, component: ComponentId) -> Self {
        self.filter(QueryFilter::new(component, FilterKind::Modified))
    }

    #[must_use]
    pub fn filter(mut self, filter: QueryFilter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Validate the declaration and build the query.
    pub fn build(self) -> EcsResult<Query> {
        self.world
            .create_query(&self.write, &self.read, &self.filters)
    }
}

// ============================================================================
// Query
// ============================================================================

/// Change-detection snapshot of one archetype for one execution scope.
#[derive(Debug)]
struct Snapshot {
    /// Archetype write-versions of the watched columns at the end of the last run.
    seen: SmallVec<[u32; 4]>,
    /// Page write-versions of the watched columns when each page was last visited.
    page_seen: Vec<SmallVec<[u32; 4]>>,
}

impl Snapshot {
    fn new(watched: usize) -> Self {
        Self {
            seen: SmallVec::from_elem(0, watched),
            page_seen: Vec::new(),
        }
    }

    fn unchanged(&self, archetype: &Archetype, watched: &[usize]) -> bool {
        watched
            .iter()
            .zip(&self.seen)
            .all(|(&c, &seen)| archetype.write_version(c) == seen)
    }

    fn page_unchanged(&self, archetype: &Archetype, page: usize, watched: &[usize]) -> bool {
        self.page_seen.get(page).is_some_and(|seen| {
            watched
                .iter()
                .zip(seen)
                .all(|(&c, &seen)| archetype.page_version(page, c) == seen)
        })
    }

    fn record_page(&mut self, archetype: &Archetype, page: usize, watched: &[usize]) {
        if self.page_seen.len() <= page {
            self.page_seen
                .resize(page + 1, SmallVec::from_elem(0, watched.len()));
        }
        for (slot, &c) in self.page_seen[page].iter_mut().zip(watched) {
            *slot = archetype.page_version(page, c);
        }
    }

    fn record(&mut self, archetype: &Archetype, watched: &[usize]) {
        for (slot, &c) in self.seen.iter_mut().zip(watched) {
            *slot = archetype.write_version(c);
        }
    }
}

/// Per-query cache for one matching archetype.
#[derive(Debug)]
struct MatchedArchetype {
    id: ArchetypeId,
    /// Archetype column for each term; `None` for an absent optional term.
    columns: SmallVec<[Option<usize>; 8]>,
    /// Archetype columns of present write terms.
    write_columns: SmallVec<[usize; 4]>,
    /// Archetype columns of modified-watched components.
    modified: SmallVec<[usize; 4]>,
    /// Snapshots keyed by layer scope; `None` is the unscoped execution.
    snapshots: HashMap<Option<u32>, Snapshot, FxBuildHasher>,
}

/// A compiled query.
///
/// Owns its per-archetype caches; dropping it releases them. A query may
/// only be executed against the world that built it.
pub struct Query {
    world_id: u64,
    /// Write terms followed by read terms.
    terms: SmallVec<[ComponentId; 8]>,
    write_count: usize,
    require: ComponentSet,
    exclude: ComponentSet,
    modified: ComponentSet,
    matched: Vec<MatchedArchetype>,
    /// Number of archetypes already scanned.
    scanned: usize,
}

impl Query {
    pub(crate) fn new(
        world_id: u64,
        registry: &ComponentRegistry,
        write: &[ComponentId],
        read: &[ComponentId],
        filters: &[QueryFilter],
    ) -> EcsResult<Self> {
        let mut terms: SmallVec<[ComponentId; 8]> = SmallVec::with_capacity(write.len() + read.len());
        for &component in write.iter().chain(read) {
            registry.check(component)?;
            if terms.contains(&component) {
                return Err(EcsError::InvalidArgument("component listed twice in query"));
            }
            terms.push(component);
        }
        let term_set = ComponentSet::from_ids(&terms);

        let mut optional = ComponentSet::new();
        let mut exclude = ComponentSet::new();
        let mut modified = ComponentSet::new();
        for filter in filters {
            registry.check(filter.component)?;
            match filter.kind {
                FilterKind::Optional => {
                    if !term_set.contains(filter.component) {
                        return Err(EcsError::InvalidArgument(
                            "optional filter on a component the query does not access",
                        ));
                    }
                    optional.insert(filter.component);
                }
                FilterKind::Exclude => {
                    exclude.insert(filter.component);
                }
                FilterKind::Modified => {
                    modified.insert(filter.component);
                }
            }
        }

        if term_set.intersects(&exclude) || modified.intersects(&exclude) {
            return Err(EcsError::InvalidArgument("component both required and excluded"));
        }
        if modified.intersects(&optional) {
            return Err(EcsError::InvalidArgument("modified filter on an optional component"));
        }

        let require: ComponentSet = term_set
            .iter()
            .filter(|&c| !optional.contains(c))
            .collect::<ComponentSet>()
            .union(&modified);

        debug!(
            terms = ?terms,
            writes = write.len(),
            ?require,
            ?exclude,
            ?modified,
            "created query"
        );

        Ok(Self {
            world_id,
            terms,
            write_count: write.len(),
            require,
            exclude,
            modified,
            matched: Vec::new(),
            scanned: 0,
        })
    }

    /// Terms in callback order: writes, then reads.
    #[must_use]
    pub fn terms(&self) -> &[ComponentId] {
        &self.terms
    }

    /// Number of leading write terms.
    #[must_use]
    pub const fn write_count(&self) -> usize {
        self.write_count
    }

    /// Components every matching archetype must have.
    #[must_use]
    pub const fn required(&self) -> &ComponentSet {
        &self.require
    }

    #[must_use]
    pub const fn excluded(&self) -> &ComponentSet {
        &self.exclude
    }

    /// Get the number of matching archetypes discovered so far.
    #[must_use]
    pub fn archetype_count(&self) -> usize {
        self.matched.len()
    }

    /// Ids of the matching archetypes discovered so far.
    pub fn matched_archetypes(&self) -> impl Iterator<Item = ArchetypeId> + '_ {
        self.matched.iter().map(|m| m.id)
    }

    /// Pick up archetypes created since the last scan.
    fn discover(&mut self, archetypes: &ArchetypeRegistry) {
        for archetype in archetypes.iter_from(self.scanned) {
            let components = archetype.components();
            if !self.require.is_subset(components) || self.exclude.intersects(components) {
                continue;
            }

            let columns: SmallVec<[Option<usize>; 8]> = self
                .terms
                .iter()
                .map(|&c| archetype.column_index(c))
                .collect();
            let write_columns = columns[..self.write_count].iter().flatten().copied().collect();
            let modified: SmallVec<[usize; 4]> = self
                .modified
                .iter()
                .map(|c| {
                    archetype
                        .column_index(c)
                        .expect("modified components are required")
                })
                .collect();

            self.matched.push(MatchedArchetype {
                id: archetype.id(),
                columns,
                write_columns,
                modified,
                snapshots: HashMap::default(),
            });
        }
        self.scanned = archetypes.len();
    }

    /// Run the query over every matching row. Returns the number of rows visited.
    pub fn execute<F>(&mut self, world: &mut World, f: F) -> EcsResult<usize>
    where
        F: FnMut(&mut QueryRow<'_>),
    {
        self.run(world, None, f)
    }

    /// Like [`Query::execute`], restricted to entities assigned to `layer`.
    ///
    /// `modified` filters keep a separate snapshot per layer, so running the
    /// query for one layer never hides changes from another.
    pub fn execute_in_layer<F>(&mut self, world: &mut World, layer: LayerId, f: F) -> EcsResult<usize>
    where
        F: FnMut(&mut QueryRow<'_>),
    {
        let index = world.layers().validate(layer)?;
        self.run(world, Some(index), f)
    }

    fn run<F>(&mut self, world: &mut World, layer: Option<u32>, mut f: F) -> EcsResult<usize>
    where
        F: FnMut(&mut QueryRow<'_>),
    {
        if world.id() != self.world_id {
            return Err(EcsError::InvalidArgument("query belongs to another world"));
        }
        let (archetypes, entities) = world.query_parts();
        self.discover(archetypes);

        let mut visited = 0;
        for matched in &mut self.matched {
            let MatchedArchetype {
                id,
                columns,
                write_columns,
                modified,
                snapshots,
            } = matched;
            let columns: &[Option<usize>] = columns;
            let write_columns: &[usize] = write_columns;
            let modified: &[usize] = modified;
            let archetype = archetypes
                .get_mut(*id)
                .expect("matched archetypes are never destroyed");
            if archetype.is_empty() {
                continue;
            }
            // Each layer scope sees only its own rows, so it keeps its own snapshot.
            let mut snapshot = if modified.is_empty() {
                None
            } else {
                Some(
                    snapshots
                        .entry(layer)
                        .or_insert_with(|| Snapshot::new(modified.len())),
                )
            };
            if snapshot
                .as_deref()
                .is_some_and(|s| s.unchanged(archetype, modified))
            {
                continue;
            }

            // Bumped lazily, once per archetype per execution.
            let mut stamps: Option<SmallVec<[(usize, u32); 4]>> = None;
            for page in 0..archetype.page_count() {
                if archetype.table().live(page) == 0 {
                    continue;
                }
                if snapshot
                    .as_deref()
                    .is_some_and(|s| s.page_unchanged(archetype, page, modified))
                {
                    continue;
                }

                let stamps = stamps.get_or_insert_with(|| {
                    write_columns
                        .iter()
                        .map(|&c| (c, archetype.bump_version(c)))
                        .collect()
                });
                for &(c, version) in stamps.iter() {
                    archetype.stamp_page(page, c, version);
                }
                if let Some(s) = snapshot.as_deref_mut() {
                    s.record_page(archetype, page, modified);
                }

                visited += scan_page(
                    archetype,
                    page,
                    columns,
                    self.write_count,
                    entities,
                    layer,
                    &mut f,
                );
            }

            if let Some(s) = snapshot {
                s.record(archetype, modified);
            }
        }
        Ok(visited)
    }
}

/// Stream the live rows of one page to `f`.
fn scan_page<F>(
    archetype: &Archetype,
    page: usize,
    columns: &[Option<usize>],
    write_count: usize,
    entities: &EntityRegistry,
    layer: Option<u32>,
    f: &mut F,
) -> usize
where
    F: FnMut(&mut QueryRow<'_>),
{
    let mut cursors: SmallVec<[Option<(*mut u8, usize)>; 8]> = columns
        .iter()
        .map(|c| c.map(|c| (archetype.column_ptr(page, c), archetype.column_size(c))))
        .collect();

    let mut visited = 0;
    for slot in 0..archetype.table().rows_in_page(page) {
        let id = archetype.entity_at(RowCode::new(page, slot));
        let wanted = id != 0 && layer.is_none_or(|l| entities.layer(id) == l);

        if wanted {
            let mut row = QueryRow {
                entity: entities.handle(id),
                cells: &cursors,
                write_count,
                _marker: PhantomData,
            };
            f(&mut row);
            visited += 1;
        }

        for (ptr, size) in cursors.iter_mut().flatten() {
            // SAFETY: stays within the column run (at most one past the last slot)
            *ptr = unsafe { ptr.add(*size) };
        }
    }
    visited
}

impl fmt::Debug for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("terms", &self.terms)
            .field("write_count", &self.write_count)
            .field("require", &self.require)
            .field("exclude", &self.exclude)
            .field("modified", &self.modified)
            .field("matching_archetypes", &self.matched.len())
            .finish()
    }
}

// ============================================================================
// QueryRow
// ============================================================================

/// One live row handed to a query callback.
///
/// Term `i` follows the query declaration: write terms first, then read
/// terms. Only write terms can be borrowed mutably.
pub struct QueryRow<'a> {
    entity: Entity,
    cells: &'a [Option<(*mut u8, usize)>],
    write_count: usize,
    _marker: PhantomData<&'a mut [u8]>,
}

impl QueryRow<'_> {
    /// The entity owning this row.
    #[must_use]
    pub const fn entity(&self) -> Entity {
        self.entity
    }

    /// Number of terms.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Bytes of term `term`, or `None` if it is an absent optional term.
    #[must_use]
    pub fn column(&self, term: usize) -> Option<&[u8]> {
        let (ptr, size) = (*self.cells.get(term)?)?;
        // SAFETY: ptr addresses `size` live bytes of this row; terms are distinct columns
        Some(unsafe { std::slice::from_raw_parts(ptr, size) })
    }

    /// Mutable bytes of write term `term`.
    ///
    /// Returns `None` for read terms and absent optional terms.
    #[must_use]
    pub fn column_mut(&mut self, term: usize) -> Option<&mut [u8]> {
        if term >= self.write_count {
            return None;
        }
        let (ptr, size) = (*self.cells.get(term)?)?;
        // SAFETY: as for `column`, and `&mut self` prevents a second borrow
        Some(unsafe { std::slice::from_raw_parts_mut(ptr, size) })
    }

    /// Copy term `term` out as a `T`.
    #[must_use]
    pub fn get<T: bytemuck::Pod>(&self, term: usize) -> Option<T> {
        let bytes = self.column(term)?;
        (bytes.len() == size_of::<T>()).then(|| bytemuck::pod_read_unaligned(bytes))
    }

    /// Overwrite write term `term` with `value`. Returns `false` if not writable.
    pub fn set<T: bytemuck::Pod>(&mut self, term: usize, value: &T) -> bool {
        match self.column_mut(term) {
            Some(bytes) if bytes.len() == size_of::<T>() => {
                bytes.copy_from_slice(bytemuck::bytes_of(value));
                true
            }
            _ => false,
        }
    }
}

impl fmt::Debug for QueryRow<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryRow")
            .field("entity", &self.entity)
            .field("terms", &self.cells.len())
            .finish()
    }
}
