// Allow unsafe code in ECS - necessary for low-level page storage
#![allow(unsafe_code)]
// Allow missing docs for now
#![allow(missing_docs)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_safety_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_fields_in_debug)]
#![allow(clippy::manual_let_else)]
#![allow(clippy::ptr_as_ptr)]
#![allow(clippy::ref_as_ptr)]
#![allow(clippy::cast_ptr_alignment)]
#![allow(clippy::float_cmp)]

//! Paged ECS - Archetype-based Entity Component System with paged columnar storage
//!
//! Built for per-frame simulation: entities with identical component sets
//! share one archetype, stored as fixed 64 KiB pages of packed columns.
//! Queries discover archetypes incrementally and skip unchanged data.
//!
//! # Key Concepts
//!
//! - **Entity**: A generational handle to a slot in the world
//! - **Component**: A fixed-size byte blob with an optional schema (requirements, hooks)
//! - **Archetype**: A unique closed combination of components, one table each
//! - **Layer**: An optional partition of entities independent of archetypes
//! - **Query**: Write/read columns plus optional/exclude/modified filters
//!
//! # Access Patterns
//!
//! The core is untyped (`read`/`write` return byte slices). A thin typed
//! layer works with any [`bytemuck::Pod`] type:
//! - `get<T>()` - Returns an owned copy of `T`
//! - `set<T>()` - Overwrite an existing component
//! - `insert<T>()` - Add new component
//! - `remove<T>()` - Remove and return component
//!
//! # Example
//!
//! ```ignore
//! let mut world = World::new();
//! let pos = world.register::<Position>(ComponentDesc::of::<Position>())?;
//!
//! let mut buffer = ComponentBuffer::of::<Position>();
//! buffer.push(&Position { x: 0.0, y: 0.0 })?;
//! let entities = world.spawn(None, 1, &[SpawnData::from_buffer(pos, &buffer)])?;
//!
//! let mut query = world.query().write(pos).build()?;
//! query.execute(&mut world, |row| {
//!     let mut p: Position = row.get(0).unwrap();
//!     p.x += 1.0;
//!     row.set(0, &p);
//! })?;
//! ```

mod archetype;
mod arena;
mod buffer;
mod component;
mod entity;
mod error;
mod layer;
mod query;
mod set;
mod table;
mod world;

pub use archetype::{Archetype, ArchetypeFlags, ArchetypeId, ArchetypeRegistry};
pub use arena::{PAGE_ALIGN, PAGE_SIZE, PagedArena};
pub use buffer::ComponentBuffer;
pub use component::{ComponentDesc, ComponentHook, ComponentId, ComponentInfo, ComponentRegistry};
pub use entity::{Entity, EntityId, EntityLocation, Generation};
pub use error::{EcsError, EcsResult};
pub use layer::{DEFAULT_SORT_THRESHOLD, Layer, LayerId, LayerRegistry};
pub use query::{FilterKind, Query, QueryBuilder, QueryFilter, QueryRow};
pub use set::ComponentSet;
pub use table::{PagedTable, RowCode};
pub use world::{SpawnData, World, WorldConfig};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        ComponentBuffer, ComponentDesc, ComponentId, EcsError, EcsResult, Entity, FilterKind,
        LayerId, Query, QueryFilter, QueryRow, SpawnData, World,
    };
}
