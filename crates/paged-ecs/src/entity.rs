//! Entity handles with generational indices.
//!
//! A handle packs a 32-bit generation and a 32-bit slot index into 64 bits.
//! Slots are recycled through a free list; freeing a slot bumps its
//! generation so outstanding handles stop validating.

use std::fmt;

use crate::{
    archetype::ArchetypeId,
    error::{EcsError, EcsResult},
    table::RowCode,
};

/// Generation counter to detect stale entity references.
/// Incremented each time an entity slot is recycled.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Generation(u32);

impl Generation {
    /// Create a new generation (starts at 0).
    #[must_use]
    pub const fn new() -> Self {
        Self(0)
    }

    /// Increment the generation counter.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }

    /// Get the raw generation value.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gen{}", self.0)
    }
}

/// Raw entity index into the entity registry.
pub type EntityId = u32;

/// Opaque handle to an entity: `(generation, index)`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Entity {
    id: EntityId,
    generation: Generation,
}

impl Entity {
    /// Slot 0, occupied by an entity created when the world is built.
    ///
    /// It never validates as a user entity and is never visited by queries.
    pub const SENTINEL: Entity = Entity {
        id: 0,
        generation: Generation(0),
    };

    /// Create a handle from an index and generation.
    #[must_use]
    pub const fn new(id: EntityId, generation: Generation) -> Self {
        Self { id, generation }
    }

    /// Get the entity's index.
    #[must_use]
    pub const fn id(self) -> EntityId {
        self.id
    }

    /// Get the entity's generation.
    #[must_use]
    pub const fn generation(self) -> Generation {
        self.generation
    }

    /// Pack into a single u64: generation in the high half, index in the low half.
    #[must_use]
    pub const fn to_bits(self) -> u64 {
        ((self.generation.0 as u64) << 32) | (self.id as u64)
    }

    /// Unpack from a u64 produced by [`Entity::to_bits`].
    #[must_use]
    pub const fn from_bits(bits: u64) -> Self {
        Self {
            id: bits as u32,
            generation: Generation((bits >> 32) as u32),
        }
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Entity({}v{})", self.id, self.generation.0)
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.id, self.generation.0)
    }
}

/// Location of an entity within archetype storage.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EntityLocation {
    /// Archetype holding the entity's row.
    pub archetype: ArchetypeId,
    /// Row within that archetype's table.
    pub row: RowCode,
}

/// Handle-to-storage mapping for every entity slot.
///
/// Parallel arrays indexed by entity index. Layer 0 means "no layer".
pub struct EntityRegistry {
    generations: Vec<Generation>,
    layers: Vec<u32>,
    locations: Vec<EntityLocation>,
    free_list: Vec<EntityId>,
    alive_count: u32,
    /// Slots an index can address.
    slot_limit: usize,
}

impl EntityRegistry {
    /// Create a registry with slot 0 reserved for [`Entity::SENTINEL`].
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let mut registry = Self {
            generations: Vec::with_capacity(capacity + 1),
            layers: Vec::with_capacity(capacity + 1),
            locations: Vec::with_capacity(capacity + 1),
            free_list: Vec::new(),
            alive_count: 1,
            slot_limit: EntityId::MAX as usize,
        };
        registry.push_slot();
        registry
    }

    /// Allocate a slot, reusing a freed one when available.
    ///
    /// Fails with `OutOfMemory` when every index is taken.
    pub fn create(&mut self) -> EcsResult<Entity> {
        let entity = if let Some(id) = self.free_list.pop() {
            let idx = id as usize;
            self.layers[idx] = 0;
            Entity::new(id, self.generations[idx])
        } else {
            let len = self.generations.len();
            if len >= self.slot_limit {
                return Err(EcsError::OutOfMemory);
            }
            let id = EntityId::try_from(len).map_err(|_| EcsError::OutOfMemory)?;
            self.push_slot();
            Entity::new(id, Generation::new())
        };
        self.alive_count += 1;
        Ok(entity)
    }

    fn push_slot(&mut self) {
        self.generations.push(Generation::new());
        self.layers.push(0);
        self.locations.push(EntityLocation {
            archetype: ArchetypeId::EMPTY,
            row: RowCode::NONE,
        });
    }

    /// Release a slot: bump its generation and return it to the free list.
    ///
    /// The caller must already have released the entity's archetype row.
    pub fn free(&mut self, id: EntityId) {
        let idx = id as usize;
        debug_assert!(idx != 0, "the sentinel slot is never freed");
        self.generations[idx] = self.generations[idx].next();
        self.layers[idx] = 0;
        self.locations[idx] = EntityLocation {
            archetype: ArchetypeId::EMPTY,
            row: RowCode::NONE,
        };
        self.free_list.push(id);
        self.alive_count -= 1;
    }

    /// Check a handle against the registry and return its slot index.
    pub fn validate(&self, entity: Entity) -> EcsResult<usize> {
        let idx = entity.id() as usize;
        if idx == 0 || idx >= self.generations.len() || self.generations[idx] != entity.generation()
        {
            return Err(EcsError::InvalidEntity(entity));
        }
        Ok(idx)
    }

    /// Check if a handle is live.
    #[must_use]
    pub fn is_alive(&self, entity: Entity) -> bool {
        self.validate(entity).is_ok()
    }

    /// Build the current handle for a live slot index.
    #[must_use]
    pub fn handle(&self, id: EntityId) -> Entity {
        Entity::new(id, self.generations[id as usize])
    }

    /// Storage location of a slot.
    #[must_use]
    pub fn location(&self, id: EntityId) -> EntityLocation {
        self.locations[id as usize]
    }

    pub fn set_location(&mut self, id: EntityId, location: EntityLocation) {
        self.locations[id as usize] = location;
    }

    /// Layer index of a slot (0 = none).
    #[must_use]
    pub fn layer(&self, id: EntityId) -> u32 {
        self.layers[id as usize]
    }

    pub fn set_layer(&mut self, id: EntityId, layer: u32) {
        self.layers[id as usize] = layer;
    }

    /// Number of live entities, excluding the sentinel.
    #[must_use]
    pub const fn alive_count(&self) -> u32 {
        self.alive_count - 1
    }

    /// Number of slots ever allocated, including the sentinel.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.generations.len()
    }
}

impl Default for EntityRegistry {
    fn default() -> Self {
        Self::with_capacity(0)
    }
}

impl fmt::Debug for EntityRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityRegistry")
            .field("alive", &self.alive_count())
            .field("slots", &self.generations.len())
            .field("free", &self.free_list.len())
            .finish()
    }
}
