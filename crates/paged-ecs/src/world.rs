//! World - the main container for all ECS data.
//!
//! The World owns the component, archetype, entity and layer registries and
//! provides the primary API for spawning entities, adding/removing
//! components, reading/writing component bytes and building queries.
//!
//! Entity slot 0 is taken by [`Entity::SENTINEL`] when the world is built.
//! It has no archetype row and never validates.

use std::sync::atomic::{AtomicU64, Ordering};

use smallvec::SmallVec;
use tracing::trace;

use crate::{
    archetype::{Archetype, ArchetypeFlags, ArchetypeId, ArchetypeRegistry},
    buffer::ComponentBuffer,
    component::{ComponentDesc, ComponentHook, ComponentId, ComponentInfo, ComponentRegistry},
    entity::{Entity, EntityLocation, EntityRegistry},
    error::{EcsError, EcsResult},
    layer::{DEFAULT_SORT_THRESHOLD, LayerId, LayerRegistry},
    query::{Query, QueryBuilder, QueryFilter},
    set::ComponentSet,
    table::RowCode,
};

static NEXT_WORLD_ID: AtomicU64 = AtomicU64::new(1);

/// World construction options.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WorldConfig {
    /// Entity slots reserved up front.
    pub entity_capacity: usize,
    /// Layer population at which removal switches to sorted search + swap-remove.
    pub layer_sort_threshold: usize,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            entity_capacity: 0,
            layer_sort_threshold: DEFAULT_SORT_THRESHOLD,
        }
    }
}

/// Caller data for one component of a bulk spawn.
///
/// Element `i` of the spawn starts at `data[i * stride]`; the stride
/// defaults to the component's size.
#[derive(Clone, Copy, Debug)]
pub struct SpawnData<'a> {
    pub component: ComponentId,
    pub data: &'a [u8],
    pub stride: Option<usize>,
}

impl<'a> SpawnData<'a> {
    #[must_use]
    pub const fn new(component: ComponentId, data: &'a [u8]) -> Self {
        Self {
            component,
            data,
            stride: None,
        }
    }

    #[must_use]
    pub const fn with_stride(mut self, stride: usize) -> Self {
        self.stride = Some(stride);
        self
    }

    /// Spawn data staged in a [`ComponentBuffer`].
    #[must_use]
    pub fn from_buffer(component: ComponentId, buffer: &'a ComponentBuffer) -> Self {
        Self::new(component, buffer.as_bytes()).with_stride(buffer.stride())
    }
}

type HookSelect = fn(&ComponentInfo) -> Option<&ComponentHook>;

/// The ECS world - container for all entities and components.
pub struct World {
    /// Process-unique id, checked by queries.
    id: u64,
    /// Component schema registry.
    components: ComponentRegistry,
    /// Archetype storage.
    archetypes: ArchetypeRegistry,
    /// Entity handles and locations.
    entities: EntityRegistry,
    layers: LayerRegistry,
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl World {
    /// Create a new world with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(WorldConfig::default())
    }

    /// Create a world with explicit configuration.
    #[must_use]
    pub fn with_config(config: WorldConfig) -> Self {
        Self {
            id: NEXT_WORLD_ID.fetch_add(1, Ordering::Relaxed),
            components: ComponentRegistry::new(),
            archetypes: ArchetypeRegistry::new(),
            entities: EntityRegistry::with_capacity(config.entity_capacity),
            layers: LayerRegistry::new(config.layer_sort_threshold),
        }
    }

    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    // ==================== Component Registration ====================

    /// Register a component schema.
    pub fn register_component(&mut self, desc: ComponentDesc) -> EcsResult<ComponentId> {
        self.components.register(desc)
    }

    /// Register a schema bound to the plain-old-data type `T`.
    pub fn register<T: bytemuck::Pod>(&mut self, desc: ComponentDesc) -> EcsResult<ComponentId> {
        self.components.register_type::<T>(desc)
    }

    /// Get the component ID bound to `T`, if registered.
    #[must_use]
    pub fn component_id<T: 'static>(&self) -> Option<ComponentId> {
        self.components.get_id::<T>()
    }

    fn typed_id<T: 'static>(&self) -> EcsResult<ComponentId> {
        self.component_id::<T>()
            .ok_or(EcsError::DoesNotExist("component type"))
    }

    // ==================== Entity Operations ====================

    /// Spawn `count` entities holding the given components.
    ///
    /// The archetype is the closure of the supplied components; required
    /// components without data are zero-filled. Every initializer in the
    /// archetype runs once per entity, after all data is in place. On error
    /// nothing has been spawned.
    pub fn spawn(
        &mut self,
        layer: Option<LayerId>,
        count: usize,
        data: &[SpawnData<'_>],
    ) -> EcsResult<Vec<Entity>> {
        if count == 0 || data.is_empty() {
            return Err(EcsError::InvalidArgument("spawn needs entities and components"));
        }

        let layer_index = match layer {
            Some(layer) => {
                let index = self.layers.validate(layer)?;
                let remaining = self.layers.get(layer)?.remaining();
                if remaining.is_some_and(|free| free < count) {
                    return Err(EcsError::OutOfMemory);
                }
                index
            }
            None => 0,
        };

        let mut strides: SmallVec<[usize; 8]> = SmallVec::with_capacity(data.len());
        for (i, spawn) in data.iter().enumerate() {
            let size = self.components.check(spawn.component)?.size();
            let stride = spawn.stride.unwrap_or(size);
            if stride < size {
                return Err(EcsError::InvalidArgument("spawn stride smaller than component"));
            }
            let needed = stride
                .checked_mul(count - 1)
                .and_then(|bytes| bytes.checked_add(size))
                .ok_or(EcsError::InvalidArgument("spawn data length overflows"))?;
            if spawn.data.len() < needed {
                return Err(EcsError::InvalidArgument("spawn data shorter than count"));
            }
            if data[..i].iter().any(|d| d.component == spawn.component) {
                return Err(EcsError::InvalidArgument("component supplied twice"));
            }
            strides.push(stride);
        }

        let set: ComponentSet = data.iter().map(|d| d.component).collect();
        self.check_implied_data(&set)?;
        let archetype_id = self.archetypes.resolve(set, &self.components)?;
        let archetype = self
            .archetypes
            .get_mut(archetype_id)
            .expect("resolved archetype exists");

        let mut entities = Vec::with_capacity(count);
        let mut codes = Vec::with_capacity(count);
        for _ in 0..count {
            let allocated = self.entities.create().and_then(|entity| {
                archetype
                    .allocate_code(entity.id())
                    .map(|code| (entity, code))
                    .inspect_err(|_| self.entities.free(entity.id()))
            });
            match allocated {
                Ok((entity, code)) => {
                    entities.push(entity);
                    codes.push(code);
                }
                Err(err) => {
                    for (entity, code) in entities.iter().zip(&codes) {
                        archetype.free_code(*code);
                        self.entities.free(entity.id());
                    }
                    return Err(err);
                }
            }
        }

        for (spawn, &stride) in data.iter().zip(&strides) {
            let column = archetype
                .column_index(spawn.component)
                .expect("spawned components are in the archetype");
            let size = archetype.column_size(column);
            for (i, &code) in codes.iter().enumerate() {
                let start = i * stride;
                archetype
                    .data_mut(code, column)
                    .copy_from_slice(&spawn.data[start..start + size]);
            }
        }
        archetype.mark_rows_written(&codes);

        for (entity, &code) in entities.iter().zip(&codes) {
            self.entities.set_location(entity.id(), EntityLocation {
                archetype: archetype_id,
                row: code,
            });
        }

        if layer_index != 0 {
            let members = self
                .layers
                .by_index_mut(layer_index)
                .expect("validated layer exists");
            for entity in &entities {
                members.insert(entity.id())?;
                self.entities.set_layer(entity.id(), layer_index);
            }
        }

        if archetype.flags().contains(ArchetypeFlags::HAS_INIT) {
            for &code in &codes {
                for column in 0..archetype.components().len() {
                    run_hook(&self.components, archetype, code, column, ComponentInfo::on_init);
                }
            }
        }

        trace!(count, archetype = ?archetype_id, "spawned entities");
        Ok(entities)
    }

    /// Despawn entities, running cleanup hooks and releasing their storage.
    ///
    /// Every handle is validated before anything is released.
    pub fn despawn(&mut self, entities: &[Entity]) -> EcsResult<()> {
        let mut ids = Vec::with_capacity(entities.len());
        for &entity in entities {
            self.entities.validate(entity)?;
            ids.push(entity.id());
        }
        ids.sort_unstable();
        if ids.windows(2).any(|pair| pair[0] == pair[1]) {
            return Err(EcsError::InvalidArgument("entity despawned twice"));
        }

        for &entity in entities {
            let id = entity.id();
            let location = self.entities.location(id);
            let archetype = self
                .archetypes
                .get_mut(location.archetype)
                .expect("live entity has an archetype");

            if archetype.flags().contains(ArchetypeFlags::HAS_CLEANUP) {
                for column in 0..archetype.components().len() {
                    run_hook(
                        &self.components,
                        archetype,
                        location.row,
                        column,
                        ComponentInfo::on_cleanup,
                    );
                }
            }

            let layer = self.entities.layer(id);
            if layer != 0 {
                self.layers.remove_member(layer, id);
            }
            archetype.free_code(location.row);
            self.entities.free(id);
        }

        trace!(count = entities.len(), "despawned entities");
        Ok(())
    }

    /// Check an entity handle.
    pub fn validate(&self, entity: Entity) -> EcsResult<()> {
        self.entities.validate(entity).map(drop)
    }

    /// Check if an entity is alive.
    #[must_use]
    pub fn is_alive(&self, entity: Entity) -> bool {
        self.entities.is_alive(entity)
    }

    /// Get the number of live entities.
    #[must_use]
    pub fn entity_count(&self) -> u32 {
        self.entities.alive_count()
    }

    fn location(&self, entity: Entity) -> EcsResult<EntityLocation> {
        self.entities.validate(entity)?;
        Ok(self.entities.location(entity.id()))
    }

    fn archetype(&self, id: ArchetypeId) -> &Archetype {
        self.archetypes
            .get(id)
            .expect("entity location names a live archetype")
    }

    /// Reject a set whose closure pulls in a component that must be given data.
    fn check_implied_data(&self, set: &ComponentSet) -> EcsResult<()> {
        let mut closure = set.clone();
        closure.expand_required(&self.components);
        let implied = closure.iter().filter(|&c| !set.contains(c));
        for component in implied {
            if self.components.info(component).require_data() {
                return Err(EcsError::InvalidArgument("required component needs data"));
            }
        }
        Ok(())
    }

    /// Component set of an entity's archetype.
    pub fn archetype_of(&self, entity: Entity) -> EcsResult<&ComponentSet> {
        let location = self.location(entity)?;
        Ok(self.archetype(location.archetype).components())
    }

    /// Check if an entity has a component. `false` for dead entities.
    #[must_use]
    pub fn has(&self, entity: Entity, component: ComponentId) -> bool {
        self.location(entity)
            .is_ok_and(|location| self.archetype(location.archetype).contains(component))
    }

    // ==================== Component Operations ====================

    /// Add a component to an entity, migrating it to a new archetype.
    ///
    /// `data` must match the component size; without it the value is zeroed.
    /// Required components not yet present are added zeroed. Initializers
    /// run for every newly present component.
    pub fn add_component(
        &mut self,
        entity: Entity,
        component: ComponentId,
        data: Option<&[u8]>,
    ) -> EcsResult<()> {
        let location = self.location(entity)?;
        let info = self.components.check(component)?;
        let source = self.archetype(location.archetype).components();
        if source.contains(component) {
            return Err(EcsError::ComponentExists { entity, component });
        }
        match data {
            Some(bytes) if bytes.len() != info.size() => {
                return Err(EcsError::InvalidArgument("component data has the wrong size"));
            }
            None if info.require_data() => {
                return Err(EcsError::InvalidArgument("component requires data"));
            }
            _ => {}
        }
        let target = source.with(component);
        self.check_implied_data(&target)?;
        let to = self.archetypes.resolve(target, &self.components)?;

        let id = entity.id();
        let row = self
            .archetypes
            .migrate(id, location.archetype, location.row, to)?;
        self.entities.set_location(id, EntityLocation { archetype: to, row });

        let source = self.archetype(location.archetype).components().clone();
        let archetype = self
            .archetypes
            .get_mut(to)
            .expect("resolved archetype exists");
        if let Some(bytes) = data {
            let column = archetype
                .column_index(component)
                .expect("added component is in the archetype");
            archetype.data_mut(row, column).copy_from_slice(bytes);
        }
        archetype.mark_rows_written(&[row]);

        if archetype.flags().contains(ArchetypeFlags::HAS_INIT) {
            for column in 0..archetype.components().len() {
                if !source.contains(archetype.components().as_slice()[column]) {
                    run_hook(&self.components, archetype, row, column, ComponentInfo::on_init);
                }
            }
        }
        Ok(())
    }

    /// Remove a component from an entity, running its cleanup hook first.
    ///
    /// Fails with `InvalidArgument` if another present component requires it.
    pub fn remove_component(&mut self, entity: Entity, component: ComponentId) -> EcsResult<()> {
        let location = self.location(entity)?;
        self.components.check(component)?;

        let source = self.archetype(location.archetype).components();
        if !source.contains(component) {
            return Err(EcsError::ComponentDoesNotExist { entity, component });
        }
        let mut target = source.without(component);
        target.expand_required(&self.components);
        if target.contains(component) {
            return Err(EcsError::InvalidArgument("component is required by another component"));
        }
        let to = self.archetypes.resolve(target, &self.components)?;

        let id = entity.id();
        let row = self
            .archetypes
            .get_mut(to)
            .expect("resolved archetype exists")
            .allocate_code(id)?;

        let kept = self.archetype(to).components().clone();
        let from = self
            .archetypes
            .get_mut(location.archetype)
            .expect("entity location names a live archetype");
        if from.flags().contains(ArchetypeFlags::HAS_CLEANUP) {
            for column in 0..from.components().len() {
                if !kept.contains(from.components().as_slice()[column]) {
                    run_hook(
                        &self.components,
                        from,
                        location.row,
                        column,
                        ComponentInfo::on_cleanup,
                    );
                }
            }
        }

        self.archetypes.move_row(location.archetype, location.row, to, row);
        self.entities.set_location(id, EntityLocation { archetype: to, row });
        if let Some(archetype) = self.archetypes.get_mut(to) {
            archetype.mark_rows_written(&[row]);
        }
        Ok(())
    }

    /// Bytes of one component of an entity.
    pub fn read(&self, entity: Entity, component: ComponentId) -> EcsResult<&[u8]> {
        let location = self.location(entity)?;
        self.components.check(component)?;
        let archetype = self.archetype(location.archetype);
        let column = archetype
            .column_index(component)
            .ok_or(EcsError::ComponentDoesNotExist { entity, component })?;
        Ok(archetype.data(location.row, column))
    }

    /// Mutable bytes of one component of an entity.
    ///
    /// Counts as a write for `modified` query filters.
    pub fn write(&mut self, entity: Entity, component: ComponentId) -> EcsResult<&mut [u8]> {
        let location = self.location(entity)?;
        self.components.check(component)?;
        let archetype = self
            .archetypes
            .get_mut(location.archetype)
            .expect("entity location names a live archetype");
        let column = archetype
            .column_index(component)
            .ok_or(EcsError::ComponentDoesNotExist { entity, component })?;
        archetype.mark_written(location.row, column);
        Ok(archetype.data_mut(location.row, column))
    }

    /// Get a copy of a typed component.
    pub fn get<T: bytemuck::Pod>(&self, entity: Entity) -> EcsResult<T> {
        let bytes = self.read(entity, self.typed_id::<T>()?)?;
        Ok(bytemuck::pod_read_unaligned(bytes))
    }

    /// Overwrite a typed component the entity already has.
    pub fn set<T: bytemuck::Pod>(&mut self, entity: Entity, value: &T) -> EcsResult<()> {
        let id = self.typed_id::<T>()?;
        self.write(entity, id)?
            .copy_from_slice(bytemuck::bytes_of(value));
        Ok(())
    }

    /// Add a typed component to an entity.
    pub fn insert<T: bytemuck::Pod>(&mut self, entity: Entity, value: &T) -> EcsResult<()> {
        let id = self.typed_id::<T>()?;
        self.add_component(entity, id, Some(bytemuck::bytes_of(value)))
    }

    /// Remove a typed component, returning its last value.
    pub fn remove<T: bytemuck::Pod>(&mut self, entity: Entity) -> EcsResult<T> {
        let id = self.typed_id::<T>()?;
        let value = self.get::<T>(entity)?;
        self.remove_component(entity, id)?;
        Ok(value)
    }

    // ==================== Layers ====================

    /// Create a layer, optionally limited to `capacity` members.
    pub fn create_layer(&mut self, capacity: Option<usize>) -> LayerId {
        self.layers.create(capacity)
    }

    /// Destroy a layer. Its members stay alive with no layer.
    pub fn destroy_layer(&mut self, layer: LayerId) -> EcsResult<()> {
        for id in self.layers.destroy(layer)? {
            self.entities.set_layer(id, 0);
        }
        Ok(())
    }

    /// Move an entity into `layer`, leaving any previous layer.
    pub fn assign_layer(&mut self, entity: Entity, layer: LayerId) -> EcsResult<()> {
        let id = entity.id();
        self.entities.validate(entity)?;
        let index = self.layers.validate(layer)?;
        let previous = self.entities.layer(id);
        if previous == index {
            return Ok(());
        }

        self.layers.get_mut(layer)?.insert(id)?;
        if previous != 0 {
            self.layers.remove_member(previous, id);
        }
        self.entities.set_layer(id, index);
        Ok(())
    }

    /// Take an entity out of its layer, if any.
    pub fn unassign_layer(&mut self, entity: Entity) -> EcsResult<()> {
        let id = entity.id();
        self.entities.validate(entity)?;
        let previous = self.entities.layer(id);
        if previous != 0 {
            self.layers.remove_member(previous, id);
            self.entities.set_layer(id, 0);
        }
        Ok(())
    }

    /// Layer an entity belongs to.
    pub fn layer_of(&self, entity: Entity) -> EcsResult<Option<LayerId>> {
        self.entities.validate(entity)?;
        Ok(self.layers.handle(self.entities.layer(entity.id())))
    }

    /// Members of a layer, in ascending index order.
    pub fn layer_members(&mut self, layer: LayerId) -> EcsResult<Vec<Entity>> {
        let members = self.layers.get_mut(layer)?.sorted_members();
        Ok(members.iter().map(|&id| self.entities.handle(id)).collect())
    }

    pub fn layer_len(&self, layer: LayerId) -> EcsResult<usize> {
        Ok(self.layers.get(layer)?.len())
    }

    // ==================== Registry Access ====================

    /// Get the component registry.
    #[must_use]
    pub const fn components(&self) -> &ComponentRegistry {
        &self.components
    }

    /// Get the archetype storage.
    #[must_use]
    pub const fn archetypes(&self) -> &ArchetypeRegistry {
        &self.archetypes
    }

    #[must_use]
    pub const fn layers(&self) -> &LayerRegistry {
        &self.layers
    }

    pub(crate) fn query_parts(&mut self) -> (&mut ArchetypeRegistry, &EntityRegistry) {
        (&mut self.archetypes, &self.entities)
    }

    // ==================== Query ====================

    /// Start building a query.
    pub fn query(&self) -> QueryBuilder<'_> {
        QueryBuilder::new(self)
    }

    /// Create a query from explicit term and filter lists.
    pub fn create_query(
        &self,
        write: &[ComponentId],
        read: &[ComponentId],
        filters: &[QueryFilter],
    ) -> EcsResult<Query> {
        Query::new(self.id, &self.components, write, read, filters)
    }
}

/// Run one column's lifecycle hook on one row.
///
/// The hook sees the column's bytes first, then each required component's
/// bytes in declared order.
fn run_hook(
    components: &ComponentRegistry,
    archetype: &mut Archetype,
    code: RowCode,
    column: usize,
    select: HookSelect,
) {
    let info = components.info(archetype.components().as_slice()[column]);
    let Some(hook) = select(info) else {
        return;
    };

    let mut bundle: SmallVec<[&mut [u8]; 4]> = SmallVec::with_capacity(1 + info.requires().len());
    let columns = std::iter::once(column).chain(info.requires().iter().map(|&required| {
        archetype
            .column_index(required)
            .expect("archetype holds the closure of its components")
    }));
    for column in columns {
        let size = archetype.column_size(column);
        // SAFETY: a component never requires itself or the same component
        // twice, so the slices are disjoint; the archetype is borrowed
        // mutably for the whole call.
        bundle.push(unsafe { std::slice::from_raw_parts_mut(archetype.data_ptr(code, column), size) });
    }
    hook(&mut bundle[..]);
}

impl std::fmt::Debug for World {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("World")
            .field("id", &self.id)
            .field("entities", &self.entities)
            .field("components", &self.components.len())
            .field("archetypes", &self.archetypes.len())
            .field("layers", &self.layers)
            .finish()
    }
}
