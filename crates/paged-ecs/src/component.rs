//! Component registration and schema metadata.
//!
//! Components are untyped at this level: a schema is a byte size, a list of
//! components that must accompany it, and optional lifecycle hooks. Ids are
//! assigned densely in registration order and never reused.

use std::{any::TypeId, fmt};

use hashbrown::HashMap;
use rustc_hash::FxBuildHasher;
use smallvec::SmallVec;
use tracing::debug;

use crate::error::{EcsError, EcsResult};

/// Dense index into the component registry.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentId(u32);

impl ComponentId {
    /// Create a component ID from a raw value.
    #[must_use]
    pub const fn from_raw(id: u32) -> Self {
        Self(id)
    }

    /// Get the raw ID value.
    #[must_use]
    pub const fn as_raw(self) -> u32 {
        self.0
    }

    pub(crate) const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ComponentId({})", self.0)
    }
}

/// Lifecycle callback run on initialization or cleanup of one component value.
///
/// The slice holds the component's own bytes at index 0, followed by the
/// bytes of each required component in the order the schema declared them.
pub type ComponentHook = Box<dyn Fn(&mut [&mut [u8]]) + Send + Sync>;

/// Registration input for a component.
///
/// # Example
///
/// ```ignore
/// let health = world.register_component(
///     ComponentDesc::new("Health", 4)
///         .requires(&[alive])
///         .on_init(|data| data[0].copy_from_slice(&100u32.to_le_bytes())),
/// )?;
/// ```
pub struct ComponentDesc {
    name: &'static str,
    size: usize,
    require_data: bool,
    requires: SmallVec<[ComponentId; 4]>,
    on_init: Option<ComponentHook>,
    on_cleanup: Option<ComponentHook>,
}

impl ComponentDesc {
    /// Describe a component of `size` bytes.
    #[must_use]
    pub fn new(name: &'static str, size: usize) -> Self {
        Self {
            name,
            size,
            require_data: false,
            requires: SmallVec::new(),
            on_init: None,
            on_cleanup: None,
        }
    }

    /// Describe a plain-old-data type.
    #[must_use]
    pub fn of<T: bytemuck::Pod>() -> Self {
        Self::new(std::any::type_name::<T>(), size_of::<T>())
    }

    /// Components that must be present wherever this one is.
    ///
    /// The dependency graph must be acyclic: closure expansion does not
    /// detect cycles.
    #[must_use]
    pub fn requires(mut self, ids: &[ComponentId]) -> Self {
        self.requires.extend_from_slice(ids);
        self
    }

    /// Reject adds of this component that do not supply data.
    #[must_use]
    pub const fn require_data(mut self) -> Self {
        self.require_data = true;
        self
    }

    #[must_use]
    pub fn on_init(mut self, hook: impl Fn(&mut [&mut [u8]]) + Send + Sync + 'static) -> Self {
        self.on_init = Some(Box::new(hook));
        self
    }

    #[must_use]
    pub fn on_cleanup(mut self, hook: impl Fn(&mut [&mut [u8]]) + Send + Sync + 'static) -> Self {
        self.on_cleanup = Some(Box::new(hook));
        self
    }
}

/// Registered schema for a component.
pub struct ComponentInfo {
    id: ComponentId,
    name: &'static str,
    size: usize,
    require_data: bool,
    requires: SmallVec<[ComponentId; 4]>,
    on_init: Option<ComponentHook>,
    on_cleanup: Option<ComponentHook>,
}

impl ComponentInfo {
    /// Get the component ID.
    #[must_use]
    pub const fn id(&self) -> ComponentId {
        self.id
    }

    /// Get the component name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Get the size in bytes.
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Whether adds must supply data.
    #[must_use]
    pub const fn require_data(&self) -> bool {
        self.require_data
    }

    /// Directly required components, in declaration order.
    #[must_use]
    pub fn requires(&self) -> &[ComponentId] {
        &self.requires
    }

    #[must_use]
    pub fn on_init(&self) -> Option<&ComponentHook> {
        self.on_init.as_ref()
    }

    #[must_use]
    pub fn on_cleanup(&self) -> Option<&ComponentHook> {
        self.on_cleanup.as_ref()
    }
}

impl fmt::Debug for ComponentInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentInfo")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("size", &self.size)
            .field("requires", &self.requires)
            .field("on_init", &self.on_init.is_some())
            .field("on_cleanup", &self.on_cleanup.is_some())
            .finish()
    }
}

/// Registry of component schemas, indexed by [`ComponentId`].
#[derive(Default)]
pub struct ComponentRegistry {
    infos: Vec<ComponentInfo>,
    /// Typed binding: Rust type to component.
    type_to_id: HashMap<TypeId, ComponentId, FxBuildHasher>,
}

impl ComponentRegistry {
    /// Create a new empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and append a schema, returning its never-reused id.
    pub fn register(&mut self, desc: ComponentDesc) -> EcsResult<ComponentId> {
        if desc.size == 0 {
            return Err(EcsError::InvalidArgument("component size must be non-zero"));
        }

        let next = self.infos.len();
        for (i, required) in desc.requires.iter().enumerate() {
            // Ids are dense, so a range check covers "already registered".
            if required.index() >= next {
                return Err(EcsError::DoesNotExist("required component"));
            }
            if desc.requires[..i].contains(required) {
                return Err(EcsError::InvalidArgument("duplicate required component"));
            }
        }

        let id = ComponentId(u32::try_from(next).map_err(|_| EcsError::OutOfMemory)?);
        self.infos.try_reserve(1).map_err(|_| EcsError::OutOfMemory)?;
        self.infos.push(ComponentInfo {
            id,
            name: desc.name,
            size: desc.size,
            require_data: desc.require_data,
            requires: desc.requires,
            on_init: desc.on_init,
            on_cleanup: desc.on_cleanup,
        });

        debug!(component = ?id, name = desc.name, size = desc.size, "registered component");
        Ok(id)
    }

    /// Register a schema and bind it to the Rust type `T`.
    ///
    /// Registering the same type twice returns the existing id.
    pub fn register_type<T: 'static>(&mut self, desc: ComponentDesc) -> EcsResult<ComponentId> {
        let type_id = TypeId::of::<T>();
        if let Some(&id) = self.type_to_id.get(&type_id) {
            return Ok(id);
        }
        if desc.size != size_of::<T>() {
            return Err(EcsError::InvalidArgument("component size does not match type"));
        }
        let id = self.register(desc)?;
        self.type_to_id.insert(type_id, id);
        Ok(id)
    }

    /// Get the component ID bound to a type, if registered.
    #[must_use]
    pub fn get_id<T: 'static>(&self) -> Option<ComponentId> {
        self.type_to_id.get(&TypeId::of::<T>()).copied()
    }

    /// Get component info by ID.
    #[must_use]
    pub fn get_info(&self, id: ComponentId) -> Option<&ComponentInfo> {
        self.infos.get(id.index())
    }

    /// Component info for an id the engine already knows is registered.
    pub(crate) fn info(&self, id: ComponentId) -> &ComponentInfo {
        &self.infos[id.index()]
    }

    /// Check an id against the registry.
    pub fn check(&self, id: ComponentId) -> EcsResult<&ComponentInfo> {
        self.get_info(id)
            .ok_or(EcsError::DoesNotExist("component"))
    }

    /// Get the number of registered components.
    #[must_use]
    pub fn len(&self) -> usize {
        self.infos.len()
    }

    /// Check if the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }

    /// Iterate over all registered component infos.
    pub fn iter(&self) -> impl Iterator<Item = &ComponentInfo> {
        self.infos.iter()
    }
}

impl fmt::Debug for ComponentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentRegistry")
            .field("count", &self.len())
            .field("components", &self.infos)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
    #[repr(C)]
    struct Position {
        x: f32,
        y: f32,
    }

    #[test]
    fn test_component_registration() {
        let mut registry = ComponentRegistry::new();

        let a = registry.register(ComponentDesc::new("A", 4)).unwrap();
        let b = registry
            .register(ComponentDesc::new("B", 8).requires(&[a]))
            .unwrap();

        assert_eq!(a.as_raw(), 0);
        assert_eq!(b.as_raw(), 1);
        assert_eq!(registry.len(), 2);

        let info = registry.get_info(b).unwrap();
        assert_eq!(info.size(), 8);
        assert_eq!(info.requires(), &[a]);
        assert!(info.on_init().is_none());
    }

    #[test]
    fn test_zero_size_rejected() {
        let mut registry = ComponentRegistry::new();
        let err = registry.register(ComponentDesc::new("Empty", 0)).unwrap_err();
        assert!(matches!(err, EcsError::InvalidArgument(_)));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_unknown_requirement_rejected() {
        let mut registry = ComponentRegistry::new();
        let err = registry
            .register(ComponentDesc::new("B", 4).requires(&[ComponentId::from_raw(5)]))
            .unwrap_err();
        assert_eq!(err, EcsError::DoesNotExist("required component"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_typed_registration_is_idempotent() {
        let mut registry = ComponentRegistry::new();

        let id1 = registry
            .register_type::<Position>(ComponentDesc::of::<Position>())
            .unwrap();
        let id2 = registry
            .register_type::<Position>(ComponentDesc::of::<Position>())
            .unwrap();

        assert_eq!(id1, id2);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get_id::<Position>(), Some(id1));
        assert_eq!(registry.info(id1).size(), 8);
    }

    #[test]
    fn test_hooks_recorded() {
        let mut registry = ComponentRegistry::new();
        let id = registry
            .register(
                ComponentDesc::new("Counter", 4)
                    .on_init(|data| data[0].fill(1))
                    .on_cleanup(|data| data[0].fill(0)),
            )
            .unwrap();

        let info = registry.info(id);
        let mut bytes = [0u8; 4];
        let mut bundle = [&mut bytes[..]];
        (info.on_init().unwrap())(&mut bundle);
        assert_eq!(bytes, [1, 1, 1, 1]);
        assert!(info.on_cleanup().is_some());
    }
}
