//! Layers - optional coarse partitions of the entity population.
//!
//! A layer is independent of the archetype partition: an entity belongs to
//! at most one layer, whatever its components. Layer index 0 is reserved
//! and means "no layer".

use std::fmt;

use tracing::debug;

use crate::{
    entity::{EntityId, Generation},
    error::{EcsError, EcsResult},
};

/// Populations below this use ordered linear removal.
pub const DEFAULT_SORT_THRESHOLD: usize = 64;

/// Generational handle to a layer.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct LayerId {
    index: u32,
    generation: Generation,
}

impl LayerId {
    /// The "no layer" sentinel.
    pub const NONE: Self = Self {
        index: 0,
        generation: Generation::new(),
    };

    #[must_use]
    pub const fn index(self) -> u32 {
        self.index
    }

    #[must_use]
    pub const fn generation(self) -> Generation {
        self.generation
    }
}

impl fmt::Debug for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Layer({}v{})", self.index, self.generation.get())
    }
}

/// Membership of one layer.
#[derive(Debug, Default)]
pub struct Layer {
    members: Vec<EntityId>,
    /// Members are not known to be in ascending order.
    dirty: bool,
    capacity: Option<usize>,
}

impl Layer {
    fn new(capacity: Option<usize>) -> Self {
        Self {
            members: Vec::with_capacity(capacity.unwrap_or(0)),
            dirty: false,
            capacity,
        }
    }

    /// Add a member. Fails with `OutOfMemory` when a fixed capacity is reached.
    pub fn insert(&mut self, id: EntityId) -> EcsResult<()> {
        if self.is_full() {
            return Err(EcsError::OutOfMemory);
        }
        if self.members.last().is_some_and(|&last| last > id) {
            self.dirty = true;
        }
        self.members.push(id);
        Ok(())
    }

    /// Remove a member, picking a strategy by population.
    ///
    /// Small layers do an order-preserving linear removal. Large layers sort
    /// once if needed, binary search, and swap-remove, which leaves the
    /// membership unsorted again.
    pub fn remove(&mut self, id: EntityId, sort_threshold: usize) -> bool {
        if self.members.len() < sort_threshold {
            let Some(pos) = self.members.iter().position(|&m| m == id) else {
                return false;
            };
            self.members.remove(pos);
            return true;
        }

        self.sort();
        let Ok(pos) = self.members.binary_search(&id) else {
            return false;
        };
        self.members.swap_remove(pos);
        self.dirty = true;
        true
    }

    fn sort(&mut self) {
        if self.dirty {
            self.members.sort_unstable();
            self.dirty = false;
        }
    }

    /// Members in ascending order, re-sorting if needed.
    pub fn sorted_members(&mut self) -> &[EntityId] {
        self.sort();
        &self.members
    }

    /// Members in insertion/removal order.
    #[must_use]
    pub fn members(&self) -> &[EntityId] {
        &self.members
    }

    #[must_use]
    pub fn contains(&self, id: EntityId) -> bool {
        if self.dirty {
            self.members.contains(&id)
        } else {
            self.members.binary_search(&id).is_ok()
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    #[must_use]
    pub const fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// Free slots left, or `None` when unbounded.
    #[must_use]
    pub fn remaining(&self) -> Option<usize> {
        self.capacity.map(|cap| cap.saturating_sub(self.members.len()))
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.remaining() == Some(0)
    }

    #[must_use]
    pub const fn is_dirty(&self) -> bool {
        self.dirty
    }
}

struct LayerSlot {
    generation: Generation,
    layer: Option<Layer>,
}

/// All layers of a world.
pub struct LayerRegistry {
    slots: Vec<LayerSlot>,
    free_list: Vec<u32>,
    sort_threshold: usize,
}

impl LayerRegistry {
    #[must_use]
    pub fn new(sort_threshold: usize) -> Self {
        Self {
            // Slot 0 is the "no layer" sentinel and is never handed out.
            slots: vec![LayerSlot {
                generation: Generation::new(),
                layer: None,
            }],
            free_list: Vec::new(),
            sort_threshold,
        }
    }

    #[must_use]
    pub const fn sort_threshold(&self) -> usize {
        self.sort_threshold
    }

    /// Create a layer, optionally bounded to `capacity` members.
    pub fn create(&mut self, capacity: Option<usize>) -> LayerId {
        let index = if let Some(index) = self.free_list.pop() {
            self.slots[index as usize].layer = Some(Layer::new(capacity));
            index
        } else {
            self.slots.push(LayerSlot {
                generation: Generation::new(),
                layer: Some(Layer::new(capacity)),
            });
            (self.slots.len() - 1) as u32
        };
        let id = LayerId {
            index,
            generation: self.slots[index as usize].generation,
        };
        debug!(layer = ?id, ?capacity, "created layer");
        id
    }

    /// Destroy a layer, returning its former members.
    pub fn destroy(&mut self, id: LayerId) -> EcsResult<Vec<EntityId>> {
        self.validate(id)?;
        let slot = &mut self.slots[id.index as usize];
        let layer = slot.layer.take().ok_or(EcsError::InvalidLayer(id))?;
        slot.generation = slot.generation.next();
        self.free_list.push(id.index);
        debug!(layer = ?id, members = layer.len(), "destroyed layer");
        Ok(layer.members)
    }

    /// Check a handle and return its slot index.
    pub fn validate(&self, id: LayerId) -> EcsResult<u32> {
        match self.slots.get(id.index as usize) {
            Some(slot)
                if id.index != 0 && slot.generation == id.generation && slot.layer.is_some() =>
            {
                Ok(id.index)
            }
            _ => Err(EcsError::InvalidLayer(id)),
        }
    }

    /// Current handle for a live slot index.
    #[must_use]
    pub fn handle(&self, index: u32) -> Option<LayerId> {
        let slot = self.slots.get(index as usize)?;
        slot.layer.as_ref()?;
        (index != 0).then_some(LayerId {
            index,
            generation: slot.generation,
        })
    }

    pub fn get(&self, id: LayerId) -> EcsResult<&Layer> {
        let index = self.validate(id)?;
        self.by_index(index).ok_or(EcsError::InvalidLayer(id))
    }

    pub fn get_mut(&mut self, id: LayerId) -> EcsResult<&mut Layer> {
        let index = self.validate(id)?;
        self.by_index_mut(index).ok_or(EcsError::InvalidLayer(id))
    }

    pub(crate) fn by_index(&self, index: u32) -> Option<&Layer> {
        self.slots.get(index as usize)?.layer.as_ref()
    }

    pub(crate) fn by_index_mut(&mut self, index: u32) -> Option<&mut Layer> {
        self.slots.get_mut(index as usize)?.layer.as_mut()
    }

    /// Remove an entity from the layer at `index`, if any.
    pub(crate) fn remove_member(&mut self, index: u32, entity: EntityId) -> bool {
        let threshold = self.sort_threshold;
        self.by_index_mut(index)
            .is_some_and(|layer| layer.remove(entity, threshold))
    }

    /// Number of live layers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len() - 1 - self.free_list.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for LayerRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_SORT_THRESHOLD)
    }
}

impl fmt::Debug for LayerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LayerRegistry")
            .field("layers", &self.len())
            .field("sort_threshold", &self.sort_threshold)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_layer_ordered_removal() {
        let mut layer = Layer::new(None);
        for id in [1, 2, 3, 4] {
            layer.insert(id).unwrap();
        }
        assert!(!layer.is_dirty());

        assert!(layer.remove(2, 64));
        assert_eq!(layer.members(), &[1, 3, 4]);
        assert!(!layer.is_dirty());
        assert!(!layer.remove(2, 64));
    }

    #[test]
    fn test_large_layer_swap_removal() {
        let mut layer = Layer::new(None);
        for id in (1..=10).rev() {
            layer.insert(id).unwrap();
        }
        assert!(layer.is_dirty());

        // Threshold below population: sorted search + swap-remove
        assert!(layer.remove(3, 4));
        assert!(layer.is_dirty());
        assert_eq!(layer.len(), 9);
        assert!(!layer.contains(3));
        assert!(layer.contains(10));

        let sorted = layer.sorted_members().to_vec();
        assert_eq!(sorted, vec![1, 2, 4, 5, 6, 7, 8, 9, 10]);
        assert!(!layer.is_dirty());
        assert!(!layer.remove(42, 4));
    }

    #[test]
    fn test_capacity_limit() {
        let mut layer = Layer::new(Some(2));
        layer.insert(1).unwrap();
        layer.insert(2).unwrap();
        assert!(layer.is_full());
        assert_eq!(layer.insert(3), Err(EcsError::OutOfMemory));
        assert_eq!(layer.len(), 2);
    }

    #[test]
    fn test_registry_handles() {
        let mut registry = LayerRegistry::default();
        assert!(registry.validate(LayerId::NONE).is_err());

        let l1 = registry.create(None);
        let l2 = registry.create(Some(4));
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get(l2).unwrap().capacity(), Some(4));

        registry.get_mut(l1).unwrap().insert(7).unwrap();
        assert_eq!(registry.destroy(l1).unwrap(), vec![7]);
        assert_eq!(registry.validate(l1), Err(EcsError::InvalidLayer(l1)));
        assert!(registry.destroy(l1).is_err());

        // Slot is recycled with a new generation
        let l3 = registry.create(None);
        assert_eq!(l3.index(), l1.index());
        assert_ne!(l3, l1);
        assert_eq!(registry.handle(l3.index()), Some(l3));
    }
}
