//! Sorted, duplicate-free sets of component ids.
//!
//! A component set is the identity of an archetype. Lookups use binary
//! search; subset and intersection tests walk both sequences with two
//! pointers.

use std::{cmp::Ordering, fmt};

use smallvec::SmallVec;

use crate::component::{ComponentId, ComponentRegistry};

/// Sorted, deduplicated list of component ids.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct ComponentSet {
    ids: SmallVec<[ComponentId; 8]>,
}

impl ComponentSet {
    /// The empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy, sort and deduplicate `ids`.
    #[must_use]
    pub fn from_ids(ids: &[ComponentId]) -> Self {
        let mut ids: SmallVec<[ComponentId; 8]> = ids.iter().copied().collect();
        ids.sort_unstable();
        ids.dedup();
        Self { ids }
    }

    /// A copy of this set with `id` merged in.
    #[must_use]
    pub fn with(&self, id: ComponentId) -> Self {
        let mut set = self.clone();
        set.insert(id);
        set
    }

    /// A copy of this set with `id` left out.
    #[must_use]
    pub fn without(&self, id: ComponentId) -> Self {
        let ids = self.ids.iter().copied().filter(|&c| c != id).collect();
        Self { ids }
    }

    /// Insert an id, keeping the set sorted. Returns `false` if already present.
    pub fn insert(&mut self, id: ComponentId) -> bool {
        match self.ids.binary_search(&id) {
            Ok(_) => false,
            Err(pos) => {
                self.ids.insert(pos, id);
                true
            }
        }
    }

    /// Remove an id. Returns `false` if it was absent.
    pub fn remove(&mut self, id: ComponentId) -> bool {
        match self.ids.binary_search(&id) {
            Ok(pos) => {
                self.ids.remove(pos);
                true
            }
            Err(_) => false,
        }
    }

    /// Position of `id` within the set.
    #[must_use]
    pub fn order_of(&self, id: ComponentId) -> Option<usize> {
        self.ids.binary_search(&id).ok()
    }

    #[must_use]
    pub fn contains(&self, id: ComponentId) -> bool {
        self.order_of(id).is_some()
    }

    /// Check whether every member of `self` is in `other`.
    #[must_use]
    pub fn is_subset(&self, other: &Self) -> bool {
        if self.len() > other.len() {
            return false;
        }
        let mut j = 0;
        for &id in &self.ids {
            loop {
                match other.ids.get(j) {
                    None => return false,
                    Some(&o) if o < id => j += 1,
                    Some(&o) if o == id => {
                        j += 1;
                        break;
                    }
                    Some(_) => return false,
                }
            }
        }
        true
    }

    /// Check whether the sets share at least one member.
    #[must_use]
    pub fn intersects(&self, other: &Self) -> bool {
        let (mut i, mut j) = (0, 0);
        while i < self.ids.len() && j < other.ids.len() {
            match self.ids[i].cmp(&other.ids[j]) {
                Ordering::Less => i += 1,
                Ordering::Greater => j += 1,
                Ordering::Equal => return true,
            }
        }
        false
    }

    /// Merge of both sets.
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        let mut ids = SmallVec::with_capacity(self.len() + other.len());
        let (mut i, mut j) = (0, 0);
        while i < self.ids.len() && j < other.ids.len() {
            match self.ids[i].cmp(&other.ids[j]) {
                Ordering::Less => {
                    ids.push(self.ids[i]);
                    i += 1;
                }
                Ordering::Greater => {
                    ids.push(other.ids[j]);
                    j += 1;
                }
                Ordering::Equal => {
                    ids.push(self.ids[i]);
                    i += 1;
                    j += 1;
                }
            }
        }
        ids.extend_from_slice(&self.ids[i..]);
        ids.extend_from_slice(&other.ids[j..]);
        Self { ids }
    }

    /// Members present in both sets.
    #[must_use]
    pub fn intersection(&self, other: &Self) -> Self {
        let mut ids = SmallVec::new();
        let (mut i, mut j) = (0, 0);
        while i < self.ids.len() && j < other.ids.len() {
            match self.ids[i].cmp(&other.ids[j]) {
                Ordering::Less => i += 1,
                Ordering::Greater => j += 1,
                Ordering::Equal => {
                    ids.push(self.ids[i]);
                    i += 1;
                    j += 1;
                }
            }
        }
        Self { ids }
    }

    /// Grow the set until it contains every transitive requirement of its members.
    ///
    /// Every member must be registered, and the dependency graph must be
    /// acyclic. Each insertion restarts the scan, so the loop is bounded by
    /// the number of registered components.
    pub fn expand_required(&mut self, registry: &ComponentRegistry) {
        'scan: loop {
            for i in 0..self.ids.len() {
                let info = registry.info(self.ids[i]);
                for &required in info.requires() {
                    if self.insert(required) {
                        continue 'scan;
                    }
                }
            }
            break;
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[ComponentId] {
        &self.ids
    }

    pub fn iter(&self) -> impl Iterator<Item = ComponentId> + '_ {
        self.ids.iter().copied()
    }
}

/// Canonical order used by the archetype lookup index: by count, then elements.
impl Ord for ComponentSet {
    fn cmp(&self, other: &Self) -> Ordering {
        self.len()
            .cmp(&other.len())
            .then_with(|| self.ids.as_slice().cmp(other.ids.as_slice()))
    }
}

impl PartialOrd for ComponentSet {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Debug for ComponentSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.ids.iter().map(|id| id.as_raw())).finish()
    }
}

impl FromIterator<ComponentId> for ComponentSet {
    fn from_iter<I: IntoIterator<Item = ComponentId>>(iter: I) -> Self {
        let ids: SmallVec<[ComponentId; 8]> = iter.into_iter().collect();
        Self::from_ids(&ids)
    }
}
