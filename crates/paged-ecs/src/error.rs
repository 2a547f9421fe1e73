//! Error taxonomy for the storage engine.
//!
//! Every recoverable failure maps onto one of a small, closed set of codes.
//! Internal invariant violations are not represented here: they panic, since
//! they indicate a bug in the engine rather than caller misuse.

use thiserror::Error;

use crate::{component::ComponentId, entity::Entity, layer::LayerId};

/// Engine error type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EcsError {
    /// Malformed input (zero-size component, missing required data, bad stride).
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// An allocation failed, or a fixed-capacity container is full.
    #[error("out of memory")]
    OutOfMemory,

    /// A looked-up object does not exist.
    #[error("{0} does not exist")]
    DoesNotExist(&'static str),

    /// Stale or out-of-range entity handle.
    #[error("invalid entity: {0}")]
    InvalidEntity(Entity),

    /// Stale or out-of-range layer handle.
    #[error("invalid layer: {0:?}")]
    InvalidLayer(LayerId),

    /// The entity already has this component.
    #[error("entity {entity} already has {component:?}")]
    ComponentExists {
        entity: Entity,
        component: ComponentId,
    },

    /// The entity does not have this component.
    #[error("entity {entity} does not have {component:?}")]
    ComponentDoesNotExist {
        entity: Entity,
        component: ComponentId,
    },
}

/// Result type for engine operations.
pub type EcsResult<T> = Result<T, EcsError>;
