//! Error types for world and index operations.
//!
//! Programmer errors (attaching to a dead entity, duplicate component types,
//! writing a foreign type into an index) surface as `Err` values. Lookup-shaped
//! operations (`get`, `has`, `remove`, `get_singleton`) never fail; they return
//! `Option` or `bool` instead.

use thiserror::Error;

use crate::entity::Entity;

/// Error type for fallible ECS operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EcsError {
    /// A component was emplaced on an entity that is not alive.
    #[error("cannot attach {type_name} to dead entity {entity}")]
    DeadEntity {
        /// Type name of the component that was being attached.
        type_name: &'static str,
        /// The dead or never-created entity.
        entity: Entity,
    },

    /// The same component type appeared more than once in a bundle or index spec.
    #[error("duplicate component type {type_name} in {context}")]
    DuplicateComponentType {
        /// Type name of the repeated component.
        type_name: &'static str,
        /// The operation that received the duplicate (`create`, `insert`, `index`).
        context: &'static str,
    },

    /// An index was asked to overwrite a component type it does not track.
    #[error("type {type_name} is not part of index over {index_types:?}")]
    TypeNotInIndex {
        /// Type name of the foreign component.
        type_name: &'static str,
        /// Type names tracked by the index.
        index_types: Vec<&'static str>,
    },

    /// A sparse-set value was at or above the hard capacity cap.
    #[error("sparse set value {value} exceeds maximum {max}")]
    SparseSetOverflow {
        /// The offending value.
        value: u32,
        /// The capacity cap.
        max: u32,
    },
}

/// Result type for ECS operations.
pub type EcsResult<T> = Result<T, EcsError>;
