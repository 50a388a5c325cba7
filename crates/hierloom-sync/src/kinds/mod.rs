//! Built-in document kinds.

pub mod entity;

pub use entity::{Entity, EntityHierarchy};
