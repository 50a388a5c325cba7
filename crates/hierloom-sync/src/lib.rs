//! # hierloom-sync
//!
//! Keeps derived documents in step with their archetypes.
//!
//! ```text
//!   archetype document
//!        │ part added / removed
//!        ▼
//!   Session::dispatch ──► event observers
//!        │
//!        ▼
//!   derived document: resolver → cloner → base links → move reuse
//!        │ its own part events
//!        ▼
//!   next level of derivation
//! ```
//!
//! A [`Session`] owns every loaded [`Document`]. Each document keeps an
//! [`InstanceRegistry`] (which archetypes and instances it holds) and a
//! [`ReverseMapping`] (archetype part and instance to derived part, deleted
//! pairs, per-instance common ancestors), both rebuilt from the reachable
//! parts after every structural change.

pub mod config;
pub mod document;
pub mod error;
pub mod event;
pub mod hub;
pub mod kind;
pub mod kinds;
pub mod mapping;
pub mod propagation;
pub mod registry;
pub mod resolver;
pub mod session;

#[cfg(test)]
mod tests;

pub use config::SessionConfig;
pub use document::Document;
pub use error::{Result, SyncError};
pub use event::{PartChange, PartEvent};
pub use hub::{DocumentStatus, Hub, Subscription};
pub use kind::{DocumentKind, NewBasePart};
pub use kinds::{Entity, EntityHierarchy};
pub use mapping::{CommonAncestor, MappingSnapshot, ReverseMapping};
pub use propagation::{PropagationFlag, PropagationScope};
pub use registry::InstanceRegistry;
pub use resolver::{find_best_insert_index, InsertionPoint};
pub use session::{Instantiation, PartEventHandler, Session};
