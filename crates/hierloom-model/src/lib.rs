//! # hierloom-model
//!
//! Data model for hierarchical composite documents:
//!
//! - [`Hierarchy`]: a forest of parts keyed by id, with the pre-order insert
//!   and post-order remove primitives every document mutation goes through
//! - [`BasePart`]: the link from a derived part back to the archetype part it
//!   was cloned from, for one instantiation
//! - [`HierarchyPart`]: the adapter a concrete part type implements so the
//!   forest can walk and edit its child structure
//! - [`clone_sub_hierarchy`]: detached deep clones with optional fresh ids
//!
//! Propagation between documents lives in `hierloom-sync`.

pub mod base;
pub mod cloner;
pub mod error;
pub mod hierarchy;
pub mod ids;
pub mod overrides;
pub mod part;


pub use base::{BaseInstanceKey, BasePart};
pub use cloner::{clone_sub_hierarchy, ClonedHierarchy, SubHierarchyCloneFlags};
pub use error::{HierarchyError, Result};
pub use hierarchy::Hierarchy;
pub use ids::{DocumentId, IdRemapping, InstanceId, PartId};
pub use overrides::{MemberPath, OverrideSet, PathSegment};
pub use part::{HierarchyPart, PartDesign};
