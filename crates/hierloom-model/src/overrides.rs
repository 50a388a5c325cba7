//! Override markers.
//!
//! An override records that a member of a derived part diverges from the
//! value propagated by its archetype. Reconciliation leaves overridden
//! members alone.

use crate::ids::{IdRemapping, PartId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PathSegment {
    /// Named member of an object.
    Member(String),
    /// Entry of a keyed collection.
    Key(String),
    /// Entry addressed by a part identity (e.g. a link list).
    Id(PartId),
}

/// Path from a part's payload root to the overridden member.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MemberPath {
    segments: Vec<PathSegment>,
}

impl MemberPath {
    pub fn member(name: impl Into<String>) -> Self {
        Self {
            segments: vec![PathSegment::Member(name.into())],
        }
    }

    pub fn then_member(mut self, name: impl Into<String>) -> Self {
        self.segments.push(PathSegment::Member(name.into()));
        self
    }

    pub fn then_key(mut self, key: impl Into<String>) -> Self {
        self.segments.push(PathSegment::Key(key.into()));
        self
    }

    pub fn then_id(mut self, id: PartId) -> Self {
        self.segments.push(PathSegment::Id(id));
        self
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    /// Rewrite `Id` segments through `remapping`; ids it does not mention
    /// are left untouched.
    pub fn remap_ids(&self, remapping: &IdRemapping) -> Self {
        let segments = self
            .segments
            .iter()
            .map(|segment| match segment {
                PathSegment::Id(id) => PathSegment::Id(remapping.get(id).copied().unwrap_or(*id)),
                other => other.clone(),
            })
            .collect();
        Self { segments }
    }
}

impl fmt::Display for MemberPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                PathSegment::Member(name) => {
                    if i > 0 {
                        f.write_str(".")?;
                    }
                    f.write_str(name)?;
                }
                PathSegment::Key(key) => write!(f, "[{key:?}]")?,
                PathSegment::Id(id) => write!(f, "[#{id}]")?,
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OverrideSet(BTreeSet<MemberPath>);

impl OverrideSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the path was not already overridden.
    pub fn insert(&mut self, path: MemberPath) -> bool {
        self.0.insert(path)
    }

    pub fn remove(&mut self, path: &MemberPath) -> bool {
        self.0.remove(path)
    }

    pub fn contains(&self, path: &MemberPath) -> bool {
        self.0.contains(path)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &MemberPath> {
        self.0.iter()
    }

    pub fn remap_ids(&self, remapping: &IdRemapping) -> Self {
        Self(self.0.iter().map(|path| path.remap_ids(remapping)).collect())
    }
}

impl FromIterator<MemberPath> for OverrideSet {
    fn from_iter<I: IntoIterator<Item = MemberPath>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
