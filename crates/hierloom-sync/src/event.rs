use hierloom_model::{DocumentId, PartId};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartChange {
    Added,
    Removed,
}

/// Emitted once per sub-hierarchy root attached to or detached from a
/// document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartEvent {
    pub document: DocumentId,
    pub part: PartId,
    pub parent: Option<PartId>,
    pub index: usize,
    pub change: PartChange,
    /// Set when the change was propagated from an archetype rather than made
    /// by the user.
    pub from_base: bool,
}

impl fmt::Display for PartEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = match self.change {
            PartChange::Added => "added",
            PartChange::Removed => "removed",
        };
        write!(f, "{verb} {} in {}", self.part, self.document)?;
        if self.from_base {
            f.write_str(" (from base)")?;
        }
        Ok(())
    }
}
