use crate::ids::PartId;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum HierarchyError {
    #[error("Unknown part {0}")]
    UnknownPart(PartId),

    #[error("Part {0} is already present in the hierarchy")]
    DuplicatePart(PartId),

    #[error("Index {index} out of range under {} (len {len})", display_parent(.parent))]
    IndexOutOfRange {
        parent: Option<PartId>,
        index: usize,
        len: usize,
    },

    #[error("Part {parent} does not accept a child at index {index}")]
    ChildRejected { parent: PartId, index: usize },

    #[error("Clone roots overlap: {descendant} is a descendant of {ancestor}")]
    OverlappingRoots { ancestor: PartId, descendant: PartId },

    #[error("Descendant {child} of {parent} is missing from the source hierarchy")]
    MissingDescendant { parent: PartId, child: PartId },

    #[error("Cannot move {part} under its own descendant {target}")]
    CyclicMove { part: PartId, target: PartId },

    #[error("Structural invariant violated: {0}")]
    Structure(String),
}

fn display_parent(parent: &Option<PartId>) -> String {
    match parent {
        Some(id) => id.to_string(),
        None => "root".to_string(),
    }
}

pub type Result<T> = std::result::Result<T, HierarchyError>;
