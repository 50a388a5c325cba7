use hierloom_model::{DocumentId, HierarchyError, PartId};

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Hierarchy(#[from] HierarchyError),

    #[error("Unknown document {0}")]
    UnknownDocument(DocumentId),

    #[error("Document {0} is already loaded")]
    DuplicateDocument(DocumentId),

    #[error("Instantiating {archetype} into {target} would make a document its own archetype")]
    CyclicArchetype {
        archetype: DocumentId,
        target: DocumentId,
    },

    #[error("Archetype {0} has no parts to instantiate")]
    EmptyInstantiation(DocumentId),

    #[error("Invalid edit of part {part}: {reason}")]
    InvalidEdit { part: PartId, reason: String },

    #[error("Propagation invariant violated: {0}")]
    Invariant(String),
}

pub type Result<T> = std::result::Result<T, SyncError>;
