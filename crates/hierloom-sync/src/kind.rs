//! Per-kind policy hooks.

use hierloom_model::{DocumentId, HierarchyPart, InstanceId, PartDesign};

/// A part that just appeared in an archetype, offered to one instance.
#[derive(Debug)]
pub struct NewBasePart<'a, P> {
    pub archetype: DocumentId,
    pub part: &'a PartDesign<P>,
    pub parent: Option<&'a PartDesign<P>>,
    pub instance_id: InstanceId,
    /// The user deleted this part's counterpart from the instance.
    pub deleted_in_instance: bool,
}

/// The capability a document kind plugs into the propagation engine.
pub trait DocumentKind: Send + Sync + 'static {
    type Part: HierarchyPart;

    fn name(&self) -> &str;

    /// Whether `candidate` should be cloned into its instance at all.
    fn should_add_new_part_from_base(&self, candidate: &NewBasePart<'_, Self::Part>) -> bool {
        !candidate.deleted_in_instance
    }

    /// Bring `derived` back in line with `base` for every member that is not
    /// overridden.
    fn reconcile_with_base(
        &self,
        _derived: &mut PartDesign<Self::Part>,
        _base: &PartDesign<Self::Part>,
    ) {
    }
}
