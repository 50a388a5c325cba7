//! Scenario files: a set of entity documents plus a script of edits.
//!
//! Parts are addressed by `/`-separated name paths from a root, e.g.
//! `"Room/Lamp"`. The first entity with a matching name wins at each level.

use hierloom_model::PartDesign;
use hierloom_sync::{Entity, SessionConfig};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Scenario {
    /// Overrides the `--config` file when present.
    #[serde(default)]
    pub config: Option<SessionConfig>,
    pub documents: Vec<DocumentSpec>,
    #[serde(default)]
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DocumentSpec {
    pub name: String,
    #[serde(default)]
    pub parts: Vec<EntitySpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EntitySpec {
    pub name: String,
    #[serde(default)]
    pub components: BTreeMap<String, String>,
    #[serde(default)]
    pub children: Vec<EntitySpec>,
}

impl EntitySpec {
    /// The entity itself, without its children.
    pub fn design(&self) -> PartDesign<Entity> {
        let mut entity = Entity::new(self.name.clone());
        entity.components = self.components.clone();
        PartDesign::new(entity)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Step {
    /// Instantiate the whole of `archetype` into `into`.
    Instantiate {
        archetype: String,
        into: String,
        #[serde(default)]
        parent: Option<String>,
        #[serde(default)]
        index: Option<usize>,
    },
    Add {
        document: String,
        #[serde(default)]
        parent: Option<String>,
        #[serde(default)]
        index: Option<usize>,
        entity: EntitySpec,
    },
    /// Detach a part without recording it as deleted.
    Remove { document: String, path: String },
    /// User deletion: recorded so the archetype does not bring it back.
    Delete { document: String, paths: Vec<String> },
    Move {
        document: String,
        path: String,
        #[serde(default)]
        parent: Option<String>,
        #[serde(default)]
        index: Option<usize>,
    },
    Rename {
        document: String,
        path: String,
        name: String,
        /// Mark the name as overridden so archetype renames stop applying.
        #[serde(default, rename = "override")]
        mark_override: bool,
    },
    SetComponent {
        document: String,
        path: String,
        key: String,
        value: String,
        #[serde(default, rename = "override")]
        mark_override: bool,
    },
    Reconcile { document: String },
    /// Break archetype links of the given parts.
    Unlink { document: String, paths: Vec<String> },
}

impl Step {
    pub fn label(&self) -> &'static str {
        match self {
            Step::Instantiate { .. } => "instantiate",
            Step::Add { .. } => "add",
            Step::Remove { .. } => "remove",
            Step::Delete { .. } => "delete",
            Step::Move { .. } => "move",
            Step::Rename { .. } => "rename",
            Step::SetComponent { .. } => "set_component",
            Step::Reconcile { .. } => "reconcile",
            Step::Unlink { .. } => "unlink",
        }
    }
}

pub fn split_path(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}
