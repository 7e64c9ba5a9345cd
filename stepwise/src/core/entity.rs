//! Entities of the process tree and their data payloads.
//!
//! Every payload here is a flat record: object and tag references are GUIDs,
//! step references are arena ids that the persistence layer maps to keys.
//! Child lists are the only ownership edges.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::ids::{EntityId, ObjectId, TagId};
use crate::core::scene::Target;
use crate::core::stage::{Lifecycle, Role};
use crate::error::EntityLabel;

/// How the children of a behavior group compose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Composition {
    Sequence,
    Parallel,
}

/// Closed set of behaviors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BehaviorKind {
    /// Enable or disable every resolved object when activated.
    SetObjectEnabled {
        target: Target,
        enabled: bool,
        #[serde(default)]
        revert_on_deactivation: bool,
    },
    /// Enable or disable a named component of one object.
    SetComponentEnabled {
        target: ObjectId,
        component: String,
        enabled: bool,
        #[serde(default)]
        revert_on_deactivation: bool,
    },
    /// Hold activation for the given time.
    Delay { seconds: f64 },
    /// Nested behavior collection; children are owned by the entity.
    Group { composition: Composition },
}

impl BehaviorKind {
    /// Scene references made by this behavior (not by its children).
    pub fn references(&self) -> Vec<Target> {
        match self {
            BehaviorKind::SetObjectEnabled { target, .. } => vec![*target],
            BehaviorKind::SetComponentEnabled { target, .. } => vec![Target::Object(*target)],
            BehaviorKind::Delay { .. } | BehaviorKind::Group { .. } => Vec::new(),
        }
    }

    pub fn is_group(&self) -> bool {
        matches!(self, BehaviorKind::Group { .. })
    }
}

/// Closed set of completable conditions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConditionKind {
    Grabbed { target: ObjectId },
    Touched { target: ObjectId },
    Snapped { target: ObjectId, zone: ObjectId },
    /// Any snappable object carrying `tag` snapped into `zone`.
    SnappedWithTag { tag: TagId, zone: ObjectId },
    /// Completes after `seconds` of active time.
    Timeout { seconds: f64 },
}

impl ConditionKind {
    pub fn references(&self) -> Vec<Target> {
        match self {
            ConditionKind::Grabbed { target } | ConditionKind::Touched { target } => {
                vec![Target::Object(*target)]
            }
            ConditionKind::Snapped { target, zone } => {
                vec![Target::Object(*target), Target::Object(*zone)]
            }
            ConditionKind::SnappedWithTag { tag, zone } => {
                vec![Target::Tag(*tag), Target::Object(*zone)]
            }
            ConditionKind::Timeout { .. } => Vec::new(),
        }
    }

    pub fn uses_tag(&self, tag: TagId) -> bool {
        matches!(self, ConditionKind::SnappedWithTag { tag: used, .. } if *used == tag)
    }
}

/// Step configuration: objects and tags that stay unlocked while it runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StepData {
    pub keep_unlocked: Vec<ObjectId>,
    pub tags_to_unlock: Vec<TagId>,
}

impl StepData {
    pub fn keep_unlocked(&mut self, object: ObjectId) {
        if !self.keep_unlocked.contains(&object) {
            self.keep_unlocked.push(object);
        }
    }

    pub fn remove_keep_unlocked(&mut self, object: ObjectId) -> bool {
        let before = self.keep_unlocked.len();
        self.keep_unlocked.retain(|o| *o != object);
        before != self.keep_unlocked.len()
    }

    pub fn add_unlock_tag(&mut self, tag: TagId) {
        if !self.tags_to_unlock.contains(&tag) {
            self.tags_to_unlock.push(tag);
        }
    }

    pub fn remove_unlock_tag(&mut self, tag: TagId) -> bool {
        let before = self.tags_to_unlock.len();
        self.tags_to_unlock.retain(|t| *t != tag);
        before != self.tags_to_unlock.len()
    }

    /// Drop empty references.
    pub fn clean(&mut self) {
        self.keep_unlocked.retain(|o| !o.is_empty());
        self.tags_to_unlock.retain(|t| !t.is_empty());
    }
}

/// Where a transition leads. `None` ends the chapter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransitionData {
    pub target: Option<EntityId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChapterData {
    pub first_step: Option<EntityId>,
}

/// Role-specific payload, child lists and runtime state.
#[derive(Debug)]
pub enum EntityKind {
    Process {
        chapters: Vec<EntityId>,
    },
    Chapter {
        data: ChapterData,
        steps: Vec<EntityId>,
        /// One-shot entry override consumed on the next activation.
        entry: Option<EntityId>,
    },
    Step {
        data: StepData,
        behaviors: Vec<EntityId>,
        transitions: Vec<EntityId>,
        /// Transition that ended the last active stage.
        fired: Option<EntityId>,
    },
    Transition {
        data: TransitionData,
        conditions: Vec<EntityId>,
        is_completed: bool,
    },
    Behavior {
        data: BehaviorKind,
        children: Vec<EntityId>,
    },
    Condition {
        data: ConditionKind,
        is_completed: bool,
    },
}

impl EntityKind {
    pub fn role(&self) -> Role {
        match self {
            EntityKind::Process { .. } => Role::Process,
            EntityKind::Chapter { .. } => Role::Chapter,
            EntityKind::Step { .. } => Role::Step,
            EntityKind::Transition { .. } => Role::Transition,
            EntityKind::Behavior { .. } => Role::Behavior,
            EntityKind::Condition { .. } => Role::Condition,
        }
    }
}

/// A node of the process tree.
#[derive(Debug)]
pub struct Entity {
    pub(crate) name: String,
    pub(crate) uid: Uuid,
    pub(crate) parent: Option<EntityId>,
    pub(crate) kind: EntityKind,
    pub(crate) lifecycle: Lifecycle,
}

impl Entity {
    pub(crate) fn new(name: &str, kind: EntityKind) -> Self {
        Self {
            name: name.to_string(),
            uid: Uuid::new_v4(),
            parent: None,
            kind,
            lifecycle: Lifecycle::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn uid(&self) -> Uuid {
        self.uid
    }

    pub fn parent(&self) -> Option<EntityId> {
        self.parent
    }

    pub fn kind(&self) -> &EntityKind {
        &self.kind
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    pub fn role(&self) -> Role {
        self.kind.role()
    }

    pub fn label(&self) -> EntityLabel {
        EntityLabel {
            name: self.name.clone(),
            uid: self.uid,
        }
    }

    /// Owned children in stored order. Steps list behaviors before transitions.
    pub fn children(&self) -> Vec<EntityId> {
        match &self.kind {
            EntityKind::Process { chapters } => chapters.clone(),
            EntityKind::Chapter { steps, .. } => steps.clone(),
            EntityKind::Step {
                behaviors,
                transitions,
                ..
            } => behaviors.iter().chain(transitions).copied().collect(),
            EntityKind::Transition { conditions, .. } => conditions.clone(),
            EntityKind::Behavior { children, .. } => children.clone(),
            EntityKind::Condition { .. } => Vec::new(),
        }
    }

    /// Completion flag of completable entities (conditions and transitions).
    pub fn is_completed(&self) -> bool {
        match &self.kind {
            EntityKind::Condition { is_completed, .. }
            | EntityKind::Transition { is_completed, .. } => *is_completed,
            _ => false,
        }
    }

    pub(crate) fn set_completed(&mut self, value: bool) {
        match &mut self.kind {
            EntityKind::Condition { is_completed, .. }
            | EntityKind::Transition { is_completed, .. } => *is_completed = value,
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn behavior_data_serializes_as_flat_tagged_record() {
        let target = ObjectId(Uuid::nil());
        let kind = BehaviorKind::SetObjectEnabled {
            target: Target::Object(target),
            enabled: true,
            revert_on_deactivation: false,
        };
        let json = serde_json::to_value(&kind).expect("serialize");
        assert_eq!(json["kind"], "set_object_enabled");
        assert_eq!(json["enabled"], true);
        let back: BehaviorKind = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back, kind);
    }

    #[test]
    fn step_data_clean_drops_empty_references() {
        let mut data = StepData::default();
        let kept = ObjectId::new();
        data.keep_unlocked(kept);
        data.keep_unlocked(kept);
        data.keep_unlocked(ObjectId::default());
        data.add_unlock_tag(TagId::default());
        data.clean();
        assert_eq!(data.keep_unlocked, vec![kept]);
        assert!(data.tags_to_unlock.is_empty());
    }

    #[test]
    fn tag_snap_condition_reports_tag_usage() {
        let tag = TagId::new();
        let condition = ConditionKind::SnappedWithTag {
            tag,
            zone: ObjectId::new(),
        };
        assert!(condition.uses_tag(tag));
        assert!(!condition.uses_tag(TagId::new()));
        assert_eq!(condition.references().len(), 2);
    }
}
