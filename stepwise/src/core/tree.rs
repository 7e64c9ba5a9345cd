//! Arena holding a process tree.
//!
//! Collections own their children by id; children refer back to their owner
//! by id only. Detached entities stay in the arena without a parent.

use uuid::Uuid;

use crate::core::entity::{
    BehaviorKind, ChapterData, ConditionKind, Entity, EntityKind, StepData, TransitionData,
};
use crate::core::ids::{EntityId, TagId};
use crate::core::scene::Target;
use crate::core::stage::{Lifecycle, Role, Stage};
use crate::error::{EngineError, EntityLabel};

#[derive(Debug)]
pub struct ProcessTree {
    pub(crate) nodes: Vec<Entity>,
    root: EntityId,
    /// Counts top-level engine calls. A stage process runs at most once per
    /// pass.
    pub(crate) pass: u64,
}

impl ProcessTree {
    /// Create a tree holding an empty process.
    pub fn new(name: &str) -> Self {
        let root = Entity::new(
            name,
            EntityKind::Process {
                chapters: Vec::new(),
            },
        );
        Self {
            nodes: vec![root],
            root: EntityId(0),
            pass: 0,
        }
    }

    pub fn root(&self) -> EntityId {
        self.root
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True while the process has no chapters.
    pub fn is_empty(&self) -> bool {
        self.chapters().is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = EntityId> {
        (0..self.nodes.len()).map(EntityId)
    }

    pub fn get(&self, id: EntityId) -> Result<&Entity, EngineError> {
        self.nodes.get(id.0).ok_or(EngineError::UnknownEntity(id))
    }

    pub(crate) fn node(&self, id: EntityId) -> &Entity {
        &self.nodes[id.0]
    }

    pub(crate) fn node_mut(&mut self, id: EntityId) -> &mut Entity {
        &mut self.nodes[id.0]
    }

    pub(crate) fn lc(&self, id: EntityId) -> &Lifecycle {
        &self.nodes[id.0].lifecycle
    }

    pub(crate) fn lc_mut(&mut self, id: EntityId) -> &mut Lifecycle {
        &mut self.nodes[id.0].lifecycle
    }

    pub fn stage(&self, id: EntityId) -> Stage {
        self.nodes.get(id.0).map_or(Stage::Inactive, |e| e.lifecycle.stage)
    }

    pub fn is_completed(&self, id: EntityId) -> bool {
        self.nodes.get(id.0).is_some_and(Entity::is_completed)
    }

    pub fn label(&self, id: EntityId) -> EntityLabel {
        match self.nodes.get(id.0) {
            Some(entity) => entity.label(),
            None => EntityLabel {
                name: format!("<unknown {id}>"),
                uid: Uuid::nil(),
            },
        }
    }

    pub fn find_by_uid(&self, uid: Uuid) -> Option<EntityId> {
        self.nodes.iter().position(|e| e.uid == uid).map(EntityId)
    }

    pub fn find_by_name(&self, role: Role, name: &str) -> Option<EntityId> {
        self.nodes
            .iter()
            .position(|e| e.role() == role && e.name == name)
            .map(EntityId)
    }

    /// True if `child` is currently owned by `owner`.
    pub fn is_owned_by(&self, child: EntityId, owner: EntityId) -> bool {
        self.nodes.get(child.0).and_then(|e| e.parent) == Some(owner)
    }

    /// Children of `owner` from `snapshot` that it still owns.
    pub(crate) fn owned(&self, owner: EntityId, snapshot: &[EntityId]) -> Vec<EntityId> {
        snapshot
            .iter()
            .copied()
            .filter(|c| self.is_owned_by(*c, owner))
            .collect()
    }

    pub fn children(&self, id: EntityId) -> Vec<EntityId> {
        self.nodes.get(id.0).map(Entity::children).unwrap_or_default()
    }

    pub fn chapters(&self) -> Vec<EntityId> {
        self.children(self.root)
    }

    pub fn steps(&self, chapter: EntityId) -> Vec<EntityId> {
        match self.nodes.get(chapter.0).map(|e| &e.kind) {
            Some(EntityKind::Chapter { steps, .. }) => steps.clone(),
            _ => Vec::new(),
        }
    }

    pub fn behaviors(&self, step: EntityId) -> Vec<EntityId> {
        match self.nodes.get(step.0).map(|e| &e.kind) {
            Some(EntityKind::Step { behaviors, .. }) => behaviors.clone(),
            _ => Vec::new(),
        }
    }

    pub fn transitions(&self, step: EntityId) -> Vec<EntityId> {
        match self.nodes.get(step.0).map(|e| &e.kind) {
            Some(EntityKind::Step { transitions, .. }) => transitions.clone(),
            _ => Vec::new(),
        }
    }

    pub fn conditions(&self, transition: EntityId) -> Vec<EntityId> {
        match self.nodes.get(transition.0).map(|e| &e.kind) {
            Some(EntityKind::Transition { conditions, .. }) => conditions.clone(),
            _ => Vec::new(),
        }
    }

    pub fn transition_target(&self, transition: EntityId) -> Option<EntityId> {
        match self.nodes.get(transition.0).map(|e| &e.kind) {
            Some(EntityKind::Transition { data, .. }) => data.target,
            _ => None,
        }
    }

    pub fn first_step(&self, chapter: EntityId) -> Option<EntityId> {
        match self.nodes.get(chapter.0).map(|e| &e.kind) {
            Some(EntityKind::Chapter { data, steps, .. }) => {
                data.first_step.or_else(|| steps.first().copied())
            }
            _ => None,
        }
    }

    /// Transition that ended the step's last active stage.
    pub fn fired_transition(&self, step: EntityId) -> Option<EntityId> {
        match self.nodes.get(step.0).map(|e| &e.kind) {
            Some(EntityKind::Step { fired, .. }) => *fired,
            _ => None,
        }
    }

    pub fn step_data(&self, step: EntityId) -> Option<&StepData> {
        match self.nodes.get(step.0).map(|e| &e.kind) {
            Some(EntityKind::Step { data, .. }) => Some(data),
            _ => None,
        }
    }

    pub fn step_data_mut(&mut self, step: EntityId) -> Result<&mut StepData, EngineError> {
        let label = self.label(step);
        match self.nodes.get_mut(step.0).map(|e| &mut e.kind) {
            Some(EntityKind::Step { data, .. }) => Ok(data),
            Some(_) => Err(EngineError::WrongKind {
                entity: label,
                expected: "step",
            }),
            None => Err(EngineError::UnknownEntity(step)),
        }
    }

    pub fn behavior_data(&self, behavior: EntityId) -> Option<&BehaviorKind> {
        match self.nodes.get(behavior.0).map(|e| &e.kind) {
            Some(EntityKind::Behavior { data, .. }) => Some(data),
            _ => None,
        }
    }

    pub fn condition_data(&self, condition: EntityId) -> Option<&ConditionKind> {
        match self.nodes.get(condition.0).map(|e| &e.kind) {
            Some(EntityKind::Condition { data, .. }) => Some(data),
            _ => None,
        }
    }

    /// Chapter owning `step`, if any.
    pub fn chapter_of(&self, step: EntityId) -> Option<EntityId> {
        let parent = self.nodes.get(step.0)?.parent?;
        (self.nodes[parent.0].role() == Role::Chapter).then_some(parent)
    }

    pub fn add_chapter(&mut self, name: &str) -> EntityId {
        let id = self.push(Entity::new(
            name,
            EntityKind::Chapter {
                data: ChapterData::default(),
                steps: Vec::new(),
                entry: None,
            },
        ));
        self.link(self.root, id);
        id
    }

    pub fn add_step(&mut self, chapter: EntityId, name: &str) -> Result<EntityId, EngineError> {
        self.expect_role(chapter, Role::Chapter, "chapter")?;
        let id = self.push(Entity::new(
            name,
            EntityKind::Step {
                data: StepData::default(),
                behaviors: Vec::new(),
                transitions: Vec::new(),
                fired: None,
            },
        ));
        self.link(chapter, id);
        Ok(id)
    }

    /// Add a behavior to a step or to a behavior group.
    pub fn add_behavior(
        &mut self,
        owner: EntityId,
        name: &str,
        kind: BehaviorKind,
    ) -> Result<EntityId, EngineError> {
        let owner_ok = match self.get(owner)?.kind() {
            EntityKind::Step { .. } => true,
            EntityKind::Behavior { data, .. } => data.is_group(),
            _ => false,
        };
        if !owner_ok {
            return Err(EngineError::WrongKind {
                entity: self.label(owner),
                expected: "step or behavior group",
            });
        }
        let id = self.push(Entity::new(
            name,
            EntityKind::Behavior {
                data: kind,
                children: Vec::new(),
            },
        ));
        self.link(owner, id);
        Ok(id)
    }

    pub fn add_transition(
        &mut self,
        step: EntityId,
        target: Option<EntityId>,
    ) -> Result<EntityId, EngineError> {
        self.expect_role(step, Role::Step, "step")?;
        if let Some(target) = target {
            self.expect_role(target, Role::Step, "step")?;
        }
        let name = match target {
            Some(target) => format!("to {}", self.nodes[target.0].name),
            None => "end of chapter".to_string(),
        };
        let id = self.push(Entity::new(
            &name,
            EntityKind::Transition {
                data: TransitionData { target },
                conditions: Vec::new(),
                is_completed: false,
            },
        ));
        self.link(step, id);
        Ok(id)
    }

    pub fn add_condition(
        &mut self,
        transition: EntityId,
        name: &str,
        kind: ConditionKind,
    ) -> Result<EntityId, EngineError> {
        self.expect_role(transition, Role::Transition, "transition")?;
        let id = self.push(Entity::new(
            name,
            EntityKind::Condition {
                data: kind,
                is_completed: false,
            },
        ));
        self.link(transition, id);
        Ok(id)
    }

    pub fn set_first_step(&mut self, chapter: EntityId, step: EntityId) -> Result<(), EngineError> {
        self.expect_role(step, Role::Step, "step")?;
        let label = self.label(chapter);
        match self.nodes.get_mut(chapter.0).map(|e| &mut e.kind) {
            Some(EntityKind::Chapter { data, .. }) => {
                data.first_step = Some(step);
                Ok(())
            }
            Some(_) => Err(EngineError::WrongKind {
                entity: label,
                expected: "chapter",
            }),
            None => Err(EngineError::UnknownEntity(chapter)),
        }
    }

    pub fn set_transition_target(
        &mut self,
        transition: EntityId,
        target: Option<EntityId>,
    ) -> Result<(), EngineError> {
        if let Some(target) = target {
            self.expect_role(target, Role::Step, "step")?;
        }
        let label = self.label(transition);
        match self.nodes.get_mut(transition.0).map(|e| &mut e.kind) {
            Some(EntityKind::Transition { data, .. }) => {
                data.target = target;
                Ok(())
            }
            Some(_) => Err(EngineError::WrongKind {
                entity: label,
                expected: "transition",
            }),
            None => Err(EngineError::UnknownEntity(transition)),
        }
    }

    pub fn set_uid(&mut self, id: EntityId, uid: Uuid) -> Result<(), EngineError> {
        self.nodes
            .get_mut(id.0)
            .ok_or(EngineError::UnknownEntity(id))?
            .uid = uid;
        Ok(())
    }

    /// Replace a behavior's payload. Takes effect on its next activation.
    pub fn set_behavior_data(&mut self, id: EntityId, kind: BehaviorKind) -> Result<(), EngineError> {
        let label = self.label(id);
        match self.nodes.get_mut(id.0).map(|e| &mut e.kind) {
            Some(EntityKind::Behavior { data, .. }) => {
                *data = kind;
                Ok(())
            }
            Some(_) => Err(EngineError::WrongKind {
                entity: label,
                expected: "behavior",
            }),
            None => Err(EngineError::UnknownEntity(id)),
        }
    }

    /// Remove `child` from its owner. The child must be inactive.
    pub fn detach(&mut self, child: EntityId) -> Result<(), EngineError> {
        let entity = self.get(child)?;
        if entity.lifecycle.stage != Stage::Inactive {
            return Err(EngineError::EntityBusy {
                entity: entity.label(),
                stage: entity.lifecycle.stage,
            });
        }
        let Some(owner) = entity.parent else {
            return Ok(());
        };
        let remove = |list: &mut Vec<EntityId>| list.retain(|c| *c != child);
        match &mut self.nodes[owner.0].kind {
            EntityKind::Process { chapters } => remove(chapters),
            EntityKind::Chapter { data, steps, entry } => {
                remove(steps);
                if data.first_step == Some(child) {
                    data.first_step = None;
                }
                if *entry == Some(child) {
                    *entry = None;
                }
            }
            EntityKind::Step {
                behaviors,
                transitions,
                ..
            } => {
                remove(behaviors);
                remove(transitions);
            }
            EntityKind::Transition { conditions, .. } => remove(conditions),
            EntityKind::Behavior { children, .. } => remove(children),
            EntityKind::Condition { .. } => {}
        }
        self.nodes[child.0].parent = None;
        Ok(())
    }

    /// Give an unowned entity to `owner`, appending it to the matching child list.
    pub fn attach(&mut self, owner: EntityId, child: EntityId) -> Result<(), EngineError> {
        let entity = self.get(child)?;
        if let Some(parent) = entity.parent {
            return Err(EngineError::AlreadyOwned {
                entity: entity.label(),
                parent: self.label(parent),
            });
        }
        let child_role = entity.role();
        let accepts = match &self.get(owner)?.kind {
            EntityKind::Process { .. } => child_role == Role::Chapter,
            EntityKind::Chapter { .. } => child_role == Role::Step,
            EntityKind::Step { .. } => matches!(child_role, Role::Behavior | Role::Transition),
            EntityKind::Transition { .. } => child_role == Role::Condition,
            EntityKind::Behavior { data, .. } => data.is_group() && child_role == Role::Behavior,
            EntityKind::Condition { .. } => false,
        };
        if !accepts || owner == child {
            return Err(EngineError::WrongKind {
                entity: self.label(owner),
                expected: "owner for this child role",
            });
        }
        self.link(owner, child);
        Ok(())
    }

    /// Steps still referencing `tag` lose it from their unlock lists; returns
    /// the behaviors and conditions that keep referencing it.
    pub fn clear_tag_usage(&mut self, tag: TagId) -> Vec<EntityId> {
        let mut users = Vec::new();
        for (index, entity) in self.nodes.iter_mut().enumerate() {
            match &mut entity.kind {
                EntityKind::Step { data, .. } => {
                    data.remove_unlock_tag(tag);
                }
                EntityKind::Condition { data, .. } if data.uses_tag(tag) => {
                    users.push(EntityId(index));
                }
                EntityKind::Behavior { data, .. }
                    if data.references().contains(&Target::Tag(tag)) =>
                {
                    users.push(EntityId(index));
                }
                _ => {}
            }
        }
        users
    }

    pub(crate) fn take_chapter_entry(&mut self, chapter: EntityId) -> Option<EntityId> {
        match &mut self.nodes[chapter.0].kind {
            EntityKind::Chapter { entry, .. } => entry.take(),
            _ => None,
        }
    }

    pub(crate) fn set_chapter_entry(&mut self, chapter: EntityId, step: EntityId) {
        if let EntityKind::Chapter { entry, .. } = &mut self.nodes[chapter.0].kind {
            *entry = Some(step);
        }
    }

    pub(crate) fn set_fired(&mut self, step: EntityId, transition: Option<EntityId>) {
        if let EntityKind::Step { fired, .. } = &mut self.nodes[step.0].kind {
            *fired = transition;
        }
    }

    fn push(&mut self, entity: Entity) -> EntityId {
        self.nodes.push(entity);
        EntityId(self.nodes.len() - 1)
    }

    fn link(&mut self, owner: EntityId, child: EntityId) {
        let child_role = self.nodes[child.0].role();
        match &mut self.nodes[owner.0].kind {
            EntityKind::Process { chapters } => chapters.push(child),
            EntityKind::Chapter { steps, .. } => steps.push(child),
            EntityKind::Step {
                behaviors,
                transitions,
                ..
            } => {
                if child_role == Role::Transition {
                    transitions.push(child);
                } else {
                    behaviors.push(child);
                }
            }
            EntityKind::Transition { conditions, .. } => conditions.push(child),
            EntityKind::Behavior { children, .. } => children.push(child),
            EntityKind::Condition { .. } => return,
        }
        self.nodes[child.0].parent = Some(owner);
    }

    fn expect_role(
        &self,
        id: EntityId,
        role: Role,
        expected: &'static str,
    ) -> Result<(), EngineError> {
        if self.get(id)?.role() != role {
            return Err(EngineError::WrongKind {
                entity: self.label(id),
                expected,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::entity::Composition;

    #[test]
    fn builders_link_children_in_order() {
        let mut tree = ProcessTree::new("p");
        assert!(tree.is_empty());
        let chapter = tree.add_chapter("c");
        assert!(!tree.is_empty());
        let a = tree.add_step(chapter, "a").expect("a");
        let b = tree.add_step(chapter, "b").expect("b");
        let t = tree.add_transition(a, Some(b)).expect("t");

        assert_eq!(tree.chapters(), vec![chapter]);
        assert_eq!(tree.steps(chapter), vec![a, b]);
        assert_eq!(tree.transitions(a), vec![t]);
        assert_eq!(tree.transition_target(t), Some(b));
        assert_eq!(tree.first_step(chapter), Some(a));
        assert_eq!(tree.chapter_of(b), Some(chapter));
    }

    #[test]
    fn wrong_owner_kinds_are_rejected() {
        let mut tree = ProcessTree::new("p");
        let chapter = tree.add_chapter("c");
        let step = tree.add_step(chapter, "s").expect("step");
        let delay = tree
            .add_behavior(step, "wait", BehaviorKind::Delay { seconds: 1.0 })
            .expect("delay");

        assert!(matches!(
            tree.add_step(step, "nested"),
            Err(EngineError::WrongKind { .. })
        ));
        assert!(matches!(
            tree.add_behavior(delay, "child", BehaviorKind::Delay { seconds: 1.0 }),
            Err(EngineError::WrongKind { .. })
        ));
        let group = tree
            .add_behavior(
                step,
                "group",
                BehaviorKind::Group {
                    composition: Composition::Parallel,
                },
            )
            .expect("group");
        assert!(tree
            .add_behavior(group, "child", BehaviorKind::Delay { seconds: 1.0 })
            .is_ok());
    }

    #[test]
    fn reparenting_requires_detach_first() {
        let mut tree = ProcessTree::new("p");
        let chapter = tree.add_chapter("c");
        let a = tree.add_step(chapter, "a").expect("a");
        let b = tree.add_step(chapter, "b").expect("b");
        let t = tree.add_transition(a, None).expect("t");

        assert!(matches!(
            tree.attach(b, t),
            Err(EngineError::AlreadyOwned { .. })
        ));
        tree.detach(t).expect("detach");
        assert!(tree.transitions(a).is_empty());
        tree.attach(b, t).expect("attach");
        assert_eq!(tree.transitions(b), vec![t]);
        assert!(tree.is_owned_by(t, b));
    }
}
