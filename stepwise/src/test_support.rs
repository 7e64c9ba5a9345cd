//! Test-only helpers for building scenes and small processes.

use std::cell::RefCell;
use std::fs;
use std::rc::Rc;

use tempfile::TempDir;

use crate::core::entity::{BehaviorKind, ConditionKind};
use crate::core::ids::{EntityId, ObjectId, TagId};
use crate::core::scene::Capability;
use crate::core::session::Session;
use crate::core::stage::{LifecycleObserver, Role, Stage, StageChange};
use crate::core::tags::TagRegistry;
use crate::core::tree::ProcessTree;
use crate::io::process_store::write_process;
use crate::io::scene::{SceneDoc, SceneObject, SimulatedScene};

pub const PROCESS_FILE: &str = "process.json";
pub const SCENE_FILE: &str = "scene.json";

/// Scene and tag registry populated object by object.
#[derive(Debug, Clone, Default)]
pub struct SceneFixture {
    pub scene: SimulatedScene,
    pub tags: TagRegistry,
}

impl SceneFixture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tag and return its id.
    pub fn tag(&mut self, label: &str) -> TagId {
        let id = TagId::new();
        self.tags.create_tag(label, id);
        id
    }

    pub fn enableable(&mut self, name: &str, enabled: bool) -> ObjectId {
        let mut object = SceneObject::new(name, &[Capability::Enableable]);
        object.enabled = enabled;
        self.scene.add(object)
    }

    pub fn grabbable(&mut self, name: &str) -> ObjectId {
        self.scene
            .add(SceneObject::new(name, &[Capability::Grabbable]))
    }

    pub fn touchable(&mut self, name: &str) -> ObjectId {
        self.scene
            .add(SceneObject::new(name, &[Capability::Touchable]))
    }

    pub fn snappable(&mut self, name: &str, tag: Option<TagId>) -> ObjectId {
        let mut object = SceneObject::new(name, &[Capability::Snappable, Capability::Grabbable]);
        object.tags.extend(tag);
        self.scene.add(object)
    }

    pub fn snap_zone(&mut self, name: &str) -> ObjectId {
        self.scene.add(SceneObject::new(name, &[Capability::SnapZone]))
    }

    /// A fresh session over a copy of the scene.
    pub fn session(&self) -> Session<SimulatedScene> {
        Session::new(self.scene.clone(), self.tags.clone())
    }

    /// Temporary directory holding `tree` as [`PROCESS_FILE`] and this
    /// scene as [`SCENE_FILE`].
    pub fn write_documents(&self, tree: &ProcessTree) -> TempDir {
        let dir = tempfile::tempdir().expect("tempdir");
        write_process(&dir.path().join(PROCESS_FILE), tree).expect("write process");
        let doc = SceneDoc {
            tags: self.tags.iter().cloned().collect(),
            objects: self.scene.objects().to_vec(),
        };
        let json = serde_json::to_string_pretty(&doc).expect("serialize scene");
        fs::write(dir.path().join(SCENE_FILE), json).expect("write scene");
        dir
    }
}

/// Observer that keeps every stage change. Clones share the same record, so
/// one clone can be boxed into a runner while the test inspects another.
#[derive(Debug, Clone, Default)]
pub struct RecordingObserver {
    changes: Rc<RefCell<Vec<StageChange>>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn changes(&self) -> Vec<StageChange> {
        self.changes.borrow().clone()
    }

    /// Stages `entity` entered, in order.
    pub fn stages_of(&self, entity: EntityId) -> Vec<Stage> {
        self.changes
            .borrow()
            .iter()
            .filter(|c| c.entity == entity)
            .map(|c| c.to)
            .collect()
    }

    /// Names of the steps that started activating, in order.
    pub fn activated_steps(&self) -> Vec<String> {
        self.changes
            .borrow()
            .iter()
            .filter(|c| c.role == Role::Step && c.to == Stage::Activating)
            .map(|c| c.name.clone())
            .collect()
    }
}

impl LifecycleObserver for RecordingObserver {
    fn stage_changed(&mut self, change: &StageChange) {
        self.changes.borrow_mut().push(change.clone());
    }
}

/// Handles into the process built by [`two_step_process`].
#[derive(Debug, Clone, Copy)]
pub struct TwoSteps {
    pub chapter: EntityId,
    pub a: EntityId,
    pub b: EntityId,
}

/// One chapter, steps `a` and `b`. `a` enables `lamp` and moves on once
/// `lever` is grabbed. `b` ends the chapter unconditionally.
pub fn two_step_process(lamp: ObjectId, lever: ObjectId) -> (ProcessTree, TwoSteps) {
    let mut tree = ProcessTree::new("training");
    let chapter = tree.add_chapter("basics");
    let a = tree.add_step(chapter, "a").expect("step a");
    let b = tree.add_step(chapter, "b").expect("step b");
    tree.add_behavior(
        a,
        "enable lamp",
        BehaviorKind::SetObjectEnabled {
            target: lamp.into(),
            enabled: true,
            revert_on_deactivation: false,
        },
    )
    .expect("behavior");
    let to_b = tree.add_transition(a, Some(b)).expect("transition");
    tree.add_condition(to_b, "grab lever", ConditionKind::Grabbed { target: lever })
        .expect("condition");
    tree.add_transition(b, None).expect("end");
    (tree, TwoSteps { chapter, a, b })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::process_store::load_process;
    use crate::io::scene::load_scene;

    #[test]
    fn written_documents_load_back() {
        let mut fixture = SceneFixture::new();
        let tag = fixture.tag("levers");
        let lamp = fixture.enableable("lamp", false);
        let lever = fixture.snappable("lever", Some(tag));
        let (tree, _) = two_step_process(lamp, lever);

        let dir = fixture.write_documents(&tree);
        let loaded = load_process(&dir.path().join(PROCESS_FILE)).expect("process");
        let (scene, tags) = load_scene(&dir.path().join(SCENE_FILE)).expect("scene");

        assert_eq!(loaded.steps(loaded.chapters()[0]).len(), 2);
        assert_eq!(scene.objects(), fixture.scene.objects());
        assert_eq!(tags.label(tag), Some("levers"));
    }
}
