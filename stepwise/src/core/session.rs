//! Session-wide state shared by the entities of a running process.
//!
//! A session is created when playback starts and torn down when it ends.
//! Engine code never reaches it globally; it receives a [`Ctx`] for the
//! duration of one call.

use tracing::{debug, warn};

use crate::core::ids::{EntityId, ObjectId, TagId};
use crate::core::locks::LockRegistry;
use crate::core::scene::{ObjectHandle, Scene};
use crate::core::stage::LifecycleObserver;
use crate::core::tags::TagRegistry;
use crate::core::tree::ProcessTree;
use crate::error::ConfigurationError;

#[derive(Debug)]
pub struct Session<S: Scene> {
    pub scene: S,
    pub tags: TagRegistry,
    pub locks: LockRegistry,
    diagnostics: Vec<ConfigurationError>,
    log_locks: bool,
}

impl<S: Scene> Session<S> {
    pub fn new(scene: S, tags: TagRegistry) -> Self {
        Self {
            scene,
            tags,
            locks: LockRegistry::new(),
            diagnostics: Vec::new(),
            log_locks: false,
        }
    }

    pub fn set_lock_logging(&mut self, enabled: bool) {
        self.log_locks = enabled;
    }

    /// Borrow the session for one engine call.
    pub fn context<'a>(
        &'a mut self,
        observer: &'a mut dyn LifecycleObserver,
        delta: f64,
    ) -> Ctx<'a> {
        Ctx {
            scene: &mut self.scene,
            tags: &self.tags,
            locks: &mut self.locks,
            diagnostics: &mut self.diagnostics,
            observer,
            delta,
            log_locks: self.log_locks,
        }
    }

    pub fn diagnostics(&self) -> &[ConfigurationError] {
        &self.diagnostics
    }

    pub fn take_diagnostics(&mut self) -> Vec<ConfigurationError> {
        std::mem::take(&mut self.diagnostics)
    }

    pub(crate) fn record(&mut self, errors: Vec<ConfigurationError>) {
        for error in errors {
            if !self.diagnostics.contains(&error) {
                warn!(%error, "configuration problem");
                self.diagnostics.push(error);
            }
        }
    }

    /// Remove a tag from the registry and clear its usage in `tree`.
    /// Returns the entities that still reference the removed tag.
    pub fn remove_tag(&mut self, tree: &mut ProcessTree, tag: TagId) -> Vec<EntityId> {
        if !self.tags.remove_tag(tag) {
            return Vec::new();
        }
        let users = tree.clear_tag_usage(tag);
        if !users.is_empty() {
            warn!(%tag, users = users.len(), "removed tag is still referenced");
        }
        users
    }

    /// End the session and hand the scene back.
    pub fn teardown(self) -> S {
        self.scene
    }
}

/// Per-call view of the session handed to the engine.
pub struct Ctx<'a> {
    pub scene: &'a mut dyn Scene,
    pub tags: &'a TagRegistry,
    pub locks: &'a mut LockRegistry,
    pub diagnostics: &'a mut Vec<ConfigurationError>,
    pub observer: &'a mut dyn LifecycleObserver,
    /// Seconds covered by the current quantum.
    pub delta: f64,
    pub log_locks: bool,
}

impl Ctx<'_> {
    /// Record a configuration problem once and keep going.
    pub fn report(&mut self, error: ConfigurationError) {
        if self.diagnostics.contains(&error) {
            return;
        }
        warn!(%error, "configuration problem, degrading to no-op");
        self.diagnostics.push(error);
    }

    pub fn request_locked(&mut self, object: ObjectId, lock: bool, requester: EntityId) {
        if let Some(locked) = self.locks.request_locked(object, lock, requester) {
            if self.log_locks {
                debug!(%object, locked, "lock state changed");
            }
            self.scene.on_lock_changed(ObjectHandle(object), locked);
        }
    }

    pub fn release_all(&mut self, requester: EntityId) {
        for object in self.locks.release_all(requester) {
            if self.log_locks {
                debug!(%object, locked = false, "lock state changed");
            }
            self.scene.on_lock_changed(ObjectHandle(object), false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::entity::ConditionKind;
    use crate::test_support::SceneFixture;

    #[test]
    fn removing_a_tag_clears_unlock_lists_and_reports_users() {
        let mut fixture = SceneFixture::new();
        let tag = fixture.tag("tools");
        let zone = fixture.snap_zone("rack");
        let mut tree = ProcessTree::new("p");
        let chapter = tree.add_chapter("c");
        let step = tree.add_step(chapter, "s").expect("step");
        tree.step_data_mut(step).expect("data").add_unlock_tag(tag);
        let transition = tree.add_transition(step, None).expect("transition");
        let condition = tree
            .add_condition(transition, "stow", ConditionKind::SnappedWithTag { tag, zone })
            .expect("condition");
        let mut session = fixture.session();

        assert_eq!(session.remove_tag(&mut tree, tag), vec![condition]);
        assert!(!session.tags.tag_exists(tag));
        assert!(tree.step_data(step).expect("data").tags_to_unlock.is_empty());
        assert!(session.remove_tag(&mut tree, tag).is_empty());
    }

    #[test]
    fn diagnostics_are_recorded_once() {
        let fixture = SceneFixture::new();
        let mut tree = ProcessTree::new("p");
        let chapter = tree.add_chapter("c");
        let error = ConfigurationError::MissingObject {
            entity: tree.label(chapter),
            object: ObjectId::new(),
        };
        let mut session = fixture.session();
        let mut observer = crate::core::stage::NullObserver;
        {
            let mut cx = session.context(&mut observer, 0.0);
            cx.report(error.clone());
            cx.report(error.clone());
        }
        session.record(vec![error.clone()]);

        assert_eq!(session.take_diagnostics(), vec![error]);
        assert!(session.diagnostics().is_empty());
    }
}
