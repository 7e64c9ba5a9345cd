//! Forced completion of conditions and behaviors.
//!
//! Autocompleting an entity leaves the scene in the state a natural
//! completion would have produced, and does nothing for entities that are
//! already complete.

use crate::core::ids::EntityId;
use crate::core::scene::{ObjectHandle, SceneProvider};
use crate::core::session::Ctx;
use crate::core::stage::{Role, Stage};
use crate::core::tree::ProcessTree;
use crate::error::EngineError;

/// Which tagged object to snap into `zone` when autocompleting a tag-based
/// snap condition.
///
/// Candidates are in scene registration order. Returns `None` if one of them
/// already sits in the zone; otherwise prefers the first candidate not
/// snapped anywhere, then the first candidate.
pub fn pick_snap_candidate<S: SceneProvider + ?Sized>(
    scene: &S,
    candidates: &[ObjectHandle],
    zone: ObjectHandle,
) -> Option<ObjectHandle> {
    if candidates
        .iter()
        .any(|c| scene.snapped_zone(*c) == Some(zone))
    {
        return None;
    }
    candidates
        .iter()
        .copied()
        .find(|c| scene.snapped_zone(*c).is_none())
        .or_else(|| candidates.first().copied())
}

impl ProcessTree {
    /// Force `id` to complete. Returns whether anything had to be done.
    ///
    /// Conditions complete with their scene side effect, behaviors finish
    /// activating, transitions autocomplete each of their conditions, and
    /// collections fast-forward.
    pub fn autocomplete(&mut self, cx: &mut Ctx<'_>, id: EntityId) -> Result<bool, EngineError> {
        let entity = self.get(id)?;
        let lifecycle = entity.lifecycle();
        if lifecycle.stage() == Stage::Inactive {
            return Ok(false);
        }
        match entity.role() {
            Role::Condition if entity.is_completed() => Ok(false),
            Role::Behavior if lifecycle.is_active_done() => Ok(false),
            Role::Transition => {
                if entity.is_completed() {
                    return Ok(false);
                }
                let mut applied = false;
                for condition in self.owned(id, &self.conditions(id)) {
                    applied |= self.autocomplete(cx, condition)?;
                }
                self.update_entity(cx, id)?;
                Ok(applied)
            }
            _ => {
                self.fast_forward(cx, id)?;
                Ok(true)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::entity::ConditionKind;
    use crate::core::stage::NullObserver;
    use crate::test_support::SceneFixture;

    #[test]
    fn tie_break_prefers_free_candidates_in_registration_order() {
        let mut fixture = SceneFixture::new();
        let tag = fixture.tag("screw");
        let zone = fixture.snap_zone("socket");
        let other = fixture.snap_zone("tray");
        let first = fixture.snappable("screw a", Some(tag));
        let second = fixture.snappable("screw b", Some(tag));
        fixture.scene.snap(first, other);

        let handles = [ObjectHandle(first), ObjectHandle(second)];
        let picked = pick_snap_candidate(&fixture.scene, &handles, ObjectHandle(zone));
        assert_eq!(picked, Some(ObjectHandle(second)));

        fixture.scene.snap(second, zone);
        assert_eq!(
            pick_snap_candidate(&fixture.scene, &handles, ObjectHandle(zone)),
            None
        );
    }

    #[test]
    fn autocompleting_a_condition_twice_is_idempotent() {
        let mut fixture = SceneFixture::new();
        let lever = fixture.grabbable("lever");
        let mut tree = ProcessTree::new("p");
        let chapter = tree.add_chapter("c");
        let step = tree.add_step(chapter, "s").expect("step");
        let transition = tree.add_transition(step, None).expect("transition");
        let condition = tree
            .add_condition(transition, "grab", ConditionKind::Grabbed { target: lever })
            .expect("condition");

        let mut session = fixture.session();
        let mut observer = NullObserver;
        let mut cx = session.context(&mut observer, 0.02);
        tree.activate(&mut cx, condition).expect("activate");
        tree.update(&mut cx, condition).expect("update");
        assert!(!tree.is_completed(condition));

        assert!(tree.autocomplete(&mut cx, condition).expect("first"));
        assert!(tree.is_completed(condition));
        assert!(!tree.autocomplete(&mut cx, condition).expect("second"));
        assert!(tree.is_completed(condition));
        assert_eq!(session.scene.grab_count(lever), 1);
    }

    #[test]
    fn forced_completion_completes_an_unresolvable_condition() {
        let missing = SceneFixture::new().grabbable("elsewhere");
        let fixture = SceneFixture::new();
        let mut tree = ProcessTree::new("p");
        let chapter = tree.add_chapter("c");
        let step = tree.add_step(chapter, "s").expect("step");
        let transition = tree.add_transition(step, None).expect("transition");
        let settled = tree
            .add_condition(transition, "settled", ConditionKind::Grabbed { target: missing })
            .expect("condition");
        let fresh = tree
            .add_condition(transition, "fresh", ConditionKind::Grabbed { target: missing })
            .expect("condition");

        let mut session = fixture.session();
        let mut observer = NullObserver;
        let mut cx = session.context(&mut observer, 0.02);
        tree.activate(&mut cx, settled).expect("activate");
        tree.update(&mut cx, settled).expect("update");
        assert!(tree.node(settled).lifecycle().is_active_done());
        assert!(!tree.is_completed(settled));

        assert!(tree.autocomplete(&mut cx, settled).expect("after update"));
        assert!(tree.is_completed(settled));
        assert!(tree.node(settled).lifecycle().is_active_done());

        tree.activate(&mut cx, fresh).expect("activate");
        assert!(tree.autocomplete(&mut cx, fresh).expect("before update"));
        assert!(tree.is_completed(fresh));
        assert!(tree.node(fresh).lifecycle().is_active_done());
    }
}
