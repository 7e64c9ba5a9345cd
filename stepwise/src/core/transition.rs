//! Transition selection and routing through a chapter's step graph.

use std::collections::VecDeque;

use crate::core::ids::EntityId;
use crate::core::session::Ctx;
use crate::core::stage::{Exit, Stage};
use crate::core::stage_process::Progress;
use crate::core::tree::ProcessTree;
use crate::error::EngineError;

/// Active-stage process of a step.
///
/// Transitions are evaluated in declaration order and the first one whose
/// conditions are all completed fires. Firing is final for this activation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepWatch {
    step: EntityId,
    behaviors: Vec<EntityId>,
    transitions: Vec<EntityId>,
}

impl StepWatch {
    pub fn new(step: EntityId, behaviors: Vec<EntityId>, transitions: Vec<EntityId>) -> Self {
        Self {
            step,
            behaviors,
            transitions,
        }
    }

    pub(crate) fn start(&self, tree: &mut ProcessTree, cx: &mut Ctx<'_>) {
        for transition in tree.owned(self.step, &self.transitions) {
            tree.activate_entity(cx, transition);
        }
    }

    pub(crate) fn update(
        &self,
        tree: &mut ProcessTree,
        cx: &mut Ctx<'_>,
    ) -> Result<Progress, EngineError> {
        let behaviors = tree.owned(self.step, &self.behaviors);
        let transitions = tree.owned(self.step, &self.transitions);
        for child in behaviors.iter().chain(&transitions) {
            if tree.stage(*child) != Stage::Inactive {
                tree.update_entity(cx, *child)?;
            }
        }

        if transitions.is_empty() {
            tree.set_fired(self.step, None);
            return Ok(Progress::Done);
        }
        if let Some(fired) = select_transition(tree, &transitions) {
            tree.set_fired(self.step, Some(fired));
            return Ok(Progress::Done);
        }
        if transitions.iter().all(|t| is_blocked(tree, *t)) {
            return Err(EngineError::InvalidTransition {
                step: tree.label(self.step),
                reason: "every transition waits on a condition that cannot complete".to_string(),
            });
        }
        Ok(Progress::Running)
    }

    /// Complete the step through its first transition.
    pub(crate) fn fast_forward(&self, tree: &mut ProcessTree, cx: &mut Ctx<'_>) {
        for behavior in tree.owned(self.step, &self.behaviors) {
            tree.mark_fast_forward(cx, behavior);
        }
        if let Some(first) = tree.owned(self.step, &self.transitions).first() {
            tree.mark_fast_forward(cx, *first);
        }
    }
}

/// First transition, in declaration order, whose conditions are all completed.
pub fn select_transition(tree: &ProcessTree, transitions: &[EntityId]) -> Option<EntityId> {
    transitions.iter().copied().find(|t| tree.is_completed(*t))
}

/// A transition is blocked when one of its conditions has settled without
/// completing, or was aborted.
fn is_blocked(tree: &ProcessTree, transition: EntityId) -> bool {
    tree.owned(transition, &tree.conditions(transition))
        .into_iter()
        .any(|condition| {
            let lifecycle = tree.lc(condition);
            let settled = lifecycle.is_active_done()
                || (lifecycle.stage() == Stage::Inactive
                    && lifecycle.last_exit() == Some(Exit::Aborted));
            settled && !tree.is_completed(condition)
        })
}

/// Where a route should lead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteGoal {
    Step(EntityId),
    /// Any transition leaving the chapter.
    ChapterEnd,
}

/// First transition out of `from` on a shortest path to `goal` within
/// `chapter`. Ties are broken by declaration order.
pub fn route(
    tree: &ProcessTree,
    chapter: EntityId,
    from: EntityId,
    goal: RouteGoal,
) -> Option<EntityId> {
    let mut visited = vec![from];
    let mut queue: VecDeque<(EntityId, Option<EntityId>)> = VecDeque::from([(from, None)]);
    while let Some((step, first)) = queue.pop_front() {
        for transition in tree.owned(step, &tree.transitions(step)) {
            let first = first.unwrap_or(transition);
            match (tree.transition_target(transition), goal) {
                (None, RouteGoal::ChapterEnd) => return Some(first),
                (Some(target), RouteGoal::Step(goal)) if target == goal => return Some(first),
                (Some(target), _)
                    if tree.is_owned_by(target, chapter) && !visited.contains(&target) =>
                {
                    visited.push(target);
                    queue.push_back((target, Some(first)));
                }
                _ => {}
            }
        }
    }
    None
}
