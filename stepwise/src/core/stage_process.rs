//! Stage processes: the work an entity does while it occupies a stage.
//!
//! Every process follows the same protocol. `start` runs once on entering the
//! stage, `update` runs every quantum until it reports [`Progress::Done`],
//! `end` releases what the process holds when the stage is cut short, and
//! `fast_forward` collapses the remaining work so that the next `update`
//! finishes. The set of processes is closed and chosen per role and stage by
//! [`StageProcess::for_stage`].

use crate::core::autocomplete::pick_snap_candidate;
use crate::core::collection::{ChildSet, Order, SequenceCursor, Settle};
use crate::core::entity::{BehaviorKind, Composition, ConditionKind, EntityKind};
use crate::core::ids::EntityId;
use crate::core::references::{ConditionObjects, resolve_behavior, resolve_condition};
use crate::core::session::Ctx;
use crate::core::stage::{Role, Stage};
use crate::core::transition::StepWatch;
use crate::core::tree::ProcessTree;
use crate::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    Running,
    Done,
}

#[derive(Debug)]
pub enum StageProcess {
    /// Finishes on its first update.
    Noop,
    /// Applies a behavior's scene effect on start, or its inverse when `revert`.
    Effect { revert: bool },
    Delay { remaining: f64 },
    /// Evaluates a condition's completion predicate.
    Watch(ConditionWatch),
    /// Activate every child and wait until they settle.
    ActivateAll { set: ChildSet, until: Settle },
    /// Wait until every child is completed.
    AwaitAll(ChildSet),
    /// Run children one at a time.
    Sequence(SequenceCursor),
    /// Active stage of a step: wait for a transition to fire.
    StepActive(StepWatch),
    /// Deactivate every child and drain.
    DeactivateAll(ChildSet),
    /// Abort every child and drain.
    AbortAll(ChildSet),
}

impl StageProcess {
    /// Process run by `id` while in `stage`.
    pub(crate) fn for_stage(tree: &mut ProcessTree, id: EntityId, stage: Stage) -> Self {
        let children = tree.children(id);
        if stage == Stage::Aborting {
            return if children.is_empty() {
                StageProcess::Noop
            } else {
                StageProcess::AbortAll(ChildSet::new(id, children))
            };
        }
        let entry = if tree.node(id).role() == Role::Chapter && stage == Stage::Active {
            tree.take_chapter_entry(id).or_else(|| tree.first_step(id))
        } else {
            None
        };
        let deactivate = || StageProcess::DeactivateAll(ChildSet::new(id, children.clone()));
        match (tree.node(id).kind(), stage) {
            (EntityKind::Process { chapters }, Stage::Active) => {
                let first = chapters.first().copied();
                StageProcess::Sequence(SequenceCursor::new(id, Order::List, first))
            }
            (EntityKind::Chapter { .. }, Stage::Active) => {
                StageProcess::Sequence(SequenceCursor::new(id, Order::Graph, entry))
            }
            (EntityKind::Process { .. } | EntityKind::Chapter { .. }, Stage::Deactivating) => {
                deactivate()
            }
            (EntityKind::Step { behaviors, .. }, Stage::Activating) => StageProcess::ActivateAll {
                set: ChildSet::new(id, behaviors.clone()),
                until: Settle::ActiveDone,
            },
            (
                EntityKind::Step {
                    behaviors,
                    transitions,
                    ..
                },
                Stage::Active,
            ) => StageProcess::StepActive(StepWatch::new(
                id,
                behaviors.clone(),
                transitions.clone(),
            )),
            (
                EntityKind::Step {
                    behaviors,
                    transitions,
                    ..
                },
                Stage::Deactivating,
            ) => {
                let order = transitions.iter().chain(behaviors).copied().collect();
                StageProcess::DeactivateAll(ChildSet::new(id, order))
            }
            (EntityKind::Transition { conditions, .. }, Stage::Activating) => {
                StageProcess::ActivateAll {
                    set: ChildSet::new(id, conditions.clone()),
                    until: Settle::Activated,
                }
            }
            (EntityKind::Transition { conditions, .. }, Stage::Active) => {
                StageProcess::AwaitAll(ChildSet::new(id, conditions.clone()))
            }
            (EntityKind::Transition { .. }, Stage::Deactivating) => deactivate(),
            (EntityKind::Behavior { data, children }, stage) => {
                behavior_process(id, data, children, stage)
            }
            (EntityKind::Condition { .. }, Stage::Active) => {
                StageProcess::Watch(ConditionWatch::default())
            }
            _ => StageProcess::Noop,
        }
    }

    pub(crate) fn start(&mut self, tree: &mut ProcessTree, cx: &mut Ctx<'_>, owner: EntityId) {
        match self {
            StageProcess::Noop
            | StageProcess::Delay { .. }
            | StageProcess::AwaitAll(_)
            | StageProcess::Sequence(_) => {}
            StageProcess::Effect { revert } => apply_effect(tree, cx, owner, *revert),
            StageProcess::Watch(watch) => watch.start(tree, cx, owner),
            StageProcess::ActivateAll { set, .. } => set.activate_all(tree, cx),
            StageProcess::StepActive(watch) => watch.start(tree, cx),
            StageProcess::DeactivateAll(set) => set.deactivate_all(tree, cx),
            StageProcess::AbortAll(set) => set.abort_all(tree, cx),
        }
    }

    pub(crate) fn update(
        &mut self,
        tree: &mut ProcessTree,
        cx: &mut Ctx<'_>,
        owner: EntityId,
    ) -> Result<Progress, EngineError> {
        let progress = match self {
            StageProcess::Noop | StageProcess::Effect { .. } => Progress::Done,
            StageProcess::Delay { remaining } => {
                *remaining -= cx.delta;
                if *remaining <= 0.0 {
                    Progress::Done
                } else {
                    Progress::Running
                }
            }
            StageProcess::Watch(watch) => watch.update(tree, cx, owner),
            StageProcess::ActivateAll { set, until } => {
                set.update_all(tree, cx)?;
                done_if(set.settled(tree, *until))
            }
            StageProcess::AwaitAll(set) => {
                set.update_all(tree, cx)?;
                let done = set.all_completed(tree);
                if done {
                    tree.node_mut(owner).set_completed(true);
                }
                done_if(done)
            }
            StageProcess::Sequence(cursor) => cursor.update(tree, cx)?,
            StageProcess::StepActive(watch) => watch.update(tree, cx)?,
            StageProcess::DeactivateAll(set) | StageProcess::AbortAll(set) => {
                set.update_all(tree, cx)?;
                done_if(set.all_inactive(tree))
            }
        };
        Ok(progress)
    }

    /// Release resources when the stage is left before the process finished.
    pub(crate) fn end(&mut self, _tree: &mut ProcessTree, _cx: &mut Ctx<'_>, _owner: EntityId) {
        if let StageProcess::Watch(watch) = self {
            watch.release();
        }
    }

    /// Returns true when a process that already reported done has work
    /// again and must run on the next update.
    pub(crate) fn fast_forward(
        &mut self,
        tree: &mut ProcessTree,
        cx: &mut Ctx<'_>,
        owner: EntityId,
    ) -> bool {
        match self {
            StageProcess::Noop
            | StageProcess::Effect { .. }
            | StageProcess::DeactivateAll(_)
            | StageProcess::AbortAll(_) => {}
            StageProcess::Delay { remaining } => *remaining = 0.0,
            StageProcess::Watch(watch) => {
                watch.fast_forward(tree, cx, owner);
                return !tree.is_completed(owner);
            }
            StageProcess::ActivateAll { set, .. } | StageProcess::AwaitAll(set) => {
                set.fast_forward_all(tree, cx);
            }
            StageProcess::Sequence(cursor) => cursor.fast_forward(tree, cx),
            StageProcess::StepActive(watch) => watch.fast_forward(tree, cx),
        }
        false
    }
}

fn done_if(done: bool) -> Progress {
    if done { Progress::Done } else { Progress::Running }
}

fn behavior_process(
    id: EntityId,
    data: &BehaviorKind,
    children: &[EntityId],
    stage: Stage,
) -> StageProcess {
    match (data, stage) {
        (
            BehaviorKind::SetObjectEnabled { .. } | BehaviorKind::SetComponentEnabled { .. },
            Stage::Activating,
        ) => StageProcess::Effect { revert: false },
        (
            BehaviorKind::SetObjectEnabled {
                revert_on_deactivation: true,
                ..
            }
            | BehaviorKind::SetComponentEnabled {
                revert_on_deactivation: true,
                ..
            },
            Stage::Deactivating,
        ) => StageProcess::Effect { revert: true },
        (BehaviorKind::Delay { seconds }, Stage::Activating) => {
            StageProcess::Delay { remaining: *seconds }
        }
        (
            BehaviorKind::Group {
                composition: Composition::Parallel,
            },
            Stage::Activating,
        ) => StageProcess::ActivateAll {
            set: ChildSet::new(id, children.to_vec()),
            until: Settle::ActiveDone,
        },
        (
            BehaviorKind::Group {
                composition: Composition::Sequence,
            },
            Stage::Activating,
        ) => StageProcess::Sequence(SequenceCursor::new(
            id,
            Order::List,
            children.first().copied(),
        )),
        (BehaviorKind::Group { .. }, Stage::Deactivating) => {
            StageProcess::DeactivateAll(ChildSet::new(id, children.to_vec()))
        }
        _ => StageProcess::Noop,
    }
}

/// Apply an enable-style behavior to the scene. Unresolvable references are
/// reported and the behavior does nothing.
fn apply_effect(tree: &ProcessTree, cx: &mut Ctx<'_>, id: EntityId, revert: bool) {
    let Some(kind) = tree.behavior_data(id) else {
        return;
    };
    let label = tree.label(id);
    let handles = match resolve_behavior(&*cx.scene, cx.tags, &label, kind) {
        Ok(handles) => handles,
        Err(error) => {
            cx.report(error);
            return;
        }
    };
    match kind {
        BehaviorKind::SetObjectEnabled { enabled, .. } => {
            for handle in handles {
                cx.scene.set_enabled(handle, *enabled != revert);
            }
        }
        BehaviorKind::SetComponentEnabled {
            component, enabled, ..
        } => {
            for handle in handles {
                cx.scene
                    .set_component_enabled(handle, component, *enabled != revert);
            }
        }
        BehaviorKind::Delay { .. } | BehaviorKind::Group { .. } => {}
    }
}

/// Active-stage process of a condition.
#[derive(Debug, Default)]
pub struct ConditionWatch {
    objects: ConditionObjects,
    elapsed: f64,
    forced: bool,
    /// References could not be resolved; the condition can never complete
    /// on its own.
    degraded: bool,
}

impl ConditionWatch {
    fn start(&mut self, tree: &ProcessTree, cx: &mut Ctx<'_>, id: EntityId) {
        let Some(kind) = tree.condition_data(id) else {
            self.degraded = true;
            return;
        };
        match resolve_condition(&*cx.scene, cx.tags, &tree.label(id), kind) {
            Ok(objects) => self.objects = objects,
            Err(error) => {
                cx.report(error);
                self.degraded = true;
            }
        }
    }

    fn update(&mut self, tree: &mut ProcessTree, cx: &mut Ctx<'_>, id: EntityId) -> Progress {
        if !self.forced {
            if self.degraded {
                return Progress::Done;
            }
            let Some(kind) = tree.condition_data(id) else {
                return Progress::Done;
            };
            if !self.predicate(kind, cx) {
                return Progress::Running;
            }
        }
        tree.node_mut(id).set_completed(true);
        Progress::Done
    }

    fn predicate(&mut self, kind: &ConditionKind, cx: &Ctx<'_>) -> bool {
        let scene = &*cx.scene;
        let first = self.objects.candidates.first().copied();
        match kind {
            ConditionKind::Grabbed { .. } => first.is_some_and(|h| scene.is_grabbed(h)),
            ConditionKind::Touched { .. } => first.is_some_and(|h| scene.is_touched(h)),
            ConditionKind::Snapped { .. } | ConditionKind::SnappedWithTag { .. } => {
                let Some(zone) = self.objects.zone else {
                    return false;
                };
                self.objects
                    .candidates
                    .iter()
                    .any(|h| scene.snapped_zone(*h) == Some(zone))
            }
            ConditionKind::Timeout { seconds } => {
                self.elapsed += cx.delta;
                self.elapsed >= *seconds
            }
        }
    }

    fn release(&mut self) {
        self.objects = ConditionObjects::default();
    }

    /// Produce the scene state a natural completion would have left behind,
    /// then complete on the next update. A degraded condition completes too,
    /// without touching the scene.
    fn fast_forward(&mut self, tree: &ProcessTree, cx: &mut Ctx<'_>, id: EntityId) {
        self.forced = true;
        if self.degraded {
            return;
        }
        let Some(kind) = tree.condition_data(id) else {
            return;
        };
        let first = self.objects.candidates.first().copied();
        match (kind, first, self.objects.zone) {
            (ConditionKind::Grabbed { .. }, Some(handle), _) => {
                if !cx.scene.is_grabbed(handle) {
                    cx.scene.fast_forward_grab(handle);
                }
            }
            (ConditionKind::Touched { .. }, Some(handle), _) => {
                if !cx.scene.is_touched(handle) {
                    cx.scene.fast_forward_touch(handle);
                }
            }
            (ConditionKind::Snapped { .. }, Some(handle), Some(zone)) => {
                if cx.scene.snapped_zone(handle) != Some(zone) {
                    cx.scene.fast_forward_snap(handle, zone);
                }
            }
            (ConditionKind::SnappedWithTag { .. }, _, Some(zone)) => {
                let chosen = pick_snap_candidate(&*cx.scene, &self.objects.candidates, zone);
                if let Some(handle) = chosen {
                    cx.scene.fast_forward_snap(handle, zone);
                }
            }
            (ConditionKind::Timeout { seconds }, _, _) => self.elapsed = *seconds,
            _ => {}
        }
    }
}
