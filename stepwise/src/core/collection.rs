//! Child composition for collection entities.
//!
//! [`ChildSet`] drives all children at once (parallel composition): activate
//! or signal every child in list order, then poll each quantum until they
//! settle. [`SequenceCursor`] runs one child at a time, in list order or by
//! following the transition graph of a chapter.
//!
//! Both re-check ownership every quantum so a child detached from its owner
//! is never driven by it again.

use tracing::{debug, warn};

use crate::core::ids::EntityId;
use crate::core::session::Ctx;
use crate::core::stage::{Exit, Stage};
use crate::core::stage_process::{Progress, StageProcess};
use crate::core::tree::ProcessTree;
use crate::error::EngineError;

/// What a child must reach before an activate-all process is done.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settle {
    /// The child is Active.
    Activated,
    /// The child is Active and its active-stage process finished.
    ActiveDone,
}

/// Snapshot of the children of `owner` taken when a stage process starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildSet {
    owner: EntityId,
    children: Vec<EntityId>,
}

impl ChildSet {
    pub fn new(owner: EntityId, children: Vec<EntityId>) -> Self {
        Self { owner, children }
    }

    fn live(&self, tree: &ProcessTree) -> Vec<EntityId> {
        tree.owned(self.owner, &self.children)
    }

    pub(crate) fn activate_all(&self, tree: &mut ProcessTree, cx: &mut Ctx<'_>) {
        for child in self.live(tree) {
            if tree.stage(child) == Stage::Inactive {
                tree.activate_entity(cx, child);
            }
        }
    }

    /// Update every child that is not inactive, in list order.
    pub(crate) fn update_all(
        &self,
        tree: &mut ProcessTree,
        cx: &mut Ctx<'_>,
    ) -> Result<(), EngineError> {
        for child in self.live(tree) {
            if tree.stage(child) != Stage::Inactive {
                tree.update_entity(cx, child)?;
            }
        }
        Ok(())
    }

    pub(crate) fn deactivate_all(&self, tree: &mut ProcessTree, cx: &mut Ctx<'_>) {
        for child in self.live(tree) {
            tree.deactivate_entity(cx, child);
        }
    }

    /// First phase of a collection abort: every child still running is told
    /// to abort in the same quantum.
    pub(crate) fn abort_all(&self, tree: &mut ProcessTree, cx: &mut Ctx<'_>) {
        for child in self.live(tree) {
            tree.abort_entity(cx, child);
        }
    }

    pub(crate) fn fast_forward_all(&self, tree: &mut ProcessTree, cx: &mut Ctx<'_>) {
        for child in self.live(tree) {
            tree.mark_fast_forward(cx, child);
        }
    }

    pub(crate) fn settled(&self, tree: &ProcessTree, until: Settle) -> bool {
        self.live(tree).into_iter().all(|child| {
            let lifecycle = tree.lc(child);
            match (lifecycle.stage(), until) {
                (Stage::Inactive, _) | (Stage::Active, Settle::Activated) => true,
                (Stage::Active, Settle::ActiveDone) => lifecycle.is_process_done(),
                _ => false,
            }
        })
    }

    pub(crate) fn all_completed(&self, tree: &ProcessTree) -> bool {
        self.live(tree)
            .into_iter()
            .all(|child| tree.is_completed(child))
    }

    pub(crate) fn all_inactive(&self, tree: &ProcessTree) -> bool {
        self.live(tree)
            .into_iter()
            .all(|child| tree.stage(child) == Stage::Inactive)
    }
}

/// How a sequence picks the child that follows a finished one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    /// Next child in list order.
    List,
    /// Target of the transition the finished step fired.
    Graph,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cursor {
    /// About to activate a child; `None` ends the sequence.
    Pending(Option<EntityId>),
    Running(EntityId),
    /// Child finished and is deactivating.
    Draining(EntityId),
    /// Running child was aborted; waits for a jump.
    Halted,
    Finished,
}

/// Runs the children of `owner` one at a time. At most one child is ever
/// outside the Inactive stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceCursor {
    owner: EntityId,
    order: Order,
    state: Cursor,
    jump: Option<EntityId>,
    fast_forward: bool,
}

impl SequenceCursor {
    pub fn new(owner: EntityId, order: Order, first: Option<EntityId>) -> Self {
        Self {
            owner,
            order,
            state: Cursor::Pending(first),
            jump: None,
            fast_forward: false,
        }
    }

    /// Child currently running or draining.
    pub fn current(&self) -> Option<EntityId> {
        match self.state {
            Cursor::Running(child) | Cursor::Draining(child) => Some(child),
            _ => None,
        }
    }

    pub fn is_halted(&self) -> bool {
        self.state == Cursor::Halted
    }

    pub fn is_finished(&self) -> bool {
        self.state == Cursor::Finished
    }

    /// Continue with `target` once the current child is inactive.
    pub fn jump_to(&mut self, target: EntityId) {
        match self.state {
            Cursor::Running(_) | Cursor::Draining(_) => self.jump = Some(target),
            Cursor::Pending(_) | Cursor::Halted | Cursor::Finished => {
                self.jump = None;
                self.state = Cursor::Pending(Some(target));
            }
        }
    }

    pub(crate) fn fast_forward(&mut self, tree: &mut ProcessTree, cx: &mut Ctx<'_>) {
        self.fast_forward = true;
        if let Cursor::Running(child) = self.state {
            tree.mark_fast_forward(cx, child);
        }
    }

    pub(crate) fn update(
        &mut self,
        tree: &mut ProcessTree,
        cx: &mut Ctx<'_>,
    ) -> Result<Progress, EngineError> {
        if let Some(child) = self.current() {
            if tree.stage(child) != Stage::Inactive {
                tree.update_entity(cx, child)?;
            }
        }
        // A child may only be started once per quantum; instant cycles in the
        // transition graph continue on the next update.
        let mut started = Vec::new();
        loop {
            match self.state {
                Cursor::Pending(None) => self.state = Cursor::Finished,
                Cursor::Pending(Some(child)) => {
                    if !tree.is_owned_by(child, self.owner) {
                        warn!(
                            owner = %tree.label(self.owner),
                            child = %tree.label(child),
                            "sequence entry is no longer owned, ending sequence"
                        );
                        self.state = Cursor::Finished;
                        continue;
                    }
                    if started.contains(&child) || tree.stage(child) != Stage::Inactive {
                        return Ok(Progress::Running);
                    }
                    started.push(child);
                    tree.activate_entity(cx, child);
                    if self.fast_forward {
                        tree.mark_fast_forward(cx, child);
                    }
                    tree.update_entity(cx, child)?;
                    self.state = Cursor::Running(child);
                }
                Cursor::Running(child) => {
                    let lifecycle = tree.lc(child);
                    if lifecycle.stage() == Stage::Inactive {
                        if lifecycle.last_exit() == Some(Exit::Aborted) && self.jump.is_none() {
                            debug!(owner = %tree.label(self.owner), "sequence halted after abort");
                            self.state = Cursor::Halted;
                            return Ok(Progress::Running);
                        }
                        self.state = Cursor::Pending(self.successor(tree, child)?);
                    } else if lifecycle.is_active_done() {
                        tree.deactivate_entity(cx, child);
                        tree.update_entity(cx, child)?;
                        self.state = Cursor::Draining(child);
                    } else {
                        return Ok(Progress::Running);
                    }
                }
                Cursor::Draining(child) => {
                    if tree.stage(child) != Stage::Inactive {
                        return Ok(Progress::Running);
                    }
                    self.state = Cursor::Pending(self.successor(tree, child)?);
                }
                Cursor::Halted => return Ok(Progress::Running),
                Cursor::Finished => return Ok(Progress::Done),
            }
        }
    }

    fn successor(
        &mut self,
        tree: &ProcessTree,
        finished: EntityId,
    ) -> Result<Option<EntityId>, EngineError> {
        if let Some(target) = self.jump.take() {
            return Ok(Some(target));
        }
        match self.order {
            Order::List => {
                let children = tree.owned(self.owner, &tree.children(self.owner));
                let next = children
                    .iter()
                    .position(|c| *c == finished)
                    .and_then(|i| children.get(i + 1).copied());
                Ok(next)
            }
            Order::Graph => {
                let Some(fired) = tree.fired_transition(finished) else {
                    return Ok(None);
                };
                match tree.transition_target(fired) {
                    None => Ok(None),
                    Some(target) if tree.is_owned_by(target, self.owner) => Ok(Some(target)),
                    Some(target) => Err(EngineError::InvalidTransition {
                        step: tree.label(finished),
                        reason: format!(
                            "target {} is not a step of {}",
                            tree.label(target),
                            tree.label(self.owner)
                        ),
                    }),
                }
            }
        }
    }
}

impl ProcessTree {
    /// Sequence cursor of `owner`'s current stage, if it runs one.
    pub fn sequence(&self, owner: EntityId) -> Option<&SequenceCursor> {
        match self.nodes.get(owner.index())?.lifecycle.process.as_ref()? {
            StageProcess::Sequence(cursor) => Some(cursor),
            _ => None,
        }
    }

    pub(crate) fn sequence_mut(&mut self, owner: EntityId) -> Option<&mut SequenceCursor> {
        match self.nodes.get_mut(owner.index())?.lifecycle.process.as_mut()? {
            StageProcess::Sequence(cursor) => Some(cursor),
            _ => None,
        }
    }

    /// Child `owner` is currently running, if it runs a sequence.
    pub fn current_child(&self, owner: EntityId) -> Option<EntityId> {
        self.sequence(owner).and_then(SequenceCursor::current)
    }

    /// Make the sequence of `owner` continue with `target`. Returns false if
    /// `owner` is not running a sequence or does not own `target`.
    pub fn request_jump(&mut self, owner: EntityId, target: EntityId) -> bool {
        if !self.is_owned_by(target, owner) {
            return false;
        }
        match self.sequence_mut(owner) {
            Some(cursor) => {
                cursor.jump_to(target);
                true
            }
            None => false,
        }
    }
}
