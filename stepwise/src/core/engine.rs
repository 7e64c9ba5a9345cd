//! Lifecycle driving over the process arena.
//!
//! Stage changes cascade within one call: an instant process finishes during
//! the same update that started it and the entity moves on to its next stage
//! immediately. Commands that conflict with one already in progress (abort
//! while aborting, fast-forward while fast-forwarding) are coalesced.

use tracing::{debug, warn};

use crate::core::ids::EntityId;
use crate::core::locks::LockableObjects;
use crate::core::session::Ctx;
use crate::core::stage::{Exit, Role, Stage, StageChange};
use crate::core::stage_process::{Progress, StageProcess};
use crate::core::tree::ProcessTree;
use crate::error::EngineError;

/// Upper bound on stage changes an entity makes during one update.
const MAX_STAGE_HOPS: usize = 8;

impl ProcessTree {
    /// Request activation. Only Inactive entities react.
    pub fn activate(&mut self, cx: &mut Ctx<'_>, id: EntityId) -> Result<(), EngineError> {
        self.get(id)?;
        self.activate_entity(cx, id);
        Ok(())
    }

    /// Request deactivation. An entity still activating finishes activating
    /// first; an inactive or already deactivating entity ignores the request.
    pub fn deactivate(&mut self, cx: &mut Ctx<'_>, id: EntityId) -> Result<(), EngineError> {
        self.get(id)?;
        self.deactivate_entity(cx, id);
        Ok(())
    }

    /// Abort from any stage. Leaves reach Inactive immediately, collections
    /// after their children drained.
    pub fn abort(&mut self, cx: &mut Ctx<'_>, id: EntityId) -> Result<(), EngineError> {
        self.get(id)?;
        self.abort_entity(cx, id);
        Ok(())
    }

    /// Collapse the remaining work of `id` and its running descendants.
    pub fn fast_forward(&mut self, cx: &mut Ctx<'_>, id: EntityId) -> Result<(), EngineError> {
        self.get(id)?;
        self.pass += 1;
        self.mark_fast_forward(cx, id);
        self.update_entity(cx, id)
    }

    /// Advance `id` by one quantum.
    pub fn update(&mut self, cx: &mut Ctx<'_>, id: EntityId) -> Result<(), EngineError> {
        self.get(id)?;
        self.pass += 1;
        self.update_entity(cx, id)
    }

    pub(crate) fn activate_entity(&mut self, cx: &mut Ctx<'_>, id: EntityId) {
        if self.lc(id).stage != Stage::Inactive {
            debug!(entity = %self.label(id), stage = %self.lc(id).stage, "activate ignored");
            return;
        }
        self.enter_stage(cx, id, Stage::Activating);
    }

    pub(crate) fn deactivate_entity(&mut self, cx: &mut Ctx<'_>, id: EntityId) {
        match self.lc(id).stage {
            Stage::Activating => self.lc_mut(id).deactivate_pending = true,
            Stage::Active => self.begin_deactivation(cx, id),
            Stage::Inactive | Stage::Deactivating | Stage::Aborting => {}
        }
    }

    pub(crate) fn abort_entity(&mut self, cx: &mut Ctx<'_>, id: EntityId) {
        match self.lc(id).stage {
            Stage::Inactive => return,
            Stage::Aborting => {
                debug!(entity = %self.label(id), "abort already draining, coalesced");
                return;
            }
            Stage::Activating | Stage::Active | Stage::Deactivating => {}
        }
        self.end_process(cx, id);
        self.enter_stage(cx, id, Stage::Aborting);
        // Abort drains only touch children; an error here cannot come from a
        // transition being selected.
        if let Err(error) = self.update_entity(cx, id) {
            debug!(entity = %self.label(id), %error, "error while draining abort");
        }
    }

    pub(crate) fn mark_fast_forward(&mut self, cx: &mut Ctx<'_>, id: EntityId) {
        let lifecycle = self.lc(id);
        if lifecycle.fast_forward || matches!(lifecycle.stage, Stage::Inactive | Stage::Aborting) {
            debug!(entity = %self.label(id), "fast-forward coalesced");
            return;
        }
        self.lc_mut(id).fast_forward = true;
        let stage = self.lc(id).stage;
        if let Some(mut process) = self.lc_mut(id).process.take() {
            let rearm = process.fast_forward(self, cx, id);
            if self.lc(id).stage == stage {
                // The collapsed work may finish within the current pass.
                let lifecycle = self.lc_mut(id);
                lifecycle.updated_in = None;
                if rearm {
                    lifecycle.process_done = false;
                }
            }
            self.restore_process(id, stage, process);
        }
    }

    /// Run the current stage process once and follow every stage change it
    /// allows within this quantum.
    pub(crate) fn update_entity(
        &mut self,
        cx: &mut Ctx<'_>,
        id: EntityId,
    ) -> Result<(), EngineError> {
        for _ in 0..MAX_STAGE_HOPS {
            let stage = self.lc(id).stage;
            if stage == Stage::Inactive {
                return Ok(());
            }
            if stage == Stage::Active && self.lc(id).deactivate_pending {
                self.begin_deactivation(cx, id);
                continue;
            }
            if !self.lc(id).process_done {
                if self.lc(id).updated_in == Some(self.pass) {
                    return Ok(());
                }
                let Some(mut process) = self.lc_mut(id).process.take() else {
                    return Ok(());
                };
                let result = process.update(self, cx, id);
                let unchanged = self.lc(id).stage == stage;
                if unchanged {
                    self.lc_mut(id).updated_in = Some(self.pass);
                    self.restore_process(id, stage, process);
                }
                let progress = result?;
                if !unchanged {
                    continue;
                }
                match progress {
                    Progress::Running => return Ok(()),
                    Progress::Done => self.lc_mut(id).process_done = true,
                }
            }
            match stage {
                Stage::Activating => self.enter_stage(cx, id, Stage::Active),
                Stage::Active | Stage::Inactive => return Ok(()),
                Stage::Deactivating => self.finish(cx, id, Exit::Completed),
                Stage::Aborting => self.finish(cx, id, Exit::Aborted),
            }
        }
        warn!(
            entity = %self.label(id),
            stage = %self.lc(id).stage,
            "stage changes truncated for this quantum"
        );
        Ok(())
    }

    fn begin_deactivation(&mut self, cx: &mut Ctx<'_>, id: EntityId) {
        self.lc_mut(id).deactivate_pending = false;
        self.end_process(cx, id);
        self.enter_stage(cx, id, Stage::Deactivating);
    }

    /// Call `end` on a process that has not finished yet.
    fn end_process(&mut self, cx: &mut Ctx<'_>, id: EntityId) {
        let done = self.lc(id).process_done;
        if let Some(mut process) = self.lc_mut(id).process.take() {
            if !done {
                process.end(self, cx, id);
            }
        }
    }

    fn restore_process(&mut self, id: EntityId, stage: Stage, process: StageProcess) {
        let lifecycle = self.lc_mut(id);
        if lifecycle.stage == stage && lifecycle.process.is_none() {
            lifecycle.process = Some(process);
        }
    }

    fn enter_stage(&mut self, cx: &mut Ctx<'_>, id: EntityId, to: Stage) {
        let from = self.lc(id).stage;
        {
            let lifecycle = self.lc_mut(id);
            lifecycle.stage = to;
            lifecycle.process = None;
            lifecycle.process_done = false;
            lifecycle.updated_in = None;
        }
        self.notify(cx, id, from, to);
        if to == Stage::Activating {
            self.prepare_activation(cx, id);
        }
        let mut process = StageProcess::for_stage(self, id, to);
        process.start(self, cx, id);
        if self.lc(id).fast_forward && self.lc(id).stage == to {
            process.fast_forward(self, cx, id);
        }
        self.restore_process(id, to, process);
    }

    fn prepare_activation(&mut self, cx: &mut Ctx<'_>, id: EntityId) {
        let entity = self.node_mut(id);
        entity.set_completed(false);
        entity.lifecycle.last_exit = None;
        if entity.role() == Role::Step {
            self.set_fired(id, None);
            let lockable = LockableObjects::collect(self, id, &*cx.scene, cx.tags);
            for object in lockable.objects {
                cx.request_locked(object, true, id);
            }
        }
    }

    fn finish(&mut self, cx: &mut Ctx<'_>, id: EntityId, exit: Exit) {
        let from = self.lc(id).stage;
        {
            let lifecycle = self.lc_mut(id);
            lifecycle.stage = Stage::Inactive;
            lifecycle.process = None;
            lifecycle.process_done = false;
            lifecycle.updated_in = None;
            lifecycle.deactivate_pending = false;
            lifecycle.fast_forward = false;
            lifecycle.last_exit = Some(exit);
        }
        self.notify(cx, id, from, Stage::Inactive);
        if self.node(id).role() == Role::Step {
            cx.release_all(id);
        }
    }

    fn notify(&self, cx: &mut Ctx<'_>, id: EntityId, from: Stage, to: Stage) {
        let entity = self.node(id);
        cx.observer.stage_changed(&StageChange {
            entity: id,
            uid: entity.uid(),
            name: entity.name().to_string(),
            role: entity.role(),
            from,
            to,
        });
    }
}
