//! Outer per-quantum loop and global commands.
//!
//! The runner owns the session and at most one process tree. Each `tick`
//! advances the whole tree by one quantum. Commands (abort, skip, restart)
//! take effect between ticks.

use tracing::{error, info};

use crate::core::collection::SequenceCursor;
use crate::core::ids::EntityId;
use crate::core::references::check_references;
use crate::core::scene::Scene;
use crate::core::session::Session;
use crate::core::stage::{Exit, LifecycleObserver, Stage, TracingObserver};
use crate::core::transition::{RouteGoal, route};
use crate::core::tree::ProcessTree;
use crate::error::{ConfigurationError, EngineError, RunnerError};
use crate::io::config::EngineConfig;

/// Result of one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// No process, or the process is inactive without having completed.
    Idle,
    Running,
    Complete,
}

/// How `skip_to_step` reaches its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipPolicy {
    /// Abort the current step and start the target directly.
    Jump,
    /// Autocomplete the route toward the target, running every step on the way.
    FastForward,
}

pub struct Runner<S: Scene> {
    config: EngineConfig,
    session: Session<S>,
    observer: Box<dyn LifecycleObserver>,
    tree: Option<ProcessTree>,
    quantum: u64,
    halted: Option<EngineError>,
}

impl<S: Scene> Runner<S> {
    pub fn new(mut session: Session<S>, config: EngineConfig) -> Self {
        session.set_lock_logging(config.logging.lock_state);
        let observer = Box::new(TracingObserver::new(config.logging.clone()));
        Self {
            config,
            session,
            observer,
            tree: None,
            quantum: 0,
            halted: None,
        }
    }

    /// Replace the stage-change observer.
    pub fn with_observer(mut self, observer: Box<dyn LifecycleObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Fully deactivate the current process, if any, then activate `tree`.
    ///
    /// Unresolvable references are recorded as diagnostics; they do not stop
    /// the process from starting.
    pub fn activate_process(&mut self, mut tree: ProcessTree) -> Result<(), RunnerError> {
        self.drain_current()?;
        let problems = check_references(&tree, &self.session.scene, &self.session.tags);
        self.session.record(problems);
        self.halted = None;
        let root = tree.root();
        info!(process = %tree.label(root), "activating process");
        let mut cx = self.session.context(&mut *self.observer, 0.0);
        tree.activate(&mut cx, root)?;
        self.tree = Some(tree);
        Ok(())
    }

    pub fn tick(&mut self) -> Result<TickOutcome, RunnerError> {
        self.tick_with(self.config.tick_seconds)
    }

    /// Advance the process by one quantum covering `delta` seconds.
    ///
    /// After an invalid transition the runner stops ticking and keeps
    /// returning the error until a jump or restart clears it.
    pub fn tick_with(&mut self, delta: f64) -> Result<TickOutcome, RunnerError> {
        if let Some(halt) = &self.halted {
            return Err(RunnerError::Halted(halt.clone()));
        }
        let Some(tree) = self.tree.as_mut() else {
            return Ok(TickOutcome::Idle);
        };
        let root = tree.root();
        if tree.stage(root) == Stage::Inactive {
            return Ok(outcome(tree));
        }
        self.quantum += 1;
        let chapter_before = current_chapter(tree);
        let step_before = current_step(tree);

        let mut cx = self.session.context(&mut *self.observer, delta);
        let mut result = tree.update(&mut cx, root);
        if result.is_ok() && tree.node(root).lifecycle().is_active_done() {
            result = tree
                .deactivate(&mut cx, root)
                .and_then(|()| tree.update(&mut cx, root));
        }
        if let Err(halt) = result {
            error!(quantum = self.quantum, error = %halt, "process halted");
            self.halted = Some(halt.clone());
            return Err(RunnerError::Halted(halt));
        }

        if let Some(chapter) = current_chapter(tree).filter(|c| Some(*c) != chapter_before) {
            info!(quantum = self.quantum, chapter = %tree.label(chapter), "entered chapter");
        }
        if let Some(step) = current_step(tree).filter(|s| Some(*s) != step_before) {
            info!(quantum = self.quantum, step = %tree.label(step), "entered step");
        }
        Ok(outcome(tree))
    }

    pub fn is_process_complete(&self) -> bool {
        self.tree
            .as_ref()
            .is_some_and(|tree| outcome(tree) == TickOutcome::Complete)
    }

    pub fn current_chapter(&self) -> Option<EntityId> {
        self.tree.as_ref().and_then(current_chapter)
    }

    pub fn current_step(&self) -> Option<EntityId> {
        self.tree.as_ref().and_then(current_step)
    }

    /// Abort the running step. Its chapter halts until a jump or restart.
    pub fn abort_current_step(&mut self) -> Result<(), RunnerError> {
        let tree = self.tree.as_mut().ok_or(RunnerError::NoProcess)?;
        let Some(step) = current_step(tree) else {
            return Ok(());
        };
        info!(step = %tree.label(step), "aborting step");
        let mut cx = self.session.context(&mut *self.observer, 0.0);
        tree.abort(&mut cx, step)?;
        Ok(())
    }

    /// Autocomplete the running step. It leaves through its first transition.
    /// Returns false if no step is running or it was already done.
    pub fn fast_forward_current_step(&mut self) -> Result<bool, RunnerError> {
        let tree = self.tree.as_mut().ok_or(RunnerError::NoProcess)?;
        let Some(step) = current_step(tree) else {
            return Ok(false);
        };
        let mut cx = self.session.context(&mut *self.observer, 0.0);
        Ok(tree.autocomplete(&mut cx, step)?)
    }

    /// Abort the whole process.
    pub fn abort_process(&mut self) -> Result<(), RunnerError> {
        let tree = self.tree.as_mut().ok_or(RunnerError::NoProcess)?;
        let root = tree.root();
        let mut cx = self.session.context(&mut *self.observer, 0.0);
        tree.abort(&mut cx, root)?;
        self.halted = None;
        Ok(())
    }

    /// Abort the current chapter and run it again from its first step.
    pub fn restart_chapter(&mut self) -> Result<(), RunnerError> {
        let tree = self.tree.as_mut().ok_or(RunnerError::NoProcess)?;
        let root = tree.root();
        let chapter = current_chapter(tree).ok_or(RunnerError::NoProcess)?;
        info!(chapter = %tree.label(chapter), "restarting chapter");
        let mut cx = self.session.context(&mut *self.observer, 0.0);
        tree.abort(&mut cx, chapter)?;
        tree.request_jump(root, chapter);
        self.halted = None;
        Ok(())
    }

    pub fn skip_to_step(&mut self, target: EntityId, policy: SkipPolicy) -> Result<(), RunnerError> {
        let tree = self.tree.as_ref().ok_or(RunnerError::NoProcess)?;
        let root = tree.root();
        let target_chapter = tree
            .chapter_of(target)
            .filter(|chapter| tree.is_owned_by(*chapter, root))
            .ok_or_else(|| RunnerError::NotAStep(tree.label(target)))?;
        match policy {
            SkipPolicy::Jump => self.jump_to_step(target, target_chapter),
            SkipPolicy::FastForward => self.fast_forward_to_step(target, target_chapter),
        }
    }

    fn jump_to_step(&mut self, target: EntityId, target_chapter: EntityId) -> Result<(), RunnerError> {
        let tree = self.tree.as_mut().ok_or(RunnerError::NoProcess)?;
        let root = tree.root();
        let chapter = current_chapter(tree);
        let mut cx = self.session.context(&mut *self.observer, 0.0);
        let jumped = if chapter == Some(target_chapter) && tree.stage(target_chapter) == Stage::Active
        {
            if let Some(step) = current_step(tree) {
                tree.abort(&mut cx, step)?;
            }
            tree.request_jump(target_chapter, target)
        } else {
            if let Some(chapter) = chapter {
                tree.abort(&mut cx, chapter)?;
            }
            let jumped = tree.request_jump(root, target_chapter);
            if jumped {
                tree.set_chapter_entry(target_chapter, target);
            }
            jumped
        };
        if !jumped {
            return Err(RunnerError::StepNotReachable {
                target: tree.label(target),
            });
        }
        info!(step = %tree.label(target), "jumping to step");
        self.halted = None;
        Ok(())
    }

    fn fast_forward_to_step(
        &mut self,
        target: EntityId,
        target_chapter: EntityId,
    ) -> Result<(), RunnerError> {
        let limit = self.config.max_fast_forward_quanta;
        let label = self
            .tree
            .as_ref()
            .map(|tree| tree.label(target))
            .ok_or(RunnerError::NoProcess)?;
        let unreachable = || RunnerError::StepNotReachable {
            target: label.clone(),
        };
        for _ in 0..limit {
            let tree = self.tree.as_mut().ok_or(RunnerError::NoProcess)?;
            if tree.stage(tree.root()) == Stage::Inactive {
                return Err(unreachable());
            }
            if let Some(chapter) = current_chapter(tree) {
                let step = current_step(tree);
                if step == Some(target) {
                    return Ok(());
                }
                let chapters = tree.chapters();
                let position = |c: EntityId| chapters.iter().position(|x| *x == c);
                if position(target_chapter) < position(chapter)
                    || tree.sequence(chapter).is_some_and(SequenceCursor::is_halted)
                {
                    return Err(unreachable());
                }
                if let Some(step) = step {
                    let goal = if chapter == target_chapter {
                        RouteGoal::Step(target)
                    } else {
                        RouteGoal::ChapterEnd
                    };
                    let transition = if tree.stage(step) == Stage::Active {
                        Some(route(tree, chapter, step, goal).ok_or_else(unreachable)?)
                    } else {
                        None
                    };
                    let mut cx = self.session.context(&mut *self.observer, 0.0);
                    for behavior in tree.behaviors(step) {
                        tree.autocomplete(&mut cx, behavior)?;
                    }
                    if let Some(transition) = transition {
                        tree.autocomplete(&mut cx, transition)?;
                    }
                }
            }
            self.tick_with(0.0)?;
        }
        Err(RunnerError::FastForwardExhausted {
            target: label,
            quanta: limit,
        })
    }

    /// Deactivate (not abort) the current process until it is inactive.
    fn drain_current(&mut self) -> Result<(), RunnerError> {
        let Some(mut tree) = self.tree.take() else {
            return Ok(());
        };
        let root = tree.root();
        let limit = self.config.max_drain_quanta;
        let mut cx = self.session.context(&mut *self.observer, self.config.tick_seconds);
        let mut result = tree.deactivate(&mut cx, root);
        for _ in 0..limit {
            if result.is_err() || tree.stage(root) == Stage::Inactive {
                break;
            }
            result = tree.update(&mut cx, root);
        }
        if let Err(err) = result {
            self.tree = Some(tree);
            return Err(err.into());
        }
        if tree.stage(root) != Stage::Inactive {
            self.tree = Some(tree);
            return Err(RunnerError::DrainTimeout { quanta: limit });
        }
        Ok(())
    }

    /// Fully deactivate the current process and hand back the session.
    pub fn end_session(mut self) -> Result<Session<S>, RunnerError> {
        self.drain_current()?;
        Ok(self.session)
    }

    pub fn diagnostics(&self) -> &[ConfigurationError] {
        self.session.diagnostics()
    }

    pub fn halted(&self) -> Option<&EngineError> {
        self.halted.as_ref()
    }

    /// Number of quanta ticked so far.
    pub fn quantum(&self) -> u64 {
        self.quantum
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn session(&self) -> &Session<S> {
        &self.session
    }

    pub fn scene(&self) -> &S {
        &self.session.scene
    }

    pub fn scene_mut(&mut self) -> &mut S {
        &mut self.session.scene
    }

    pub fn tree(&self) -> Option<&ProcessTree> {
        self.tree.as_ref()
    }

    /// Edit the tree between ticks. Running entities refuse structural edits.
    pub fn tree_mut(&mut self) -> Option<&mut ProcessTree> {
        self.tree.as_mut()
    }
}

fn current_chapter(tree: &ProcessTree) -> Option<EntityId> {
    tree.current_child(tree.root())
}

fn current_step(tree: &ProcessTree) -> Option<EntityId> {
    current_chapter(tree).and_then(|chapter| tree.current_child(chapter))
}

fn outcome(tree: &ProcessTree) -> TickOutcome {
    let lifecycle = tree.node(tree.root()).lifecycle();
    match (lifecycle.stage(), lifecycle.last_exit()) {
        (Stage::Inactive, Some(Exit::Completed)) => TickOutcome::Complete,
        (Stage::Inactive, _) => TickOutcome::Idle,
        _ => TickOutcome::Running,
    }
}
