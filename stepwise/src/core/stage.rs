//! Lifecycle stages and stage-change observation.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::core::ids::EntityId;
use crate::core::stage_process::StageProcess;

/// Stage of an entity lifecycle.
///
/// `Inactive` and `Active` are stable; the others are transient.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    #[default]
    Inactive,
    Activating,
    Active,
    Deactivating,
    Aborting,
}

impl Stage {
    pub fn is_stable(self) -> bool {
        matches!(self, Stage::Inactive | Stage::Active)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Inactive => "inactive",
            Stage::Activating => "activating",
            Stage::Active => "active",
            Stage::Deactivating => "deactivating",
            Stage::Aborting => "aborting",
        };
        f.write_str(name)
    }
}

/// How the last run of an entity ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    Completed,
    Aborted,
}

/// Role of an entity in the process tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Process,
    Chapter,
    Step,
    Transition,
    Behavior,
    Condition,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::Process => "process",
            Role::Chapter => "chapter",
            Role::Step => "step",
            Role::Transition => "transition",
            Role::Behavior => "behavior",
            Role::Condition => "condition",
        };
        f.write_str(name)
    }
}

/// Per-entity lifecycle state. Owned by its entity.
///
/// Only one stage is current. The stage process is taken out while it runs so
/// that it can drive other entities of the same arena.
#[derive(Debug, Default)]
pub struct Lifecycle {
    pub(crate) stage: Stage,
    pub(crate) process: Option<StageProcess>,
    pub(crate) process_done: bool,
    pub(crate) deactivate_pending: bool,
    pub(crate) fast_forward: bool,
    pub(crate) last_exit: Option<Exit>,
    /// Pass in which the current stage process last ran.
    pub(crate) updated_in: Option<u64>,
}

impl Lifecycle {
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// True once the current stage process has signalled that it is done.
    pub fn is_process_done(&self) -> bool {
        self.process_done
    }

    /// Active, with the active-stage process finished.
    pub fn is_active_done(&self) -> bool {
        self.stage == Stage::Active && self.process_done
    }

    pub fn last_exit(&self) -> Option<Exit> {
        self.last_exit
    }

    pub fn is_fast_forwarding(&self) -> bool {
        self.fast_forward
    }
}

/// A stage transition, reported synchronously to the observer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageChange {
    pub entity: EntityId,
    pub uid: Uuid,
    pub name: String,
    pub role: Role,
    pub from: Stage,
    pub to: Stage,
}

/// Callback invoked on every stage transition.
pub trait LifecycleObserver {
    fn stage_changed(&mut self, change: &StageChange);
}

/// Observer that ignores every change.
#[derive(Debug, Default)]
pub struct NullObserver;

impl LifecycleObserver for NullObserver {
    fn stage_changed(&mut self, _change: &StageChange) {}
}

/// Which roles get their stage changes logged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogFilter {
    pub processes: bool,
    pub chapters: bool,
    pub steps: bool,
    pub transitions: bool,
    pub behaviors: bool,
    pub conditions: bool,
    /// Log lock reservations and releases.
    pub lock_state: bool,
}

impl Default for LogFilter {
    fn default() -> Self {
        Self {
            processes: true,
            chapters: true,
            steps: true,
            transitions: false,
            behaviors: false,
            conditions: false,
            lock_state: false,
        }
    }
}

impl LogFilter {
    pub fn allows(&self, role: Role) -> bool {
        match role {
            Role::Process => self.processes,
            Role::Chapter => self.chapters,
            Role::Step => self.steps,
            Role::Transition => self.transitions,
            Role::Behavior => self.behaviors,
            Role::Condition => self.conditions,
        }
    }
}

/// Logs stage changes through `tracing`, filtered by role.
#[derive(Debug, Clone, Default)]
pub struct TracingObserver {
    filter: LogFilter,
}

impl TracingObserver {
    pub fn new(filter: LogFilter) -> Self {
        Self { filter }
    }
}

impl LifecycleObserver for TracingObserver {
    fn stage_changed(&mut self, change: &StageChange) {
        if !self.filter.allows(change.role) {
            return;
        }
        debug!(
            role = %change.role,
            name = %change.name,
            uid = %change.uid,
            from = %change.from,
            to = %change.to,
            "stage changed"
        );
    }
}
