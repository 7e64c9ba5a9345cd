//! Error taxonomy for the engine and the driver.
//!
//! Configuration problems are collected as diagnostics and never stop a run.
//! Invalid transitions halt the affected chapter and surface through the
//! driver. Every error names the offending entity so authors can find it.

use std::fmt;

use thiserror::Error;
use uuid::Uuid;

use crate::core::ids::{EntityId, ObjectId, TagId};
use crate::core::scene::Capability;
use crate::core::stage::Stage;

/// Name and stable id of an entity, used in error messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityLabel {
    pub name: String,
    pub uid: Uuid,
}

impl fmt::Display for EntityLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}' ({})", self.name, self.uid)
    }
}

/// A reference that could not be resolved against the scene.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    #[error("{entity}: scene object {object} not found")]
    MissingObject { entity: EntityLabel, object: ObjectId },
    #[error("{entity}: tag {tag} is not registered")]
    UnknownTag { entity: EntityLabel, tag: TagId },
    #[error("{entity}: no scene object carries tag '{label}'")]
    EmptyTag { entity: EntityLabel, label: String },
    #[error("{entity}: object '{object}' lacks capability {capability}")]
    MissingCapability {
        entity: EntityLabel,
        object: String,
        capability: Capability,
    },
    #[error("{entity}: object '{object}' has no component '{component}'")]
    MissingComponent {
        entity: EntityLabel,
        object: String,
        component: String,
    },
}

impl ConfigurationError {
    pub fn entity(&self) -> &EntityLabel {
        match self {
            ConfigurationError::MissingObject { entity, .. }
            | ConfigurationError::UnknownTag { entity, .. }
            | ConfigurationError::EmptyTag { entity, .. }
            | ConfigurationError::MissingCapability { entity, .. }
            | ConfigurationError::MissingComponent { entity, .. } => entity,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("invalid transition out of step {step}: {reason}")]
    InvalidTransition { step: EntityLabel, reason: String },
    #[error("unknown entity {0}")]
    UnknownEntity(EntityId),
    #[error("{entity} is not a {expected}")]
    WrongKind {
        entity: EntityLabel,
        expected: &'static str,
    },
    #[error("{entity} cannot be edited while {stage}")]
    EntityBusy { entity: EntityLabel, stage: Stage },
    #[error("{entity} is already owned by {parent}")]
    AlreadyOwned {
        entity: EntityLabel,
        parent: EntityLabel,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RunnerError {
    #[error("no process is active")]
    NoProcess,
    #[error("process halted: {0}")]
    Halted(EngineError),
    #[error("previous process did not become inactive within {quanta} quanta")]
    DrainTimeout { quanta: u32 },
    #[error("fast-forward to {target} did not finish within {quanta} quanta")]
    FastForwardExhausted { target: EntityLabel, quanta: u32 },
    #[error("step {target} cannot be reached from the current position")]
    StepNotReachable { target: EntityLabel },
    #[error("{0} is not a step of the active process")]
    NotAStep(EntityLabel),
    #[error(transparent)]
    Engine(#[from] EngineError),
}
